use crate::error::Result;

/// Identifies a table inside a store.
pub type TableId = usize;

/// The layout of the rows of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowKind {
    /// A dense row of `f32` values.
    DenseF32,
}

/// The configuration of a single table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSpec {
    pub row_kind: RowKind,
    /// The amount of values every row holds.
    pub row_capacity: usize,
    /// How many rounds behind a read may be, `0` means fully synchronous.
    pub staleness: usize,
}

impl TableSpec {
    /// Creates a new `TableSpec` for dense `f32` rows.
    ///
    /// # Arguments
    /// * `row_capacity` - The amount of values every row holds.
    /// * `staleness` - The staleness bound of the table.
    pub fn dense(row_capacity: usize, staleness: usize) -> Self {
        Self {
            row_kind: RowKind::DenseF32,
            row_capacity,
            staleness,
        }
    }
}

/// A contiguous run of values to add to a row, starting at `offset`.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseUpdate {
    pub offset: usize,
    pub values: Vec<f32>,
}

impl DenseUpdate {
    /// Creates a new `DenseUpdate`.
    pub fn new(offset: usize, values: Vec<f32>) -> Self {
        Self { offset, values }
    }

    /// Returns the exclusive end of the updated range.
    pub fn end(&self) -> usize {
        self.offset + self.values.len()
    }
}

/// The client side contract of the shared key-value parameter store.
///
/// Rows are addressed by `(table, row)` and hold dense vectors. Writes are
/// additive, the only way to order them against reads is `barrier`.
#[allow(unused)]
#[trait_variant::make(FactorStore: Send)]
pub trait FactorStoreTemplate: Sync {
    /// Registers a row layout so tables can be created with it.
    fn register_row_kind(&self, kind: RowKind);

    /// Creates a new table.
    ///
    /// # Arguments
    /// * `id` - The identifier of the new table.
    /// * `spec` - The configuration of the table.
    ///
    /// # Returns
    /// An error if the id is taken or the row kind was never registered.
    fn create_table(&self, id: TableId, spec: TableSpec) -> Result<()>;

    /// Registers the calling worker as a participant of the barriers.
    fn register_worker_thread(&self) -> Result<()>;

    /// Removes the calling worker from the store.
    fn deregister_worker_thread(&self) -> Result<()>;

    /// Reads a whole row, blocking until it satisfies the staleness bound of its table.
    ///
    /// # Arguments
    /// * `table` - The table of the row.
    /// * `row` - The row to read.
    ///
    /// # Returns
    /// A copy of the row of `row_capacity` values.
    async fn get_row(&self, table: TableId, row: usize) -> Result<Vec<f32>>;

    /// Adds `delta` to a row.
    ///
    /// # Arguments
    /// * `table` - The table of the row.
    /// * `row` - The row to update.
    /// * `delta` - The values to add and where to add them.
    ///
    /// # Returns
    /// An error if the update doesn't fit in the row.
    async fn increment_row(&self, table: TableId, row: usize, delta: &DenseUpdate) -> Result<()>;

    /// Blocks until every registered worker called it.
    async fn barrier(&self) -> Result<()>;
}
