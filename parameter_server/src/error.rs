use std::{
    error::Error,
    fmt::{self, Display},
};

use crate::store::{RowKind, TableId};

/// The specific result type for every operation of a `FactorStore`.
pub type Result<T> = std::result::Result<T, StoreErr>;

/// Error returned by a `FactorStore` whenever a request can't be served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreErr {
    UnknownRowKind(RowKind),
    UnknownTable(TableId),
    DuplicateTable(TableId),
    /// The update doesn't fit in the row.
    SizeMismatch {
        table: TableId,
        row: usize,
        end: usize,
        capacity: usize,
    },
    /// More workers tried to register than the store was created for.
    TooManyWorkers { workers: usize },
    /// A worker deregistered without being registered.
    NotRegistered,
    /// The store can't serve requests anymore.
    Unavailable(String),
}

impl Display for StoreErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreErr::UnknownRowKind(kind) => write!(f, "row kind {kind:?} was never registered"),
            StoreErr::UnknownTable(id) => write!(f, "table {id} doesn't exist"),
            StoreErr::DuplicateTable(id) => write!(f, "table {id} already exists"),
            StoreErr::SizeMismatch {
                table,
                row,
                end,
                capacity,
            } => write!(
                f,
                "update of row {row} in table {table} ends at {end} but rows hold {capacity} values"
            ),
            StoreErr::TooManyWorkers { workers } => {
                write!(f, "the store only accepts {workers} workers")
            }
            StoreErr::NotRegistered => f.write_str("the worker isn't registered"),
            StoreErr::Unavailable(reason) => write!(f, "the store is unavailable: {reason}"),
        }
    }
}

impl Error for StoreErr {}
