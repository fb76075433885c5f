use std::collections::HashMap;

use parking_lot::RwLock;

use crate::{
    error::{Result, StoreErr},
    store::{DenseUpdate, TableId, TableSpec},
};

/// The rows of one table, created zeroed the first time they're touched.
#[derive(Debug)]
pub struct DenseTable {
    id: TableId,
    spec: TableSpec,
    rows: RwLock<HashMap<usize, Box<[f32]>>>,
}

impl DenseTable {
    /// Creates a new `DenseTable` without rows.
    pub fn new(id: TableId, spec: TableSpec) -> Self {
        Self {
            id,
            spec,
            rows: RwLock::new(HashMap::new()),
        }
    }

    /// Copies the content of `row` out of the table.
    pub fn get(&self, row: usize) -> Vec<f32> {
        if let Some(values) = self.rows.read().get(&row) {
            return values.to_vec();
        }

        self.rows
            .write()
            .entry(row)
            .or_insert_with(|| self.zeroed())
            .to_vec()
    }

    /// Adds `delta` into `row`.
    ///
    /// # Returns
    /// A `SizeMismatch` error if `delta` doesn't fit in the row.
    pub fn increment(&self, row: usize, delta: &DenseUpdate) -> Result<()> {
        let capacity = self.spec.row_capacity;
        if delta.end() > capacity {
            return Err(StoreErr::SizeMismatch {
                table: self.id,
                row,
                end: delta.end(),
                capacity,
            });
        }

        let mut rows = self.rows.write();
        let values = rows.entry(row).or_insert_with(|| self.zeroed());

        values[delta.offset..delta.end()]
            .iter_mut()
            .zip(&delta.values)
            .for_each(|(acc, d)| *acc += d);

        Ok(())
    }

    fn zeroed(&self) -> Box<[f32]> {
        vec![0.; self.spec.row_capacity].into_boxed_slice()
    }
}
