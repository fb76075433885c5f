mod error;
mod local;
mod store;
mod table;

pub use error::{Result, StoreErr};
pub use local::LocalStore;
pub use store::{DenseUpdate, FactorStore, FactorStoreTemplate, RowKind, TableId, TableSpec};
