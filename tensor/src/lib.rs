pub mod codec;
pub mod error;
pub mod shard;

pub use codec::{ShardFormat, ShardHeader, TensorPartition};
pub use error::{FormatErr, Result, TensorErr};
pub use shard::{Bag, Dims, Entries, Entry, SparseTensorShard};
