use std::path::Path;

use tensor::{ShardFormat, SparseTensorShard, TensorPartition, codec};

use crate::{
    error::{Result, WorkerErr},
    factors::FactorAxis,
};

/// A partition of the tensor together with its global offset along the axis it splits.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalShard {
    pub offset: usize,
    pub shard: SparseTensorShard,
}

impl LocalShard {
    /// Reads a partition file.
    ///
    /// # Arguments
    /// * `path` - The location of the file.
    /// * `axis` - The axis the partition splits, used in errors.
    ///
    /// # Returns
    /// The partition, or an error if it can't be read or has a negative offset.
    pub fn load(path: &Path, axis: FactorAxis) -> Result<Self> {
        let partition = codec::parse(path, ShardFormat::ThreeAxis)?;
        Self::try_from_partition(partition, axis)
    }

    fn try_from_partition(partition: TensorPartition, axis: FactorAxis) -> Result<Self> {
        let offset = partition.offset();
        let offset = usize::try_from(offset).map_err(|_| WorkerErr::NegativeOffset {
            axis: axis.factor_name(),
            offset,
        })?;

        Ok(Self {
            offset,
            shard: partition.shard,
        })
    }
}

/// The three partitions a worker owns, one per factor it updates.
#[derive(Debug, Clone, PartialEq)]
pub struct AxisShards {
    pub row: LocalShard,
    pub col: LocalShard,
    pub word: LocalShard,
}

impl AxisShards {
    /// Reads the partitions of every axis.
    ///
    /// # Arguments
    /// * `path_of` - Returns the partition file of an axis.
    pub fn load<F, P>(path_of: F) -> Result<Self>
    where
        F: Fn(FactorAxis) -> P,
        P: AsRef<Path>,
    {
        let load = |axis| LocalShard::load(path_of(axis).as_ref(), axis);

        Ok(Self {
            row: load(FactorAxis::Row)?,
            col: load(FactorAxis::Col)?,
            word: load(FactorAxis::Word)?,
        })
    }

    /// Returns the partition that updates `axis`.
    pub fn get(&self, axis: FactorAxis) -> &LocalShard {
        match axis {
            FactorAxis::Row => &self.row,
            FactorAxis::Col => &self.col,
            FactorAxis::Word => &self.word,
        }
    }
}
