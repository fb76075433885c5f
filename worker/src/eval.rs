use rayon::prelude::*;
use tensor::SparseTensorShard;

use crate::{
    error::{Result, WorkerErr},
    factors::{Factors, entry_chunks, predict},
};

/// Measures how well the factors reconstruct a partition of the tensor.
#[derive(Debug, Clone, Copy)]
pub struct Evaluator<'a> {
    shard: &'a SparseTensorShard,
    row_offset: usize,
    col_offset: usize,
}

impl<'a> Evaluator<'a> {
    /// Creates a new `Evaluator`.
    ///
    /// # Arguments
    /// * `shard` - The partition to evaluate, word indices must be global.
    /// * `row_offset` - The global index of the first user of the partition.
    /// * `col_offset` - The global index of the first product of the partition.
    pub fn new(shard: &'a SparseTensorShard, row_offset: usize, col_offset: usize) -> Self {
        Self {
            shard,
            row_offset,
            col_offset,
        }
    }

    /// Computes the mean over the entries of the squared L2 norm of `pred - bag`.
    ///
    /// # Returns
    /// The error, `EmptyShard` if there are no entries or `DimensionMismatch` if the partition
    /// doesn't fit the factors.
    pub fn mse(&self, factors: &Factors) -> Result<f32> {
        if self.shard.is_empty() {
            return Err(WorkerErr::EmptyShard);
        }

        factors.rank()?;
        self.check_dims(factors)?;

        let (u, p, t) = (factors.u.view(), factors.p.view(), factors.t.view());
        let n_words = self.shard.n_words();

        let partials = entry_chunks(self.shard.n_entries())
            .map(|range| -> Result<f32> {
                let mut sum = 0.;

                for e in range {
                    let entry = self.shard.entry(e)?;
                    let ur = u.row(entry.row as usize + self.row_offset);
                    let pc = p.row(entry.col as usize + self.col_offset);

                    let residual = predict(ur, pc, t) - entry.bag.to_dense(n_words);
                    sum += residual.dot(&residual);
                }

                Ok(sum)
            })
            .collect::<Result<Vec<_>>>()?;

        let total: f32 = partials.iter().sum();
        Ok(total / self.shard.n_entries() as f32)
    }

    fn check_dims(&self, factors: &Factors) -> Result<()> {
        let checks = [
            ("user rows", self.row_offset + self.shard.n_rows(), factors.u.nrows()),
            ("product rows", self.col_offset + self.shard.n_cols(), factors.p.nrows()),
        ];

        for (what, got, expected) in checks {
            if got > expected {
                return Err(WorkerErr::DimensionMismatch {
                    what,
                    got,
                    expected,
                });
            }
        }

        if self.shard.n_words() != factors.t.nrows() {
            return Err(WorkerErr::DimensionMismatch {
                what: "vocabulary size",
                got: self.shard.n_words(),
                expected: factors.t.nrows(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ndarray::arr2;
    use tensor::Dims;

    use super::*;

    fn factors() -> Factors {
        Factors {
            u: arr2(&[[1., 2.], [0., 1.]]),
            p: arr2(&[[0.5, 1.]]),
            t: arr2(&[[1., 0.], [0., 1.], [1., 1.]]),
        }
    }

    #[test]
    fn mean_of_squared_residuals() {
        // pred(0, 0) = [0.5 2 2.5], residual [-0.5 2 0.5] -> 4.5
        // pred(1, 0) = [0 1 1], residual [0 0 1] -> 1
        let shard = SparseTensorShard::from_entries(
            Dims::new(2, 1, 3),
            [
                (0, 0, vec![(0, 1.), (2, 2.)]),
                (1, 0, vec![(0, 0.), (1, 1.)]),
            ],
        )
        .unwrap();

        let mse = Evaluator::new(&shard, 0, 0).mse(&factors()).unwrap();
        assert!((mse - 2.75).abs() < 1e-6);
    }

    #[test]
    fn error_doesnt_depend_on_the_thread_count() {
        let entries = (0..1500u32).map(|e| (e % 2, 0, vec![(e % 3, 1e2 / (e + 1) as f32)]));
        let shard = SparseTensorShard::from_entries(Dims::new(2, 1, 3), entries).unwrap();
        let evaluator = Evaluator::new(&shard, 0, 0);

        let run = |threads| {
            rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()
                .unwrap()
                .install(|| evaluator.mse(&factors()).unwrap())
        };

        let sequential = run(1);
        for threads in [2, 4, 8] {
            assert_eq!(run(threads).to_bits(), sequential.to_bits());
        }
    }

    #[test]
    fn perfect_reconstruction() {
        let shard =
            SparseTensorShard::from_entries(Dims::new(1, 1, 3), [(0, 0, vec![(1, 1.), (2, 1.)])])
                .unwrap();

        let mse = Evaluator::new(&shard, 1, 0).mse(&factors()).unwrap();
        assert_eq!(mse, 0.);
    }

    #[test]
    fn empty_shard() {
        let shard = SparseTensorShard::from_entries(
            Dims::new(1, 1, 3),
            std::iter::empty::<(u32, u32, Vec<(u32, f32)>)>(),
        )
        .unwrap();

        assert!(matches!(
            Evaluator::new(&shard, 0, 0).mse(&factors()),
            Err(WorkerErr::EmptyShard)
        ));
    }

    #[test]
    fn offset_past_the_factor() {
        let shard =
            SparseTensorShard::from_entries(Dims::new(1, 1, 3), [(0, 0, vec![(1, 1.)])]).unwrap();

        assert!(matches!(
            Evaluator::new(&shard, 2, 0).mse(&factors()),
            Err(WorkerErr::DimensionMismatch {
                what: "user rows",
                got: 3,
                expected: 2
            })
        ));
    }
}
