use log::trace;
use ndarray::{Array2, ArrayView2, Axis, s};
use parameter_server::{DenseUpdate, FactorStore};
use rayon::prelude::*;
use tensor::SparseTensorShard;

use crate::{
    error::{Result, WorkerErr},
    factors::{FactorAxis, Factors, entry_chunks, predict},
};

/// One gradient descent update of a single factor over a partition of the tensor.
#[derive(Debug, Clone, Copy)]
pub struct GradientStep<'a> {
    shard: &'a SparseTensorShard,
    offset: usize,
    axis: FactorAxis,
}

impl<'a> GradientStep<'a> {
    /// Creates a new `GradientStep`.
    ///
    /// # Arguments
    /// * `shard` - The partition owned by this worker along `axis`.
    /// * `offset` - The global index of the first entity of the partition.
    /// * `axis` - The factor to update.
    pub fn new(shard: &'a SparseTensorShard, offset: usize, axis: FactorAxis) -> Self {
        Self {
            shard,
            offset,
            axis,
        }
    }

    /// Returns the amount of factor rows this step updates.
    fn len(&self) -> usize {
        match self.axis {
            FactorAxis::Row => self.shard.n_rows(),
            FactorAxis::Col => self.shard.n_cols(),
            FactorAxis::Word => self.shard.n_words(),
        }
    }

    /// Computes the normalized and scaled update of the partition's factor rows.
    ///
    /// # Arguments
    /// * `factors` - The current snapshot of the three factors.
    /// * `step` - The step length of the round.
    ///
    /// # Returns
    /// A `len() x rank` matrix whose rows are the unit gradients scaled by `-step`.
    pub fn compute(&self, factors: &Factors, step: f32) -> Result<Array2<f32>> {
        let mut grad = self.accumulate(factors)?;

        normalize_rows(&mut grad);
        grad *= -step;
        Ok(grad)
    }

    /// Accumulates the raw squared error gradient of every entry of the partition.
    ///
    /// # Returns
    /// A `len() x rank` matrix, or `DimensionMismatch` if the partition doesn't fit the factors.
    pub fn accumulate(&self, factors: &Factors) -> Result<Array2<f32>> {
        let k = factors.rank()?;
        self.check_dims(factors)?;

        let (u, p) = (factors.u.view(), factors.p.view());
        let t = self.word_window(factors.t.view());
        let n_words = self.shard.n_words();

        let (row_offset, col_offset) = match self.axis {
            FactorAxis::Row => (self.offset, 0),
            FactorAxis::Col => (0, self.offset),
            FactorAxis::Word => (0, 0),
        };

        let shape = (self.len(), k);
        let partials = entry_chunks(self.shard.n_entries())
            .map(|range| -> Result<Array2<f32>> {
                let mut acc = Array2::<f32>::zeros(shape);

                for e in range {
                    let entry = self.shard.entry(e)?;
                    let row = entry.row as usize;
                    let col = entry.col as usize;
                    let ur = u.row(row + row_offset);
                    let pc = p.row(col + col_offset);

                    let pred = predict(ur, pc, t);
                    let diff = pred - entry.bag.to_dense(n_words);
                    trace!(row = row, col = col; "prediction error {diff}");

                    match self.axis {
                        FactorAxis::Row => {
                            let proj = t.t().dot(&diff);
                            acc.row_mut(row).scaled_add(2., &(&pc * &proj));
                        }
                        FactorAxis::Col => {
                            let proj = t.t().dot(&diff);
                            acc.row_mut(col).scaled_add(2., &(&ur * &proj));
                        }
                        FactorAxis::Word => {
                            let h = &ur * &pc;
                            for (mut g, d) in acc.outer_iter_mut().zip(diff.iter()) {
                                g.scaled_add(2. * d, &h);
                            }
                        }
                    }
                }

                Ok(acc)
            })
            .collect::<Result<Vec<_>>>()?;

        let grad = partials
            .into_iter()
            .fold(Array2::zeros(shape), |acc, partial| acc + partial);

        Ok(grad)
    }

    /// Pushes `update` into the store, one increment per rank column.
    ///
    /// # Arguments
    /// * `store` - The store holding the factor of this step's axis.
    /// * `update` - The output of `compute`.
    pub async fn push<S: FactorStore>(&self, store: &S, update: &Array2<f32>) -> Result<()> {
        for (j, column) in update.axis_iter(Axis(1)).enumerate() {
            let delta = DenseUpdate::new(self.offset, column.to_vec());
            store.increment_row(self.axis.table(), j, &delta).await?;
        }

        Ok(())
    }

    /// The rows of `T` the partition's word indices refer to.
    fn word_window<'t>(&self, t: ArrayView2<'t, f32>) -> ArrayView2<'t, f32> {
        match self.axis {
            FactorAxis::Word => {
                let start = self.offset;
                t.slice_move(s![start..start + self.shard.n_words(), ..])
            }
            _ => t,
        }
    }

    fn check_dims(&self, factors: &Factors) -> Result<()> {
        let shard = self.shard;
        let offset_of = |axis: FactorAxis| if self.axis == axis { self.offset } else { 0 };

        fits("user rows", offset_of(FactorAxis::Row) + shard.n_rows(), factors.u.nrows())?;
        fits("product rows", offset_of(FactorAxis::Col) + shard.n_cols(), factors.p.nrows())?;

        match self.axis {
            FactorAxis::Word => fits("word rows", self.offset + shard.n_words(), factors.t.nrows()),
            _ if shard.n_words() != factors.t.nrows() => Err(WorkerErr::DimensionMismatch {
                what: "vocabulary size",
                got: shard.n_words(),
                expected: factors.t.nrows(),
            }),
            _ => Ok(()),
        }
    }
}

fn fits(what: &'static str, got: usize, expected: usize) -> Result<()> {
    if got > expected {
        return Err(WorkerErr::DimensionMismatch {
            what,
            got,
            expected,
        });
    }

    Ok(())
}

/// Scales every non zero row of `grad` to unit L2 norm.
pub fn normalize_rows(grad: &mut Array2<f32>) {
    grad.axis_iter_mut(Axis(0))
        .into_par_iter()
        .for_each(|mut row| {
            let norm = row.dot(&row).sqrt();
            if norm > 0. {
                row /= norm;
            }
        });
}

#[cfg(test)]
mod tests {
    use ndarray::arr2;
    use tensor::Dims;

    use super::*;

    const TOLERANCE: f32 = 1e-5;

    fn assert_close(got: &Array2<f32>, expected: &Array2<f32>) {
        assert_eq!(got.dim(), expected.dim());
        for (g, e) in got.iter().zip(expected) {
            assert!((g - e).abs() < TOLERANCE, "got {got}, expected {expected}");
        }
    }

    fn single_entry_shard() -> SparseTensorShard {
        SparseTensorShard::from_entries(Dims::new(1, 1, 3), [(0, 0, vec![(0, 1.), (2, 2.)])])
            .unwrap()
    }

    // U = [1 2], P = [0.5 1], T = [[1 0] [0 1] [1 1]]
    // pred = T (u ⊙ p) = [0.5 2 2.5], diff = [-0.5 2 0.5], T' diff = [0 2.5]
    fn factors() -> Factors {
        Factors {
            u: arr2(&[[1., 2.]]),
            p: arr2(&[[0.5, 1.]]),
            t: arr2(&[[1., 0.], [0., 1.], [1., 1.]]),
        }
    }

    #[test]
    fn user_gradient() {
        let shard = single_entry_shard();
        let step = GradientStep::new(&shard, 0, FactorAxis::Row);

        let grad = step.accumulate(&factors()).unwrap();
        assert_close(&grad, &arr2(&[[0., 5.]]));

        let update = step.compute(&factors(), 0.5).unwrap();
        assert_close(&update, &arr2(&[[0., -0.5]]));
    }

    #[test]
    fn product_gradient() {
        let shard = single_entry_shard();
        let step = GradientStep::new(&shard, 0, FactorAxis::Col);

        let grad = step.accumulate(&factors()).unwrap();
        assert_close(&grad, &arr2(&[[0., 10.]]));
    }

    #[test]
    fn word_gradient() {
        let shard = single_entry_shard();
        let step = GradientStep::new(&shard, 0, FactorAxis::Word);

        let grad = step.accumulate(&factors()).unwrap();
        assert_close(&grad, &arr2(&[[-0.5, -2.], [2., 8.], [0.5, 2.]]));

        let norm = 4.25_f32.sqrt();
        let update = step.compute(&factors(), 1.).unwrap();
        let expected = arr2(&[
            [0.5 / norm, 2. / norm],
            [-0.5 / norm, -2. / norm],
            [-0.5 / norm, -2. / norm],
        ]);
        assert_close(&update, &expected);
    }

    #[test]
    fn user_offset_selects_the_global_row() {
        let shard = single_entry_shard();
        let step = GradientStep::new(&shard, 1, FactorAxis::Row);

        let mut factors = factors();
        factors.u = arr2(&[[9., 9.], [1., 2.]]);

        let grad = step.accumulate(&factors).unwrap();
        assert_close(&grad, &arr2(&[[0., 5.]]));
    }

    #[test]
    fn word_offset_selects_the_word_window() {
        let shard =
            SparseTensorShard::from_entries(Dims::new(1, 1, 2), [(0, 0, vec![(1, 2.)])]).unwrap();
        let step = GradientStep::new(&shard, 1, FactorAxis::Word);

        // the window is T[1..3] so the shard sees the same words 1 and 2 as above
        let grad = step.accumulate(&factors()).unwrap();
        assert_close(&grad, &arr2(&[[2., 8.], [0.5, 2.]]));
    }

    #[test]
    fn rows_without_entries_stay_zero() {
        let shard =
            SparseTensorShard::from_entries(Dims::new(2, 1, 3), [(1, 0, vec![(0, 1.), (2, 2.)])])
                .unwrap();
        let step = GradientStep::new(&shard, 0, FactorAxis::Row);

        let mut factors = factors();
        factors.u = arr2(&[[3., 3.], [1., 2.]]);

        let update = step.compute(&factors, 1.).unwrap();
        assert_close(&update, &arr2(&[[0., 0.], [0., -1.]]));
    }

    #[test]
    fn partition_past_the_factor_is_rejected() {
        let shard = single_entry_shard();
        let step = GradientStep::new(&shard, 1, FactorAxis::Col);

        assert!(matches!(
            step.accumulate(&factors()),
            Err(WorkerErr::DimensionMismatch {
                what: "product rows",
                got: 2,
                expected: 1
            })
        ));
    }

    #[test]
    fn vocabulary_mismatch_is_rejected() {
        let shard =
            SparseTensorShard::from_entries(Dims::new(1, 1, 2), [(0, 0, vec![(1, 2.)])]).unwrap();
        let step = GradientStep::new(&shard, 0, FactorAxis::Row);

        assert!(matches!(
            step.accumulate(&factors()),
            Err(WorkerErr::DimensionMismatch {
                what: "vocabulary size",
                ..
            })
        ));
    }

    #[test]
    fn sums_dont_depend_on_the_thread_count() {
        let entries = (0..2000u32).map(|e| {
            let bag = vec![(e % 3, 0.1 + (e % 7) as f32), ((e % 3) + 1, 1e3 / (e + 1) as f32)];
            (e % 40, e % 3, bag)
        });
        let shard = SparseTensorShard::from_entries(Dims::new(40, 3, 4), entries).unwrap();
        let factors = Factors {
            u: Array2::from_shape_fn((40, 2), |(i, j)| 0.1 + (i * 2 + j) as f32 * 0.37),
            p: arr2(&[[0.3, 1.7], [2.1, 0.01], [1.3, 0.9]]),
            t: arr2(&[[1., 0.2], [0.5, 1.], [0.33, 0.66], [2., 0.1]]),
        };
        let step = GradientStep::new(&shard, 0, FactorAxis::Word);

        let run = |threads| {
            rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()
                .unwrap()
                .install(|| step.accumulate(&factors).unwrap())
        };

        let sequential = run(1);
        for threads in [2, 3, 8] {
            assert_eq!(run(threads), sequential);
        }
    }

    #[tokio::test]
    async fn push_sends_one_column_per_rank_row() {
        use parameter_server::LocalStore;

        use crate::factors::{GlobalDims, create_tables};

        let store = LocalStore::new(1);
        let dims = GlobalDims {
            users: 3,
            products: 1,
            words: 3,
        };
        create_tables(&store, dims, 0).unwrap();

        let shard =
            SparseTensorShard::from_entries(Dims::new(2, 1, 3), [(0, 0, vec![(0, 1.)])]).unwrap();
        let step = GradientStep::new(&shard, 1, FactorAxis::Row);

        step.push(&store, &arr2(&[[1., 2.], [3., 4.]])).await.unwrap();

        assert_eq!(store.get_row(0, 0).await.unwrap(), vec![0., 1., 3.]);
        assert_eq!(store.get_row(0, 1).await.unwrap(), vec![0., 2., 4.]);
    }
}
