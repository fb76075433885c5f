use log::info;
use parameter_server::{DenseUpdate, FactorStore};
use rand::{Rng, SeedableRng, rngs::StdRng};
use rand_distr::{Distribution, Normal};

use crate::{
    error::Result,
    factors::{FactorAxis, GlobalDims},
};

/// A `ParamGen` generates values for the initial state of the factors.
pub trait ParamGen {
    /// Should sample at most `n` parameters.
    ///
    /// # Arguments
    /// * `n` - The upper limit of samples to generate.
    ///
    /// # Returns
    /// An option whether the generator is exhausted.
    fn sample(&mut self, n: usize) -> Option<Vec<f32>>;
}

/// The absolute value of a sample of another distribution.
#[derive(Debug, Clone, Copy)]
pub struct Folded<D>(pub D);

impl<D: Distribution<f32>> Distribution<f32> for Folded<D> {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f32 {
        self.0.sample(rng).abs()
    }
}

/// A parameter generator that follows a certain probabilistic distribution.
pub struct RandParamGen<'r, R: Rng, D: Distribution<f32>> {
    rng: &'r mut R,
    distribution: D,
    remaining: usize,
}

impl<'r, R: Rng, D: Distribution<f32>> RandParamGen<'r, R, D> {
    /// Creates a new `RandParamGen` parameter generator.
    ///
    /// # Arguments
    /// * `rng` - A random number generator.
    /// * `distribution` - The distribution to sample the random numbers from.
    /// * `limit` - The maximum amount of numbers to generate.
    pub fn new(rng: &'r mut R, distribution: D, limit: usize) -> Self {
        Self {
            rng,
            distribution,
            remaining: limit,
        }
    }
}

impl<'r, R: Rng> RandParamGen<'r, R, Folded<Normal<f32>>> {
    /// Creates a new `RandParamGen` sampling the absolute value of a standard normal.
    ///
    /// # Arguments
    /// * `rng` - A random number generator.
    /// * `limit` - The maximum amount of numbers to generate.
    pub fn abs_normal(rng: &'r mut R, limit: usize) -> Result<Self> {
        Ok(Self::new(rng, Folded(Normal::new(0., 1.)?), limit))
    }
}

impl<R: Rng, D: Distribution<f32>> ParamGen for RandParamGen<'_, R, D> {
    fn sample(&mut self, mut n: usize) -> Option<Vec<f32>> {
        if self.remaining == 0 {
            return None;
        }

        n = n.min(self.remaining);
        self.remaining -= n;

        let sample = (0..n)
            .map(|_| self.distribution.sample(&mut *self.rng))
            .collect();
        Some(sample)
    }
}

/// Creates the random number generator of a run.
///
/// # Arguments
/// * `seed` - A fixed seed for reproducible runs, or `None` to seed from the os.
pub fn generate_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    }
}

/// Adds a random starting point to every factor, one increment per rank column.
///
/// The tables start zeroed, so after this every entry holds a folded normal sample.
///
/// # Arguments
/// * `store` - The store holding the factor tables.
/// * `dims` - The global entity counts.
/// * `rank` - The rank of the factorization.
/// * `rng` - The source of randomness.
pub async fn randomize<S: FactorStore, R: Rng + Send>(
    store: &S,
    dims: GlobalDims,
    rank: usize,
    rng: &mut R,
) -> Result<()> {
    for axis in FactorAxis::ALL {
        let entities = dims.entities(axis);
        let columns = {
            let mut param_gen = RandParamGen::abs_normal(&mut *rng, entities * rank)?;
            let mut columns = Vec::with_capacity(rank);
            while let Some(values) = param_gen.sample(entities) {
                columns.push(values);
            }
            columns
        };

        for (j, values) in columns.into_iter().enumerate() {
            store
                .increment_row(axis.table(), j, &DenseUpdate::new(0, values))
                .await?;
        }

        info!(factor = axis.factor_name(), entities = entities; "randomized factor");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use parameter_server::LocalStore;

    use super::*;
    use crate::factors::{create_tables, fetch_all};

    #[test]
    fn empty() {
        let mut rng = generate_rng(Some(42));

        let mut param_gen = RandParamGen::abs_normal(&mut rng, 0).unwrap();
        assert!(param_gen.sample(1).is_none());
    }

    #[test]
    fn partial() {
        let mut rng = generate_rng(Some(42));

        let mut param_gen = RandParamGen::abs_normal(&mut rng, 10).unwrap();

        let sample = param_gen.sample(7).unwrap();
        assert_eq!(sample.len(), 7);
        assert!(sample.iter().all(|x| *x >= 0.));

        let sample = param_gen.sample(7).unwrap();
        assert_eq!(sample.len(), 3);

        assert!(param_gen.sample(1).is_none());
    }

    #[test]
    fn seeded_generators_agree() {
        let (mut a, mut b) = (generate_rng(Some(7)), generate_rng(Some(7)));

        let first = RandParamGen::abs_normal(&mut a, 5).unwrap().sample(5);
        let second = RandParamGen::abs_normal(&mut b, 5).unwrap().sample(5);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn randomized_factors_are_non_negative() {
        let dims = GlobalDims {
            users: 3,
            products: 2,
            words: 4,
        };
        let store = LocalStore::new(1);
        create_tables(&store, dims, 0).unwrap();

        randomize(&store, dims, 2, &mut generate_rng(Some(1))).await.unwrap();

        let factors = fetch_all(&store, dims, 2).await.unwrap();
        assert_eq!(factors.shapes(), [(3, 2), (2, 2), (4, 2)]);
        assert!(factors.u.iter().chain(&factors.p).chain(&factors.t).all(|x| *x >= 0.));
        assert!(factors.t.iter().any(|x| *x > 0.));
    }
}
