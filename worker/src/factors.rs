use std::ops::Range;

use log::debug;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use parameter_server::{FactorStore, RowKind, TableId, TableSpec};
use rayon::prelude::*;

use crate::error::{Result, WorkerErr};

/// The bounds every fetched factor entry is clamped to.
pub const FACTOR_RANGE: (f32, f32) = (0., 5.);

/// One of the three axes of the review tensor, each factorized by its own matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FactorAxis {
    /// Users, factorized by `U`.
    Row,
    /// Products, factorized by `P`.
    Col,
    /// Vocabulary words, factorized by `T`.
    Word,
}

impl FactorAxis {
    /// Every axis, in the order a round updates them.
    pub const ALL: [FactorAxis; 3] = [FactorAxis::Row, FactorAxis::Col, FactorAxis::Word];

    /// Returns the store table holding the factor of this axis.
    pub fn table(self) -> TableId {
        match self {
            FactorAxis::Row => 0,
            FactorAxis::Col => 1,
            FactorAxis::Word => 2,
        }
    }

    /// Returns the name of the factor matrix of this axis.
    pub fn factor_name(self) -> &'static str {
        match self {
            FactorAxis::Row => "U",
            FactorAxis::Col => "P",
            FactorAxis::Word => "T",
        }
    }
}

/// The global amount of entities of every axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalDims {
    pub users: usize,
    pub products: usize,
    pub words: usize,
}

impl GlobalDims {
    /// Returns the amount of entities along `axis`.
    pub fn entities(&self, axis: FactorAxis) -> usize {
        match axis {
            FactorAxis::Row => self.users,
            FactorAxis::Col => self.products,
            FactorAxis::Word => self.words,
        }
    }
}

/// A local snapshot of the three factor matrices, each one `entities x rank`.
#[derive(Debug, Clone, PartialEq)]
pub struct Factors {
    pub u: Array2<f32>,
    pub p: Array2<f32>,
    pub t: Array2<f32>,
}

impl Factors {
    /// Returns the factor matrix of `axis`.
    pub fn get(&self, axis: FactorAxis) -> &Array2<f32> {
        match axis {
            FactorAxis::Row => &self.u,
            FactorAxis::Col => &self.p,
            FactorAxis::Word => &self.t,
        }
    }

    /// Replaces the factor matrix of `axis` with `factor`.
    pub fn set(&mut self, axis: FactorAxis, factor: Array2<f32>) {
        match axis {
            FactorAxis::Row => self.u = factor,
            FactorAxis::Col => self.p = factor,
            FactorAxis::Word => self.t = factor,
        }
    }

    /// Returns the rank shared by the three matrices, or an error if they disagree.
    pub fn rank(&self) -> Result<usize> {
        let k = self.u.ncols();

        for axis in [FactorAxis::Col, FactorAxis::Word] {
            let got = self.get(axis).ncols();
            if got != k {
                return Err(WorkerErr::DimensionMismatch {
                    what: "factor rank",
                    got,
                    expected: k,
                });
            }
        }

        Ok(k)
    }

    /// Returns the `(rows, cols)` shape of every matrix.
    pub fn shapes(&self) -> [(usize, usize); 3] {
        FactorAxis::ALL.map(|axis| self.get(axis).dim())
    }
}

/// Registers the dense row kind and creates the three factor tables.
///
/// # Arguments
/// * `store` - The store to create the tables in.
/// * `dims` - The global entity counts, one value per row slot.
/// * `staleness` - The staleness bound of every table.
pub fn create_tables<S: FactorStore>(store: &S, dims: GlobalDims, staleness: usize) -> Result<()> {
    store.register_row_kind(RowKind::DenseF32);

    for axis in FactorAxis::ALL {
        let spec = TableSpec::dense(dims.entities(axis), staleness);
        store.create_table(axis.table(), spec)?;
    }

    Ok(())
}

/// Forces the `rank` rows of every factor table into existence.
pub async fn touch_rows<S: FactorStore>(store: &S, rank: usize) -> Result<()> {
    for axis in FactorAxis::ALL {
        for j in 0..rank {
            store.get_row(axis.table(), j).await?;
        }
    }

    Ok(())
}

/// Fetches the factor of `axis` out of the store and clamps it into `FACTOR_RANGE`.
///
/// Row `j` of the table holds column `j` of the factor.
///
/// # Arguments
/// * `store` - The store to read from.
/// * `axis` - The axis whose factor to fetch.
/// * `entities` - The global amount of entities of the axis.
/// * `rank` - The rank of the factorization.
///
/// # Returns
/// An `entities x rank` matrix, or an error if a row isn't `entities` long.
pub async fn fetch_factor<S: FactorStore>(
    store: &S,
    axis: FactorAxis,
    entities: usize,
    rank: usize,
) -> Result<Array2<f32>> {
    let mut factor = Array2::zeros((entities, rank));

    for j in 0..rank {
        let row = store.get_row(axis.table(), j).await?;
        if row.len() != entities {
            return Err(WorkerErr::DimensionMismatch {
                what: "factor row length",
                got: row.len(),
                expected: entities,
            });
        }

        factor.column_mut(j).assign(&Array1::from(row));
    }

    clamp(&mut factor);
    debug!(factor = axis.factor_name(), entities = entities, rank = rank; "fetched factor");
    Ok(factor)
}

/// Fetches the three factors out of the store.
pub async fn fetch_all<S: FactorStore>(store: &S, dims: GlobalDims, rank: usize) -> Result<Factors> {
    Ok(Factors {
        u: fetch_factor(store, FactorAxis::Row, dims.users, rank).await?,
        p: fetch_factor(store, FactorAxis::Col, dims.products, rank).await?,
        t: fetch_factor(store, FactorAxis::Word, dims.words, rank).await?,
    })
}

/// Clamps every value of `factor` into `FACTOR_RANGE`, `NaN`s become the lower bound.
pub fn clamp(factor: &mut Array2<f32>) {
    let (low, high) = FACTOR_RANGE;

    factor.mapv_inplace(|x| if x.is_nan() { low } else { x.clamp(low, high) });
}

/// Entries summed by a single parallel task.
const ENTRIES_PER_TASK: usize = 256;

/// Splits `0..n_entries` into fixed ranges, so partial sums are combined in the same order no
/// matter how many threads run them.
pub(crate) fn entry_chunks(n_entries: usize) -> impl IndexedParallelIterator<Item = Range<usize>> {
    (0..n_entries.div_ceil(ENTRIES_PER_TASK))
        .into_par_iter()
        .map(move |c| c * ENTRIES_PER_TASK..((c + 1) * ENTRIES_PER_TASK).min(n_entries))
}

/// Predicts the bag of an entry as `T (u ⊙ p)`.
///
/// # Arguments
/// * `u` - The user factor row of the entry.
/// * `p` - The product factor row of the entry.
/// * `t` - The word factor rows to predict, `n_words x rank`.
///
/// # Returns
/// A prediction for each one of the `n_words` words.
pub fn predict(u: ArrayView1<f32>, p: ArrayView1<f32>, t: ArrayView2<f32>) -> Array1<f32> {
    let h = &u * &p;
    t.dot(&h)
}
