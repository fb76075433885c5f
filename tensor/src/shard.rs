use std::iter::FusedIterator;

use ndarray::Array1;

use crate::error::{FormatErr, Result, TensorErr};

/// The size of a shard along each of its three axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dims {
    pub rows: u32,
    pub cols: u32,
    pub words: u32,
}

impl Dims {
    /// Creates a new `Dims`.
    pub fn new(rows: u32, cols: u32, words: u32) -> Self {
        Self { rows, cols, words }
    }
}

/// A three way sparse tensor where each non empty `(row, col)` cell holds a bag of words.
///
/// The bags are stored back to back in `word_index` and `word_value`, the bag of
/// entry `e` spans `bag_end[e - 1]..bag_end[e]`.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseTensorShard {
    dims: Dims,
    row_index: Vec<u32>,
    col_index: Vec<u32>,
    bag_end: Vec<u32>,
    word_index: Vec<u32>,
    word_value: Vec<f32>,
}

impl SparseTensorShard {
    /// Creates a new `SparseTensorShard` validating every layout invariant.
    ///
    /// # Arguments
    /// * `dims` - The size of the shard along each axis.
    /// * `row_index` - The row of each entry.
    /// * `col_index` - The column of each entry.
    /// * `bag_end` - The exclusive end of each entry's bag inside the value arrays.
    /// * `word_index` - The word of each value.
    /// * `word_value` - The weight of each value.
    ///
    /// # Returns
    /// A new shard or a `FormatErr` describing the first violated invariant.
    pub fn new(
        dims: Dims,
        row_index: Vec<u32>,
        col_index: Vec<u32>,
        bag_end: Vec<u32>,
        word_index: Vec<u32>,
        word_value: Vec<f32>,
    ) -> Result<Self> {
        let shard = Self {
            dims,
            row_index,
            col_index,
            bag_end,
            word_index,
            word_value,
        };

        shard.validate()?;
        Ok(shard)
    }

    /// Builds a shard out of `(row, col, bag)` triplets, laid out in the given order.
    ///
    /// # Arguments
    /// * `dims` - The size of the shard along each axis.
    /// * `entries` - The entries with their bags as `(word, value)` pairs.
    ///
    /// # Returns
    /// A new shard or a `FormatErr` if the entries break an invariant.
    pub fn from_entries<I, B>(dims: Dims, entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (u32, u32, B)>,
        B: IntoIterator<Item = (u32, f32)>,
    {
        let mut row_index = Vec::new();
        let mut col_index = Vec::new();
        let mut bag_end = Vec::new();
        let mut word_index = Vec::new();
        let mut word_value = Vec::new();

        for (row, col, bag) in entries {
            row_index.push(row);
            col_index.push(col);

            for (word, value) in bag {
                word_index.push(word);
                word_value.push(value);
            }

            bag_end.push(word_index.len() as u32);
        }

        Self::new(dims, row_index, col_index, bag_end, word_index, word_value)
    }

    fn validate(&self) -> std::result::Result<(), FormatErr> {
        let entries = self.row_index.len();
        let values = self.word_index.len();

        for (what, got, expected) in [
            ("col_index", self.col_index.len(), entries),
            ("bag_end", self.bag_end.len(), entries),
            ("word_value", self.word_value.len(), values),
        ] {
            if got != expected {
                return Err(FormatErr::ArrayLength {
                    what,
                    got,
                    expected,
                });
            }
        }

        let mut prev = 0;
        for (entry, &end) in self.bag_end.iter().enumerate() {
            if end < prev {
                return Err(FormatErr::BagEndDecreasing {
                    entry,
                    prev,
                    got: end,
                });
            }
            prev = end;
        }

        if prev as usize != values {
            return Err(FormatErr::BagEndTotal { last: prev, values });
        }

        let Dims { rows, cols, words } = self.dims;

        let mut sorted = Vec::new();

        for entry in 0..entries {
            check_bound("row", entry, self.row_index[entry], rows)?;
            check_bound("col", entry, self.col_index[entry], cols)?;

            let bag = &self.word_index[self.bag_range(entry)];
            for &word in bag {
                check_bound("word", entry, word, words)?;
            }

            sorted.clear();
            sorted.extend_from_slice(bag);
            sorted.sort_unstable();

            if let Some(pair) = sorted.windows(2).find(|pair| pair[0] == pair[1]) {
                return Err(FormatErr::DuplicateWord {
                    entry,
                    word: pair[0],
                });
            }
        }

        Ok(())
    }

    pub fn dims(&self) -> Dims {
        self.dims
    }

    pub fn n_rows(&self) -> usize {
        self.dims.rows as usize
    }

    pub fn n_cols(&self) -> usize {
        self.dims.cols as usize
    }

    pub fn n_words(&self) -> usize {
        self.dims.words as usize
    }

    /// Returns the amount of non empty `(row, col)` bags.
    pub fn n_entries(&self) -> usize {
        self.row_index.len()
    }

    /// Returns the amount of word values across all bags.
    pub fn n_values(&self) -> usize {
        self.word_index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.row_index.is_empty()
    }

    pub fn row_index(&self) -> &[u32] {
        &self.row_index
    }

    pub fn col_index(&self) -> &[u32] {
        &self.col_index
    }

    pub fn bag_end(&self) -> &[u32] {
        &self.bag_end
    }

    pub fn word_index(&self) -> &[u32] {
        &self.word_index
    }

    pub fn word_value(&self) -> &[f32] {
        &self.word_value
    }

    /// Returns the bag of word values of entry `e`.
    ///
    /// # Arguments
    /// * `e` - The index of the entry.
    ///
    /// # Returns
    /// The bag or `EntryOutOfRange` if `e` is not smaller than the amount of entries.
    pub fn bag(&self, e: usize) -> Result<Bag<'_>> {
        if e >= self.n_entries() {
            return Err(TensorErr::EntryOutOfRange {
                entry: e,
                entries: self.n_entries(),
            });
        }

        Ok(self.bag_unchecked(e))
    }

    /// Materializes the bag of entry `e` as a dense vector of `n_words` elements.
    ///
    /// # Arguments
    /// * `e` - The index of the entry.
    ///
    /// # Returns
    /// The dense bag or `EntryOutOfRange` if `e` is not smaller than the amount of entries.
    pub fn dense_bag(&self, e: usize) -> Result<Array1<f32>> {
        Ok(self.bag(e)?.to_dense(self.n_words()))
    }

    /// Returns a lazy sequence over every entry in storage order.
    ///
    /// Each call starts from the first entry, sequences never share their position.
    pub fn entries(&self) -> Entries<'_> {
        Entries {
            shard: self,
            next: 0,
            end: self.n_entries(),
        }
    }

    /// Returns the entry at position `e`.
    ///
    /// # Returns
    /// The entry or `EntryOutOfRange` if `e` is not smaller than the amount of entries.
    pub fn entry(&self, e: usize) -> Result<Entry<'_>> {
        let bag = self.bag(e)?;

        Ok(Entry {
            row: self.row_index[e],
            col: self.col_index[e],
            bag,
        })
    }

    fn bag_range(&self, e: usize) -> std::ops::Range<usize> {
        let start = match e {
            0 => 0,
            _ => self.bag_end[e - 1] as usize,
        };

        start..self.bag_end[e] as usize
    }

    fn bag_unchecked(&self, e: usize) -> Bag<'_> {
        let range = self.bag_range(e);

        Bag {
            words: &self.word_index[range.clone()],
            values: &self.word_value[range],
        }
    }
}

fn check_bound(
    axis: &'static str,
    entry: usize,
    index: u32,
    bound: u32,
) -> std::result::Result<(), FormatErr> {
    if index >= bound {
        return Err(FormatErr::IndexOutOfBounds {
            axis,
            entry,
            index,
            bound,
        });
    }

    Ok(())
}

/// The sparse bag of words of a single entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bag<'a> {
    words: &'a [u32],
    values: &'a [f32],
}

impl<'a> Bag<'a> {
    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn words(&self) -> &'a [u32] {
        self.words
    }

    pub fn values(&self) -> &'a [f32] {
        self.values
    }

    /// Iterates the `(word, value)` pairs of this bag.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = (u32, f32)> + 'a {
        self.words.iter().copied().zip(self.values.iter().copied())
    }

    /// Scatters this bag into a zeroed vector of `n_words` elements.
    ///
    /// # Panics
    /// If a word of the bag is not smaller than `n_words`.
    pub fn to_dense(&self, n_words: usize) -> Array1<f32> {
        let mut dense = Array1::zeros(n_words);

        for (word, value) in self.iter() {
            dense[word as usize] = value;
        }

        dense
    }
}

/// A single non empty cell of the tensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Entry<'a> {
    pub row: u32,
    pub col: u32,
    pub bag: Bag<'a>,
}

/// Lazy sequence over the entries of a shard, see `SparseTensorShard::entries`.
#[derive(Debug, Clone)]
pub struct Entries<'a> {
    shard: &'a SparseTensorShard,
    next: usize,
    end: usize,
}

impl<'a> Iterator for Entries<'a> {
    type Item = Entry<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next == self.end {
            return None;
        }

        let e = self.next;
        self.next += 1;

        Some(Entry {
            row: self.shard.row_index[e],
            col: self.shard.col_index[e],
            bag: self.shard.bag_unchecked(e),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.end - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Entries<'_> {}

impl FusedIterator for Entries<'_> {}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_shard() -> SparseTensorShard {
        SparseTensorShard::from_entries(
            Dims::new(2, 3, 4),
            [
                (0, 1, vec![(0, 1.0), (3, 2.0)]),
                (1, 0, vec![]),
                (1, 2, vec![(2, 5.0)]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn bag_yields_exactly_its_slice() {
        let shard = sample_shard();

        let bag = shard.bag(0).unwrap();
        assert_eq!(bag.iter().collect::<Vec<_>>(), vec![(0, 1.0), (3, 2.0)]);

        assert!(shard.bag(1).unwrap().is_empty());

        let bag = shard.bag(2).unwrap();
        assert_eq!(bag.iter().collect::<Vec<_>>(), vec![(2, 5.0)]);
    }

    #[test]
    fn bag_out_of_range() {
        let shard = sample_shard();

        let err = shard.bag(3).unwrap_err();
        assert!(matches!(
            err,
            TensorErr::EntryOutOfRange {
                entry: 3,
                entries: 3
            }
        ));
    }

    #[test]
    fn dense_bag_fills_zeros() {
        let shard = sample_shard();

        let dense = shard.dense_bag(0).unwrap();
        assert_eq!(dense.to_vec(), vec![1.0, 0.0, 0.0, 2.0]);
    }

    #[test]
    fn entries_are_restartable() {
        let shard = sample_shard();

        let mut first = shard.entries();
        first.next();

        let second: Vec<_> = shard.entries().map(|e| (e.row, e.col)).collect();
        assert_eq!(second, vec![(0, 1), (1, 0), (1, 2)]);

        let rest: Vec<_> = first.map(|e| (e.row, e.col, e.bag.len())).collect();
        assert_eq!(rest, vec![(1, 0, 0), (1, 2, 1)]);
    }

    #[test]
    fn entries_of_empty_shard() {
        let entries: Vec<(u32, u32, Vec<(u32, f32)>)> = Vec::new();
        let shard = SparseTensorShard::from_entries(Dims::new(1, 1, 1), entries).unwrap();

        assert_eq!(shard.entries().len(), 0);
        assert!(shard.entries().next().is_none());
    }

    #[test]
    fn rejects_decreasing_bag_end() {
        let err = SparseTensorShard::new(
            Dims::new(1, 1, 2),
            vec![0, 0],
            vec![0, 0],
            vec![2, 1],
            vec![0, 1],
            vec![1.0, 1.0],
        )
        .unwrap_err();

        assert!(matches!(
            err,
            TensorErr::Format(FormatErr::BagEndDecreasing { entry: 1, .. })
        ));
    }

    #[test]
    fn rejects_wrong_total() {
        let err = SparseTensorShard::new(
            Dims::new(1, 1, 2),
            vec![0],
            vec![0],
            vec![1],
            vec![0, 1],
            vec![1.0, 1.0],
        )
        .unwrap_err();

        assert!(matches!(
            err,
            TensorErr::Format(FormatErr::BagEndTotal { last: 1, values: 2 })
        ));
    }

    #[test]
    fn rejects_duplicate_words() {
        let err = SparseTensorShard::from_entries(
            Dims::new(1, 1, 3),
            [(0, 0, vec![(1, 1.0), (1, 2.0)])],
        )
        .unwrap_err();

        assert!(matches!(
            err,
            TensorErr::Format(FormatErr::DuplicateWord { entry: 0, word: 1 })
        ));
    }

    #[test]
    fn same_word_in_different_bags_is_fine() {
        let shard = SparseTensorShard::from_entries(
            Dims::new(1, 2, 3),
            [(0, 0, vec![(1, 1.0)]), (0, 1, vec![(1, 2.0)])],
        );

        assert!(shard.is_ok());
    }

    #[test]
    fn rejects_out_of_bounds_indices() {
        let err = SparseTensorShard::from_entries(Dims::new(1, 1, 3), [(0, 1, vec![(0, 1.0)])])
            .unwrap_err();
        assert!(matches!(
            err,
            TensorErr::Format(FormatErr::IndexOutOfBounds { axis: "col", .. })
        ));

        let err = SparseTensorShard::from_entries(Dims::new(1, 1, 3), [(0, 0, vec![(3, 1.0)])])
            .unwrap_err();
        assert!(matches!(
            err,
            TensorErr::Format(FormatErr::IndexOutOfBounds { axis: "word", .. })
        ));
    }
}
