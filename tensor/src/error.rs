use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

/// The result type used in the entire tensor module.
pub type Result<T> = std::result::Result<T, TensorErr>;

/// The tensor module's error type.
#[derive(Debug)]
pub enum TensorErr {
    /// The shard file couldn't be opened, read or written.
    Io(io::Error),
    /// The bytes or arrays don't describe a valid shard.
    Format(FormatErr),
    /// Tried to access an entry past the end of the shard.
    EntryOutOfRange { entry: usize, entries: usize },
}

/// Every way in which a shard can be malformed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatErr {
    /// The counts declared in the header don't match the amount of bytes.
    LengthMismatch { declared: usize, actual: usize },
    /// One of the parallel arrays doesn't have the declared length.
    ArrayLength {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    /// `bag_end` decreased between two consecutive entries.
    BagEndDecreasing { entry: usize, prev: u32, got: u32 },
    /// The last `bag_end` isn't the total amount of values.
    BagEndTotal { last: u32, values: usize },
    /// An index is outside the dimension of its axis.
    IndexOutOfBounds {
        axis: &'static str,
        entry: usize,
        index: u32,
        bound: u32,
    },
    /// The same word appears twice inside one bag.
    DuplicateWord { entry: usize, word: u32 },
    /// The shard can't be written in the two axis format.
    NotTwoAxis { entry: usize },
}

impl Display for FormatErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatErr::LengthMismatch { declared, actual } => write!(
                f,
                "the header declares {declared} bytes but the shard has {actual}"
            ),
            FormatErr::ArrayLength {
                what,
                got,
                expected,
            } => write!(f, "{what} has {got} elements, expected {expected}"),
            FormatErr::BagEndDecreasing { entry, prev, got } => write!(
                f,
                "bag_end decreases at entry {entry}: {got} after {prev}"
            ),
            FormatErr::BagEndTotal { last, values } => write!(
                f,
                "the last bag ends at {last} but there are {values} values"
            ),
            FormatErr::IndexOutOfBounds {
                axis,
                entry,
                index,
                bound,
            } => write!(
                f,
                "{axis} index {index} of entry {entry} is out of bounds for a dimension of {bound}"
            ),
            FormatErr::DuplicateWord { entry, word } => {
                write!(f, "word {word} appears more than once in the bag of entry {entry}")
            }
            FormatErr::NotTwoAxis { entry } => write!(
                f,
                "entry {entry} isn't a single value bag, the shard can't be written as a matrix"
            ),
        }
    }
}

impl Display for TensorErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TensorErr::Io(e) => write!(f, "io error: {e}"),
            TensorErr::Format(e) => write!(f, "malformed shard: {e}"),
            TensorErr::EntryOutOfRange { entry, entries } => {
                write!(f, "entry {entry} is out of range for a shard of {entries} entries")
            }
        }
    }
}

impl Error for TensorErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TensorErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for TensorErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<FormatErr> for TensorErr {
    fn from(value: FormatErr) -> Self {
        Self::Format(value)
    }
}
