use std::{error::Error, fmt, io};

use parameter_server::StoreErr;
use rand_distr::NormalError;
use tensor::TensorErr;

/// The worker module's result type.
pub type Result<T> = std::result::Result<T, WorkerErr>;

/// Worker runtime failures.
#[derive(Debug)]
pub enum WorkerErr {
    Io(io::Error),
    Tensor(TensorErr),
    Store(StoreErr),
    /// A factor matrix or a shard doesn't have the shape the operation needs.
    DimensionMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    /// An evaluation was requested over a shard without entries.
    EmptyShard,
    /// A partition file starts before the first entity of its axis.
    NegativeOffset {
        axis: &'static str,
        offset: i32,
    },
    Config(String),
    Init(String),
}

impl fmt::Display for WorkerErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerErr::Io(e) => write!(f, "io error: {e}"),
            WorkerErr::Tensor(e) => write!(f, "tensor error: {e}"),
            WorkerErr::Store(e) => write!(f, "store error: {e}"),
            WorkerErr::DimensionMismatch {
                what,
                got,
                expected,
            } => write!(f, "{what} mismatch: got {got}, expected {expected}"),
            WorkerErr::EmptyShard => f.write_str("can't evaluate a shard without entries"),
            WorkerErr::NegativeOffset { axis, offset } => {
                write!(f, "the {axis} partition has a negative offset {offset}")
            }
            WorkerErr::Config(reason) => write!(f, "invalid configuration: {reason}"),
            WorkerErr::Init(reason) => write!(f, "failed to initialize the factors: {reason}"),
        }
    }
}

impl Error for WorkerErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            WorkerErr::Io(e) => Some(e),
            WorkerErr::Tensor(e) => Some(e),
            WorkerErr::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for WorkerErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<TensorErr> for WorkerErr {
    fn from(value: TensorErr) -> Self {
        Self::Tensor(value)
    }
}

impl From<StoreErr> for WorkerErr {
    fn from(value: StoreErr) -> Self {
        Self::Store(value)
    }
}

impl From<serde_json::Error> for WorkerErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Config(value.to_string())
    }
}

impl From<NormalError> for WorkerErr {
    fn from(value: NormalError) -> Self {
        Self::Init(value.to_string())
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<WorkerErr> for io::Error {
    fn from(value: WorkerErr) -> Self {
        match value {
            WorkerErr::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
