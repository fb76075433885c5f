pub mod config;
pub mod data;
pub mod error;
pub mod eval;
pub mod factors;
pub mod gradient;
pub mod init;
pub mod report;
pub mod schedule;
pub mod worker;

pub use config::TrainingConfig;
pub use error::{Result, WorkerErr};
pub use eval::Evaluator;
pub use factors::{FactorAxis, Factors, GlobalDims};
pub use gradient::GradientStep;
pub use worker::{Evaluation, Role, RunSummary, Split, Worker};
