use std::{
    fs,
    num::NonZeroUsize,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{
    error::{Result, WorkerErr},
    factors::{FactorAxis, GlobalDims},
    schedule::StepSchedule,
};

/// The configuration shared by every worker of a training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TrainingConfig {
    /// The rank `k` of the factorization.
    #[serde(default = "default_rank")]
    pub rank: NonZeroUsize,
    /// The amount of bulk synchronous rounds.
    #[serde(default = "default_iterations")]
    pub iterations: usize,
    pub users: NonZeroUsize,
    pub products: NonZeroUsize,
    pub words: NonZeroUsize,
    #[serde(default = "default_workers")]
    pub workers: NonZeroUsize,
    /// The step length of the first round.
    #[serde(default = "default_step_size")]
    pub step_size: f32,
    /// The factor the step length is multiplied by after every round.
    #[serde(default = "default_step_decay")]
    pub step_decay: f32,
    /// Evaluate every this many rounds, `0` only evaluates once at the end.
    #[serde(default)]
    pub eval_rounds: usize,
    /// The directory holding every partition file.
    pub base_path: PathBuf,
    /// The directory the final factors are written to.
    #[serde(default = "default_output_path")]
    pub output_path: PathBuf,
    #[serde(default)]
    pub seed: Option<u64>,
    /// The held out partition, `{base_path}/_test` when missing.
    #[serde(default)]
    pub test: Option<PathBuf>,
}

fn default_rank() -> NonZeroUsize {
    NonZeroUsize::new(7).unwrap_or(NonZeroUsize::MIN)
}

fn default_iterations() -> usize {
    1
}

fn default_step_size() -> f32 {
    1.
}

fn default_step_decay() -> f32 {
    0.9
}

fn default_workers() -> NonZeroUsize {
    NonZeroUsize::new(3).unwrap_or(NonZeroUsize::MIN)
}

fn default_output_path() -> PathBuf {
    PathBuf::from("out")
}

impl TrainingConfig {
    /// Parses a configuration out of a json document.
    ///
    /// # Arguments
    /// * `json` - The document.
    ///
    /// # Returns
    /// The configuration or a `Config` error if it's malformed or invalid.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a configuration out of a json file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Checks the fields serde can't check on its own.
    pub fn validate(&self) -> Result<()> {
        if self.base_path.as_os_str().is_empty() {
            return Err(WorkerErr::Config("`base_path` can't be empty".into()));
        }

        for (name, count) in [
            ("users", self.users),
            ("products", self.products),
            ("words", self.words),
        ] {
            if u32::try_from(count.get()).is_err() {
                return Err(WorkerErr::Config(format!(
                    "`{name}` doesn't fit in a 32 bit index"
                )));
            }
        }

        if !(self.step_size.is_finite() && self.step_size > 0.) {
            return Err(WorkerErr::Config("`step_size` must be positive".into()));
        }

        if !(self.step_decay > 0. && self.step_decay <= 1.) {
            return Err(WorkerErr::Config("`step_decay` must be in (0, 1]".into()));
        }

        Ok(())
    }

    pub fn rank(&self) -> usize {
        self.rank.get()
    }

    pub fn steps(&self) -> StepSchedule {
        StepSchedule::new(self.step_size, self.step_decay)
    }

    /// Returns the global entity counts of the three axes.
    pub fn dims(&self) -> GlobalDims {
        GlobalDims {
            users: self.users.get(),
            products: self.products.get(),
            words: self.words.get(),
        }
    }

    /// Returns the partition file of `axis` owned by `worker_id`.
    pub fn shard_path(&self, axis: FactorAxis, worker_id: usize) -> PathBuf {
        let prefix = match axis {
            FactorAxis::Row => "_user_train",
            FactorAxis::Col => "_prod_train",
            FactorAxis::Word => "_word_train",
        };

        self.base_path.join(format!("{prefix}{worker_id}"))
    }

    /// Returns the held out partition if there's one to evaluate.
    pub fn test_path(&self) -> Option<PathBuf> {
        match &self.test {
            Some(path) => Some(path.clone()),
            None => {
                let path = self.base_path.join("_test");
                path.is_file().then_some(path)
            }
        }
    }
}
