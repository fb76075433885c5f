use std::path::Path;

use log::{debug, info, warn};
use parameter_server::FactorStore;
use tokio::task;

use crate::{
    config::TrainingConfig,
    data::{AxisShards, LocalShard},
    error::{Result, WorkerErr},
    eval::Evaluator,
    factors::{FactorAxis, Factors, fetch_all, fetch_factor, touch_rows},
    gradient::GradientStep,
    init::{generate_rng, randomize},
    report,
    schedule::{EvalSchedule, StepSchedule},
};

/// Whether a worker carries the one-off duties of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Creates and randomizes the factor rows, evaluates the held out partition and saves the factors.
    Leader,
    Follower,
}

impl Role {
    /// The worker with id `0` leads the run.
    pub fn for_worker(worker_id: usize) -> Self {
        match worker_id {
            0 => Role::Leader,
            _ => Role::Follower,
        }
    }

    pub fn is_leader(self) -> bool {
        self == Role::Leader
    }
}

/// The partition an evaluation was computed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Test,
}

/// The mean squared error after `round` completed rounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    pub round: usize,
    pub split: Split,
    pub mse: f32,
}

/// What a worker leaves behind once it's done.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub worker_id: usize,
    pub role: Role,
    pub rounds: usize,
    pub evaluations: Vec<Evaluation>,
    /// The last snapshot of the factors this worker fetched.
    pub factors: Factors,
}

impl RunSummary {
    /// Returns the errors over the given split, in the order they were computed.
    pub fn errors(&self, split: Split) -> Vec<f32> {
        self.evaluations
            .iter()
            .filter(|eval| eval.split == split)
            .map(|eval| eval.mse)
            .collect()
    }
}

/// One participant of a bulk synchronous factorization run.
///
/// Every round updates `U`, `P` and `T` in turn, each update followed by a barrier and a
/// refetch of the factor it changed.
pub struct Worker<S: FactorStore> {
    worker_id: usize,
    role: Role,
    config: TrainingConfig,
    store: S,
    steps: StepSchedule,
    evals: EvalSchedule,
}

impl<S: FactorStore> Worker<S> {
    /// Creates a new `Worker`.
    ///
    /// # Args
    /// * `worker_id` - Selects the partition files of this worker.
    /// * `role` - Whether this worker leads the run.
    /// * `config` - The configuration of the run.
    /// * `store` - The store shared by every worker.
    ///
    /// # Returns
    /// A new worker instance.
    pub fn new(worker_id: usize, role: Role, config: TrainingConfig, store: S) -> Self {
        let steps = config.steps();
        let evals = EvalSchedule::new(config.eval_rounds, config.iterations);

        Self {
            worker_id,
            role,
            config,
            store,
            steps,
            evals,
        }
    }

    /// Runs the whole lifecycle of the worker, from registering to deregistering.
    ///
    /// # Returns
    /// The summary of the run.
    ///
    /// # Errors
    /// Returns `WorkerErr` on unreadable partitions, shape mismatches or store failures.
    pub async fn run(self) -> Result<RunSummary> {
        self.store.register_worker_thread()?;
        info!(worker_id = self.worker_id; "registered as {:?}", self.role);

        let outcome = self.train().await;
        let deregistered = self.store.deregister_worker_thread();

        let summary = outcome?;
        deregistered?;

        info!(worker_id = self.worker_id; "done");
        Ok(summary)
    }

    async fn train(&self) -> Result<RunSummary> {
        let dims = self.config.dims();
        let rank = self.config.rank();

        let shards = task::block_in_place(|| {
            AxisShards::load(|axis| self.config.shard_path(axis, self.worker_id))
        })?;
        debug!(
            worker_id = self.worker_id,
            row_offset = shards.row.offset,
            col_offset = shards.col.offset,
            word_offset = shards.word.offset;
            "loaded partitions"
        );

        if self.role.is_leader() {
            touch_rows(&self.store, rank).await?;
        }
        self.store.barrier().await?;

        if self.role.is_leader() {
            let mut rng = generate_rng(self.config.seed);
            randomize(&self.store, dims, rank, &mut rng).await?;
        }
        self.store.barrier().await?;

        let mut factors = fetch_all(&self.store, dims, rank).await?;
        let mut evaluations = Vec::new();
        let test_path = self
            .role
            .is_leader()
            .then(|| self.config.test_path())
            .flatten();

        if self.evals.is_periodic() {
            evaluations.extend(self.evaluate_train(&shards, &factors, 0)?);
        }

        for round in 0..self.config.iterations {
            let step = self.steps.step(round);
            info!(worker_id = self.worker_id, round = round + 1, step = step; "starting round");

            for axis in FactorAxis::ALL {
                let local = shards.get(axis);
                let gradient = GradientStep::new(&local.shard, local.offset, axis);

                let update = task::block_in_place(|| gradient.compute(&factors, step))?;
                gradient.push(&self.store, &update).await?;
                self.store.barrier().await?;

                let factor = fetch_factor(&self.store, axis, dims.entities(axis), rank).await?;
                factors.set(axis, factor);
            }

            if self.evals.after_round(round) {
                evaluations.extend(self.evaluate_train(&shards, &factors, round + 1)?);

                if let Some(path) = &test_path {
                    evaluations.push(self.evaluate_test(path, &factors, round + 1)?);
                }
            }
        }

        if self.role.is_leader() {
            let rounds = self.config.iterations;

            if self.evals.at_end() {
                evaluations.extend(self.evaluate_train(&shards, &factors, rounds)?);

                if let Some(path) = &test_path {
                    evaluations.push(self.evaluate_test(path, &factors, rounds)?);
                }
            }

            task::block_in_place(|| report::save(&self.config.output_path, &factors))?;
        }

        Ok(RunSummary {
            worker_id: self.worker_id,
            role: self.role,
            rounds: self.config.iterations,
            evaluations,
            factors,
        })
    }

    /// Evaluates the user partition of this worker, skipping it when it has no entries.
    fn evaluate_train(
        &self,
        shards: &AxisShards,
        factors: &Factors,
        round: usize,
    ) -> Result<Option<Evaluation>> {
        let evaluator = Evaluator::new(&shards.row.shard, shards.row.offset, 0);

        match task::block_in_place(|| evaluator.mse(factors)) {
            Ok(mse) => {
                info!(worker_id = self.worker_id, round = round, mse = mse; "train error");
                Ok(Some(Evaluation {
                    round,
                    split: Split::Train,
                    mse,
                }))
            }
            Err(WorkerErr::EmptyShard) => {
                warn!(worker_id = self.worker_id; "no training entries to evaluate");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn evaluate_test(&self, path: &Path, factors: &Factors, round: usize) -> Result<Evaluation> {
        let mse = task::block_in_place(|| {
            let test = LocalShard::load(path, FactorAxis::Row)?;
            Evaluator::new(&test.shard, 0, 0).mse(factors)
        })?;

        info!(worker_id = self.worker_id, round = round, mse = mse; "test error");
        Ok(Evaluation {
            round,
            split: Split::Test,
            mse,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_worker_leads() {
        assert_eq!(Role::for_worker(0), Role::Leader);
        assert_eq!(Role::for_worker(3), Role::Follower);
        assert!(!Role::Follower.is_leader());
    }

    #[test]
    fn errors_by_split() {
        let summary = RunSummary {
            worker_id: 0,
            role: Role::Leader,
            rounds: 1,
            evaluations: vec![
                Evaluation {
                    round: 0,
                    split: Split::Train,
                    mse: 3.,
                },
                Evaluation {
                    round: 1,
                    split: Split::Train,
                    mse: 2.,
                },
                Evaluation {
                    round: 1,
                    split: Split::Test,
                    mse: 4.,
                },
            ],
            factors: Factors {
                u: ndarray::Array2::zeros((1, 1)),
                p: ndarray::Array2::zeros((1, 1)),
                t: ndarray::Array2::zeros((1, 1)),
            },
        };

        assert_eq!(summary.errors(Split::Train), vec![3., 2.]);
        assert_eq!(summary.errors(Split::Test), vec![4.]);
    }
}
