use std::{env, io};

use log::{error, info};
use parameter_server::LocalStore;
use tokio::{signal, task::JoinSet};
use worker::{Role, RunSummary, Split, TrainingConfig, Worker, factors::create_tables};

const CONFIG_VAR: &str = "CONFIG";
const STALENESS: usize = 0;

#[tokio::main]
async fn main() -> io::Result<()> {
    env_logger::init();

    let path = env::args()
        .nth(1)
        .or_else(|| env::var(CONFIG_VAR).ok())
        .ok_or_else(|| io::Error::other(format!("usage: node <config> or {CONFIG_VAR}=<config>")))?;

    let config = TrainingConfig::load(&path)?;
    let workers = config.workers.get();
    info!(workers = workers, rank = config.rank(), iterations = config.iterations; "loaded {path}");

    let store = LocalStore::new(workers);
    create_tables(&store, config.dims(), STALENESS)?;

    let mut tasks = JoinSet::new();
    for id in 0..workers {
        let worker = Worker::new(id, Role::for_worker(id), config.clone(), store.clone());
        tasks.spawn(worker.run());
    }

    let outcome = tokio::select! {
        outcome = join_workers(&mut tasks, &store) => outcome,
        _ = signal::ctrl_c() => {
            info!("interrupted");
            Ok(())
        }
    };

    store.shut_down();
    tasks.shutdown().await;
    outcome
}

/// Waits for every worker, shutting the store down on the first failure so no one waits forever.
async fn join_workers(
    tasks: &mut JoinSet<worker::Result<RunSummary>>,
    store: &LocalStore,
) -> io::Result<()> {
    let mut failure = None;

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(summary)) => {
                let last = summary.errors(Split::Train).last().copied();
                info!(worker_id = summary.worker_id; "finished with train error {last:?}");

                if let Some(mse) = summary.errors(Split::Test).last() {
                    info!("test error {mse}");
                }
            }
            Ok(Err(e)) => {
                error!("worker failed: {e}");
                store.shut_down();
                failure.get_or_insert(io::Error::from(e));
            }
            Err(e) => {
                error!("worker panicked: {e}");
                store.shut_down();
                failure.get_or_insert(io::Error::other(e));
            }
        }
    }

    failure.map_or(Ok(()), Err)
}
