use db_access::rpc::EthRpcClient;
use db_access::schema::ensure_schema;
use db_access::DbConnection;
use eyre::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use twap_engine::processor::{BatchProcessor, ConfirmedProcessor, UnconfirmedProcessor};
use twap_engine::runner::{Runner, ShutdownHandle};
use twap_engine::source::BlockSource;
use twap_engine::store::AggregateStore;
use twap_engine::types::ConfirmationStatus;

use crate::adapters::{FossilBlockSource, PgAggregateStore, RpcBlockSource};
use crate::config::ServiceConfig;

/// The running pipelines and the pools they share.
pub struct Service {
    aggregate_db: Arc<DbConnection>,
    fossil_db: Option<Arc<DbConnection>>,
    tasks: Vec<(ConfirmationStatus, JoinHandle<()>)>,
}

impl Service {
    /// Connects, makes sure the schema exists and spawns one runner per
    /// enabled pipeline.
    pub async fn start(config: &ServiceConfig, shutdown: &ShutdownHandle) -> Result<Self> {
        let aggregate_db =
            DbConnection::new(&config.pitchlake_db_url, config.db_max_connections).await?;
        ensure_schema(&aggregate_db.pool).await?;
        let store: Arc<dyn AggregateStore> = Arc::new(PgAggregateStore::new(aggregate_db.clone()));

        let mut tasks = Vec::new();
        let mut fossil_db = None;

        if config.enable_confirmed {
            let db = DbConnection::new(&config.fossil_db_url, config.db_max_connections).await?;
            let source = Arc::new(FossilBlockSource::new(db.clone()));
            let processor =
                ConfirmedProcessor::load(store.clone(), source.clone(), config.confirmed_settings())
                    .await?;
            tasks.push(spawn_runner(config, shutdown, source, processor));
            fossil_db = Some(db);
        }

        if config.enable_unconfirmed {
            let client = EthRpcClient::new(config.eth_rpc_url.clone(), config.rpc_timeout)?;
            let source = Arc::new(RpcBlockSource::new(client));
            let processor = UnconfirmedProcessor::load(store.clone(), config.unconfirmed_settings())
                .await?
                .with_recalibration_interval(config.recalibrate_every_blocks);
            tasks.push(spawn_runner(config, shutdown, source, processor));
        }

        if tasks.is_empty() {
            warn!("Both pipelines are disabled; nothing to do");
        }

        Ok(Self {
            aggregate_db,
            fossil_db,
            tasks,
        })
    }

    pub fn is_finished(&self) -> bool {
        self.tasks.iter().all(|(_, task)| task.is_finished())
    }

    /// Waits up to `grace` for every runner to return, aborts the rest, then
    /// closes the pools.
    pub async fn stop(self, grace: Duration) {
        for (status, mut task) in self.tasks {
            match tokio::time::timeout(grace, &mut task).await {
                Ok(Ok(())) => info!(%status, "Pipeline stopped"),
                Ok(Err(e)) => warn!(%status, "Pipeline task failed: {}", e),
                Err(_) => {
                    warn!(%status, "Pipeline did not stop within {:?}; aborting", grace);
                    task.abort();
                }
            }
        }

        if let Some(db) = self.fossil_db {
            db.close().await;
        }
        self.aggregate_db.close().await;
        info!("Database pools closed");
    }
}

fn spawn_runner<S, P>(
    config: &ServiceConfig,
    shutdown: &ShutdownHandle,
    source: Arc<S>,
    processor: P,
) -> (ConfirmationStatus, JoinHandle<()>)
where
    S: BlockSource + 'static,
    P: BatchProcessor + 'static,
{
    let status = processor.status();
    let catch_up_only = config.catch_up_only;
    let mut runner = Runner::new(source, processor, config.runner_config(), shutdown.subscribe());

    let task = tokio::spawn(async move {
        info!(%status, catch_up_only, "Starting pipeline");
        if catch_up_only {
            runner.catch_up_only().await;
        } else {
            runner.start().await;
        }
        info!(%status, checkpoint = ?runner.processor().checkpoint(), "Pipeline finished");
    });

    (status, task)
}
