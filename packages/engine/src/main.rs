use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use common::ProcessingState;
use engine::config::EngineAppConfig;
use engine::consumer::consume_worker_reports;
use engine::reconcile::run_reconciliation;
use engine::scoring::run_normalization;
use engine::store::{JudgeStore, MemoryStore};
use engine::{BrokerJobQueue, Publisher, Reconciler, ResultProcessor};
use mq::{MqConfig, init_mq};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();
    std::panic::set_hook(Box::new(|panic_info| {
        error!(panic = %panic_info, "Panic occurred");
    }));

    let config = EngineAppConfig::load().context("Failed to load config")?;
    info!("Engine starting");

    let store: Arc<dyn JudgeStore> = match &config.store.seed_path {
        Some(path) => Arc::new(
            MemoryStore::load_seed(path)
                .await
                .with_context(|| format!("Failed to load seed {}", path.display()))?,
        ),
        None => {
            warn!("No store seed configured, starting with an empty store");
            Arc::new(MemoryStore::new())
        }
    };

    let mq = Arc::new(
        init_mq(MqConfig {
            url: config.mq.url.clone(),
            pool_size: config.mq.pool_size,
        })
        .await
        .context("Failed to initialize MQ")?,
    );

    info!(
        queue_name = %config.mq.queue_name,
        result_queue_name = %config.mq.result_queue_name,
        "MQ connected"
    );

    let queue = Arc::new(BrokerJobQueue::new(mq.clone(), config.mq.queue_name.clone()));
    let publisher = Arc::new(Publisher::new(store.clone(), queue));
    let processor = Arc::new(ResultProcessor::new(store.clone()));
    let reconciler = Arc::new(Reconciler::new(
        store.clone(),
        publisher.clone(),
        config.reconciliation.clone(),
    ));

    let pending: Vec<i32> = store
        .processing_in_state(
            ProcessingState::Pending,
            Utc::now(),
            config.reconciliation.batch_size,
        )
        .await
        .context("Failed to list pending submissions")?
        .iter()
        .map(|row| row.submission_id)
        .collect();
    if !pending.is_empty() {
        let enqueued = publisher
            .publish_batch(&pending)
            .await
            .context("Failed to publish pending submissions")?;
        info!(pending = pending.len(), enqueued, "Published pending submissions");
    }

    tokio::spawn(run_reconciliation(reconciler));
    tokio::spawn(run_normalization(
        store.clone(),
        Duration::from_secs(config.scoring.normalization_interval_secs.max(1)),
    ));

    consume_worker_reports(processor, mq, config.mq.result_queue_name.clone()).await;

    Ok(())
}
