use crate::reconciler::Reconciler;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::info;

/// Drives ingestion cycles until `shutdown` resolves.
///
/// The first tick fires immediately, which gives the eager cycle at startup.
/// Ticks missed while a slow cycle runs are dropped rather than replayed.
pub async fn run<F>(reconciler: Arc<Reconciler>, shutdown: F)
where
    F: Future<Output = ()>,
{
    let mut ticker = interval(reconciler.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tokio::pin!(shutdown);

    info!(interval = ?reconciler.interval(), "ingestion poll loop started");
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("ingestion poll loop stopping");
                break;
            }
            _ = ticker.tick() => {
                reconciler.tick().await;
            }
        }
    }
}

pub fn spawn<F>(reconciler: Arc<Reconciler>, shutdown: F) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(run(reconciler, shutdown))
}
