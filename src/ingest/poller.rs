//! Background sync poller.
//!
//! Runs a cycle at startup, then every `sync_interval_minutes` or when
//! `AppContext::sync_wake` is notified (`POST /sync`).

use std::sync::Arc;

use crate::state::AppContext;

/// Run one cycle on its own task so a panic inside it is contained.
pub async fn run_cycle(ctx: &Arc<AppContext>) {
    let task_ctx = Arc::clone(ctx);
    let handle = tokio::spawn(async move {
        crate::ingest::sync(
            task_ctx.source.as_ref(),
            task_ctx.store.as_ref(),
            &task_ctx.config.ranges,
        )
        .await
    });

    match handle.await {
        Ok(report) => {
            if let Some(err) = &report.first_error {
                log::warn!("Sync poller: cycle {} had errors: {}", report.cycle_id, err);
            }
            *ctx.last_sync.write() = Some(report);
        }
        Err(e) => log::error!("Sync poller: cycle task failed: {}", e),
    }
}

pub async fn run_sync_poller(ctx: Arc<AppContext>) {
    let interval = ctx.config.sync_interval();
    log::info!(
        "Sync poller: started ({} ranges, every {} min)",
        ctx.config.ranges.len(),
        ctx.config.sync_interval_minutes
    );

    loop {
        run_cycle(&ctx).await;

        tokio::select! {
            _ = tokio::time::sleep(interval) => {},
            _ = ctx.sync_wake.notified() => {
                log::info!("Sync poller: woken by manual sync signal");
            },
        }
    }
}
