use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::export::ports::ExportLease;

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Periodically reports aggregate progress so the server does not reclaim the lease.
pub struct LeaseKeepAlive;

/// Running keep-alive. Must be stopped before the lease is finalized.
///
/// Dropping the handle without `stop` cancels the loop and aborts the task, so a dropped
/// export never leaves a heartbeat behind.
pub struct KeepAliveHandle {
    stop: CancellationToken,
    task: JoinHandle<u64>,
}

impl LeaseKeepAlive {
    /// Start reporting every `interval`, first report one interval from now.
    ///
    /// The loop also ends when `parent` is cancelled.
    pub fn spawn(
        lease: Arc<dyn ExportLease>,
        progress: watch::Receiver<u8>,
        interval: Duration,
        parent: &CancellationToken,
    ) -> KeepAliveHandle {
        let stop = parent.child_token();
        let token = stop.clone();
        let period = interval.max(MIN_INTERVAL);

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut delivered = 0u64;

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let percent = *progress.borrow();
                tokio::select! {
                    biased;
                    // Drop an in-flight report rather than let it outlive the stop signal.
                    _ = token.cancelled() => break,
                    res = lease.report_progress(percent) => match res {
                        Ok(()) => {
                            delivered += 1;
                            debug!("lease {} keep-alive at {}%", lease.id(), percent);
                        }
                        Err(e) => warn!("lease {} keep-alive failed at {}%: {}", lease.id(), percent, e),
                    }
                }
            }
            delivered
        });

        KeepAliveHandle { stop, task }
    }
}

impl KeepAliveHandle {
    /// Signal the loop and wait for it to exit. Once this returns no further report
    /// can reach the lease. Returns the number of delivered reports.
    pub async fn stop(mut self) -> u64 {
        self.stop.cancel();
        match (&mut self.task).await {
            Ok(delivered) => delivered,
            Err(e) => {
                warn!("keep-alive task ended abnormally: {}", e);
                0
            }
        }
    }
}

impl Drop for KeepAliveHandle {
    fn drop(&mut self) {
        self.stop.cancel();
        self.task.abort();
    }
}
