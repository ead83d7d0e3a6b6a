use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::debug;

use crate::error::{ErrorKind, TopologyResult};
use crate::topology_error;

/// Polls `check` every `interval` until it reports `true` or `timeout` elapses.
///
/// A failing check counts as "not yet": connections refused while a node boots, or a relation
/// that does not exist yet on a replica, are expected while waiting. The last such failure is
/// reported in the [`ErrorKind::ReplicationTimeout`] raised on expiry, which names `subject`.
pub async fn poll_until<F, Fut>(
    subject: &str,
    timeout: Duration,
    interval: Duration,
    mut check: F,
) -> TopologyResult<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = TopologyResult<bool>>,
{
    let deadline = Instant::now() + timeout;
    let mut attempts = 0u32;
    let mut last_error = None;

    loop {
        attempts += 1;
        match check().await {
            Ok(true) => {
                debug!(subject, attempts, "condition reached");
                return Ok(());
            }
            Ok(false) => {}
            Err(err) => {
                debug!(subject, attempts, kind = ?err.kind(), "check failed, retrying");
                last_error = Some(err);
            }
        }

        if Instant::now() >= deadline {
            break;
        }
        sleep(interval).await;
    }

    let detail = match last_error {
        Some(err) => format!(
            "`{subject}` not ready after {timeout:?} ({attempts} attempts), last check error: {}",
            err.detail().unwrap_or("none")
        ),
        None => format!("`{subject}` not ready after {timeout:?} ({attempts} attempts)"),
    };

    Err(topology_error!(
        ErrorKind::ReplicationTimeout,
        "Timed out waiting for replication",
        detail = detail
    ))
}
