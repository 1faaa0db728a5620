//! Single bounded retry for persistence calls.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::{AppError, Result};

const RETRY_DELAY: Duration = Duration::from_millis(50);

/// Run `op`, retrying once after a short delay on a storage failure.
///
/// Domain errors (`NotFound`, `Validation`, ...) are returned untouched on
/// the first attempt. A storage failure that survives the retry surfaces as
/// `AppError::Orchestrator`.
///
/// # Errors
///
/// Returns the domain error from `op`, or `AppError::Orchestrator` when both
/// attempts fail at the storage level.
pub async fn retry_once<T, F, Fut>(label: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match op().await {
        Ok(value) => Ok(value),
        Err(err) if is_transient(&err) => {
            warn!(op = label, %err, "persistence call failed, retrying once");
            tokio::time::sleep(RETRY_DELAY).await;
            op().await.map_err(|retry_err| {
                if is_transient(&retry_err) {
                    AppError::Orchestrator(format!("{label} failed after retry: {retry_err}"))
                } else {
                    retry_err
                }
            })
        }
        Err(err) => Err(err),
    }
}

fn is_transient(err: &AppError) -> bool {
    matches!(err, AppError::Db(_) | AppError::Io(_))
}
