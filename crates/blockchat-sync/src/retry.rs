use std::fmt::Display;
use std::future::Future;

use tracing::debug;

/// Run `op` up to `attempts` times, retrying immediately on error.
///
/// Returns the first success or the last error.
pub async fn retry<T, E, F, Fut>(attempts: u32, what: &str, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                debug!(what, attempt, error = %e, "Remote call failed, retrying");
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
