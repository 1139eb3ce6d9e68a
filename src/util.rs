use std::future::Future;
use std::time::Duration;

use futures_timer::Delay;
use tracing::debug;

use crate::Result;

/// Runs a closure when dropped, including when the owning future is cancelled.
pub(crate) struct ScopeGuard<F: FnOnce()> {
    dropfn: Option<F>,
}

impl<F: FnOnce()> Drop for ScopeGuard<F> {
    fn drop(&mut self) {
        if let Some(dropfn) = self.dropfn.take() {
            dropfn();
        }
    }
}

pub(crate) fn defer<F: FnOnce()>(dropfn: F) -> ScopeGuard<F> {
    ScopeGuard { dropfn: Some(dropfn) }
}

/// Runs `attempt` until it succeeds or `attempts` tries have failed, sleeping `delay` between tries.
///
/// At least one attempt is always made. The error of the final attempt is returned.
pub(crate) async fn retry<T, F, Fut>(attempts: u32, delay: Duration, mut attempt: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut tries = 1;
    loop {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(err) if tries < attempts => {
                debug!("attempt {} of {} failed: {}", tries, attempts, err);
                if !delay.is_zero() {
                    Delay::new(delay).await;
                }
                tries += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
