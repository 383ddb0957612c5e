use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::errors::{FusionError, FusionResult};

/// Timed waits used for backoff and pacing.
///
/// Every wait in the engine goes through this seam so a run can be
/// interrupted and tests can observe waits without spending real time.
#[async_trait::async_trait]
pub trait Sleeper: Send + Sync {
    /// Wait for `duration`, or fail with [`FusionError::Cancelled`] if the run is stopped first.
    async fn sleep(&self, duration: Duration) -> FusionResult<()>;
}

#[derive(Debug, Clone)]
pub struct TokioSleeper {
    cancel: CancellationToken,
}

impl TokioSleeper {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }
}

#[async_trait::async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) -> FusionResult<()> {
        if self.cancel.is_cancelled() {
            return Err(FusionError::Cancelled);
        }

        tokio::select! {
            _ = self.cancel.cancelled() => Err(FusionError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}

/// Token cancelled on the first ctrl-c.
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::warn!("ctrl-c received, stopping after the current request");
                trigger.cancel();
            }
            Err(e) => tracing::error!(error = %e, "failed to listen for ctrl-c"),
        }
    });

    cancel
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tokio_sleeper_waits_when_not_cancelled() {
        let sleeper = TokioSleeper::new(CancellationToken::new());
        assert!(sleeper.sleep(Duration::from_millis(5)).await.is_ok());
    }

    #[tokio::test]
    async fn tokio_sleeper_returns_early_on_cancel() {
        let cancel = CancellationToken::new();
        let sleeper = TokioSleeper::new(cancel.clone());

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let res = sleeper.sleep(Duration::from_secs(600)).await;

        assert!(matches!(res, Err(FusionError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn tokio_sleeper_refuses_to_wait_after_cancel() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let sleeper = TokioSleeper::new(cancel);

        assert!(matches!(sleeper.sleep(Duration::from_secs(1)).await, Err(FusionError::Cancelled)));
    }
}
