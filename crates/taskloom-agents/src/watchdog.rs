use std::time::Duration;

use tracing::{debug, error};

/// Typed result of a watchdog expiry, distinct from any provider error so
/// callers can tell "took too long" from "failed outright".
#[derive(Debug, Clone, thiserror::Error)]
#[error("{operation} exceeded {}s deadline", .timeout.as_secs_f64())]
pub struct DeadlineExceeded {
    pub operation: String,
    pub timeout: Duration,
}

/// Wraps asynchronous operations with a hard wall-clock deadline.
pub struct ExecutionWatchdog {
    timeout: Duration,
}

impl ExecutionWatchdog {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `fut`, cancelling it if the deadline passes. The wrapped future is
    /// dropped on expiry, which aborts any in-flight I/O before control
    /// returns to the caller.
    pub async fn guard<F: Future>(
        &self,
        operation: &str,
        fut: F,
    ) -> Result<F::Output, DeadlineExceeded> {
        debug!("watchdog: starting {operation} with {:?} deadline", self.timeout);
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(output) => {
                debug!("watchdog: {operation} completed within deadline");
                Ok(output)
            }
            Err(_) => {
                error!("watchdog: {operation} exceeded {:?} deadline", self.timeout);
                Err(DeadlineExceeded {
                    operation: operation.to_string(),
                    timeout: self.timeout,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn fast_operations_pass_through() {
        let watchdog = ExecutionWatchdog::new(Duration::from_millis(100));
        let result = watchdog.guard("quick", async { 7 }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn slow_operations_become_typed_deadline_errors() {
        let watchdog = ExecutionWatchdog::new(Duration::from_millis(10));
        let result = watchdog
            .guard("slow", async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                7
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.operation, "slow");
        assert!(err.to_string().contains("slow"));
    }

    #[tokio::test]
    async fn expired_operation_is_cancelled_not_leaked() {
        struct SetOnDrop(Arc<AtomicBool>);
        impl Drop for SetOnDrop {
            fn drop(&mut self) {
                self.0.store(true, Ordering::SeqCst);
            }
        }

        let dropped = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&dropped);
        let watchdog = ExecutionWatchdog::new(Duration::from_millis(10));

        let result = watchdog
            .guard("hung", async move {
                let _guard = SetOnDrop(flag);
                tokio::time::sleep(Duration::from_secs(60)).await;
            })
            .await;

        assert!(result.is_err());
        // The future was dropped before guard() returned.
        assert!(dropped.load(Ordering::SeqCst));
    }
}
