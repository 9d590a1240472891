//! Convergence polling
//!
//! Cluster state converges asynchronously: a node becomes ready, an
//! allocation moves from pending to running. Callers that need a state
//! before they can proceed poll for it with [`wait_for`].

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

use crate::error::ConnectionError;
use crate::traits::ControlPlane;
use crate::types::{AllocationStub, ClientStatus, NodeStatus, NodeStub};

/// Retry cadence and overall deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(50),
            timeout: Duration::from_secs(10),
        }
    }
}

impl PollConfig {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

#[derive(Error, Debug)]
pub enum PollError {
    #[error("Condition not met after {elapsed:?} ({attempts} attempts): {last_error}")]
    TimedOut {
        elapsed: Duration,
        attempts: u32,
        last_error: String,
    },

    /// The condition can never be met; polling stopped early
    #[error("{0}")]
    Unreachable(String),
}

/// Outcome of a single poll attempt
#[derive(Debug)]
pub enum Attempt<T> {
    /// Converged with a value
    Ready(T),
    /// Not yet; the reason is reported if the deadline passes
    Pending(String),
    /// Give up immediately
    Fatal(String),
}

/// Run `condition` every `config.interval` until it is ready or `config.timeout` passes.
///
/// Errors returned by the condition are treated as transient and retried;
/// the most recent one is reported on timeout.
pub async fn wait_for<T, E, F, Fut>(config: PollConfig, mut condition: F) -> Result<T, PollError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Attempt<T>, E>>,
    E: Display,
{
    let started = Instant::now();
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let last_error = match condition().await {
            Ok(Attempt::Ready(value)) => {
                tracing::debug!(attempts, elapsed = ?started.elapsed(), "Condition met");
                return Ok(value);
            }
            Ok(Attempt::Pending(reason)) => reason,
            Ok(Attempt::Fatal(reason)) => return Err(PollError::Unreachable(reason)),
            Err(e) => e.to_string(),
        };

        let elapsed = started.elapsed();
        if elapsed >= config.timeout {
            return Err(PollError::TimedOut {
                elapsed,
                attempts,
                last_error,
            });
        }

        tracing::trace!(attempts, %last_error, "Condition not met yet");
        tokio::time::sleep(config.interval.min(config.timeout - elapsed)).await;
    }
}

/// Wait until a ready node advertises `driver`
pub async fn wait_for_node_ready<C>(
    control_plane: &C,
    driver: &str,
    config: PollConfig,
) -> Result<NodeStub, PollError>
where
    C: ControlPlane + ?Sized,
{
    wait_for(config, || async {
        let nodes = control_plane.list_nodes().await?;
        let ready = nodes
            .into_iter()
            .find(|n| n.status == NodeStatus::Ready && n.drivers.iter().any(|d| d == driver));
        Ok::<_, ConnectionError>(match ready {
            Some(node) => Attempt::Ready(node),
            None => Attempt::Pending(format!("no ready nodes with driver {}", driver)),
        })
    })
    .await
}

/// Wait until an allocation reports `running`; fails fast if it turns terminal
pub async fn wait_for_allocation_running<C>(
    control_plane: &C,
    alloc_id: &str,
    config: PollConfig,
) -> Result<AllocationStub, PollError>
where
    C: ControlPlane + ?Sized,
{
    wait_for(config, || async {
        let alloc = control_plane.get_allocation(alloc_id).await?;
        Ok::<_, ConnectionError>(match alloc.client_status {
            ClientStatus::Running => Attempt::Ready(alloc),
            status if status.is_terminal() => Attempt::Fatal(format!(
                "allocation {} is {} and will never run",
                alloc.short_id(),
                status
            )),
            status => Attempt::Pending(format!("alloc is not running yet: {}", status)),
        })
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    #[tokio::test(start_paused = true)]
    async fn test_converges_after_retries() {
        let calls = AtomicU32::new(0);
        let value = wait_for(PollConfig::default(), || async {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err("not yet")
            } else {
                Ok(Attempt::Ready(n))
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_reports_last_error() {
        let config = PollConfig::new(Duration::from_millis(10), Duration::from_millis(100));
        let err = wait_for(config, || async { Ok::<Attempt<()>, String>(Attempt::Pending("no ready nodes".into())) })
            .await
            .unwrap_err();

        match err {
            PollError::TimedOut {
                last_error,
                attempts,
                elapsed,
            } => {
                assert_eq!(last_error, "no ready nodes");
                assert!(attempts > 1);
                assert!(elapsed >= Duration::from_millis(100));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    struct FakePlane {
        statuses: Mutex<Vec<ClientStatus>>,
    }

    #[async_trait]
    impl ControlPlane for FakePlane {
        async fn list_allocations(
            &self,
            _prefix: Option<&str>,
        ) -> Result<Vec<AllocationStub>, ConnectionError> {
            Ok(vec![])
        }

        async fn get_allocation(&self, alloc_id: &str) -> Result<AllocationStub, ConnectionError> {
            let mut statuses = self.statuses.lock().unwrap();
            let status = if statuses.len() > 1 {
                statuses.remove(0)
            } else {
                statuses[0]
            };
            let mut alloc = AllocationStub::new("a", "node", "group", vec!["t".into()]);
            alloc.id = alloc_id.to_string();
            alloc.client_status = status;
            Ok(alloc)
        }

        async fn list_nodes(&self) -> Result<Vec<NodeStub>, ConnectionError> {
            Ok(vec![NodeStub {
                id: "n1".into(),
                name: "local".into(),
                status: NodeStatus::Ready,
                drivers: vec!["mock_driver".into()],
            }])
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_allocation_running_helper() {
        let plane = FakePlane {
            statuses: Mutex::new(vec![
                ClientStatus::Pending,
                ClientStatus::Pending,
                ClientStatus::Running,
            ]),
        };
        let alloc = wait_for_allocation_running(&plane, "abcd", PollConfig::default())
            .await
            .unwrap();
        assert_eq!(alloc.id, "abcd");
        assert_eq!(alloc.client_status, ClientStatus::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_allocation_fails_fast() {
        let plane = FakePlane {
            statuses: Mutex::new(vec![ClientStatus::Failed]),
        };
        let err = wait_for_allocation_running(&plane, "abcd", PollConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PollError::Unreachable(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_node_ready_helper() {
        let plane = FakePlane {
            statuses: Mutex::new(vec![ClientStatus::Running]),
        };
        let node = wait_for_node_ready(&plane, "mock_driver", PollConfig::default())
            .await
            .unwrap();
        assert_eq!(node.name, "local");

        let err = wait_for_node_ready(
            &plane,
            "docker",
            PollConfig::new(Duration::from_millis(5), Duration::from_millis(20)),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("no ready nodes with driver docker"));
    }
}
