//! Read-only view of the control plane

use async_trait::async_trait;

use crate::error::ConnectionError;
use crate::types::{AllocationStub, NodeStub};

/// Listing and status queries against the control plane.
///
/// Every call reflects the control plane's state at the time of the call;
/// implementations must not cache results.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Allocations whose id starts with `prefix` (all when `None`)
    async fn list_allocations(
        &self,
        prefix: Option<&str>,
    ) -> Result<Vec<AllocationStub>, ConnectionError>;

    /// One allocation by full id
    async fn get_allocation(&self, alloc_id: &str) -> Result<AllocationStub, ConnectionError>;

    /// All client nodes
    async fn list_nodes(&self) -> Result<Vec<NodeStub>, ConnectionError>;
}
