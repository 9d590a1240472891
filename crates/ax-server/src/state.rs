//! Control-plane state: the allocation registry and the local node

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;

use ax_core::api::{ApiError, ApiErrorKind};
use ax_core::config::ServerConfig;
use ax_core::{AllocationStub, ClientStatus, NodeStatus, NodeStub};

use crate::driver::{TaskConfig, DRIVERS};
use crate::session::SessionRegistry;

/// An allocation together with the driver config of each task
#[derive(Debug, Clone)]
pub struct Allocation {
    pub stub: AllocationStub,
    pub tasks: BTreeMap<String, TaskConfig>,
}

impl Allocation {
    /// A pending allocation with no tasks yet
    pub fn new(name: impl Into<String>, task_group: impl Into<String>) -> Self {
        Self {
            stub: AllocationStub::new(name, "", task_group, Vec::new()),
            tasks: BTreeMap::new(),
        }
    }

    pub fn with_task(mut self, name: impl Into<String>, config: impl Into<TaskConfig>) -> Self {
        self.tasks.insert(name.into(), config.into());
        self.stub.tasks = self.tasks.keys().cloned().collect();
        self
    }

    pub fn with_status(mut self, status: ClientStatus) -> Self {
        self.stub.client_status = status;
        self
    }

    /// Override the generated id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.stub.id = id.into();
        self
    }

    pub fn id(&self) -> &str {
        &self.stub.id
    }
}

/// Shared state for the development control plane
pub struct ServerState {
    pub config: ServerConfig,
    allocations: DashMap<String, Allocation>,
    node: Mutex<NodeStub>,
    /// Active exec sessions
    pub sessions: Arc<SessionRegistry>,
}

impl ServerState {
    pub fn new(config: ServerConfig) -> Self {
        let name = config
            .node_name
            .clone()
            .unwrap_or_else(|| gethostname::gethostname().to_string_lossy().into_owned());
        let node = NodeStub {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            status: NodeStatus::Initializing,
            drivers: DRIVERS.iter().map(|d| d.to_string()).collect(),
        };
        let sessions = Arc::new(SessionRegistry::new(
            config.max_sessions.map(|max| max as usize),
        ));

        Self {
            config,
            allocations: DashMap::new(),
            node: Mutex::new(node),
            sessions,
        }
    }

    pub fn node(&self) -> NodeStub {
        self.node.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set_node_status(&self, status: NodeStatus) {
        let mut node = self.node.lock().unwrap_or_else(|e| e.into_inner());
        if node.status != status {
            tracing::info!(node = %node.name, "Node status {} -> {}", node.status, status);
            node.status = status;
        }
    }

    /// Insert or replace an allocation, placing it on the local node.
    ///
    /// Returns the allocation id.
    pub fn upsert_allocation(&self, mut allocation: Allocation) -> String {
        allocation.stub.node_id = self.node().id;
        let id = allocation.stub.id.clone();
        tracing::debug!(alloc = %id, name = %allocation.stub.name, "Allocation registered");
        self.allocations.insert(id.clone(), allocation);
        id
    }

    /// Returns false for unknown allocations
    pub fn set_client_status(&self, alloc_id: &str, status: ClientStatus) -> bool {
        match self.allocations.get_mut(alloc_id) {
            Some(mut alloc) => {
                alloc.stub.client_status = status;
                true
            }
            None => false,
        }
    }

    /// Allocations whose id starts with `prefix`, ordered by id
    pub fn list_allocations(&self, prefix: Option<&str>) -> Vec<AllocationStub> {
        let mut allocations: Vec<AllocationStub> = self
            .allocations
            .iter()
            .filter(|entry| prefix.map_or(true, |p| entry.stub.matches_prefix(p)))
            .map(|entry| entry.stub.clone())
            .collect();
        allocations.sort_by(|a, b| a.id.cmp(&b.id));
        allocations
    }

    pub fn get_allocation(&self, alloc_id: &str) -> Option<AllocationStub> {
        self.allocations.get(alloc_id).map(|entry| entry.stub.clone())
    }

    /// Driver config for an exec target, checking that the allocation can take one
    pub fn exec_target(&self, alloc_id: &str, task: &str) -> Result<TaskConfig, ApiError> {
        let alloc = self.allocations.get(alloc_id).ok_or_else(|| {
            ApiError::new(
                ApiErrorKind::NotFound,
                format!("Unknown allocation \"{}\"", alloc_id),
            )
        })?;

        if alloc.stub.client_status != ClientStatus::Running {
            return Err(ApiError::new(
                ApiErrorKind::InvalidRequest,
                format!(
                    "Allocation \"{}\" is not running (status: {})",
                    alloc_id, alloc.stub.client_status
                ),
            ));
        }

        alloc.tasks.get(task).cloned().ok_or_else(|| {
            ApiError::new(
                ApiErrorKind::NotFound,
                format!("Task \"{}\" not found in allocation \"{}\"", task, alloc_id),
            )
        })
    }
}
