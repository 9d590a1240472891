//! ax-core: Core abstractions and configuration for allocx
//!
//! Shared domain types, the control-plane API messages, the error
//! taxonomy, configuration and the convergence poller used by both the
//! client and the development control plane.

pub mod api;
pub mod config;
pub mod error;
pub mod poll;
pub mod time;
pub mod traits;
pub mod types;

pub use error::{AxError, ConnectionError, ResolveError, SessionError};
pub use types::{
    AllocationStub, ClientStatus, ExecRequest, ExitReason, ExitResult, NodeStatus, NodeStub,
    MIN_PREFIX_LEN, SENTINEL_EXIT_CODE,
};
