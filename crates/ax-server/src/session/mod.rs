//! Exec session bookkeeping and frame pumping

mod exec;
mod registry;

pub use exec::ExecSession;
pub use registry::{SessionGuard, SessionInfo, SessionLimitExceeded, SessionRegistry};
