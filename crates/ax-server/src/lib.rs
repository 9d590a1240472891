//! ax-server: Development control plane for allocx
//!
//! Serves the allocation and node listings over newline-delimited JSON
//! and runs exec sessions against in-process task drivers. `allocx
//! serve` runs it standalone; the integration tests run it in-process.

pub mod driver;
pub mod seed;
pub mod server;
pub mod session;
pub mod state;

pub use driver::{MockConfig, RawExecConfig, TaskConfig};
pub use server::Server;
pub use state::{Allocation, ServerState};
