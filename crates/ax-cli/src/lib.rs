//! allocx: exec into running allocations
//!
//! Library half of the `allocx` binary: the control-plane client, the
//! exec session pipeline and the command implementations.

pub mod api;
pub mod commands;
pub mod exec;
pub mod output;
