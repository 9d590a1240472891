//! CLI command implementations

mod complete;
mod config;
mod exec;
mod serve;

pub use complete::complete_allocations;
pub use config::{config_init, config_path, config_show};
pub use exec::{check_args, exec_command, ExecArgs};
pub use serve::serve_command;
