//! Allocations to serve at startup
//!
//! Either the built-in demo set or a TOML file:
//!
//! ```toml
//! [[allocation]]
//! name = "example.web[0]"
//! group = "web"
//!
//! [allocation.tasks.web]
//! driver = "raw_exec"
//!
//! [allocation.tasks.batch]
//! driver = "mock_driver"
//! run_for = 2
//! exit_code = 21
//! stdout_string = "sample stdout output\n"
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use ax_core::ClientStatus;

use crate::driver::{MockConfig, RawExecConfig, TaskConfig};
use crate::state::Allocation;

#[derive(Debug, Deserialize)]
struct AllocationsFile {
    #[serde(default, rename = "allocation")]
    allocations: Vec<AllocationEntry>,
}

#[derive(Debug, Deserialize)]
struct AllocationEntry {
    name: String,
    /// Defaults to the name up to the first `.` or `[`
    group: Option<String>,
    /// Generated when absent
    id: Option<String>,
    #[serde(default = "running")]
    status: ClientStatus,
    tasks: BTreeMap<String, TaskConfig>,
}

fn running() -> ClientStatus {
    ClientStatus::Running
}

impl AllocationEntry {
    fn into_allocation(self) -> Allocation {
        let group = self.group.unwrap_or_else(|| {
            self.name
                .split(['.', '['])
                .next()
                .unwrap_or_default()
                .to_string()
        });
        let mut allocation = Allocation::new(self.name, group).with_status(self.status);
        if let Some(id) = self.id {
            allocation = allocation.with_id(id);
        }
        for (task, config) in self.tasks {
            allocation = allocation.with_task(task, config);
        }
        allocation
    }
}

/// Parse an allocations file
pub fn parse_allocations(content: &str) -> Result<Vec<Allocation>> {
    let file: AllocationsFile = toml::from_str(content).context("Invalid allocations file")?;
    Ok(file
        .allocations
        .into_iter()
        .map(AllocationEntry::into_allocation)
        .collect())
}

/// Load an allocations file from disk
pub fn load_allocations(path: &Path) -> Result<Vec<Allocation>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read allocations file: {:?}", path))?;
    parse_allocations(&content)
}

/// A shell to exec into and a batch job with a fixed outcome
pub fn demo_allocations() -> Vec<Allocation> {
    vec![
        Allocation::new("demo.shell[0]", "shell")
            .with_task("shell", RawExecConfig::default())
            .with_status(ClientStatus::Running),
        Allocation::new("demo.batch[0]", "batch")
            .with_task(
                "batch",
                MockConfig::new(Duration::from_secs(1), 21)
                    .with_output("sample stdout output\n", "sample stderr output\n"),
            )
            .with_status(ClientStatus::Running),
    ]
}
