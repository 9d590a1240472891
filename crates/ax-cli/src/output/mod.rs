//! Output formatting utilities for the CLI
//!
//! Tables for allocation listings and colored status lines. Status lines
//! go to stderr (except success and info) so they never mix with the
//! remote command's stdout.

use tabled::{settings::Style, Table, Tabled};

use ax_core::types::short_id;
use ax_core::{AllocationStub, NodeStub};

/// Format allocations as a table
///
/// Used for ambiguous prefixes and the `serve` startup listing. Ids are
/// shown in full when `full_ids` is set so they can be copied.
pub fn format_allocations(allocations: &[AllocationStub], full_ids: bool) -> String {
    if allocations.is_empty() {
        return "No allocations".to_string();
    }

    #[derive(Tabled)]
    struct AllocationRow {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "NAME")]
        name: String,
        #[tabled(rename = "TASKS")]
        tasks: String,
        #[tabled(rename = "STATUS")]
        status: String,
    }

    let rows: Vec<AllocationRow> = allocations
        .iter()
        .map(|a| AllocationRow {
            id: if full_ids {
                a.id.clone()
            } else {
                short_id(&a.id).to_string()
            },
            name: a.name.clone(),
            tasks: a.tasks.join(", "),
            status: a.client_status.to_string(),
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// One-line node summary
pub fn format_node(node: &NodeStub) -> String {
    format!(
        "{} ({}) {} drivers: {}",
        node.name,
        short_id(&node.id),
        node.status,
        node.drivers.join(", ")
    )
}

/// Print a success message in green with a checkmark prefix
pub fn print_success(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Green),
        Print("✓ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an error message in red with an X prefix
///
/// Outputs to stderr.
pub fn print_error(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Red),
        Print("✗ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a warning message in yellow
pub fn print_warning(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Yellow),
        Print("⚠ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an informational message in cyan
pub fn print_info(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Cyan),
        Print("ℹ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}
