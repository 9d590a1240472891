//! allocx CLI
//!
//! Single binary for:
//! - `exec`: run a command inside a running allocation
//! - `complete`: shell completion for allocation ids
//! - `serve`: the development control plane
//! - `config`: manage the config file

use std::path::PathBuf;
use std::time::Duration;

use clap::{error::ErrorKind, Args, CommandFactory, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use allocx::commands::{self, ExecArgs};
use allocx::exec::terminal::parse_escape_char;
use allocx::output::{format_allocations, print_error, print_warning};
use ax_core::api::ADDRESS_ENV;
use ax_core::config::ConfigFile;
use ax_core::{AxError, ExitReason, ResolveError, SessionError, SENTINEL_EXIT_CODE};

#[derive(Parser)]
#[command(name = "allocx")]
#[command(author, version, about = "Exec into running allocations")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a command in a running allocation
    Exec(ExecCmd),

    /// Print completions
    Complete {
        #[command(subcommand)]
        target: CompleteTarget,
    },

    /// Run the development control plane
    Serve {
        /// Bind address (overrides config)
        #[arg(short, long)]
        bind: Option<String>,
        /// TOML file of allocations to serve instead of the demo set
        #[arg(short, long)]
        allocations: Option<PathBuf>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Args)]
struct ExecCmd {
    /// Task to exec into; required when the allocation runs several
    #[arg(long)]
    task: Option<String>,

    /// Control-plane address
    #[arg(long, env = ADDRESS_ENV)]
    address: Option<String>,

    /// Forward local stdin to the command
    #[arg(short, long, default_value_t = true, action = clap::ArgAction::Set)]
    interactive: bool,

    /// Allocate a pseudo-terminal; defaults to whether stdin is a terminal
    #[arg(short, long, action = clap::ArgAction::Set)]
    tty: Option<bool>,

    /// Escape character for detaching, or "none"
    #[arg(short, long)]
    escape: Option<String>,

    /// Wait up to SECS for the allocation to be running
    #[arg(long, value_name = "SECS")]
    wait: Option<u64>,

    /// Allocation id or unique prefix (at least two characters)
    alloc: String,

    /// Command and arguments
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

#[derive(Subcommand)]
enum CompleteTarget {
    /// Allocation ids starting with PREFIX
    Alloc {
        #[arg(default_value = "")]
        prefix: String,
        /// Control-plane address
        #[arg(long, env = ADDRESS_ENV)]
        address: Option<String>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective configuration
    Show,
    /// Show config file path
    Path,
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => SENTINEL_EXIT_CODE,
            };
            std::process::exit(code);
        }
    };

    // Setup logging based on verbosity
    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            print_error(&format!("{:#}", e));
            SENTINEL_EXIT_CODE
        }
    };

    // Exit directly: a stdin read may still be parked on a blocking thread
    std::process::exit(code);
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Exec(cmd) => {
            let config = ConfigFile::load_or_default(config_path)?;
            Ok(exec(cmd, config).await)
        }

        Commands::Complete { target } => match target {
            CompleteTarget::Alloc { prefix, address } => {
                let config = ConfigFile::load_or_default(config_path)?
                    .client
                    .with_address_override(address.as_deref());
                commands::complete_allocations(&config, &prefix).await;
                Ok(0)
            }
        },

        Commands::Serve { bind, allocations } => {
            let config = ConfigFile::load_or_default(config_path)?;
            commands::serve_command(config.server, bind, allocations).await?;
            Ok(0)
        }

        Commands::Config { action } => {
            match action {
                ConfigAction::Show => commands::config_show(config_path)?,
                ConfigAction::Path => commands::config_path(config_path),
                ConfigAction::Init { force } => commands::config_init(config_path, force)?,
            }
            Ok(0)
        }
    }
}

/// Run `exec` and turn every outcome into an exit code
async fn exec(cmd: ExecCmd, config: ConfigFile) -> i32 {
    let escape = match cmd.escape.as_deref().map(parse_escape_char).transpose() {
        Ok(escape) => escape,
        Err(message) => {
            print_error(&message);
            print_exec_usage();
            return SENTINEL_EXIT_CODE;
        }
    };

    let args = ExecArgs {
        alloc: cmd.alloc,
        command: cmd.command,
        task: cmd.task,
        address: cmd.address,
        interactive: cmd.interactive,
        tty: cmd.tty.unwrap_or_else(stdin_is_terminal),
        escape,
        wait: cmd.wait.map(Duration::from_secs),
    };

    match commands::exec_command(args, config.client).await {
        Ok(result) => {
            if let Some(message) = &result.message {
                match result.reason {
                    ExitReason::UserCancelled => print_warning(message),
                    _ => print_error(message),
                }
            }
            result.code
        }
        Err(e) => {
            report_exec_error(&e);
            SENTINEL_EXIT_CODE
        }
    }
}

fn report_exec_error(error: &AxError) {
    print_error(&error.to_string());
    match error {
        AxError::Session(SessionError::MissingCommand) => print_exec_usage(),
        AxError::Resolve(ResolveError::Ambiguous { candidates, .. }) => {
            eprintln!("{}", format_allocations(candidates, true));
        }
        _ => {}
    }
}

fn print_exec_usage() {
    let mut cli = Cli::command();
    cli.build();
    if let Some(exec) = cli.find_subcommand_mut("exec") {
        eprintln!("{}", exec.render_usage());
    }
}

fn stdin_is_terminal() -> bool {
    use std::io::IsTerminal;
    std::io::stdin().is_terminal()
}
