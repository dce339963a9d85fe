#![deny(clippy::all, warnings)]

use std::path::PathBuf;

use atty::Stream;
use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use pytui_core::{Catalogue, CommandStatus, ExecutionOutcome};
use serde_json::json;

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = PytuiCli::parse();
    init_tracing(cli.trace, cli.verbose);

    let outcome = dispatch(&cli.command).map_err(|err| eyre!("{err:?}"))?;
    let code = emit_output(&cli, &outcome)?;

    if code == 0 {
        Ok(())
    } else {
        std::process::exit(code);
    }
}

#[derive(Parser)]
#[command(
    name = "pytui",
    version,
    about = "Manage Python runtimes and virtual environments"
)]
struct PytuiCli {
    /// Emit machine-readable JSON instead of plain text
    #[arg(long, global = true)]
    json: bool,

    /// Suppress non-essential output
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Increase log verbosity (-v, -vv)
    #[arg(long, short, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Enable trace-level logging
    #[arg(long, global = true)]
    trace: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: PytuiCommand,
}

#[derive(Subcommand)]
enum PytuiCommand {
    /// List installed Python runtimes
    List {
        /// Skip probing unmanaged interpreters for their real version
        #[arg(long)]
        no_probe: bool,
    },
    /// List runtimes available to download
    Downloads {
        /// Include every patch release, not just the latest per series
        #[arg(long)]
        all_versions: bool,
        /// Only show one provider's downloads (by organisation name)
        #[arg(long)]
        provider: Option<String>,
    },
    /// Install a downloadable runtime by provider key
    Install { key: String },
    /// Uninstall a provider-managed runtime by key
    Uninstall { key: String },
    /// Report the shell that activation would use
    ShellInfo,
    /// Open an interactive shell with a venv activated
    Shell {
        /// Venv folder (defaults to ./.venv)
        path: Option<PathBuf>,
    },
    /// Start a Python REPL, optionally inside a venv
    Repl {
        /// Venv folder; the system interpreter is used when omitted
        path: Option<PathBuf>,
    },
    /// Manage virtual environments
    #[command(subcommand)]
    Venv(VenvCommand),
}

#[derive(Subcommand)]
enum VenvCommand {
    /// List venvs reachable from a directory
    List {
        /// Directory to search (defaults to the working directory)
        base_dir: Option<PathBuf>,
        /// Recurse into subdirectories
        #[arg(long, short)]
        recursive: bool,
        /// Also check parent directories for a project venv
        #[arg(long)]
        search_parents: bool,
    },
    /// Create a venv
    Create {
        path: PathBuf,
        /// Base interpreter (defaults to python3 on PATH)
        #[arg(long)]
        python: Option<PathBuf>,
        /// Skip installing pip into the new venv
        #[arg(long)]
        without_pip: bool,
        /// Upgrade the bootstrapped pip to the latest release
        #[arg(long)]
        latest_pip: bool,
    },
    /// Delete a venv
    Delete { path: PathBuf },
    /// List packages installed in a venv
    Packages { path: PathBuf },
    /// Install a requirements file into a venv
    Install {
        path: PathBuf,
        /// Requirements file to install
        #[arg(long, short)]
        requirements: PathBuf,
        /// Pass --no-deps to pip
        #[arg(long)]
        no_deps: bool,
    },
}

fn dispatch(command: &PytuiCommand) -> anyhow::Result<ExecutionOutcome> {
    match command {
        PytuiCommand::List { no_probe } => {
            let catalogue = Catalogue::with_default_providers();
            pytui_core::runtime_list(
                &catalogue,
                &pytui_core::RuntimeListRequest {
                    query_executables: !no_probe,
                },
            )
        }
        PytuiCommand::Downloads {
            all_versions,
            provider,
        } => {
            let catalogue = Catalogue::with_default_providers();
            pytui_core::download_list(
                &catalogue,
                &pytui_core::DownloadListRequest {
                    all_versions: *all_versions,
                    provider: provider.clone(),
                },
            )
        }
        PytuiCommand::Install { key } => {
            let catalogue = Catalogue::with_default_providers();
            pytui_core::runtime_install(
                &catalogue,
                &pytui_core::RuntimeInstallRequest { key: key.clone() },
            )
        }
        PytuiCommand::Uninstall { key } => {
            let catalogue = Catalogue::with_default_providers();
            pytui_core::runtime_uninstall(
                &catalogue,
                &pytui_core::RuntimeUninstallRequest { key: key.clone() },
            )
        }
        PytuiCommand::ShellInfo => pytui_core::shell_info(&pytui_core::ShellInfoRequest),
        PytuiCommand::Shell { path } => pytui_core::venv_shell(&pytui_core::VenvShellRequest {
            path: path.clone().unwrap_or_else(|| PathBuf::from(".venv")),
        }),
        PytuiCommand::Repl { path } => {
            pytui_core::repl(&pytui_core::ReplRequest { path: path.clone() })
        }
        PytuiCommand::Venv(venv) => dispatch_venv(venv),
    }
}

fn dispatch_venv(command: &VenvCommand) -> anyhow::Result<ExecutionOutcome> {
    match command {
        VenvCommand::List {
            base_dir,
            recursive,
            search_parents,
        } => pytui_core::venv_list(&pytui_core::VenvListRequest {
            base_dir: base_dir.clone(),
            recursive: *recursive,
            search_parents: *search_parents,
        }),
        VenvCommand::Create {
            path,
            python,
            without_pip,
            latest_pip,
        } => pytui_core::venv_create(&pytui_core::VenvCreateRequest {
            path: path.clone(),
            python: python.clone(),
            include_pip: !without_pip,
            latest_pip: *latest_pip,
        }),
        VenvCommand::Delete { path } => {
            pytui_core::venv_delete(&pytui_core::VenvDeleteRequest { path: path.clone() })
        }
        VenvCommand::Packages { path } => {
            pytui_core::venv_packages(&pytui_core::VenvPackagesRequest { path: path.clone() })
        }
        VenvCommand::Install {
            path,
            requirements,
            no_deps,
        } => pytui_core::requirements_install(&pytui_core::RequirementsInstallRequest {
            path: path.clone(),
            requirements: requirements.clone(),
            no_deps: *no_deps,
        }),
    }
}

fn init_tracing(trace: bool, verbose: u8) {
    let level = if trace {
        "trace"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = format!("pytui={level},pytui_core={level},pytui_cli={level}");
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn emit_output(cli: &PytuiCli, outcome: &ExecutionOutcome) -> Result<i32> {
    let code = match outcome.status {
        CommandStatus::Ok => 0,
        CommandStatus::UserError => 1,
        CommandStatus::Failure => 2,
    };

    if cli.json {
        let payload = json!({
            "status": outcome.status,
            "message": outcome.message,
            "details": outcome.details,
            "exit_code": code,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else if !cli.quiet {
        let colorize = !cli.no_color && atty::is(Stream::Stdout);
        println!("{}", styled_message(&outcome.status, &outcome.message, colorize));
    }

    Ok(code)
}

fn styled_message(status: &CommandStatus, message: &str, colorize: bool) -> String {
    if !colorize {
        return message.to_string();
    }
    match status {
        CommandStatus::Ok => message.to_string(),
        CommandStatus::UserError => format!("\x1b[33m{message}\x1b[0m"),
        CommandStatus::Failure => format!("\x1b[31m{message}\x1b[0m"),
    }
}
