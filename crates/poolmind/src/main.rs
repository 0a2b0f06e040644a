mod cli;
mod config;

use std::io::IsTerminal;
use std::process::ExitCode;

use clap::Parser;
use owo_colors::OwoColorize;
use tracing::Level;

use nakime::{Supervisor, SupervisorError};

#[tokio::main]
async fn main() -> ExitCode {
	let cli = cli::Cli::parse();

	let config = match config::resolve(cli) {
		Ok(config) => config,
		Err(e) => return fatal(&e),
	};
	let verbosity = config.verbosity;

	let supervisor = match Supervisor::new(config) {
		Ok(supervisor) => supervisor.with_signal_handling(true),
		Err(e) => return fatal(&e),
	};

	init_tracing(verbosity);
	tracing::debug!("poolmind options: {}", supervisor.config().to_json());

	match supervisor.run().await {
		Ok(()) => ExitCode::SUCCESS,
		Err(e @ SupervisorError::Unstable { .. }) => {
			eprintln!("{} {}", "error:".red().bold(), e);
			ExitCode::from(2)
		}
		Err(e) => fatal(&e),
	}
}

fn fatal(message: &dyn std::fmt::Display) -> ExitCode {
	eprintln!("{} {}", "error:".red().bold(), message);
	ExitCode::FAILURE
}

fn init_tracing(verbosity: u8) {
	let level = match verbosity {
		0 => Level::WARN,
		1 => Level::INFO,
		2 => Level::DEBUG,
		_ => Level::TRACE,
	};
	tracing_subscriber::fmt()
		.with_max_level(level)
		.with_ansi(std::io::stdout().is_terminal())
		.init();
}
