//! weir - the hosting binary.
//!
//! `weir serve <app>` loads an application directory and serves its APIs;
//! `weir run <app> <process> [args...]` runs one process and prints the
//! result. Exit code 0 on clean shutdown, non-zero on startup failure.

mod app;
mod server;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use weir_process::Context as ProcessContext;

#[derive(Parser)]
#[command(name = "weir", version, about = "Script-hosting application runtime")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve an application directory over HTTP
    Serve {
        /// Application directory
        #[arg(default_value = ".")]
        app: PathBuf,
        /// Listen address, overriding app.json
        #[arg(long)]
        listen: Option<String>,
    },
    /// Run a single process and print its result as JSON
    Run {
        /// Application directory
        app: PathBuf,
        /// Process name, e.g. scripts.u.Hello
        process: String,
        /// JSON arguments (plain strings pass through)
        args: Vec<String>,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    match Cli::parse().command {
        Command::Serve { app, listen } => {
            let mut loaded = match app::load(&app) {
                Ok(loaded) => loaded,
                Err(e) => {
                    eprintln!("weir: startup failed: {e:#}");
                    return ExitCode::from(1);
                }
            };
            if let Some(listen) = listen {
                loaded.listen = listen;
            }

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build();
            let runtime = match runtime {
                Ok(runtime) => runtime,
                Err(e) => {
                    eprintln!("weir: runtime failed: {e}");
                    return ExitCode::from(1);
                }
            };

            match runtime.block_on(server::serve(loaded)) {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    eprintln!("weir: server failed: {e:#}");
                    ExitCode::from(1)
                }
            }
        }
        Command::Run { app, process, args } => {
            let loaded = match app::load(&app) {
                Ok(loaded) => loaded,
                Err(e) => {
                    eprintln!("weir: startup failed: {e:#}");
                    return ExitCode::from(1);
                }
            };

            let args: Vec<serde_json::Value> = args
                .iter()
                .map(|raw| {
                    serde_json::from_str(raw)
                        .unwrap_or_else(|_| serde_json::Value::String(raw.clone()))
                })
                .collect();

            match weir_process::run(&process, args, ProcessContext::default()) {
                Ok(result) => {
                    println!("{}", serde_json::to_string_pretty(&result).unwrap_or_default());
                    loaded.runtime.shutdown();
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("weir: {e}");
                    loaded.runtime.shutdown();
                    ExitCode::from(1)
                }
            }
        }
    }
}
