mod config;
mod demos;
mod runner;

use std::{
    path::PathBuf,
    process::ExitCode,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use able_vm::RuntimeError;
use clap::{Parser, Subcommand};
use colored::*;
use log::{warn, LevelFilter};

#[derive(Parser)]
#[command(name = "able")]
#[command(about = "Able language runtime: cooperative procs, futures, channels and mutexes")]
#[command(version)]
struct Cli {
    /// Log level (off, error, warn, info, debug, trace); overrides RUST_LOG
    #[arg(long, global = true)]
    log_level: Option<LevelFilter>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the built-in demo programs
    List {
        /// Print the list as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run a built-in demo program
    Run {
        /// Demo name, see `able list`
        demo: String,

        /// Evaluation steps per resumption before preemption (0 disables)
        #[arg(long)]
        time_slice: Option<usize>,

        /// Maximum callbacks run by a flush without an explicit limit
        #[arg(long)]
        flush_limit: Option<usize>,

        /// Config file (defaults to <config_dir>/able/config.json)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Print the interpreter state after a successful run
        #[arg(long)]
        dump_state: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut logger =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if let Some(level) = cli.log_level {
        logger.filter_level(level);
    }
    logger.init();

    match cli.command {
        Commands::List { json } => list_demos(json),
        Commands::Run {
            demo,
            time_slice,
            flush_limit,
            config,
            dump_state,
        } => {
            let overrides = config::Overrides {
                time_slice,
                flush_limit,
            };
            run(&demo, overrides, config, dump_state)
        }
    }
}

fn list_demos(json: bool) -> ExitCode {
    let demos = demos::catalog();
    let infos = demos::describe(&demos);
    if json {
        return match serde_json::to_string_pretty(&infos) {
            Ok(text) => {
                println!("{text}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{} {e}", "error:".red().bold());
                ExitCode::FAILURE
            }
        };
    }
    for info in infos {
        println!("{:<12} {}", info.name.cyan().bold(), info.description.dimmed());
    }
    ExitCode::SUCCESS
}

fn run(
    name: &str,
    overrides: config::Overrides,
    config_path: Option<PathBuf>,
    dump_state: bool,
) -> ExitCode {
    let demos = demos::catalog();
    let Some(demo) = demos.get(name) else {
        eprintln!("{} unknown demo '{}'", "error:".red().bold(), name);
        eprintln!("{}", "Run `able list` to see the available demos".dimmed());
        return ExitCode::FAILURE;
    };

    let config = match config::load_config(config_path.as_deref()) {
        Ok(config) => overrides.apply(config),
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            return ExitCode::FAILURE;
        }
    };

    let interrupted = Arc::new(AtomicBool::new(false));
    let handler_interrupted = interrupted.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!(
            "{}",
            "Ctrl+C received, attempting to interrupt execution...".yellow()
        );
        handler_interrupted.store(true, Ordering::SeqCst);
    }) {
        warn!("failed to install Ctrl-C handler: {e}");
    }

    match runner::run_demo(name, demo, config, interrupted, dump_state) {
        Ok(_) => ExitCode::SUCCESS,
        Err(RuntimeError::Exit(code)) => ExitCode::from(code.clamp(0, 255) as u8),
        Err(_) => ExitCode::FAILURE,
    }
}
