use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::config::Settings;
use crate::daemon;

const DEFAULT_CONFIG_PATH: &str = "/etc/pgwatch-sentinel/pgwatch-sentinel.json";

#[derive(Parser)]
#[command(name = "pgwatch-sentinel", version, about = "Supervises primary/replica PostgreSQL clusters")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file path.
    #[arg(short = 'c', global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: String,

    /// Run in the foreground and log to stdout instead of daemonizing.
    #[arg(short = 'x', global = true)]
    pub foreground: bool,
}

#[derive(Subcommand)]
pub enum Command {
    Start,
    Stop,
    Status,
    Reload,
}

/// Parses arguments and dispatches to the matching verb, returning the
/// process exit code (0 on clean operation; 1 per the documented failure
/// modes).
pub fn run() -> i32 {
    let cli = Cli::parse();

    let settings = match Settings::load(&cli.config) {
        Ok(s) => s,
        Err(err) => {
            eprintln!("could not load configuration {}: {err}", cli.config);
            return 1;
        }
    };

    match cli.command {
        Command::Start => run_start(settings, cli.foreground),
        Command::Stop => run_stop(&settings),
        Command::Status => run_status(&settings),
        Command::Reload => run_reload(),
    }
}

fn init_tracing(settings: &Settings, foreground: bool) {
    let filter = EnvFilter::new(match settings.log_level.as_str() {
        "debug" => "debug",
        "info" => "info",
        _ => "error",
    });

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if foreground {
        subscriber.init();
    } else {
        match std::fs::OpenOptions::new().create(true).append(true).open(&settings.log_file) {
            Ok(file) => subscriber.with_writer(std::sync::Mutex::new(file)).init(),
            Err(err) => {
                eprintln!("could not open log file {}: {err}", settings.log_file);
                subscriber.init();
            }
        }
    }
}

fn run_start(settings: Settings, foreground: bool) -> i32 {
    if !foreground {
        // Safety: nothing else has spawned threads yet at this point in `main`.
        if let Err(err) = unsafe { daemon::daemonize(&settings.pid_file, &settings.daemon_user) } {
            eprintln!("could not daemonize: {err}");
            return 1;
        }
    }

    init_tracing(&settings, foreground);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(err) => {
            eprintln!("could not start async runtime: {err}");
            return 1;
        }
    };

    match runtime.block_on(daemon::run(settings)) {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("fatal error: {err}");
            1
        }
    }
}

fn run_stop(settings: &Settings) -> i32 {
    match daemon::stop(&settings.pid_file) {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("{err}");
            1
        }
    }
}

fn run_status(settings: &Settings) -> i32 {
    match std::fs::read_to_string(&settings.status_file) {
        Ok(contents) => {
            println!("{contents}");
            0
        }
        Err(err) => {
            eprintln!("could not read status file {}: {err}", settings.status_file);
            1
        }
    }
}

fn run_reload() -> i32 {
    eprintln!("Not implemented");
    1
}
