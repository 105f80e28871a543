use crate::config::ServerConfig;
use crate::echo::{echo_handler, hello_handler};
use crate::error::ConfigError;
use crate::modules::ModuleRegistry;
use crate::server::{Server, ServerBuilder, StopHandle};
use crate::static_files::StaticFiles;
use crate::telemetry::{init_logging, LogConfig};
use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::SystemTime;
use tracing::info;

/// Command-line interface for parley
#[derive(Debug, Parser)]
#[command(name = "parley")]
#[command(about = "Single-process HTTP application server", long_about = None)]
#[command(version)]
pub struct Cli {
    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the server until SIGINT or SIGTERM
    Serve(ServeArgs),
    /// Load and validate a configuration file without binding anything
    CheckConfig {
        /// Path to the TOML configuration file
        #[arg(short, long)]
        config: PathBuf,
    },
}

/// Built-in handler the binary serves with
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum HandlerKind {
    /// Return the request as JSON
    Echo,
    /// Return an HTML greeting
    Hello,
    /// Serve files below `--root`
    Static,
}

/// Options for `serve`; each one overrides the file and environment
#[derive(Debug, Args)]
pub struct ServeArgs {
    /// TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Listen address (host:port)
    #[arg(long)]
    pub addr: Option<String>,

    /// Authentication scheme: anonymous, basic, negotiate or ntlm
    #[arg(long)]
    pub auth: Option<String>,

    /// Worker pool capacity
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Run handlers under the connecting identity
    #[arg(long, default_value_t = false)]
    pub impersonate: bool,

    /// Leave request bodies unread
    #[arg(long, default_value_t = false)]
    pub skip_body_read: bool,

    /// Module to preload (repeatable)
    #[arg(long = "preload", value_name = "NAME")]
    pub preload: Vec<String>,

    /// Which built-in handler serves requests
    #[arg(long, value_enum, default_value_t = HandlerKind::Echo)]
    pub handler: HandlerKind,

    /// Root directory for the static handler
    #[arg(long, default_value = ".")]
    pub root: PathBuf,
}

impl ServeArgs {
    /// Layer these flags over `config`; flags left unset keep its values.
    pub fn apply(&self, config: &mut ServerConfig) -> Result<(), ConfigError> {
        if let Some(addr) = &self.addr {
            config.addr = addr.clone();
        }
        if let Some(auth) = &self.auth {
            config.auth = auth.parse()?;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if self.impersonate {
            config.impersonate = true;
        }
        if self.skip_body_read {
            config.skip_body_read = true;
        }
        for name in &self.preload {
            if !config.preload.contains(name) {
                config.preload.push(name.clone());
            }
        }
        Ok(())
    }
}

/// Defaults, then the optional file, then `PARLEY_*` variables.
pub fn load_config(path: Option<&PathBuf>) -> Result<ServerConfig, ConfigError> {
    let mut config = match path {
        Some(path) => ServerConfig::from_file(path)?,
        None => ServerConfig::default(),
    };
    config.apply_env()?;
    Ok(config)
}

/// Modules the binary can preload by name
pub fn builtin_modules() -> ModuleRegistry {
    let mut registry = ModuleRegistry::new();
    registry
        .register_value("version", env!("CARGO_PKG_VERSION").to_string())
        .register("started_at", SystemTime::now);
    registry
}

/// Parse the process arguments and run the chosen command.
pub fn run_cli() -> anyhow::Result<()> {
    run(Cli::parse())
}

pub fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Serve(args) => serve(&args),
        Commands::CheckConfig { config } => {
            let loaded = load_config(Some(&config))?;
            loaded.validate()?;
            println!(
                "{}: ok (addr {}, auth {}, {} workers, impersonate {}, skip body read {})",
                config.display(),
                loaded.addr,
                loaded.auth,
                loaded.workers,
                loaded.impersonate,
                loaded.skip_body_read
            );
            Ok(())
        }
    }
}

fn serve(args: &ServeArgs) -> anyhow::Result<()> {
    let _logging = init_logging(&LogConfig::from_env())?;

    let mut config = load_config(args.config.as_ref())?;
    args.apply(&mut config)?;

    let builder = ServerBuilder::new(config).modules(builtin_modules());
    let builder = match args.handler {
        HandlerKind::Echo => builder.handler(echo_handler),
        HandlerKind::Hello => builder.handler(hello_handler),
        HandlerKind::Static => builder.handler(StaticFiles::new(args.root.clone())),
    };
    let server: Server = builder.build().context("failed to start server")?;
    info!(addr = ?server.local_addr(), handler = ?args.handler, "parley listening");

    install_signal_handler(server.stop_handle())?;
    server.run()?;
    Ok(())
}

#[cfg(unix)]
fn install_signal_handler(stop: StopHandle) -> anyhow::Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM]).context("failed to register signals")?;
    std::thread::Builder::new()
        .name("parley-signals".to_string())
        .spawn(move || {
            if let Some(signal) = signals.forever().next() {
                info!(signal, "Shutdown signal received, stopping listener");
                stop.stop();
            }
        })
        .context("failed to spawn signal thread")?;
    Ok(())
}

#[cfg(not(unix))]
fn install_signal_handler(_stop: StopHandle) -> anyhow::Result<()> {
    Ok(())
}
