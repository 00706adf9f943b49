//! Binary entrypoint for the ftngate CLI.
//!
//! Commands:
//! - `import` - unpack inbound bundles and packets into the BBS's `LOCAL.NET`
//! - `export` - turn the BBS's outbound queue into packets, bundles and flow entries
//!
//! See the library crate docs for module-level details: `ftngate::`.
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info};

use ftngate::archiver::ArchiverTable;
use ftngate::config::Config;
use ftngate::lock::RunLock;
use ftngate::pipeline::Pipeline;

#[derive(Parser)]
#[command(name = "ftngate")]
#[command(about = "FidoNet Technology Network gateway for a local BBS")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Network to process; defaults to the first configured network
    #[arg(short, long, global = true)]
    net: Option<String>,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Import inbound FTN bundles and packets
    Import,
    /// Export the local outbound queue to FTN bundles
    Export,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        eprintln!("ftngate: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(&cli.config).await?;
    init_logging(&config, cli.verbose);

    let net = config.network(cli.net.as_deref())?;
    // The network directory belongs to the BBS; nothing is created before the lock is held.
    let net_dir = net.dir_path();
    let _lock = RunLock::acquire(&net_dir, Duration::from_secs(net.lock_timeout_secs))
        .with_context(|| format!("locking network directory {}", net_dir.display()))?;
    info!("ftngate {} processing network {}", env!("CARGO_PKG_VERSION"), net.name);

    let archiver = Box::new(ArchiverTable::new(config.archivers.clone()));
    let mut pipeline = Pipeline::new(&config, Some(&net.name), archiver)?;
    match cli.command {
        Commands::Import => {
            pipeline.run_import()?;
        }
        Commands::Export => {
            pipeline.run_export()?;
        }
    }
    Ok(())
}

fn parse_level(level: &str) -> log::LevelFilter {
    match level.to_ascii_lowercase().as_str() {
        "off" => log::LevelFilter::Off,
        "error" => log::LevelFilter::Error,
        "warn" | "warning" => log::LevelFilter::Warn,
        "debug" => log::LevelFilter::Debug,
        "trace" => log::LevelFilter::Trace,
        _ => log::LevelFilter::Info,
    }
}

fn init_logging(config: &Config, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides config
    let base_level = match verbosity {
        0 => parse_level(&config.logging.level),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let log_file = config.logging.file.as_ref().and_then(|file| {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(file)
            .ok()
    });
    if let Some(f) = log_file {
        let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
        // Echo to the console only when someone is watching.
        let is_tty = atty::is(atty::Stream::Stdout);
        builder.format(move |fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            let line = format!("{} [{}] {}", ts, record.level(), record.args());
            if let Ok(mut guard) = write_mutex.lock() {
                let _ = writeln!(guard, "{}", line);
            }
            if is_tty {
                writeln!(fmt, "{}", line)
            } else {
                Ok(())
            }
        });
    } else {
        builder.format(|fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
        });
    }
    let _ = builder.try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_subcommands_and_global_flags() {
        let cli = Cli::try_parse_from(["ftngate", "export", "-n", "fsxnet", "-vv"]).unwrap();
        assert!(matches!(cli.command, Commands::Export));
        assert_eq!(cli.net.as_deref(), Some("fsxnet"));
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.config, "config.toml");
        assert!(Cli::try_parse_from(["ftngate"]).is_err());
        assert!(Cli::try_parse_from(["ftngate", "tosser"]).is_err());
    }

    #[test]
    fn level_names_map_to_filters() {
        assert_eq!(parse_level("WARN"), log::LevelFilter::Warn);
        assert_eq!(parse_level("bogus"), log::LevelFilter::Info);
    }
}
