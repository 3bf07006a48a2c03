//! `instrumentkit` command-line tool.
//!
//! Talks to a single instrument by URI, or brings up a YAML topology and
//! reports which devices answered.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use instrumentkit::generic_scpi::{GenericScpi, ScpiInstrument};
use instrumentkit::{config, Instrument, InstrumentCatalog, OpenInstrument, Settings};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "instrumentkit",
    version,
    about = "Command/response access to laboratory instruments",
    long_about = None
)]
struct Cli {
    /// Settings file (TOML); overridden by INSTRUMENTKIT_* variables
    #[arg(short, long, default_value = instrumentkit::settings::DEFAULT_SETTINGS_FILE)]
    settings: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Send a command and print the reply
    Query {
        /// Instrument URI, e.g. tcpip://192.168.0.10:5025
        uri: String,
        command: String,
        /// Line terminator, overriding the transport default
        #[arg(short, long)]
        terminator: Option<String>,
    },

    /// Send a command that has no reply
    Send {
        uri: String,
        command: String,
        #[arg(short, long)]
        terminator: Option<String>,
    },

    /// Print the `*IDN?` identification of a SCPI instrument
    Identify { uri: String },

    /// Load instruments from a YAML file and report their state
    Load {
        file: PathBuf,
        /// `/`-separated section of the file holding the instruments
        #[arg(short, long, default_value = "/")]
        path: String,
    },

    /// List the model names the loader recognises
    Models,

    /// Print the effective settings
    Settings,
}

async fn open(uri: &str, settings: &Settings, terminator: Option<&str>) -> Result<Instrument> {
    let uri = settings.apply_uri_defaults(uri)?;
    let mut inst = Instrument::open_from_uri(&uri)
        .await
        .with_context(|| format!("Failed to open instrument at {uri}"))?;
    inst.set_timeout(settings.timeout()).await?;
    if let Some(term) = terminator {
        inst.set_terminator(&unescape(term)).await?;
    }
    Ok(inst)
}

/// Allows `\r` and `\n` to be typed on the command line.
fn unescape(s: &str) -> String {
    s.replace("\\r", "\r").replace("\\n", "\n")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load_from(&cli.settings)
        .with_context(|| format!("Failed to load settings from {}", cli.settings.display()))?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log_level.as_str()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Query {
            uri,
            command,
            terminator,
        } => {
            let mut inst = open(&uri, &settings, terminator.as_deref()).await?;
            let reply = inst
                .query(&command)
                .await
                .with_context(|| format!("Query {command:?} failed"))?;
            println!("{reply}");
        }
        Commands::Send {
            uri,
            command,
            terminator,
        } => {
            let mut inst = open(&uri, &settings, terminator.as_deref()).await?;
            inst.sendcmd(&command)
                .await
                .with_context(|| format!("Sending {command:?} failed"))?;
        }
        Commands::Identify { uri } => {
            let inst = open(&uri, &settings, None).await?;
            let mut scpi = GenericScpi::open(inst).await?;
            println!("{}", scpi.name().await.context("*IDN? failed")?);
        }
        Commands::Load { file, path } => {
            let catalog = InstrumentCatalog::with_builtin();
            let loaded = config::load_instruments(&file, &path, &catalog)
                .await
                .with_context(|| format!("Failed to load {}", file.display()))?;
            info!("Loaded {} instrument(s)", loaded.len());
            let mut names: Vec<_> = loaded.keys().cloned().collect();
            names.sort();
            for name in names {
                match &loaded[&name] {
                    Some(driver) => println!("{name}: {}", driver.model()),
                    None => println!("{name}: unreachable"),
                }
            }
        }
        Commands::Models => {
            for name in InstrumentCatalog::with_builtin().names() {
                println!("{name}");
            }
        }
        Commands::Settings => {
            print!("{}", toml::to_string_pretty(&settings)?);
        }
    }
    Ok(())
}
