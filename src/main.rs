use anyhow::{Context, Result};
use bagtag::console::{print_event, status_line};
use bagtag::store::export_file_name;
use bagtag::{
    BagtagConfig, BagtagEvent, DataStores, EventBus, InputMode, RunOptions, ScanApp, ScanMode,
};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "bagtag")]
#[command(about = "Baggage tag scanner for tagging and retrieving bags per flight")]
#[command(version)]
#[command(long_about = "Records baggage tag codes for a flight session and checks recovered \
bags against them. Codes are read from a camera (native zbar detection with a built-in \
fallback decoder) or from a keyboard-wedge hardware scanner.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "bagtag.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Open (or switch to) the session for a flight
    Open {
        flight: String,
        /// Flight date, YYYY-MM-DD (default today)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Close a session and delete its recorded tags
    Close {
        #[arg(long)]
        session: Option<String>,
    },
    /// Scan bags into the current session
    Tag {
        /// Read a keyboard-wedge scanner instead of the camera
        #[arg(long)]
        hardware: bool,
    },
    /// Scan recovered bags against the current session
    Retrieve {
        #[arg(long)]
        hardware: bool,
    },
    /// Enter a code by hand
    Enter {
        code: String,
        /// Check the code against the session instead of recording it
        #[arg(long)]
        retrieve: bool,
    },
    /// Undo the most recent match
    Undo,
    /// Write the session as CSV
    Export {
        #[arg(long)]
        session: Option<String>,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show the session and its counts
    Status {
        #[arg(long)]
        session: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    init_logging(&args)?;

    info!("Starting bagtag v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = match BagtagConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if args.validate_config {
        match config.validate() {
            Ok(()) => {
                info!("Configuration validation successful");
                println!("✓ Configuration is valid");
                return Ok(());
            }
            Err(e) => {
                error!("Configuration validation failed: {}", e);
                eprintln!("✗ Configuration validation failed: {}", e);
                std::process::exit(1);
            }
        }
    }
    config.validate()?;

    let stores = DataStores::open(&config.store)
        .with_context(|| format!("Failed to open data directory {}", config.store.path))?;

    let exit_code = match args.command {
        Some(Command::Open { flight, date }) => {
            let date = date.unwrap_or_else(|| chrono::Local::now().date_naive());
            let session = stores.sessions().open(&flight, date)?;
            println!("{}", status_line("session", &session.id));
            0
        }
        Some(Command::Close { session }) => {
            let session = stores.session(session.as_deref())?;
            if stores.sessions().close(&session.id)? {
                println!("{}", status_line("closed", &session.id));
                0
            } else {
                println!("Session {} was not open", session.id);
                1
            }
        }
        Some(Command::Tag { hardware }) => {
            scan(&config, &stores, Some(ScanMode::Tag), hardware).await?
        }
        Some(Command::Retrieve { hardware }) => {
            scan(&config, &stores, Some(ScanMode::Retrieve), hardware).await?
        }
        Some(Command::Enter { code, retrieve }) => {
            let mode = if retrieve {
                ScanMode::Retrieve
            } else {
                ScanMode::Tag
            };
            enter(&config, &stores, mode, &code).await?
        }
        Some(Command::Undo) => {
            let session = stores.session(None)?;
            let mut store = stores.tag_store(&session, &config)?;
            match store.undo_last_match()? {
                Some(code) => {
                    print_event(&BagtagEvent::MatchUndone { code });
                    0
                }
                None => {
                    println!("No match to undo");
                    1
                }
            }
        }
        Some(Command::Export { session, output }) => {
            let session = stores.session(session.as_deref())?;
            let store = stores.tag_store(&session, &config)?;
            let path = output.unwrap_or_else(|| PathBuf::from(export_file_name(&session)));
            std::fs::write(&path, store.export_csv())
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Exported {} records to {}", store.counts().total, path.display());
            println!("{}", status_line("exported", path.display()));
            0
        }
        Some(Command::Status { session }) => {
            let session = stores.session(session.as_deref())?;
            let counts = stores.tag_store(&session, &config)?.counts();
            println!("{}", status_line("session", &session.id));
            println!("{}", status_line("flight", &session.flight));
            println!("{}", status_line("date", &session.date));
            println!("{}", status_line("tagged", counts.total));
            println!("{}", status_line("matched", counts.matched));
            0
        }
        None => scan(&config, &stores, None, false).await?,
    };

    info!("bagtag exited with code: {}", exit_code);
    std::process::exit(exit_code);
}

/// Interactive scanning on the current session
async fn scan(
    config: &BagtagConfig,
    stores: &DataStores,
    mode: Option<ScanMode>,
    hardware: bool,
) -> Result<i32> {
    let session = stores
        .session(None)
        .context("No session open; run `bagtag open <flight>` first")?;

    let options = RunOptions {
        mode,
        input: hardware.then_some(InputMode::Hardware),
        interactive: true,
    };
    let mut app = ScanApp::new(config, stores, session, options)?;

    app.start().await.map_err(|e| {
        error!("Failed to start scanning: {}", e);
        e
    })?;

    let exit_code = app.run().await.map_err(|e| {
        error!("Error during scanning: {}", e);
        e
    })?;
    Ok(exit_code)
}

/// One typed code through the tag or retrieve path
async fn enter(
    config: &BagtagConfig,
    stores: &DataStores,
    mode: ScanMode,
    code: &str,
) -> Result<i32> {
    let session = stores
        .session(None)
        .context("No session open; run `bagtag open <flight>` first")?;

    let bus = Arc::new(EventBus::new(config.system.event_bus_capacity));
    let mut events = bus.subscribe();
    let (mut coordinator, _sources) = stores.coordinator(&session, config, bus)?;
    coordinator.enter(mode, code).await;

    let mut accepted = false;
    while let Ok(event) = events.try_recv() {
        if matches!(
            event,
            BagtagEvent::TagSaved { .. } | BagtagEvent::Matched { .. }
        ) {
            accepted = true;
        }
        print_event(&event);
    }
    Ok(if accepted { 0 } else { 1 })
}

fn init_logging(args: &Args) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("bagtag={}", log_level)));

    // stdout belongs to the scan feedback
    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .init();

    Ok(())
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# Bagtag Configuration File");
    println!("# Every option with its default value. Environment overrides use");
    println!("# BAGTAG_<SECTION>__<FIELD>, e.g. BAGTAG_SCANNER__VALIDATION=lenient");
    println!();
    println!("{}", toml::to_string_pretty(&BagtagConfig::default())?);
    Ok(())
}
