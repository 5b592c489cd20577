//! parley entry point.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Load config
//!   3. Resolve effective log level (CLI `-v` flags > env > config)
//!   4. Init logger once
//!   5. Build the completion provider
//!   6. Build the call dispatcher (discover plugins or register commands)
//!   7. Spawn Ctrl-C → shutdown signal watcher
//!   8. Run the enabled channels until they exit or shutdown is signalled

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use parley::bootstrap::logger;
use parley::commands::{self, CommandRegistry};
use parley::config::{self, Config, DispatcherKind};
use parley::dialogue::{CallDispatcher, DialogueSettings, SessionFactory};
use parley::error::AppError;
use parley::llm::providers;
use parley::plugins::{self, HttpTransport, PluginTransport, Router};

struct CliArgs {
    log_level: Option<&'static str>,
    interactive: bool,
    config_path: Option<String>,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    let _ = dotenvy::dotenv();

    let args = parse_cli_args();

    let config = config::load(args.config_path.as_deref())?;

    let effective_log_level = args.log_level.unwrap_or(config.log_level.as_str());
    logger::init(effective_log_level, args.log_level.is_some())?;

    info!(
        bot_name = %config.bot_name,
        configured_log_level = %config.log_level,
        effective_log_level = %effective_log_level,
        interactive = %args.interactive,
        "config loaded"
    );

    let provider = providers::build(&config.llm, config.llm_api_key.clone())
        .map_err(|e| AppError::Config(e.to_string()))?;
    let dispatcher = build_dispatcher(&config).await?;
    let settings = DialogueSettings::from_config(&config.dialogue);

    info!(
        provider = %config.llm.provider,
        model = %config.llm.openai.model,
        dispatcher = ?config.dialogue.dispatcher,
        "dialogue ready"
    );

    let factory = SessionFactory::new(provider, dispatcher, settings)
        .map_err(|e| AppError::Config(format!("dialogue settings: {e}")))?;

    let shutdown = CancellationToken::new();
    let ctrlc_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, shutting down");
            ctrlc_token.cancel();
        }
    });

    let channels = parley::comms::start(&config, factory, args.interactive, shutdown.clone())?;
    let result = channels.join().await;
    shutdown.cancel();

    if args.interactive {
        use std::io::Write as _;
        println!("\nBye :) ...");
        let _ = std::io::stdout().flush();
    }

    result
}

async fn build_dispatcher(config: &Config) -> Result<CallDispatcher, AppError> {
    match config.dialogue.dispatcher {
        DispatcherKind::Plugins => {
            let transport = HttpTransport::with_timeout(std::time::Duration::from_secs(
                config.llm.openai.timeout_seconds,
            ))
            .map_err(|e| AppError::Plugin(e.to_string()))?;
            let registry = plugins::bootstrap::discover(
                &config.plugins.hosts,
                &config.plugins.tokens,
                config.plugins.auth_cache.as_deref(),
                transport.client(),
            )
            .await;
            Ok(CallDispatcher::Plugins(Router::new(
                Arc::new(registry),
                PluginTransport::Http(transport),
            )))
        }
        DispatcherKind::Booking => {
            let mut registry = CommandRegistry::new();
            commands::booking::register(&mut registry, Arc::new(commands::booking::BookingStore::new()))
                .map_err(|e| AppError::Config(e.to_string()))?;
            Ok(CallDispatcher::Commands(Arc::new(registry)))
        }
    }
}

fn parse_cli_args() -> CliArgs {
    let mut verbosity = 0u8;
    let mut interactive = false;
    let mut config_path = None;

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        if arg == "--" {
            break;
        }

        match arg.as_str() {
            "-h" | "--help" => {
                println!("Usage: parley [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -h, --help                 Print help");
                println!("  -i, --interactive          Chat on the console");
                println!("  -f, --config <PATH>        Configuration file (default: config/default.toml)");
                println!("  -v, -vv, -vvv, -vvvv       Increase logging verbosity");
                std::process::exit(0);
            }
            "-i" | "--interactive" => interactive = true,
            "-f" | "--config" => {
                if let Some(path) = iter.next() {
                    config_path = Some(path);
                } else {
                    eprintln!("error: -f/--config requires a path argument");
                    std::process::exit(1);
                }
            }
            "--verbose" => verbosity = verbosity.saturating_add(1),
            a => {
                if let Some(count) = verbosity_flag(a) {
                    verbosity = verbosity.saturating_add(count);
                }
            }
        }
    }

    CliArgs {
        log_level: logger::level_for_verbosity(verbosity),
        interactive,
        config_path,
    }
}

/// `-v`, `-vv`, ... -> number of `v`s, saturating at `u8::MAX`.
fn verbosity_flag(arg: &str) -> Option<u8> {
    let vs = arg.strip_prefix('-')?;
    if vs.is_empty() || !vs.chars().all(|c| c == 'v') {
        return None;
    }
    Some(u8::try_from(vs.len()).unwrap_or(u8::MAX))
}
