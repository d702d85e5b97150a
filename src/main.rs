//! Cross-exchange spread arbitrage bot entry point.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use teloxide::Bot;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use spread_arb_bot::api::{create_router, AppState};
use spread_arb_bot::bot::{format, telegram, BotService, BotState};
use spread_arb_bot::config::Config;
use spread_arb_bot::metrics;
use spread_arb_bot::security::CredentialCipher;

/// Telegram-driven cross-exchange spot arbitrage bot.
#[derive(Parser, Debug)]
#[command(name = "spread-arb-bot")]
#[command(about = "Finds and executes spot price spreads between crypto exchanges")]
#[command(version)]
struct Args {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the Telegram bot (default).
    Run {
        /// HTTP server port for health/metrics; overrides PORT.
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Check configuration validity.
    CheckConfig,

    /// Print a fresh credential encryption key.
    GenerateKey,

    /// Scan configured pairs once with the stored exchanges and print the report.
    Scan,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("spread_arb_bot=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let json = Config::load().map(|c| c.json_logs()).unwrap_or(false);
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }

    match args.command {
        Some(Command::CheckConfig) => cmd_check_config(),
        Some(Command::GenerateKey) => cmd_generate_key(),
        Some(Command::Scan) => cmd_scan().await,
        Some(Command::Run { port }) => cmd_run(port).await,
        None => cmd_run(None).await,
    }
}

fn load_config(offline: bool) -> anyhow::Result<Config> {
    let config = Config::load().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;
    let checked = if offline {
        config.validate_offline()
    } else {
        config.validate()
    };
    if let Err(e) = checked {
        error!("Invalid configuration: {}", e);
        return Err(anyhow::anyhow!("Configuration validation failed: {}", e));
    }
    Ok(config)
}

/// Check configuration validity.
fn cmd_check_config() -> anyhow::Result<()> {
    println!("======================================================================");
    println!("SPREAD ARB BOT - CONFIGURATION CHECK");
    println!("======================================================================");

    print!("Loading configuration... ");
    let config = match Config::load() {
        Ok(c) => {
            println!("OK");
            c
        }
        Err(e) => {
            println!("FAILED");
            println!("  Error: {}", e);
            return Err(anyhow::anyhow!("Configuration load failed"));
        }
    };

    print!("Validating configuration... ");
    match config.validate() {
        Ok(()) => println!("OK"),
        Err(e) => {
            println!("FAILED");
            println!("  Error: {}", e);
            return Err(anyhow::anyhow!("Configuration validation failed"));
        }
    }

    println!("----------------------------------------------------------------------");
    println!("Configuration Summary:");
    println!("  Data Dir: {}", config.data_dir.display());
    match config.authorized_chat_id {
        Some(id) => println!("  Authorized Chat: {}", id),
        None => println!("  WARNING: AUTHORIZED_CHAT_ID not set, any chat may trade"),
    }
    println!("  Fee Cache TTL: {}h", config.fee_cache_ttl_hours);
    println!("  Default Fee: {}%", config.default_fee_percent);
    println!("  Quantity Decimals: {}", config.quantity_decimals);
    println!("  Testnet: {}", config.exchange_testnet);
    println!(
        "  HTTP API: {}",
        if config.api_enabled {
            format!("port {}", config.port)
        } else {
            "disabled".to_string()
        }
    );
    println!("======================================================================");
    println!("CONFIGURATION CHECK PASSED");
    println!("======================================================================");

    Ok(())
}

/// Print a new Fernet key for ENCRYPTION_KEY.
fn cmd_generate_key() -> anyhow::Result<()> {
    println!("{}", CredentialCipher::generate_key());
    Ok(())
}

/// One scan with the stored exchanges, printed to stdout.
async fn cmd_scan() -> anyhow::Result<()> {
    let config = load_config(true)?;
    metrics::init_metrics();

    let mut state = BotState::open(&config).await?;
    for (exchange, reason) in state.reconnect_stored().await {
        println!("{}: {}", exchange, reason);
    }

    println!("======================================================================");
    println!("SPREAD ARB BOT - SCAN");
    println!("======================================================================");
    match state.run_scan().await {
        Ok(report) => print!("{}", format::scan(&report)),
        Err(e) => {
            println!("{}", e.user_message());
            return Err(e.into());
        }
    }
    println!("======================================================================");
    Ok(())
}

/// Run the Telegram bot.
async fn cmd_run(port_override: Option<u16>) -> anyhow::Result<()> {
    info!("Loading configuration...");
    let mut config = load_config(false)?;
    if let Some(port) = port_override {
        config.port = port;
    }

    let mut app_state = AppState::new();
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => app_state = app_state.with_metrics(handle),
        Err(e) => warn!("Prometheus recorder not installed: {}", e),
    }
    metrics::init_metrics();

    if config.api_enabled {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
        let listener = TcpListener::bind(addr).await?;
        info!("HTTP server listening on {}", addr);

        let router = create_router(app_state.clone());
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown_signal())
                .await
            {
                error!("HTTP server error: {}", e);
            }
        });
    }

    let service = Arc::new(
        BotService::bootstrap(&config)
            .await?
            .with_app_state(app_state.clone()),
    );
    service.publish_status().await;

    info!("========================================");
    info!("SPREAD ARB BOT STARTED");
    info!("========================================");
    info!("Data dir: {}", config.data_dir.display());
    info!("Testnet: {}", config.exchange_testnet);
    if config.authorized_chat_id.is_none() {
        warn!("AUTHORIZED_CHAT_ID not set; every chat may issue commands");
    }
    info!("========================================");

    app_state.set_ready(true);
    let bot = Bot::new(config.telegram_bot_token.clone());
    telegram::run(bot, service).await;
    app_state.set_ready(false);

    info!("Bot stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => error!("Failed to listen for SIGTERM: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
