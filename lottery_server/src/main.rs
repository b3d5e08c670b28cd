//! Lottery session server.
//!
//! Serves registration, login, refresh-token rotation, logout and device
//! management over HTTP, backed by PostgreSQL or an in-memory store.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Error};
use lottery::{
    auth::{Argon2Hasher, CredentialHasher},
    clock::SystemClock,
    db::{Database, MemoryAuthRepository, PgAuthRepository},
};
use lottery_server::{
    api::{self, AppState},
    config::ServerConfig,
    logging, metrics,
};
use pico_args::Arguments;
use tracing::{info, warn};

const HELP: &str = "\
Run the lottery session server

USAGE:
  lottery_server [OPTIONS]

OPTIONS:
  --bind       IP:PORT     Server socket bind address  [default: env SERVER_BIND or 127.0.0.1:8080]
  --db-url     URL         Database connection string  [default: env DATABASE_URL]

FLAGS:
  --in-memory              Keep accounts and sessions in process memory
  -h, --help               Print help information

ENVIRONMENT:
  SERVER_BIND              Server bind address (e.g., 0.0.0.0:8080)
  DATABASE_URL             PostgreSQL connection string
  JWT_SECRET               JWT signing secret (at least 32 characters)
  PASSWORD_PEPPER          Password hashing pepper (at least 16 characters)
  ACCESS_TOKEN_MINUTES     Access token lifetime              [default: 15]
  REFRESH_TOKEN_DAYS       Refresh token lifetime             [default: 7]
  MAX_DEVICES_PER_ACCOUNT  Devices an account may hold        [default: 5]
  METRICS_BIND             Prometheus listener, off when unset
  (See .env.example for all configuration options)
";

struct Args {
    bind: Option<SocketAddr>,
    database_url: Option<String>,
    in_memory: bool,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    // Load .env file if it exists
    let _ = dotenvy::dotenv();

    let mut pargs = Arguments::from_env();

    // Help has a higher priority and should be handled separately.
    if pargs.contains(["-h", "--help"]) {
        print!("{HELP}");
        std::process::exit(0);
    }

    let args = Args {
        bind: pargs.opt_value_from_str("--bind")?,
        database_url: pargs.opt_value_from_str("--db-url")?,
        in_memory: pargs.contains("--in-memory"),
    };

    logging::init();

    let config = ServerConfig::from_env(args.bind, args.database_url)?;
    config.validate()?;

    if let Some(addr) = config.metrics_bind {
        metrics::init_metrics(addr).map_err(Error::msg)?;
        info!("Prometheus metrics listening on {addr}");
    }

    let hasher: Arc<dyn CredentialHasher> =
        Arc::new(Argon2Hasher::new(config.security.password_pepper.clone()));
    let clock = Arc::new(SystemClock);

    let state = if args.in_memory {
        warn!("Using the in-memory store; accounts and sessions are lost on exit");
        AppState::new(
            Arc::new(MemoryAuthRepository::new()),
            hasher,
            &config.security.jwt_secret,
            config.session.clone(),
            clock,
            config.security.cookie_secure,
        )?
    } else {
        info!("Connecting to database");
        let db = Database::new(&config.database)
            .await
            .context("Failed to connect to database")?;
        db.migrate().await.context("Failed to apply migrations")?;
        info!("Database connected and migrated");

        AppState::new(
            Arc::new(PgAuthRepository::new(db.pool().clone())),
            hasher,
            &config.security.jwt_secret,
            config.session.clone(),
            clock,
            config.security.cookie_secure,
        )?
    };

    if !config.security.cookie_secure {
        warn!("Refresh cookie is not marked Secure; enable COOKIE_SECURE outside development");
    }

    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind))?;

    info!(
        "Server is running at http://{}. Press Ctrl+C to stop.",
        config.bind
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    info!("Shutting down server...");

    Ok(())
}

/// Graceful shutdown signal
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {e}");
    }
}
