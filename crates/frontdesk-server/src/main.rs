//! Frontdesk server binary — the entry point for the voice receptionist.
//!
//! Starts an axum HTTP server with structured logging, database
//! initialization, the background session sweep, and graceful shutdown on
//! SIGTERM/SIGINT.

use frontdesk_connect::{HttpCalendar, HttpCrm, TwilioSms, WebhookAlerts};
use frontdesk_idempotency::EffectExecutor;
use frontdesk_relay::{MediaRelay, RealtimeSettings};
use frontdesk_server::{app, background, load_config, AppState};
use frontdesk_session::SessionStore;
use frontdesk_tools::Dispatcher;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("FRONTDESK_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    // Load configuration
    let config = load_config(selected_config_path)
        .expect("failed to load configuration — the server cannot start without valid config");

    // Initialize tracing
    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        environment = %config.environment,
        "resolved startup configuration path"
    );

    // Initialize database
    let pool = frontdesk_db::create_pool(
        &config.database.path,
        frontdesk_db::DbRuntimeSettings {
            busy_timeout_ms: config.database.busy_timeout_ms,
            pool_max_size: config.database.pool_max_size,
        },
    )
    .expect("failed to create database pool — check database.path in config");

    {
        let conn = pool
            .get()
            .expect("failed to get database connection for migrations");
        let applied =
            frontdesk_db::run_migrations(&conn).expect("failed to run database migrations");
        if applied > 0 {
            tracing::info!(count = applied, "applied database migrations");
        }
    }

    // Idempotent side-effect executor; refuses bypass in production.
    let executor =
        EffectExecutor::with_bypass(pool, config.idempotency.bypass, &config.environment)
            .expect("idempotency bypass is not allowed in production");

    // Outbound collaborator clients share one HTTP client.
    let http = reqwest::Client::new();
    let sessions = SessionStore::new();
    let alerts = Arc::new(WebhookAlerts::new(http.clone(), &config.alerts.webhook_url));
    let dispatcher = Dispatcher::new(
        sessions.clone(),
        executor,
        Arc::new(HttpCrm::new(
            http.clone(),
            &config.crm.base_url,
            &config.crm.token,
        )),
        Arc::new(HttpCalendar::new(
            http.clone(),
            &config.calendar.base_url,
            &config.calendar.token,
            &config.calendar.calendar_id,
        )),
        Arc::new(TwilioSms::new(
            http,
            &config.sms.account_sid,
            &config.sms.auth_token,
            &config.sms.from,
        )),
        alerts.clone(),
    );

    let relay = MediaRelay::new(
        sessions.clone(),
        dispatcher.clone(),
        RealtimeSettings {
            api_key: config.openai.api_key.clone(),
            model: config.openai.model.clone(),
            voice: config.openai.voice.clone(),
            instructions: config.openai.instructions.clone(),
        },
        alerts,
    );

    if config.openai.api_key.is_empty() {
        tracing::warn!("openai.api_key is not set; incoming calls will be rejected");
    }

    // Background session expiry sweep
    tokio::spawn(background::start_session_sweep(
        sessions.clone(),
        config.session.ttl_secs,
    ));

    // Build application
    let addr = SocketAddr::new(config.server.host, config.server.port);
    let app = app(AppState {
        config,
        sessions,
        dispatcher,
        relay,
    });

    tracing::info!(%addr, "starting frontdesk server");

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address — is another process using this port?");

    // Serve with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    tracing::info!("frontdesk server shut down");
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
