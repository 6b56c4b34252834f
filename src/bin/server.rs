// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Dispatchline server: one process serving the call webhook, the media
//! stream socket, and a health endpoint.
//!
//! Everything is constructed here once and injected; the library has no
//! globals. Configuration comes from the environment (a `.env` file is
//! honored), with defaults that run out of the box against the in-memory
//! scheduler.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{FromRef, State};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use tracing_subscriber::EnvFilter;

use dispatchline::agent::{AgentParams, VoiceAgent};
use dispatchline::booking::InMemoryScheduler;
use dispatchline::call::store::CallStore;
use dispatchline::degradation::{DegradationManager, DegradationParams};
use dispatchline::services::deepgram::DeepgramTranscriber;
use dispatchline::services::openai::{OpenAIResponder, OpenAISpeech};
use dispatchline::telephony::webhook::{voice_webhook, CallControl, VOICE_ROUTE};
use dispatchline::telephony::{BridgeExit, StreamBridge};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

struct ServerConfig {
    host: String,
    port: u16,
    business_name: String,
    /// Where transfers dial. Without it the agent can only apologize.
    transfer_number: Option<String>,
    openai_api_key: Option<String>,
    deepgram_api_key: Option<String>,
    call_ttl_secs: u64,
    sweep_interval_secs: u64,
    degrade_after: u32,
    recover_after: u32,
}

impl ServerConfig {
    fn from_env() -> Self {
        Self {
            host: env_string("HOST", "0.0.0.0"),
            port: env_parse("PORT", 8080),
            business_name: env_string("BUSINESS_NAME", "Beacon Home Services"),
            transfer_number: env_optional("TRANSFER_NUMBER"),
            openai_api_key: env_optional("OPENAI_API_KEY"),
            deepgram_api_key: env_optional("DEEPGRAM_API_KEY"),
            call_ttl_secs: env_parse("CALL_TTL_SECS", 3600),
            sweep_interval_secs: env_parse("SWEEP_INTERVAL_SECS", 60),
            degrade_after: env_parse("DEGRADE_AFTER", 3),
            recover_after: env_parse("RECOVER_AFTER", 5),
        }
    }
}

fn env_string(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct AppState {
    agent: Arc<VoiceAgent>,
    bridge: Arc<StreamBridge>,
    control: Arc<CallControl>,
}

impl FromRef<AppState> for Arc<CallControl> {
    fn from_ref(app: &AppState) -> Arc<CallControl> {
        Arc::clone(&app.control)
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn media_stream(State(app): State<AppState>, upgrade: WebSocketUpgrade) -> Response {
    upgrade.on_upgrade(move |socket| async move {
        let exit = app.bridge.serve_socket(socket).await;
        if let BridgeExit::Transfer(reason) = exit {
            tracing::info!(
                reason = reason.label(),
                "stream ended for handoff, call control takes over"
            );
        }
    })
}

async fn health(State(app): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "active_calls": app.agent.store().len(),
        "degradation": app.agent.degradation().snapshot(),
    }))
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("dispatchline=debug,info")),
        )
        .init();

    let config = ServerConfig::from_env();

    let store = Arc::new(CallStore::new(Duration::from_secs(config.call_ttl_secs)));
    let degradation = Arc::new(DegradationManager::new(DegradationParams {
        degrade_after: config.degrade_after,
        recover_after: config.recover_after,
        ..DegradationParams::default()
    }));
    let scheduler = Arc::new(InMemoryScheduler::new());

    let mut agent = VoiceAgent::new(
        Arc::clone(&store),
        Arc::clone(&degradation),
        scheduler,
    )
    .with_params(AgentParams {
        business_name: config.business_name.clone(),
        ..AgentParams::default()
    });
    match &config.openai_api_key {
        Some(key) => {
            agent = agent.with_responder(Arc::new(OpenAIResponder::new(key.clone())));
        }
        None => tracing::warn!("OPENAI_API_KEY not set, replies are scripted only"),
    }
    let agent = Arc::new(agent);

    if config.deepgram_api_key.is_none() {
        tracing::warn!("DEEPGRAM_API_KEY not set, transcription will fail and degrade the service");
    }
    if config.transfer_number.is_none() {
        tracing::warn!("TRANSFER_NUMBER not set, transfers will apologize and hang up");
    }

    let transcriber = Arc::new(DeepgramTranscriber::new(
        config.deepgram_api_key.clone().unwrap_or_default(),
    ));
    let synthesizer = Arc::new(OpenAISpeech::new(
        config.openai_api_key.clone().unwrap_or_default(),
    ));
    let bridge = Arc::new(StreamBridge::new(
        Arc::clone(&agent),
        transcriber,
        synthesizer,
    ));
    let control = Arc::new(CallControl::new(
        Arc::clone(&agent),
        config.transfer_number.clone(),
    ));

    // Idle calls (dropped transports, abandoned handoffs) age out on a timer.
    let sweep_store = Arc::clone(&store);
    let sweep_interval = Duration::from_secs(config.sweep_interval_secs.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        loop {
            ticker.tick().await;
            let removed = sweep_store.cleanup_old();
            if removed > 0 {
                tracing::info!(removed, "swept idle call state");
            }
        }
    });

    let app = Router::new()
        .route(VOICE_ROUTE, post(voice_webhook))
        .route("/ws", get(media_stream))
        .route("/health", get(health))
        .with_state(AppState {
            agent,
            bridge,
            control,
        });

    let bind_addr = format!("{}:{}", config.host, config.port);
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(addr = %bind_addr, error = %err, "failed to bind");
            return;
        }
    };
    tracing::info!(addr = %bind_addr, "dispatchline listening");

    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %err, "server error");
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        return;
    }
    tracing::info!("shutdown signal received, draining");
}
