//! Axum gateway: entry point for Solace. Builds the process-wide state
//! (registry, scaffold cache, memory writer, vendor singletons) once at
//! startup, then serves the bidirectional voice transport on `/ws`.

mod ws;

use axum::routing::get;
use axum::{Json, Router};
use solace_core::{
    spawn_memory_writer, InMemoryStore, MemoryStore, MemoryWriterHandle, ScaffoldCache,
    SessionRegistry, SolaceConfig,
};
use solace_session::adapters::{
    HttpLlm, HttpStt, HttpTts, LanguageModel, ScriptedLlm, ScriptedStt, ScriptedTts, SpeechToText,
    TextToSpeech, VoiceConfig,
};
use solace_session::SessionDeps;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

/// Process-wide state shared by every connection. Built once at startup;
/// nothing here is lazily initialized on the hot path.
#[derive(Clone)]
pub struct AppState {
    config: Arc<SolaceConfig>,
    registry: Arc<SessionRegistry>,
    cache: Arc<ScaffoldCache>,
    store: Arc<dyn MemoryStore>,
    writer: MemoryWriterHandle,
    stt: Arc<dyn SpeechToText>,
    llm: Arc<dyn LanguageModel>,
    tts: Arc<dyn TextToSpeech>,
}

impl AppState {
    pub fn session_deps(&self) -> SessionDeps {
        SessionDeps {
            config: self.config.clone(),
            registry: self.registry.clone(),
            cache: self.cache.clone(),
            store: self.store.clone(),
            writer: self.writer.clone(),
            stt: self.stt.clone(),
            llm: self.llm.clone(),
            tts: self.tts.clone(),
            voice: VoiceConfig::default(),
        }
    }
}

/// Pick vendor adapters from the environment, falling back to scripted
/// stand-ins so the gateway still runs end-to-end without keys.
fn build_adapters() -> (
    Arc<dyn SpeechToText>,
    Arc<dyn LanguageModel>,
    Arc<dyn TextToSpeech>,
) {
    let stt: Arc<dyn SpeechToText> = match HttpStt::from_env() {
        Ok(s) => {
            info!(target: "solace::gateway", "STT: http ({})", s.base_url);
            Arc::new(s)
        }
        Err(_) => {
            warn!(target: "solace::gateway", "STT: scripted stand-in (set STT_API_KEY for real transcription)");
            Arc::new(ScriptedStt::new(
                vec!["..."],
                vec!["I could not hear you, the speech vendor is not configured."],
            ))
        }
    };
    let llm: Arc<dyn LanguageModel> = match HttpLlm::from_env() {
        Ok(l) => {
            info!(target: "solace::gateway", "LLM: http ({}, {})", l.base_url, l.model);
            Arc::new(l)
        }
        Err(_) => {
            warn!(target: "solace::gateway", "LLM: scripted stand-in (set LLM_API_KEY for real replies)");
            Arc::new(ScriptedLlm::new(vec![
                "I'm running without a language model right now.",
            ]))
        }
    };
    let tts: Arc<dyn TextToSpeech> = match HttpTts::from_env() {
        Ok(t) => {
            info!(target: "solace::gateway", "TTS: http ({})", t.base_url);
            Arc::new(t)
        }
        Err(_) => {
            warn!(target: "solace::gateway", "TTS: scripted stand-in (set TTS_API_KEY for real audio)");
            Arc::new(ScriptedTts::new(1))
        }
    };
    (stt, llm, tts)
}

async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "message": "Solace backend is running. Connect to /ws for conversation."
    }))
}

async fn health(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "sessions": state.registry.stats(),
        "cached_scaffolds": state.cache.len(),
        "memory_writer": state.writer.stats(),
    }))
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,solace=debug".into()),
        )
        .init();

    let config = Arc::new(match SolaceConfig::load() {
        Ok(c) => c,
        Err(e) => {
            warn!(target: "solace::gateway", "config load failed ({e}), using defaults");
            SolaceConfig::default()
        }
    });

    let registry = Arc::new(SessionRegistry::new());
    let cache = Arc::new(ScaffoldCache::new(&config));
    let store: Arc<dyn MemoryStore> = Arc::new(InMemoryStore::new());
    let (writer, writer_task) = spawn_memory_writer(store.clone(), &config);
    let (stt, llm, tts) = build_adapters();

    let state = AppState {
        config: config.clone(),
        registry,
        cache,
        store,
        writer,
        stt,
        llm,
        tts,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/ws", get(ws::ws_handler))
        .layer(cors)
        .with_state(state.clone());

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
    info!(target: "solace::gateway", "listening on {addr}");
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(target: "solace::gateway", "bind failed on {addr}: {e}");
            return;
        }
    };

    let server = axum::serve(listener, app);
    tokio::select! {
        result = server => {
            if let Err(e) = result {
                tracing::error!(target: "solace::gateway", "server error: {e}");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!(target: "solace::gateway", "shutdown signal received");
        }
    }

    // Drain queued memory operations before exit. Live sessions hold
    // writer handles, so give the drain a bounded window.
    drop(state);
    if tokio::time::timeout(std::time::Duration::from_secs(5), writer_task)
        .await
        .is_err()
    {
        warn!(target: "solace::gateway", "memory writer still draining at shutdown deadline");
    } else {
        info!(target: "solace::gateway", "memory writer drained");
    }
}
