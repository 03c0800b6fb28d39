pub mod api;
pub mod application;
pub mod domain;
pub mod infrastructure;

use std::sync::Arc;

use api::rest::router::{create_router, AppState};
use application::services::config::MfaConfig;
use application::services::events::MfaEventBus;
use application::services::lockout::LockoutGuard;
use application::services::session_gate::SessionGate;
use application::services::sync::SyncCoordinator;
use application::services::vault::SecretVault;
use axum::http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderValue, Method};
use infrastructure::data::memory::MemoryStore;
use infrastructure::data::port::PersistencePort;
use infrastructure::data::surreal::SurrealStore;
use infrastructure::security::encryption::SecretCipher;
use infrastructure::telemetry::init_telemetry;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    init_telemetry();

    let config = Arc::new(MfaConfig::from_env());

    let cipher = match config.encryption_key.as_deref() {
        Some(key) => match SecretCipher::from_base64(key) {
            Ok(cipher) => Arc::new(cipher),
            Err(err) => {
                eprintln!("MFA_ENCRYPTION_KEY is invalid: {err}");
                std::process::exit(1);
            }
        },
        None => {
            eprintln!("MFA_ENCRYPTION_KEY is not set");
            std::process::exit(1);
        }
    };

    let port: Arc<dyn PersistencePort> = match env_or("MFAGATE_STORE", "surreal").as_str() {
        "memory" => {
            info!("using in-memory persistence");
            Arc::new(MemoryStore::new())
        }
        _ => {
            let store = SurrealStore::connect(
                &env_or("MFAGATE_DB_ADDRESS", "127.0.0.1:8000"),
                &env_or("MFAGATE_DB_NAMESPACE", "mfagate"),
                &env_or("MFAGATE_DB_DATABASE", "mfagate"),
                &env_or("MFAGATE_DB_USERNAME", "root"),
                &env_or("MFAGATE_DB_PASSWORD", "root"),
                Arc::clone(&cipher),
            )
            .await;
            match store {
                Ok(store) => Arc::new(store),
                Err(err) => {
                    eprintln!("failed to connect to SurrealDB: {err}");
                    std::process::exit(1);
                }
            }
        }
    };

    let events = MfaEventBus::default();
    let sync = Arc::new(SyncCoordinator::new(
        Arc::clone(&port),
        config.sync.clone(),
        events.clone(),
    ));
    let vault = Arc::new(SecretVault::new(
        Arc::clone(&cipher),
        Arc::clone(&sync),
        config.totp.clone(),
        config.backup_code_count,
        config.backup_code_length,
    ));
    let lockout = Arc::new(LockoutGuard::new(
        config.lockout.clone(),
        Arc::clone(&sync),
        Arc::clone(&port),
    ));
    let gate = Arc::new(SessionGate::new(
        config.session.clone(),
        config.totp.clone(),
        Arc::clone(&vault),
        lockout,
        Arc::clone(&sync),
        Arc::clone(&port),
        events,
    ));

    let _drain = sync.spawn_drain();
    let _sweeper = gate.spawn_sweeper();

    let cors = CorsLayer::new()
        .allow_origin(
            env_or("MFAGATE_CORS_ORIGIN", "http://localhost:10002")
                .parse::<HeaderValue>()
                .unwrap(),
        )
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_credentials(true)
        .allow_headers([AUTHORIZATION, ACCEPT, CONTENT_TYPE]);

    let state = AppState {
        gate,
        vault,
        sync,
        config,
    };
    let app = create_router(state).layer(cors);

    let bind = env_or("MFAGATE_BIND", "0.0.0.0:10002");
    info!(%bind, "MFA gate listening");

    let listener = tokio::net::TcpListener::bind(&bind).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
