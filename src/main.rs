//! paylink - Pairing-Code Payment Relay
//!
//! Entry point. Architecture:
//!
//! ```text
//! ┌──────────┐    ┌──────────┐    ┌───────────┐    ┌──────────┐
//! │  Gateway │───▶│  Relay   │───▶│ Settlement│───▶│  Store   │
//! │  (axum)  │    │ (events) │    │ (pending) │    │(Postgres)│
//! └──────────┘    └──────────┘    └───────────┘    └──────────┘
//! ```
//!
//! The chat glue posts translated events to the gateway; the relay
//! drives the pairing, invoice and withdrawal flows; settlement credits
//! the ledger exactly once.

use std::sync::Arc;
use std::time::Duration;

use paylink::config::AppConfig;
use paylink::relay::RelayService;
use paylink::store::RelayStore;

/// How often the expiry sweeper runs when a TTL is configured.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

/// Get port override from command line (--port argument)
fn get_port_override() -> Option<u16> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if args[i] == "--port" && i + 1 < args.len() {
            return args[i + 1].parse().ok();
        }
    }
    None
}

#[tokio::main]
async fn main() {
    let env = get_env();
    let app_config = AppConfig::load(&env);
    let _log_guard = paylink::logging::init_logging(&app_config);

    tracing::info!(
        "Starting paylink relay {} ({}) in {} mode",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env
    );

    // Durable store: Postgres when configured, otherwise the in-memory
    // store for mock runs.
    let store: Arc<dyn RelayStore> = match app_config.postgres_url.as_deref() {
        Some(url) => {
            let store = match paylink::store::PgStore::connect(url).await {
                Ok(s) => s,
                Err(e) => {
                    eprintln!("FATAL: Failed to connect to PostgreSQL: {}", e);
                    std::process::exit(1);
                }
            };
            if let Err(e) = store.init_schema().await {
                eprintln!("FATAL: Failed to initialize schema: {}", e);
                std::process::exit(1);
            }
            Arc::new(store)
        }
        None => {
            #[cfg(not(feature = "mock-api"))]
            {
                eprintln!("FATAL: postgres_url is required without the mock-api feature");
                std::process::exit(1)
            }
            #[cfg(feature = "mock-api")]
            {
                println!("[Store] No postgres_url configured, using in-memory store");
                Arc::new(paylink::store::MemoryStore::new())
            }
        }
    };

    // [SECURITY] The mock transport/provider log instead of talking to a
    // real platform. Production builds compile without `mock-api` and
    // wire real adapters through the ChatTransport/PaymentProvider traits.
    #[cfg(feature = "mock-api")]
    let relay = Arc::new(RelayService::new(
        app_config.relay.clone(),
        store,
        Arc::new(paylink::transport::RecordingTransport::new()),
        Arc::new(paylink::provider::MockProvider::new()),
    ));
    #[cfg(not(feature = "mock-api"))]
    let relay: Arc<RelayService> = {
        let _ = store;
        eprintln!("FATAL: no chat transport/payment provider adapter compiled in");
        std::process::exit(1)
    };

    // Expiry sweeper, only when a TTL is configured.
    if app_config.relay.session_ttl().is_some() || app_config.relay.pending_ttl().is_some() {
        let sweeper = relay.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                sweeper.sweep_expired();
            }
        });
        println!("[Sweeper] Expiry sweeper started");
    }

    let port = get_port_override().unwrap_or(app_config.gateway.port);
    println!("Gateway will listen on {}:{}", app_config.gateway.host, port);

    paylink::gateway::run_server(&app_config.gateway.host, port, relay).await;
}
