//! Inference Gateway - priority-queued streaming proxy in front of Ollama.

use std::env;

use tokio::net::TcpListener;

use inference_gateway::{logging, routes, BootError, Config, Gateway};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<(), BootError> {
    // Handle --version / -V
    if env::args().any(|a| a == "--version" || a == "-V") {
        println!("inference-gateway {}", VERSION);
        return Ok(());
    }

    let config = Config::load()?;
    logging::init(&config.log_level);

    tracing::info!("Starting inference gateway {}", VERSION);
    tracing::info!("Proxying to backend at {}", config.ollama_base_url);

    let gateway = Gateway::start(config.clone())?;
    let app = routes::router(gateway.clone());

    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| BootError::Bind {
            addr: addr.clone(),
            source,
        })?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(BootError::Serve)?;

    gateway.shutdown().await;
    tracing::info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, draining");
}
