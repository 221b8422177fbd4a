//! Node entry point.

use node::Node;
use node::config::Config;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

#[tokio::main]
async fn main() {
    // 1. Configuration and tracing
    let config = Config::from_env();
    node::init_tracing(&config);

    // 2. Prometheus recorder and scrape listener
    node::install_metrics(&config).expect("failed to install Prometheus recorder");

    // 3. Registry readiness, stores and routers
    let seed_orders = config.seed_orders;
    let node = Node::start(config).await.expect("failed to start node");
    node.seed_orders(seed_orders)
        .await
        .expect("failed to seed sample orders");

    // 4. Follow the log until a signal arrives
    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            cancel.cancel();
        }
    });

    if let Err(err) = node.run(&cancel).await {
        tracing::error!(error = %err, "log feed stopped");
    }

    // 5. Drain routers
    node.shutdown().await;
    tracing::info!("node shut down gracefully");
}
