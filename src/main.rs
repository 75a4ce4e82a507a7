use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use deepfry_forwarder::config::ForwarderConfig;
use deepfry_forwarder::signing::Secp256k1Signer;
use deepfry_forwarder::status_http::StatusServer;
use deepfry_forwarder::Forwarder;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match ForwarderConfig::load() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("FATAL: {err}");
            std::process::exit(1);
        }
    };

    let signer = match Secp256k1Signer::from_config_value(&config.nostr_secret_key) {
        Ok(signer) => Arc::new(signer),
        Err(err) => {
            eprintln!("FATAL: {err}");
            std::process::exit(1);
        }
    };

    let status_bind = config.status_http_bind.clone();
    let cancel = CancellationToken::new();
    let forwarder = Arc::new(Forwarder::new(
        config,
        signer,
        Arc::new(deepfry_forwarder::clock::SystemClock),
        cancel.clone(),
    ));

    let status_server = StatusServer::with_readiness_flag(forwarder.readiness_flag());
    let status_forwarder = forwarder.clone();
    status_server.start(status_bind, move || {
        let forwarder = status_forwarder.clone();
        async move { forwarder.snapshot().await }
    });

    tokio::spawn(shutdown_signal(cancel));

    let result = forwarder.start().await;

    match result {
        Ok(()) => std::process::exit(0),
        Err(err) => {
            eprintln!("FATAL: {err}");
            std::process::exit(1);
        }
    }
}

/// Cancels the root token on SIGINT or SIGTERM.
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
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
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    cancel.cancel();
}
