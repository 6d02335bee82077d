use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use dhab::{build_router, AppState, Config};

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("register SIGTERM");
        let mut sigint = signal(SignalKind::interrupt()).expect("register SIGINT");
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = sigint.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<(), String> {
    init_tracing();

    let config = Config::from_env();
    let bind_addr = config.bind_addr.clone();
    let state = AppState::new(config).map_err(|err| format!("failed to build state: {err}"))?;
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = bind_addr
        .parse()
        .map_err(|err| format!("invalid bind addr {bind_addr}: {err}"))?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|err| format!("bind failed: {err}"))?;

    info!("dhab-server listening on {bind_addr}");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(wait_for_shutdown_signal())
    .await
    .map_err(|err| format!("server failed: {err}"))
}
