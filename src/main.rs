// Parimutuel prediction-market ledger - main entry point

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use parimutuel_ledger::{build_router, AppState, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!("🎲 Parimutuel prediction-market ledger starting");

    let config = Config::from_env().context("invalid configuration")?;
    config.log_status();
    let addr = config.bind_addr;

    let state = AppState::from_config(config)
        .context("failed to open ledger store")?
        .shared();

    // Clone the store for the shutdown flush before the state moves into the router
    let shutdown_store = state.store.clone();
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    tracing::info!("🚀 Server running on http://{}", addr);
    tracing::info!("📋 Endpoints:");
    tracing::info!("   POST /users/bootstrap        - Get or create user from auth identity");
    tracing::info!("   GET  /markets                - List open markets");
    tracing::info!("   POST /markets                - Create market");
    tracing::info!("   GET  /markets/:id            - Market details with bets");
    tracing::info!("   POST /markets/:id/resolve    - Resolve market and pay winners");
    tracing::info!("   POST /bets                   - Place bet");
    tracing::info!("   POST /deposits               - Start deposit");
    tracing::info!("   POST /deposits/:id/confirm   - Confirm deposit by tx signature");
    tracing::info!("   POST /withdrawals            - Withdraw to wallet");
    tracing::info!("   GET  /ledger                 - Ledger activity and chain check");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("💾 Flushing ledger store...");
    shutdown_store.flush().context("failed to flush store")?;
    tracing::info!("👋 Goodbye!");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("❌ Failed to install CTRL+C handler: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("🛑 Shutdown signal received...");
}
