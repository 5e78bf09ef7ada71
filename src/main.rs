use tracing_subscriber::EnvFilter;

mod server;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,dex=debug")),
        )
        .init();

    println!();
    println!("╔══════════════════════════════════════════════════╗");
    println!("║   📡  DEX METRICS DEMO                           ║");
    println!("╚══════════════════════════════════════════════════╝");
    println!();

    // ── 1. Load config (DEX_API_KEY, DEX_HOST, ...) ──────────────
    let config = dex::DexConfig::from_env().expect("Invalid DEX config (is DEX_API_KEY set?)");

    // ── 2. Start the metrics pipeline ────────────────────────────
    let dex = dex::Dex::start(config).expect("Failed to start DEX pipeline");
    tracing::info!(hostname = dex.hostname(), "reporting as");

    // ── 3. Build Axum router ─────────────────────────────────────
    let app = server::create_router(&dex);

    // ── 4. Bind & serve ──────────────────────────────────────────
    let addr = "0.0.0.0:9091";
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to port 9091 — is it already in use?");

    println!("Server listening on http://localhost:9091");
    println!();

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .expect("Server exited with error");

    // ── 5. Flush whatever is still queued ────────────────────────
    dex.shutdown().await;
}
