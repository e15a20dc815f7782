use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use hearst_server::{build_router, load_or_create_server_key, AppState};
use hearst_store::Store;
use hearst_stream::{Bus, EventStream};

#[derive(Parser, Debug)]
#[command(name = "hearst-server", about = "Multi-tenant message-passing server")]
struct Args {
    /// HTTP listen address.
    #[arg(long, default_value = "127.0.0.1:4632")]
    listen: String,

    /// Directory holding the database and the server session key.
    #[arg(long, default_value = "./hearst-state")]
    state_dir: PathBuf,

    /// Domain stamped on threads created by this server.
    #[arg(long, default_value = "localhost")]
    domain: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hearst=info".into()),
        )
        .init();

    let args = Args::parse();

    std::fs::create_dir_all(&args.state_dir)?;
    let server_key = load_or_create_server_key(&args.state_dir)?;
    let store = Store::open(&args.state_dir.join("hearst.db"))?;
    let stream = EventStream::new(Bus::new());
    let state = AppState::new(store, stream, server_key, args.domain);

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&args.listen).await?;
    info!(listen = %args.listen, "hearst started");

    axum::serve(listener, app).await?;
    Ok(())
}
