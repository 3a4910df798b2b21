//! The Hiroba virtual-space server binary.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin hiroba-server
//! cargo run --bin hiroba-server -- --host 0.0.0.0 --port 8085
//! cargo run --bin hiroba-server -- --settings settings.json
//! ```

use std::path::PathBuf;

use clap::Parser;

use hiroba_server::{settings::Settings, state::AppContext, ui::run_server};
use hiroba_shared::logger::setup_logger;

#[derive(Parser, Debug)]
#[command(name = "hiroba-server")]
#[command(about = "Persistent multi-room virtual-space server", long_about = None)]
struct Args {
    /// Host address to bind the server to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Port number to bind the server to
    #[arg(short = 'p', long, default_value = "8085")]
    port: u16,

    /// Path to a JSON settings file (falls back to the HIROBA_SETTINGS
    /// environment variable)
    #[arg(short = 's', long)]
    settings: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    setup_logger(env!("CARGO_BIN_NAME"), "debug");

    let args = Args::parse();
    let settings = Settings::load(args.settings.as_deref());
    tracing::info!(
        "Starting Hiroba (version {}) with {} relay server(s)",
        settings.app_version,
        settings.relay_servers.len()
    );

    let ctx = AppContext::new(settings);

    if let Err(e) = run_server(args.host, args.port, ctx).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
