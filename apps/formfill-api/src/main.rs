//! Form-fill API server
//!
//! Provides REST endpoints for:
//! - Uploading PDF templates and serving them back for rendering
//! - Drawing, moving and deleting bounding boxes per page
//! - Grouping boxes into named fields
//! - Exporting filled documents as PDF or DOCX

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod api;
mod db;
mod error;
mod models;
mod state;
#[cfg(test)]
mod tests;

use state::{AppState, Config};

/// Command-line arguments for the form-fill server
#[derive(Parser, Debug)]
#[command(name = "formfill-api")]
#[command(about = "Form template authoring and filling server")]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value = "3000")]
    port: u16,

    /// Host address to bind to
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Directory for uploaded templates and the default database
    #[arg(long, env = "FORMFILL_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Database URL (defaults to a SQLite file in the data directory)
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// LibreOffice binary used for DOCX export
    #[arg(long, default_value = "soffice")]
    soffice: PathBuf,

    /// Delete templates older than this many days at startup
    #[arg(long)]
    retention_days: Option<i64>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn config(&self) -> Config {
        let mut config = Config::new(self.data_dir.clone(), self.database_url.clone());
        config.soffice = self.soffice.clone();
        config.retention_days = self.retention_days;
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Initialize application state
    info!("Initializing form-fill API...");
    let config = args.config();
    let state = Arc::new(AppState::new(&config).await?);

    // CORS configuration for web clients
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = api::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("Server listening on http://{}", addr);
    info!("Data directory: {}", config.data_dir.display());

    axum::serve(listener, app).await?;

    Ok(())
}
