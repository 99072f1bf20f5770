use std::process::ExitCode;

use tracing::{error, info};

use filevault::{BlobStorage, Config, Database, VaultStore, WebServer};

#[tokio::main]
async fn main() -> ExitCode {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    // Load configuration
    let mut config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load {config_path}: {e}");
            eprintln!("Using default configuration.");
            Config::default()
        }
    };
    config.apply_env_overrides();

    // Initialize logging
    if let Err(e) = filevault::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        // Fall back to console-only logging
        filevault::logging::init_console_only(&config.logging.level);
    }

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return ExitCode::FAILURE;
    }

    info!("FileVault {}", env!("CARGO_PKG_VERSION"));

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Fatal error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> filevault::Result<()> {
    let db = Database::open(&config.database.path).await?;
    info!("Database opened at {}", config.database.path);

    let storage = BlobStorage::new(&config.storage.path)?;
    info!("Blob storage at {}", config.storage.path);

    let vault = VaultStore::new(db, storage, config.crypto.kdf_params())
        .with_io_timeout(config.storage.io_timeout())
        .with_max_upload_bytes(config.storage.max_upload_bytes());

    // Unfinished uploads and orphaned blobs from a previous run
    vault.recover().await?;

    let server = WebServer::new(&config.web, &config.share, vault)?;
    server.run().await?;

    info!("Server stopped");
    Ok(())
}
