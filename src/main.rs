// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Outpost — self-hosted network video recorder
//!
//! Usage:
//!   outpost serve  --config config.toml
//!   outpost status --config config.toml

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use outpost::api;
use outpost::auth::TokenSigner;
use outpost::config::Config;
use outpost::manager::NvrManager;
use outpost::retention::SysinfoProbe;
use outpost::router::HttpRouterClient;
use outpost::store::Db;

#[derive(Parser)]
#[command(name = "outpost", about = "Self-hosted network video recorder", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the recorder and its HTTP control plane.
    Serve {
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
    },
    /// Print a brief status snapshot and exit.
    Status {
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve { config } => run_serve(config).await,
        Command::Status { config } => {
            if let Err(e) = run_status(config).await {
                eprintln!("Error: {e:#}");
                std::process::exit(1);
            }
        }
    }
}

fn load_config(path: &PathBuf) -> Config {
    match Config::from_file(path) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "Failed to load config");
            std::process::exit(1);
        }
    }
}

async fn run_serve(config_path: PathBuf) {
    let cfg = load_config(&config_path);

    info!(
        storage_root = ?cfg.storage.root,
        segment_secs = cfg.storage.segment_secs,
        router_config = ?cfg.router.config_path,
        "Starting NVR"
    );

    let db = match Db::open(&cfg.database.path).await {
        Ok(db) => db,
        Err(e) => {
            error!(error = %e, "Database unavailable");
            std::process::exit(1);
        }
    };

    let router = Arc::new(HttpRouterClient::new(&cfg.router.control_url));
    let manager = match NvrManager::start(
        db.clone(),
        cfg.clone(),
        router.clone(),
        Arc::new(SysinfoProbe),
        None,
    )
    .await
    {
        Ok(m) => m,
        Err(e) => {
            error!(error = %e, "Failed to start manager");
            std::process::exit(1);
        }
    };

    let confsync = manager.confsync();
    let creds = manager.creds();
    let recorder = manager.recorder();
    let manager = Arc::new(parking_lot::Mutex::new(manager));

    if cfg.api.enabled {
        let state = Arc::new(api::AppState {
            db: db.clone(),
            config: cfg.clone(),
            signer: TokenSigner::new(
                &cfg.auth.jwt_secret,
                cfg.auth.access_ttl_secs,
                cfg.auth.refresh_ttl_secs,
            ),
            manager: manager.clone(),
            confsync,
            creds,
            router,
            recorder,
            started: std::time::Instant::now(),
        });
        let port = cfg.api.port;
        tokio::spawn(async move {
            api::start_server(state, port).await;
        });
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received CTRL+C, shutting down…"),
        Err(e) => error!(error = %e, "Signal error"),
    }
    manager.lock().shutdown();
}

async fn run_status(config_path: PathBuf) -> anyhow::Result<()> {
    let cfg = Config::from_file(&config_path).context("load config")?;
    let db = Db::open(&cfg.database.path).await.context("open database")?;

    let cameras = db.all_cameras().await?;
    println!("=== NVR Status ===");
    println!("Storage root : {}", cfg.storage.root.display());
    println!("Cameras      : {}", cameras.len());
    for cam in &cameras {
        let segments = db.segments_for_camera(&cam.id).await?.len();
        println!(
            "  {} ({}) path={} mode={} continuous={} — {} segments",
            cam.id, cam.name, cam.path, cam.detection_mode, cam.continuous_recording, segments
        );
    }
    Ok(())
}
