use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use adclone_api::config::ServerConfig;
use adclone_api::router::build_app_router;
use adclone_api::state::AppState;
use adclone_events::FileSnapshotStore;
use adclone_pipeline::{Collaborators, LevelPlanner, PipelineConfig, SessionManager, SessionRegistry};
use adclone_provider::collaborator_api::{CollaboratorApiConfig, HttpCollaborators};
use adclone_provider::video_api::{HttpVideoProvider, VideoApiConfig};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Configuration ---
    let config = ServerConfig::from_env();

    // --- Tracing ---
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "adclone_api=debug,adclone_pipeline=debug,adclone_events=info,tower_http=debug".into()
    });
    if config.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    let pipeline_config = PipelineConfig::from_env().expect("Invalid pipeline configuration");
    tracing::info!(
        max_in_flight = pipeline_config.max_in_flight,
        poll_interval_secs = pipeline_config.poll_interval.as_secs(),
        job_deadline_secs = pipeline_config.job_deadline.as_secs(),
        state_dir = %pipeline_config.state_dir.display(),
        "Loaded pipeline configuration",
    );

    // --- Remote services ---
    let video_config = VideoApiConfig::from_env().expect("Invalid video provider configuration");
    let provider = Arc::new(
        HttpVideoProvider::new(video_config).expect("Failed to build video provider client"),
    );

    let collaborator_config =
        CollaboratorApiConfig::from_env().expect("Invalid collaborator configuration");
    tracing::info!(url = %collaborator_config.base_url, "Using collaborator services");
    let mut collaborators = Collaborators::from_shared(Arc::new(
        HttpCollaborators::new(&collaborator_config)
            .expect("Failed to build collaborator client"),
    ));
    if config.local_planner {
        tracing::info!("Planning variants locally");
        collaborators = collaborators.with_planner(Arc::new(LevelPlanner));
    }

    // --- Sessions ---
    let store = Arc::new(
        FileSnapshotStore::new(&pipeline_config.state_dir)
            .expect("Failed to create session state directory"),
    );
    let sessions = Arc::new(SessionManager::new(
        Arc::new(SessionRegistry::new()),
        store,
        collaborators,
        provider,
        pipeline_config,
    ));
    let restored = sessions
        .restore()
        .await
        .expect("Failed to restore persisted sessions");
    tracing::info!(restored, "Session manager ready");

    // --- App state ---
    let state = AppState {
        sessions: Arc::clone(&sessions),
    };

    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // Running sessions end as cancelled so their snapshots are terminal.
    tracing::info!("Server stopped accepting connections, cleaning up");
    sessions.shutdown().await;
    tracing::info!("Graceful shutdown complete");
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
