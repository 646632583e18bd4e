mod logging;
mod server;

use std::process::ExitCode;
use std::sync::Arc;

use kubetrail::sanitize::redact_repo_url;
use kubetrail::{
    AuditConfig, AuditContext, AuditError, AuditScheduler, ClusterError, ConfigError, EventProcessor,
    EventQueue, KubeClusterClient,
};

use logging::LogFormat;
use server::AppState;

const DEFAULT_PORT: u16 = 8080;

#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Audit(#[from] AuditError),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error("Failed to start {what}: {source}")]
    Spawn {
        what: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Admission listener failed: {0}")]
    Server(#[source] std::io::Error),
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn listen_port() -> Result<u16, ConfigError> {
    match std::env::var("PORT") {
        Ok(value) if !value.trim().is_empty() => {
            value.trim().parse().map_err(|e: std::num::ParseIntError| ConfigError::InvalidValue {
                name: "PORT".to_string(),
                value,
                reason: e.to_string(),
            })
        }
        _ => Ok(DEFAULT_PORT),
    }
}

fn main() -> ExitCode {
    let format = LogFormat::parse(&env_or("LOG_FORMAT", "text"));
    if let Err(e) = logging::init_logging(&env_or("LOG_LEVEL", "info"), format) {
        eprintln!("Failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), StartupError> {
    log::info!("Starting kubetrail-webhook v{}", env!("CARGO_PKG_VERSION"));

    let config = AuditConfig::from_env()?;
    let port = listen_port()?;

    log::info!("Storage path: {}", config.storage_path.display());
    log::info!("Helm tracking: {}", config.helm_tracking);
    log::info!(
        "Excluded namespaces: {}",
        config.excluded_namespaces.iter().cloned().collect::<Vec<_>>().join(", ")
    );
    if config.git.has_remote() {
        log::info!(
            "Git remote: {} (branch {})",
            redact_repo_url(&config.git.remote_url),
            config.git.branch
        );
    } else {
        log::info!("No Git remote configured, commits stay local");
    }

    // Git network calls and the cluster client drive their own runtimes, so
    // everything up to the listener runs outside Tokio.
    let cluster = Arc::new(KubeClusterClient::connect()?);
    let context = Arc::new(AuditContext::from_config(config, cluster));
    context.bootstrap()?;

    let queue = Arc::new(EventQueue::new());
    queue.start(EventProcessor::new(Arc::clone(&context)));

    let scheduler = AuditScheduler::new(Arc::clone(&context));
    scheduler
        .start()
        .map_err(|source| StartupError::Spawn { what: "scheduler", source })?;

    let served = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|source| StartupError::Spawn { what: "HTTP runtime", source })
        .and_then(|runtime| {
            let state = AppState {
                context: Arc::clone(&context),
                queue: Arc::clone(&queue),
            };
            runtime
                .block_on(server::serve(state, port))
                .map_err(StartupError::Server)
        });

    scheduler.stop();
    queue.shutdown();
    queue.wait();
    scheduler.join();
    log::info!("kubetrail-webhook stopped");

    served
}
