use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;
use clap::{Parser, Subcommand};
use http_body_util::Full;
use prometheus::Encoder;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pcb_cas::config::{NotifierArgs, StoreArgs};
use pcb_cas::http::{ApiService, AppState};
use pcb_cas::ingest::{cleanup_staging, promote, put, CleanupConfig, PromoteConfig, PutConfig};
use pcb_cas::metrics::SharedMetrics;
use pcb_cas::notify::TaskNotifier;
use pcb_cas::retrieve::{retrieve, RetrieveConfig};
use pcb_cas_storage::Page;

#[derive(Parser)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Parser, Debug)]
pub struct ServerConfig {
    #[command(flatten)]
    store: StoreArgs,

    #[command(flatten)]
    notifier: NotifierArgs,

    #[arg(long, env = "PCB_CAS_HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "PCB_CAS_PORT", default_value = "8000")]
    port: u16,

    #[arg(long, env = "PCB_CAS_METRIC_HOST", default_value = "localhost")]
    metric_host: String,

    #[arg(long, env = "PCB_CAS_METRIC_PORT", default_value = "9100")]
    metric_port: u16,

    #[arg(
        long,
        env = "PCB_CAS_DOCUMENT_ROOT",
        help = "Root the annotation tool serves local files from [default: data root]"
    )]
    document_root: Option<PathBuf>,

    #[arg(
        long,
        env = "PCB_CAS_STAGING_MAX_AGE_SECS",
        default_value = "3600",
        help = "Age after which abandoned staging entries are removed"
    )]
    staging_max_age_secs: u64,

    #[arg(long, env = "PCB_CAS_CLEANUP_INTERVAL_SECS", default_value = "600")]
    cleanup_interval_secs: u64,

    #[arg(
        long,
        default_value = "info",
        help = "Log level (error, warn, info, debug, trace). Can also be set via RUST_LOG env var"
    )]
    log_level: String,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the ingestion server
    Server(ServerConfig),

    /// Ingest a single image
    Put(PutConfig),

    /// Copy an ingested image into the labeled tree with its metadata
    Promote(PromoteConfig),

    /// Retrieve an object by digest
    Retrieve(RetrieveConfig),

    /// Inspect the store
    Inspect {
        #[command(flatten)]
        store: StoreArgs,

        #[command(subcommand)]
        command: InspectCommand,
    },

    /// Remove abandoned staging entries
    CleanupStaging(CleanupConfig),
}

#[derive(Debug, Subcommand)]
pub enum InspectCommand {
    /// Image counts and sizes of both trees
    Stats,
    /// List unlabeled images, newest first
    ListUnlabeled {
        #[arg(long, default_value = "0")]
        offset: usize,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// List labeled images, newest first
    ListLabeled {
        #[arg(long, default_value = "0")]
        offset: usize,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show where an object is stored
    Locate {
        /// SHA-256 of the object
        sha256: String,
    },
}

fn setup_tracing(log_level: &str) {
    // RUST_LOG wins over the CLI flag
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| {
            eprintln!("Invalid log level '{}', falling back to 'info'", log_level);
            EnvFilter::new("info")
        });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    let log_level = match &cli.command {
        Command::Server(config) => config.log_level.as_str(),
        _ => "info",
    };

    setup_tracing(log_level);

    match cli.command {
        Command::Server(config) => run(config)?,
        Command::Put(config) => put(config)?,
        Command::Promote(config) => promote(config)?,
        Command::Retrieve(config) => retrieve(config)?,
        Command::Inspect { store, command } => run_inspect(store, command)?,
        Command::CleanupStaging(config) => cleanup_staging(config)?,
    }
    Ok(())
}

#[tokio::main]
async fn run_inspect(args: StoreArgs, command: InspectCommand) -> Result<()> {
    use pcb_cas::inspect;

    let store = args
        .resolve()?
        .open(SharedMetrics::new().to_store_metrics())
        .await?;
    match command {
        InspectCommand::Stats => inspect::stats(&store).await?,
        InspectCommand::ListUnlabeled { offset, limit } => {
            inspect::list_unlabeled(&store, Page::new(offset, limit)).await?
        }
        InspectCommand::ListLabeled { offset, limit } => {
            inspect::list_labeled(&store, Page::new(offset, limit)).await?
        }
        InspectCommand::Locate { sha256 } => inspect::locate(&store, &sha256).await?,
    }
    Ok(())
}

use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;

#[tokio::main]
async fn run(args: ServerConfig) -> Result<()> {
    let resolved = args.store.resolve()?;
    let metrics = SharedMetrics::new();
    let store = Arc::new(resolved.open(metrics.to_store_metrics()).await?);

    // Nothing is in flight yet, so every staging entry is a leftover.
    let removed = store.cleanup_staging(Duration::ZERO).await?;
    if removed > 0 {
        info!(removed, "Removed staging leftovers from a previous run");
    }

    let document_root = args
        .document_root
        .clone()
        .or_else(|| resolved.file.document_root.clone())
        .unwrap_or_else(|| resolved.data_root.clone());

    let notifier = match args.notifier.resolve(&resolved.file) {
        Some(config) => {
            info!(
                url = %config.url,
                max_attempts = config.retry.max_attempts,
                document_root = %document_root.display(),
                "Labeling task creation enabled"
            );
            Some(Arc::new(TaskNotifier::new(
                config,
                document_root,
                metrics.clone(),
            )?))
        }
        None => {
            info!("No task hook configured, labeling task creation disabled");
            None
        }
    };

    // Periodic staging cleanup and store gauges
    {
        let store = store.clone();
        let metrics = metrics.clone();
        let max_age = Duration::from_secs(args.staging_max_age_secs);
        let period = Duration::from_secs(args.cleanup_interval_secs.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;

                if let Err(e) = store.cleanup_staging(max_age).await {
                    warn!(error = %e, "Staging cleanup failed");
                }
                match store.statistics().await {
                    Ok(stats) => metrics.record_stats(&stats),
                    Err(e) => warn!(error = %e, "Failed to refresh store statistics"),
                }
            }
        });
        info!("Started background staging cleanup task");
    }

    let service = ApiService::new(AppState {
        store,
        metrics,
        notifier,
    });

    run_server(args, service).await
}

fn metrics_response() -> hyper::Response<Full<Bytes>> {
    let mut buffer = Vec::new();
    let encoder = prometheus::TextEncoder::new();
    let mut resp = match encoder.encode(&prometheus::gather(), &mut buffer) {
        Ok(()) => hyper::Response::new(Full::new(Bytes::from(buffer))),
        Err(e) => {
            tracing::error!("failed to encode metrics: {e}");
            let mut resp = hyper::Response::new(Full::new(Bytes::from("Internal Server Error")));
            *resp.status_mut() = hyper::StatusCode::INTERNAL_SERVER_ERROR;
            return resp;
        }
    };
    resp.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("text/plain; version=0.0.4"),
    );
    resp
}

async fn run_server(args: ServerConfig, service: ApiService) -> Result<()> {
    let listener = tokio::net::TcpListener::bind((args.host.as_str(), args.port)).await?;
    let local_addr = listener.local_addr()?;

    let metrics_listener =
        tokio::net::TcpListener::bind((args.metric_host.as_str(), args.metric_port)).await?;
    let metrics_addr = metrics_listener.local_addr()?;

    info!("metrics server is running at http://{metrics_addr}");

    let metrics_service = hyper::service::service_fn(
        move |req: hyper::Request<hyper::body::Incoming>| async move {
            let resp = match (req.method(), req.uri().path()) {
                (&hyper::Method::GET, "/metrics") => metrics_response(),
                _ => {
                    let mut resp = hyper::Response::new(Full::new(Bytes::from("Not Found")));
                    *resp.status_mut() = hyper::StatusCode::NOT_FOUND;
                    resp
                }
            };
            Ok::<_, std::convert::Infallible>(resp)
        },
    );

    let api_service = hyper::service::service_fn(move |req: hyper::Request<hyper::body::Incoming>| {
        let service = service.clone();
        async move { service.handle_request(req).await }
    });

    let http_server = ConnBuilder::new(TokioExecutor::new());
    let graceful = hyper_util::server::graceful::GracefulShutdown::new();

    let mut ctrl_c = std::pin::pin!(tokio::signal::ctrl_c());

    info!("server is running at http://{local_addr}");

    loop {
        tokio::select! {
            res = listener.accept() => {
                match res {
                    Ok((socket, _)) => {
                        let conn = http_server.serve_connection(TokioIo::new(socket), api_service.clone());
                        let conn = graceful.watch(conn.into_owned());
                        tokio::spawn(async move {
                            let _ = conn.await;
                        });
                    }
                    Err(err) => {
                        tracing::error!("error accepting connection: {err}");
                    }
                }
            }
            res = metrics_listener.accept() => {
                match res {
                    Ok((socket, _)) => {
                        let conn = http_server.serve_connection(TokioIo::new(socket), metrics_service);
                        let conn = graceful.watch(conn.into_owned());
                        tokio::spawn(async move {
                            let _ = conn.await;
                        });
                    }
                    Err(err) => {
                        tracing::error!("error accepting metrics connection: {err}");
                    }
                }
            }
            _ = ctrl_c.as_mut() => {
                break;
            }
        }
    }

    tokio::select! {
        () = graceful.shutdown() => {
             tracing::debug!("Gracefully shutdown!");
        },
        () = tokio::time::sleep(Duration::from_secs(10)) => {
             tracing::debug!("Waited 10 seconds for graceful shutdown, aborting...");
        }
    }

    info!("server is stopped");
    Ok(())
}
