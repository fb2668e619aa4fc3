use clap::Parser;
use docpipe::processing::PipelineService;
use docpipe::queue::{self, ProcessingQueue, RetryPolicy};
use docpipe::vectorstore::{ChunkStore, VectorStoreClient};
use docpipe::{api, config::Config, documents, embedding, extraction, jobs, logging, storage};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// Document ingestion and retrieval service.
#[derive(Parser)]
#[command(name = "docpipe", version, about)]
struct Cli {
    /// Port to listen on (overrides SERVER_PORT).
    #[arg(long)]
    port: Option<u16>,
    /// Root directory for stored uploads (overrides BLOB_STORE_ROOT).
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = Config::from_env().expect("Failed to load configuration");
    if let Some(port) = cli.port {
        config.server_port = Some(port);
    }
    if let Some(dir) = cli.data_dir {
        config.blob_store_root = dir.to_string_lossy().into_owned();
    }
    logging::init_tracing(&config.log_file);
    let config = Arc::new(config);

    let document_store = Arc::new(documents::InMemoryDocumentStore::new());
    let job_store = Arc::new(jobs::InMemoryJobStore::new());
    let blob_store = Arc::new(storage::FsBlobStore::new(&config.blob_store_root));
    let extractor =
        Arc::new(extraction::RemoteOcrExtractor::new(&config).expect("Failed to build extractor"));
    let embedder =
        Arc::new(embedding::RemoteEmbedder::new(&config).expect("Failed to build embedder"));

    let vector_store =
        VectorStoreClient::new(&config).expect("Failed to build vector store client");
    vector_store
        .ensure_collection(config.embedding_dimension as u64)
        .await
        .expect("Failed to ensure vector store collection");
    vector_store
        .ensure_payload_indexes()
        .await
        .expect("Failed to ensure vector store payload indexes");
    let chunk_store: Arc<dyn ChunkStore> = Arc::new(vector_store);

    let (queue, consumer) = ProcessingQueue::new();
    let queue = Arc::new(queue);
    let pipeline = Arc::new(PipelineService::new(
        config.clone(),
        document_store,
        job_store,
        blob_store,
        extractor,
        embedder,
        chunk_store,
        queue,
    ));

    let retry = RetryPolicy {
        attempts: config.queue_max_attempts,
        initial_backoff: Duration::from_secs(config.queue_backoff_secs),
    };
    tokio::spawn(queue::run_queue_worker(consumer, pipeline.clone(), retry));

    let app = api::create_router(pipeline);
    let (listener, port) = bind_listener(&config).await.expect("Failed to bind listener");
    tracing::info!("Listening on http://0.0.0.0:{}", port);
    axum::serve(listener, app).await.unwrap();
}

async fn bind_listener(config: &Config) -> Result<(TcpListener, u16), std::io::Error> {
    use std::net::Ipv4Addr;

    if let Some(port) = config.server_port {
        return TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .map(|listener| (listener, port));
    }

    const PORT_RANGE: std::ops::RangeInclusive<u16> = 7300..=7399;
    for port in PORT_RANGE {
        match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
            Ok(listener) => {
                tracing::debug!(port, "Bound server port");
                return Ok((listener, port));
            }
            Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::debug!(port, "Port already in use; trying next");
                continue;
            }
            Err(err) => return Err(err),
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AddrNotAvailable,
        "No available port found in range 7300-7399",
    ))
}
