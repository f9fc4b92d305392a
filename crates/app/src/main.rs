use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use textbook_search_core::{
    BoundaryKind, CorpusIndex, DocumentIndexer, Embedder, EngineConfig, HashingEmbedder,
    HttpEmbedder, HybridRetriever, IndexHandle, IndexSnapshot, LopdfExtractor, PageRange,
    QueryFilters, RetrievalPipeline, RetrievalResponse,
};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "textbook-search", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Index snapshot file, created on first `index`.
    #[arg(long, env = "TEXTBOOK_SNAPSHOT", default_value = "textbook-index.json")]
    snapshot: PathBuf,

    /// JSON engine config; missing sections use defaults.
    #[arg(long, env = "TEXTBOOK_CONFIG")]
    config: Option<PathBuf>,

    /// Remote embedding endpoint. Without it a local hashing embedder is used.
    #[arg(long, env = "EMBEDDING_ENDPOINT")]
    embedding_endpoint: Option<String>,

    /// Model name sent to the embedding endpoint.
    #[arg(long, env = "EMBEDDING_MODEL")]
    embedding_model: Option<String>,

    /// Embedding dimension; must match the snapshot.
    #[arg(long, env = "EMBEDDING_DIMENSIONS")]
    embedding_dimensions: Option<usize>,

    /// Bearer token for the embedding endpoint.
    #[arg(long, env = "EMBEDDING_API_KEY", hide_env_values = true)]
    embedding_api_key: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Index every PDF under a folder into the snapshot.
    Index {
        /// Folder that contains PDFs recursively.
        #[arg(long)]
        folder: PathBuf,
    },
    /// Hybrid lexical + vector search with reciprocal rank fusion.
    Search {
        /// Search query
        #[arg(long)]
        query: String,
        /// Number of chunks to return (config default when omitted).
        #[arg(long)]
        top_k: Option<usize>,
        /// Restrict to one document id.
        #[arg(long)]
        document: Option<String>,
        /// Restrict to a unit kind: section, example, exercise or unknown.
        #[arg(long)]
        kind: Option<BoundaryKind>,
        /// First page of an inclusive page range.
        #[arg(long)]
        first_page: Option<u32>,
        /// Last page of an inclusive page range.
        #[arg(long)]
        last_page: Option<u32>,
        /// Print per-source ranks and the index generation.
        #[arg(long, default_value_t = false)]
        explain: bool,
    },
    /// Chunks similar to an indexed chunk.
    Related {
        #[arg(long)]
        chunk: String,
        #[arg(long, default_value = "5")]
        top_k: usize,
    },
    /// List indexed documents.
    Documents,
    /// Remove a document and all of its chunks.
    Remove {
        #[arg(long)]
        document: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let embedder = build_embedder(&cli, &config)?;
    let handle = Arc::new(IndexHandle::new(load_index(&cli.snapshot, &config)?));

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        snapshot = %cli.snapshot.display(),
        "textbook-search boot"
    );

    match cli.command {
        Command::Index { folder } => {
            let indexer = DocumentIndexer::new(&config, embedder, Arc::clone(&handle))?;
            let report = indexer
                .index_folder(&folder, Arc::new(LopdfExtractor::from_env()))
                .await?;

            if !report.skipped_files.is_empty() {
                warn!(
                    "skipped_files={} for folder={}",
                    report.skipped_files.len(),
                    folder.display()
                );
            }
            for indexed in &report.indexed {
                println!(
                    "indexed {} chunks={} embedded={} source={}",
                    indexed.document_id, indexed.chunks, indexed.embedded, indexed.source_path
                );
            }
            for path in &report.unchanged {
                println!("unchanged {}", path.display());
            }
            for skipped in &report.skipped_files {
                println!("skipped {} reason={}", skipped.path.display(), skipped.reason);
            }

            save_index(&cli.snapshot, &handle)?;
            println!(
                "{} documents indexed at {}",
                report.indexed.len(),
                Utc::now().to_rfc3339()
            );
        }
        Command::Search {
            query,
            top_k,
            document,
            kind,
            first_page,
            last_page,
            explain,
        } => {
            let pages = match (first_page, last_page) {
                (None, None) => None,
                (first, last) => {
                    let first = first.or(last).unwrap_or_default();
                    Some(PageRange::new(first, last.unwrap_or(first)))
                }
            };
            let filters = QueryFilters {
                document_id: document,
                label_kind: kind,
                label: None,
                pages,
            };

            let retriever = HybridRetriever::new(Arc::clone(&handle), embedder, config.retrieval);
            let pipeline = RetrievalPipeline::new(retriever)?;
            let response = pipeline
                .search(&query, top_k.unwrap_or(config.retrieval.top_k), &filters)
                .await?;
            print_response(&response, explain);
        }
        Command::Related { chunk, top_k } => {
            let retriever = HybridRetriever::new(Arc::clone(&handle), embedder, config.retrieval);
            let response = retriever.related(&chunk, top_k).await?;
            print_response(&response, false);
        }
        Command::Documents => {
            let documents = handle.snapshot().list_documents();
            if documents.is_empty() {
                println!("no documents indexed");
            }
            for document in documents {
                println!(
                    "{} title={} chunks={} indexed_at={}",
                    document.document_id,
                    document.title,
                    document.chunk_count,
                    document.indexed_at.to_rfc3339()
                );
                println!("  source={}", document.source_path);
                println!("  labels={}", document.labels.join(", "));
            }
        }
        Command::Remove { document } => {
            let Some(generation) = handle.remove_document(&document) else {
                bail!("document {document} is not indexed");
            };
            save_index(&cli.snapshot, &handle)?;
            println!("removed {document} (generation {generation})");
        }
    }

    Ok(())
}

fn load_config(cli: &Cli) -> anyhow::Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_json_file(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => EngineConfig::default(),
    };

    if let Some(endpoint) = &cli.embedding_endpoint {
        config.embedding.endpoint = Some(endpoint.clone());
    }
    if let Some(model) = &cli.embedding_model {
        config.embedding.model = Some(model.clone());
    }
    if let Some(dimensions) = cli.embedding_dimensions {
        config.embedding.dimensions = dimensions;
    }
    config.validate()?;
    Ok(config)
}

fn build_embedder(cli: &Cli, config: &EngineConfig) -> anyhow::Result<Arc<dyn Embedder>> {
    if config.embedding.endpoint.is_none() {
        return Ok(Arc::new(HashingEmbedder::new(config.embedding.dimensions)));
    }

    let mut embedder = HttpEmbedder::from_config(&config.embedding)?;
    if let Some(api_key) = &cli.embedding_api_key {
        embedder = embedder.with_api_key(api_key.clone());
    }
    info!(endpoint = %embedder.endpoint(), "using remote embedder");
    Ok(Arc::new(embedder))
}

fn load_index(path: &Path, config: &EngineConfig) -> anyhow::Result<CorpusIndex> {
    if !path.exists() {
        return Ok(CorpusIndex::empty(&config.retrieval, config.embedding.dimensions));
    }
    let index = IndexSnapshot::load(path)
        .and_then(|snapshot| snapshot.restore(config.embedding.dimensions))
        .with_context(|| format!("loading snapshot {}", path.display()))?;
    for drift in index.settings_drift(&config.retrieval) {
        warn!(
            snapshot = %path.display(),
            %drift,
            "snapshot keeps the retrieval settings it was built with; rebuild the snapshot to apply the config"
        );
    }
    Ok(index)
}

fn save_index(path: &Path, handle: &IndexHandle) -> anyhow::Result<()> {
    IndexSnapshot::capture(&handle.snapshot())
        .save(path)
        .with_context(|| format!("saving snapshot {}", path.display()))
}

fn print_response(response: &RetrievalResponse, explain: bool) {
    println!("query: {}", response.query);
    if response.degraded {
        println!("note: embedding unavailable, lexical results only");
    }
    if response.hits.is_empty() {
        println!("no matching chunks");
    }

    for (position, hit) in response.hits.iter().enumerate() {
        let chunk = &hit.chunk;
        println!(
            "[{}] score={:.4} label={} kind={} chunk={} document_id={} pages={}-{}",
            position + 1,
            hit.fusion.score,
            chunk.label,
            chunk.label_kind,
            chunk.chunk_id,
            chunk.document_id,
            chunk.first_page().unwrap_or_default(),
            chunk.last_page().unwrap_or_default()
        );
        if explain {
            println!(
                "  explain: lexical_rank={} vector_rank={} truncated={} ocr={}",
                rank_text(hit.fusion.ranks.lexical),
                rank_text(hit.fusion.ranks.vector),
                chunk.truncated,
                chunk.ocr
            );
        }
        println!("  chunk_text:\n{}", chunk.text);
    }

    if explain {
        println!("explain: generation={} degraded={}", response.generation, response.degraded);
    }
}

fn rank_text(rank: Option<usize>) -> String {
    rank.map_or_else(|| "-".to_string(), |rank| rank.to_string())
}
