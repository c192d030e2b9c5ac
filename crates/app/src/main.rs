use anyhow::{anyhow, bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use vecsearch_core::{
    discover_data_files, fields_from_declarations, instantsearch_response, CoercionOptions,
    Combinator, DirectoryBlobStore, DistanceMetric, EmbeddingGateway, FieldSchema, FieldType,
    HitMapping, IngestionReport, ModelSource, NumericMode, ParentDocument, RedisStore,
    SearchCoordinator, SearchRequest, ServiceConfig, VectorConfig,
};

#[derive(Parser)]
#[command(name = "vecsearch", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Redis (RediSearch) connection URL
    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    redis_url: String,

    /// Remote embedding endpoint; the built-in n-gram model is used when unset
    #[arg(long, env = "EMBEDDING_URL")]
    embedding_url: Option<String>,

    /// Bearer key for the embedding endpoint
    #[arg(long, env = "EMBEDDING_API_KEY", hide_env_values = true)]
    embedding_api_key: Option<String>,

    /// Embedding and vector attribute dimension
    #[arg(long, env = "EMBEDDING_DIMENSIONS", default_value = "512")]
    dimensions: usize,

    /// Vector distance metric (COSINE or L2)
    #[arg(long, env = "DISTANCE_METRIC", default_value = "COSINE")]
    metric: DistanceMetric,

    /// Rows ingested concurrently
    #[arg(long, env = "INGEST_CONCURRENCY", default_value = "16")]
    ingest_concurrency: usize,

    /// Embedding calls in flight
    #[arg(long, env = "EMBEDDING_CONCURRENCY", default_value = "8")]
    embedding_concurrency: usize,

    /// Bucket that receives archived uploads
    #[arg(long, env = "FILE_BUCKET", default_value = "uploads")]
    file_bucket: String,

    /// Directory for archived uploads; archiving is off when unset
    #[arg(long, env = "ARCHIVE_ROOT")]
    archive_root: Option<PathBuf>,

    /// Reject rows whose NUMERIC values do not parse instead of storing 0
    #[arg(long, default_value_t = false)]
    strict_numeric: bool,

    /// Strip punctuation from TEXT values on ingestion
    #[arg(long, default_value_t = false)]
    sanitize_text: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Create an index from field declarations.
    CreateIndex {
        name: String,
        /// Field as name:TYPE or name:TYPE:sortable
        #[arg(long = "field")]
        fields: Vec<String>,
        /// JSON file shaped as {"name": {"type": "TEXT", "sortable": true}}
        #[arg(long)]
        schema: Option<PathBuf>,
    },
    /// Add fields to an existing index.
    AlterIndex {
        name: String,
        #[arg(long = "field")]
        fields: Vec<String>,
        #[arg(long)]
        schema: Option<PathBuf>,
    },
    /// Drop an index, optionally sweeping its records.
    DropIndex {
        name: String,
        #[arg(long, default_value_t = false)]
        delete_records: bool,
    },
    /// List index names.
    ListIndexes,
    /// Show the physical attributes of an index.
    Info { name: String },
    /// Archive a CSV file and ingest its rows.
    Upload {
        index: String,
        file: PathBuf,
        #[arg(long, default_value = "text/csv")]
        content_type: String,
    },
    /// Ingest a .csv/.json file or every data file under a folder.
    Ingest {
        index: String,
        #[arg(long, conflicts_with = "folder", required_unless_present = "folder")]
        file: Option<PathBuf>,
        #[arg(long)]
        folder: Option<PathBuf>,
    },
    /// Store a parent document grouping chunk records.
    PutParent {
        index: String,
        uid: String,
        /// Comma-separated chunk ids
        #[arg(long, value_delimiter = ',')]
        items: Vec<String>,
    },
    /// Run a hybrid search.
    Search {
        index: String,
        #[arg(long)]
        query: Option<String>,
        /// Attribute filter as name=value
        #[arg(long = "filter")]
        filters: Vec<String>,
        /// Join filters with OR instead of AND
        #[arg(long, default_value_t = false)]
        or: bool,
        #[arg(long, default_value = "10")]
        limit: usize,
        /// Reassemble parent documents of the hits
        #[arg(long, default_value_t = false)]
        parents: bool,
        #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
        /// Hit field rename as output=attribute (instantsearch format)
        #[arg(long = "map")]
        mappings: Vec<String>,
    },
    /// Delete records by id.
    Delete {
        index: String,
        #[arg(required = true)]
        uids: Vec<String>,
    },
    /// Delete every key matching a pattern.
    Sweep { pattern: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Instantsearch,
}

fn parse_field(spec: &str) -> anyhow::Result<FieldSchema> {
    let mut parts = spec.split(':');
    let name = parts
        .next()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| anyhow!("field needs a name: {spec}"))?;
    let field_type = FieldType::from_declared(parts.next().unwrap_or("TEXT"));
    let field = FieldSchema::new(name, field_type);

    match parts.next() {
        None => Ok(field),
        Some(flag) if flag.eq_ignore_ascii_case("sortable") => Ok(field.sortable()),
        Some(other) => bail!("unknown field flag `{other}` in {spec}"),
    }
}

fn load_fields(specs: &[String], schema: Option<&Path>) -> anyhow::Result<Vec<FieldSchema>> {
    let mut fields = Vec::new();
    if let Some(path) = schema {
        let raw = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let declarations: Map<String, Value> = serde_json::from_slice(&raw)?;
        fields.extend(fields_from_declarations(&declarations));
    }
    for spec in specs {
        fields.push(parse_field(spec)?);
    }
    if fields.is_empty() {
        bail!("no fields declared; pass --field or --schema");
    }
    Ok(fields)
}

fn parse_filters(filters: &[String]) -> anyhow::Result<Map<String, Value>> {
    filters
        .iter()
        .map(|filter| {
            filter
                .split_once('=')
                .map(|(name, value)| (name.trim().to_string(), Value::String(value.to_string())))
                .ok_or_else(|| anyhow!("filter must be name=value: {filter}"))
        })
        .collect()
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn report_failures(report: &IngestionReport) {
    for failure in &report.failed {
        warn!(row = failure.row, reason = %failure.reason, "row skipped");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = ServiceConfig {
        vector: VectorConfig {
            dimension: cli.dimensions,
            metric: cli.metric,
        },
        coercion: CoercionOptions {
            numeric: if cli.strict_numeric {
                NumericMode::Strict
            } else {
                NumericMode::Lenient
            },
            sanitize_text: cli.sanitize_text,
        },
        ingest_concurrency: cli.ingest_concurrency,
        embedding_concurrency: cli.embedding_concurrency,
        archive_bucket: cli.file_bucket.clone(),
    };

    let source = match &cli.embedding_url {
        Some(endpoint) => ModelSource::Http {
            endpoint: endpoint.clone(),
            api_key: cli.embedding_api_key.clone(),
            dimensions: cli.dimensions,
        },
        None => ModelSource::Ngram {
            dimensions: cli.dimensions,
        },
    };
    let gateway = Arc::new(EmbeddingGateway::new(
        source,
        cli.dimensions,
        config.embedding_concurrency,
    ));

    let store = Arc::new(RedisStore::connect(&cli.redis_url).await?);
    let mut coordinator = SearchCoordinator::new(store, gateway, config);
    if let Some(root) = &cli.archive_root {
        coordinator = coordinator.with_archive(Arc::new(DirectoryBlobStore::new(root)));
    }

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "vecsearch boot"
    );

    match cli.command {
        Command::CreateIndex {
            name,
            fields,
            schema,
        } => {
            let fields = load_fields(&fields, schema.as_deref())?;
            let outcome = coordinator.create_index(&name, &fields).await?;
            print_json(&serde_json::json!({ "index": name, "outcome": outcome }))?;
        }
        Command::AlterIndex {
            name,
            fields,
            schema,
        } => {
            let fields = load_fields(&fields, schema.as_deref())?;
            coordinator.alter_index(&name, &fields).await?;
            print_json(&serde_json::json!({ "index": name, "status": "OK" }))?;
        }
        Command::DropIndex {
            name,
            delete_records,
        } => match coordinator.drop_index(&name, delete_records).await? {
            Some(sweep) => print_json(&sweep.wait().await?)?,
            None => print_json(&serde_json::json!({ "index": name, "status": "OK" }))?,
        },
        Command::ListIndexes => print_json(&coordinator.list_indexes().await?)?,
        Command::Info { name } => print_json(&coordinator.index_fields(&name).await?)?,
        Command::Upload {
            index,
            file,
            content_type,
        } => {
            let original_name = file
                .file_name()
                .and_then(|name| name.to_str())
                .ok_or_else(|| anyhow!("path missing filename: {}", file.display()))?
                .to_string();
            let outcome = coordinator
                .upload_csv(&index, &file, &original_name, Some(&content_type))
                .await?;
            print_json(&outcome)?;
        }
        Command::Ingest {
            index,
            file,
            folder,
        } => {
            let files = match (file, folder) {
                (Some(file), _) => vec![file],
                (None, Some(folder)) => {
                    let files = discover_data_files(&folder);
                    if files.is_empty() {
                        bail!("no .csv or .json files found in {}", folder.display());
                    }
                    files
                }
                (None, None) => bail!("pass --file or --folder"),
            };

            let mut report = IngestionReport::default();
            for path in files {
                match coordinator.ingest_file(&index, &path).await {
                    Ok(file_report) => {
                        info!(path = %path.display(), written = file_report.written.len(), "file ingested");
                        report.merge(file_report);
                    }
                    Err(error) => warn!(path = %path.display(), %error, "skipped file"),
                }
            }
            report_failures(&report);
            print_json(&report)?;
        }
        Command::PutParent { index, uid, items } => {
            let parent = ParentDocument { uid, items };
            coordinator.put_parent(&index, &parent).await?;
            print_json(&parent)?;
        }
        Command::Search {
            index,
            query,
            filters,
            or,
            limit,
            parents,
            format,
            mappings,
        } => {
            let request = SearchRequest {
                index,
                query,
                filters: parse_filters(&filters)?,
                combinator: if or { Combinator::Or } else { Combinator::And },
                limit,
                parents,
            };

            let started = Instant::now();
            let response = coordinator.search(&request).await?;
            let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

            match format {
                OutputFormat::Json => print_json(&response)?,
                OutputFormat::Instantsearch => {
                    let mapping = HitMapping::parse(&mappings)?;
                    let result = instantsearch_response(
                        request.free_text().unwrap_or_default(),
                        &response.hits,
                        &mapping,
                        elapsed_ms,
                    );
                    print_json(&serde_json::json!({ "results": [result] }))?;
                }
            }
        }
        Command::Delete { index, uids } => {
            print_json(&coordinator.delete_documents(&index, &uids).await)?;
        }
        Command::Sweep { pattern } => {
            let report = coordinator.sweep(pattern).wait().await?;
            print_json(&report)?;
        }
    }

    Ok(())
}
