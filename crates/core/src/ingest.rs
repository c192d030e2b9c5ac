use crate::coercion::{coerce, stringify};
use crate::config::{CoercionOptions, DEFAULT_INGEST_CONCURRENCY};
use crate::embeddings::{EmbeddingGateway, EmbeddingInput};
use crate::schema::{record_key, ID_ATTRIBUTE, VECTOR_SUFFIX};
use crate::traits::SearchStore;
use crate::{FieldSet, FieldType, FieldValue, IngestError, Record};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

const DATA_EXTENSIONS: [&str; 2] = ["csv", "json"];

pub fn discover_data_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_data = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                DATA_EXTENSIONS
                    .iter()
                    .any(|known| ext.eq_ignore_ascii_case(known))
            });

        if is_data {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

pub fn digest_file(path: &Path) -> Result<String, IngestError> {
    Ok(digest_bytes(&fs::read(path)?))
}

pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Source keys are matched against field names after `.` becomes `__`.
pub fn normalize_key(key: &str) -> String {
    key.replace('.', "__")
}

/// A caller-supplied id under `id` or `<label>.id`.
pub fn explicit_id(source: &Map<String, Value>) -> Option<String> {
    source
        .iter()
        .find(|(key, _)| key.as_str() == "id" || key.ends_with(".id"))
        .map(|(_, value)| stringify(value).trim().to_string())
        .filter(|id| !id.is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedRow {
    /// 1-based position in the batch.
    pub row: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestionReport {
    pub written: Vec<String>,
    pub failed: Vec<FailedRow>,
}

impl IngestionReport {
    pub fn merge(&mut self, other: IngestionReport) {
        self.written.extend(other.written);
        self.failed.extend(other.failed);
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Turns source rows into stored records. Every write goes through the
/// shared store handle; embedding calls are additionally limited by the
/// gateway.
pub struct IngestionPipeline<'a, S: SearchStore + ?Sized> {
    store: &'a S,
    gateway: &'a EmbeddingGateway,
    options: CoercionOptions,
    concurrency: usize,
}

impl<'a, S: SearchStore + ?Sized> IngestionPipeline<'a, S> {
    pub fn new(store: &'a S, gateway: &'a EmbeddingGateway) -> Self {
        Self {
            store,
            gateway,
            options: CoercionOptions::default(),
            concurrency: DEFAULT_INGEST_CONCURRENCY,
        }
    }

    pub fn with_options(mut self, options: CoercionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Resolves declared fields against the source without writing.
    ///
    /// A VECTOR attribute matches the source key equal to its name minus
    /// the `_vec` suffix and stores the embedding of that value. Other
    /// attributes are coerced from the key equal to their name. The first
    /// matching key wins and unmatched fields are left out.
    pub async fn build_record(
        &self,
        index: &str,
        fields: &FieldSet,
        source: &Map<String, Value>,
    ) -> Result<Record, IngestError> {
        let normalized: Vec<(String, &Value)> = source
            .iter()
            .map(|(key, value)| (normalize_key(key), value))
            .collect();

        let mut values = Vec::with_capacity(fields.len() + 1);
        for field in fields.iter() {
            if field.name == ID_ATTRIBUTE {
                continue;
            }

            let wanted = match field.field_type {
                FieldType::Vector => field
                    .name
                    .strip_suffix(VECTOR_SUFFIX)
                    .unwrap_or(&field.name),
                _ => field.name.as_str(),
            };
            let Some((_, value)) = normalized.iter().find(|(key, _)| key == wanted) else {
                continue;
            };

            let value = match field.field_type {
                FieldType::Vector => {
                    FieldValue::Vector(self.gateway.embed(EmbeddingInput::from_value(value)).await?)
                }
                field_type => coerce(&field.name, field_type, value, &self.options)?,
            };
            values.push((field.name.clone(), value));
        }

        let id = explicit_id(source).unwrap_or_else(|| Uuid::new_v4().to_string());
        values.push((ID_ATTRIBUTE.to_string(), FieldValue::Text(id.clone())));

        Ok(Record {
            key: record_key(index, &id),
            id,
            fields: values,
        })
    }

    /// Builds and writes one record. Re-ingesting with the same explicit id
    /// overwrites the same key.
    pub async fn ingest(
        &self,
        index: &str,
        fields: &FieldSet,
        source: &Map<String, Value>,
    ) -> Result<Record, IngestError> {
        let record = self.build_record(index, fields, source).await?;
        self.store.hash_set(&record.key, &record.fields).await?;
        debug!(key = %record.key, fields = record.fields.len(), "record written");
        Ok(record)
    }

    /// Ingests every row with bounded concurrency. Row failures are
    /// collected; the batch always runs to completion.
    pub async fn ingest_rows(
        &self,
        index: &str,
        fields: &FieldSet,
        rows: Vec<Value>,
    ) -> IngestionReport {
        let outcomes: Vec<(usize, Result<Record, IngestError>)> = stream::iter(
            rows.into_iter().enumerate(),
        )
        .map(|(position, row)| async move {
            let outcome = match row {
                Value::Object(source) => self.ingest(index, fields, &source).await,
                other => Err(IngestError::InvalidArgument(format!(
                    "expected a JSON object, got {other}"
                ))),
            };
            (position + 1, outcome)
        })
        .buffer_unordered(self.concurrency)
        .collect()
        .await;

        let mut report = IngestionReport::default();
        let mut ordered = outcomes;
        ordered.sort_by_key(|(row, _)| *row);
        for (row, outcome) in ordered {
            match outcome {
                Ok(record) => report.written.push(record.id),
                Err(error) => {
                    warn!(index, row, %error, "row rejected");
                    report.failed.push(FailedRow {
                        row,
                        reason: error.to_string(),
                    });
                }
            }
        }

        info!(
            index,
            written = report.written.len(),
            failed = report.failed.len(),
            "batch ingested"
        );
        report
    }

    /// Streams CSV rows keyed by header. A malformed row is reported as a
    /// failure; a missing header fails the whole upload.
    pub async fn ingest_csv<R: Read>(
        &self,
        index: &str,
        fields: &FieldSet,
        reader: R,
    ) -> Result<IngestionReport, IngestError> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);
        let headers = reader.headers()?.clone();

        let mut rows = Vec::new();
        let mut parse_failures = Vec::new();
        for (position, record) in reader.records().enumerate() {
            match record {
                Ok(record) => {
                    let row: Map<String, Value> = headers
                        .iter()
                        .zip(record.iter())
                        .map(|(header, value)| (header.to_string(), Value::String(value.to_string())))
                        .collect();
                    rows.push((position + 1, Value::Object(row)));
                }
                Err(error) => parse_failures.push(FailedRow {
                    row: position + 1,
                    reason: IngestError::from(error).to_string(),
                }),
            }
        }

        let (positions, rows): (Vec<usize>, Vec<Value>) = rows.into_iter().unzip();
        let mut report = self.ingest_rows(index, fields, rows).await;
        for failure in &mut report.failed {
            failure.row = positions[failure.row - 1];
        }
        report.failed.extend(parse_failures);
        report.failed.sort_by_key(|failure| failure.row);
        Ok(report)
    }

    /// Accepts an array of documents or a single document.
    pub async fn ingest_json(
        &self,
        index: &str,
        fields: &FieldSet,
        documents: Value,
    ) -> Result<IngestionReport, IngestError> {
        let rows = match documents {
            Value::Array(rows) => rows,
            document @ Value::Object(_) => vec![document],
            other => {
                return Err(IngestError::InvalidArgument(format!(
                    "expected a document or an array of documents, got {other}"
                )))
            }
        };
        Ok(self.ingest_rows(index, fields, rows).await)
    }

    /// Ingests a `.csv` or `.json` file by extension.
    pub async fn ingest_file(
        &self,
        index: &str,
        fields: &FieldSet,
        path: &Path,
    ) -> Result<IngestionReport, IngestError> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);

        match extension.as_deref() {
            Some("csv") => {
                let bytes = tokio::fs::read(path).await?;
                self.ingest_csv(index, fields, bytes.as_slice()).await
            }
            Some("json") => {
                let documents: Value = serde_json::from_slice(&tokio::fs::read(path).await?)?;
                self.ingest_json(index, fields, documents).await
            }
            _ => Err(IngestError::InvalidArgument(format!(
                "unsupported data file: {}",
                path.display()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NumericMode;
    use crate::embeddings::ModelSource;
    use crate::stores::MemoryStore;
    use crate::FieldSchema;
    use serde_json::json;
    use std::fs::{self, File};
    use std::io::Write;
    use tempfile::tempdir;

    fn gateway() -> EmbeddingGateway {
        EmbeddingGateway::new(ModelSource::Ngram { dimensions: 8 }, 8, 2)
    }

    fn fields() -> FieldSet {
        FieldSet::new(vec![
            FieldSchema::new("title", FieldType::Text),
            FieldSchema::new("price", FieldType::Numeric),
            FieldSchema::new("labels", FieldType::Tag),
            FieldSchema::new("author__name", FieldType::Text),
            FieldSchema::new("summary", FieldType::Text),
            FieldSchema::new("summary_vec", FieldType::Vector),
            FieldSchema::new(ID_ATTRIBUTE, FieldType::Tag),
        ])
    }

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn discover_data_files_is_recursive() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let base = dir.path();
        let nested = base.join("nested");
        fs::create_dir(&nested)?;

        File::create(base.join("a.csv")).and_then(|mut file| file.write_all(b"id\n1\n"))?;
        File::create(nested.join("b.JSON")).and_then(|mut file| file.write_all(b"[]"))?;
        File::create(nested.join("c.txt")).and_then(|mut file| file.write_all(b"skip"))?;

        let files = discover_data_files(base);
        assert_eq!(files.len(), 2);
        Ok(())
    }

    #[test]
    fn checksum_is_reproducible() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let file_path = dir.path().join("a.csv");
        fs::write(&file_path, b"abc")?;

        let first = digest_file(&file_path)?;
        let second = digest_file(&file_path)?;
        assert_eq!(first, second);
        Ok(())
    }

    #[test]
    fn explicit_ids_follow_label_convention() {
        assert_eq!(explicit_id(&object(json!({"Book.id": 7}))), Some("7".to_string()));
        assert_eq!(explicit_id(&object(json!({"id": " x "}))), Some("x".to_string()));
        assert_eq!(explicit_id(&object(json!({"identity": "x"}))), None);
        assert_eq!(explicit_id(&object(json!({"id": ""}))), None);
    }

    #[tokio::test]
    async fn record_resolves_declared_fields() -> Result<(), IngestError> {
        let store = MemoryStore::new();
        let gateway = gateway();
        let pipeline = IngestionPipeline::new(&store, &gateway);

        let source = object(json!({
            "title": "Red Shoes",
            "price": "$19.99",
            "labels": ["sale", "new"],
            "author.name": "Ada",
            "summary": "comfortable red shoes",
            "unused": "ignored"
        }));
        let record = pipeline.build_record("products", &fields(), &source).await?;

        assert_eq!(record.get("title"), Some(&FieldValue::Text("Red Shoes".to_string())));
        assert_eq!(record.get("price"), Some(&FieldValue::Number(19.99)));
        assert_eq!(record.get("labels"), Some(&FieldValue::Text("sale,new".to_string())));
        assert_eq!(record.get("author__name"), Some(&FieldValue::Text("Ada".to_string())));
        assert!(matches!(record.get("summary_vec"), Some(FieldValue::Vector(vector)) if vector.len() == 8));
        assert!(record.get("unused").is_none());
        assert_eq!(record.get(ID_ATTRIBUTE), Some(&FieldValue::Text(record.id.clone())));
        assert_eq!(record.key, format!("vs:products:{}", record.id));
        Ok(())
    }

    #[tokio::test]
    async fn explicit_id_is_idempotent() -> Result<(), IngestError> {
        let store = MemoryStore::new();
        let gateway = gateway();
        let pipeline = IngestionPipeline::new(&store, &gateway);
        let source = object(json!({"Product.id": "p-1", "title": "Hat"}));

        let first = pipeline.ingest("products", &fields(), &source).await?;
        let second = pipeline.ingest("products", &fields(), &source).await?;

        assert_eq!(first.key, "vs:products:p-1");
        assert_eq!(first.key, second.key);
        assert_eq!(store.len().await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn bad_rows_do_not_drop_the_batch() -> Result<(), IngestError> {
        let store = MemoryStore::new();
        let gateway = gateway();
        let pipeline = IngestionPipeline::new(&store, &gateway)
            .with_options(CoercionOptions {
                numeric: NumericMode::Strict,
                sanitize_text: false,
            })
            .with_concurrency(2);

        let report = pipeline
            .ingest_json(
                "products",
                &fields(),
                json!([
                    {"id": "a", "price": "12"},
                    {"id": "b", "price": "twelve"},
                    "not a document",
                    {"id": "c", "title": "ok"}
                ]),
            )
            .await?;

        assert_eq!(report.written, vec!["a".to_string(), "c".to_string()]);
        let failed: Vec<usize> = report.failed.iter().map(|failure| failure.row).collect();
        assert_eq!(failed, vec![2, 3]);
        assert!(!report.is_complete());
        assert_eq!(store.len().await, 2);
        Ok(())
    }

    #[tokio::test]
    async fn csv_rows_are_keyed_by_header() -> Result<(), IngestError> {
        let store = MemoryStore::new();
        let gateway = gateway();
        let pipeline = IngestionPipeline::new(&store, &gateway);
        let csv = "id,title,price\n1,Red Shoes,$19.99\n2,Blue Hat,\n";

        let report = pipeline.ingest_csv("products", &fields(), csv.as_bytes()).await?;

        assert_eq!(report.written, vec!["1".to_string(), "2".to_string()]);
        assert_eq!(
            store.hash_get("vs:products:2", "price").await?,
            Some(b"0".to_vec())
        );
        Ok(())
    }

    #[tokio::test]
    async fn scalar_json_is_rejected() {
        let store = MemoryStore::new();
        let gateway = gateway();
        let pipeline = IngestionPipeline::new(&store, &gateway);

        let result = pipeline.ingest_json("products", &fields(), json!(42)).await;
        assert!(matches!(result, Err(IngestError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn data_files_are_read_by_extension() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let csv = dir.path().join("products.CSV");
        let json_file = dir.path().join("more.json");
        let other = dir.path().join("notes.txt");
        fs::write(&csv, "id,title\n1,Red Shoes\n")?;
        fs::write(&json_file, r#"[{"id": "2", "title": "Blue Hat"}]"#)?;
        fs::write(&other, "skip")?;

        let store = MemoryStore::new();
        let gateway = gateway();
        let pipeline = IngestionPipeline::new(&store, &gateway);

        let from_csv = pipeline.ingest_file("products", &fields(), &csv).await?;
        let from_json = pipeline.ingest_file("products", &fields(), &json_file).await?;
        assert_eq!(from_csv.written, vec!["1".to_string()]);
        assert_eq!(from_json.written, vec!["2".to_string()]);
        assert_eq!(store.len().await, 2);

        let result = pipeline.ingest_file("products", &fields(), &other).await;
        assert!(matches!(result, Err(IngestError::InvalidArgument(_))));
        Ok(())
    }
}
