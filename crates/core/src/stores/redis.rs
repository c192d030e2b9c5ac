use crate::query::{CompiledQuery, QUERY_DIALECT};
use crate::schema::{index_key, Attribute, AttributeKind, IndexDefinition};
use crate::store::{ScanPage, StoredDocument};
use crate::traits::SearchStore;
use crate::{FieldSchema, FieldSet, FieldType, FieldValue, SearchError};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{Client, Value};
use tracing::{debug, info};

const SCAN_COUNT: usize = 500;
const INDEX_NAMESPACE_PREFIX: &str = "idx:";

/// RediSearch over a single shared multiplexed connection. Concurrent
/// callers clone the connection handle; no client-side locking is done.
#[derive(Clone)]
pub struct RedisStore {
    connection: MultiplexedConnection,
}

impl RedisStore {
    /// Connects eagerly; failure here is the one store error that is fatal
    /// at startup.
    pub async fn connect(url: &str) -> Result<Self, SearchError> {
        let client =
            Client::open(url).map_err(|error| SearchError::StoreUnavailable(error.to_string()))?;
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|error| SearchError::StoreUnavailable(error.to_string()))?;
        info!(url, "connected to redis");
        Ok(Self { connection })
    }

    fn connection(&self) -> MultiplexedConnection {
        self.connection.clone()
    }
}

fn push_attribute(cmd: &mut redis::Cmd, attribute: &Attribute) {
    cmd.arg(&attribute.name);
    match &attribute.kind {
        AttributeKind::Text => {
            cmd.arg("TEXT");
        }
        AttributeKind::Tag => {
            cmd.arg("TAG");
        }
        AttributeKind::Numeric => {
            cmd.arg("NUMERIC");
        }
        AttributeKind::Vector(config) => {
            cmd.arg("VECTOR")
                .arg("HNSW")
                .arg(6)
                .arg("TYPE")
                .arg("FLOAT32")
                .arg("DIM")
                .arg(config.dimension)
                .arg("DISTANCE_METRIC")
                .arg(config.metric.as_str());
        }
    }
    if attribute.sortable && !matches!(attribute.kind, AttributeKind::Vector(_)) {
        cmd.arg("SORTABLE");
    }
}

/// `FT.CREATE idx:<name> ON HASH PREFIX 1 vs:<name>: SCHEMA ...`
pub fn create_command(definition: &IndexDefinition) -> redis::Cmd {
    let mut cmd = redis::cmd("FT.CREATE");
    cmd.arg(index_key(&definition.name))
        .arg("ON")
        .arg("HASH")
        .arg("PREFIX")
        .arg(1)
        .arg(&definition.prefix)
        .arg("SCHEMA");
    for attribute in &definition.attributes {
        push_attribute(&mut cmd, attribute);
    }
    cmd
}

pub fn alter_command(index: &str, attributes: &[Attribute]) -> redis::Cmd {
    let mut cmd = redis::cmd("FT.ALTER");
    cmd.arg(index_key(index)).arg("SCHEMA").arg("ADD");
    for attribute in attributes {
        push_attribute(&mut cmd, attribute);
    }
    cmd
}

pub fn search_command(index: &str, query: &CompiledQuery) -> redis::Cmd {
    let mut cmd = redis::cmd("FT.SEARCH");
    cmd.arg(index_key(index)).arg(query.query_string());

    if !query.return_fields.is_empty() {
        cmd.arg("RETURN").arg(query.return_fields.len());
        for field in &query.return_fields {
            cmd.arg(field);
        }
    }
    if let Some(sort) = &query.sort_by {
        cmd.arg("SORTBY")
            .arg(&sort.field)
            .arg(if sort.ascending { "ASC" } else { "DESC" });
    }

    let params = query.params();
    if !params.is_empty() {
        cmd.arg("PARAMS").arg(params.len() * 2);
        for (name, value) in &params {
            cmd.arg(name).arg(value.as_slice());
        }
    }

    cmd.arg("LIMIT")
        .arg(0)
        .arg(query.limit)
        .arg("DIALECT")
        .arg(QUERY_DIALECT);
    cmd
}

fn bytes_of(value: &Value) -> Option<Vec<u8>> {
    match value {
        Value::BulkString(bytes) => Some(bytes.clone()),
        Value::SimpleString(text) => Some(text.clone().into_bytes()),
        Value::Int(number) => Some(number.to_string().into_bytes()),
        Value::Double(number) => Some(number.to_string().into_bytes()),
        Value::Okay => Some(b"OK".to_vec()),
        Value::VerbatimString { text, .. } => Some(text.clone().into_bytes()),
        _ => None,
    }
}

fn text_of(value: &Value) -> Option<String> {
    bytes_of(value).map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
}

/// Flat `[k1, v1, k2, v2, ...]` arrays and RESP3 maps both decode to pairs.
fn pairs_of(value: &Value) -> Vec<(Value, Value)> {
    match value {
        Value::Array(items) => items
            .chunks_exact(2)
            .map(|pair| (pair[0].clone(), pair[1].clone()))
            .collect(),
        Value::Map(entries) => entries.clone(),
        _ => Vec::new(),
    }
}

fn field_pairs(value: &Value) -> Vec<(String, Vec<u8>)> {
    pairs_of(value)
        .into_iter()
        .filter_map(|(name, raw)| Some((text_of(&name)?, bytes_of(&raw)?)))
        .collect()
}

/// Reply layout: `[total, key1, [fields...], key2, [fields...], ...]`.
pub fn parse_search_reply(reply: &Value) -> Result<Vec<StoredDocument>, SearchError> {
    let Value::Array(items) = reply else {
        return Err(SearchError::BackendResponse {
            backend: "redis".to_string(),
            details: format!("unexpected FT.SEARCH reply: {reply:?}"),
        });
    };

    let mut documents = Vec::new();
    let mut rest = items.iter().skip(1).peekable();
    while let Some(key) = rest.next() {
        let Some(key) = text_of(key) else {
            continue;
        };
        let fields = match rest.peek() {
            Some(Value::Array(_)) | Some(Value::Map(_)) => rest.next().map(field_pairs).unwrap_or_default(),
            _ => Vec::new(),
        };
        documents.push(StoredDocument { key, fields });
    }
    Ok(documents)
}

/// Pulls `attributes` out of an `FT.INFO` reply.
pub fn parse_info_attributes(reply: &Value) -> FieldSet {
    let attributes = pairs_of(reply)
        .into_iter()
        .find(|(name, _)| text_of(name).as_deref() == Some("attributes"))
        .map(|(_, value)| value);

    let Some(Value::Array(attributes)) = attributes else {
        return FieldSet::default();
    };

    attributes.iter().filter_map(parse_attribute).collect()
}

/// Options FT.INFO prints without a value.
const ATTRIBUTE_FLAGS: &[&str] = &[
    "SORTABLE",
    "UNF",
    "NOSTEM",
    "NOINDEX",
    "CASESENSITIVE",
    "WITHSUFFIXTRIE",
    "INDEXEMPTY",
    "INDEXMISSING",
    "PHONETIC",
];

/// Reads one `[key, value, ..., FLAG, ...]` attribute description.
fn parse_attribute(attribute: &Value) -> Option<FieldSchema> {
    let Value::Array(parts) = attribute else {
        return None;
    };

    let mut identifier = None;
    let mut name = None;
    let mut declared = String::new();
    let mut sortable = false;

    let mut position = 0;
    while position < parts.len() {
        let key = text_of(&parts[position]).unwrap_or_default();
        if ATTRIBUTE_FLAGS.iter().any(|flag| key.eq_ignore_ascii_case(flag)) {
            sortable |= key.eq_ignore_ascii_case("SORTABLE");
            position += 1;
            continue;
        }

        let value = parts.get(position + 1).and_then(text_of);
        match key.to_ascii_lowercase().as_str() {
            "identifier" => identifier = value,
            "attribute" => name = value,
            "type" => declared = value.unwrap_or_default(),
            _ => {}
        }
        position += 2;
    }

    Some(FieldSchema {
        name: name.or(identifier)?,
        field_type: FieldType::from_declared(&declared),
        sortable,
    })
}

#[async_trait]
impl SearchStore for RedisStore {
    async fn create_index(&self, definition: &IndexDefinition) -> Result<(), SearchError> {
        let _: Value = create_command(definition)
            .query_async(&mut self.connection())
            .await?;
        info!(index = %definition.name, attributes = definition.attributes.len(), "index created");
        Ok(())
    }

    async fn alter_index(&self, index: &str, attributes: &[Attribute]) -> Result<(), SearchError> {
        let _: Value = alter_command(index, attributes)
            .query_async(&mut self.connection())
            .await?;
        Ok(())
    }

    async fn drop_index(&self, index: &str) -> Result<(), SearchError> {
        let _: Value = redis::cmd("FT.DROPINDEX")
            .arg(index_key(index))
            .query_async(&mut self.connection())
            .await?;
        Ok(())
    }

    async fn list_indexes(&self) -> Result<Vec<String>, SearchError> {
        let names: Vec<String> = redis::cmd("FT._LIST")
            .query_async(&mut self.connection())
            .await?;
        Ok(names
            .into_iter()
            .filter_map(|name| name.strip_prefix(INDEX_NAMESPACE_PREFIX).map(str::to_string))
            .collect())
    }

    async fn index_info(&self, index: &str) -> Result<FieldSet, SearchError> {
        let reply: Value = redis::cmd("FT.INFO")
            .arg(index_key(index))
            .query_async(&mut self.connection())
            .await?;
        Ok(parse_info_attributes(&reply))
    }

    async fn search(
        &self,
        index: &str,
        query: &CompiledQuery,
    ) -> Result<Vec<StoredDocument>, SearchError> {
        debug!(index, query = %query.query_string(), "FT.SEARCH");
        let reply: Value = search_command(index, query)
            .query_async(&mut self.connection())
            .await?;
        parse_search_reply(&reply)
    }

    async fn hash_set(&self, key: &str, fields: &[(String, FieldValue)]) -> Result<(), SearchError> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut cmd = redis::cmd("HSET");
        cmd.arg(key);
        for (name, value) in fields {
            cmd.arg(name).arg(value.to_bytes());
        }
        let _: Value = cmd.query_async(&mut self.connection()).await?;
        Ok(())
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<Vec<u8>>, SearchError> {
        let value: Option<Vec<u8>> = redis::cmd("HGET")
            .arg(key)
            .arg(field)
            .query_async(&mut self.connection())
            .await?;
        Ok(value)
    }

    async fn hash_get_all(&self, key: &str) -> Result<Vec<(String, Vec<u8>)>, SearchError> {
        let reply: Value = redis::cmd("HGETALL")
            .arg(key)
            .query_async(&mut self.connection())
            .await?;
        Ok(field_pairs(&reply))
    }

    async fn delete(&self, key: &str) -> Result<bool, SearchError> {
        let removed: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut self.connection())
            .await?;
        Ok(removed > 0)
    }

    async fn scan(&self, pattern: &str, cursor: u64) -> Result<ScanPage, SearchError> {
        let (cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(SCAN_COUNT)
            .query_async(&mut self.connection())
            .await?;
        Ok(ScanPage { cursor, keys })
    }
}
