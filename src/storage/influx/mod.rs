pub mod schema;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};
use url::Url;

use crate::models::common::{BlockMetrics, Config};
use crate::storage::MetricStore;
use crate::utils::hex::{parse_hash, Hash};

use self::schema::{delete_statements, encode_batch, last_hash_query};

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatementResult {
    #[serde(default)]
    series: Vec<Series>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Series {
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

/// InfluxDB 1.x over its HTTP API.
#[derive(Debug, Clone)]
pub struct InfluxStore {
    client: Client,
    base_url: Url,
    database: String,
    user: String,
    pass: String,
}

impl InfluxStore {
    pub fn new(config: &Config) -> Result<Self> {
        let base_url = Url::parse(&config.influx_url())
            .with_context(|| format!("invalid influx url {}", config.influx_url()))?;

        Ok(Self {
            client: Client::new(),
            base_url,
            database: config.influx_database_name.clone(),
            user: config.influx_user.clone(),
            pass: config.influx_pass.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("invalid influx endpoint {}", path))
    }

    /// Create the database if it does not exist yet. `CREATE DATABASE` is a
    /// no-op for an existing database.
    pub async fn ensure_database(&self) -> Result<()> {
        let statement = format!("CREATE DATABASE \"{}\"", self.database);
        self.query(&statement, false).await?;
        info!("Influx database '{}' is ready", self.database);
        Ok(())
    }

    async fn query(&self, statement: &str, read_only: bool) -> Result<QueryResponse> {
        let url = self.endpoint("query")?;
        let request = if read_only {
            self.client.get(url)
        } else {
            self.client.post(url)
        };

        let response = request
            .basic_auth(&self.user, Some(&self.pass))
            .query(&[("db", self.database.as_str()), ("q", statement)])
            .send()
            .await
            .with_context(|| format!("influx query failed: {}", statement))?;

        let response = check_status(response, statement).await?;
        let body: QueryResponse = response
            .json()
            .await
            .with_context(|| format!("unreadable influx response for: {}", statement))?;

        if let Some(error) = body.error.as_ref() {
            return Err(anyhow!("influx rejected '{}': {}", statement, error));
        }
        if let Some(error) = body.results.iter().find_map(|r| r.error.as_ref()) {
            return Err(anyhow!("influx rejected '{}': {}", statement, error));
        }
        Ok(body)
    }
}

async fn check_status(response: Response, context: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(anyhow!("influx returned {} for {}: {}", status, context, body))
}

/// Pull the hash out of a `SELECT last("hash")` result: the first row's
/// `last` column.
fn extract_last_hash(response: &QueryResponse) -> Result<Option<Hash>> {
    let Some(series) = response.results.iter().flat_map(|r| r.series.iter()).next() else {
        return Ok(None);
    };

    let column = series
        .columns
        .iter()
        .position(|c| c == "last")
        .unwrap_or(1);

    match series.values.first().and_then(|row| row.get(column)) {
        Some(Value::String(raw)) => parse_hash(raw)
            .map(Some)
            .with_context(|| format!("stored block hash {:?} is not a hash", raw)),
        Some(Value::Null) | None => Ok(None),
        Some(other) => Err(anyhow!("unexpected stored block hash {}", other)),
    }
}

#[async_trait]
impl MetricStore for InfluxStore {
    async fn write_block(&self, metrics: &BlockMetrics) -> Result<()> {
        let mut url = self.endpoint("write")?;
        url.query_pairs_mut()
            .append_pair("db", &self.database)
            .append_pair("precision", "s");

        let body = encode_batch(metrics);
        let response = self
            .client
            .post(url)
            .basic_auth(&self.user, Some(&self.pass))
            .body(body)
            .send()
            .await
            .with_context(|| format!("influx write of block {} failed", metrics.block.number))?;
        check_status(response, "write").await?;

        debug!(
            "Wrote block {} with {} transaction rows",
            metrics.block.number,
            metrics.transactions.len()
        );
        Ok(())
    }

    async fn purge_block(&self, timestamp: DateTime<Utc>) -> Result<()> {
        for statement in delete_statements(timestamp) {
            self.query(&statement, false).await?;
        }
        Ok(())
    }

    async fn last_block_hash(&self) -> Result<Option<Hash>> {
        let response = self.query(&last_hash_query(), true).await?;
        extract_last_hash(&response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::rpc::parse_block;
    use crate::indexer::transformations::BlockTransformer;
    use crate::test_utils::chain_block;
    use serde_json::json;
    use wiremock::matchers::{basic_auth, body_string, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn parse(body: &str) -> QueryResponse {
        serde_json::from_str(body).unwrap()
    }

    #[test]
    fn test_extract_last_hash() {
        let hash = "ab".repeat(32);
        let response = parse(&format!(
            r#"{{"results":[{{"statement_id":0,"series":[{{"name":"block","columns":["time","last"],"values":[["2023-11-14T22:14:44Z","{hash}"]]}}]}}]}}"#
        ));

        assert_eq!(
            extract_last_hash(&response).unwrap(),
            Some(parse_hash(&hash).unwrap())
        );
    }

    #[test]
    fn test_empty_database_has_no_last_hash() {
        let response = parse(r#"{"results":[{"statement_id":0}]}"#);
        assert_eq!(extract_last_hash(&response).unwrap(), None);
    }

    #[test]
    fn test_corrupt_last_hash_is_an_error() {
        let response = parse(
            r#"{"results":[{"statement_id":0,"series":[{"name":"block","columns":["time","last"],"values":[["2023-11-14T22:14:44Z","xyz"]]}]}]}"#,
        );
        assert!(extract_last_hash(&response).is_err());
    }

    #[test]
    fn test_store_urls() {
        let config = crate::test_utils::config();
        let store = InfluxStore::new(&config).unwrap();
        assert_eq!(
            store.endpoint("write").unwrap().as_str(),
            "http://localhost:8086/write"
        );
    }

    fn store_for(server: &MockServer) -> InfluxStore {
        let mut config = crate::test_utils::config();
        config.influx_host = server.address().ip().to_string();
        config.influx_port = server.address().port();
        InfluxStore::new(&config).unwrap()
    }

    fn metrics(number: u64) -> BlockMetrics {
        BlockMetrics {
            block: parse_block(&chain_block(number, 0))
                .unwrap()
                .transform_block(None),
            transactions: Vec::new(),
        }
    }

    fn ok_results() -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({"results": [{"statement_id": 0}]}))
    }

    #[tokio::test]
    async fn test_write_posts_line_protocol() {
        let server = MockServer::start().await;
        let metrics = metrics(5);

        Mock::given(method("POST"))
            .and(path("/write"))
            .and(query_param("db", "Ethereum"))
            .and(query_param("precision", "s"))
            .and(basic_auth("user", "password"))
            .and(body_string(encode_batch(&metrics)))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        store_for(&server).write_block(&metrics).await.unwrap();
    }

    #[tokio::test]
    async fn test_purge_deletes_both_measurements() {
        let server = MockServer::start().await;
        let metrics = metrics(5);
        let [blocks, transactions] = delete_statements(metrics.block.timestamp);

        for statement in [blocks, transactions] {
            Mock::given(method("POST"))
                .and(path("/query"))
                .and(query_param("db", "Ethereum"))
                .and(query_param("q", statement.as_str()))
                .respond_with(ok_results())
                .expect(1)
                .mount(&server)
                .await;
        }

        store_for(&server)
            .purge_block(metrics.block.timestamp)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_last_block_hash_reads_with_get() {
        let server = MockServer::start().await;
        let hash = "cd".repeat(32);

        Mock::given(method("GET"))
            .and(path("/query"))
            .and(query_param("q", last_hash_query().as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{
                    "statement_id": 0,
                    "series": [{
                        "name": "block",
                        "columns": ["time", "last"],
                        "values": [["2023-11-14T22:14:44Z", hash.as_str()]]
                    }]
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        assert_eq!(
            store_for(&server).last_block_hash().await.unwrap(),
            Some(parse_hash(&hash).unwrap())
        );
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/write"))
            .respond_with(ResponseTemplate::new(500).set_body_string("engine down"))
            .mount(&server)
            .await;

        let err = store_for(&server).write_block(&metrics(5)).await.unwrap_err();
        let message = format!("{:#}", err);
        assert!(message.contains("500"), "{message}");
        assert!(message.contains("engine down"), "{message}");
    }

    #[tokio::test]
    async fn test_statement_error_is_reported() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/query"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{"statement_id": 0, "error": "database not found: Ethereum"}]
            })))
            .mount(&server)
            .await;

        let err = store_for(&server)
            .purge_block(metrics(5).block.timestamp)
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("database not found"));
    }

    #[tokio::test]
    async fn test_request_error_is_reported() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/query"))
            .and(query_param("q", "CREATE DATABASE \"Ethereum\""))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"error": "authorization failed"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let err = store_for(&server).ensure_database().await.unwrap_err();
        assert!(format!("{:#}", err).contains("authorization failed"));
    }
}
