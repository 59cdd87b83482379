//! Langfuse public API client implementing [`DatasetStore`].
//!
//! Item inserts are buffered client-side and sent once `flush_at` items
//! are pending, or on [`DatasetStore::flush`]. Every item is posted on its
//! own; rejections are logged and tallied into the next [`FlushReport`].

use std::path::Path;

use benchforge_shared::{
    BenchError, BenchmarkRecord, DatasetStore, DatasetStoreConfig, FlushReport, RemoteDataset,
    Result,
};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{build_client, endpoint, error_body};

/// Resolved credentials for a Langfuse project.
#[derive(Debug, Clone)]
pub struct LangfuseCredentials {
    pub host: String,
    pub public_key: String,
    pub secret_key: String,
}

pub struct LangfuseClient {
    client: Client,
    credentials: LangfuseCredentials,
    flush_at: usize,
    outbox: Mutex<Outbox>,
}

/// Items waiting to be posted, plus deliveries since the last flush.
#[derive(Default)]
struct Outbox {
    items: Vec<ItemBody>,
    report: FlushReport,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ItemBody {
    dataset_name: String,
    input: serde_json::Value,
    expected_output: String,
    metadata: serde_json::Value,
}

#[derive(Serialize)]
struct CreateDatasetBody<'a> {
    name: &'a str,
}

#[derive(Deserialize)]
struct DatasetResponse {
    name: String,
}

#[derive(Deserialize)]
struct ItemsPage {
    meta: PageMeta,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageMeta {
    total_items: usize,
}

impl LangfuseClient {
    pub fn from_config(
        config: &DatasetStoreConfig,
        credentials: LangfuseCredentials,
        ca_bundle: Option<&Path>,
    ) -> Result<Self> {
        Ok(Self {
            client: build_client(config.timeout_secs, ca_bundle)?,
            credentials,
            flush_at: config.flush_at.max(1),
            outbox: Mutex::new(Outbox::default()),
        })
    }

    fn url(&self, segments: &[&str]) -> Result<url::Url> {
        endpoint(&self.credentials.host, segments)
    }

    fn authed(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request.basic_auth(
            &self.credentials.public_key,
            Some(&self.credentials.secret_key),
        )
    }

    async fn count_items(&self, name: &str) -> Result<usize> {
        let url = self.url(&["api", "public", "dataset-items"])?;
        let response = self
            .authed(self.client.get(url))
            .query(&[("datasetName", name), ("limit", "1")])
            .send()
            .await
            .map_err(|e| BenchError::Network(format!("list dataset items: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = error_body(response).await;
            return Err(BenchError::Storage(format!(
                "list items of '{name}': HTTP {status}: {detail}"
            )));
        }
        let page: ItemsPage = response
            .json()
            .await
            .map_err(|e| BenchError::parse(format!("dataset items page: {e}")))?;
        Ok(page.meta.total_items)
    }

    async fn post_item(&self, item: &ItemBody) -> Result<()> {
        let url = self.url(&["api", "public", "dataset-items"])?;
        let response = self
            .authed(self.client.post(url))
            .json(item)
            .send()
            .await
            .map_err(|e| BenchError::Network(format!("create dataset item: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = error_body(response).await;
            return Err(BenchError::Storage(format!("HTTP {status}: {detail}")));
        }
        Ok(())
    }

    /// Post every pending item, one request each, and tally the outcome.
    async fn drain(&self) {
        let batch = std::mem::take(&mut self.outbox.lock().await.items);
        if batch.is_empty() {
            return;
        }

        let mut delivered = 0usize;
        let mut rejected = 0usize;
        for item in &batch {
            match self.post_item(item).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    rejected += 1;
                    warn!(dataset = %item.dataset_name, error = %e, "dataset item rejected");
                }
            }
        }
        debug!(total = batch.len(), rejected, "drained dataset item buffer");

        let mut outbox = self.outbox.lock().await;
        outbox.report.delivered += delivered;
        outbox.report.rejected += rejected;
    }
}

impl DatasetStore for LangfuseClient {
    async fn get_dataset(&self, name: &str) -> Result<Option<RemoteDataset>> {
        let url = self.url(&["api", "public", "v2", "datasets", name])?;
        let response = self
            .authed(self.client.get(url))
            .send()
            .await
            .map_err(|e| BenchError::Network(format!("get dataset: {e}")))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let detail = error_body(response).await;
            return Err(BenchError::Storage(format!(
                "get dataset '{name}': HTTP {status}: {detail}"
            )));
        }

        let dataset: DatasetResponse = response
            .json()
            .await
            .map_err(|e| BenchError::parse(format!("dataset response: {e}")))?;
        let item_count = self.count_items(&dataset.name).await?;

        Ok(Some(RemoteDataset {
            name: dataset.name,
            item_count,
        }))
    }

    async fn create_dataset(&self, name: &str) -> Result<()> {
        let url = self.url(&["api", "public", "v2", "datasets"])?;
        let response = self
            .authed(self.client.post(url))
            .json(&CreateDatasetBody { name })
            .send()
            .await
            .map_err(|e| BenchError::Network(format!("create dataset: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = error_body(response).await;
            return Err(BenchError::Storage(format!(
                "create dataset '{name}': HTTP {status}: {detail}"
            )));
        }
        info!(dataset = %name, "dataset created");
        Ok(())
    }

    async fn create_dataset_item(&self, dataset_name: &str, record: &BenchmarkRecord) -> Result<()> {
        let item = ItemBody {
            dataset_name: dataset_name.to_string(),
            input: serde_json::to_value(&record.input)
                .map_err(|e| BenchError::parse(e.to_string()))?,
            expected_output: record.expected_output.clone(),
            metadata: serde_json::to_value(&record.metadata)
                .map_err(|e| BenchError::parse(e.to_string()))?,
        };

        let should_drain = {
            let mut outbox = self.outbox.lock().await;
            outbox.items.push(item);
            outbox.items.len() >= self.flush_at
        };
        if should_drain {
            self.drain().await;
        }
        Ok(())
    }

    async fn flush(&self) -> Result<FlushReport> {
        self.drain().await;
        let report = std::mem::take(&mut self.outbox.lock().await.report);
        info!(
            delivered = report.delivered,
            rejected = report.rejected,
            "dataset items flushed"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use benchforge_core::assembler::write_benchmark;
    use benchforge_core::pipeline::SilentProgress;
    use benchforge_core::uploader::{UploadOutcome, upload};
    use benchforge_shared::{BenchmarkFile, ExpectedBehavior, RecordInput, RecordMetadata};
    use wiremock::matchers::{basic_auth, body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer, flush_at: usize) -> LangfuseClient {
        let config = DatasetStoreConfig {
            flush_at,
            ..DatasetStoreConfig::default()
        };
        let credentials = LangfuseCredentials {
            host: server.uri(),
            public_key: "pk-lf-test".into(),
            secret_key: "sk-lf-test".into(),
        };
        LangfuseClient::from_config(&config, credentials, None).unwrap()
    }

    fn record(question: &str) -> BenchmarkRecord {
        BenchmarkRecord {
            input: RecordInput {
                question: question.into(),
            },
            expected_output: "42".into(),
            metadata: RecordMetadata {
                level: None,
                capability: None,
                distance: None,
                operation_type: Some("division".into()),
                max_number_detected: Some(8400.0),
                node_validation: None,
                expected_behavior: ExpectedBehavior {
                    golden_answer: "42".into(),
                    tone: Some("professional and precise".into()),
                },
                extra: serde_json::Map::new(),
            },
        }
    }

    async fn item_posts(server: &MockServer) -> usize {
        server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path() == "/api/public/dataset-items" && r.method.as_str() == "POST")
            .count()
    }

    #[tokio::test]
    async fn get_dataset_reads_item_count() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/public/v2/datasets/GSM8K-Math-Benchmark-v1"))
            .and(basic_auth("pk-lf-test", "sk-lf-test"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"name": "GSM8K-Math-Benchmark-v1"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/public/dataset-items"))
            .and(query_param("datasetName", "GSM8K-Math-Benchmark-v1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{}],
                "meta": {"page": 1, "limit": 1, "totalItems": 37, "totalPages": 37}
            })))
            .mount(&server)
            .await;

        let dataset = client_for(&server, 15)
            .get_dataset("GSM8K-Math-Benchmark-v1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(dataset.item_count, 37);
    }

    #[tokio::test]
    async fn missing_dataset_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        assert!(client_for(&server, 15).get_dataset("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn create_dataset_posts_name() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/public/v2/datasets"))
            .and(body_partial_json(serde_json::json!({"name": "bench-v1"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"name": "bench-v1"})))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server, 15).create_dataset("bench-v1").await.unwrap();
    }

    #[tokio::test]
    async fn items_buffer_until_flush() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/public/dataset-items"))
            .and(body_partial_json(serde_json::json!({
                "datasetName": "bench-v1",
                "expectedOutput": "42",
                "metadata": {"operation_type": "division"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "x"})))
            .mount(&server)
            .await;

        let client = client_for(&server, 3);
        client.create_dataset_item("bench-v1", &record("a")).await.unwrap();
        client.create_dataset_item("bench-v1", &record("b")).await.unwrap();
        assert_eq!(item_posts(&server).await, 0);

        // Third insert reaches flush_at and drains the buffer.
        client.create_dataset_item("bench-v1", &record("c")).await.unwrap();
        assert_eq!(item_posts(&server).await, 3);

        client.create_dataset_item("bench-v1", &record("d")).await.unwrap();
        let report = client.flush().await.unwrap();
        assert_eq!(item_posts(&server).await, 4);
        assert_eq!(
            report,
            FlushReport {
                delivered: 4,
                rejected: 0
            }
        );
    }

    #[tokio::test]
    async fn rejected_items_are_counted_per_item() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/public/dataset-items"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let client = client_for(&server, 2);
        for question in ["a", "b", "c"] {
            client.create_dataset_item("bench-v1", &record(question)).await.unwrap();
        }
        let report = client.flush().await.unwrap();
        assert_eq!(
            report,
            FlushReport {
                delivered: 0,
                rejected: 3
            }
        );

        // Counters reset after each flush.
        assert_eq!(client.flush().await.unwrap(), FlushReport::default());
    }

    // -----------------------------------------------------------------------
    // Full uploads through the client
    // -----------------------------------------------------------------------

    fn benchmark_file(records: usize) -> std::path::PathBuf {
        write_records((0..records).map(|i| record(&format!("q{i}"))).collect())
    }

    fn write_records(records: Vec<BenchmarkRecord>) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("bf-langfuse-test-{}", uuid::Uuid::now_v7()));
        let target = dir.join("bench.json");
        write_benchmark(&target, &BenchmarkFile::Flat(records)).unwrap();
        target
    }

    async fn mount_empty_dataset(server: &MockServer, name: &str) {
        Mock::given(method("GET"))
            .and(path(format!("/api/public/v2/datasets/{name}")))
            .respond_with(ResponseTemplate::new(404))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/public/v2/datasets"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"name": name})))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn upload_counts_every_rejected_item() {
        let server = MockServer::start().await;
        mount_empty_dataset(&server, "bench-v1").await;
        Mock::given(method("POST"))
            .and(path("/api/public/dataset-items"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        // Both a flush_at drain and the final flush see rejections.
        let file = benchmark_file(16);
        let client = client_for(&server, 15);
        let outcome = upload(&client, &file, "bench-v1", &SilentProgress).await.unwrap();
        assert_eq!(
            outcome,
            UploadOutcome::Uploaded {
                inserted: 0,
                failed: 16
            }
        );
        assert_eq!(item_posts(&server).await, 16);
    }

    #[tokio::test]
    async fn upload_splits_accepted_and_rejected() {
        let server = MockServer::start().await;
        mount_empty_dataset(&server, "bench-v1").await;
        Mock::given(method("POST"))
            .and(path("/api/public/dataset-items"))
            .and(body_partial_json(serde_json::json!({"input": {"question": "q1"}})))
            .respond_with(ResponseTemplate::new(422).set_body_string("bad item"))
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/public/dataset-items"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "x"})))
            .mount(&server)
            .await;

        let file = benchmark_file(5);
        let client = client_for(&server, 2);
        let outcome = upload(&client, &file, "bench-v1", &SilentProgress).await.unwrap();
        assert_eq!(
            outcome,
            UploadOutcome::Uploaded {
                inserted: 4,
                failed: 1
            }
        );
    }

    #[tokio::test]
    async fn upload_forwards_unmodeled_metadata() {
        let server = MockServer::start().await;
        mount_empty_dataset(&server, "bench-v1").await;
        Mock::given(method("POST"))
            .and(path("/api/public/dataset-items"))
            .and(body_partial_json(serde_json::json!({
                "metadata": {"operation_type": "division", "source_split": "validation"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "x"})))
            .expect(1)
            .mount(&server)
            .await;

        let mut tagged = record("q0");
        tagged
            .metadata
            .extra
            .insert("source_split".into(), serde_json::json!("validation"));
        let file = write_records(vec![tagged]);
        let outcome = upload(&client_for(&server, 15), &file, "bench-v1", &SilentProgress)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            UploadOutcome::Uploaded {
                inserted: 1,
                failed: 0
            }
        );
    }

    #[tokio::test]
    async fn upload_skips_populated_dataset() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/public/v2/datasets/bench-v1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"name": "bench-v1"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/public/dataset-items"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{}],
                "meta": {"page": 1, "limit": 1, "totalItems": 5, "totalPages": 5}
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let file = benchmark_file(3);
        let outcome = upload(&client_for(&server, 15), &file, "bench-v1", &SilentProgress)
            .await
            .unwrap();
        assert_eq!(outcome, UploadOutcome::Skipped { existing_items: 5 });
    }
}
