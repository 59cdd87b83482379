//! Hugging Face datasets-server client for downloading corpus rows.

use benchforge_shared::{BenchError, HubDatasetConfig, Result};
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument};

use crate::{build_client, endpoint, error_body};

/// Rows requested per page; the server's maximum.
pub const ROWS_PAGE_SIZE: usize = 100;

pub struct HubClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

#[derive(Deserialize)]
struct RowsPage {
    rows: Vec<RowEntry>,
    num_rows_total: usize,
}

#[derive(Deserialize)]
struct RowEntry {
    row_idx: usize,
    row: serde_json::Value,
}

impl HubClient {
    pub fn new(base_url: &str, token: Option<String>, timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout_secs, None)?,
            base_url: base_url.to_string(),
            token,
        })
    }

    /// Fetch every row of a dataset split, up to `limit` rows.
    ///
    /// Rows that do not deserialize into `T` are logged and skipped.
    #[instrument(skip_all, fields(dataset = %source.dataset, split = %source.split))]
    pub async fn fetch_rows<T: DeserializeOwned>(
        &self,
        source: &HubDatasetConfig,
        limit: Option<usize>,
    ) -> Result<Vec<T>> {
        let url = endpoint(&self.base_url, &["rows"])?;
        let cap = limit.unwrap_or(usize::MAX);
        let mut items = Vec::new();
        let mut offset = 0usize;

        while offset < cap {
            let length = ROWS_PAGE_SIZE.min(cap - offset);
            let mut request = self.client.get(url.clone()).query(&[
                ("dataset", source.dataset.as_str()),
                ("config", source.config.as_str()),
                ("split", source.split.as_str()),
                ("offset", offset.to_string().as_str()),
                ("length", length.to_string().as_str()),
            ]);
            if let Some(token) = &self.token {
                request = request.bearer_auth(token);
            }

            let response = request
                .send()
                .await
                .map_err(|e| BenchError::Network(format!("fetch rows: {e}")))?;
            let status = response.status();
            if !status.is_success() {
                let detail = error_body(response).await;
                return Err(BenchError::Network(format!(
                    "fetch rows of {} at offset {offset}: HTTP {status}: {detail}",
                    source.dataset
                )));
            }

            let page: RowsPage = response
                .json()
                .await
                .map_err(|e| BenchError::parse(format!("rows page: {e}")))?;
            let fetched = page.rows.len();
            debug!(offset, fetched, total = page.num_rows_total, "fetched rows page");

            for entry in page.rows {
                match serde_json::from_value::<T>(entry.row) {
                    Ok(item) => items.push(item),
                    Err(e) => debug!(row = entry.row_idx, error = %e, "skipping malformed row"),
                }
            }

            offset += fetched;
            if fetched == 0 || offset >= page.num_rows_total {
                break;
            }
        }

        info!(rows = items.len(), "corpus rows downloaded");
        Ok(items)
    }
}
