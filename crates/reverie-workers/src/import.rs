//! Shapes-import jobs: long-running external imports riding the same
//! queue and lifecycle as every other job kind.

use serde::{Deserialize, Serialize};
use tracing::info;

use reverie_core::retry::{with_retry, RetryPolicy};

/// Payload of a shapes-import job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportJobData {
    pub request_id: String,
    /// Endpoint serving the exported bundle as a JSON array.
    pub source_url: String,
    pub personality_slug: String,
}

/// Result written to the keyed store on completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportSummary {
    pub success: bool,
    pub records_imported: usize,
    #[serde(default)]
    pub error: Option<String>,
}

pub struct ImportProcessor {
    client: reqwest::Client,
}

impl ImportProcessor {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Fetch the export bundle and count its records. The fetch is retried
    /// with the shared policy before the job is failed.
    pub async fn process(&self, data: &ImportJobData) -> ImportSummary {
        let fetched = with_retry("shapes-import-fetch", RetryPolicy::default(), || async {
            let resp = self
                .client
                .get(&data.source_url)
                .send()
                .await
                .map_err(|e| e.to_string())?;
            if !resp.status().is_success() {
                return Err(format!("import source returned {}", resp.status().as_u16()));
            }
            resp.json::<serde_json::Value>()
                .await
                .map_err(|e| e.to_string())
        })
        .await;

        match fetched {
            Ok(value) => {
                let records = value.as_array().map(|a| a.len()).unwrap_or(0);
                info!(
                    request_id = %data.request_id,
                    personality = %data.personality_slug,
                    records,
                    "shapes import fetched"
                );
                ImportSummary {
                    success: true,
                    records_imported: records,
                    error: None,
                }
            }
            Err(e) => ImportSummary {
                success: false,
                records_imported: 0,
                error: Some(e),
            },
        }
    }
}

impl Default for ImportProcessor {
    fn default() -> Self {
        Self::new()
    }
}
