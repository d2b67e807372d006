//! Keyed result store plus the wake channel and result stream.
//!
//! Preprocessing outputs land under `{requestId}:{kind}[:{index}]`; a
//! pub/sub notification lets the generation worker wake before its poll
//! interval. Completed generation results are appended to the per-job
//! result stream for downstream delivery.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::debug;

use crate::error::Result;

/// Pending results are kept this long before the grace-period TTL fires.
const RESULT_TTL_SECS: u64 = 3600;
/// Pub/sub channel announcing a freshly written preprocessing result key.
const READY_CHANNEL: &str = "job-events:result-ready";

#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Write a result under `key`, then announce it on the ready channel.
    async fn put(&self, key: &str, value: &serde_json::Value) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>>;

    /// Append a completed generation result to `job-result:<job_id>`.
    async fn append_result_stream(&self, job_id: &str, result: &serde_json::Value) -> Result<()>;
}

pub struct RedisResultStore {
    manager: ConnectionManager,
}

impl RedisResultStore {
    pub fn new(manager: ConnectionManager) -> Self {
        Self { manager }
    }

    fn storage_key(key: &str) -> String {
        format!("result:{key}")
    }
}

#[async_trait]
impl ResultStore for RedisResultStore {
    async fn put(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        let mut conn = self.manager.clone();
        let payload = serde_json::to_string(value)?;
        let _: () = conn
            .set_ex(Self::storage_key(key), payload, RESULT_TTL_SECS)
            .await?;
        let _: i64 = conn.publish(READY_CHANNEL, key).await?;
        debug!(key, "result stored and announced");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let mut conn = self.manager.clone();
        let raw: Option<String> = conn.get(Self::storage_key(key)).await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn append_result_stream(&self, job_id: &str, result: &serde_json::Value) -> Result<()> {
        let mut conn = self.manager.clone();
        let stream = format!("job-result:{job_id}");
        let payload = serde_json::to_string(result)?;
        let _: String = conn
            .xadd(stream, "*", &[("result", payload.as_str())])
            .await?;
        Ok(())
    }
}

/// In-memory store for tests and single-process runs.
pub mod memory {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct InMemoryResultStore {
        entries: Mutex<HashMap<String, serde_json::Value>>,
        streams: Mutex<HashMap<String, Vec<serde_json::Value>>>,
    }

    impl InMemoryResultStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn stream_len(&self, job_id: &str) -> usize {
            self.streams
                .lock()
                .unwrap()
                .get(&format!("job-result:{job_id}"))
                .map(|v| v.len())
                .unwrap_or(0)
        }
    }

    #[async_trait]
    impl ResultStore for InMemoryResultStore {
        async fn put(&self, key: &str, value: &serde_json::Value) -> Result<()> {
            self.entries
                .lock()
                .unwrap()
                .insert(key.to_string(), value.clone());
            Ok(())
        }

        async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
            Ok(self.entries.lock().unwrap().get(key).cloned())
        }

        async fn append_result_stream(
            &self,
            job_id: &str,
            result: &serde_json::Value,
        ) -> Result<()> {
            self.streams
                .lock()
                .unwrap()
                .entry(format!("job-result:{job_id}"))
                .or_default()
                .push(result.clone());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::InMemoryResultStore;
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = InMemoryResultStore::new();
        let value = serde_json::json!({"success": true, "content": "hi"});
        store.put("req-1:audio-transcription:0", &value).await.unwrap();
        let got = store.get("req-1:audio-transcription:0").await.unwrap();
        assert_eq!(got, Some(value));
    }

    #[tokio::test]
    async fn missing_key_is_none() {
        let store = InMemoryResultStore::new();
        assert_eq!(store.get("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn result_stream_appends() {
        let store = InMemoryResultStore::new();
        store
            .append_result_stream("llm-req-1", &serde_json::json!({"success": true}))
            .await
            .unwrap();
        assert_eq!(store.stream_len("llm-req-1"), 1);
    }
}
