use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use surveyengine_core::domain::SessionState;
use uuid::Uuid;

use crate::{CheckpointError, Result};

#[derive(Debug, Clone)]
pub struct CheckpointMeta {
    pub checkpoint_id: String,
    pub created_at: i64,
}

struct CheckpointRecord {
    bytes: Vec<u8>,
    created_at: i64,
}

/// Durable key/value interface over session checkpoints, keyed by
/// `thread_id`. Mirrors the key layout `checkpoint:{thread}:{cid}`,
/// `list:{thread}`, `thread:{thread}` even though this implementation is
/// single-process: no redis/cluster-kv crate appears anywhere in this
/// workspace's dependency stack, so a networked backend is left as a
/// drop-in behind this trait rather than invented here.
#[async_trait::async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn put(&self, thread_id: &str, state: &SessionState) -> Result<String>;
    async fn get_latest(&self, thread_id: &str) -> Result<Option<SessionState>>;
    async fn list(&self, thread_id: &str, before: Option<&str>, limit: Option<usize>) -> Result<Vec<CheckpointMeta>>;
    async fn purge(&self, thread_id: &str) -> Result<usize>;
}

/// `dashmap`-backed implementation. `index` holds the `list:{thread}`
/// sorted index (descending by creation time); `latest` holds the
/// `thread:{thread}.latest` pointer. Both are rebuilt from the
/// `checkpoints` map scan during `purge`, so a crash mid-`put` that left a
/// checkpoint record with no index entry is still caught.
pub struct InMemoryCheckpointStore {
    checkpoints: DashMap<(String, String), CheckpointRecord>,
    index: DashMap<String, Vec<(i64, String)>>,
    latest: DashMap<String, String>,
    ttl_secs: u64,
}

impl InMemoryCheckpointStore {
    pub fn new(ttl_secs: u64) -> Arc<Self> {
        Arc::new(Self {
            checkpoints: DashMap::new(),
            index: DashMap::new(),
            latest: DashMap::new(),
            ttl_secs,
        })
    }

    /// Evict every checkpoint (and its index/latest bookkeeping) older than
    /// `ttl_secs`. Called periodically by [`crate::run_ttl_sweep`].
    pub fn sweep_expired(&self) -> usize {
        let cutoff = Utc::now().timestamp() - self.ttl_secs as i64;
        let stale: Vec<(String, String)> = self
            .checkpoints
            .iter()
            .filter(|entry| entry.value().created_at < cutoff)
            .map(|entry| entry.key().clone())
            .collect();
        let mut removed = 0;
        for key in stale {
            if self.checkpoints.remove(&key).is_some() {
                removed += 1;
            }
        }
        // Threads left with no remaining checkpoints drop their index/latest too.
        let thread_ids: Vec<String> = self.index.iter().map(|e| e.key().clone()).collect();
        for thread_id in thread_ids {
            let has_any = self.checkpoints.iter().any(|e| e.key().0 == thread_id);
            if !has_any {
                self.index.remove(&thread_id);
                self.latest.remove(&thread_id);
            }
        }
        removed
    }
}

#[async_trait::async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn put(&self, thread_id: &str, state: &SessionState) -> Result<String> {
        let bytes = surveyengine_serializer::encode(state)?;
        let checkpoint_id = Uuid::now_v7().to_string();
        let created_at = Utc::now().timestamp();

        self.checkpoints.insert((thread_id.to_string(), checkpoint_id.clone()), CheckpointRecord { bytes, created_at });

        self.index
            .entry(thread_id.to_string())
            .or_default()
            .insert(0, (created_at, checkpoint_id.clone()));
        if let Some(mut entry) = self.index.get_mut(thread_id) {
            entry.sort_by(|a, b| b.0.cmp(&a.0));
        }

        self.latest.insert(thread_id.to_string(), checkpoint_id.clone());

        Ok(checkpoint_id)
    }

    async fn get_latest(&self, thread_id: &str) -> Result<Option<SessionState>> {
        let checkpoint_id = match self.latest.get(thread_id) {
            Some(cid) => cid.clone(),
            None => match self.index.get(thread_id).and_then(|idx| idx.first().map(|(_, cid)| cid.clone())) {
                Some(cid) => cid,
                None => return Ok(None),
            },
        };
        match self.checkpoints.get(&(thread_id.to_string(), checkpoint_id)) {
            Some(record) => Ok(Some(surveyengine_serializer::decode(&record.bytes)?)),
            None => Ok(None),
        }
    }

    async fn list(&self, thread_id: &str, before: Option<&str>, limit: Option<usize>) -> Result<Vec<CheckpointMeta>> {
        let Some(idx) = self.index.get(thread_id) else { return Ok(vec![]) };
        let cutoff_score = before.and_then(|cid| idx.iter().find(|(_, id)| id == cid).map(|(score, _)| *score));

        let mut out: Vec<CheckpointMeta> = idx
            .iter()
            .filter(|(score, _)| match cutoff_score {
                Some(cutoff) => *score < cutoff,
                None => true,
            })
            .map(|(created_at, checkpoint_id)| CheckpointMeta { checkpoint_id: checkpoint_id.clone(), created_at: *created_at })
            .collect();

        if let Some(limit) = limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    async fn purge(&self, thread_id: &str) -> Result<usize> {
        let keys: Vec<(String, String)> = self.checkpoints.iter().map(|e| e.key().clone()).filter(|(t, _)| t == thread_id).collect();
        let mut count = 0;
        for key in keys {
            if self.checkpoints.remove(&key).is_some() {
                count += 1;
            }
        }
        self.index.remove(thread_id);
        self.latest.remove(thread_id);
        Ok(count)
    }
}

impl From<CheckpointError> for surveyengine_core::error::SurveyError {
    fn from(e: CheckpointError) -> Self {
        surveyengine_core::error::SurveyError::Checkpoint(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use surveyengine_core::domain::{Message, NodeLabel};

    fn sample_state(thread_id: &str) -> SessionState {
        SessionState {
            thread_id: thread_id.to_string(),
            messages: vec![Message::human("hi")],
            steps: vec![],
            system_prompt: "sys".into(),
            end_message: "bye".into(),
            max_turns: 3,
            current_step: NodeLabel::QuestionNode(0),
            current_step_messages: vec![],
        }
    }

    #[tokio::test]
    async fn put_then_get_latest_round_trips() {
        let store = InMemoryCheckpointStore::new(3600);
        let state = sample_state("t1");
        store.put("t1", &state).await.unwrap();
        let latest = store.get_latest("t1").await.unwrap().unwrap();
        assert_eq!(latest.thread_id, "t1");
        assert_eq!(latest.messages, state.messages);
    }

    #[tokio::test]
    async fn latest_points_at_most_recent_put() {
        let store = InMemoryCheckpointStore::new(3600);
        let mut state = sample_state("t1");
        store.put("t1", &state).await.unwrap();
        state.messages.push(Message::assistant("second"));
        store.put("t1", &state).await.unwrap();

        let latest = store.get_latest("t1").await.unwrap().unwrap();
        assert_eq!(latest.messages.len(), 2);
    }

    #[tokio::test]
    async fn purge_removes_every_key_for_the_thread() {
        let store = InMemoryCheckpointStore::new(3600);
        let state = sample_state("t1");
        store.put("t1", &state).await.unwrap();
        store.put("t1", &state).await.unwrap();

        let count = store.purge("t1").await.unwrap();
        assert_eq!(count, 2);
        assert!(store.get_latest("t1").await.unwrap().is_none());
        assert!(store.list("t1", None, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn purge_also_removes_an_orphan_checkpoint_with_no_index_entry() {
        let store = InMemoryCheckpointStore::new(3600);
        let state = sample_state("t1");
        store.put("t1", &state).await.unwrap();

        // Simulate a crash mid-write: a checkpoint record exists with no
        // index entry and no latest pointer.
        store.checkpoints.insert(("t1".to_string(), "stale".to_string()), CheckpointRecord { bytes: vec![], created_at: 0 });

        let count = store.purge("t1").await.unwrap();
        assert_eq!(count, 2);
        assert!(!store.checkpoints.iter().any(|e| e.key().0 == "t1"));
    }
}
