//! History store facade

use crate::error::Result;
use crate::request::HistoryRequest;
use crate::topic::{RequestId, TopicType};
use crate::topic_history::{load_topic_history_from_key, TopicHistory};
use chrono::Duration;
use courier_kv::{prefix_successor, Namespace, Storage, StoragePrefix};
use std::sync::Arc;
use tracing::debug;

/// Entry point for the transport layer: cursors and requests over two
/// buckets of one storage.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    topic_db: Namespace,
    request_db: Namespace,
}

impl HistoryStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            topic_db: Namespace::new(storage.clone(), StoragePrefix::TopicHistoryBucket),
            request_db: Namespace::new(storage, StoragePrefix::HistoryRequestBucket),
        }
    }

    /// Stored cursor for `(topic, duration)`, or a never-synced one if
    /// nothing was saved yet
    pub fn get_history(&self, topic: TopicType, duration: Duration) -> Result<TopicHistory> {
        let mut th = self.new_history(topic, duration);
        match th.load() {
            Ok(()) => Ok(th),
            Err(e) if e.is_not_found() => Ok(th),
            Err(e) => Err(e),
        }
    }

    /// Empty request; set its id before saving
    pub fn new_request(&self) -> HistoryRequest {
        HistoryRequest::new(self.request_db.clone(), self.topic_db.clone())
    }

    /// Unsaved cursor bound to this store
    pub fn new_history(&self, topic: TopicType, duration: Duration) -> TopicHistory {
        TopicHistory::new(self.topic_db.clone(), topic, duration)
    }

    /// Load a saved request. An unknown id is an error.
    pub fn get_request(&self, id: RequestId) -> Result<HistoryRequest> {
        let mut req = self.new_request();
        req.id = id;
        req.load()?;
        Ok(req)
    }

    /// Every saved request, in id order. Any undecodable row fails the scan.
    pub fn get_all_requests(&self) -> Result<Vec<HistoryRequest>> {
        let mut requests = Vec::new();
        for (_, raw) in self.request_db.iter()? {
            let mut req = self.new_request();
            req.raw_unmarshal(&raw)?;
            requests.push(req);
        }
        debug!("Loaded {} history requests", requests.len());
        Ok(requests)
    }

    /// Every cursor stored for `topic`, across all durations
    pub fn get_histories_by_topic(&self, topic: TopicType) -> Result<Vec<TopicHistory>> {
        let upper = prefix_successor(topic.as_bytes());
        self.topic_db
            .range(Some(topic.as_bytes()), upper.as_deref())?
            .map(|(key, _)| load_topic_history_from_key(&self.topic_db, &key))
            .collect()
    }
}
