//! Outstanding mailserver history requests

use crate::error::Result;
use crate::topic::{RequestId, REQUEST_ID_LENGTH};
use crate::topic_history::{load_topic_history_from_key, TopicHistory};
use courier_kv::{Namespace, Transaction};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Serialize, Deserialize)]
struct HistoryRequestRecord {
    id: [u8; REQUEST_ID_LENGTH],
    topic_history_keys: Vec<Vec<u8>>,
}

/// A batch of topic cursors requested from a mailserver under one id
#[derive(Debug, Clone)]
pub struct HistoryRequest {
    request_db: Namespace,
    topic_db: Namespace,
    pub id: RequestId,
    histories: Vec<TopicHistory>,
}

impl HistoryRequest {
    pub fn new(request_db: Namespace, topic_db: Namespace) -> Self {
        Self {
            request_db,
            topic_db,
            id: RequestId::default(),
            histories: Vec::new(),
        }
    }

    /// Append a copy of `th`. Nothing is persisted until [`save`](Self::save).
    pub fn add_history(&mut self, th: TopicHistory) {
        self.histories.push(th);
    }

    pub fn histories(&self) -> &[TopicHistory] {
        &self.histories
    }

    /// True if any entry tracks the same topic as `th`, whatever its range
    pub fn includes(&self, th: &TopicHistory) -> bool {
        self.histories.iter().any(|h| h.topic == th.topic)
    }

    pub fn key(&self) -> &[u8] {
        self.id.as_bytes()
    }

    fn value(&self) -> Result<Vec<u8>> {
        let record = HistoryRequestRecord {
            id: self.id.0,
            topic_history_keys: self.histories.iter().map(TopicHistory::key).collect(),
        };
        Ok(bincode::serialize(&record)?)
    }

    /// Persist every cursor and then the request row.
    ///
    /// Cursors living in the request's storage share one write batch with
    /// the row. A cursor from any other storage is saved there first.
    pub fn save(&self) -> Result<()> {
        let mut tx = Transaction::new(self.request_db.storage().clone());
        for th in &self.histories {
            if th.namespace().shares_storage(&self.request_db) {
                th.stage(&mut tx)?;
            } else {
                th.save()?;
            }
        }
        tx.put(&self.request_db.absolute_key(self.key()), &self.value()?);
        tx.commit()?;

        debug!(
            "Saved history request {} with {} topics",
            self.id,
            self.histories.len()
        );
        Ok(())
    }

    /// Reload the cursor list of the request stored under `id`
    pub fn load(&mut self) -> Result<()> {
        let raw = self.request_db.get(self.key())?;
        self.raw_unmarshal(&raw)
    }

    /// Like [`load`](Self::load) for a row the caller already read; the id
    /// is taken from `raw`.
    pub fn raw_unmarshal(&mut self, raw: &[u8]) -> Result<()> {
        let record: HistoryRequestRecord = bincode::deserialize(raw)?;

        let histories = record
            .topic_history_keys
            .iter()
            .map(|key| load_topic_history_from_key(&self.topic_db, key))
            .collect::<Result<Vec<_>>>()?;

        self.id = RequestId(record.id);
        self.histories = histories;
        Ok(())
    }

    /// Remove the request row. Its cursors are kept.
    pub fn delete(&self) -> Result<()> {
        self.request_db.delete(self.key())?;
        Ok(())
    }
}
