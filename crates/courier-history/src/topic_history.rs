//! Per-(topic, duration) sync cursors

use crate::error::{HistoryError, Result};
use crate::topic::{TopicType, TOPIC_LENGTH};
use chrono::{DateTime, Duration, Utc};
use courier_kv::{Namespace, Transaction};
use serde::{Deserialize, Serialize};

/// Width of an encoded duration inside keys
pub const DURATION_LENGTH: usize = 8;

/// Width of a topic history key: `topic || duration`
pub const TOPIC_HISTORY_KEY_LENGTH: usize = TOPIC_LENGTH + DURATION_LENGTH;

/// Persisted row. The topic lives only in the key.
#[derive(Debug, Serialize, Deserialize)]
struct TopicHistoryRecord {
    duration_nanos: i64,
    current_unix_secs: Option<i64>,
}

/// Nanoseconds of `duration`, saturating at the i64 range
fn duration_nanos(duration: Duration) -> i64 {
    duration.num_nanoseconds().unwrap_or(if duration < Duration::zero() {
        i64::MIN
    } else {
        i64::MAX
    })
}

/// Big-endian two's complement nanoseconds
pub fn encode_duration(duration: Duration) -> [u8; DURATION_LENGTH] {
    duration_nanos(duration).to_be_bytes()
}

pub fn decode_duration(bytes: [u8; DURATION_LENGTH]) -> Duration {
    Duration::nanoseconds(i64::from_be_bytes(bytes))
}

/// How far back a topic has been synced from mailservers.
///
/// `current` is `None` until the first successful sync. It is stored with
/// one-second resolution.
#[derive(Debug, Clone)]
pub struct TopicHistory {
    db: Namespace,
    pub topic: TopicType,
    pub duration: Duration,
    pub current: Option<DateTime<Utc>>,
}

impl TopicHistory {
    /// Unsaved cursor that has never been synced
    pub fn new(db: Namespace, topic: TopicType, duration: Duration) -> Self {
        Self {
            db,
            topic,
            duration,
            current: None,
        }
    }

    pub(crate) fn namespace(&self) -> &Namespace {
        &self.db
    }

    pub fn key(&self) -> Vec<u8> {
        let mut key = Vec::with_capacity(TOPIC_HISTORY_KEY_LENGTH);
        key.extend_from_slice(self.topic.as_bytes());
        key.extend_from_slice(&encode_duration(self.duration));
        key
    }

    fn value(&self) -> Result<Vec<u8>> {
        let record = TopicHistoryRecord {
            duration_nanos: duration_nanos(self.duration),
            current_unix_secs: self.current.map(|t| t.timestamp()),
        };
        Ok(bincode::serialize(&record)?)
    }

    pub fn save(&self) -> Result<()> {
        self.db.put(&self.key(), &self.value()?)?;
        Ok(())
    }

    /// Buffer this row into `tx` instead of writing it directly
    pub(crate) fn stage(&self, tx: &mut Transaction) -> Result<()> {
        tx.put(&self.db.absolute_key(&self.key()), &self.value()?);
        Ok(())
    }

    /// Refresh `duration` and `current` from storage; an absent row is
    /// reported as not found.
    pub fn load(&mut self) -> Result<()> {
        let raw = self.db.get(&self.key())?;
        let record: TopicHistoryRecord = bincode::deserialize(&raw)?;

        self.duration = Duration::nanoseconds(record.duration_nanos);
        self.current = match record.current_unix_secs {
            Some(secs) => Some(
                DateTime::<Utc>::from_timestamp(secs, 0)
                    .ok_or(HistoryError::InvalidTimestamp(secs))?,
            ),
            None => None,
        };
        Ok(())
    }

    pub fn delete(&self) -> Result<()> {
        self.db.delete(&self.key())?;
        Ok(())
    }

    /// Whether a sync point has ever been recorded
    pub fn is_synced(&self) -> bool {
        self.current.is_some()
    }

    /// Two never-synced cursors cover the same range when their durations
    /// match; otherwise the sync points must be identical.
    pub fn same_range(&self, other: &TopicHistory) -> bool {
        match (self.current, other.current) {
            (None, None) => self.duration == other.duration,
            (a, b) => a == b,
        }
    }
}

/// Hydrate the cursor stored under `key` (as produced by [`TopicHistory::key`])
pub fn load_topic_history_from_key(db: &Namespace, key: &[u8]) -> Result<TopicHistory> {
    if key.len() != TOPIC_HISTORY_KEY_LENGTH {
        return Err(HistoryError::InvalidKey {
            expected: TOPIC_HISTORY_KEY_LENGTH,
            actual: key.len(),
        });
    }

    let topic = TopicType::from_slice(&key[..TOPIC_LENGTH])?;
    let mut duration = [0u8; DURATION_LENGTH];
    duration.copy_from_slice(&key[TOPIC_LENGTH..]);

    let mut th = TopicHistory::new(db.clone(), topic, decode_duration(duration));
    th.load()?;
    Ok(th)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use courier_kv::{MemoryStorage, StoragePrefix};
    use std::sync::Arc;

    fn namespace() -> Namespace {
        Namespace::new(Arc::new(MemoryStorage::new()), StoragePrefix::TopicHistoryBucket)
    }

    fn with_current(
        db: &Namespace,
        duration: Duration,
        current: Option<DateTime<Utc>>,
    ) -> TopicHistory {
        let mut th = TopicHistory::new(db.clone(), TopicType([1, 0, 0, 0]), duration);
        th.current = current;
        th
    }

    #[test]
    fn test_key_layout() {
        let th = with_current(&namespace(), Duration::nanoseconds(0x0102), None);
        assert_eq!(th.key(), vec![1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1, 2]);
    }

    #[test]
    fn test_duration_encoding_saturates() {
        assert_eq!(encode_duration(Duration::nanoseconds(-1)), [0xFF; 8]);
        assert_eq!(
            encode_duration(Duration::seconds(i64::MAX / 1_000)),
            i64::MAX.to_be_bytes()
        );
        assert_eq!(
            encode_duration(Duration::seconds(i64::MIN / 1_000)),
            i64::MIN.to_be_bytes()
        );
        assert_eq!(decode_duration(encode_duration(Duration::hours(1))), Duration::hours(1));
    }

    #[test]
    fn test_save_load_truncates_to_seconds() {
        let db = namespace();
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap() + Duration::milliseconds(750);
        with_current(&db, Duration::hours(1), Some(t)).save().unwrap();

        let mut loaded = with_current(&db, Duration::hours(1), None);
        loaded.load().unwrap();
        let current = loaded.current.unwrap();
        assert_eq!(current.timestamp(), t.timestamp());
        assert!(t - current < Duration::seconds(1));
    }

    #[test]
    fn test_load_missing_is_not_found() {
        let mut th = with_current(&namespace(), Duration::minutes(1), None);
        assert!(th.load().unwrap_err().is_not_found());
    }

    #[test]
    fn test_load_from_key() {
        let db = namespace();
        let th = with_current(&db, Duration::hours(24), None);
        th.save().unwrap();

        let loaded = load_topic_history_from_key(&db, &th.key()).unwrap();
        assert_eq!(loaded.topic, th.topic);
        assert_eq!(loaded.duration, Duration::hours(24));
        assert!(!loaded.is_synced());

        assert!(matches!(
            load_topic_history_from_key(&db, &th.key()[..11]),
            Err(HistoryError::InvalidKey { expected: 12, actual: 11 })
        ));
    }

    #[test]
    fn test_delete() {
        let db = namespace();
        let th = with_current(&db, Duration::hours(1), None);
        th.save().unwrap();
        th.delete().unwrap();
        assert!(load_topic_history_from_key(&db, &th.key())
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_same_range() {
        let db = namespace();
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let zero = Duration::zero();

        let a = with_current(&db, Duration::minutes(1), None);
        let b = with_current(&db, Duration::minutes(1), None);
        assert!(a.same_range(&b));

        let c = with_current(&db, Duration::hours(1), None);
        assert!(!a.same_range(&c));

        let d = with_current(&db, zero, Some(t));
        let e = with_current(&db, zero, Some(t));
        assert!(d.same_range(&e));

        let f = with_current(&db, zero, Some(t + Duration::hours(1)));
        assert!(!d.same_range(&f));

        // A synced cursor never matches an unsynced one
        assert!(!a.same_range(&with_current(&db, Duration::minutes(1), Some(t))));
    }
}
