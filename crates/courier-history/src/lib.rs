//! Mailserver history bookkeeping for courier
//!
//! Tracks, per topic and time window, how far back history has been synced
//! from mailservers ([`TopicHistory`]), and which cursors were asked for in
//! each outstanding request ([`HistoryRequest`]). [`HistoryStore`] is the
//! facade the transport layer talks to.
//!
//! Layout inside the shared storage:
//! - `TopicHistoryBucket`: `topic || duration` -> `{duration, current}`
//! - `HistoryRequestBucket`: `id` -> `{id, [topic history key]}`

pub mod error;
pub mod request;
pub mod store;
pub mod topic;
pub mod topic_history;

pub use error::{HistoryError, Result};
pub use request::HistoryRequest;
pub use store::HistoryStore;
pub use topic::{RequestId, TopicType, REQUEST_ID_LENGTH, TOPIC_LENGTH};
pub use topic_history::{
    load_topic_history_from_key, TopicHistory, DURATION_LENGTH, TOPIC_HISTORY_KEY_LENGTH,
};
