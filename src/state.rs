//! Suspended pipeline state and the store that holds it across the SFO round trip.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use tracing::debug;

use crate::{sp_metadata::SpMetadata, utils::random_id};

/// Default lifetime of a stashed state. The SFO IdP interaction is human-paced.
pub const DEFAULT_STATE_TTL: Duration = Duration::hours(1);

/// Metadata of the service provider the pipeline authenticates for (`SPMetadata`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequesterMetadata {
    #[serde(rename = "entityid", alias = "entityId")]
    pub entity_id: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// State of the enclosing authentication pipeline.
///
/// Only the fields this module reads or writes are typed; everything else the
/// pipeline carries is kept in `extra` and round-trips untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineState {
    #[serde(rename = "Attributes", default)]
    pub attributes: HashMap<String, Vec<String>>,
    #[serde(rename = "SPMetadata")]
    pub sp_metadata: RequesterMetadata,
    #[serde(rename = "saml:RequesterID", alias = "RequesterIDChain", default)]
    pub requester_ids: Vec<String>,
    #[serde(rename = "sfo:sp:metadata", default, skip_serializing_if = "Option::is_none")]
    pub sfo_sp_metadata: Option<SpMetadata>,
    #[serde(rename = "sfo:idp:entityid", default, skip_serializing_if = "Option::is_none")]
    pub sfo_idp_entity_id: Option<String>,
    #[serde(rename = "stepupsfo:handle", default, skip_serializing_if = "Option::is_none")]
    pub correlation_handle: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl PipelineState {
    pub fn new(sp_entity_id: &str) -> Self {
        Self {
            sp_metadata: RequesterMetadata {
                entity_id: sp_entity_id.into(),
                ..RequesterMetadata::default()
            },
            ..Self::default()
        }
    }

    pub fn sp_entity_id(&self) -> &str {
        &self.sp_metadata.entity_id
    }

    pub fn with_attribute(mut self, name: &str, values: &[&str]) -> Self {
        self.attributes
            .insert(name.into(), values.iter().map(|v| v.to_string()).collect());
        self
    }

    pub fn with_requester_id(mut self, requester_id: &str) -> Self {
        self.requester_ids.push(requester_id.into());
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// Unknown, expired, already consumed, or stashed under another stage.
    #[error("no stashed state for handle {0:?}")]
    NotFound(String),
    #[error("could not serialize state: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Durable, single-use storage of suspended pipeline state.
pub trait StateStore: Send + Sync {
    /// Stashes `state` under a fresh handle, recording the handle in the state itself.
    fn save_state(&self, state: &mut PipelineState, stage: &str) -> Result<String, StateError>;

    /// Retrieves and consumes the state stashed under `handle`.
    fn load_state(&self, handle: &str, stage: &str) -> Result<PipelineState, StateError>;
}

/// The enclosing pipeline, resumed once the SFO response has been validated.
pub trait Pipeline {
    /// Whatever the pipeline produces for the host once it takes over.
    type Continuation;

    fn resume_processing(&self, state: PipelineState) -> Self::Continuation;
}

#[derive(Debug)]
struct Entry {
    stage: String,
    payload: String,
    expires_at: OffsetDateTime,
}

#[derive(Debug)]
pub struct InMemoryStateStore {
    entries: Mutex<HashMap<String, Entry>>,
    ttl: Duration,
}

impl Default for InMemoryStateStore {
    fn default() -> Self {
        Self::with_ttl(DEFAULT_STATE_TTL)
    }
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops abandoned entries, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = OffsetDateTime::now_utc();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }
}

impl StateStore for InMemoryStateStore {
    fn save_state(&self, state: &mut PipelineState, stage: &str) -> Result<String, StateError> {
        let handle = random_id();
        state.correlation_handle = Some(handle.clone());
        let payload = serde_json::to_string(state)?;

        let purged = self.purge_expired();
        if purged > 0 {
            debug!(purged, "dropped expired pipeline state");
        }

        self.entries.lock().insert(
            handle.clone(),
            Entry {
                stage: stage.into(),
                payload,
                expires_at: OffsetDateTime::now_utc() + self.ttl,
            },
        );
        Ok(handle)
    }

    fn load_state(&self, handle: &str, stage: &str) -> Result<PipelineState, StateError> {
        let now = OffsetDateTime::now_utc();
        let mut entries = self.entries.lock();
        let (expired, same_stage) = match entries.get(handle) {
            Some(entry) => (entry.expires_at <= now, entry.stage == stage),
            None => return Err(StateError::NotFound(handle.into())),
        };
        if expired {
            entries.remove(handle);
            return Err(StateError::NotFound(handle.into()));
        }
        if !same_stage {
            return Err(StateError::NotFound(handle.into()));
        }

        let entry = entries
            .remove(handle)
            .ok_or_else(|| StateError::NotFound(handle.into()))?;
        drop(entries);

        Ok(serde_json::from_str(&entry.payload)?)
    }
}
