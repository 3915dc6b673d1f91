//! Canonical conversation naming
//!
//! Both sides of a pairwise conversation compute the same id from the
//! participant list without a lookup. Each participant becomes a
//! `"{role}-{id}"` key; the two smallest keys (sorted lexicographically)
//! form `"conversation:{key0}:{key1}"`.

use serde::Deserialize;
use serde_json::Value;

use crate::types::{ConversationId, PrincipalId, Role};

/// One entry of a client-supplied participant list.
///
/// Decoding never fails: an entry whose id or role cannot be read keeps that
/// field empty and is skipped by [`derive`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "Value")]
pub struct Participant {
    pub id: Option<PrincipalId>,
    pub role: Option<Role>,
}

impl Participant {
    pub fn new(id: impl Into<PrincipalId>, role: Role) -> Self {
        Self {
            id: Some(id.into()),
            role: Some(role),
        }
    }

    /// `"{role}-{id}"`, or `None` when either half is missing
    pub fn key(&self) -> Option<String> {
        match (self.id, self.role) {
            (Some(id), Some(role)) => Some(format!("{role}-{id}")),
            _ => None,
        }
    }
}

impl From<Value> for Participant {
    fn from(value: Value) -> Self {
        let id = value.get("id").and_then(PrincipalId::from_json);
        let role = value
            .get("role")
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<Role>().ok());

        Self { id, role }
    }
}

/// Derive the conversation id for a participant list.
///
/// Returns `None` when fewer than two distinct participants resolve. Only
/// the two smallest keys are used, so conversations stay pairwise.
pub fn derive(participants: &[Participant]) -> Option<ConversationId> {
    let mut keys: Vec<String> = participants.iter().filter_map(Participant::key).collect();
    keys.sort();
    keys.dedup();

    match keys.as_slice() {
        [first, second, ..] => Some(ConversationId::from_canonical(format!(
            "conversation:{first}:{second}"
        ))),
        _ => None,
    }
}
