use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// A set of participants sharing a message history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: Uuid,
    pub participants: Vec<Uuid>,
    /// Plaintext preview of the most recent message.
    pub last_message: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    /// Approximate per-participant badge count.
    pub unread_count: BTreeMap<Uuid, i64>,
    pub project_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// New conversation with a zeroed unread counter for every participant.
    ///
    /// Duplicate ids are dropped, first occurrence wins.
    pub fn new(participants: &[Uuid], project_id: Option<Uuid>) -> Self {
        let participants = dedup_participants(participants);
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            unread_count: participants.iter().map(|p| (*p, 0)).collect(),
            participants,
            last_message: None,
            last_message_at: None,
            project_id,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_participant(&self, user_id: Uuid) -> bool {
        self.participants.contains(&user_id)
    }

    pub fn unread_for(&self, user_id: Uuid) -> i64 {
        self.unread_count.get(&user_id).copied().unwrap_or(0)
    }

    /// Everyone but `user_id`.
    pub fn other_participants(&self, user_id: Uuid) -> impl Iterator<Item = Uuid> + '_ {
        self.participants
            .iter()
            .copied()
            .filter(move |p| *p != user_id)
    }

    /// Identity key of the participant set, independent of order.
    pub fn participant_key(&self) -> String {
        crypto_core::hash_participants(&self.participants)
    }
}

/// Drop repeated ids while keeping the caller's order.
pub fn dedup_participants(participants: &[Uuid]) -> Vec<Uuid> {
    let mut seen = Vec::with_capacity(participants.len());
    for p in participants {
        if !seen.contains(p) {
            seen.push(*p);
        }
    }
    seen
}
