// Queue Domain Model

use serde::{Deserialize, Serialize};

use crate::domain::token::QueueId;

/// Organisation identifier
pub type OrganisationId = String;

/// One service line belonging to one organisation.
///
/// `is_active = false` rejects new tokens but never touches tokens already
/// pending in the line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Queue {
    pub id: QueueId,
    pub organisation_id: OrganisationId,
    pub name: String,
    /// Letter prefix for display tokens ("A" -> A-001, A-002, ...)
    pub prefix: String,
    /// Minutes per customer, used for wait estimates
    pub average_minutes: i64,
    pub is_active: bool,
    /// Optional cap on tokens issued per service day
    pub max_tokens: Option<i64>,
    pub created_at: i64,
}

impl Queue {
    pub fn new(
        id: impl Into<String>,
        organisation_id: impl Into<String>,
        name: impl Into<String>,
        average_minutes: i64,
        created_at: i64,
    ) -> Self {
        Self {
            id: id.into(),
            organisation_id: organisation_id.into(),
            name: name.into(),
            prefix: "A".to_string(),
            average_minutes,
            is_active: true,
            max_tokens: None,
            created_at,
        }
    }

    /// Format the display code for a sequence number within this queue
    pub fn display_token(&self, seq: i64) -> String {
        format!("{}-{:03}", self.prefix, seq)
    }
}
