//! Restaurant model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Restaurant entity; only what booking ownership needs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Restaurant {
    pub id: String,
    /// Owner account; the only user allowed to accept or reject its bookings
    pub owner_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Restaurant {
    pub fn new(id: String, owner_id: String, name: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            owner_id,
            name,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.owner_id == user_id
    }
}
