use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AuditEntry {
    pub id: String,
    pub user_id: String,
    pub action: String,
    pub metadata: Option<Value>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        user_id: impl Into<String>,
        action: impl Into<String>,
        metadata: Option<Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            action: action.into(),
            metadata,
            occurred_at: Utc::now(),
        }
    }
}
