use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use crate::domain::models::audit_entry::AuditEntry;
use crate::infrastructure::data::port::PersistencePort;

/// Fire-and-forget audit trail. Persistence failures are logged and
/// counted, never fatal to the MFA flow.
pub struct AuditLog {
    port: Arc<dyn PersistencePort>,
}

impl AuditLog {
    pub fn new(port: Arc<dyn PersistencePort>) -> Self {
        Self { port }
    }

    pub async fn record(&self, user_id: &str, action: &str, metadata: Option<Value>) {
        let action = action.trim().to_lowercase();
        metrics::counter!("mfa_audit_events_total", 1, "action" => action.clone());
        info!(target: "audit", action = %action, user_id = %user_id, "recording audit event");

        let entry = AuditEntry::new(user_id, action.clone(), metadata);
        if let Err(err) = self.port.append_audit_event(&entry).await {
            metrics::counter!("mfa_audit_event_errors_total", 1, "action" => action.clone());
            warn!(
                target: "audit",
                error = %err,
                action = %action,
                user_id = %user_id,
                "failed to persist audit entry"
            );
        }
    }
}
