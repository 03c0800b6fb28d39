use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use surrealdb::engine::remote::ws::{Client, Ws};
use surrealdb::opt::auth::Root;
use surrealdb::Surreal;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::models::{
    audit_entry::AuditEntry, credential::MfaCredential, session::MfaSession,
};
use crate::infrastructure::data::legacy;
use crate::infrastructure::data::port::{PersistencePort, StoreError};
use crate::infrastructure::security::encryption::SecretCipher;

const CREDENTIALS: &str = "mfa_credentials";
const SESSIONS: &str = "mfa_sessions";
const SYNC_OPS: &str = "mfa_sync_ops";
const ATTEMPTS: &str = "mfa_attempts";
const AUDIT: &str = "mfa_audit";

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct CommittedOp {
    user_id: String,
    committed_at: DateTime<Utc>,
}

#[derive(Debug, serde::Serialize)]
struct AttemptRow {
    user_id: String,
    success: bool,
    occurred_at: DateTime<Utc>,
}

/// SurrealDB-backed persistence port. Owns its client handle; nothing here
/// is process-global, the adapter is injected like any other port
/// implementation.
pub struct SurrealStore {
    db: Surreal<Client>,
    cipher: Arc<SecretCipher>,
}

impl SurrealStore {
    pub async fn connect(
        address: &str,
        namespace: &str,
        database: &str,
        username: &str,
        password: &str,
        cipher: Arc<SecretCipher>,
    ) -> Result<Self, surrealdb::Error> {
        let db = Surreal::new::<Ws>(address).await?;
        db.signin(Root { username, password }).await?;
        db.use_ns(namespace).use_db(database).await?;
        info!(address, namespace, database, "connected to SurrealDB");
        Ok(Self { db, cipher })
    }

    fn unavailable(err: surrealdb::Error) -> StoreError {
        warn!(error = %err, "surrealdb request failed");
        StoreError::Unavailable
    }

    async fn load_raw_credential(&self, user_id: &str) -> Result<Option<Value>, StoreError> {
        let record: Option<Value> = self
            .db
            .select((CREDENTIALS, user_id))
            .await
            .map_err(Self::unavailable)?;
        Ok(record)
    }

    async fn store_credential(&self, credential: &MfaCredential) -> Result<(), StoreError> {
        let _: Option<MfaCredential> = self
            .db
            .update((CREDENTIALS, credential.user_id.clone()))
            .content(credential.clone())
            .await
            .map_err(Self::unavailable)?;
        Ok(())
    }
}

#[async_trait]
impl PersistencePort for SurrealStore {
    async fn get_credential(&self, user_id: &str) -> Result<Option<MfaCredential>, StoreError> {
        let Some(raw) = self.load_raw_credential(user_id).await? else {
            return Ok(None);
        };

        match serde_json::from_value::<MfaCredential>(raw.clone()) {
            Ok(credential) => Ok(Some(credential)),
            Err(_) => {
                // Legacy-format record: upgrade once and rewrite in place.
                let upgraded = legacy::upgrade_record(&raw, &self.cipher)?;
                info!(user_id, "rewrote legacy MFA record into unified schema");
                self.store_credential(&upgraded).await?;
                Ok(Some(upgraded))
            }
        }
    }

    async fn upsert_credential(
        &self,
        credential: &MfaCredential,
        expected_version: u64,
        operation_id: Uuid,
    ) -> Result<MfaCredential, StoreError> {
        let op_key = operation_id.to_string();
        let committed: Option<CommittedOp> = self
            .db
            .select((SYNC_OPS, op_key.as_str()))
            .await
            .map_err(Self::unavailable)?;
        if committed.is_some() {
            return self
                .get_credential(&credential.user_id)
                .await?
                .ok_or(StoreError::NotFound);
        }

        let stored_version = self
            .get_credential(&credential.user_id)
            .await?
            .map(|stored| stored.version)
            .unwrap_or(0);
        if stored_version != expected_version {
            return Err(StoreError::VersionConflict {
                actual: stored_version,
            });
        }

        let mut next = credential.clone();
        next.version = expected_version + 1;
        next.updated_at = Utc::now();
        self.store_credential(&next).await?;

        let _: Option<CommittedOp> = self
            .db
            .create((SYNC_OPS, op_key.as_str()))
            .content(CommittedOp {
                user_id: credential.user_id.clone(),
                committed_at: Utc::now(),
            })
            .await
            .map_err(Self::unavailable)?;

        Ok(next)
    }

    async fn record_attempt(&self, user_id: &str, success: bool) -> Result<(), StoreError> {
        let _: Option<Value> = self
            .db
            .create(ATTEMPTS)
            .content(AttemptRow {
                user_id: user_id.to_string(),
                success,
                occurred_at: Utc::now(),
            })
            .await
            .map_err(Self::unavailable)?;
        Ok(())
    }

    async fn create_session(&self, session: &MfaSession) -> Result<(), StoreError> {
        let _: Option<MfaSession> = self
            .db
            .create((SESSIONS, session.session_token.clone()))
            .content(session.clone())
            .await
            .map_err(Self::unavailable)?;
        Ok(())
    }

    async fn get_session(&self, token: &str) -> Result<Option<MfaSession>, StoreError> {
        let session: Option<MfaSession> = self
            .db
            .select((SESSIONS, token))
            .await
            .map_err(Self::unavailable)?;
        Ok(session)
    }

    async fn update_session(&self, session: &MfaSession) -> Result<(), StoreError> {
        let updated: Option<MfaSession> = self
            .db
            .update((SESSIONS, session.session_token.clone()))
            .content(session.clone())
            .await
            .map_err(Self::unavailable)?;
        updated.map(|_| ()).ok_or(StoreError::NotFound)
    }

    async fn invalidate_session(&self, token: &str) -> Result<(), StoreError> {
        let _: Option<MfaSession> = self
            .db
            .delete((SESSIONS, token))
            .await
            .map_err(Self::unavailable)?;
        Ok(())
    }

    async fn expired_sessions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<MfaSession>, StoreError> {
        let mut response = self
            .db
            .query("SELECT * FROM type::table($table) WHERE expires_at < $now")
            .bind(("table", SESSIONS))
            .bind(("now", now))
            .await
            .map_err(Self::unavailable)?;
        response
            .take::<Vec<MfaSession>>(0)
            .map_err(|_| StoreError::Serialization)
    }

    async fn append_audit_event(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        let _: Option<AuditEntry> = self
            .db
            .create((AUDIT, entry.id.clone()))
            .content(entry.clone())
            .await
            .map_err(Self::unavailable)?;
        Ok(())
    }
}
