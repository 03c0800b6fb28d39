use tokio::sync::broadcast;
use uuid::Uuid;

/// Typed notifications of MFA state changes. Components and the embedding
/// application subscribe instead of watching globals; a bus with no
/// subscribers simply drops events.
#[derive(Debug, Clone)]
pub enum MfaEvent {
    Enabled {
        user_id: String,
    },
    Disabled {
        user_id: String,
    },
    Verified {
        user_id: String,
        session_token: String,
    },
    SessionExpired {
        user_id: String,
        session_token: String,
    },
    SessionRevoked {
        user_id: String,
        session_token: String,
    },
    SyncFailed {
        user_id: String,
        operation_id: Uuid,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct MfaEventBus {
    tx: broadcast::Sender<MfaEvent>,
}

impl MfaEventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MfaEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: MfaEvent) {
        // send() errs only when nobody is listening, which is fine.
        let _ = self.tx.send(event);
    }
}

impl Default for MfaEventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = MfaEventBus::default();
        let mut rx = bus.subscribe();

        bus.publish(MfaEvent::Enabled {
            user_id: "user-1".into(),
        });

        let event = rx.recv().await.expect("event should arrive");
        assert!(matches!(event, MfaEvent::Enabled { user_id } if user_id == "user-1"));
    }

    #[test]
    fn publishing_without_subscribers_does_not_panic() {
        let bus = MfaEventBus::default();
        bus.publish(MfaEvent::Disabled {
            user_id: "user-1".into(),
        });
    }
}
