//! Audit sink: append-only recording that never blocks the decision path.
//!
//! Access decisions must not fail because the audit write failed; the entry
//! is logged and dropped instead. Compliance exports read the store directly.

use std::sync::Arc;

use storykeep_core::AuditEntry;

use crate::traits::Store;

/// Writes audit entries to the backing store, swallowing failures.
pub struct AuditSink<S: Store> {
    store: Arc<S>,
}

impl<S: Store> AuditSink<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Append an entry. Errors are logged, never surfaced.
    pub async fn record(&self, entry: AuditEntry) {
        if let Err(e) = self.store.append_audit(&entry).await {
            tracing::error!(
                action = entry.action.as_str(),
                entity = %entry.entity_id,
                error = %e,
                "failed to append audit entry"
            );
        }
    }
}

impl<S: Store> Clone for AuditSink<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use storykeep_core::{AuditAction, AuditActor, AuditEntityKind};

    #[tokio::test]
    async fn test_sink_appends_to_store() {
        let store = Arc::new(MemoryStore::new());
        let sink = AuditSink::new(Arc::clone(&store));

        sink.record(AuditEntry::granted(
            AuditActor::Bearer,
            AuditEntityKind::ShareToken,
            "tok-1",
            AuditAction::ShareAccess,
            1,
        ))
        .await;

        let entries = store
            .audit_for_entity(AuditEntityKind::ShareToken, "tok-1")
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
    }
}
