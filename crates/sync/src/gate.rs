//! The schema gate.
//!
//! Bootstrap must not publish an empty catalog just because the host has
//! not finished enumerating its entity descriptors yet.  The gate lets the
//! composition root signal "local columns are known" once, and lets the
//! orchestrator wait for that signal with a bound — on timeout, bootstrap
//! continues with whatever is available.

use std::time::Duration;

use tokio::sync::watch;

use dadp_domain::model::SchemaEntry;

pub struct SchemaGate {
    tx: watch::Sender<Option<Vec<SchemaEntry>>>,
}

impl Default for SchemaGate {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaGate {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Signal that local schema enumeration is complete.
    pub fn signal(&self, entries: Vec<SchemaEntry>) {
        self.tx.send_replace(Some(entries));
    }

    /// Wait for the signal, up to `timeout`.  Returns the enumerated
    /// entries, or whatever is available when the bound is hit.
    pub async fn wait(&self, timeout: Duration) -> Vec<SchemaEntry> {
        let mut rx = self.tx.subscribe();
        let result = match tokio::time::timeout(timeout, rx.wait_for(|v| v.is_some())).await {
            Ok(Ok(entries)) => Some(entries.clone().unwrap_or_default()),
            _ => None,
        };
        match result {
            Some(entries) => entries,
            None => {
                tracing::warn!(
                    timeout_secs = timeout.as_secs(),
                    "schema enumeration signal not received; continuing with what is available"
                );
                self.peek()
            }
        }
    }

    /// The most recently signalled entries, without waiting.
    pub fn peek(&self) -> Vec<SchemaEntry> {
        self.tx.borrow().clone().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn signalled_gate_returns_immediately() {
        let gate = SchemaGate::new();
        gate.signal(vec![SchemaEntry::created("public", "users", "email")]);
        let entries = gate.wait(Duration::from_secs(5)).await;
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn unsignalled_gate_times_out_empty() {
        let gate = SchemaGate::new();
        let entries = gate.wait(Duration::from_millis(10)).await;
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn waiter_wakes_on_signal() {
        let gate = std::sync::Arc::new(SchemaGate::new());
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait(Duration::from_secs(5)).await })
        };
        tokio::task::yield_now().await;
        gate.signal(vec![SchemaEntry::created("public", "users", "email")]);
        let entries = waiter.await.unwrap();
        assert_eq!(entries.len(), 1);
    }
}
