//! Session hooks — the quarantine capability.
//!
//! In a session-managed data layer, mutating a field of a tracked entity
//! can mark it dirty and flush the mutation back to the store.  The read
//! path therefore detaches every element from its owning session *before*
//! touching any field, and additionally marks it read-only when the layer
//! supports it.
//!
//! The hooks are optional.  Skipping them is permitted only when the
//! calling context is guaranteed detached already — that guarantee is the
//! adapter's contract, not something this crate can verify.

/// Hooks into the host's session-managed data layer.
pub trait SessionHooks<E>: Send + Sync {
    /// Detach the entity from the current session so later field mutations
    /// cannot write back to the store.
    fn detach(&self, entity: &mut E);

    /// Mark the entity read-only in the current session, as an additional
    /// safety where available.  Implementations without the capability
    /// leave this a no-op.
    fn mark_read_only(&self, entity: &mut E) {
        let _ = entity;
    }
}
