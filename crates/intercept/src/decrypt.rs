//! The read path: run the call, quarantine, decrypt, re-wrap.

use std::future::Future;

use dadp_domain::error::Result;
use dadp_domain::model::MaskDirective;
use dadp_domain::trace::TraceEvent;
use dadp_engine::{BatchDecryptItem, DecryptOutcome};

use crate::batch::{self, BatchPlan};
use crate::descriptor::{FieldAccess, FieldDescriptor};
use crate::session::SessionHooks;
use crate::shapes::CallResult;
use crate::{CallOptions, Interceptor};

/// One collected value's way back into its entity.
struct Slot {
    element: usize,
    field: String,
    policy: Option<String>,
    mask: Option<MaskDirective>,
}

impl Interceptor {
    /// Intercept a read-leaning call.
    ///
    /// The result is normalized to a flat element list, every element is
    /// detached from its owning session *before* any field mutation, the
    /// target values travel to the Engine (batched and chunked above the
    /// thresholds, order preserved end-to-end), and the transformed
    /// elements re-wrap into the original container shape.
    ///
    /// A value the Engine reports as never-encrypted keeps its original
    /// bytes.  On an Engine fault with fallback-to-original configured, the
    /// untransformed original result is returned.
    pub async fn decrypt_call<E, F, Fut>(
        &self,
        opts: &CallOptions,
        hooks: Option<&dyn SessionHooks<E>>,
        proceed: F,
    ) -> Result<CallResult<E>>
    where
        E: FieldAccess + Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CallResult<E>>>,
    {
        let result = proceed().await?;
        let original = self.fallback_to_original.then(|| result.clone());

        match self.transform_result(result, opts, hooks).await {
            Ok(transformed) => Ok(transformed),
            Err(e) => match original {
                Some(original) if e.is_engine_fault() => {
                    TraceEvent::FallbackToOriginal {
                        reason: e.to_string(),
                    }
                    .emit();
                    tracing::warn!(error = %e, "engine unavailable; returning original result");
                    Ok(original)
                }
                _ => Err(e),
            },
        }
    }

    async fn transform_result<E>(
        &self,
        result: CallResult<E>,
        opts: &CallOptions,
        hooks: Option<&dyn SessionHooks<E>>,
    ) -> Result<CallResult<E>>
    where
        E: FieldAccess + 'static,
    {
        let (mut elements, shape) = result.decompose();
        if elements.is_empty() {
            return Ok(CallResult::rebuild(shape, elements));
        }
        let descriptor = self.registry.lookup::<E>()?;

        // Quarantine first.  Reordering this after decryption would let the
        // session observe the plaintext mutation and flush it back.
        if let Some(hooks) = hooks {
            for entity in elements.iter_mut() {
                hooks.detach(entity);
                hooks.mark_read_only(entity);
            }
        }

        let targets = descriptor.targets(opts.fields.as_deref());
        if targets.is_empty() {
            return Ok(CallResult::rebuild(shape, elements));
        }

        // Flat collect across all elements, remembering the way back.
        let mut slots: Vec<Slot> = Vec::new();
        let mut values: Vec<String> = Vec::new();
        for field in &targets {
            let policy = self.resolver.resolve(
                descriptor.datasource_id.as_deref(),
                descriptor.schema.as_deref(),
                &descriptor.table,
                &field.column,
            );
            for (i, entity) in elements.iter().enumerate() {
                if let Some(value) = entity.get_text(&field.field) {
                    slots.push(Slot {
                        element: i,
                        field: field.field.clone(),
                        policy: policy.clone(),
                        mask: resolve_mask(field, opts),
                    });
                    values.push(value.to_owned());
                }
            }
        }
        if values.is_empty() {
            return Ok(CallResult::rebuild(shape, elements));
        }

        let outcomes = self.decrypt_values(&slots, values).await?;

        // Bind outcomes back by index.
        for (slot, outcome) in slots.iter().zip(outcomes) {
            match outcome {
                DecryptOutcome::Plaintext(plain) | DecryptOutcome::Masked(plain) => {
                    elements[slot.element].set_text(&slot.field, plain);
                }
                // Never encrypted: the original bytes stay.
                DecryptOutcome::NotEncrypted => {}
            }
        }

        Ok(CallResult::rebuild(shape, elements))
    }

    async fn decrypt_values(&self, slots: &[Slot], values: Vec<String>) -> Result<Vec<DecryptOutcome>> {
        let engine = self.engine()?;
        match batch::plan(values.len(), &self.batch) {
            BatchPlan::Individual => {
                let mut outcomes = Vec::with_capacity(values.len());
                for (slot, value) in slots.iter().zip(&values) {
                    let outcome = engine
                        .decrypt(value, slot.policy.as_deref(), slot.mask.as_ref())
                        .await?;
                    outcomes.push(outcome);
                }
                Ok(outcomes)
            }
            BatchPlan::Batched(chunks) => {
                let mut outcomes = Vec::with_capacity(values.len());
                for range in chunks {
                    let items: Vec<BatchDecryptItem> = slots[range.clone()]
                        .iter()
                        .zip(&values[range])
                        .map(|(slot, value)| BatchDecryptItem {
                            data: value.clone(),
                            mask: slot.mask.clone(),
                        })
                        .collect();
                    outcomes.extend(engine.decrypt_batch(&items).await?);
                }
                Ok(outcomes)
            }
        }
    }
}

/// Mask resolution order: per-field descriptor directive, then the
/// call-level default, then none.
fn resolve_mask(field: &FieldDescriptor, opts: &CallOptions) -> Option<MaskDirective> {
    field.mask.clone().or_else(|| opts.mask.clone())
}
