//! The write path: transform arguments, then continue the call.

use std::future::Future;

use dadp_domain::envelope;
use dadp_domain::error::Result;
use dadp_domain::trace::TraceEvent;
use dadp_engine::BatchEncryptItem;

use crate::batch::{self, BatchPlan};
use crate::descriptor::FieldAccess;
use crate::shapes::{CallOrigin, Intercepted};
use crate::{CallOptions, Interceptor};

impl Interceptor {
    /// Intercept a write-leaning call.
    ///
    /// Target fields holding plaintext strings are encrypted in place
    /// before `proceed` runs with the transformed argument.  Values already
    /// recognized as ciphertext are skipped without an Engine call.  On an
    /// Engine fault with fallback-to-original configured, the call proceeds
    /// with the untransformed original argument instead.
    pub async fn encrypt_call<E, R, F, Fut>(
        &self,
        input: Intercepted<E>,
        origin: CallOrigin,
        opts: &CallOptions,
        proceed: F,
    ) -> Result<R>
    where
        E: FieldAccess + Clone + Send + Sync + 'static,
        F: FnOnce(Intercepted<E>) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let original = self.fallback_to_original.then(|| input.clone());

        match self.transform_arguments(input, origin, opts).await {
            Ok(transformed) => proceed(transformed).await,
            Err(e) => match original {
                Some(original) if e.is_engine_fault() => {
                    TraceEvent::FallbackToOriginal {
                        reason: e.to_string(),
                    }
                    .emit();
                    tracing::warn!(
                        error = %e,
                        "engine unavailable; continuing with original arguments"
                    );
                    proceed(original).await
                }
                _ => Err(e),
            },
        }
    }

    async fn transform_arguments<E>(
        &self,
        input: Intercepted<E>,
        origin: CallOrigin,
        opts: &CallOptions,
    ) -> Result<Intercepted<E>>
    where
        E: FieldAccess + 'static,
    {
        match input {
            Intercepted::Value(value) => self.transform_value(value, origin).await,
            Intercepted::Entity(mut entity) => {
                self.encrypt_entity(&mut entity, opts).await?;
                Ok(Intercepted::Entity(entity))
            }
            Intercepted::Entities(mut entities) => {
                self.encrypt_entities(&mut entities, opts).await?;
                Ok(Intercepted::Entities(entities))
            }
        }
    }

    /// A bare string carries no field context.  A repository-style caller
    /// is operating on a single column value, so it is encrypted directly
    /// under the Engine's default policy; from a service-style caller the
    /// policy is ambiguous and the value passes through untouched.
    async fn transform_value<E>(&self, value: String, origin: CallOrigin) -> Result<Intercepted<E>> {
        match origin {
            CallOrigin::Service => Ok(Intercepted::Value(value)),
            CallOrigin::Repository => {
                if envelope::is_ciphertext(&value) {
                    return Ok(Intercepted::Value(value));
                }
                let cipher = self.engine()?.encrypt(&value, None, false).await?;
                Ok(Intercepted::Value(cipher))
            }
        }
    }

    async fn encrypt_entity<E>(&self, entity: &mut E, opts: &CallOptions) -> Result<()>
    where
        E: FieldAccess + 'static,
    {
        let descriptor = self.registry.lookup::<E>()?;
        for field in descriptor.targets(opts.fields.as_deref()) {
            let Some(current) = entity.get_text(&field.field).map(str::to_owned) else {
                continue;
            };
            if envelope::is_ciphertext(&current) {
                continue;
            }
            let policy = self.resolver.resolve(
                descriptor.datasource_id.as_deref(),
                descriptor.schema.as_deref(),
                &descriptor.table,
                &field.column,
            );
            let cipher = self
                .engine()?
                .encrypt(&current, policy.as_deref(), field.for_search)
                .await?;
            entity.set_text(&field.field, cipher);
        }
        Ok(())
    }

    /// Collections group by `(field, policy)`.  Groups at or above the
    /// batch threshold travel through `encrypt/batch`, bound back to items
    /// by index; smaller groups fall back to per-item encryption.
    async fn encrypt_entities<E>(&self, entities: &mut [E], opts: &CallOptions) -> Result<()>
    where
        E: FieldAccess + 'static,
    {
        if entities.is_empty() {
            return Ok(());
        }
        let descriptor = self.registry.lookup::<E>()?;

        for field in descriptor.targets(opts.fields.as_deref()) {
            let policy = self.resolver.resolve(
                descriptor.datasource_id.as_deref(),
                descriptor.schema.as_deref(),
                &descriptor.table,
                &field.column,
            );

            // Gather the plaintext values of this group, remembering where
            // each came from.
            let mut pending: Vec<(usize, String)> = Vec::new();
            for (i, entity) in entities.iter().enumerate() {
                if let Some(value) = entity.get_text(&field.field) {
                    if !envelope::is_ciphertext(value) {
                        pending.push((i, value.to_owned()));
                    }
                }
            }
            if pending.is_empty() {
                continue;
            }

            let engine = self.engine()?;
            match batch::plan(pending.len(), &self.batch) {
                BatchPlan::Individual => {
                    for (i, value) in &pending {
                        let cipher = engine
                            .encrypt(value, policy.as_deref(), field.for_search)
                            .await?;
                        entities[*i].set_text(&field.field, cipher);
                    }
                }
                BatchPlan::Batched(chunks) => {
                    for range in chunks {
                        let items: Vec<BatchEncryptItem> = pending[range.clone()]
                            .iter()
                            .map(|(_, value)| BatchEncryptItem {
                                data: value.clone(),
                                policy_name: policy.clone(),
                            })
                            .collect();
                        let results = engine.encrypt_batch(&items).await?;
                        for ((i, _), cipher) in pending[range].iter().zip(results) {
                            if let Some(cipher) = cipher {
                                entities[*i].set_text(&field.field, cipher);
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
