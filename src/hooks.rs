//! Hooks run user code around every flag evaluation.
//!
//! Stages run in bracket order: `before` hooks in registration order (registry, client,
//! invocation, provider), then `after`, `error`, and `finally` hooks in reverse order.
use std::{collections::HashMap, sync::Arc};

use crate::{
    error::HookError, ClientMetadata, ErrorCode, EvaluationContext, EvaluationDetails, FlagValue,
    FlagValueType, ProviderMetadata,
};

/// Hints passed to every hook of a single evaluation, set through
/// [`EvaluationOptions::with_hint`].
pub type HookHints = HashMap<String, serde_json::Value>;

/// What hooks know about the evaluation they are attached to.
#[derive(Debug, Clone)]
pub struct HookContext {
    /// Key of the evaluated flag.
    pub flag_key: String,
    /// Type requested by the caller.
    pub flag_type: FlagValueType,
    /// The caller's default value.
    pub default_value: FlagValue,
    /// Merged context. Updated after each `before` hook that returns a context.
    pub evaluation_context: EvaluationContext,
    /// The client performing the evaluation.
    pub client_metadata: ClientMetadata,
    /// The provider serving the evaluation.
    pub provider_metadata: ProviderMetadata,
}

/// Callbacks around flag evaluation. All stages are optional.
///
/// A hook returning an error (or panicking) never aborts the evaluation: the failure is logged,
/// the remaining hooks of the stage still run, and the evaluation falls back to the default value
/// with [`ErrorCode::General`].
///
/// # Examples
/// ```
/// # use flagline::{EvaluationContext, Hook, HookContext, HookError, HookHints};
/// struct AddRegion;
///
/// impl Hook for AddRegion {
///     fn before(
///         &self,
///         _context: &HookContext,
///         _hints: &HookHints,
///     ) -> Result<Option<EvaluationContext>, HookError> {
///         Ok(Some(EvaluationContext::new().with_attribute("region", "eu-west-1")))
///     }
/// }
/// ```
pub trait Hook: Send + Sync {
    /// Runs before the provider is called. A returned context is merged over the evaluation
    /// context.
    fn before(
        &self,
        _context: &HookContext,
        _hints: &HookHints,
    ) -> Result<Option<EvaluationContext>, HookError> {
        Ok(None)
    }

    /// Runs after a successful resolution.
    fn after(
        &self,
        _context: &HookContext,
        _details: &EvaluationDetails<FlagValue>,
        _hints: &HookHints,
    ) -> Result<(), HookError> {
        Ok(())
    }

    /// Runs when resolution or another hook failed.
    fn error(&self, _context: &HookContext, _code: ErrorCode, _message: &str, _hints: &HookHints) {}

    /// Runs last, unconditionally, with the final details.
    fn finally(
        &self,
        _context: &HookContext,
        _details: &EvaluationDetails<FlagValue>,
        _hints: &HookHints,
    ) {
    }
}

/// Per-invocation evaluation options.
#[derive(Clone, Default)]
pub struct EvaluationOptions {
    pub(crate) hooks: Vec<Arc<dyn Hook>>,
    pub(crate) hints: HookHints,
}

impl EvaluationOptions {
    /// Options with no hooks and no hints.
    pub fn new() -> EvaluationOptions {
        EvaluationOptions::default()
    }

    /// Add a hook for this evaluation only.
    pub fn with_hook(mut self, hook: impl Hook + 'static) -> EvaluationOptions {
        self.hooks.push(Arc::new(hook));
        self
    }

    /// Add a hint visible to all hooks of this evaluation.
    pub fn with_hint(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> EvaluationOptions {
        self.hints.insert(key.into(), value.into());
        self
    }
}

impl std::fmt::Debug for EvaluationOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluationOptions")
            .field("hooks", &self.hooks.len())
            .field("hints", &self.hints)
            .finish()
    }
}

/// Ordered hooks of a single evaluation.
pub(crate) struct HookPipeline<'a> {
    hooks: Vec<Arc<dyn Hook>>,
    hints: &'a HookHints,
}

impl<'a> HookPipeline<'a> {
    pub(crate) fn new(hooks: Vec<Arc<dyn Hook>>, hints: &'a HookHints) -> HookPipeline<'a> {
        HookPipeline { hooks, hints }
    }

    /// Run every `before` hook, merging returned contexts into `context.evaluation_context`.
    ///
    /// Returns the first failure, after all hooks had a chance to run.
    pub(crate) fn before(&self, context: &mut HookContext) -> Result<(), HookError> {
        let mut failure = None;
        for hook in &self.hooks {
            match guard(|| hook.before(context, self.hints)) {
                Ok(Some(update)) => {
                    context.evaluation_context = context.evaluation_context.merge(&update);
                }
                Ok(None) => {}
                Err(err) => {
                    log_failure("before", context, &err);
                    failure.get_or_insert(err);
                }
            }
        }
        failure.map_or(Ok(()), Err)
    }

    pub(crate) fn after(
        &self,
        context: &HookContext,
        details: &EvaluationDetails<FlagValue>,
    ) -> Result<(), HookError> {
        let mut failure = None;
        for hook in self.hooks.iter().rev() {
            if let Err(err) = guard(|| hook.after(context, details, self.hints)) {
                log_failure("after", context, &err);
                failure.get_or_insert(err);
            }
        }
        failure.map_or(Ok(()), Err)
    }

    pub(crate) fn error(&self, context: &HookContext, code: ErrorCode, message: &str) {
        for hook in self.hooks.iter().rev() {
            let result = guard(|| {
                hook.error(context, code, message, self.hints);
                Ok(())
            });
            if let Err(err) = result {
                log_failure("error", context, &err);
            }
        }
    }

    pub(crate) fn finally(&self, context: &HookContext, details: &EvaluationDetails<FlagValue>) {
        for hook in self.hooks.iter().rev() {
            let result = guard(|| {
                hook.finally(context, details, self.hints);
                Ok(())
            });
            if let Err(err) = result {
                log_failure("finally", context, &err);
            }
        }
    }
}

/// Convert a panicking hook into an error.
fn guard<T>(f: impl FnOnce() -> Result<T, HookError>) -> Result<T, HookError> {
    std::panic::catch_unwind(std::panic::AssertUnwindSafe(f))
        .unwrap_or_else(|_| Err(HookError::new("hook panicked")))
}

fn log_failure(stage: &str, context: &HookContext, err: &HookError) {
    log::warn!(target: "flagline",
               flag_key:display = context.flag_key,
               stage;
               "{err}");
}
