use crate::{
    hooks::HookPipeline, ErrorCode, EvaluationDetails, FlagType, FlagValue, HookContext,
    Provider, ProviderStatus, Reason, ResolutionDetails,
};

/// Evaluate a flag through the hook pipeline. Never fails: every error is reported in the
/// returned details along with `default`.
///
/// `hook_context` carries the flag key and the merged evaluation context. `status` is the status
/// of `provider` taken together with it, so the whole evaluation sees one provider.
pub(crate) fn evaluate<T: FlagType>(
    provider: &dyn Provider,
    status: ProviderStatus,
    pipeline: &HookPipeline<'_>,
    mut hook_context: HookContext,
    default: T,
) -> EvaluationDetails<T> {
    let resolution = match pipeline.before(&mut hook_context) {
        Ok(()) => resolve(provider, status, &hook_context, default.clone()),
        Err(err) => ResolutionDetails::error(default.clone(), ErrorCode::General, err.to_string()),
    };

    let mut details = EvaluationDetails {
        flag_key: hook_context.flag_key.clone(),
        flag_type: T::TYPE,
        resolution,
    };

    if !details.resolution.is_error() {
        if let Err(err) = pipeline.after(&hook_context, &erase(&details)) {
            details.resolution =
                ResolutionDetails::error(default, ErrorCode::General, err.to_string());
        }
    }

    if let Some(code) = details.error_code() {
        pipeline.error(&hook_context, code, details.error_message().unwrap_or_default());
    }
    pipeline.finally(&hook_context, &erase(&details));

    log_evaluation(&hook_context, &details);
    details
}

fn resolve<T: FlagType>(
    provider: &dyn Provider,
    status: ProviderStatus,
    hook_context: &HookContext,
    default: T,
) -> ResolutionDetails<T> {
    if hook_context.flag_key.is_empty() {
        return ResolutionDetails::error(default, ErrorCode::Invalid, "flag key is empty");
    }

    match status {
        ProviderStatus::NotReady => {
            return ResolutionDetails::error(
                default,
                ErrorCode::ProviderNotReady,
                "provider is not ready",
            )
        }
        ProviderStatus::Fatal => {
            return ResolutionDetails::error(
                default,
                ErrorCode::ProviderFatal,
                "provider is in fatal state",
            )
        }
        ProviderStatus::Ready | ProviderStatus::Error | ProviderStatus::Stale => {}
    }

    let resolved = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        T::resolve(
            provider,
            &hook_context.flag_key,
            default.clone(),
            &hook_context.evaluation_context,
        )
    }));

    match resolved {
        Ok(resolution) if resolution.error_code.is_some() => ResolutionDetails {
            // Failed resolutions always return the caller's default.
            value: default,
            variant: None,
            reason: Reason::Error,
            ..resolution
        },
        Ok(resolution) => resolution,
        Err(_) => ResolutionDetails::error(default, ErrorCode::General, "provider panicked"),
    }
}

/// Type-erase details for hooks.
fn erase<T: FlagType>(details: &EvaluationDetails<T>) -> EvaluationDetails<FlagValue> {
    EvaluationDetails {
        flag_key: details.flag_key.clone(),
        flag_type: details.flag_type,
        resolution: details.resolution.clone().map(T::into_flag_value),
    }
}

fn log_evaluation<T>(hook_context: &HookContext, details: &EvaluationDetails<T>) {
    let provider = &hook_context.provider_metadata.name;
    match details.error_code() {
        None => {
            log::trace!(target: "flagline",
                        flag_key:display = details.flag_key,
                        provider:display = provider,
                        reason:serde = details.reason(),
                        variant:? = details.variant();
                        "evaluated flag");
        }
        Some(code) if code.is_normal() => {
            log::debug!(target: "flagline",
                        flag_key:display = details.flag_key,
                        provider:display = provider,
                        error_code:serde = code;
                        "returning default value: {}", details.error_message().unwrap_or_default());
        }
        Some(code) => {
            log::warn!(target: "flagline",
                       flag_key:display = details.flag_key,
                       provider:display = provider,
                       error_code:serde = code;
                       "error occurred while evaluating a flag: {}", details.error_message().unwrap_or_default());
        }
    }
}
