//! Property-based test generators using proptest.

use proptest::prelude::*;
use std::time::Duration;
use syncbridge_core::{JobAction, LocalId, NewJob, Priority};
use syncbridge_engine::{RemoteError, RetryConfig};

/// Strategy for job actions.
pub fn action_strategy() -> impl Strategy<Value = JobAction> {
    prop_oneof![
        Just(JobAction::Create),
        Just(JobAction::Update),
        Just(JobAction::Delete),
    ]
}

/// Strategy for entity type names.
pub fn entity_type_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z_]{0,15}").expect("Invalid regex")
}

/// Strategy for human-readable record names, including case variants that
/// a case-insensitive dedup must treat as equal.
pub fn record_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Za-z][A-Za-z0-9 ]{0,23}").expect("Invalid regex")
}

/// Strategy for local ids.
pub fn local_id_strategy() -> impl Strategy<Value = LocalId> {
    1..10_000i64
}

/// Strategy for job priorities.
pub fn priority_strategy() -> impl Strategy<Value = Priority> {
    prop_oneof![Just(Priority::HIGH), Just(Priority::NORMAL), Just(Priority::LOW)]
}

/// Strategy for remote errors that classify as transient.
pub fn transient_error_strategy() -> impl Strategy<Value = RemoteError> {
    prop_oneof![
        "[a-z ]{1,20}".prop_map(RemoteError::Timeout),
        "[a-z ]{1,20}".prop_map(RemoteError::Connection),
        (1u64..600).prop_map(|s| RemoteError::RateLimited {
            retry_after: Some(Duration::from_secs(s)),
        }),
        prop_oneof![Just(408u16), Just(429u16), 500u16..600].prop_map(|status| RemoteError::http(status, "server")),
        Just(RemoteError::fault(
            "OperationalError",
            "could not serialize access due to concurrent update"
        )),
    ]
}

/// Strategy for remote errors that classify as permanent.
pub fn permanent_error_strategy() -> impl Strategy<Value = RemoteError> {
    prop_oneof![
        "[a-z ]{1,20}".prop_map(RemoteError::AccessDenied),
        "[a-z ]{1,20}".prop_map(RemoteError::Validation),
        "[a-z.]{1,20}".prop_map(RemoteError::MissingModel),
        (400u16..500)
            .prop_filter("retryable statuses", |s| *s != 408 && *s != 429)
            .prop_map(|status| RemoteError::http(status, "client")),
        Just(RemoteError::fault("odoo.exceptions.ValidationError", "bad value")),
    ]
}

/// Strategy for retry policies with sane bounds.
pub fn retry_config_strategy() -> impl Strategy<Value = RetryConfig> {
    (1u32..12, 1u64..120, 1u64..7200, 1.0f64..4.0, 0.0f64..0.5).prop_map(
        |(attempts, initial, max, multiplier, jitter)| {
            RetryConfig::new(attempts)
                .with_initial_delay(Duration::from_secs(initial))
                .with_max_delay(Duration::from_secs(initial.max(max)))
                .with_backoff_multiplier(multiplier)
                .with_jitter(jitter)
        },
    )
}

/// Strategy for push jobs against one module and entity type.
pub fn push_job_strategy(module_id: &'static str, entity_type: &'static str) -> impl Strategy<Value = NewJob> {
    (action_strategy(), local_id_strategy(), priority_strategy()).prop_map(move |(action, id, priority)| {
        NewJob::push(module_id, entity_type, action, id).with_priority(priority)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use syncbridge_core::ErrorKind;
    use syncbridge_engine::classify_remote;

    proptest! {
        #[test]
        fn transient_errors_classify_transient(err in transient_error_strategy()) {
            prop_assert_eq!(classify_remote(&err).kind, ErrorKind::Transient);
        }

        #[test]
        fn permanent_errors_classify_permanent(err in permanent_error_strategy()) {
            prop_assert_eq!(classify_remote(&err).kind, ErrorKind::Permanent);
        }

        #[test]
        fn retry_configs_respect_ceiling(config in retry_config_strategy(), attempt in 0u32..20) {
            let ceiling = config.max_delay.as_secs_f64() * (1.0 + config.jitter);
            prop_assert!(config.delay_for_attempt(attempt).as_secs_f64() <= ceiling + 1e-6);
        }
    }
}
