//! Mapping of collaborator errors onto the outcome taxonomy.
//!
//! Anything not recognized as permanent is transient. The attempt ceiling
//! bounds the cost of guessing wrong.

use crate::local::LocalError;
use crate::remote::{RemoteError, RECORD_GONE_FAULTS};
use syncbridge_core::SyncFailure;
use syncbridge_store::StoreError;

/// Fault names and message fragments the remote uses for errors that will
/// not go away on retry.
const PERMANENT_FAULTS: &[&str] = &[
    "accesserror",
    "accessdenied",
    "validationerror",
    "usererror",
];

/// Fragments that mark a fault as a concurrency hiccup.
const TRANSIENT_FAULTS: &[&str] = &[
    "serialization",
    "could not serialize",
    "concurrent update",
    "deadlock",
    "locked",
    "lock not available",
    "lock timeout",
    "could not obtain lock",
];

/// Classifies a remote error.
pub fn classify_remote(error: &RemoteError) -> SyncFailure {
    let message = error.to_string();
    match error {
        RemoteError::Timeout(_) | RemoteError::Connection(_) | RemoteError::Other(_) => {
            SyncFailure::transient(message)
        }
        RemoteError::RateLimited { retry_after } => {
            let failure = SyncFailure::transient(message);
            match retry_after {
                Some(delay) => failure.with_retry_after(*delay),
                None => failure,
            }
        }
        RemoteError::Http { status, .. } => match *status {
            408 | 429 => SyncFailure::transient(message),
            s if s >= 500 => SyncFailure::transient(message),
            _ => SyncFailure::permanent(message),
        },
        RemoteError::Fault { .. } => {
            let haystack = error.fault_text();
            if TRANSIENT_FAULTS.iter().any(|f| haystack.contains(f)) {
                SyncFailure::transient(message)
            } else if PERMANENT_FAULTS
                .iter()
                .chain(RECORD_GONE_FAULTS)
                .any(|f| haystack.contains(f))
            {
                SyncFailure::permanent(message)
            } else {
                SyncFailure::transient(message)
            }
        }
        RemoteError::AccessDenied(_)
        | RemoteError::Validation(_)
        | RemoteError::MissingModel(_)
        | RemoteError::NotFound { .. } => SyncFailure::permanent(message),
    }
}

/// Classifies a local store error.
pub fn classify_local(error: &LocalError) -> SyncFailure {
    let message = error.to_string();
    match error {
        LocalError::NotFound { .. } | LocalError::Validation(_) => SyncFailure::permanent(message),
        LocalError::Unavailable(_) | LocalError::Other(_) => SyncFailure::transient(message),
    }
}

/// Classifies a queue or map error hit while processing a job.
///
/// Storage problems are never the job's fault.
pub fn classify_store(error: &StoreError) -> SyncFailure {
    SyncFailure::transient(error.to_string())
}

impl From<RemoteError> for SyncFailure {
    fn from(error: RemoteError) -> Self {
        classify_remote(&error)
    }
}

impl From<LocalError> for SyncFailure {
    fn from(error: LocalError) -> Self {
        classify_local(&error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use syncbridge_core::ErrorKind;

    fn kind(error: RemoteError) -> ErrorKind {
        classify_remote(&error).kind
    }

    #[test]
    fn network_errors_are_transient() {
        assert_eq!(kind(RemoteError::Timeout("read".into())), ErrorKind::Transient);
        assert_eq!(kind(RemoteError::Connection("reset".into())), ErrorKind::Transient);
        assert_eq!(kind(RemoteError::Other("weird".into())), ErrorKind::Transient);
    }

    #[test]
    fn http_statuses() {
        assert_eq!(kind(RemoteError::http(503, "unavailable")), ErrorKind::Transient);
        assert_eq!(kind(RemoteError::http(500, "oops")), ErrorKind::Transient);
        assert_eq!(kind(RemoteError::http(429, "slow down")), ErrorKind::Transient);
        assert_eq!(kind(RemoteError::http(408, "timeout")), ErrorKind::Transient);
        assert_eq!(kind(RemoteError::http(401, "login")), ErrorKind::Permanent);
        assert_eq!(kind(RemoteError::http(403, "forbidden")), ErrorKind::Permanent);
        assert_eq!(kind(RemoteError::http(404, "no route")), ErrorKind::Permanent);
        assert_eq!(kind(RemoteError::http(422, "bad")), ErrorKind::Permanent);
    }

    #[test]
    fn rate_limit_carries_hint() {
        let failure = classify_remote(&RemoteError::RateLimited {
            retry_after: Some(Duration::from_secs(120)),
        });
        assert!(failure.is_retryable());
        assert_eq!(failure.retry_after, Some(Duration::from_secs(120)));

        let failure = classify_remote(&RemoteError::RateLimited { retry_after: None });
        assert_eq!(failure.retry_after, None);
    }

    #[test]
    fn faults() {
        assert_eq!(
            kind(RemoteError::fault("ValidationError", "partner_id is required")),
            ErrorKind::Permanent
        );
        assert_eq!(
            kind(RemoteError::fault("odoo.exceptions.AccessError", "no rights")),
            ErrorKind::Permanent
        );
        assert_eq!(
            kind(RemoteError::fault("UserError", "cannot confirm a cancelled order")),
            ErrorKind::Permanent
        );
        assert_eq!(
            kind(RemoteError::Fault {
                code: None,
                message: "Record does not exist or has been deleted".into()
            }),
            ErrorKind::Permanent
        );
        assert_eq!(
            kind(RemoteError::Fault {
                code: None,
                message: "could not serialize access due to concurrent update".into()
            }),
            ErrorKind::Transient
        );
        assert_eq!(
            kind(RemoteError::fault("OperationalError", "lock not available")),
            ErrorKind::Transient
        );
        assert_eq!(
            kind(RemoteError::fault("KeyError", "something odd")),
            ErrorKind::Transient
        );
    }

    #[test]
    fn lock_fragments_do_not_match_inside_words() {
        assert_eq!(
            kind(RemoteError::fault("UserError", "partner is blocked")),
            ErrorKind::Permanent
        );
        assert_eq!(
            kind(RemoteError::fault("ValidationError", "clock skew on invoice date")),
            ErrorKind::Permanent
        );
        assert_eq!(
            kind(RemoteError::fault("OperationalError", "row is locked by another transaction")),
            ErrorKind::Transient
        );
        assert_eq!(
            kind(RemoteError::fault("OperationalError", "deadlock detected")),
            ErrorKind::Transient
        );
    }

    #[test]
    fn explicit_permanent_variants() {
        assert_eq!(kind(RemoteError::AccessDenied("x".into())), ErrorKind::Permanent);
        assert_eq!(kind(RemoteError::Validation("x".into())), ErrorKind::Permanent);
        assert_eq!(kind(RemoteError::MissingModel("x.y".into())), ErrorKind::Permanent);
        assert_eq!(
            kind(RemoteError::NotFound {
                model: "sale.order".into(),
                id: 4
            }),
            ErrorKind::Permanent
        );
    }

    #[test]
    fn local_errors() {
        let missing = LocalError::NotFound {
            entity_type: "order".into(),
            id: 1,
        };
        assert_eq!(classify_local(&missing).kind, ErrorKind::Permanent);
        assert_eq!(
            classify_local(&LocalError::Validation("bad".into())).kind,
            ErrorKind::Permanent
        );
        assert_eq!(
            classify_local(&LocalError::Unavailable("locked".into())).kind,
            ErrorKind::Transient
        );
    }

    #[test]
    fn store_errors_are_transient() {
        assert!(classify_store(&StoreError::NotFound(7)).is_retryable());
    }

    #[test]
    fn from_impls_keep_message() {
        let failure: SyncFailure = RemoteError::Validation("name is required".into()).into();
        assert_eq!(failure.message, "validation error: name is required");
    }
}
