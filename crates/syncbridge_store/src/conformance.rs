//! Behavior shared by every queue and map implementation.
//!
//! Each function drives a store through one scenario; the in-memory and
//! SQLite test modules run all of them.

use crate::error::StoreError;
use crate::map::EntityMapStore;
use crate::queue::{EnqueueOutcome, JobQueue};
use serde_json::json;
use std::time::Duration;
use syncbridge_core::{Clock, ErrorKind, JobAction, JobStatus, ManualClock, NewJob, Priority};

const TTL: Duration = Duration::from_secs(60);

fn push(local_id: i64) -> NewJob {
    NewJob::push("orders", "order", JobAction::Update, local_id)
}

pub fn claim_order(q: &dyn JobQueue, clock: &ManualClock) {
    let low = q.enqueue(push(1).with_priority(Priority::LOW)).unwrap();
    let normal_late = q
        .enqueue(push(2).not_before(clock.now() - 10))
        .unwrap();
    let normal_early = q
        .enqueue(push(3).not_before(clock.now() - 20))
        .unwrap();
    let high = q.enqueue(push(4).with_priority(Priority::HIGH)).unwrap();

    let ids: Vec<_> = q.claim(10, TTL).unwrap().iter().map(|j| j.id).collect();
    assert_eq!(ids, vec![high, normal_early, normal_late, low]);

    // Nothing left.
    assert!(q.claim(10, TTL).unwrap().is_empty());
}

pub fn claim_respects_next_attempt(q: &dyn JobQueue, clock: &ManualClock) {
    let later = q.enqueue(push(1).not_before(clock.now() + 5_000)).unwrap();
    let now = q.enqueue(push(2)).unwrap();

    let batch = q.claim(1, TTL).unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].id, now);
    assert_eq!(batch[0].status, JobStatus::Processing);
    assert!(batch[0].claim_token().is_some());
    assert_eq!(batch[0].claim.as_ref().unwrap().expires_at, clock.now() + 60_000);

    assert!(q.claim(10, TTL).unwrap().is_empty());
    clock.advance(Duration::from_secs(5));
    assert_eq!(q.claim(10, TTL).unwrap()[0].id, later);
}

pub fn stale_claim_is_reclaimed(q: &dyn JobQueue, clock: &ManualClock) {
    let id = q.enqueue(push(1)).unwrap();
    let first = q.claim(1, TTL).unwrap().remove(0);
    let first_token = first.claim_token().unwrap().to_string();

    // Still held.
    clock.advance(Duration::from_secs(30));
    assert!(q.claim(1, TTL).unwrap().is_empty());

    clock.advance(Duration::from_secs(31));
    let second = q.claim(1, TTL).unwrap().remove(0);
    assert_eq!(second.id, id);
    assert_ne!(second.claim_token(), Some(first_token.as_str()));
    assert_eq!(second.attempt_count, 0);

    // The first worker can no longer record an outcome.
    assert!(matches!(
        q.complete(id, &first_token),
        Err(StoreError::ClaimLost { .. })
    ));
    assert!(matches!(
        q.reschedule(id, &first_token, Duration::from_secs(1), "late"),
        Err(StoreError::ClaimLost { .. })
    ));
    assert!(matches!(
        q.kill(id, &first_token, "late", None),
        Err(StoreError::ClaimLost { .. })
    ));

    q.complete(id, second.claim_token().unwrap()).unwrap();
    assert_eq!(q.get(id).unwrap().unwrap().status, JobStatus::Done);
    assert!(matches!(
        q.complete(id, second.claim_token().unwrap()),
        Err(StoreError::ClaimLost { .. })
    ));
    assert!(matches!(q.complete(999, "x"), Err(StoreError::NotFound(999))));
}

pub fn reschedule_and_kill(q: &dyn JobQueue, clock: &ManualClock) {
    let id = q.enqueue(push(1)).unwrap();
    let job = q.claim(1, TTL).unwrap().remove(0);

    q.reschedule(id, job.claim_token().unwrap(), Duration::from_secs(10), "timeout")
        .unwrap();
    let stored = q.get(id).unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Pending);
    assert_eq!(stored.attempt_count, 1);
    assert_eq!(stored.next_attempt_at, clock.now() + 10_000);
    assert_eq!(stored.last_error.as_deref(), Some("timeout"));
    assert_eq!(stored.last_error_kind, Some(ErrorKind::Transient));
    assert!(stored.claim.is_none());

    assert!(q.claim(1, TTL).unwrap().is_empty());
    clock.advance(Duration::from_secs(10));
    let job = q.claim(1, TTL).unwrap().remove(0);
    assert_eq!(job.attempt_count, 1);

    q.kill(id, job.claim_token().unwrap(), "name is required", Some(ErrorKind::Permanent))
        .unwrap();
    let stored = q.get(id).unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Dead);
    assert_eq!(stored.last_error.as_deref(), Some("name is required"));
    assert_eq!(stored.last_error_kind, Some(ErrorKind::Permanent));

    // Dead jobs are never claimed again.
    clock.advance(Duration::from_secs(3_600));
    assert!(q.claim(10, TTL).unwrap().is_empty());
}

pub fn requeue_revives_dead_jobs(q: &dyn JobQueue, clock: &ManualClock) {
    let id = q.enqueue(push(1)).unwrap();
    assert!(matches!(
        q.requeue(id),
        Err(StoreError::InvalidState {
            status: JobStatus::Pending,
            ..
        })
    ));
    assert!(matches!(q.requeue(404), Err(StoreError::NotFound(404))));

    let job = q.claim(1, TTL).unwrap().remove(0);
    q.reschedule(id, job.claim_token().unwrap(), Duration::ZERO, "timeout")
        .unwrap();
    let job = q.claim(1, TTL).unwrap().remove(0);
    q.kill(id, job.claim_token().unwrap(), "gave up", Some(ErrorKind::Transient))
        .unwrap();

    clock.advance(Duration::from_secs(1));
    q.requeue(id).unwrap();
    let stored = q.get(id).unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Pending);
    assert_eq!(stored.attempt_count, 0);
    assert_eq!(stored.next_attempt_at, clock.now());
    assert!(stored.last_error.is_none());
    assert!(stored.last_error_kind.is_none());
    assert_eq!(q.claim(1, TTL).unwrap()[0].id, id);
}

pub fn enqueue_unique_coalesces(q: &dyn JobQueue, _clock: &ManualClock) {
    let payload = |v: i64| json!({ "v": v }).as_object().cloned().unwrap();

    let create = q
        .enqueue_unique(NewJob::push("orders", "order", JobAction::Create, 42).with_payload(payload(1)))
        .unwrap();
    assert!(!create.is_coalesced());

    // update folds into the pending create
    let update = q
        .enqueue_unique(NewJob::push("orders", "order", JobAction::Update, 42).with_payload(payload(2)))
        .unwrap();
    assert!(update.is_coalesced());
    assert_eq!(update.job_id(), create.job_id());
    let stored = q.get(create.job_id()).unwrap().unwrap();
    assert_eq!(stored.action, JobAction::Create);
    assert_eq!(stored.payload["v"], 2);

    // a different entity is a different job
    let other = q
        .enqueue_unique(NewJob::push("orders", "order", JobAction::Update, 43))
        .unwrap();
    assert!(!other.is_coalesced());

    // delete after create is kept separate
    let delete = q
        .enqueue_unique(NewJob::push("orders", "order", JobAction::Delete, 42))
        .unwrap();
    assert!(!delete.is_coalesced());

    // pulls key on the remote id
    let pull = q
        .enqueue_unique(NewJob::pull("orders", "order", JobAction::Update, 987))
        .unwrap();
    let again = q
        .enqueue_unique(NewJob::pull("orders", "order", JobAction::Update, 987).with_local_id(42))
        .unwrap();
    assert_eq!(again, EnqueueOutcome::Coalesced(pull.job_id()));
    assert_eq!(q.get(pull.job_id()).unwrap().unwrap().local_id, Some(42));

    // claimed jobs are not coalescing targets
    let before = q.stats().unwrap().total();
    let claimed = q.claim(100, TTL).unwrap();
    assert_eq!(claimed.len() as u64, before);
    let fresh = q
        .enqueue_unique(NewJob::push("orders", "order", JobAction::Update, 43))
        .unwrap();
    assert!(!fresh.is_coalesced());

    // plain enqueue never coalesces
    let a = q.enqueue(push(7)).unwrap();
    let b = q.enqueue(push(7)).unwrap();
    assert_ne!(a, b);
}

pub fn list_stats_and_purge(q: &dyn JobQueue, clock: &ManualClock) {
    for local_id in 1..=5 {
        q.enqueue(push(local_id)).unwrap();
    }
    let batch = q.claim(3, TTL).unwrap();
    q.complete(batch[0].id, batch[0].claim_token().unwrap()).unwrap();
    q.complete(batch[1].id, batch[1].claim_token().unwrap()).unwrap();
    q.kill(batch[2].id, batch[2].claim_token().unwrap(), "bad", Some(ErrorKind::Permanent))
        .unwrap();

    let stats = q.stats().unwrap();
    assert_eq!(
        (stats.pending, stats.processing, stats.done, stats.dead),
        (2, 0, 2, 1)
    );

    let all = q.list(None, 100, 0).unwrap();
    assert_eq!(all.len(), 5);
    assert!(all.windows(2).all(|w| w[0].id < w[1].id));
    assert_eq!(q.list(Some(JobStatus::Done), 100, 0).unwrap().len(), 2);
    assert_eq!(q.list(None, 2, 1).unwrap()[0].id, all[1].id);
    assert_eq!(q.list(None, 2, 4).unwrap().len(), 1);

    // Nothing is older than the cut-off yet.
    assert_eq!(q.purge_done(clock.now()).unwrap(), 0);
    clock.advance(Duration::from_secs(1));
    assert_eq!(q.purge_done(clock.now()).unwrap(), 2);
    assert_eq!(q.stats().unwrap().done, 0);
    assert_eq!(q.stats().unwrap().dead, 1);
}

pub fn mapping_lookup_both_ways(map: &dyn EntityMapStore) {
    assert_eq!(map.get_remote_id("orders", "order", 42).unwrap(), None);

    map.save("orders", "order", 42, 987, "sale.order").unwrap();
    assert_eq!(map.get_remote_id("orders", "order", 42).unwrap(), Some(987));
    assert_eq!(map.get_local_id("orders", "order", 987).unwrap(), Some(42));
    let row = map.get("orders", "order", 42).unwrap().unwrap();
    assert_eq!(row.remote_model, "sale.order");
    assert_eq!(row.created_at, 1_000_000);

    // other scopes are independent
    assert_eq!(map.get_remote_id("orders", "line", 42).unwrap(), None);
    assert_eq!(map.get_local_id("invoices", "order", 987).unwrap(), None);

    assert!(map.delete("orders", "order", 42).unwrap());
    assert!(!map.delete("orders", "order", 42).unwrap());
    assert_eq!(map.get_local_id("orders", "order", 987).unwrap(), None);

    map.save("orders", "order", 42, 987, "sale.order").unwrap();
    assert!(map.delete_by_remote("orders", "order", 987).unwrap());
    assert!(!map.delete_by_remote("orders", "order", 987).unwrap());
    assert_eq!(map.get_remote_id("orders", "order", 42).unwrap(), None);
}

pub fn mapping_conflicts(map: &dyn EntityMapStore) {
    map.save("orders", "order", 42, 987, "sale.order").unwrap();

    // identical save is idempotent
    map.save("orders", "order", 42, 987, "sale.order").unwrap();

    match map.save("orders", "order", 42, 988, "sale.order") {
        Err(StoreError::Conflict { existing, .. }) => assert_eq!(existing.remote_id, 987),
        other => panic!("expected conflict, got {:?}", other),
    }
    match map.save("orders", "order", 43, 987, "sale.order") {
        Err(StoreError::Conflict { existing, .. }) => assert_eq!(existing.local_id, 42),
        other => panic!("expected conflict, got {:?}", other),
    }
    assert_eq!(map.count(None).unwrap(), 1);

    // a new remote identity needs delete then save
    map.delete("orders", "order", 42).unwrap();
    map.save("orders", "order", 42, 988, "sale.order").unwrap();
    assert_eq!(map.get_remote_id("orders", "order", 42).unwrap(), Some(988));
}

pub fn mapping_list_and_count(map: &dyn EntityMapStore) {
    map.save("orders", "order", 2, 20, "sale.order").unwrap();
    map.save("orders", "order", 1, 10, "sale.order").unwrap();
    map.save("orders", "line", 5, 50, "sale.order.line").unwrap();
    map.save("bookings", "service", 3, 30, "product.product").unwrap();

    let orders: Vec<_> = map
        .list("orders", None)
        .unwrap()
        .into_iter()
        .map(|m| (m.entity_type, m.local_id))
        .collect();
    assert_eq!(
        orders,
        vec![
            ("line".to_string(), 5),
            ("order".to_string(), 1),
            ("order".to_string(), 2)
        ]
    );
    assert_eq!(map.list("orders", Some("order")).unwrap().len(), 2);
    assert!(map.list("missing", None).unwrap().is_empty());

    assert_eq!(map.count(None).unwrap(), 4);
    assert_eq!(map.count(Some("orders")).unwrap(), 3);
    assert_eq!(map.count(Some("bookings")).unwrap(), 1);
}
