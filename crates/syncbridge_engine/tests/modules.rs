//! Exclusive groups, echo suppression and dependency edge cases.

use serde_json::json;
use std::sync::Arc;
use syncbridge_core::{ErrorKind, Fields, JobAction, JobStatus, ModuleRegistration, SyncDirection};
use syncbridge_engine::{Dependency, EngineConfig, EntityHandler, LocalStore, Module, SyncModule};
use syncbridge_testkit::prelude::*;

#[test]
fn preferred_module_owns_the_group() {
    init_test_tracing();
    let h = Harness::builder()
        .module(calendar_module())
        .module(bookings_module())
        .build();
    let registry = h.ctx.registry();

    assert_eq!(registry.active_module(CALENDAR_GROUP).as_deref(), Some(BOOKINGS));
    assert!(registry.is_dormant(CALENDAR_SYNC));
    assert!(h
        .capture
        .local_changed(CALENDAR_SYNC, "booking", JobAction::Create, 1, Fields::new())
        .unwrap()
        .is_none());
    assert!(h
        .capture
        .local_changed(BOOKINGS, "booking", JobAction::Create, 1, Fields::new())
        .unwrap()
        .is_some());

    registry.set_enabled(BOOKINGS, false).unwrap();
    assert_eq!(registry.active_module(CALENDAR_GROUP).as_deref(), Some(CALENDAR_SYNC));
    registry.set_enabled(CALENDAR_SYNC, false).unwrap();
    assert_eq!(registry.active_module(CALENDAR_GROUP), None);
}

#[test]
fn equal_priorities_fall_back_to_registration_order() {
    let module = |id: &str| {
        Module::builder(
            ModuleRegistration::new(id)
                .with_entity("event", "calendar.event")
                .with_direction(SyncDirection::PushOnly)
                .in_exclusive_group("agenda", 5),
        )
        .entity("event", EntityHandler::new(|_, _| Ok(Fields::new())))
        .build()
        .unwrap()
    };
    let h = Harness::builder().module(module("second")).module(module("first")).build();
    assert_eq!(h.ctx.registry().active_module("agenda").as_deref(), Some("second"));
}

#[test]
fn pulled_records_do_not_echo_back() {
    init_test_tracing();
    let h = Harness::builder()
        .module(calendar_module())
        .observe_local_writes()
        .build();
    let remote_id = h.remote.insert(
        "calendar.event",
        fields(json!({ "name": "Standup", "start": "2024-06-03 09:00" })),
    );

    h.pull(CALENDAR_SYNC, "booking", JobAction::Create, remote_id);
    assert_eq!(h.drain().completed, 1);

    let local_id = h.map().get_local_id(CALENDAR_SYNC, "booking", remote_id).unwrap().unwrap();
    assert_eq!(h.local.get("booking", local_id).unwrap()["name"], json!("Standup"));
    assert!(h.jobs(JobStatus::Pending).is_empty());
    assert_eq!(h.remote.calls(RemoteOp::Create), 0);
    assert_eq!(h.remote.calls(RemoteOp::Write), 0);

    // A genuine local edit afterwards is captured and pushed as an update.
    h.local
        .save("booking", &fields(json!({ "name": "Standup (moved)" })), Some(local_id))
        .unwrap();
    assert_eq!(h.jobs(JobStatus::Pending).len(), 1);
    h.drain();
    assert_eq!(h.remote.get("calendar.event", remote_id).unwrap()["name"], json!("Standup (moved)"));
    assert_eq!(h.remote.calls(RemoteOp::Create), 0);
}

#[test]
fn remote_delete_removes_local_record_quietly() {
    let h = Harness::builder()
        .module(calendar_module())
        .observe_local_writes()
        .build();
    h.seed_local("booking", 4, json!({ "name": "Dentist" }));
    h.map().save(CALENDAR_SYNC, "booking", 4, 40, "calendar.event").unwrap();

    h.capture
        .remote_changed(CALENDAR_SYNC, "booking", JobAction::Delete, 40, Fields::new())
        .unwrap()
        .unwrap();
    h.drain();

    assert!(h.local.get("booking", 4).is_none());
    assert_eq!(h.remote_id(CALENDAR_SYNC, "booking", 4), None);
    assert!(h.jobs(JobStatus::Pending).is_empty());
}

fn chain_module(depends: fn(i64) -> Option<i64>) -> Module {
    Module::builder(
        ModuleRegistration::new("tree")
            .with_entity("node", "res.node")
            .with_direction(SyncDirection::PushOnly),
    )
    .entity(
        "node",
        EntityHandler::new(|_, record| Ok(fields(json!({ "name": record.str("name") }))))
            .dependencies(move |_, record| {
                let id = record.local_id.unwrap_or_default();
                Ok(depends(id).map(|parent| Dependency::new("node", parent)).into_iter().collect())
            }),
    )
    .build()
    .unwrap()
}

fn seed_nodes(h: &Harness, count: i64) {
    for id in 1..=count {
        h.seed_local("node", id, json!({ "name": format!("node {}", id) }));
    }
}

#[test]
fn dependency_cycle_is_permanent() {
    init_test_tracing();
    // 1 -> 2 -> 3 -> 1
    let h = Harness::builder()
        .module(chain_module(|id| Some(id % 3 + 1)))
        .build();
    seed_nodes(&h, 3);

    let job = h.push("tree", "node", JobAction::Create, 1);
    assert_eq!(h.run_once().dead, 1);

    let job = h.job(job);
    assert_eq!(job.last_error_kind, Some(ErrorKind::Permanent));
    assert!(job.last_error.unwrap().contains("dependency cycle: tree/node#1 -> tree/node#2 -> tree/node#3 -> tree/node#1"));
    assert_eq!(h.remote.count("res.node"), 0);
}

#[test]
fn dependency_depth_is_bounded() {
    // n depends on n + 1, up to 10.
    let module = || chain_module(|id| (id < 10).then_some(id + 1));

    let h = Harness::builder()
        .module(module())
        .config(EngineConfig::default().with_max_dependency_depth(3))
        .build();
    seed_nodes(&h, 10);
    let job = h.push("tree", "node", JobAction::Create, 1);
    assert_eq!(h.run_once().dead, 1);
    assert!(h.job(job).last_error.unwrap().contains("dependency depth exceeds 3"));
    assert_eq!(h.remote.count("res.node"), 0);

    let h = Harness::builder()
        .module(module())
        .config(EngineConfig::default().with_max_dependency_depth(9))
        .build();
    seed_nodes(&h, 10);
    h.push("tree", "node", JobAction::Create, 1);
    assert_eq!(h.run_once().completed, 1);
    assert_eq!(h.remote.count("res.node"), 10);
}

#[test]
fn unsynced_dependency_of_pull_only_module_waits() {
    let reference = Module::builder(
        ModuleRegistration::new("reference")
            .with_entity("country", "res.country")
            .with_direction(SyncDirection::PullOnly),
    )
    .entity(
        "country",
        EntityHandler::new(|_, _| Ok(Fields::new())).from_remote(|_, r| Ok(r.values.clone())),
    )
    .build()
    .unwrap();
    let partners = Module::builder(
        ModuleRegistration::new("partners")
            .with_entity("partner", "res.partner")
            .with_direction(SyncDirection::PushOnly),
    )
    .entity(
        "partner",
        EntityHandler::new(|ctx, record| {
            let country = ctx.remote_id_of("reference", "country", record.require_i64("country_id")?)?;
            Ok(fields(json!({ "name": record.str("name"), "country_id": country })))
        })
        .dependencies(|_, record| {
            Ok(vec![Dependency::new("country", record.require_i64("country_id")?).in_module("reference")])
        }),
    )
    .build()
    .unwrap();

    let h = Harness::builder()
        .module_arc(Arc::new(reference) as Arc<dyn SyncModule>)
        .module(partners)
        .build();
    h.seed_local("partner", 1, json!({ "name": "Acme", "country_id": 21 }));
    let job = h.push("partners", "partner", JobAction::Create, 1);

    assert_eq!(h.run_once().rescheduled, 1);
    assert_eq!(h.job(job).last_error_kind, Some(ErrorKind::Transient));

    // Once the country arrives by pull, the partner goes through.
    h.map().save("reference", "country", 21, 233, "res.country").unwrap();
    h.advance(std::time::Duration::from_secs(3600));
    assert_eq!(h.run_once().completed, 1);
    let partner = h.remote_id("partners", "partner", 1).unwrap();
    assert_eq!(h.remote.get("res.partner", partner).unwrap()["country_id"], json!(233));
}

#[test]
fn adopting_a_record_linked_elsewhere_is_permanent() {
    let h = Harness::builder().module(catalog_module()).build();
    h.seed_local("product", 1, json!({ "name": "Widget" }));
    h.seed_local("product", 2, json!({ "name": "WIDGET" }));
    h.push(CATALOG, "product", JobAction::Create, 1);
    h.drain();

    let job = h.push(CATALOG, "product", JobAction::Create, 2);
    assert_eq!(h.run_once().dead, 1);
    assert!(h.job(job).last_error.unwrap().contains("already linked to local #1"));
    assert_eq!(h.remote.count("product.product"), 1);
}

#[test]
fn panicking_module_dead_letters_its_job() {
    let module = Module::builder(
        ModuleRegistration::new("fragile")
            .with_entity("thing", "x.thing")
            .with_direction(SyncDirection::PushOnly),
    )
    .entity(
        "thing",
        EntityHandler::new(|_, record| match record.str("name") {
            Some(name) => Ok(fields(json!({ "name": name }))),
            None => panic!("thing without a name"),
        }),
    )
    .build()
    .unwrap();
    let h = Harness::builder().module(module).build();
    h.seed_local("thing", 1, json!({}));
    h.seed_local("thing", 2, json!({ "name": "ok" }));
    let broken = h.push("fragile", "thing", JobAction::Create, 1);
    let fine = h.push("fragile", "thing", JobAction::Create, 2);

    let report = h.run_once();
    assert_eq!(report.dead, 1);
    assert_eq!(report.completed, 1);
    assert!(h.job(broken).last_error.unwrap().contains("thing without a name"));
    assert_eq!(h.job(fine).status, JobStatus::Done);
}
