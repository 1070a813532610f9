//! Ready-made modules and record helpers.
//!
//! The modules model a small shop: a product catalog, sales orders that
//! reference products, and two competing calendar integrations sharing the
//! `calendar` exclusive group.

use serde_json::{json, Value};
use syncbridge_core::{Domain, Fields, ModuleRegistration, SyncDirection, SyncFailure};
use syncbridge_engine::{Dependency, EntityHandler, LocalRecord, Module};

/// Module id of [`catalog_module`].
pub const CATALOG: &str = "catalog";
/// Module id of [`orders_module`].
pub const ORDERS: &str = "orders";
/// Module id of [`bookings_module`].
pub const BOOKINGS: &str = "bookings";
/// Module id of [`calendar_module`].
pub const CALENDAR_SYNC: &str = "calendar_sync";
/// Exclusive group shared by the two calendar modules.
pub const CALENDAR_GROUP: &str = "calendar";

/// Converts a JSON object literal into [`Fields`].
///
/// # Panics
///
/// Panics if `value` is not an object.
pub fn fields(value: Value) -> Fields {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {}", other),
    }
}

fn required_str<'a>(record: &'a LocalRecord<'_>, key: &str) -> Result<&'a str, SyncFailure> {
    record.str(key).ok_or_else(|| {
        SyncFailure::permanent(format!("{} has no field '{}'", record.entity_type, key))
    })
}

fn copy(source: &Fields, keys: &[&str]) -> Fields {
    keys.iter()
        .filter_map(|k| source.get(*k).map(|v| (k.to_string(), v.clone())))
        .collect()
}

/// `catalog`: bidirectional products, deduplicated by case-insensitive name.
pub fn catalog_module() -> Module {
    Module::builder(
        ModuleRegistration::new(CATALOG)
            .with_entity("product", "product.product")
            .with_direction(SyncDirection::Bidirectional),
    )
    .entity(
        "product",
        EntityHandler::new(|_, record| {
            let name = required_str(record, "name")?;
            let mut values = copy(&record.fields, &["default_code", "list_price"]);
            values.insert("name".into(), json!(name));
            Ok(values)
        })
        .dedup(|values| {
            values
                .get("name")
                .and_then(Value::as_str)
                .map(|name| Domain::new().eq_ignore_case("name", name))
        })
        .from_remote(|_, record| Ok(copy(&record.values, &["name", "default_code", "list_price"])))
        .read_fields(["name", "default_code", "list_price"]),
    )
    .build()
    .expect("catalog module definition")
}

/// `orders`: push-only sales orders depending on catalog products.
///
/// A push whose payload carries `"confirm": true` confirms the order
/// remotely afterwards.
pub fn orders_module() -> Module {
    Module::builder(
        ModuleRegistration::new(ORDERS)
            .with_entity("order", "sale.order")
            .with_direction(SyncDirection::PushOnly),
    )
    .entity(
        "order",
        EntityHandler::new(|ctx, record| {
            let product = ctx.remote_id_of(CATALOG, "product", record.require_i64("product_id")?)?;
            let mut values = copy(&record.fields, &["name", "quantity"]);
            values.insert("product_id".into(), json!(product));
            Ok(values)
        })
        .dependencies(|_, record| {
            Ok(vec![Dependency::new("product", record.require_i64("product_id")?).in_module(CATALOG)])
        })
        .after_push(|ctx, request, remote_id| {
            if request.payload.get("confirm").and_then(Value::as_bool) == Some(true) {
                ctx.remote().execute("sale.order", "action_confirm", vec![json!([remote_id])])?;
            }
            Ok(())
        }),
    )
    .build()
    .expect("orders module definition")
}

/// `bookings`: push-only services and bookings, preferred member of the
/// `calendar` group. A booking depends on its service.
pub fn bookings_module() -> Module {
    Module::builder(
        ModuleRegistration::new(BOOKINGS)
            .with_entity("service", "product.product")
            .with_entity("booking", "calendar.event")
            .with_direction(SyncDirection::PushOnly)
            .in_exclusive_group(CALENDAR_GROUP, 10),
    )
    .entity(
        "service",
        EntityHandler::new(|_, record| {
            let name = required_str(record, "name")?;
            Ok(fields(json!({ "name": name, "type": "service" })))
        })
        .dedup(|values| {
            let name = values.get("name")?.as_str()?;
            Some(Domain::new().eq("name", name).eq("type", "service"))
        }),
    )
    .entity(
        "booking",
        EntityHandler::new(|ctx, record| {
            let service = ctx.remote_id_of(BOOKINGS, "service", record.require_i64("service_id")?)?;
            let mut values = copy(&record.fields, &["name", "start", "stop"]);
            values.insert("product_id".into(), json!(service));
            Ok(values)
        })
        .dependencies(|_, record| Ok(vec![Dependency::new("service", record.require_i64("service_id")?)])),
    )
    .build()
    .expect("bookings module definition")
}

/// `calendar_sync`: bidirectional bookings, fallback member of the
/// `calendar` group.
pub fn calendar_module() -> Module {
    Module::builder(
        ModuleRegistration::new(CALENDAR_SYNC)
            .with_entity("booking", "calendar.event")
            .with_direction(SyncDirection::Bidirectional)
            .in_exclusive_group(CALENDAR_GROUP, 20),
    )
    .entity(
        "booking",
        EntityHandler::new(|_, record| Ok(copy(&record.fields, &["name", "start", "stop"])))
            .from_remote(|_, record| Ok(copy(&record.values, &["name", "start", "stop"])))
            .read_fields(["name", "start", "stop"]),
    )
    .build()
    .expect("calendar module definition")
}
