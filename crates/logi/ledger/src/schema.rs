//! Versioned table documents and load-time schema normalization.
//!
//! Older deployments wrote loosely shaped JSON: tunnels in one flat map
//! without a facility, user totals as bare numbers, orders without an id
//! counter, records missing fields. [`normalize`] repairs all of that once
//! at load into the current versioned documents. Running it on its own
//! output changes nothing.

use crate::store::Table;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use logi_types::{
    ActionKind, ContentId, ContributionEvent, ContributionRecord, DisplayBinding, DisplayHandle,
    Facility, GuildId, Order, OrderId, OrderStatus, PageState, Priority, SurfaceId, Tunnel,
    UserId,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::warn;

/// Current on-disk schema version
pub const SCHEMA_VERSION: u32 = 2;

/// Facility that receives tunnels found in the legacy flat layout
pub const DEFAULT_FACILITY: &str = "Default Facility";

const UNKNOWN_USER: &str = "unknown";

/// `facilities` table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FacilitiesDoc {
    pub version: u32,
    pub facilities: BTreeMap<String, Facility>,
}

/// `users` table: resettable period totals
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsersDoc {
    pub version: u32,
    pub totals: BTreeMap<UserId, u64>,
}

/// `contributions` table: lifetime totals and event log
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContributionsDoc {
    pub version: u32,
    pub users: BTreeMap<UserId, ContributionRecord>,
}

/// `orders` table. `next_id` is written together with the orders so an
/// allocated id can never be handed out twice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrdersDoc {
    pub version: u32,
    pub next_id: OrderId,
    pub orders: BTreeMap<OrderId, Order>,
}

impl Default for OrdersDoc {
    fn default() -> Self {
        Self {
            version: SCHEMA_VERSION,
            next_id: OrderId::new(1),
            orders: BTreeMap::new(),
        }
    }
}

/// `display_bindings` table keyed by `guild/facility`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BindingsDoc {
    pub version: u32,
    pub bindings: BTreeMap<String, DisplayBinding>,
}

/// All tables after normalization
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedTables {
    pub facilities: FacilitiesDoc,
    pub users: UsersDoc,
    pub contributions: ContributionsDoc,
    pub orders: OrdersDoc,
    pub bindings: BindingsDoc,
    /// Tables whose stored form differed from the normalized one
    pub repaired: Vec<Table>,
}

/// Normalize raw table documents as read from storage.
pub fn normalize(raw: &BTreeMap<Table, Value>, now: DateTime<Utc>) -> NormalizedTables {
    let facilities = normalize_facilities(raw.get(&Table::Facilities), now);
    let users = normalize_users(raw.get(&Table::Users));
    let contributions = normalize_contributions(raw.get(&Table::Contributions));
    let orders = normalize_orders(raw.get(&Table::Orders), now);
    let bindings = normalize_bindings(raw.get(&Table::DisplayBindings));

    let mut repaired = Vec::new();
    let mut check = |table: Table, normalized: Value| {
        if raw.get(&table) != Some(&normalized) {
            repaired.push(table);
        }
    };
    check(Table::Facilities, to_value(&facilities));
    check(Table::Users, to_value(&users));
    check(Table::Contributions, to_value(&contributions));
    check(Table::Orders, to_value(&orders));
    check(Table::DisplayBindings, to_value(&bindings));

    NormalizedTables {
        facilities,
        users,
        contributions,
        orders,
        bindings,
        repaired,
    }
}

/// Encode a document for storage
pub fn to_value<T: Serialize>(doc: &T) -> Value {
    // Documents contain only maps with string keys, strings and numbers
    serde_json::to_value(doc).unwrap_or(Value::Null)
}

pub fn normalize_facilities(raw: Option<&Value>, now: DateTime<Utc>) -> FacilitiesDoc {
    let mut doc = FacilitiesDoc {
        version: SCHEMA_VERSION,
        facilities: BTreeMap::new(),
    };

    let Some(map) = versioned_body(raw, "facilities", Table::Facilities) else {
        return doc;
    };

    let mut orphans = BTreeMap::new();
    for (key, value) in map {
        if looks_like_tunnel(value) {
            if let Some(tunnel) = tunnel_from(key, value, now) {
                orphans.insert(key.clone(), tunnel);
            }
            continue;
        }
        match facility_from(key, value, now) {
            Some(facility) => {
                doc.facilities.insert(key.clone(), facility);
            }
            None => warn!(facility = %key, "Dropping malformed facility record"),
        }
    }

    if !orphans.is_empty() {
        let facility = doc
            .facilities
            .entry(DEFAULT_FACILITY.to_string())
            .or_insert_with(|| Facility::new(DEFAULT_FACILITY, UserId::new(UNKNOWN_USER), now));
        for (name, tunnel) in orphans {
            facility.tunnels.entry(name).or_insert(tunnel);
        }
    }

    doc
}

pub fn normalize_users(raw: Option<&Value>) -> UsersDoc {
    let mut doc = UsersDoc {
        version: SCHEMA_VERSION,
        totals: BTreeMap::new(),
    };

    let Some(map) = versioned_body(raw, "totals", Table::Users) else {
        return doc;
    };

    for (user, value) in map {
        match number(Some(value)) {
            Some(total) => {
                doc.totals.insert(UserId::new(user.clone()), whole_units(total));
            }
            None => warn!(user = %user, "Dropping malformed user total"),
        }
    }

    doc
}

pub fn normalize_contributions(raw: Option<&Value>) -> ContributionsDoc {
    let mut doc = ContributionsDoc {
        version: SCHEMA_VERSION,
        users: BTreeMap::new(),
    };

    let Some(map) = versioned_body(raw, "users", Table::Contributions) else {
        return doc;
    };

    for (user, value) in map {
        let record = match value {
            Value::Object(fields) => {
                let events: Vec<ContributionEvent> = fields
                    .get("events")
                    .or_else(|| fields.get("log"))
                    .and_then(Value::as_array)
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(|item| event_from(user, item))
                            .collect()
                    })
                    .unwrap_or_default();
                let logged: u64 = events.iter().map(|e| e.amount).sum();
                let total = number(fields.get("total"))
                    .map(whole_units)
                    .unwrap_or(logged);
                ContributionRecord { total, events }
            }
            other => match number(Some(other)) {
                Some(total) => ContributionRecord {
                    total: whole_units(total),
                    events: Vec::new(),
                },
                None => {
                    warn!(user = %user, "Dropping malformed contribution record");
                    continue;
                }
            },
        };
        doc.users.insert(UserId::new(user.clone()), record);
    }

    doc
}

pub fn normalize_orders(raw: Option<&Value>, now: DateTime<Utc>) -> OrdersDoc {
    let mut doc = OrdersDoc::default();

    let Some(Value::Object(top)) = raw else {
        if raw.is_some_and(|v| !v.is_null()) {
            warn!(table = %Table::Orders, "Table is not an object; starting empty");
        }
        return doc;
    };

    let entries = match top.get("orders") {
        Some(Value::Object(orders)) => orders,
        _ => top,
    };

    for (key, value) in entries {
        if key == "next_id" || key == "version" {
            continue;
        }
        match order_from(key, value, now) {
            Some(order) => {
                doc.orders.insert(order.id, order);
            }
            None => warn!(order = %key, "Dropping malformed order record"),
        }
    }

    let stored_next = number(top.get("next_id"))
        .filter(|n| *n >= 1.0)
        .map(|n| n as u64)
        .unwrap_or(1);
    let after_highest = doc
        .orders
        .keys()
        .next_back()
        .map(|id| id.value() + 1)
        .unwrap_or(1);
    doc.next_id = OrderId::new(stored_next.max(after_highest));

    doc
}

pub fn normalize_bindings(raw: Option<&Value>) -> BindingsDoc {
    let mut doc = BindingsDoc {
        version: SCHEMA_VERSION,
        bindings: BTreeMap::new(),
    };

    let Some(map) = versioned_body(raw, "bindings", Table::DisplayBindings) else {
        return doc;
    };

    for (key, value) in map {
        match binding_from(key, value) {
            Some(binding) => {
                doc.bindings.insert(binding.key().to_string(), binding);
            }
            None => warn!(binding = %key, "Dropping malformed display binding"),
        }
    }

    doc
}

/// Body of a table: the nested map of a versioned document, or the whole
/// object for unversioned legacy layouts
fn versioned_body<'a>(
    raw: Option<&'a Value>,
    body_key: &str,
    table: Table,
) -> Option<&'a Map<String, Value>> {
    match raw {
        None | Some(Value::Null) => None,
        Some(Value::Object(top)) => {
            if top.contains_key("version") {
                match top.get(body_key) {
                    Some(Value::Object(body)) => Some(body),
                    _ => None,
                }
            } else {
                Some(top)
            }
        }
        Some(_) => {
            warn!(table = %table, "Table is not an object; starting empty");
            None
        }
    }
}

fn looks_like_tunnel(value: &Value) -> bool {
    value.as_object().is_some_and(|fields| {
        !fields.contains_key("tunnels")
            && (fields.contains_key("total_supplies") || fields.contains_key("usage_rate"))
    })
}

fn facility_from(key: &str, value: &Value, now: DateTime<Utc>) -> Option<Facility> {
    let fields = value.as_object()?;

    let mut tunnels = BTreeMap::new();
    if let Some(Value::Object(raw_tunnels)) = fields.get("tunnels") {
        for (name, raw) in raw_tunnels {
            match tunnel_from(name, raw, now) {
                Some(tunnel) => {
                    tunnels.insert(name.clone(), tunnel);
                }
                None => warn!(facility = %key, tunnel = %name, "Dropping malformed tunnel record"),
            }
        }
    }

    Some(Facility {
        name: key.to_string(),
        tunnels,
        created_at: timestamp(fields.get("created_at")).unwrap_or(now),
        created_by: UserId::new(
            string(fields.get("created_by")).unwrap_or_else(|| UNKNOWN_USER.to_string()),
        ),
    })
}

fn tunnel_from(key: &str, value: &Value, now: DateTime<Utc>) -> Option<Tunnel> {
    let fields = value.as_object()?;
    let created_at = timestamp(fields.get("created_at")).unwrap_or(now);

    Some(Tunnel {
        name: key.to_string(),
        total_supplies: non_negative(number(fields.get("total_supplies"))),
        usage_rate: non_negative(number(fields.get("usage_rate"))),
        location: string(fields.get("location")).unwrap_or_default(),
        created_at,
        // Without a recorded update time the downtime is unknown; start
        // decaying from load time rather than guessing.
        last_updated: timestamp(fields.get("last_updated")).unwrap_or(now),
    })
}

fn event_from(user: &str, value: &Value) -> Option<ContributionEvent> {
    let fields = value.as_object()?;
    let at = timestamp(fields.get("timestamp"))?;
    let amount = number(fields.get("amount"))?;

    let action = fields
        .get("action")
        .and_then(|raw| serde_json::from_value::<ActionKind>(raw.clone()).ok())
        .unwrap_or(ActionKind::AddSupplies);

    Some(ContributionEvent {
        timestamp: at,
        actor: UserId::new(string(fields.get("actor")).unwrap_or_else(|| user.to_string())),
        action,
        tunnel: string(fields.get("tunnel"))
            .or_else(|| string(fields.get("target")))
            .unwrap_or_default(),
        amount: whole_units(amount),
    })
}

fn order_from(key: &str, value: &Value, now: DateTime<Utc>) -> Option<Order> {
    let fields = value.as_object()?;
    let id: OrderId = key
        .parse()
        .ok()
        .or_else(|| string(fields.get("id")).and_then(|raw| raw.parse().ok()))
        .or_else(|| number(fields.get("id")).map(|n| OrderId::new(n as u64)))?;

    let status = match fields.get("status").and_then(Value::as_str) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(order = %id, status = %raw, "Unknown order status; resetting to Placed");
            OrderStatus::Placed
        }),
        None => OrderStatus::Placed,
    };

    let priority = fields
        .get("priority")
        .and_then(Value::as_str)
        .and_then(|raw| raw.parse::<Priority>().ok())
        .unwrap_or_default();

    let mut timestamps = BTreeMap::new();
    if let Some(Value::Object(raw)) = fields.get("timestamps") {
        for (event, at) in raw {
            if let Some(at) = timestamp(Some(at)) {
                timestamps.insert(event.clone(), at);
            }
        }
    }
    timestamps
        .entry(OrderStatus::Placed.timestamp_key().to_string())
        .or_insert(now);

    Some(Order {
        id,
        item: string(fields.get("item")).unwrap_or_else(|| "unknown".to_string()),
        quantity: number(fields.get("quantity"))
            .map(|q| q.clamp(1.0, u32::MAX as f64) as u32)
            .unwrap_or(1),
        priority,
        status,
        requested_by: UserId::new(
            string(fields.get("requested_by")).unwrap_or_else(|| UNKNOWN_USER.to_string()),
        ),
        claimed_by: string(fields.get("claimed_by")).map(UserId::new),
        location: string(fields.get("location")).unwrap_or_default(),
        timestamps,
    })
}

fn binding_from(key: &str, value: &Value) -> Option<DisplayBinding> {
    let fields = value.as_object()?;
    let (key_guild, key_facility) = key.split_once('/').unwrap_or((key, ""));

    let guild = string(fields.get("guild")).unwrap_or_else(|| key_guild.to_string());
    let facility = string(fields.get("facility")).unwrap_or_else(|| key_facility.to_string());
    if guild.is_empty() || facility.is_empty() {
        return None;
    }

    let surface = string(fields.get("surface")).or_else(|| string(fields.get("channel_id")))?;

    let handle = match fields.get("handle") {
        Some(Value::Object(handle)) => {
            match (
                string(handle.get("surface_id")),
                string(handle.get("content_id")),
            ) {
                (Some(surface_id), Some(content_id)) => Some(DisplayHandle {
                    surface_id: SurfaceId::new(surface_id),
                    content_id: ContentId::new(content_id),
                }),
                _ => None,
            }
        }
        _ => string(fields.get("message_id")).map(|content_id| DisplayHandle {
            surface_id: SurfaceId::new(surface.clone()),
            content_id: ContentId::new(content_id),
        }),
    };

    let mut view = fields
        .get("view")
        .and_then(|raw| serde_json::from_value::<PageState>(raw.clone()).ok())
        .unwrap_or_default();
    let total = view.total_pages;
    view.set_total_pages(total);

    Some(DisplayBinding {
        guild: GuildId::new(guild),
        facility,
        surface: SurfaceId::new(surface),
        handle,
        view,
    })
}

fn number(value: Option<&Value>) -> Option<f64> {
    let parsed = match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|n| n.is_finite())
}

fn non_negative(value: Option<f64>) -> f64 {
    value.unwrap_or(0.0).max(0.0)
}

fn whole_units(value: f64) -> u64 {
    value.max(0.0).floor() as u64
}

fn string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn timestamp(value: Option<&Value>) -> Option<DateTime<Utc>> {
    match value? {
        Value::String(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|at| at.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                    .ok()
                    .map(|naive| naive.and_utc())
            }),
        Value::Number(n) => n
            .as_i64()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    fn raw(table: Table, value: Value) -> BTreeMap<Table, Value> {
        BTreeMap::from([(table, value)])
    }

    #[test]
    fn test_empty_store_normalizes_to_empty_tables() {
        let tables = normalize(&BTreeMap::new(), now());
        assert!(tables.facilities.facilities.is_empty());
        assert_eq!(tables.orders.next_id, OrderId::new(1));
        assert_eq!(tables.repaired.len(), Table::ALL.len());
    }

    #[test]
    fn test_legacy_flat_tunnels_wrap_into_default_facility() {
        let legacy = json!({
            "North": {"total_supplies": 1200, "usage_rate": 40, "created_at": "2025-02-01T10:00:00+00:00"},
            "South": {"total_supplies": -5, "usage_rate": "12.5"}
        });
        let doc = normalize_facilities(Some(&legacy), now());

        let facility = &doc.facilities[DEFAULT_FACILITY];
        assert_eq!(facility.tunnels.len(), 2);
        assert_eq!(facility.tunnels["North"].total_supplies, 1200.0);
        assert_eq!(facility.tunnels["North"].last_updated, now());
        assert_eq!(facility.tunnels["South"].total_supplies, 0.0);
        assert_eq!(facility.tunnels["South"].usage_rate, 12.5);
    }

    #[test]
    fn test_missing_fields_are_back_filled() {
        let partial = json!({
            "Facility A": {"tunnels": {"T1": {"total_supplies": 10}}}
        });
        let doc = normalize_facilities(Some(&partial), now());
        let facility = &doc.facilities["Facility A"];

        assert_eq!(facility.name, "Facility A");
        assert_eq!(facility.created_by.as_str(), "unknown");
        let tunnel = &facility.tunnels["T1"];
        assert_eq!(tunnel.usage_rate, 0.0);
        assert_eq!(tunnel.location, "");
        assert_eq!(tunnel.created_at, now());
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let mixed = BTreeMap::from([
            (
                Table::Facilities,
                json!({"T9": {"total_supplies": 50, "usage_rate": 5}}),
            ),
            (Table::Users, json!({"42": 300, "7": 12.9})),
            (
                Table::Contributions,
                json!({"42": {"total": 300, "events": [
                    {"timestamp": "2025-02-01T10:00:00Z", "tunnel": "T9", "amount": 300}
                ]}}),
            ),
            (
                Table::Orders,
                json!({"orders": {"3": {"item": "Pipe", "quantity": 5, "status": "claimed"}}}),
            ),
            (
                Table::DisplayBindings,
                json!({"g1/F": {"channel_id": "c1", "message_id": "m1"}}),
            ),
        ]);

        let first = normalize(&mixed, now());
        assert!(!first.repaired.is_empty());

        let rewritten = BTreeMap::from([
            (Table::Facilities, to_value(&first.facilities)),
            (Table::Users, to_value(&first.users)),
            (Table::Contributions, to_value(&first.contributions)),
            (Table::Orders, to_value(&first.orders)),
            (Table::DisplayBindings, to_value(&first.bindings)),
        ]);
        let second = normalize(&rewritten, now());

        assert!(second.repaired.is_empty());
        assert_eq!(second.facilities, first.facilities);
        assert_eq!(second.orders, first.orders);
        assert_eq!(second.bindings, first.bindings);
    }

    #[test]
    fn test_order_counter_never_behind_existing_ids() {
        let orders = json!({
            "next_id": 2,
            "orders": {
                "5": {"item": "Beam", "quantity": 2, "status": "Placed"},
                "bogus": {"item": "x"}
            }
        });
        let doc = normalize_orders(Some(&orders), now());
        assert_eq!(doc.orders.len(), 1);
        assert_eq!(doc.next_id, OrderId::new(6));
    }

    #[test]
    fn test_unknown_order_status_resets_to_placed() {
        let orders = json!({"1": {"item": "Pipe", "status": "lost"}});
        let doc = normalize_orders(Some(&orders), now());
        assert_eq!(doc.orders[&OrderId::new(1)].status, OrderStatus::Placed);
    }

    #[test]
    fn test_user_totals_from_legacy_numbers() {
        let doc = normalize_users(Some(&json!({"a": 10, "b": -3, "c": "x"})));
        assert_eq!(doc.totals.len(), 2);
        assert_eq!(doc.totals[&UserId::new("a")], 10);
        assert_eq!(doc.totals[&UserId::new("b")], 0);
    }

    #[test]
    fn test_contribution_events_are_kept_and_malformed_dropped() {
        let raw_doc = json!({
            "u1": {"log": [
                {"timestamp": "2025-02-01T10:00:00", "tunnel": "T1", "amount": 100},
                {"tunnel": "T1", "amount": 50}
            ]}
        });
        let doc = normalize_contributions(Some(&raw_doc));
        let record = &doc.users[&UserId::new("u1")];
        assert_eq!(record.events.len(), 1);
        assert_eq!(record.total, 100);
        assert_eq!(record.events[0].actor.as_str(), "u1");
    }

    #[test]
    fn test_legacy_binding_is_upgraded() {
        let doc = normalize_bindings(Some(&json!({
            "guild-1/Facility A": {"channel_id": "chan", "message_id": "msg"}
        })));
        let binding = &doc.bindings["guild-1/Facility A"];
        assert_eq!(binding.surface.as_str(), "chan");
        assert_eq!(
            binding.handle.as_ref().map(|h| h.content_id.as_str()),
            Some("msg")
        );
        assert_eq!(binding.view, PageState::default());
    }

    #[test]
    fn test_untouched_current_document_is_not_repaired() {
        let doc = FacilitiesDoc {
            version: SCHEMA_VERSION,
            facilities: BTreeMap::new(),
        };
        let tables = normalize(&raw(Table::Facilities, to_value(&doc)), now());
        assert!(!tables.repaired.contains(&Table::Facilities));
    }
}
