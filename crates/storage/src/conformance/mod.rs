//! Conformance test suite for `EntityStore` implementations.
//!
//! A backend-agnostic suite any `EntityStore` implementation can run to
//! verify it honours the contract the computation pipeline relies on:
//!
//! - **Fetch**: id lookup, missing ids omitted, tenant isolation
//! - **Relationships**: stable target order, unknown entities have none
//! - **Persist**: state written back, version bumped, invalid targets rejected
//!
//! # Usage
//!
//! Backend crates call [`run_conformance_suite`] with a factory that creates
//! a fresh storage instance seeded with the given fixture for each test:
//!
//! ```ignore
//! use formulary_storage::conformance::run_conformance_suite;
//!
//! #[tokio::test]
//! async fn postgres_conformance() {
//!     let report = run_conformance_suite(|fixture| async move {
//!         create_test_postgres_store(fixture).await
//!     }).await;
//!     assert!(report.is_clean(), "{report}");
//! }
//! ```

mod fetch;
mod persist;

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;

use formulary_model::{
    ComputationStatus, ComputedProperty, Entity, InheritedProperty, Property, Value,
};

use crate::memory::{StoreFixture, TenantFixture};
use crate::EntityStore;

/// Tenant holding the seeded data.
pub const TENANT: &str = "tenant-a";
/// Tenant that exists but owns nothing; used for isolation checks.
pub const OTHER_TENANT: &str = "tenant-b";

/// Outcome of one named check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    pub section: &'static str,
    pub name: &'static str,
    /// Why the check failed; `None` when it held.
    pub failure: Option<String>,
}

fn check(section: &'static str, name: &'static str, result: Result<(), String>) -> Check {
    Check {
        section,
        name,
        failure: result.err(),
    }
}

/// Every check of one suite run, in execution order.
#[derive(Debug, Clone, Default)]
pub struct ConformanceReport {
    pub checks: Vec<Check>,
}

impl ConformanceReport {
    pub fn failures(&self) -> impl Iterator<Item = &Check> {
        self.checks.iter().filter(|c| c.failure.is_some())
    }

    pub fn is_clean(&self) -> bool {
        self.failures().next().is_none()
    }
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let failing = self.failures().count();
        writeln!(f, "{} store checks, {} failing", self.checks.len(), failing)?;
        for c in self.failures() {
            let why = c.failure.as_deref().unwrap_or_default();
            writeln!(f, "  {}::{} -> {}", c.section, c.name, why)?;
        }
        Ok(())
    }
}

/// Run the full conformance suite against a storage backend.
///
/// The `factory` is called once per test with [`seed_fixture`] and must
/// return a fresh store holding exactly that data.
pub async fn run_conformance_suite<S, F, Fut>(factory: F) -> ConformanceReport
where
    S: EntityStore,
    F: Fn(StoreFixture) -> Fut,
    Fut: Future<Output = S>,
{
    let mut checks = fetch::run_fetch_tests(&factory).await;
    checks.extend(persist::run_persist_tests(&factory).await);
    ConformanceReport { checks }
}

// ── Seed data ────────────────────────────────────────────────────────────────

/// The data every conformance test starts from.
///
/// `order-1` (qty, price, computed `total`, inherited `tax_rate`) relates to
/// `line-1`, `line-2`, `line-3` in that order through `lines`, and to
/// `cust-1` through `customer`.
pub fn seed_fixture() -> StoreFixture {
    let inherited = InheritedProperty {
        name: "tax_rate".to_string(),
        from_entity: "cust-1".to_string(),
        from_property: Some("rate".to_string()),
        override_value: None,
        resolved_value: None,
        status: ComputationStatus::Pending,
        error: None,
    };

    let order = Entity::new("order-1", TENANT, "order.sales")
        .with_property(Property::literal("qty", Value::number(10.0)))
        .with_property(Property::literal("price", Value::number(5.0)))
        .with_property(Property::Computed(ComputedProperty::new(
            "total",
            "#qty * #price",
            vec!["price".to_string(), "qty".to_string()],
        )))
        .with_property(Property::Inherited(inherited));

    let customer = Entity::new("cust-1", TENANT, "customer")
        .with_property(Property::literal("rate", Value::number(0.2)));

    let lines = ["line-1", "line-2", "line-3"]
        .iter()
        .enumerate()
        .map(|(i, id)| {
            Entity::new(*id, TENANT, "order.line")
                .with_property(Property::literal("amount", Value::number((i + 1) as f64)))
        });

    let mut entities = vec![order, customer];
    entities.extend(lines);

    let mut order_rels = BTreeMap::new();
    order_rels.insert(
        "lines".to_string(),
        vec![
            "line-1".to_string(),
            "line-2".to_string(),
            "line-3".to_string(),
        ],
    );
    order_rels.insert("customer".to_string(), vec!["cust-1".to_string()]);

    let mut tenants = BTreeMap::new();
    tenants.insert(
        TENANT.to_string(),
        TenantFixture {
            entities,
            relationships: BTreeMap::from([("order-1".to_string(), order_rels)]),
        },
    );
    tenants.insert(OTHER_TENANT.to_string(), TenantFixture::default());
    StoreFixture { tenants }
}
