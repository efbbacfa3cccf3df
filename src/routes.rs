//! Route resolution: vendor route / trip ids to friendly route names.
//!
//! A [`RouteDirectory`] is built once from static schedules and then shared
//! read-only behind an `Arc`; a static refresh builds a new directory instead of
//! mutating the current one.

use std::collections::HashMap;
use std::sync::Arc;

/// Maps vendor ids to a stable friendly route name.
pub trait RouteResolver: Send + Sync {
    /// Returns `None` when `vendor_id` is neither a known route id nor a known
    /// trip id for `agency_id`.
    fn resolve(&self, agency_id: &str, vendor_id: &str) -> Option<String>;
}

/// Display ordering for friendly route names.
pub trait RouteOrdering: Send + Sync {
    fn sort_order(&self, route: &str) -> Option<u32>;
}

/// Routes of a single agency, as read from its static schedule.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    /// route_id -> friendly name
    names: HashMap<String, String>,
    /// trip_id -> route_id
    trips: HashMap<String, String>,
    /// friendly name -> route_sort_order
    sort_orders: HashMap<String, u32>,
}

impl RouteTable {
    pub fn insert_route(&mut self, route_id: &str, friendly_name: &str, sort_order: Option<u32>) {
        self.names
            .insert(route_id.to_string(), friendly_name.to_string());
        if let Some(order) = sort_order {
            self.sort_orders.insert(friendly_name.to_string(), order);
        }
    }

    pub fn insert_trip(&mut self, trip_id: &str, route_id: &str) {
        self.trips.insert(trip_id.to_string(), route_id.to_string());
    }

    pub fn route_count(&self) -> usize {
        self.names.len()
    }

    pub fn trip_count(&self) -> usize {
        self.trips.len()
    }

    /// Looks `vendor_id` up as a route id first, then as a trip id.
    pub fn lookup(&self, vendor_id: &str) -> Option<&str> {
        self.names
            .get(vendor_id)
            .or_else(|| {
                self.trips
                    .get(vendor_id)
                    .and_then(|route_id| self.names.get(route_id))
            })
            .map(String::as_str)
    }

    pub fn sort_order(&self, route: &str) -> Option<u32> {
        self.sort_orders.get(route).copied()
    }
}

impl RouteOrdering for RouteTable {
    fn sort_order(&self, route: &str) -> Option<u32> {
        RouteTable::sort_order(self, route)
    }
}

/// Immutable per-agency route tables.
#[derive(Debug, Clone, Default)]
pub struct RouteDirectory {
    agencies: HashMap<String, Arc<RouteTable>>,
}

impl RouteDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of this directory with `agency_id`'s table replaced.
    pub fn with_agency(&self, agency_id: &str, table: Arc<RouteTable>) -> Self {
        let mut agencies = self.agencies.clone();
        agencies.insert(agency_id.to_string(), table);
        Self { agencies }
    }

    pub fn table(&self, agency_id: &str) -> Option<&RouteTable> {
        self.agencies.get(agency_id).map(Arc::as_ref)
    }
}

impl RouteResolver for RouteDirectory {
    fn resolve(&self, agency_id: &str, vendor_id: &str) -> Option<String> {
        self.table(agency_id)?.lookup(vendor_id).map(str::to_string)
    }
}

impl RouteOrdering for RouteDirectory {
    /// Lowest sort order any agency assigns to `route`.
    fn sort_order(&self, route: &str) -> Option<u32> {
        self.agencies
            .values()
            .filter_map(|t| t.sort_order(route))
            .min()
    }
}

/// Resolver for feeds that publish no static schedule: vendor ids are used
/// verbatim as route names.
pub struct PublishedIds;

impl RouteResolver for PublishedIds {
    fn resolve(&self, _agency_id: &str, vendor_id: &str) -> Option<String> {
        Some(vendor_id.to_string())
    }
}

/// Ordering used when no static schedule is available.
pub struct Alphabetical;

impl RouteOrdering for Alphabetical {
    fn sort_order(&self, _route: &str) -> Option<u32> {
        None
    }
}

/// Sorts routes by their sort order, then alphabetically for unordered routes.
pub fn sort_routes(routes: &mut [String], ordering: &dyn RouteOrdering) {
    routes.sort_by(|a, b| {
        match (ordering.sort_order(a), ordering.sort_order(b)) {
            (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.cmp(b),
        }
    });
}
