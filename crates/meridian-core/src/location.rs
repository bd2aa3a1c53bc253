//! # Locations and Access Grants
//!
//! Every store and warehouse is addressed by the canonical [`LocationRef`].
//! Users carry their granted locations as JSON in one of two historical
//! shapes; both are normalized here, once, at the boundary.
//!
//! ## Grant Normalization
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  users.allowed_locations / users.transfer_locations (JSON)              │
//! │                                                                         │
//! │  legacy   [1, 2]                       typed  [{"id": 1, "type": "store"}]
//! │    │                                      │   [{"id": "3", "kind": "warehouse"}]
//! │    ▼                                      ▼                             │
//! │  1 ──► {1, store} + {1, warehouse}     {1, store}, {3, warehouse}       │
//! │                                                                         │
//! │                 └───────────┬───────────┘                               │
//! │                             ▼                                           │
//! │                 LocationGrants (set of LocationRef)                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A bare legacy id carries no kind, so it grants both the store and the
//! warehouse with that id.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, ValidationError};

// =============================================================================
// Location Kind
// =============================================================================

/// Which table a location lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum LocationKind {
    Store,
    Warehouse,
}

impl LocationKind {
    pub const ALL: [LocationKind; 2] = [LocationKind::Store, LocationKind::Warehouse];

    pub const fn as_str(&self) -> &'static str {
        match self {
            LocationKind::Store => "store",
            LocationKind::Warehouse => "warehouse",
        }
    }
}

impl fmt::Display for LocationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LocationKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "store" => Ok(LocationKind::Store),
            "warehouse" => Ok(LocationKind::Warehouse),
            other => Err(ValidationError::InvalidFormat {
                field: "location_kind".to_string(),
                reason: format!("expected store or warehouse, got '{}'", other),
            }),
        }
    }
}

// =============================================================================
// Location Ref
// =============================================================================

/// Canonical `{id, kind}` address of a store or warehouse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct LocationRef {
    pub id: i64,
    pub kind: LocationKind,
}

impl LocationRef {
    #[inline]
    pub const fn new(id: i64, kind: LocationKind) -> Self {
        LocationRef { id, kind }
    }

    #[inline]
    pub const fn store(id: i64) -> Self {
        LocationRef::new(id, LocationKind::Store)
    }

    #[inline]
    pub const fn warehouse(id: i64) -> Self {
        LocationRef::new(id, LocationKind::Warehouse)
    }
}

impl fmt::Display for LocationRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

// =============================================================================
// Raw Grants (boundary form)
// =============================================================================

/// An id that arrived as a JSON number or a numeric string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawId {
    Number(i64),
    Text(String),
}

impl RawId {
    fn parse(&self) -> Option<i64> {
        match self {
            RawId::Number(n) => Some(*n),
            RawId::Text(s) => s.trim().parse().ok(),
        }
    }
}

/// One entry of a stored grant list, in either historical shape.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawLocationGrant {
    /// Legacy flat id: `1` or `"1"`.
    Bare(RawId),
    /// Typed object: `{"id": 1, "type": "store"}` or `{"id": 1, "kind": "store"}`.
    Typed {
        id: RawId,
        #[serde(rename = "type", alias = "kind", default)]
        kind: Option<String>,
    },
}

impl RawLocationGrant {
    /// Expands this entry into canonical refs.
    ///
    /// Unparseable ids and unknown kinds yield nothing.
    pub fn expand(&self) -> Vec<LocationRef> {
        let (id, kind) = match self {
            RawLocationGrant::Bare(id) => (id.parse(), None),
            RawLocationGrant::Typed { id, kind } => (id.parse(), kind.as_deref()),
        };
        let Some(id) = id else {
            return Vec::new();
        };
        match kind {
            None => LocationKind::ALL
                .iter()
                .map(|k| LocationRef::new(id, *k))
                .collect(),
            Some(k) => k
                .parse::<LocationKind>()
                .map(|k| vec![LocationRef::new(id, k)])
                .unwrap_or_default(),
        }
    }
}

// =============================================================================
// Location Grants
// =============================================================================

/// The normalized set of locations a user may act on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, TS)]
#[ts(export)]
pub struct LocationGrants {
    locations: BTreeSet<LocationRef>,
}

impl LocationGrants {
    pub fn new(locations: impl IntoIterator<Item = LocationRef>) -> Self {
        LocationGrants {
            locations: locations.into_iter().collect(),
        }
    }

    /// Normalizes raw entries from either shape.
    pub fn from_raw<'a>(entries: impl IntoIterator<Item = &'a RawLocationGrant>) -> Self {
        LocationGrants::new(entries.into_iter().flat_map(RawLocationGrant::expand))
    }

    /// Decodes a stored JSON grant list.
    ///
    /// `null` and empty strings mean no grants. Individual entries that match
    /// neither shape are skipped; a value that is not a list is rejected.
    pub fn from_json(raw: Option<&str>) -> CoreResult<Self> {
        let raw = match raw.map(str::trim) {
            None | Some("") | Some("null") => return Ok(LocationGrants::default()),
            Some(r) => r,
        };
        let values: Vec<serde_json::Value> = serde_json::from_str(raw).map_err(|e| {
            CoreError::Validation(ValidationError::InvalidFormat {
                field: "location grants".to_string(),
                reason: e.to_string(),
            })
        })?;
        let entries: Vec<RawLocationGrant> = values
            .into_iter()
            .filter_map(|v| serde_json::from_value(v).ok())
            .collect();
        Ok(LocationGrants::from_raw(&entries))
    }

    /// Union of two grant sets (allowed ∪ transfer).
    pub fn union(mut self, other: LocationGrants) -> Self {
        self.locations.extend(other.locations);
        self
    }

    #[inline]
    pub fn contains(&self, location: &LocationRef) -> bool {
        self.locations.contains(location)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LocationRef> {
        self.locations.iter()
    }
}

// =============================================================================
// Roles and Permission Checks
// =============================================================================

/// User role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Staff,
}

impl Role {
    #[inline]
    pub const fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }
}

/// Whether a user may stage, confirm, discard, or execute a transfer.
///
/// Admins always may. Everyone else needs a grant on at least one end.
pub fn can_manage_transfer(
    role: Role,
    grants: &LocationGrants,
    from: &LocationRef,
    to: &LocationRef,
) -> bool {
    role.is_admin() || grants.contains(from) || grants.contains(to)
}

/// Whether a user may act on a single location.
pub fn can_access_location(role: Role, grants: &LocationGrants, location: &LocationRef) -> bool {
    role.is_admin() || grants.contains(location)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_ids_expand_to_both_kinds() {
        let grants = LocationGrants::from_json(Some("[1, 2]")).unwrap();
        assert!(grants.contains(&LocationRef::store(1)));
        assert!(grants.contains(&LocationRef::warehouse(1)));
        assert!(grants.contains(&LocationRef::warehouse(2)));
        assert_eq!(grants.iter().count(), 4);
    }

    #[test]
    fn test_typed_entries_accept_type_or_kind_and_string_ids() {
        let raw = r#"[{"id": 1, "type": "store"}, {"id": "3", "kind": "Warehouse"}]"#;
        let grants = LocationGrants::from_json(Some(raw)).unwrap();
        assert!(grants.contains(&LocationRef::store(1)));
        assert!(!grants.contains(&LocationRef::warehouse(1)));
        assert!(grants.contains(&LocationRef::warehouse(3)));
    }

    #[test]
    fn test_malformed_entries_are_skipped() {
        let raw = r#"[{"id": "abc", "type": "store"}, {"id": 4, "type": "kiosk"}, 5]"#;
        let grants = LocationGrants::from_json(Some(raw)).unwrap();
        assert_eq!(grants.iter().count(), 2);
        assert!(grants.contains(&LocationRef::store(5)));
    }

    #[test]
    fn test_null_and_non_list() {
        assert!(LocationGrants::from_json(None).unwrap().is_empty());
        assert!(LocationGrants::from_json(Some("null")).unwrap().is_empty());
        assert!(LocationGrants::from_json(Some("{\"id\": 1}")).is_err());
    }

    #[test]
    fn test_transfer_permission_same_for_both_forms() {
        let from = LocationRef::warehouse(1);
        let to = LocationRef::store(9);

        let legacy = LocationGrants::from_json(Some("[1]")).unwrap();
        let typed = LocationGrants::from_json(Some(r#"[{"id":1,"type":"warehouse"}]"#)).unwrap();
        assert!(can_manage_transfer(Role::Staff, &legacy, &from, &to));
        assert!(can_manage_transfer(Role::Staff, &typed, &from, &to));

        let other = LocationGrants::from_json(Some(r#"[{"id":2,"type":"store"}]"#)).unwrap();
        assert!(!can_manage_transfer(Role::Staff, &other, &from, &to));
        assert!(can_manage_transfer(Role::Admin, &other, &from, &to));
    }

    #[test]
    fn test_union_of_allowed_and_transfer() {
        let allowed = LocationGrants::new([LocationRef::store(1)]);
        let transfer = LocationGrants::new([LocationRef::warehouse(2)]);
        let all = allowed.union(transfer);
        assert!(all.contains(&LocationRef::store(1)));
        assert!(all.contains(&LocationRef::warehouse(2)));
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!("STORE".parse::<LocationKind>().unwrap(), LocationKind::Store);
        assert!("shop".parse::<LocationKind>().is_err());
    }
}
