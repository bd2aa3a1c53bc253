//! # Request Context
//!
//! The acting user, their role and normalized grants, and a request id.
//! Threaded explicitly through every engine call; nothing reads "the current
//! user" from ambient state.

use serde::Serialize;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::location::{can_access_location, can_manage_transfer, LocationGrants, LocationRef, Role};
use crate::types::User;

#[derive(Debug, Clone, Serialize)]
pub struct RequestContext {
    pub request_id: Uuid,
    pub user_id: Option<i64>,
    pub username: Option<String>,
    pub role: Role,
    pub grants: LocationGrants,
}

impl RequestContext {
    /// Context for calls with no authenticated user (seeding, maintenance,
    /// tests). Acts as admin.
    pub fn system() -> Self {
        RequestContext {
            request_id: Uuid::new_v4(),
            user_id: None,
            username: Some("system".to_string()),
            role: Role::Admin,
            grants: LocationGrants::default(),
        }
    }

    /// Builds a context from a user row, normalizing
    /// `allowed_locations ∪ transfer_locations`.
    pub fn for_user(user: &User) -> CoreResult<Self> {
        let allowed = LocationGrants::from_json(user.allowed_locations.as_deref())?;
        let transfer = LocationGrants::from_json(user.transfer_locations.as_deref())?;
        Ok(RequestContext {
            request_id: Uuid::new_v4(),
            user_id: Some(user.id),
            username: Some(user.username.clone()),
            role: user.role,
            grants: allowed.union(transfer),
        })
    }

    pub fn with_request_id(mut self, request_id: Uuid) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn ensure_can_manage_transfer(&self, from: &LocationRef, to: &LocationRef) -> CoreResult<()> {
        if can_manage_transfer(self.role, &self.grants, from, to) {
            Ok(())
        } else {
            Err(CoreError::permission_denied(format!(
                "no access to {} or {}",
                from, to
            )))
        }
    }

    pub fn ensure_location_access(&self, location: &LocationRef) -> CoreResult<()> {
        if can_access_location(self.role, &self.grants, location) {
            Ok(())
        } else {
            Err(CoreError::permission_denied(format!("no access to {}", location)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn staff(allowed: Option<&str>, transfer: Option<&str>) -> User {
        User {
            id: 5,
            username: "seller".to_string(),
            role: Role::Staff,
            allowed_locations: allowed.map(str::to_string),
            transfer_locations: transfer.map(str::to_string),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_grants_are_union_of_both_lists() {
        let user = staff(Some(r#"[{"id":1,"type":"store"}]"#), Some("[2]"));
        let ctx = RequestContext::for_user(&user).unwrap();
        assert!(ctx.ensure_location_access(&LocationRef::store(1)).is_ok());
        assert!(ctx.ensure_location_access(&LocationRef::warehouse(2)).is_ok());
        assert!(ctx.ensure_location_access(&LocationRef::warehouse(1)).is_err());
    }

    #[test]
    fn test_staff_without_grants_is_denied() {
        let ctx = RequestContext::for_user(&staff(None, None)).unwrap();
        let err = ctx
            .ensure_can_manage_transfer(&LocationRef::store(1), &LocationRef::store(2))
            .unwrap_err();
        assert!(matches!(err, CoreError::PermissionDenied { .. }));
    }

    #[test]
    fn test_system_context_is_admin() {
        let ctx = RequestContext::system();
        assert!(ctx
            .ensure_can_manage_transfer(&LocationRef::store(1), &LocationRef::store(2))
            .is_ok());
    }
}
