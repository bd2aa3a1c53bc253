//! # Location Registry
//!
//! Stores and warehouses. Each kind numbers its ids independently, so
//! `store:1` and `warehouse:1` are different places.
//!
//! ```text
//!   create(store, "Chilonzor")   ──► store:3      ─┐
//!   update(store:3, ...)                           ├──► LocationCache::invalidate()
//!   delete(warehouse:1)                           ─┘
//!   list()                       ──► LocationCache (TTL) or SELECT
//! ```

use chrono::Utc;
use meridian_core::validation::validate_location;
use meridian_core::{
    Location, LocationKind, LocationRef, NewLocation, NewOperation, OperationType, RequestContext,
};
use serde_json::json;
use sqlx::{SqliteConnection, SqlitePool};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::cache::LocationCache;
use crate::error::{DbError, DbResult};
use crate::pool::{begin_write, commit_within};
use crate::repository::history;

const SELECT_LOCATION: &str = "SELECT kind, id, name, address, created_at FROM locations";

pub(crate) async fn fetch(conn: &mut SqliteConnection, loc: LocationRef) -> DbResult<Location> {
    let sql = format!("{} WHERE kind = ?1 AND id = ?2", SELECT_LOCATION);
    sqlx::query_as::<_, Location>(&sql)
        .bind(loc.kind)
        .bind(loc.id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| DbError::not_found("Location", loc))
}

/// Fails with NotFound unless the location is registered.
pub(crate) async fn ensure_exists(conn: &mut SqliteConnection, loc: LocationRef) -> DbResult<()> {
    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM locations WHERE kind = ?1 AND id = ?2)")
            .bind(loc.kind)
            .bind(loc.id)
            .fetch_one(&mut *conn)
            .await?;
    if exists {
        Ok(())
    } else {
        Err(DbError::not_found("Location", loc))
    }
}

#[derive(Debug, Clone)]
pub struct LocationRepository {
    pool: SqlitePool,
    timeout: Duration,
    cache: Arc<LocationCache>,
}

impl LocationRepository {
    pub fn new(pool: SqlitePool, timeout: Duration, cache: Arc<LocationCache>) -> Self {
        LocationRepository {
            pool,
            timeout,
            cache,
        }
    }

    /// All locations, stores first, served from the cache while fresh.
    pub async fn list(&self) -> DbResult<Arc<Vec<Location>>> {
        if let Some(cached) = self.cache.get().await {
            debug!(count = cached.len(), "Location list served from cache");
            return Ok(cached);
        }

        let sql = format!("{} ORDER BY kind DESC, id", SELECT_LOCATION);
        let rows = sqlx::query_as::<_, Location>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(self.cache.put(rows).await)
    }

    pub async fn get(&self, loc: LocationRef) -> DbResult<Location> {
        let mut conn = self.pool.acquire().await?;
        fetch(&mut conn, loc).await
    }

    pub async fn create(
        &self,
        ctx: &RequestContext,
        kind: LocationKind,
        input: &NewLocation,
    ) -> DbResult<Location> {
        validate_location(input)?;

        let location = commit_within(self.timeout, "location_create", async {
            let mut tx = begin_write(&self.pool).await?;

            let id: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO locations (kind, id, name, address, created_at)
                SELECT ?1, COALESCE(MAX(id), 0) + 1, ?2, ?3, ?4
                FROM locations WHERE kind = ?1
                RETURNING id
                "#,
            )
            .bind(kind)
            .bind(input.name.trim())
            .bind(input.address.as_deref())
            .bind(Utc::now())
            .fetch_one(&mut *tx)
            .await?;

            let loc = LocationRef::new(id, kind);
            let location = fetch(&mut tx, loc).await?;

            history::record(
                &mut tx,
                ctx,
                NewOperation::new(
                    OperationType::LocationCreate,
                    "locations",
                    Some(id),
                    format!("{} created: {}", kind, location.name),
                )
                .location(loc)
                .new_data(json!(location)),
            )
            .await;

            Ok((tx, location))
        })
        .await?;

        self.cache.invalidate().await;
        info!(location = %location.location_ref(), name = %location.name, "Location created");
        Ok(location)
    }

    pub async fn update(
        &self,
        ctx: &RequestContext,
        loc: LocationRef,
        input: &NewLocation,
    ) -> DbResult<Location> {
        validate_location(input)?;

        let location = commit_within(self.timeout, "location_update", async {
            let mut tx = begin_write(&self.pool).await?;
            let before = fetch(&mut tx, loc).await?;

            sqlx::query("UPDATE locations SET name = ?1, address = ?2 WHERE kind = ?3 AND id = ?4")
                .bind(input.name.trim())
                .bind(input.address.as_deref())
                .bind(loc.kind)
                .bind(loc.id)
                .execute(&mut *tx)
                .await?;

            let after = fetch(&mut tx, loc).await?;

            history::record(
                &mut tx,
                ctx,
                NewOperation::new(
                    OperationType::LocationUpdate,
                    "locations",
                    Some(loc.id),
                    format!("{} updated: {}", loc.kind, after.name),
                )
                .location(loc)
                .old_data(json!(before))
                .new_data(json!(after)),
            )
            .await;

            Ok((tx, after))
        })
        .await?;

        self.cache.invalidate().await;
        debug!(location = %loc, "Location updated");
        Ok(location)
    }

    /// Deletes a location. Fails with an integrity conflict while stock rows
    /// still reference it.
    pub async fn delete(&self, ctx: &RequestContext, loc: LocationRef) -> DbResult<()> {
        commit_within(self.timeout, "location_delete", async {
            let mut tx = begin_write(&self.pool).await?;
            let before = fetch(&mut tx, loc).await?;

            sqlx::query("DELETE FROM locations WHERE kind = ?1 AND id = ?2")
                .bind(loc.kind)
                .bind(loc.id)
                .execute(&mut *tx)
                .await?;

            history::record(
                &mut tx,
                ctx,
                NewOperation::new(
                    OperationType::LocationDelete,
                    "locations",
                    Some(loc.id),
                    format!("{} deleted: {}", loc.kind, before.name),
                )
                .location(loc)
                .old_data(json!(before)),
            )
            .await;

            Ok((tx, ()))
        })
        .await?;

        self.cache.invalidate().await;
        info!(location = %loc, "Location deleted");
        Ok(())
    }
}
