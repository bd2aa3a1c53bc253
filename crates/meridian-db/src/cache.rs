//! # Location Cache
//!
//! The store/warehouse list is read on almost every screen and written
//! rarely. It is cached process-wide with a TTL and dropped on every registry
//! write.
//!
//! ```text
//!   list() ──► fresh entry? ──yes──► Arc<Vec<Location>>
//!                  │ no
//!                  ▼
//!              SELECT ... ──► put() ──► Arc<Vec<Location>>
//!
//!   create / update / delete ──► invalidate()
//! ```

use meridian_core::Location;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

struct Entry {
    loaded_at: Instant,
    locations: Arc<Vec<Location>>,
}

pub struct LocationCache {
    ttl: Duration,
    entry: RwLock<Option<Entry>>,
}

impl std::fmt::Debug for LocationCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocationCache").field("ttl", &self.ttl).finish()
    }
}

impl LocationCache {
    pub fn new(ttl: Duration) -> Self {
        LocationCache {
            ttl,
            entry: RwLock::new(None),
        }
    }

    /// The cached list, if loaded within the TTL.
    pub async fn get(&self) -> Option<Arc<Vec<Location>>> {
        let guard = self.entry.read().await;
        guard
            .as_ref()
            .filter(|e| e.loaded_at.elapsed() < self.ttl)
            .map(|e| Arc::clone(&e.locations))
    }

    pub async fn put(&self, locations: Vec<Location>) -> Arc<Vec<Location>> {
        let locations = Arc::new(locations);
        *self.entry.write().await = Some(Entry {
            loaded_at: Instant::now(),
            locations: Arc::clone(&locations),
        });
        locations
    }

    pub async fn invalidate(&self) {
        *self.entry.write().await = None;
    }
}
