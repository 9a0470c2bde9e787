use ahash::AHashMap;
use serde::Deserialize;
use tracing::{info, warn};

use crate::transport::{FeedError, FeedTransport};

/// Stop id -> human readable name. Filled once per process, read-only after that.
#[derive(Debug, Default, Clone)]
pub struct StopNameCache {
    names: AHashMap<String, String>,
}

#[derive(Deserialize, Debug)]
pub struct StopsDocument {
    pub data: Vec<StopResource>,
}

#[derive(Deserialize, Debug)]
pub struct StopResource {
    pub id: String,
    #[serde(default)]
    pub attributes: StopAttributes,
}

#[derive(Deserialize, Debug, Default)]
pub struct StopAttributes {
    pub name: Option<String>,
}

impl StopNameCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn get(&self, stop_id: &str) -> Option<&str> {
        self.names.get(stop_id).map(String::as_str)
    }

    /// Fills the cache only if it is still empty. Returns whether anything was written.
    ///
    /// Check-then-fill, so callers must not race two populations against each other.
    pub fn populate_if_empty<I>(&mut self, stops: I) -> bool
    where
        I: IntoIterator<Item = (String, String)>,
    {
        if !self.names.is_empty() {
            return false;
        }

        self.names.extend(stops);
        !self.names.is_empty()
    }

    /// Fetches `/stops` through the transport unless the cache already has names.
    ///
    /// A failed fetch leaves the cache empty; destinations then fall back to raw stop ids.
    pub async fn ensure_loaded<T: FeedTransport>(&mut self, transport: &T) {
        if !self.names.is_empty() {
            return;
        }

        match transport.fetch_stops().await {
            Ok(document) => {
                let pairs = document
                    .data
                    .into_iter()
                    .filter_map(|stop| stop.attributes.name.map(|name| (stop.id, name)));

                if self.populate_if_empty(pairs) {
                    info!(stops = self.names.len(), "Stop name cache populated");
                }
            }
            Err(FeedError::Http { status }) => {
                warn!(status, "Stop fetch rejected, continuing without stop names");
            }
            Err(e) => {
                warn!(error = %e, "Error fetching stops, continuing without stop names");
            }
        }
    }
}
