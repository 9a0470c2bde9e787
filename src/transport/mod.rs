//! Everything that crosses the network: the vehicle event stream, the stop
//! list and the route shape documents.

pub mod mbta_client;
pub mod sse;

use crate::shape_fetcher::RouteDocument;
use crate::stops::StopsDocument;
use crate::vehicles::VehiclesDocument;

pub use mbta_client::MbtaClient;
pub use sse::{ServerEvent, SseDecoder};

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("http status {status}")]
    Http { status: u16 },
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl FeedError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, FeedError::Http { status: 429 })
    }
}

/// An open server-push channel. `None` means the server closed it.
#[allow(async_fn_in_trait)]
pub trait EventChannel {
    async fn next_event(&mut self) -> Option<Result<ServerEvent, FeedError>>;
}

/// What the stream session needs from the network.
#[allow(async_fn_in_trait)]
pub trait FeedTransport {
    type Channel: EventChannel;

    async fn fetch_stops(&self) -> Result<StopsDocument, FeedError>;

    /// Current state of every tracked vehicle, fetched before each stream open.
    async fn fetch_vehicles(&self) -> Result<VehiclesDocument, FeedError>;

    async fn open_vehicle_stream(&self) -> Result<Self::Channel, FeedError>;
}

/// What the shape loader needs from the network.
#[allow(async_fn_in_trait)]
pub trait RouteFetcher {
    async fn fetch_route(&self, route_id: &str) -> Result<RouteDocument, FeedError>;
}
