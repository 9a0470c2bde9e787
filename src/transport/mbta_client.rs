use super::sse::{ServerEvent, SseDecoder};
use super::{EventChannel, FeedError, FeedTransport, RouteFetcher};
use crate::shape_fetcher::RouteDocument;
use crate::stops::StopsDocument;
use crate::vehicles::VehiclesDocument;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::LocalBoxStream;
use itertools::Itertools;
use std::collections::VecDeque;
use std::time::Duration;

const API_KEY_HEADER: &str = "x-api-key";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for the MBTA v3 JSON:API.
#[derive(Clone)]
pub struct MbtaClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    route_types: Vec<u8>,
}

impl MbtaClient {
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        api_key: Option<String>,
        route_types: Vec<u8>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            route_types,
        }
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        let request = self.client.get(format!("{}{}", self.base_url, path));

        match &self.api_key {
            Some(key) => request.header(API_KEY_HEADER, key),
            None => request,
        }
    }

    fn vehicles_request(&self) -> reqwest::RequestBuilder {
        let route_types = self.route_types.iter().join(",");

        self.get("/vehicles")
            .query(&[("filter[route_type]", route_types.as_str())])
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, FeedError> {
        let response = request.timeout(REQUEST_TIMEOUT).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::Http {
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await?;

        serde_json::from_slice::<T>(&body).map_err(|e| FeedError::Malformed(e.to_string()))
    }
}

impl FeedTransport for MbtaClient {
    type Channel = SseChannel;

    async fn fetch_stops(&self) -> Result<StopsDocument, FeedError> {
        self.get_json(self.get("/stops")).await
    }

    async fn fetch_vehicles(&self) -> Result<VehiclesDocument, FeedError> {
        self.get_json(self.vehicles_request()).await
    }

    async fn open_vehicle_stream(&self) -> Result<SseChannel, FeedError> {
        // no timeout here, the stream is meant to stay open
        let response = self
            .vehicles_request()
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::Http {
                status: status.as_u16(),
            });
        }

        Ok(SseChannel {
            body: response.bytes_stream().boxed_local(),
            decoder: SseDecoder::new(),
            pending: VecDeque::new(),
        })
    }
}

impl RouteFetcher for MbtaClient {
    async fn fetch_route(&self, route_id: &str) -> Result<RouteDocument, FeedError> {
        let request = self
            .get(&format!("/routes/{}", route_id))
            .query(&[("include", "route_patterns.representative_trip.shape")]);

        self.get_json(request).await
    }
}

pub struct SseChannel {
    body: LocalBoxStream<'static, Result<Bytes, reqwest::Error>>,
    decoder: SseDecoder,
    pending: VecDeque<ServerEvent>,
}

impl EventChannel for SseChannel {
    async fn next_event(&mut self) -> Option<Result<ServerEvent, FeedError>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(Ok(event));
            }

            match self.body.next().await? {
                Ok(chunk) => self.pending.extend(self.decoder.push(&chunk)),
                Err(e) => return Some(Err(FeedError::Network(e))),
            }
        }
    }
}
