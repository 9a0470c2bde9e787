//! Sequential, rate-limit-friendly loading of route geometry onto the map.

use crate::polyline_codec::{self, DecodeError};
use crate::route_catalog::RouteCatalog;
use crate::surface::{
    LineLayer, RenderSurface, SurfaceError, layer_id_for_route, source_id_for_route,
};
use crate::transport::{FeedError, RouteFetcher};
use ahash::AHashMap;
use geo_types::LineString;
use geojson::{Feature, FeatureCollection, Geometry, JsonObject};
use rgb::RGB;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub const DEFAULT_ROUTE_COLOUR: RGB<u8> = RGB::new(0x88, 0x88, 0x88);
const DEFAULT_LINE_WIDTH: f64 = 4.0;

// JSON:API layout of /routes/{id}?include=route_patterns.representative_trip.shape

#[derive(Deserialize, Debug, Clone)]
pub struct RouteDocument {
    pub data: RouteResource,
    #[serde(default)]
    pub included: Vec<IncludedResource>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct RouteResource {
    pub id: String,
    #[serde(default)]
    pub attributes: RouteAttributes,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct RouteAttributes {
    pub color: Option<String>,
    pub long_name: Option<String>,
    pub short_name: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct IncludedResource {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    #[serde(default)]
    pub attributes: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShapeLine {
    pub shape_id: String,
    pub line: LineString<f64>,
}

/// Geometry and colour of one route. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteShape {
    pub route_id: String,
    pub colour: RGB<u8>,
    pub lines: Vec<ShapeLine>,
}

impl RouteShape {
    pub fn colour_hex(&self) -> String {
        colour_to_hex(self.colour)
    }

    pub fn to_feature_collection(&self) -> FeatureCollection {
        let colour = self.colour_hex();

        let features = self
            .lines
            .iter()
            .map(|shape| {
                let mut properties = JsonObject::new();
                properties.insert("shape_id".to_string(), shape.shape_id.clone().into());
                properties.insert("route_color".to_string(), colour.clone().into());

                Feature {
                    bbox: None,
                    geometry: Some(Geometry::from(&shape.line)),
                    id: None,
                    properties: Some(properties),
                    foreign_members: None,
                }
            })
            .collect();

        FeatureCollection {
            bbox: None,
            features,
            foreign_members: None,
        }
    }
}

pub fn parse_route_colour(hex: Option<&str>) -> RGB<u8> {
    let Some(hex) = hex.map(|h| h.trim_start_matches('#')) else {
        return DEFAULT_ROUTE_COLOUR;
    };

    if hex.len() != 6 {
        return DEFAULT_ROUTE_COLOUR;
    }

    let channel = |range: std::ops::Range<usize>| {
        hex.get(range)
            .and_then(|part| u8::from_str_radix(part, 16).ok())
    };

    match (channel(0..2), channel(2..4), channel(4..6)) {
        (Some(r), Some(g), Some(b)) => RGB::new(r, g, b),
        _ => DEFAULT_ROUTE_COLOUR,
    }
}

pub fn colour_to_hex(colour: RGB<u8>) -> String {
    format!("#{:02X}{:02X}{:02X}", colour.r, colour.g, colour.b)
}

#[derive(Debug, thiserror::Error)]
pub enum ShapeError {
    #[error(transparent)]
    Fetch(#[from] FeedError),
    #[error("shape {shape_id} does not decode: {source}")]
    Decode {
        shape_id: String,
        source: DecodeError,
    },
    #[error("shape {0} has no polyline")]
    MissingPolyline(String),
    #[error("no shape data found for {0}")]
    NoShapes(String),
    #[error(transparent)]
    Surface(#[from] SurfaceError),
}

impl ShapeError {
    /// Surface rejections will not change on a refetch.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ShapeError::Surface(_))
    }
}

impl RouteDocument {
    /// Decodes every included shape of the route into one [`RouteShape`].
    pub fn into_route_shape(self) -> Result<RouteShape, ShapeError> {
        let route_id = self.data.id;
        let colour = parse_route_colour(self.data.attributes.color.as_deref());

        let lines = self
            .included
            .into_iter()
            .filter(|item| item.kind == "shape")
            .map(|item| {
                let encoded = item
                    .attributes
                    .get("polyline")
                    .and_then(|p| p.as_str())
                    .ok_or_else(|| ShapeError::MissingPolyline(item.id.clone()))?;

                let line = polyline_codec::decode(encoded).map_err(|source| ShapeError::Decode {
                    shape_id: item.id.clone(),
                    source,
                })?;

                Ok(ShapeLine {
                    shape_id: item.id,
                    line,
                })
            })
            .collect::<Result<Vec<ShapeLine>, ShapeError>>()?;

        if lines.is_empty() {
            return Err(ShapeError::NoShapes(route_id));
        }

        Ok(RouteShape {
            route_id,
            colour,
            lines,
        })
    }
}

/// Loaded route shapes, keyed by route id. Each route is fetched at most once.
#[derive(Debug, Default)]
pub struct RouteShapeCache {
    shapes: AHashMap<String, RouteShape>,
}

impl RouteShapeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, route_id: &str) -> Option<&RouteShape> {
        self.shapes.get(route_id)
    }

    pub fn contains(&self, route_id: &str) -> bool {
        self.shapes.contains_key(route_id)
    }

    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    pub fn route_ids(&self) -> impl Iterator<Item = &str> {
        self.shapes.keys().map(String::as_str)
    }

    fn insert(&mut self, shape: RouteShape) {
        self.shapes.entry(shape.route_id.clone()).or_insert(shape);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub max_attempts: u32,
    /// Fixed wait between two routes.
    pub pacing: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(3000),
            max_attempts: 5,
            pacing: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    /// Linear in the attempt number: the wait after attempt `n` is `initial_delay * n`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.initial_delay.saturating_mul(attempt)
    }
}

#[derive(Debug)]
pub enum LoadOutcome {
    Loaded { attempts: u32 },
    /// Already in the cache, nothing fetched.
    Cached,
    Skipped { attempts: u32, last_error: ShapeError },
}

#[derive(Debug, Default)]
pub struct LoadReport {
    pub outcomes: Vec<(String, LoadOutcome)>,
}

impl LoadReport {
    pub fn loaded(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, LoadOutcome::Loaded { .. }))
            .count()
    }

    pub fn skipped(&self) -> impl Iterator<Item = &str> {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, LoadOutcome::Skipped { .. }))
            .map(|(id, _)| id.as_str())
    }
}

pub struct ShapeLoader<F> {
    fetcher: F,
    policy: RetryPolicy,
    line_widths: AHashMap<String, f64>,
}

impl<F: RouteFetcher> ShapeLoader<F> {
    pub fn new(fetcher: F, policy: RetryPolicy) -> Self {
        Self {
            fetcher,
            policy,
            line_widths: AHashMap::new(),
        }
    }

    /// Takes per-route line widths from the catalog.
    pub fn with_catalog(mut self, catalog: &RouteCatalog) -> Self {
        self.line_widths = catalog
            .entries()
            .iter()
            .map(|e| (e.route_id.clone(), e.line_width))
            .collect();
        self
    }

    /// Loads every route one after the other, then calls `on_complete` once.
    ///
    /// A route that keeps failing is skipped; the batch always runs to the end.
    pub async fn load_all<'r, S, I, C>(
        &self,
        surface: &mut S,
        cache: &mut RouteShapeCache,
        route_ids: I,
        on_complete: C,
    ) -> LoadReport
    where
        S: RenderSurface,
        I: IntoIterator<Item = &'r str>,
        C: FnOnce(&LoadReport),
    {
        let mut report = LoadReport::default();

        for (i, route_id) in route_ids.into_iter().enumerate() {
            if i > 0 && !self.policy.pacing.is_zero() {
                tokio::time::sleep(self.policy.pacing).await;
            }

            let outcome = self.load_route(surface, cache, route_id).await;
            report.outcomes.push((route_id.to_string(), outcome));
        }

        info!(
            loaded = report.loaded(),
            skipped = report.skipped().count(),
            "All routes attempted"
        );

        on_complete(&report);

        report
    }

    async fn load_route<S: RenderSurface>(
        &self,
        surface: &mut S,
        cache: &mut RouteShapeCache,
        route_id: &str,
    ) -> LoadOutcome {
        if cache.contains(route_id) {
            debug!(route_id, "Route shape already cached");
            return LoadOutcome::Cached;
        }

        let mut attempt = 1;

        loop {
            info!(route_id, attempt, "Fetching route");

            match self.fetch_and_register(surface, cache, route_id).await {
                Ok(()) => {
                    info!(route_id, "Successfully loaded route");
                    return LoadOutcome::Loaded { attempts: attempt };
                }
                Err(e) if attempt >= self.policy.max_attempts || !e.is_retryable() => {
                    error!(route_id, attempts = attempt, error = %e, "Giving up on route, skipping");
                    return LoadOutcome::Skipped {
                        attempts: attempt,
                        last_error: e,
                    };
                }
                Err(e) => {
                    let delay = self.policy.delay_after(attempt);

                    match &e {
                        ShapeError::Fetch(feed) if feed.is_rate_limited() => {
                            warn!(route_id, delay_ms = delay.as_millis() as u64, "API rate limit reached, retrying after delay");
                        }
                        _ => {
                            warn!(route_id, error = %e, delay_ms = delay.as_millis() as u64, "Error loading route, retrying");
                        }
                    }

                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn fetch_and_register<S: RenderSurface>(
        &self,
        surface: &mut S,
        cache: &mut RouteShapeCache,
        route_id: &str,
    ) -> Result<(), ShapeError> {
        let document = self.fetcher.fetch_route(route_id).await?;
        let shape = document.into_route_shape()?;

        let source_id = source_id_for_route(route_id);
        let layer_id = layer_id_for_route(route_id);

        if surface.has_source(&source_id) {
            debug!(route_id, "Source already on the map, not adding again");
        } else {
            surface.add_source(&source_id, shape.to_feature_collection())?;
            surface.add_layer(LineLayer {
                id: layer_id,
                source_id,
                color: shape.colour_hex(),
                width: self
                    .line_widths
                    .get(route_id)
                    .copied()
                    .unwrap_or(DEFAULT_LINE_WIDTH),
            })?;
        }

        cache.insert(RouteShape {
            route_id: route_id.to_string(),
            ..shape
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::InMemorySurface;
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;

    #[derive(Default)]
    struct ScriptedFetcher {
        responses: RefCell<AHashMap<String, VecDeque<Result<RouteDocument, FeedError>>>>,
        calls: Cell<usize>,
    }

    impl ScriptedFetcher {
        fn push(&self, route_id: &str, response: Result<RouteDocument, FeedError>) {
            self.responses
                .borrow_mut()
                .entry(route_id.to_string())
                .or_default()
                .push_back(response);
        }
    }

    impl RouteFetcher for ScriptedFetcher {
        async fn fetch_route(&self, route_id: &str) -> Result<RouteDocument, FeedError> {
            self.calls.set(self.calls.get() + 1);
            self.responses
                .borrow_mut()
                .get_mut(route_id)
                .and_then(|queue| queue.pop_front())
                .unwrap_or(Err(FeedError::Http { status: 503 }))
        }
    }

    fn document(route_id: &str, colour: Option<&str>, polylines: &[&str]) -> RouteDocument {
        let included: Vec<serde_json::Value> = polylines
            .iter()
            .enumerate()
            .map(|(i, p)| {
                serde_json::json!({
                    "type": "shape",
                    "id": format!("{}-shape-{}", route_id, i),
                    "attributes": {"polyline": p}
                })
            })
            .chain(std::iter::once(serde_json::json!({
                "type": "route_pattern",
                "id": format!("{}-0-0", route_id),
                "attributes": {}
            })))
            .collect();

        serde_json::from_value(serde_json::json!({
            "data": {
                "type": "route",
                "id": route_id,
                "attributes": {"color": colour}
            },
            "included": included
        }))
        .unwrap()
    }

    fn quick_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            initial_delay: Duration::from_secs(3),
            max_attempts,
            pacing: Duration::ZERO,
        }
    }

    #[test]
    fn retry_delay_grows_linearly_and_saturates() {
        let policy = quick_policy(5);
        assert_eq!(policy.delay_after(1), Duration::from_secs(3));
        assert_eq!(policy.delay_after(4), Duration::from_secs(12));

        let huge = RetryPolicy {
            initial_delay: Duration::from_millis(u64::MAX),
            ..quick_policy(5)
        };
        assert_eq!(huge.delay_after(3), Duration::MAX);
    }

    #[test]
    fn colour_parsing() {
        assert_eq!(parse_route_colour(Some("FF0000")), RGB::new(255, 0, 0));
        assert_eq!(parse_route_colour(Some("#00843D")), RGB::new(0, 0x84, 0x3d));
        assert_eq!(parse_route_colour(None), DEFAULT_ROUTE_COLOUR);
        assert_eq!(parse_route_colour(Some("red")), DEFAULT_ROUTE_COLOUR);
        assert_eq!(parse_route_colour(Some("GG0000")), DEFAULT_ROUTE_COLOUR);
        assert_eq!(colour_to_hex(DEFAULT_ROUTE_COLOUR), "#888888");
    }

    #[test]
    fn document_without_shapes_is_an_error() {
        let doc = document("Red", Some("DA291C"), &[]);
        assert!(matches!(doc.into_route_shape(), Err(ShapeError::NoShapes(id)) if id == "Red"));
    }

    #[test]
    fn undecodable_shape_fails_the_route() {
        let doc = document("Red", Some("DA291C"), &["_p~iF~ps|U", "_p~iF"]);
        assert!(matches!(
            doc.into_route_shape(),
            Err(ShapeError::Decode { shape_id, .. }) if shape_id == "Red-shape-1"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_then_success_registers_once() {
        let fetcher = ScriptedFetcher::default();
        fetcher.push("Red", Err(FeedError::Http { status: 429 }));
        fetcher.push("Red", Ok(document("Red", Some("FF0000"), &["_p~iF~ps|U"])));

        let catalog = RouteCatalog::mbta().unwrap();
        let loader = ShapeLoader::new(fetcher, quick_policy(5)).with_catalog(&catalog);
        let mut surface = InMemorySurface::new();
        let mut cache = RouteShapeCache::new();
        let completions = Cell::new(0);

        let started = tokio::time::Instant::now();
        let report = loader
            .load_all(&mut surface, &mut cache, ["Red"], |_| {
                completions.set(completions.get() + 1)
            })
            .await;

        assert_eq!(loader.fetcher.calls.get(), 2);
        assert_eq!(started.elapsed(), Duration::from_secs(3));
        assert_eq!(completions.get(), 1);
        assert!(matches!(
            report.outcomes[0],
            (_, LoadOutcome::Loaded { attempts: 2 })
        ));

        assert_eq!(surface.source_count(), 1);
        let source = surface.source("mbta-routes-Red").unwrap();
        assert_eq!(source.features.len(), 1);

        let layer = surface.layer("mbta-lines-Red").unwrap();
        assert_eq!(layer.layer.source_id, "mbta-routes-Red");
        assert_eq!(layer.layer.color, "#FF0000");
        assert_eq!(layer.layer.width, 4.0);

        assert_eq!(cache.get("Red").unwrap().lines[0].line.0.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_route_is_skipped_and_batch_continues() {
        let fetcher = ScriptedFetcher::default();
        for _ in 0..3 {
            fetcher.push("Blue", Err(FeedError::Malformed(String::from("bad json"))));
        }
        fetcher.push("Orange", Ok(document("Orange", None, &["_p~iF~ps|U"])));

        let loader = ShapeLoader::new(fetcher, quick_policy(3));
        let mut surface = InMemorySurface::new();
        let mut cache = RouteShapeCache::new();
        let completions = Cell::new(0);

        let started = tokio::time::Instant::now();
        let report = loader
            .load_all(&mut surface, &mut cache, ["Blue", "Orange"], |report| {
                assert_eq!(report.outcomes.len(), 2);
                completions.set(completions.get() + 1);
            })
            .await;

        // waits of 3s and 6s after attempts 1 and 2, none after the last
        assert_eq!(started.elapsed(), Duration::from_secs(9));
        assert_eq!(loader.fetcher.calls.get(), 4);
        assert_eq!(completions.get(), 1);
        assert_eq!(report.skipped().collect::<Vec<_>>(), vec!["Blue"]);
        assert!(matches!(
            &report.outcomes[0].1,
            LoadOutcome::Skipped { attempts: 3, .. }
        ));

        assert!(!surface.has_source("mbta-routes-Blue"));
        assert_eq!(surface.layer("mbta-lines-Orange").unwrap().layer.color, "#888888");
    }

    #[tokio::test(start_paused = true)]
    async fn routes_are_fetched_once_per_cache() {
        let fetcher = ScriptedFetcher::default();
        fetcher.push("Red", Ok(document("Red", Some("DA291C"), &["_p~iF~ps|U"])));

        let loader = ShapeLoader::new(fetcher, quick_policy(2));
        let mut surface = InMemorySurface::new();
        let mut cache = RouteShapeCache::new();

        loader.load_all(&mut surface, &mut cache, ["Red"], |_| {}).await;
        let second = loader.load_all(&mut surface, &mut cache, ["Red"], |_| {}).await;

        assert_eq!(loader.fetcher.calls.get(), 1);
        assert!(matches!(second.outcomes[0].1, LoadOutcome::Cached));
        assert_eq!(surface.source_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn existing_source_is_not_added_twice() {
        let fetcher = ScriptedFetcher::default();
        fetcher.push("Red", Ok(document("Red", Some("DA291C"), &["_p~iF~ps|U"])));

        let loader = ShapeLoader::new(fetcher, quick_policy(2));
        let mut surface = InMemorySurface::new();
        surface
            .add_source("mbta-routes-Red", FeatureCollection {
                bbox: None,
                features: vec![],
                foreign_members: None,
            })
            .unwrap();
        let mut cache = RouteShapeCache::new();

        let report = loader.load_all(&mut surface, &mut cache, ["Red"], |_| {}).await;

        assert!(matches!(report.outcomes[0].1, LoadOutcome::Loaded { attempts: 1 }));
        assert!(surface.source("mbta-routes-Red").unwrap().features.is_empty());
        assert!(!surface.has_layer("mbta-lines-Red"));
    }

    #[tokio::test(start_paused = true)]
    async fn pacing_is_applied_between_routes() {
        let fetcher = ScriptedFetcher::default();
        fetcher.push("Red", Ok(document("Red", None, &["_p~iF~ps|U"])));
        fetcher.push("Blue", Ok(document("Blue", None, &["_p~iF~ps|U"])));

        let policy = RetryPolicy {
            pacing: Duration::from_millis(250),
            ..quick_policy(1)
        };
        let loader = ShapeLoader::new(fetcher, policy);
        let mut surface = InMemorySurface::new();
        let mut cache = RouteShapeCache::new();

        let started = tokio::time::Instant::now();
        loader
            .load_all(&mut surface, &mut cache, ["Red", "Blue"], |_| {})
            .await;

        assert_eq!(started.elapsed(), Duration::from_millis(250));
        assert_eq!(cache.len(), 2);
    }
}
