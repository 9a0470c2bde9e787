// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

use livemap::config::OverlayConfig;
use livemap::filters::FilterState;
use livemap::route_catalog::RouteCatalog;
use livemap::session::StreamSession;
use livemap::shape_fetcher::{RouteShapeCache, ShapeLoader};
use livemap::surface::InMemorySurface;
use livemap::transport::MbtaClient;
use livemap::visibility::VisibilityProjector;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let config = OverlayConfig::from_env()?;
    let catalog = RouteCatalog::mbta()?;

    info!(
        base_url = %config.base_url,
        routes = catalog.entries().len(),
        "Starting live map overlay"
    );

    let http = reqwest::Client::builder()
        .user_agent(concat!("livemap-overlay/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let client = MbtaClient::new(
        http,
        &config.base_url,
        config.api_key.clone(),
        catalog.route_types(),
    );

    let cancel = CancellationToken::new();

    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Shutdown requested"),
                Err(e) => warn!(error = %e, "Could not listen for ctrl-c"),
            }
            cancel.cancel();
        }
    });

    let mut surface = InMemorySurface::new();
    let mut shapes = RouteShapeCache::new();
    let (filters_tx, filters_rx) = watch::channel(FilterState::initial());

    let loader = ShapeLoader::new(client.clone(), config.shape_retry).with_catalog(&catalog);

    tokio::select! {
        biased;
        _ = cancel.cancelled() => return Ok(()),
        _ = loader.load_all(&mut surface, &mut shapes, catalog.route_ids(), |report| {
            info!(
                loaded = report.loaded(),
                skipped = report.skipped().count(),
                "Route shapes ready"
            );
        }) => {}
    }

    VisibilityProjector::new(&catalog).project_routes(&mut surface, &filters_tx.borrow());

    let mut session = StreamSession::new(client, &catalog, config.reconnect_delay)
        .with_stream_end_delay(config.stream_end_delay);
    session.run(&mut surface, filters_rx, cancel).await;

    info!(
        sources = surface.source_count(),
        markers_created = surface.markers_created(),
        markers_removed = surface.markers_removed(),
        "Overlay stopped"
    );

    Ok(())
}
