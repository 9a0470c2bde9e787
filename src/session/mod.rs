//! Live vehicle stream: connect, dispatch events into the index, reconnect on
//! failure, tear everything down on cancellation.

use crate::filters::FilterState;
use crate::route_catalog::RouteCatalog;
use crate::stops::StopNameCache;
use crate::surface::RenderSurface;
use crate::transport::{EventChannel, FeedTransport, ServerEvent};
use crate::vehicle_index::{Upsert, VehicleIndex};
use crate::vehicles::{VehicleRecord, VehiclesDocument};
use crate::vehicles::tooltip::TooltipFormatter;
use crate::visibility::VisibilityProjector;
use chrono::Utc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(5000);
pub const DEFAULT_STREAM_END_DELAY: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Streaming,
    Reconnecting,
    /// terminal
    Closed,
}

/// How a connection attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ended {
    ServerClosed,
    Failed,
}

/// Filter updates from the UI. Once the sender is gone the last value stays in force.
struct FilterFeed {
    rx: watch::Receiver<FilterState>,
    open: bool,
}

impl FilterFeed {
    fn new(rx: watch::Receiver<FilterState>) -> Self {
        Self { rx, open: true }
    }

    /// Resolves on the next filter change. Never resolves once the sender is dropped.
    async fn next_change(&mut self) {
        if self.open {
            if self.rx.changed().await.is_ok() {
                return;
            }

            debug!("Filter sender dropped, keeping last filters");
            self.open = false;
        }

        std::future::pending::<()>().await
    }

    fn project<S: RenderSurface>(
        &mut self,
        catalog: &RouteCatalog,
        index: &VehicleIndex,
        surface: &mut S,
    ) {
        let current = self.rx.borrow_and_update();
        VisibilityProjector::new(catalog).project_all(surface, index, &current);
    }
}

/// Drives `work` to completion while still applying filter changes.
///
/// Returns `None` if `cancel` fires first; `work` is dropped in that case.
async fn attend<W, S>(
    work: W,
    catalog: &RouteCatalog,
    index: &VehicleIndex,
    surface: &mut S,
    filters: &mut FilterFeed,
    cancel: &CancellationToken,
) -> Option<W::Output>
where
    W: Future,
    S: RenderSurface,
{
    tokio::pin!(work);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            _ = filters.next_change() => filters.project(catalog, index, surface),
            output = &mut work => return Some(output),
        }
    }
}

pub struct StreamSession<'a, T> {
    transport: T,
    catalog: &'a RouteCatalog,
    stops: StopNameCache,
    index: VehicleIndex,
    reconnect_delay: Duration,
    stream_end_delay: Duration,
    state: SessionState,
}

impl<'a, T: FeedTransport> StreamSession<'a, T> {
    pub fn new(transport: T, catalog: &'a RouteCatalog, reconnect_delay: Duration) -> Self {
        Self {
            transport,
            catalog,
            stops: StopNameCache::new(),
            index: VehicleIndex::new(),
            reconnect_delay,
            stream_end_delay: DEFAULT_STREAM_END_DELAY,
            state: SessionState::Idle,
        }
    }

    /// Wait before reconnecting after the server ended the stream cleanly.
    pub fn with_stream_end_delay(mut self, delay: Duration) -> Self {
        self.stream_end_delay = delay;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn index(&self) -> &VehicleIndex {
        &self.index
    }

    pub fn stops(&self) -> &StopNameCache {
        &self.stops
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "Session state change");
            self.state = next;
        }
    }

    /// Runs until `cancel` fires. Reconnects forever.
    ///
    /// Filter changes are projected in every state, not only while streaming.
    /// On return the session is [`SessionState::Closed`] and every vehicle
    /// element has been removed from `surface`.
    pub async fn run<S: RenderSurface>(
        &mut self,
        surface: &mut S,
        filters: watch::Receiver<FilterState>,
        cancel: CancellationToken,
    ) {
        if self.state == SessionState::Closed {
            return;
        }

        self.transition(SessionState::Connecting);

        // filter changes made meanwhile are picked up by the first wait below
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.close(surface);
                return;
            }
            _ = self.stops.ensure_loaded(&self.transport) => {}
        }

        let mut filters = FilterFeed::new(filters);

        loop {
            if cancel.is_cancelled() {
                break;
            }

            self.transition(SessionState::Connecting);

            let Some(ended) = self.connect_and_stream(surface, &mut filters, &cancel).await else {
                break;
            };

            let delay = match ended {
                Ended::ServerClosed => self.stream_end_delay,
                Ended::Failed => self.reconnect_delay,
            };

            self.transition(SessionState::Reconnecting);
            info!(
                delay_ms = delay.as_millis() as u64,
                "Reconnecting vehicle stream"
            );

            let backoff = tokio::time::sleep(delay);
            let waited = attend(
                backoff,
                self.catalog,
                &self.index,
                surface,
                &mut filters,
                &cancel,
            )
            .await;

            if waited.is_none() {
                break;
            }
        }

        self.close(surface);
    }

    /// One connection: snapshot, open, stream. `None` means cancelled.
    async fn connect_and_stream<S: RenderSurface>(
        &mut self,
        surface: &mut S,
        filters: &mut FilterFeed,
        cancel: &CancellationToken,
    ) -> Option<Ended> {
        let snapshot = attend(
            self.transport.fetch_vehicles(),
            self.catalog,
            &self.index,
            surface,
            filters,
            cancel,
        )
        .await?;

        match snapshot {
            Ok(document) => {
                let current = filters.rx.borrow().clone();
                self.apply_snapshot(surface, document, &current);
            }
            Err(e) => {
                error!(error = %e, "Could not fetch vehicle snapshot");
                return Some(Ended::Failed);
            }
        }

        let opened = attend(
            self.transport.open_vehicle_stream(),
            self.catalog,
            &self.index,
            surface,
            filters,
            cancel,
        )
        .await?;

        let mut channel = match opened {
            Ok(channel) => channel,
            Err(e) => {
                error!(error = %e, "Could not open vehicle stream");
                return Some(Ended::Failed);
            }
        };

        self.transition(SessionState::Streaming);
        info!("Vehicle stream connected");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                _ = filters.next_change() => filters.project(self.catalog, &self.index, surface),
                event = channel.next_event() => match event {
                    Some(Ok(event)) => {
                        let current = filters.rx.borrow().clone();
                        self.handle_event(surface, event, &current);
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "Vehicle stream error");
                        return Some(Ended::Failed);
                    }
                    None => {
                        info!("Vehicle stream closed by server");
                        return Some(Ended::ServerClosed);
                    }
                }
            }
        }
    }

    /// Upserts every vehicle of a REST snapshot. Vehicles missing from it are kept
    /// until the stream's first reset.
    pub fn apply_snapshot<S: RenderSurface>(
        &mut self,
        surface: &mut S,
        document: VehiclesDocument,
        filters: &FilterState,
    ) {
        let now = Utc::now();
        let formatter = TooltipFormatter::new(self.catalog, &self.stops, now);
        let mut created = 0;

        for value in document.data {
            let record = match VehicleRecord::parse_value(value, now) {
                Ok(record) => record,
                Err(e) => {
                    warn!(error = %e, "Dropping malformed vehicle in snapshot");
                    continue;
                }
            };

            if !self.catalog.contains(&record.route_id) {
                continue;
            }

            if self.index.apply_update(surface, record, &formatter) == Upsert::Created {
                created += 1;
            }
        }

        info!(vehicles = self.index.len(), created, "Applied vehicle snapshot");

        if created > 0 {
            VisibilityProjector::new(self.catalog).project_all(surface, &self.index, filters);
        }
    }

    fn close<S: RenderSurface>(&mut self, surface: &mut S) {
        self.index.clear(surface);
        self.transition(SessionState::Closed);
        info!("Vehicle session closed");
    }

    /// Applies one server event to the index. Malformed events are logged and dropped.
    pub fn handle_event<S: RenderSurface>(
        &mut self,
        surface: &mut S,
        event: ServerEvent,
        filters: &FilterState,
    ) {
        let now = Utc::now();
        let formatter = TooltipFormatter::new(self.catalog, &self.stops, now);

        let membership_changed = match event.event.as_str() {
            "reset" => {
                let items = match VehicleRecord::parse_many(&event.data, now) {
                    Ok(items) => items,
                    Err(e) => {
                        warn!(error = %e, "Dropping malformed reset event");
                        return;
                    }
                };

                let records: Vec<VehicleRecord> = items
                    .into_iter()
                    .filter_map(|item| match item {
                        Ok(record) => Some(record),
                        Err(e) => {
                            warn!(error = %e, "Dropping malformed vehicle in reset");
                            None
                        }
                    })
                    .filter(|record| self.catalog.contains(&record.route_id))
                    .collect();

                let summary = self.index.apply_reset(surface, records, &formatter);
                info!(
                    vehicles = self.index.len(),
                    created = summary.created,
                    removed = summary.removed,
                    rejected = summary.rejected,
                    "Applied vehicle reset"
                );

                summary.changed_membership()
            }
            "update" | "add" => {
                let record = match VehicleRecord::parse_one(&event.data, now) {
                    Ok(record) => record,
                    Err(e) => {
                        warn!(kind = %event.event, error = %e, "Dropping malformed vehicle event");
                        return;
                    }
                };

                if !self.catalog.contains(&record.route_id) {
                    return;
                }

                self.index.apply_update(surface, record, &formatter) == Upsert::Created
            }
            "remove" => match VehicleRecord::parse_removal(&event.data) {
                Ok(id) => self.index.remove(surface, &id),
                Err(e) => {
                    warn!(error = %e, "Dropping malformed remove event");
                    return;
                }
            },
            other => {
                debug!(kind = other, "Ignoring event");
                return;
            }
        };

        if membership_changed {
            VisibilityProjector::new(self.catalog).project_all(surface, &self.index, filters);
        }
    }
}
