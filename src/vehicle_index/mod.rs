//! Vehicle id to (record, on-map element) mapping. The only place markers are
//! created or destroyed.

use crate::surface::{Interaction, ListenerHandle, MarkerHandle, RenderSurface, TooltipHandle};
use crate::vehicles::tooltip::TooltipFormatter;
use crate::vehicles::{VehicleId, VehicleRecord};
use ahash::{AHashMap, AHashSet};
use tracing::debug;

/// Marker, tooltip and the listeners wiring them together for one vehicle.
#[derive(Debug, PartialEq, Eq)]
pub struct VisualElement {
    pub marker: MarkerHandle,
    pub tooltip: TooltipHandle,
    listeners: Vec<ListenerHandle>,
}

impl VisualElement {
    fn create<S: RenderSurface>(surface: &mut S, record: &VehicleRecord, text: &str) -> Self {
        let marker = surface.create_marker(record.position, record.bearing_degrees);
        let tooltip = surface.create_tooltip(text);

        let listeners = Interaction::ALL
            .iter()
            .map(|interaction| surface.listen(marker, *interaction, tooltip))
            .collect();

        Self {
            marker,
            tooltip,
            listeners,
        }
    }

    pub fn listeners(&self) -> &[ListenerHandle] {
        &self.listeners
    }

    /// Detaches every listener, then removes the tooltip and marker.
    pub fn destroy<S: RenderSurface>(self, surface: &mut S) {
        for listener in self.listeners {
            surface.unlisten(listener);
        }

        surface.remove_tooltip(self.tooltip);
        surface.remove_marker(self.marker);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Created,
    Moved,
    /// no usable position
    Rejected,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResetSummary {
    pub created: usize,
    pub moved: usize,
    pub removed: usize,
    pub rejected: usize,
}

impl ResetSummary {
    /// Whether the set of elements on the map changed.
    pub fn changed_membership(&self) -> bool {
        self.created > 0 || self.removed > 0
    }
}

#[derive(Debug, Default)]
pub struct VehicleIndex {
    entries: AHashMap<VehicleId, (VehicleRecord, VisualElement)>,
}

impl VehicleIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&(VehicleRecord, VisualElement)> {
        self.entries.get(id)
    }

    pub fn records(&self) -> impl Iterator<Item = &VehicleRecord> {
        self.entries.values().map(|(record, _)| record)
    }

    pub fn elements(&self) -> impl Iterator<Item = (&VehicleRecord, &VisualElement)> {
        self.entries.values().map(|(record, element)| (record, element))
    }

    pub fn apply_update<S: RenderSurface>(
        &mut self,
        surface: &mut S,
        record: VehicleRecord,
        formatter: &TooltipFormatter,
    ) -> Upsert {
        if !record.has_known_position() {
            debug!(vehicle_id = %record.id, "Vehicle has no position, ignoring");
            return Upsert::Rejected;
        }

        let text = formatter.describe(&record);

        match self.entries.get_mut(&record.id) {
            Some((existing, element)) => {
                surface.move_marker(element.marker, record.position);
                surface.rotate_marker(element.marker, record.bearing_degrees);
                surface.update_tooltip(element.tooltip, &text);
                *existing = record;

                Upsert::Moved
            }
            None => {
                let element = VisualElement::create(surface, &record, &text);
                self.entries.insert(record.id.clone(), (record, element));

                Upsert::Created
            }
        }
    }

    /// Replaces the whole index with a snapshot.
    ///
    /// Elements whose id is missing from `records`, or whose snapshot record
    /// has no position, are destroyed before the rest is upserted.
    pub fn apply_reset<S, I>(
        &mut self,
        surface: &mut S,
        records: I,
        formatter: &TooltipFormatter,
    ) -> ResetSummary
    where
        S: RenderSurface,
        I: IntoIterator<Item = VehicleRecord>,
    {
        let records: Vec<VehicleRecord> = records.into_iter().collect();

        let represented: AHashSet<&str> = records
            .iter()
            .filter(|r| r.has_known_position())
            .map(|r| r.id.as_str())
            .collect();

        let stale: Vec<VehicleId> = self
            .entries
            .keys()
            .filter(|id| !represented.contains(id.as_str()))
            .cloned()
            .collect();

        let mut summary = ResetSummary::default();

        for id in stale {
            if self.remove(surface, &id) {
                summary.removed += 1;
            }
        }

        for record in records {
            match self.apply_update(surface, record, formatter) {
                Upsert::Created => summary.created += 1,
                Upsert::Moved => summary.moved += 1,
                Upsert::Rejected => summary.rejected += 1,
            }
        }

        summary
    }

    /// Destroys one vehicle's element. Returns whether it was present.
    pub fn remove<S: RenderSurface>(&mut self, surface: &mut S, id: &str) -> bool {
        match self.entries.remove(id) {
            Some((_, element)) => {
                element.destroy(surface);
                true
            }
            None => false,
        }
    }

    pub fn clear<S: RenderSurface>(&mut self, surface: &mut S) {
        for (_, (_, element)) in self.entries.drain() {
            element.destroy(surface);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route_catalog::RouteCatalog;
    use crate::stops::StopNameCache;
    use crate::surface::{InMemorySurface, Position};
    use crate::vehicles::test_support::*;

    struct Fixture {
        catalog: RouteCatalog,
        stops: StopNameCache,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                catalog: RouteCatalog::mbta().unwrap(),
                stops: StopNameCache::new(),
            }
        }

        fn formatter(&self) -> TooltipFormatter<'_> {
            TooltipFormatter::new(&self.catalog, &self.stops, fixed_now())
        }
    }

    #[test]
    fn repeated_updates_keep_a_single_element() {
        let fixture = Fixture::new();
        let mut surface = InMemorySurface::new();
        let mut index = VehicleIndex::new();

        let first = index.apply_update(
            &mut surface,
            record("v1", "Red", 42.35, -71.06),
            &fixture.formatter(),
        );
        assert_eq!(first, Upsert::Created);

        let marker = index.get("v1").unwrap().1.marker;

        for step in 1..=10 {
            let mut next = record("v1", "Red", 42.35 + step as f64 * 0.001, -71.06);
            next.bearing_degrees = step as f64 * 10.0;
            assert_eq!(
                index.apply_update(&mut surface, next, &fixture.formatter()),
                Upsert::Moved
            );
        }

        assert_eq!(index.len(), 1);
        assert_eq!(surface.markers_created(), 1);
        assert_eq!(surface.marker_count(), 1);
        assert_eq!(surface.listener_count(), 3);
        assert_eq!(index.get("v1").unwrap().1.marker, marker);

        let state = surface.marker(marker).unwrap();
        assert_eq!(
            state.position,
            Position {
                lat: 42.35 + 10.0 * 0.001,
                lon: -71.06
            }
        );
        assert_eq!(state.bearing, 100.0);
    }

    #[test]
    fn update_refreshes_tooltip_in_place() {
        let fixture = Fixture::new();
        let mut surface = InMemorySurface::new();
        let mut index = VehicleIndex::new();

        index.apply_update(
            &mut surface,
            record("v1", "Red", 42.35, -71.06),
            &fixture.formatter(),
        );

        let mut moved = record("v1", "Red", 42.36, -71.06);
        moved.status = Some(String::from("STOPPED_AT"));
        index.apply_update(&mut surface, moved, &fixture.formatter());

        let tooltip = index.get("v1").unwrap().1.tooltip;
        assert!(surface.tooltip(tooltip).unwrap().text.contains("Status: STOPPED_AT"));
        assert_eq!(surface.tooltip_count(), 1);
    }

    #[test]
    fn reset_destroys_only_omitted_vehicles() {
        let fixture = Fixture::new();
        let mut surface = InMemorySurface::new();
        let mut index = VehicleIndex::new();

        index.apply_reset(
            &mut surface,
            vec![
                record("A", "Red", 42.1, -71.1),
                record("B", "Red", 42.2, -71.2),
                record("C", "Blue", 42.3, -71.3),
            ],
            &fixture.formatter(),
        );

        let marker_a = index.get("A").unwrap().1.marker;
        let marker_b = index.get("B").unwrap().1.marker;
        let marker_c = index.get("C").unwrap().1.marker;

        let summary = index.apply_reset(
            &mut surface,
            vec![
                record("A", "Red", 42.15, -71.1),
                record("C", "Blue", 42.3, -71.3),
            ],
            &fixture.formatter(),
        );

        assert_eq!(
            summary,
            ResetSummary {
                created: 0,
                moved: 2,
                removed: 1,
                rejected: 0
            }
        );
        assert!(summary.changed_membership());

        assert_eq!(index.len(), 2);
        assert!(index.get("B").is_none());
        assert!(surface.marker(marker_b).is_none());
        assert_eq!(surface.listeners_on(marker_b), 0);

        assert_eq!(index.get("A").unwrap().1.marker, marker_a);
        assert_eq!(index.get("C").unwrap().1.marker, marker_c);
        assert_eq!(surface.marker(marker_a).unwrap().position.lat, 42.15);
        assert_eq!(surface.tooltip_count(), 2);
        assert_eq!(surface.listener_count(), 6);
    }

    #[test]
    fn zero_position_never_produces_an_element() {
        let fixture = Fixture::new();
        let mut surface = InMemorySurface::new();
        let mut index = VehicleIndex::new();

        assert_eq!(
            index.apply_update(&mut surface, record("z", "Red", 0.0, 0.0), &fixture.formatter()),
            Upsert::Rejected
        );

        let summary = index.apply_reset(
            &mut surface,
            vec![record("z", "Red", 0.0, 0.0), record("y", "Red", 42.0, 0.0)],
            &fixture.formatter(),
        );

        assert_eq!(summary.rejected, 2);
        assert!(index.is_empty());
        assert_eq!(surface.markers_created(), 0);
    }

    #[test]
    fn reset_with_unknown_position_drops_existing_element() {
        let fixture = Fixture::new();
        let mut surface = InMemorySurface::new();
        let mut index = VehicleIndex::new();

        index.apply_update(
            &mut surface,
            record("v1", "Red", 42.35, -71.06),
            &fixture.formatter(),
        );

        let summary = index.apply_reset(
            &mut surface,
            vec![record("v1", "Red", 0.0, 0.0)],
            &fixture.formatter(),
        );

        assert_eq!(summary.removed, 1);
        assert_eq!(summary.rejected, 1);
        assert!(index.is_empty());
        assert_eq!(surface.marker_count(), 0);
    }

    #[test]
    fn hover_shows_and_hides_tooltip() {
        let fixture = Fixture::new();
        let mut surface = InMemorySurface::new();
        let mut index = VehicleIndex::new();

        index.apply_update(
            &mut surface,
            record("v1", "Orange", 42.35, -71.06),
            &fixture.formatter(),
        );
        let element = &index.get("v1").unwrap().1;
        let (marker, tooltip) = (element.marker, element.tooltip);

        assert!(!surface.tooltip(tooltip).unwrap().shown);

        surface.dispatch(marker, Interaction::Enter, (10.0, 20.0));
        assert!(surface.tooltip(tooltip).unwrap().shown);

        surface.dispatch(marker, Interaction::Move, (11.0, 21.0));
        assert_eq!(surface.tooltip(tooltip).unwrap().anchor, Some((11.0, 21.0)));

        surface.dispatch(marker, Interaction::Leave, (11.0, 21.0));
        assert!(!surface.tooltip(tooltip).unwrap().shown);
    }

    #[test]
    fn clear_detaches_everything() {
        let fixture = Fixture::new();
        let mut surface = InMemorySurface::new();
        let mut index = VehicleIndex::new();

        index.apply_reset(
            &mut surface,
            vec![
                record("A", "Red", 42.1, -71.1),
                record("B", "741", 42.2, -71.2),
            ],
            &fixture.formatter(),
        );

        index.clear(&mut surface);

        assert!(index.is_empty());
        assert_eq!(surface.marker_count(), 0);
        assert_eq!(surface.tooltip_count(), 0);
        assert_eq!(surface.listener_count(), 0);
        assert_eq!(surface.markers_removed(), 2);
    }
}
