use crate::filters::FilterState;
use crate::route_catalog::RouteCatalog;
use crate::surface::{LayerVisibility, RenderSurface, layer_id_for_route};
use crate::vehicle_index::VehicleIndex;
use tracing::debug;

pub const VISIBLE_LINE_OPACITY: f64 = 1.0;
pub const HIDDEN_LINE_OPACITY: f64 = 0.5;

/// Writes filter state onto the surface. Only presentation attributes are
/// touched, and running it twice with the same filters changes nothing.
pub struct VisibilityProjector<'a> {
    catalog: &'a RouteCatalog,
}

impl<'a> VisibilityProjector<'a> {
    pub fn new(catalog: &'a RouteCatalog) -> Self {
        Self { catalog }
    }

    pub fn project_routes<S: RenderSurface>(&self, surface: &mut S, filters: &FilterState) {
        for route in self.catalog.entries() {
            let layer_id = layer_id_for_route(&route.route_id);

            if !surface.has_layer(&layer_id) {
                continue;
            }

            let visible = filters.is_enabled(&route.filter_key);

            surface.set_layer_visibility(&layer_id, LayerVisibility::from_bool(visible));
            surface.set_line_opacity(
                &layer_id,
                if visible {
                    VISIBLE_LINE_OPACITY
                } else {
                    HIDDEN_LINE_OPACITY
                },
            );
        }
    }

    pub fn project_vehicles<S: RenderSurface>(
        &self,
        surface: &mut S,
        index: &VehicleIndex,
        filters: &FilterState,
    ) {
        let mut shown = 0;

        for (record, element) in index.elements() {
            let visible = filters.is_route_id_visible(self.catalog, &record.route_id);
            surface.set_marker_visible(element.marker, visible);

            if visible {
                shown += 1;
            }
        }

        debug!(shown, total = index.len(), "Projected vehicle visibility");
    }

    pub fn project_all<S: RenderSurface>(
        &self,
        surface: &mut S,
        index: &VehicleIndex,
        filters: &FilterState,
    ) {
        self.project_routes(surface, filters);
        self.project_vehicles(surface, index, filters);
    }
}
