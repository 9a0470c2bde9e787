use super::{
    Interaction, LayerVisibility, LineLayer, ListenerHandle, MarkerHandle, Position,
    RenderSurface, SurfaceError, TooltipHandle,
};
use ahash::AHashMap;
use geojson::FeatureCollection;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub struct MarkerState {
    pub position: Position,
    pub bearing: f64,
    pub visible: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TooltipState {
    pub text: String,
    pub shown: bool,
    /// Position of the last pointer move, if any.
    pub anchor: Option<(f64, f64)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayerState {
    pub layer: LineLayer,
    pub visibility: LayerVisibility,
    pub opacity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Binding {
    marker: MarkerHandle,
    interaction: Interaction,
    tooltip: TooltipHandle,
}

/// Headless surface that keeps everything in maps.
///
/// Used by the `overlay` runner and by tests. Ordered maps keep snapshots
/// comparable.
#[derive(Debug, Default)]
pub struct InMemorySurface {
    next_handle: u64,
    sources: AHashMap<String, FeatureCollection>,
    layers: BTreeMap<String, LayerState>,
    markers: BTreeMap<MarkerHandle, MarkerState>,
    tooltips: BTreeMap<TooltipHandle, TooltipState>,
    listeners: BTreeMap<ListenerHandle, Binding>,
    markers_created: usize,
    markers_removed: usize,
}

impl InMemorySurface {
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    pub fn source(&self, id: &str) -> Option<&FeatureCollection> {
        self.sources.get(id)
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn layer(&self, id: &str) -> Option<&LayerState> {
        self.layers.get(id)
    }

    pub fn layers(&self) -> impl Iterator<Item = &LayerState> {
        self.layers.values()
    }

    pub fn marker(&self, marker: MarkerHandle) -> Option<&MarkerState> {
        self.markers.get(&marker)
    }

    pub fn marker_count(&self) -> usize {
        self.markers.len()
    }

    pub fn visible_marker_count(&self) -> usize {
        self.markers.values().filter(|m| m.visible).count()
    }

    pub fn tooltip(&self, tooltip: TooltipHandle) -> Option<&TooltipState> {
        self.tooltips.get(&tooltip)
    }

    pub fn tooltip_count(&self) -> usize {
        self.tooltips.len()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn listeners_on(&self, marker: MarkerHandle) -> usize {
        self.listeners
            .values()
            .filter(|b| b.marker == marker)
            .count()
    }

    /// Total markers ever created, removed ones included.
    pub fn markers_created(&self) -> usize {
        self.markers_created
    }

    pub fn markers_removed(&self) -> usize {
        self.markers_removed
    }

    /// Feeds a pointer interaction to a marker, running every bound listener.
    pub fn dispatch(
        &mut self,
        marker: MarkerHandle,
        interaction: Interaction,
        pointer: (f64, f64),
    ) {
        let bound: Vec<TooltipHandle> = self
            .listeners
            .values()
            .filter(|b| b.marker == marker && b.interaction == interaction)
            .map(|b| b.tooltip)
            .collect();

        for tooltip in bound {
            if let Some(state) = self.tooltips.get_mut(&tooltip) {
                match interaction {
                    Interaction::Enter => state.shown = true,
                    Interaction::Leave => state.shown = false,
                    Interaction::Move => state.anchor = Some(pointer),
                }
            }
        }
    }

    /// Presentation state only, for comparing two points in time.
    pub fn presentation_snapshot(
        &self,
    ) -> (Vec<(String, LayerVisibility, u64)>, Vec<(MarkerHandle, bool)>) {
        let layers = self
            .layers
            .iter()
            .map(|(id, l)| (id.clone(), l.visibility, l.opacity.to_bits()))
            .collect();

        let markers = self.markers.iter().map(|(h, m)| (*h, m.visible)).collect();

        (layers, markers)
    }
}

impl RenderSurface for InMemorySurface {
    fn has_source(&self, id: &str) -> bool {
        self.sources.contains_key(id)
    }

    fn add_source(&mut self, id: &str, data: FeatureCollection) -> Result<(), SurfaceError> {
        if self.sources.contains_key(id) {
            return Err(SurfaceError::DuplicateSource(id.to_string()));
        }

        self.sources.insert(id.to_string(), data);
        Ok(())
    }

    fn has_layer(&self, id: &str) -> bool {
        self.layers.contains_key(id)
    }

    fn add_layer(&mut self, layer: LineLayer) -> Result<(), SurfaceError> {
        if self.layers.contains_key(&layer.id) {
            return Err(SurfaceError::DuplicateLayer(layer.id));
        }

        if !self.sources.contains_key(&layer.source_id) {
            return Err(SurfaceError::MissingSource {
                layer: layer.id,
                source_id: layer.source_id,
            });
        }

        self.layers.insert(
            layer.id.clone(),
            LayerState {
                layer,
                visibility: LayerVisibility::Visible,
                opacity: 1.0,
            },
        );
        Ok(())
    }

    fn set_layer_visibility(&mut self, layer_id: &str, visibility: LayerVisibility) {
        if let Some(layer) = self.layers.get_mut(layer_id) {
            layer.visibility = visibility;
        }
    }

    fn set_line_opacity(&mut self, layer_id: &str, opacity: f64) {
        if let Some(layer) = self.layers.get_mut(layer_id) {
            layer.opacity = opacity;
        }
    }

    fn create_marker(&mut self, at: Position, bearing: f64) -> MarkerHandle {
        let handle = MarkerHandle(self.next());
        self.markers.insert(
            handle,
            MarkerState {
                position: at,
                bearing,
                visible: true,
            },
        );
        self.markers_created += 1;
        handle
    }

    fn move_marker(&mut self, marker: MarkerHandle, to: Position) {
        if let Some(state) = self.markers.get_mut(&marker) {
            state.position = to;
        }
    }

    fn rotate_marker(&mut self, marker: MarkerHandle, bearing: f64) {
        if let Some(state) = self.markers.get_mut(&marker) {
            state.bearing = bearing;
        }
    }

    fn set_marker_visible(&mut self, marker: MarkerHandle, visible: bool) {
        if let Some(state) = self.markers.get_mut(&marker) {
            state.visible = visible;
        }
    }

    fn remove_marker(&mut self, marker: MarkerHandle) {
        if self.markers.remove(&marker).is_some() {
            self.markers_removed += 1;
        }
    }

    fn create_tooltip(&mut self, text: &str) -> TooltipHandle {
        let handle = TooltipHandle(self.next());
        self.tooltips.insert(
            handle,
            TooltipState {
                text: text.to_string(),
                shown: false,
                anchor: None,
            },
        );
        handle
    }

    fn update_tooltip(&mut self, tooltip: TooltipHandle, text: &str) {
        if let Some(state) = self.tooltips.get_mut(&tooltip) {
            state.text = text.to_string();
        }
    }

    fn remove_tooltip(&mut self, tooltip: TooltipHandle) {
        self.tooltips.remove(&tooltip);
    }

    fn listen(
        &mut self,
        marker: MarkerHandle,
        interaction: Interaction,
        tooltip: TooltipHandle,
    ) -> ListenerHandle {
        let handle = ListenerHandle(self.next());
        self.listeners.insert(
            handle,
            Binding {
                marker,
                interaction,
                tooltip,
            },
        );
        handle
    }

    fn unlisten(&mut self, listener: ListenerHandle) {
        self.listeners.remove(&listener);
    }
}
