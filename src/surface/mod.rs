//! The map the overlay draws on. The core only ever talks to it through
//! [`RenderSurface`], so the real map widget stays outside this crate.

mod memory;

pub use memory::InMemorySurface;

use geojson::FeatureCollection;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub lat: f64,
    pub lon: f64,
}

impl Position {
    pub const UNKNOWN: Position = Position { lat: 0.0, lon: 0.0 };

    /// Zero on either axis is the feed's "no fix" sentinel.
    pub fn is_known(&self) -> bool {
        self.lat != 0.0 && self.lon != 0.0 && self.lat.is_finite() && self.lon.is_finite()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MarkerHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TooltipHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerVisibility {
    Visible,
    None,
}

impl LayerVisibility {
    pub fn from_bool(visible: bool) -> Self {
        if visible {
            LayerVisibility::Visible
        } else {
            LayerVisibility::None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LayerVisibility::Visible => "visible",
            LayerVisibility::None => "none",
        }
    }
}

/// Pointer interactions a marker can forward to its tooltip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interaction {
    /// pointer enters the marker: show the tooltip
    Enter,
    /// pointer leaves the marker: hide the tooltip
    Leave,
    /// pointer moves over the marker: tooltip follows the pointer
    Move,
}

impl Interaction {
    pub const ALL: [Interaction; 3] = [Interaction::Enter, Interaction::Leave, Interaction::Move];
}

#[derive(Debug, Clone, PartialEq)]
pub struct LineLayer {
    pub id: String,
    pub source_id: String,
    pub color: String,
    pub width: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SurfaceError {
    #[error("source {0} already exists")]
    DuplicateSource(String),
    #[error("layer {0} already exists")]
    DuplicateLayer(String),
    #[error("layer {layer} references missing source {source_id}")]
    MissingSource { layer: String, source_id: String },
}

pub trait RenderSurface {
    fn has_source(&self, id: &str) -> bool;
    fn add_source(&mut self, id: &str, data: FeatureCollection) -> Result<(), SurfaceError>;

    fn has_layer(&self, id: &str) -> bool;
    fn add_layer(&mut self, layer: LineLayer) -> Result<(), SurfaceError>;
    fn set_layer_visibility(&mut self, layer_id: &str, visibility: LayerVisibility);
    fn set_line_opacity(&mut self, layer_id: &str, opacity: f64);

    fn create_marker(&mut self, at: Position, bearing: f64) -> MarkerHandle;
    fn move_marker(&mut self, marker: MarkerHandle, to: Position);
    fn rotate_marker(&mut self, marker: MarkerHandle, bearing: f64);
    fn set_marker_visible(&mut self, marker: MarkerHandle, visible: bool);
    fn remove_marker(&mut self, marker: MarkerHandle);

    fn create_tooltip(&mut self, text: &str) -> TooltipHandle;
    fn update_tooltip(&mut self, tooltip: TooltipHandle, text: &str);
    fn remove_tooltip(&mut self, tooltip: TooltipHandle);

    /// Wires a marker interaction to the tooltip it controls.
    fn listen(
        &mut self,
        marker: MarkerHandle,
        interaction: Interaction,
        tooltip: TooltipHandle,
    ) -> ListenerHandle;
    fn unlisten(&mut self, listener: ListenerHandle);
}

pub fn source_id_for_route(route_id: &str) -> String {
    format!("mbta-routes-{}", route_id)
}

pub fn layer_id_for_route(route_id: &str) -> String {
    format!("mbta-lines-{}", route_id)
}
