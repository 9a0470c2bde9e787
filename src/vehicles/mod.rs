pub mod tooltip;

use crate::surface::Position;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type VehicleId = String;

/// One vehicle as last reported by the feed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VehicleRecord {
    pub id: VehicleId,
    pub route_id: String,
    pub position: Position,
    pub bearing_degrees: f64,
    pub label: String,
    pub updated_at: DateTime<Utc>,
    pub destination: Option<String>,
    pub stop_id: Option<String>,
    pub status: Option<String>,
    pub direction_id: Option<u8>,
    pub car_list: Option<Vec<String>>,
}

#[derive(Debug, thiserror::Error)]
pub enum MalformedPayload {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("vehicle resource has no id")]
    MissingId,
    #[error("vehicle {0} has no route relationship")]
    MissingRoute(String),
    #[error("reset payload is not an array")]
    NotAnArray,
}

// JSON:API resource layout of /vehicles

#[derive(Deserialize, Debug)]
struct RawVehicle {
    id: Option<String>,
    #[serde(default)]
    attributes: RawVehicleAttributes,
    #[serde(default)]
    relationships: RawVehicleRelationships,
}

#[derive(Deserialize, Debug, Default)]
struct RawVehicleAttributes {
    latitude: Option<f64>,
    longitude: Option<f64>,
    label: Option<String>,
    bearing: Option<f64>,
    carriages: Option<Vec<RawCarriage>>,
    updated_at: Option<DateTime<Utc>>,
    direction_id: Option<u8>,
    destination: Option<String>,
    current_status: Option<String>,
}

#[derive(Deserialize, Debug)]
struct RawCarriage {
    label: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
struct RawVehicleRelationships {
    route: Option<RawRelationship>,
    stop: Option<RawRelationship>,
}

#[derive(Deserialize, Debug)]
struct RawRelationship {
    data: Option<RawResourceIdentifier>,
}

#[derive(Deserialize, Debug)]
struct RawResourceIdentifier {
    id: String,
}

impl RawRelationship {
    fn into_id(self) -> Option<String> {
        self.data.map(|d| d.id)
    }
}

/// Body of `GET /vehicles`, the snapshot taken before each stream connect.
#[derive(Deserialize, Debug, Default)]
pub struct VehiclesDocument {
    #[serde(default)]
    pub data: Vec<serde_json::Value>,
}

#[derive(Deserialize, Debug)]
struct RawRemoval {
    id: Option<String>,
}

impl VehicleRecord {
    fn from_raw(raw: RawVehicle, received_at: DateTime<Utc>) -> Result<Self, MalformedPayload> {
        let id = raw
            .id
            .filter(|id| !id.is_empty())
            .ok_or(MalformedPayload::MissingId)?;

        let route_id = raw
            .relationships
            .route
            .and_then(RawRelationship::into_id)
            .ok_or_else(|| MalformedPayload::MissingRoute(id.clone()))?;

        let attributes = raw.attributes;

        Ok(VehicleRecord {
            id,
            route_id,
            position: Position {
                lat: attributes.latitude.unwrap_or_default(),
                lon: attributes.longitude.unwrap_or_default(),
            },
            bearing_degrees: attributes.bearing.unwrap_or_default(),
            label: attributes.label.unwrap_or_default(),
            updated_at: attributes.updated_at.unwrap_or(received_at),
            destination: attributes.destination.filter(|d| !d.is_empty()),
            stop_id: raw.relationships.stop.and_then(RawRelationship::into_id),
            status: attributes.current_status,
            direction_id: attributes.direction_id,
            car_list: attributes.carriages.map(|cars| {
                cars.into_iter()
                    .map(|car| car.label.unwrap_or_default())
                    .collect()
            }),
        })
    }

    /// Parses a single vehicle resource, the payload of `update` and `add` events.
    pub fn parse_one(data: &str, received_at: DateTime<Utc>) -> Result<Self, MalformedPayload> {
        let raw: RawVehicle = serde_json::from_str(data)?;
        Self::from_raw(raw, received_at)
    }

    /// Parses the array payload of a `reset` event.
    ///
    /// Elements that fail to parse come back as errors in place so one bad
    /// vehicle does not sink the whole snapshot.
    pub fn parse_many(
        data: &str,
        received_at: DateTime<Utc>,
    ) -> Result<Vec<Result<Self, MalformedPayload>>, MalformedPayload> {
        let value: serde_json::Value = serde_json::from_str(data)?;

        let serde_json::Value::Array(items) = value else {
            return Err(MalformedPayload::NotAnArray);
        };

        Ok(items
            .into_iter()
            .map(|item| Self::parse_value(item, received_at))
            .collect())
    }

    /// Parses one already-decoded vehicle resource.
    pub fn parse_value(
        value: serde_json::Value,
        received_at: DateTime<Utc>,
    ) -> Result<Self, MalformedPayload> {
        let raw: RawVehicle = serde_json::from_value(value)?;
        Self::from_raw(raw, received_at)
    }

    /// Vehicle id carried by a `remove` event.
    pub fn parse_removal(data: &str) -> Result<VehicleId, MalformedPayload> {
        let raw: RawRemoval = serde_json::from_str(data)?;
        raw.id
            .filter(|id| !id.is_empty())
            .ok_or(MalformedPayload::MissingId)
    }

    pub fn has_known_position(&self) -> bool {
        self.position.is_known()
    }
}
