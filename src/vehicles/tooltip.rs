use super::VehicleRecord;
use crate::route_catalog::{Mode, RouteCatalog};
use crate::stops::StopNameCache;
use chrono::{DateTime, Utc};
use itertools::Itertools;

pub fn direction_name(route_id: &str, direction_id: Option<u8>) -> &'static str {
    let Some(direction) = direction_id else {
        return "Unknown";
    };

    let (zero, one) = match route_id {
        "Red" | "Orange" => ("Southbound", "Northbound"),
        "Blue" => ("Westbound", "Eastbound"),
        r if r.starts_with("Green") => ("Westbound", "Eastbound"),
        _ => ("Outbound", "Inbound"),
    };

    if direction == 0 { zero } else { one }
}

/// Builds the hover text for a vehicle marker.
pub struct TooltipFormatter<'a> {
    pub catalog: &'a RouteCatalog,
    pub stops: &'a StopNameCache,
    pub now: DateTime<Utc>,
}

impl<'a> TooltipFormatter<'a> {
    pub fn new(catalog: &'a RouteCatalog, stops: &'a StopNameCache, now: DateTime<Utc>) -> Self {
        Self {
            catalog,
            stops,
            now,
        }
    }

    pub fn destination(&self, record: &VehicleRecord) -> String {
        if let Some(destination) = &record.destination {
            return destination.clone();
        }

        match &record.stop_id {
            Some(stop_id) => self
                .stops
                .get(stop_id)
                .map(str::to_string)
                .unwrap_or_else(|| stop_id.clone()),
            None => String::from("Unknown"),
        }
    }

    pub fn last_ping_secs(&self, record: &VehicleRecord) -> i64 {
        (self.now - record.updated_at).num_seconds()
    }

    pub fn describe(&self, record: &VehicleRecord) -> String {
        let mode = self.catalog.get(&record.route_id).map(|r| r.mode);

        let destination = self.destination(record);
        let status = record.status.as_deref().unwrap_or("Unknown");
        let last_ping = self.last_ping_secs(record);

        match mode {
            Some(Mode::Bus) => format!(
                "Bus No: {}\nRoute: {}\nDestination: {}\nStatus: {}\nLast Ping: {}s ago",
                record.label,
                self.catalog.display_name(&record.route_id),
                destination,
                status,
                last_ping
            ),
            Some(Mode::CommuterRail) => format!(
                "Car: {}\nRoute: {}\nDirection: {}\nDestination: {}\nStatus: {}\nLast Ping: {}s ago",
                record.label,
                record.route_id,
                direction_name(&record.route_id, record.direction_id),
                destination,
                status,
                last_ping
            ),
            _ => {
                let (cars, consist) = match &record.car_list {
                    Some(cars) => (cars.len().to_string(), cars.iter().join(", ")),
                    None => (String::from("N/A"), String::from("No data")),
                };

                format!(
                    "Lead Car: {}\nRoute: {}\nDirection: {}\nDestination: {}\nStatus: {}\nCars: {}\nConsist: {}\nLast Ping: {}s ago",
                    record.label,
                    record.route_id,
                    direction_name(&record.route_id, record.direction_id),
                    destination,
                    status,
                    cars,
                    consist,
                    last_ping
                )
            }
        }
    }
}
