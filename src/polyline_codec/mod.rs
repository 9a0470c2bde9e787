//! Decoder for the signed-delta, base-64-shifted polyline format the route
//! shape endpoint returns. Precision is fixed at 5 decimal places.

use geo_types::{Coord, LineString};

const PRECISION: f64 = 1e5;
const CHUNK_OFFSET: u8 = 63;
const CONTINUATION_BIT: i64 = 0x20;
const CHUNK_MASK: i64 = 0x1f;
// 5 bits per chunk, an i64 accumulator holds at most 12 full chunks
const MAX_SHIFT: u32 = 60;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("polyline truncated at byte {position}")]
    Truncated { position: usize },
    #[error("invalid polyline byte {byte:#04x} at {position}")]
    InvalidByte { byte: u8, position: usize },
    #[error("polyline value starting at byte {position} overflows")]
    Overflow { position: usize },
}

/// Decodes an encoded polyline into (longitude, latitude) coordinates.
///
/// `x` of each returned coordinate is the longitude and `y` the latitude,
/// which is the order GeoJSON expects.
pub fn decode(encoded: &str) -> Result<LineString<f64>, DecodeError> {
    let bytes = encoded.as_bytes();
    let mut cursor = 0usize;
    let mut lat: i64 = 0;
    let mut lng: i64 = 0;

    let mut coordinates: Vec<Coord<f64>> = Vec::with_capacity(bytes.len() / 4);

    while cursor < bytes.len() {
        let pair_start = cursor;
        let dlat = next_value(bytes, &mut cursor)?;

        // a latitude with no longitude following it is a truncated pair
        if cursor >= bytes.len() {
            return Err(DecodeError::Truncated { position: cursor });
        }

        let dlng = next_value(bytes, &mut cursor)?;

        lat = lat
            .checked_add(dlat)
            .ok_or(DecodeError::Overflow { position: pair_start })?;
        lng = lng
            .checked_add(dlng)
            .ok_or(DecodeError::Overflow { position: pair_start })?;

        coordinates.push(Coord {
            x: lng as f64 / PRECISION,
            y: lat as f64 / PRECISION,
        });
    }

    Ok(LineString::new(coordinates))
}

fn next_value(bytes: &[u8], cursor: &mut usize) -> Result<i64, DecodeError> {
    let start = *cursor;
    let mut result: i64 = 0;
    let mut shift: u32 = 0;

    loop {
        let Some(&byte) = bytes.get(*cursor) else {
            return Err(DecodeError::Truncated { position: *cursor });
        };

        if !(CHUNK_OFFSET..=CHUNK_OFFSET + 63).contains(&byte) {
            return Err(DecodeError::InvalidByte {
                byte,
                position: *cursor,
            });
        }

        if shift > MAX_SHIFT {
            return Err(DecodeError::Overflow { position: start });
        }

        let chunk = (byte - CHUNK_OFFSET) as i64;
        *cursor += 1;

        result |= (chunk & CHUNK_MASK) << shift;
        shift += 5;

        if chunk < CONTINUATION_BIT {
            break;
        }
    }

    Ok(if result & 1 == 1 {
        !(result >> 1)
    } else {
        result >> 1
    })
}
