//! Decoder for the Google encoded polyline format.
//!
//! Strava ships each activity's route as a `summary_polyline`: a string of
//! printable ASCII where every point is stored as two signed deltas
//! (latitude, then longitude) against the previous point, in fixed point at
//! 1e5 precision.
//!
//! Each delta is zig-zag encoded and split into 5-bit groups, least
//! significant first. A group is written as one character `group + 63`,
//! with `0x20` set on every group except the last.
//!
//! Malformed input is rejected with a [`PolylineError`]; the decoder never
//! reads past the end of the string.

use thiserror::Error;

use crate::GpsPoint;

/// Precision used by Strava and the Google Maps APIs (1e5).
pub const DEFAULT_PRECISION: u32 = 5;

/// Offset added to each 6-bit chunk to land in printable ASCII.
const CHAR_OFFSET: u8 = 63;
const CHUNK_MASK: u64 = 0x1F;
const CONTINUATION_BIT: u64 = 0x20;
/// 13 chunks would shift past bit 64.
const MAX_CHUNKS: u32 = 12;

/// Why an encoded polyline could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolylineError {
    /// The string ended in the middle of a field, or after a latitude
    /// field with no longitude.
    #[error("polyline truncated at byte {position}")]
    Truncated { position: usize },
    /// A byte outside the encoding alphabet ('?' to '~').
    #[error("invalid polyline character {character:?} at byte {position}")]
    InvalidCharacter { position: usize, character: char },
    /// A field with more chunks than fit in 64 bits.
    #[error("polyline field starting at byte {position} overflows")]
    Overflow { position: usize },
}

/// Decode a polyline encoded at the default 1e5 precision.
///
/// # Example
/// ```
/// use strava_heatmap::polyline::decode;
///
/// let points = decode("_p~iF~ps|U").unwrap();
/// assert_eq!(points.len(), 1);
/// assert!((points[0].latitude - 38.5).abs() < 1e-9);
/// assert!((points[0].longitude + 120.2).abs() < 1e-9);
/// ```
pub fn decode(encoded: &str) -> Result<Vec<GpsPoint>, PolylineError> {
    decode_with_precision(encoded, DEFAULT_PRECISION)
}

/// Decode a polyline encoded with `precision` decimal places.
///
/// Empty input decodes to an empty sequence.
pub fn decode_with_precision(encoded: &str, precision: u32) -> Result<Vec<GpsPoint>, PolylineError> {
    let factor = 10f64.powi(precision as i32);
    let bytes = encoded.as_bytes();

    // Every point needs at least two characters
    let mut points = Vec::with_capacity(bytes.len() / 2);
    let mut index = 0;
    let mut lat: i64 = 0;
    let mut lng: i64 = 0;

    while index < bytes.len() {
        lat = lat.wrapping_add(read_delta(bytes, &mut index)?);

        if index >= bytes.len() {
            return Err(PolylineError::Truncated { position: index });
        }
        lng = lng.wrapping_add(read_delta(bytes, &mut index)?);

        points.push(GpsPoint::new(lat as f64 / factor, lng as f64 / factor));
    }

    Ok(points)
}

/// Read one variable-length field starting at `index` and return its
/// signed value. Advances `index` past the field.
fn read_delta(bytes: &[u8], index: &mut usize) -> Result<i64, PolylineError> {
    let start = *index;
    let mut result: u64 = 0;
    let mut shift: u32 = 0;

    loop {
        let Some(&byte) = bytes.get(*index) else {
            return Err(PolylineError::Truncated { position: *index });
        };
        if !(CHAR_OFFSET..=126).contains(&byte) {
            return Err(PolylineError::InvalidCharacter {
                position: *index,
                character: byte as char,
            });
        }
        if shift / 5 >= MAX_CHUNKS {
            return Err(PolylineError::Overflow { position: start });
        }

        let chunk = u64::from(byte - CHAR_OFFSET);
        result |= (chunk & CHUNK_MASK) << shift;
        shift += 5;
        *index += 1;

        if chunk & CONTINUATION_BIT == 0 {
            break;
        }
    }

    Ok(zigzag(result))
}

/// Map the unsigned zig-zag representation back to a signed delta.
fn zigzag(value: u64) -> i64 {
    let magnitude = (value >> 1) as i64;
    if value & 1 == 1 {
        !magnitude
    } else {
        magnitude
    }
}
