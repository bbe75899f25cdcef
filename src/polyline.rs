//! Encoded polyline codec (precision 1e-5).
//!
//! Each coordinate is stored as the zig-zag encoded delta from the previous
//! one, split into 5-bit groups, low group first; every group but the last
//! carries the 0x20 continuation bit, and each group is offset by 63 to land
//! in printable ASCII.
//!
//! Encoding goes through the `polyline` crate. Decoding is done here because
//! planner geometry is untrusted and a broken string must still yield the
//! points read before the fault.

use geo::coord;
use thiserror::Error;

use crate::types::Location;

const PRECISION: f64 = 1e5;

#[derive(Error, Debug, Clone, PartialEq)]
#[error("invalid encoded polyline at byte {position}: {reason} ({} points decoded)", .partial.len())]
pub struct DecodeError {
    pub position: usize,
    pub reason: DecodeFault,
    /// Points decoded before the fault.
    pub partial: Vec<Location>,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeFault {
    #[error("character out of range")]
    InvalidCharacter,
    #[error("value is truncated")]
    Truncated,
    #[error("value is too long or out of range")]
    Overflow,
}

fn next_value(bytes: &[u8], position: &mut usize) -> Result<i64, DecodeFault> {
    let mut result: i64 = 0;
    let mut shift = 0;
    loop {
        let Some(&byte) = bytes.get(*position) else {
            return Err(DecodeFault::Truncated);
        };
        if !(63..=126).contains(&byte) {
            return Err(DecodeFault::InvalidCharacter);
        }
        if shift > 60 {
            return Err(DecodeFault::Overflow);
        }
        *position += 1;
        let chunk = i64::from(byte - 63);
        result |= (chunk & 0x1f) << shift;
        shift += 5;
        if chunk < 0x20 {
            break;
        }
    }
    Ok(if result & 1 == 1 { !(result >> 1) } else { result >> 1 })
}

pub fn decode(encoded: &str) -> Result<Vec<Location>, DecodeError> {
    let bytes = encoded.as_bytes();
    let mut points = Vec::new();
    let mut position = 0;
    let (mut lat, mut lng) = (0i64, 0i64);

    while position < bytes.len() {
        let deltas = next_value(bytes, &mut position)
            .and_then(|dlat| next_value(bytes, &mut position).map(|dlng| (dlat, dlng)));
        let next = deltas.and_then(|(dlat, dlng)| {
            match (lat.checked_add(dlat), lng.checked_add(dlng)) {
                (Some(lat), Some(lng)) => Ok((lat, lng)),
                _ => Err(DecodeFault::Overflow),
            }
        });
        match next {
            Ok((next_lat, next_lng)) => {
                lat = next_lat;
                lng = next_lng;
                points.push(Location {
                    latitude: lat as f64 / PRECISION,
                    longitude: lng as f64 / PRECISION,
                });
            }
            Err(reason) => {
                return Err(DecodeError {
                    position,
                    reason,
                    partial: points,
                })
            }
        }
    }
    Ok(points)
}

pub fn encode(points: &[Location]) -> Result<String, String> {
    ::polyline::encode_coordinates(
        points.iter().map(|point| coord! { x: point.longitude, y: point.latitude }),
        5,
    )
}

#[test]
fn test_decode_reference_vector() {
    let points = decode("_p~iF~ps|U_ulLnnqC_mqNvxq`@").unwrap();
    let expected = [(38.5, -120.2), (40.7, -120.95), (43.252, -126.453)];
    assert_eq!(points.len(), expected.len());
    for (point, (lat, lng)) in points.iter().zip(expected) {
        assert!((point.latitude - lat).abs() < 1e-5, "{:?}", point);
        assert!((point.longitude - lng).abs() < 1e-5, "{:?}", point);
    }
}

#[test]
fn test_encode_reference_vector() {
    let points = [
        Location::new(38.5, -120.2),
        Location::new(40.7, -120.95),
        Location::new(43.252, -126.453),
    ];
    assert_eq!(encode(&points).unwrap(), "_p~iF~ps|U_ulLnnqC_mqNvxq`@");
}

#[test]
fn test_decode_empty() {
    assert_eq!(decode(""), Ok(Vec::new()));
}

#[test]
fn test_truncated_keeps_decoded_points() {
    // Reference vector cut in the middle of the third latitude.
    let err = decode("_p~iF~ps|U_ulLnnqC_mq").unwrap_err();
    assert_eq!(err.reason, DecodeFault::Truncated);
    assert_eq!(err.partial.len(), 2);
    assert!((err.partial[1].latitude - 40.7).abs() < 1e-5);
}

#[test]
fn test_invalid_character() {
    let err = decode("_p~iF~ps|U _ulLnnqC").unwrap_err();
    assert_eq!(err.reason, DecodeFault::InvalidCharacter);
    assert_eq!(err.position, 10);
    assert_eq!(err.partial.len(), 1);
}

#[test]
fn test_coordinate_overflow_is_reported() {
    // Each value decodes to roughly -2^62, so the running latitude leaves i64 on the third point.
    let encoded = format!("{}F?", "~".repeat(12)).repeat(3);
    let err = decode(&encoded).unwrap_err();
    assert_eq!(err.reason, DecodeFault::Overflow);
    assert_eq!(err.partial.len(), 2);
}

#[test]
fn test_decoder_agrees_with_encoder() {
    let points = [Location::new(45.1885, 5.7245), Location::new(45.19, 5.7318), Location::new(45.1917, 5.7201)];
    let decoded = decode(&encode(&points).unwrap()).unwrap();
    assert_eq!(decoded.len(), points.len());
    for (got, want) in decoded.iter().zip(&points) {
        assert!(got.distance_km(want) < 1e-3, "{:?} vs {:?}", got, want);
    }
}
