use serde::{Deserialize, Serialize};

use crate::models::location::{
    GeoPoint, MAX_LATITUDE, MAX_LONGITUDE, MIN_LATITUDE, MIN_LONGITUDE,
};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CoordinateError {
    #[error("Latitude and longitude are required")]
    Missing,

    #[error("Invalid coordinates: must be valid numbers")]
    NotNumeric,

    #[error("Latitude must be between -90 and 90")]
    LatitudeOutOfRange(f64),

    #[error("Longitude must be between -180 and 180")]
    LongitudeOutOfRange(f64),
}

/// A coordinate as it arrives on the wire: a JSON number or a numeric string.
/// Any other JSON value is kept so it can be reported as non-numeric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawCoordinate {
    Number(f64),
    Text(String),
    Other(serde_json::Value),
}

impl RawCoordinate {
    /// `None` when the value is absent in substance (an empty string).
    fn present(&self) -> Option<&Self> {
        match self {
            RawCoordinate::Text(text) if text.trim().is_empty() => None,
            other => Some(other),
        }
    }

    fn to_f64(&self) -> Option<f64> {
        let value = match self {
            RawCoordinate::Number(value) => *value,
            RawCoordinate::Text(text) => text.trim().parse::<f64>().ok()?,
            RawCoordinate::Other(_) => return None,
        };
        // "NaN" and "inf" parse as floats but are not coordinates.
        value.is_finite().then_some(value)
    }
}

impl From<f64> for RawCoordinate {
    fn from(value: f64) -> Self {
        RawCoordinate::Number(value)
    }
}

impl From<&str> for RawCoordinate {
    fn from(value: &str) -> Self {
        RawCoordinate::Text(value.to_string())
    }
}

/// Validates and normalizes a latitude/longitude pair.
///
/// Checks run in a fixed order so that exactly one error is reported when
/// several apply: absence, then number format, then latitude range, then
/// longitude range.
pub fn validate(
    latitude: Option<&RawCoordinate>,
    longitude: Option<&RawCoordinate>,
) -> Result<GeoPoint, CoordinateError> {
    let (Some(latitude), Some(longitude)) = (
        latitude.and_then(RawCoordinate::present),
        longitude.and_then(RawCoordinate::present),
    ) else {
        return Err(CoordinateError::Missing);
    };

    let (Some(lat), Some(lng)) = (latitude.to_f64(), longitude.to_f64()) else {
        return Err(CoordinateError::NotNumeric);
    };

    if !(MIN_LATITUDE..=MAX_LATITUDE).contains(&lat) {
        return Err(CoordinateError::LatitudeOutOfRange(lat));
    }

    if !(MIN_LONGITUDE..=MAX_LONGITUDE).contains(&lng) {
        return Err(CoordinateError::LongitudeOutOfRange(lng));
    }

    Ok(GeoPoint::new_unchecked(lat, lng))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(
        lat: impl Into<RawCoordinate>,
        lng: impl Into<RawCoordinate>,
    ) -> Result<GeoPoint, CoordinateError> {
        validate(Some(&lat.into()), Some(&lng.into()))
    }

    #[test]
    fn test_boundaries_are_inclusive() {
        assert_eq!(
            check(90.0, 180.0),
            Ok(GeoPoint::new_unchecked(90.0, 180.0))
        );
        assert_eq!(
            check(-90.0, -180.0),
            Ok(GeoPoint::new_unchecked(-90.0, -180.0))
        );
    }

    #[test]
    fn test_out_of_range_values_fail() {
        assert!(matches!(
            check(90.0001, 0.0),
            Err(CoordinateError::LatitudeOutOfRange(_))
        ));
        assert!(matches!(
            check(0.0, 180.0001),
            Err(CoordinateError::LongitudeOutOfRange(_))
        ));
    }

    #[test]
    fn test_non_numeric_fails() {
        assert_eq!(check("abc", 0.0), Err(CoordinateError::NotNumeric));
        assert_eq!(check("NaN", 0.0), Err(CoordinateError::NotNumeric));
        assert_eq!(check(0.0, "inf"), Err(CoordinateError::NotNumeric));
    }

    #[test]
    fn test_json_non_numbers_fail_as_non_numeric() {
        for raw in [r#"true"#, r#"[1]"#, r#"{"deg":1}"#] {
            let value: RawCoordinate = serde_json::from_str(raw).unwrap();
            assert!(matches!(value, RawCoordinate::Other(_)));
            assert_eq!(
                validate(Some(&value), Some(&RawCoordinate::Number(0.0))),
                Err(CoordinateError::NotNumeric)
            );
        }

        let number: RawCoordinate = serde_json::from_str("12.5").unwrap();
        assert_eq!(number, RawCoordinate::Number(12.5));
    }

    #[test]
    fn test_missing_values_fail() {
        assert_eq!(
            validate(None, Some(&RawCoordinate::Number(1.0))),
            Err(CoordinateError::Missing)
        );
        assert_eq!(check("  ", 1.0), Err(CoordinateError::Missing));
    }

    #[test]
    fn test_zero_is_a_valid_coordinate() {
        assert_eq!(check(0.0, 0.0), Ok(GeoPoint::new_unchecked(0.0, 0.0)));
    }

    #[test]
    fn test_numeric_strings_are_normalized() {
        assert_eq!(
            check(" 40.7128 ", "-74.0060"),
            Ok(GeoPoint::new_unchecked(40.7128, -74.006))
        );
    }

    #[test]
    fn test_error_precedence() {
        // Absence wins over a malformed partner.
        assert_eq!(
            validate(None, Some(&RawCoordinate::from("abc"))),
            Err(CoordinateError::Missing)
        );
        // Format wins over range.
        assert_eq!(check(500.0, "abc"), Err(CoordinateError::NotNumeric));
        // Latitude wins over longitude.
        assert!(matches!(
            check(91.0, 181.0),
            Err(CoordinateError::LatitudeOutOfRange(_))
        ));
    }
}
