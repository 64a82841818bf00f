//! Tolerant numeric codec for engine floating-point fields.
//!
//! The engine marshals non-finite `f64` values as JSON strings (`"NaN"`,
//! `"Infinity"`, `"-Infinity"`, and accepts `"+Infinity"` on input) instead
//! of bare JSON numbers. This is a per-field codec — attach it with
//! `#[serde(with = "crate::float")]` on the specific struct fields that need
//! it, not globally. Grounded on the original's `float.go` `Float64`
//! `UnmarshalJSON`/`MarshalJSON` pair.

use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};

/// A float that tolerates the engine's non-finite string encoding. Always
/// safely castable to/from plain `f64`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Float64(pub f64);

impl From<f64> for Float64 {
    fn from(value: f64) -> Self {
        Float64(value)
    }
}

impl From<Float64> for f64 {
    fn from(value: Float64) -> Self {
        value.0
    }
}

impl Serialize for Float64 {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serialize(&self.0, serializer)
    }
}

impl<'de> Deserialize<'de> for Float64 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserialize(deserializer).map(Float64)
    }
}

/// `serde(with = "crate::float")`-compatible serialize function for bare
/// `f64` fields.
pub fn serialize<S>(value: &f64, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    if value.is_nan() {
        serializer.serialize_str("NaN")
    } else if value.is_infinite() {
        serializer.serialize_str(if *value > 0.0 { "Infinity" } else { "-Infinity" })
    } else {
        serializer.serialize_f64(*value)
    }
}

/// `serde(with = "crate::float")`-compatible deserialize function for bare
/// `f64` fields.
pub fn deserialize<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::String(s) => match s.as_str() {
            "NaN" => Ok(f64::NAN),
            "Infinity" | "+Infinity" => Ok(f64::INFINITY),
            "-Infinity" => Ok(f64::NEG_INFINITY),
            other => other
                .parse::<f64>()
                .map_err(|e| D::Error::custom(format!("invalid float string {other:?}: {e}"))),
        },
        serde_json::Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| D::Error::custom(format!("number {n} out of f64 range"))),
        other => Err(D::Error::custom(format!("expected float, got {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct Wrapper {
        #[serde(with = "super")]
        value: f64,
    }

    fn round_trip(value: f64) -> f64 {
        let encoded = serde_json::to_string(&Wrapper { value }).unwrap();
        let decoded: Wrapper = serde_json::from_str(&encoded).unwrap();
        decoded.value
    }

    #[test]
    fn finite_values_round_trip() {
        for v in [0.0, 1.0, -1.5, 3.14159, f64::MIN_POSITIVE] {
            assert_eq!(round_trip(v), v);
        }
    }

    #[test]
    fn positive_infinity_round_trips() {
        assert_eq!(round_trip(f64::INFINITY), f64::INFINITY);
    }

    #[test]
    fn negative_infinity_round_trips() {
        assert_eq!(round_trip(f64::NEG_INFINITY), f64::NEG_INFINITY);
    }

    #[test]
    fn nan_round_trips_as_nan() {
        assert!(round_trip(f64::NAN).is_nan());
    }

    #[test]
    fn accepts_leading_plus_infinity_on_input() {
        let decoded: Wrapper = serde_json::from_str(r#"{"value":"+Infinity"}"#).unwrap();
        assert_eq!(decoded.value, f64::INFINITY);
    }

    #[test]
    fn emits_without_leading_plus() {
        let encoded = serde_json::to_string(&Wrapper {
            value: f64::INFINITY,
        })
        .unwrap();
        assert_eq!(encoded, r#"{"value":"Infinity"}"#);
    }

    #[test]
    fn shortest_round_trip_form_for_finite_values() {
        let encoded = serde_json::to_string(&Wrapper { value: 1.5 }).unwrap();
        assert_eq!(encoded, r#"{"value":1.5}"#);
    }
}
