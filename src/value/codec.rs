//! Conversions between user models and Firestore maps.
//!
//! Models go through `serde_json::Value` on both sides: any `Serialize` type
//! that renders as a JSON object can be stored, and stored documents decode
//! into any matching `DeserializeOwned` type. Timestamps decode as RFC 3339
//! strings so models can use `chrono` types with serde attributes.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::error::{invalid_argument, FirestoreResult};
use crate::model::Timestamp;
use crate::value::{FirestoreValue, MapValue, ValueKind};

/// Encodes a serializable model into a Firestore field map.
pub fn to_map_value<T>(model: &T) -> FirestoreResult<MapValue>
where
    T: Serialize,
{
    let json = serde_json::to_value(model)
        .map_err(|err| invalid_argument(format!("Failed to serialize document data: {err}")))?;
    let object = match json {
        JsonValue::Object(object) => object,
        other => {
            return Err(invalid_argument(format!(
                "Document data must serialize to an object, got {}",
                json_type_name(&other)
            )))
        }
    };

    let mut fields = BTreeMap::new();
    for (key, value) in object {
        fields.insert(key, json_to_value(value));
    }
    Ok(MapValue::new(fields))
}

/// Decodes a Firestore field map into a deserializable model.
pub fn from_map_value<T>(map: &MapValue) -> FirestoreResult<T>
where
    T: DeserializeOwned,
{
    let mut object = serde_json::Map::new();
    for (key, value) in map.fields() {
        object.insert(key.clone(), value_to_json(value)?);
    }
    serde_json::from_value(JsonValue::Object(object))
        .map_err(|err| invalid_argument(format!("Failed to deserialize document data: {err}")))
}

fn json_to_value(json: JsonValue) -> FirestoreValue {
    match json {
        JsonValue::Null => FirestoreValue::null(),
        JsonValue::Bool(value) => FirestoreValue::from_bool(value),
        JsonValue::Number(number) => {
            if let Some(integer) = number.as_i64() {
                FirestoreValue::from_integer(integer)
            } else {
                FirestoreValue::from_double(number.as_f64().unwrap_or(f64::NAN))
            }
        }
        JsonValue::String(value) => FirestoreValue::from_string(value),
        JsonValue::Array(values) => {
            FirestoreValue::from_array(values.into_iter().map(json_to_value).collect())
        }
        JsonValue::Object(object) => {
            let mut fields = BTreeMap::new();
            for (key, value) in object {
                fields.insert(key, json_to_value(value));
            }
            FirestoreValue::from_map(fields)
        }
    }
}

fn value_to_json(value: &FirestoreValue) -> FirestoreResult<JsonValue> {
    let json = match value.kind() {
        ValueKind::Null => JsonValue::Null,
        ValueKind::Boolean(value) => JsonValue::Bool(*value),
        ValueKind::Integer(value) => JsonValue::from(*value),
        ValueKind::Double(value) => serde_json::Number::from_f64(*value)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        ValueKind::Timestamp(timestamp) => JsonValue::String(format_timestamp(timestamp)),
        ValueKind::String(value) => JsonValue::String(value.clone()),
        ValueKind::Reference(path) => JsonValue::String(path.clone()),
        ValueKind::Array(array) => {
            let mut values = Vec::with_capacity(array.values().len());
            for element in array.values() {
                values.push(value_to_json(element)?);
            }
            JsonValue::Array(values)
        }
        ValueKind::Map(map) => {
            let mut object = serde_json::Map::new();
            for (key, value) in map.fields() {
                object.insert(key.clone(), value_to_json(value)?);
            }
            JsonValue::Object(object)
        }
        ValueKind::Sentinel(_) => {
            return Err(invalid_argument(
                "Sentinel values cannot appear in document data",
            ))
        }
    };
    Ok(json)
}

pub(crate) fn format_timestamp(timestamp: &Timestamp) -> String {
    Utc.timestamp_opt(timestamp.seconds, timestamp.nanos as u32)
        .single()
        .unwrap_or_else(|| Utc.timestamp_opt(0, 0).single().expect("zero timestamp"))
        .to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn parse_timestamp(value: &str) -> FirestoreResult<Timestamp> {
    let datetime = DateTime::parse_from_rfc3339(value)
        .map_err(|err| invalid_argument(format!("Invalid timestamp: {err}")))?;
    let datetime_utc = datetime.with_timezone(&Utc);
    Ok(Timestamp::new(
        datetime_utc.timestamp(),
        datetime_utc.timestamp_subsec_nanos() as i32,
    ))
}

fn json_type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct City {
        name: String,
        population: i64,
        coastal: bool,
    }

    #[test]
    fn roundtrips_model() {
        let city = City {
            name: "San Francisco".into(),
            population: 860_000,
            coastal: true,
        };
        let map = to_map_value(&city).unwrap();
        assert_eq!(
            map.fields().get("name"),
            Some(&FirestoreValue::from_string("San Francisco"))
        );
        let decoded: City = from_map_value(&map).unwrap();
        assert_eq!(decoded, city);
    }

    #[test]
    fn rejects_non_object_data() {
        let err = to_map_value(&42_i32).unwrap_err();
        assert_eq!(err.code_str(), "firestore/invalid-argument");
    }

    #[test]
    fn decodes_timestamp_as_rfc3339() {
        let mut fields = BTreeMap::new();
        fields.insert(
            "created_at".to_string(),
            FirestoreValue::from_timestamp(Timestamp::new(0, 0)),
        );
        let map = MapValue::new(fields);

        #[derive(Deserialize)]
        struct Doc {
            created_at: String,
        }

        let decoded: Doc = from_map_value(&map).unwrap();
        assert_eq!(decoded.created_at, "1970-01-01T00:00:00.000000000Z");
    }

    #[test]
    fn sentinel_in_data_is_rejected() {
        let mut fields = BTreeMap::new();
        fields.insert("at".to_string(), FirestoreValue::server_timestamp());
        let map = MapValue::new(fields);
        let err = from_map_value::<serde_json::Value>(&map).unwrap_err();
        assert_eq!(err.code_str(), "firestore/invalid-argument");
    }
}
