//! JSON <-> Avro value conversion.
//!
//! Records flow through the pipelines as `serde_json::Value`; this module
//! maps them onto Avro values for a given schema and back. Bytes and fixed
//! values travel as base64 strings on the JSON side.

use apache_avro::schema::{NamesRef, ResolvedSchema};
use apache_avro::types::Value as AvroValue;
use apache_avro::Decimal;
pub use apache_avro::Schema;
use base64::Engine;
use chrono::{DateTime, FixedOffset, NaiveDate};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{RegistryError, Result};

/// Parse an Avro schema document.
pub fn parse_schema(document: &str) -> Result<Schema> {
    Schema::parse_str(document).map_err(|e| RegistryError::InvalidSchema(e.to_string()))
}

/// Encode a JSON record as an Avro datum (no envelope).
pub fn encode_datum(schema: &Schema, record: &JsonValue) -> Result<Vec<u8>> {
    let value = json_to_avro(record, schema)?;
    apache_avro::to_avro_datum(schema, value).map_err(|e| RegistryError::Encode(e.to_string()))
}

/// Decode an Avro datum (no envelope) into a JSON record.
pub fn decode_datum(schema: &Schema, payload: &[u8]) -> Result<JsonValue> {
    let mut reader = payload;
    let value = apache_avro::from_avro_datum(schema, &mut reader, None)
        .map_err(|e| RegistryError::Decode(e.to_string()))?;
    Ok(avro_to_json(&value))
}

fn invalid(message: String) -> RegistryError {
    RegistryError::Encode(message)
}

/// Convert a JSON value into an Avro value shaped by `schema`.
///
/// Named types referenced later in the schema are resolved against their
/// first definition. Logical types accept the JSON shapes the decoder emits
/// (numbers for dates and times, base64 for decimals, strings for uuids)
/// plus ISO-8601 strings for dates and timestamps.
pub fn json_to_avro(json: &JsonValue, schema: &Schema) -> Result<AvroValue> {
    let resolved = ResolvedSchema::try_from(schema).map_err(|e| invalid(e.to_string()))?;
    to_avro(json, schema, resolved.get_names())
}

fn to_avro(json: &JsonValue, schema: &Schema, names: &NamesRef<'_>) -> Result<AvroValue> {
    match (schema, json) {
        (Schema::Null, JsonValue::Null) => Ok(AvroValue::Null),

        (Schema::Boolean, JsonValue::Bool(b)) => Ok(AvroValue::Boolean(*b)),

        (Schema::Int, JsonValue::Number(n)) => Ok(AvroValue::Int(as_i32(n, "int")?)),

        (Schema::Long, JsonValue::Number(n)) => Ok(AvroValue::Long(as_i64(n, "long")?)),

        (Schema::Float, JsonValue::Number(n)) => n
            .as_f64()
            .map(|f| AvroValue::Float(f as f32))
            .ok_or_else(|| invalid(format!("Expected float, got {n}"))),

        (Schema::Double, JsonValue::Number(n)) => n
            .as_f64()
            .map(AvroValue::Double)
            .ok_or_else(|| invalid(format!("Expected double, got {n}"))),

        (Schema::String, JsonValue::String(s)) => Ok(AvroValue::String(s.clone())),

        (Schema::Bytes, JsonValue::String(s)) => Ok(AvroValue::Bytes(decode_base64(s)?)),

        (Schema::Array(array), JsonValue::Array(items)) => {
            let items = items
                .iter()
                .map(|item| to_avro(item, &array.items, names))
                .collect::<Result<Vec<_>>>()?;
            Ok(AvroValue::Array(items))
        }

        (Schema::Map(map), JsonValue::Object(obj)) => {
            let mut out = HashMap::with_capacity(obj.len());
            for (k, v) in obj {
                out.insert(k.clone(), to_avro(v, &map.types, names)?);
            }
            Ok(AvroValue::Map(out))
        }

        (Schema::Union(union), json) => {
            for (idx, variant) in union.variants().iter().enumerate() {
                if let Ok(v) = to_avro(json, variant, names) {
                    return Ok(AvroValue::Union(idx as u32, Box::new(v)));
                }
            }
            Err(invalid(format!("No matching union variant for {json}")))
        }

        (Schema::Record(record), JsonValue::Object(obj)) => {
            let mut fields = Vec::with_capacity(record.fields.len());
            for field in &record.fields {
                let value = match (obj.get(&field.name), &field.default) {
                    (Some(v), _) => to_avro(v, &field.schema, names)?,
                    (None, Some(default)) => to_avro(default, &field.schema, names)?,
                    (None, None) => {
                        return Err(invalid(format!("Missing required field: {}", field.name)))
                    }
                };
                fields.push((field.name.clone(), value));
            }
            Ok(AvroValue::Record(fields))
        }

        (Schema::Enum(enum_schema), JsonValue::String(s)) => enum_schema
            .symbols
            .iter()
            .position(|sym| sym == s)
            .map(|pos| AvroValue::Enum(pos as u32, s.clone()))
            .ok_or_else(|| invalid(format!("Invalid enum symbol: {s}"))),

        (Schema::Fixed(fixed), JsonValue::String(s)) => {
            let bytes = decode_base64(s)?;
            if bytes.len() != fixed.size {
                return Err(invalid(format!(
                    "Fixed size mismatch: expected {}, got {}",
                    fixed.size,
                    bytes.len()
                )));
            }
            Ok(AvroValue::Fixed(fixed.size, bytes))
        }

        (Schema::Ref { name }, json) => {
            let target = names
                .get(name)
                .or_else(|| {
                    names
                        .iter()
                        .find(|(known, _)| known.name == name.name)
                        .map(|(_, schema)| schema)
                })
                .ok_or_else(|| invalid(format!("Unknown named type: {}", name.fullname(None))))?;
            to_avro(json, target, names)
        }

        (Schema::Date, JsonValue::Number(n)) => Ok(AvroValue::Date(as_i32(n, "date")?)),
        (Schema::Date, JsonValue::String(s)) => {
            let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map_err(|e| invalid(format!("Invalid date '{s}': {e}")))?;
            let days = date.signed_duration_since(NaiveDate::default()).num_days();
            i32::try_from(days)
                .map(AvroValue::Date)
                .map_err(|_| invalid(format!("Date out of range: {s}")))
        }

        (Schema::TimeMillis, JsonValue::Number(n)) => {
            Ok(AvroValue::TimeMillis(as_i32(n, "time-millis")?))
        }
        (Schema::TimeMicros, JsonValue::Number(n)) => {
            Ok(AvroValue::TimeMicros(as_i64(n, "time-micros")?))
        }

        (Schema::TimestampMillis, json) => {
            timestamp(json, "timestamp-millis", |t| Some(t.timestamp_millis()))
                .map(AvroValue::TimestampMillis)
        }
        (Schema::TimestampMicros, json) => {
            timestamp(json, "timestamp-micros", |t| Some(t.timestamp_micros()))
                .map(AvroValue::TimestampMicros)
        }
        (Schema::TimestampNanos, json) => {
            timestamp(json, "timestamp-nanos", |t| t.timestamp_nanos_opt())
                .map(AvroValue::TimestampNanos)
        }
        (Schema::LocalTimestampMillis, JsonValue::Number(n)) => Ok(
            AvroValue::LocalTimestampMillis(as_i64(n, "local-timestamp-millis")?),
        ),
        (Schema::LocalTimestampMicros, JsonValue::Number(n)) => Ok(
            AvroValue::LocalTimestampMicros(as_i64(n, "local-timestamp-micros")?),
        ),
        (Schema::LocalTimestampNanos, JsonValue::Number(n)) => Ok(
            AvroValue::LocalTimestampNanos(as_i64(n, "local-timestamp-nanos")?),
        ),

        (Schema::Uuid, JsonValue::String(s)) => Uuid::parse_str(s)
            .map(AvroValue::Uuid)
            .map_err(|e| invalid(format!("Invalid uuid '{s}': {e}"))),

        (Schema::Decimal(_), JsonValue::String(s)) => {
            Ok(AvroValue::Decimal(Decimal::from(decode_base64(s)?)))
        }
        (Schema::Decimal(decimal), JsonValue::Number(n)) => {
            let unscaled = unscaled_decimal(n, decimal.scale)?;
            Ok(AvroValue::Decimal(Decimal::from(twos_complement(unscaled))))
        }

        (schema, json) => Err(invalid(format!(
            "Type mismatch: value {json} does not match schema {}",
            schema_name(schema)
        ))),
    }
}

fn as_i64(n: &serde_json::Number, kind: &str) -> Result<i64> {
    n.as_i64()
        .ok_or_else(|| invalid(format!("Expected {kind}, got {n}")))
}

fn as_i32(n: &serde_json::Number, kind: &str) -> Result<i32> {
    let i = as_i64(n, kind)?;
    i32::try_from(i).map_err(|_| invalid(format!("Value {i} out of {kind} range")))
}

/// Epoch-based timestamps arrive as numbers or RFC 3339 strings.
fn timestamp(
    json: &JsonValue,
    kind: &str,
    from_datetime: impl Fn(DateTime<FixedOffset>) -> Option<i64>,
) -> Result<i64> {
    match json {
        JsonValue::Number(n) => as_i64(n, kind),
        JsonValue::String(s) => {
            let parsed = DateTime::parse_from_rfc3339(s)
                .map_err(|e| invalid(format!("Invalid {kind} '{s}': {e}")))?;
            from_datetime(parsed).ok_or_else(|| invalid(format!("{kind} out of range: {s}")))
        }
        other => Err(invalid(format!("Expected {kind}, got {other}"))),
    }
}

/// Scale a JSON number into the unscaled integer of a decimal.
fn unscaled_decimal(n: &serde_json::Number, scale: usize) -> Result<i128> {
    let out_of_range = || invalid(format!("Decimal {n} out of range for scale {scale}"));
    let factor = u32::try_from(scale)
        .ok()
        .and_then(|scale| 10i128.checked_pow(scale))
        .ok_or_else(out_of_range)?;
    if let Some(i) = n.as_i64() {
        return i128::from(i).checked_mul(factor).ok_or_else(out_of_range);
    }
    let f = n
        .as_f64()
        .ok_or_else(|| invalid(format!("Expected decimal, got {n}")))?;
    let scaled = (f * factor as f64).round();
    if !scaled.is_finite() || scaled.abs() >= i128::MAX as f64 {
        return Err(out_of_range());
    }
    Ok(scaled as i128)
}

/// Minimal big-endian two's complement bytes.
fn twos_complement(value: i128) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let sign = if value < 0 { 0xff } else { 0x00 };
    let mut start = 0;
    while start < bytes.len() - 1
        && bytes[start] == sign
        && (bytes[start + 1] & 0x80) == (sign & 0x80)
    {
        start += 1;
    }
    bytes[start..].to_vec()
}

/// Convert a decoded Avro value into JSON.
pub fn avro_to_json(value: &AvroValue) -> JsonValue {
    match value {
        AvroValue::Null => JsonValue::Null,
        AvroValue::Boolean(b) => JsonValue::Bool(*b),
        AvroValue::Int(i) => serde_json::json!(i),
        AvroValue::Long(l) => serde_json::json!(l),
        AvroValue::Float(f) => serde_json::json!(f),
        AvroValue::Double(d) => serde_json::json!(d),
        AvroValue::Bytes(b) | AvroValue::Fixed(_, b) => JsonValue::String(encode_base64(b)),
        AvroValue::String(s) | AvroValue::Enum(_, s) => JsonValue::String(s.clone()),
        AvroValue::Union(_, inner) => avro_to_json(inner),
        AvroValue::Array(items) => JsonValue::Array(items.iter().map(avro_to_json).collect()),
        AvroValue::Map(entries) => JsonValue::Object(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), avro_to_json(v)))
                .collect(),
        ),
        AvroValue::Record(fields) => JsonValue::Object(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), avro_to_json(v)))
                .collect(),
        ),
        AvroValue::Date(d) => serde_json::json!(d),
        AvroValue::TimeMillis(t) => serde_json::json!(t),
        AvroValue::TimeMicros(t) => serde_json::json!(t),
        AvroValue::TimestampMillis(t) => serde_json::json!(t),
        AvroValue::TimestampMicros(t) => serde_json::json!(t),
        AvroValue::TimestampNanos(t) => serde_json::json!(t),
        AvroValue::LocalTimestampMillis(t) => serde_json::json!(t),
        AvroValue::LocalTimestampMicros(t) => serde_json::json!(t),
        AvroValue::LocalTimestampNanos(t) => serde_json::json!(t),
        AvroValue::Decimal(d) => {
            let bytes: Vec<u8> = d.try_into().unwrap_or_default();
            JsonValue::String(encode_base64(&bytes))
        }
        AvroValue::BigDecimal(d) => JsonValue::String(d.to_string()),
        AvroValue::Uuid(u) => JsonValue::String(u.to_string()),
        AvroValue::Duration(_) => JsonValue::Null,
    }
}

fn schema_name(schema: &Schema) -> &'static str {
    match schema {
        Schema::Null => "null",
        Schema::Boolean => "boolean",
        Schema::Int => "int",
        Schema::Long => "long",
        Schema::Float => "float",
        Schema::Double => "double",
        Schema::Bytes => "bytes",
        Schema::String => "string",
        Schema::Array(_) => "array",
        Schema::Map(_) => "map",
        Schema::Union(_) => "union",
        Schema::Record(_) => "record",
        Schema::Enum(_) => "enum",
        Schema::Fixed(_) => "fixed",
        Schema::Ref { .. } => "named reference",
        _ => "logical",
    }
}

fn decode_base64(s: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(s)
        .map_err(|e| invalid(format!("Invalid base64: {e}")))
}

fn encode_base64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}
