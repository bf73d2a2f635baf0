//! Runtime value representation.
//!
//! Every datum crossing the mapping boundary (bound parameters, result
//! columns, sequence values, generated keys) is carried as a [`Value`].
//! Typed Rust code converts at the edges through [`FromValue`] and
//! [`IntoValue`]; everything in between works on the uniform enum.

use crate::error::{OrmError, OrmResult};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};

/// A database value in transit.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Exact DECIMAL/NUMERIC representation, preserved as text.
    Decimal(String),
    Text(String),
    Bytes(Vec<u8>),
    Timestamp(DateTime<Utc>),
    Date(NaiveDate),
    Time(NaiveTime),
    Json(serde_json::Value),
    /// An ordered collection argument; expanded into a placeholder group
    /// before binding, never bound directly.
    List(Vec<Value>),
}

/// Discriminant of a [`Value`], used as the key space of the coercion
/// registry and as the declared type of a mapped property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Null,
    Bool,
    Int,
    Float,
    Decimal,
    Text,
    Bytes,
    Timestamp,
    Date,
    Time,
    Json,
    List,
}

impl ValueKind {
    pub fn name(self) -> &'static str {
        match self {
            ValueKind::Null => "Null",
            ValueKind::Bool => "Bool",
            ValueKind::Int => "Int",
            ValueKind::Float => "Float",
            ValueKind::Decimal => "Decimal",
            ValueKind::Text => "Text",
            ValueKind::Bytes => "Bytes",
            ValueKind::Timestamp => "Timestamp",
            ValueKind::Date => "Date",
            ValueKind::Time => "Time",
            ValueKind::Json => "Json",
            ValueKind::List => "List",
        }
    }
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::Decimal(_) => ValueKind::Decimal,
            Value::Text(_) => ValueKind::Text,
            Value::Bytes(_) => ValueKind::Bytes,
            Value::Timestamp(_) => ValueKind::Timestamp,
            Value::Date(_) => ValueKind::Date,
            Value::Time(_) => ValueKind::Time,
            Value::Json(_) => ValueKind::Json,
            Value::List(_) => ValueKind::List,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Build a `List` from any iterable of convertible elements. `Vec<u8>`
    /// converts to `Bytes` through [`IntoValue`]; this is the way to bind an
    /// IN-style parameter set.
    pub fn list<I, T>(items: I) -> Value
    where
        I: IntoIterator<Item = T>,
        T: IntoValue,
    {
        Value::List(items.into_iter().map(IntoValue::into_value).collect())
    }

    /// Generic textual rendering, used both as the coercion fallback for
    /// text targets and when logging bound parameters.
    pub fn render(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Bool(v) => v.to_string(),
            Value::Int(v) => v.to_string(),
            Value::Float(v) => v.to_string(),
            Value::Decimal(v) => v.clone(),
            Value::Text(v) => v.clone(),
            Value::Bytes(v) => STANDARD.encode(v),
            Value::Timestamp(v) => v.to_rfc3339(),
            Value::Date(v) => v.to_string(),
            Value::Time(v) => v.to_string(),
            Value::Json(v) => v.to_string(),
            Value::List(v) => {
                let inner: Vec<String> = v.iter().map(Value::render).collect();
                format!("[{}]", inner.join(", "))
            }
        }
    }
}

/// Render a parameter slice for the statement log and for execution errors.
pub(crate) fn render_params(params: &[Value]) -> String {
    params
        .iter()
        .map(Value::render)
        .collect::<Vec<_>>()
        .join(", ")
}

// Epoch-millisecond bridge shared by the whole temporal family.

pub(crate) fn epoch_millis(value: &Value) -> Option<i64> {
    match value {
        Value::Int(v) => Some(*v),
        Value::Float(v) => Some((v * 1000.0).round() as i64),
        Value::Decimal(v) => v.parse::<f64>().ok().map(|f| (f * 1000.0).round() as i64),
        Value::Timestamp(v) => Some(v.timestamp_millis()),
        Value::Date(v) => v
            .and_hms_opt(0, 0, 0)
            .map(|dt| Utc.from_utc_datetime(&dt).timestamp_millis()),
        Value::Time(v) => Some(
            (v.signed_duration_since(NaiveTime::from_hms_opt(0, 0, 0).expect("midnight")))
                .num_milliseconds(),
        ),
        Value::Text(v) => DateTime::parse_from_rfc3339(v)
            .map(|dt| dt.timestamp_millis())
            .ok(),
        _ => None,
    }
}

pub(crate) fn timestamp_from_millis(millis: i64) -> OrmResult<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or_else(|| OrmError::conversion_with("Int", "Timestamp", format!("{millis} out of range")))
}

// =============================================================================
// Typed edges
// =============================================================================

/// Extraction of a concrete Rust type out of a [`Value`]. The engine casts
/// to [`Self::KIND`] through the coercion registry first, so implementations
/// only need to handle their own variant (and `Null`, which is an error for
/// non-optional targets).
pub trait FromValue: Sized {
    const KIND: ValueKind;
    fn from_value(value: Value) -> OrmResult<Self>;
}

fn unexpected<T>(expected: ValueKind, got: &Value) -> OrmResult<T> {
    Err(OrmError::conversion(got.kind().name(), expected.name()))
}

macro_rules! int_from_value {
    ($($ty:ty),+) => {$(
        impl FromValue for $ty {
            const KIND: ValueKind = ValueKind::Int;
            fn from_value(value: Value) -> OrmResult<Self> {
                match value {
                    Value::Int(v) => <$ty>::try_from(v).map_err(|_| {
                        OrmError::conversion_with("Int", stringify!($ty), format!("{v} out of range"))
                    }),
                    other => unexpected(ValueKind::Int, &other),
                }
            }
        }
    )+};
}

int_from_value!(i8, i16, i32, i64, u8, u16, u32);

impl FromValue for f64 {
    const KIND: ValueKind = ValueKind::Float;
    fn from_value(value: Value) -> OrmResult<Self> {
        match value {
            Value::Float(v) => Ok(v),
            other => unexpected(ValueKind::Float, &other),
        }
    }
}

impl FromValue for f32 {
    const KIND: ValueKind = ValueKind::Float;
    fn from_value(value: Value) -> OrmResult<Self> {
        f64::from_value(value).map(|v| v as f32)
    }
}

impl FromValue for bool {
    const KIND: ValueKind = ValueKind::Bool;
    fn from_value(value: Value) -> OrmResult<Self> {
        match value {
            Value::Bool(v) => Ok(v),
            other => unexpected(ValueKind::Bool, &other),
        }
    }
}

impl FromValue for String {
    const KIND: ValueKind = ValueKind::Text;
    fn from_value(value: Value) -> OrmResult<Self> {
        match value {
            Value::Text(v) => Ok(v),
            other => unexpected(ValueKind::Text, &other),
        }
    }
}

impl FromValue for char {
    const KIND: ValueKind = ValueKind::Text;
    fn from_value(value: Value) -> OrmResult<Self> {
        match value {
            Value::Text(v) => v
                .chars()
                .next()
                .ok_or_else(|| OrmError::conversion_with("Text", "char", "empty string")),
            other => unexpected(ValueKind::Text, &other),
        }
    }
}

impl FromValue for Vec<u8> {
    const KIND: ValueKind = ValueKind::Bytes;
    fn from_value(value: Value) -> OrmResult<Self> {
        match value {
            Value::Bytes(v) => Ok(v),
            other => unexpected(ValueKind::Bytes, &other),
        }
    }
}

impl FromValue for DateTime<Utc> {
    const KIND: ValueKind = ValueKind::Timestamp;
    fn from_value(value: Value) -> OrmResult<Self> {
        match value {
            Value::Timestamp(v) => Ok(v),
            other => unexpected(ValueKind::Timestamp, &other),
        }
    }
}

impl FromValue for NaiveDate {
    const KIND: ValueKind = ValueKind::Date;
    fn from_value(value: Value) -> OrmResult<Self> {
        match value {
            Value::Date(v) => Ok(v),
            other => unexpected(ValueKind::Date, &other),
        }
    }
}

impl FromValue for NaiveTime {
    const KIND: ValueKind = ValueKind::Time;
    fn from_value(value: Value) -> OrmResult<Self> {
        match value {
            Value::Time(v) => Ok(v),
            other => unexpected(ValueKind::Time, &other),
        }
    }
}

impl FromValue for serde_json::Value {
    const KIND: ValueKind = ValueKind::Json;
    fn from_value(value: Value) -> OrmResult<Self> {
        match value {
            Value::Json(v) => Ok(v),
            other => unexpected(ValueKind::Json, &other),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    const KIND: ValueKind = T::KIND;
    fn from_value(value: Value) -> OrmResult<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

/// Conversion of a concrete Rust type into a [`Value`], used by property
/// getters and query parameters.
pub trait IntoValue {
    fn into_value(self) -> Value;
}

macro_rules! into_value_via {
    ($variant:ident: $($ty:ty),+) => {$(
        impl IntoValue for $ty {
            fn into_value(self) -> Value {
                Value::$variant(self.into())
            }
        }
    )+};
}

into_value_via!(Int: i8, i16, i32, i64, u8, u16, u32);
into_value_via!(Float: f32, f64);
into_value_via!(Bool: bool);
into_value_via!(Text: String);

impl IntoValue for &str {
    fn into_value(self) -> Value {
        Value::Text(self.to_string())
    }
}

impl IntoValue for char {
    fn into_value(self) -> Value {
        Value::Text(self.to_string())
    }
}

impl IntoValue for Vec<u8> {
    fn into_value(self) -> Value {
        Value::Bytes(self)
    }
}

impl IntoValue for DateTime<Utc> {
    fn into_value(self) -> Value {
        Value::Timestamp(self)
    }
}

impl IntoValue for NaiveDateTime {
    fn into_value(self) -> Value {
        Value::Timestamp(Utc.from_utc_datetime(&self))
    }
}

impl IntoValue for NaiveDate {
    fn into_value(self) -> Value {
        Value::Date(self)
    }
}

impl IntoValue for NaiveTime {
    fn into_value(self) -> Value {
        Value::Time(self)
    }
}

impl IntoValue for serde_json::Value {
    fn into_value(self) -> Value {
        Value::Json(self)
    }
}

impl IntoValue for Value {
    fn into_value(self) -> Value {
        self
    }
}

impl<T: IntoValue> IntoValue for Option<T> {
    fn into_value(self) -> Value {
        match self {
            Some(v) => v.into_value(),
            None => Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_roundtrip() {
        assert_eq!(Value::Int(3).kind(), ValueKind::Int);
        assert_eq!(Value::Null.kind(), ValueKind::Null);
        assert_eq!(Value::List(vec![]).kind(), ValueKind::List);
    }

    #[test]
    fn test_render_scalars() {
        assert_eq!(Value::Int(42).render(), "42");
        assert_eq!(Value::Null.render(), "NULL");
        assert_eq!(Value::Text("abc".into()).render(), "abc");
        assert_eq!(Value::Bytes(b"hi".to_vec()).render(), "aGk=");
    }

    #[test]
    fn test_render_params() {
        let rendered = render_params(&[Value::Int(1), Value::Text("x".into())]);
        assert_eq!(rendered, "1, x");
    }

    #[test]
    fn test_int_narrowing_range_check() {
        assert_eq!(i8::from_value(Value::Int(7)).unwrap(), 7);
        assert!(i8::from_value(Value::Int(1000)).is_err());
    }

    #[test]
    fn test_option_handles_null() {
        assert_eq!(Option::<i64>::from_value(Value::Null).unwrap(), None);
        assert_eq!(Option::<i64>::from_value(Value::Int(5)).unwrap(), Some(5));
    }

    #[test]
    fn test_char_from_text() {
        assert_eq!(char::from_value(Value::Text("abc".into())).unwrap(), 'a');
        assert!(char::from_value(Value::Text(String::new())).is_err());
    }

    #[test]
    fn test_epoch_millis_bridge() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        assert_eq!(
            epoch_millis(&Value::Timestamp(ts)),
            Some(ts.timestamp_millis())
        );
        assert_eq!(epoch_millis(&Value::Int(1234)), Some(1234));
        assert_eq!(epoch_millis(&Value::Float(1.5)), Some(1500));
        assert_eq!(epoch_millis(&Value::Bool(true)), None);
    }

    #[test]
    fn test_list_constructor() {
        let v = Value::list(vec![1i64, 2, 3]);
        assert_eq!(
            v,
            Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
        );
    }

    #[test]
    fn test_byte_vector_stays_bytes() {
        assert_eq!(b"hi".to_vec().into_value(), Value::Bytes(b"hi".to_vec()));
    }
}
