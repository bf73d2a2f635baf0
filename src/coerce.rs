//! Type coercion registry.
//!
//! A two-level map, keyed by target kind then source kind, of converter functions
//! over [`Value`]s. The registry is pre-populated with the numeric, boolean,
//! textual, binary and temporal conversions the engine needs for parameter
//! binding and result materialization; callers may register custom
//! conversions, which overwrite existing entries.
//!
//! Temporal conversions all route through a shared epoch-millisecond
//! intermediate, so every member of the family converts to every other
//! member consistently.

use crate::error::{OrmError, OrmResult};
use crate::value::{FromValue, Value, ValueKind, epoch_millis, timestamp_from_millis};
use chrono::NaiveTime;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

type Converter = Arc<dyn Fn(&Value) -> OrmResult<Value> + Send + Sync>;

pub struct CoercionRegistry {
    converters: RwLock<HashMap<ValueKind, HashMap<ValueKind, Converter>>>,
}

impl CoercionRegistry {
    pub fn new() -> Self {
        let registry = Self {
            converters: RwLock::new(HashMap::new()),
        };
        registry.install_defaults();
        registry
    }

    /// Convert `value` to the target kind.
    ///
    /// Null passes through untouched; a value already of the target kind is
    /// returned unchanged; otherwise the registered converter for the
    /// value's exact kind is applied. Text targets fall back to the generic
    /// textual rendering when no converter is registered.
    pub fn cast_to(&self, target: ValueKind, value: Value) -> OrmResult<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        let source = value.kind();
        if source == target {
            return Ok(value);
        }
        let converter = {
            let map = self.converters.read().expect("coercion registry poisoned");
            map.get(&target).and_then(|m| m.get(&source)).cloned()
        };
        match converter {
            Some(conv) => conv(&value),
            None if target == ValueKind::Text => Ok(Value::Text(value.render())),
            None => Err(OrmError::conversion(source.name(), target.name())),
        }
    }

    /// Cast and extract in one step: coerce to `T`'s kind, then pull the
    /// typed value out.
    pub fn cast_into<T: FromValue>(&self, value: Value) -> OrmResult<T> {
        T::from_value(self.cast_to(T::KIND, value)?)
    }

    /// Register a conversion from `source` to `target`. An existing entry
    /// for the pair is overwritten.
    pub fn register<F>(&self, source: ValueKind, target: ValueKind, converter: F)
    where
        F: Fn(&Value) -> OrmResult<Value> + Send + Sync + 'static,
    {
        let mut map = self.converters.write().expect("coercion registry poisoned");
        map.entry(target)
            .or_default()
            .insert(source, Arc::new(converter));
    }

    fn install_defaults(&self) {
        use ValueKind::*;

        // Numeric family
        self.register(Float, Int, |v| match v {
            Value::Float(f) => Ok(Value::Int(*f as i64)),
            _ => unreachable_source(v, Int),
        });
        self.register(Decimal, Int, |v| match v {
            Value::Decimal(s) => parse_decimal(s).map(|f| Value::Int(f as i64)),
            _ => unreachable_source(v, Int),
        });
        self.register(Text, Int, |v| match v {
            Value::Text(s) => s
                .trim()
                .parse::<i64>()
                .or_else(|_| parse_decimal(s).map(|f| f as i64))
                .map(Value::Int)
                .map_err(|_| OrmError::conversion_with("Text", "Int", s.clone())),
            _ => unreachable_source(v, Int),
        });
        self.register(Bool, Int, |v| match v {
            Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
            _ => unreachable_source(v, Int),
        });

        self.register(Int, Float, |v| match v {
            Value::Int(i) => Ok(Value::Float(*i as f64)),
            _ => unreachable_source(v, Float),
        });
        self.register(Decimal, Float, |v| match v {
            Value::Decimal(s) => parse_decimal(s).map(Value::Float),
            _ => unreachable_source(v, Float),
        });
        self.register(Text, Float, |v| match v {
            Value::Text(s) => parse_decimal(s).map(Value::Float),
            _ => unreachable_source(v, Float),
        });
        self.register(Bool, Float, |v| match v {
            Value::Bool(b) => Ok(Value::Float(if *b { 1.0 } else { 0.0 })),
            _ => unreachable_source(v, Float),
        });

        self.register(Int, Decimal, |v| Ok(Value::Decimal(v.render())));
        self.register(Float, Decimal, |v| Ok(Value::Decimal(v.render())));
        self.register(Bool, Decimal, |v| match v {
            Value::Bool(b) => Ok(Value::Decimal(if *b { "1" } else { "0" }.to_string())),
            _ => unreachable_source(v, Decimal),
        });
        self.register(Text, Decimal, |v| match v {
            Value::Text(s) => {
                parse_decimal(s)?;
                Ok(Value::Decimal(s.trim().to_string()))
            }
            _ => unreachable_source(v, Decimal),
        });

        // Boolean
        self.register(Int, Bool, |v| match v {
            Value::Int(i) => Ok(Value::Bool(*i != 0)),
            _ => unreachable_source(v, Bool),
        });
        self.register(Float, Bool, |v| match v {
            Value::Float(f) => Ok(Value::Bool(f.abs() > 1e-10)),
            _ => unreachable_source(v, Bool),
        });
        self.register(Decimal, Bool, |v| match v {
            Value::Decimal(s) => parse_decimal(s).map(|f| Value::Bool(f.abs() > 1e-10)),
            _ => unreachable_source(v, Bool),
        });
        self.register(Text, Bool, |v| match v {
            Value::Text(s) => Ok(Value::Bool(s.trim().eq_ignore_ascii_case("true"))),
            _ => unreachable_source(v, Bool),
        });

        // Text and bytes
        self.register(Bytes, Text, |v| match v {
            Value::Bytes(b) => Ok(Value::Text(String::from_utf8_lossy(b).into_owned())),
            _ => unreachable_source(v, Text),
        });
        self.register(Text, Bytes, |v| match v {
            Value::Text(s) => Ok(Value::Bytes(s.clone().into_bytes())),
            _ => unreachable_source(v, Bytes),
        });
        self.register(Text, Json, |v| match v {
            Value::Text(s) => serde_json::from_str(s)
                .map(Value::Json)
                .map_err(|e| OrmError::conversion_with("Text", "Json", e.to_string())),
            _ => unreachable_source(v, Json),
        });

        // Temporal family, every pair routed through epoch milliseconds
        for source in [Int, Float, Decimal, Text, Date, Time] {
            self.register(source, Timestamp, |v| {
                millis_of(v).and_then(|m| timestamp_from_millis(m).map(Value::Timestamp))
            });
        }
        for source in [Int, Float, Decimal, Text, Timestamp, Time] {
            self.register(source, Date, |v| {
                millis_of(v).and_then(|m| timestamp_from_millis(m).map(|t| Value::Date(t.date_naive())))
            });
        }
        for source in [Int, Float, Decimal, Timestamp, Date] {
            self.register(source, Time, |v| {
                millis_of(v).and_then(|m| timestamp_from_millis(m).map(|t| Value::Time(t.time())))
            });
        }
        // Clock text like "13:45:00" is more useful than an epoch for times
        self.register(Text, Time, |v| match v {
            Value::Text(s) => s
                .parse::<NaiveTime>()
                .map(Value::Time)
                .map_err(|e| OrmError::conversion_with("Text", "Time", e.to_string())),
            _ => unreachable_source(v, Time),
        });
        for target in [Int, Decimal] {
            self.register(Timestamp, target, move |v| {
                let m = millis_of(v)?;
                Ok(match target {
                    Int => Value::Int(m),
                    _ => Value::Decimal(m.to_string()),
                })
            });
            self.register(Date, target, move |v| {
                let m = millis_of(v)?;
                Ok(match target {
                    Int => Value::Int(m),
                    _ => Value::Decimal(m.to_string()),
                })
            });
        }
        // Fractional-second rendering for float targets
        self.register(Timestamp, Float, |v| {
            millis_of(v).map(|m| Value::Float(m as f64 / 1000.0))
        });
        self.register(Date, Float, |v| {
            millis_of(v).map(|m| Value::Float(m as f64 / 1000.0))
        });
    }
}

impl Default for CoercionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn millis_of(value: &Value) -> OrmResult<i64> {
    epoch_millis(value)
        .ok_or_else(|| OrmError::conversion(value.kind().name(), "Timestamp"))
}

fn parse_decimal(s: &str) -> OrmResult<f64> {
    s.trim()
        .parse::<f64>()
        .map_err(|_| OrmError::conversion_with("Text", "Decimal", s.to_string()))
}

fn unreachable_source<T>(value: &Value, target: ValueKind) -> OrmResult<T> {
    // Converters are keyed by exact source kind, so a mismatched variant
    // means the registry was tampered with.
    Err(OrmError::conversion(value.kind().name(), target.name()))
}
