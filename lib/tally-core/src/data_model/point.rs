use std::fmt;

use serde::{ser::Error as _, Deserialize, Serialize, Serializer};

use super::TagSet;

/// A metric value.
///
/// Serializes as a bare JSON number. When deserializing, integers that fit in an `i64` become [`Value::Integer`] and
/// every other number becomes [`Value::Float`].
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// A signed integer.
    Integer(i64),

    /// A floating-point number.
    Float(f64),
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match *self {
            Self::Integer(value) => serializer.serialize_i64(value),
            Self::Float(value) if value.is_finite() => serializer.serialize_f64(value),
            Self::Float(value) => Err(S::Error::custom(format!(
                "non-finite value '{}' cannot be represented in JSON",
                value
            ))),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(value) => write!(f, "{}", value),
            Self::Float(value) => write!(f, "{}", value),
        }
    }
}

macro_rules! impl_from_integer {
    ($($ty:ty),+) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Self::Integer(i64::from(value))
                }
            }
        )+
    };
}

impl_from_integer!(i8, i16, i32, i64, u8, u16, u32);

// Unsigned values past `i64::MAX` saturate rather than wrap.
impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Self::Integer(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Self::Integer(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Self::Float(f64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

/// A single measurement, ready to be shipped.
///
/// Serializes to the OpenTSDB `/api/put` shape:
///
/// ```json
/// {"metric":"cpu.idle","timestamp":1700000000,"value":42,"tags":{"host":"web01"}}
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    metric: String,
    timestamp: i64,
    value: Value,
    tags: TagSet,
}

impl DataPoint {
    /// Creates a new `DataPoint`.
    ///
    /// `timestamp` is in seconds since the Unix epoch.
    pub fn new<M, V>(metric: M, timestamp: i64, value: V, tags: TagSet) -> Self
    where
        M: Into<String>,
        V: Into<Value>,
    {
        Self {
            metric: metric.into(),
            timestamp,
            value: value.into(),
            tags,
        }
    }

    /// Returns the metric name.
    pub fn metric(&self) -> &str {
        &self.metric
    }

    /// Returns the timestamp, in seconds since the Unix epoch.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Returns the value.
    pub fn value(&self) -> Value {
        self.value
    }

    /// Returns the tags.
    pub fn tags(&self) -> &TagSet {
        &self.tags
    }
}
