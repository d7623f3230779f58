use std::fmt::{Display, Formatter};

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, de};

use crate::table::Value;

const DATE_FORMATS: [&str; 7] = [
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%d.%m.%Y",
    "%d %b %Y",
    "%b %d, %Y",
    "%B %d, %Y",
];

const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastType {
    /// Strips everything but digits, `.` and `-` before parsing.
    Number,
    Int,
    Float,
    String,
    Date,
}

impl CastType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Number => "number",
            Self::Int => "int",
            Self::Float => "float",
            Self::String => "string",
            Self::Date => "date",
        }
    }
}

impl Display for CastType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CastType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "number" | "numeric" => Ok(Self::Number),
            "int" | "integer" | "int64" => Ok(Self::Int),
            "float" | "float64" | "double" => Ok(Self::Float),
            "string" | "str" | "text" => Ok(Self::String),
            "date" | "datetime" => Ok(Self::Date),
            other => Err(format!("unknown cast type '{other}'")),
        }
    }
}

impl<'de> Deserialize<'de> for CastType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// What a failed cell coercion does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CastErrors {
    Raise,
    Coerce,
    #[default]
    Ignore,
}

impl CastErrors {
    #[must_use]
    pub const fn tolerant(self) -> bool {
        !matches!(self, Self::Raise)
    }
}

/// Lenient numeric parse used by the `number` cast and the `number()`
/// expression function.
#[must_use]
pub fn parse_number(text: &str) -> Option<Value> {
    let cleaned = text
        .chars()
        .filter(|ch| ch.is_ascii_digit() || matches!(ch, '.' | '-'))
        .collect::<String>();
    if !cleaned.chars().any(|ch| ch.is_ascii_digit()) {
        return None;
    }

    if let Ok(value) = cleaned.parse::<i64>() {
        return Some(Value::Int(value));
    }
    cleaned
        .parse::<f64>()
        .ok()
        .filter(|number| number.is_finite())
        .map(Value::Float)
}

#[must_use]
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    let trimmed = text.trim();
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(trimmed, format).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|format| NaiveDateTime::parse_from_str(trimmed, format).ok())
                .map(|datetime| datetime.date())
        })
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn float_to_int(value: f64) -> Option<i64> {
    if value.fract() == 0.0 && value >= i64::MIN as f64 && value <= i64::MAX as f64 {
        Some(value as i64)
    } else {
        None
    }
}

/// Converts one cell. `None` means the value cannot be represented in the
/// target type; blank cells always become `Null` (or empty text for
/// `string`).
#[must_use]
pub fn cast_value(value: &Value, target: CastType) -> Option<Value> {
    if target == CastType::String {
        return Some(Value::Text(value.to_string()));
    }
    if value.is_blank() {
        return Some(Value::Null);
    }

    match (target, value) {
        (CastType::Number | CastType::Int | CastType::Float, Value::Bool(_) | Value::Date(_))
        | (CastType::Date, Value::Int(_) | Value::Float(_) | Value::Bool(_)) => None,
        (CastType::Number, Value::Int(_) | Value::Float(_))
        | (CastType::Int, Value::Int(_))
        | (CastType::Float, Value::Float(_))
        | (CastType::Date, Value::Date(_)) => Some(value.clone()),
        (CastType::Number, Value::Text(text)) => parse_number(text),
        (CastType::Int, Value::Float(number)) => float_to_int(*number).map(Value::Int),
        (CastType::Int, Value::Text(text)) => {
            let trimmed = text.trim();
            trimmed.parse::<i64>().ok().map(Value::Int).or_else(|| {
                trimmed
                    .parse::<f64>()
                    .ok()
                    .and_then(float_to_int)
                    .map(Value::Int)
            })
        }
        #[allow(clippy::cast_precision_loss)]
        (CastType::Float, Value::Int(number)) => Some(Value::Float(*number as f64)),
        (CastType::Float, Value::Text(text)) => text
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|number| number.is_finite())
            .map(Value::Float),
        (CastType::Date, Value::Text(text)) => parse_date(text).map(Value::Date),
        (_, Value::Null) | (CastType::String, _) => Some(Value::Null),
    }
}
