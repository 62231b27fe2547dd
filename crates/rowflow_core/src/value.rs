//! Typed values carried in rows.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::error::{CoreError, CoreResult};

/// Date layouts accepted by [`Value::parse`], tried in order after RFC 3339.
const DATE_FORMATS: &[&str] = &["%Y/%m/%d %H:%M:%S%.3f", "%Y/%m/%d %H:%M:%S", "%Y-%m-%d %H:%M:%S"];

/// Declared type of a schema field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    /// Untyped; only ever holds nulls
    None,
    /// UTF-8 text
    String,
    /// 64-bit signed integer
    Integer,
    /// 64-bit float
    Number,
    /// Boolean
    Boolean,
    /// UTC timestamp
    Date,
}

/// A single value in a row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Missing value; valid for every field type
    Null,
    /// Text value
    String(String),
    /// Integer value
    Integer(i64),
    /// Floating point value
    Number(f64),
    /// Boolean value
    Boolean(bool),
    /// Timestamp value
    Date(DateTime<Utc>),
}

impl Value {
    /// Convert configuration text into a value of the given type.
    ///
    /// Empty text yields [`Value::Null`] for every type.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Conversion`] if the text does not parse.
    pub fn parse(value_type: ValueType, text: &str) -> CoreResult<Self> {
        if text.is_empty() {
            return Ok(Self::Null);
        }
        let fail = || CoreError::Conversion {
            text: text.to_string(),
            target: value_type,
        };
        let trimmed = text.trim();
        match value_type {
            ValueType::None => Err(fail()),
            ValueType::String => Ok(Self::String(text.to_string())),
            ValueType::Integer => trimmed.parse().map(Self::Integer).map_err(|_| fail()),
            ValueType::Number => trimmed.parse().map(Self::Number).map_err(|_| fail()),
            ValueType::Boolean => match trimmed.to_ascii_lowercase().as_str() {
                "y" | "yes" | "true" | "1" => Ok(Self::Boolean(true)),
                "n" | "no" | "false" | "0" => Ok(Self::Boolean(false)),
                _ => Err(fail()),
            },
            ValueType::Date => parse_date(trimmed).map(Self::Date).ok_or_else(fail),
        }
    }

    /// Type of this value, `None` for nulls
    #[must_use]
    pub const fn value_type(&self) -> ValueType {
        match self {
            Self::Null => ValueType::None,
            Self::String(_) => ValueType::String,
            Self::Integer(_) => ValueType::Integer,
            Self::Number(_) => ValueType::Number,
            Self::Boolean(_) => ValueType::Boolean,
            Self::Date(_) => ValueType::Date,
        }
    }

    /// Check for null
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Integer content, if any
    #[must_use]
    pub const fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric content as a float (integers widen)
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Integer(v) => Some(*v as f64),
            Self::Number(v) => Some(*v),
            _ => None,
        }
    }

    /// Text content, if any
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    /// Total order used for key comparisons.
    ///
    /// Nulls sort first. Integers and numbers compare numerically; values of
    /// otherwise unrelated types compare by type.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Null, Self::Null) => Ordering::Equal,
            (Self::Null, _) => Ordering::Less,
            (_, Self::Null) => Ordering::Greater,
            (Self::Integer(a), Self::Integer(b)) => a.cmp(b),
            (Self::Integer(a), Self::Number(b)) => (*a as f64).total_cmp(b),
            (Self::Number(a), Self::Integer(b)) => a.total_cmp(&(*b as f64)),
            (Self::Number(a), Self::Number(b)) => a.total_cmp(b),
            (Self::String(a), Self::String(b)) => a.cmp(b),
            (Self::Boolean(a), Self::Boolean(b)) => a.cmp(b),
            (Self::Date(a), Self::Date(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }

    const fn rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Boolean(_) => 1,
            Self::Integer(_) | Self::Number(_) => 2,
            Self::String(_) => 3,
            Self::Date(_) => 4,
        }
    }
}

fn parse_date(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in DATE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt.and_utc());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .or_else(|| NaiveDate::parse_from_str(text, "%Y/%m/%d").ok())
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::String(v) => write!(f, "{}", v),
            Self::Integer(v) => write!(f, "{}", v),
            Self::Number(v) => write!(f, "{}", v),
            Self::Boolean(v) => write!(f, "{}", if *v { "Y" } else { "N" }),
            Self::Date(v) => write!(f, "{}", v.format("%Y/%m/%d %H:%M:%S%.3f")),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}
