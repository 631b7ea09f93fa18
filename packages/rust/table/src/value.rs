//! Scalar view of single cells.

use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray,
};
use arrow::datatypes::DataType;
use arrow::util::display::array_value_to_string;

/// One cell, read out of an Arrow column.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Value {
    /// `Null`, or a float that is NaN.
    pub fn is_null(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Float(v) => v.is_nan(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Cell `row` of `array`. Types without a scalar variant are rendered as text.
    pub fn from_array(array: &dyn Array, row: usize) -> Self {
        if row >= array.len() || array.is_null(row) {
            return Self::Null;
        }
        match array.data_type() {
            DataType::Boolean => array
                .as_any()
                .downcast_ref::<BooleanArray>()
                .map_or(Self::Null, |arr| Self::Bool(arr.value(row))),
            DataType::Int64 => array
                .as_any()
                .downcast_ref::<Int64Array>()
                .map_or(Self::Null, |arr| Self::Int(arr.value(row))),
            DataType::Float64 => array
                .as_any()
                .downcast_ref::<Float64Array>()
                .map(|arr| arr.value(row))
                .filter(|v| !v.is_nan())
                .map_or(Self::Null, Self::Float),
            DataType::Utf8 => array
                .as_any()
                .downcast_ref::<StringArray>()
                .map_or(Self::Null, |arr| Self::Str(arr.value(row).to_string())),
            _ => array_value_to_string(array, row).map_or(Self::Null, Self::Str),
        }
    }

    fn text(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Bool(v) => Some(v.to_string()),
            Self::Int(v) => Some(v.to_string()),
            Self::Float(v) if v.is_nan() => None,
            Self::Float(v) => Some(v.to_string()),
            Self::Str(s) => Some(s.clone()),
        }
    }
}

/// Build one column from cells.
///
/// The narrowest of boolean, integer, float (integers widen) and text that
/// holds every non-null cell wins; an all-null column is text.
pub(crate) fn values_to_array(values: &[Value]) -> ArrayRef {
    let present = || values.iter().filter(|v| !v.is_null());
    if present().next().is_some() && present().all(|v| matches!(v, Value::Bool(_))) {
        Arc::new(
            values
                .iter()
                .map(|v| match v {
                    Value::Bool(b) => Some(*b),
                    _ => None,
                })
                .collect::<BooleanArray>(),
        )
    } else if present().next().is_some() && present().all(|v| matches!(v, Value::Int(_))) {
        Arc::new(
            values
                .iter()
                .map(|v| match v {
                    Value::Int(i) => Some(*i),
                    _ => None,
                })
                .collect::<Int64Array>(),
        )
    } else if present().next().is_some()
        && present().all(|v| matches!(v, Value::Int(_) | Value::Float(_)))
    {
        Arc::new(
            values
                .iter()
                .map(|v| match v {
                    Value::Int(i) => Some(*i as f64),
                    Value::Float(f) if !f.is_nan() => Some(*f),
                    _ => None,
                })
                .collect::<Float64Array>(),
        )
    } else {
        Arc::new(values.iter().map(Value::text).collect::<StringArray>())
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}
