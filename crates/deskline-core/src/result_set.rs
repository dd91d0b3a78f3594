//! Forward-only cursor over a query result with typed field access

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::{ColumnMeta, DesklineError, QueryResult, Result, Row, Value};

/// Conversion from a fetched [`Value`] into a Rust type.
///
/// Returns `None` when the value cannot be represented as `Self`; the cursor
/// turns that into a [`DesklineError::Conversion`] naming the column.
pub trait FromValue: Sized {
    /// Name used in conversion error messages
    const TYPE_NAME: &'static str;

    fn from_value(value: &Value) -> Option<Self>;
}

macro_rules! impl_from_value_int {
    ($($ty:ty),* $(,)?) => {
        $(
            impl FromValue for $ty {
                const TYPE_NAME: &'static str = stringify!($ty);

                fn from_value(value: &Value) -> Option<Self> {
                    match value {
                        Value::UInt64(v) => <$ty>::try_from(*v).ok(),
                        Value::String(s) | Value::Decimal(s) => s.trim().parse::<$ty>().ok(),
                        Value::Float32(_) | Value::Float64(_) | Value::Null => None,
                        other => other.as_i64().and_then(|v| <$ty>::try_from(v).ok()),
                    }
                }
            }
        )*
    };
}

impl_from_value_int!(i8, i16, i32, i64, u8, u16, u32, u64);

impl FromValue for bool {
    const TYPE_NAME: &'static str = "bool";

    fn from_value(value: &Value) -> Option<Self> {
        value.as_bool()
    }
}

impl FromValue for f64 {
    const TYPE_NAME: &'static str = "f64";

    fn from_value(value: &Value) -> Option<Self> {
        value.as_f64()
    }
}

impl FromValue for f32 {
    const TYPE_NAME: &'static str = "f32";

    fn from_value(value: &Value) -> Option<Self> {
        value.as_f64().map(|v| v as f32)
    }
}

impl FromValue for String {
    const TYPE_NAME: &'static str = "string";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bytes(b) => String::from_utf8(b.clone()).ok(),
            other => Some(other.to_string()),
        }
    }
}

impl FromValue for Vec<u8> {
    const TYPE_NAME: &'static str = "bytes";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bytes(b) => Some(b.clone()),
            Value::String(s) => Some(s.as_bytes().to_vec()),
            _ => None,
        }
    }
}

impl FromValue for NaiveDateTime {
    const TYPE_NAME: &'static str = "timestamp";

    fn from_value(value: &Value) -> Option<Self> {
        value.as_datetime()
    }
}

impl FromValue for DateTime<Utc> {
    const TYPE_NAME: &'static str = "timestamp_utc";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::DateTimeUtc(v) => Some(*v),
            other => other.as_datetime().map(|dt| dt.and_utc()),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    const TYPE_NAME: &'static str = T::TYPE_NAME;

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(None),
            other => T::from_value(other).map(Some),
        }
    }
}

/// Forward-only cursor over the rows of a SELECT.
///
/// The cursor starts before the first row; call [`ResultSet::next`] to
/// advance. Field accessors fail when the cursor is not positioned on a row,
/// when the column does not exist, or when the stored value cannot be
/// converted to the requested type.
#[derive(Debug)]
pub struct ResultSet {
    columns: Vec<ColumnMeta>,
    rows: std::vec::IntoIter<Row>,
    current: Option<Row>,
    total: usize,
    fetched: usize,
}

impl ResultSet {
    pub fn new(result: QueryResult) -> Self {
        let total = result.rows.len();
        Self {
            columns: result.columns,
            rows: result.rows.into_iter(),
            current: None,
            total,
            fetched: 0,
        }
    }

    /// Advance to the next row. Returns `false` once the rows are exhausted.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> bool {
        self.current = self.rows.next();
        if self.current.is_some() {
            self.fetched += 1;
        }
        self.current.is_some()
    }

    pub fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    /// Total number of rows returned by the statement
    pub fn row_count(&self) -> usize {
        self.total
    }

    /// Number of rows consumed so far
    pub fn position(&self) -> usize {
        self.fetched
    }

    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| DesklineError::Query(format!("Unknown column '{}'", name)))
    }

    /// Raw value of a column in the current row
    pub fn value(&self, index: usize) -> Result<&Value> {
        let row = self
            .current
            .as_ref()
            .ok_or_else(|| DesklineError::Query("Cursor is not positioned on a row".into()))?;
        row.get(index).ok_or_else(|| {
            DesklineError::Query(format!(
                "Column index {} out of range ({} columns)",
                index,
                row.values.len()
            ))
        })
    }

    pub fn is_null(&self, index: usize) -> Result<bool> {
        self.value(index).map(Value::is_null)
    }

    /// Typed access to a column of the current row.
    ///
    /// NULL only converts into `Option<T>`; asking for a plain `T` on a NULL
    /// field is a conversion error.
    pub fn get<T: FromValue>(&self, index: usize) -> Result<T> {
        let value = self.value(index)?;
        T::from_value(value).ok_or_else(|| DesklineError::Conversion {
            column: self.column_label(index),
            expected: T::TYPE_NAME,
            found: value.type_name().to_string(),
        })
    }

    pub fn get_by_name<T: FromValue>(&self, name: &str) -> Result<T> {
        let index = self.column_index(name)?;
        self.get(index)
    }

    pub fn get_bool(&self, index: usize) -> Result<bool> {
        self.get(index)
    }

    pub fn get_i32(&self, index: usize) -> Result<i32> {
        self.get(index)
    }

    pub fn get_i64(&self, index: usize) -> Result<i64> {
        self.get(index)
    }

    pub fn get_u32(&self, index: usize) -> Result<u32> {
        self.get(index)
    }

    pub fn get_u64(&self, index: usize) -> Result<u64> {
        self.get(index)
    }

    pub fn get_f64(&self, index: usize) -> Result<f64> {
        self.get(index)
    }

    pub fn get_string(&self, index: usize) -> Result<String> {
        self.get(index)
    }

    pub fn get_bytes(&self, index: usize) -> Result<Vec<u8>> {
        self.get(index)
    }

    pub fn get_timestamp(&self, index: usize) -> Result<NaiveDateTime> {
        self.get(index)
    }

    fn column_label(&self, index: usize) -> String {
        self.columns
            .get(index)
            .map(|c| c.name.clone())
            .unwrap_or_else(|| format!("#{}", index))
    }
}
