//! Semantic field kinds and the scan contract derived from them.
//!
//! `FieldKind` is a closed enum; every per-kind decision (zero value, scan
//! target, accepted values, identifier parsing, SQL type name) is an
//! exhaustive `match` so adding a kind forces every site to be revisited.

use serde::Serialize;

use crate::dialect::Dialect;
use crate::value::{Value, parse_uuid};

/// The semantic type of a field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum FieldKind {
    String,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Float32,
    Float64,
    Bool,
    Time,
    Enum,
    Uuid,
    Bytes,
    Json,
    /// A custom type stored with the given SQL type name.
    Other(String),
}

/// The nullable scan target a driver fills for one column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanTarget {
    NullString,
    NullInt64,
    NullFloat64,
    NullBool,
    NullTime,
    Bytes,
    Custom(CustomScanner),
}

/// Conversion used by `ScanTarget::Custom`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustomScanner {
    Uuid,
    Json,
    Passthrough,
}

impl FieldKind {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            FieldKind::String => "string",
            FieldKind::Int8 => "int8",
            FieldKind::Int16 => "int16",
            FieldKind::Int32 => "int32",
            FieldKind::Int64 => "int64",
            FieldKind::Uint8 => "uint8",
            FieldKind::Uint16 => "uint16",
            FieldKind::Uint32 => "uint32",
            FieldKind::Uint64 => "uint64",
            FieldKind::Float32 => "float32",
            FieldKind::Float64 => "float64",
            FieldKind::Bool => "bool",
            FieldKind::Time => "time",
            FieldKind::Enum => "enum",
            FieldKind::Uuid => "uuid",
            FieldKind::Bytes => "bytes",
            FieldKind::Json => "json",
            FieldKind::Other(name) => name,
        }
    }

    /// True for the signed and unsigned integer families.
    #[must_use]
    pub const fn is_integer(&self) -> bool {
        matches!(
            self,
            FieldKind::Int8
                | FieldKind::Int16
                | FieldKind::Int32
                | FieldKind::Int64
                | FieldKind::Uint8
                | FieldKind::Uint16
                | FieldKind::Uint32
                | FieldKind::Uint64
        )
    }

    /// True for kinds that support numeric `add` updates.
    #[must_use]
    pub const fn is_numeric(&self) -> bool {
        self.is_integer() || matches!(self, FieldKind::Float32 | FieldKind::Float64)
    }

    /// The declared zero value, assigned to non-nillable fields read as NULL.
    #[must_use]
    pub fn zero_value(&self) -> Value {
        match self {
            FieldKind::String | FieldKind::Enum => Value::Text(String::new()),
            FieldKind::Int8
            | FieldKind::Int16
            | FieldKind::Int32
            | FieldKind::Int64
            | FieldKind::Uint8
            | FieldKind::Uint16
            | FieldKind::Uint32
            | FieldKind::Uint64 => Value::Int(0),
            FieldKind::Float32 | FieldKind::Float64 => Value::Float(0.0),
            FieldKind::Bool => Value::Bool(false),
            FieldKind::Time => Value::Timestamp(0),
            FieldKind::Uuid => Value::Uuid([0; 16]),
            FieldKind::Bytes => Value::Bytes(Vec::new()),
            FieldKind::Json | FieldKind::Other(_) => Value::Null,
        }
    }

    #[must_use]
    pub fn scan_target(&self) -> ScanTarget {
        match self {
            FieldKind::String | FieldKind::Enum => ScanTarget::NullString,
            FieldKind::Int8
            | FieldKind::Int16
            | FieldKind::Int32
            | FieldKind::Int64
            | FieldKind::Uint8
            | FieldKind::Uint16
            | FieldKind::Uint32
            | FieldKind::Uint64 => ScanTarget::NullInt64,
            FieldKind::Float32 | FieldKind::Float64 => ScanTarget::NullFloat64,
            FieldKind::Bool => ScanTarget::NullBool,
            FieldKind::Time => ScanTarget::NullTime,
            FieldKind::Bytes => ScanTarget::Bytes,
            FieldKind::Uuid => ScanTarget::Custom(CustomScanner::Uuid),
            FieldKind::Json => ScanTarget::Custom(CustomScanner::Json),
            FieldKind::Other(_) => ScanTarget::Custom(CustomScanner::Passthrough),
        }
    }

    /// Check that `value` is storable in a field of this kind.
    ///
    /// NULL is accepted here; nullability is the field's concern.
    pub fn accepts(&self, value: &Value) -> Result<(), String> {
        let ok = match (self, value) {
            (_, Value::Null) => true,
            (FieldKind::String | FieldKind::Enum, Value::Text(_)) => true,
            (FieldKind::Int8, Value::Int(v)) => i8::try_from(*v).is_ok(),
            (FieldKind::Int16, Value::Int(v)) => i16::try_from(*v).is_ok(),
            (FieldKind::Int32, Value::Int(v)) => i32::try_from(*v).is_ok(),
            (FieldKind::Int64, Value::Int(_)) => true,
            (FieldKind::Uint8, Value::Int(v)) => u8::try_from(*v).is_ok(),
            (FieldKind::Uint16, Value::Int(v)) => u16::try_from(*v).is_ok(),
            (FieldKind::Uint32, Value::Int(v)) => u32::try_from(*v).is_ok(),
            (FieldKind::Uint64, Value::Int(v)) => *v >= 0,
            (FieldKind::Float32 | FieldKind::Float64, Value::Float(_) | Value::Int(_)) => true,
            (FieldKind::Bool, Value::Bool(_)) => true,
            (FieldKind::Time, Value::Timestamp(_)) => true,
            (FieldKind::Uuid, Value::Uuid(_)) => true,
            (FieldKind::Bytes, Value::Bytes(_)) => true,
            (FieldKind::Json, Value::Json(_)) => true,
            (FieldKind::Other(_), _) => true,
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(format!(
                "value {} ({}) is not a valid {}",
                value,
                value.type_name(),
                self.name()
            ))
        }
    }

    /// Parse the local part of an opaque identifier into a value of this kind.
    #[must_use]
    pub fn parse_id(&self, raw: &str) -> Option<Value> {
        match self {
            FieldKind::String | FieldKind::Enum => Some(Value::Text(raw.to_string())),
            FieldKind::Int8
            | FieldKind::Int16
            | FieldKind::Int32
            | FieldKind::Int64
            | FieldKind::Uint8
            | FieldKind::Uint16
            | FieldKind::Uint32
            | FieldKind::Uint64 => raw.parse::<i64>().ok().map(Value::Int),
            FieldKind::Float32 | FieldKind::Float64 => raw.parse::<f64>().ok().map(Value::Float),
            FieldKind::Bool => raw.parse::<bool>().ok().map(Value::Bool),
            FieldKind::Time => raw.parse::<i64>().ok().map(Value::Timestamp),
            FieldKind::Uuid => parse_uuid(raw).map(Value::Uuid),
            FieldKind::Bytes => Some(Value::Bytes(raw.as_bytes().to_vec())),
            FieldKind::Json => serde_json::from_str(raw).ok().map(Value::Json),
            FieldKind::Other(_) => Some(Value::Text(raw.to_string())),
        }
    }

    /// Column type used in DDL.
    #[must_use]
    pub fn sql_type(&self, dialect: Dialect) -> String {
        let name = match (self, dialect) {
            (FieldKind::Other(name), _) => return name.clone(),
            (FieldKind::String | FieldKind::Enum, Dialect::Mysql) => "varchar(255)",
            (FieldKind::String | FieldKind::Enum, _) => "text",
            (FieldKind::Int8 | FieldKind::Uint8, Dialect::Mysql) => "tinyint",
            (FieldKind::Int8 | FieldKind::Int16 | FieldKind::Uint8, _) => "smallint",
            (FieldKind::Uint16, Dialect::Mysql) => "smallint",
            (FieldKind::Uint16 | FieldKind::Int32, _) => "integer",
            (FieldKind::Uint32 | FieldKind::Int64 | FieldKind::Uint64, _) => "bigint",
            (FieldKind::Float32, Dialect::Postgres) => "real",
            (FieldKind::Float32 | FieldKind::Float64, Dialect::Sqlite) => "real",
            (FieldKind::Float32, Dialect::Mysql) => "float",
            (FieldKind::Float64, _) => "double precision",
            (FieldKind::Bool, Dialect::Mysql) => "tinyint(1)",
            (FieldKind::Bool, _) => "boolean",
            (FieldKind::Time, Dialect::Postgres) => "timestamp with time zone",
            (FieldKind::Time, _) => "datetime",
            (FieldKind::Uuid, Dialect::Postgres) => "uuid",
            (FieldKind::Uuid, Dialect::Mysql) => "char(36)",
            (FieldKind::Uuid, Dialect::Sqlite) => "uuid",
            (FieldKind::Bytes, Dialect::Postgres) => "bytea",
            (FieldKind::Bytes, _) => "blob",
            (FieldKind::Json, Dialect::Postgres) => "jsonb",
            (FieldKind::Json, _) => "json",
        };
        name.to_string()
    }
}

impl ScanTarget {
    /// Convert a raw driver value through this target.
    ///
    /// `Ok(None)` means the column was NULL (the nullable wrapper is not
    /// valid); `Err` means the raw value cannot be represented.
    pub fn scan(self, raw: &Value) -> Result<Option<Value>, String> {
        if raw.is_null() {
            return Ok(None);
        }
        let converted = match (self, raw) {
            (ScanTarget::NullString, Value::Text(_)) => Some(raw.clone()),
            (ScanTarget::NullString, Value::Bytes(b)) => {
                String::from_utf8(b.clone()).ok().map(Value::Text)
            }
            (ScanTarget::NullInt64, Value::Int(_)) => Some(raw.clone()),
            (ScanTarget::NullInt64, Value::Bool(b)) => Some(Value::Int(i64::from(*b))),
            (ScanTarget::NullFloat64, Value::Float(_)) => Some(raw.clone()),
            (ScanTarget::NullFloat64, Value::Int(v)) => Some(Value::Float(*v as f64)),
            (ScanTarget::NullBool, _) => raw.as_bool().map(Value::Bool),
            (ScanTarget::NullTime, Value::Timestamp(_)) => Some(raw.clone()),
            (ScanTarget::NullTime, Value::Int(v)) => Some(Value::Timestamp(*v)),
            (ScanTarget::Bytes, _) => raw.as_bytes().map(|b| Value::Bytes(b.to_vec())),
            (ScanTarget::Custom(CustomScanner::Uuid), Value::Uuid(_)) => Some(raw.clone()),
            (ScanTarget::Custom(CustomScanner::Uuid), Value::Text(s)) => {
                parse_uuid(s).map(Value::Uuid)
            }
            (ScanTarget::Custom(CustomScanner::Uuid), Value::Bytes(b)) => {
                <[u8; 16]>::try_from(b.as_slice()).ok().map(Value::Uuid)
            }
            (ScanTarget::Custom(CustomScanner::Json), Value::Json(_)) => Some(raw.clone()),
            (ScanTarget::Custom(CustomScanner::Json), Value::Text(s)) => {
                serde_json::from_str(s).ok().map(Value::Json)
            }
            (ScanTarget::Custom(CustomScanner::Passthrough), _) => Some(raw.clone()),
            _ => None,
        };
        match converted {
            Some(value) => Ok(Some(value)),
            None => Err(format!(
                "cannot scan {} into {:?}",
                raw.type_name(),
                self
            )),
        }
    }
}
