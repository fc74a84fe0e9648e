use std::cmp::Ordering;
use std::fmt;

/// Declared column types. `Empty` is the sentinel used for absent range
/// endpoints and untyped plan slots; it never appears in a stored row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SqlType {
    Int32,
    Int64,
    Float64,
    Char,
    Varchar,
    Empty,
}

impl SqlType {
    /// True for `Int32`/`Int64`.
    pub fn is_integer(&self) -> bool {
        matches!(self, SqlType::Int32 | SqlType::Int64)
    }

    /// True for `Char`/`Varchar`.
    pub fn is_string(&self) -> bool {
        matches!(self, SqlType::Char | SqlType::Varchar)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, SqlType::Int32 | SqlType::Int64 | SqlType::Float64)
    }
}

/// Runtime value. Both integer widths are carried as `i64`; the declared
/// `SqlType` decides how a value is rendered and key-encoded.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
    Null,
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Predicate truthiness: non-zero numerics are true, everything else
    /// (including `Null`) is false.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Int(v) => *v != 0,
            Value::Float(v) => *v != 0.0,
            Value::Str(_) | Value::Null => false,
        }
    }

    /// Compare two values of the same runtime kind. `Int` and `Float` compare
    /// numerically against each other; strings only against strings. `None`
    /// for `Null` operands and kind mismatches.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Serialize into a byte string whose lexicographic order matches the
    /// value order, so the B+-tree can compare keys bytewise:
    /// integers flip the sign bit and go big-endian, floats use the usual
    /// total-order bit trick, strings are their raw bytes.
    pub fn encode_key(&self) -> Vec<u8> {
        match self {
            Value::Int(v) => ((*v as u64) ^ (1u64 << 63)).to_be_bytes().to_vec(),
            Value::Float(v) => {
                let bits = v.to_bits();
                let ordered = if bits & (1u64 << 63) != 0 {
                    !bits
                } else {
                    bits | (1u64 << 63)
                };
                ordered.to_be_bytes().to_vec()
            }
            Value::Str(s) => s.as_bytes().to_vec(),
            Value::Null => Vec::new(),
        }
    }

    /// Inverse of [`encode_key`](Self::encode_key) under a declared type.
    pub fn decode_key(ty: SqlType, bytes: &[u8]) -> Option<Value> {
        match ty {
            SqlType::Int32 | SqlType::Int64 => {
                let raw: [u8; 8] = bytes.try_into().ok()?;
                Some(Value::Int((u64::from_be_bytes(raw) ^ (1u64 << 63)) as i64))
            }
            SqlType::Float64 => {
                let raw: [u8; 8] = bytes.try_into().ok()?;
                let ordered = u64::from_be_bytes(raw);
                let bits = if ordered & (1u64 << 63) != 0 {
                    ordered & !(1u64 << 63)
                } else {
                    !ordered
                };
                Some(Value::Float(f64::from_bits(bits)))
            }
            SqlType::Char | SqlType::Varchar => {
                Some(Value::Str(String::from_utf8_lossy(bytes).into_owned()))
            }
            SqlType::Empty => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::Null => write!(f, "NULL"),
        }
    }
}
