//! Typed row values decoded off the wire, and the formatting rules the SQL
//! renderer and key construction both depend on.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    UInt(u64),
    Float(f64),
    Decimal(String),
    /// UTF-8 text, or binary coerced to text for sinks that want strings.
    Text(String),
    Bytes(Vec<u8>),
    /// `"YYYY-MM-DD HH:MM:SS"`, already formatted at decode time.
    Timestamp(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Distinguishes `''` from NULL. Treating the two alike when building
    /// clauses silently shrinks an INSERT's column list and misaligns
    /// VALUES, so the renderer omits only true NULLs; this stays available
    /// for callers that want the coarser test.
    pub fn is_empty_string(&self) -> bool {
        matches!(self, Value::Text(s) if s.is_empty())
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::UInt(_) | Value::Float(_) | Value::Decimal(_))
    }

    /// Unquoted textual form for SET/VALUES/WHERE clauses (numeric types) or
    /// the inner text of a quoted clause (string-like types); callers add
    /// quoting themselves so this stays reusable by the Key Lineariser too.
    pub fn raw_text(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Int(v) => v.to_string(),
            Value::UInt(v) => v.to_string(),
            Value::Float(v) => v.to_string(),
            Value::Decimal(v) => v.clone(),
            Value::Text(v) => v.clone(),
            Value::Bytes(v) => String::from_utf8_lossy(v).into_owned(),
            Value::Timestamp(v) => v.clone(),
        }
    }

    /// Escapes a string-like value for embedding inside single quotes:
    /// backslash-escape embedded `'` and `"`.
    pub fn sql_escaped(&self) -> String {
        let raw = self.raw_text();
        let mut escaped = String::with_capacity(raw.len());
        for c in raw.chars() {
            if c == '\'' || c == '"' {
                escaped.push('\\');
            }
            escaped.push(c);
        }
        escaped
    }

    /// The single canonical stringification shared by the KV sink key and
    /// the document sink filter, so the two sinks can never disagree about
    /// which row a key refers to.
    pub fn to_key_string(&self) -> String {
        self.raw_text()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_quotes() {
        let v = Value::Text("a'b\"c".to_string());
        assert_eq!(v.sql_escaped(), "a\\'b\\\"c");
    }

    #[test]
    fn key_string_is_canonical_across_types() {
        assert_eq!(Value::Int(42).to_key_string(), "42");
        assert_eq!(Value::Bytes(b"42".to_vec()).to_key_string(), "42");
        assert_eq!(Value::Text("42".into()).to_key_string(), "42");
    }

    #[test]
    fn empty_string_is_not_null() {
        let v = Value::Text(String::new());
        assert!(v.is_empty_string());
        assert!(!v.is_null());
    }
}
