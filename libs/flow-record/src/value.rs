use std::collections::BTreeMap;

/// A node of a captured flow record.
///
/// Records arrive as the interceptor's flow state: nested mappings with
/// string keys whose leaves may be text, numbers, booleans, nulls or raw
/// bytes. Tuples and lists are both represented as [`FlowValue::Seq`].
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FlowValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Seq(Vec<FlowValue>),
    Map(BTreeMap<String, FlowValue>),
}

impl FlowValue {
    /// Builds a mapping from key/value pairs.
    pub fn map<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, FlowValue)>,
    {
        FlowValue::Map(
            entries
                .into_iter()
                .map(|(key, value)| (key.into(), value))
                .collect(),
        )
    }

    /// Builds a sequence from anything convertible into flow values.
    pub fn seq<T, I>(items: I) -> Self
    where
        T: Into<FlowValue>,
        I: IntoIterator<Item = T>,
    {
        FlowValue::Seq(items.into_iter().map(Into::into).collect())
    }

    pub fn bytes(data: impl Into<Vec<u8>>) -> Self {
        FlowValue::Bytes(data.into())
    }

    /// Truthiness as the flow producer defines it: empty containers, empty
    /// text, zero and null are false.
    pub fn is_truthy(&self) -> bool {
        match self {
            FlowValue::Null => false,
            FlowValue::Bool(b) => *b,
            FlowValue::Int(i) => *i != 0,
            FlowValue::Float(f) => *f != 0.0,
            FlowValue::Str(s) => !s.is_empty(),
            FlowValue::Bytes(b) => !b.is_empty(),
            FlowValue::Seq(items) => !items.is_empty(),
            FlowValue::Map(map) => !map.is_empty(),
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, FlowValue>> {
        match self {
            FlowValue::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_map_mut(&mut self) -> Option<&mut BTreeMap<String, FlowValue>> {
        match self {
            FlowValue::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_seq(&self) -> Option<&[FlowValue]> {
        match self {
            FlowValue::Seq(items) => Some(items),
            _ => None,
        }
    }

    /// Looks up `key` when this value is a mapping.
    pub fn get(&self, key: &str) -> Option<&FlowValue> {
        self.as_map().and_then(|map| map.get(key))
    }

    /// Text rendering used wherever a key or host must be a string:
    /// text is kept, bytes go through [`escape_bytes`].
    pub fn to_text(&self) -> Option<String> {
        match self {
            FlowValue::Str(s) => Some(s.clone()),
            FlowValue::Bytes(b) => Some(escape_bytes(b)),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            FlowValue::Null => "null",
            FlowValue::Bool(_) => "bool",
            FlowValue::Int(_) => "int",
            FlowValue::Float(_) => "float",
            FlowValue::Str(_) => "string",
            FlowValue::Bytes(_) => "bytes",
            FlowValue::Seq(_) => "sequence",
            FlowValue::Map(_) => "mapping",
        }
    }
}

impl From<bool> for FlowValue {
    fn from(value: bool) -> Self {
        FlowValue::Bool(value)
    }
}

impl From<i64> for FlowValue {
    fn from(value: i64) -> Self {
        FlowValue::Int(value)
    }
}

impl From<u16> for FlowValue {
    fn from(value: u16) -> Self {
        FlowValue::Int(i64::from(value))
    }
}

impl From<f64> for FlowValue {
    fn from(value: f64) -> Self {
        FlowValue::Float(value)
    }
}

impl From<&str> for FlowValue {
    fn from(value: &str) -> Self {
        FlowValue::Str(value.to_string())
    }
}

impl From<String> for FlowValue {
    fn from(value: String) -> Self {
        FlowValue::Str(value)
    }
}

impl From<&[u8]> for FlowValue {
    fn from(value: &[u8]) -> Self {
        FlowValue::Bytes(value.to_vec())
    }
}

impl From<Vec<FlowValue>> for FlowValue {
    fn from(value: Vec<FlowValue>) -> Self {
        FlowValue::Seq(value)
    }
}

/// Renders bytes the way a byte literal prints without its `b'...'` wrapper.
///
/// Printable ASCII is kept, backslash and the active quote character are
/// escaped, `\t` `\n` `\r` use their short forms and every other byte
/// becomes `\xNN`. The quote is `'` unless the data contains `'` but no `"`.
pub fn escape_bytes(data: &[u8]) -> String {
    let quote = if data.contains(&b'\'') && !data.contains(&b'"') {
        b'"'
    } else {
        b'\''
    };

    let mut out = String::with_capacity(data.len());
    for &byte in data {
        match byte {
            b'\\' => out.push_str("\\\\"),
            b'\t' => out.push_str("\\t"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b if b == quote => {
                out.push('\\');
                out.push(b as char);
            }
            0x20..=0x7e => out.push(byte as char),
            _ => out.push_str(&format!("\\x{byte:02x}")),
        }
    }
    out
}
