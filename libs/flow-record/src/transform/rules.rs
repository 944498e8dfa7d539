use std::collections::BTreeMap;
use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::value::FlowValue;

use super::{
    TransformError, ADDRESS_FIELDS, CONTENT_FIELDS, HEADER_FIELDS, IPV4_MAPPED_PREFIX,
    MESSAGE_FIELDS, TIMESTAMP_FIELDS,
};

/// Ordered key sequence locating a value inside a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(keys.into_iter().map(Into::into).collect())
    }

    pub fn keys(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

/// The value rewrite a rule performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    /// List of `(name, value)` pairs to a mapping, last duplicate wins.
    HeaderMap,
    /// Epoch seconds to truncated epoch milliseconds.
    EpochMillis,
    /// `(host, port)` to `{"host", "port"}` with the IPv4-mapped prefix removed.
    Address,
    /// Message tuples to `{"type", "from_client", "timestamp"}` summaries.
    MessageSummary,
    /// Raw content to standard base64 text.
    Base64Content,
}

impl RuleKind {
    pub fn name(&self) -> &'static str {
        match self {
            RuleKind::HeaderMap => "headers",
            RuleKind::EpochMillis => "timestamp",
            RuleKind::Address => "address",
            RuleKind::MessageSummary => "messages",
            RuleKind::Base64Content => "content",
        }
    }

    /// Produces the replacement for `value`.
    pub fn rewrite(&self, value: &FlowValue) -> Result<FlowValue, TransformError> {
        match self {
            RuleKind::HeaderMap => self.header_map(value),
            RuleKind::EpochMillis => epoch_millis(value).map(FlowValue::Int),
            RuleKind::Address => self.address(value),
            RuleKind::MessageSummary => self.message_summary(value),
            RuleKind::Base64Content => match value {
                FlowValue::Bytes(data) => Ok(FlowValue::Str(STANDARD.encode(data))),
                FlowValue::Str(text) => Ok(FlowValue::Str(STANDARD.encode(text.as_bytes()))),
                other => Err(self.shape("bytes", other)),
            },
        }
    }

    fn header_map(&self, value: &FlowValue) -> Result<FlowValue, TransformError> {
        let pairs = match value {
            FlowValue::Map(_) => return Ok(value.clone()),
            FlowValue::Seq(pairs) => pairs,
            other => return Err(self.shape("list of header pairs", other)),
        };

        let mut headers = BTreeMap::new();
        for pair in pairs {
            let (name, field_value) = match pair.as_seq() {
                Some([name, field_value]) => (name, field_value),
                _ => return Err(self.shape("(name, value) pair", pair)),
            };
            let name = name
                .to_text()
                .ok_or_else(|| self.shape("text header name", name))?;
            headers.insert(name, field_value.clone());
        }

        Ok(FlowValue::Map(headers))
    }

    fn address(&self, value: &FlowValue) -> Result<FlowValue, TransformError> {
        let (host, port) = match value.as_seq() {
            Some([host, port, ..]) => (host, port),
            _ => return Err(self.shape("(host, port) pair", value)),
        };
        let host = host
            .to_text()
            .ok_or_else(|| self.shape("text host", host))?
            .replace(IPV4_MAPPED_PREFIX, "");

        Ok(FlowValue::map([
            ("host", FlowValue::Str(host)),
            ("port", port.clone()),
        ]))
    }

    fn message_summary(&self, value: &FlowValue) -> Result<FlowValue, TransformError> {
        let messages = value
            .as_seq()
            .ok_or_else(|| self.shape("list of messages", value))?;

        messages
            .iter()
            .map(|message| match message.as_seq() {
                Some([kind, from_client, _content, timestamp, ..]) => Ok(FlowValue::map([
                    ("type", kind.clone()),
                    ("from_client", from_client.clone()),
                    ("timestamp", FlowValue::Int(epoch_millis(timestamp)?)),
                ])),
                _ => Err(self.shape("(type, from_client, content, timestamp) tuple", message)),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(FlowValue::Seq)
    }

    fn shape(&self, expected: &'static str, found: &FlowValue) -> TransformError {
        TransformError::UnexpectedShape {
            rule: self.name(),
            expected,
            found: found.type_name(),
        }
    }
}

/// `int(seconds * 1000)`: scale then truncate toward zero.
fn epoch_millis(value: &FlowValue) -> Result<i64, TransformError> {
    match value {
        FlowValue::Float(seconds) => {
            let millis = (seconds * 1000.0).trunc();
            if millis.is_finite() && millis >= i64::MIN as f64 && millis < i64::MAX as f64 {
                Ok(millis as i64)
            } else {
                Err(TransformError::TimestampOutOfRange(seconds.to_string()))
            }
        }
        FlowValue::Int(seconds) => seconds
            .checked_mul(1000)
            .ok_or_else(|| TransformError::TimestampOutOfRange(seconds.to_string())),
        other => Err(TransformError::UnexpectedShape {
            rule: RuleKind::EpochMillis.name(),
            expected: "epoch seconds",
            found: other.type_name(),
        }),
    }
}

/// A rewrite applied to every listed path.
#[derive(Debug, Clone)]
pub struct TransformRule {
    pub paths: Vec<FieldPath>,
    pub kind: RuleKind,
}

impl TransformRule {
    pub fn new(kind: RuleKind, paths: &[&[&str]]) -> Self {
        Self {
            paths: paths.iter().map(|keys| FieldPath::new(keys.iter().copied())).collect(),
            kind,
        }
    }
}

/// Immutable rule table, built once and shared by every worker.
#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: Vec<TransformRule>,
}

impl RuleSet {
    pub fn new(rules: Vec<TransformRule>) -> Self {
        Self { rules }
    }

    /// The exporter's rules; `encode_content` adds base64 encoding of
    /// request and response bodies.
    pub fn standard(encode_content: bool) -> Self {
        let mut rules = vec![
            TransformRule::new(RuleKind::HeaderMap, HEADER_FIELDS),
            TransformRule::new(RuleKind::EpochMillis, TIMESTAMP_FIELDS),
            TransformRule::new(RuleKind::Address, ADDRESS_FIELDS),
            TransformRule::new(RuleKind::MessageSummary, MESSAGE_FIELDS),
        ];
        if encode_content {
            rules.push(TransformRule::new(RuleKind::Base64Content, CONTENT_FIELDS));
        }
        Self { rules }
    }

    pub fn rules(&self) -> &[TransformRule] {
        &self.rules
    }
}
