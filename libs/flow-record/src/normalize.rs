//! Record to document normalization.

use serde_json::{Map, Number, Value};

use crate::transform::{FieldTransformer, RuleSet, TransformError};
use crate::value::{escape_bytes, FlowValue};

/// Connection subtree and field removed from every document.
pub const CERTIFICATE_CHAIN_FIELD: (&str, &str) = ("server_conn", "certificate_list");

/// Turns raw flow records into JSON documents ready for ingestion.
pub struct RecordNormalizer {
    rules: RuleSet,
    transformer: FieldTransformer,
}

impl RecordNormalizer {
    pub fn new(rules: RuleSet) -> Self {
        Self {
            rules,
            transformer: FieldTransformer::new(),
        }
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Rewrites the declared fields, coerces every byte string to text and
    /// strips the server certificate chain. Only a record that is not a
    /// mapping is rejected; badly shaped fields are coerced untransformed.
    pub fn normalize(&self, mut record: FlowValue) -> Result<Value, TransformError> {
        if !matches!(record, FlowValue::Map(_)) {
            return Err(TransformError::NotAMapping(record.type_name()));
        }

        self.transformer.apply(&mut record, &self.rules);

        let mut document = to_document(record);
        let (parent, field) = CERTIFICATE_CHAIN_FIELD;
        if let Some(Value::Object(conn)) = document.get_mut(parent) {
            conn.remove(field);
        }

        Ok(document)
    }
}

/// Converts a flow value into JSON, rendering bytes through
/// [`escape_bytes`] and non-finite floats as null.
pub fn to_document(value: FlowValue) -> Value {
    match value {
        FlowValue::Null => Value::Null,
        FlowValue::Bool(b) => Value::Bool(b),
        FlowValue::Int(i) => Value::Number(i.into()),
        FlowValue::Float(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        FlowValue::Str(s) => Value::String(s),
        FlowValue::Bytes(b) => Value::String(escape_bytes(&b)),
        FlowValue::Seq(items) => Value::Array(items.into_iter().map(to_document).collect()),
        FlowValue::Map(map) => Value::Object(
            map.into_iter()
                .map(|(key, item)| (key, to_document(item)))
                .collect::<Map<String, Value>>(),
        ),
    }
}
