//! Flow record model and normalization.
//!
//! This crate holds the in-memory representation of captured flows, the
//! tnetstring codec used by saved flow dumps, the declarative field
//! transformation rules and the normalizer that turns a record into a JSON
//! document suitable for a document store.

pub mod normalize;
pub mod tnetstring;
pub mod transform;
pub mod value;

pub use normalize::{to_document, RecordNormalizer};
pub use tnetstring::TnetstringError;
pub use transform::{
    FieldPath, FieldTransformer, RuleKind, RuleSet, TransformError, TransformRule, TransformSummary,
};
pub use value::{escape_bytes, FlowValue};
