mod error;
mod rules;
mod transformer;

pub use error::TransformError;
pub use rules::{FieldPath, RuleKind, RuleSet, TransformRule};
pub use transformer::{FieldTransformer, TransformSummary};

/// Prefix that marks an IPv4 address mapped into IPv6 space.
pub const IPV4_MAPPED_PREFIX: &str = "::ffff:";

pub const HEADER_FIELDS: &[&[&str]] = &[&["request", "headers"], &["response", "headers"]];

pub const TIMESTAMP_FIELDS: &[&[&str]] = &[
    &["error", "timestamp"],
    &["request", "timestamp_start"],
    &["request", "timestamp_end"],
    &["response", "timestamp_start"],
    &["response", "timestamp_end"],
    &["client_conn", "timestamp_start"],
    &["client_conn", "timestamp_end"],
    &["client_conn", "timestamp_tls_setup"],
    &["client_conn", "timestamp_ssl_setup"],
    &["server_conn", "timestamp_start"],
    &["server_conn", "timestamp_end"],
    &["server_conn", "timestamp_tls_setup"],
    &["server_conn", "timestamp_ssl_setup"],
    &["server_conn", "timestamp_tcp_setup"],
];

pub const ADDRESS_FIELDS: &[&[&str]] = &[
    &["server_conn", "source_address"],
    &["server_conn", "ip_address"],
    &["server_conn", "address"],
    &["client_conn", "address"],
];

pub const MESSAGE_FIELDS: &[&[&str]] = &[&["messages"]];

pub const CONTENT_FIELDS: &[&[&str]] = &[&["request", "content"], &["response", "content"]];
