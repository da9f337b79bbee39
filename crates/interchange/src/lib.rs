//! Blueprint configuration model.
//!
//! Decodes the stored, loosely-typed blueprint configuration (string
//! `type`/`operator` fields and JSON `config` blobs) into tagged enums,
//! rejecting unknown types and malformed items at load time.

pub mod defaults;
pub mod deserialize;
pub mod types;
pub mod validate;

pub use defaults::default_transitions;
pub use deserialize::{from_config, parse_escalation, parse_sla, ConfigError};
pub use types::*;
pub use validate::{validate_blueprint, validate_escalation, validate_sla};
