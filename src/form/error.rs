use std::fmt::Debug;

use thiserror::Error;

use super::model::FieldKey;
use super::controller::SubmitState;

/// A user-facing validation failure attached to one field.
///
/// Invalid input is reported through values of this trait, never through
/// `Err`. `from_message` lets the engine build one for the reserved
/// `_submit` key and lets the stock rules produce errors for any type.
pub trait ValidationError: Clone + Debug + Send + Sync + 'static {
    fn message(&self) -> &str;
    fn from_message(message: String) -> Self;

    fn from_rule(_rule: &'static str, message: String) -> Self {
        Self::from_message(message)
    }
}

/// Default error type carried by [`RuleSchema`](super::RuleSchema).
#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("{message}")]
pub struct FieldError {
    pub rule: Option<&'static str>,
    pub message: String,
}

impl FieldError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            rule: None,
            message: message.into(),
        }
    }

    pub fn with_rule(rule: &'static str, message: impl Into<String>) -> Self {
        Self {
            rule: Some(rule),
            message: message.into(),
        }
    }
}

impl ValidationError for FieldError {
    fn message(&self) -> &str {
        &self.message
    }

    fn from_message(message: String) -> Self {
        Self::new(message)
    }

    fn from_rule(rule: &'static str, message: String) -> Self {
        Self::with_rule(rule, message)
    }
}

/// A schema that cannot do its job. Never used for invalid input.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum SchemaError {
    #[error("schema has no field named `{0}`")]
    UnknownField(FieldKey),
    #[error("rule for `{field}` failed: {reason}")]
    Rule { field: FieldKey, reason: String },
}

pub type SchemaResult<T> = Result<T, SchemaError>;

#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum FormError {
    #[error("form state lock poisoned while {0}")]
    StatePoisoned(&'static str),
    #[error("invalid submit state transition: {from:?} -> {to:?}")]
    InvalidStateTransition { from: SubmitState, to: SubmitState },
    #[error("form submit is already in progress")]
    AlreadySubmitting,
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

pub type FormResult<T> = Result<T, FormError>;
