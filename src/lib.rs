//! Typed form state and validation for data-entry screens.
//!
//! A [`form::FormController`] owns one form session: values, per-field
//! errors, touched and dirty tracking, and the submit lifecycle. Validation
//! is delegated to a [`form::Schema`]; [`form::RuleSchema`] is the stock
//! rule-based implementation.

pub mod form;
pub mod services;

pub use crate::form::{
    FieldBinding, FieldError, FieldKey, FormController, FormError, FormOptions, FormPatch,
    FormResult, RuleSchema, Schema, SubmitOutcome,
};
