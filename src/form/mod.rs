mod binding;
mod controller;
mod error;
mod model;
pub mod rules;
mod schema;


pub use binding::FieldBinding;
pub use calmform_derive::FormModel;
pub use controller::{
    FieldMeta, FieldValidation, FormBuilder, FormController, FormId, FormOptions, FormSnapshot,
    SubmitOutcome, SubmitState, ValidationTask, ValidationTicket,
};
pub use error::{FieldError, FormError, FormResult, SchemaError, SchemaResult, ValidationError};
pub use model::{FieldKey, FieldLens, FormModel, FormPatch};
pub use schema::{
    AsyncFieldRule, BoxedValidationFuture, FieldRule, RuleSchema, Schema, ValidationOutcome,
};
