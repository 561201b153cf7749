use std::fmt::{Debug, Formatter};

use super::controller::{FormController, ValidationTask, read_lock};
use super::error::{FormResult, ValidationError};
use super::model::{FieldKey, FieldLens, FormModel};
use super::schema::Schema;

/// Everything a view needs to render and drive one field.
///
/// The error is only surfaced once the field is touched, either by a blur
/// or by a submit attempt.
pub struct FieldBinding<T, S, L>
where
    T: FormModel,
    S: Schema<T>,
    L: FieldLens<T>,
{
    controller: FormController<T, S>,
    lens: L,
    value: L::Value,
    error: Option<S::Error>,
    touched: bool,
    dirty: bool,
    validating: bool,
}

impl<T, S, L> FieldBinding<T, S, L>
where
    T: FormModel,
    S: Schema<T>,
    L: FieldLens<T>,
{
    pub fn key(&self) -> FieldKey {
        self.lens.key()
    }

    pub fn value(&self) -> &L::Value {
        &self.value
    }

    pub fn error(&self) -> Option<&S::Error> {
        self.error.as_ref()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error.as_ref().map(|error| error.message())
    }

    pub fn is_touched(&self) -> bool {
        self.touched
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_validating(&self) -> bool {
        self.validating
    }

    /// Change handler, bound to `set_field_value`.
    pub fn change(&self, value: L::Value) -> FormResult<Option<ValidationTask>> {
        self.controller.set_field_value(self.lens, value)
    }

    /// Blur handler, bound to `set_field_touched(field, true)`.
    pub fn blur(&self) -> FormResult<Option<ValidationTask>> {
        self.controller.set_field_touched(self.lens, true)
    }
}

impl<T, S, L> Debug for FieldBinding<T, S, L>
where
    T: FormModel,
    S: Schema<T>,
    L: FieldLens<T>,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldBinding")
            .field("key", &self.lens.key())
            .field("value", &self.value)
            .field("error", &self.error)
            .field("touched", &self.touched)
            .finish()
    }
}

impl<T, S> FormController<T, S>
where
    T: FormModel,
    S: Schema<T>,
{
    pub fn field<L>(&self, lens: L) -> FormResult<FieldBinding<T, S, L>>
    where
        L: FieldLens<T>,
    {
        let key = lens.key();
        let state = read_lock(&self.state, "reading field binding")?;
        let value = lens.get(&state.model).clone();
        let meta = state.field_meta.get(&key);
        let touched = meta.is_some_and(|meta| meta.touched);
        Ok(FieldBinding {
            controller: self.clone(),
            lens,
            value,
            error: meta
                .filter(|meta| meta.touched)
                .and_then(|meta| meta.error.clone()),
            touched,
            dirty: meta.is_some_and(|meta| meta.dirty),
            validating: meta.is_some_and(|meta| meta.validating),
        })
    }

    pub fn field_error_for_display<L>(&self, lens: L) -> FormResult<Option<S::Error>>
    where
        L: FieldLens<T>,
    {
        Ok(self.field(lens)?.error)
    }
}
