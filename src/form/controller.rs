use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use futures_timer::Delay;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use super::error::{FormError, FormResult, SchemaResult, ValidationError};
use super::model::{FieldKey, FieldLens, FormModel, FormPatch};
use super::schema::{BoxedValidationFuture, Schema, ValidationOutcome};

static FORM_ID_ALLOCATOR: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FormId(pub u64);

impl FormId {
    pub fn next() -> Self {
        Self(FORM_ID_ALLOCATOR.fetch_add(1, Ordering::SeqCst))
    }
}

/// Token attached to one per-field validation call. Tickets come from a
/// counter that never resets, so a ticket issued before `reset_form` can
/// never match one issued after it.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ValidationTicket(pub u64);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SubmitState {
    Idle,
    Validating,
    Submitting,
    Succeeded,
    Failed,
}

impl SubmitState {
    pub fn is_submitting(self) -> bool {
        matches!(self, SubmitState::Validating | SubmitState::Submitting)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormOptions {
    pub validate_on_change: bool,
    pub validate_on_blur: bool,
    /// Delay before a change-triggered validation calls the schema. A newer
    /// edit of the same field during the delay skips the call.
    pub change_debounce_ms: u64,
}

impl FormOptions {
    pub fn change_debounce(&self) -> Duration {
        Duration::from_millis(self.change_debounce_ms)
    }
}

impl Default for FormOptions {
    fn default() -> Self {
        Self {
            validate_on_change: false,
            validate_on_blur: true,
            change_debounce_ms: 0,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FieldMeta<E> {
    pub dirty: bool,
    pub touched: bool,
    pub validating: bool,
    pub error: Option<E>,
}

impl<E> Default for FieldMeta<E> {
    fn default() -> Self {
        Self {
            dirty: false,
            touched: false,
            validating: false,
            error: None,
        }
    }
}

/// How a per-field validation task ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FieldValidation {
    Applied(ValidationTicket),
    Stale(ValidationTicket),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SubmitOutcome {
    /// Validation passed and the submit callback resolved.
    Submitted,
    /// Validation failed; the callback was not invoked.
    Rejected,
    /// The callback failed; its error sits under [`FieldKey::SUBMIT`].
    Failed,
    /// The form was reset while the submit was in flight.
    Cancelled,
}

#[derive(Clone, Debug)]
pub struct FormSnapshot<T, E> {
    pub values: T,
    pub submit_state: SubmitState,
    pub submit_count: u32,
    pub is_dirty: bool,
    pub is_valid: bool,
    pub is_validating: bool,
    pub field_meta: BTreeMap<FieldKey, FieldMeta<E>>,
    pub submit_error: Option<E>,
}

impl<T, E> FormSnapshot<T, E>
where
    E: Clone,
{
    pub fn is_submitting(&self) -> bool {
        self.submit_state.is_submitting()
    }

    /// Field errors plus the submit error under [`FieldKey::SUBMIT`].
    pub fn errors(&self) -> BTreeMap<FieldKey, E> {
        let mut errors = self
            .field_meta
            .iter()
            .filter_map(|(key, meta)| meta.error.clone().map(|error| (*key, error)))
            .collect::<BTreeMap<_, _>>();
        if let Some(error) = &self.submit_error {
            errors.insert(FieldKey::SUBMIT, error.clone());
        }
        errors
    }

    pub fn error(&self, key: FieldKey) -> Option<&E> {
        if key == FieldKey::SUBMIT {
            return self.submit_error.as_ref();
        }
        self.field_meta.get(&key).and_then(|meta| meta.error.as_ref())
    }

    pub fn touched(&self) -> BTreeSet<FieldKey> {
        self.field_meta
            .iter()
            .filter_map(|(key, meta)| meta.touched.then_some(*key))
            .collect()
    }

    pub fn is_touched(&self, key: FieldKey) -> bool {
        self.field_meta.get(&key).is_some_and(|meta| meta.touched)
    }
}

pub type ValidationTask = BoxedValidationFuture<'static, FormResult<FieldValidation>>;

type SubmitFuture = BoxedValidationFuture<'static, anyhow::Result<()>>;
type SubmitHandler<T> = Arc<dyn Fn(T) -> SubmitFuture + Send + Sync>;

pub(super) struct FormState<T, E> {
    pub(super) id: FormId,
    pub(super) initial_model: T,
    pub(super) model: T,
    pub(super) submit_state: SubmitState,
    pub(super) submit_count: u32,
    pub(super) field_meta: BTreeMap<FieldKey, FieldMeta<E>>,
    pub(super) submit_error: Option<E>,
    pub(super) tickets: BTreeMap<FieldKey, ValidationTicket>,
    pub(super) next_ticket: u64,
    pub(super) epoch: u64,
    pub(super) form_validations: u32,
}

impl<T, E> FormState<T, E> {
    pub(super) fn ensure_meta(&mut self, key: FieldKey) -> &mut FieldMeta<E> {
        self.field_meta.entry(key).or_default()
    }

    fn issue_ticket(&mut self, key: FieldKey) -> ValidationTicket {
        self.next_ticket += 1;
        let ticket = ValidationTicket(self.next_ticket);
        self.tickets.insert(key, ticket);
        self.ensure_meta(key).validating = true;
        ticket
    }

    /// Drops the in-flight ticket for `key` so its result is discarded.
    fn supersede(&mut self, key: FieldKey) {
        if self.tickets.remove(&key).is_some() {
            self.ensure_meta(key).validating = false;
        }
    }

    fn is_latest(&self, key: FieldKey, ticket: ValidationTicket) -> bool {
        self.tickets.get(&key).copied() == Some(ticket)
    }

    fn is_validating(&self) -> bool {
        self.form_validations > 0 || self.field_meta.values().any(|meta| meta.validating)
    }

    fn is_valid(&self) -> bool {
        self.submit_error.is_none() && self.field_meta.values().all(|meta| meta.error.is_none())
    }
}

/// Single-owner form state engine.
///
/// Clones share state; a clone is how field bindings and spawned validation
/// tasks reach back into the form.
pub struct FormController<T, S>
where
    T: FormModel,
    S: Schema<T>,
{
    pub(super) options: FormOptions,
    pub(super) schema: Arc<S>,
    pub(super) context: Arc<RwLock<Arc<S::Context>>>,
    pub(super) on_submit: SubmitHandler<T>,
    pub(super) state: Arc<RwLock<FormState<T, S::Error>>>,
}

impl<T, S> Clone for FormController<T, S>
where
    T: FormModel,
    S: Schema<T>,
{
    fn clone(&self) -> Self {
        Self {
            options: self.options,
            schema: Arc::clone(&self.schema),
            context: Arc::clone(&self.context),
            on_submit: Arc::clone(&self.on_submit),
            state: Arc::clone(&self.state),
        }
    }
}

pub struct FormBuilder<T, S>
where
    T: FormModel,
    S: Schema<T>,
{
    initial: T,
    schema: S,
    context: S::Context,
    options: FormOptions,
    on_submit: Option<SubmitHandler<T>>,
}

impl<T, S> FormBuilder<T, S>
where
    T: FormModel,
    S: Schema<T>,
{
    pub fn context(mut self, context: S::Context) -> Self {
        self.context = context;
        self
    }

    pub fn options(mut self, options: FormOptions) -> Self {
        self.options = options;
        self
    }

    pub fn validate_on_change(mut self, enabled: bool) -> Self {
        self.options.validate_on_change = enabled;
        self
    }

    pub fn validate_on_blur(mut self, enabled: bool) -> Self {
        self.options.validate_on_blur = enabled;
        self
    }

    pub fn on_submit<F, Fut>(mut self, on_submit: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handler: SubmitHandler<T> = Arc::new(move |data: T| -> SubmitFuture {
            Box::pin(on_submit(data))
        });
        self.on_submit = Some(handler);
        self
    }

    pub fn build(self) -> FormController<T, S> {
        let on_submit = match self.on_submit {
            Some(handler) => handler,
            None => noop_submit_handler(),
        };
        let id = FormId::next();
        debug!(form_id = id.0, fields = T::field_keys().len(), "form created");
        FormController {
            options: self.options,
            schema: Arc::new(self.schema),
            context: Arc::new(RwLock::new(Arc::new(self.context))),
            on_submit,
            state: Arc::new(RwLock::new(FormState {
                id,
                initial_model: self.initial.clone(),
                model: self.initial,
                submit_state: SubmitState::Idle,
                submit_count: 0,
                field_meta: BTreeMap::new(),
                submit_error: None,
                tickets: BTreeMap::new(),
                next_ticket: 0,
                epoch: 0,
                form_validations: 0,
            })),
        }
    }
}

impl<T, S> FormController<T, S>
where
    T: FormModel,
    S: Schema<T>,
{
    pub fn builder(initial: T, schema: S) -> FormBuilder<T, S>
    where
        S::Context: Default,
    {
        Self::builder_with_context(initial, schema, S::Context::default())
    }

    pub fn builder_with_context(initial: T, schema: S, context: S::Context) -> FormBuilder<T, S> {
        FormBuilder {
            initial,
            schema,
            context,
            options: FormOptions::default(),
            on_submit: None,
        }
    }

    pub fn options(&self) -> FormOptions {
        self.options
    }

    pub fn form_id(&self) -> FormResult<FormId> {
        Ok(read_lock(&self.state, "reading form id")?.id)
    }

    /// Replaces the out-of-band context used by validations started from
    /// now on.
    pub fn set_context(&self, context: S::Context) -> FormResult<()> {
        *write_lock(&self.context, "replacing form context")? = Arc::new(context);
        Ok(())
    }

    pub fn set_field_value<L>(&self, lens: L, value: L::Value) -> FormResult<Option<ValidationTask>>
    where
        L: FieldLens<T>,
    {
        let key = lens.key();
        {
            let mut state = write_lock(&self.state, "writing field value")?;
            lens.set(&mut state.model, value);
            let is_dirty = lens.get(&state.model) != lens.get(&state.initial_model);
            // Any blur or explicit validation still running saw the old value.
            state.supersede(key);
            state.ensure_meta(key).dirty = is_dirty;
        }

        if !self.options.validate_on_change {
            return Ok(None);
        }
        self.begin_field_validation(key, self.options.change_debounce())
            .map(Some)
    }

    pub fn set_field_touched<L>(&self, lens: L, touched: bool) -> FormResult<Option<ValidationTask>>
    where
        L: FieldLens<T>,
    {
        let key = lens.key();
        write_lock(&self.state, "touching field")?
            .ensure_meta(key)
            .touched = touched;

        if !(touched && self.options.validate_on_blur) {
            return Ok(None);
        }
        self.begin_field_validation(key, Duration::ZERO).map(Some)
    }

    pub fn validate_field<L>(&self, lens: L) -> FormResult<ValidationTask>
    where
        L: FieldLens<T>,
    {
        self.begin_field_validation(lens.key(), Duration::ZERO)
    }

    /// Merges several values at once without validating or touching them.
    /// In-flight validations for the patched fields are discarded.
    pub fn set_field_values(&self, patch: FormPatch<T>) -> FormResult<()> {
        let mut guard = write_lock(&self.state, "merging field values")?;
        let state = &mut *guard;
        for (key, is_dirty) in patch.apply(&mut state.model, &state.initial_model) {
            state.supersede(key);
            state.ensure_meta(key).dirty = is_dirty;
        }
        Ok(())
    }

    pub fn set_field_error<L>(&self, lens: L, error: S::Error) -> FormResult<()>
    where
        L: FieldLens<T>,
    {
        let key = lens.key();
        let mut state = write_lock(&self.state, "setting field error")?;
        state.supersede(key);
        state.ensure_meta(key).error = Some(error);
        Ok(())
    }

    pub fn clear_field_error<L>(&self, lens: L) -> FormResult<()>
    where
        L: FieldLens<T>,
    {
        let key = lens.key();
        let mut state = write_lock(&self.state, "clearing field error")?;
        state.supersede(key);
        if let Some(meta) = state.field_meta.get_mut(&key) {
            meta.error = None;
        }
        Ok(())
    }

    pub fn clear_errors(&self) -> FormResult<()> {
        let mut state = write_lock(&self.state, "clearing all field errors")?;
        for meta in state.field_meta.values_mut() {
            meta.error = None;
        }
        state.submit_error = None;
        Ok(())
    }

    /// Validates the whole value set and replaces every error with the
    /// result. A result that lands after `reset_form` is returned but not
    /// applied.
    pub async fn validate(&self) -> FormResult<ValidationOutcome<T, S::Error>> {
        let context = self.current_context()?;
        let (epoch, model) = {
            let mut state = write_lock(&self.state, "starting form validation")?;
            state.form_validations += 1;
            (state.epoch, state.model.clone())
        };
        let mut pending = PendingFormValidation {
            state: &self.state,
            epoch,
            armed: true,
        };

        let result = self.schema.validate_data(&model, &context).await;

        let mut state = write_lock(&self.state, "applying form validation result")?;
        pending.armed = false;
        if state.epoch != epoch {
            debug!(form_id = state.id.0, "discarding form validation started before reset");
            return Ok(result?);
        }
        state.form_validations = state.form_validations.saturating_sub(1);
        let outcome = result?;
        state.submit_error = None;
        for meta in state.field_meta.values_mut() {
            meta.error = None;
        }
        for (key, error) in &outcome.errors {
            state.ensure_meta(*key).error = Some(error.clone());
        }
        trace!(
            form_id = state.id.0,
            errors = outcome.errors.len(),
            "form validation applied"
        );
        Ok(outcome)
    }

    /// Restores the initial values and drops every error, touch and flag.
    /// Work started before the reset can no longer change the form.
    pub fn reset_form(&self) -> FormResult<()> {
        let mut state = write_lock(&self.state, "resetting form")?;
        state.model = state.initial_model.clone();
        transition_submit_state(&mut state, SubmitState::Idle)?;
        state.submit_count = 0;
        state.submit_error = None;
        state.field_meta.clear();
        state.tickets.clear();
        state.form_validations = 0;
        state.epoch += 1;
        debug!(form_id = state.id.0, epoch = state.epoch, "form reset");
        Ok(())
    }

    pub async fn handle_submit(&self) -> FormResult<SubmitOutcome> {
        let epoch = {
            let mut state = write_lock(&self.state, "preparing submit")?;
            if state.submit_state.is_submitting() {
                return Err(FormError::AlreadySubmitting);
            }
            for key in T::field_keys() {
                state.ensure_meta(*key).touched = true;
            }
            transition_submit_state(&mut state, SubmitState::Validating)?;
            state.submit_count = state.submit_count.saturating_add(1);
            debug!(
                form_id = state.id.0,
                attempt = state.submit_count,
                "submit started"
            );
            state.epoch
        };
        let guard = SubmitGuard {
            state: &self.state,
            epoch,
            armed: true,
        };

        let outcome = match self.validate().await {
            Ok(outcome) => outcome,
            Err(error) => {
                guard.complete(SubmitState::Failed)?;
                return Err(error);
            }
        };
        let (true, Some(data)) = (outcome.is_valid, outcome.data) else {
            if guard.complete(SubmitState::Failed)? {
                return Ok(SubmitOutcome::Rejected);
            }
            return Ok(SubmitOutcome::Cancelled);
        };
        if !guard.advance(SubmitState::Submitting)? {
            return Ok(SubmitOutcome::Cancelled);
        }

        let result = (self.on_submit)(data).await;

        match result {
            Ok(()) => {
                if guard.complete(SubmitState::Succeeded)? {
                    return Ok(SubmitOutcome::Submitted);
                }
                Ok(SubmitOutcome::Cancelled)
            }
            Err(error) => {
                let detail = format!("{error:#}");
                let mut state = write_lock(&self.state, "recording submit failure")?;
                if state.epoch != epoch {
                    return Ok(SubmitOutcome::Cancelled);
                }
                warn!(form_id = state.id.0, error = %detail, "submit callback failed");
                state.submit_error = Some(S::Error::from_message(detail));
                drop(state);
                guard.complete(SubmitState::Failed)?;
                Ok(SubmitOutcome::Failed)
            }
        }
    }

    pub fn snapshot(&self) -> FormResult<FormSnapshot<T, S::Error>> {
        let state = read_lock(&self.state, "creating form snapshot")?;
        Ok(FormSnapshot {
            values: state.model.clone(),
            submit_state: state.submit_state,
            submit_count: state.submit_count,
            is_dirty: state.model != state.initial_model,
            is_valid: state.is_valid(),
            is_validating: state.is_validating(),
            field_meta: state.field_meta.clone(),
            submit_error: state.submit_error.clone(),
        })
    }

    pub fn values(&self) -> FormResult<T> {
        Ok(read_lock(&self.state, "reading form values")?.model.clone())
    }

    pub fn field_meta<L>(&self, lens: L) -> FormResult<Option<FieldMeta<S::Error>>>
    where
        L: FieldLens<T>,
    {
        Ok(read_lock(&self.state, "reading field meta")?
            .field_meta
            .get(&lens.key())
            .cloned())
    }

    fn current_context(&self) -> FormResult<Arc<S::Context>> {
        Ok(Arc::clone(&*read_lock(&self.context, "reading form context")?))
    }

    fn is_latest_ticket(&self, key: FieldKey, ticket: ValidationTicket) -> FormResult<bool> {
        Ok(read_lock(&self.state, "checking latest validation ticket")?.is_latest(key, ticket))
    }

    /// Issues the ticket and captures the value now; the returned task only
    /// runs the schema once polled.
    fn begin_field_validation(&self, key: FieldKey, debounce: Duration) -> FormResult<ValidationTask> {
        let context = self.current_context()?;
        let (ticket, model) = {
            let mut state = write_lock(&self.state, "starting field validation")?;
            (state.issue_ticket(key), state.model.clone())
        };
        trace!(field = %key, ticket = ticket.0, "field validation queued");

        let pending = PendingFieldValidation {
            state: Arc::clone(&self.state),
            key,
            ticket,
        };
        let controller = self.clone();
        Ok(Box::pin(async move {
            let _pending = pending;
            if !debounce.is_zero() {
                Delay::new(debounce).await;
                if !controller.is_latest_ticket(key, ticket)? {
                    debug!(field = %key, ticket = ticket.0, "debounced validation superseded");
                    return Ok(FieldValidation::Stale(ticket));
                }
            }
            let result = controller
                .schema
                .validate_field(key, &model, &context)
                .await;
            controller.finish_field_validation(key, ticket, result)
        }))
    }

    fn finish_field_validation(
        &self,
        key: FieldKey,
        ticket: ValidationTicket,
        result: SchemaResult<Option<S::Error>>,
    ) -> FormResult<FieldValidation> {
        let mut state = write_lock(&self.state, "finishing field validation")?;
        if !state.is_latest(key, ticket) {
            debug!(field = %key, ticket = ticket.0, "discarding stale field validation");
            return Ok(FieldValidation::Stale(ticket));
        }
        state.tickets.remove(&key);
        let meta = state.ensure_meta(key);
        meta.validating = false;
        meta.error = result?;
        Ok(FieldValidation::Applied(ticket))
    }
}

/// Returns the submit state to a resting value however `handle_submit`
/// exits, including when its future is dropped part way.
struct SubmitGuard<'a, T, E> {
    state: &'a RwLock<FormState<T, E>>,
    epoch: u64,
    armed: bool,
}

impl<T, E> SubmitGuard<'_, T, E> {
    /// Moves to `next` if the form was not reset meanwhile. Returns whether
    /// the transition happened.
    fn advance(&self, next: SubmitState) -> FormResult<bool> {
        let mut state = write_lock(self.state, "advancing submit state")?;
        if state.epoch != self.epoch {
            return Ok(false);
        }
        transition_submit_state(&mut state, next)?;
        Ok(true)
    }

    fn complete(mut self, next: SubmitState) -> FormResult<bool> {
        self.armed = false;
        let completed = self.advance(next)?;
        if completed {
            debug!(state = ?next, "submit finished");
        }
        Ok(completed)
    }
}

impl<T, E> Drop for SubmitGuard<'_, T, E> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = recover_write(self.state);
        if state.epoch == self.epoch && state.submit_state.is_submitting() {
            state.submit_state = SubmitState::Idle;
        }
    }
}

/// Releases the form-level validation count when `validate` is dropped
/// before the schema answers.
struct PendingFormValidation<'a, T, E> {
    state: &'a RwLock<FormState<T, E>>,
    epoch: u64,
    armed: bool,
}

impl<T, E> Drop for PendingFormValidation<'_, T, E> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = recover_write(self.state);
        if state.epoch == self.epoch {
            state.form_validations = state.form_validations.saturating_sub(1);
        }
    }
}

/// Owned by a `ValidationTask`. Dropping the task before it lands, polled
/// or not, withdraws its ticket so the field stops reporting `validating`.
struct PendingFieldValidation<T, E> {
    state: Arc<RwLock<FormState<T, E>>>,
    key: FieldKey,
    ticket: ValidationTicket,
}

impl<T, E> Drop for PendingFieldValidation<T, E> {
    fn drop(&mut self) {
        let mut state = recover_write(&self.state);
        if state.is_latest(self.key, self.ticket) {
            debug!(field = %self.key, ticket = self.ticket.0, "field validation dropped");
            state.supersede(self.key);
        }
    }
}

fn recover_write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn noop_submit_handler<T>() -> SubmitHandler<T>
where
    T: FormModel,
{
    Arc::new(|_data: T| -> SubmitFuture { Box::pin(async { Ok(()) }) })
}

pub(super) fn transition_submit_state<T, E>(
    state: &mut FormState<T, E>,
    next: SubmitState,
) -> FormResult<()> {
    let current = state.submit_state;
    if current == next {
        return Ok(());
    }

    let allowed = matches!(
        (current, next),
        (SubmitState::Idle, SubmitState::Validating)
            | (SubmitState::Validating, SubmitState::Submitting)
            | (SubmitState::Validating, SubmitState::Failed)
            | (SubmitState::Submitting, SubmitState::Succeeded)
            | (SubmitState::Submitting, SubmitState::Failed)
            | (SubmitState::Succeeded, SubmitState::Validating)
            | (SubmitState::Failed, SubmitState::Validating)
            | (_, SubmitState::Idle)
    );
    if !allowed {
        return Err(FormError::InvalidStateTransition {
            from: current,
            to: next,
        });
    }
    state.submit_state = next;
    Ok(())
}

pub(super) fn read_lock<'a, T>(
    lock: &'a RwLock<T>,
    context: &'static str,
) -> FormResult<RwLockReadGuard<'a, T>> {
    lock.read().map_err(|_| FormError::StatePoisoned(context))
}

pub(super) fn write_lock<'a, T>(
    lock: &'a RwLock<T>,
    context: &'static str,
) -> FormResult<RwLockWriteGuard<'a, T>> {
    lock.write().map_err(|_| FormError::StatePoisoned(context))
}
