use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use super::error::{FieldError, SchemaError, SchemaResult, ValidationError};
use super::model::{FieldKey, FieldLens, FormModel};

pub type BoxedValidationFuture<'a, R> = Pin<Box<dyn Future<Output = R> + Send + 'a>>;

/// Result of validating a whole value object.
///
/// `data` is only present on success and holds the normalised values the
/// submit callback receives.
#[derive(Clone, Debug, PartialEq)]
pub struct ValidationOutcome<T, E> {
    pub is_valid: bool,
    pub errors: BTreeMap<FieldKey, E>,
    pub data: Option<T>,
}

impl<T, E> ValidationOutcome<T, E> {
    pub fn valid(data: T) -> Self {
        Self {
            is_valid: true,
            errors: BTreeMap::new(),
            data: Some(data),
        }
    }

    pub fn invalid(errors: BTreeMap<FieldKey, E>) -> Self {
        Self {
            is_valid: false,
            errors,
            data: None,
        }
    }

    pub fn from_parts(data: T, errors: BTreeMap<FieldKey, E>) -> Self {
        if errors.is_empty() {
            Self::valid(data)
        } else {
            Self::invalid(errors)
        }
    }
}

/// Rule set the form controller validates against.
///
/// `validate_field` must only look at the named field; errors found on other
/// fields are never reported from it. Both methods resolve exactly once.
/// `Err` is reserved for misconfiguration, invalid input is an `Ok` value.
pub trait Schema<T>: Send + Sync + 'static
where
    T: FormModel,
{
    type Context: Send + Sync + 'static;
    type Error: ValidationError;

    fn validate_field<'a>(
        &'a self,
        key: FieldKey,
        model: &'a T,
        context: &'a Self::Context,
    ) -> BoxedValidationFuture<'a, SchemaResult<Option<Self::Error>>>;

    fn validate_data<'a>(
        &'a self,
        model: &'a T,
        context: &'a Self::Context,
    ) -> BoxedValidationFuture<'a, SchemaResult<ValidationOutcome<T, Self::Error>>>;
}

pub trait FieldRule<V, C, E>: Send + Sync
where
    E: ValidationError,
{
    fn check(&self, value: &V, context: &C) -> Result<(), E>;
}

impl<V, C, E, F> FieldRule<V, C, E> for F
where
    E: ValidationError,
    F: Fn(&V, &C) -> Result<(), E> + Send + Sync,
{
    fn check(&self, value: &V, context: &C) -> Result<(), E> {
        (self)(value, context)
    }
}

pub trait AsyncFieldRule<V, C, E>: Send + Sync
where
    E: ValidationError,
{
    type Fut<'a>: Future<Output = Result<(), E>> + Send + 'a
    where
        Self: 'a,
        V: 'a,
        C: 'a;

    fn check<'a>(&'a self, value: &'a V, context: &'a C) -> Self::Fut<'a>;
}

impl<V, C, E, F> AsyncFieldRule<V, C, E> for F
where
    E: ValidationError,
    F: for<'a> Fn(&'a V, &'a C) -> BoxedValidationFuture<'a, Result<(), E>> + Send + Sync,
{
    type Fut<'a>
        = BoxedValidationFuture<'a, Result<(), E>>
    where
        Self: 'a,
        V: 'a,
        C: 'a;

    fn check<'a>(&'a self, value: &'a V, context: &'a C) -> Self::Fut<'a> {
        (self)(value, context)
    }
}

type SyncCheckFn<T, C, E> = Arc<dyn Fn(&T, &C) -> Result<(), E> + Send + Sync>;
type AsyncCheckFn<T, C, E> =
    Arc<dyn for<'a> Fn(&'a T, &'a C) -> BoxedValidationFuture<'a, Result<(), E>> + Send + Sync>;
type TransformFn<T> = Arc<dyn Fn(&mut T) + Send + Sync>;
type FormRuleFn<T, C, E> = Arc<dyn Fn(&T, &C) -> Vec<(FieldKey, E)> + Send + Sync>;

enum Check<T, C, E> {
    Sync(SyncCheckFn<T, C, E>),
    Async(AsyncCheckFn<T, C, E>),
}

impl<T, C, E> Clone for Check<T, C, E> {
    fn clone(&self) -> Self {
        match self {
            Check::Sync(check) => Check::Sync(check.clone()),
            Check::Async(check) => Check::Async(check.clone()),
        }
    }
}

struct FieldRules<T, C, E> {
    transforms: Vec<TransformFn<T>>,
    checks: Vec<Check<T, C, E>>,
}

impl<T, C, E> Default for FieldRules<T, C, E> {
    fn default() -> Self {
        Self {
            transforms: Vec::new(),
            checks: Vec::new(),
        }
    }
}

impl<T, C, E> FieldRules<T, C, E>
where
    T: Clone,
{
    fn normalize<'a>(&self, model: &'a T) -> Cow<'a, T> {
        if self.transforms.is_empty() {
            return Cow::Borrowed(model);
        }
        let mut normalized = model.clone();
        for transform in &self.transforms {
            transform(&mut normalized);
        }
        Cow::Owned(normalized)
    }

    async fn first_failure(&self, model: &T, context: &C) -> Option<E> {
        for check in &self.checks {
            let result = match check {
                Check::Sync(check) => check(model, context),
                Check::Async(check) => check(model, context).await,
            };
            if let Err(error) = result {
                return Some(error);
            }
        }
        None
    }
}

fn async_check<T, C, E, F>(check: F) -> AsyncCheckFn<T, C, E>
where
    F: for<'a> Fn(&'a T, &'a C) -> BoxedValidationFuture<'a, Result<(), E>>
        + Send
        + Sync
        + 'static,
{
    Arc::new(check)
}

/// Declarative schema built from per-field rules, normalising transforms and
/// cross-field form rules.
///
/// Rules for one field run in registration order and the first failure wins.
/// Transforms run before rules. Form rules only run during whole-form
/// validation and never replace an error a field rule already reported.
pub struct RuleSchema<T, C = (), E = FieldError> {
    fields: BTreeMap<FieldKey, FieldRules<T, C, E>>,
    form_rules: Vec<FormRuleFn<T, C, E>>,
}

impl<T, C, E> RuleSchema<T, C, E>
where
    T: FormModel,
    C: Send + Sync + 'static,
    E: ValidationError,
{
    pub fn new() -> Self {
        Self {
            fields: BTreeMap::new(),
            form_rules: Vec::new(),
        }
    }

    pub fn rule<L, R>(mut self, lens: L, rule: R) -> Self
    where
        L: FieldLens<T>,
        R: FieldRule<L::Value, C, E> + 'static,
    {
        let check: SyncCheckFn<T, C, E> =
            Arc::new(move |model: &T, context: &C| rule.check(lens.get(model), context));
        self.fields
            .entry(lens.key())
            .or_default()
            .checks
            .push(Check::Sync(check));
        self
    }

    pub fn async_rule<L, R>(mut self, lens: L, rule: R) -> Self
    where
        L: FieldLens<T>,
        R: AsyncFieldRule<L::Value, C, E> + 'static,
    {
        let rule = Arc::new(rule);
        let check = async_check(move |model, context| {
            let rule = Arc::clone(&rule);
            Box::pin(async move { rule.check(lens.get(model), context).await })
        });
        self.fields
            .entry(lens.key())
            .or_default()
            .checks
            .push(Check::Async(check));
        self
    }

    pub fn transform<L, F>(mut self, lens: L, transform: F) -> Self
    where
        L: FieldLens<T>,
        F: Fn(L::Value) -> L::Value + Send + Sync + 'static,
    {
        let transform: TransformFn<T> = Arc::new(move |model: &mut T| {
            let current = lens.get(model).clone();
            lens.set(model, transform(current));
        });
        self.fields
            .entry(lens.key())
            .or_default()
            .transforms
            .push(transform);
        self
    }

    pub fn trim<L>(self, lens: L) -> Self
    where
        L: FieldLens<T, Value = String>,
    {
        self.transform(lens, |value: String| value.trim().to_string())
    }

    pub fn form_rule<F>(mut self, rule: F) -> Self
    where
        F: Fn(&T, &C) -> Vec<(FieldKey, E)> + Send + Sync + 'static,
    {
        self.form_rules.push(Arc::new(rule));
        self
    }

    fn normalize_all(&self, model: &T) -> T {
        let mut normalized = model.clone();
        for rules in self.fields.values() {
            for transform in &rules.transforms {
                transform(&mut normalized);
            }
        }
        normalized
    }
}

impl<T, C, E> Default for RuleSchema<T, C, E>
where
    T: FormModel,
    C: Send + Sync + 'static,
    E: ValidationError,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, C, E> Debug for RuleSchema<T, C, E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleSchema")
            .field("fields", &self.fields.keys().collect::<Vec<_>>())
            .field("form_rules", &self.form_rules.len())
            .finish()
    }
}

impl<T, C, E> Schema<T> for RuleSchema<T, C, E>
where
    T: FormModel,
    C: Send + Sync + 'static,
    E: ValidationError,
{
    type Context = C;
    type Error = E;

    fn validate_field<'a>(
        &'a self,
        key: FieldKey,
        model: &'a T,
        context: &'a C,
    ) -> BoxedValidationFuture<'a, SchemaResult<Option<E>>> {
        Box::pin(async move {
            if !T::has_field(key) {
                return Err(SchemaError::UnknownField(key));
            }
            let Some(rules) = self.fields.get(&key) else {
                return Ok(None);
            };
            let normalized = rules.normalize(model);
            Ok(rules.first_failure(normalized.as_ref(), context).await)
        })
    }

    fn validate_data<'a>(
        &'a self,
        model: &'a T,
        context: &'a C,
    ) -> BoxedValidationFuture<'a, SchemaResult<ValidationOutcome<T, E>>> {
        Box::pin(async move {
            let data = self.normalize_all(model);
            let mut errors = BTreeMap::new();
            for key in T::field_keys() {
                let Some(rules) = self.fields.get(key) else {
                    continue;
                };
                if let Some(error) = rules.first_failure(&data, context).await {
                    errors.insert(*key, error);
                }
            }

            for rule in &self.form_rules {
                for (key, error) in rule(&data, context) {
                    if !T::has_field(key) {
                        return Err(SchemaError::UnknownField(key));
                    }
                    errors.entry(key).or_insert(error);
                }
            }

            Ok(ValidationOutcome::from_parts(data, errors))
        })
    }
}
