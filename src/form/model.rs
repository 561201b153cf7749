use std::fmt::{Debug, Display, Formatter};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FieldKey(&'static str);

impl FieldKey {
    /// Reserved key holding the error captured from a failed submit callback.
    pub const SUBMIT: FieldKey = FieldKey::new("_submit");

    pub const fn new(value: &'static str) -> Self {
        Self(value)
    }

    pub const fn as_str(self) -> &'static str {
        self.0
    }
}

impl Display for FieldKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0)
    }
}

pub trait FieldLens<T>: Copy + Send + Sync + 'static {
    type Value: Clone + PartialEq + Debug + Send + Sync + 'static;

    fn key(self) -> FieldKey;
    fn get<'a>(self, model: &'a T) -> &'a Self::Value;
    fn set(self, model: &mut T, value: Self::Value);
}

/// A typed form value object. Field keys are fixed at compile time, so the
/// key set can never grow or shrink after construction.
pub trait FormModel: Clone + PartialEq + Debug + Send + Sync + 'static {
    type Fields;

    fn fields() -> Self::Fields;
    fn field_keys() -> &'static [FieldKey];

    fn has_field(key: FieldKey) -> bool {
        Self::field_keys().contains(&key)
    }
}

type PatchOp<T> = Box<dyn FnOnce(&mut T, &T) -> bool + Send>;

/// A partial value set merged into the form in one step, e.g. when a lookup
/// pre-fills several fields at once.
pub struct FormPatch<T> {
    entries: Vec<(FieldKey, PatchOp<T>)>,
}

impl<T> FormPatch<T>
where
    T: FormModel,
{
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn set<L>(mut self, lens: L, value: L::Value) -> Self
    where
        L: FieldLens<T>,
    {
        let op: PatchOp<T> = Box::new(move |model: &mut T, initial: &T| {
            lens.set(model, value);
            lens.get(model) != lens.get(initial)
        });
        self.entries.push((lens.key(), op));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = FieldKey> + '_ {
        self.entries.iter().map(|(key, _)| *key)
    }

    /// Applies every entry in order and reports each field's dirty flag
    /// against `initial`.
    pub(super) fn apply(self, model: &mut T, initial: &T) -> Vec<(FieldKey, bool)> {
        self.entries
            .into_iter()
            .map(|(key, op)| (key, op(model, initial)))
            .collect()
    }
}

impl<T> Default for FormPatch<T>
where
    T: FormModel,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Debug for FormPatch<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|(key, _)| key))
            .finish()
    }
}
