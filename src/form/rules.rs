//! Stock field rules for [`RuleSchema`](super::RuleSchema).
//!
//! Format rules (`email`, `phone`, `digits`, `matches`) accept empty input so
//! that "missing" and "malformed" stay separate messages; pair them with
//! [`required`] when the field is mandatory.

use std::sync::LazyLock;

use regex::Regex;

use super::error::ValidationError;
use super::schema::FieldRule;

static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern must compile")
});

static PHONE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\+?[0-9][0-9 \-]{5,16}[0-9]$").expect("phone pattern must compile")
});

/// Values that can be "missing" for the purposes of [`required`].
pub trait Presence {
    fn is_present(&self) -> bool;
}

impl Presence for String {
    fn is_present(&self) -> bool {
        !self.trim().is_empty()
    }
}

impl Presence for bool {
    fn is_present(&self) -> bool {
        *self
    }
}

impl<V> Presence for Option<V> {
    fn is_present(&self) -> bool {
        self.is_some()
    }
}

impl<V> Presence for Vec<V> {
    fn is_present(&self) -> bool {
        !self.is_empty()
    }
}

fn fail<E: ValidationError>(rule: &'static str, message: &str) -> Result<(), E> {
    Err(E::from_rule(rule, message.to_string()))
}

#[derive(Clone, Debug)]
pub struct Required {
    message: String,
}

pub fn required(message: impl Into<String>) -> Required {
    Required {
        message: message.into(),
    }
}

impl<V, C, E> FieldRule<V, C, E> for Required
where
    V: Presence,
    E: ValidationError,
{
    fn check(&self, value: &V, _context: &C) -> Result<(), E> {
        if value.is_present() {
            Ok(())
        } else {
            fail("required", &self.message)
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum LengthBound {
    Min(usize),
    Max(usize),
    Exact(usize),
}

/// Character-count bound on a text value.
#[derive(Clone, Debug)]
pub struct Length {
    bound: LengthBound,
    message: String,
}

pub fn min_length(min: usize, message: impl Into<String>) -> Length {
    Length {
        bound: LengthBound::Min(min),
        message: message.into(),
    }
}

pub fn max_length(max: usize, message: impl Into<String>) -> Length {
    Length {
        bound: LengthBound::Max(max),
        message: message.into(),
    }
}

pub fn exact_length(len: usize, message: impl Into<String>) -> Length {
    Length {
        bound: LengthBound::Exact(len),
        message: message.into(),
    }
}

impl<V, C, E> FieldRule<V, C, E> for Length
where
    V: AsRef<str>,
    E: ValidationError,
{
    fn check(&self, value: &V, _context: &C) -> Result<(), E> {
        let count = value.as_ref().chars().count();
        let ok = match self.bound {
            LengthBound::Min(min) => count >= min,
            LengthBound::Max(max) => count <= max,
            LengthBound::Exact(len) => count == len,
        };
        if ok {
            Ok(())
        } else {
            fail(length_rule_name(self.bound), &self.message)
        }
    }
}

fn length_rule_name(bound: LengthBound) -> &'static str {
    match bound {
        LengthBound::Min(_) => "min_length",
        LengthBound::Max(_) => "max_length",
        LengthBound::Exact(_) => "exact_length",
    }
}

/// Exactly `count` ASCII digits, e.g. a one-time passcode.
#[derive(Clone, Debug)]
pub struct Digits {
    count: usize,
    message: String,
}

pub fn digits(count: usize, message: impl Into<String>) -> Digits {
    Digits {
        count,
        message: message.into(),
    }
}

impl<V, C, E> FieldRule<V, C, E> for Digits
where
    V: AsRef<str>,
    E: ValidationError,
{
    fn check(&self, value: &V, _context: &C) -> Result<(), E> {
        let value = value.as_ref();
        if value.is_empty()
            || (value.len() == self.count && value.bytes().all(|byte| byte.is_ascii_digit()))
        {
            Ok(())
        } else {
            fail("digits", &self.message)
        }
    }
}

#[derive(Clone, Debug)]
pub struct Matches {
    rule: &'static str,
    pattern: Regex,
    message: String,
}

pub fn email(message: impl Into<String>) -> Matches {
    Matches {
        rule: "email",
        pattern: EMAIL_PATTERN.clone(),
        message: message.into(),
    }
}

pub fn phone(message: impl Into<String>) -> Matches {
    Matches {
        rule: "phone",
        pattern: PHONE_PATTERN.clone(),
        message: message.into(),
    }
}

pub fn matches(pattern: &str, message: impl Into<String>) -> Result<Matches, regex::Error> {
    Ok(matches_regex(Regex::new(pattern)?, message))
}

pub fn matches_regex(pattern: Regex, message: impl Into<String>) -> Matches {
    Matches {
        rule: "matches",
        pattern,
        message: message.into(),
    }
}

impl<V, C, E> FieldRule<V, C, E> for Matches
where
    V: AsRef<str>,
    E: ValidationError,
{
    fn check(&self, value: &V, _context: &C) -> Result<(), E> {
        let value = value.as_ref().trim();
        if value.is_empty() || self.pattern.is_match(value) {
            Ok(())
        } else {
            fail(self.rule, &self.message)
        }
    }
}

#[derive(Clone, Debug)]
pub struct OneOf<V> {
    allowed: Vec<V>,
    message: String,
}

pub fn one_of<V>(allowed: impl IntoIterator<Item = V>, message: impl Into<String>) -> OneOf<V> {
    OneOf {
        allowed: allowed.into_iter().collect(),
        message: message.into(),
    }
}

impl<V, C, E> FieldRule<V, C, E> for OneOf<V>
where
    V: PartialEq + Send + Sync,
    E: ValidationError,
{
    fn check(&self, value: &V, _context: &C) -> Result<(), E> {
        if self.allowed.contains(value) {
            Ok(())
        } else {
            fail("one_of", &self.message)
        }
    }
}

/// Runs `rule` only while `predicate` holds for the form context, e.g. a
/// confirm-password rule that only applies in sign-up mode.
pub struct When<P, R> {
    predicate: P,
    rule: R,
}

pub fn when<P, R>(predicate: P, rule: R) -> When<P, R> {
    When { predicate, rule }
}

impl<V, C, E, P, R> FieldRule<V, C, E> for When<P, R>
where
    E: ValidationError,
    P: Fn(&C) -> bool + Send + Sync,
    R: FieldRule<V, C, E>,
{
    fn check(&self, value: &V, context: &C) -> Result<(), E> {
        if (self.predicate)(context) {
            self.rule.check(value, context)
        } else {
            Ok(())
        }
    }
}
