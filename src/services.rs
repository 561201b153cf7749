//! Collaborators that form submit handlers call out to: one-time passcode
//! flows and contact lookup. Handlers receive an `Arc<dyn ContactService>`
//! so forms and their tests never depend on a concrete backend.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

const MAX_OTP_ATTEMPTS: u32 = 3;

#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum Contact {
    Email(String),
    Phone(String),
}

impl Contact {
    /// Normalises user input: emails are lowercased, phone numbers keep a
    /// leading `+` and their digits only.
    pub fn parse(input: &str) -> ServiceResult<Self> {
        let input = input.trim();
        if input.contains('@') {
            return Ok(Contact::Email(input.to_lowercase()));
        }

        let mut phone = String::with_capacity(input.len());
        for (index, ch) in input.chars().enumerate() {
            match ch {
                '+' if index == 0 => phone.push(ch),
                '0'..='9' => phone.push(ch),
                ' ' | '-' | '(' | ')' | '.' => {}
                _ => return Err(ServiceError::InvalidContact(input.to_string())),
            }
        }
        if phone.trim_start_matches('+').len() < 7 {
            return Err(ServiceError::InvalidContact(input.to_string()));
        }
        Ok(Contact::Phone(phone))
    }
}

impl Display for Contact {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Contact::Email(email) => f.write_str(email),
            Contact::Phone(phone) => f.write_str(phone),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct ChallengeId(pub u64);

impl Display for ChallengeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct OtpChallenge {
    pub id: ChallengeId,
    pub contact: Contact,
    pub code_length: usize,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ContactProfile {
    pub name: String,
    pub contact: Contact,
}

#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ServiceError {
    #[error("`{0}` is neither an email address nor a phone number")]
    InvalidContact(String),
    #[error("no pending passcode challenge {0}")]
    UnknownChallenge(ChallengeId),
    #[error("too many incorrect passcodes")]
    TooManyAttempts,
    #[error("contact service lock poisoned while {0}")]
    StatePoisoned(&'static str),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

pub type ServiceFuture<'a, T> = Pin<Box<dyn Future<Output = ServiceResult<T>> + Send + 'a>>;

pub trait ContactService: Send + Sync + 'static {
    fn request_otp<'a>(&'a self, contact: &'a Contact) -> ServiceFuture<'a, OtpChallenge>;
    fn verify_otp<'a>(&'a self, challenge: ChallengeId, code: &'a str) -> ServiceFuture<'a, bool>;
    fn find_user_by_contact<'a>(
        &'a self,
        contact: &'a Contact,
    ) -> ServiceFuture<'a, Option<ContactProfile>>;
}

#[derive(Clone, Debug)]
struct IssuedChallenge {
    contact: Contact,
    code: String,
    failed_attempts: u32,
}

/// Local stand-in for the passcode and directory backends. Every challenge
/// is issued with the same configured code.
#[derive(Clone)]
pub struct InMemoryContactService {
    code: Arc<str>,
    next_challenge: Arc<AtomicU64>,
    users: Arc<RwLock<BTreeMap<Contact, ContactProfile>>>,
    challenges: Arc<RwLock<BTreeMap<ChallengeId, IssuedChallenge>>>,
}

impl InMemoryContactService {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: Arc::from(code.into()),
            next_challenge: Arc::new(AtomicU64::new(1)),
            users: Arc::new(RwLock::new(BTreeMap::new())),
            challenges: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    pub fn with_user(self, profile: ContactProfile) -> ServiceResult<Self> {
        self.insert_user(profile)?;
        Ok(self)
    }

    pub fn insert_user(&self, profile: ContactProfile) -> ServiceResult<()> {
        write(&self.users, "registering user")?.insert(profile.contact.clone(), profile);
        Ok(())
    }

    pub fn pending_challenges(&self) -> ServiceResult<usize> {
        Ok(read(&self.challenges, "counting challenges")?.len())
    }
}

impl Default for InMemoryContactService {
    fn default() -> Self {
        Self::new("000000")
    }
}

impl ContactService for InMemoryContactService {
    fn request_otp<'a>(&'a self, contact: &'a Contact) -> ServiceFuture<'a, OtpChallenge> {
        Box::pin(async move {
            let id = ChallengeId(self.next_challenge.fetch_add(1, Ordering::SeqCst));
            write(&self.challenges, "issuing challenge")?.insert(
                id,
                IssuedChallenge {
                    contact: contact.clone(),
                    code: self.code.to_string(),
                    failed_attempts: 0,
                },
            );
            info!(challenge = id.0, %contact, "passcode issued");
            Ok(OtpChallenge {
                id,
                contact: contact.clone(),
                code_length: self.code.chars().count(),
            })
        })
    }

    fn verify_otp<'a>(&'a self, challenge: ChallengeId, code: &'a str) -> ServiceFuture<'a, bool> {
        Box::pin(async move {
            let mut challenges = write(&self.challenges, "verifying passcode")?;
            let Some(issued) = challenges.get_mut(&challenge) else {
                return Err(ServiceError::UnknownChallenge(challenge));
            };
            if issued.code == code.trim() {
                debug!(challenge = challenge.0, contact = %issued.contact, "passcode verified");
                challenges.remove(&challenge);
                return Ok(true);
            }

            issued.failed_attempts += 1;
            if issued.failed_attempts >= MAX_OTP_ATTEMPTS {
                challenges.remove(&challenge);
                return Err(ServiceError::TooManyAttempts);
            }
            Ok(false)
        })
    }

    fn find_user_by_contact<'a>(
        &'a self,
        contact: &'a Contact,
    ) -> ServiceFuture<'a, Option<ContactProfile>> {
        Box::pin(async move { Ok(read(&self.users, "looking up user")?.get(contact).cloned()) })
    }
}

fn read<'a, T>(
    lock: &'a RwLock<T>,
    context: &'static str,
) -> ServiceResult<RwLockReadGuard<'a, T>> {
    lock.read().map_err(|_| ServiceError::StatePoisoned(context))
}

fn write<'a, T>(
    lock: &'a RwLock<T>,
    context: &'static str,
) -> ServiceResult<RwLockWriteGuard<'a, T>> {
    lock.write().map_err(|_| ServiceError::StatePoisoned(context))
}
