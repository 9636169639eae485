//! Input normalization for identify requests.
//!
//! # Responsibility
//! - Turn raw `{email?, phoneNumber?}` input into canonical equality keys.
//! - Reject input the reconciler must never see.
//!
//! # Invariants
//! - Normalized emails are trimmed and lowercased.
//! - Normalized phones hold ASCII digits with an optional leading `+`.
//! - A `NormalizedIdentity` always carries at least one field.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

const EMAIL_MIN_CHARS: usize = 5;
const EMAIL_MAX_CHARS: usize = 320;
const EMAIL_LOCAL_MAX_CHARS: usize = 64;
const EMAIL_DOMAIN_MAX_CHARS: usize = 253;
const PHONE_MIN_DIGITS: usize = 6;
const PHONE_MAX_DIGITS: usize = 15;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$"#,
    )
    .expect("valid email regex")
});
static PHONE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+?[0-9\s\-().]{6,20}$").expect("valid phone regex"));

/// Rejected identify input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputError {
    /// Neither email nor phone number survived normalization.
    MissingContactInfo,
    EmailTooShort,
    EmailTooLong,
    InvalidEmailFormat,
    EmailLocalPartTooLong,
    EmailDomainTooLong,
    InvalidEmailDomain,
    PhoneTooFewDigits,
    PhoneTooManyDigits,
    InvalidPhoneCharacters,
}

impl Display for InputError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingContactInfo => {
                write!(f, "at least one of email or phoneNumber must be provided")
            }
            Self::EmailTooShort => {
                write!(f, "email must be at least {EMAIL_MIN_CHARS} characters long")
            }
            Self::EmailTooLong => {
                write!(f, "email must be at most {EMAIL_MAX_CHARS} characters long")
            }
            Self::InvalidEmailFormat => write!(f, "invalid email format"),
            Self::EmailLocalPartTooLong => write!(
                f,
                "email local part must be at most {EMAIL_LOCAL_MAX_CHARS} characters"
            ),
            Self::EmailDomainTooLong => write!(
                f,
                "email domain must be at most {EMAIL_DOMAIN_MAX_CHARS} characters"
            ),
            Self::InvalidEmailDomain => write!(f, "invalid email domain"),
            Self::PhoneTooFewDigits => write!(
                f,
                "phone number must contain at least {PHONE_MIN_DIGITS} digits"
            ),
            Self::PhoneTooManyDigits => write!(
                f,
                "phone number must contain at most {PHONE_MAX_DIGITS} digits"
            ),
            Self::InvalidPhoneCharacters => write!(f, "phone number contains invalid characters"),
        }
    }
}

impl Error for InputError {}

/// Raw identify input as received from an outer layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifyRequest {
    pub email: Option<String>,
    pub phone_number: Option<String>,
}

impl IdentifyRequest {
    pub fn new(email: Option<&str>, phone_number: Option<&str>) -> Self {
        Self {
            email: email.map(str::to_string),
            phone_number: phone_number.map(str::to_string),
        }
    }
}

/// Canonical `(email, phone)` pair accepted by the reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedIdentity {
    email: Option<String>,
    phone_number: Option<String>,
}

impl NormalizedIdentity {
    pub fn new(email: Option<String>, phone_number: Option<String>) -> Result<Self, InputError> {
        if email.is_none() && phone_number.is_none() {
            return Err(InputError::MissingContactInfo);
        }
        Ok(Self {
            email,
            phone_number,
        })
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    pub fn phone_number(&self) -> Option<&str> {
        self.phone_number.as_deref()
    }
}

/// Field-level canonicalization injected into `IdentityService`.
pub trait ContactNormalizer {
    fn normalize_email(&self, raw: &str) -> Result<String, InputError>;
    fn normalize_phone(&self, raw: &str) -> Result<String, InputError>;

    /// Normalizes a whole request. Blank fields count as absent.
    fn normalize(&self, request: &IdentifyRequest) -> Result<NormalizedIdentity, InputError> {
        let email = match non_blank(request.email.as_deref()) {
            Some(raw) => Some(self.normalize_email(raw)?),
            None => None,
        };
        let phone_number = match non_blank(request.phone_number.as_deref()) {
            Some(raw) => Some(self.normalize_phone(raw)?),
            None => None,
        };
        NormalizedIdentity::new(email, phone_number)
    }
}

/// Validating normalizer: lowercased emails, canonical phone numbers.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultNormalizer;

impl ContactNormalizer for DefaultNormalizer {
    fn normalize_email(&self, raw: &str) -> Result<String, InputError> {
        let email = raw.trim().to_lowercase();
        let length = email.chars().count();
        if length < EMAIL_MIN_CHARS {
            return Err(InputError::EmailTooShort);
        }
        if length > EMAIL_MAX_CHARS {
            return Err(InputError::EmailTooLong);
        }
        if !EMAIL_RE.is_match(&email) {
            return Err(InputError::InvalidEmailFormat);
        }

        let (local, domain) = email
            .split_once('@')
            .ok_or(InputError::InvalidEmailFormat)?;
        if local.len() > EMAIL_LOCAL_MAX_CHARS {
            return Err(InputError::EmailLocalPartTooLong);
        }
        if domain.len() > EMAIL_DOMAIN_MAX_CHARS {
            return Err(InputError::EmailDomainTooLong);
        }
        let labels: Vec<&str> = domain.split('.').collect();
        if labels.len() < 2 || labels.iter().any(|label| label.is_empty()) {
            return Err(InputError::InvalidEmailDomain);
        }

        Ok(email)
    }

    fn normalize_phone(&self, raw: &str) -> Result<String, InputError> {
        let trimmed = raw.trim();
        let digits: String = trimmed.chars().filter(char::is_ascii_digit).collect();
        if digits.len() < PHONE_MIN_DIGITS {
            return Err(InputError::PhoneTooFewDigits);
        }
        if digits.len() > PHONE_MAX_DIGITS {
            return Err(InputError::PhoneTooManyDigits);
        }
        if !PHONE_RE.is_match(trimmed) {
            return Err(InputError::InvalidPhoneCharacters);
        }

        if trimmed.starts_with('+') {
            return Ok(format!("+{digits}"));
        }
        // Bare North American numbers gain their country code.
        let canonical = match digits.len() {
            10 => format!("+1{digits}"),
            11 if digits.starts_with('1') => format!("+{digits}"),
            _ => digits,
        };
        Ok(canonical)
    }
}

/// Trim-only normalizer for callers that already validated their input.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughNormalizer;

impl ContactNormalizer for PassthroughNormalizer {
    fn normalize_email(&self, raw: &str) -> Result<String, InputError> {
        Ok(raw.trim().to_string())
    }

    fn normalize_phone(&self, raw: &str) -> Result<String, InputError> {
        Ok(raw.trim().to_string())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !value.trim().is_empty())
}
