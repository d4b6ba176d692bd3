//! Provider names and scoped external identifiers.
//!
//! Every local record that originates from (or is pushed to) a CRM carries a
//! scoped external id of the form `{provider}_{native_id}`. Two providers may
//! reuse the same native id space, so a native id is never stored or matched
//! on its own.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Maximum length of the `external_id` column in local storage.
pub const EXTERNAL_ID_MAX_LEN: usize = 255;

/// Separator between the provider name and the vendor-native id.
const SEPARATOR: char = '_';

/// Errors raised when building identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentifierError {
    /// Provider name is empty or contains characters outside `[a-z0-9-]`.
    #[error("invalid provider name '{0}': expected lowercase ascii letters, digits or '-'")]
    InvalidProviderName(String),

    /// Vendor-native id is empty.
    #[error("external id is empty")]
    EmptyNativeId,

    /// A stored value does not have the `{provider}_{native}` shape.
    #[error("malformed scoped external id '{0}'")]
    Malformed(String),
}

/// Name of a CRM provider (e.g. `salesforce`).
///
/// Provider names are lowercase ASCII slugs and never contain `_`, which keeps
/// the scoped id unambiguous to split.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProviderName(String);

impl ProviderName {
    /// Validate and wrap a provider name.
    pub fn new(name: impl Into<String>) -> Result<Self, IdentifierError> {
        let name = name.into();
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
        if valid {
            Ok(Self(name))
        } else {
            Err(IdentifierError::InvalidProviderName(name))
        }
    }

    /// Borrow the provider name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ProviderName {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ProviderName {
    type Error = IdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ProviderName> for String {
    fn from(value: ProviderName) -> Self {
        value.0
    }
}

/// A `{provider}_{native_id}` join key between vendor and local records.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopedExternalId(String);

impl ScopedExternalId {
    /// Scope a vendor-native id to its provider.
    ///
    /// The result is truncated on a char boundary to [`EXTERNAL_ID_MAX_LEN`]
    /// bytes.
    pub fn new(provider: &ProviderName, native_id: &str) -> Result<Self, IdentifierError> {
        let native_id = native_id.trim();
        if native_id.is_empty() {
            return Err(IdentifierError::EmptyNativeId);
        }
        let mut scoped = format!("{}{SEPARATOR}{native_id}", provider.as_str());
        truncate_in_place(&mut scoped, EXTERNAL_ID_MAX_LEN);
        Ok(Self(scoped))
    }

    /// Rebuild a scoped id from a value read back from storage.
    pub fn from_stored(value: impl Into<String>) -> Result<Self, IdentifierError> {
        let value = value.into();
        match value.split_once(SEPARATOR) {
            Some((provider, native)) if !native.is_empty() => {
                ProviderName::new(provider)
                    .map_err(|_| IdentifierError::Malformed(value.clone()))?;
                Ok(Self(value))
            }
            _ => Err(IdentifierError::Malformed(value)),
        }
    }

    /// The full scoped value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The provider part.
    #[must_use]
    pub fn provider(&self) -> &str {
        self.0.split_once(SEPARATOR).map_or("", |(p, _)| p)
    }

    /// The vendor-native part (everything after the first separator).
    #[must_use]
    pub fn native_id(&self) -> &str {
        self.0.split_once(SEPARATOR).map_or("", |(_, n)| n)
    }

    /// Whether this id belongs to the given provider.
    #[must_use]
    pub fn is_from(&self, provider: &ProviderName) -> bool {
        self.provider() == provider.as_str()
    }

    /// Consume into the inner string.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ScopedExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn truncate_in_place(value: &mut String, max: usize) {
    if value.len() <= max {
        return;
    }
    let mut cut = max;
    while !value.is_char_boundary(cut) {
        cut -= 1;
    }
    value.truncate(cut);
}
