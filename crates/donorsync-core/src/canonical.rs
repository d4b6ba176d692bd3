//! Provider-agnostic canonical records.
//!
//! Canonical records are transient: a provider adapter produces them from a
//! vendor payload and the batch upserter consumes them right away. Only the
//! local rows derived from them are persisted.
//!
//! Every optional text field is `None` when the vendor sent nothing or a
//! blank string; never `Some("")`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Postal address, split into components.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub street: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
}

impl Address {
    /// True if no component is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.street.is_none()
            && self.city.is_none()
            && self.state.is_none()
            && self.postal_code.is_none()
            && self.country.is_none()
    }
}

/// Name pairs for a couple donor (e.g. a household record).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoupleNames {
    pub his_first_name: Option<String>,
    pub his_last_name: Option<String>,
    pub her_first_name: Option<String>,
    pub her_last_name: Option<String>,
}

/// One fundraising contact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalDonor {
    /// Vendor-native id (unscoped). Empty for local records not yet pushed.
    pub external_id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Address,
    #[serde(default)]
    pub is_couple: bool,
    #[serde(default)]
    pub couple: CoupleNames,
    /// Opaque vendor extras. Not persisted.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl CanonicalDonor {
    /// Create a donor with only the external id set.
    #[must_use]
    pub fn new(external_id: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            first_name: None,
            last_name: None,
            display_name: None,
            email: None,
            phone: None,
            address: Address::default(),
            is_couple: false,
            couple: CoupleNames::default(),
            metadata: serde_json::Value::Null,
        }
    }
}

/// One gift transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalDonation {
    /// Vendor-native id (unscoped).
    pub external_id: String,
    /// Vendor-native id of the donor (unscoped).
    pub donor_external_id: String,
    /// Amount in minor units (e.g. cents).
    pub amount: i64,
    /// ISO 4217 currency code.
    pub currency: String,
    pub date: DateTime<Utc>,
    pub designation: Option<String>,
    /// Vendor-native id of the campaign/project (unscoped).
    pub campaign_external_id: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// A campaign or fund.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalProject {
    /// Vendor-native id (unscoped).
    pub external_id: String,
    pub name: String,
    pub description: Option<String>,
    pub active: bool,
    /// Goal in minor units.
    pub goal: Option<i64>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// A donor returned together with its gifts by a combined fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DonorWithDonations {
    pub donor: CanonicalDonor,
    pub donations: Vec<CanonicalDonation>,
}
