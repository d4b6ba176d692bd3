//! Local donation rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use donorsync_core::{DonationId, DonorId, OrganizationId, ProjectId, ScopedExternalId};

/// Mutable donation columns, including the resolved foreign keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DonationFields {
    pub donor_id: DonorId,
    pub project_id: ProjectId,
    /// Minor units.
    pub amount: i64,
    pub currency: String,
    pub date: DateTime<Utc>,
    pub designation: Option<String>,
}

impl DonationFields {
    /// Column names, in table order.
    pub const COLUMNS: [&'static str; 6] =
        ["donor_id", "project_id", "amount", "currency", "date", "designation"];
}

/// A stored donation.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct DonationRow {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub external_id: Option<String>,
    pub donor_id: Uuid,
    pub project_id: Uuid,
    pub amount: i64,
    pub currency: String,
    pub date: DateTime<Utc>,
    pub designation: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DonationRow {
    #[must_use]
    pub fn donation_id(&self) -> DonationId {
        DonationId::from_uuid(self.id)
    }

    #[must_use]
    pub fn fields(&self) -> DonationFields {
        DonationFields {
            donor_id: DonorId::from_uuid(self.donor_id),
            project_id: ProjectId::from_uuid(self.project_id),
            amount: self.amount,
            currency: self.currency.clone(),
            date: self.date,
            designation: self.designation.clone(),
        }
    }

    /// Overwrite only the named columns.
    pub fn apply_changed(&mut self, fields: DonationFields, changed: &[&str]) {
        let writes = |column: &str| changed.iter().any(|c| *c == column);
        if writes("donor_id") {
            self.donor_id = fields.donor_id.into_uuid();
        }
        if writes("project_id") {
            self.project_id = fields.project_id.into_uuid();
        }
        if writes("amount") {
            self.amount = fields.amount;
        }
        if writes("currency") {
            self.currency = fields.currency;
        }
        if writes("date") {
            self.date = fields.date;
        }
        if writes("designation") {
            self.designation = fields.designation;
        }
    }

    pub fn apply(&mut self, fields: DonationFields) {
        self.donor_id = fields.donor_id.into_uuid();
        self.project_id = fields.project_id.into_uuid();
        self.amount = fields.amount;
        self.currency = fields.currency;
        self.date = fields.date;
        self.designation = fields.designation;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDonation {
    pub id: DonationId,
    pub organization_id: OrganizationId,
    pub external_id: ScopedExternalId,
    pub fields: DonationFields,
}

impl NewDonation {
    #[must_use]
    pub fn new(
        organization_id: OrganizationId,
        external_id: ScopedExternalId,
        fields: DonationFields,
    ) -> Self {
        Self {
            id: DonationId::new(),
            organization_id,
            external_id,
            fields,
        }
    }
}

/// An update to an existing donation; only `changed` columns are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DonationUpdate {
    pub id: DonationId,
    pub fields: DonationFields,
    pub changed: Vec<&'static str>,
}
