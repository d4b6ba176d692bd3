//! Local donor rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use donorsync_core::{Address, CoupleNames, DonorId, OrganizationId, ScopedExternalId};

/// Mutable donor columns, compared and written as a unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DonorFields {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Address,
    pub is_couple: bool,
    pub couple: CoupleNames,
}

impl DonorFields {
    /// Column names, in table order.
    pub const COLUMNS: [&'static str; 15] = [
        "first_name",
        "last_name",
        "display_name",
        "email",
        "phone",
        "street",
        "city",
        "state",
        "postal_code",
        "country",
        "is_couple",
        "his_first_name",
        "his_last_name",
        "her_first_name",
        "her_last_name",
    ];
}

/// A stored donor.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct DonorRow {
    pub id: Uuid,
    pub organization_id: Uuid,
    /// Scoped external id; `None` for donors created locally and not yet pushed.
    pub external_id: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub street: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    pub is_couple: bool,
    pub his_first_name: Option<String>,
    pub his_last_name: Option<String>,
    pub her_first_name: Option<String>,
    pub her_last_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DonorRow {
    #[must_use]
    pub fn donor_id(&self) -> DonorId {
        DonorId::from_uuid(self.id)
    }

    #[must_use]
    pub fn org_id(&self) -> OrganizationId {
        OrganizationId::from_uuid(self.organization_id)
    }

    #[must_use]
    pub fn address(&self) -> Address {
        Address {
            street: self.street.clone(),
            city: self.city.clone(),
            state: self.state.clone(),
            postal_code: self.postal_code.clone(),
            country: self.country.clone(),
        }
    }

    #[must_use]
    pub fn couple(&self) -> CoupleNames {
        CoupleNames {
            his_first_name: self.his_first_name.clone(),
            his_last_name: self.his_last_name.clone(),
            her_first_name: self.her_first_name.clone(),
            her_last_name: self.her_last_name.clone(),
        }
    }

    /// Current values of the mutable columns.
    #[must_use]
    pub fn fields(&self) -> DonorFields {
        DonorFields {
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            display_name: self.display_name.clone(),
            email: self.email.clone(),
            phone: self.phone.clone(),
            address: self.address(),
            is_couple: self.is_couple,
            couple: self.couple(),
        }
    }

    /// Overwrite only the named columns.
    pub fn apply_changed(&mut self, fields: DonorFields, changed: &[&str]) {
        let writes = |column: &str| changed.iter().any(|c| *c == column);
        if writes("first_name") {
            self.first_name = fields.first_name;
        }
        if writes("last_name") {
            self.last_name = fields.last_name;
        }
        if writes("display_name") {
            self.display_name = fields.display_name;
        }
        if writes("email") {
            self.email = fields.email;
        }
        if writes("phone") {
            self.phone = fields.phone;
        }
        if writes("street") {
            self.street = fields.address.street;
        }
        if writes("city") {
            self.city = fields.address.city;
        }
        if writes("state") {
            self.state = fields.address.state;
        }
        if writes("postal_code") {
            self.postal_code = fields.address.postal_code;
        }
        if writes("country") {
            self.country = fields.address.country;
        }
        if writes("is_couple") {
            self.is_couple = fields.is_couple;
        }
        if writes("his_first_name") {
            self.his_first_name = fields.couple.his_first_name;
        }
        if writes("his_last_name") {
            self.his_last_name = fields.couple.his_last_name;
        }
        if writes("her_first_name") {
            self.her_first_name = fields.couple.her_first_name;
        }
        if writes("her_last_name") {
            self.her_last_name = fields.couple.her_last_name;
        }
    }

    /// Overwrite the mutable columns.
    pub fn apply(&mut self, fields: DonorFields) {
        self.first_name = fields.first_name;
        self.last_name = fields.last_name;
        self.display_name = fields.display_name;
        self.email = fields.email;
        self.phone = fields.phone;
        self.street = fields.address.street;
        self.city = fields.address.city;
        self.state = fields.address.state;
        self.postal_code = fields.address.postal_code;
        self.country = fields.address.country;
        self.is_couple = fields.is_couple;
        self.his_first_name = fields.couple.his_first_name;
        self.his_last_name = fields.couple.his_last_name;
        self.her_first_name = fields.couple.her_first_name;
        self.her_last_name = fields.couple.her_last_name;
    }
}

/// A donor to insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDonor {
    pub id: DonorId,
    pub organization_id: OrganizationId,
    pub external_id: ScopedExternalId,
    pub fields: DonorFields,
}

impl NewDonor {
    #[must_use]
    pub fn new(
        organization_id: OrganizationId,
        external_id: ScopedExternalId,
        fields: DonorFields,
    ) -> Self {
        Self {
            id: DonorId::new(),
            organization_id,
            external_id,
            fields,
        }
    }
}

/// An update to an existing donor.
///
/// Only the columns named in `changed` are written; other values in
/// `fields` are ignored, so concurrent edits to those columns survive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DonorUpdate {
    pub id: DonorId,
    pub fields: DonorFields,
    pub changed: Vec<&'static str>,
}
