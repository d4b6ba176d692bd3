//! Salesforce NPSP record shapes and their canonical mappings.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use donorsync_connector::mapping::{
    build_address, clean, derive_display_name, first_present_date, from_minor_units, normalize,
    parse_vendor_datetime, resolve_currency, split_household_name, to_minor_units, FieldLimits,
};
use donorsync_connector::ConnectorResult;
use donorsync_core::{CanonicalDonation, CanonicalDonor, CanonicalProject};

/// SOQL field lists. Kept next to the structs they deserialize into.
pub const CONTACT_FIELDS: &str = "Id, FirstName, LastName, Name, Email, Phone, \
    MailingStreet, MailingCity, MailingState, MailingPostalCode, MailingCountry";

pub const HOUSEHOLD_FIELDS: &str = "Id, Name, npo02__Formal_Greeting__c, \
    BillingStreet, BillingCity, BillingState, BillingPostalCode, BillingCountry";

pub const OPPORTUNITY_FIELDS: &str =
    "Id, Amount, CloseDate, CreatedDate, Type, AccountId, CampaignId, npsp__Primary_Contact__c";

pub const CAMPAIGN_FIELDS: &str = "Id, Name, Description, IsActive, ExpectedRevenue, Type";

/// Value of `npe01__SYSTEM_AccountType__c` on household accounts.
pub const HOUSEHOLD_ACCOUNT_TYPE: &str = "Household Account";

/// Response of `GET /query` and `GET {nextRecordsUrl}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse<T> {
    #[serde(default)]
    pub total_size: u64,
    pub done: bool,
    #[serde(default = "Vec::new")]
    pub records: Vec<T>,
    #[serde(default)]
    pub next_records_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SfContact {
    pub id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub mailing_street: Option<String>,
    pub mailing_city: Option<String>,
    pub mailing_state: Option<String>,
    pub mailing_postal_code: Option<String>,
    pub mailing_country: Option<String>,
    /// Present only for the combined query's nested sub-select.
    #[serde(default)]
    pub opportunities: Option<QueryResponse<SfOpportunity>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SfHousehold {
    pub id: String,
    pub name: Option<String>,
    #[serde(rename = "npo02__Formal_Greeting__c")]
    pub formal_greeting: Option<String>,
    pub billing_street: Option<String>,
    pub billing_city: Option<String>,
    pub billing_state: Option<String>,
    pub billing_postal_code: Option<String>,
    pub billing_country: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SfOpportunity {
    pub id: String,
    pub amount: Option<f64>,
    #[serde(default)]
    pub currency_iso_code: Option<String>,
    pub close_date: Option<String>,
    pub created_date: Option<String>,
    #[serde(rename = "Type")]
    pub opportunity_type: Option<String>,
    pub account_id: Option<String>,
    pub campaign_id: Option<String>,
    #[serde(rename = "npsp__Primary_Contact__c")]
    pub primary_contact: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SfCampaign {
    pub id: String,
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub is_active: bool,
    pub expected_revenue: Option<f64>,
    #[serde(rename = "Type")]
    pub campaign_type: Option<String>,
}

/// Result of a create call (`POST /sobjects/{type}`).
#[derive(Debug, Clone, Deserialize)]
pub struct CreateResponse {
    pub id: String,
    #[serde(default)]
    pub success: bool,
}

/// Map an individual contact.
#[must_use]
pub fn map_contact(contact: &SfContact) -> CanonicalDonor {
    let mut donor = CanonicalDonor::new(contact.id.trim());
    donor.first_name = clean(contact.first_name.as_deref(), FieldLimits::NAME);
    donor.last_name = clean(contact.last_name.as_deref(), FieldLimits::NAME);
    donor.display_name = derive_display_name(
        contact.name.as_deref(),
        contact.first_name.as_deref(),
        contact.last_name.as_deref(),
    );
    donor.email = clean(contact.email.as_deref(), FieldLimits::EMAIL);
    donor.phone = clean(contact.phone.as_deref(), FieldLimits::PHONE);
    donor.address = build_address(
        contact.mailing_street.as_deref(),
        contact.mailing_city.as_deref(),
        contact.mailing_state.as_deref(),
        contact.mailing_postal_code.as_deref(),
        contact.mailing_country.as_deref(),
    );
    donor.metadata = json!({ "sobject": "Contact" });
    donor
}

/// Map a household account. The account name is split into couple names.
#[must_use]
pub fn map_household(account: &SfHousehold) -> CanonicalDonor {
    let mut donor = CanonicalDonor::new(account.id.trim());
    let name = account.name.as_deref().unwrap_or_default();
    let split = split_household_name(name);
    donor.first_name = split.first_name;
    donor.last_name = split.last_name;
    donor.display_name = clean(account.formal_greeting.as_deref(), FieldLimits::NAME)
        .or(split.display_name);
    donor.is_couple = split.is_couple;
    donor.couple = split.couple;
    donor.address = build_address(
        account.billing_street.as_deref(),
        account.billing_city.as_deref(),
        account.billing_state.as_deref(),
        account.billing_postal_code.as_deref(),
        account.billing_country.as_deref(),
    );
    donor.metadata = json!({ "sobject": "Account", "household": true });
    donor
}

/// Map a won opportunity.
///
/// `donor_override` is the owning contact's id when the opportunity came from
/// a nested sub-select. Returns `Ok(None)` when the record has no usable
/// date; such gifts are skipped with a warning.
pub fn map_opportunity(
    opportunity: &SfOpportunity,
    default_currency: &str,
    donor_override: Option<&str>,
) -> ConnectorResult<Option<CanonicalDonation>> {
    let date = first_present_date([
        parse_vendor_datetime(opportunity.close_date.as_deref()),
        parse_vendor_datetime(opportunity.created_date.as_deref()),
    ]);
    let Some(date) = date else {
        warn!(opportunity_id = %opportunity.id, "Skipping opportunity without a close or created date");
        return Ok(None);
    };

    // Household gifts have no primary contact; they belong to the account.
    let donor_external_id = donor_override
        .map(ToString::to_string)
        .or_else(|| normalize(opportunity.primary_contact.as_deref()))
        .or_else(|| normalize(opportunity.account_id.as_deref()))
        .unwrap_or_default();

    Ok(Some(CanonicalDonation {
        external_id: opportunity.id.trim().to_string(),
        donor_external_id,
        amount: to_minor_units(opportunity.amount.unwrap_or(0.0))?,
        currency: resolve_currency(opportunity.currency_iso_code.as_deref(), default_currency),
        date,
        designation: clean(
            opportunity.opportunity_type.as_deref(),
            FieldLimits::DESIGNATION,
        ),
        campaign_external_id: normalize(opportunity.campaign_id.as_deref()),
        metadata: json!({ "sobject": "Opportunity" }),
    }))
}

/// Map a campaign.
pub fn map_campaign(campaign: &SfCampaign) -> ConnectorResult<CanonicalProject> {
    let goal = campaign.expected_revenue.map(to_minor_units).transpose()?;
    let name = clean(campaign.name.as_deref(), FieldLimits::NAME)
        .unwrap_or_else(|| format!("Campaign {}", campaign.id.trim()));
    Ok(CanonicalProject {
        external_id: campaign.id.trim().to_string(),
        name,
        description: clean(campaign.description.as_deref(), FieldLimits::DESCRIPTION),
        active: campaign.is_active,
        goal,
        tags: clean(campaign.campaign_type.as_deref(), FieldLimits::TAG)
            .into_iter()
            .collect(),
        metadata: json!({ "sobject": "Campaign" }),
    })
}

/// Body for creating or updating a Contact.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContactPayload {
    pub first_name: Option<String>,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub mailing_street: Option<String>,
    pub mailing_city: Option<String>,
    pub mailing_state: Option<String>,
    pub mailing_postal_code: Option<String>,
    pub mailing_country: Option<String>,
}

impl From<&CanonicalDonor> for ContactPayload {
    fn from(donor: &CanonicalDonor) -> Self {
        // LastName is required on Contact.
        let last_name = donor
            .last_name
            .clone()
            .or_else(|| donor.display_name.clone())
            .or_else(|| donor.first_name.clone())
            .unwrap_or_else(|| "Unknown".to_string());
        Self {
            first_name: donor.first_name.clone(),
            last_name,
            email: donor.email.clone(),
            phone: donor.phone.clone(),
            mailing_street: donor.address.street.clone(),
            mailing_city: donor.address.city.clone(),
            mailing_state: donor.address.state.clone(),
            mailing_postal_code: donor.address.postal_code.clone(),
            mailing_country: donor.address.country.clone(),
        }
    }
}

/// Stage a pushed gift lands in.
pub const CLOSED_WON_STAGE: &str = "Closed Won";

/// Body for creating or updating an Opportunity.
#[must_use]
pub fn opportunity_payload(donation: &CanonicalDonation) -> Value {
    let mut body = json!({
        "Name": format!("Donation {}", donation.date.format("%Y-%m-%d")),
        "Amount": from_minor_units(donation.amount),
        "CloseDate": donation.date.format("%Y-%m-%d").to_string(),
        "StageName": CLOSED_WON_STAGE,
    });
    if !donation.donor_external_id.is_empty() {
        body["npsp__Primary_Contact__c"] = json!(donation.donor_external_id);
    }
    if let Some(campaign) = &donation.campaign_external_id {
        body["CampaignId"] = json!(campaign);
    }
    if let Some(designation) = &donation.designation {
        body["Type"] = json!(designation);
    }
    body
}

/// Body for creating or updating a Campaign.
#[must_use]
pub fn campaign_payload(project: &CanonicalProject) -> Value {
    json!({
        "Name": project.name,
        "Description": project.description,
        "IsActive": project.active,
        "ExpectedRevenue": project.goal.map(from_minor_units),
    })
}
