//! Canonical-to-row conversion and column diffing.
//!
//! Incoming records are first converted to the exact column values that would
//! be stored (trimmed, truncated, dates at storage precision), then compared
//! column by column against the stored row. Comparing post-conversion values
//! keeps a second run over unchanged vendor data free of spurious updates.

use chrono::{DateTime, SubsecRound, Utc};

use donorsync_connector::mapping::{clean, resolve_currency, FieldLimits};
use donorsync_core::{Address, CanonicalDonor, CanonicalProject, CoupleNames};
use donorsync_db::{DonationFields, DonorFields, ProjectFields};

/// Timestamps are stored with microsecond precision.
const STORED_SUBSEC_DIGITS: u16 = 6;

/// Column values for a canonical donor.
#[must_use]
pub fn donor_fields(donor: &CanonicalDonor) -> DonorFields {
    DonorFields {
        first_name: clean(donor.first_name.as_deref(), FieldLimits::NAME),
        last_name: clean(donor.last_name.as_deref(), FieldLimits::NAME),
        display_name: clean(donor.display_name.as_deref(), FieldLimits::NAME),
        email: clean(donor.email.as_deref(), FieldLimits::EMAIL),
        phone: clean(donor.phone.as_deref(), FieldLimits::PHONE),
        address: stored_address(&donor.address),
        is_couple: donor.is_couple,
        couple: stored_couple(&donor.couple),
    }
}

fn stored_address(address: &Address) -> Address {
    Address {
        street: clean(address.street.as_deref(), FieldLimits::STREET),
        city: clean(address.city.as_deref(), FieldLimits::CITY),
        state: clean(address.state.as_deref(), FieldLimits::STATE),
        postal_code: clean(address.postal_code.as_deref(), FieldLimits::POSTAL_CODE),
        country: clean(address.country.as_deref(), FieldLimits::COUNTRY),
    }
}

fn stored_couple(couple: &CoupleNames) -> CoupleNames {
    CoupleNames {
        his_first_name: clean(couple.his_first_name.as_deref(), FieldLimits::NAME),
        his_last_name: clean(couple.his_last_name.as_deref(), FieldLimits::NAME),
        her_first_name: clean(couple.her_first_name.as_deref(), FieldLimits::NAME),
        her_last_name: clean(couple.her_last_name.as_deref(), FieldLimits::NAME),
    }
}

/// Column values for a canonical project; `None` if it has no usable name.
#[must_use]
pub fn project_fields(project: &CanonicalProject) -> Option<ProjectFields> {
    let name = clean(Some(&project.name), FieldLimits::NAME)?;
    let tags = project
        .tags
        .iter()
        .filter_map(|tag| clean(Some(tag), FieldLimits::TAG))
        .collect();
    Some(ProjectFields {
        name,
        description: clean(project.description.as_deref(), FieldLimits::DESCRIPTION),
        active: project.active,
        goal: project.goal,
        tags,
    })
}

/// Stored currency code for a vendor value.
#[must_use]
pub fn stored_currency(currency: &str, default: &str) -> String {
    resolve_currency(Some(currency), default)
}

/// Stored designation label.
#[must_use]
pub fn stored_designation(designation: Option<&str>) -> Option<String> {
    clean(designation, FieldLimits::DESIGNATION)
}

/// A timestamp at storage precision.
#[must_use]
pub fn stored_instant(value: DateTime<Utc>) -> DateTime<Utc> {
    value.trunc_subsecs(STORED_SUBSEC_DIGITS)
}

fn push_if_changed<T: PartialEq>(
    changed: &mut Vec<&'static str>,
    column: &'static str,
    current: &T,
    incoming: &T,
) {
    if current != incoming {
        changed.push(column);
    }
}

/// Columns whose values differ between the stored and incoming donor.
#[must_use]
pub fn changed_donor_columns(current: &DonorFields, incoming: &DonorFields) -> Vec<&'static str> {
    let mut changed = Vec::new();
    push_if_changed(&mut changed, "first_name", &current.first_name, &incoming.first_name);
    push_if_changed(&mut changed, "last_name", &current.last_name, &incoming.last_name);
    push_if_changed(&mut changed, "display_name", &current.display_name, &incoming.display_name);
    push_if_changed(&mut changed, "email", &current.email, &incoming.email);
    push_if_changed(&mut changed, "phone", &current.phone, &incoming.phone);
    push_if_changed(&mut changed, "street", &current.address.street, &incoming.address.street);
    push_if_changed(&mut changed, "city", &current.address.city, &incoming.address.city);
    push_if_changed(&mut changed, "state", &current.address.state, &incoming.address.state);
    push_if_changed(
        &mut changed,
        "postal_code",
        &current.address.postal_code,
        &incoming.address.postal_code,
    );
    push_if_changed(&mut changed, "country", &current.address.country, &incoming.address.country);
    push_if_changed(&mut changed, "is_couple", &current.is_couple, &incoming.is_couple);
    push_if_changed(
        &mut changed,
        "his_first_name",
        &current.couple.his_first_name,
        &incoming.couple.his_first_name,
    );
    push_if_changed(
        &mut changed,
        "his_last_name",
        &current.couple.his_last_name,
        &incoming.couple.his_last_name,
    );
    push_if_changed(
        &mut changed,
        "her_first_name",
        &current.couple.her_first_name,
        &incoming.couple.her_first_name,
    );
    push_if_changed(
        &mut changed,
        "her_last_name",
        &current.couple.her_last_name,
        &incoming.couple.her_last_name,
    );
    changed
}

#[must_use]
pub fn changed_project_columns(
    current: &ProjectFields,
    incoming: &ProjectFields,
) -> Vec<&'static str> {
    let mut changed = Vec::new();
    push_if_changed(&mut changed, "name", &current.name, &incoming.name);
    push_if_changed(&mut changed, "description", &current.description, &incoming.description);
    push_if_changed(&mut changed, "active", &current.active, &incoming.active);
    push_if_changed(&mut changed, "goal", &current.goal, &incoming.goal);
    push_if_changed(&mut changed, "tags", &current.tags, &incoming.tags);
    changed
}

#[must_use]
pub fn changed_donation_columns(
    current: &DonationFields,
    incoming: &DonationFields,
) -> Vec<&'static str> {
    let mut changed = Vec::new();
    push_if_changed(&mut changed, "donor_id", &current.donor_id, &incoming.donor_id);
    push_if_changed(&mut changed, "project_id", &current.project_id, &incoming.project_id);
    push_if_changed(&mut changed, "amount", &current.amount, &incoming.amount);
    push_if_changed(&mut changed, "currency", &current.currency, &incoming.currency);
    // Instants, not formatted strings.
    push_if_changed(
        &mut changed,
        "date",
        &stored_instant(current.date),
        &stored_instant(incoming.date),
    );
    push_if_changed(&mut changed, "designation", &current.designation, &incoming.designation);
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone};
    use donorsync_core::{DonorId, ProjectId};

    fn donor() -> CanonicalDonor {
        let mut donor = CanonicalDonor::new("003A");
        donor.first_name = Some("Ann".to_string());
        donor.last_name = Some("Doe".to_string());
        donor.email = Some("ann@example.org".to_string());
        donor.address.city = Some("Portland".to_string());
        donor
    }

    #[test]
    fn test_identical_donor_has_no_changes() {
        let fields = donor_fields(&donor());
        assert!(changed_donor_columns(&fields, &donor_fields(&donor())).is_empty());
    }

    #[test]
    fn test_single_field_change_is_reported() {
        let current = donor_fields(&donor());
        let mut incoming = donor();
        incoming.phone = Some("555-0100".to_string());
        assert_eq!(
            changed_donor_columns(&current, &donor_fields(&incoming)),
            vec!["phone"]
        );
    }

    #[test]
    fn test_blank_and_absent_are_equal() {
        let current = donor_fields(&donor());
        let mut incoming = donor();
        incoming.phone = Some("   ".to_string());
        assert!(changed_donor_columns(&current, &donor_fields(&incoming)).is_empty());
    }

    #[test]
    fn test_truncation_applies_before_compare() {
        let mut long = donor();
        long.phone = Some("9".repeat(80));
        let fields = donor_fields(&long);
        assert_eq!(fields.phone.as_ref().map(String::len), Some(FieldLimits::PHONE));
        assert!(changed_donor_columns(&fields, &donor_fields(&long)).is_empty());
    }

    #[test]
    fn test_structured_address_detects_component_moves() {
        let mut a = donor();
        a.address = Address {
            street: Some("1 Main St, Apt 2".to_string()),
            city: Some("Portland".to_string()),
            ..Address::default()
        };
        let mut b = donor();
        b.address = Address {
            street: Some("1 Main St".to_string()),
            city: Some("Apt 2, Portland".to_string()),
            ..Address::default()
        };
        let changed = changed_donor_columns(&donor_fields(&a), &donor_fields(&b));
        assert_eq!(changed, vec!["street", "city"]);
    }

    #[test]
    fn test_donation_dates_compare_instants() {
        let utc = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let offset = FixedOffset::east_opt(3600)
            .unwrap()
            .with_ymd_and_hms(2024, 1, 1, 13, 0, 0)
            .unwrap()
            .with_timezone(&Utc);
        let base = DonationFields {
            donor_id: DonorId::new(),
            project_id: ProjectId::new(),
            amount: 100,
            currency: "USD".to_string(),
            date: utc,
            designation: None,
        };
        let same_instant = DonationFields {
            date: offset,
            ..base.clone()
        };
        assert!(changed_donation_columns(&base, &same_instant).is_empty());

        let nanos = DonationFields {
            date: utc + chrono::Duration::nanoseconds(10),
            ..base.clone()
        };
        assert!(changed_donation_columns(&base, &nanos).is_empty());

        let later = DonationFields {
            date: utc + chrono::Duration::days(1),
            amount: 200,
            ..base.clone()
        };
        assert_eq!(changed_donation_columns(&base, &later), vec!["amount", "date"]);
    }

    #[test]
    fn test_project_without_name_is_rejected() {
        let project = CanonicalProject {
            external_id: "701".to_string(),
            name: "  ".to_string(),
            description: None,
            active: true,
            goal: None,
            tags: vec![],
            metadata: serde_json::Value::Null,
        };
        assert!(project_fields(&project).is_none());
    }

    #[test]
    fn test_project_tags_cleaned() {
        let project = CanonicalProject {
            external_id: "701".to_string(),
            name: "Gala".to_string(),
            description: None,
            active: true,
            goal: Some(500_000),
            tags: vec![" Event ".to_string(), String::new()],
            metadata: serde_json::Value::Null,
        };
        assert_eq!(project_fields(&project).unwrap().tags, vec!["Event"]);
    }

    #[test]
    fn test_stored_designation_truncates() {
        let long = "x".repeat(300);
        assert_eq!(
            stored_designation(Some(&long)).map(|s| s.len()),
            Some(FieldLimits::DESIGNATION)
        );
    }
}
