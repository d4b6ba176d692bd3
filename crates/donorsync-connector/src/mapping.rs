//! Field mapping helpers.
//!
//! Pure, deterministic transforms used by adapters to turn vendor payloads
//! into canonical records. Nothing here touches the network or storage.

use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::LazyLock;

use donorsync_core::{Address, CoupleNames};

use crate::error::{ConnectorError, ConnectorResult};

/// Maximum column lengths in local storage.
///
/// Must match the migration in `donorsync-db`.
pub struct FieldLimits;

impl FieldLimits {
    pub const NAME: usize = 255;
    pub const EMAIL: usize = 255;
    pub const PHONE: usize = 50;
    pub const STREET: usize = 500;
    pub const CITY: usize = 100;
    pub const STATE: usize = 100;
    pub const POSTAL_CODE: usize = 20;
    pub const COUNTRY: usize = 100;
    pub const DESCRIPTION: usize = 2000;
    pub const DESIGNATION: usize = 255;
    pub const TAG: usize = 100;
}

/// Default currency when neither vendor nor configuration supplies one.
pub const DEFAULT_CURRENCY: &str = "USD";

/// Trim a vendor value; blank becomes `None`.
#[must_use]
pub fn normalize(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
}

/// Truncate to at most `max` bytes on a char boundary.
#[must_use]
pub fn truncate(value: &str, max: usize) -> String {
    if value.len() <= max {
        return value.to_string();
    }
    let mut cut = max;
    while !value.is_char_boundary(cut) {
        cut -= 1;
    }
    value[..cut].to_string()
}

/// [`normalize`] then [`truncate`].
#[must_use]
pub fn clean(value: Option<&str>, max: usize) -> Option<String> {
    normalize(value).map(|v| truncate(&v, max))
}

/// Prefer an explicit display name, otherwise "first last".
#[must_use]
pub fn derive_display_name(
    display: Option<&str>,
    first: Option<&str>,
    last: Option<&str>,
) -> Option<String> {
    if let Some(display) = normalize(display) {
        return Some(truncate(&display, FieldLimits::NAME));
    }
    let joined = [normalize(first), normalize(last)]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ");
    if joined.is_empty() {
        None
    } else {
        Some(truncate(&joined, FieldLimits::NAME))
    }
}

/// Result of interpreting a household/organization name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HouseholdName {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub display_name: Option<String>,
    pub is_couple: bool,
    pub couple: CoupleNames,
}

/// "John and Jane Smith", "John Smith and Jane Doe", "John & Jane".
///
/// The pattern is a constant; failing to compile it is a programming error.
static COUPLE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<a>[^&]+?)\s+(?:and|&)\s+(?P<b>.+)$")
        .expect("COUPLE_PATTERN is a valid regex pattern")
});

/// Split a household name such as "John and Jane Smith Household".
///
/// Recognized shapes (the trailing " Household" is optional):
/// - `A and B Surname` / `A & B Surname`: both partners share the surname
/// - `A Surname1 and B Surname2`: each partner keeps their own surname
/// - `A and B`: no surname
///
/// Anything else becomes a single non-couple donor whose first and display
/// name are the whole string.
#[must_use]
pub fn split_household_name(name: &str) -> HouseholdName {
    let trimmed = name.trim();
    let base = trimmed
        .strip_suffix(" Household")
        .or_else(|| trimmed.strip_suffix(" household"))
        .unwrap_or(trimmed)
        .trim();

    let single = || HouseholdName {
        first_name: clean(Some(base), FieldLimits::NAME),
        last_name: None,
        display_name: clean(Some(base), FieldLimits::NAME),
        is_couple: false,
        couple: CoupleNames::default(),
    };

    let Some(captures) = COUPLE_PATTERN.captures(base) else {
        return single();
    };
    let (Some(a), Some(b)) = (captures.name("a"), captures.name("b")) else {
        return single();
    };

    let a_parts: Vec<&str> = a.as_str().split_whitespace().collect();
    let b_parts: Vec<&str> = b.as_str().split_whitespace().collect();
    if a_parts.is_empty() || b_parts.is_empty() || a_parts.len() > 2 || b_parts.len() > 2 {
        return single();
    }

    let (his_first, his_last) = match a_parts.as_slice() {
        [first] => (*first, None),
        [first, last] => (*first, Some(*last)),
        _ => return single(),
    };
    let (her_first, her_last) = match b_parts.as_slice() {
        [first] => (*first, None),
        [first, last] => (*first, Some(*last)),
        _ => return single(),
    };
    // "John and Jane Smith": the surname after the second partner is shared.
    let his_last = his_last.or(her_last);

    let couple = CoupleNames {
        his_first_name: clean(Some(his_first), FieldLimits::NAME),
        his_last_name: clean(his_last, FieldLimits::NAME),
        her_first_name: clean(Some(her_first), FieldLimits::NAME),
        her_last_name: clean(her_last, FieldLimits::NAME),
    };

    HouseholdName {
        first_name: couple.his_first_name.clone(),
        last_name: couple.his_last_name.clone().or(couple.her_last_name.clone()),
        display_name: clean(Some(base), FieldLimits::NAME),
        is_couple: true,
        couple,
    }
}

/// Build an address, normalizing and truncating every component.
#[must_use]
pub fn build_address(
    street: Option<&str>,
    city: Option<&str>,
    state: Option<&str>,
    postal_code: Option<&str>,
    country: Option<&str>,
) -> Address {
    Address {
        street: clean(street, FieldLimits::STREET),
        city: clean(city, FieldLimits::CITY),
        state: clean(state, FieldLimits::STATE),
        postal_code: clean(postal_code, FieldLimits::POSTAL_CODE),
        country: clean(country, FieldLimits::COUNTRY),
    }
}

/// Join the non-empty address components with `", "`.
#[must_use]
pub fn format_address(address: &Address) -> Option<String> {
    let parts: Vec<&str> = [
        &address.street,
        &address.city,
        &address.state,
        &address.postal_code,
        &address.country,
    ]
    .into_iter()
    .filter_map(|p| p.as_deref())
    .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(", "))
    }
}

/// Split a flattened address on `", "` positionally.
///
/// Known limitation: a component that itself contains `", "` (e.g.
/// "Suite 4, 12 Main St") shifts every following component. The split is
/// kept positional rather than guessed.
#[must_use]
pub fn parse_address(value: &str) -> Address {
    let mut parts = value.split(", ").map(|p| normalize(Some(p)));
    Address {
        street: parts.next().flatten(),
        city: parts.next().flatten(),
        state: parts.next().flatten(),
        postal_code: parts.next().flatten(),
        country: parts.next().flatten(),
    }
}

/// Convert a major-unit amount to minor units, rounding half away from zero.
pub fn to_minor_units(amount: f64) -> ConnectorResult<i64> {
    if !amount.is_finite() {
        return Err(ConnectorError::invalid_data(format!(
            "amount is not a finite number: {amount}"
        )));
    }
    let cents = (amount * 100.0).round();
    if cents.abs() > i64::MAX as f64 {
        return Err(ConnectorError::invalid_data(format!(
            "amount out of range: {amount}"
        )));
    }
    Ok(cents as i64)
}

/// Convert minor units back to a major-unit amount for uploads.
#[must_use]
pub fn from_minor_units(minor: i64) -> f64 {
    minor as f64 / 100.0
}

/// Upper-cased ISO 4217 code, or `default` when absent or malformed.
#[must_use]
pub fn resolve_currency(value: Option<&str>, default: &str) -> String {
    match normalize(value) {
        Some(code) if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) => {
            code.to_ascii_uppercase()
        }
        _ => default.to_ascii_uppercase(),
    }
}

/// First non-`None` date in priority order.
#[must_use]
pub fn first_present_date<I>(candidates: I) -> Option<DateTime<Utc>>
where
    I: IntoIterator<Item = Option<DateTime<Utc>>>,
{
    candidates.into_iter().flatten().next()
}

/// Parse either an RFC 3339 timestamp or a bare `YYYY-MM-DD` date (midnight UTC).
///
/// Vendors also emit `+0000` offsets without a colon, which are accepted.
#[must_use]
pub fn parse_vendor_datetime(value: Option<&str>) -> Option<DateTime<Utc>> {
    let value = normalize(value)?;
    if let Ok(dt) = DateTime::parse_from_rfc3339(&value) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(&value, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(dt.with_timezone(&Utc));
    }
    chrono::NaiveDate::parse_from_str(&value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(Some("  a ")), Some("a".to_string()));
        assert_eq!(normalize(Some("   ")), None);
        assert_eq!(normalize(None), None);
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        assert_eq!(truncate("abcdef", 3), "abc");
        assert_eq!(truncate("ééé", 3), "é");
        assert_eq!(truncate("short", 50), "short");
    }

    #[test]
    fn test_display_name_priority() {
        assert_eq!(
            derive_display_name(Some("Dr. Jane"), Some("Jane"), Some("Doe")),
            Some("Dr. Jane".to_string())
        );
        assert_eq!(
            derive_display_name(None, Some("Jane"), Some("Doe")),
            Some("Jane Doe".to_string())
        );
        assert_eq!(
            derive_display_name(Some(" "), None, Some("Doe")),
            Some("Doe".to_string())
        );
        assert_eq!(derive_display_name(None, None, None), None);
    }

    #[test]
    fn test_split_household_shared_surname() {
        let name = split_household_name("John and Jane Smith Household");
        assert!(name.is_couple);
        assert_eq!(name.couple.his_first_name.as_deref(), Some("John"));
        assert_eq!(name.couple.his_last_name.as_deref(), Some("Smith"));
        assert_eq!(name.couple.her_first_name.as_deref(), Some("Jane"));
        assert_eq!(name.couple.her_last_name.as_deref(), Some("Smith"));
        assert_eq!(name.display_name.as_deref(), Some("John and Jane Smith"));
    }

    #[test]
    fn test_split_household_separate_surnames() {
        let name = split_household_name("John Smith & Jane Doe");
        assert!(name.is_couple);
        assert_eq!(name.couple.his_last_name.as_deref(), Some("Smith"));
        assert_eq!(name.couple.her_last_name.as_deref(), Some("Doe"));
    }

    #[test]
    fn test_split_household_no_match_is_single_donor() {
        let name = split_household_name("Acme Foundation");
        assert!(!name.is_couple);
        assert_eq!(name.first_name.as_deref(), Some("Acme Foundation"));
        assert_eq!(name.display_name.as_deref(), Some("Acme Foundation"));
        assert_eq!(name.couple, CoupleNames::default());
    }

    #[test]
    fn test_split_household_long_sides_is_single_donor() {
        let name = split_household_name("Friends of the Library and Museum Trust");
        assert!(!name.is_couple);
    }

    #[test]
    fn test_address_format_and_parse() {
        let address = build_address(
            Some("12 Main St"),
            Some("Springfield"),
            Some("IL"),
            Some("62701"),
            Some("USA"),
        );
        let flat = format_address(&address).unwrap();
        assert_eq!(flat, "12 Main St, Springfield, IL, 62701, USA");
        assert_eq!(parse_address(&flat), address);
        assert_eq!(format_address(&Address::default()), None);
    }

    #[test]
    fn test_parse_address_is_lossy_for_embedded_commas() {
        let parsed = parse_address("Suite 4, 12 Main St, Springfield");
        assert_eq!(parsed.street.as_deref(), Some("Suite 4"));
        assert_eq!(parsed.city.as_deref(), Some("12 Main St"));
    }

    #[test]
    fn test_to_minor_units_rounds() {
        assert_eq!(to_minor_units(10.0).unwrap(), 1000);
        assert_eq!(to_minor_units(19.999).unwrap(), 2000);
        assert_eq!(to_minor_units(0.125).unwrap(), 13);
        assert_eq!(to_minor_units(-5.5).unwrap(), -550);
        assert!(to_minor_units(f64::NAN).is_err());
        assert!(to_minor_units(f64::INFINITY).is_err());
    }

    #[test]
    fn test_resolve_currency() {
        assert_eq!(resolve_currency(Some("eur"), "USD"), "EUR");
        assert_eq!(resolve_currency(None, "usd"), "USD");
        assert_eq!(resolve_currency(Some("dollars"), "CAD"), "CAD");
    }

    #[test]
    fn test_first_present_date() {
        let a = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap();
        assert_eq!(first_present_date([None, Some(a), Some(b)]), Some(a));
        assert_eq!(first_present_date([None, None]), None);
    }

    #[test]
    fn test_parse_vendor_datetime() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 15, 0, 0, 0).unwrap();
        assert_eq!(parse_vendor_datetime(Some("2024-03-15")), Some(expected));
        assert_eq!(
            parse_vendor_datetime(Some("2024-03-15T00:00:00.000+0000")),
            Some(expected)
        );
        assert_eq!(
            parse_vendor_datetime(Some("2024-03-15T00:00:00Z")),
            Some(expected)
        );
        assert_eq!(parse_vendor_datetime(Some("yesterday")), None);
    }
}
