//! Query parameters and headers for each kind of fetch.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};

/// System URI of hashed beneficiary identifiers.
pub const MBI_HASH_SYSTEM: &str = "https://bluebutton.cms.gov/resources/identifier/mbi-hash";

pub const FHIR_JSON: &str = "application/fhir+json";

/// Optional service-date bounds for benefit records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClaimsWindow {
    pub lower: Option<NaiveDate>,
    pub upper: Option<NaiveDate>,
}

impl ClaimsWindow {
    pub fn new(lower: Option<NaiveDate>, upper: Option<NaiveDate>) -> Self {
        Self { lower, upper }
    }

    fn params(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if let Some(lower) = self.lower {
            params.push(("service-date".into(), format!("ge{}", lower.format("%Y-%m-%d"))));
        }
        if let Some(upper) = self.upper {
            params.push(("service-date".into(), format!("le{}", upper.format("%Y-%m-%d"))));
        }
        params
    }
}

/// The resource a search targets; decides the subject parameter and
/// inclusion headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchKind {
    Patient,
    Coverage,
    ExplanationOfBenefit,
}

impl SearchKind {
    pub fn resource(&self) -> &'static str {
        match self {
            Self::Patient => "Patient",
            Self::Coverage => "Coverage",
            Self::ExplanationOfBenefit => "ExplanationOfBenefit",
        }
    }

    fn subject_param(&self) -> &'static str {
        match self {
            Self::Patient => "_id",
            Self::Coverage => "beneficiary",
            Self::ExplanationOfBenefit => "patient",
        }
    }

    /// Inclusion headers specific to this resource.
    pub fn headers(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            Self::Patient => &[("IncludeAddressFields", "true")],
            Self::Coverage => &[],
            Self::ExplanationOfBenefit => &[("IncludeTaxNumbers", "true")],
        }
    }
}

/// Upper `_lastUpdated` bound at nanosecond precision.
pub fn last_updated_upper(as_of: DateTime<Utc>) -> String {
    format!("le{}", as_of.to_rfc3339_opts(SecondsFormat::Nanos, true))
}

/// Parameters of a subject search.
///
/// `since` is only honoured when it is already a lower bound (`gt...`).
pub fn search_params(
    kind: SearchKind,
    subject_id: &str,
    since: Option<&str>,
    as_of: DateTime<Utc>,
    window: Option<&ClaimsWindow>,
    page_size: u32,
) -> Vec<(String, String)> {
    let mut params = vec![
        (kind.subject_param().to_string(), subject_id.to_string()),
        ("_format".to_string(), FHIR_JSON.to_string()),
        ("_lastUpdated".to_string(), last_updated_upper(as_of)),
    ];
    if let Some(since) = since.filter(|s| s.starts_with("gt")) {
        params.push(("_lastUpdated".to_string(), since.to_string()));
    }
    if kind == SearchKind::ExplanationOfBenefit {
        params.push(("excludeSAMHSA".to_string(), "true".to_string()));
        if let Some(window) = window {
            params.extend(window.params());
        }
    }
    if page_size > 0 {
        params.push(("_count".to_string(), page_size.to_string()));
    }
    params
}

/// Parameters of a hashed-identifier patient lookup.
pub fn identifier_params(hashed_id: &str, page_size: u32) -> Vec<(String, String)> {
    let mut params = vec![
        ("identifier".to_string(), format!("{MBI_HASH_SYSTEM}|{hashed_id}")),
        ("_format".to_string(), FHIR_JSON.to_string()),
    ];
    if page_size > 0 {
        params.push(("_count".to_string(), page_size.to_string()));
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn as_of() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, 0).unwrap()
    }

    fn values<'a>(params: &'a [(String, String)], key: &str) -> Vec<&'a str> {
        params
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    #[test]
    fn upper_bound_uses_nanosecond_precision() {
        assert_eq!(
            last_updated_upper(as_of()),
            "le2026-03-01T12:30:00.000000000Z"
        );
    }

    #[test]
    fn since_is_added_only_when_lower_bound_shaped() {
        let with = search_params(
            SearchKind::Coverage,
            "-19990000000001",
            Some("gt2026-01-01T00:00:00Z"),
            as_of(),
            None,
            0,
        );
        assert_eq!(values(&with, "_lastUpdated").len(), 2);
        assert_eq!(values(&with, "beneficiary"), vec!["-19990000000001"]);

        let without = search_params(
            SearchKind::Coverage,
            "x",
            Some("2026-01-01T00:00:00Z"),
            as_of(),
            None,
            0,
        );
        assert_eq!(values(&without, "_lastUpdated").len(), 1);
    }

    #[test]
    fn benefit_search_excludes_samhsa_and_applies_window() {
        let window = ClaimsWindow::new(
            NaiveDate::from_ymd_opt(2025, 1, 1),
            NaiveDate::from_ymd_opt(2025, 12, 31),
        );
        let params = search_params(
            SearchKind::ExplanationOfBenefit,
            "p1",
            None,
            as_of(),
            Some(&window),
            50,
        );
        assert_eq!(values(&params, "patient"), vec!["p1"]);
        assert_eq!(values(&params, "excludeSAMHSA"), vec!["true"]);
        assert_eq!(
            values(&params, "service-date"),
            vec!["ge2025-01-01", "le2025-12-31"]
        );
        assert_eq!(values(&params, "_count"), vec!["50"]);
        assert_eq!(values(&params, "_format"), vec![FHIR_JSON]);
    }

    #[test]
    fn patient_search_uses_id_and_no_benefit_flags() {
        let params = search_params(SearchKind::Patient, "p1", None, as_of(), None, 0);
        assert_eq!(values(&params, "_id"), vec!["p1"]);
        assert!(values(&params, "excludeSAMHSA").is_empty());
        assert!(values(&params, "_count").is_empty());
    }

    #[test]
    fn inclusion_headers_per_resource() {
        assert_eq!(SearchKind::Patient.headers(), &[("IncludeAddressFields", "true")]);
        assert!(SearchKind::Coverage.headers().is_empty());
        assert_eq!(
            SearchKind::ExplanationOfBenefit.headers(),
            &[("IncludeTaxNumbers", "true")]
        );
    }

    #[test]
    fn identifier_lookup_uses_hash_system() {
        let params = identifier_params("abc123", 0);
        assert_eq!(
            values(&params, "identifier"),
            vec!["https://bluebutton.cms.gov/resources/identifier/mbi-hash|abc123"]
        );
    }
}
