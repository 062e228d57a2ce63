//! Lead records as read from the lead store.
//!
//! Stores hand out [`RawLeadRow`]s: every column is optional because the store
//! schema does not enforce presence. The graph builder turns each row into a
//! validated [`LeadRecord`] or skips it as a [`MalformedLead`].

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::LeadId;

/// Values given to blank or missing columns of an otherwise valid row.
pub const DEFAULT_SOURCE: &str = "unknown";
pub const DEFAULT_INCIDENT_CATEGORY: &str = "uncategorized";
pub const DEFAULT_VERDICT: &str = "unassessed";

/// A lead row exactly as the store returned it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawLeadRow {
    pub id: Option<String>,
    pub name: Option<String>,
    pub confidence: Option<f64>,
    pub source: Option<String>,
    pub incident_category: Option<String>,
    /// RFC 3339 or `YYYY-MM-DD HH:MM:SS` (UTC).
    pub first_seen: Option<String>,
    pub verdict: Option<String>,
    /// Expected to be a JSON array of strings.
    pub artifacts: Option<Value>,
}

/// Reasons a row cannot become a [`LeadRecord`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MalformedLead {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("confidence {0} outside [0, 1]")]
    ConfidenceOutOfRange(f64),
    #[error("unparseable first_seen timestamp: {0}")]
    InvalidTimestamp(String),
    #[error("artifacts column is not an array of strings: {0}")]
    InvalidArtifacts(String),
}

/// A validated, immutable lead snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadRecord {
    pub id: LeadId,
    pub name: String,
    pub confidence: f64,
    pub source: String,
    pub incident_category: String,
    pub first_seen: DateTime<Utc>,
    pub verdict: String,
    pub artifacts: Vec<String>,
}

impl TryFrom<RawLeadRow> for LeadRecord {
    type Error = MalformedLead;

    fn try_from(row: RawLeadRow) -> Result<Self, Self::Error> {
        let id = non_empty(row.id).ok_or(MalformedLead::MissingField("id"))?;
        let name = non_empty(row.name).ok_or(MalformedLead::MissingField("name"))?;
        let confidence = row
            .confidence
            .ok_or(MalformedLead::MissingField("confidence"))?;
        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return Err(MalformedLead::ConfidenceOutOfRange(confidence));
        }
        let first_seen = non_empty(row.first_seen)
            .ok_or(MalformedLead::MissingField("first_seen"))
            .and_then(|raw| parse_timestamp(&raw))?;
        let artifacts = parse_artifacts(row.artifacts)?;

        Ok(Self {
            id: LeadId::new(id),
            name,
            confidence,
            source: non_empty(row.source).unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
            incident_category: non_empty(row.incident_category)
                .unwrap_or_else(|| DEFAULT_INCIDENT_CATEGORY.to_string()),
            first_seen,
            verdict: non_empty(row.verdict).unwrap_or_else(|| DEFAULT_VERDICT.to_string()),
            artifacts,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, MalformedLead> {
    let trimmed = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .map_err(|_| MalformedLead::InvalidTimestamp(raw.to_string()))
}

fn parse_artifacts(value: Option<Value>) -> Result<Vec<String>, MalformedLead> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => Ok(s),
                other => Err(MalformedLead::InvalidArtifacts(other.to_string())),
            })
            .collect(),
        Some(other) => Err(MalformedLead::InvalidArtifacts(other.to_string())),
    }
}

/// Canonical form used to deduplicate footprints: trimmed, then lowercased.
///
/// Returns `None` for artifacts that are blank after trimming.
pub fn normalize_artifact(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_lowercase())
    }
}

/// Query filter supplied by the command surface.
///
/// Rows with a missing confidence pass the confidence filter so that they reach
/// the builder and are counted as malformed rather than silently vanishing.
///
/// Category, verdict and source are compared after defaulting, so a filter on
/// `verdict = "unassessed"` also selects rows whose verdict is blank.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeadFilter {
    pub min_confidence: Option<f64>,
    pub incident_category: Option<String>,
    pub verdict: Option<String>,
    pub source: Option<String>,
    /// Case-insensitive substring match on the display name.
    pub name_contains: Option<String>,
}

impl LeadFilter {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn matches(&self, row: &RawLeadRow) -> bool {
        if let (Some(min), Some(confidence)) = (self.min_confidence, row.confidence) {
            if confidence < min {
                return false;
            }
        }
        if !equals(
            &self.incident_category,
            &row.incident_category,
            DEFAULT_INCIDENT_CATEGORY,
        ) || !equals(&self.verdict, &row.verdict, DEFAULT_VERDICT)
            || !equals(&self.source, &row.source, DEFAULT_SOURCE)
        {
            return false;
        }
        match (&self.name_contains, &row.name) {
            (Some(needle), Some(name)) => name.to_lowercase().contains(&needle.to_lowercase()),
            (Some(_), None) => false,
            (None, _) => true,
        }
    }
}

fn equals(wanted: &Option<String>, actual: &Option<String>, default: &str) -> bool {
    match wanted {
        Some(w) => {
            let actual = actual
                .as_deref()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(default);
            actual == w
        }
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(id: &str) -> RawLeadRow {
        RawLeadRow {
            id: Some(id.into()),
            name: Some("Lead".into()),
            confidence: Some(0.8),
            first_seen: Some("2024-03-01T10:00:00Z".into()),
            artifacts: Some(json!(["1.2.3.4", "alias"])),
            ..Default::default()
        }
    }

    #[test]
    fn valid_row_gets_defaults() {
        let lead = LeadRecord::try_from(row("a")).unwrap();
        assert_eq!(lead.id.as_str(), "a");
        assert_eq!(lead.source, "unknown");
        assert_eq!(lead.verdict, "unassessed");
        assert_eq!(lead.incident_category, "uncategorized");
        assert_eq!(lead.artifacts, vec!["1.2.3.4", "alias"]);
    }

    #[test]
    fn missing_id_is_malformed() {
        let mut r = row("a");
        r.id = Some("   ".into());
        assert_eq!(
            LeadRecord::try_from(r),
            Err(MalformedLead::MissingField("id"))
        );
    }

    #[test]
    fn out_of_range_confidence_is_malformed() {
        let mut r = row("a");
        r.confidence = Some(1.5);
        assert!(matches!(
            LeadRecord::try_from(r),
            Err(MalformedLead::ConfidenceOutOfRange(_))
        ));
    }

    #[test]
    fn sqlite_style_timestamp_is_accepted() {
        let mut r = row("a");
        r.first_seen = Some("2024-03-01 10:00:00".into());
        let lead = LeadRecord::try_from(r).unwrap();
        assert_eq!(lead.first_seen.to_rfc3339(), "2024-03-01T10:00:00+00:00");
    }

    #[test]
    fn non_string_artifact_is_malformed() {
        let mut r = row("a");
        r.artifacts = Some(json!(["ok", 7]));
        assert!(matches!(
            LeadRecord::try_from(r),
            Err(MalformedLead::InvalidArtifacts(_))
        ));
    }

    #[test]
    fn null_artifacts_mean_none() {
        let mut r = row("a");
        r.artifacts = None;
        assert!(LeadRecord::try_from(r).unwrap().artifacts.is_empty());
    }

    #[test]
    fn normalization_trims_and_folds_case() {
        assert_eq!(normalize_artifact(" 1.2.3.4 "), Some("1.2.3.4".into()));
        assert_eq!(normalize_artifact("EvilCorp"), Some("evilcorp".into()));
        assert_eq!(normalize_artifact("  \t"), None);
    }

    #[test]
    fn filter_matches_on_all_fields() {
        let mut r = row("a");
        r.verdict = Some("malicious".into());
        let filter = LeadFilter {
            min_confidence: Some(0.5),
            verdict: Some("malicious".into()),
            name_contains: Some("LEA".into()),
            ..Default::default()
        };
        assert!(filter.matches(&r));

        let strict = LeadFilter {
            min_confidence: Some(0.9),
            ..Default::default()
        };
        assert!(!strict.matches(&r));

        let other_source = LeadFilter {
            source: Some("osint".into()),
            ..Default::default()
        };
        assert!(!other_source.matches(&r));
        assert!(LeadFilter::default().is_empty());
    }

    #[test]
    fn filter_sees_defaulted_values() {
        let mut blank = row("blank");
        blank.verdict = Some("  ".into());
        let missing = row("missing");

        let unassessed = LeadFilter {
            verdict: Some(DEFAULT_VERDICT.into()),
            ..Default::default()
        };
        assert!(unassessed.matches(&blank));
        assert!(unassessed.matches(&missing));

        let unknown = LeadFilter {
            source: Some("unknown".into()),
            incident_category: Some("uncategorized".into()),
            ..Default::default()
        };
        assert!(unknown.matches(&missing));
        assert_eq!(
            LeadRecord::try_from(missing).unwrap().source,
            DEFAULT_SOURCE
        );

        let mut known = row("known");
        known.source = Some("osint".into());
        assert!(!unknown.matches(&known));
    }
}
