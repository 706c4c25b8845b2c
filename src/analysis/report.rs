//! Structured issue reports and markdown rendering

use std::collections::BTreeMap;

use serde_json::Value;

/// Report fields every issue carries, with their labels
pub const STANDARD_FIELD_LABELS: &[(&str, &str)] = &[
    ("title", "Title"),
    ("category", "Category"),
    ("description", "Description"),
    ("workarounds", "Workarounds"),
    ("version", "Product version"),
];

/// Information requested for every report regardless of guild configuration
pub const STANDARD_REPORT_INFO: &[&str] = &[
    "Product version (build, version, commit hash, etc.)",
    "A thorough description of the issue, detailing how and when it occurs",
    "Attempted workarounds",
];

/// A structured bug report extracted from a chat log
///
/// Field keys are the standard ones plus whatever extra fields the guild
/// configured. An empty report means no issue was found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssueReport {
    fields: BTreeMap<String, String>,
}

impl IssueReport {
    /// Build a report from a JSON object, coercing non-string values
    #[must_use]
    pub fn from_json(object: &serde_json::Map<String, Value>) -> Self {
        let fields = object
            .iter()
            .map(|(key, value)| {
                let text = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (key.clone(), text)
            })
            .collect();

        Self { fields }
    }

    /// Convert back to a JSON object (for correction round-trips)
    #[must_use]
    pub fn to_json(&self) -> serde_json::Map<String, Value> {
        self.fields
            .iter()
            .map(|(key, value)| (key.clone(), Value::String(value.clone())))
            .collect()
    }

    /// True when the analysis found no issue
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Look up a field value
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Iterate over all fields in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }
}

/// Render a report to a `(title, markdown body)` pair
///
/// `field_labels` maps field keys to display labels for the information
/// section. Returns `None` when the report carries no category, i.e. there
/// is nothing to format.
#[must_use]
pub fn render_markdown(
    field_labels: &BTreeMap<String, String>,
    report: &IssueReport,
) -> Option<(String, String)> {
    let category = report.get("category")?;
    let title = format!("[BUGBOT][{category}] {}", report.get("title")?);

    let mut body = format!("# {title}\n\n");

    body.push_str("## Description\n");
    body.push_str(report.get("description").unwrap_or("Unknown"));
    body.push_str("\n\n");

    body.push_str("## Workarounds\n");
    body.push_str(report.get("workarounds").unwrap_or("Unknown"));
    body.push_str("\n\n");

    body.push_str("## Information");

    for (key, value) in report.iter() {
        if matches!(key, "title" | "category" | "description" | "workarounds") {
            continue;
        }

        let label = field_labels.get(key).map_or(key, String::as_str);
        body.push_str(&format!("\n * {label}: {value}"));
    }

    Some((title, body))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_report() -> IssueReport {
        let object = serde_json::json!({
            "title": "Crash on startup",
            "category": "Crash",
            "description": "The app crashes when launched twice.",
            "workarounds": "Restart the machine.",
            "version": "1.2.3",
            "os_version": "Windows 11",
        });
        IssueReport::from_json(object.as_object().unwrap())
    }

    #[test]
    fn render_includes_title_and_sections() {
        let mut labels = BTreeMap::new();
        labels.insert("version".to_string(), "Product version".to_string());
        labels.insert("os_version".to_string(), "Operating system".to_string());

        let (title, body) = render_markdown(&labels, &sample_report()).unwrap();

        assert_eq!(title, "[BUGBOT][Crash] Crash on startup");
        assert!(body.contains("## Description"));
        assert!(body.contains("The app crashes when launched twice."));
        assert!(body.contains("## Workarounds"));
        assert!(body.contains(" * Operating system: Windows 11"));
        assert!(body.contains(" * Product version: 1.2.3"));
    }

    #[test]
    fn render_falls_back_to_key_for_unknown_label() {
        let labels = BTreeMap::new();
        let (_, body) = render_markdown(&labels, &sample_report()).unwrap();
        assert!(body.contains(" * os_version: Windows 11"));
    }

    #[test]
    fn render_requires_category() {
        let object = serde_json::json!({ "title": "No category here" });
        let report = IssueReport::from_json(object.as_object().unwrap());
        assert!(render_markdown(&BTreeMap::new(), &report).is_none());
    }

    #[test]
    fn empty_report_means_no_issue() {
        let report = IssueReport::from_json(&serde_json::Map::new());
        assert!(report.is_empty());
    }

    #[test]
    fn from_json_coerces_non_string_values() {
        let object = serde_json::json!({ "category": "UI", "title": "t", "count": 3 });
        let report = IssueReport::from_json(object.as_object().unwrap());
        assert_eq!(report.get("count"), Some("3"));
    }

    #[test]
    fn json_roundtrip_preserves_fields() {
        let report = sample_report();
        let back = IssueReport::from_json(&report.to_json());
        assert_eq!(report, back);
    }
}
