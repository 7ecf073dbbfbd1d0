use serde::Serialize;
use similar::TextDiff;

use crate::document::LocalDocument;
use crate::ticket::RemoteTicket;

/// Change-report entry meaning "no local copy exists yet".
pub const NEW_TICKET: &str = "new";

/// Metadata fields compared against the remote record. The remote update
/// timestamp stands in for description changes; content edits landing inside
/// one update window are invisible to this comparison.
const COMPARED_FIELDS: &[&str] = &["status", "priority", "assignee"];

/// Outcome of comparing a stored document against the remote ticket.
/// Created per comparison and only ever used to drive the write decision.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeReport {
    pub changed: bool,
    pub key: String,
    pub fields: Vec<String>,
    #[serde(skip)]
    pub local: Option<LocalDocument>,
}

impl ChangeReport {
    pub fn is_new(&self) -> bool {
        self.local.is_none()
    }
}

/// Field-level comparison of a local document against the remote record.
/// A missing local document always reports changed with the new-ticket
/// sentinel; a missing local metadata field counts as a mismatch.
pub fn compare(local: Option<&LocalDocument>, remote: &RemoteTicket) -> ChangeReport {
    let Some(local) = local else {
        return ChangeReport {
            changed: true,
            key: remote.key.clone(),
            fields: vec![NEW_TICKET.to_string()],
            local: None,
        };
    };

    let mut fields = Vec::new();
    for name in COMPARED_FIELDS {
        let remote_value = match *name {
            "status" => remote.status.as_str(),
            "priority" => remote.priority.as_str(),
            "assignee" => remote.assignee.as_str(),
            _ => unreachable!("field list is fixed"),
        };
        if local.meta_str(name) != Some(remote_value) {
            fields.push((*name).to_string());
        }
    }
    if local.meta_str("updated").unwrap_or("") != remote.updated_or_empty() {
        fields.push("updated".to_string());
    }

    ChangeReport {
        changed: !fields.is_empty(),
        key: remote.key.clone(),
        fields,
        local: Some(local.clone()),
    }
}

/// Unified text diff of the stored document against a fresh render, for the
/// CLI diff view. Empty when the two sides match.
pub fn unified_diff(stored: &str, fresh: &str) -> String {
    TextDiff::from_lines(stored, fresh)
        .unified_diff()
        .context_radius(2)
        .header("stored", "remote")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::MetaValue;
    use std::path::PathBuf;

    fn local_with(meta: &[(&str, &str)]) -> LocalDocument {
        LocalDocument {
            path: PathBuf::from("TV-1.md"),
            raw: String::new(),
            meta: meta
                .iter()
                .map(|(name, value)| (name.to_string(), MetaValue::Str(value.to_string())))
                .collect(),
            body: String::new(),
            key: "TV-1".to_string(),
        }
    }

    fn remote() -> RemoteTicket {
        RemoteTicket {
            key: "TV-1".to_string(),
            status: "Done".to_string(),
            priority: "High".to_string(),
            assignee: "Alice".to_string(),
            updated: Some("2026-02-01T10:00:00Z".to_string()),
            ..RemoteTicket::default()
        }
    }

    #[test]
    fn missing_local_reports_new_sentinel() {
        let report = compare(None, &remote());
        assert!(report.changed);
        assert_eq!(report.fields, vec![NEW_TICKET.to_string()]);
        assert!(report.is_new());

        // Regardless of how empty the remote record is.
        let bare = RemoteTicket {
            key: "TV-2".to_string(),
            ..RemoteTicket::default()
        };
        let report = compare(None, &bare);
        assert!(report.changed);
        assert_eq!(report.fields, vec![NEW_TICKET.to_string()]);
    }

    #[test]
    fn status_change_is_detected() {
        let local = local_with(&[
            ("status", "Open"),
            ("priority", "High"),
            ("assignee", "Alice"),
            ("updated", "2026-02-01T10:00:00Z"),
        ]);
        let report = compare(Some(&local), &remote());
        assert!(report.changed);
        assert_eq!(report.fields, vec!["status".to_string()]);
    }

    #[test]
    fn matching_document_reports_unchanged() {
        let local = local_with(&[
            ("status", "Done"),
            ("priority", "High"),
            ("assignee", "Alice"),
            ("updated", "2026-02-01T10:00:00Z"),
        ]);
        let report = compare(Some(&local), &remote());
        assert!(!report.changed);
        assert!(report.fields.is_empty());
    }

    #[test]
    fn missing_local_fields_count_as_mismatch() {
        let local = local_with(&[("status", "Done")]);
        let report = compare(Some(&local), &remote());
        assert!(report.changed);
        assert_eq!(
            report.fields,
            vec!["priority".to_string(), "assignee".to_string(), "updated".to_string()]
        );
    }

    #[test]
    fn absent_remote_timestamp_matches_absent_local_value() {
        let mut remote = remote();
        remote.updated = None;
        let local = local_with(&[
            ("status", "Done"),
            ("priority", "High"),
            ("assignee", "Alice"),
        ]);
        let report = compare(Some(&local), &remote);
        assert!(!report.changed);
    }
}
