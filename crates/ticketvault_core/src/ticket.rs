use serde::{Deserialize, Serialize};

/// Normalized, tracker-independent ticket record. Timestamps stay ISO-8601
/// strings exactly as the tracker reports them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteTicket {
    pub key: String,
    pub summary: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub priority: String,
    #[serde(default)]
    pub issue_type: String,
    #[serde(default)]
    pub assignee: String,
    #[serde(default)]
    pub reporter: String,
    pub created: Option<String>,
    pub updated: Option<String>,
    pub resolved: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub components: Vec<String>,
    #[serde(default)]
    pub fix_versions: Vec<String>,
    pub parent_key: Option<String>,
    pub parent_summary: Option<String>,
    pub epic_key: Option<String>,
    pub epic_name: Option<String>,
    #[serde(default)]
    pub subtasks: Vec<String>,
    #[serde(default)]
    pub links: Vec<TicketLink>,
    #[serde(default)]
    pub comments: Vec<TicketComment>,
    #[serde(default)]
    pub attachments: Vec<TicketAttachment>,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkDirection {
    Outward,
    Inward,
}

/// One typed cross-reference to another ticket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketLink {
    pub direction: LinkDirection,
    pub link_type: String,
    pub key: String,
    #[serde(default)]
    pub summary: String,
}

/// Comment body stays in the tracker's native markup until rendered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketComment {
    pub author: String,
    pub body: String,
    #[serde(default)]
    pub created: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketAttachment {
    pub filename: String,
    pub url: String,
    #[serde(default)]
    pub size: i64,
}

impl RemoteTicket {
    /// The diff engine treats an absent update timestamp as the empty string.
    pub fn updated_or_empty(&self) -> &str {
        self.updated.as_deref().unwrap_or("")
    }

    pub fn has_related(&self) -> bool {
        self.parent_key.is_some()
            || self.epic_key.is_some()
            || !self.links.is_empty()
            || !self.subtasks.is_empty()
    }
}
