use anyhow::{Context, Result, bail};

use crate::compose::{
    CommentStyle, MetadataStyle, compose_comments, compose_description, compose_link_line,
    compose_metadata, format_ref, format_ref_titled, format_size, format_tag,
};
use crate::config::VaultConfig;
use crate::ticket::RemoteTicket;
use crate::vault::sanitize_name;

const AUTO_CATEGORY_MAX: usize = 30;

/// One formatted document plus its target file extension. Produced once per
/// sync attempt and handed straight to the persistence layer.
#[derive(Debug, Clone)]
pub struct RenderedDocument {
    pub content: String,
    pub extension: &'static str,
}

/// Output format registry: every variant maps to one render function and
/// one canonical extension.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Rich,
    Plain,
    Json,
}

impl OutputFormat {
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "rich" => Ok(Self::Rich),
            "plain" => Ok(Self::Plain),
            "json" => Ok(Self::Json),
            other => bail!("unknown output format: {other} (expected rich, plain or json)"),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rich => "rich",
            Self::Plain => "plain",
            Self::Json => "json",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Rich | Self::Plain => "md",
            Self::Json => "json",
        }
    }
}

/// Render a ticket in the requested format. `synced_at` is the stamp for
/// the metadata `synced` field; `None` suppresses it.
pub fn render(
    ticket: &RemoteTicket,
    format: OutputFormat,
    config: &VaultConfig,
    synced_at: Option<&str>,
) -> Result<RenderedDocument> {
    let content = match format {
        OutputFormat::Rich => render_rich(ticket, config, synced_at)?,
        OutputFormat::Plain => render_plain(ticket, config),
        OutputFormat::Json => serde_json::to_string_pretty(ticket)
            .with_context(|| format!("failed to serialize {}", ticket.key))?,
    };
    Ok(RenderedDocument {
        content,
        extension: format.extension(),
    })
}

fn render_rich(
    ticket: &RemoteTicket,
    config: &VaultConfig,
    synced_at: Option<&str>,
) -> Result<String> {
    let comment_style = resolve_comment_style(config)?;
    let metadata_style = resolve_metadata_style(config)?;

    let mut sections = Vec::new();
    if metadata_style == MetadataStyle::Block {
        sections.push(compose_metadata(ticket, MetadataStyle::Block, synced_at));
    }
    sections.push(format!("# {}: {}\n", ticket.key, ticket.summary));
    if metadata_style == MetadataStyle::Table {
        sections.push(compose_metadata(ticket, MetadataStyle::Table, None));
    }

    let tags = build_tags(ticket, config);
    if !tags.is_empty() {
        sections.push(format!("{}\n", tags.join(" ")));
    }

    if !ticket.description.is_empty() {
        sections.push(compose_description(
            &ticket.description,
            config.format.max_description_length,
            true,
        ));
    }

    if config.format.include_links && ticket.has_related() {
        sections.push(related_section(ticket));
    }

    if config.format.include_comments && !ticket.comments.is_empty() {
        sections.push(compose_comments(&ticket.comments, comment_style, true));
    }

    if config.format.include_attachments && !ticket.attachments.is_empty() {
        sections.push(attachments_section(ticket));
    }

    Ok(sections.join("\n"))
}

fn render_plain(ticket: &RemoteTicket, config: &VaultConfig) -> String {
    let mut sections = vec![
        format!("# {}: {}\n", ticket.key, ticket.summary),
        compose_metadata(ticket, MetadataStyle::Table, None),
    ];

    if !ticket.description.is_empty() {
        sections.push(compose_description(
            &ticket.description,
            config.format.max_description_length,
            true,
        ));
    }

    if config.format.include_links && ticket.has_related() {
        sections.push(plain_related_section(ticket));
    }

    if config.format.include_comments && !ticket.comments.is_empty() {
        sections.push(compose_comments(&ticket.comments, CommentStyle::Section, true));
    }

    sections.join("\n")
}

fn build_tags(ticket: &RemoteTicket, config: &VaultConfig) -> Vec<String> {
    let mut tags = Vec::new();
    if !ticket.status.is_empty() {
        tags.push(format!("#{}", config.status_tag(&ticket.status)));
    }
    if !ticket.priority.is_empty() {
        tags.push(format!("#{}", config.priority_tag(&ticket.priority)));
    }
    if !ticket.issue_type.is_empty() {
        tags.push(format!("#{}", config.type_tag(&ticket.issue_type)));
    }
    for label in &ticket.labels {
        tags.push(format_tag(label, Some("label")));
    }
    tags
}

fn related_section(ticket: &RemoteTicket) -> String {
    let mut lines = vec!["## Related Tickets".to_string(), String::new()];

    if let Some(parent) = &ticket.parent_key {
        let summary = ticket.parent_summary.as_deref().unwrap_or("");
        lines.push(format!("**Parent:** {} - {summary}", format_ref(parent)));
        lines.push(String::new());
    }
    if let Some(epic) = &ticket.epic_key {
        if ticket.parent_key.as_deref() != Some(epic) {
            match &ticket.epic_name {
                Some(name) => lines.push(format!("**Epic:** {}", format_ref_titled(epic, name))),
                None => lines.push(format!("**Epic:** {}", format_ref(epic))),
            }
            lines.push(String::new());
        }
    }
    if !ticket.links.is_empty() {
        lines.push("### Links".to_string());
        for link in &ticket.links {
            lines.push(compose_link_line(link));
        }
        lines.push(String::new());
    }
    if !ticket.subtasks.is_empty() {
        lines.push("### Subtasks".to_string());
        for subtask in &ticket.subtasks {
            lines.push(format!("- {}", format_ref(subtask)));
        }
        lines.push(String::new());
    }

    lines.join("\n")
}

fn plain_related_section(ticket: &RemoteTicket) -> String {
    let mut lines = vec!["## Related Tickets".to_string(), String::new()];
    if let Some(parent) = &ticket.parent_key {
        lines.push(format!("- Parent: {parent}"));
    }
    if let Some(epic) = &ticket.epic_key {
        if ticket.parent_key.as_deref() != Some(epic) {
            lines.push(format!("- Epic: {epic}"));
        }
    }
    for link in &ticket.links {
        lines.push(format!("- {}: {} {}", link.link_type, link.key, link.summary).trim_end().to_string());
    }
    for subtask in &ticket.subtasks {
        lines.push(format!("- Subtask: {subtask}"));
    }
    lines.push(String::new());
    lines.join("\n")
}

fn attachments_section(ticket: &RemoteTicket) -> String {
    let mut lines = vec!["## Attachments".to_string(), String::new()];
    for attachment in &ticket.attachments {
        lines.push(format!(
            "- [{}]({}) ({})",
            attachment.filename,
            attachment.url,
            format_size(attachment.size)
        ));
    }
    lines.push(String::new());
    lines.join("\n")
}

// A selector the config names but the registry does not know is a caller
// configuration error, surfaced before any rendering happens.
fn resolve_comment_style(config: &VaultConfig) -> Result<CommentStyle> {
    match config.format.comment_style.as_deref() {
        Some(value) => CommentStyle::parse(value),
        None => Ok(CommentStyle::default()),
    }
}

fn resolve_metadata_style(config: &VaultConfig) -> Result<MetadataStyle> {
    match config.format.metadata_style.as_deref() {
        Some(value) => MetadataStyle::parse(value),
        None => Ok(MetadataStyle::default()),
    }
}

/// Category folder for a ticket: parent summary, then epic name, then issue
/// type, then the catch-all.
pub fn detect_category(ticket: &RemoteTicket) -> String {
    if let Some(parent) = &ticket.parent_summary {
        let name = sanitize_name(parent, AUTO_CATEGORY_MAX, false);
        if !name.is_empty() {
            return name;
        }
    }
    if let Some(epic) = &ticket.epic_name {
        let name = sanitize_name(epic, AUTO_CATEGORY_MAX, false);
        if !name.is_empty() {
            return name;
        }
    }
    if !ticket.issue_type.is_empty() {
        return ticket.issue_type.clone();
    }
    "General".to_string()
}

/// Summary index document for a batch of synced tickets.
pub fn compose_index(title: &str, tickets: &[RemoteTicket]) -> String {
    let mut lines = vec![format!("# {title}"), String::new(), "## Summary".to_string()];
    lines.push(format!("- **Total tickets:** {}", tickets.len()));

    if !tickets.is_empty() {
        push_unique_line(&mut lines, "Statuses", tickets.iter().map(|t| t.status.as_str()));
        push_unique_line(&mut lines, "Priorities", tickets.iter().map(|t| t.priority.as_str()));
        push_unique_line(&mut lines, "Types", tickets.iter().map(|t| t.issue_type.as_str()));
    }
    lines.push(String::new());

    if !tickets.is_empty() {
        lines.push("## Ticket List".to_string());
        lines.push(String::new());
        lines.push("| Key | Summary | Status | Priority | Type |".to_string());
        lines.push("|-----|---------|--------|----------|------|".to_string());
        for ticket in tickets {
            lines.push(format!(
                "| {} | {} | {} | {} | {} |",
                ticket.key, ticket.summary, ticket.status, ticket.priority, ticket.issue_type
            ));
        }
        lines.push(String::new());

        lines.push("## By Category".to_string());
        lines.push(String::new());
        let mut categories: Vec<(String, Vec<&RemoteTicket>)> = Vec::new();
        for ticket in tickets {
            let category = detect_category(ticket);
            match categories.iter_mut().find(|(name, _)| *name == category) {
                Some((_, members)) => members.push(ticket),
                None => categories.push((category, vec![ticket])),
            }
        }
        categories.sort_by(|left, right| left.0.cmp(&right.0));
        for (category, members) in &categories {
            lines.push(format!("### {category}"));
            for ticket in members {
                lines.push(format!("- {} - {}", ticket.key, ticket.summary));
            }
            lines.push(String::new());
        }

        lines.push("## Quick Links".to_string());
        lines.push(String::new());
        for ticket in tickets.iter().take(5) {
            lines.push(format!("- {} - {}", format_ref(&ticket.key), ticket.summary));
        }
    }

    lines.join("\n")
}

fn push_unique_line<'v>(
    lines: &mut Vec<String>,
    label: &str,
    values: impl Iterator<Item = &'v str>,
) {
    let mut unique: Vec<&str> = values.filter(|value| !value.is_empty()).collect();
    unique.sort_unstable();
    unique.dedup();
    if !unique.is_empty() {
        lines.push(format!("- **{label}:** {}", unique.join(", ")));
    }
}
