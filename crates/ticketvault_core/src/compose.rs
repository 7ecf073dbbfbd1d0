use anyhow::{Result, bail};
use chrono::{Local, NaiveDate};

use crate::markup::to_markdown;
use crate::ticket::{LinkDirection, RemoteTicket, TicketComment};

pub const META_DELIMITER: &str = "---";
pub const SYNCED_FIELD: &str = "synced";

/// A value the metadata block can carry. The parser recovers `Str`, `List`
/// and `Bool` exactly; dates come back as plain strings.
#[derive(Debug, Clone, PartialEq)]
pub enum MetaValue {
    Str(String),
    List(Vec<String>),
    Bool(bool),
    Date(NaiveDate),
}

impl MetaValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(value) => Some(value),
            _ => None,
        }
    }
}

/// Render an ordered set of fields as a delimited metadata block.
///
/// `None` values are omitted, lists render only when non-empty, booleans
/// lowercase, dates as `YYYY-MM-DD`, and strings containing a quote, colon
/// or newline are wrapped in quotes. A `synced` line is appended when a
/// stamp is given; pass `None` to suppress it.
pub fn build_meta_block(fields: &[(&str, Option<MetaValue>)], synced_at: Option<&str>) -> String {
    let mut lines = vec![META_DELIMITER.to_string()];
    for (name, value) in fields {
        let Some(value) = value else { continue };
        match value {
            MetaValue::Str(text) => lines.push(format!("{name}: {}", quote_if_needed(text))),
            MetaValue::List(items) => {
                if !items.is_empty() {
                    lines.push(format!("{name}: [{}]", items.join(", ")));
                }
            }
            MetaValue::Bool(flag) => lines.push(format!("{name}: {flag}")),
            MetaValue::Date(date) => lines.push(format!("{name}: {}", date.format("%Y-%m-%d"))),
        }
    }
    if let Some(stamp) = synced_at {
        lines.push(format!("{SYNCED_FIELD}: {stamp}"));
    }
    lines.push(META_DELIMITER.to_string());
    lines.push(String::new());
    lines.join("\n")
}

/// Left inverse of [`build_meta_block`] for the values it can produce.
/// Input without the opening delimiter yields an empty mapping and the
/// whole input as body.
pub fn parse_meta_block(text: &str) -> (Vec<(String, MetaValue)>, String) {
    let Some(rest) = text.strip_prefix(&format!("{META_DELIMITER}\n")) else {
        return (Vec::new(), text.to_string());
    };

    let mut fields = Vec::new();
    let mut consumed = 0;
    for line in rest.lines() {
        consumed += line.len() + 1;
        if line.trim_end() == META_DELIMITER {
            let body_start = META_DELIMITER.len() + 1 + consumed;
            let tail = text.get(body_start..).unwrap_or("");
            let body = tail.strip_prefix('\n').unwrap_or(tail);
            return (fields, body.to_string());
        }
        if let Some((name, raw)) = line.split_once(':') {
            fields.push((name.trim().to_string(), parse_meta_value(raw.trim())));
        }
    }

    // Unterminated block: treat everything as body, per the best-effort rule.
    (Vec::new(), text.to_string())
}

fn parse_meta_value(raw: &str) -> MetaValue {
    if let Some(inner) = raw.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
        let items = inner
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect();
        return MetaValue::List(items);
    }
    if raw.eq_ignore_ascii_case("true") {
        return MetaValue::Bool(true);
    }
    if raw.eq_ignore_ascii_case("false") {
        return MetaValue::Bool(false);
    }
    if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
        return MetaValue::Str(raw[1..raw.len() - 1].to_string());
    }
    MetaValue::Str(raw.to_string())
}

fn quote_if_needed(text: &str) -> String {
    if text.contains('"') || text.contains(':') || text.contains('\n') {
        format!("\"{text}\"")
    } else {
        text.to_string()
    }
}

/// `YYYY-MM-DD HH:MM` local stamp for the `synced` metadata field.
pub fn sync_stamp_now() -> String {
    Local::now().format("%Y-%m-%d %H:%M").to_string()
}

/// Date portion of an ISO-8601 timestamp, when it parses.
pub fn iso_date(timestamp: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(timestamp.get(..10)?, "%Y-%m-%d").ok()
}

/// Hierarchical tag token: lowercased, spaces to hyphens, any pre-existing
/// `#` stripped, prefixed with a namespace when given.
pub fn format_tag(value: &str, namespace: Option<&str>) -> String {
    let cleaned = value.trim().trim_start_matches('#').to_lowercase().replace(' ', "-");
    match namespace {
        Some(ns) => format!("#{ns}/{cleaned}"),
        None => format!("#{cleaned}"),
    }
}

pub fn format_tags(values: &[String], namespace: Option<&str>, separator: &str) -> String {
    values
        .iter()
        .map(|value| format_tag(value, namespace))
        .collect::<Vec<_>>()
        .join(separator)
}

/// Vault cross-reference: `[[KEY]]`, or `[[KEY|text]]` with display text.
pub fn format_ref(key: &str) -> String {
    format!("[[{key}]]")
}

pub fn format_ref_titled(key: &str, text: &str) -> String {
    format!("[[{key}|{text}]]")
}

pub fn format_refs(keys: &[String], separator: &str) -> String {
    keys.iter().map(|key| format_ref(key)).collect::<Vec<_>>().join(separator)
}

/// Inline code span; embedded backticks widen the fence until it is unambiguous.
pub fn inline_code(text: &str) -> String {
    let longest_run = text
        .split(|ch| ch != '`')
        .map(str::len)
        .max()
        .unwrap_or(0);
    let fence = "`".repeat(longest_run + 1);
    if text.starts_with('`') || text.ends_with('`') {
        format!("{fence} {text} {fence}")
    } else {
        format!("{fence}{text}{fence}")
    }
}

/// Collapsible Obsidian callout with a typed header and a title line.
pub fn callout(kind: &str, title: &str, body: &str) -> String {
    let mut lines = vec![format!("> [!{kind}]- {title}")];
    for line in body.lines() {
        if line.is_empty() {
            lines.push(">".to_string());
        } else {
            lines.push(format!("> {line}"));
        }
    }
    lines.join("\n")
}

pub fn quote_block(body: &str) -> String {
    body.lines()
        .map(|line| {
            if line.is_empty() {
                ">".to_string()
            } else {
                format!("> {line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Human-readable size in binary units. `B` below 1024, one decimal place
/// above; negative input clamps to zero.
pub fn format_size(bytes: i64) -> String {
    let bytes = bytes.max(0) as f64;
    if bytes < 1024.0 {
        return format!("{bytes:.0} B");
    }
    let mut value = bytes;
    for unit in ["KB", "MB", "GB", "TB"] {
        value /= 1024.0;
        if value < 1024.0 || unit == "TB" {
            return format!("{value:.1} {unit}");
        }
    }
    unreachable!("unit loop always returns")
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MetadataStyle {
    #[default]
    Block,
    Table,
}

impl MetadataStyle {
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "block" => Ok(Self::Block),
            "table" => Ok(Self::Table),
            other => bail!("unknown metadata format: {other} (expected block or table)"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CommentStyle {
    #[default]
    Callout,
    Quote,
    Section,
}

impl CommentStyle {
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "callout" => Ok(Self::Callout),
            "quote" => Ok(Self::Quote),
            "section" => Ok(Self::Section),
            other => bail!("unknown comment format: {other} (expected callout, quote or section)"),
        }
    }
}

/// Description as Markdown, optionally truncated (the ellipsis counts
/// toward the limit) and prefixed with a section header.
pub fn compose_description(native: &str, max_length: usize, with_header: bool) -> String {
    let mut body = to_markdown(native);
    if max_length > 3 && body.chars().count() > max_length {
        body = body.chars().take(max_length - 3).collect();
        body.push_str("...");
    }
    if with_header {
        format!("## Description\n\n{body}\n")
    } else {
        body
    }
}

/// Ticket metadata as either the delimited block or a two-column table.
pub fn compose_metadata(ticket: &RemoteTicket, style: MetadataStyle, synced_at: Option<&str>) -> String {
    match style {
        MetadataStyle::Block => build_meta_block(&meta_fields(ticket), synced_at),
        MetadataStyle::Table => meta_table(ticket),
    }
}

fn meta_fields(ticket: &RemoteTicket) -> Vec<(&'static str, Option<MetaValue>)> {
    let opt_str = |value: &str| {
        if value.is_empty() {
            None
        } else {
            Some(MetaValue::Str(value.to_string()))
        }
    };
    let opt_date = |value: &Option<String>| {
        value.as_deref().and_then(iso_date).map(MetaValue::Date)
    };
    vec![
        ("key", Some(MetaValue::Str(ticket.key.clone()))),
        ("url", opt_str(&ticket.url)),
        ("status", opt_str(&ticket.status)),
        ("priority", opt_str(&ticket.priority)),
        ("type", opt_str(&ticket.issue_type)),
        ("assignee", opt_str(&ticket.assignee)),
        ("reporter", opt_str(&ticket.reporter)),
        ("created", opt_date(&ticket.created)),
        (
            "updated",
            ticket.updated.clone().map(MetaValue::Str),
        ),
        ("parent", ticket.parent_key.clone().map(MetaValue::Str)),
        ("epic", ticket.epic_key.clone().map(MetaValue::Str)),
        ("labels", Some(MetaValue::List(ticket.labels.clone()))),
    ]
}

fn meta_table(ticket: &RemoteTicket) -> String {
    let mut lines = vec![
        "| Field | Value |".to_string(),
        "|-------|-------|".to_string(),
        format!("| Key | {} |", ticket.key),
        format!("| Status | {} |", ticket.status),
        format!("| Priority | {} |", ticket.priority),
        format!("| Type | {} |", ticket.issue_type),
    ];
    if !ticket.assignee.is_empty() {
        lines.push(format!("| Assignee | {} |", ticket.assignee));
    }
    if !ticket.reporter.is_empty() {
        lines.push(format!("| Reporter | {} |", ticket.reporter));
    }
    if let Some(created) = ticket.created.as_deref().and_then(iso_date) {
        lines.push(format!("| Created | {} |", created.format("%Y-%m-%d")));
    }
    if let Some(updated) = ticket.updated.as_deref().and_then(iso_date) {
        lines.push(format!("| Updated | {} |", updated.format("%Y-%m-%d")));
    }
    if !ticket.components.is_empty() {
        lines.push(format!("| Components | {} |", ticket.components.join(", ")));
    }
    lines.push(String::new());
    lines.join("\n")
}

/// One comment in the selected style. Bodies flow through the markup converter.
pub fn compose_comment(comment: &TicketComment, style: CommentStyle) -> String {
    let body = to_markdown(&comment.body);
    let title = if comment.created.is_empty() {
        comment.author.clone()
    } else {
        format!("{} ({})", comment.author, comment.created)
    };
    match style {
        CommentStyle::Callout => callout("quote", &title, &body),
        CommentStyle::Quote => format!("> **{title}**\n{}", quote_block(&body)),
        CommentStyle::Section => format!("### {title}\n\n{body}\n"),
    }
}

/// Ordered comment list; empty input renders nothing at all, header or not.
pub fn compose_comments(comments: &[TicketComment], style: CommentStyle, with_header: bool) -> String {
    if comments.is_empty() {
        return String::new();
    }
    let rendered: Vec<String> = comments
        .iter()
        .map(|comment| compose_comment(comment, style))
        .collect();
    let joined = rendered.join("\n\n");
    if with_header {
        format!("## Comments\n\n{joined}\n")
    } else {
        joined
    }
}

/// Cross-reference lines for the related-tickets section.
pub fn compose_link_line(link: &crate::ticket::TicketLink) -> String {
    let reference = format_ref(&link.key);
    let suffix = if link.summary.is_empty() {
        String::new()
    } else {
        format!(" - {}", link.summary)
    };
    match link.direction {
        LinkDirection::Outward => format!("- {}: {reference}{suffix}", link.link_type),
        LinkDirection::Inward => format!("- {} (inward): {reference}{suffix}", link.link_type),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ticket::TicketLink;

    fn date(value: &str) -> NaiveDate {
        NaiveDate::parse_from_str(value, "%Y-%m-%d").expect("date")
    }

    #[test]
    fn meta_block_renders_each_value_kind() {
        let block = build_meta_block(
            &[
                ("key", Some(MetaValue::Str("TV-7".into()))),
                ("title", Some(MetaValue::Str("fix: parser".into()))),
                ("labels", Some(MetaValue::List(vec!["infra".into(), "sync".into()]))),
                ("empty", Some(MetaValue::List(Vec::new()))),
                ("archived", Some(MetaValue::Bool(false))),
                ("missing", None),
                ("created", Some(MetaValue::Date(date("2026-03-01")))),
            ],
            Some("2026-03-02 09:15"),
        );
        assert_eq!(
            block,
            "---\nkey: TV-7\ntitle: \"fix: parser\"\nlabels: [infra, sync]\narchived: false\ncreated: 2026-03-01\nsynced: 2026-03-02 09:15\n---\n"
        );
    }

    #[test]
    fn meta_block_parse_inverts_build() {
        let block = build_meta_block(
            &[
                ("key", Some(MetaValue::Str("TV-7".into()))),
                ("title", Some(MetaValue::Str("fix: parser".into()))),
                ("labels", Some(MetaValue::List(vec!["infra".into(), "sync".into()]))),
                ("archived", Some(MetaValue::Bool(true))),
            ],
            None,
        );
        let full = format!("{block}\nBody text here.\n");
        let (fields, body) = parse_meta_block(&full);
        assert_eq!(
            fields,
            vec![
                ("key".to_string(), MetaValue::Str("TV-7".into())),
                ("title".to_string(), MetaValue::Str("fix: parser".into())),
                ("labels".to_string(), MetaValue::List(vec!["infra".into(), "sync".into()])),
                ("archived".to_string(), MetaValue::Bool(true)),
            ]
        );
        assert_eq!(body, "Body text here.\n");
    }

    #[test]
    fn meta_block_parse_without_delimiter_returns_input_as_body() {
        let (fields, body) = parse_meta_block("just a note\nno metadata");
        assert!(fields.is_empty());
        assert_eq!(body, "just a note\nno metadata");
    }

    #[test]
    fn meta_block_parse_tolerates_unterminated_block() {
        let (fields, body) = parse_meta_block("---\nkey: TV-1\nno closing");
        assert!(fields.is_empty());
        assert_eq!(body, "---\nkey: TV-1\nno closing");
    }

    #[test]
    fn tag_formatting_normalizes() {
        assert_eq!(format_tag("In Progress", Some("status")), "#status/in-progress");
        assert_eq!(format_tag("#Done", Some("status")), "#status/done");
        assert_eq!(format_tag("Backend", None), "#backend");
        assert_eq!(
            format_tags(&["High".into(), "Low".into()], Some("priority"), " "),
            "#priority/high #priority/low"
        );
    }

    #[test]
    fn refs_render_double_brackets() {
        assert_eq!(format_ref("TV-9"), "[[TV-9]]");
        assert_eq!(format_ref_titled("TV-9", "login bug"), "[[TV-9|login bug]]");
        assert_eq!(format_refs(&["TV-1".into(), "TV-2".into()], ", "), "[[TV-1]], [[TV-2]]");
    }

    #[test]
    fn inline_code_widens_fence_for_backticks() {
        assert_eq!(inline_code("cargo build"), "`cargo build`");
        assert_eq!(inline_code("a`b"), "``a`b``");
        assert_eq!(inline_code("`lead"), "`` `lead ``");
    }

    #[test]
    fn size_formatting_uses_binary_units() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(1023), "1023 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(-5), "0 B");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(format_size(1024 * 1024 * 1024), "1.0 GB");
    }

    #[test]
    fn description_truncates_with_counted_ellipsis() {
        let out = compose_description("0123456789", 8, false);
        assert_eq!(out, "01234...");
        assert_eq!(out.chars().count(), 8);
        assert_eq!(compose_description("short", 8, false), "short");
        assert_eq!(compose_description("unlimited text", 0, false), "unlimited text");
    }

    #[test]
    fn description_header_and_markup_conversion() {
        assert_eq!(
            compose_description("some *important* text", 0, true),
            "## Description\n\nsome **important** text\n"
        );
    }

    #[test]
    fn unknown_format_selectors_error_immediately() {
        assert!(MetadataStyle::parse("yaml").is_err());
        assert!(CommentStyle::parse("inline").is_err());
        assert_eq!(MetadataStyle::parse("table").expect("style"), MetadataStyle::Table);
    }

    #[test]
    fn empty_comment_list_renders_nothing() {
        assert_eq!(compose_comments(&[], CommentStyle::Callout, true), "");
        assert_eq!(compose_comments(&[], CommentStyle::Callout, false), "");
    }

    #[test]
    fn comment_styles() {
        let comment = TicketComment {
            author: "Alice".into(),
            body: "looks *good* to me".into(),
            created: "2026-01-05".into(),
        };
        assert_eq!(
            compose_comment(&comment, CommentStyle::Callout),
            "> [!quote]- Alice (2026-01-05)\n> looks **good** to me"
        );
        assert_eq!(
            compose_comment(&comment, CommentStyle::Quote),
            "> **Alice (2026-01-05)**\n> looks **good** to me"
        );
        assert_eq!(
            compose_comment(&comment, CommentStyle::Section),
            "### Alice (2026-01-05)\n\nlooks **good** to me\n"
        );
    }

    #[test]
    fn link_lines_mark_inward_direction() {
        let outward = TicketLink {
            direction: LinkDirection::Outward,
            link_type: "Blocks".into(),
            key: "TV-3".into(),
            summary: "rollout".into(),
        };
        let inward = TicketLink {
            direction: LinkDirection::Inward,
            link_type: "Duplicates".into(),
            key: "TV-4".into(),
            summary: String::new(),
        };
        assert_eq!(compose_link_line(&outward), "- Blocks: [[TV-3]] - rollout");
        assert_eq!(compose_link_line(&inward), "- Duplicates (inward): [[TV-4]]");
    }
}
