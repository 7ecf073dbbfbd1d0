use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::client::TrackerApi;
use crate::compose::sync_stamp_now;
use crate::config::VaultConfig;
use crate::diff::{ChangeReport, compare, unified_diff};
use crate::document::LocalDocument;
use crate::markup::to_wiki;
use crate::render::{OutputFormat, compose_index, detect_category, render};
use crate::ticket::RemoteTicket;
use crate::vault::{find_existing_file, sanitize_name, strip_synced_lines, ticket_path, write_document};

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    pub category: Option<String>,
    pub force: bool,
    pub format: OutputFormat,
    pub create_index: bool,
    pub index_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncEntry {
    pub key: String,
    pub action: String,
    pub detail: Option<String>,
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub success: bool,
    pub requested: usize,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
    pub entries: Vec<SyncEntry>,
    pub index_path: Option<PathBuf>,
    pub request_count: usize,
}

/// Sync a list of ticket keys. Each ticket is fetched, compared against its
/// stored document and rewritten only when something beyond the sync stamp
/// changed. A failing key never aborts the rest of the batch.
pub fn sync_keys_with_api<A: TrackerApi>(
    api: &mut A,
    config: &VaultConfig,
    keys: &[String],
    options: &SyncOptions,
) -> Result<SyncReport> {
    let mut report = SyncReport::default();
    let mut fetched = Vec::new();

    for key in keys {
        report.requested += 1;
        match api.get_ticket(key) {
            Ok(ticket) => {
                sync_one(&ticket, config, options, &mut report);
                fetched.push(ticket);
            }
            Err(error) => record_error(&mut report, key, &error),
        }
    }

    finish_report(&mut report, api, config, options, &fetched)?;
    Ok(report)
}

/// Sync every ticket matching a JQL query.
pub fn sync_jql_with_api<A: TrackerApi>(
    api: &mut A,
    config: &VaultConfig,
    jql: &str,
    options: &SyncOptions,
) -> Result<SyncReport> {
    let tickets = api.search(jql)?;
    sync_fetched(api, config, &tickets, options)
}

/// Sync every ticket belonging to an epic.
pub fn sync_epic_with_api<A: TrackerApi>(
    api: &mut A,
    config: &VaultConfig,
    epic_key: &str,
    options: &SyncOptions,
) -> Result<SyncReport> {
    let tickets = api.get_epic_tickets(epic_key)?;
    sync_fetched(api, config, &tickets, options)
}

/// Sync project tickets with optional status/type filters.
pub fn sync_project_with_api<A: TrackerApi>(
    api: &mut A,
    config: &VaultConfig,
    project_key: &str,
    status: Option<&str>,
    issue_type: Option<&str>,
    options: &SyncOptions,
) -> Result<SyncReport> {
    let tickets = api.get_project_tickets(project_key, status, issue_type)?;
    sync_fetched(api, config, &tickets, options)
}

fn sync_fetched<A: TrackerApi>(
    api: &mut A,
    config: &VaultConfig,
    tickets: &[RemoteTicket],
    options: &SyncOptions,
) -> Result<SyncReport> {
    let mut report = SyncReport {
        requested: tickets.len(),
        ..SyncReport::default()
    };
    for ticket in tickets {
        sync_one(ticket, config, options, &mut report);
    }
    finish_report(&mut report, api, config, options, tickets)?;
    Ok(report)
}

fn sync_one(
    ticket: &RemoteTicket,
    config: &VaultConfig,
    options: &SyncOptions,
    report: &mut SyncReport,
) {
    if let Err(error) = sync_one_inner(ticket, config, options, report) {
        record_error(report, &ticket.key, &error);
    }
}

fn sync_one_inner(
    ticket: &RemoteTicket,
    config: &VaultConfig,
    options: &SyncOptions,
    report: &mut SyncReport,
) -> Result<()> {
    let tickets_root = config.tickets_path();
    let category = options
        .category
        .clone()
        .unwrap_or_else(|| detect_category(ticket));

    let (local, _) = load_local(ticket, config, options.format, Some(&category))?;
    let change = compare(local.as_ref(), ticket);

    if !change.changed && !options.force {
        report.skipped += 1;
        report.entries.push(SyncEntry {
            key: ticket.key.clone(),
            action: "skipped".to_string(),
            detail: Some("unchanged".to_string()),
            path: local.map(|doc| doc.path),
        });
        return Ok(());
    }

    let stamp = sync_stamp_now();
    let rendered = render(ticket, options.format, config, Some(&stamp))?;
    match write_document(ticket, &rendered, &tickets_root, Some(&category), options.force)? {
        Some(path) => {
            if change.is_new() {
                report.created += 1;
                report.entries.push(SyncEntry {
                    key: ticket.key.clone(),
                    action: "created".to_string(),
                    detail: None,
                    path: Some(path),
                });
            } else {
                report.updated += 1;
                report.entries.push(SyncEntry {
                    key: ticket.key.clone(),
                    action: "updated".to_string(),
                    detail: Some(change.fields.join(", ")),
                    path: Some(path),
                });
            }
        }
        None => {
            report.skipped += 1;
            report.entries.push(SyncEntry {
                key: ticket.key.clone(),
                action: "skipped".to_string(),
                detail: Some("no content change".to_string()),
                path: None,
            });
        }
    }
    Ok(())
}

fn finish_report<A: TrackerApi>(
    report: &mut SyncReport,
    api: &A,
    config: &VaultConfig,
    options: &SyncOptions,
    tickets: &[RemoteTicket],
) -> Result<()> {
    if options.create_index && !tickets.is_empty() {
        let title = options
            .index_name
            .clone()
            .unwrap_or_else(|| "Synced Tickets".to_string());
        report.index_path = Some(write_index(config, &title, tickets)?);
    }
    report.request_count = api.request_count();
    report.success = report.errors.is_empty();
    Ok(())
}

fn write_index(config: &VaultConfig, title: &str, tickets: &[RemoteTicket]) -> Result<PathBuf> {
    let tickets_root = config.tickets_path();
    fs::create_dir_all(&tickets_root)
        .with_context(|| format!("failed to create {}", tickets_root.display()))?;
    let name = sanitize_name(title, 50, true);
    let path = tickets_root.join(format!("{name}.md"));
    fs::write(&path, compose_index(title, tickets))
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

fn record_error(report: &mut SyncReport, key: &str, error: &anyhow::Error) {
    report.errors.push(format!("{key}: {error:#}"));
    report.entries.push(SyncEntry {
        key: key.to_string(),
        action: "error".to_string(),
        detail: Some(format!("{error:#}")),
        path: None,
    });
}

/// Field-level change report for one ticket, plus a unified text diff of the
/// stored document against a fresh render (sync-stamp lines ignored).
#[derive(Debug)]
pub struct TicketDiff {
    pub change: ChangeReport,
    pub local_path: Option<PathBuf>,
    pub unified: Option<String>,
}

pub fn diff_ticket_with_api<A: TrackerApi>(
    api: &mut A,
    config: &VaultConfig,
    key: &str,
) -> Result<TicketDiff> {
    let ticket = api.get_ticket(key)?;
    let (local, local_path) = load_local(&ticket, config, OutputFormat::Rich, None)?;
    let change = compare(local.as_ref(), &ticket);

    let unified = match &local {
        Some(document) => {
            let fresh = render(&ticket, OutputFormat::Rich, config, None)?;
            Some(unified_diff(
                &strip_synced_lines(&document.raw),
                &strip_synced_lines(&fresh.content),
            ))
        }
        None => None,
    };

    Ok(TicketDiff {
        change,
        local_path,
        unified,
    })
}

/// Push a Markdown comment back to the tracker in its native markup.
pub fn push_comment_with_api<A: TrackerApi>(
    api: &mut A,
    key: &str,
    markdown: &str,
) -> Result<String> {
    api.add_comment(key, &to_wiki(markdown))
}

/// Locate a ticket's stored document: the deterministic target path first,
/// then a vault-wide scan for a previously synced file.
fn load_local(
    ticket: &RemoteTicket,
    config: &VaultConfig,
    format: OutputFormat,
    category: Option<&str>,
) -> Result<(Option<LocalDocument>, Option<PathBuf>)> {
    let tickets_root = config.tickets_path();
    let target = match category {
        Some(category) => ticket_path(&tickets_root, Some(category), ticket, format.extension()),
        None => ticket_path(
            &tickets_root,
            Some(&detect_category(ticket)),
            ticket,
            format.extension(),
        ),
    };
    let path = if target.exists() {
        Some(target)
    } else {
        find_existing_file(&ticket.key, &tickets_root)
    };
    let document = match &path {
        Some(path) => LocalDocument::load(path)?,
        None => None,
    };
    Ok((document, path))
}
