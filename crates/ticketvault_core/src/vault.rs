use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use walkdir::WalkDir;

use crate::compose::SYNCED_FIELD;
use crate::render::RenderedDocument;
use crate::ticket::RemoteTicket;

const SEPARATOR: char = '-';
const SUMMARY_MAX: usize = 50;
const CATEGORY_MAX: usize = 50;
const MARKDOWN_EXT: &str = "md";

/// Filesystem-safe name: reserved characters stripped, `+` and whitespace
/// runs collapsed to a single separator, length capped, no separator at
/// either edge.
pub fn sanitize_name(value: &str, max_length: usize, lowercase: bool) -> String {
    let mut out = String::with_capacity(value.len());
    let mut pending_separator = false;
    for ch in value.chars() {
        if matches!(ch, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*') {
            continue;
        }
        if ch.is_whitespace() || ch == '+' || ch == SEPARATOR {
            pending_separator = !out.is_empty();
            continue;
        }
        if pending_separator {
            out.push(SEPARATOR);
            pending_separator = false;
        }
        out.push(ch);
    }
    if max_length > 0 {
        out.truncate(
            out.char_indices()
                .nth(max_length)
                .map(|(index, _)| index)
                .unwrap_or(out.len()),
        );
    }
    let trimmed = out.trim_matches(SEPARATOR);
    if lowercase {
        trimmed.to_lowercase()
    } else {
        trimmed.to_string()
    }
}

/// `KEY-sanitized-summary.ext`, or `KEY.ext` when the summary is empty.
pub fn ticket_filename(ticket: &RemoteTicket, extension: &str) -> String {
    let summary = sanitize_name(&ticket.summary, SUMMARY_MAX, true);
    if summary.is_empty() {
        format!("{}.{extension}", ticket.key)
    } else {
        format!("{}-{summary}.{extension}", ticket.key)
    }
}

/// Deterministic target location for a ticket inside the vault.
pub fn ticket_path(
    vault_root: &Path,
    category: Option<&str>,
    ticket: &RemoteTicket,
    extension: &str,
) -> PathBuf {
    let dir = match category.map(|name| sanitize_name(name, CATEGORY_MAX, false)) {
        Some(name) if !name.is_empty() => vault_root.join(name),
        _ => vault_root.to_path_buf(),
    };
    dir.join(ticket_filename(ticket, extension))
}

/// Write the rendered document unless the stored copy already matches it
/// modulo the `synced` timestamp line. Returns the written path, or `None`
/// for the unchanged no-op. Filesystem errors propagate untouched.
pub fn write_document(
    ticket: &RemoteTicket,
    rendered: &RenderedDocument,
    vault_root: &Path,
    category: Option<&str>,
    force: bool,
) -> Result<Option<PathBuf>> {
    let target = ticket_path(vault_root, category, ticket, rendered.extension);
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    if !force && target.exists() {
        let existing = fs::read_to_string(&target)
            .with_context(|| format!("failed to read {}", target.display()))?;
        if strip_synced_lines(&existing) == strip_synced_lines(&rendered.content) {
            return Ok(None);
        }
    }

    fs::write(&target, &rendered.content)
        .with_context(|| format!("failed to write {}", target.display()))?;
    Ok(Some(target))
}

/// Raw file content, `None` when the path does not exist.
pub fn read_document(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(Some(content))
}

/// First Markdown file under the vault whose name starts with the ticket
/// key. Entries are visited in file-name order so the match is stable.
pub fn find_existing_file(key: &str, vault_root: &Path) -> Option<PathBuf> {
    if key.is_empty() || !vault_root.exists() {
        return None;
    }
    for entry in WalkDir::new(vault_root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .flatten()
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some(MARKDOWN_EXT) {
            continue;
        }
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
        // `TV-1` must not claim `TV-12-other-ticket.md`.
        if stem == key || stem.starts_with(&format!("{key}{SEPARATOR}")) {
            return Some(path.to_path_buf());
        }
    }
    None
}

/// Content with every sync-timestamp line removed; the write decision and
/// the diff view both compare documents in this stripped form.
pub fn strip_synced_lines(content: &str) -> String {
    content
        .lines()
        .filter(|line| !line.trim_start().starts_with(&format!("{SYNCED_FIELD}:")))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::RenderedDocument;
    use std::fs;
    use tempfile::tempdir;

    fn ticket(key: &str, summary: &str) -> RemoteTicket {
        RemoteTicket {
            key: key.to_string(),
            summary: summary.to_string(),
            ..RemoteTicket::default()
        }
    }

    fn rendered(content: &str) -> RenderedDocument {
        RenderedDocument {
            content: content.to_string(),
            extension: "md",
        }
    }

    #[test]
    fn sanitize_strips_reserved_characters() {
        let out = sanitize_name("a<b>c:d\"e/f\\g|h?i*j", 100, false);
        for ch in ['<', '>', ':', '"', '/', '\\', '|', '?', '*'] {
            assert!(!out.contains(ch), "{ch} left in {out}");
        }
        assert_eq!(out, "abcdefghij");
    }

    #[test]
    fn sanitize_collapses_runs_and_trims_edges() {
        assert_eq!(sanitize_name("  Fix + the   login  ", 100, true), "fix-the-login");
        assert_eq!(sanitize_name("--already--dashed--", 100, false), "already-dashed");
    }

    #[test]
    fn sanitize_caps_length_without_edge_separator() {
        let out = sanitize_name("alpha beta gamma", 10, true);
        assert!(out.chars().count() <= 10);
        assert!(!out.starts_with(SEPARATOR) && !out.ends_with(SEPARATOR));
        assert_eq!(out, "alpha-beta");
    }

    #[test]
    fn filenames_embed_key_and_summary() {
        assert_eq!(
            ticket_filename(&ticket("TV-42", "Fix the Login Page"), "md"),
            "TV-42-fix-the-login-page.md"
        );
        assert_eq!(ticket_filename(&ticket("TV-42", ""), "md"), "TV-42.md");
    }

    #[test]
    fn ticket_path_joins_sanitized_category() {
        let root = Path::new("/vault");
        let path = ticket_path(root, Some("Payments / Core"), &ticket("TV-1", "x"), "md");
        assert_eq!(path, Path::new("/vault/Payments-Core/TV-1-x.md"));
        let flat = ticket_path(root, None, &ticket("TV-1", "x"), "md");
        assert_eq!(flat, Path::new("/vault/TV-1-x.md"));
    }

    #[test]
    fn write_skips_when_only_synced_line_differs() {
        let temp = tempdir().expect("tempdir");
        let tk = ticket("TV-5", "same content");
        let first = rendered("---\nkey: TV-5\nsynced: 2026-01-01 10:00\n---\nbody\n");
        let second = rendered("---\nkey: TV-5\nsynced: 2026-01-02 11:30\n---\nbody\n");

        let written = write_document(&tk, &first, temp.path(), None, false).expect("write");
        assert!(written.is_some());
        let skipped = write_document(&tk, &second, temp.path(), None, false).expect("write");
        assert!(skipped.is_none());

        let on_disk = fs::read_to_string(written.expect("path")).expect("read");
        assert!(on_disk.contains("2026-01-01 10:00"));
    }

    #[test]
    fn write_overwrites_on_real_change_or_force() {
        let temp = tempdir().expect("tempdir");
        let tk = ticket("TV-5", "same content");
        let first = rendered("---\nkey: TV-5\nsynced: 2026-01-01 10:00\n---\nbody\n");
        let changed = rendered("---\nkey: TV-5\nsynced: 2026-01-02 11:30\n---\nnew body\n");

        write_document(&tk, &first, temp.path(), None, false).expect("write");
        let rewritten = write_document(&tk, &changed, temp.path(), None, false).expect("write");
        assert!(rewritten.is_some());

        let forced = write_document(&tk, &changed, temp.path(), None, true).expect("write");
        assert!(forced.is_some());
    }

    #[test]
    fn read_document_returns_none_for_missing_path() {
        let temp = tempdir().expect("tempdir");
        assert!(read_document(&temp.path().join("nope.md")).expect("read").is_none());
        fs::write(temp.path().join("yes.md"), "content").expect("write");
        assert_eq!(
            read_document(&temp.path().join("yes.md")).expect("read"),
            Some("content".to_string())
        );
    }

    #[test]
    fn find_existing_scans_recursively_in_name_order() {
        let temp = tempdir().expect("tempdir");
        fs::create_dir_all(temp.path().join("b-category")).expect("mkdir");
        fs::create_dir_all(temp.path().join("a-category")).expect("mkdir");
        fs::write(temp.path().join("b-category/TV-7-late.md"), "b").expect("write");
        fs::write(temp.path().join("a-category/TV-7-early.md"), "a").expect("write");

        let found = find_existing_file("TV-7", temp.path()).expect("found");
        assert!(found.ends_with("a-category/TV-7-early.md"));
    }

    #[test]
    fn find_existing_ignores_longer_keys_and_other_extensions() {
        let temp = tempdir().expect("tempdir");
        fs::write(temp.path().join("TV-12-other.md"), "x").expect("write");
        fs::write(temp.path().join("TV-1-notes.txt"), "x").expect("write");
        assert!(find_existing_file("TV-1", temp.path()).is_none());

        fs::write(temp.path().join("TV-1.md"), "x").expect("write");
        let found = find_existing_file("TV-1", temp.path()).expect("found");
        assert!(found.ends_with("TV-1.md"));
    }
}
