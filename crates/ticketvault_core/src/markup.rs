use std::sync::LazyLock;

use regex::{Captures, Regex};

/// One named step in a conversion pipeline. Order matters: several rules
/// rewrite text the following rules must not re-match (see `RULE ORDER`
/// comments below), so both directions are encoded as explicit rule lists
/// rather than scattered replace calls.
pub struct RewriteRule {
    pub name: &'static str,
    pub apply: fn(&str) -> String,
}

/// Wiki markup → Markdown. Total: never fails, empty input yields empty
/// output, malformed or unbalanced markup passes through untouched.
pub fn to_markdown(text: &str) -> String {
    let mut out = text.to_string();
    for rule in TO_MARKDOWN_RULES {
        out = (rule.apply)(&out);
    }
    out.trim().to_string()
}

/// Markdown → wiki markup. Intentionally partial: tables, numbered lists
/// and horizontal rules pass through unchanged.
pub fn to_wiki(text: &str) -> String {
    let mut out = text.to_string();
    for rule in TO_WIKI_RULES {
        out = (rule.apply)(&out);
    }
    out.trim().to_string()
}

// RULE ORDER: list markers are rewritten before headings so that the `#`
// produced for a heading is never re-matched by the numbered-list rule.
pub static TO_MARKDOWN_RULES: &[RewriteRule] = &[
    RewriteRule { name: "code-fence", apply: wiki_code_fences },
    RewriteRule { name: "inline-code", apply: wiki_inline_code },
    RewriteRule { name: "bullet-list", apply: wiki_bullets },
    RewriteRule { name: "numbered-list", apply: wiki_numbered },
    RewriteRule { name: "heading", apply: wiki_headings },
    RewriteRule { name: "emphasis", apply: wiki_emphasis },
    RewriteRule { name: "piped-link", apply: wiki_piped_links },
    RewriteRule { name: "bare-link", apply: wiki_bare_links },
    RewriteRule { name: "image", apply: wiki_images },
    RewriteRule { name: "checkbox", apply: wiki_checkboxes },
    RewriteRule { name: "horizontal-rule", apply: wiki_rules },
    RewriteRule { name: "table-row", apply: wiki_tables },
];

pub static TO_WIKI_RULES: &[RewriteRule] = &[
    RewriteRule { name: "code-fence", apply: md_code_fences },
    RewriteRule { name: "inline-code", apply: md_inline_code },
    RewriteRule { name: "heading", apply: md_headings },
    RewriteRule { name: "emphasis", apply: md_emphasis },
    RewriteRule { name: "link", apply: md_links },
    RewriteRule { name: "image", apply: md_images },
    RewriteRule { name: "bullet-list", apply: md_bullets },
    RewriteRule { name: "checkbox", apply: md_checkboxes },
];

fn wiki_code_fences(text: &str) -> String {
    static RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?s)\{code(?::([A-Za-z0-9+#._-]+))?\}(.*?)\{code\}").unwrap()
    });
    RE.replace_all(text, |caps: &Captures| {
        let lang = caps.get(1).map(|m| m.as_str()).unwrap_or("");
        let body = normalize_fence_body(&caps[2]);
        format!("```{lang}\n{body}\n```")
    })
    .into_owned()
}

fn wiki_inline_code(text: &str) -> String {
    static RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\{\{([^{}\n]+)\}\}").unwrap());
    RE.replace_all(text, "`$1`").into_owned()
}

fn wiki_bullets(text: &str) -> String {
    static RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^(\*+)\s+").unwrap());
    RE.replace_all(text, |caps: &Captures| {
        format!("{}- ", "  ".repeat(caps[1].len() - 1))
    })
    .into_owned()
}

// Ordinal renumbering is not attempted: every numbered line becomes `1.`
// and Markdown renderers renumber on display.
fn wiki_numbered(text: &str) -> String {
    static RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^#+\s+").unwrap());
    RE.replace_all(text, "1. ").into_owned()
}

fn wiki_headings(text: &str) -> String {
    static RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?m)^h([1-6])\.(.*)$").unwrap());
    RE.replace_all(text, |caps: &Captures| {
        let level: usize = caps[1].parse().unwrap_or(1);
        format!("{}{}", "#".repeat(level), &caps[2])
    })
    .into_owned()
}

fn wiki_emphasis(text: &str) -> String {
    rewrite_spans(text, &[("*", "**"), ("_", "*"), ("-", "~~")])
}

fn wiki_piped_links(text: &str) -> String {
    static RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\[([^\[\]|\n]+)\|([^\[\]\n]+)\]").unwrap());
    RE.replace_all(text, "[$1]($2)").into_owned()
}

fn wiki_bare_links(text: &str) -> String {
    static RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\[([^\[\]|\n]+)\](\()?").unwrap());
    RE.replace_all(text, |caps: &Captures| {
        if caps.get(2).is_some() {
            // Already a Markdown link with a parenthesized target.
            caps[0].to_string()
        } else {
            format!("[{}]({})", &caps[1], &caps[1])
        }
    })
    .into_owned()
}

fn wiki_images(text: &str) -> String {
    static RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"!([^\s!|]+)(?:\|[^!\n]*)?!").unwrap());
    RE.replace_all(text, "![]($1)").into_owned()
}

fn wiki_checkboxes(text: &str) -> String {
    text.replace("(/)", "[x]").replace("(x)", "[ ]").replace("( )", "[ ]")
}

fn wiki_rules(text: &str) -> String {
    static RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^-{4,}\s*$").unwrap());
    RE.replace_all(text, "---").into_owned()
}

fn wiki_tables(text: &str) -> String {
    static RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^\|.+\|\s*$").unwrap());
    RE.replace_all(text, |caps: &Captures| {
        let line = caps[0].trim_end();
        let delimiter = if line.starts_with("||") { "||" } else { "|" };
        let cells: Vec<&str> = line
            .trim_matches('|')
            .split(delimiter)
            .map(str::trim)
            .filter(|cell| !cell.is_empty())
            .collect();
        if cells.is_empty() {
            line.to_string()
        } else {
            format!("| {} |", cells.join(" | "))
        }
    })
    .into_owned()
}

fn md_code_fences(text: &str) -> String {
    static RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?s)```([A-Za-z0-9+#._-]*)\n?(.*?)```").unwrap()
    });
    RE.replace_all(text, |caps: &Captures| {
        let body = normalize_fence_body(&caps[2]);
        if caps[1].is_empty() {
            format!("{{code}}\n{body}\n{{code}}")
        } else {
            format!("{{code:{}}}\n{body}\n{{code}}", &caps[1])
        }
    })
    .into_owned()
}

fn md_inline_code(text: &str) -> String {
    static RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"`([^`\n]+)`").unwrap());
    RE.replace_all(text, "{{$1}}").into_owned()
}

// Requires a space after the marker run so hashtag lines (`#status/done`)
// survive the reverse direction.
fn md_headings(text: &str) -> String {
    static RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?m)^(#{1,6})\s+(.*)$").unwrap());
    RE.replace_all(text, |caps: &Captures| {
        format!("h{}. {}", caps[1].len(), &caps[2])
    })
    .into_owned()
}

// Single pass with strong before plain, otherwise the `*bold*` produced for
// `**bold**` would immediately be re-eaten by the plain-emphasis rule.
fn md_emphasis(text: &str) -> String {
    rewrite_spans(text, &[("**", "*"), ("~~", "-"), ("*", "_")])
}

fn md_links(text: &str) -> String {
    static RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(!)?\[([^\]\n]+)\]\(([^)\n]+)\)").unwrap());
    RE.replace_all(text, |caps: &Captures| {
        if caps.get(1).is_some() {
            // Image reference, handled by the next rule.
            caps[0].to_string()
        } else {
            format!("[{}|{}]", &caps[2], &caps[3])
        }
    })
    .into_owned()
}

fn md_images(text: &str) -> String {
    static RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"!\[[^\]\n]*\]\(([^)\n]+)\)").unwrap());
    RE.replace_all(text, "!$1!").into_owned()
}

// Indent depth is approximate: one star per two leading spaces, plus one.
fn md_bullets(text: &str) -> String {
    static RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^( *)- ").unwrap());
    RE.replace_all(text, |caps: &Captures| {
        format!("{} ", "*".repeat(caps[1].len() / 2 + 1))
    })
    .into_owned()
}

fn md_checkboxes(text: &str) -> String {
    text.replace("[x]", "(/)").replace("[ ]", "( )")
}

fn normalize_fence_body(body: &str) -> String {
    body.trim_matches('\n').to_string()
}

/// Rewrite delimited emphasis spans in one pass. Each span must be bounded
/// by non-word characters on both sides, must not contain its own delimiter
/// or a newline, and must not start or end with whitespace. First matching
/// rule at a position wins, and replacements are never rescanned.
fn rewrite_spans(text: &str, rules: &[(&str, &str)]) -> String {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut pos = 0;

    'outer: while pos < bytes.len() {
        for (delim, replacement) in rules {
            if let Some(span) = match_span(text, pos, delim) {
                out.push_str(replacement);
                out.push_str(span);
                out.push_str(replacement);
                pos += delim.len() * 2 + span.len();
                continue 'outer;
            }
        }
        let ch = text[pos..].chars().next().unwrap_or('\u{fffd}');
        out.push(ch);
        pos += ch.len_utf8();
    }

    out
}

fn match_span<'a>(text: &'a str, pos: usize, delim: &str) -> Option<&'a str> {
    if !text[pos..].starts_with(delim) {
        return None;
    }
    if text[..pos].chars().next_back().is_some_and(is_word_char) {
        return None;
    }

    let start = pos + delim.len();
    let end = start + text[start..].find(delim)?;
    let inner = &text[start..end];
    if inner.is_empty()
        || inner.contains('\n')
        || inner.contains(delim.chars().next().unwrap_or('\0'))
        || inner.starts_with(char::is_whitespace)
        || inner.ends_with(char::is_whitespace)
    {
        return None;
    }

    let after = end + delim.len();
    if text[after..].chars().next().is_some_and(is_word_char) {
        return None;
    }
    Some(inner)
}

fn is_word_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_round_trips_empty() {
        assert_eq!(to_markdown(""), "");
        assert_eq!(to_wiki(""), "");
    }

    #[test]
    fn headings_convert_both_ways() {
        assert_eq!(to_markdown("h1. Title"), "# Title");
        assert_eq!(to_markdown("h3. Deep dive"), "### Deep dive");
        assert_eq!(to_wiki("# Title"), "h1. Title");
        assert_eq!(to_wiki("###### Fine print"), "h6. Fine print");
    }

    #[test]
    fn heading_fixture_round_trips_exactly() {
        assert_eq!(to_wiki(&to_markdown("h1. Title")), "h1. Title");
    }

    #[test]
    fn strong_fixture_round_trips_exactly() {
        assert_eq!(to_markdown("*bold*"), "**bold**");
        assert_eq!(to_wiki(&to_markdown("*bold*")), "*bold*");
    }

    #[test]
    fn emphasis_requires_word_boundaries() {
        assert_eq!(to_markdown("well-known co-op"), "well-known co-op");
        assert_eq!(to_markdown("2024-01-15"), "2024-01-15");
        assert_eq!(to_markdown("say _hi_ now"), "say *hi* now");
        assert_eq!(to_markdown("drop -this- word"), "drop ~~this~~ word");
    }

    #[test]
    fn emphasis_skips_loose_delimiters() {
        // Spans with whitespace against a delimiter are prose, not markup.
        assert_eq!(to_markdown("a * b * c * d"), "a * b * c * d");
        assert_eq!(to_markdown("foo - bar - baz"), "foo - bar - baz");
    }

    #[test]
    fn strong_converts_before_plain_on_the_way_back() {
        assert_eq!(to_wiki("**bold** and *slanted*"), "*bold* and _slanted_");
    }

    #[test]
    fn code_fences_preserve_language_tag() {
        assert_eq!(
            to_markdown("{code:rust}\nfn main() {}\n{code}"),
            "```rust\nfn main() {}\n```"
        );
        assert_eq!(to_markdown("{code}\nplain\n{code}"), "```\nplain\n```");
        assert_eq!(
            to_wiki("```rust\nfn main() {}\n```"),
            "{code:rust}\nfn main() {}\n{code}"
        );
    }

    #[test]
    fn unterminated_fence_passes_through() {
        assert_eq!(to_markdown("{code}\nno closing"), "{code}\nno closing");
        assert_eq!(to_wiki("```\nno closing"), "```\nno closing");
    }

    #[test]
    fn inline_code_round_trips() {
        assert_eq!(to_markdown("use {{cargo build}} here"), "use `cargo build` here");
        assert_eq!(to_wiki("use `cargo build` here"), "use {{cargo build}} here");
    }

    #[test]
    fn piped_and_bare_links() {
        assert_eq!(
            to_markdown("[docs|https://example.org]"),
            "[docs](https://example.org)"
        );
        assert_eq!(
            to_markdown("[https://example.org]"),
            "[https://example.org](https://example.org)"
        );
    }

    #[test]
    fn bare_link_rule_leaves_markdown_links_alone() {
        assert_eq!(to_markdown("[a|b] then [c]"), "[a](b) then [c](c)");
    }

    #[test]
    fn links_convert_back_without_eating_images() {
        assert_eq!(to_wiki("[docs](https://example.org)"), "[docs|https://example.org]");
        assert_eq!(to_wiki("![shot](img/a.png)"), "!img/a.png!");
    }

    #[test]
    fn images_drop_attributes() {
        assert_eq!(to_markdown("!screen.png!"), "![](screen.png)");
        assert_eq!(
            to_markdown("!screen.png|width=200,alt=shot!"),
            "![](screen.png)"
        );
    }

    #[test]
    fn bullet_depth_maps_to_indent() {
        assert_eq!(to_markdown("* one\n** two\n*** three"), "- one\n  - two\n    - three");
        assert_eq!(to_wiki("- one\n  - two\n    - three"), "* one\n** two\n*** three");
    }

    #[test]
    fn numbered_lines_become_literal_ones() {
        assert_eq!(to_markdown("# first\n## nested\n# second"), "1. first\n1. nested\n1. second");
    }

    #[test]
    fn heading_output_is_not_renumbered() {
        // Would read `1. Release notes` if the list rule ran after headings.
        assert_eq!(to_markdown("h1. Release notes"), "# Release notes");
    }

    #[test]
    fn checkbox_tokens() {
        assert_eq!(to_markdown("(/) done (x) failed ( ) open"), "[x] done [ ] failed [ ] open");
        assert_eq!(to_wiki("[x] done [ ] open"), "(/) done ( ) open");
    }

    #[test]
    fn horizontal_rule_collapses() {
        assert_eq!(to_markdown("above\n----\nbelow"), "above\n---\nbelow");
        assert_eq!(to_markdown("above\n--------\nbelow"), "above\n---\nbelow");
    }

    #[test]
    fn table_rows_flatten_to_single_pipes() {
        assert_eq!(to_markdown("||Key||Status||"), "| Key | Status |");
        assert_eq!(to_markdown("|TV-1|Open|"), "| TV-1 | Open |");
    }

    #[test]
    fn unmatched_markdown_passes_through_reverse() {
        assert_eq!(to_wiki("1. first\n2. second"), "1. first\n2. second");
        assert_eq!(to_wiki("| a | b |"), "| a | b |");
        assert_eq!(to_wiki("---"), "---");
    }

    #[test]
    fn hashtag_lines_survive_the_reverse_direction() {
        assert_eq!(to_wiki("#status/in-progress #priority/high"), "#status/in-progress #priority/high");
    }

    #[test]
    fn totality_on_unbalanced_delimiters() {
        for input in ["*dangling", "{{open", "[a|b", "!img.png", "h7. not a heading", "_ _"] {
            let md = to_markdown(input);
            let wiki = to_wiki(input);
            assert!(!md.is_empty());
            assert!(!wiki.is_empty());
        }
    }

    #[test]
    fn mixed_document_converts() {
        let wiki = "h2. Summary\n\nThe fix is *ready* for review.\n\n* step one\n* step two\n\n{code:sh}\ncargo test\n{code}";
        let md = to_markdown(wiki);
        assert_eq!(
            md,
            "## Summary\n\nThe fix is **ready** for review.\n\n- step one\n- step two\n\n```sh\ncargo test\n```"
        );
    }
}
