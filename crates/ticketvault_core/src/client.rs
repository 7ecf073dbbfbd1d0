use std::env;
use std::thread::sleep;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde_json::{Value, json};

use crate::config::VaultConfig;
use crate::ticket::{LinkDirection, RemoteTicket, TicketAttachment, TicketComment, TicketLink};

const SEARCH_PAGE_SIZE: usize = 50;

// Custom fields Jira instances commonly use for the epic link.
const EPIC_LINK_FIELDS: &[&str] = &["customfield_10014", "customfield_10008"];

/// Read/write surface of the issue tracker. The sync engine is generic over
/// this trait so tests drive it with an in-memory fake.
pub trait TrackerApi {
    fn get_ticket(&mut self, key: &str) -> Result<RemoteTicket>;
    fn search(&mut self, jql: &str) -> Result<Vec<RemoteTicket>>;
    fn add_comment(&mut self, key: &str, body: &str) -> Result<String>;
    fn request_count(&self) -> usize;

    fn get_epic_tickets(&mut self, epic_key: &str) -> Result<Vec<RemoteTicket>> {
        self.search(&format!("\"Epic Link\" = {epic_key} OR parent = {epic_key}"))
    }

    fn get_project_tickets(
        &mut self,
        project_key: &str,
        status: Option<&str>,
        issue_type: Option<&str>,
    ) -> Result<Vec<RemoteTicket>> {
        let mut parts = vec![format!("project = {project_key}")];
        if let Some(status) = status {
            parts.push(format!("status = \"{status}\""));
        }
        if let Some(issue_type) = issue_type {
            parts.push(format!("issuetype = \"{issue_type}\""));
        }
        let jql = format!("{} ORDER BY created DESC", parts.join(" AND "));
        self.search(&jql)
    }
}

#[derive(Debug, Clone)]
pub struct JiraClientConfig {
    pub base_url: String,
    pub email: String,
    pub api_token: String,
    pub timeout_ms: u64,
    pub rate_limit_read_ms: u64,
    pub rate_limit_write_ms: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl JiraClientConfig {
    /// Resolve connection settings, failing fast when credentials are missing.
    pub fn from_config(config: &VaultConfig) -> Result<Self> {
        let errors = config.validate();
        if !errors.is_empty() {
            bail!("configuration errors: {}", errors.join(", "));
        }
        Ok(Self {
            base_url: config
                .tracker_url()
                .unwrap_or_default()
                .trim_end_matches('/')
                .to_string(),
            email: config.tracker_email().unwrap_or_default(),
            api_token: config.tracker_token().unwrap_or_default(),
            timeout_ms: env_value_u64("JIRA_HTTP_TIMEOUT_MS", 30_000),
            rate_limit_read_ms: env_value_u64("JIRA_RATE_LIMIT_READ", 200),
            rate_limit_write_ms: env_value_u64("JIRA_RATE_LIMIT_WRITE", 1_000),
            max_retries: env_value_usize("JIRA_HTTP_RETRIES", 2),
            retry_delay_ms: env_value_u64("JIRA_HTTP_RETRY_DELAY_MS", 500),
        })
    }
}

/// Blocking Jira REST v2 client. A caller-owned value threaded through
/// calls; nothing here is cached process-wide.
pub struct JiraClient {
    client: Client,
    config: JiraClientConfig,
    last_request_at: Option<Instant>,
    request_count: usize,
}

impl JiraClient {
    pub fn new(config: JiraClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("failed to build tracker HTTP client")?;
        Ok(Self {
            client,
            config,
            last_request_at: None,
            request_count: 0,
        })
    }

    pub fn from_vault_config(config: &VaultConfig) -> Result<Self> {
        Self::new(JiraClientConfig::from_config(config)?)
    }

    fn request_json_get(&mut self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let url = format!("{}{path}", self.config.base_url);
        for attempt in 0..=self.config.max_retries {
            self.apply_rate_limit(false);
            let response = self
                .client
                .get(&url)
                .basic_auth(&self.config.email, Some(&self.config.api_token))
                .header("Accept", "application/json")
                .query(query)
                .send();

            match response {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        if attempt < self.config.max_retries && is_retryable_status(status) {
                            self.wait_before_retry(attempt);
                            continue;
                        }
                        bail!("tracker request {path} failed with HTTP {status}");
                    }
                    return response
                        .json()
                        .context("failed to decode tracker JSON response");
                }
                Err(error) => {
                    if attempt < self.config.max_retries && is_retryable_error(&error) {
                        self.wait_before_retry(attempt);
                        continue;
                    }
                    return Err(error).with_context(|| format!("failed to call {path}"));
                }
            }
        }
        bail!("tracker request {path} exhausted retry budget")
    }

    fn request_json_post(&mut self, path: &str, body: &Value) -> Result<Value> {
        let url = format!("{}{path}", self.config.base_url);
        self.apply_rate_limit(true);
        let response = self
            .client
            .post(&url)
            .basic_auth(&self.config.email, Some(&self.config.api_token))
            .header("Accept", "application/json")
            .json(body)
            .send()
            .with_context(|| format!("failed to call {path}"))?;

        let status = response.status();
        if !status.is_success() {
            bail!("tracker request {path} failed with HTTP {status}");
        }
        response
            .json()
            .context("failed to decode tracker JSON response")
    }

    fn apply_rate_limit(&mut self, is_write: bool) {
        let gap = Duration::from_millis(if is_write {
            self.config.rate_limit_write_ms
        } else {
            self.config.rate_limit_read_ms
        });
        if let Some(last) = self.last_request_at {
            let elapsed = last.elapsed();
            if elapsed < gap {
                sleep(gap - elapsed);
            }
        }
        self.last_request_at = Some(Instant::now());
        self.request_count += 1;
    }

    fn wait_before_retry(&self, attempt: usize) {
        let backoff = self.config.retry_delay_ms.saturating_mul(attempt as u64 + 1);
        sleep(Duration::from_millis(backoff));
    }
}

impl TrackerApi for JiraClient {
    fn get_ticket(&mut self, key: &str) -> Result<RemoteTicket> {
        let payload = self.request_json_get(&format!("/rest/api/2/issue/{key}"), &[])?;
        decode_issue(&payload, &self.config.base_url)
    }

    fn search(&mut self, jql: &str) -> Result<Vec<RemoteTicket>> {
        let mut tickets = Vec::new();
        let mut start_at = 0usize;
        loop {
            let payload = self.request_json_get(
                "/rest/api/2/search",
                &[
                    ("jql", jql.to_string()),
                    ("startAt", start_at.to_string()),
                    ("maxResults", SEARCH_PAGE_SIZE.to_string()),
                ],
            )?;
            let issues = payload
                .get("issues")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let batch = issues.len();
            for issue in &issues {
                tickets.push(decode_issue(issue, &self.config.base_url)?);
            }
            start_at += batch;
            if batch < SEARCH_PAGE_SIZE {
                break;
            }
        }
        Ok(tickets)
    }

    fn add_comment(&mut self, key: &str, body: &str) -> Result<String> {
        let payload = self.request_json_post(
            &format!("/rest/api/2/issue/{key}/comment"),
            &json!({ "body": body }),
        )?;
        payload
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("comment response for {key} carried no id"))
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

/// Decode one Jira issue payload into the normalized record.
pub fn decode_issue(value: &Value, base_url: &str) -> Result<RemoteTicket> {
    let Some(key) = value.get("key").and_then(Value::as_str) else {
        bail!("issue payload carried no key");
    };
    let fields = value.get("fields").cloned().unwrap_or(Value::Null);

    let mut ticket = RemoteTicket {
        key: key.to_string(),
        summary: str_field(&fields, "summary"),
        description: str_field(&fields, "description"),
        status: named_field(&fields, "status"),
        priority: named_field(&fields, "priority"),
        issue_type: named_field(&fields, "issuetype"),
        assignee: display_name(&fields, "assignee"),
        reporter: display_name(&fields, "reporter"),
        created: opt_str_field(&fields, "created"),
        updated: opt_str_field(&fields, "updated"),
        resolved: opt_str_field(&fields, "resolutiondate"),
        labels: str_list(&fields, "labels"),
        components: named_list(&fields, "components"),
        fix_versions: named_list(&fields, "fixVersions"),
        url: format!("{base_url}/browse/{key}"),
        ..RemoteTicket::default()
    };

    if let Some(parent) = fields.get("parent") {
        ticket.parent_key = parent.get("key").and_then(Value::as_str).map(str::to_string);
        ticket.parent_summary = parent
            .pointer("/fields/summary")
            .and_then(Value::as_str)
            .map(str::to_string);
    }

    for field in EPIC_LINK_FIELDS {
        if let Some(epic) = fields.get(*field).and_then(Value::as_str)
            && !epic.is_empty()
        {
            ticket.epic_key = Some(epic.to_string());
            break;
        }
    }

    if let Some(subtasks) = fields.get("subtasks").and_then(Value::as_array) {
        ticket.subtasks = subtasks
            .iter()
            .filter_map(|subtask| subtask.get("key").and_then(Value::as_str))
            .map(str::to_string)
            .collect();
    }

    if let Some(links) = fields.get("issuelinks").and_then(Value::as_array) {
        for link in links {
            let link_type = link
                .pointer("/type/name")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            if let Some(target) = link.get("outwardIssue") {
                ticket.links.push(decoded_link(target, link_type, LinkDirection::Outward));
            } else if let Some(target) = link.get("inwardIssue") {
                ticket.links.push(decoded_link(target, link_type, LinkDirection::Inward));
            }
        }
    }

    if let Some(comments) = fields.pointer("/comment/comments").and_then(Value::as_array) {
        for comment in comments {
            ticket.comments.push(TicketComment {
                author: comment
                    .pointer("/author/displayName")
                    .and_then(Value::as_str)
                    .unwrap_or("Unknown")
                    .to_string(),
                body: comment
                    .get("body")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string(),
                created: comment
                    .get("created")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string(),
            });
        }
    }

    if let Some(attachments) = fields.get("attachment").and_then(Value::as_array) {
        for attachment in attachments {
            ticket.attachments.push(TicketAttachment {
                filename: str_field(attachment, "filename"),
                url: str_field(attachment, "content"),
                size: attachment.get("size").and_then(Value::as_i64).unwrap_or(0),
            });
        }
    }

    Ok(ticket)
}

fn decoded_link(target: &Value, link_type: String, direction: LinkDirection) -> TicketLink {
    TicketLink {
        direction,
        link_type,
        key: target
            .get("key")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string(),
        summary: target
            .pointer("/fields/summary")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string(),
    }
}

fn str_field(value: &Value, name: &str) -> String {
    value
        .get(name)
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string()
}

fn opt_str_field(value: &Value, name: &str) -> Option<String> {
    value
        .get(name)
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn named_field(value: &Value, name: &str) -> String {
    value
        .pointer(&format!("/{name}/name"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string()
}

fn display_name(value: &Value, name: &str) -> String {
    value
        .pointer(&format!("/{name}/displayName"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string()
}

fn str_list(value: &Value, name: &str) -> Vec<String> {
    value
        .get(name)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn named_list(value: &Value, name: &str) -> Vec<String> {
    value
        .get(name)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("name").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect()
}

fn env_value_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

fn env_value_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_issue_maps_core_fields() {
        let payload = json!({
            "key": "TV-42",
            "fields": {
                "summary": "Fix the login page",
                "description": "Users *cannot* log in.",
                "status": {"name": "In Progress"},
                "priority": {"name": "High"},
                "issuetype": {"name": "Bug"},
                "assignee": {"displayName": "Alice"},
                "reporter": {"displayName": "Bob"},
                "created": "2026-01-10T08:00:00.000+0000",
                "updated": "2026-02-01T10:00:00.000+0000",
                "labels": ["auth", "web"],
                "components": [{"name": "frontend"}],
                "fixVersions": [{"name": "1.4"}],
                "parent": {"key": "TV-40", "fields": {"summary": "Login epic work"}},
                "customfield_10014": "TV-30",
                "subtasks": [{"key": "TV-43"}],
                "issuelinks": [
                    {"type": {"name": "Blocks"}, "outwardIssue": {"key": "TV-50", "fields": {"summary": "Release"}}},
                    {"type": {"name": "Duplicates"}, "inwardIssue": {"key": "TV-51"}}
                ],
                "comment": {"comments": [
                    {"author": {"displayName": "Carol"}, "body": "retested", "created": "2026-02-01"}
                ]},
                "attachment": [
                    {"filename": "trace.log", "content": "https://tracker/file/1", "size": 1536}
                ]
            }
        });

        let ticket = decode_issue(&payload, "https://tracker").expect("decode");
        assert_eq!(ticket.key, "TV-42");
        assert_eq!(ticket.status, "In Progress");
        assert_eq!(ticket.assignee, "Alice");
        assert_eq!(ticket.labels, vec!["auth".to_string(), "web".to_string()]);
        assert_eq!(ticket.components, vec!["frontend".to_string()]);
        assert_eq!(ticket.parent_key.as_deref(), Some("TV-40"));
        assert_eq!(ticket.parent_summary.as_deref(), Some("Login epic work"));
        assert_eq!(ticket.epic_key.as_deref(), Some("TV-30"));
        assert_eq!(ticket.subtasks, vec!["TV-43".to_string()]);
        assert_eq!(ticket.links.len(), 2);
        assert_eq!(ticket.links[0].direction, LinkDirection::Outward);
        assert_eq!(ticket.links[1].direction, LinkDirection::Inward);
        assert_eq!(ticket.links[1].summary, "");
        assert_eq!(ticket.comments[0].author, "Carol");
        assert_eq!(ticket.attachments[0].size, 1536);
        assert_eq!(ticket.url, "https://tracker/browse/TV-42");
    }

    #[test]
    fn decode_issue_tolerates_sparse_fields() {
        let payload = json!({"key": "TV-1", "fields": {"summary": "Bare"}});
        let ticket = decode_issue(&payload, "https://tracker").expect("decode");
        assert_eq!(ticket.key, "TV-1");
        assert_eq!(ticket.status, "");
        assert!(ticket.updated.is_none());
        assert!(ticket.links.is_empty());
    }

    #[test]
    fn decode_issue_requires_a_key() {
        let payload = json!({"fields": {"summary": "No key"}});
        assert!(decode_issue(&payload, "https://tracker").is_err());
    }

    #[test]
    fn project_jql_includes_filters() {
        struct Probe {
            last_jql: Option<String>,
        }
        impl TrackerApi for Probe {
            fn get_ticket(&mut self, _key: &str) -> Result<RemoteTicket> {
                unreachable!("not used")
            }
            fn search(&mut self, jql: &str) -> Result<Vec<RemoteTicket>> {
                self.last_jql = Some(jql.to_string());
                Ok(Vec::new())
            }
            fn add_comment(&mut self, _key: &str, _body: &str) -> Result<String> {
                unreachable!("not used")
            }
            fn request_count(&self) -> usize {
                0
            }
        }

        let mut probe = Probe { last_jql: None };
        probe
            .get_project_tickets("TV", Some("Done"), Some("Bug"))
            .expect("search");
        assert_eq!(
            probe.last_jql.as_deref(),
            Some("project = TV AND status = \"Done\" AND issuetype = \"Bug\" ORDER BY created DESC")
        );

        probe.get_epic_tickets("TV-30").expect("search");
        assert_eq!(
            probe.last_jql.as_deref(),
            Some("\"Epic Link\" = TV-30 OR parent = TV-30")
        );
    }
}
