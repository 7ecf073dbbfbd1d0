use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use ticketvault_core::client::{JiraClient, TrackerApi};
use ticketvault_core::config::{CONFIG_FILENAME, VaultConfig, load_config, write_default_config};
use ticketvault_core::render::{OutputFormat, render};
use ticketvault_core::sync::{
    SyncOptions, SyncReport, diff_ticket_with_api, push_comment_with_api, sync_epic_with_api,
    sync_jql_with_api, sync_keys_with_api, sync_project_with_api,
};

#[derive(Debug, Parser)]
#[command(
    name = "ticketvault",
    version,
    about = "Mirror issue-tracker tickets into a local Markdown vault"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH", help = "Vault root directory")]
    vault: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH", help = "Config file path")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print reports as JSON")]
    json: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    vault: Option<PathBuf>,
    config: Option<PathBuf>,
    json: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            vault: cli.vault.clone(),
            config: cli.config.clone(),
            json: cli.json,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Create the vault layout and a starter config")]
    Init(InitArgs),
    #[command(about = "Sync one or more tickets by key")]
    Sync(SyncArgs),
    #[command(about = "Sync every ticket matching a JQL query")]
    Jql(JqlArgs),
    #[command(about = "Sync every ticket in an epic")]
    Epic(EpicArgs),
    #[command(about = "Sync tickets from a project")]
    Project(ProjectArgs),
    #[command(about = "Fetch a ticket and print it without writing")]
    Read(ReadArgs),
    #[command(about = "Show what a sync would change for a ticket")]
    Diff(DiffArgs),
    #[command(about = "Add a Markdown comment to a ticket")]
    Comment(CommentArgs),
    #[command(about = "Print the resolved configuration")]
    Config,
}

#[derive(Debug, Args)]
struct InitArgs {
    #[arg(long, help = "Overwrite an existing config file")]
    force: bool,
}

#[derive(Debug, Args)]
struct SyncArgs {
    #[arg(required = true, value_name = "KEY")]
    keys: Vec<String>,
    #[arg(short = 'c', long, value_name = "NAME", help = "Category folder override")]
    category: Option<String>,
    #[arg(long, help = "Rewrite even when unchanged")]
    force: bool,
    #[arg(long, default_value = "rich", help = "Output format (rich, plain, json)")]
    format: String,
}

#[derive(Debug, Args)]
struct JqlArgs {
    query: String,
    #[arg(short = 'c', long, value_name = "NAME", help = "Category folder override")]
    category: Option<String>,
    #[arg(long, help = "Rewrite even when unchanged")]
    force: bool,
    #[arg(long, help = "Write an index document for the batch")]
    index: bool,
    #[arg(long, value_name = "NAME", help = "Title for the index document")]
    index_name: Option<String>,
}

#[derive(Debug, Args)]
struct EpicArgs {
    key: String,
    #[arg(long, help = "Rewrite even when unchanged")]
    force: bool,
    #[arg(long, help = "Write an index document for the epic")]
    index: bool,
}

#[derive(Debug, Args)]
struct ProjectArgs {
    key: String,
    #[arg(long, value_name = "STATUS", help = "Filter by status")]
    status: Option<String>,
    #[arg(long = "type", value_name = "TYPE", help = "Filter by issue type")]
    issue_type: Option<String>,
    #[arg(long, help = "Rewrite even when unchanged")]
    force: bool,
    #[arg(long, help = "Write an index document for the project")]
    index: bool,
}

#[derive(Debug, Args)]
struct ReadArgs {
    key: String,
    #[arg(long, default_value = "rich", help = "Output format (rich, plain, json)")]
    format: String,
}

#[derive(Debug, Args)]
struct DiffArgs {
    key: String,
}

#[derive(Debug, Args)]
struct CommentArgs {
    key: String,
    text: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Init(args)) => run_init(&runtime, args),
        Some(Commands::Sync(args)) => run_sync(&runtime, args),
        Some(Commands::Jql(args)) => run_jql(&runtime, args),
        Some(Commands::Epic(args)) => run_epic(&runtime, args),
        Some(Commands::Project(args)) => run_project(&runtime, args),
        Some(Commands::Read(args)) => run_read(&runtime, args),
        Some(Commands::Diff(args)) => run_diff(&runtime, args),
        Some(Commands::Comment(args)) => run_comment(&runtime, args),
        Some(Commands::Config) => run_config(&runtime),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn run_init(runtime: &RuntimeOptions, args: InitArgs) -> Result<()> {
    let config = resolve_config(runtime)?;
    let vault_root = config.vault_root();
    let tickets_path = config.tickets_path();

    fs::create_dir_all(&tickets_path)
        .with_context(|| format!("failed to create {}", tickets_path.display()))?;
    let config_path = config_path_for(runtime, &vault_root);
    let wrote = write_default_config(&config_path, args.force)?;

    println!("Initialized ticket vault");
    println!("vault_root: {}", normalize_path(&vault_root));
    println!("tickets_path: {}", normalize_path(&tickets_path));
    println!("config_path: {}", normalize_path(&config_path));
    println!("wrote_config: {wrote}");
    if !wrote {
        println!("note: config already exists (use --force to overwrite)");
    }
    Ok(())
}

fn run_sync(runtime: &RuntimeOptions, args: SyncArgs) -> Result<()> {
    let config = resolve_config(runtime)?;
    let mut client = JiraClient::from_vault_config(&config)?;
    let options = SyncOptions {
        category: args.category,
        force: args.force,
        format: OutputFormat::parse(&args.format)?,
        ..SyncOptions::default()
    };
    let report = sync_keys_with_api(&mut client, &config, &args.keys, &options)?;
    print_sync_report(runtime, "sync", &report)
}

fn run_jql(runtime: &RuntimeOptions, args: JqlArgs) -> Result<()> {
    let config = resolve_config(runtime)?;
    let mut client = JiraClient::from_vault_config(&config)?;
    let options = SyncOptions {
        category: args.category,
        force: args.force,
        create_index: args.index,
        index_name: args.index_name,
        ..SyncOptions::default()
    };
    let report = sync_jql_with_api(&mut client, &config, &args.query, &options)?;
    print_sync_report(runtime, "jql", &report)
}

fn run_epic(runtime: &RuntimeOptions, args: EpicArgs) -> Result<()> {
    let config = resolve_config(runtime)?;
    let mut client = JiraClient::from_vault_config(&config)?;
    let options = SyncOptions {
        force: args.force,
        create_index: args.index,
        index_name: Some(format!("Epic {}", args.key)),
        ..SyncOptions::default()
    };
    let report = sync_epic_with_api(&mut client, &config, &args.key, &options)?;
    print_sync_report(runtime, "epic", &report)
}

fn run_project(runtime: &RuntimeOptions, args: ProjectArgs) -> Result<()> {
    let config = resolve_config(runtime)?;
    let mut client = JiraClient::from_vault_config(&config)?;
    let options = SyncOptions {
        force: args.force,
        create_index: args.index,
        index_name: Some(format!("Project {}", args.key)),
        ..SyncOptions::default()
    };
    let report = sync_project_with_api(
        &mut client,
        &config,
        &args.key,
        args.status.as_deref(),
        args.issue_type.as_deref(),
        &options,
    )?;
    print_sync_report(runtime, "project", &report)
}

fn run_read(runtime: &RuntimeOptions, args: ReadArgs) -> Result<()> {
    let config = resolve_config(runtime)?;
    let mut client = JiraClient::from_vault_config(&config)?;
    let ticket = client.get_ticket(&args.key)?;
    let format = OutputFormat::parse(&args.format)?;
    let document = render(&ticket, format, &config, None)?;
    println!("{}", document.content);
    Ok(())
}

fn run_diff(runtime: &RuntimeOptions, args: DiffArgs) -> Result<()> {
    let config = resolve_config(runtime)?;
    let mut client = JiraClient::from_vault_config(&config)?;
    let diff = diff_ticket_with_api(&mut client, &config, &args.key)?;

    if runtime.json {
        println!("{}", serde_json::to_string_pretty(&diff.change)?);
        return Ok(());
    }

    println!("diff {}", args.key);
    println!("changed: {}", diff.change.changed);
    println!(
        "fields: {}",
        if diff.change.fields.is_empty() {
            "<none>".to_string()
        } else {
            diff.change.fields.join(", ")
        }
    );
    match &diff.local_path {
        Some(path) => println!("local: {}", normalize_path(path)),
        None => println!("local: <never synced>"),
    }
    if let Some(unified) = &diff.unified {
        if unified.is_empty() {
            println!("content: unchanged");
        } else {
            println!("content:");
            print!("{unified}");
        }
    }
    Ok(())
}

fn run_comment(runtime: &RuntimeOptions, args: CommentArgs) -> Result<()> {
    let config = resolve_config(runtime)?;
    let mut client = JiraClient::from_vault_config(&config)?;
    let id = push_comment_with_api(&mut client, &args.key, &args.text)?;
    println!("comment added");
    println!("key: {}", args.key);
    println!("id: {id}");
    Ok(())
}

fn run_config(runtime: &RuntimeOptions) -> Result<()> {
    let config = resolve_config(runtime)?;

    println!("resolved configuration");
    println!(
        "tracker_url: {}",
        config.tracker_url().unwrap_or_else(|| "<unset>".to_string())
    );
    println!(
        "tracker_email: {}",
        config.tracker_email().unwrap_or_else(|| "<unset>".to_string())
    );
    println!(
        "tracker_token: {}",
        if config.tracker_token().is_some() {
            "<set>"
        } else {
            "<unset>"
        }
    );
    println!("vault_root: {}", normalize_path(&config.vault_root()));
    println!("tickets_path: {}", normalize_path(&config.tickets_path()));
    println!("include_comments: {}", config.format.include_comments);
    println!("include_attachments: {}", config.format.include_attachments);
    println!("include_links: {}", config.format.include_links);
    println!(
        "max_description_length: {}",
        config.format.max_description_length
    );

    let errors = config.validate();
    if !errors.is_empty() {
        println!("warnings:");
        for error in &errors {
            println!("  - {error}");
        }
    }
    Ok(())
}

fn print_sync_report(runtime: &RuntimeOptions, command: &str, report: &SyncReport) -> Result<()> {
    if runtime.json {
        println!("{}", serde_json::to_string_pretty(report)?);
        if !report.success {
            bail!("{command} finished with {} error(s)", report.errors.len());
        }
        return Ok(());
    }

    println!("{command} report");
    println!("requested: {}", report.requested);
    println!("created: {}", report.created);
    println!("updated: {}", report.updated);
    println!("skipped: {}", report.skipped);
    for entry in &report.entries {
        let detail = entry
            .detail
            .as_deref()
            .map(|detail| format!(" ({detail})"))
            .unwrap_or_default();
        match &entry.path {
            Some(path) => println!("  {}: {}{detail} -> {}", entry.key, entry.action, normalize_path(path)),
            None => println!("  {}: {}{detail}", entry.key, entry.action),
        }
    }
    if let Some(index_path) = &report.index_path {
        println!("index: {}", normalize_path(index_path));
    }
    println!("requests: {}", report.request_count);
    if !report.success {
        println!("errors:");
        for error in &report.errors {
            println!("  - {error}");
        }
        bail!("{command} finished with {} error(s)", report.errors.len());
    }
    Ok(())
}

fn resolve_config(runtime: &RuntimeOptions) -> Result<VaultConfig> {
    dotenvy::dotenv().ok();

    let config_path = match &runtime.config {
        Some(path) => path.clone(),
        None => {
            let base = runtime
                .vault
                .clone()
                .unwrap_or_else(|| PathBuf::from("."));
            base.join(CONFIG_FILENAME)
        }
    };
    let mut config = load_config(&config_path)?;
    if let Some(vault) = &runtime.vault {
        config.vault.root = Some(vault.clone());
    }
    Ok(config)
}

fn config_path_for(runtime: &RuntimeOptions, vault_root: &Path) -> PathBuf {
    runtime
        .config
        .clone()
        .unwrap_or_else(|| vault_root.join(CONFIG_FILENAME))
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
