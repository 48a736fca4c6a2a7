//! `tributary root add|list|show|validate|remove` and `tributary describe`.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use tributary_core::{registry, settings::DEFAULT_SERVER_PORT, RootSettings};

use super::home;

/// Manage registered roots.
#[derive(Subcommand, Debug)]
pub enum RootCommand {
    /// Register a root (or replace an existing one with the same name).
    Add(AddArgs),

    /// List all registered roots.
    List,

    /// Show one root's settings.
    Show {
        name: String,

        /// Emit machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Check a root's settings and report every problem.
    Validate { name: String },

    /// Forget a root.
    Remove { name: String },
}

#[derive(Args, Debug)]
pub struct AddArgs {
    /// Root name, used as the registry file name.
    pub name: String,

    #[arg(long)]
    pub depot: String,

    /// Stream whose history is collected and promoted.
    #[arg(long)]
    pub stream: String,

    /// Stream checked out by builds, when not the watched stream.
    #[arg(long)]
    pub populate_stream: Option<String>,

    /// Directory inside the checkout that receives the files.
    #[arg(long)]
    pub sub_directory: Option<PathBuf>,

    /// Report every collection as one opaque change.
    #[arg(long)]
    pub hide_changes: bool,

    /// Promote consumed transactions once a build succeeds.
    #[arg(long)]
    pub promote_on_success: bool,

    /// Promote one transaction at a time instead of in one batch.
    #[arg(long)]
    pub promote_separately: bool,

    /// Check out into a workspace instead of a reference tree.
    #[arg(long)]
    pub workspace: bool,

    #[arg(long)]
    pub server: String,

    #[arg(long, default_value_t = u32::from(DEFAULT_SERVER_PORT))]
    pub port: u32,

    #[arg(long = "user")]
    pub username: String,

    #[arg(long)]
    pub password: Option<String>,

    /// Directory holding the `accurev` executable.
    #[arg(long)]
    pub command_dir: Option<PathBuf>,
}

pub fn run(cmd: RootCommand) -> Result<()> {
    match cmd {
        RootCommand::Add(args) => add(args),
        RootCommand::List => list(),
        RootCommand::Show { name, json } => show(&name, json),
        RootCommand::Validate { name } => validate(&name),
        RootCommand::Remove { name } => remove(&name),
    }
}

fn add(args: AddArgs) -> Result<()> {
    let mut settings = RootSettings::new(args.name, args.depot, args.stream);
    settings.populate_stream = args.populate_stream;
    settings.sub_directory = args.sub_directory;
    settings.hide_changes = args.hide_changes;
    settings.promote_on_success = args.promote_on_success;
    settings.promote_separately = args.promote_separately;
    settings.use_ref_tree = !args.workspace;
    settings.server_name = args.server;
    settings.server_port = args.port;
    settings.username = args.username;
    settings.password = args.password;
    settings.command_dir = args.command_dir;

    settings
        .ensure_valid()
        .with_context(|| format!("root '{}' was not saved", settings.name))?;

    let home = home()?;
    let path = registry::save_root_at(&home, &settings)
        .with_context(|| format!("failed to save root '{}'", settings.name))?;

    println!("✓ Registered root '{}' ({})", settings.name, settings.version_root().describe());
    println!("  Saved to: {}", path.display());
    Ok(())
}

#[derive(Tabled)]
struct RootRow {
    #[tabled(rename = "root")]
    name: String,
    #[tabled(rename = "depot")]
    depot: String,
    #[tabled(rename = "stream")]
    stream: String,
    #[tabled(rename = "server")]
    server: String,
    #[tabled(rename = "promote")]
    promote: String,
}

fn list() -> Result<()> {
    let home = home()?;
    let roots = registry::list_roots_at(&home).context("failed to read the root registry")?;

    if roots.is_empty() {
        println!("No roots registered.");
        println!("Run: tributary root add <name> --depot <depot> --stream <stream> ...");
        return Ok(());
    }

    let rows: Vec<RootRow> = roots
        .iter()
        .map(|s| RootRow {
            name: s.name.clone(),
            depot: s.depot.clone(),
            stream: s.watch_stream.clone(),
            server: s.server_address(),
            promote: match (s.promote_on_success, s.promote_separately) {
                (false, _) => "-".to_string(),
                (true, false) => "batch".to_string(),
                (true, true) => "separately".to_string(),
            },
        })
        .collect();
    println!("{}", Table::new(rows).with(Style::rounded()));
    Ok(())
}

fn show(name: &str, json: bool) -> Result<()> {
    let home = home()?;
    let mut settings = registry::load_root_at(&home, name)
        .with_context(|| format!("failed to load root '{name}'"))?;
    // Never echo the stored secret.
    if settings.password.is_some() {
        settings.password = Some("********".to_string());
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&settings)?);
        return Ok(());
    }

    let root = settings.version_root();
    println!("{}", root.describe().bold());
    println!("  depot             : {}", settings.depot);
    println!("  watch stream      : {}", settings.watch_stream);
    println!("  populate stream   : {}", root.working_stream());
    if let Some(sub) = &settings.sub_directory {
        println!("  sub-directory     : {}", sub.display());
    }
    println!("  server            : {}", settings.server_address());
    println!("  user              : {}", settings.username);
    println!("  hide changes      : {}", settings.hide_changes);
    println!("  promote on success: {}", settings.promote_on_success);
    println!("  promote separately: {}", settings.promote_separately);
    println!(
        "  checkout via      : {}",
        if settings.use_ref_tree { "reference tree" } else { "workspace" }
    );
    Ok(())
}

fn validate(name: &str) -> Result<()> {
    let home = home()?;
    let settings = registry::load_root_at(&home, name)
        .with_context(|| format!("failed to load root '{name}'"))?;
    let problems = settings.validate();
    if problems.is_empty() {
        println!("{} root '{name}' is valid", "✓".green());
        return Ok(());
    }
    for problem in &problems {
        println!("{} {}: {}", "✗".red(), problem.property, problem.reason);
    }
    bail!("root '{name}' has {} invalid propert{}", problems.len(), if problems.len() == 1 { "y" } else { "ies" })
}

fn remove(name: &str) -> Result<()> {
    let home = home()?;
    registry::remove_root_at(&home, name).with_context(|| format!("failed to remove root '{name}'"))?;
    println!("✓ Removed root '{name}'");
    Ok(())
}

pub fn describe(name: &str) -> Result<()> {
    let home = home()?;
    let settings = registry::load_root_at(&home, name)
        .with_context(|| format!("failed to load root '{name}'"))?;
    println!("{}", settings.version_root().describe());
    Ok(())
}
