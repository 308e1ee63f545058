use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use devserver_launcher::models::{BuildConfiguration, ProjectType};

#[derive(Debug, Parser)]
#[command(name = "devserver-launcher", version, about = "Launch and supervise local dev servers")]
pub struct Cli {
    /// Configuration directory (default: ~/.devserver-launcher)
    #[arg(long, global = true, value_name = "DIR")]
    pub config_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List registered projects
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Register a project
    Add(AddArgs),
    /// Change a registered project
    Update(UpdateArgs),
    /// Remove a project from the catalog
    Remove {
        /// Project id
        id: String,
    },
    /// Find projects under a directory
    Scan {
        root: PathBuf,
        #[arg(long, default_value_t = 3)]
        depth: usize,
        /// Register every project found
        #[arg(long)]
        add: bool,
    },
    /// Start projects and supervise them until Ctrl-C
    Run {
        /// Project ids; defaults to every auto-start project
        ids: Vec<String>,
        /// Start every auto-start project
        #[arg(long, conflicts_with = "ids")]
        all: bool,
    },
}

#[derive(Debug, Args)]
pub struct AddArgs {
    pub path: PathBuf,
    #[arg(long)]
    pub name: Option<String>,
    /// Project type; detected from the directory when omitted
    #[arg(long = "type", value_parser = parse_type)]
    pub project_type: Option<ProjectType>,
    #[arg(long)]
    pub port: Option<u16>,
    #[arg(long)]
    pub command: Option<String>,
    #[arg(long)]
    pub release: bool,
    /// Sub-directory the command runs in
    #[arg(long)]
    pub workdir: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct UpdateArgs {
    pub id: String,
    #[arg(long)]
    pub name: Option<String>,
    #[arg(long)]
    pub path: Option<PathBuf>,
    #[arg(long = "type", value_parser = parse_type)]
    pub project_type: Option<ProjectType>,
    #[arg(long)]
    pub port: Option<u16>,
    #[arg(long)]
    pub command: Option<String>,
    #[arg(long, value_parser = parse_build)]
    pub build: Option<BuildConfiguration>,
    #[arg(long)]
    pub auto_start: Option<bool>,
    /// KEY=VALUE added to the environment; repeatable
    #[arg(long = "env", value_parser = parse_env)]
    pub env: Vec<(String, String)>,
}

fn parse_type(s: &str) -> Result<ProjectType, String> {
    s.parse()
}

fn parse_build(s: &str) -> Result<BuildConfiguration, String> {
    match s.to_ascii_lowercase().as_str() {
        "debug" => Ok(BuildConfiguration::Debug),
        "release" => Ok(BuildConfiguration::Release),
        other => Err(format!("unknown build configuration: {}", other)),
    }
}

fn parse_env(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got {}", s))?;
    if key.is_empty() {
        return Err("environment variable name is empty".to_string());
    }
    Ok((key.to_string(), value.to_string()))
}
