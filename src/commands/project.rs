use std::path::Path;

use anyhow::{bail, Context};

use crate::cli::{AddArgs, UpdateArgs};
use devserver_launcher::models::{BuildConfiguration, NewProject, Project, ProjectType};
use devserver_launcher::services::ProjectScanner;
use devserver_launcher::{AppState, LauncherError};

pub async fn list_projects(state: &AppState, json: bool) -> anyhow::Result<()> {
    let projects = state.registry.list().await;
    if json {
        println!("{}", serde_json::to_string_pretty(&projects)?);
        return Ok(());
    }
    if projects.is_empty() {
        println!("No projects registered.");
        return Ok(());
    }

    println!("{:<36}  {:<20}  {:<14}  {:>5}  {:<8}  PATH", "ID", "NAME", "TYPE", "PORT", "STATUS");
    for project in &projects {
        print_row(project);
    }
    Ok(())
}

fn print_row(project: &Project) {
    println!(
        "{:<36}  {:<20}  {:<14}  {:>5}  {:<8}  {}",
        project.id,
        project.name,
        project.project_type.display_name(),
        project.port,
        project.status,
        project.path.display()
    );
    if let Some(error) = &project.last_error {
        println!("{:>38}last error: {}", "", error);
    }
}

pub async fn add_project(state: &AppState, args: AddArgs) -> anyhow::Result<()> {
    let path = std::fs::canonicalize(&args.path)
        .with_context(|| format!("cannot access {}", args.path.display()))?;

    let project_type = match args.project_type {
        Some(project_type) => project_type,
        None => match ProjectScanner::detect_type(&path) {
            Some(detected) => detected,
            None if args.command.is_some() => ProjectType::Custom,
            None => bail!(
                "could not detect a project type in {}; pass --type or --command",
                path.display()
            ),
        },
    };
    let name = args.name.unwrap_or_else(|| {
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string())
    });

    let mut input = NewProject::new(name, path, project_type);
    if let Some(port) = args.port {
        input = input.with_port(port);
    }
    if let Some(command) = args.command {
        input = input.with_command(command);
    }
    if args.release {
        input = input.with_build_configuration(BuildConfiguration::Release);
    }
    input.working_directory = args.workdir;

    let project = state.registry.add(input).await?;
    println!("Added {} ({}) on port {}", project.name, project.id, project.port);
    Ok(())
}

pub async fn update_project(state: &AppState, args: UpdateArgs) -> anyhow::Result<()> {
    let mut project = state
        .registry
        .get(&args.id)
        .await
        .ok_or_else(|| LauncherError::ProjectNotFound(args.id.clone()))?;

    if let Some(name) = args.name {
        project.name = name;
    }
    if let Some(path) = args.path {
        project.path = std::fs::canonicalize(&path)
            .with_context(|| format!("cannot access {}", path.display()))?;
    }
    if let Some(project_type) = args.project_type {
        project.project_type = project_type;
    }
    if let Some(port) = args.port {
        project.port = port;
    }
    if let Some(command) = args.command {
        project.start_command = command;
    }
    if let Some(build) = args.build {
        project.build_configuration = build;
    }
    if let Some(auto_start) = args.auto_start {
        project.auto_start = auto_start;
    }
    project.environment.extend(args.env);

    let project = state.registry.update(project).await?;
    print_row(&project);
    Ok(())
}

pub async fn remove_project(state: &AppState, id: &str) -> anyhow::Result<()> {
    let removed = state
        .reconciler
        .delete(id)
        .await
        .with_context(|| format!("failed to remove project {}", id))?;
    println!("Removed {} ({})", removed.name, removed.id);
    Ok(())
}

pub async fn scan_projects(state: &AppState, root: &Path, depth: usize, add: bool) -> anyhow::Result<()> {
    if !root.is_dir() {
        bail!("{} is not a directory", root.display());
    }
    let root = std::fs::canonicalize(root)?;
    let found = ProjectScanner::scan_directory(&root, depth);
    if found.is_empty() {
        println!("No projects found under {}", root.display());
        return Ok(());
    }

    for detected in found {
        let label = format!(
            "{:<24} {:<14} {}",
            detected.name,
            detected.project_type.display_name(),
            detected.path.display()
        );
        if !add {
            println!("{}", label);
            continue;
        }
        match state.registry.add(detected.into_new_project()).await {
            Ok(project) => println!("{}  added on port {}", label, project.port),
            Err(LauncherError::DuplicatePath { .. }) => println!("{}  already registered", label),
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
