use std::collections::HashMap;

use anyhow::Context;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use devserver_launcher::models::{LauncherEvent, OutputStream};
use devserver_launcher::AppState;

/// Start projects, print their events until Ctrl-C, then stop everything.
pub async fn run_projects(state: &AppState, ids: Vec<String>, all: bool) -> anyhow::Result<()> {
    let names: HashMap<String, String> = state
        .registry
        .list()
        .await
        .into_iter()
        .map(|p| (p.id, p.name))
        .collect();

    let mut events = state.events.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => print_event(&names, &event),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event printer lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let outcome = if all || ids.is_empty() {
        state.reconciler.start_all().await
    } else {
        state.reconciler.start_many(ids).await
    };
    let failed = outcome.iter().filter(|(_, result)| result.is_err()).count();
    for (id, result) in &outcome {
        match result {
            Ok(project) => println!("started {} on {}", project.name, project.local_url()),
            Err(e) => {
                eprintln!("failed to start {}: {}", id, e);
                if let Some(output) = e.captured_output() {
                    eprintln!("{}", output.trim_end());
                }
            }
        }
    }
    if outcome.is_empty() {
        println!("Nothing to start.");
    } else if failed == outcome.len() {
        printer.abort();
        anyhow::bail!("no project could be started");
    }

    state.start_prober().await;
    println!("Supervising {} server(s); press Ctrl-C to stop.", outcome.len() - failed);
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;

    println!("Stopping...");
    state.shutdown().await.context("shutdown did not complete cleanly")?;
    printer.abort();
    Ok(())
}

fn print_event(names: &HashMap<String, String>, event: &LauncherEvent) {
    let name = names
        .get(event.project_id())
        .map(String::as_str)
        .unwrap_or_else(|| event.project_id());
    match event {
        LauncherEvent::Output { line, .. } => match line.stream {
            OutputStream::Stdout => println!("[{}] {}", name, line.text),
            OutputStream::Stderr => eprintln!("[{}] {}", name, line.text),
        },
        LauncherEvent::StatusChanged { from, to, .. } => println!("[{}] {} -> {}", name, from, to),
        LauncherEvent::ExternalUrlChanged { url: Some(url), .. } => println!("[{}] reachable at {}", name, url),
        LauncherEvent::ExternalUrlChanged { url: None, .. } => {}
        LauncherEvent::ProjectRemoved { .. } => println!("[{}] removed", name),
    }
}
