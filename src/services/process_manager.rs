use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use super::external::{EventEmitter, PathValidator};
use super::output_buffer::{OutputBuffer, DEFAULT_OUTPUT_LINES};
use crate::error::{LauncherError, Result};
use crate::models::{
    LauncherEvent, OutputLine, OutputStream, ProcessInfo, Project, ProjectType, StopOutcome,
};
use crate::utils::port_checker::{first_listening_port, is_port_listening, COMMON_WEB_PORTS};
use crate::utils::process_killer::{is_process_alive, kill_group, terminate_group};

#[cfg(not(target_os = "windows"))]
use crate::utils::user_path::USER_PATH;

/// Fixed lifecycle windows. Not part of the settings file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// Wait after spawn before checking the process survived.
    pub startup_grace: Duration,
    /// How long a SIGTERM'd process gets before SIGKILL.
    pub termination_window: Duration,
    pub termination_poll: Duration,
    /// Pause between the stop and the start of a restart.
    pub restart_delay: Duration,
    pub probe_interval: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            startup_grace: Duration::from_secs(2),
            termination_window: Duration::from_secs(5),
            termination_poll: Duration::from_millis(100),
            restart_delay: Duration::from_secs(1),
            probe_interval: Duration::from_secs(3),
        }
    }
}

/// How long to let output readers drain after a startup failure.
const READER_DRAIN: Duration = Duration::from_millis(500);

/// `localhost:5173`, `http://127.0.0.1:8000/`, `0.0.0.0:3000` and friends.
static ANNOUNCED_PORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:localhost|127\.0\.0\.1|0\.0\.0\.0|\[::1?\]):(\d{2,5})\b")
        .expect("announced port pattern is valid")
});

type SharedOutput = Arc<StdMutex<OutputBuffer>>;

fn lock_output(output: &SharedOutput) -> MutexGuard<'_, OutputBuffer> {
    output.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct ProcessHandle {
    child: Child,
    info: ProcessInfo,
    readers: Vec<JoinHandle<()>>,
}

/// Owns the OS processes of running projects, keyed by project id.
///
/// Callers never see a `Child`; they refer to processes by project id only.
pub struct ProcessSupervisor {
    processes: Mutex<HashMap<String, ProcessHandle>>,
    outputs: StdMutex<HashMap<String, SharedOutput>>,
    emitter: Arc<dyn EventEmitter>,
    paths: Arc<dyn PathValidator>,
    timings: Timings,
    output_lines: usize,
}

impl ProcessSupervisor {
    pub fn new(emitter: Arc<dyn EventEmitter>, paths: Arc<dyn PathValidator>) -> Self {
        // Resolve the login shell PATH once, before the first spawn needs it.
        #[cfg(not(target_os = "windows"))]
        {
            let _ = &*USER_PATH;
        }

        Self {
            processes: Mutex::new(HashMap::new()),
            outputs: StdMutex::new(HashMap::new()),
            emitter,
            paths,
            timings: Timings::default(),
            output_lines: DEFAULT_OUTPUT_LINES,
        }
    }

    pub fn with_timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    pub fn with_output_lines(mut self, lines: usize) -> Self {
        self.output_lines = lines.max(1);
        self
    }

    pub fn timings(&self) -> Timings {
        self.timings
    }

    /// Spawn the project's server, or return the live process already tracked.
    pub async fn start(&self, project: &Project) -> Result<ProcessInfo> {
        let dir = project.execution_dir();
        if !self.paths.exists(&dir) {
            return Err(LauncherError::InvalidPath(dir));
        }
        let command_line = launch_command_line(project);
        if command_line.trim().is_empty() {
            return Err(LauncherError::InvalidCommand(project.id.clone()));
        }

        let info = {
            let mut processes = self.processes.lock().await;
            if let Some(handle) = processes.get_mut(&project.id) {
                match handle.child.try_wait() {
                    Ok(None) => {
                        debug!(project_id = %project.id, pid = handle.info.pid, "process already running");
                        return Ok(handle.info.clone());
                    }
                    _ => {
                        debug!(project_id = %project.id, "replacing exited process handle");
                        processes.remove(&project.id);
                    }
                }
            }

            let output = self.fresh_output(&project.id);
            let mut child = build_command(project, &dir, &command_line)
                .spawn()
                .map_err(|e| LauncherError::FailedToStart {
                    status: format!("spawn failed: {}", e),
                    output: String::new(),
                })?;
            let pid = child.id().ok_or_else(|| LauncherError::FailedToStart {
                status: "exited before a pid was assigned".to_string(),
                output: String::new(),
            })?;

            let mut readers = Vec::with_capacity(2);
            if let Some(stdout) = child.stdout.take() {
                readers.push(self.spawn_reader(stdout, OutputStream::Stdout, &project.id, &output));
            }
            if let Some(stderr) = child.stderr.take() {
                readers.push(self.spawn_reader(stderr, OutputStream::Stderr, &project.id, &output));
            }

            let info = ProcessInfo {
                project_id: project.id.clone(),
                pid,
                port: project.port,
                command: command_line.clone(),
                started_at: Utc::now(),
                listening: false,
                detected_port: None,
            };
            processes.insert(
                project.id.clone(),
                ProcessHandle {
                    child,
                    info: info.clone(),
                    readers,
                },
            );
            info
        };

        info!(
            project_id = %project.id,
            pid = info.pid,
            port = info.port,
            command = %command_line,
            "spawned dev server"
        );

        sleep(self.timings.startup_grace).await;

        let failed = {
            let mut processes = self.processes.lock().await;
            let exit = match processes.get_mut(&project.id) {
                Some(handle) if handle.info.pid == info.pid => match handle.child.try_wait() {
                    Ok(None) => None,
                    Ok(Some(status)) => Some(status.to_string()),
                    Err(e) => Some(format!("unknown exit status ({})", e)),
                },
                _ => Some("stopped during startup".to_string()),
            };
            match exit {
                Some(status) => {
                    let readers = match processes.remove(&project.id) {
                        Some(handle) if handle.info.pid == info.pid => handle.readers,
                        Some(other) => {
                            processes.insert(project.id.clone(), other);
                            Vec::new()
                        }
                        None => Vec::new(),
                    };
                    Some((status, readers))
                }
                None => None,
            }
        };

        if let Some((status, readers)) = failed {
            for reader in readers {
                let _ = timeout(READER_DRAIN, reader).await;
            }
            let output = self.output(&project.id);
            warn!(project_id = %project.id, pid = info.pid, status = %status, "dev server exited during startup");
            return Err(LauncherError::FailedToStart { status, output });
        }

        let (listening, detected_port) = self.probe_listening(&project.id, info.port).await;
        let mut processes = self.processes.lock().await;
        match processes.get_mut(&project.id) {
            Some(handle) if handle.info.pid == info.pid => {
                handle.info.listening = listening;
                handle.info.detected_port = detected_port;
                Ok(handle.info.clone())
            }
            _ => Ok(ProcessInfo {
                listening,
                detected_port,
                ..info
            }),
        }
    }

    /// Terminate the project's process: SIGTERM, poll, then SIGKILL.
    ///
    /// The handle and output buffer are dropped whichever way it ends.
    pub async fn stop(&self, project_id: &str) -> Result<StopOutcome> {
        let handle = self.processes.lock().await.remove(project_id);
        let Some(mut handle) = handle else {
            return Err(LauncherError::ProcessNotFound(project_id.to_string()));
        };
        self.clear_output(project_id);

        let pid = handle.info.pid;
        let outcome = terminate(&mut handle.child, pid, &self.timings).await;
        for reader in handle.readers {
            reader.abort();
        }

        info!(project_id = %project_id, pid, outcome = ?outcome, "dev server stopped");
        Ok(outcome)
    }

    /// Stop every tracked process. Failures are logged and skipped.
    pub async fn stop_all(&self) -> Vec<String> {
        let ids = self.tracked_ids().await;
        for id in &ids {
            if let Err(e) = self.stop(id).await {
                warn!(project_id = %id, error = %e, "failed to stop process during shutdown");
            }
        }
        ids
    }

    /// Drop the handle of a process that died on its own, sweeping any
    /// leftover group members. The output buffer is kept for diagnostics.
    pub async fn forget(&self, project_id: &str) -> Option<ProcessInfo> {
        let mut handle = self.processes.lock().await.remove(project_id)?;
        match handle.child.try_wait() {
            Ok(Some(status)) => {
                debug!(project_id = %project_id, pid = handle.info.pid, status = %status, "reaped exited process")
            }
            Ok(None) => warn!(project_id = %project_id, pid = handle.info.pid, "forgetting a live process"),
            Err(e) => warn!(project_id = %project_id, error = %e, "failed to reap process"),
        }
        if let Err(e) = kill_group(handle.info.pid) {
            debug!(project_id = %project_id, error = %e, "failed to sweep process group");
        }
        Some(handle.info)
    }

    pub async fn is_tracked(&self, project_id: &str) -> bool {
        self.processes.lock().await.contains_key(project_id)
    }

    /// Liveness of the project's process. Tracked processes are checked (and
    /// reaped) through their handle; otherwise `pid` is looked up in the OS.
    pub async fn is_alive(&self, project_id: &str, pid: Option<u32>) -> bool {
        {
            let mut processes = self.processes.lock().await;
            if let Some(handle) = processes.get_mut(project_id) {
                return matches!(handle.child.try_wait(), Ok(None));
            }
        }
        pid.map(is_process_alive).unwrap_or(false)
    }

    pub async fn info(&self, project_id: &str) -> Option<ProcessInfo> {
        self.processes
            .lock()
            .await
            .get(project_id)
            .map(|handle| handle.info.clone())
    }

    pub async fn tracked_ids(&self) -> Vec<String> {
        self.processes.lock().await.keys().cloned().collect()
    }

    /// Captured output of the project's current (or last failed) process.
    pub fn output(&self, project_id: &str) -> String {
        self.output_buffer(project_id)
            .map(|buffer| lock_output(&buffer).text())
            .unwrap_or_default()
    }

    pub fn output_lines(&self, project_id: &str) -> Vec<OutputLine> {
        self.output_buffer(project_id)
            .map(|buffer| lock_output(&buffer).lines())
            .unwrap_or_default()
    }

    fn outputs(&self) -> MutexGuard<'_, HashMap<String, SharedOutput>> {
        self.outputs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn output_buffer(&self, project_id: &str) -> Option<SharedOutput> {
        self.outputs().get(project_id).cloned()
    }

    fn fresh_output(&self, project_id: &str) -> SharedOutput {
        let buffer = Arc::new(StdMutex::new(OutputBuffer::new(self.output_lines)));
        self.outputs().insert(project_id.to_string(), buffer.clone());
        buffer
    }

    pub(crate) fn clear_output(&self, project_id: &str) {
        self.outputs().remove(project_id);
    }

    fn spawn_reader<R>(
        &self,
        reader: R,
        stream: OutputStream,
        project_id: &str,
        output: &SharedOutput,
    ) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let project_id = project_id.to_string();
        let output = output.clone();
        let emitter = self.emitter.clone();

        tokio::spawn(async move {
            let mut reader = BufReader::new(reader);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf).await {
                    Ok(0) => break,
                    Ok(_) => {
                        let text = String::from_utf8_lossy(&buf)
                            .trim_end_matches(['\r', '\n'])
                            .to_string();
                        let line = OutputLine::new(stream, text);
                        lock_output(&output).push(line.clone());
                        emitter.emit(LauncherEvent::Output {
                            project_id: project_id.clone(),
                            line,
                        });
                    }
                    Err(e) => {
                        debug!(project_id = %project_id, error = %e, "output read failed");
                        break;
                    }
                }
            }
            debug!(project_id = %project_id, stream = ?stream, "output reader finished");
        })
    }

    /// Non-fatal check that the server accepts connections. Frameworks often
    /// pick their own port, so a miss is only logged.
    async fn probe_listening(&self, project_id: &str, port: u16) -> (bool, Option<u16>) {
        if is_port_listening(port).await {
            debug!(project_id = %project_id, port, "dev server is listening");
            return (true, None);
        }

        if let Some(announced) = announced_port(&self.output(project_id)).filter(|&p| p != port) {
            warn!(project_id = %project_id, port, announced, "dev server announced a different port");
            return (false, Some(announced));
        }

        let others: Vec<u16> = COMMON_WEB_PORTS.iter().copied().filter(|&p| p != port).collect();
        match first_listening_port(&others).await {
            Some(found) => {
                info!(project_id = %project_id, port, found, "assigned port not listening yet, another common port is");
                (false, Some(found))
            }
            None => {
                info!(project_id = %project_id, port, "assigned port not listening yet");
                (false, None)
            }
        }
    }
}

/// Last `host:port` the process printed, if any.
pub fn announced_port(output: &str) -> Option<u16> {
    ANNOUNCED_PORT
        .captures_iter(output)
        .filter_map(|cap| cap[1].parse::<u16>().ok())
        .last()
}

/// Effective command plus explicit bind arguments for frameworks that do not
/// read `PORT`.
pub fn launch_command_line(project: &Project) -> String {
    let command = project.effective_command();
    if !project.project_type.is_compiled_web() {
        return command;
    }
    match project.project_type {
        ProjectType::DotNet | ProjectType::AspNetCore
            if command.starts_with("dotnet run") && !command.contains("--urls") =>
        {
            format!("{} -- --urls http://0.0.0.0:{}", command, project.port)
        }
        ProjectType::SpringBoot
            if command.contains("spring-boot:run") && !command.contains("server.port") =>
        {
            format!(
                "{} -Dspring-boot.run.arguments=--server.port={},--server.address=0.0.0.0",
                command, project.port
            )
        }
        _ => command,
    }
}

/// Environment injected into the spawned process. Project-level variables
/// are applied last and win.
pub fn launch_environment(project: &Project) -> Vec<(String, String)> {
    let port = project.port.to_string();
    let build = project.build_configuration;
    let mut env = vec![("PORT".to_string(), port.clone())];

    if project.project_type.is_compiled() {
        env.push((
            "BUILD_CONFIGURATION".to_string(),
            build.msbuild_name().to_string(),
        ));
    }

    match project.project_type {
        ProjectType::DotNet | ProjectType::AspNetCore => {
            let environment = if build.is_release() { "Production" } else { "Development" };
            env.push(("ASPNETCORE_URLS".to_string(), format!("http://0.0.0.0:{}", port)));
            env.push(("ASPNETCORE_ENVIRONMENT".to_string(), environment.to_string()));
            env.push(("DOTNET_ENVIRONMENT".to_string(), environment.to_string()));
        }
        ProjectType::SpringBoot | ProjectType::Java => {
            let profile = if build.is_release() { "prod" } else { "dev" };
            env.push(("SERVER_ADDRESS".to_string(), "0.0.0.0".to_string()));
            env.push(("SERVER_PORT".to_string(), port.clone()));
            env.push(("SPRING_PROFILES_ACTIVE".to_string(), profile.to_string()));
        }
        ProjectType::Go => {
            let mode = if build.is_release() { "release" } else { "debug" };
            env.push(("HOST".to_string(), "0.0.0.0".to_string()));
            env.push(("GIN_MODE".to_string(), mode.to_string()));
        }
        ProjectType::Rust => {
            env.push(("HOST".to_string(), "0.0.0.0".to_string()));
        }
        _ => {}
    }

    for (key, value) in &project.environment {
        env.retain(|(k, _)| k != key);
        env.push((key.clone(), value.clone()));
    }
    env
}

fn build_command(project: &Project, dir: &Path, command_line: &str) -> Command {
    #[cfg(not(target_os = "windows"))]
    let mut command = {
        let mut c = Command::new("/bin/sh");
        c.arg("-c").arg(command_line).env("PATH", &*USER_PATH);
        // Own process group so stop reaches every descendant.
        c.process_group(0);
        c
    };

    #[cfg(target_os = "windows")]
    let mut command = {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(command_line);
        const CREATE_NO_WINDOW: u32 = 0x08000000;
        c.creation_flags(CREATE_NO_WINDOW);
        c
    };

    command
        .current_dir(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    for (key, value) in launch_environment(project) {
        command.env(key, value);
    }
    command
}

async fn terminate(child: &mut Child, pid: u32, timings: &Timings) -> StopOutcome {
    match child.try_wait() {
        Ok(Some(status)) => {
            debug!(pid, status = %status, "process had already exited");
            sweep_group(pid);
            return StopOutcome::Exited;
        }
        Ok(None) => {}
        Err(e) => warn!(pid, error = %e, "failed to query process state"),
    }

    if let Err(e) = terminate_group(pid) {
        warn!(pid, error = %e, "failed to send termination signal");
    }

    let deadline = Instant::now() + timings.termination_window;
    while Instant::now() < deadline {
        sleep(timings.termination_poll).await;
        match child.try_wait() {
            Ok(Some(_)) => {
                sweep_group(pid);
                return StopOutcome::Terminated;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(pid, error = %e, "failed to poll process state");
                break;
            }
        }
    }

    warn!(
        pid,
        window_ms = timings.termination_window.as_millis() as u64,
        "process ignored termination, killing"
    );
    sweep_group(pid);
    if let Err(e) = child.kill().await {
        debug!(pid, error = %e, "kill after group kill failed");
    }
    StopOutcome::Killed
}

/// SIGKILL whatever is left in the group once the leader is gone.
fn sweep_group(pid: u32) {
    if let Err(e) = kill_group(pid) {
        debug!(pid, error = %e, "failed to sweep process group");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BuildConfiguration, NewProject};

    fn project(project_type: ProjectType) -> Project {
        Project::new(NewProject::new("app", "/tmp", project_type), 5000)
    }

    #[test]
    fn announced_port_takes_the_last_mention() {
        let output = "starting on localhost:3000\n  ➜  Local:   http://127.0.0.1:5174/\n";
        assert_eq!(announced_port(output), Some(5174));
        assert_eq!(announced_port("compiling..."), None);
    }

    #[test]
    fn dotnet_gets_explicit_urls() {
        let p = project(ProjectType::AspNetCore);
        assert_eq!(
            launch_command_line(&p),
            "dotnet run --configuration Debug -- --urls http://0.0.0.0:5000"
        );
    }

    #[test]
    fn explicit_urls_are_left_alone() {
        let mut p = project(ProjectType::DotNet);
        p.start_command = "dotnet run --urls http://localhost:7000".to_string();
        assert_eq!(launch_command_line(&p), "dotnet run --urls http://localhost:7000");
    }

    #[test]
    fn non_web_commands_are_left_alone() {
        let mut p = project(ProjectType::Go);
        p.start_command = "dotnet run".to_string();
        assert_eq!(launch_command_line(&p), "dotnet run");
    }

    #[test]
    fn release_builds_switch_framework_environment() {
        let mut p = project(ProjectType::AspNetCore);
        p.build_configuration = BuildConfiguration::Release;
        let env = launch_environment(&p);
        assert!(env.contains(&("PORT".to_string(), "5000".to_string())));
        assert!(env.contains(&("ASPNETCORE_ENVIRONMENT".to_string(), "Production".to_string())));
        assert!(env.contains(&("BUILD_CONFIGURATION".to_string(), "Release".to_string())));
    }

    #[test]
    fn interpreted_types_only_get_port() {
        let env = launch_environment(&project(ProjectType::NodeJs));
        assert_eq!(env, vec![("PORT".to_string(), "5000".to_string())]);
    }

    #[test]
    fn project_environment_overrides_defaults() {
        let mut p = project(ProjectType::NodeJs);
        p.environment.insert("PORT".to_string(), "9999".to_string());
        p.environment.insert("NODE_ENV".to_string(), "development".to_string());
        let env = launch_environment(&p);
        assert_eq!(
            env.iter().filter(|(k, _)| k == "PORT").collect::<Vec<_>>(),
            vec![&("PORT".to_string(), "9999".to_string())]
        );
        assert!(env.contains(&("NODE_ENV".to_string(), "development".to_string())));
    }
}
