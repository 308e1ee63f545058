use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// A user-defined development server: how to launch it and where to reach it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub path: PathBuf,
    /// Sub-directory of `path` the command runs in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<PathBuf>,
    #[serde(rename = "type")]
    pub project_type: ProjectType,
    pub port: u16,
    /// Blank means "derive from type and build configuration".
    #[serde(default)]
    pub start_command: String,
    #[serde(default)]
    pub build_configuration: BuildConfiguration,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    #[serde(default = "default_auto_start")]
    pub auto_start: bool,
    #[serde(default)]
    pub status: ProjectStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_started: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_stopped: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn default_auto_start() -> bool {
    true
}

/// User input for creating a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProject {
    pub name: String,
    pub path: PathBuf,
    pub project_type: ProjectType,
    /// Preferred port; the type's default port when absent.
    pub port: Option<u16>,
    pub start_command: Option<String>,
    pub build_configuration: BuildConfiguration,
    pub working_directory: Option<PathBuf>,
}

impl NewProject {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, project_type: ProjectType) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            project_type,
            port: None,
            start_command: None,
            build_configuration: BuildConfiguration::Debug,
            working_directory: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.start_command = Some(command.into());
        self
    }

    pub fn with_build_configuration(mut self, build: BuildConfiguration) -> Self {
        self.build_configuration = build;
        self
    }

    pub fn preferred_port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.project_type.default_port())
    }
}

impl Project {
    /// Build a stopped project from user input. The port is taken as given;
    /// conflict resolution belongs to the registry.
    pub fn new(input: NewProject, port: u16) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: input.name,
            path: input.path,
            working_directory: input.working_directory,
            project_type: input.project_type,
            port,
            start_command: input.start_command.unwrap_or_default(),
            build_configuration: input.build_configuration,
            environment: BTreeMap::new(),
            auto_start: true,
            status: ProjectStatus::Stopped,
            external_url: None,
            pid: None,
            last_started: None,
            last_stopped: None,
            last_error: None,
            created_at: Utc::now(),
        }
    }

    /// Directory the start command runs in.
    pub fn execution_dir(&self) -> PathBuf {
        match &self.working_directory {
            Some(sub) => self.path.join(sub),
            None => self.path.clone(),
        }
    }

    /// Command line actually executed: the explicit command, or the type default.
    pub fn effective_command(&self) -> String {
        let explicit = self.start_command.trim();
        if explicit.is_empty() {
            self.project_type.start_command(self.build_configuration)
        } else {
            explicit.to_string()
        }
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn local_url(&self) -> String {
        format!("http://localhost:{}", self.port)
    }

    /// Reset runtime fields after loading from durable storage.
    pub(crate) fn normalize_loaded(&mut self) {
        if self.status != ProjectStatus::Error {
            self.status = ProjectStatus::Stopped;
        }
        self.pid = None;
        self.external_url = None;
    }

    /// Copy the runtime fields of `other` into `self`.
    pub(crate) fn adopt_runtime_state(&mut self, other: &Project) {
        self.status = other.status;
        self.pid = other.pid;
        self.external_url = other.external_url.clone();
        self.last_started = other.last_started;
        self.last_stopped = other.last_stopped;
        self.last_error = other.last_error.clone();
        self.created_at = other.created_at;
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
}

impl ProjectStatus {
    /// Starting, running and stopping hold a port and (possibly) a process.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            ProjectStatus::Starting | ProjectStatus::Running | ProjectStatus::Stopping
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProjectStatus::Stopped => "stopped",
            ProjectStatus::Starting => "starting",
            ProjectStatus::Running => "running",
            ProjectStatus::Stopping => "stopping",
            ProjectStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum BuildConfiguration {
    #[default]
    Debug,
    Release,
}

impl BuildConfiguration {
    pub fn is_release(self) -> bool {
        self == BuildConfiguration::Release
    }

    /// Capitalized name used by MSBuild-style tooling.
    pub fn msbuild_name(self) -> &'static str {
        match self {
            BuildConfiguration::Debug => "Debug",
            BuildConfiguration::Release => "Release",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProjectType {
    NodeJs,
    React,
    NextJs,
    Vue,
    Angular,
    Svelte,
    Vite,
    Python,
    Django,
    Flask,
    FastApi,
    Rails,
    Php,
    Laravel,
    Go,
    Rust,
    Java,
    SpringBoot,
    DotNet,
    AspNetCore,
    Static,
    Custom,
}

impl ProjectType {
    pub const ALL: [ProjectType; 22] = [
        ProjectType::NodeJs,
        ProjectType::React,
        ProjectType::NextJs,
        ProjectType::Vue,
        ProjectType::Angular,
        ProjectType::Svelte,
        ProjectType::Vite,
        ProjectType::Python,
        ProjectType::Django,
        ProjectType::Flask,
        ProjectType::FastApi,
        ProjectType::Rails,
        ProjectType::Php,
        ProjectType::Laravel,
        ProjectType::Go,
        ProjectType::Rust,
        ProjectType::Java,
        ProjectType::SpringBoot,
        ProjectType::DotNet,
        ProjectType::AspNetCore,
        ProjectType::Static,
        ProjectType::Custom,
    ];

    pub fn display_name(self) -> &'static str {
        match self {
            ProjectType::NodeJs => "Node.js",
            ProjectType::React => "React",
            ProjectType::NextJs => "Next.js",
            ProjectType::Vue => "Vue",
            ProjectType::Angular => "Angular",
            ProjectType::Svelte => "Svelte",
            ProjectType::Vite => "Vite",
            ProjectType::Python => "Python",
            ProjectType::Django => "Django",
            ProjectType::Flask => "Flask",
            ProjectType::FastApi => "FastAPI",
            ProjectType::Rails => "Ruby on Rails",
            ProjectType::Php => "PHP",
            ProjectType::Laravel => "Laravel",
            ProjectType::Go => "Go",
            ProjectType::Rust => "Rust",
            ProjectType::Java => "Java",
            ProjectType::SpringBoot => "Spring Boot",
            ProjectType::DotNet => ".NET",
            ProjectType::AspNetCore => "ASP.NET Core",
            ProjectType::Static => "Static site",
            ProjectType::Custom => "Custom",
        }
    }

    pub fn default_port(self) -> u16 {
        match self {
            ProjectType::NodeJs | ProjectType::React | ProjectType::NextJs => 3000,
            ProjectType::Vue => 8080,
            ProjectType::Angular => 4200,
            ProjectType::Svelte | ProjectType::Vite => 5173,
            ProjectType::Python | ProjectType::Static => 8000,
            ProjectType::Django => 8000,
            ProjectType::Flask => 5000,
            ProjectType::FastApi => 8000,
            ProjectType::Rails => 3000,
            ProjectType::Php | ProjectType::Laravel => 8000,
            ProjectType::Go => 8080,
            ProjectType::Rust => 8080,
            ProjectType::Java | ProjectType::SpringBoot => 8080,
            ProjectType::DotNet | ProjectType::AspNetCore => 5000,
            ProjectType::Custom => 3000,
        }
    }

    /// Languages with a separate build step where debug/release matters.
    pub fn is_compiled(self) -> bool {
        matches!(
            self,
            ProjectType::Go
                | ProjectType::Rust
                | ProjectType::Java
                | ProjectType::SpringBoot
                | ProjectType::DotNet
                | ProjectType::AspNetCore
        )
    }

    /// Compiled web frameworks that ignore `PORT` and need explicit bind settings.
    pub fn is_compiled_web(self) -> bool {
        matches!(
            self,
            ProjectType::SpringBoot | ProjectType::DotNet | ProjectType::AspNetCore
        )
    }

    /// Default command line. Commands reference `$PORT`, which the supervisor
    /// injects into the environment.
    pub fn start_command(self, build: BuildConfiguration) -> String {
        let release = build.is_release();
        match self {
            ProjectType::NodeJs => "npm start".to_string(),
            ProjectType::React => "npm start".to_string(),
            ProjectType::NextJs if release => "npm run build && npm run start -- -p $PORT".to_string(),
            ProjectType::NextJs => "npm run dev -- -p $PORT".to_string(),
            ProjectType::Vue => "npm run serve -- --port $PORT".to_string(),
            ProjectType::Angular => "npx ng serve --port $PORT".to_string(),
            ProjectType::Svelte | ProjectType::Vite => {
                "npm run dev -- --port $PORT --host".to_string()
            }
            ProjectType::Python => "python3 -m http.server $PORT".to_string(),
            ProjectType::Django => "python3 manage.py runserver 0.0.0.0:$PORT".to_string(),
            ProjectType::Flask => "flask run --host 0.0.0.0 --port $PORT".to_string(),
            ProjectType::FastApi => "uvicorn main:app --host 0.0.0.0 --port $PORT".to_string(),
            ProjectType::Rails => "bin/rails server -b 0.0.0.0 -p $PORT".to_string(),
            ProjectType::Php => "php -S 0.0.0.0:$PORT".to_string(),
            ProjectType::Laravel => "php artisan serve --host=0.0.0.0 --port=$PORT".to_string(),
            ProjectType::Go if release => "go build -o .devserver-bin . && ./.devserver-bin".to_string(),
            ProjectType::Go => "go run .".to_string(),
            ProjectType::Rust if release => "cargo run --release".to_string(),
            ProjectType::Rust => "cargo run".to_string(),
            ProjectType::Java if release => "./gradlew run".to_string(),
            ProjectType::Java => "./gradlew run --debug-jvm".to_string(),
            ProjectType::SpringBoot => "./mvnw spring-boot:run".to_string(),
            ProjectType::DotNet | ProjectType::AspNetCore => {
                format!("dotnet run --configuration {}", build.msbuild_name())
            }
            ProjectType::Static => "python3 -m http.server $PORT".to_string(),
            ProjectType::Custom => String::new(),
        }
    }
}

impl std::fmt::Display for ProjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

impl std::str::FromStr for ProjectType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace(['.', '-', '_', ' '], "");
        ProjectType::ALL
            .iter()
            .copied()
            .find(|t| {
                let key = format!("{:?}", t).to_ascii_lowercase();
                let display = t.display_name().to_ascii_lowercase().replace(['.', ' '], "");
                key == wanted || display == wanted
            })
            .ok_or_else(|| format!("unknown project type: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_command_falls_back_to_type_default() {
        let mut project = Project::new(
            NewProject::new("api", "/tmp/api", ProjectType::Rust)
                .with_build_configuration(BuildConfiguration::Release),
            8080,
        );
        assert_eq!(project.effective_command(), "cargo run --release");

        project.start_command = "  ".to_string();
        assert_eq!(project.effective_command(), "cargo run --release");

        project.start_command = "just serve".to_string();
        assert_eq!(project.effective_command(), "just serve");
    }

    #[test]
    fn dotnet_command_tracks_build_configuration() {
        assert_eq!(
            ProjectType::AspNetCore.start_command(BuildConfiguration::Debug),
            "dotnet run --configuration Debug"
        );
        assert_eq!(
            ProjectType::AspNetCore.start_command(BuildConfiguration::Release),
            "dotnet run --configuration Release"
        );
    }

    #[test]
    fn custom_type_has_no_default_command() {
        assert!(ProjectType::Custom
            .start_command(BuildConfiguration::Debug)
            .is_empty());
    }

    #[test]
    fn execution_dir_joins_working_directory() {
        let mut project = Project::new(NewProject::new("web", "/srv/app", ProjectType::Vite), 5173);
        assert_eq!(project.execution_dir(), PathBuf::from("/srv/app"));
        project.working_directory = Some(PathBuf::from("frontend"));
        assert_eq!(project.execution_dir(), PathBuf::from("/srv/app/frontend"));
    }

    #[test]
    fn active_set_is_starting_running_stopping() {
        assert!(ProjectStatus::Starting.is_active());
        assert!(ProjectStatus::Running.is_active());
        assert!(ProjectStatus::Stopping.is_active());
        assert!(!ProjectStatus::Stopped.is_active());
        assert!(!ProjectStatus::Error.is_active());
    }

    #[test]
    fn project_type_parses_loose_names() {
        assert_eq!("nodejs".parse::<ProjectType>(), Ok(ProjectType::NodeJs));
        assert_eq!("Next.js".parse::<ProjectType>(), Ok(ProjectType::NextJs));
        assert_eq!("spring-boot".parse::<ProjectType>(), Ok(ProjectType::SpringBoot));
        assert_eq!("ASP.NET Core".parse::<ProjectType>(), Ok(ProjectType::AspNetCore));
        assert!("cobol".parse::<ProjectType>().is_err());
    }

    #[test]
    fn loaded_project_drops_runtime_state() {
        let mut project = Project::new(NewProject::new("web", "/srv/app", ProjectType::Vite), 5173);
        project.status = ProjectStatus::Running;
        project.pid = Some(42);
        project.external_url = Some("http://1.2.3.4:5173".to_string());
        project.normalize_loaded();
        assert_eq!(project.status, ProjectStatus::Stopped);
        assert_eq!(project.pid, None);
        assert_eq!(project.external_url, None);
    }
}
