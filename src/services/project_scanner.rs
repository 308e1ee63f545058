use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use walkdir::WalkDir;

use crate::models::{NewProject, ProjectType};

const SKIPPED_DIRS: [&str; 7] = [
    "node_modules",
    "target",
    ".git",
    "dist",
    "build",
    "vendor",
    ".venv",
];

/// A directory that looks like a dev-server project.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectedProject {
    pub name: String,
    pub path: PathBuf,
    pub project_type: ProjectType,
}

impl DetectedProject {
    pub fn into_new_project(self) -> NewProject {
        NewProject::new(self.name, self.path, self.project_type)
    }
}

pub struct ProjectScanner;

impl ProjectScanner {
    /// Walk `root` up to `max_depth` levels and return every project found.
    /// Sub-directories of a detected project are not descended into.
    pub fn scan_directory(root: &Path, max_depth: usize) -> Vec<DetectedProject> {
        let mut projects = Vec::new();
        let found: RefCell<Vec<PathBuf>> = RefCell::new(Vec::new());

        for entry in WalkDir::new(root)
            .max_depth(max_depth)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                if !e.file_type().is_dir() {
                    return false;
                }
                if e.depth() > 0 && is_skipped(e.file_name().to_str().unwrap_or_default()) {
                    return false;
                }
                let path = e.path();
                !found
                    .borrow()
                    .iter()
                    .any(|known| path.starts_with(known) && path != known)
            })
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            let Some(project_type) = Self::detect_type(path) else {
                continue;
            };
            debug!(path = %path.display(), project_type = %project_type, "detected project");
            found.borrow_mut().push(path.to_path_buf());
            projects.push(DetectedProject {
                name: Self::project_name(path),
                path: path.to_path_buf(),
                project_type,
            });
        }

        projects
    }

    /// Guess the project type from marker files in `dir`.
    pub fn detect_type(dir: &Path) -> Option<ProjectType> {
        let has = |name: &str| dir.join(name).is_file();

        if has("package.json") {
            return Some(Self::detect_node_type(&dir.join("package.json")));
        }
        if has("Cargo.toml") {
            return Some(ProjectType::Rust);
        }
        if has("go.mod") {
            return Some(ProjectType::Go);
        }
        if has("manage.py") {
            return Some(ProjectType::Django);
        }
        if has("Gemfile") && dir.join("config/application.rb").is_file() {
            return Some(ProjectType::Rails);
        }
        if has("artisan") {
            return Some(ProjectType::Laravel);
        }
        if has("composer.json") || has("index.php") {
            return Some(ProjectType::Php);
        }
        if has("pom.xml") || has("build.gradle") || has("build.gradle.kts") {
            let spring = ["pom.xml", "build.gradle", "build.gradle.kts"]
                .iter()
                .filter_map(|f| fs::read_to_string(dir.join(f)).ok())
                .any(|content| content.contains("spring-boot"));
            return Some(if spring {
                ProjectType::SpringBoot
            } else {
                ProjectType::Java
            });
        }
        if let Some(csproj) = find_with_extension(dir, "csproj") {
            let web = fs::read_to_string(csproj)
                .map(|content| content.contains("Microsoft.NET.Sdk.Web"))
                .unwrap_or(false);
            return Some(if web {
                ProjectType::AspNetCore
            } else {
                ProjectType::DotNet
            });
        }
        if has("requirements.txt") || has("pyproject.toml") {
            return Some(Self::detect_python_type(dir));
        }
        if has("index.html") {
            return Some(ProjectType::Static);
        }
        None
    }

    fn detect_node_type(manifest: &Path) -> ProjectType {
        let Some(json) = fs::read_to_string(manifest)
            .ok()
            .and_then(|content| serde_json::from_str::<Value>(&content).ok())
        else {
            return ProjectType::NodeJs;
        };

        let depends_on = |name: &str| {
            ["dependencies", "devDependencies"]
                .iter()
                .any(|section| json.get(section).and_then(|deps| deps.get(name)).is_some())
        };

        if depends_on("next") {
            ProjectType::NextJs
        } else if depends_on("@angular/core") {
            ProjectType::Angular
        } else if depends_on("@sveltejs/kit") || depends_on("svelte") {
            ProjectType::Svelte
        } else if depends_on("vue") {
            ProjectType::Vue
        } else if depends_on("vite") {
            ProjectType::Vite
        } else if depends_on("react-scripts") || depends_on("react") {
            ProjectType::React
        } else {
            ProjectType::NodeJs
        }
    }

    fn detect_python_type(dir: &Path) -> ProjectType {
        let manifests: String = ["requirements.txt", "pyproject.toml"]
            .iter()
            .filter_map(|f| fs::read_to_string(dir.join(f)).ok())
            .collect::<Vec<_>>()
            .join("\n")
            .to_ascii_lowercase();

        if manifests.contains("django") {
            ProjectType::Django
        } else if manifests.contains("fastapi") {
            ProjectType::FastApi
        } else if manifests.contains("flask") {
            ProjectType::Flask
        } else {
            ProjectType::Python
        }
    }

    /// `name` from package.json when present, otherwise the directory name.
    fn project_name(dir: &Path) -> String {
        let from_manifest = fs::read_to_string(dir.join("package.json"))
            .ok()
            .and_then(|content| serde_json::from_str::<Value>(&content).ok())
            .and_then(|json| json.get("name").and_then(Value::as_str).map(str::to_string))
            .filter(|name| !name.trim().is_empty());

        from_manifest.unwrap_or_else(|| {
            dir.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| dir.display().to_string())
        })
    }
}

fn is_skipped(name: &str) -> bool {
    SKIPPED_DIRS.contains(&name)
}

fn find_with_extension(dir: &Path, extension: &str) -> Option<PathBuf> {
    fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .find(|p| p.is_file() && p.extension().and_then(|e| e.to_str()) == Some(extension))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, content: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    #[test]
    fn detects_frameworks_from_package_json() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "package.json",
            r#"{"name":"shop","dependencies":{"next":"14.0.0","react":"18.0.0"}}"#,
        );
        assert_eq!(ProjectScanner::detect_type(dir.path()), Some(ProjectType::NextJs));
    }

    #[test]
    fn unreadable_package_json_is_plain_node() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "package.json", "{ not json");
        assert_eq!(ProjectScanner::detect_type(dir.path()), Some(ProjectType::NodeJs));
    }

    #[test]
    fn detects_compiled_projects() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "api/Api.csproj", r#"<Project Sdk="Microsoft.NET.Sdk.Web"></Project>"#);
        write(dir.path(), "svc/pom.xml", "<artifactId>spring-boot-starter-web</artifactId>");
        write(dir.path(), "tool/Cargo.toml", "[package]\nname = \"tool\"");
        assert_eq!(ProjectScanner::detect_type(&dir.path().join("api")), Some(ProjectType::AspNetCore));
        assert_eq!(ProjectScanner::detect_type(&dir.path().join("svc")), Some(ProjectType::SpringBoot));
        assert_eq!(ProjectScanner::detect_type(&dir.path().join("tool")), Some(ProjectType::Rust));
    }

    #[test]
    fn python_manifests_pick_the_framework() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "requirements.txt", "FastAPI==0.110\nuvicorn\n");
        assert_eq!(ProjectScanner::detect_type(dir.path()), Some(ProjectType::FastApi));
    }

    #[test]
    fn scan_skips_dependencies_and_nested_projects() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "web/package.json", r#"{"name":"web-app","devDependencies":{"vite":"5"}}"#);
        write(root, "web/packages/inner/package.json", r#"{"name":"inner"}"#);
        write(root, "web/node_modules/dep/package.json", r#"{"name":"dep"}"#);
        write(root, "backend/go.mod", "module backend");
        write(root, "notes/readme.txt", "nothing here");

        let found = ProjectScanner::scan_directory(root, 4);
        let names: Vec<_> = found.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["backend", "web-app"]);
        assert_eq!(found[1].project_type, ProjectType::Vite);
    }
}
