//! Execution environments: the filesystem/shell surface agent tools run
//! against.
//!
//! Tool failures are ordinary values (`Err(String)`) because they feed
//! back to the model as error tool results; only infrastructure-level
//! problems surface as real errors.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

/// Result of one shell command.
#[derive(Debug, Clone, PartialEq)]
pub struct ShellOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

/// One grep hit.
#[derive(Debug, Clone, PartialEq)]
pub struct GrepMatch {
    pub path: String,
    pub line: u64,
    pub text: String,
}

/// The narrow contract agent tools need from the outside world.
#[async_trait]
pub trait ExecutionEnvironment: Send + Sync {
    fn working_dir(&self) -> &Path;

    async fn read_file(&self, path: &str) -> Result<String, String>;

    async fn write_file(&self, path: &str, content: &str) -> Result<(), String>;

    async fn run_shell(&self, command: &str) -> Result<ShellOutput, String>;

    async fn grep(&self, pattern: &str, glob: Option<&str>) -> Result<Vec<GrepMatch>, String>;

    async fn glob(&self, pattern: &str) -> Result<Vec<String>, String>;
}

/// Matches returned by one grep call are capped to keep tool results
/// model-sized.
const MAX_GREP_MATCHES: usize = 200;

/// A real environment rooted at one working directory.
pub struct LocalEnvironment {
    root: PathBuf,
}

impl LocalEnvironment {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let candidate = Path::new(path);
        if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        }
    }

    fn relative_to_root(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .display()
            .to_string()
    }
}

#[async_trait]
impl ExecutionEnvironment for LocalEnvironment {
    fn working_dir(&self) -> &Path {
        &self.root
    }

    async fn read_file(&self, path: &str) -> Result<String, String> {
        tokio::fs::read_to_string(self.resolve(path))
            .await
            .map_err(|error| format!("cannot read {path}: {error}"))
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<(), String> {
        let resolved = self.resolve(path);
        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|error| format!("cannot create {}: {error}", parent.display()))?;
        }
        tokio::fs::write(&resolved, content)
            .await
            .map_err(|error| format!("cannot write {path}: {error}"))
    }

    async fn run_shell(&self, command: &str) -> Result<ShellOutput, String> {
        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.root)
            .output()
            .await
            .map_err(|error| format!("cannot run shell: {error}"))?;
        Ok(ShellOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn grep(&self, pattern: &str, glob: Option<&str>) -> Result<Vec<GrepMatch>, String> {
        let matcher =
            regex::Regex::new(pattern).map_err(|error| format!("invalid pattern: {error}"))?;
        let files = match glob {
            Some(glob_pattern) => self.glob(glob_pattern).await?,
            None => {
                let mut files = Vec::new();
                for entry in walkdir::WalkDir::new(&self.root)
                    .into_iter()
                    .filter_map(|entry| entry.ok())
                {
                    if entry.file_type().is_file() {
                        files.push(self.relative_to_root(entry.path()));
                    }
                }
                files
            }
        };

        let mut matches = Vec::new();
        'files: for file in files {
            let Ok(content) = tokio::fs::read_to_string(self.resolve(&file)).await else {
                continue; // binary or unreadable
            };
            for (index, line) in content.lines().enumerate() {
                if matcher.is_match(line) {
                    matches.push(GrepMatch {
                        path: file.clone(),
                        line: index as u64 + 1,
                        text: line.to_string(),
                    });
                    if matches.len() >= MAX_GREP_MATCHES {
                        break 'files;
                    }
                }
            }
        }
        Ok(matches)
    }

    async fn glob(&self, pattern: &str) -> Result<Vec<String>, String> {
        let full = self.root.join(pattern);
        let paths = glob::glob(&full.to_string_lossy())
            .map_err(|error| format!("invalid glob: {error}"))?;
        let mut files: Vec<String> = paths
            .filter_map(|entry| entry.ok())
            .filter(|path| path.is_file())
            .map(|path| self.relative_to_root(&path))
            .collect();
        files.sort();
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn environment() -> (tempfile::TempDir, LocalEnvironment) {
        let dir = tempfile::tempdir().unwrap();
        let env = LocalEnvironment::new(dir.path());
        env.write_file("src/main.rs", "fn main() {}\n// TODO later\n")
            .await
            .unwrap();
        env.write_file("README.md", "hello world\n").await.unwrap();
        (dir, env)
    }

    #[tokio::test]
    async fn read_write_round_trip() {
        let (_dir, env) = environment().await;
        assert!(env.read_file("src/main.rs").await.unwrap().contains("fn main"));
        assert!(env.read_file("missing.txt").await.is_err());
    }

    #[tokio::test]
    async fn shell_runs_in_working_dir() {
        let (_dir, env) = environment().await;
        let output = env.run_shell("ls src").await.unwrap();
        assert_eq!(output.status, 0);
        assert!(output.stdout.contains("main.rs"));

        let output = env.run_shell("exit 3").await.unwrap();
        assert_eq!(output.status, 3);
    }

    #[tokio::test]
    async fn grep_and_glob() {
        let (_dir, env) = environment().await;

        let matches = env.grep("TODO", None).await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].path, "src/main.rs");
        assert_eq!(matches[0].line, 2);

        let files = env.glob("**/*.rs").await.unwrap();
        assert_eq!(files, vec!["src/main.rs".to_string()]);

        let scoped = env.grep("hello", Some("*.md")).await.unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].path, "README.md");
    }
}
