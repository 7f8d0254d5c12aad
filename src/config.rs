//! Project configuration and source discovery

use anyhow::{Context as _, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use strato_lang::{parse_file, SourceFile};
use walkdir::WalkDir;

/// Optional settings file at the project root
#[derive(Debug, Deserialize, Default)]
struct ConfigFile {
    /// Where recorded state lives, relative to the project directory
    state_dir: Option<PathBuf>,
}

#[derive(Debug)]
pub struct Config {
    pub project_dir: PathBuf,
    pub state_dir: PathBuf,
}

impl Config {
    /// Load `strato.toml` from the project directory, falling back to
    /// defaults when it doesn't exist.
    pub fn load(project_dir: &Path) -> Result<Self> {
        let path = project_dir.join("strato.toml");

        let file: ConfigFile = if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("failed to parse {}", path.display()))?
        } else {
            ConfigFile::default()
        };

        let state_dir = match file.state_dir.map(expand_home) {
            Some(dir) if dir.is_absolute() => dir,
            Some(dir) => project_dir.join(dir),
            None => project_dir.join(".strato").join("state"),
        };

        Ok(Self {
            project_dir: project_dir.to_path_buf(),
            state_dir,
        })
    }

    /// Parse every `*.strato` file under the project directory, in path
    /// order so runs are deterministic.
    pub fn load_sources(&self) -> Result<Vec<SourceFile>> {
        let mut paths: Vec<PathBuf> = WalkDir::new(&self.project_dir)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e.path()))
            .filter_map(std::result::Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "strato"))
            .map(|e| e.path().to_path_buf())
            .collect();

        paths.sort();

        let mut sources = Vec::with_capacity(paths.len());

        for path in paths {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;

            let name = path
                .strip_prefix(&self.project_dir)
                .unwrap_or(&path)
                .to_string_lossy()
                .into_owned();

            sources.push(parse_file(&content, &name)?);
        }

        Ok(sources)
    }
}

/// Expand a leading `~` to the home directory.
fn expand_home(path: PathBuf) -> PathBuf {
    let stripped = match path.strip_prefix("~") {
        Ok(stripped) => stripped.to_path_buf(),
        Err(_) => return path,
    };

    dirs::home_dir().map_or(path, |home| home.join(stripped))
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.state_dir, dir.path().join(".strato").join("state"));
    }

    #[test]
    fn test_sources_discovered_in_path_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.strato"), "region: \"b\"\n").unwrap();
        fs::write(dir.path().join("a.strato"), "region: \"a\"\n").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let config = Config::load(dir.path()).unwrap();
        let sources = config.load_sources().unwrap();

        let names: Vec<&str> = sources.iter().map(|s| s.path.as_str()).collect();
        assert_eq!(names, vec!["a.strato", "b.strato"]);
    }

    #[test]
    fn test_state_dir_override() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("strato.toml"), "state_dir = \"state\"\n").unwrap();

        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.state_dir, dir.path().join("state"));
    }
}
