//! `LibrarianState` / `LibrarianConfig`: typed YAML load/save, validation,
//! and service-config discovery.

use std::path::Path;

use anyhow::{Context, Result, bail};
use camino::Utf8Path;
use semver::Version;
use serde::{Deserialize, Serialize};

use librarian_semver::ConventionalCommit;

pub const STATE_PATH: &str = ".librarian/state.yaml";
pub const CONFIG_PATH: &str = ".librarian/config.yaml";

/// Process-wide configuration of the repo: the container image to use and
/// the libraries it knows how to generate/release.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibrarianState {
    pub image: String,
    #[serde(default)]
    pub libraries: Vec<LibraryState>,
}

/// One releasable unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryState {
    pub id: String,
    #[serde(default)]
    pub version: Option<Version>,
    #[serde(default, rename = "previousVersion")]
    pub previous_version: Option<Version>,
    #[serde(default, rename = "sourceRoots")]
    pub source_roots: Vec<String>,
    #[serde(default, rename = "removeRegex")]
    pub remove_regex: Vec<String>,
    #[serde(default, rename = "preserveRegex")]
    pub preserve_regex: Vec<String>,
    #[serde(default)]
    pub apis: Vec<Api>,
    #[serde(default, rename = "tagFormat")]
    pub tag_format: Option<String>,
    #[serde(default, rename = "releaseExcludePaths")]
    pub release_exclude_paths: Vec<String>,
    /// Transient: commits attached to the pending release. Not meant to
    /// survive a run once a release PR is created; never round-tripped
    /// through YAML at all.
    #[serde(skip)]
    pub changes: Vec<ConventionalCommit>,
    #[serde(default, rename = "releaseTriggered")]
    pub release_triggered: bool,
    #[serde(default, rename = "lastGeneratedCommit")]
    pub last_generated_commit: Option<String>,
}

impl LibraryState {
    /// The tag format in effect, applying the `{id}-{version}` default
    /// when unset or blank.
    pub fn tag_format(&self) -> &str {
        match self.tag_format.as_deref() {
            Some(t) if !t.is_empty() => t,
            _ => "{id}-{version}",
        }
    }

    /// Substitutes `{id}`/`{version}` placeholders in the library's tag
    /// format. Returns an empty string if the library has no version yet
    /// (meaning "all history from the beginning").
    pub fn format_tag(&self) -> String {
        let Some(version) = &self.version else {
            return String::new();
        };
        self.tag_format()
            .replace("{id}", &self.id)
            .replace("{version}", &version.to_string())
    }

    /// Default remove patterns: a literal anchor on each source root,
    /// scoped to the root itself and its children (not siblings that
    /// merely share its name as a prefix, e.g. `dir1` vs `dir10`).
    pub fn effective_remove_patterns(&self) -> Vec<String> {
        if !self.remove_regex.is_empty() {
            self.remove_regex.clone()
        } else {
            self.source_roots
                .iter()
                .map(|root| format!("^{}(/|$)", regex::escape(root)))
                .collect()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Api {
    pub path: String,
    #[serde(default, rename = "serviceConfig")]
    pub service_config: Option<String>,
    /// Transient, populated by the container; never round-tripped.
    #[serde(default, skip_serializing, skip_deserializing)]
    pub status: Option<String>,
}

/// Optional global configuration: a small allowlist of files that live
/// outside any single library's source roots but still need to cross the
/// host/container boundary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LibrarianConfig {
    #[serde(default, rename = "globalFilesAllowlist")]
    pub global_files_allowlist: Vec<AllowlistEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Permission {
    ReadOnly,
    ReadWrite,
    WriteOnly,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllowlistEntry {
    pub path: String,
    pub permissions: Permission,
}

impl LibrarianState {
    /// Loads and validates state from `<repo>/.librarian/state.yaml`.
    pub fn load(repo_dir: &Utf8Path) -> Result<Self> {
        let path = repo_dir.join(STATE_PATH);
        let raw = fs_err::read_to_string(&path).with_context(|| format!("failed to read {path}"))?;
        let state: Self =
            serde_yaml::from_str(&raw).with_context(|| format!("failed to parse {path}"))?;
        state.validate()?;
        Ok(state)
    }

    /// Validates the invariants from the data model: a non-empty image,
    /// unique non-empty library IDs, and non-empty API paths.
    pub fn validate(&self) -> Result<()> {
        if self.image.is_empty() {
            bail!("librarian state is invalid: image must be set");
        }
        let mut seen = std::collections::HashSet::new();
        for library in &self.libraries {
            if library.id.is_empty() {
                bail!("librarian state is invalid: library id must not be empty");
            }
            if !seen.insert(&library.id) {
                bail!("librarian state is invalid: duplicate library id '{}'", library.id);
            }
            for api in &library.apis {
                if api.path.is_empty() {
                    bail!(
                        "librarian state is invalid: library '{}' has an api with an empty path",
                        library.id
                    );
                }
            }
        }
        Ok(())
    }

    /// Writes state back as YAML, omitting fields marked transient.
    pub fn save(&self, repo_dir: &Utf8Path) -> Result<()> {
        let path = repo_dir.join(STATE_PATH);
        if let Some(parent) = path.parent() {
            fs_err::create_dir_all(parent)?;
        }
        let yaml = serde_yaml::to_string(self).context("failed to serialize librarian state")?;
        fs_err::write(&path, yaml).with_context(|| format!("failed to write {path}"))
    }

    pub fn find_library_by_id(&self, id: &str) -> Option<&LibraryState> {
        self.libraries.iter().find(|l| l.id == id)
    }

    pub fn find_library_by_id_mut(&mut self, id: &str) -> Option<&mut LibraryState> {
        self.libraries.iter_mut().find(|l| l.id == id)
    }

    pub fn find_library_by_api(&self, api_path: &str) -> Option<&LibraryState> {
        self.libraries
            .iter()
            .find(|l| l.apis.iter().any(|a| a.path == api_path))
    }
}

impl LibrarianConfig {
    /// Loads the optional `<repo>/.librarian/config.yaml`; a missing file
    /// is not an error, it just yields the default (empty) config.
    pub fn load(repo_dir: &Utf8Path) -> Result<Self> {
        let path = repo_dir.join(CONFIG_PATH);
        if !path.as_std_path().exists() {
            return Ok(Self::default());
        }
        let raw = fs_err::read_to_string(&path).with_context(|| format!("failed to read {path}"))?;
        serde_yaml::from_str(&raw).with_context(|| format!("failed to parse {path}"))
    }
}

/// Fills any empty `apis[i].serviceConfig` by scanning
/// `<api_source>/<api.path>` for a `.yaml` file whose top-level `type` is
/// `google.api.Service`. A no-op when `api_source` is empty.
pub fn populate_service_config_if_empty(state: &mut LibrarianState, api_source: &Utf8Path) -> Result<()> {
    if api_source.as_str().is_empty() {
        return Ok(());
    }
    for library in &mut state.libraries {
        for api in &mut library.apis {
            if api.service_config.is_some() {
                continue;
            }
            let dir = api_source.join(&api.path);
            api.service_config = Some(discover_service_config(dir.as_std_path(), &api.path)?);
        }
    }
    Ok(())
}

fn discover_service_config(dir: &Path, api_path: &str) -> Result<String> {
    let entries = fs_err::read_dir(dir).with_context(|| format!("failed to scan api source for {api_path}"))?;
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
            continue;
        }
        let contents = fs_err::read_to_string(&path)?;
        if let Ok(doc) = serde_yaml::from_str::<serde_yaml::Value>(&contents) {
            if doc.get("type").and_then(|t| t.as_str()) == Some("google.api.Service") {
                return Ok(path.file_name().unwrap_or_default().to_string_lossy().to_string());
            }
        }
    }
    bail!("no service config found under {api_path}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    fn sample_state() -> LibrarianState {
        LibrarianState {
            image: "gcr.io/librarian/example:latest".to_string(),
            libraries: vec![
                LibraryState {
                    id: "lib1".to_string(),
                    version: None,
                    previous_version: None,
                    source_roots: vec!["dir1".to_string()],
                    remove_regex: vec![],
                    preserve_regex: vec![],
                    apis: vec![],
                    tag_format: None,
                    release_exclude_paths: vec![],
                    changes: vec![],
                    release_triggered: false,
                    last_generated_commit: None,
                },
                LibraryState {
                    id: "lib2".to_string(),
                    version: Some(Version::parse("1.0.0").unwrap()),
                    previous_version: None,
                    source_roots: vec!["dir2".to_string()],
                    remove_regex: vec![],
                    preserve_regex: vec![],
                    apis: vec![],
                    tag_format: None,
                    release_exclude_paths: vec![],
                    changes: vec![],
                    release_triggered: false,
                    last_generated_commit: None,
                },
            ],
        }
    }

    #[test]
    fn find_library_by_id() {
        let state = sample_state();
        assert_eq!(state.find_library_by_id("lib2").unwrap().id, "lib2");
        assert!(state.find_library_by_id("lib3").is_none());
    }

    #[test]
    fn save_then_load_is_identity() {
        let dir = tempfile::tempdir().unwrap();
        let repo_dir = Utf8Path::from_path(dir.path()).unwrap();
        let state = sample_state();
        state.save(repo_dir).unwrap();
        let loaded = LibrarianState::load(repo_dir).unwrap();
        assert_eq!(loaded, state);
    }

    #[test]
    fn validate_rejects_empty_image() {
        let mut state = sample_state();
        state.image = String::new();
        assert!(state.validate().is_err());
    }

    #[test]
    fn validate_rejects_duplicate_ids() {
        let mut state = sample_state();
        state.libraries[1].id = "lib1".to_string();
        assert!(state.validate().is_err());
    }

    #[test]
    fn format_tag_default_template() {
        let mut library = sample_state().libraries.remove(1);
        library.version = Some(Version::parse("1.2.3").unwrap());
        assert_eq!(library.format_tag(), "lib2-1.2.3");
    }

    #[test]
    fn format_tag_custom_template() {
        let library = LibraryState {
            id: "google.cloud.foo.v1".to_string(),
            version: Some(Version::parse("1.2.3").unwrap()),
            previous_version: None,
            source_roots: vec![],
            remove_regex: vec![],
            preserve_regex: vec![],
            apis: vec![],
            tag_format: Some("v{version}-{id}".to_string()),
            release_exclude_paths: vec![],
            changes: vec![],
            release_triggered: false,
            last_generated_commit: None,
        };
        assert_eq!(library.format_tag(), "v1.2.3-google.cloud.foo.v1");
    }

    #[test]
    fn format_tag_with_no_version_is_empty() {
        let library = sample_state().libraries.remove(0);
        assert_eq!(library.format_tag(), "");
    }

    #[test]
    fn effective_remove_patterns_do_not_match_sibling_prefixes() {
        let library = sample_state().libraries.remove(0);
        let patterns = library.effective_remove_patterns();
        let re = Regex::new(&patterns[0]).unwrap();
        assert!(re.is_match("dir1"));
        assert!(re.is_match("dir1/file.txt"));
        assert!(!re.is_match("dir10/file.txt"));
        assert!(!re.is_match("dir1-backup/file.txt"));
    }

    #[test]
    fn explicit_remove_regex_overrides_default() {
        let mut library = sample_state().libraries.remove(0);
        library.remove_regex = vec!["^custom/.*".to_string()];
        assert_eq!(library.effective_remove_patterns(), vec!["^custom/.*".to_string()]);
    }
}
