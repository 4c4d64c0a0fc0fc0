//! §4.8.2 `release init`: compute next versions from conventional commit
//! history, ask the container to prepare the release, and open a PR.

use anyhow::{Context, Result, bail};
use camino::Utf8Path;
use chrono::{DateTime, Utc};
use librarian_git::Repo;
use librarian_semver::{ChangeLevel, highest_change, next_version};
use semver::Version;

use crate::commit_history::conventional_commits_since_last_release;
use crate::commit_push::{CommitAndPushOutcome, CommitAndPushRequest, commit_and_push};
use crate::container::ContainerClient;
use crate::github_client::GithubClient;
use crate::notes::format_release_notes;
use crate::reconcile::{copy_global_allowlist, copy_library};
use crate::repo_url::RepoUrl;
use crate::state::{LibrarianConfig, LibrarianState};

pub struct ReleaseInitRequest<'a> {
    pub repo: &'a Repo,
    pub state: &'a mut LibrarianState,
    pub config: &'a LibrarianConfig,
    pub container: &'a ContainerClient,
    pub github: Option<&'a GithubClient>,
    pub mount_root: &'a Utf8Path,
    pub output_dir: &'a Utf8Path,
    pub partial_repo_dir: &'a Utf8Path,
    pub library_filter: Option<&'a str>,
    pub library_version_override: Option<&'a Version>,
    pub librarian_version: &'a str,
    pub should_commit: bool,
    pub should_push: bool,
    pub now: DateTime<Utc>,
}

pub struct ReleaseInitOutcome {
    pub triggered: Vec<String>,
    pub commit: Option<CommitAndPushOutcome>,
}

const RELEASE_LABEL: &str = "release:pending";

pub async fn run(request: ReleaseInitRequest<'_>) -> Result<ReleaseInitOutcome> {
    fs_err::create_dir_all(request.output_dir).context("failed to create output dir")?;

    let targets: Vec<String> = match request.library_filter {
        Some(id) => vec![id.to_string()],
        None => request.state.libraries.iter().map(|l| l.id.clone()).collect(),
    };

    build_partial_repo(&request, &targets)?;

    let mut triggered = Vec::new();
    for library_id in &targets {
        let is_single_target = request.library_filter.is_some();
        update_library(request.repo, request.state, library_id, request.library_version_override, is_single_target)?;
        if request
            .state
            .find_library_by_id(library_id)
            .is_some_and(|l| l.release_triggered)
        {
            triggered.push(library_id.clone());

            let updated = request
                .container
                .release_init(request.mount_root, library_id, request.state, request.partial_repo_dir)
                .await
                .with_context(|| format!("container.ReleaseInit failed for library '{library_id}'"))?;
            if let Some(library) = request.state.find_library_by_id_mut(library_id) {
                let changes = std::mem::take(&mut library.changes);
                *library = updated;
                library.changes = changes;
            }

            if let Some(library) = request.state.find_library_by_id(library_id) {
                copy_library(request.repo.directory(), request.output_dir, &library.source_roots)
                    .with_context(|| format!("failed to copy release artifacts for library '{library_id}'"))?;
            }
        }
    }

    copy_global_allowlist(request.config, request.repo.directory(), request.output_dir, false)
        .context("failed to copy global files back from release init output")?;

    request.state.save(request.repo.directory())?;

    let repo_url = RepoUrl::from_repo(request.repo).ok();
    let body = format_release_notes(request.state, request.librarian_version, repo_url.as_ref(), request.now)?;

    let commit = if triggered.is_empty() {
        None
    } else {
        let labels = vec![RELEASE_LABEL.to_string()];
        let commit_request = CommitAndPushRequest {
            repo: request.repo,
            commit_message: "chore: create a release",
            pr_title: "chore: create a release",
            pr_body: &body,
            labels: &labels,
            should_commit: request.should_commit,
            should_push: request.should_push,
            now: request.now,
        };
        commit_and_push(commit_request, request.github).await?
    };

    Ok(ReleaseInitOutcome { triggered, commit })
}

fn build_partial_repo(request: &ReleaseInitRequest<'_>, targets: &[String]) -> Result<()> {
    for library_id in targets {
        if let Some(library) = request.state.find_library_by_id(library_id) {
            copy_library(request.partial_repo_dir, request.repo.directory(), &library.source_roots)?;
        }
    }
    let librarian_dir = request.repo.directory().join(".librarian");
    if librarian_dir.as_std_path().exists() {
        fs_err::create_dir_all(request.partial_repo_dir.join(".librarian"))?;
        for entry in fs_err::read_dir(&librarian_dir)? {
            let entry = entry?;
            let dst = request.partial_repo_dir.join(".librarian").join(entry.file_name());
            fs_err::copy(entry.path(), dst)?;
        }
    }
    copy_global_allowlist(request.config, request.partial_repo_dir, request.repo.directory(), true)
        .context("failed to copy global allowlist into partial repo")?;
    Ok(())
}

/// `updateLibrary`: derive the next version from commit history (or an
/// override) and set `releaseTriggered` when a release should happen.
fn update_library(repo: &Repo, state: &mut LibrarianState, library_id: &str, override_version: Option<&Version>, is_single_target: bool) -> Result<()> {
    let Some(library) = state.find_library_by_id(library_id) else {
        bail!("library '{library_id}' not found");
    };
    let commits = conventional_commits_since_last_release(repo, library)?;
    let current = library.version.clone();

    let has_releasable_unit = highest_change(&commits) != ChangeLevel::None;
    if !has_releasable_unit && override_version.is_none() {
        if is_single_target {
            bail!("library '{library_id}' does not have a releasable unit and no version override was given");
        }
        return Ok(());
    }

    let next = next_version(&commits, current.as_ref(), override_version)?;

    let library = state
        .find_library_by_id_mut(library_id)
        .expect("library existed a moment ago");
    library.previous_version = current;
    library.version = Some(next);
    library.changes = commits;
    library.release_triggered = true;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::LibraryState;

    fn library(id: &str) -> LibraryState {
        LibraryState {
            id: id.to_string(),
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
        }
    }

    #[test]
    fn update_library_skips_when_no_changes_and_not_single_target() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        let repo = librarian_git::test_fixture::init_repo(root).unwrap();
        let mut state = LibrarianState {
            image: "img".to_string(),
            libraries: vec![library("lib1")],
        };
        update_library(&repo, &mut state, "lib1", None, false).unwrap();
        assert!(!state.find_library_by_id("lib1").unwrap().release_triggered);
    }

    #[test]
    fn update_library_fails_when_single_target_has_no_releasable_unit() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        let repo = librarian_git::test_fixture::init_repo(root).unwrap();
        let mut state = LibrarianState {
            image: "img".to_string(),
            libraries: vec![library("lib1")],
        };
        let result = update_library(&repo, &mut state, "lib1", None, true);
        assert!(result.is_err());
    }

    #[test]
    fn update_library_skips_when_only_non_bumping_commits_touch_the_library() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        let repo = librarian_git::test_fixture::init_repo(root).unwrap();
        fs_err::create_dir_all(root.join("dir1")).unwrap();
        fs_err::write(root.join("dir1/README.md"), "docs").unwrap();
        repo.add_all().unwrap();
        repo.commit("chore: tidy up dir1").unwrap();

        let mut state = LibrarianState {
            image: "img".to_string(),
            libraries: vec![library("lib1")],
        };
        update_library(&repo, &mut state, "lib1", None, false).unwrap();
        assert!(!state.find_library_by_id("lib1").unwrap().release_triggered);
    }

    #[test]
    fn update_library_fails_single_target_with_only_non_bumping_commits() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        let repo = librarian_git::test_fixture::init_repo(root).unwrap();
        fs_err::create_dir_all(root.join("dir1")).unwrap();
        fs_err::write(root.join("dir1/README.md"), "docs").unwrap();
        repo.add_all().unwrap();
        repo.commit("chore: tidy up dir1").unwrap();

        let mut state = LibrarianState {
            image: "img".to_string(),
            libraries: vec![library("lib1")],
        };
        let result = update_library(&repo, &mut state, "lib1", None, true);
        assert!(result.is_err());
    }

    #[test]
    fn update_library_accepts_override_with_no_releasable_unit() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        let repo = librarian_git::test_fixture::init_repo(root).unwrap();
        let mut state = LibrarianState {
            image: "img".to_string(),
            libraries: vec![library("lib1")],
        };
        let override_version = Version::parse("2.0.0").unwrap();
        update_library(&repo, &mut state, "lib1", Some(&override_version), true).unwrap();
        let lib = state.find_library_by_id("lib1").unwrap();
        assert!(lib.release_triggered);
        assert_eq!(lib.version, Some(override_version));
    }
}
