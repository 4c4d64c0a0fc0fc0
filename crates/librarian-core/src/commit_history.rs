//! Commit-history analyzer: conventional commits affecting a library's
//! source roots (or API paths) since its last release (or generation).

use anyhow::{Context, Result};
use librarian_git::Repo;
use librarian_semver::{ConventionalCommit, parse_commits};

use crate::reconcile::should_exclude;
use crate::state::LibraryState;

pub use crate::reconcile::should_exclude as should_exclude_files;

/// Commits affecting `library`'s source roots since its last release tag,
/// with commits wholly confined to `releaseExcludePaths` filtered out.
pub fn conventional_commits_since_last_release(repo: &Repo, library: &LibraryState) -> Result<Vec<ConventionalCommit>> {
    let tag = library.format_tag();
    commits_for_paths_since(repo, &tag, &library.source_roots, &library.release_exclude_paths, &library.id)
}

/// Commits affecting `library`'s API paths since `since_commit`. Returns
/// an empty set (not an error) when `since_commit` is empty, since that
/// explicitly means "no prior generation to diff against".
pub fn conventional_commits_since_last_generation(repo: &Repo, library: &LibraryState, since_commit: &str) -> Result<Vec<ConventionalCommit>> {
    if since_commit.is_empty() {
        return Ok(Vec::new());
    }
    let api_paths: Vec<String> = library.apis.iter().map(|a| a.path.clone()).collect();
    commits_for_paths_since(repo, since_commit, &api_paths, &[], &library.id)
}

fn commits_for_paths_since(
    repo: &Repo,
    since: &str,
    paths: &[String],
    exclude_paths: &[String],
    library_id: &str,
) -> Result<Vec<ConventionalCommit>> {
    let entries = if since.is_empty() {
        repo.log_all()
    } else {
        repo.log_since(since)
    }
    .with_context(|| format!("failed to fetch commit history for library '{library_id}'"))?;

    let mut out = Vec::new();
    for entry in entries {
        if !touches_any_path(&entry.changed_files, paths) {
            continue;
        }
        if should_exclude(&entry.changed_files, exclude_paths) {
            continue;
        }
        let mut parsed = parse_commits(&entry.message, &entry.sha, entry.when)
            .with_context(|| format!("failed to parse commit {}", entry.sha))?;
        for commit in &mut parsed {
            commit.library_id = Some(library_id.to_string());
        }
        out.extend(parsed);
    }
    Ok(out)
}

fn touches_any_path(changed_files: &[String], paths: &[String]) -> bool {
    if paths.is_empty() {
        return true;
    }
    changed_files
        .iter()
        .any(|file| paths.iter().any(|prefix| file == prefix || file.starts_with(&format!("{prefix}/"))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8Path;

    fn library(id: &str) -> LibraryState {
        LibraryState {
            id: id.to_string(),
            version: None,
            previous_version: None,
            source_roots: vec![],
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
    fn should_exclude_matches_reconciler_semantics() {
        let files = vec!["a/b/c.go".to_string()];
        assert!(should_exclude_files(&files, &["a/b".to_string()]));
    }

    #[test]
    fn empty_tag_includes_the_root_commit() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        let repo = librarian_git::test_fixture::init_repo(root).unwrap();
        fs_err::write(root.join("a.txt"), "a").unwrap();
        repo.add_all().unwrap();
        repo.commit("feat: add a").unwrap();

        let commits = conventional_commits_since_last_release(&repo, &library("lib1")).unwrap();
        assert_eq!(commits.len(), 2, "root commit must be included when there is no prior tag");
    }

    #[test]
    fn touches_any_path_with_no_paths_is_always_true() {
        assert!(touches_any_path(&["x/y.txt".to_string()], &[]));
    }

    #[test]
    fn touches_any_path_requires_prefix_match() {
        assert!(touches_any_path(&["dir1/a.txt".to_string()], &["dir1".to_string()]));
        assert!(!touches_any_path(&["dir2/a.txt".to_string()], &["dir1".to_string()]));
    }
}
