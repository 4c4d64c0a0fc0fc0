//! §4.8.1 `generate`: delegate language-specific codegen to the
//! container, then reconcile its output back into the repo.

use anyhow::{Context, Result};
use camino::Utf8Path;
use chrono::{DateTime, Utc};
use librarian_git::Repo;

use crate::commit_history::conventional_commits_since_last_generation;
use crate::commit_push::{CommitAndPushOutcome, CommitAndPushRequest, commit_and_push};
use crate::container::ContainerClient;
use crate::github_client::GithubClient;
use crate::notes::format_generation_pr_body;
use crate::reconcile::clean_and_copy_library;
use crate::state::LibrarianState;

pub struct GenerateRequest<'a> {
    pub repo: &'a Repo,
    pub state: &'a mut LibrarianState,
    pub container: &'a ContainerClient,
    pub github: Option<&'a GithubClient>,
    pub mount_root: &'a Utf8Path,
    pub output_dir: &'a Utf8Path,
    pub partial_repo_dir: &'a Utf8Path,
    pub api_source: &'a Utf8Path,
    pub api_filter: Option<&'a str>,
    pub library_filter: Option<&'a str>,
    pub build: bool,
    pub should_commit: bool,
    pub should_push: bool,
    pub librarian_version: &'a str,
    pub now: DateTime<Utc>,
}

/// One library's outcome, reported regardless of success so a batch can
/// be summarized without aborting on the first failure.
pub struct LibraryOutcome {
    pub library_id: String,
    pub error: Option<String>,
}

pub struct GenerateOutcome {
    pub libraries: Vec<LibraryOutcome>,
    pub commit: Option<CommitAndPushOutcome>,
}

/// Resolves the target library set per §4.8.1: an explicit `--library`,
/// the single library owning `--api`, or every library in state.
fn resolve_targets<'a>(state: &'a LibrarianState, api_filter: Option<&str>, library_filter: Option<&str>) -> Vec<&'a str> {
    if let Some(id) = library_filter {
        return state
            .find_library_by_id(id)
            .map(|l| vec![l.id.as_str()])
            .unwrap_or_default();
    }
    if let Some(api) = api_filter {
        return state
            .find_library_by_api(api)
            .map(|l| vec![l.id.as_str()])
            .unwrap_or_default();
    }
    state.libraries.iter().map(|l| l.id.as_str()).collect()
}

pub async fn run(request: GenerateRequest<'_>) -> Result<GenerateOutcome> {
    let targets: Vec<String> = resolve_targets(request.state, request.api_filter, request.library_filter)
        .into_iter()
        .map(str::to_string)
        .collect();

    if targets.is_empty() && request.api_filter.is_none() && request.library_filter.is_none() {
        // Onboarding: no libraries known yet, configure a new one.
        let configured = request
            .container
            .configure(request.mount_root, request.state, request.api_source)
            .await
            .context("failed to configure new library")?;
        request.state.libraries.push(configured);
    }

    let mut accumulated_commits = Vec::new();
    for library_id in &targets {
        if let Some(library) = request.state.find_library_by_id(library_id) {
            let since_commit = library.last_generated_commit.clone().unwrap_or_default();
            let commits = conventional_commits_since_last_generation(request.repo, library, &since_commit)
                .with_context(|| format!("failed to fetch generation history for library '{library_id}'"))?;
            accumulated_commits.extend(commits);
        }
    }
    accumulated_commits.sort_by(|a, b| b.when.cmp(&a.when));

    let mut outcomes = Vec::new();
    for library_id in &targets {
        let outcome = process_library(&request, library_id).await;
        outcomes.push(LibraryOutcome {
            library_id: library_id.clone(),
            error: outcome.err().map(|e| e.to_string()),
        });
    }

    let any_succeeded = outcomes.iter().any(|o| o.error.is_none());
    let commit = if any_succeeded {
        let failed_libraries: Vec<String> = outcomes
            .iter()
            .filter(|o| o.error.is_some())
            .map(|o| o.library_id.clone())
            .collect();
        let pr_body = format_generation_pr_body(request.librarian_version, &request.state.image, &accumulated_commits, &failed_libraries)?;
        let commit_request = CommitAndPushRequest {
            repo: request.repo,
            commit_message: "chore: generate client libraries",
            pr_title: "chore: generate client libraries",
            pr_body: &pr_body,
            labels: &[],
            should_commit: request.should_commit,
            should_push: request.should_push,
            now: request.now,
        };
        commit_and_push(commit_request, request.github).await?
    } else {
        None
    };

    Ok(GenerateOutcome {
        libraries: outcomes,
        commit,
    })
}

async fn process_library(request: &GenerateRequest<'_>, library_id: &str) -> Result<()> {
    let generated = request
        .container
        .generate(request.mount_root, library_id, request.state, request.output_dir, request.partial_repo_dir)
        .await
        .with_context(|| format!("container.Generate failed for library '{library_id}'"))?;

    if let Some(library) = request.state.find_library_by_id_mut(library_id) {
        *library = generated;
    }

    clean_and_copy_library(request.state, request.repo.directory(), library_id, request.output_dir)?;

    if request.build {
        let built = request
            .container
            .build(request.mount_root, library_id, request.state)
            .await
            .with_context(|| format!("container.Build failed for library '{library_id}'"))?;
        if let Some(library) = request.state.find_library_by_id_mut(library_id) {
            *library = built;
        }
    }

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

    fn state() -> LibrarianState {
        LibrarianState {
            image: "img".to_string(),
            libraries: vec![library("lib1"), library("lib2")],
        }
    }

    #[test]
    fn resolve_targets_by_library_filter() {
        let targets = resolve_targets(&state(), None, Some("lib2"));
        assert_eq!(targets, vec!["lib2"]);
    }

    #[test]
    fn resolve_targets_defaults_to_every_library() {
        let targets = resolve_targets(&state(), None, None);
        assert_eq!(targets, vec!["lib1", "lib2"]);
    }

    #[test]
    fn resolve_targets_unknown_library_is_empty() {
        let targets = resolve_targets(&state(), None, Some("missing"));
        assert!(targets.is_empty());
    }
}
