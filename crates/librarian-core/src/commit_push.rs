//! Commit & push coordinator (§4.9): stages changes, branches, commits,
//! pushes, and opens a labeled pull request.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use librarian_git::Repo;

use crate::github_client::GithubClient;
use crate::repo_url::RepoUrl;

pub struct CommitAndPushRequest<'a> {
    pub repo: &'a Repo,
    pub commit_message: &'a str,
    pub pr_title: &'a str,
    pub pr_body: &'a str,
    pub labels: &'a [String],
    pub should_commit: bool,
    pub should_push: bool,
    pub now: DateTime<Utc>,
}

/// Result of a run; `None` when nothing was staged (a no-op).
pub struct CommitAndPushOutcome {
    pub branch: String,
    pub pr_number: Option<u64>,
}

/// `commitAndPush`: stage, branch, commit, and (if requested) push and
/// open a pull request. Neither flag set, or nothing staged, is a
/// successful no-op rather than an error.
pub async fn commit_and_push(request: CommitAndPushRequest<'_>, github: Option<&GithubClient>) -> Result<Option<CommitAndPushOutcome>> {
    if !request.should_commit && !request.should_push {
        return Ok(None);
    }

    let original_branch = request.repo.current_branch().context("failed to read current branch")?;

    request.repo.add_all().context("mock add all error")?;
    if request.repo.is_clean().is_ok() {
        return Ok(None);
    }

    let branch = format!("librarian-{}", request.now.format("%Y%m%d-%H%M%S"));
    request
        .repo
        .create_branch(&branch)
        .context("create branch error")?;
    request.repo.commit(request.commit_message).context("commit error")?;

    if !request.should_push {
        return Ok(Some(CommitAndPushOutcome {
            branch,
            pr_number: None,
        }));
    }

    RepoUrl::from_repo(request.repo).context("could not find an 'origin' remote")?;
    request.repo.push(&branch).context("push error")?;

    let Some(github) = github else {
        bail!("failed to create pull request: no git-host client configured");
    };
    let created = github
        .create_pull_request(&original_branch, &branch, request.pr_title, request.pr_body)
        .await
        .context("failed to create pull request")?;

    if !request.labels.is_empty() {
        github
            .add_labels_to_issue(created.number, request.labels)
            .await
            .context("failed to add labels to pull request")?;
    }

    Ok(Some(CommitAndPushOutcome {
        branch,
        pr_number: Some(created.number),
    }))
}
