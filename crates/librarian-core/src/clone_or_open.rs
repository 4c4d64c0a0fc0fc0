//! Clone-or-open: resolves the `--repo` flag (a URL or a local path) into
//! an open working tree under the work root.

use anyhow::{Context, Result, bail};
use camino::Utf8Path;
use librarian_git::Repo;

fn looks_like_url(repo: &str) -> bool {
    repo.starts_with("http://") || repo.starts_with("https://") || repo.contains('@')
}

/// Directory name derived from the last path segment of a URL, with any
/// trailing slash and `.git` suffix stripped.
fn directory_name_from_url(url: &str) -> &str {
    let trimmed = url.trim_end_matches('/');
    let last = trimmed.rsplit(['/', ':']).next().unwrap_or(trimmed);
    last.strip_suffix(".git").unwrap_or(last)
}

/// Clones or opens `repo` under `work_root`, checking out `branch` (for a
/// fresh clone) and then `git_ref` if given. A local path must already be
/// a clean git working tree; dirty trees are rejected outright, since the
/// orchestrator would otherwise silently mix its own changes with
/// whatever was already sitting there.
pub fn clone_or_open_repo(work_root: &Utf8Path, repo: &str, branch: &str, git_ref: Option<&str>) -> Result<Repo> {
    if looks_like_url(repo) {
        let name = directory_name_from_url(repo);
        let dest = work_root.join(name);
        let opened = Repo::clone_repo(repo, &dest)?;
        if !branch.is_empty() {
            opened.checkout(branch)?;
        }
        if let Some(git_ref) = git_ref {
            opened.checkout(git_ref)?;
        }
        Ok(opened)
    } else {
        let path = Utf8Path::new(repo);
        let opened = Repo::new(path).with_context(|| format!("{path} is not a git repository"))?;
        match opened.is_clean() {
            Ok(()) => {}
            Err(e) => bail!("working tree at {path} is not clean: {e}"),
        }
        Ok(opened)
    }
}
