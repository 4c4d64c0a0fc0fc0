//! Thin wrapper around the `git` binary, in the spirit of the teacher's
//! `git_cmd` crate: shell out to the real CLI rather than link `libgit2`,
//! and fold stderr into the error on failure.

use std::process::Command;

use anyhow::{Context, Result, bail};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};

/// Runs `git` with `args` inside `dir`, returning trimmed stdout.
pub fn git_in_dir(dir: &Utf8Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .with_context(|| format!("failed to run git {args:?} in {dir}"))?;

    if !output.status.success() {
        bail!(
            "git {args:?} in {dir} failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// A single log entry, as produced by [`Repo::log_since`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub sha: String,
    pub message: String,
    pub when: DateTime<Utc>,
    pub changed_files: Vec<String>,
}

/// A remote, as produced by [`Repo::remotes`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Remote {
    pub name: String,
    pub url: String,
}

/// A handle to a git working tree.
#[derive(Debug, Clone)]
pub struct Repo {
    directory: Utf8PathBuf,
}

impl Repo {
    /// Opens an existing git working tree rooted at `directory`.
    pub fn new(directory: impl AsRef<Utf8Path>) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        git_in_dir(&directory, &["rev-parse", "--show-toplevel"])
            .with_context(|| format!("{directory} is not a git working tree"))?;
        Ok(Self { directory })
    }

    /// Clones `url` into `directory` and opens the result.
    pub fn clone_repo(url: &str, directory: impl AsRef<Utf8Path>) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        if let Some(parent) = directory.parent() {
            fs_err::create_dir_all(parent)?;
        }
        let parent = directory.parent().unwrap_or(Utf8Path::new("."));
        git_in_dir(
            parent,
            &["clone", url, directory.file_name().unwrap_or_default()],
        )
        .with_context(|| format!("failed to clone {url} into {directory}"))?;
        Self::new(directory)
    }

    pub fn directory(&self) -> &Utf8Path {
        &self.directory
    }

    fn run(&self, args: &[&str]) -> Result<String> {
        git_in_dir(&self.directory, args)
    }

    /// Errors with the list of dirty paths if the working tree has any
    /// uncommitted changes (tracked or untracked).
    pub fn is_clean(&self) -> Result<()> {
        let status = self.run(&["status", "--porcelain"])?;
        if status.is_empty() {
            Ok(())
        } else {
            bail!("working tree is not clean:\n{status}");
        }
    }

    pub fn current_branch(&self) -> Result<String> {
        self.run(&["rev-parse", "--abbrev-ref", "HEAD"])
    }

    pub fn current_commit_hash(&self) -> Result<String> {
        self.run(&["rev-parse", "HEAD"])
    }

    pub fn checkout(&self, refname: &str) -> Result<()> {
        self.run(&["checkout", refname]).map(drop)
    }

    pub fn create_branch(&self, name: &str) -> Result<()> {
        self.run(&["checkout", "-b", name]).map(drop)
    }

    pub fn add_all(&self) -> Result<()> {
        self.run(&["add", "-A"]).map(drop)
    }

    pub fn commit(&self, message: &str) -> Result<()> {
        self.run(&["commit", "-m", message]).map(drop)
    }

    pub fn push(&self, refspec: &str) -> Result<()> {
        self.run(&["push", "origin", refspec]).map(drop)
    }

    pub fn fetch(&self, refspec: &str) -> Result<()> {
        self.run(&["fetch", "origin", refspec]).map(drop)
    }

    pub fn tag_exists(&self, name: &str) -> Result<bool> {
        let out = self.run(&["tag", "--list", name])?;
        Ok(!out.is_empty())
    }

    pub fn tag(&self, name: &str, message: &str) -> Result<()> {
        self.run(&["tag", "-a", name, "-m", message]).map(drop)
    }

    pub fn get_tag_commit(&self, name: &str) -> Result<String> {
        self.run(&["rev-list", "-n", "1", name])
    }

    pub fn get_all_tags(&self) -> Result<Vec<String>> {
        let out = self.run(&["tag", "--list"])?;
        Ok(out.lines().map(str::to_string).collect())
    }

    pub fn remotes(&self) -> Result<Vec<Remote>> {
        let out = self.run(&["remote", "-v"])?;
        let mut seen = Vec::new();
        for line in out.lines() {
            let mut parts = line.split_whitespace();
            let (Some(name), Some(url)) = (parts.next(), parts.next()) else {
                continue;
            };
            if seen.iter().any(|r: &Remote| r.name == name) {
                continue;
            }
            seen.push(Remote {
                name: name.to_string(),
                url: url.to_string(),
            });
        }
        Ok(seen)
    }

    pub fn diff_name_only(&self, from: &str, to: &str) -> Result<Vec<String>> {
        let out = self.run(&["diff", "--name-only", from, to])?;
        Ok(out.lines().map(str::to_string).collect())
    }

    /// Returns the commit log since (but excluding) `since`, oldest first,
    /// each entry carrying the set of files it touched. `since` can be a
    /// tag or a bare commit SHA.
    pub fn log_since(&self, since: &str) -> Result<Vec<LogEntry>> {
        self.log(&format!("{since}..HEAD"))
    }

    /// Returns the full commit log reachable from `HEAD`, oldest first,
    /// root commit included. Used when there is no prior tag or SHA to
    /// bound the range, i.e. "all history from the beginning".
    pub fn log_all(&self) -> Result<Vec<LogEntry>> {
        self.log("HEAD")
    }

    fn log(&self, range: &str) -> Result<Vec<LogEntry>> {
        const FIELD_SEP: &str = "\x1f";
        const RECORD_SEP: &str = "\x1e";
        let format = format!("%H{FIELD_SEP}%cI{FIELD_SEP}%B{RECORD_SEP}");
        let out = self.run(&[
            "log",
            "--reverse",
            &format!("--pretty=format:{format}"),
            range,
        ])?;

        let mut entries = Vec::new();
        for record in out.split(RECORD_SEP) {
            let record = record.trim_matches('\n');
            if record.is_empty() {
                continue;
            }
            let mut fields = record.splitn(3, FIELD_SEP);
            let sha = fields.next().unwrap_or_default().to_string();
            let when = fields
                .next()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc))
                .with_context(|| format!("failed to parse commit date for {sha}"))?;
            let message = fields.next().unwrap_or_default().trim().to_string();

            let changed_files = self
                .run(&["diff-tree", "--no-commit-id", "--name-only", "-r", &sha])?
                .lines()
                .map(str::to_string)
                .collect();

            entries.push(LogEntry {
                sha,
                message,
                when,
                changed_files,
            });
        }
        Ok(entries)
    }
}

#[cfg(feature = "test_fixture")]
pub mod test_fixture {
    use super::*;

    /// Initializes a throwaway repo for tests, with an initial commit so
    /// `HEAD` resolves and later `log_since` ranges have a base to diff
    /// against.
    pub fn init_repo(directory: impl AsRef<Utf8Path>) -> Result<Repo> {
        let directory = directory.as_ref().to_path_buf();
        fs_err::create_dir_all(&directory)?;
        git_in_dir(&directory, &["init", "--initial-branch=main"])?;
        git_in_dir(&directory, &["config", "user.email", "librarian@example.com"])?;
        git_in_dir(&directory, &["config", "user.name", "librarian"])?;
        fs_err::write(directory.join(".gitkeep"), "")?;
        let repo = Repo::new(&directory)?;
        repo.add_all()?;
        repo.commit("chore: initial commit")?;
        Ok(repo)
    }
}
