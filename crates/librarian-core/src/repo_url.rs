//! Parses a git host URL (`origin`'s remote) into its owner/repo parts so
//! the notes formatter can build compare and commit links.

use anyhow::{Context, Result};
use git_url_parse::{GitUrl, types::provider::GenericProvider};
use librarian_git::Repo;

#[derive(Debug, Clone)]
pub struct RepoUrl {
    pub scheme: String,
    pub host: String,
    pub owner: String,
    pub name: String,
}

impl RepoUrl {
    pub fn new(git_host_url: &str) -> Result<Self> {
        parse(git_host_url).with_context(|| format!("cannot parse git url {git_host_url}"))
    }

    /// Parses the `origin` remote of an open repo.
    pub fn from_repo(repo: &Repo) -> Result<Self> {
        let origin = repo
            .remotes()?
            .into_iter()
            .find(|r| r.name == "origin")
            .context("could not find an 'origin' remote")?;
        Self::new(&origin.url)
    }

    pub fn is_on_github(&self) -> bool {
        self.host.contains("github")
    }

    pub fn full_host(&self) -> String {
        format!("https://{}/{}/{}", self.host, self.owner, self.name)
    }

    /// GitHub/Gitea compare link between two tags, or a single release
    /// link when there is no prior tag to compare against.
    pub fn compare_link(&self, prev_tag: &str, new_tag: &str) -> String {
        let host = self.full_host();
        if prev_tag.is_empty() || prev_tag == new_tag {
            format!("{host}/releases/tag/{new_tag}")
        } else {
            format!("{host}/compare/{prev_tag}...{new_tag}")
        }
    }

    pub fn commit_link(&self, sha: &str) -> String {
        format!("{}/commit/{sha}", self.full_host())
    }

    pub fn pr_link(&self) -> String {
        let pull_path = if self.is_on_github() { "pull" } else { "pulls" };
        format!("{}/{pull_path}", self.full_host())
    }
}

fn parse(git_host_url: &str) -> Result<RepoUrl> {
    let git_url = GitUrl::parse(git_host_url)?;
    let provider: GenericProvider = git_url.provider_info().context("cannot determine git provider")?;
    let host = git_url.host().context("cannot determine host")?.to_string();
    let scheme = git_url.scheme().context("cannot determine scheme")?.to_string();
    Ok(RepoUrl {
        owner: provider.owner().to_string(),
        name: provider.repo().to_string(),
        host,
        scheme,
    })
}
