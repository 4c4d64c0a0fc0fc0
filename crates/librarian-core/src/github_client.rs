//! Git-host client: the GitHub implementation of the abstract surface
//! named in §6.4 (`CreatePullRequest`, `AddLabelsToIssue`, ...).

use std::time::Duration;

use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};

use crate::repo_url::RepoUrl;

/// Every request must honor a deadline per the runtime's cancellation
/// contract; a hung git-host call must not block a command forever.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Client builder using librarian's own user agent, so GitHub's API logs
/// identify which tool is calling it.
fn http_client_builder() -> reqwest::ClientBuilder {
    let user_agent = format!("librarian/{}", env!("CARGO_PKG_VERSION"));
    reqwest::Client::builder().user_agent(user_agent).timeout(REQUEST_TIMEOUT)
}

trait ResponseExt {
    async fn successful_status(self) -> Result<reqwest::Response>;
}

impl ResponseExt for reqwest::Response {
    async fn successful_status(self) -> Result<Self> {
        let Err(err) = self.error_for_status_ref() else {
            return Ok(self);
        };

        let mut body = self.text().await.context("can't convert response body to text")?;
        if let Ok(json) = serde_json::from_str::<serde_json::Value>(&body) {
            body = format!("{json:#}");
        }
        Err(err).with_context(|| format!("Response body:\n{body}"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedPullRequest {
    pub number: u64,
    pub repo: String,
}

pub struct GithubClient {
    client: reqwest::Client,
    token: String,
    repo_url: RepoUrl,
    api_base_url: String,
    raw_base_url: String,
}

impl GithubClient {
    pub fn new(token: impl Into<String>, repo_url: RepoUrl) -> Result<Self> {
        Self::with_base_urls(token, repo_url, "https://api.github.com".to_string(), "https://raw.githubusercontent.com".to_string())
    }

    /// Same as [`Self::new`] but pointed at a test double instead of the
    /// real GitHub hosts.
    #[cfg(test)]
    pub(crate) fn new_for_test(token: impl Into<String>, repo_url: RepoUrl, base_url: &str) -> Result<Self> {
        Self::with_base_urls(token, repo_url, base_url.to_string(), base_url.to_string())
    }

    fn with_base_urls(token: impl Into<String>, repo_url: RepoUrl, api_base_url: String, raw_base_url: String) -> Result<Self> {
        Ok(Self {
            client: http_client_builder().build().context("failed to build http client")?,
            token: token.into(),
            repo_url,
            api_base_url,
            raw_base_url,
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/repos/{}/{}/{path}", self.api_base_url, self.repo_url.owner, self.repo_url.name)
    }

    fn authed(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request.bearer_auth(&self.token).header("Accept", "application/vnd.github+json")
    }

    pub async fn create_pull_request(&self, base_branch: &str, branch: &str, title: &str, body: &str) -> Result<CreatedPullRequest> {
        #[derive(Serialize)]
        struct CreatePrRequest<'a> {
            title: &'a str,
            head: &'a str,
            base: &'a str,
            body: &'a str,
        }
        #[derive(Deserialize)]
        struct CreatePrResponse {
            number: u64,
        }

        let request = CreatePrRequest {
            title,
            head: branch,
            base: base_branch,
            body,
        };
        let response = self
            .authed(self.client.post(self.api_url("pulls")).json(&request))
            .send()
            .await
            .context("failed to create pull request")?
            .successful_status()
            .await
            .context("failed to create pull request")?;
        let parsed: CreatePrResponse = response.json().await.context("failed to create pull request")?;
        Ok(CreatedPullRequest {
            number: parsed.number,
            repo: format!("{}/{}", self.repo_url.owner, self.repo_url.name),
        })
    }

    pub async fn add_labels_to_issue(&self, number: u64, labels: &[String]) -> Result<()> {
        #[derive(Serialize)]
        struct AddLabelsRequest<'a> {
            labels: &'a [String],
        }
        self.authed(
            self.client
                .post(self.api_url(&format!("issues/{number}/labels")))
                .json(&AddLabelsRequest { labels }),
        )
        .send()
        .await
        .context("failed to add labels to pull request")?
        .successful_status()
        .await
        .context("failed to add labels to pull request")?;
        Ok(())
    }

    pub async fn get_labels(&self, number: u64) -> Result<Vec<String>> {
        #[derive(Deserialize)]
        struct Label {
            name: String,
        }
        let response = self
            .authed(self.client.get(self.api_url(&format!("issues/{number}/labels"))))
            .send()
            .await
            .context("failed to get labels")?
            .successful_status()
            .await
            .context("failed to get labels")?;
        let labels: Vec<Label> = response.json().await.context("failed to get labels")?;
        Ok(labels.into_iter().map(|l| l.name).collect())
    }

    pub async fn replace_labels(&self, number: u64, labels: &[String]) -> Result<()> {
        #[derive(Serialize)]
        struct ReplaceLabelsRequest<'a> {
            labels: &'a [String],
        }
        self.authed(
            self.client
                .put(self.api_url(&format!("issues/{number}/labels")))
                .json(&ReplaceLabelsRequest { labels }),
        )
        .send()
        .await
        .context("failed to replace labels")?
        .successful_status()
        .await
        .context("failed to replace labels")?;
        Ok(())
    }

    pub async fn search_pull_requests(&self, query: &str) -> Result<Vec<u64>> {
        #[derive(Deserialize)]
        struct SearchResponse {
            items: Vec<SearchItem>,
        }
        #[derive(Deserialize)]
        struct SearchItem {
            number: u64,
        }

        let full_query = format!(
            "repo:{}/{} {query}",
            self.repo_url.owner, self.repo_url.name
        );
        let response = self
            .authed(
                self.client
                    .get(format!("{}/search/issues", self.api_base_url))
                    .query(&[("q", full_query)]),
            )
            .send()
            .await
            .context("failed to search pull requests")?
            .successful_status()
            .await
            .context("failed to search pull requests")?;
        let parsed: SearchResponse = response.json().await.context("failed to search pull requests")?;
        Ok(parsed.items.into_iter().map(|i| i.number).collect())
    }

    pub async fn get_pull_request(&self, number: u64) -> Result<PullRequest> {
        let response = self
            .authed(self.client.get(self.api_url(&format!("pulls/{number}"))))
            .send()
            .await
            .context("failed to get pull request")?
            .successful_status()
            .await
            .context("failed to get pull request")?;
        response.json().await.context("failed to get pull request")
    }

    pub async fn get_raw_content(&self, path: &str, git_ref: &str) -> Result<String> {
        let url = format!(
            "{}/{}/{}/{git_ref}/{path}",
            self.raw_base_url, self.repo_url.owner, self.repo_url.name
        );
        let response = self
            .authed(self.client.get(url))
            .send()
            .await
            .context("failed to get raw content")?
            .successful_status()
            .await
            .context("failed to get raw content")?;
        response.text().await.context("failed to get raw content")
    }

    /// Cuts a Git-host release for an already-pushed tag.
    pub async fn create_release(&self, tag: &str, name: &str, body: &str) -> Result<()> {
        #[derive(Serialize)]
        struct CreateReleaseRequest<'a> {
            tag_name: &'a str,
            name: &'a str,
            body: &'a str,
        }
        self.authed(self.client.post(self.api_url("releases")).json(&CreateReleaseRequest {
            tag_name: tag,
            name,
            body,
        }))
        .send()
        .await
        .context("failed to create release")?
        .successful_status()
        .await
        .context("failed to create release")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub body: Option<String>,
    pub merged: bool,
    #[serde(rename = "merge_commit_sha")]
    pub merge_commit_sha: Option<String>,
}
