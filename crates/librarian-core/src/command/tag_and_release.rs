//! §4.8.3 `release tag-and-release`: resolve a merged release PR, recover
//! the `{library, version}` pairs from its body, and tag + release each.

use anyhow::{Context, Result, bail};
use librarian_git::Repo;

use crate::github_client::GithubClient;
use crate::notes::parse_pull_request_body;
use crate::state::LibrarianState;

pub struct TagAndReleaseRequest<'a> {
    pub repo: &'a Repo,
    pub state: &'a LibrarianState,
    pub github: &'a GithubClient,
    pub pull_request_number: Option<u64>,
    pub label_search_query: &'a str,
}

pub struct TaggedRelease {
    pub library_id: String,
    pub tag: String,
}

pub async fn run(request: TagAndReleaseRequest<'_>) -> Result<Vec<TaggedRelease>> {
    let pr_number = match request.pull_request_number {
        Some(n) => n,
        None => {
            let mut matches = request
                .github
                .search_pull_requests(request.label_search_query)
                .await?;
            matches
                .pop()
                .context("no merged release pull request found")?
        }
    };

    let pr = request.github.get_pull_request(pr_number).await?;
    if !pr.merged {
        bail!("pull request #{pr_number} has not been merged");
    }
    let merge_commit = pr
        .merge_commit_sha
        .context("merged pull request is missing a merge commit sha")?;
    let body = pr.body.unwrap_or_default();

    let releases = parse_pull_request_body(&body)?;
    let mut tagged = Vec::new();
    for release in releases {
        let Some(library) = request.state.find_library_by_id(&release.library) else {
            continue;
        };
        let mut with_version = library.clone();
        with_version.version = Some(release.version.clone());
        let tag = with_version.format_tag();

        if !request.repo.tag_exists(&tag)? {
            request.repo.checkout(&merge_commit)?;
            request.repo.tag(&tag, &format!("Release {}", release.library))?;
            request.repo.push(&tag)?;
        }

        request
            .github
            .create_release(&tag, &format!("{}: {}", release.library, release.version), &release.body)
            .await?;

        tagged.push(TaggedRelease {
            library_id: release.library,
            tag,
        });
    }

    Ok(tagged)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_release_body_into_library_releases() {
        let body = "<details><summary>example-id: 1.1.0</summary>\n\n### Features\n\n* a new feature ([1234567](url))\n</details>\n";
        let releases = parse_pull_request_body(body).unwrap();
        assert_eq!(releases.len(), 1);
        assert_eq!(releases[0].library, "example-id");
    }
}
