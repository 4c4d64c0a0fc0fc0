//! Release-notes / PR-body formatter: deterministic Markdown with
//! collapsible per-library sections, rendered through `tera`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use semver::Version;
use tera::{Context as TeraContext, Tera};

use crate::repo_url::RepoUrl;
use crate::state::{LibrarianState, LibraryState};
use librarian_semver::{CommitType, ConventionalCommit};

/// Fixed section order for release notes; anything else a commit might
/// carry (chore, refactor, ...) never gets its own heading.
const SECTION_ORDER: [(CommitType, &str); 5] = [
    (CommitType::Feat, "Features"),
    (CommitType::Fix, "Bug Fixes"),
    (CommitType::Perf, "Performance Improvements"),
    (CommitType::Revert, "Reverts"),
    (CommitType::Docs, "Documentation"),
];

const RELEASE_PR_BODY_TEMPLATE: &str = r#"Librarian Version: {{ librarian_version }}
Language Image: {{ image }}
{% for library in libraries %}
<details><summary>{{ library.id }}: {{ library.version }}</summary>

## [{{ library.version }}]({{ library.compare_url }}) ({{ library.date }})

{{ library.sections }}
</details>
{% endfor %}"#;

const GENERATION_PR_BODY_TEMPLATE: &str = r#"Librarian Version: {{ librarian_version }}
Language Image: {{ image }}
{% if failed_libraries %}
## Generation failed for

{% for id in failed_libraries %}* {{ id }}
{% endfor %}
{% endif %}
## Commits

{{ commits }}
"#;

fn short_sha(sha: &str) -> &str {
    if sha.len() >= 7 { &sha[..7] } else { sha }
}

/// `shortSHA` exposed for callers outside this module.
pub fn short_sha_of(sha: &str) -> &str {
    short_sha(sha)
}

fn render_section(commit_type: CommitType, commits: &[&ConventionalCommit], repo_url: Option<&RepoUrl>) -> Option<String> {
    let matching: Vec<&ConventionalCommit> = commits
        .iter()
        .copied()
        .filter(|c| c.commit_type == commit_type)
        .collect();
    if matching.is_empty() {
        return None;
    }
    let heading = SECTION_ORDER.iter().find(|(t, _)| *t == commit_type)?.1;
    let mut out = format!("### {heading}\n\n");
    for commit in matching {
        let link = match repo_url {
            Some(url) => url.commit_link(&commit.sha),
            None => commit.sha.clone(),
        };
        out.push_str(&format!("* {} ([{}]({link}))\n", commit.subject, short_sha(&commit.sha)));
    }
    Some(out)
}

fn render_sections(commits: &[&ConventionalCommit], repo_url: Option<&RepoUrl>) -> String {
    SECTION_ORDER
        .iter()
        .filter_map(|(t, _)| render_section(*t, commits, repo_url))
        .collect::<Vec<_>>()
        .join("\n")
}

struct LibraryNotes {
    id: String,
    version: String,
    compare_url: String,
    date: String,
    sections: String,
}

/// Renders the release PR body: one collapsible section per library with
/// `release_triggered = true`, in state order.
pub fn format_release_notes(state: &LibrarianState, librarian_version: &str, repo_url: Option<&RepoUrl>, now: DateTime<Utc>) -> Result<String> {
    let mut libraries = Vec::new();
    for library in &state.libraries {
        if !library.release_triggered {
            continue;
        }
        let version = library
            .version
            .as_ref()
            .context("releaseTriggered library must have a version")?;
        let commits: Vec<&ConventionalCommit> = library.changes.iter().collect();
        let prev_tag = previous_tag(library);
        let new_tag = library.format_tag();
        let compare_url = repo_url
            .map(|url| url.compare_link(&prev_tag, &new_tag))
            .unwrap_or_default();

        libraries.push(LibraryNotes {
            id: library.id.clone(),
            version: version.to_string(),
            compare_url,
            date: now.format("%Y-%m-%d").to_string(),
            sections: render_sections(&commits, repo_url),
        });
    }

    let mut ctx = TeraContext::new();
    ctx.insert("librarian_version", librarian_version);
    ctx.insert("image", &state.image);
    let libraries_json: Vec<_> = libraries
        .iter()
        .map(|l| {
            serde_json::json!({
                "id": l.id,
                "version": l.version,
                "compare_url": l.compare_url,
                "date": l.date,
                "sections": l.sections,
            })
        })
        .collect();
    ctx.insert("libraries", &libraries_json);

    Tera::one_off(RELEASE_PR_BODY_TEMPLATE, &ctx, false).context("failed to render release notes")
}

fn previous_tag(library: &LibraryState) -> String {
    let Some(previous) = &library.previous_version else {
        return String::new();
    };
    let mut with_previous = library.clone();
    with_previous.version = Some(previous.clone());
    with_previous.format_tag()
}

/// Renders the generation PR body: all nested commits between the last
/// generation and now, wrapped so a reviewer (or a future `git log`) can
/// still see the original upstream commit boundaries.
pub fn format_generation_pr_body(librarian_version: &str, image: &str, commits: &[ConventionalCommit], failed_libraries: &[String]) -> Result<String> {
    let mut commit_blocks = String::new();
    for commit in commits {
        commit_blocks.push_str("BEGIN_COMMIT_OVERRIDE\n");
        commit_blocks.push_str("BEGIN_NESTED_COMMIT\n");
        commit_blocks.push_str(&format_commit_line(commit));
        commit_blocks.push_str("\nEND_NESTED_COMMIT\n");
        commit_blocks.push_str("END_COMMIT_OVERRIDE\n");
    }

    let mut ctx = TeraContext::new();
    ctx.insert("librarian_version", librarian_version);
    ctx.insert("image", image);
    ctx.insert("failed_libraries", failed_libraries);
    ctx.insert("commits", &commit_blocks);

    Tera::one_off(GENERATION_PR_BODY_TEMPLATE, &ctx, false).context("failed to render generation pr body")
}

fn format_commit_line(commit: &ConventionalCommit) -> String {
    let mut header = String::new();
    header.push_str(&type_str(commit.commit_type));
    if let Some(scope) = &commit.scope {
        header.push_str(&format!("({scope})"));
    }
    if commit.is_breaking {
        header.push('!');
    }
    header.push_str(": ");
    header.push_str(&commit.subject);

    for (key, value) in &commit.footers {
        if key == "PiperOrigin-RevId" {
            header.push_str(&format!("\n\n{key}: {value}"));
        }
    }
    header
}

fn type_str(commit_type: CommitType) -> String {
    match commit_type {
        CommitType::Feat => "feat",
        CommitType::Fix => "fix",
        CommitType::Docs => "docs",
        CommitType::Perf => "perf",
        CommitType::Revert => "revert",
        CommitType::Chore => "chore",
        CommitType::Refactor => "refactor",
        CommitType::Test => "test",
        CommitType::Build => "build",
        CommitType::Ci => "ci",
        CommitType::Deps => "deps",
        CommitType::Style => "style",
        CommitType::Tools => "tools",
        CommitType::Regen => "regen",
    }
    .to_string()
}

/// A `{library, version, body}` record recovered from a merged PR's body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryRelease {
    pub library: String,
    pub version: Version,
    pub body: String,
}

/// Inverse of [`format_release_notes`]'s `<details>` blocks: recovers
/// `{libraryID, version}` (and the section body) for every triggered
/// library in a rendered release PR body.
pub fn parse_pull_request_body(body: &str) -> Result<Vec<LibraryRelease>> {
    let re = Regex::new(
        r"(?s)<details><summary>([^:]+): ([^<]+)</summary>\n\n(.*?)\n</details>",
    )
    .context("invalid release details regex")?;

    let mut releases = Vec::new();
    for captures in re.captures_iter(body) {
        let library = captures[1].trim().to_string();
        let version_str = captures[2].trim();
        let version = Version::parse(version_str)
            .with_context(|| format!("failed to parse version '{version_str}' for library '{library}'"))?;
        releases.push(LibraryRelease {
            library,
            version,
            body: captures[3].trim().to_string(),
        });
    }
    Ok(releases)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_commit(commit_type: CommitType, subject: &str, sha: &str) -> ConventionalCommit {
        ConventionalCommit {
            commit_type,
            scope: None,
            subject: subject.to_string(),
            body: None,
            footers: Vec::new(),
            is_breaking: false,
            sha: sha.to_string(),
            when: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            library_id: None,
            is_nested: false,
        }
    }

    fn sample_state(library: LibraryState) -> LibrarianState {
        LibrarianState {
            image: "gcr.io/librarian/example:latest".to_string(),
            libraries: vec![library],
        }
    }

    #[test]
    fn release_notes_include_features_section() {
        let mut library = LibraryState {
            id: "example-id".to_string(),
            version: Some(Version::parse("1.1.0").unwrap()),
            previous_version: Some(Version::parse("1.0.0").unwrap()),
            source_roots: vec!["dir1".to_string()],
            remove_regex: vec![],
            preserve_regex: vec![],
            apis: vec![],
            tag_format: None,
            release_exclude_paths: vec![],
            changes: vec![sample_commit(CommitType::Feat, "a new feature", "1234567890")],
            release_triggered: true,
            last_generated_commit: None,
        };
        library.changes[0].library_id = Some("example-id".to_string());
        let state = sample_state(library);
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();

        let body = format_release_notes(&state, "1.0.0", None, now).unwrap();
        assert!(body.contains("<details><summary>example-id: 1.1.0</summary>"));
        assert!(body.contains("### Features"));
        assert!(body.contains("* a new feature ([1234567]"));
    }

    #[test]
    fn sections_omit_when_empty() {
        let commits = vec![sample_commit(CommitType::Fix, "patch a bug", "abcdefg")];
        let refs: Vec<&ConventionalCommit> = commits.iter().collect();
        let rendered = render_sections(&refs, None);
        assert!(rendered.contains("### Bug Fixes"));
        assert!(!rendered.contains("### Features"));
    }

    #[test]
    fn parse_pull_request_body_round_trips() {
        let mut library = LibraryState {
            id: "example-id".to_string(),
            version: Some(Version::parse("1.1.0").unwrap()),
            previous_version: Some(Version::parse("1.0.0").unwrap()),
            source_roots: vec!["dir1".to_string()],
            remove_regex: vec![],
            preserve_regex: vec![],
            apis: vec![],
            tag_format: None,
            release_exclude_paths: vec![],
            changes: vec![sample_commit(CommitType::Feat, "a new feature", "1234567890")],
            release_triggered: true,
            last_generated_commit: None,
        };
        library.changes[0].library_id = Some("example-id".to_string());
        let state = sample_state(library);
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let body = format_release_notes(&state, "1.0.0", None, now).unwrap();

        let releases = parse_pull_request_body(&body).unwrap();
        assert_eq!(releases.len(), 1);
        assert_eq!(releases[0].library, "example-id");
        assert_eq!(releases[0].version, Version::parse("1.1.0").unwrap());
    }

    #[test]
    fn short_sha_truncates_long_shas_but_not_short_ones() {
        assert_eq!(short_sha_of("1234567890"), "1234567");
        assert_eq!(short_sha_of("abc"), "abc");
    }
}
