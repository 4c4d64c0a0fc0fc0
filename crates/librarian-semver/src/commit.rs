use anyhow::{Result, bail};
use chrono::{DateTime, Utc};

const BEGIN_NESTED: &str = "BEGIN_NESTED_COMMIT";
const END_NESTED: &str = "END_NESTED_COMMIT";

/// Commit type extracted from a conventional-commit header.
///
/// `Other` covers anything the grammar recognizes lexically (an
/// identifier followed by `: `) but that has no special meaning to
/// librarian; such commits are dropped by [`parse_commits`] rather than
/// surfaced as this variant, so in practice only the named variants
/// ever escape the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommitType {
    Feat,
    Fix,
    Docs,
    Perf,
    Revert,
    Chore,
    Refactor,
    Test,
    Build,
    Ci,
    Deps,
    Style,
    Tools,
    Regen,
}

impl CommitType {
    fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "feat" => Self::Feat,
            "fix" => Self::Fix,
            "docs" | "doc" => Self::Docs,
            "perf" => Self::Perf,
            "revert" => Self::Revert,
            "chore" => Self::Chore,
            "refactor" => Self::Refactor,
            "test" => Self::Test,
            "build" => Self::Build,
            "ci" => Self::Ci,
            "deps" => Self::Deps,
            "style" => Self::Style,
            "tools" => Self::Tools,
            "regen" => Self::Regen,
            _ => return None,
        })
    }
}

/// A single parsed conventional commit.
///
/// One git commit can yield more than one of these: a squashed or
/// piper-origin merge commit can carry nested commits between
/// `BEGIN_NESTED_COMMIT`/`END_NESTED_COMMIT` markers, each parsed in its
/// own right and flagged with `is_nested`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConventionalCommit {
    pub commit_type: CommitType,
    pub scope: Option<String>,
    pub subject: String,
    pub body: Option<String>,
    /// Footer lines in source order; keys are not deduplicated, matching
    /// how tools like PiperOrigin emit repeated `PiperOrigin-RevId` lines
    /// across amendments.
    pub footers: Vec<(String, String)>,
    pub is_breaking: bool,
    pub sha: String,
    pub when: DateTime<Utc>,
    pub library_id: Option<String>,
    pub is_nested: bool,
}

/// Parses a commit message into zero or more conventional commits.
///
/// Returns an error only for an empty message or a malformed header (a
/// first line with no `: ` separator at all); an unrecognized `type` is
/// not an error, it just drops that record from the output, matching
/// how release notes silently ignore merge commits and the like.
pub fn parse_commits(message: &str, sha: &str, when: DateTime<Utc>) -> Result<Vec<ConventionalCommit>> {
    if message.trim().is_empty() {
        bail!("cannot parse an empty commit message (sha {sha})");
    }

    let mut out = Vec::new();
    for segment in split_nested(message) {
        match segment {
            Segment::Outer(text) => {
                if text.trim().is_empty() {
                    continue;
                }
                if let Some(commit) = parse_block(text, sha, when, false)? {
                    out.push(commit);
                }
            }
            Segment::Nested(text) => {
                for mut commit in parse_commits(text, sha, when)? {
                    commit.is_nested = true;
                    out.push(commit);
                }
            }
        }
    }
    Ok(out)
}

enum Segment<'a> {
    Outer(&'a str),
    Nested(&'a str),
}

/// Splits a message around `BEGIN_NESTED_COMMIT`/`END_NESTED_COMMIT` pairs.
/// Text outside the markers is `Outer`; text between a matched pair is
/// `Nested` and is itself reparsed as a full commit message.
fn split_nested(message: &str) -> Vec<Segment<'_>> {
    let mut segments = Vec::new();
    let mut rest = message;
    loop {
        let Some(begin) = rest.find(BEGIN_NESTED) else {
            segments.push(Segment::Outer(rest));
            break;
        };
        let (before, after_begin) = rest.split_at(begin);
        segments.push(Segment::Outer(before));
        let after_begin = &after_begin[BEGIN_NESTED.len()..];
        match after_begin.find(END_NESTED) {
            Some(end) => {
                segments.push(Segment::Nested(&after_begin[..end]));
                rest = &after_begin[end + END_NESTED.len()..];
            }
            None => {
                // Unterminated marker: treat the remainder as outer text
                // rather than silently swallowing it.
                segments.push(Segment::Outer(after_begin));
                break;
            }
        }
    }
    segments
}

/// Parses a single (non-nested) commit block: header, body, footers.
/// Returns `Ok(None)` when the header's type isn't recognized.
fn parse_block(
    text: &str,
    sha: &str,
    when: DateTime<Utc>,
    is_nested: bool,
) -> Result<Option<ConventionalCommit>> {
    let mut lines = text.lines();
    let header = lines.next().unwrap_or_default().trim();
    if header.is_empty() {
        bail!("malformed header with no colon (sha {sha})");
    }

    let Some(colon) = header.find(':') else {
        bail!("malformed header with no colon (sha {sha})");
    };
    let (prefix, rest) = header.split_at(colon);
    let subject = rest[1..].trim().to_string();

    let mut is_breaking = prefix.ends_with('!');
    let prefix = prefix.strip_suffix('!').unwrap_or(prefix);

    let (type_str, scope) = match (prefix.find('('), prefix.ends_with(')')) {
        (Some(open), true) => (&prefix[..open], Some(prefix[open + 1..prefix.len() - 1].to_string())),
        _ => (prefix, None),
    };

    let Some(commit_type) = CommitType::from_str(type_str.trim()) else {
        return Ok(None);
    };

    let mut body_lines = Vec::new();
    let mut footers = Vec::new();
    let mut in_footers = false;
    for line in lines {
        if line.trim().is_empty() {
            if !body_lines.is_empty() {
                in_footers = true;
            }
            continue;
        }
        if let Some((key, value)) = parse_footer_line(line) {
            in_footers = true;
            if key == "BREAKING CHANGE" {
                is_breaking = true;
            }
            footers.push((key, value));
        } else if in_footers {
            // A non-footer-shaped line after footers started is treated
            // as a continuation of the previous footer's value.
            if let Some(last) = footers.last_mut() {
                last.1.push('\n');
                last.1.push_str(line);
            }
        } else {
            body_lines.push(line);
        }
    }

    let body = if body_lines.is_empty() {
        None
    } else {
        Some(body_lines.join("\n").trim().to_string())
    };

    Ok(Some(ConventionalCommit {
        commit_type,
        scope,
        subject,
        body,
        footers,
        is_breaking,
        sha: sha.to_string(),
        when,
        library_id: None,
        is_nested,
    }))
}

fn parse_footer_line(line: &str) -> Option<(String, String)> {
    if line == "BREAKING CHANGE" {
        return Some(("BREAKING CHANGE".to_string(), String::new()));
    }
    let colon = line.find(':')?;
    let (key, value) = line.split_at(colon);
    let key = key.trim();
    if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == ' ') {
        return None;
    }
    Some((key.to_string(), value[1..].trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn when() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn parses_simple_feat() {
        let commits = parse_commits("feat: add widget", "abc123", when()).unwrap();
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].commit_type, CommitType::Feat);
        assert_eq!(commits[0].subject, "add widget");
        assert!(!commits[0].is_breaking);
    }

    #[test]
    fn parses_scope_and_bang() {
        let commits = parse_commits("fix(core)!: drop legacy path", "sha", when()).unwrap();
        assert_eq!(commits[0].commit_type, CommitType::Fix);
        assert_eq!(commits[0].scope.as_deref(), Some("core"));
        assert!(commits[0].is_breaking);
    }

    #[test]
    fn parses_body_and_footers() {
        let message = "fix: patch the thing\n\nSome explanation here.\n\nPiperOrigin-RevId: 12345\nBREAKING CHANGE: removes old flag";
        let commits = parse_commits(message, "sha", when()).unwrap();
        let commit = &commits[0];
        assert_eq!(commit.body.as_deref(), Some("Some explanation here."));
        assert!(commit.is_breaking);
        assert_eq!(
            commit.footers,
            vec![
                ("PiperOrigin-RevId".to_string(), "12345".to_string()),
                ("BREAKING CHANGE".to_string(), "removes old flag".to_string()),
            ]
        );
    }

    #[test]
    fn unknown_type_is_dropped_not_errored() {
        let commits = parse_commits("wip: still cooking", "sha", when()).unwrap();
        assert!(commits.is_empty());
    }

    #[test]
    fn empty_message_is_an_error() {
        assert!(parse_commits("   \n  ", "sha", when()).is_err());
    }

    #[test]
    fn header_without_colon_is_an_error() {
        assert!(parse_commits("this has no header shape", "sha", when()).is_err());
    }

    #[test]
    fn nested_commits_are_parsed_and_flagged() {
        let message = "chore: regenerate\n\nBEGIN_NESTED_COMMIT\nfeat: add cool feature\nEND_NESTED_COMMIT\nBEGIN_NESTED_COMMIT\nfix: patch bug\nEND_NESTED_COMMIT\n";
        let commits = parse_commits(message, "sha", when()).unwrap();
        assert_eq!(commits.len(), 3);
        assert!(!commits[0].is_nested);
        assert_eq!(commits[0].commit_type, CommitType::Chore);
        assert!(commits[1].is_nested);
        assert_eq!(commits[1].commit_type, CommitType::Feat);
        assert!(commits[2].is_nested);
        assert_eq!(commits[2].commit_type, CommitType::Fix);
    }
}
