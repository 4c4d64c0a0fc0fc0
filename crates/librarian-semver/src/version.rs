use anyhow::{Result, bail};
use semver::{BuildMetadata, Prerelease, Version};

use crate::commit::ConventionalCommit;

/// A bump magnitude, totally ordered `None < Patch < Minor < Major`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChangeLevel {
    None,
    Patch,
    Minor,
    Major,
}

/// The highest-impact change across a set of commits.
///
/// A nested commit always counts as at least `Minor` regardless of its
/// own type, since it represents an entire upstream changelist folded
/// into one commit and librarian has no finer-grained signal for it.
pub fn highest_change(commits: &[ConventionalCommit]) -> ChangeLevel {
    commits
        .iter()
        .map(|c| {
            if c.is_nested {
                ChangeLevel::Minor
            } else if c.is_breaking {
                ChangeLevel::Major
            } else {
                match c.commit_type {
                    crate::commit::CommitType::Feat => ChangeLevel::Minor,
                    crate::commit::CommitType::Fix => ChangeLevel::Patch,
                    _ => ChangeLevel::None,
                }
            }
        })
        .max()
        .unwrap_or(ChangeLevel::None)
}

/// Derives the next version from a change level and the current version.
///
/// A prerelease current version (e.g. `1.2.3-beta01`) is special-cased:
/// any non-`None` level increments the prerelease's trailing numeric run
/// instead of bumping `major.minor.patch`, since a prerelease train is
/// understood to still be heading for the same release.
pub fn derive_next(level: ChangeLevel, current: &Version) -> Result<Version> {
    if level == ChangeLevel::None {
        return Ok(current.clone());
    }
    if !current.pre.is_empty() {
        return increment_prerelease(current);
    }
    let mut next = current.clone();
    match level {
        ChangeLevel::Major => {
            next.major += 1;
            next.minor = 0;
            next.patch = 0;
        }
        ChangeLevel::Minor => {
            next.minor += 1;
            next.patch = 0;
        }
        ChangeLevel::Patch => {
            next.patch += 1;
        }
        ChangeLevel::None => unreachable!(),
    }
    next.pre = Prerelease::EMPTY;
    next.build = BuildMetadata::EMPTY;
    Ok(next)
}

/// Increments the trailing run of ASCII digits in a prerelease
/// identifier, left-padding the result to the original run's width
/// (`beta01 -> beta02`) except where incrementing naturally widens it
/// (`beta99 -> beta100`, `beta.9 -> beta.10`).
fn increment_prerelease(current: &Version) -> Result<Version> {
    let pre = current.pre.as_str();
    let digit_start = pre
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(i, _)| i);

    let Some(digit_start) = digit_start else {
        bail!("prerelease '{pre}' has no trailing numeric run to increment");
    };

    let prefix = &pre[..digit_start];
    let digits = &pre[digit_start..];
    let width = digits.len();
    let number: u64 = digits
        .parse()
        .expect("trailing run of ascii digits parses as u64");
    let incremented = format!("{:0width$}", number + 1, width = width);

    let mut next = current.clone();
    next.pre = Prerelease::new(&format!("{prefix}{incremented}"))
        .expect("incrementing digits cannot produce an invalid prerelease identifier");
    next.build = BuildMetadata::EMPTY;
    Ok(next)
}

/// Computes the next version for a release.
///
/// `current` is `None` when the library has never been released.
/// `override_version`, when given, wins outright, but must be strictly
/// greater than `current` unless there is no current release yet.
pub fn next_version(
    commits: &[ConventionalCommit],
    current: Option<&Version>,
    override_version: Option<&Version>,
) -> Result<Version> {
    if let Some(ov) = override_version {
        if let Some(cur) = current {
            if ov <= cur {
                bail!(
                    "inputted version is not SemVer greater than the current version ({cur} -> {ov})"
                );
            }
        }
        return Ok(ov.clone());
    }

    let level = highest_change(commits);
    let baseline = Version::new(0, 0, 0);
    derive_next(level, current.unwrap_or(&baseline))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::CommitType;
    use chrono::{TimeZone, Utc};

    fn commit(commit_type: CommitType, is_breaking: bool, is_nested: bool) -> ConventionalCommit {
        ConventionalCommit {
            commit_type,
            scope: None,
            subject: String::new(),
            body: None,
            footers: Vec::new(),
            is_breaking,
            sha: "sha".to_string(),
            when: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            library_id: None,
            is_nested,
        }
    }

    #[test]
    fn level_ordering() {
        assert!(ChangeLevel::None < ChangeLevel::Patch);
        assert!(ChangeLevel::Patch < ChangeLevel::Minor);
        assert!(ChangeLevel::Minor < ChangeLevel::Major);
    }

    #[test]
    fn highest_change_picks_the_max() {
        let commits = vec![
            commit(CommitType::Fix, false, false),
            commit(CommitType::Feat, false, false),
        ];
        assert_eq!(highest_change(&commits), ChangeLevel::Minor);
    }

    #[test]
    fn nested_commit_is_at_least_minor() {
        let commits = vec![commit(CommitType::Chore, false, true)];
        assert_eq!(highest_change(&commits), ChangeLevel::Minor);
    }

    #[test]
    fn next_version_feat_bumps_minor() {
        let commits = vec![commit(CommitType::Feat, false, false)];
        let current = Version::parse("1.0.0").unwrap();
        let next = next_version(&commits, Some(&current), None).unwrap();
        assert_eq!(next, Version::parse("1.1.0").unwrap());
    }

    #[test]
    fn next_version_breaking_feat_bumps_major() {
        let commits = vec![commit(CommitType::Feat, true, false)];
        let current = Version::parse("1.2.3").unwrap();
        let next = next_version(&commits, Some(&current), None).unwrap();
        assert_eq!(next, Version::parse("2.0.0").unwrap());
    }

    #[test]
    fn next_version_prerelease_increments_counter() {
        let commits = vec![commit(CommitType::Feat, false, false)];
        let current = Version::parse("1.2.3-beta01").unwrap();
        let next = next_version(&commits, Some(&current), None).unwrap();
        assert_eq!(next, Version::parse("1.2.3-beta02").unwrap());
    }

    #[test]
    fn prerelease_widens_past_original_padding() {
        let current = Version::parse("1.2.3-beta99").unwrap();
        let next = derive_next(ChangeLevel::Patch, &current).unwrap();
        assert_eq!(next.pre.as_str(), "beta100");
    }

    #[test]
    fn prerelease_dot_separated_counter() {
        let current = Version::parse("1.2.3-beta.9").unwrap();
        let next = derive_next(ChangeLevel::Patch, &current).unwrap();
        assert_eq!(next.pre.as_str(), "beta.10");
    }

    #[test]
    fn prerelease_without_trailing_digits_fails() {
        let current = Version::parse("1.2.3-beta").unwrap();
        assert!(derive_next(ChangeLevel::Patch, &current).is_err());
    }

    #[test]
    fn none_level_returns_current_unchanged() {
        let current = Version::parse("1.2.3").unwrap();
        let next = derive_next(ChangeLevel::None, &current).unwrap();
        assert_eq!(next, current);
    }

    #[test]
    fn override_must_be_strictly_greater_than_current() {
        let current = Version::parse("1.2.3").unwrap();
        let same = Version::parse("1.2.3").unwrap();
        assert!(next_version(&[], Some(&current), Some(&same)).is_err());
    }

    #[test]
    fn override_with_no_current_release_is_always_accepted() {
        let ov = Version::parse("0.1.0").unwrap();
        let next = next_version(&[], None, Some(&ov)).unwrap();
        assert_eq!(next, ov);
    }
}
