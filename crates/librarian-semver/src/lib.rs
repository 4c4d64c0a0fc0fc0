//! Conventional-commit parsing and semantic version derivation.
//!
//! Mirrors the split in the teacher `next_version` crate: pure, dependency-free
//! logic that the orchestration layer (`librarian-core`) composes with actual
//! git history.

mod commit;
mod version;

pub use commit::{ConventionalCommit, CommitType, parse_commits};
pub use version::{ChangeLevel, derive_next, highest_change, next_version};
