//! Librarian's orchestration engine: state, filesystem reconciliation,
//! commit-history analysis, release notes, the container and git-host
//! adapters, and the command runners that compose them.

pub mod clone_or_open;
pub mod command;
pub mod commit_history;
pub mod commit_push;
pub mod container;
pub mod github_client;
pub mod notes;
pub mod reconcile;
pub mod repo_url;
pub mod state;
pub mod work_root;

pub use state::{Api, AllowlistEntry, LibrarianConfig, LibrarianState, LibraryState, Permission};
