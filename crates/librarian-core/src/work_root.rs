//! Work-root creation: a scratch directory for one command run, under
//! which the partial repo, the host-mount root, and container I/O live.

use anyhow::{Context, Result, bail};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};

/// Creates `tmp/librarian-<YYYYmmdd-HHMMSS>` (or returns `override_path`
/// unchanged, if set). Errors if the computed directory already exists,
/// since a collision would mean two runs are racing over the same root.
pub fn create_work_root(now: DateTime<Utc>, override_path: Option<&Utf8Path>) -> Result<Utf8PathBuf> {
    if let Some(path) = override_path {
        fs_err::create_dir_all(path).with_context(|| format!("failed to create work root {path}"))?;
        return Ok(path.to_path_buf());
    }

    let path = Utf8PathBuf::from(format!("tmp/librarian-{}", now.format("%Y%m%d-%H%M%S")));
    if path.as_std_path().exists() {
        bail!("work root {path} already exists");
    }
    fs_err::create_dir_all(&path).with_context(|| format!("failed to create work root {path}"))?;
    Ok(path)
}
