//! Container protocol adapter: file-based request/response contract
//! between the orchestrator and the language-specific container image.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::state::{LibrarianState, LibraryState};

/// Every container invocation (`generate`, `build`, `configure`,
/// `release-init`) must honor a deadline per the runtime's cancellation
/// contract; this bounds how long a single call can run.
const DEFAULT_INVOKE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Translates a host path to its container-local counterpart when
/// `--host-mount HOST:LOCAL` is in effect; otherwise paths are used
/// unchanged (the host-mount root is itself the container's work root).
#[derive(Debug, Clone)]
pub struct HostMount {
    pub host: PathBuf,
    pub local: Utf8PathBuf,
}

impl HostMount {
    /// Parses a `HOST:LOCAL` flag value.
    pub fn parse(spec: &str) -> Result<Self> {
        let (host, local) = spec
            .split_once(':')
            .with_context(|| format!("--host-mount value '{spec}' must be HOST:LOCAL"))?;
        Ok(Self {
            host: PathBuf::from(host),
            local: Utf8PathBuf::from(local),
        })
    }

    fn translate(&self, host_mount_root: &Utf8Path, path: &Utf8Path) -> Utf8PathBuf {
        match path.strip_prefix(host_mount_root) {
            Ok(rest) => self.local.join(rest),
            Err(_) => path.to_path_buf(),
        }
    }
}

/// Invokes the container image with a host-mounted directory and a
/// file-based request/response contract.
pub struct ContainerClient {
    image: String,
    host_mount: Option<HostMount>,
    timeout: Duration,
}

impl ContainerClient {
    pub fn new(image: impl Into<String>, host_mount: Option<HostMount>) -> Self {
        Self {
            image: image.into(),
            host_mount,
            timeout: DEFAULT_INVOKE_TIMEOUT,
        }
    }

    /// Overrides the per-invocation deadline, mainly so tests don't have
    /// to wait the full default timeout to observe a cancellation.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn generate(&self, mount_root: &Utf8Path, library_id: &str, state: &LibrarianState, output_dir: &Utf8Path, partial_repo_dir: &Utf8Path) -> Result<LibraryState> {
        let request = GenerateRequest {
            mount: self.mount_path(mount_root),
            library_id: library_id.to_string(),
            state: state.clone(),
            output: self.container_path(mount_root, output_dir),
            partial_repo_dir: self.container_path(mount_root, partial_repo_dir),
        };
        self.invoke(mount_root, "generate", &request).await
    }

    pub async fn build(&self, mount_root: &Utf8Path, library_id: &str, state: &LibrarianState) -> Result<LibraryState> {
        let request = BuildRequest {
            mount: self.mount_path(mount_root),
            library_id: library_id.to_string(),
            state: state.clone(),
        };
        self.invoke(mount_root, "build", &request).await
    }

    pub async fn configure(&self, mount_root: &Utf8Path, state: &LibrarianState, api_root: &Utf8Path) -> Result<LibraryState> {
        let request = ConfigureRequest {
            mount: self.mount_path(mount_root),
            state: state.clone(),
            api_root: self.container_path(mount_root, api_root),
        };
        self.invoke(mount_root, "configure", &request).await
    }

    pub async fn release_init(&self, mount_root: &Utf8Path, library_id: &str, state: &LibrarianState, partial_repo_dir: &Utf8Path) -> Result<LibraryState> {
        let request = ReleaseInitRequest {
            mount: self.mount_path(mount_root),
            library_id: library_id.to_string(),
            state: state.clone(),
            partial_repo_dir: self.container_path(mount_root, partial_repo_dir),
        };
        self.invoke(mount_root, "release-init", &request).await
    }

    fn mount_path(&self, mount_root: &Utf8Path) -> Utf8PathBuf {
        match &self.host_mount {
            Some(hm) => hm.local.clone(),
            None => mount_root.to_path_buf(),
        }
    }

    fn container_path(&self, mount_root: &Utf8Path, path: &Utf8Path) -> Utf8PathBuf {
        match &self.host_mount {
            Some(hm) => hm.translate(mount_root, path),
            None => path.to_path_buf(),
        }
    }

    async fn invoke<R: Serialize>(&self, mount_root: &Utf8Path, command: &str, request: &R) -> Result<LibraryState> {
        let request_path = mount_root.join(format!(".librarian/{command}-request.json"));
        let response_name = format!("{command}-response.json");
        let response_path = mount_root.join(format!(".librarian/{response_name}"));

        if let Some(parent) = request_path.parent() {
            fs_err::create_dir_all(parent)?;
        }
        let request_json = serde_json::to_vec_pretty(request).context("failed to serialize container request")?;
        fs_err::write(&request_path, request_json).with_context(|| format!("failed to write {request_path}"))?;

        let status = tokio::time::timeout(
            self.timeout,
            Command::new("docker")
                .args(["run", "--rm", "-v"])
                .arg(format!("{}:{}", mount_root, self.mount_path(mount_root)))
                .arg(&self.image)
                .arg(command)
                .status(),
        )
        .await
        .with_context(|| format!("container image {} timed out after {:?}", self.image, self.timeout))?
        .with_context(|| format!("failed to invoke container image {}", self.image))?;
        if !status.success() {
            bail!("container image {} exited with {status}", self.image);
        }

        read_response(&response_path)
    }
}

/// Reads and validates the container's response, deleting the file
/// afterward so a stale response can't leak into a later run.
fn read_response(path: &Utf8Path) -> Result<LibraryState> {
    let raw = fs_err::read_to_string(path).with_context(|| format!("failed to read container response {path}"))?;
    let response: ContainerResponse =
        serde_json::from_str(&raw).with_context(|| format!("failed to parse container response {path}"))?;
    fs_err::remove_file(path).with_context(|| format!("failed to remove stale response {path}"))?;

    if let Some(message) = response.error_message.filter(|m| !m.is_empty()) {
        bail!("failed with error message: {message}");
    }
    Ok(response.library)
}

#[derive(Debug, Clone, Serialize)]
struct GenerateRequest {
    mount: Utf8PathBuf,
    #[serde(rename = "libraryID")]
    library_id: String,
    state: LibrarianState,
    output: Utf8PathBuf,
    #[serde(rename = "partialRepoDir")]
    partial_repo_dir: Utf8PathBuf,
}

#[derive(Debug, Clone, Serialize)]
struct BuildRequest {
    mount: Utf8PathBuf,
    #[serde(rename = "libraryID")]
    library_id: String,
    state: LibrarianState,
}

#[derive(Debug, Clone, Serialize)]
struct ConfigureRequest {
    mount: Utf8PathBuf,
    state: LibrarianState,
    #[serde(rename = "apiRoot")]
    api_root: Utf8PathBuf,
}

#[derive(Debug, Clone, Serialize)]
struct ReleaseInitRequest {
    mount: Utf8PathBuf,
    #[serde(rename = "libraryID")]
    library_id: String,
    state: LibrarianState,
    #[serde(rename = "partialRepoDir")]
    partial_repo_dir: Utf8PathBuf,
}

/// The container's response shape: a `LibraryState` plus an optional
/// error string. A non-empty `error` is always fatal.
#[derive(Debug, Clone, Deserialize)]
struct ContainerResponse {
    #[serde(flatten)]
    library: LibraryState,
    #[serde(default, rename = "error")]
    error_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_mount_parses_host_and_local() {
        let hm = HostMount::parse("/host/path:/local/path").unwrap();
        assert_eq!(hm.host, PathBuf::from("/host/path"));
        assert_eq!(hm.local, Utf8PathBuf::from("/local/path"));
    }

    #[test]
    fn host_mount_rejects_missing_separator() {
        assert!(HostMount::parse("no-colon-here").is_err());
    }

    #[test]
    fn host_mount_translates_paths_under_root() {
        let hm = HostMount::parse("/host:/container").unwrap();
        let root = Utf8Path::new("/host");
        let translated = hm.translate(root, Utf8Path::new("/host/output"));
        assert_eq!(translated, Utf8PathBuf::from("/container/output"));
    }

    #[test]
    fn new_client_defaults_to_the_standard_invoke_timeout() {
        let client = ContainerClient::new("img", None);
        assert_eq!(client.timeout, DEFAULT_INVOKE_TIMEOUT);
    }

    #[test]
    fn with_timeout_overrides_the_default() {
        let client = ContainerClient::new("img", None).with_timeout(Duration::from_secs(5));
        assert_eq!(client.timeout, Duration::from_secs(5));
    }
}
