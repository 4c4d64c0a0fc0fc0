mod args;
mod log;

use anyhow::{Context, Result, bail};
use camino::Utf8Path;
use chrono::Utc;
use clap::Parser;
use librarian_core::clone_or_open::clone_or_open_repo;
use librarian_core::command::{generate, release_init, tag_and_release};
use librarian_core::container::{ContainerClient, HostMount};
use librarian_core::github_client::GithubClient;
use librarian_core::repo_url::RepoUrl;
use librarian_core::state::{LibrarianConfig, LibrarianState, populate_service_config_if_empty};
use librarian_core::work_root::create_work_root;

use crate::args::{Command, CliArgs, GenerateArgs, ReleaseCommand, ReleaseInitArgs, TagAndReleaseArgs};

const GITHUB_TOKEN_VAR: &str = "LIBRARIAN_GITHUB_TOKEN";

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    log::init(args.verbosity()?);

    match args.command {
        Command::Generate(generate_args) => run_generate(generate_args).await,
        Command::Release(ReleaseCommand::Init(init_args)) => run_release_init(init_args).await,
        Command::Release(ReleaseCommand::TagAndRelease(tag_args)) => run_tag_and_release(tag_args).await,
        Command::Version => {
            println!("librarian {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn github_token() -> Result<String> {
    std::env::var(GITHUB_TOKEN_VAR).with_context(|| format!("{GITHUB_TOKEN_VAR} must be set"))
}

async fn run_generate(cli: GenerateArgs) -> Result<()> {
    let now = Utc::now();
    let work_root = create_work_root(now, None)?;
    let repo = clone_or_open_repo(&work_root, &cli.repo, &cli.branch, None)?;

    let mut state = LibrarianState::load(repo.directory())?;
    if let Some(image) = &cli.image {
        state.image = image.clone();
    }

    let api_source = Utf8Path::new(&cli.api_source);
    populate_service_config_if_empty(&mut state, api_source)?;

    let host_mount = cli.host_mount.as_deref().map(HostMount::parse).transpose()?;
    let container = ContainerClient::new(state.image.clone(), host_mount);

    let should_push = cli.should_push();
    let github = if should_push {
        let repo_url = RepoUrl::from_repo(&repo)?;
        Some(GithubClient::new(github_token()?, repo_url)?)
    } else {
        None
    };

    let output_dir = work_root.join(&cli.output);
    let partial_repo_dir = work_root.join("partial-repo");
    fs_err::create_dir_all(&output_dir)?;
    fs_err::create_dir_all(&partial_repo_dir)?;

    let request = generate::GenerateRequest {
        repo: &repo,
        state: &mut state,
        container: &container,
        github: github.as_ref(),
        mount_root: &work_root,
        output_dir: &output_dir,
        partial_repo_dir: &partial_repo_dir,
        api_source,
        api_filter: cli.api.as_deref(),
        library_filter: cli.library.as_deref(),
        build: cli.build,
        should_commit: cli.should_commit(),
        should_push,
        librarian_version: env!("CARGO_PKG_VERSION"),
        now,
    };

    let outcome = generate::run(request).await?;
    state.save(repo.directory())?;

    for library in &outcome.libraries {
        match &library.error {
            Some(err) => tracing::error!(library = %library.library_id, error = %err, "generate failed"),
            None => tracing::info!(library = %library.library_id, "generate succeeded"),
        }
    }
    if let Some(commit) = &outcome.commit {
        tracing::info!(branch = %commit.branch, pr = ?commit.pr_number, "pushed generate branch");
    }

    if outcome.libraries.iter().any(|l| l.error.is_some()) {
        bail!("one or more libraries failed to generate");
    }
    Ok(())
}

async fn run_release_init(cli: ReleaseInitArgs) -> Result<()> {
    let now = Utc::now();
    let work_root = create_work_root(now, None)?;
    let repo = clone_or_open_repo(&work_root, &cli.repo, &cli.branch, None)?;

    let mut state = LibrarianState::load(repo.directory())?;
    if let Some(image) = &cli.image {
        state.image = image.clone();
    }
    let config = LibrarianConfig::load(repo.directory())?;

    let container = ContainerClient::new(state.image.clone(), None);

    let should_push = cli.should_push();
    let github = if should_push {
        let repo_url = RepoUrl::from_repo(&repo)?;
        Some(GithubClient::new(github_token()?, repo_url)?)
    } else {
        None
    };

    let output_dir = work_root.join("output");
    let partial_repo_dir = work_root.join("partial-repo");
    fs_err::create_dir_all(&partial_repo_dir)?;

    let request = release_init::ReleaseInitRequest {
        repo: &repo,
        state: &mut state,
        config: &config,
        container: &container,
        github: github.as_ref(),
        mount_root: &work_root,
        output_dir: &output_dir,
        partial_repo_dir: &partial_repo_dir,
        library_filter: cli.library.as_deref(),
        library_version_override: cli.library_version.as_ref(),
        librarian_version: env!("CARGO_PKG_VERSION"),
        should_commit: cli.should_commit(),
        should_push,
        now,
    };

    let outcome = release_init::run(request).await?;

    if outcome.triggered.is_empty() {
        tracing::info!("no library has a releasable unit");
    } else {
        tracing::info!(libraries = ?outcome.triggered, "release triggered");
    }
    if let Some(commit) = &outcome.commit {
        tracing::info!(branch = %commit.branch, pr = ?commit.pr_number, "pushed release branch");
    }
    Ok(())
}

async fn run_tag_and_release(cli: TagAndReleaseArgs) -> Result<()> {
    let now = Utc::now();
    let work_root = create_work_root(now, None)?;
    let repo = clone_or_open_repo(&work_root, &cli.repo, "main", None)?;
    let state = LibrarianState::load(repo.directory())?;

    let repo_url = RepoUrl::from_repo(&repo)?;
    let github = GithubClient::new(github_token()?, repo_url)?;

    let pull_request_number = cli
        .pull_request
        .as_deref()
        .map(parse_pull_request_number)
        .transpose()?;

    let request = tag_and_release::TagAndReleaseRequest {
        repo: &repo,
        state: &state,
        github: &github,
        pull_request_number,
        label_search_query: "is:pr is:merged label:release:pending",
    };

    let tagged = tag_and_release::run(request).await?;
    for release in &tagged {
        tracing::info!(library = %release.library_id, tag = %release.tag, "released");
    }
    Ok(())
}

/// Extracts the trailing `/pulls/<N>` (or `/pull/<N>`) segment from a PR URL.
fn parse_pull_request_number(url: &str) -> Result<u64> {
    let trimmed = url.trim_end_matches('/');
    let digits = trimmed.rsplit('/').next().context("pull request url has no trailing segment")?;
    digits
        .parse()
        .with_context(|| format!("'{digits}' is not a valid pull request number"))
}
