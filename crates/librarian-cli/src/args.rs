use camino::Utf8PathBuf;
use clap::builder::{Styles, styling::AnsiColor};
use semver::Version;
use tracing::level_filters::LevelFilter;

const MAIN_COLOR: AnsiColor = AnsiColor::Blue;
const SECONDARY_COLOR: AnsiColor = AnsiColor::Yellow;
const HELP_STYLES: Styles = Styles::styled()
    .header(MAIN_COLOR.on_default().bold())
    .usage(MAIN_COLOR.on_default().bold())
    .placeholder(SECONDARY_COLOR.on_default())
    .literal(SECONDARY_COLOR.on_default());

/// Librarian drives generate and release automation for a multi-language
/// client library monorepo.
#[derive(clap::Parser, Debug)]
#[command(version, author, styles = HELP_STYLES)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,

    /// Print source location and additional information in logs.
    ///
    /// `-v` raises the log level to DEBUG, `-vv` to TRACE. To change the
    /// log level without setting verbosity, use `LIBRARIAN_LOG`.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl CliArgs {
    pub fn verbosity(&self) -> anyhow::Result<Option<LevelFilter>> {
        let level = match self.verbose {
            0 => None,
            1 => Some(LevelFilter::DEBUG),
            2 | _ => Some(LevelFilter::TRACE),
        };
        Ok(level)
    }
}

#[derive(clap::Subcommand, Debug)]
pub enum Command {
    /// Generate (or onboard) client code for one or more libraries.
    Generate(GenerateArgs),
    /// Release-related subcommands.
    #[command(subcommand)]
    Release(ReleaseCommand),
    /// Print librarian's own version.
    Version,
}

#[derive(clap::Subcommand, Debug)]
pub enum ReleaseCommand {
    /// Compute the next version for each library and open a release PR.
    Init(ReleaseInitArgs),
    /// Tag and cut a Git-host release for a merged release PR.
    TagAndRelease(TagAndReleaseArgs),
}

#[derive(clap::Args, Debug)]
pub struct GenerateArgs {
    /// Only generate the library that owns this API path.
    #[arg(long)]
    pub api: Option<String>,
    /// Only generate this library.
    #[arg(long)]
    pub library: Option<String>,
    /// Local path or URL of the repository to work on.
    #[arg(long, default_value = ".")]
    pub repo: String,
    /// Local path or URL to discover API service configs from.
    #[arg(long, default_value = "")]
    pub api_source: String,
    /// Branch to check out before generating.
    #[arg(long, default_value = "main")]
    pub branch: String,
    /// Container image reference to use instead of the one in state.yaml.
    #[arg(long)]
    pub image: Option<String>,
    /// Also invoke the container's build step after generation.
    #[arg(long)]
    pub build: bool,
    /// Push the resulting branch and open a pull request.
    #[arg(long)]
    pub push: bool,
    /// Commit reconciled changes locally (implied by --push).
    #[arg(long)]
    pub commit: bool,
    /// Directory the container writes generated output into.
    #[arg(long, default_value = "output")]
    pub output: Utf8PathBuf,
    /// HOST:LOCAL path translation for the container's mounted volume.
    #[arg(long)]
    pub host_mount: Option<String>,
    /// Preview the run without committing, pushing, or opening a PR.
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(clap::Args, Debug)]
pub struct ReleaseInitArgs {
    /// Only consider this library.
    #[arg(long)]
    pub library: Option<String>,
    /// Force this exact version for the targeted library.
    #[arg(long)]
    pub library_version: Option<Version>,
    /// Local path or URL of the repository to work on.
    #[arg(long, default_value = ".")]
    pub repo: String,
    /// Branch to check out before computing releases.
    #[arg(long, default_value = "main")]
    pub branch: String,
    /// Container image reference to use instead of the one in state.yaml.
    #[arg(long)]
    pub image: Option<String>,
    /// Push the resulting branch and open a pull request.
    #[arg(long)]
    pub push: bool,
    /// Commit reconciled changes locally (implied by --push).
    #[arg(long)]
    pub commit: bool,
    /// Preview the run without committing, pushing, or opening a PR.
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(clap::Args, Debug)]
pub struct TagAndReleaseArgs {
    /// Local path or URL of the repository to work on.
    #[arg(long, default_value = ".")]
    pub repo: String,
    /// URL of the merged release pull request (host/owner/repo/pulls/N).
    #[arg(long)]
    pub pull_request: Option<String>,
}

impl ReleaseInitArgs {
    pub fn should_commit(&self) -> bool {
        (self.commit || self.push) && !self.dry_run
    }

    pub fn should_push(&self) -> bool {
        self.push && !self.dry_run
    }
}

impl GenerateArgs {
    pub fn should_commit(&self) -> bool {
        (self.commit || self.push) && !self.dry_run
    }

    pub fn should_push(&self) -> bool {
        self.push && !self.dry_run
    }
}
