// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use skuid_sync::{
    config::SiteProfile, deploy, path::default_config_path, request::DEFAULT_TIMEOUT, retrieve,
    AuthContext, DeployFilter, DeployOptions, HttpRequester, RetrieveFilter, RetrieveOptions,
};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use inquire::Password;
use std::{
    io::IsTerminal,
    path::{Path, PathBuf},
    process::exit,
    time::Duration,
};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "skuid-sync [options] <command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Path to site profile.
    #[arg(short, long, global = true, value_name = "path")]
    pub config: Option<PathBuf>,

    /// URL of site to sync with.
    #[arg(long, global = true, env = "SKUID_HOST", value_name = "url")]
    pub host: Option<String>,

    /// Access token of the metadata service.
    #[arg(long, global = true, env = "SKUID_ACCESS_TOKEN", hide_env_values = true, value_name = "token")]
    pub access_token: Option<String>,

    /// Bearer token of the data service.
    #[arg(long, global = true, env = "SKUID_BEARER_TOKEN", hide_env_values = true, value_name = "token")]
    pub bearer_token: Option<String>,

    /// Request timeout in seconds.
    #[arg(long, global = true, value_name = "seconds")]
    pub timeout: Option<u64>,

    /// Log debug events by default.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    async fn run(self) -> Result<()> {
        let profile = load_profile(self.config.as_deref())?;
        let auth = authenticate(
            self.host.or(profile.host.clone()),
            self.access_token,
            self.bearer_token,
        )?;
        let timeout = self.timeout.map(Duration::from_secs).unwrap_or(DEFAULT_TIMEOUT);
        let requester = HttpRequester::new(timeout)?;

        match self.command {
            Command::Retrieve(opts) => run_retrieve(opts, profile, &auth, &requester).await,
            Command::Deploy(opts) => run_deploy(opts, profile, &auth, &requester).await,
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Retrieve site metadata into site directory.
    #[command(override_usage = "skuid-sync retrieve [options]")]
    Retrieve(RetrieveArgs),

    /// Deploy site directory to site.
    #[command(override_usage = "skuid-sync deploy [options] [--entities <path>...]")]
    Deploy(DeployArgs),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct RetrieveArgs {
    /// Site directory to write into.
    #[arg(short, long, value_name = "path")]
    pub dir: Option<PathBuf>,

    /// Retrieve only entities of an app.
    #[arg(short, long, value_name = "name")]
    pub app: Option<String>,

    /// Leave out data sources backed by the site's own database.
    #[arg(long)]
    pub ignore_skuid_db: bool,

    /// Retrieve only entities changed since timestamp.
    #[arg(long, value_name = "rfc3339", value_parser = parse_since)]
    pub since: Option<DateTime<Utc>>,

    /// Keep existing metadata type directories.
    #[arg(long)]
    pub no_clean: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct DeployArgs {
    /// Site directory to deploy from.
    #[arg(short, long, value_name = "path")]
    pub dir: Option<PathBuf>,

    /// Deploy only entities of an app.
    #[arg(short, long, value_name = "name")]
    pub app: Option<String>,

    /// Leave out data sources backed by the site's own database.
    #[arg(long)]
    pub ignore_skuid_db: bool,

    /// Deploy only these entities, e.g., `pages/my_page`.
    #[arg(short, long, num_args = 1.., value_name = "path")]
    pub entities: Option<Vec<String>>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .without_time();
    let default = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = cli.run().await {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

async fn run_retrieve(
    opts: RetrieveArgs,
    profile: SiteProfile,
    auth: &AuthContext,
    requester: &HttpRequester,
) -> Result<()> {
    let options = RetrieveOptions {
        target_dir: site_dir(opts.dir, &profile)?,
        filter: RetrieveFilter {
            app_name: opts.app.or(profile.app_name),
            ignore_skuid_db: opts.ignore_skuid_db || profile.ignore_skuid_db,
            since: opts.since,
        },
        no_clean: opts.no_clean || profile.no_clean,
    };

    let bar = spinner(format!("retrieving into {}", options.target_dir.display()))?;
    let outcome = retrieve(requester, auth, &options).await;
    bar.finish_and_clear();
    let outcome = outcome?;

    info!(
        "{}",
        summarize(
            format!(
                "retrieved {} entities into {:?}",
                outcome.entity_paths.len(),
                options.target_dir.display()
            ),
            &outcome.warnings
        )
    );

    Ok(())
}

async fn run_deploy(
    opts: DeployArgs,
    profile: SiteProfile,
    auth: &AuthContext,
    requester: &HttpRequester,
) -> Result<()> {
    let options = DeployOptions {
        source_dir: site_dir(opts.dir, &profile)?,
        filter: DeployFilter {
            app_name: opts.app.or(profile.app_name),
            ignore_skuid_db: opts.ignore_skuid_db || profile.ignore_skuid_db,
        },
        entities: opts.entities,
    };

    let bar = spinner(format!("deploying {}", options.source_dir.display()))?;
    let outcome = deploy(requester, auth, &options).await;
    bar.finish_and_clear();
    let outcome = outcome?;

    info!(
        "{}",
        summarize(
            format!(
                "deployed {} entities from {:?}",
                outcome.entity_paths.len(),
                options.source_dir.display()
            ),
            &outcome.warnings
        )
    );

    Ok(())
}

/// Success line followed by every accumulated warning.
fn summarize(summary: String, warnings: &[String]) -> String {
    if warnings.is_empty() {
        return summary;
    }

    let mut text = format!("{summary} with {} warnings:", warnings.len());
    for warning in warnings {
        text.push_str("\n  - ");
        text.push_str(warning);
    }

    text
}

fn load_profile(path: Option<&Path>) -> Result<SiteProfile> {
    let (path, explicit) = match path {
        Some(path) => (path.to_path_buf(), true),
        None => (default_config_path()?, false),
    };

    // INVARIANT: Missing default profile means no defaults at all.
    if !explicit && !path.exists() {
        return Ok(SiteProfile::default());
    }

    let data = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read site profile {:?}", path.display()))?;
    let profile: SiteProfile = data
        .parse()
        .with_context(|| format!("failed to parse site profile {:?}", path.display()))?;

    Ok(profile)
}

fn authenticate(
    host: Option<String>,
    access_token: Option<String>,
    bearer_token: Option<String>,
) -> Result<AuthContext> {
    let host = host.ok_or_else(|| anyhow!("no site host given, use --host or SKUID_HOST"))?;
    let access_token = match access_token {
        Some(token) => token,
        None => prompt_token("access token")?,
    };
    let bearer_token = match bearer_token {
        Some(token) => token,
        None => prompt_token("bearer token")?,
    };

    Ok(AuthContext::new(host, access_token, bearer_token))
}

fn prompt_token(name: &str) -> Result<String> {
    if !std::io::stdin().is_terminal() {
        return Err(anyhow!("no {name} given, and terminal is not interactive"));
    }

    Password::new(name)
        .without_confirmation()
        .prompt()
        .with_context(|| format!("failed to prompt for {name}"))
}

fn site_dir(dir: Option<PathBuf>, profile: &SiteProfile) -> Result<PathBuf> {
    let dir = match dir {
        Some(dir) => dir,
        None => match &profile.directory {
            Some(directory) => directory.as_path().to_path_buf(),
            None => PathBuf::from("."),
        },
    };

    if dir.is_absolute() {
        return Ok(dir);
    }

    let cwd = std::env::current_dir().context("failed to determine current directory")?;
    if dir == Path::new(".") {
        return Ok(cwd);
    }

    Ok(cwd.join(dir))
}

fn spinner(message: String) -> Result<ProgressBar> {
    let style = ProgressStyle::with_template("{elapsed_precise:.green}  {spinner:.yellow}  {msg}")?;
    let bar = ProgressBar::new_spinner();
    bar.set_style(style);
    bar.set_message(message);
    bar.enable_steady_tick(Duration::from_millis(100));

    Ok(bar)
}

fn parse_since(value: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(value).map(|since| since.with_timezone(&Utc))
}
