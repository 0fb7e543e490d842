// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use rigup::{
    manifest::{Manifest, PackageEntry},
    package::{
        backend::{BackendKind, HostBackend},
        InstallGuard, PackageName,
    },
    path::default_manifest_path,
    progress::SpinnerReporter,
    provision::Provisioner,
    syscall::Invocation,
    watch::{watch_and_reload, WatchRules},
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use inquire::Confirm;
use std::{
    path::{Path, PathBuf},
    process::exit,
};
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "\n  rigup [options] <command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    async fn run(self) -> Result<i32> {
        match self.command {
            Command::Init(opts) => run_init(opts),
            Command::Provision(opts) => run_provision(opts).await,
            Command::Install(opts) => run_install(opts).await,
            Command::Status(opts) => run_status(opts).await,
            Command::Watch(opts) => run_watch(opts).await,
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Write a starter manifest.
    #[command(override_usage = "rigup init [options]")]
    Init(InitOptions),

    /// Ensure every package in the manifest is installed.
    #[command(override_usage = "rigup provision [options]")]
    Provision(ProvisionOptions),

    /// Ensure specific packages are installed by name.
    #[command(override_usage = "rigup install [options] <package_name>...")]
    Install(InstallOptions),

    /// Show which manifest packages are already installed.
    #[command(override_usage = "rigup status [options]")]
    Status(StatusOptions),

    /// Restart a command when watched files change.
    #[command(override_usage = "rigup watch [options] <program> [program_args]...")]
    Watch(WatchOptions),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct InitOptions {
    /// Path to write the manifest to instead of the default location.
    #[arg(short, long, value_name = "path")]
    pub manifest: Option<String>,

    /// Brief description of what the manifest provisions.
    #[arg(short, long, value_name = "summary")]
    pub description: Option<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ProvisionOptions {
    /// Path to the provisioning manifest.
    #[arg(short, long, value_name = "path")]
    pub manifest: Option<String>,

    /// Package manager backend to use instead of detection ("apt" or "brew").
    #[arg(short, long, value_name = "backend")]
    pub backend: Option<String>,

    /// Skip the confirmation prompt.
    #[arg(short = 'y', long)]
    pub assume_yes: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct InstallOptions {
    /// Names of packages to ensure installed.
    #[arg(required = true, value_name = "package_name")]
    pub package_names: Vec<String>,

    /// Package manager backend to use instead of detection ("apt" or "brew").
    #[arg(short, long, value_name = "backend")]
    pub backend: Option<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct StatusOptions {
    /// Path to the provisioning manifest.
    #[arg(short, long, value_name = "path")]
    pub manifest: Option<String>,

    /// Package manager backend to use instead of detection ("apt" or "brew").
    #[arg(short, long, value_name = "backend")]
    pub backend: Option<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct WatchOptions {
    /// Program to run and restart on changes.
    #[arg(required = true, value_name = "program")]
    pub program: String,

    /// Arguments passed through to the program.
    #[arg(
        trailing_var_arg = true,
        allow_hyphen_values = true,
        value_name = "program_args"
    )]
    pub program_args: Vec<String>,

    /// Directory to watch for changes.
    #[arg(short, long, value_name = "path", default_value = ".")]
    pub directory: String,

    /// Glob of files whose changes trigger a restart; repeatable.
    #[arg(short, long, value_name = "glob")]
    pub pattern: Vec<String>,

    /// Glob of files to leave unwatched; repeatable.
    #[arg(short, long, value_name = "glob")]
    pub ignore: Vec<String>,
}

#[tokio::main]
async fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_timer(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    match run().await {
        Ok(code) => exit(code),
        Err(error) => {
            error!("{error:?}");
            exit(1);
        }
    }
}

async fn run() -> Result<i32> {
    Cli::parse().run().await
}

fn run_init(opts: InitOptions) -> Result<i32> {
    let path = resolve_manifest_path(opts.manifest)?;
    if path.exists() {
        bail!("manifest already exists at {}", path.display());
    }

    let mut manifest = Manifest::default();
    manifest.settings.description = match opts.description {
        Some(description) => description,
        None => "<put one sentence description here>".into(),
    };
    manifest.packages.push(PackageEntry {
        name: "curl".parse()?,
        label: Some("cURL".into()),
    });

    if let Some(parent) = path.parent() {
        mkdirp::mkdirp(parent)
            .with_context(|| format!("cannot create directory {}", parent.display()))?;
    }
    std::fs::write(&path, manifest.to_string())
        .with_context(|| format!("cannot write manifest to {}", path.display()))?;

    println!(
        "{} wrote starter manifest to {}",
        style("✓").green().bold(),
        path.display()
    );

    Ok(0)
}

async fn run_provision(opts: ProvisionOptions) -> Result<i32> {
    let path = resolve_manifest_path(opts.manifest)?;
    let manifest = read_manifest(&path)?;

    if !opts.assume_yes {
        let prompt = format!(
            "Provision {} packages from {}?",
            manifest.packages.len(),
            path.display()
        );
        if !Confirm::new(&prompt).with_default(true).prompt()? {
            return Ok(0);
        }
    }

    let backend = resolve_backend(opts.backend, manifest.settings.backend).await?;
    let guard = InstallGuard::new(backend, SpinnerReporter::from_env());
    let provisioner = Provisioner::new(guard, manifest.settings.halt_on_failure);
    let report = provisioner.provision(&manifest).await?;

    Ok(report.exit_code())
}

async fn run_install(opts: InstallOptions) -> Result<i32> {
    let backend = resolve_backend(opts.backend, None).await?;
    let guard = InstallGuard::new(backend, SpinnerReporter::from_env());

    let mut exit_code = 0;
    for raw in opts.package_names {
        let name: PackageName = raw.parse()?;
        let outcome = guard.ensure_installed(&name, name.as_str()).await?;
        if outcome.exit_code() != 0 {
            exit_code = outcome.exit_code();
        }
    }

    Ok(exit_code)
}

async fn run_status(opts: StatusOptions) -> Result<i32> {
    let path = resolve_manifest_path(opts.manifest)?;
    let manifest = read_manifest(&path)?;

    let backend = resolve_backend(opts.backend, manifest.settings.backend).await?;
    let guard = InstallGuard::new(backend, SpinnerReporter::from_env());
    let provisioner = Provisioner::new(guard, manifest.settings.halt_on_failure);

    for entry in provisioner.survey(&manifest).await? {
        if entry.installed {
            println!("{} {}", style("✓").green().bold(), entry.label);
        } else {
            println!("{} {}", style("✗").red().bold(), entry.label);
        }
    }

    Ok(0)
}

async fn run_watch(opts: WatchOptions) -> Result<i32> {
    let directory = PathBuf::from(shellexpand::full(&opts.directory)?.into_owned());
    let rules = WatchRules::new(&opts.pattern, &opts.ignore)?;
    let invocation =
        Invocation::new(opts.program.clone(), opts.program).with_args(opts.program_args);

    watch_and_reload(invocation, &directory, rules).await?;

    Ok(0)
}

fn resolve_manifest_path(arg: Option<String>) -> Result<PathBuf> {
    match arg {
        Some(raw) => Ok(PathBuf::from(shellexpand::full(&raw)?.into_owned())),
        None => Ok(default_manifest_path()?),
    }
}

fn read_manifest(path: &Path) -> Result<Manifest> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read manifest at {}", path.display()))?;
    Ok(content.parse()?)
}

async fn resolve_backend(arg: Option<String>, setting: Option<BackendKind>) -> Result<HostBackend> {
    let kind = match arg {
        Some(raw) => Some(raw.parse::<BackendKind>()?),
        None => setting,
    };

    match kind {
        Some(kind) => Ok(HostBackend::from_kind(kind)),
        None => Ok(HostBackend::detect().await?),
    }
}
