//! `pmbootstrap`: cross-building toolkit for postmarketOS.

use clap::{CommandFactory, Parser};
use clap_complete::generate;
use pmb_cli::context::Context;
use pmb_cli::{cmd, Cli, Commands};
use pmb_core::command::CommandRunner;
use pmb_core::mount::{parse_mountinfo, MountRegistry};
use pmb_core::{config, paths, Reporter};
use pmb_schema::{Config, PmbError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let reporter: Arc<dyn Reporter> = Arc::new(pmb_cli::TerminalReporter::new(cli.quiet));

    let exit_code = run(cli, reporter).await;
    std::process::exit(exit_code);
}

async fn run(cli: Cli, reporter: Arc<dyn Reporter>) -> i32 {
    if let Commands::Completions { shell } = cli.command {
        generate(shell, &mut Cli::command(), "pmbootstrap", &mut std::io::stdout());
        return 0;
    }

    let config = match load_config(cli.work.clone()) {
        Ok(c) => c,
        Err(e) => {
            reporter.error(&e.to_string());
            return e.exit_code();
        }
    };

    match cli.command {
        Commands::Init => finish(cmd::init::run(&reporter), &reporter),
        Commands::Status => finish(cmd::status::run(&config), &reporter),
        Commands::RepoMissing { arch } => finish(cmd::repo_missing::run(&config, arch), &reporter),
        Commands::Completions { .. } => unreachable!("handled before dispatch"),
        command => run_locked(command, config, reporter).await,
    }
}

fn finish(result: Result<(), PmbError>, reporter: &Arc<dyn Reporter>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => {
            reporter.error(&e.to_string());
            e.exit_code()
        }
    }
}

/// Run a verb that needs a locked [`Context`], racing it against Ctrl-C.
///
/// The `Context` is built here, outside the spawned task, so its `runner`
/// and `mounts` handles stay reachable from this scope: a first SIGINT sends
/// `SIGTERM` to whatever is in flight and waits up to 5s (or for a second
/// SIGINT) before escalating to `SIGKILL`, then reconciles stray mounts
/// before returning — the running task is never just abandoned.
async fn run_locked(command: Commands, config: Config, reporter: Arc<dyn Reporter>) -> i32 {
    let work_root = config.work.clone();
    let ctx = match Context::new(config, reporter.clone()) {
        Ok(ctx) => ctx,
        Err(e) => {
            reporter.error(&e.to_string());
            return e.exit_code();
        }
    };
    let runner = ctx.runner.clone();
    let mounts = ctx.mounts.clone();

    let mut handle = tokio::spawn(run_command(ctx, command));

    tokio::select! {
        result = &mut handle => match result {
            Ok(Ok(())) => 0,
            Ok(Err(e)) => {
                reporter.error(&format!("{e}  (see {})", paths::log_dir(&work_root).join("pmbootstrap.log").display()));
                e.exit_code()
            }
            Err(_) => 1,
        },
        _ = tokio::signal::ctrl_c() => {
            reporter.warning("interrupted, stopping the running command");
            handle_interrupt(handle, runner, mounts, work_root, reporter).await
        }
    }
}

async fn handle_interrupt(
    mut handle: tokio::task::JoinHandle<Result<(), PmbError>>,
    runner: Arc<CommandRunner>,
    mounts: Arc<MountRegistry>,
    work_root: PathBuf,
    reporter: Arc<dyn Reporter>,
) -> i32 {
    runner.cancel_all().await;

    tokio::select! {
        _ = &mut handle => {}
        _ = tokio::time::sleep(Duration::from_secs(5)) => {
            reporter.warning("still running after 5s, sending SIGKILL");
            runner.kill_all().await;
            handle.abort();
        }
        _ = tokio::signal::ctrl_c() => {
            reporter.warning("second interrupt, forcing stop");
            runner.kill_all().await;
            handle.abort();
        }
    }

    release_mounts(&mounts, &work_root, &reporter).await;
    130
}

async fn release_mounts(mounts: &MountRegistry, work_root: &Path, reporter: &Arc<dyn Reporter>) {
    let mountinfo = tokio::fs::read_to_string("/proc/self/mountinfo").await.unwrap_or_default();
    let live = parse_mountinfo(&mountinfo);
    if let Ok(healed) = mounts.reconcile(work_root, &live).await {
        for path in &healed {
            reporter.info(&format!("released mount {}", path.display()));
        }
    }
}

fn load_config(work_override: Option<std::path::PathBuf>) -> Result<Config, PmbError> {
    let config_path = paths::config_path();
    let default_work = work_override.unwrap_or_else(paths::default_work_dir);
    let aports = paths::default_aports_dir(&default_work);
    let defaults = Config::defaults(default_work, aports);
    config::load(&config_path, &defaults)
}

async fn run_command(ctx: Context, command: Commands) -> Result<(), PmbError> {
    match command {
        Commands::Build {
            packages,
            arch,
            src,
            force,
            strict,
            no_depends,
        } => cmd::build::run(&ctx, packages, arch, src, force, strict, no_depends).await,
        Commands::Chroot { arch, user, cmd: argv } => cmd::chroot::run(&ctx, arch, user, argv).await,
        Commands::Zap { packages, mirror, obsolete } => cmd::zap::run(&ctx, packages, mirror, obsolete).await,
        Commands::Index => cmd::index::run(&ctx).await,
        Commands::PkgrelBump { auto, dry } => cmd::pkgrel_bump::run(&ctx, auto, dry).await,
        Commands::Shutdown => cmd::shutdown::run(&ctx).await,
        Commands::WorkMigrate => cmd::work_migrate::run(&ctx).await,
        Commands::Init | Commands::Status | Commands::RepoMissing { .. } | Commands::Completions { .. } => {
            unreachable!("handled in run() before a Context is built")
        }
    }
}
