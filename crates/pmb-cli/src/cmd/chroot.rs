//! `pmbootstrap chroot`: enter a chroot and run one command inside it.

use crate::context::Context;
use pmb_schema::{Arch, PmbError};

/// Bootstrap (if needed), enter, and run `argv` inside the chroot for
/// `arch` (defaulting to native), as `root` or the unprivileged `pmos` user.
///
/// # Errors
///
/// Returns [`PmbError::UsageError`] if `argv` is empty, otherwise propagates
/// whatever the chroot manager's `enter`/`run`/`leave` sequence fails on.
pub async fn run(ctx: &Context, arch: Option<Arch>, as_user: bool, argv: Vec<String>) -> Result<(), PmbError> {
    if argv.is_empty() {
        return Err(PmbError::UsageError("chroot requires a command to run".to_string()));
    }

    let arch = arch.unwrap_or_else(Arch::native);
    let chroot = ctx.buildroot_chroot(arch);

    ctx.reporter.bootstrapping(chroot.id());
    let client = reqwest::Client::new();
    chroot.bootstrap(&client, &ctx.config.mirror_alpine).await?;

    ctx.reporter.mounting(chroot.id());
    chroot
        .enter(&ctx.aports_dir(), &ctx.cache_apk_dir(arch), &ctx.packages_dir(arch), Some(&ctx.native_chroot().path()))
        .await?;

    let outcome = chroot.run(argv, as_user).await;
    chroot.leave().await?;

    let outcome = outcome?;
    print!("{}", outcome.stdout);
    eprint!("{}", outcome.stderr);
    Ok(())
}
