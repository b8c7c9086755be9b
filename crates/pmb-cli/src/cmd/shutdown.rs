//! `pmbootstrap shutdown`: release every live mount, then drop the work-dir
//! lock, for recovering a stuck invocation without a reboot.

use crate::context::Context;
use pmb_core::mount::parse_mountinfo;
use pmb_schema::PmbError;

/// Reconcile the mount registry against the live `/proc/self/mountinfo`,
/// unmounting anything under the work dir the registry does not itself
/// track, then let the [`Context`] drop and release its lock.
///
/// # Errors
///
/// Propagates [`pmb_schema::PmbError::MountLeak`] naming anything that
/// could not be unmounted.
pub async fn run(ctx: &Context) -> Result<(), PmbError> {
    let mountinfo = tokio::fs::read_to_string("/proc/self/mountinfo").await.unwrap_or_default();
    let live = parse_mountinfo(&mountinfo);
    let healed = ctx.mounts.reconcile(ctx.work_dir.root(), &live).await?;

    for path in &healed {
        ctx.reporter.info(&format!("released stray mount {}", path.display()));
    }
    ctx.reporter.success("work directory released");
    Ok(())
}
