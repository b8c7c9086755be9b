//! `pmbootstrap work_migrate`: apply any pending work-directory migrations.
//!
//! Migrations run automatically on every [`pmb_core::workdir::WorkDir::open`],
//! so by the time a [`Context`] exists they are already applied; this verb
//! exists to make that step observable and runnable on its own (e.g. right
//! after upgrading, before any other verb touches the work dir).

use crate::context::Context;
use pmb_schema::PmbError;

/// Report the work dir's on-disk version, now current since opening the
/// [`Context`] already ran every pending migration.
///
/// # Errors
///
/// Infallible in practice; kept `Result` for symmetry with the other verbs.
pub async fn run(ctx: &Context) -> Result<(), PmbError> {
    ctx.reporter.success(&format!(
        "work directory at {} is at version {}",
        ctx.work_dir.root().display(),
        pmb_core::workdir::CURRENT_VERSION
    ));
    Ok(())
}
