//! `pmbootstrap index`: regenerate `APKINDEX.tar.gz` for every arch with a
//! package repository on disk.

use crate::context::Context;
use pmb_core::command::RunSpec;
use pmb_schema::{Arch, PmbError};

/// Run `apk index` inside each arch's `packages/<arch>` directory that
/// already has at least one `.apk` file.
///
/// # Errors
///
/// Propagates [`pmb_core::command::CommandRunner`] errors.
pub async fn run(ctx: &Context) -> Result<(), PmbError> {
    let mut regenerated = 0usize;
    for arch in Arch::ALL {
        let dir = ctx.packages_dir(arch);
        if !dir.is_dir() {
            continue;
        }
        let has_apks = std::fs::read_dir(&dir)
            .map(|mut entries| entries.any(|e| e.is_ok_and(|e| e.path().extension().is_some_and(|ext| ext == "apk"))))
            .unwrap_or(false);
        if !has_apks {
            continue;
        }

        ctx.reporter.section(&format!("indexing {arch}"));
        let script = format!("cd {} && apk index -o APKINDEX.tar.gz *.apk", dir.display());
        ctx.runner
            .run(RunSpec::new(["sh".to_string(), "-c".to_string(), script]).context(pmb_core::command::ExecContext::Host))
            .await?;
        regenerated += 1;
    }

    ctx.reporter.summary_plain(regenerated, "indexes regenerated");
    Ok(())
}
