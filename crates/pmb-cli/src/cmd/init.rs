//! `pmbootstrap init`: write a stock config and create the work directory.
//!
//! The interactive device/kernel/UI wizard itself is a thin terminal
//! front-end with no engine-level behavior, so this module covers the part
//! that actually has semantics: persisting the resulting [`Config`] and
//! bringing a fresh work directory into existence.

use pmb_core::workdir::WorkDir;
use pmb_core::{config, paths, Reporter};
use pmb_schema::{Config, PmbError};
use std::sync::Arc;

/// Create `~/.config/pmbootstrap.cfg` (unless it already exists) and
/// initialize the work directory it points at.
///
/// # Errors
///
/// Propagates [`PmbError::ConfigInvalid`] if an existing config cannot be
/// parsed, and any I/O error from creating the work directory.
pub fn run(reporter: &Arc<dyn Reporter>) -> Result<(), PmbError> {
    let config_path = paths::config_path();
    let work = paths::default_work_dir();
    let aports = paths::default_aports_dir(&work);

    let defaults = Config::defaults(work, aports);
    let cfg = config::load(&config_path, &defaults)?;
    config::save(&cfg, &config_path)?;

    let work_dir = WorkDir::init(&cfg.work)?;
    std::fs::create_dir_all(cfg.aports.as_path())?;
    drop(work_dir);

    reporter.success(&format!("work directory ready at {}", cfg.work.display()));
    reporter.info(&format!("config written to {}", config_path.display()));
    Ok(())
}
