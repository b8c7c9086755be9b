//! `pmbootstrap status`: a health/config summary, read without taking the
//! work directory's exclusive lock so it never blocks behind (or blocks) a
//! running build.

use comfy_table::{presets::UTF8_FULL, Table};
use pmb_core::workdir;
use pmb_schema::{Config, PmbError};

/// Print work-dir path/version, configured device/arch, current lock
/// holder (if any), and which chroots exist on disk.
///
/// # Errors
///
/// Propagates any I/O error reading the work dir's version marker.
pub fn run(config: &Config) -> Result<(), PmbError> {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec!["field", "value"]);

    table.add_row(vec!["work dir".to_string(), config.work.display().to_string()]);

    if config.work.is_dir() {
        let (version, holder) = workdir::peek(&config.work)?;
        table.add_row(vec!["work dir version".to_string(), version.to_string()]);
        table.add_row(vec![
            "lock holder".to_string(),
            holder.map_or_else(|| "none".to_string(), |pid| pid.to_string()),
        ]);
    } else {
        table.add_row(vec!["work dir version".to_string(), "not initialized".to_string()]);
    }

    table.add_row(vec!["device".to_string(), if config.device.is_empty() { "none".to_string() } else { config.device.clone() }]);
    table.add_row(vec!["kernel".to_string(), config.kernel.clone()]);
    table.add_row(vec![
        "target arch".to_string(),
        config.target_arch().map_or_else(|| "unresolved".to_string(), |a| a.to_string()),
    ]);
    table.add_row(vec!["aports".to_string(), config.aports.display().to_string()]);
    table.add_row(vec!["jobs".to_string(), config.jobs.to_string()]);

    for entry in chroot_states(&config.work) {
        table.add_row(vec!["chroot".to_string(), entry]);
    }

    println!("{table}");
    Ok(())
}

fn chroot_states(work: &std::path::Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(work) else {
        return Vec::new();
    };
    entries
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().starts_with("chroot_"))
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect()
}
