//! Loading and saving the persisted [`Config`] as INI, the format real
//! `pmbootstrap.cfg` files use.

use ini::Ini;
use pmb_schema::{Config, PmbError};
use std::path::{Path, PathBuf};

const SECTION: &str = "pmbootstrap";

/// Load a [`Config`] from an INI file at `path`. Missing keys fall back to
/// `fallback`'s value for that key.
///
/// # Errors
///
/// Returns [`PmbError::ConfigInvalid`] if the file exists but cannot be
/// parsed as INI, or if `jobs` is present but not a number.
pub fn load(path: &Path, fallback: &Config) -> Result<Config, PmbError> {
    if !path.is_file() {
        return Ok(fallback.clone());
    }
    let ini = Ini::load_from_file(path).map_err(|e| PmbError::ConfigInvalid(e.to_string()))?;
    let section = ini.section(Some(SECTION));

    let get = |key: &str, default: &str| -> String { section.and_then(|s| s.get(key)).unwrap_or(default).to_string() };
    let get_bool = |key: &str, default: bool| -> bool { section.and_then(|s| s.get(key)).map(|v| v == "1" || v == "true").unwrap_or(default) };

    let jobs = section
        .and_then(|s| s.get("jobs"))
        .map(|v| v.parse::<u32>().map_err(|_| PmbError::ConfigInvalid(format!("jobs is not a number: {v}"))))
        .transpose()?
        .unwrap_or(fallback.jobs);

    Ok(Config {
        work: section.and_then(|s| s.get("work")).map(PathBuf::from).unwrap_or_else(|| fallback.work.clone()),
        aports: section.and_then(|s| s.get("aports")).map(PathBuf::from).unwrap_or_else(|| fallback.aports.clone()),
        device: get("device", &fallback.device),
        kernel: get("kernel", &fallback.kernel),
        ui: get("ui", &fallback.ui),
        mirror_alpine: get("mirror_alpine", &fallback.mirror_alpine),
        mirrors_postmarketos: section
            .and_then(|s| s.get("mirrors_postmarketos"))
            .map(|v| v.split(',').map(str::to_string).collect())
            .unwrap_or_else(|| fallback.mirrors_postmarketos.clone()),
        jobs,
        ccache: get_bool("ccache", fallback.ccache),
        ccache_size: get("ccache_size", &fallback.ccache_size),
        ssh_keys: get_bool("ssh_keys", fallback.ssh_keys),
        ssh_key_glob: get("ssh_key_glob", &fallback.ssh_key_glob),
        timezone: get("timezone", &fallback.timezone),
        locale: get("locale", &fallback.locale),
        hostname: get("hostname", &fallback.hostname),
        user: get("user", &fallback.user),
    })
}

/// Save `config` as INI to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns an I/O error if the file cannot be written.
pub fn save(config: &Config, path: &Path) -> Result<(), PmbError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut ini = Ini::new();
    {
        let mut section = ini.with_section(Some(SECTION));
        section
            .set("work", config.work.to_string_lossy().as_ref())
            .set("aports", config.aports.to_string_lossy().as_ref())
            .set("device", &config.device)
            .set("kernel", &config.kernel)
            .set("ui", &config.ui)
            .set("mirror_alpine", &config.mirror_alpine)
            .set("mirrors_postmarketos", config.mirrors_postmarketos.join(","))
            .set("jobs", config.jobs.to_string())
            .set("ccache", if config.ccache { "1" } else { "0" })
            .set("ccache_size", &config.ccache_size)
            .set("ssh_keys", if config.ssh_keys { "1" } else { "0" })
            .set("ssh_key_glob", &config.ssh_key_glob)
            .set("timezone", &config.timezone)
            .set("locale", &config.locale)
            .set("hostname", &config.hostname)
            .set("user", &config.user);
    }

    ini.write_to_file(path).map_err(PmbError::Io)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trips_through_ini() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pmbootstrap.cfg");
        let mut config = Config::defaults(PathBuf::from("/work"), PathBuf::from("/aports"));
        config.device = "pine64-pinephone".to_string();
        config.jobs = 4;

        save(&config, &path).unwrap();
        let loaded = load(&path, &Config::defaults(PathBuf::from("/work"), PathBuf::from("/aports"))).unwrap();

        assert_eq!(loaded.device, "pine64-pinephone");
        assert_eq!(loaded.jobs, 4);
        assert_eq!(loaded.work, PathBuf::from("/work"));
    }

    #[test]
    fn missing_file_falls_back_to_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nonexistent.cfg");
        let fallback = Config::defaults(PathBuf::from("/work"), PathBuf::from("/aports"));
        let loaded = load(&path, &fallback).unwrap();
        assert_eq!(loaded.work, fallback.work);
    }
}
