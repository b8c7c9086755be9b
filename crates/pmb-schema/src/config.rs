//! The persisted configuration record.
//!
//! Parsing/writing the INI file lives in `pmb_core::config`; this struct is
//! the value both that module and the CLI's `status`/`init` verbs share.

use crate::arch::Arch;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// The `pmbootstrap.cfg` record, one field per recognized key from
/// `${XDG_CONFIG_HOME}/pmbootstrap.cfg`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// The work directory, where chroots, build output, and caches live.
    pub work: PathBuf,
    /// The local aports checkout.
    pub aports: PathBuf,
    /// The target device codename.
    pub device: String,
    /// The kernel variant to build/use.
    pub kernel: String,
    /// The UI variant to install.
    pub ui: String,
    /// The Alpine Linux mirror URL.
    pub mirror_alpine: String,
    /// The postmarketOS mirror URLs, in preference order.
    pub mirrors_postmarketos: Vec<String>,
    /// The number of parallel build jobs to use.
    pub jobs: u32,
    /// Whether ccache is enabled for builds.
    pub ccache: bool,
    /// The configured ccache size limit.
    pub ccache_size: String,
    /// Whether to add host SSH keys to built images.
    pub ssh_keys: bool,
    /// A glob matching the SSH public keys to add.
    pub ssh_key_glob: String,
    /// The timezone to configure on built images.
    pub timezone: String,
    /// The locale to configure on built images.
    pub locale: String,
    /// The hostname to configure on built images.
    pub hostname: String,
    /// The default user to create on built images.
    pub user: String,
}

impl Config {
    /// A configuration populated with pmbootstrap's stock defaults, for use
    /// by `init` before the interactive wizard overrides fields.
    pub fn defaults(work: PathBuf, aports: PathBuf) -> Self {
        Config {
            work,
            aports,
            device: String::new(),
            kernel: "downstream".to_string(),
            ui: "none".to_string(),
            mirror_alpine: "https://dl-cdn.alpinelinux.org/alpine".to_string(),
            mirrors_postmarketos: vec!["https://mirror.postmarketos.org".to_string()],
            jobs: num_cpus::get() as u32,
            ccache: false,
            ccache_size: "5G".to_string(),
            ssh_keys: false,
            ssh_key_glob: "~/.ssh/*.pub".to_string(),
            timezone: "UTC".to_string(),
            locale: "en_US.UTF-8".to_string(),
            hostname: String::new(),
            user: "user".to_string(),
        }
    }

    /// The architecture implied by the configured `device`/`kernel`, if one
    /// has been selected yet.
    pub fn target_arch(&self) -> Option<Arch> {
        if self.device.is_empty() {
            None
        } else {
            // Device arch is read from the device's deviceinfo by
            // pmb_core::devicepkg; a bare Config does not know it.
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_set_job_count_from_host() {
        let cfg = Config::defaults(PathBuf::from("/tmp/work"), PathBuf::from("/tmp/aports"));
        assert!(cfg.jobs >= 1);
        assert_eq!(cfg.kernel, "downstream");
    }

    #[test]
    fn target_arch_none_without_device() {
        let cfg = Config::defaults(PathBuf::from("/tmp/work"), PathBuf::from("/tmp/aports"));
        assert_eq!(cfg.target_arch(), None);
    }
}
