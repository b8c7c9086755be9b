//! The privilege escalation channel.
//!
//! Every root-requiring command (mounting, chroot entry, `apk.static
//! --initdb`) is routed through here rather than calling `sudo`/`doas`
//! directly, so the argv shape stays stable and testable.

use pmb_schema::PmbError;
use std::collections::HashMap;

/// The escalator binary selected for this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Escalator {
    Doas(String),
    Sudo(String),
    /// Used only in tests: no escalation, argv passes through unchanged.
    None,
}

/// Resolves and applies the host's privilege escalation mechanism.
#[derive(Debug)]
pub struct PrivilegeChannel {
    escalator: Escalator,
}

impl PrivilegeChannel {
    /// Resolve the escalator: `$PMB_SUDO` if set, else `doas` if found on
    /// `PATH`, else `sudo`.
    ///
    /// # Errors
    ///
    /// Returns [`PmbError::PrivilegeEscalationFailed`] if no escalator can
    /// be found at all (no env override, no `doas`, no `sudo` on `PATH`).
    pub fn resolve() -> Result<Self, PmbError> {
        if let Ok(over) = std::env::var("PMB_SUDO") {
            return Ok(PrivilegeChannel {
                escalator: Escalator::Sudo(over),
            });
        }
        if let Ok(path) = which::which("doas") {
            return Ok(PrivilegeChannel {
                escalator: Escalator::Doas(path.to_string_lossy().to_string()),
            });
        }
        if let Ok(path) = which::which("sudo") {
            return Ok(PrivilegeChannel {
                escalator: Escalator::Sudo(path.to_string_lossy().to_string()),
            });
        }
        Err(PmbError::PrivilegeEscalationFailed(
            "no $PMB_SUDO override and neither doas nor sudo found on PATH".to_string(),
        ))
    }

    /// A channel with no escalator, for tests that run commands as the
    /// invoking user.
    pub fn for_test() -> Self {
        PrivilegeChannel {
            escalator: Escalator::None,
        }
    }

    /// Wrap `argv` with the escalator in the stable shape
    /// `<escalator> -E -- <argv...>`. `-E` tells the escalator to preserve
    /// the calling process's environment rather than resetting it; `env`
    /// itself is set on the wrapping `Command` by [`crate::command`], which
    /// is what actually reaches the escalated process. `VAR=value` tokens
    /// must never appear after `--`, which marks everything following as
    /// the literal program and its arguments, not environment assignments.
    ///
    /// # Errors
    ///
    /// Returns [`PmbError::PrivilegeEscalationFailed`] if `argv` is empty.
    pub fn wrap(&self, argv: Vec<String>, _env: &HashMap<String, String>) -> Result<Vec<String>, PmbError> {
        if argv.is_empty() {
            return Err(PmbError::PrivilegeEscalationFailed("empty argv".to_string()));
        }
        let bin = match &self.escalator {
            Escalator::Doas(bin) | Escalator::Sudo(bin) => bin.clone(),
            Escalator::None => return Ok(argv),
        };

        let mut wrapped = vec![bin, "-E".to_string(), "--".to_string()];
        wrapped.extend(argv);
        Ok(wrapped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_produces_stable_shape() {
        let chan = PrivilegeChannel {
            escalator: Escalator::Doas("/usr/bin/doas".to_string()),
        };
        let wrapped = chan.wrap(vec!["apk".to_string(), "add".to_string()], &HashMap::new()).unwrap();
        assert_eq!(wrapped, vec!["/usr/bin/doas", "-E", "--", "apk", "add"]);
    }

    #[test]
    fn wrap_never_puts_env_tokens_after_the_argv_separator() {
        // `--` marks everything after it as the literal program and its
        // arguments; env vars reach the escalated process via `-E` plus
        // the wrapping `Command`'s own environment, set by `command.rs`.
        let chan = PrivilegeChannel {
            escalator: Escalator::Sudo("/usr/bin/sudo".to_string()),
        };
        let mut env = HashMap::new();
        env.insert("B".to_string(), "2".to_string());
        env.insert("A".to_string(), "1".to_string());
        let wrapped = chan.wrap(vec!["true".to_string()], &env).unwrap();
        assert_eq!(wrapped, vec!["/usr/bin/sudo", "-E", "--", "true"]);
    }

    #[test]
    fn wrap_rejects_empty_argv() {
        let chan = PrivilegeChannel::for_test();
        assert!(chan.wrap(vec![], &HashMap::new()).is_err());
    }

    #[test]
    fn test_channel_passes_through_unchanged() {
        let chan = PrivilegeChannel::for_test();
        let wrapped = chan.wrap(vec!["id".to_string()], &HashMap::new()).unwrap();
        assert_eq!(wrapped, vec!["id"]);
    }
}
