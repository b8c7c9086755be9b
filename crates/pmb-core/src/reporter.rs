//! Reporter trait for dependency injection.
//!
//! This trait lets the chroot manager, mirror fetcher, and build planner
//! report progress without being coupled to a specific terminal UI.

use pmb_schema::{ChrootId, Pkgname};

pub trait Reporter: Send + Sync {
    /// Prepare a live-updated phase (e.g. "Bootstrapping chroot_native...").
    fn live_phase(&self, title: &str);

    /// Update the current live phase with a status (e.g. "done", "failed").
    fn live_phase_update(&self, status: &str, success: bool);

    /// A new section has started (e.g. "Resolving dependencies", "Building").
    fn section(&self, title: &str);

    /// Progress on an `APKINDEX`/source download.
    fn downloading(&self, url: &str, current: u64, total: Option<u64>);

    /// A chroot is being mounted.
    fn mounting(&self, chroot: ChrootId);

    /// A chroot is being bootstrapped from scratch.
    fn bootstrapping(&self, chroot: ChrootId);

    /// A package has started building.
    fn building(&self, pkgname: &Pkgname, version: &str);

    /// A built APK is being committed into the local repository.
    fn committing(&self, pkgname: &Pkgname, arch: &str);

    /// A chroot is being torn down.
    fn zapping(&self, chroot: ChrootId);

    /// Marks an operation as successfully completed.
    fn done(&self, pkgname: &Pkgname, detail: &str);

    /// Marks an operation as failed with a specific reason.
    fn failed(&self, pkgname: &Pkgname, reason: &str);

    /// Log an informational message.
    fn info(&self, msg: &str);

    /// Log a success message.
    fn success(&self, msg: &str);

    /// Log a warning message.
    fn warning(&self, msg: &str);

    /// Log an error message.
    fn error(&self, msg: &str);

    /// Display a final summary of multiple operations.
    fn summary(&self, count: usize, action: &str, elapsed_secs: f64);

    /// Display a final summary without timing information.
    fn summary_plain(&self, count: usize, status: &str);
}

impl<T: Reporter + ?Sized> Reporter for std::sync::Arc<T> {
    fn live_phase(&self, title: &str) {
        (**self).live_phase(title)
    }
    fn live_phase_update(&self, status: &str, success: bool) {
        (**self).live_phase_update(status, success)
    }
    fn section(&self, title: &str) {
        (**self).section(title)
    }
    fn downloading(&self, url: &str, current: u64, total: Option<u64>) {
        (**self).downloading(url, current, total)
    }
    fn mounting(&self, chroot: ChrootId) {
        (**self).mounting(chroot)
    }
    fn bootstrapping(&self, chroot: ChrootId) {
        (**self).bootstrapping(chroot)
    }
    fn building(&self, pkgname: &Pkgname, version: &str) {
        (**self).building(pkgname, version)
    }
    fn committing(&self, pkgname: &Pkgname, arch: &str) {
        (**self).committing(pkgname, arch)
    }
    fn zapping(&self, chroot: ChrootId) {
        (**self).zapping(chroot)
    }
    fn done(&self, pkgname: &Pkgname, detail: &str) {
        (**self).done(pkgname, detail)
    }
    fn failed(&self, pkgname: &Pkgname, reason: &str) {
        (**self).failed(pkgname, reason)
    }
    fn info(&self, msg: &str) {
        (**self).info(msg)
    }
    fn success(&self, msg: &str) {
        (**self).success(msg)
    }
    fn warning(&self, msg: &str) {
        (**self).warning(msg)
    }
    fn error(&self, msg: &str) {
        (**self).error(msg)
    }
    fn summary(&self, count: usize, action: &str, elapsed_secs: f64) {
        (**self).summary(count, action, elapsed_secs)
    }
    fn summary_plain(&self, count: usize, status: &str) {
        (**self).summary_plain(count, status)
    }
}

/// A no-op reporter for silent operations (tests, library consumers that
/// want structured logs instead of terminal output).
#[derive(Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn live_phase(&self, _: &str) {}
    fn live_phase_update(&self, _: &str, _: bool) {}
    fn section(&self, _: &str) {}
    fn downloading(&self, _: &str, _: u64, _: Option<u64>) {}
    fn mounting(&self, _: ChrootId) {}
    fn bootstrapping(&self, _: ChrootId) {}
    fn building(&self, _: &Pkgname, _: &str) {}
    fn committing(&self, _: &Pkgname, _: &str) {}
    fn zapping(&self, _: ChrootId) {}
    fn done(&self, _: &Pkgname, _: &str) {}
    fn failed(&self, _: &Pkgname, _: &str) {}
    fn info(&self, _: &str) {}
    fn success(&self, _: &str) {}
    fn warning(&self, _: &str) {}
    fn error(&self, _: &str) {}
    fn summary(&self, _: usize, _: &str, _: f64) {}
    fn summary_plain(&self, _: usize, _: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_reporter_is_inert() {
        let r = NullReporter;
        r.info("hello");
        r.building(&Pkgname::new("foo"), "1.0-r0");
    }

    #[test]
    fn arc_wrapped_reporter_forwards_calls() {
        let r = std::sync::Arc::new(NullReporter);
        r.section("test");
    }
}
