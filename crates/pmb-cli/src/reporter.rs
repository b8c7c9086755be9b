//! The terminal [`Reporter`] implementation: colored sequential status
//! lines via `crossterm`, tabular summaries via `comfy-table`.

use crossterm::style::Stylize;
use pmb_core::Reporter;
use pmb_schema::{ChrootId, Pkgname};
use std::sync::atomic::{AtomicBool, Ordering};

/// Writes progress to stdout/stderr, honoring a `quiet` flag that suppresses
/// everything but warnings and errors.
#[derive(Debug)]
pub struct TerminalReporter {
    quiet: bool,
    in_phase: AtomicBool,
}

impl TerminalReporter {
    pub fn new(quiet: bool) -> Self {
        TerminalReporter {
            quiet,
            in_phase: AtomicBool::new(false),
        }
    }

    fn line(&self, text: &str) {
        if !self.quiet {
            println!("{text}");
        }
    }
}

impl Reporter for TerminalReporter {
    fn live_phase(&self, title: &str) {
        self.in_phase.store(true, Ordering::Relaxed);
        if !self.quiet {
            print!("{} {title}... ", "->".blue());
            use std::io::Write;
            let _ = std::io::stdout().flush();
        }
    }

    fn live_phase_update(&self, status: &str, success: bool) {
        self.in_phase.store(false, Ordering::Relaxed);
        if self.quiet {
            return;
        }
        if success {
            println!("{}", status.green());
        } else {
            println!("{}", status.red());
        }
    }

    fn section(&self, title: &str) {
        self.line(&format!("{}", format!("== {title} ==").bold()));
    }

    fn downloading(&self, url: &str, current: u64, total: Option<u64>) {
        if self.quiet {
            return;
        }
        match total {
            Some(total) => println!("  downloading {url}: {current}/{total} bytes"),
            None => println!("  downloading {url}: {current} bytes"),
        }
    }

    fn mounting(&self, chroot: ChrootId) {
        self.line(&format!("  mounting {chroot}"));
    }

    fn bootstrapping(&self, chroot: ChrootId) {
        self.line(&format!("  bootstrapping {chroot}"));
    }

    fn building(&self, pkgname: &Pkgname, version: &str) {
        self.line(&format!("{} {pkgname} {version}", ">>".cyan()));
    }

    fn committing(&self, pkgname: &Pkgname, arch: &str) {
        self.line(&format!("  committing {pkgname} ({arch})"));
    }

    fn zapping(&self, chroot: ChrootId) {
        self.line(&format!("  zapping {chroot}"));
    }

    fn done(&self, pkgname: &Pkgname, detail: &str) {
        self.line(&format!("{} {pkgname}: {detail}", "OK".green().bold()));
    }

    fn failed(&self, pkgname: &Pkgname, reason: &str) {
        eprintln!("{} {pkgname}: {reason}", "FAIL".red().bold());
    }

    fn info(&self, msg: &str) {
        self.line(msg);
    }

    fn success(&self, msg: &str) {
        self.line(&format!("{}", msg.green()));
    }

    fn warning(&self, msg: &str) {
        eprintln!("{} {msg}", "warning:".yellow().bold());
    }

    fn error(&self, msg: &str) {
        eprintln!("{} {msg}", "error:".red().bold());
    }

    fn summary(&self, count: usize, action: &str, elapsed_secs: f64) {
        self.line(&format!("{count} package(s) {action} in {elapsed_secs:.1}s"));
    }

    fn summary_plain(&self, count: usize, status: &str) {
        self.line(&format!("{count} package(s) {status}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_reporter_suppresses_info() {
        let reporter = TerminalReporter::new(true);
        reporter.info("should not panic even though output is suppressed");
    }
}
