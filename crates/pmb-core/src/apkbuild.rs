//! The constrained `APKBUILD` evaluator.
//!
//! `APKBUILD` files are POSIX shell scripts, but every consumer in this
//! codebase only ever needs their declarative metadata: `pkgname`, `pkgver`,
//! `pkgrel`, `arch`, `depends`, `makedepends`, `checkdepends`,
//! `subpackages`, `provides`, `options`, and the `source`/`sha512sums`
//! pairing. [`eval`] reads that metadata directly off the plain
//! `VAR=value` / `VAR="value"` assignment lines a real APKBUILD uses for
//! them, with `$pkgname`/`$pkgver` substitution, without executing the
//! script. Anything requiring actual shell execution (command
//! substitution, loops, conditionals inside the variables this cares
//! about) is rejected with [`PmbError::RecipeUnsupported`]; [`eval_in_chroot`]
//! is the fallback for those.

use crate::command::{CommandRunner, ExecContext, RunSpec};
use pmb_schema::{
    ArchSpec, ChecksumEntry, DependencyKind, PmbError, Pkgname, Recipe, RecipeOption, Requirement, Sha256Digest, Sha512Digest, SourceEntry, Subpackage,
};
use std::collections::HashMap;
use std::path::Path;

/// Parse an `APKBUILD`'s text with the constrained evaluator.
///
/// # Errors
///
/// Returns [`PmbError::RecipeUnsupported`] naming the first construct this
/// evaluator cannot handle (command substitution, a `for`/`if` touching a
/// metadata variable, or a missing required field).
pub fn eval(text: &str, origin_repo: &str) -> Result<Recipe, PmbError> {
    let vars = collect_assignments(text)?;

    let pkgname = vars.get("pkgname").ok_or_else(|| PmbError::RecipeUnsupported("missing pkgname".to_string()))?;
    let pkgver = vars.get("pkgver").ok_or_else(|| PmbError::RecipeUnsupported("missing pkgver".to_string()))?;
    let pkgrel: u64 = vars
        .get("pkgrel")
        .ok_or_else(|| PmbError::RecipeUnsupported("missing pkgrel".to_string()))?
        .parse()
        .map_err(|_| PmbError::RecipeUnsupported("pkgrel is not a number".to_string()))?;

    let arch = vars
        .get("arch")
        .map(|v| parse_arch_list(v))
        .transpose()?
        .unwrap_or_else(|| vec![ArchSpec::All]);

    let depends = parse_requirements(vars.get("depends").map(String::as_str).unwrap_or(""), DependencyKind::Runtime)?;
    let makedepends = parse_requirements(vars.get("makedepends").map(String::as_str).unwrap_or(""), DependencyKind::Make)?;
    let checkdepends = parse_requirements(vars.get("checkdepends").map(String::as_str).unwrap_or(""), DependencyKind::Check)?;

    let subpackages = vars
        .get("subpackages")
        .map(|v| parse_subpackages(v, pkgname))
        .unwrap_or_default();

    let provides = vars.get("provides").map(|v| v.split_whitespace().map(str::to_string).collect()).unwrap_or_default();

    let options = vars
        .get("options")
        .map(|v| v.split_whitespace().filter_map(RecipeOption::parse).collect())
        .unwrap_or_default();

    let sources = parse_sources(&vars);

    Ok(Recipe {
        pkgname: Pkgname::new(pkgname),
        origin_repo: origin_repo.to_string(),
        pkgver: pkgver.clone(),
        pkgrel,
        arch,
        depends,
        makedepends,
        checkdepends,
        subpackages,
        provides,
        sources,
        options,
    })
}

/// Evaluate an `APKBUILD` by sourcing it inside a chroot and printing its
/// variables, for recipes [`eval`] rejects. Requires a live, mounted
/// chroot; the shell does the real work, this just captures the result.
///
/// # Errors
///
/// Propagates [`CommandRunner`] errors, or [`PmbError::RecipeUnsupported`]
/// if the chroot-evaluated output still cannot be parsed as metadata.
pub async fn eval_in_chroot(runner: &CommandRunner, context: ExecContext, apkbuild_path: &Path, origin_repo: &str) -> Result<Recipe, PmbError> {
    let script = format!(
        ". {} 2>/dev/null; printf 'pkgname=%s\\npkgver=%s\\npkgrel=%s\\n' \"$pkgname\" \"$pkgver\" \"$pkgrel\"",
        apkbuild_path.display()
    );
    let outcome = runner
        .run(RunSpec::new(["sh".to_string(), "-c".to_string(), script]).context(context).as_root(false))
        .await?;
    eval(&outcome.stdout, origin_repo)
}

/// Scan for plain `VAR=value` / `VAR="value"` assignment lines, resolving
/// `$var`/`${var}` references to earlier assignments. Function bodies
/// (anything between a `name() {` opener and its matching `}`) are skipped
/// entirely since this evaluator never executes shell logic.
fn collect_assignments(text: &str) -> Result<HashMap<String, String>, PmbError> {
    let mut vars = HashMap::new();
    let mut lines = text.lines().peekable();
    let mut depth = 0u32;

    while let Some(line) = lines.next() {
        let trimmed = line.trim();

        if depth > 0 {
            depth += trimmed.matches('{').count() as u32;
            depth -= trimmed.matches('}').count() as u32;
            continue;
        }

        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if trimmed.ends_with('{') && trimmed.contains("()") {
            depth = 1;
            continue;
        }
        if trimmed.contains("$(") || trimmed.contains('`') {
            return Err(PmbError::RecipeUnsupported(format!("command substitution: {trimmed}")));
        }
        if trimmed.starts_with("for ") || trimmed.starts_with("if ") || trimmed.starts_with("while ") {
            return Err(PmbError::RecipeUnsupported(format!("control flow construct: {trimmed}")));
        }

        let Some((name, mut value)) = trimmed.split_once('=') else {
            continue;
        };
        if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            continue;
        }

        // Multi-line arrays: `key="
        //   line2
        //   line3"` — accumulate until the closing quote.
        let mut owned;
        if value.starts_with('"') && !value[1..].ends_with('"') {
            let mut acc = value.to_string();
            for cont in lines.by_ref() {
                acc.push('\n');
                acc.push_str(cont);
                if cont.trim_end().ends_with('"') {
                    break;
                }
            }
            owned = acc;
            value = &owned;
        }

        let unquoted = value.trim_matches('"').trim_matches('\'');
        owned = substitute(unquoted, &vars);
        vars.insert(name.to_string(), owned);
    }

    Ok(vars)
}

fn substitute(value: &str, vars: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        let braced = chars.peek() == Some(&'{');
        if braced {
            chars.next();
        }
        let mut name = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                name.push(c);
                chars.next();
            } else {
                break;
            }
        }
        if braced && chars.peek() == Some(&'}') {
            chars.next();
        }
        if let Some(resolved) = vars.get(&name) {
            out.push_str(resolved);
        }
    }
    out
}

fn parse_arch_list(value: &str) -> Result<Vec<ArchSpec>, PmbError> {
    if value.trim() == "all" {
        return Ok(vec![ArchSpec::All]);
    }
    if value.trim() == "noarch" {
        return Ok(vec![ArchSpec::All]);
    }
    value
        .split_whitespace()
        .map(|tok| ArchSpec::parse(tok).ok_or_else(|| PmbError::RecipeUnsupported(format!("unknown arch token: {tok}"))))
        .collect()
}

fn parse_requirements(value: &str, kind: DependencyKind) -> Result<Vec<Requirement>, PmbError> {
    value
        .split_whitespace()
        .filter(|tok| !tok.starts_with('!'))
        .map(|tok| Requirement::parse(tok, kind).map_err(|e| PmbError::RecipeUnsupported(e.to_string())))
        .collect()
}

fn parse_subpackages(value: &str, pkgname: &str) -> Vec<Subpackage> {
    value
        .split_whitespace()
        .map(|tok| {
            let (name, split_fn) = tok.split_once(':').unwrap_or((tok, tok.trim_start_matches(&format!("{pkgname}-"))));
            Subpackage {
                pkgname: Pkgname::new(name),
                split_fn: split_fn.to_string(),
            }
        })
        .collect()
}

fn parse_sources(vars: &HashMap<String, String>) -> Vec<SourceEntry> {
    let urls: Vec<&str> = vars.get("source").map(|v| v.split_whitespace().collect()).unwrap_or_default();
    let sha512: Vec<&str> = vars.get("sha512sums").map(|v| v.split_whitespace().collect()).unwrap_or_default();
    let sha256: Vec<&str> = vars.get("sha256sums").map(|v| v.split_whitespace().collect()).unwrap_or_default();

    urls.iter()
        .enumerate()
        .filter_map(|(i, url)| {
            // `sha512sums`/`sha256sums` interleave hash and filename tokens:
            // `<hash>  <filename>`, two tokens per source entry.
            if let Some(hash) = sha512.get(i * 2) {
                return Sha512Digest::new(*hash).ok().map(|d| SourceEntry {
                    url: (*url).to_string(),
                    checksum: ChecksumEntry::Sha512(d),
                });
            }
            if let Some(hash) = sha256.get(i * 2) {
                return Sha256Digest::new(*hash).ok().map(|d| SourceEntry {
                    url: (*url).to_string(),
                    checksum: ChecksumEntry::Sha256(d),
                });
            }
            None
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE: &str = r#"
pkgname=hello
pkgver=1.2.3
pkgrel=4
arch="all"
depends="musl libc-dev"
makedepends="gcc make"
options="!check"
"#;

    #[test]
    fn parses_simple_recipe() {
        let recipe = eval(SIMPLE, "main").unwrap();
        assert_eq!(recipe.pkgname.as_str(), "hello");
        assert_eq!(recipe.version_string(), "1.2.3-r4");
        assert_eq!(recipe.depends.len(), 2);
        assert_eq!(recipe.makedepends.len(), 2);
        assert_eq!(recipe.options, vec![RecipeOption::NoCheck]);
    }

    #[test]
    fn substitutes_pkgname_in_subpackages() {
        let text = r#"
pkgname=foo
pkgver=1.0
pkgrel=0
subpackages="$pkgname-dev $pkgname-doc"
"#;
        let recipe = eval(text, "main").unwrap();
        assert_eq!(recipe.subpackages.len(), 2);
        assert_eq!(recipe.subpackages[0].pkgname.as_str(), "foo-dev");
    }

    #[test]
    fn rejects_command_substitution() {
        let text = "pkgname=foo\npkgver=$(date +%s)\npkgrel=0\n";
        let err = eval(text, "main").unwrap_err();
        assert!(matches!(err, PmbError::RecipeUnsupported(_)));
    }

    #[test]
    fn rejects_control_flow() {
        let text = "pkgname=foo\npkgver=1.0\npkgrel=0\nif [ -n \"$x\" ]; then\n  depends=\"a\"\nfi\n";
        let err = eval(text, "main").unwrap_err();
        assert!(matches!(err, PmbError::RecipeUnsupported(_)));
    }

    #[test]
    fn skips_function_bodies() {
        let text = "pkgname=foo\npkgver=1.0\npkgrel=0\nbuild() {\n  for f in *.c; do echo $f; done\n}\n";
        let recipe = eval(text, "main").unwrap();
        assert_eq!(recipe.pkgname.as_str(), "foo");
    }

    #[test]
    fn missing_pkgrel_is_unsupported() {
        let text = "pkgname=foo\npkgver=1.0\n";
        let err = eval(text, "main").unwrap_err();
        assert!(matches!(err, PmbError::RecipeUnsupported(_)));
    }
}
