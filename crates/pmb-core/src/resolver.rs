//! Dependency resolution.
//!
//! A depth-first traversal with memoization on `(pkgname, incoming
//! constraint set)`, generalized from a plain topological sort to also:
//! track which edge kind formed a cycle (runtime cycles are legal in
//! Alpine, makedepends cycles are not and require a bootstrap package),
//! carry version constraints so conflicting requirements on one package
//! surface as `DependencyConflict` rather than picking one arbitrarily, and
//! resolve virtual providers by scanning the source for a matching
//! `provides`.

use pmb_schema::{DependencyKind, PmbError, Pkgname, Requirement, ResolutionResult, ResolvedPackage};
use std::collections::{HashMap, HashSet, VecDeque};

/// Where the resolver looks up a package's version, dependencies, and
/// provided virtual names. Implemented over the union of loaded recipes and
/// `APKINDEX` entries.
pub trait PackageSource {
    /// The concrete version string for a package, if known.
    fn version_of(&self, name: &Pkgname) -> Option<&str>;
    /// The runtime (`depends=`), make-time (`makedepends=`), and check-time
    /// (`checkdepends=`) requirements for a package.
    fn requirements_of(&self, name: &Pkgname) -> &[Requirement];
    /// Whether `name` is directly known to this source (not just reachable
    /// via a virtual provider).
    fn contains(&self, name: &Pkgname) -> bool;
    /// Whether building `name` is still needed (true for recipes without a
    /// matching index entry yet).
    fn needs_build(&self, name: &Pkgname) -> bool;
    /// Resolve a virtual provider name (e.g. `cmd:python3`) to a concrete
    /// package that provides it, if any.
    fn resolve_provider(&self, name: &Pkgname) -> Option<Pkgname>;
}

/// An in-memory [`PackageSource`] over plain entries, used by tests and by
/// small ad-hoc queries (`repo_missing`).
#[derive(Debug, Default)]
pub struct MemorySource {
    entries: HashMap<Pkgname, MemoryEntry>,
    provides: HashMap<Pkgname, Pkgname>,
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    version: String,
    requirements: Vec<Requirement>,
    needs_build: bool,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a package with its version, requirements, and provided
    /// virtual names.
    pub fn insert(
        &mut self,
        name: Pkgname,
        version: impl Into<String>,
        requirements: Vec<Requirement>,
        provides: Vec<Pkgname>,
        needs_build: bool,
    ) {
        for p in provides {
            self.provides.insert(p, name.clone());
        }
        self.entries.insert(
            name,
            MemoryEntry {
                version: version.into(),
                requirements,
                needs_build,
            },
        );
    }
}

impl PackageSource for MemorySource {
    fn version_of(&self, name: &Pkgname) -> Option<&str> {
        self.entries.get(name).map(|e| e.version.as_str())
    }

    fn requirements_of(&self, name: &Pkgname) -> &[Requirement] {
        self.entries
            .get(name)
            .map(|e| e.requirements.as_slice())
            .unwrap_or(&[])
    }

    fn contains(&self, name: &Pkgname) -> bool {
        self.entries.contains_key(name)
    }

    fn needs_build(&self, name: &Pkgname) -> bool {
        self.entries.get(name).is_some_and(|e| e.needs_build)
    }

    fn resolve_provider(&self, name: &Pkgname) -> Option<Pkgname> {
        self.provides.get(name).cloned()
    }
}

/// Resolve the full dependency closure of `roots`, returning the chosen
/// version for every package touched and a layered build order.
///
/// # Errors
///
/// Returns [`PmbError::MissingProvider`] if a name (or virtual it expands
/// to) cannot be found, [`PmbError::BootstrapRequired`] if a `makedepends`
/// cycle is found, and [`PmbError::DependencyConflict`] if two requirements
/// on the same package cannot both be satisfied by one chosen version.
pub fn resolve_dependencies(
    roots: &[Pkgname],
    source: &dyn PackageSource,
) -> Result<ResolutionResult, PmbError> {
    let mut order: Vec<Pkgname> = Vec::new();
    let mut visited: HashSet<Pkgname> = HashSet::new();
    // Stack of (name, edge kind used to reach it) for cycle classification.
    let mut stack: Vec<(Pkgname, DependencyKind)> = Vec::new();
    let mut constraints: HashMap<Pkgname, Vec<Requirement>> = HashMap::new();

    for root in roots {
        visit(root, DependencyKind::Runtime, source, &mut order, &mut visited, &mut stack, &mut constraints)?;
    }

    let mut chosen = Vec::with_capacity(order.len());
    for name in &order {
        let version = source
            .version_of(name)
            .ok_or_else(|| PmbError::MissingProvider(name.to_string()))?
            .to_string();
        if let Some(reqs) = constraints.get(name) {
            for req in reqs {
                if !req.constraint.matches(&version) {
                    return Err(PmbError::DependencyConflict {
                        chain: reqs.iter().map(|r| r.name.to_string()).collect(),
                    });
                }
            }
        }
        chosen.push(ResolvedPackage {
            pkgname: name.clone(),
            version,
            needs_build: source.needs_build(name),
        });
    }

    let build_layers = layered_build_order(&order, source);

    Ok(ResolutionResult { chosen, build_layers })
}

#[allow(clippy::too_many_arguments)]
fn visit(
    name: &Pkgname,
    edge_kind: DependencyKind,
    source: &dyn PackageSource,
    order: &mut Vec<Pkgname>,
    visited: &mut HashSet<Pkgname>,
    stack: &mut Vec<(Pkgname, DependencyKind)>,
    constraints: &mut HashMap<Pkgname, Vec<Requirement>>,
) -> Result<(), PmbError> {
    let resolved_name = if source.contains(name) {
        name.clone()
    } else if let Some(provider) = source.resolve_provider(name) {
        provider
    } else {
        return Err(PmbError::MissingProvider(name.to_string()));
    };

    if visited.contains(&resolved_name) {
        return Ok(());
    }

    if let Some(pos) = stack.iter().position(|(n, _)| *n == resolved_name) {
        // Cycle found: everything from `pos` onward, plus this new edge,
        // forms the loop. A makedepends edge anywhere in it is fatal.
        let cycle_has_make_edge = stack[pos..].iter().any(|(_, k)| *k == DependencyKind::Make) || edge_kind == DependencyKind::Make;
        if cycle_has_make_edge {
            let mut cycle: Vec<String> = stack[pos..].iter().map(|(n, _)| n.to_string()).collect();
            cycle.push(resolved_name.to_string());
            return Err(PmbError::BootstrapRequired { cycle });
        }
        // Legal runtime cycle: stop recursing here without error.
        return Ok(());
    }

    stack.push((resolved_name.clone(), edge_kind));

    for req in source.requirements_of(&resolved_name) {
        constraints.entry(req.name.clone()).or_default().push(req.clone());
        visit(&req.name, req.kind, source, order, visited, stack, constraints)?;
    }

    stack.pop();
    visited.insert(resolved_name.clone());
    order.push(resolved_name);

    Ok(())
}

/// Kahn's-algorithm layering of an already-flattened dependency order, so
/// packages with no remaining dependency on each other can build in
/// parallel within a layer.
fn layered_build_order(order: &[Pkgname], source: &dyn PackageSource) -> Vec<Vec<Pkgname>> {
    let index: HashMap<&Pkgname, usize> = order.iter().enumerate().map(|(i, n)| (n, i)).collect();
    let mut in_degree: Vec<usize> = vec![0; order.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); order.len()];

    for (i, name) in order.iter().enumerate() {
        for req in source.requirements_of(name) {
            if let Some(&j) = index.get(&req.name) {
                dependents[j].push(i);
                in_degree[i] += 1;
            }
        }
    }

    let mut layers = Vec::new();
    let mut queue: VecDeque<usize> = (0..order.len()).filter(|&i| in_degree[i] == 0).collect();

    let mut remaining = order.len();
    while !queue.is_empty() {
        let mut layer: Vec<usize> = queue.drain(..).collect();
        layer.sort_unstable();
        remaining -= layer.len();
        for &i in &layer {
            for &j in &dependents[i] {
                in_degree[j] -= 1;
                if in_degree[j] == 0 {
                    queue.push_back(j);
                }
            }
        }
        layers.push(layer.into_iter().map(|i| order[i].clone()).collect());
    }

    if remaining > 0 {
        // A runtime-only cycle survived flattening; keep whatever couldn't
        // be layered as one final unordered layer rather than losing it.
        let placed: HashSet<&Pkgname> = layers.iter().flatten().collect();
        let leftover: Vec<Pkgname> = order.iter().filter(|n| !placed.contains(n)).cloned().collect();
        if !leftover.is_empty() {
            layers.push(leftover);
        }
    }

    layers
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmb_schema::Constraint;

    fn req(name: &str, kind: DependencyKind) -> Requirement {
        Requirement {
            name: Pkgname::new(name),
            constraint: Constraint::Any,
            kind,
        }
    }

    #[test]
    fn empty_roots_yields_empty_result() {
        let source = MemorySource::new();
        let result = resolve_dependencies(&[], &source).unwrap();
        assert!(result.chosen.is_empty());
        assert!(result.build_layers.is_empty());
    }

    #[test]
    fn simple_chain_orders_dependency_first() {
        let mut source = MemorySource::new();
        source.insert(Pkgname::new("a"), "1.0-r0", vec![req("b", DependencyKind::Runtime)], vec![], false);
        source.insert(Pkgname::new("b"), "1.0-r0", vec![], vec![], false);

        let result = resolve_dependencies(&[Pkgname::new("a")], &source).unwrap();
        let names: Vec<_> = result.chosen.iter().map(|p| p.pkgname.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn runtime_cycle_is_legal() {
        let mut source = MemorySource::new();
        source.insert(Pkgname::new("a"), "1.0-r0", vec![req("b", DependencyKind::Runtime)], vec![], false);
        source.insert(Pkgname::new("b"), "1.0-r0", vec![req("a", DependencyKind::Runtime)], vec![], false);

        let result = resolve_dependencies(&[Pkgname::new("a")], &source);
        assert!(result.is_ok());
    }

    #[test]
    fn makedepends_cycle_is_bootstrap_required() {
        let mut source = MemorySource::new();
        source.insert(Pkgname::new("a"), "1.0-r0", vec![req("b", DependencyKind::Make)], vec![], false);
        source.insert(Pkgname::new("b"), "1.0-r0", vec![req("a", DependencyKind::Make)], vec![], false);

        let err = resolve_dependencies(&[Pkgname::new("a")], &source).unwrap_err();
        assert!(matches!(err, PmbError::BootstrapRequired { .. }));
    }

    #[test]
    fn missing_package_errors() {
        let source = MemorySource::new();
        let err = resolve_dependencies(&[Pkgname::new("ghost")], &source).unwrap_err();
        assert!(matches!(err, PmbError::MissingProvider(_)));
    }

    #[test]
    fn virtual_provider_resolves() {
        let mut source = MemorySource::new();
        source.insert(Pkgname::new("python3"), "3.11-r0", vec![], vec![Pkgname::new("cmd:python3")], false);

        let result = resolve_dependencies(&[Pkgname::new("cmd:python3")], &source).unwrap();
        assert_eq!(result.chosen.len(), 1);
        assert_eq!(result.chosen[0].pkgname.as_str(), "python3");
    }

    #[test]
    fn conflicting_constraints_reported() {
        let mut source = MemorySource::new();
        source.insert(
            Pkgname::new("a"),
            "1.0-r0",
            vec![Requirement {
                name: Pkgname::new("musl"),
                constraint: Constraint::parse(">=2.0.0").unwrap(),
                kind: DependencyKind::Runtime,
            }],
            vec![],
            false,
        );
        source.insert(Pkgname::new("musl"), "1.2.0-r0", vec![], vec![], false);

        let err = resolve_dependencies(&[Pkgname::new("a")], &source).unwrap_err();
        assert!(matches!(err, PmbError::DependencyConflict { .. }));
    }

    #[test]
    fn diamond_build_layers() {
        let mut source = MemorySource::new();
        source.insert(Pkgname::new("a"), "1.0-r0", vec![req("b", DependencyKind::Make), req("c", DependencyKind::Make)], vec![], false);
        source.insert(Pkgname::new("b"), "1.0-r0", vec![req("d", DependencyKind::Make)], vec![], false);
        source.insert(Pkgname::new("c"), "1.0-r0", vec![req("d", DependencyKind::Make)], vec![], false);
        source.insert(Pkgname::new("d"), "1.0-r0", vec![], vec![], false);

        let result = resolve_dependencies(&[Pkgname::new("a")], &source).unwrap();
        assert_eq!(result.build_layers.len(), 3);
        assert_eq!(result.build_layers[0], vec![Pkgname::new("d")]);
        assert_eq!(result.build_layers[2], vec![Pkgname::new("a")]);
    }
}
