//! Readability and export edges between named modules.
//!
//! One graph is shared by every layer of a runtime, so a controller of a
//! child layer can grant edges towards modules of the boot layer.

use hashbrown::{HashMap, HashSet};
use parking_lot::RwLock;

#[derive(Debug, Default)]
struct Node {
    reads: HashSet<String>,
    // package -> None (everyone) or Some(targets)
    exports: HashMap<String, Option<HashSet<String>>>,
    opens: HashMap<String, Option<HashSet<String>>>,
}

#[derive(Debug, Default)]
pub struct ModuleGraph {
    nodes: RwLock<HashMap<String, Node>>,
}

fn grant(edges: &mut HashMap<String, Option<HashSet<String>>>, package: &str, to: Option<&str>) {
    match to {
        None => {
            edges.insert(package.to_string(), None);
        }
        Some(target) => {
            let slot = edges
                .entry(package.to_string())
                .or_insert_with(|| Some(HashSet::new()));
            if let Some(targets) = slot {
                targets.insert(target.to_string());
            }
        }
    }
}

fn granted(edges: &HashMap<String, Option<HashSet<String>>>, package: &str, to: &str) -> bool {
    match edges.get(package) {
        Some(None) => true,
        Some(Some(targets)) => targets.contains(to),
        None => false,
    }
}

impl ModuleGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `name`; returns false if it was already present.
    pub fn add_module(&self, name: &str) -> bool {
        let mut nodes = self.nodes.write();
        if nodes.contains_key(name) {
            return false;
        }
        nodes.insert(name.to_string(), Node::default());
        true
    }

    /// Forget `name` and every edge it owns.
    pub fn remove_module(&self, name: &str) -> bool {
        self.nodes.write().remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.read().contains_key(name)
    }

    pub fn add_reads(&self, source: &str, target: &str) {
        let mut nodes = self.nodes.write();
        nodes
            .entry(source.to_string())
            .or_default()
            .reads
            .insert(target.to_string());
    }

    /// A module always reads itself.
    pub fn reads(&self, source: &str, target: &str) -> bool {
        if source == target {
            return true;
        }
        self.nodes
            .read()
            .get(source)
            .map(|n| n.reads.contains(target))
            .unwrap_or(false)
    }

    /// Export `package` of `module` to everyone (`to == None`) or to one
    /// module.
    pub fn add_exports(&self, module: &str, package: &str, to: Option<&str>) {
        let mut nodes = self.nodes.write();
        grant(&mut nodes.entry(module.to_string()).or_default().exports, package, to);
    }

    pub fn is_exported(&self, module: &str, package: &str, to: &str) -> bool {
        self.nodes
            .read()
            .get(module)
            .map(|n| granted(&n.exports, package, to))
            .unwrap_or(false)
    }

    pub fn add_opens(&self, module: &str, package: &str, to: Option<&str>) {
        let mut nodes = self.nodes.write();
        grant(&mut nodes.entry(module.to_string()).or_default().opens, package, to);
    }

    pub fn is_open(&self, module: &str, package: &str, to: &str) -> bool {
        self.nodes
            .read()
            .get(module)
            .map(|n| granted(&n.opens, package, to))
            .unwrap_or(false)
    }

    /// `from` may use public types of `package` in `owner`.
    pub fn can_access(&self, from: &str, owner: &str, package: &str) -> bool {
        from == owner || (self.reads(from, owner) && self.is_exported(owner, package, from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_reads_itself_only_by_default() {
        let g = ModuleGraph::new();
        assert!(g.add_module("a"));
        assert!(!g.add_module("a"));
        g.add_module("b");
        assert!(g.reads("a", "a"));
        assert!(!g.reads("a", "b"));
        g.add_reads("a", "b");
        assert!(g.reads("a", "b"));
        assert!(!g.reads("b", "a"));
    }

    /// Invariant: a qualified export is visible to its target only, and an
    /// unqualified export overrides earlier qualified ones.
    #[test]
    fn qualified_and_unqualified_exports() {
        let g = ModuleGraph::new();
        g.add_exports("lib", "lib.api", Some("app"));
        assert!(g.is_exported("lib", "lib.api", "app"));
        assert!(!g.is_exported("lib", "lib.api", "other"));
        g.add_exports("lib", "lib.api", None);
        assert!(g.is_exported("lib", "lib.api", "other"));
        assert!(!g.is_exported("lib", "lib.internal", "app"));
    }

    #[test]
    fn access_needs_both_reads_and_exports() {
        let g = ModuleGraph::new();
        g.add_exports("lib", "lib.api", None);
        assert!(!g.can_access("app", "lib", "lib.api"));
        g.add_reads("app", "lib");
        assert!(g.can_access("app", "lib", "lib.api"));
        assert!(!g.can_access("app", "lib", "lib.impl"));
        g.add_opens("lib", "lib.impl", Some("app"));
        assert!(g.is_open("lib", "lib.impl", "app"));
        assert!(g.can_access("lib", "lib", "lib.impl"));
    }
}
