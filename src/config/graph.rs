// ABOUTME: Dependency ordering over the compose depends_on graph.
// ABOUTME: Kahn topological sort for cycle detection plus transitive closure for subsets.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::error::{Error, Result};

/// Order `edges` (node -> its dependencies) dependencies-first.
///
/// Fails with the nodes left on a cycle when the graph is not acyclic.
pub fn topological_order(edges: &BTreeMap<String, BTreeSet<String>>) -> Result<Vec<String>> {
    let mut in_degree: BTreeMap<&str, usize> = edges
        .iter()
        .map(|(node, deps)| (node.as_str(), deps.len()))
        .collect();

    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (node, deps) in edges {
        for dep in deps {
            dependents.entry(dep.as_str()).or_default().push(node.as_str());
        }
    }

    let mut queue: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(node, _)| *node)
        .collect();

    let mut order = Vec::with_capacity(edges.len());
    while let Some(node) = queue.pop_front() {
        order.push(node.to_string());
        for dependent in dependents.get(node).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(dependent) {
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(*dependent);
                }
            }
        }
    }

    if order.len() != edges.len() {
        let stuck = in_degree
            .into_iter()
            .filter(|(_, degree)| *degree > 0)
            .map(|(node, _)| node.to_string())
            .collect();
        return Err(Error::DependencyCycle(stuck));
    }

    Ok(order)
}

/// `roots` plus everything they transitively depend on.
pub fn transitive_closure(
    edges: &BTreeMap<String, BTreeSet<String>>,
    roots: impl IntoIterator<Item = String>,
) -> BTreeSet<String> {
    let mut seen = BTreeSet::new();
    let mut stack: Vec<String> = roots.into_iter().collect();
    while let Some(node) = stack.pop() {
        if !seen.insert(node.clone()) {
            continue;
        }
        if let Some(deps) = edges.get(&node) {
            stack.extend(deps.iter().filter(|d| !seen.contains(*d)).cloned());
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(pairs: &[(&str, &[&str])]) -> BTreeMap<String, BTreeSet<String>> {
        pairs
            .iter()
            .map(|(node, deps)| {
                (
                    node.to_string(),
                    deps.iter().map(|d| d.to_string()).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn orders_dependencies_first() {
        let edges = graph(&[("web", &["api"]), ("api", &["db"]), ("db", &[])]);
        let order = topological_order(&edges).unwrap();
        assert_eq!(order, vec!["db", "api", "web"]);
    }

    #[test]
    fn reports_cycle_members() {
        let edges = graph(&[("a", &["b"]), ("b", &["a"]), ("c", &[])]);
        match topological_order(&edges) {
            Err(Error::DependencyCycle(nodes)) => assert_eq!(nodes, vec!["a", "b"]),
            other => panic!("expected cycle error, got {:?}", other),
        }
    }

    #[test]
    fn closure_includes_transitive_dependencies() {
        let edges = graph(&[("web", &["api"]), ("api", &["db"]), ("db", &[]), ("cron", &[])]);
        let selected = transitive_closure(&edges, ["web".to_string()]);
        assert_eq!(
            selected.into_iter().collect::<Vec<_>>(),
            vec!["api", "db", "web"]
        );
    }
}
