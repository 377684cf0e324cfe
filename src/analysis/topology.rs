use crate::compute::{Catalog, ModuleId};
use crate::error::RegistryError;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashSet, VecDeque};

/// Modules that must run before `mid`: the producers of its inputs.
fn upstream_modules(catalog: &Catalog, mid: ModuleId) -> BTreeSet<ModuleId> {
    catalog
        .module(mid)
        .inputs
        .iter()
        .filter_map(|input| catalog.producer_of(input))
        .collect()
}

/// Reverse adjacency: for each module, the modules that consume one of its outputs.
fn consumers(catalog: &Catalog) -> Vec<Vec<ModuleId>> {
    let count = catalog.modules().len();
    let mut out = vec![Vec::new(); count];
    for i in 0..count {
        let mid = ModuleId::new(i);
        for up in upstream_modules(catalog, mid) {
            out[up.index()].push(mid);
        }
    }
    out
}

/// Performs a stable topological sort of the modules using Kahn's algorithm.
///
/// Every producer appears before its consumers. Among modules that are ready at
/// the same time, the one registered first wins, so the order is a pure function
/// of the catalog. A cycle is reported with the path of parameters involved.
pub fn stable_order(catalog: &Catalog) -> Result<Vec<ModuleId>, RegistryError> {
    let count = catalog.modules().len();
    let consumers = consumers(catalog);
    let mut in_degree: Vec<usize> = (0..count).map(|i| upstream_modules(catalog, ModuleId::new(i)).len()).collect();

    let mut ready: BinaryHeap<Reverse<usize>> = (0..count).filter(|&i| in_degree[i] == 0).map(Reverse).collect();
    let mut order = Vec::with_capacity(count);

    while let Some(Reverse(i)) = ready.pop() {
        order.push(ModuleId::new(i));
        for next in &consumers[i] {
            let d = &mut in_degree[next.index()];
            *d -= 1;
            if *d == 0 {
                ready.push(Reverse(next.index()));
            }
        }
    }

    if order.len() < count {
        let cycle = find_cycles(catalog).into_iter().next().unwrap_or_default();
        return Err(RegistryError::CyclicDependency { cycle });
    }
    Ok(order)
}

/// Groups modules into waves: every module in wave `n` depends only on modules
/// in waves `< n`. Members of a wave are in registration order.
pub fn waves(catalog: &Catalog) -> Result<Vec<Vec<ModuleId>>, RegistryError> {
    let order = stable_order(catalog)?;
    let mut depth = vec![0usize; catalog.modules().len()];
    let mut waves: Vec<Vec<ModuleId>> = Vec::new();

    for mid in order {
        let d = upstream_modules(catalog, mid).iter().map(|up| depth[up.index()] + 1).max().unwrap_or(0);
        depth[mid.index()] = d;
        if waves.len() <= d {
            waves.resize_with(d + 1, Vec::new);
        }
        waves[d].push(mid);
    }
    for wave in &mut waves {
        wave.sort_unstable();
    }
    Ok(waves)
}

/// Builds the parameter-level graph: an edge `input -> output` for every module.
fn param_graph(catalog: &Catalog) -> DiGraph<usize, ()> {
    let mut graph = DiGraph::with_capacity(catalog.param_count(), 0);
    let nodes: Vec<NodeIndex> = (0..catalog.param_count()).map(|i| graph.add_node(i)).collect();
    for module in catalog.modules() {
        for input in &module.inputs {
            for output in &module.outputs {
                if let (Some(a), Some(b)) = (catalog.param_position(input), catalog.param_position(output)) {
                    graph.add_edge(nodes[a], nodes[b], ());
                }
            }
        }
    }
    graph
}

/// Lists every dependency cycle as a closed path of parameter ids
/// (`[a, b, c, a]`), one per strongly connected component.
pub fn find_cycles(catalog: &Catalog) -> Vec<Vec<String>> {
    let graph = param_graph(catalog);
    let name = |n: NodeIndex| catalog.param_at(graph[n]).unwrap_or_default().to_string();

    let mut cycles: Vec<Vec<String>> = tarjan_scc(&graph)
        .into_iter()
        .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
        .filter_map(|scc| {
            let members: HashSet<NodeIndex> = scc.iter().copied().collect();
            let start = scc.iter().copied().min_by_key(|n| graph[*n])?;
            shortest_cycle(&graph, start, &members).map(|path| path.into_iter().map(name).collect())
        })
        .collect();
    cycles.sort();
    cycles
}

/// Breadth-first search for the shortest path from `start` back to itself
/// that stays inside one strongly connected component.
fn shortest_cycle(graph: &DiGraph<usize, ()>, start: NodeIndex, members: &HashSet<NodeIndex>) -> Option<Vec<NodeIndex>> {
    let mut parent: Vec<Option<NodeIndex>> = vec![None; graph.node_count()];
    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([start]);

    while let Some(node) = queue.pop_front() {
        // Deterministic neighbour order: by declaration position.
        let mut next: Vec<NodeIndex> = graph.neighbors(node).filter(|n| members.contains(n)).collect();
        next.sort_by_key(|n| graph[*n]);
        for n in next {
            if n == start {
                let mut path = vec![start];
                let mut cur = node;
                while cur != start {
                    path.push(cur);
                    cur = parent[cur.index()]?;
                }
                path[1..].reverse();
                path.push(start);
                return Some(path);
            }
            if seen.insert(n) {
                parent[n.index()] = Some(node);
                queue.push_back(n);
            }
        }
    }
    None
}

/// Identifies every parameter downstream of the given start parameters
/// (inclusive). Used for incremental invalidation between generations.
pub fn downstream_from(catalog: &Catalog, start: &[&str]) -> HashSet<String> {
    let mut visited = HashSet::new();
    let mut queue: VecDeque<String> = start.iter().map(|s| s.to_string()).collect();

    while let Some(id) = queue.pop_front() {
        if !visited.insert(id.clone()) {
            continue;
        }
        for module in catalog.modules() {
            if module.inputs.iter().any(|i| *i == id) {
                queue.extend(module.outputs.iter().cloned());
            }
        }
    }
    visited
}

/// Every parameter the target transitively depends on (exclusive), in sorted order.
pub fn upstream_from(catalog: &Catalog, target: &str) -> BTreeSet<String> {
    let mut visited = BTreeSet::new();
    let mut stack = vec![target.to_string()];

    while let Some(id) = stack.pop() {
        let Some(mid) = catalog.producer_of(&id) else { continue };
        for input in &catalog.module(mid).inputs {
            if visited.insert(input.clone()) {
                stack.push(input.clone());
            }
        }
    }
    visited
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::ModuleSpec;
    use crate::store::{ParamKind, ParamSchema};

    fn declare(cat: &mut Catalog, ids: &[&str]) {
        for id in ids {
            cat.declare(*id, ParamSchema::new("1"), ParamKind::Derived).unwrap();
        }
    }

    fn names(cat: &Catalog, order: &[ModuleId]) -> Vec<String> {
        order.iter().map(|m| cat.module(*m).id.clone()).collect()
    }

    #[test]
    fn test_sort_diamond_dependency() {
        // Shape: A -> B, A -> C, B+C -> D
        let mut cat = Catalog::new();
        declare(&mut cat, &["a", "b", "c", "d"]);
        cat.register(ModuleSpec::new("D").inputs(["b", "c"]).formula("d", "b + c")).unwrap();
        cat.register(ModuleSpec::new("C").inputs(["a"]).formula("c", "a * 2")).unwrap();
        cat.register(ModuleSpec::new("B").inputs(["a"]).formula("b", "a + 1")).unwrap();
        cat.register(ModuleSpec::new("A").formula("a", "1")).unwrap();

        let order = stable_order(&cat).unwrap();
        // Ties are broken by registration order: C was registered before B.
        assert_eq!(names(&cat, &order), ["A", "C", "B", "D"]);

        let waves = waves(&cat).unwrap();
        let waves: Vec<Vec<String>> = waves.iter().map(|w| names(&cat, w)).collect();
        assert_eq!(waves, vec![vec!["A"], vec!["C", "B"], vec!["D"]]);
    }

    #[test]
    fn test_cycle_is_reported_with_full_path() {
        let mut cat = Catalog::new();
        declare(&mut cat, &["a", "b", "c", "free"]);
        cat.register(ModuleSpec::new("F").formula("free", "1")).unwrap();
        cat.register(ModuleSpec::new("MA").inputs(["c"]).formula("a", "c")).unwrap();
        cat.register(ModuleSpec::new("MB").inputs(["a"]).formula("b", "a")).unwrap();
        cat.register(ModuleSpec::new("MC").inputs(["b"]).formula("c", "b")).unwrap();

        assert_eq!(find_cycles(&cat), vec![vec!["a", "b", "c", "a"]]);
        let err = stable_order(&cat).unwrap_err();
        assert_eq!(err, RegistryError::CyclicDependency { cycle: vec!["a".into(), "b".into(), "c".into(), "a".into()] });
    }

    #[test]
    fn test_two_node_cycle_closes_on_first_declared() {
        let mut cat = Catalog::new();
        declare(&mut cat, &["q", "p"]);
        cat.register(ModuleSpec::new("P").inputs(["q"]).formula("p", "q + 1")).unwrap();
        cat.register(ModuleSpec::new("Q").inputs(["p"]).formula("q", "p - 1")).unwrap();

        // Every consecutive pair is a real edge, and the path closes.
        assert_eq!(find_cycles(&cat), vec![vec!["q", "p", "q"]]);
    }

    #[test]
    fn test_downstream_and_upstream() {
        let mut cat = Catalog::new();
        cat.declare("g", ParamSchema::new("1"), ParamKind::Fundamental).unwrap();
        declare(&mut cat, &["x", "y", "other"]);
        cat.register(ModuleSpec::new("X").inputs(["g"]).formula("x", "g * 2")).unwrap();
        cat.register(ModuleSpec::new("Y").inputs(["x"]).formula("y", "x + 1")).unwrap();
        cat.register(ModuleSpec::new("O").formula("other", "3")).unwrap();

        let down = downstream_from(&cat, &["g"]);
        assert_eq!(down, ["g", "x", "y"].iter().map(|s| s.to_string()).collect());

        let up = upstream_from(&cat, "y");
        assert_eq!(up.into_iter().collect::<Vec<_>>(), ["g", "x"]);
        assert!(upstream_from(&cat, "other").is_empty());
    }
}
