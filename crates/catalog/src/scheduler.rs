//! Scheduler - walks a resource graph in dependency order
//!
//! The walk keeps a live count of unvisited predecessors per vertex. Vertices
//! whose count drops to zero join the frontier, which is drained in
//! declaration order so that a given graph is always traversed the same way.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::graph::{Direction, ResourceGraph, VertexId};

/// Callbacks driven by [`traverse`]
///
/// Only `visit` is required; every other hook defaults to a no-op.
pub trait TraversalHooks<V> {
    /// Polled before each vertex's turn; `false` cancels the rest of the walk
    fn should_continue(&mut self) -> bool {
        true
    }

    /// Prepare a vertex before its turn
    ///
    /// May add vertices and edges to the graph. Return `true` if the graph
    /// was mutated so that the scheduler recomputes its bookkeeping.
    fn pre_process(&mut self, _graph: &mut ResourceGraph<V>, _vertex: VertexId) -> bool {
        false
    }

    /// Whether a vertex can be visited at all
    fn schedulable(&mut self, _graph: &ResourceGraph<V>, _vertex: VertexId) -> bool {
        true
    }

    /// The vertex's turn
    fn visit(&mut self, graph: &ResourceGraph<V>, vertex: VertexId);

    /// Called instead of `visit` for vertices that are not schedulable
    fn unschedulable_handler(&mut self, _graph: &ResourceGraph<V>, _vertex: VertexId) {}

    /// Called once for every vertex left unvisited by a cancellation
    fn canceled_handler(&mut self, _graph: &ResourceGraph<V>, _vertex: VertexId) {}

    /// Called with every vertex that could not be reached because of a cycle
    fn cycle_handler(&mut self, _graph: &ResourceGraph<V>, _remaining: &[VertexId]) {}

    /// Runs exactly once when the walk ends, whatever the outcome
    fn teardown(&mut self, _graph: &ResourceGraph<V>) {}
}

/// How a traversal ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Traversal {
    /// Every vertex was handled
    Completed,
    /// `should_continue` returned false
    Canceled,
    /// The frontier ran dry; these vertices were never handled
    Cycle(Vec<VertexId>),
}

/// Walk `graph` in dependency order, driving `hooks`
///
/// Nothing already visited is rolled back when the walk stops early.
pub fn traverse<V, H>(graph: &mut ResourceGraph<V>, hooks: &mut H) -> Traversal
where
    H: TraversalHooks<V> + ?Sized,
{
    let outcome = walk(graph, hooks);
    hooks.teardown(graph);
    outcome
}

struct Frontier {
    blockers: HashMap<VertexId, usize>,
    ready: BTreeSet<VertexId>,
    visited: HashSet<VertexId>,
}

impl Frontier {
    fn new<V>(graph: &ResourceGraph<V>) -> Self {
        let mut frontier = Self {
            blockers: HashMap::new(),
            ready: BTreeSet::new(),
            visited: HashSet::new(),
        };
        frontier.recount(graph);
        frontier
    }

    /// Recount unvisited predecessors of every unvisited vertex
    fn recount<V>(&mut self, graph: &ResourceGraph<V>) {
        self.blockers.clear();
        self.ready.clear();
        for vertex in graph.vertices() {
            if self.visited.contains(&vertex) {
                continue;
            }
            let count = graph
                .adjacent(vertex, Direction::In)
                .into_iter()
                .filter(|p| !self.visited.contains(p))
                .count();
            self.blockers.insert(vertex, count);
            if count == 0 {
                self.ready.insert(vertex);
            }
        }
    }

    fn is_blocked(&self, vertex: VertexId) -> bool {
        self.blockers.get(&vertex).is_some_and(|count| *count > 0)
    }

    /// Mark `vertex` done and free its successors
    fn complete<V>(&mut self, graph: &ResourceGraph<V>, vertex: VertexId) {
        self.blockers.remove(&vertex);
        for successor in graph.adjacent(vertex, Direction::Out) {
            if self.visited.contains(&successor) {
                continue;
            }
            if let Some(count) = self.blockers.get_mut(&successor) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    self.ready.insert(successor);
                }
            }
        }
    }

    fn unvisited<V>(&self, graph: &ResourceGraph<V>) -> Vec<VertexId> {
        graph
            .vertices()
            .into_iter()
            .filter(|v| !self.visited.contains(v))
            .collect()
    }
}

fn walk<V, H>(graph: &mut ResourceGraph<V>, hooks: &mut H) -> Traversal
where
    H: TraversalHooks<V> + ?Sized,
{
    let mut frontier = Frontier::new(graph);

    while let Some(vertex) = frontier.ready.pop_first() {
        if !graph.contains(vertex) || frontier.visited.contains(&vertex) {
            continue;
        }
        if !hooks.should_continue() {
            return cancel(graph, hooks, &frontier);
        }

        if hooks.pre_process(graph, vertex) {
            log::debug!("Graph changed while preparing {vertex}, recounting dependencies");
            frontier.recount(graph);
            if frontier.is_blocked(vertex) {
                // Comes back once whatever was inserted ahead of it is done
                continue;
            }
            frontier.ready.remove(&vertex);
            if !graph.contains(vertex) {
                continue;
            }
        }
        if !hooks.should_continue() {
            return cancel(graph, hooks, &frontier);
        }

        frontier.visited.insert(vertex);
        if hooks.schedulable(graph, vertex) {
            hooks.visit(graph, vertex);
        } else {
            hooks.unschedulable_handler(graph, vertex);
        }
        frontier.complete(graph, vertex);
    }

    let remaining = frontier.unvisited(graph);
    if remaining.is_empty() {
        Traversal::Completed
    } else {
        log::debug!("Traversal stalled with {} vertices left", remaining.len());
        hooks.cycle_handler(graph, &remaining);
        Traversal::Cycle(remaining)
    }
}

fn cancel<V, H>(graph: &ResourceGraph<V>, hooks: &mut H, frontier: &Frontier) -> Traversal
where
    H: TraversalHooks<V> + ?Sized,
{
    let remaining = frontier.unvisited(graph);
    log::debug!("Traversal canceled with {} vertices left", remaining.len());
    for vertex in remaining {
        hooks.canceled_handler(graph, vertex);
    }
    Traversal::Canceled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EdgeLabel;

    #[derive(Default)]
    struct Recorder {
        visited: Vec<&'static str>,
        unschedulable: Vec<&'static str>,
        canceled: Vec<&'static str>,
        cycle: Vec<&'static str>,
        teardowns: usize,
        stop_after: Option<&'static str>,
        refuse: Option<&'static str>,
    }

    impl TraversalHooks<&'static str> for Recorder {
        fn should_continue(&mut self) -> bool {
            match self.stop_after {
                Some(name) => !self.visited.contains(&name),
                None => true,
            }
        }

        fn schedulable(&mut self, graph: &ResourceGraph<&'static str>, vertex: VertexId) -> bool {
            graph.payload(vertex).copied() != self.refuse
        }

        fn visit(&mut self, graph: &ResourceGraph<&'static str>, vertex: VertexId) {
            self.visited.push(graph.payload(vertex).copied().unwrap());
        }

        fn unschedulable_handler(&mut self, graph: &ResourceGraph<&'static str>, vertex: VertexId) {
            self.unschedulable.push(graph.payload(vertex).copied().unwrap());
        }

        fn canceled_handler(&mut self, graph: &ResourceGraph<&'static str>, vertex: VertexId) {
            self.canceled.push(graph.payload(vertex).copied().unwrap());
        }

        fn cycle_handler(&mut self, graph: &ResourceGraph<&'static str>, remaining: &[VertexId]) {
            self.cycle
                .extend(remaining.iter().map(|v| graph.payload(*v).copied().unwrap()));
        }

        fn teardown(&mut self, _graph: &ResourceGraph<&'static str>) {
            self.teardowns += 1;
        }
    }

    fn build(names: &[&'static str], edges: &[(usize, usize)]) -> (ResourceGraph<&'static str>, Vec<VertexId>) {
        let mut graph = ResourceGraph::new();
        let ids: Vec<VertexId> = names.iter().map(|n| graph.add_vertex(*n)).collect();
        for (source, target) in edges {
            graph.add_edge(ids[*source], ids[*target], EdgeLabel::ordering());
        }
        (graph, ids)
    }

    #[test]
    fn test_independent_vertices_in_declaration_order() {
        let (mut graph, _) = build(&["first", "second", "third", "fourth", "fifth"], &[]);
        let mut hooks = Recorder::default();

        assert_eq!(traverse(&mut graph, &mut hooks), Traversal::Completed);
        assert_eq!(hooks.visited, vec!["first", "second", "third", "fourth", "fifth"]);
        assert_eq!(hooks.teardowns, 1);
    }

    #[test]
    fn test_dependencies_come_first() {
        // first requires third
        let (mut graph, _) = build(&["first", "second", "third"], &[(2, 0)]);
        let mut hooks = Recorder::default();

        traverse(&mut graph, &mut hooks);
        assert_eq!(hooks.visited, vec!["second", "third", "first"]);
    }

    #[test]
    fn test_every_edge_respected() {
        let edges = [(0, 3), (1, 3), (3, 2), (4, 0), (2, 5), (4, 5)];
        let (mut graph, ids) = build(&["a", "b", "c", "d", "e", "f"], &edges);
        let mut hooks = Recorder::default();

        traverse(&mut graph, &mut hooks);
        let position = |name: &str| hooks.visited.iter().position(|v| *v == name).unwrap();
        for edge in graph.edges() {
            let source = graph.payload(edge.source).copied().unwrap();
            let target = graph.payload(edge.target).copied().unwrap();
            assert!(position(source) < position(target), "{source} before {target}");
        }
        assert_eq!(hooks.visited.len(), ids.len());
    }

    #[test]
    fn test_cycle_reports_remaining_once() {
        let (mut graph, _) = build(&["a", "b", "c", "d"], &[(1, 2), (2, 1), (2, 3)]);
        let mut hooks = Recorder::default();

        let outcome = traverse(&mut graph, &mut hooks);
        assert!(matches!(outcome, Traversal::Cycle(ref left) if left.len() == 3));
        assert_eq!(hooks.visited, vec!["a"]);
        assert_eq!(hooks.cycle, vec!["b", "c", "d"]);
        assert_eq!(hooks.teardowns, 1);
    }

    #[test]
    fn test_cancel_enumerates_remaining() {
        let (mut graph, _) = build(&["a", "b", "c", "d"], &[(2, 3)]);
        let mut hooks = Recorder {
            stop_after: Some("b"),
            ..Recorder::default()
        };

        assert_eq!(traverse(&mut graph, &mut hooks), Traversal::Canceled);
        assert_eq!(hooks.visited, vec!["a", "b"]);
        assert_eq!(hooks.canceled, vec!["c", "d"]);
        assert_eq!(hooks.teardowns, 1);
    }

    #[test]
    fn test_unschedulable_is_not_visited_but_unblocks() {
        let (mut graph, _) = build(&["broken", "dependent"], &[(0, 1)]);
        let mut hooks = Recorder {
            refuse: Some("broken"),
            ..Recorder::default()
        };

        traverse(&mut graph, &mut hooks);
        assert_eq!(hooks.unschedulable, vec!["broken"]);
        assert_eq!(hooks.visited, vec!["dependent"]);
    }

    struct Generator {
        visited: Vec<&'static str>,
        generated: bool,
    }

    impl TraversalHooks<&'static str> for Generator {
        fn pre_process(&mut self, graph: &mut ResourceGraph<&'static str>, vertex: VertexId) -> bool {
            if self.generated || graph.payload(vertex).copied() != Some("dir") {
                return false;
            }
            self.generated = true;
            let dependents = graph.adjacent(vertex, Direction::Out);
            for name in ["dir/a", "dir/b"] {
                let child = graph.add_vertex(name);
                graph.add_edge(vertex, child, EdgeLabel::ordering());
                for dependent in &dependents {
                    graph.add_edge(child, *dependent, EdgeLabel::ordering());
                }
            }
            true
        }

        fn visit(&mut self, graph: &ResourceGraph<&'static str>, vertex: VertexId) {
            self.visited.push(graph.payload(vertex).copied().unwrap());
        }
    }

    #[test]
    fn test_generated_vertices_are_ordered() {
        let (mut graph, _) = build(&["dir", "service", "unrelated"], &[(0, 1)]);
        let mut hooks = Generator {
            visited: Vec::new(),
            generated: false,
        };

        assert_eq!(traverse(&mut graph, &mut hooks), Traversal::Completed);
        assert_eq!(hooks.visited, vec!["dir", "unrelated", "dir/a", "dir/b", "service"]);
    }

    struct Blocker;

    impl TraversalHooks<&'static str> for Blocker {
        fn pre_process(&mut self, graph: &mut ResourceGraph<&'static str>, vertex: VertexId) -> bool {
            if graph.payload(vertex).copied() != Some("late") || graph.len() > 1 {
                return false;
            }
            let first = graph.add_vertex("inserted");
            graph.add_edge(first, vertex, EdgeLabel::ordering());
            true
        }

        fn visit(&mut self, _graph: &ResourceGraph<&'static str>, _vertex: VertexId) {}
    }

    #[test]
    fn test_vertex_blocked_by_generation_is_requeued() {
        let (mut graph, _) = build(&["late"], &[]);
        assert_eq!(traverse(&mut graph, &mut Blocker), Traversal::Completed);
        assert_eq!(graph.len(), 2);
    }
}
