//! Resource graph - a directed multigraph over resource vertices
//!
//! Vertices live in an arena keyed by [`VertexId`]; edges are stored twice,
//! once in forward (`out_from`) and once in backward (`in_to`) adjacency, and
//! every mutation keeps the two in agreement. Transitive closures are
//! memoized per vertex and cleared wholesale on any structural change.

use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use crate::types::EdgeLabel;

/// Handle to a vertex
///
/// Ids are allocated in insertion order and never reused, so comparing two
/// ids compares the declaration order of their vertices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VertexId(u64);

impl VertexId {
    /// Declaration order of the vertex
    pub fn priority(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for VertexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Direction of adjacency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Predecessors (edges leading into the vertex)
    In,
    /// Successors (edges leading out of the vertex)
    Out,
}

/// A directed, labelled edge
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Edge {
    pub source: VertexId,
    pub target: VertexId,
    pub label: EdgeLabel,
}

/// Anything that can name itself in diagnostics
pub trait Reference {
    /// Stable display reference, e.g. `File[/etc/motd]`
    fn reference(&self) -> String;
}

impl Reference for String {
    fn reference(&self) -> String {
        self.clone()
    }
}

impl Reference for &str {
    fn reference(&self) -> String {
        (*self).to_string()
    }
}

type Adjacency = HashMap<VertexId, BTreeMap<VertexId, BTreeSet<EdgeLabel>>>;
type ClosureCache = RefCell<HashMap<VertexId, Arc<BTreeSet<VertexId>>>>;

/// Directed multigraph of resources
pub struct ResourceGraph<V> {
    payloads: BTreeMap<VertexId, V>,
    in_to: Adjacency,
    out_from: Adjacency,
    next_id: u64,
    upstream: ClosureCache,
    downstream: ClosureCache,
}

impl<V> Default for ResourceGraph<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> fmt::Debug for ResourceGraph<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceGraph")
            .field("vertices", &self.payloads.len())
            .field("edges", &self.edge_count())
            .finish()
    }
}

impl<V> ResourceGraph<V> {
    /// Create an empty graph
    pub fn new() -> Self {
        Self {
            payloads: BTreeMap::new(),
            in_to: HashMap::new(),
            out_from: HashMap::new(),
            next_id: 0,
            upstream: RefCell::new(HashMap::new()),
            downstream: RefCell::new(HashMap::new()),
        }
    }

    fn invalidate_closures(&self) {
        self.upstream.borrow_mut().clear();
        self.downstream.borrow_mut().clear();
    }

    // ========================================================================
    // Vertices
    // ========================================================================

    /// Add a vertex, returning its handle
    pub fn add_vertex(&mut self, payload: V) -> VertexId {
        let id = VertexId(self.next_id);
        self.next_id += 1;
        self.payloads.insert(id, payload);
        self.in_to.insert(id, BTreeMap::new());
        self.out_from.insert(id, BTreeMap::new());
        self.invalidate_closures();
        id
    }

    /// Remove a vertex and every edge incident on it
    pub fn remove_vertex(&mut self, vertex: VertexId) -> Option<V> {
        let payload = self.payloads.remove(&vertex)?;
        self.invalidate_closures();

        if let Some(sources) = self.in_to.remove(&vertex) {
            for source in sources.keys() {
                if let Some(targets) = self.out_from.get_mut(source) {
                    targets.remove(&vertex);
                }
            }
        }
        if let Some(targets) = self.out_from.remove(&vertex) {
            for target in targets.keys() {
                if let Some(sources) = self.in_to.get_mut(target) {
                    sources.remove(&vertex);
                }
            }
        }
        Some(payload)
    }

    /// Test whether a vertex is in the graph
    pub fn contains(&self, vertex: VertexId) -> bool {
        self.payloads.contains_key(&vertex)
    }

    /// The payload stored at a vertex
    pub fn payload(&self, vertex: VertexId) -> Option<&V> {
        self.payloads.get(&vertex)
    }

    /// Declaration order of a vertex, `None` once removed
    pub fn priority(&self, vertex: VertexId) -> Option<u64> {
        self.contains(vertex).then(|| vertex.priority())
    }

    /// All vertices in declaration order
    pub fn vertices(&self) -> Vec<VertexId> {
        self.payloads.keys().copied().collect()
    }

    /// Iterate over vertices and payloads in declaration order
    pub fn iter(&self) -> impl Iterator<Item = (VertexId, &V)> {
        self.payloads.iter().map(|(id, payload)| (*id, payload))
    }

    /// Number of vertices
    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }

    // ========================================================================
    // Edges
    // ========================================================================

    /// Add an edge
    ///
    /// Returns `false` if the identical edge already exists or either
    /// endpoint is not in the graph.
    pub fn add_edge(&mut self, source: VertexId, target: VertexId, label: EdgeLabel) -> bool {
        if !self.contains(source) || !self.contains(target) {
            log::warn!("Ignoring edge {source} -> {target}: endpoint not in graph");
            return false;
        }
        self.invalidate_closures();

        let inserted = self
            .out_from
            .entry(source)
            .or_default()
            .entry(target)
            .or_default()
            .insert(label.clone());
        self.in_to
            .entry(target)
            .or_default()
            .entry(source)
            .or_default()
            .insert(label);
        inserted
    }

    /// Remove a single edge, returning whether it existed
    pub fn remove_edge(&mut self, edge: &Edge) -> bool {
        let Some(labels) = self
            .out_from
            .get_mut(&edge.source)
            .and_then(|targets| targets.get_mut(&edge.target))
        else {
            return false;
        };
        if !labels.remove(&edge.label) {
            return false;
        }
        let now_empty = labels.is_empty();

        if now_empty
            && let Some(targets) = self.out_from.get_mut(&edge.source)
        {
            targets.remove(&edge.target);
        }
        if let Some(sources) = self.in_to.get_mut(&edge.target)
            && let Some(labels) = sources.get_mut(&edge.source)
        {
            labels.remove(&edge.label);
            if labels.is_empty() {
                sources.remove(&edge.source);
            }
        }
        self.invalidate_closures();
        true
    }

    /// All edges from `source` to `target`
    pub fn edges_between(&self, source: VertexId, target: VertexId) -> Vec<Edge> {
        self.out_from
            .get(&source)
            .and_then(|targets| targets.get(&target))
            .map(|labels| {
                labels
                    .iter()
                    .map(|label| Edge {
                        source,
                        target,
                        label: label.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Is there at least one edge from `source` to `target`?
    pub fn has_edge(&self, source: VertexId, target: VertexId) -> bool {
        self.out_from
            .get(&source)
            .is_some_and(|targets| targets.contains_key(&target))
    }

    fn neighbours(&self, vertex: VertexId, direction: Direction) -> Option<&BTreeMap<VertexId, BTreeSet<EdgeLabel>>> {
        match direction {
            Direction::In => self.in_to.get(&vertex),
            Direction::Out => self.out_from.get(&vertex),
        }
    }

    /// Distinct neighbouring vertices in the given direction
    pub fn adjacent(&self, vertex: VertexId, direction: Direction) -> Vec<VertexId> {
        self.neighbours(vertex, direction)
            .map(|map| map.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Every edge incident on `vertex` in the given direction
    pub fn adjacent_edges(&self, vertex: VertexId, direction: Direction) -> Vec<Edge> {
        let Some(map) = self.neighbours(vertex, direction) else {
            return Vec::new();
        };
        map.iter()
            .flat_map(|(other, labels)| {
                labels.iter().map(move |label| {
                    let (source, target) = match direction {
                        Direction::In => (*other, vertex),
                        Direction::Out => (vertex, *other),
                    };
                    Edge {
                        source,
                        target,
                        label: label.clone(),
                    }
                })
            })
            .collect()
    }

    /// All edges, ordered by source then target
    pub fn edges(&self) -> Vec<Edge> {
        self.payloads
            .keys()
            .flat_map(|vertex| self.adjacent_edges(*vertex, Direction::Out))
            .collect()
    }

    /// Total number of edges
    pub fn edge_count(&self) -> usize {
        self.out_from
            .values()
            .flat_map(BTreeMap::values)
            .map(BTreeSet::len)
            .sum()
    }

    // ========================================================================
    // Transitive closure
    // ========================================================================

    /// Every vertex with a path leading to `vertex`
    pub fn upstream_from(&self, vertex: VertexId) -> Arc<BTreeSet<VertexId>> {
        self.closure(vertex, Direction::In, &self.upstream)
    }

    /// Every vertex reachable from `vertex`
    pub fn downstream_from(&self, vertex: VertexId) -> Arc<BTreeSet<VertexId>> {
        self.closure(vertex, Direction::Out, &self.downstream)
    }

    fn closure(&self, vertex: VertexId, direction: Direction, cache: &ClosureCache) -> Arc<BTreeSet<VertexId>> {
        if !self.contains(vertex) {
            return Arc::new(BTreeSet::new());
        }
        if let Some(known) = cache.borrow().get(&vertex) {
            return Arc::clone(known);
        }

        let mut reached = BTreeSet::new();
        let mut stack = self.adjacent(vertex, direction);
        while let Some(node) = stack.pop() {
            if !reached.insert(node) {
                continue;
            }
            // A memoized closure already covers everything past `node`
            if let Some(known) = cache.borrow().get(&node) {
                reached.extend(known.iter().copied());
                continue;
            }
            stack.extend(self.adjacent(node, direction));
        }

        let reached = Arc::new(reached);
        cache.borrow_mut().insert(vertex, Arc::clone(&reached));
        reached
    }

    // ========================================================================
    // Ordering and cycles
    // ========================================================================

    /// Topologically sort the graph
    ///
    /// Ready vertices are emitted in declaration order. If the graph has a
    /// cycle the full remainder is returned as a [`CycleReport`].
    pub fn topsort(&self) -> Result<Vec<VertexId>, CycleReport> {
        let mut in_degree: HashMap<VertexId, usize> = self
            .payloads
            .keys()
            .map(|v| (*v, self.in_to.get(v).map_or(0, BTreeMap::len)))
            .collect();
        let mut ready: BTreeSet<VertexId> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(v, _)| *v)
            .collect();

        let mut sorted = Vec::with_capacity(self.payloads.len());
        while let Some(vertex) = ready.pop_first() {
            sorted.push(vertex);
            for successor in self.adjacent(vertex, Direction::Out) {
                if let Some(degree) = in_degree.get_mut(&successor) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(successor);
                    }
                }
            }
        }

        if sorted.len() == self.payloads.len() {
            return Ok(sorted);
        }
        let placed: HashSet<VertexId> = sorted.into_iter().collect();
        let remaining: BTreeSet<VertexId> = self
            .payloads
            .keys()
            .filter(|v| !placed.contains(v))
            .copied()
            .collect();
        Err(CycleReport::new(self, &remaining))
    }

    /// Every cycle in the graph, each sorted, the list sorted
    pub fn find_cycles(&self) -> Vec<Vec<VertexId>> {
        let all: BTreeSet<VertexId> = self.payloads.keys().copied().collect();
        self.cycles_within(&all)
    }

    fn cycles_within(&self, within: &BTreeSet<VertexId>) -> Vec<Vec<VertexId>> {
        let mut cycles: Vec<Vec<VertexId>> = self
            .strongly_connected(within)
            .into_iter()
            .filter(|component| component.len() > 1 || self.has_edge(component[0], component[0]))
            .map(|mut component| {
                component.sort();
                component
            })
            .collect();
        cycles.sort();
        cycles
    }

    /// Tarjan's algorithm with an explicit stack, restricted to `within`
    fn strongly_connected(&self, within: &BTreeSet<VertexId>) -> Vec<Vec<VertexId>> {
        struct Frame {
            vertex: VertexId,
            children: Vec<VertexId>,
            next: usize,
        }

        let children_of = |v: VertexId| -> Vec<VertexId> {
            self.adjacent(v, Direction::Out)
                .into_iter()
                .filter(|c| within.contains(c))
                .collect()
        };

        let mut counter = 0usize;
        let mut index: HashMap<VertexId, usize> = HashMap::new();
        let mut lowlink: HashMap<VertexId, usize> = HashMap::new();
        let mut on_stack: HashSet<VertexId> = HashSet::new();
        let mut stack: Vec<VertexId> = Vec::new();
        let mut components = Vec::new();

        for root in within {
            if index.contains_key(root) {
                continue;
            }
            index.insert(*root, counter);
            lowlink.insert(*root, counter);
            counter += 1;
            stack.push(*root);
            on_stack.insert(*root);
            let mut recur = vec![Frame {
                vertex: *root,
                children: children_of(*root),
                next: 0,
            }];

            while let Some(frame) = recur.last_mut() {
                let vertex = frame.vertex;
                if frame.next < frame.children.len() {
                    let child = frame.children[frame.next];
                    frame.next += 1;
                    if let Some(child_index) = index.get(&child).copied() {
                        if on_stack.contains(&child) {
                            let low = lowlink[&vertex].min(child_index);
                            lowlink.insert(vertex, low);
                        }
                    } else {
                        index.insert(child, counter);
                        lowlink.insert(child, counter);
                        counter += 1;
                        stack.push(child);
                        on_stack.insert(child);
                        recur.push(Frame {
                            vertex: child,
                            children: children_of(child),
                            next: 0,
                        });
                    }
                    continue;
                }

                recur.pop();
                if lowlink[&vertex] == index[&vertex] {
                    let mut component = Vec::new();
                    while let Some(top) = stack.pop() {
                        on_stack.remove(&top);
                        component.push(top);
                        if top == vertex {
                            break;
                        }
                    }
                    components.push(component);
                }
                if let Some(parent) = recur.last() {
                    let low = lowlink[&parent.vertex].min(lowlink[&vertex]);
                    lowlink.insert(parent.vertex, low);
                }
            }
        }
        components
    }

    /// Closed paths through a cycle, shortest first
    ///
    /// Breadth-first walk of the cycle's subgraph starting at its first
    /// vertex; stops after `max_paths` paths.
    pub fn paths_in_cycle(&self, cycle: &[VertexId], max_paths: usize) -> Vec<Vec<VertexId>> {
        let Some(first) = cycle.first() else {
            return Vec::new();
        };
        let members: HashSet<VertexId> = cycle.iter().copied().collect();
        let adjacency: HashMap<VertexId, Vec<VertexId>> = cycle
            .iter()
            .map(|v| {
                let next = self
                    .adjacent(*v, Direction::Out)
                    .into_iter()
                    .filter(|n| members.contains(n))
                    .collect();
                (*v, next)
            })
            .collect();

        let mut found = Vec::new();
        let mut queue: VecDeque<(VertexId, Vec<VertexId>)> = VecDeque::from([(*first, Vec::new())]);
        while let Some((vertex, path)) = queue.pop_front() {
            if path.contains(&vertex) {
                let mut closed = path;
                closed.push(vertex);
                found.push(closed);
                if found.len() >= max_paths.max(1) {
                    break;
                }
                continue;
            }
            for next in adjacency.get(&vertex).into_iter().flatten() {
                let mut extended = path.clone();
                extended.push(vertex);
                queue.push_back((*next, extended));
            }
        }
        found.sort();
        found
    }

    // ========================================================================
    // Container splicing
    // ========================================================================

    /// Replace container vertices by their contents
    ///
    /// `containment` maps each container to its direct children. Containers
    /// are spliced leaf-first; every edge incident on a container is re-added
    /// against each of its (already expanded) children with the same label,
    /// then the container is removed. An empty container is replaced by a
    /// vertex produced by `placeholder` so relationships through it survive.
    pub fn splice<F, P>(&mut self, containment: &BTreeMap<VertexId, Vec<VertexId>>, is_container: F, mut placeholder: P)
    where
        F: Fn(&V) -> bool,
        P: FnMut(&V) -> V,
    {
        let containers: BTreeSet<VertexId> = self
            .payloads
            .iter()
            .filter(|(_, payload)| is_container(payload))
            .map(|(id, _)| *id)
            .collect();

        let mut expanded: HashMap<VertexId, Vec<VertexId>> = HashMap::new();
        for container in leaf_first(&containers, containment) {
            let mut children: Vec<VertexId> = Vec::new();
            for child in containment.get(&container).into_iter().flatten() {
                let replacement = match expanded.get(child) {
                    Some(leaves) => leaves.clone(),
                    None if self.contains(*child) => vec![*child],
                    None => Vec::new(),
                };
                for leaf in replacement {
                    if !children.contains(&leaf) {
                        children.push(leaf);
                    }
                }
            }

            if children.is_empty() {
                let Some(payload) = self.payloads.get(&container) else {
                    continue;
                };
                let stand_in = placeholder(payload);
                children.push(self.add_vertex(stand_in));
            }

            let skip = |other: VertexId| other == container || children.contains(&other);
            for edge in self.adjacent_edges(container, Direction::In) {
                if skip(edge.source) {
                    continue;
                }
                for child in &children {
                    self.add_edge(edge.source, *child, edge.label.clone());
                }
            }
            for edge in self.adjacent_edges(container, Direction::Out) {
                if skip(edge.target) {
                    continue;
                }
                for child in &children {
                    self.add_edge(*child, edge.target, edge.label.clone());
                }
            }

            self.remove_vertex(container);
            expanded.insert(container, children);
        }
    }
}

/// Post-order over the containment relation: nested containers first
fn leaf_first(containers: &BTreeSet<VertexId>, containment: &BTreeMap<VertexId, Vec<VertexId>>) -> Vec<VertexId> {
    let mut order = Vec::with_capacity(containers.len());
    let mut seen: HashSet<VertexId> = HashSet::new();

    for root in containers {
        if !seen.insert(*root) {
            continue;
        }
        let mut stack: Vec<(VertexId, usize)> = vec![(*root, 0)];
        while let Some((vertex, next)) = stack.last_mut() {
            let nested: Vec<VertexId> = containment
                .get(vertex)
                .into_iter()
                .flatten()
                .filter(|c| containers.contains(c))
                .copied()
                .collect();
            if let Some(child) = nested.get(*next).copied() {
                *next += 1;
                if seen.insert(child) {
                    stack.push((child, 0));
                }
            } else {
                order.push(*vertex);
                stack.pop();
            }
        }
    }
    order
}

impl<V: Clone> ResourceGraph<V> {
    /// A copy of this graph with every edge reversed, keeping vertex ids
    pub fn reversal(&self) -> Self {
        let mut reversed = Self::new();
        reversed.next_id = self.next_id;
        for (id, payload) in &self.payloads {
            reversed.payloads.insert(*id, payload.clone());
            reversed.in_to.insert(*id, BTreeMap::new());
            reversed.out_from.insert(*id, BTreeMap::new());
        }
        for edge in self.edges() {
            reversed.add_edge(edge.target, edge.source, edge.label);
        }
        reversed
    }
}

impl<V: Reference> ResourceGraph<V> {
    /// Display reference of a vertex, or its id if it has been removed
    pub fn reference_of(&self, vertex: VertexId) -> String {
        self.payload(vertex)
            .map_or_else(|| vertex.to_string(), Reference::reference)
    }

    /// Render the whole graph in DOT format
    pub fn to_dot(&self, name: &str) -> String {
        let mut out = format!("digraph {name} {{\n");
        for (_, payload) in self.iter() {
            out.push_str(&format!("  {};\n", quote(&payload.reference())));
        }
        for edge in self.edges() {
            let mut line = format!(
                "  {} -> {}",
                quote(&self.reference_of(edge.source)),
                quote(&self.reference_of(edge.target))
            );
            if let Some(callback) = edge.label.callback {
                line.push_str(&format!(" [label={}]", quote(callback.as_str())));
            }
            line.push_str(";\n");
            out.push_str(&line);
        }
        out.push_str("}\n");
        out
    }
}

fn quote(text: &str) -> String {
    format!("\"{}\"", text.replace('"', "\\\""))
}

/// The part of a graph that could not be ordered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// Strongly connected components that form real cycles
    pub cycles: Vec<Vec<VertexId>>,
    /// Vertices that are not on a cycle but wait behind one
    pub blocked: Vec<VertexId>,
}

impl CycleReport {
    /// Group an unorderable remainder into cycles and blocked vertices
    pub fn new<V>(graph: &ResourceGraph<V>, remaining: &BTreeSet<VertexId>) -> Self {
        let cycles = graph.cycles_within(remaining);
        let on_cycle: HashSet<VertexId> = cycles.iter().flatten().copied().collect();
        let blocked = remaining
            .iter()
            .filter(|v| !on_cycle.contains(v))
            .copied()
            .collect();
        Self { cycles, blocked }
    }

    /// Every vertex that sits on a cycle
    pub fn members(&self) -> BTreeSet<VertexId> {
        self.cycles.iter().flatten().copied().collect()
    }

    /// User-facing description, one path per cycle
    pub fn message<V: Reference>(&self, graph: &ResourceGraph<V>) -> String {
        let count = self.cycles.len();
        let mut message = format!(
            "Found {count} dependency {}:\n",
            if count == 1 { "cycle" } else { "cycles" }
        );
        for cycle in &self.cycles {
            for path in graph.paths_in_cycle(cycle, 1) {
                message.push_str(&format!("({})\n", render_path(graph, &path, " => ")));
            }
        }
        message
    }

    /// DOT rendering of up to ten paths per cycle
    pub fn to_dot<V: Reference>(&self, graph: &ResourceGraph<V>) -> String {
        let mut out = String::from("digraph Resource_Cycles {\n  label = \"Resource Cycles\"\n");
        for cycle in &self.cycles {
            for path in graph.paths_in_cycle(cycle, 10) {
                let quoted: Vec<String> = path.iter().map(|v| quote(&graph.reference_of(*v))).collect();
                out.push_str(&format!("  {}\n", quoted.join(" -> ")));
            }
        }
        out.push_str("}\n");
        out
    }
}

fn render_path<V: Reference>(graph: &ResourceGraph<V>, path: &[VertexId], separator: &str) -> String {
    path.iter()
        .map(|v| graph.reference_of(*v))
        .collect::<Vec<_>>()
        .join(separator)
}
