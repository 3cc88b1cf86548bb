use crate::id::*;
use crate::registry::{ModifierCategory, Registry};
use slotmap::{SecondaryMap, SlotMap};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur while building the dependency graph.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GraphError {
    #[error("cyclic dependency: {}", format_cycles(.cycles))]
    CyclicDependency { cycles: Vec<Vec<NodeKey>> },
    #[error(
        "modifier {category} -> {target} of source {source_id} uses dependency slot {slot} \
         but only lists {deps} deps"
    )]
    DependencySlotOutOfRange {
        source_id: SourceId,
        category: ModifierCategory,
        target: String,
        slot: usize,
        deps: usize,
    },
}

pub(crate) fn format_cycles(cycles: &[Vec<NodeKey>]) -> String {
    cycles
        .iter()
        .map(|cycle| {
            let mut path: Vec<String> = cycle.iter().map(ToString::to_string).collect();
            if let Some(first) = cycle.first() {
                path.push(first.to_string());
            }
            path.join(" -> ")
        })
        .collect::<Vec<_>>()
        .join("; ")
}

// ---------------------------------------------------------------------------
// Node data
// ---------------------------------------------------------------------------

/// Effects and resources a source contributes to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Provides {
    pub effects: BTreeSet<EffectId>,
    pub resources: BTreeSet<ResourceId>,
}

/// Effects whose values a source's formulas read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependsOn {
    pub effects: BTreeSet<EffectId>,
}

/// Nodes whose cached values go stale when this node changes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dependents {
    pub sources: BTreeSet<SourceId>,
    pub effects: BTreeSet<EffectId>,
    pub resources: BTreeSet<ResourceId>,
}

impl Dependents {
    fn insert(&mut self, key: &NodeKey) {
        match key {
            NodeKey::Source(id) => self.sources.insert(id.clone()),
            NodeKey::Effect(id) => self.effects.insert(id.clone()),
            NodeKey::Resource(id) => self.resources.insert(id.clone()),
        };
    }

    pub fn len(&self) -> usize {
        self.sources.len() + self.effects.len() + self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A node of the dependency graph. Effect and resource nodes have empty
/// `provides` / `depends_on`; only sources contribute or read values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyNode {
    pub key: NodeKey,
    pub provides: Provides,
    pub depends_on: DependsOn,
    pub dependents: Dependents,
}

impl DependencyNode {
    fn new(key: NodeKey) -> Self {
        Self {
            key,
            provides: Provides::default(),
            depends_on: DependsOn::default(),
            dependents: Dependents::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// DependencyGraph
// ---------------------------------------------------------------------------

/// The provides / depends-on DAG over sources, effects and resources.
///
/// An edge `X -> Y` means "Y must be invalidated when X changes":
/// - a source points at every effect and resource it provides,
/// - an effect points at every source whose modifiers read it,
/// - a source also points directly at every source reading an effect it
///   provides.
///
/// Built once by [`DependencyGraph::build`]; a graph with a cycle is never
/// returned.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: SlotMap<NodeId, DependencyNode>,
    index: HashMap<NodeKey, NodeId>,
    /// Outgoing invalidation edges, in insertion order, without duplicates.
    adjacency: SecondaryMap<NodeId, Vec<NodeId>>,
    /// Every `(from, to)` pair in `adjacency`.
    edges: HashSet<(NodeId, NodeId)>,
    /// Insertion order of nodes, for deterministic traversal.
    order: Vec<NodeId>,
    effect_providers: HashMap<EffectId, Vec<SourceId>>,
    resource_providers: HashMap<ResourceId, Vec<SourceId>>,
    /// effect -> sources whose modifiers list it in `deps`.
    effect_dependents: HashMap<EffectId, Vec<SourceId>>,
}

impl DependencyGraph {
    /// Build the graph from every registered source and effect, rejecting
    /// cycles and malformed dependency slots.
    pub fn build(registry: &Registry) -> Result<Self, GraphError> {
        let mut graph = Self::default();

        // Source nodes: provides and depends-on.
        for source in registry.sources() {
            let mut node = DependencyNode::new(NodeKey::Source(source.id.clone()));
            for (category, target, modifier) in source.modifiers.iter() {
                if let Some(slot) = modifier.formula.max_slot()
                    && slot >= modifier.deps.len()
                {
                    return Err(GraphError::DependencySlotOutOfRange {
                        source_id: source.id.clone(),
                        category,
                        target: target.to_string(),
                        slot,
                        deps: modifier.deps.len(),
                    });
                }

                match category {
                    ModifierCategory::Effect(_) => {
                        let effect = EffectId::from(target);
                        if !registry.is_effect_registered(effect.as_str()) {
                            tracing::warn!(
                                source = %source.id,
                                effect = %effect,
                                "modifier targets an unregistered effect"
                            );
                        }
                        node.provides.effects.insert(effect);
                    }
                    ModifierCategory::Resource(_) => {
                        node.provides.resources.insert(ResourceId::from(target));
                    }
                }
                node.depends_on.effects.extend(modifier.deps.iter().cloned());
            }
            graph.insert_node(node);
        }

        let source_keys: Vec<NodeId> = graph.order.clone();

        // Baseline holders and referenced targets.
        for effect in registry.effects() {
            graph.ensure_node(NodeKey::Effect(effect.id.clone()));
        }
        for &sid in &source_keys {
            let node = &graph.nodes[sid];
            let mut referenced: Vec<NodeKey> = Vec::new();
            referenced.extend(node.provides.effects.iter().cloned().map(NodeKey::Effect));
            referenced.extend(node.provides.resources.iter().cloned().map(NodeKey::Resource));
            for dep in &node.depends_on.effects {
                if !registry.is_effect_registered(dep.as_str()) {
                    tracing::warn!(
                        source = %node.key,
                        effect = %dep,
                        "modifier depends on an unregistered effect; it resolves to 0"
                    );
                }
                referenced.push(NodeKey::Effect(dep.clone()));
            }
            for key in referenced {
                graph.ensure_node(key);
            }
        }

        // Provider and reverse-dependency indexes.
        for &sid in &source_keys {
            let node = &graph.nodes[sid];
            let NodeKey::Source(source_id) = &node.key else {
                continue;
            };
            for effect in &node.provides.effects {
                graph
                    .effect_providers
                    .entry(effect.clone())
                    .or_default()
                    .push(source_id.clone());
            }
            for resource in &node.provides.resources {
                graph
                    .resource_providers
                    .entry(resource.clone())
                    .or_default()
                    .push(source_id.clone());
            }
            for dep in &node.depends_on.effects {
                graph
                    .effect_dependents
                    .entry(dep.clone())
                    .or_default()
                    .push(source_id.clone());
            }
        }

        // Wire dependents.
        for &sid in &source_keys {
            let (key, deps, provided_effects, provided_resources) = {
                let node = &graph.nodes[sid];
                (
                    node.key.clone(),
                    node.depends_on.effects.iter().cloned().collect::<Vec<_>>(),
                    node.provides.effects.iter().cloned().collect::<Vec<_>>(),
                    node.provides.resources.iter().cloned().collect::<Vec<_>>(),
                )
            };
            for dep in deps {
                graph.link_keys(&NodeKey::Effect(dep), &key);
            }
            for effect in provided_effects {
                graph.link(sid, &NodeKey::Effect(effect.clone()));
                let readers = graph
                    .effect_dependents
                    .get(&effect)
                    .cloned()
                    .unwrap_or_default();
                for reader in readers {
                    graph.link(sid, &NodeKey::Source(reader));
                }
            }
            for resource in provided_resources {
                graph.link(sid, &NodeKey::Resource(resource));
            }
        }

        let cycles = graph.detect_cycles();
        if !cycles.is_empty() {
            let err = GraphError::CyclicDependency { cycles };
            tracing::error!(%err, "dependency graph rejected");
            return Err(err);
        }

        tracing::info!(
            nodes = graph.nodes.len(),
            sources = registry.source_count(),
            effects = registry.effect_count(),
            resources = graph.resource_providers.len(),
            "dependency graph built"
        );
        Ok(graph)
    }

    fn insert_node(&mut self, node: DependencyNode) -> NodeId {
        let key = node.key.clone();
        let id = self.nodes.insert(node);
        self.adjacency.insert(id, Vec::new());
        self.index.insert(key, id);
        self.order.push(id);
        id
    }

    fn ensure_node(&mut self, key: NodeKey) -> NodeId {
        match self.index.get(&key) {
            Some(&id) => id,
            None => self.insert_node(DependencyNode::new(key)),
        }
    }

    /// Record `to` as a dependent of `from`.
    fn link(&mut self, from: NodeId, to: &NodeKey) {
        let Some(&to_id) = self.index.get(to) else {
            return;
        };
        if to_id == from {
            return;
        }
        if !self.edges.insert((from, to_id)) {
            return;
        }
        if let Some(edges) = self.adjacency.get_mut(from) {
            edges.push(to_id);
            self.nodes[from].dependents.insert(to);
        }
    }

    fn link_keys(&mut self, from: &NodeKey, to: &NodeKey) {
        if let Some(&from_id) = self.index.get(from) {
            self.link(from_id, to);
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn node(&self, key: &NodeKey) -> Option<&DependencyNode> {
        self.index.get(key).and_then(|&id| self.nodes.get(id))
    }

    pub fn contains(&self, key: &NodeKey) -> bool {
        self.index.contains_key(key)
    }

    /// All nodes in insertion order: sources first, then effects, then
    /// resources and effects first seen as modifier targets.
    pub fn nodes(&self) -> impl Iterator<Item = &DependencyNode> {
        self.order.iter().map(|&id| &self.nodes[id])
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Sources contributing to `effect`, in registration order.
    pub fn effect_providers(&self, effect: &str) -> &[SourceId] {
        self.effect_providers
            .get(effect)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Sources contributing to `resource`, in registration order.
    pub fn resource_providers(&self, resource: &str) -> &[SourceId] {
        self.resource_providers
            .get(resource)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Sources whose modifiers read `effect`.
    pub fn effect_dependents(&self, effect: &str) -> &[SourceId] {
        self.effect_dependents
            .get(effect)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Every resource id some source contributes to.
    pub fn resources(&self) -> impl Iterator<Item = &ResourceId> {
        self.nodes().filter_map(|node| match &node.key {
            NodeKey::Resource(id) => Some(id),
            _ => None,
        })
    }

    // -----------------------------------------------------------------------
    // Cycle detection (iterative DFS)
    // -----------------------------------------------------------------------

    /// Every cycle reachable through the dependents relation.
    ///
    /// Each cycle is reported as the ordered path `[n0, n1, ..., nk]` where
    /// `nk -> n0` is the edge closing the loop.
    pub fn detect_cycles(&self) -> Vec<Vec<NodeKey>> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Mark {
            Unvisited,
            OnStack,
            Done,
        }

        let mut mark: SecondaryMap<NodeId, Mark> = SecondaryMap::new();
        let mut depth: SecondaryMap<NodeId, usize> = SecondaryMap::new();
        for &id in &self.order {
            mark.insert(id, Mark::Unvisited);
        }

        let mut cycles = Vec::new();
        let mut frames: Vec<(NodeId, usize)> = Vec::new();

        for &root in &self.order {
            if mark.get(root) != Some(&Mark::Unvisited) {
                continue;
            }
            mark.insert(root, Mark::OnStack);
            depth.insert(root, 0);
            frames.push((root, 0));

            while let Some(frame) = frames.last_mut() {
                let node = frame.0;
                let next = self
                    .adjacency
                    .get(node)
                    .and_then(|edges| edges.get(frame.1))
                    .copied();
                frame.1 += 1;

                match next {
                    Some(child) => match mark.get(child).copied() {
                        Some(Mark::Unvisited) => {
                            mark.insert(child, Mark::OnStack);
                            depth.insert(child, frames.len());
                            frames.push((child, 0));
                        }
                        Some(Mark::OnStack) => {
                            let start = depth.get(child).copied().unwrap_or(0);
                            let cycle = frames[start..]
                                .iter()
                                .map(|&(id, _)| self.nodes[id].key.clone())
                                .collect();
                            cycles.push(cycle);
                        }
                        _ => {}
                    },
                    None => {
                        mark.insert(node, Mark::Done);
                        frames.pop();
                    }
                }
            }
        }

        cycles
    }

    // -----------------------------------------------------------------------
    // Invalidation closure (BFS)
    // -----------------------------------------------------------------------

    /// The invalidation set of a mutation to `source`: the source itself
    /// followed by everything transitively downstream of it, in BFS order.
    ///
    /// Returns an empty list for a source the graph does not know.
    pub fn update_order(&self, source: &str) -> Vec<NodeKey> {
        let Some(&start) = self.index.get(&NodeKey::Source(SourceId::from(source))) else {
            return Vec::new();
        };

        let mut seen: SecondaryMap<NodeId, ()> = SecondaryMap::new();
        let mut queue: VecDeque<NodeId> = VecDeque::new();
        let mut order = Vec::new();
        seen.insert(start, ());
        queue.push_back(start);

        while let Some(id) = queue.pop_front() {
            let node = &self.nodes[id];
            order.push(node.key.clone());

            let mut next: Vec<NodeId> = Vec::new();
            for effect in &node.provides.effects {
                // The provided effect itself, then every source reading it.
                next.extend(self.index.get(&NodeKey::Effect(effect.clone())).copied());
                for reader in self.effect_dependents(effect.as_str()) {
                    next.extend(self.index.get(&NodeKey::Source(reader.clone())).copied());
                }
            }
            for resource in &node.provides.resources {
                next.extend(self.index.get(&NodeKey::Resource(resource.clone())).copied());
            }
            if let Some(edges) = self.adjacency.get(id) {
                next.extend(edges.iter().copied());
            }

            for child in next {
                if seen.insert(child, ()).is_none() {
                    queue.push_back(child);
                }
            }
        }

        order
    }

    // -----------------------------------------------------------------------
    // Topological order (Kahn's algorithm)
    // -----------------------------------------------------------------------

    /// All nodes ordered so that every node comes after everything it
    /// depends on. Ties keep insertion order.
    pub fn evaluation_order(&self) -> Vec<NodeKey> {
        let mut in_degree: SecondaryMap<NodeId, usize> = SecondaryMap::new();
        for &id in &self.order {
            in_degree.insert(id, 0);
        }
        for (_, edges) in &self.adjacency {
            for &to in edges {
                if let Some(deg) = in_degree.get_mut(to) {
                    *deg += 1;
                }
            }
        }

        let mut queue: VecDeque<NodeId> = self
            .order
            .iter()
            .copied()
            .filter(|&id| in_degree.get(id) == Some(&0))
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(id) = queue.pop_front() {
            order.push(self.nodes[id].key.clone());
            let Some(edges) = self.adjacency.get(id) else {
                continue;
            };
            for &dest in edges {
                if let Some(deg) = in_degree.get_mut(dest) {
                    *deg -= 1;
                    if *deg == 0 {
                        queue.push_back(dest);
                    }
                }
            }
        }

        order
    }
}
