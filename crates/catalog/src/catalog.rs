//! Catalog - the compiled set of resources handed to the engine
//!
//! A catalog lists resources in declaration order, the relationships
//! between them and which containers hold which resources. The engine never
//! runs a catalog directly: [`Catalog::relationship_graph`] flattens it into
//! a graph of concrete resources first.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::graph::{ResourceGraph, VertexId};
use crate::resource::{Placeholder, Resource, SharedResource};
use crate::types::EdgeLabel;

/// A relationship between two declared resources
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    pub source: String,
    pub target: String,
    pub label: EdgeLabel,
}

/// Resources, relationships and containment for one run
#[derive(Debug, Default)]
pub struct Catalog {
    resources: Vec<SharedResource>,
    index: HashMap<String, usize>,
    relationships: Vec<Relationship>,
    containment: BTreeMap<usize, Vec<usize>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a resource; references must be unique
    pub fn add_resource(&mut self, resource: SharedResource) -> Result<()> {
        let reference = resource.reference();
        if self.index.contains_key(&reference) {
            return Err(Error::DuplicateResource(reference));
        }
        self.index.insert(reference, self.resources.len());
        self.resources.push(resource);
        Ok(())
    }

    /// Declare that `source` comes before `target`
    pub fn add_relationship(&mut self, source: &str, target: &str, label: EdgeLabel) -> Result<()> {
        self.position(source)?;
        self.position(target)?;
        let relationship = Relationship {
            source: source.to_string(),
            target: target.to_string(),
            label,
        };
        if !self.relationships.contains(&relationship) {
            self.relationships.push(relationship);
        }
        Ok(())
    }

    /// Put `child` inside `container`
    pub fn contain(&mut self, container: &str, child: &str) -> Result<()> {
        let container = self.position(container)?;
        let child = self.position(child)?;
        let children = self.containment.entry(container).or_default();
        if !children.contains(&child) {
            children.push(child);
        }
        Ok(())
    }

    /// Look up a resource by reference
    pub fn find(&self, reference: &str) -> Option<&SharedResource> {
        self.index.get(reference).map(|i| &self.resources[*i])
    }

    /// Resources in declaration order
    pub fn resources(&self) -> impl Iterator<Item = &SharedResource> {
        self.resources.iter()
    }

    pub fn relationships(&self) -> &[Relationship] {
        &self.relationships
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Build the graph the transaction runs
    ///
    /// Vertices are added in declaration order so that independent
    /// resources keep that order. Containers are then spliced out.
    pub fn relationship_graph(&self) -> ResourceGraph<SharedResource> {
        let mut graph = ResourceGraph::new();
        let ids: Vec<VertexId> = self
            .resources
            .iter()
            .map(|resource| graph.add_vertex(Arc::clone(resource)))
            .collect();

        for relationship in &self.relationships {
            let (Some(source), Some(target)) = (
                self.index.get(&relationship.source),
                self.index.get(&relationship.target),
            ) else {
                continue;
            };
            graph.add_edge(ids[*source], ids[*target], relationship.label.clone());
        }

        let containment: BTreeMap<VertexId, Vec<VertexId>> = self
            .containment
            .iter()
            .map(|(container, children)| (ids[*container], children.iter().map(|c| ids[*c]).collect()))
            .collect();

        graph.splice(
            &containment,
            |resource| resource.is_container(),
            |container| Arc::new(Placeholder::new(container.as_ref())) as SharedResource,
        );
        log::debug!(
            "Relationship graph has {} resources and {} edges",
            graph.len(),
            graph.edge_count()
        );
        graph
    }

    fn position(&self, reference: &str) -> Result<usize> {
        self.index
            .get(reference)
            .copied()
            .ok_or_else(|| Error::UnknownResource(reference.to_string()))
    }
}
