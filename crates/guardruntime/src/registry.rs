use guardcore::{NodeCategory, NodeMetadata, SecurityNode, WorkflowNode};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

struct RegistryEntry {
    node: Arc<dyn SecurityNode>,
    metadata: NodeMetadata,
}

/// Catalog of node instances keyed by node id.
///
/// Constructed once at startup and shared behind an `Arc`; all lookups
/// return `None` rather than failing.
pub struct NodeRegistry {
    entries: RwLock<HashMap<String, RegistryEntry>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Register a node, deriving its metadata.
    ///
    /// A duplicate id replaces the existing node (last registration wins);
    /// the replaced metadata is returned.
    pub fn register(&self, node: Arc<dyn SecurityNode>) -> Option<NodeMetadata> {
        let metadata = derive_metadata(node.as_ref());
        let id = metadata.id.clone();

        let previous = self
            .write()
            .insert(id.clone(), RegistryEntry { node, metadata })
            .map(|entry| entry.metadata);

        match &previous {
            Some(_) => tracing::warn!(node_id = %id, "Replacing previously registered node"),
            None => tracing::info!(node_id = %id, "Registering node"),
        }
        previous
    }

    pub fn unregister(&self, id: &str) -> bool {
        let removed = self.write().remove(id).is_some();
        if removed {
            tracing::info!(node_id = %id, "Unregistered node");
        }
        removed
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn SecurityNode>> {
        self.read().get(id).map(|entry| Arc::clone(&entry.node))
    }

    pub fn metadata(&self, id: &str) -> Option<NodeMetadata> {
        self.read().get(id).map(|entry| entry.metadata.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// All metadata, ordered by id
    pub fn list(&self) -> Vec<NodeMetadata> {
        self.collect(|_| true)
    }

    pub fn list_enabled(&self) -> Vec<NodeMetadata> {
        self.collect(|m| m.enabled)
    }

    /// Case-insensitive substring match over name, description and tags
    pub fn search(&self, query: &str) -> Vec<NodeMetadata> {
        let needle = query.to_lowercase();
        self.collect(|m| {
            m.name.to_lowercase().contains(&needle)
                || m.description.to_lowercase().contains(&needle)
                || m.tags.iter().any(|t| t.to_lowercase().contains(&needle))
        })
    }

    pub fn by_category(&self, category: NodeCategory) -> Vec<NodeMetadata> {
        self.collect(|m| m.category == category)
    }

    pub fn by_type(&self, node_type: &str) -> Vec<NodeMetadata> {
        self.collect(|m| m.node_type == node_type)
    }

    /// Registry id for a workflow node: its explicit reference, else a node
    /// registered under its type, else the first node declaring that type.
    pub fn resolve(&self, node: &WorkflowNode) -> String {
        if node.node_ref.is_some() || self.contains(node.registry_id()) {
            return node.registry_id().to_string();
        }
        self.by_type(&node.node_type)
            .into_iter()
            .next()
            .map(|m| m.id)
            .unwrap_or_else(|| node.node_type.clone())
    }

    /// Mark a node enabled. Advisory only, the factory does not enforce it.
    pub fn enable(&self, id: &str) -> bool {
        self.set_enabled(id, true)
    }

    pub fn disable(&self, id: &str) -> bool {
        self.set_enabled(id, false)
    }

    /// True iff every required input of `target_id` is among the declared
    /// outputs of `source_id`. Name-based only.
    pub fn is_compatible(&self, source_id: &str, target_id: &str) -> bool {
        let entries = self.read();
        let (Some(source), Some(target)) = (entries.get(source_id), entries.get(target_id)) else {
            return false;
        };

        let outputs: Vec<&str> = source.metadata.schema.output_names().collect();
        let compatible = target
            .metadata
            .schema
            .required_input_names()
            .all(|name| outputs.contains(&name));
        compatible
    }

    fn set_enabled(&self, id: &str, enabled: bool) -> bool {
        match self.write().get_mut(id) {
            Some(entry) => {
                entry.metadata.enabled = enabled;
                tracing::debug!(node_id = %id, enabled, "Node enabled flag changed");
                true
            }
            None => false,
        }
    }

    fn collect(&self, filter: impl Fn(&NodeMetadata) -> bool) -> Vec<NodeMetadata> {
        let mut found: Vec<NodeMetadata> = self
            .read()
            .values()
            .map(|entry| &entry.metadata)
            .filter(|m| filter(m))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        found
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, RegistryEntry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, RegistryEntry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn derive_metadata(node: &dyn SecurityNode) -> NodeMetadata {
    let descriptor = node.descriptor();

    let mut tags: Vec<String> = Vec::new();
    for tag in category_tags(descriptor.category)
        .iter()
        .copied()
        .chain(std::iter::once(descriptor.node_type.as_str()))
    {
        if !tags.iter().any(|t| t == tag) {
            tags.push(tag.to_string());
        }
    }

    NodeMetadata {
        icon: category_icon(descriptor.category).to_string(),
        enterprise: descriptor.category != NodeCategory::Core,
        enabled: true,
        schema: node.schema(),
        tags,
        id: descriptor.id,
        category: descriptor.category,
        node_type: descriptor.node_type,
        name: descriptor.name,
        description: descriptor.description,
        version: descriptor.version,
    }
}

fn category_tags(category: NodeCategory) -> &'static [&'static str] {
    match category {
        NodeCategory::Core => &["core", "security", "detection"],
        NodeCategory::Soar => &["soar", "automation", "response"],
        NodeCategory::Cloud => &["cloud", "infrastructure"],
        NodeCategory::AiMl => &["ai", "ml", "analysis"],
        NodeCategory::Integration => &["integration", "threat-intel", "enrichment"],
        NodeCategory::Mitre => &["mitre", "att&ck", "classification"],
    }
}

fn category_icon(category: NodeCategory) -> &'static str {
    match category {
        NodeCategory::Core => "shield",
        NodeCategory::Soar => "zap",
        NodeCategory::Cloud => "cloud",
        NodeCategory::AiMl => "brain",
        NodeCategory::Integration => "plug",
        NodeCategory::Mitre => "target",
    }
}
