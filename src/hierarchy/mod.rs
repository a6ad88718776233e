//! Content hierarchy arena
//!
//! Subjects (site, communities, collections, items, bitstreams) live in a
//! flat arena with parent indices rather than live object references, so
//! ancestor walks are plain index chasing and the structure stays acyclic
//! by construction checks at load time.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use thiserror::Error;
use uuid::Uuid;

/// The kind of entity a usage event can be recorded against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectType {
    Site,
    Community,
    Collection,
    Item,
    Bitstream,
}

impl fmt::Display for SubjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SubjectType::Site => "site",
            SubjectType::Community => "community",
            SubjectType::Collection => "collection",
            SubjectType::Item => "item",
            SubjectType::Bitstream => "bitstream",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for SubjectType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "site" => Ok(SubjectType::Site),
            "community" => Ok(SubjectType::Community),
            "collection" => Ok(SubjectType::Collection),
            "item" => Ok(SubjectType::Item),
            "bitstream" => Ok(SubjectType::Bitstream),
            other => Err(format!("unknown subject type '{other}'")),
        }
    }
}

#[derive(Debug, Error)]
pub enum HierarchyError {
    #[error("duplicate node id {0}")]
    DuplicateNode(Uuid),
    #[error("unknown parent {0}")]
    UnknownParent(Uuid),
    #[error("a {child_type} node cannot be a child of a {parent_type} node ({child})")]
    InvalidParent {
        child: Uuid,
        child_type: SubjectType,
        parent_type: SubjectType,
    },
    #[error("node {0} requires a parent")]
    MissingParent(Uuid),
    #[error("hierarchy contains a cycle involving {0}")]
    Cycle(Uuid),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Parse(#[from] serde_json::Error),
}

/// One node of the content hierarchy.
#[derive(Debug, Clone)]
pub struct ContentNode {
    pub id: Uuid,
    pub name: String,
    pub subject_type: SubjectType,
    /// Custom facet-set name configured on this node, if any.
    pub facet_set: Option<String>,
    parent: Option<usize>,
}

/// Serialized form of one node in a site-structure file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub subject_type: SubjectType,
    #[serde(default)]
    pub parent: Option<Uuid>,
    #[serde(default)]
    pub facet_set: Option<String>,
}

/// Arena of content nodes indexed by id.
#[derive(Debug, Default)]
pub struct ContentArena {
    nodes: Vec<ContentNode>,
    by_id: HashMap<Uuid, usize>,
}

impl ContentArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node with a generated id. Parents must be added first.
    pub fn add(
        &mut self,
        subject_type: SubjectType,
        name: &str,
        parent: Option<Uuid>,
        facet_set: Option<&str>,
    ) -> Result<Uuid, HierarchyError> {
        self.add_with_id(Uuid::new_v4(), subject_type, name, parent, facet_set)
    }

    /// Add a node with a caller-provided id. Parents must be added first.
    pub fn add_with_id(
        &mut self,
        id: Uuid,
        subject_type: SubjectType,
        name: &str,
        parent: Option<Uuid>,
        facet_set: Option<&str>,
    ) -> Result<Uuid, HierarchyError> {
        if self.by_id.contains_key(&id) {
            return Err(HierarchyError::DuplicateNode(id));
        }

        let parent_idx = match parent {
            Some(pid) => {
                let idx = *self
                    .by_id
                    .get(&pid)
                    .ok_or(HierarchyError::UnknownParent(pid))?;
                let parent_type = self.nodes[idx].subject_type;
                if !valid_parent(subject_type, parent_type) {
                    return Err(HierarchyError::InvalidParent {
                        child: id,
                        child_type: subject_type,
                        parent_type,
                    });
                }
                Some(idx)
            }
            None => {
                if subject_type != SubjectType::Site {
                    return Err(HierarchyError::MissingParent(id));
                }
                None
            }
        };

        self.nodes.push(ContentNode {
            id,
            name: name.to_string(),
            subject_type,
            facet_set: facet_set.map(str::to_string),
            parent: parent_idx,
        });
        self.by_id.insert(id, self.nodes.len() - 1);
        Ok(id)
    }

    pub fn get(&self, id: Uuid) -> Option<&ContentNode> {
        self.by_id.get(&id).map(|&idx| &self.nodes[idx])
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.by_id.contains_key(&id)
    }

    pub fn subject_type(&self, id: Uuid) -> Option<SubjectType> {
        self.get(id).map(|n| n.subject_type)
    }

    pub fn parent(&self, id: Uuid) -> Option<&ContentNode> {
        let idx = *self.by_id.get(&id)?;
        self.nodes[idx].parent.map(|p| &self.nodes[p])
    }

    /// Iterator over the node itself followed by its ancestors up to the root.
    pub fn walk_up(&self, id: Uuid) -> WalkUp<'_> {
        WalkUp {
            arena: self,
            cur: self.by_id.get(&id).copied(),
        }
    }

    /// Bitstreams directly owned by the given item.
    pub fn bitstreams_of(&self, item: Uuid) -> Vec<&ContentNode> {
        let Some(&item_idx) = self.by_id.get(&item) else {
            return Vec::new();
        };
        self.nodes
            .iter()
            .filter(|n| n.subject_type == SubjectType::Bitstream && n.parent == Some(item_idx))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ContentNode> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Build an arena from serialized node specs, in any order.
    pub fn from_specs(specs: Vec<NodeSpec>) -> Result<Self, HierarchyError> {
        let mut arena = Self::new();

        // First pass: place every node without its parent link.
        for spec in &specs {
            if arena.by_id.contains_key(&spec.id) {
                return Err(HierarchyError::DuplicateNode(spec.id));
            }
            arena.nodes.push(ContentNode {
                id: spec.id,
                name: spec.name.clone(),
                subject_type: spec.subject_type,
                facet_set: spec.facet_set.clone(),
                parent: None,
            });
            arena.by_id.insert(spec.id, arena.nodes.len() - 1);
        }

        // Second pass: resolve and validate parent links.
        for spec in &specs {
            let idx = arena.by_id[&spec.id];
            match spec.parent {
                Some(pid) => {
                    let parent_idx = *arena
                        .by_id
                        .get(&pid)
                        .ok_or(HierarchyError::UnknownParent(pid))?;
                    let parent_type = arena.nodes[parent_idx].subject_type;
                    if !valid_parent(spec.subject_type, parent_type) {
                        return Err(HierarchyError::InvalidParent {
                            child: spec.id,
                            child_type: spec.subject_type,
                            parent_type,
                        });
                    }
                    arena.nodes[idx].parent = Some(parent_idx);
                }
                None => {
                    if spec.subject_type != SubjectType::Site {
                        return Err(HierarchyError::MissingParent(spec.id));
                    }
                }
            }
        }

        // Parent links come from an untrusted file, so prove acyclicity.
        for start in 0..arena.nodes.len() {
            let mut cur = Some(start);
            let mut steps = 0usize;
            while let Some(idx) = cur {
                steps += 1;
                if steps > arena.nodes.len() {
                    return Err(HierarchyError::Cycle(arena.nodes[start].id));
                }
                cur = arena.nodes[idx].parent;
            }
        }

        Ok(arena)
    }

    pub fn from_json_str(json: &str) -> Result<Self, HierarchyError> {
        let specs: Vec<NodeSpec> = serde_json::from_str(json)?;
        Self::from_specs(specs)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, HierarchyError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }
}

fn valid_parent(child: SubjectType, parent: SubjectType) -> bool {
    matches!(
        (child, parent),
        (SubjectType::Community, SubjectType::Site)
            | (SubjectType::Community, SubjectType::Community)
            | (SubjectType::Collection, SubjectType::Community)
            | (SubjectType::Item, SubjectType::Collection)
            | (SubjectType::Bitstream, SubjectType::Item)
    )
}

/// Iterator yielding a node and then each ancestor up to the site root.
pub struct WalkUp<'a> {
    arena: &'a ContentArena,
    cur: Option<usize>,
}

impl<'a> Iterator for WalkUp<'a> {
    type Item = &'a ContentNode;

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.cur?;
        let node = &self.arena.nodes[idx];
        self.cur = node.parent;
        Some(node)
    }
}
