//! Facet scope resolution
//!
//! A browse or report request is scoped to a node of the content hierarchy.
//! Each node may carry a custom facet-set name; the effective configuration
//! for a node is its own, else the nearest configured ancestor's, else the
//! site-wide default. A single upward walk, no merging across levels.

use moka::sync::Cache;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::hierarchy::ContentArena;

/// Resolved facet configuration for a scope node.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ScopeConfig {
    /// Node whose configuration was selected; `None` for the site default.
    pub source_node: Option<Uuid>,
    pub facet_set: String,
}

#[derive(Debug, Error)]
pub enum ScopeError {
    #[error("unknown scope node {0}")]
    UnknownNode(Uuid),
}

/// Resolves the facet configuration a scope node inherits.
pub struct ScopeResolver {
    arena: Arc<ContentArena>,
    default_facet_set: String,
    cache: Cache<Uuid, ScopeConfig>,
}

impl ScopeResolver {
    pub fn new(arena: Arc<ContentArena>, default_facet_set: &str) -> Self {
        Self {
            arena,
            default_facet_set: default_facet_set.to_string(),
            cache: Cache::new(10_000),
        }
    }

    /// Nearest-ancestor resolution: the node's own facet set wins, then the
    /// closest configured ancestor, then the site default.
    pub fn resolve(&self, node_id: Uuid) -> Result<ScopeConfig, ScopeError> {
        if let Some(hit) = self.cache.get(&node_id) {
            return Ok(hit);
        }
        if !self.arena.contains(node_id) {
            return Err(ScopeError::UnknownNode(node_id));
        }

        let config = self
            .arena
            .walk_up(node_id)
            .find_map(|node| {
                node.facet_set.as_ref().map(|set| ScopeConfig {
                    source_node: Some(node.id),
                    facet_set: set.clone(),
                })
            })
            .unwrap_or_else(|| ScopeConfig {
                source_node: None,
                facet_set: self.default_facet_set.clone(),
            });

        self.cache.insert(node_id, config.clone());
        Ok(config)
    }
}
