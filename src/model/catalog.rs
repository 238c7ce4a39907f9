use serde::{Deserialize, Serialize};

use crate::error::RegistryError;
use crate::model::Id;

/// Path prefix of the organizational root node. Every deployment-level
/// resource hangs somewhere under this path.
pub const ORGANIZATION_ROOT: &str = "3eYRYkJOok6GHrKam0AcAA==";

/// Resource type of "the" server instance node under the organizational root.
pub const RESOURCE_TYPE_SERVER_INSTANCE: &str = "0a4fba0e-bc2b-4e35-b9e4-e62b3226b6a3";
/// Resource type of a tenant project collection.
pub const RESOURCE_TYPE_PROJECT_COLLECTION: &str = "26338d9e-d437-44aa-91f2-55880a328b54";

// Field widths carried over from the relational schema. Values longer than
// these never match anything and are rejected up front.
pub const PARENT_PATH_MAXLEN: usize = 864;
pub const CHILD_SEGMENT_MAXLEN: usize = 24;
pub const RESOURCE_ID_MAXLEN: usize = 36;
pub const DISPLAY_NAME_MAXLEN: usize = 256;
pub const ASSOCIATION_KEY_MAXLEN: usize = 256;

/// Immutable reference data describing what kind of thing a resource is
/// (server instance, project collection, machine, database...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceType {
    pub id: Id,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A cataloged entity, identified independently of where it appears in the
/// node tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: Id,
    pub resource_type: ResourceType,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Links to zero or more property rows.
    pub property_group_id: i32,
}

/// A path-addressed occurrence of a resource in the catalog tree.
///
/// There are no parent pointers: the tree is reconstructed purely from
/// string concatenation, `full_path = parent_path + child_segment`, which is
/// unique across the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogNode {
    pub parent_path: String,
    pub child_segment: String,
    pub resource: Resource,
    pub is_default: bool,
}

impl CatalogNode {
    /// Builds a node, rejecting resources with no type (an invariant
    /// violation coming out of the store).
    pub fn new(
        parent_path: String,
        child_segment: String,
        resource: Resource,
        is_default: bool,
    ) -> Result<Self, RegistryError> {
        if resource.resource_type.id.is_empty() {
            return Err(RegistryError::Internal(format!(
                "resource {} has no type",
                resource.id
            )));
        }

        Ok(Self {
            parent_path,
            child_segment,
            resource,
            is_default,
        })
    }

    pub fn full_path(&self) -> String {
        format!("{}{}", self.parent_path, self.child_segment)
    }
}

/// How deep a path query reaches below the queried path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Depth {
    /// Exact node match only.
    None,
    /// Immediate children only.
    Single,
    /// The entire subtree.
    Full,
}

/// A classified path query: the prefix with any trailing depth marker
/// stripped, plus the depth the marker requested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathSpec {
    pub path: String,
    pub depth: Depth,
}

impl PathSpec {
    /// Classifies a raw caller-supplied path. A `"**"` suffix selects the
    /// whole subtree, a single `"*"` selects immediate children, anything
    /// else is an exact match. Pure string work, no store access.
    pub fn classify(raw: &str) -> Self {
        if let Some(path) = raw.strip_suffix("**") {
            Self {
                path: path.to_string(),
                depth: Depth::Full,
            }
        } else if let Some(path) = raw.strip_suffix('*') {
            Self {
                path: path.to_string(),
                depth: Depth::Single,
            }
        } else {
            Self {
                path: raw.to_string(),
                depth: Depth::None,
            }
        }
    }

    /// True when a node's full path satisfies this spec.
    pub fn matches(&self, full_path: &str, parent_path: &str) -> bool {
        match self.depth {
            Depth::None => full_path == self.path,
            Depth::Single => parent_path == self.path,
            Depth::Full => full_path.starts_with(&self.path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource(id: &str, type_id: &str) -> Resource {
        Resource {
            id: id.to_string(),
            resource_type: ResourceType {
                id: type_id.to_string(),
                display_name: "Test Type".to_string(),
                description: None,
            },
            display_name: "Test Resource".to_string(),
            description: None,
            property_group_id: 0,
        }
    }

    #[test]
    fn classify_strips_full_subtree_marker() {
        let spec = PathSpec::classify("/a/b**");
        assert_eq!(spec.path, "/a/b");
        assert_eq!(spec.depth, Depth::Full);
    }

    #[test]
    fn classify_strips_single_level_marker() {
        let spec = PathSpec::classify("/a/b*");
        assert_eq!(spec.path, "/a/b");
        assert_eq!(spec.depth, Depth::Single);
    }

    #[test]
    fn classify_plain_path_is_exact() {
        let spec = PathSpec::classify("/a/b");
        assert_eq!(spec.path, "/a/b");
        assert_eq!(spec.depth, Depth::None);
    }

    #[test]
    fn classify_bare_markers() {
        assert_eq!(PathSpec::classify("**").depth, Depth::Full);
        assert_eq!(PathSpec::classify("**").path, "");
        assert_eq!(PathSpec::classify("*").depth, Depth::Single);
        assert_eq!(PathSpec::classify("").depth, Depth::None);
    }

    #[test]
    fn full_path_concatenates_parent_and_child() {
        let node = CatalogNode::new(
            "AAAA".to_string(),
            "BBBB".to_string(),
            resource("r1", "t1"),
            false,
        )
        .unwrap();
        assert_eq!(node.full_path(), "AAAABBBB");
    }

    #[test]
    fn node_rejects_untyped_resource() {
        let err = CatalogNode::new("p".to_string(), "c".to_string(), resource("r1", ""), false)
            .unwrap_err();
        assert_eq!(err.code(), "Internal");
    }

    #[test]
    fn spec_match_by_depth() {
        let exact = PathSpec::classify("AAAABBBB");
        assert!(exact.matches("AAAABBBB", "AAAA"));
        assert!(!exact.matches("AAAABBBBCCCC", "AAAABBBB"));

        let single = PathSpec::classify("AAAA*");
        assert!(single.matches("AAAABBBB", "AAAA"));
        assert!(!single.matches("AAAABBBBCCCC", "AAAABBBB"));

        let full = PathSpec::classify("AAAA**");
        assert!(full.matches("AAAA", ""));
        assert!(full.matches("AAAABBBB", "AAAA"));
        assert!(full.matches("AAAABBBBCCCC", "AAAABBBB"));
    }
}
