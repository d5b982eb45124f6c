//! Node records and their cacheable projection.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{HierarchyError, HierarchyResult};
use crate::id::{NodeId, NodeKind};

pub const MAX_CODE_LEN: usize = 100;
pub const MAX_NAME_LEN: usize = 200;
pub const MAX_DESCRIPTION_LEN: usize = 500;

/// A node of the hierarchy (a role, a permission, ...).
///
/// `id` and `code` are unique across active and archived nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Node<K: NodeKind> {
    pub id: NodeId<K>,
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Free-form attributes carried along untouched.
    #[serde(default)]
    pub extensions: Map<String, Value>,
}

impl<K: NodeKind> Node<K> {
    pub fn validate(&self) -> HierarchyResult<()> {
        validate_fields(&self.code, &self.name, &self.description)
    }
}

/// Input for registering a node; the id is optional and generated when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct NewNode<K: NodeKind> {
    #[serde(default)]
    pub id: Option<NodeId<K>>,
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub extensions: Map<String, Value>,
}

impl<K: NodeKind> NewNode<K> {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: None,
            code: code.into(),
            name: name.into(),
            description: String::new(),
            extensions: Map::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<NodeId<K>>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_extension(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extensions.insert(key.into(), value.into());
        self
    }

    pub fn validate(&self) -> HierarchyResult<()> {
        validate_fields(&self.code, &self.name, &self.description)
    }

    /// Materialize the record under its final id.
    pub fn into_node(self, id: NodeId<K>) -> Node<K> {
        Node {
            id,
            code: self.code,
            name: self.name,
            description: self.description,
            extensions: self.extensions,
        }
    }
}

fn validate_fields(code: &str, name: &str, description: &str) -> HierarchyResult<()> {
    if code.trim().is_empty() {
        return Err(HierarchyError::validation("code must not be blank"));
    }
    if code.chars().count() > MAX_CODE_LEN {
        return Err(HierarchyError::validation(format!(
            "code exceeds {MAX_CODE_LEN} characters"
        )));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(HierarchyError::validation(format!(
            "name exceeds {MAX_NAME_LEN} characters"
        )));
    }
    if description.chars().count() > MAX_DESCRIPTION_LEN {
        return Err(HierarchyError::validation(format!(
            "description exceeds {MAX_DESCRIPTION_LEN} characters"
        )));
    }
    Ok(())
}

/// Denormalized read projection held by the cache tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct NodeView<K: NodeKind> {
    pub node: Node<K>,
    /// True iff the node is the ancestor of at least one other node.
    pub has_descendant: bool,
}

/// Listing filter: case-insensitive substring match on code and name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeFilter {
    pub code: Option<String>,
    pub name: Option<String>,
}

impl NodeFilter {
    pub fn by_code(code: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            name: None,
        }
    }

    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            code: None,
            name: Some(name.into()),
        }
    }

    pub fn matches<K: NodeKind>(&self, node: &Node<K>) -> bool {
        fn contains(haystack: &str, needle: &Option<String>) -> bool {
            needle
                .as_deref()
                .map_or(true, |n| haystack.to_lowercase().contains(&n.to_lowercase()))
        }
        contains(&node.code, &self.code) && contains(&node.name, &self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
    struct Badge;

    impl NodeKind for Badge {
        const NAME: &'static str = "badge";
    }

    #[test]
    fn blank_code_is_rejected() {
        let err = NewNode::<Badge>::new("  ", "Blank").validate().unwrap_err();
        assert!(matches!(err, HierarchyError::Validation(msg) if msg.contains("blank")));
    }

    #[test]
    fn oversize_fields_are_rejected() {
        let long_code = "c".repeat(MAX_CODE_LEN + 1);
        assert!(NewNode::<Badge>::new(long_code, "x").validate().is_err());

        let long_name = "n".repeat(MAX_NAME_LEN + 1);
        assert!(NewNode::<Badge>::new("ok", long_name).validate().is_err());

        let long_desc = "d".repeat(MAX_DESCRIPTION_LEN + 1);
        assert!(
            NewNode::<Badge>::new("ok", "ok")
                .with_description(long_desc)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn into_node_keeps_extensions() {
        let node = NewNode::<Badge>::new("gold", "Gold")
            .with_extension("color", "yellow")
            .into_node(NodeId::new(9));
        assert_eq!(node.id.get(), 9);
        assert_eq!(node.extensions["color"], Value::from("yellow"));
    }

    #[test]
    fn filter_is_case_insensitive_substring() {
        let node = NewNode::<Badge>::new("ADMIN.read", "Admin Read").into_node(NodeId::new(1));
        assert!(NodeFilter::by_code("admin").matches(&node));
        assert!(NodeFilter::by_name("read").matches(&node));
        assert!(!NodeFilter::by_code("write").matches(&node));
        assert!(NodeFilter::default().matches(&node));
    }
}
