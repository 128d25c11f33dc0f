//! Tree model exchanged between producer and consumer.
//!
//! `ComponentRef` only exists while the renderer walks a tree; every other
//! variant has a wire form.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::DecodeError;

/// Props of an element or component. Ordered so that equal props always
/// serialize to the same text.
pub type Props = BTreeMap<String, Node>;

/// Prefix of every placeholder id allocated by a render session.
pub const PLACEHOLDER_PREFIX: &str = "C:";

#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
}

/// Where a component reference gets expanded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resolution {
    /// Expanded by the producer during the render walk.
    Server,
    /// Passed through as a `LazyRef` and loaded by the consumer.
    Client,
}

/// Identifier of a forward reference, `C:<n>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PlaceholderId(String);

impl PlaceholderId {
    pub fn new(sequence: u64) -> Self {
        Self(format!("{}{}", PLACEHOLDER_PREFIX, sequence))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Allocation sequence number, if the id was minted by a render session.
    pub fn sequence(&self) -> Option<u64> {
        self.0.strip_prefix(PLACEHOLDER_PREFIX)?.parse().ok()
    }
}

impl fmt::Display for PlaceholderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Ids coming off the wire are opaque strings; ordering only matters for the
// ones we mint ourselves.
impl FromStr for PlaceholderId {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || s == "base" {
            return Err(DecodeError::InvalidPlaceholderId(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Leaf(Scalar),
    Sequence(Vec<Node>),
    Element {
        tag: String,
        props: Props,
        children: Box<Node>,
    },
    ComponentRef {
        name: String,
        props: Props,
        resolution: Resolution,
    },
    Placeholder {
        id: PlaceholderId,
    },
    LazyRef {
        name: String,
        props: Props,
    },
}

impl Node {
    pub fn null() -> Self {
        Node::Leaf(Scalar::Null)
    }

    pub fn text(s: impl Into<String>) -> Self {
        Node::Leaf(Scalar::String(s.into()))
    }

    pub fn bool(b: bool) -> Self {
        Node::Leaf(Scalar::Bool(b))
    }

    pub fn number(n: impl Into<serde_json::Number>) -> Self {
        Node::Leaf(Scalar::Number(n.into()))
    }

    pub fn element(tag: impl Into<String>, props: Props, children: Node) -> Self {
        Node::Element {
            tag: tag.into(),
            props,
            children: Box::new(children),
        }
    }

    pub fn server(name: impl Into<String>, props: Props) -> Self {
        Node::ComponentRef {
            name: name.into(),
            props,
            resolution: Resolution::Server,
        }
    }

    pub fn client(name: impl Into<String>, props: Props) -> Self {
        Node::ComponentRef {
            name: name.into(),
            props,
            resolution: Resolution::Client,
        }
    }

    pub fn placeholder(id: PlaceholderId) -> Self {
        Node::Placeholder { id }
    }

    pub fn lazy(name: impl Into<String>, props: Props) -> Self {
        Node::LazyRef {
            name: name.into(),
            props,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf(_))
    }

    /// Placeholder ids present in the tree, in document order.
    pub fn placeholders(&self) -> Vec<PlaceholderId> {
        let mut ids = Vec::new();
        self.collect_placeholders(&mut ids);
        ids
    }

    fn collect_placeholders(&self, ids: &mut Vec<PlaceholderId>) {
        match self {
            Node::Leaf(_) => {}
            Node::Sequence(items) => {
                for item in items {
                    item.collect_placeholders(ids);
                }
            }
            Node::Element {
                props, children, ..
            } => {
                for value in props.values() {
                    value.collect_placeholders(ids);
                }
                children.collect_placeholders(ids);
            }
            Node::ComponentRef { props, .. } | Node::LazyRef { props, .. } => {
                for value in props.values() {
                    value.collect_placeholders(ids);
                }
            }
            Node::Placeholder { id } => ids.push(id.clone()),
        }
    }

    pub fn contains_placeholder(&self, target: &PlaceholderId) -> bool {
        self.find_placeholder(target).is_some()
    }

    fn find_placeholder(&self, target: &PlaceholderId) -> Option<&Node> {
        match self {
            Node::Placeholder { id } if id == target => Some(self),
            Node::Leaf(_) | Node::Placeholder { .. } => None,
            Node::Sequence(items) => items.iter().find_map(|n| n.find_placeholder(target)),
            Node::Element {
                props, children, ..
            } => props
                .values()
                .find_map(|n| n.find_placeholder(target))
                .or_else(|| children.find_placeholder(target)),
            Node::ComponentRef { props, .. } | Node::LazyRef { props, .. } => {
                props.values().find_map(|n| n.find_placeholder(target))
            }
        }
    }

    /// Substitute the placeholder `target` with `replacement`.
    ///
    /// Returns the replacement back when no such placeholder exists, leaving
    /// the tree untouched.
    pub fn replace_placeholder(
        &mut self,
        target: &PlaceholderId,
        replacement: Node,
    ) -> Result<(), Node> {
        match self.find_placeholder_mut(target) {
            Some(slot) => {
                *slot = replacement;
                Ok(())
            }
            None => Err(replacement),
        }
    }

    fn find_placeholder_mut(&mut self, target: &PlaceholderId) -> Option<&mut Node> {
        if matches!(self, Node::Placeholder { id } if id == target) {
            return Some(self);
        }
        match self {
            Node::Leaf(_) | Node::Placeholder { .. } => None,
            Node::Sequence(items) => items
                .iter_mut()
                .find_map(|n| n.find_placeholder_mut(target)),
            Node::Element {
                props, children, ..
            } => {
                if let Some(found) = props
                    .values_mut()
                    .find_map(|n| n.find_placeholder_mut(target))
                {
                    return Some(found);
                }
                children.find_placeholder_mut(target)
            }
            Node::ComponentRef { props, .. } | Node::LazyRef { props, .. } => props
                .values_mut()
                .find_map(|n| n.find_placeholder_mut(target)),
        }
    }
}

impl From<&str> for Node {
    fn from(s: &str) -> Self {
        Node::text(s)
    }
}

impl From<String> for Node {
    fn from(s: String) -> Self {
        Node::text(s)
    }
}

impl From<Vec<Node>> for Node {
    fn from(items: Vec<Node>) -> Self {
        Node::Sequence(items)
    }
}

/// Build a `Props` map from `(key, node)` pairs.
pub fn props<K, V, I>(pairs: I) -> Props
where
    K: Into<String>,
    V: Into<Node>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}
