use serde::{Deserialize, Serialize};
use slotmap::new_key_type;
use std::borrow::Borrow;
use std::fmt;

new_key_type! {
    /// Identifies a node in the dependency graph.
    pub struct NodeId;
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id! {
    /// Identifies a bonus source (building, upgrade, drone...) in the registry.
    SourceId
}

string_id! {
    /// Identifies an effect: a named derived scalar with a baseline value.
    EffectId
}

string_id! {
    /// Identifies a resource target. Resources are never declared; they exist
    /// only because some modifier points at them.
    ResourceId
}

/// The kind of entity a graph node stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Source,
    Effect,
    Resource,
}

/// Typed key of a dependency graph node.
///
/// Sources, effects and resources live in separate namespaces, so a source
/// and an effect may share the same string id without colliding.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NodeKey {
    Source(SourceId),
    Effect(EffectId),
    Resource(ResourceId),
}

impl NodeKey {
    pub fn kind(&self) -> NodeKind {
        match self {
            NodeKey::Source(_) => NodeKind::Source,
            NodeKey::Effect(_) => NodeKind::Effect,
            NodeKey::Resource(_) => NodeKind::Resource,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            NodeKey::Source(id) => id.as_str(),
            NodeKey::Effect(id) => id.as_str(),
            NodeKey::Resource(id) => id.as_str(),
        }
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKey::Source(id) => write!(f, "source:{id}"),
            NodeKey::Effect(id) => write!(f, "effect:{id}"),
            NodeKey::Resource(id) => write!(f, "resource:{id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_ids_compare_by_value() {
        let a = EffectId::from("speed");
        let b = EffectId::new(String::from("speed"));
        let c = EffectId::from("mining");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn node_keys_keep_namespaces_apart() {
        let source = NodeKey::Source(SourceId::from("drill"));
        let effect = NodeKey::Effect(EffectId::from("drill"));
        assert_ne!(source, effect);
        assert_eq!(source.as_str(), effect.as_str());
        assert_eq!(source.kind(), NodeKind::Source);
        assert_eq!(effect.kind(), NodeKind::Effect);
    }

    #[test]
    fn node_key_display_is_prefixed() {
        let key = NodeKey::Resource(ResourceId::from("energy"));
        assert_eq!(key.to_string(), "resource:energy");
    }

    #[test]
    fn ids_look_up_by_str() {
        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert(EffectId::from("speed"), 2.0);
        assert_eq!(map.get("speed"), Some(&2.0));
    }

    #[test]
    fn ids_are_hashable() {
        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert(SourceId::from("upgrade1"), 1);
        map.insert(SourceId::from("upgrade2"), 2);
        assert_eq!(map[&SourceId::from("upgrade1")], 1);
    }
}
