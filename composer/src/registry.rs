use crate::{kind::Kind, node::Node};
use serde_yaml::Value;
use std::{collections::BTreeMap, fmt, sync::Arc};
use tracing::{debug, warn};

/// kind used for `list` entries without a registered constructor
pub const DEFAULT_LIST_KIND: Kind = Kind::AutoManagerChoice;

/// Builds the node for one registered schema key.
pub trait NodeFactory: Send + Sync {
    fn construct(&self, name: &str, schema: Value, defaults: Value, table: &ClassTable) -> Node;
}

impl<F> NodeFactory for F
where
    F: Fn(&str, Value, Value, &ClassTable) -> Node + Send + Sync,
{
    fn construct(&self, name: &str, schema: Value, defaults: Value, table: &ClassTable) -> Node {
        self(name, schema, defaults, table)
    }
}

#[derive(Clone)]
pub enum Constructor {
    Kind(Kind),
    Factory(Arc<dyn NodeFactory>),
}

impl fmt::Debug for Constructor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Kind(kind) => f.debug_tuple("Kind").field(kind).finish(),
            Self::Factory(_) => f.write_str("Factory(..)"),
        }
    }
}

/// Static registry of constructors for schema `list` entries, keyed by the
/// schema key they apply to.
#[derive(Debug, Clone, Default)]
pub struct ClassTable {
    entries: BTreeMap<String, Constructor>,
}

impl ClassTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// build from configured `key -> kind name` pairs
    ///
    /// unknown kind names are logged and left unregistered, so the key falls
    /// back to [`DEFAULT_LIST_KIND`]
    pub fn from_names<'a, I>(names: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        let mut table = Self::new();

        for (key, kind_name) in names {
            match kind_name.parse::<Kind>() {
                Ok(kind) => table.register_kind(key.clone(), kind),
                Err(error) => {
                    warn!(key = %key, "{error}, falling back to {DEFAULT_LIST_KIND}");
                }
            }
        }

        table
    }

    pub fn register_kind(&mut self, key: impl Into<String>, kind: Kind) {
        self.entries.insert(key.into(), Constructor::Kind(kind));
    }

    pub fn register_factory(&mut self, key: impl Into<String>, factory: impl NodeFactory + 'static) {
        self.entries
            .insert(key.into(), Constructor::Factory(Arc::new(factory)));
    }

    pub fn with_kind(mut self, key: impl Into<String>, kind: Kind) -> Self {
        self.register_kind(key, kind);
        self
    }

    pub fn with_factory(mut self, key: impl Into<String>, factory: impl NodeFactory + 'static) -> Self {
        self.register_factory(key, factory);
        self
    }

    /// construct the node for the `list` entry `name`
    pub fn construct(&self, name: &str, schema: Value, defaults: Value) -> Node {
        match self.entries.get(name) {
            Some(Constructor::Kind(kind)) => Node::new(*kind, name, schema, defaults, self),
            Some(Constructor::Factory(factory)) => factory.construct(name, schema, defaults, self),
            None => {
                debug!(name = %name, "No constructor registered, using {DEFAULT_LIST_KIND}");
                Node::new(DEFAULT_LIST_KIND, name, schema, defaults, self)
            }
        }
    }
}
