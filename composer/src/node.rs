mod options;
mod routing;

pub use routing::first_segment;

use crate::{
    kind::{Kind, Population},
    registry::ClassTable,
    template::Templates,
    tree::{self, LIST},
};
use serde_yaml::Value;
use tracing::{debug, warn};

/// A single node of the composer tree.
///
/// Schema, defaults and templates are fixed once the node is built; every
/// later operation only reads them, so one tree can be shared by concurrent
/// requests without locking.
#[derive(Debug, Clone)]
pub struct Node {
    name: String,
    kind: Kind,
    schema: Value,
    defaults: Value,
    templates: Templates,
    children: Vec<Node>,
}

impl Node {
    /// build a node of `kind` and, depending on the kind, its children
    pub fn new(
        kind: Kind,
        name: impl Into<String>,
        schema: Value,
        defaults: Value,
        table: &ClassTable,
    ) -> Self {
        let defaults = match defaults {
            Value::Null => tree::empty(),
            defaults => defaults,
        };
        let mut node = Self {
            name: name.into(),
            kind,
            templates: Templates::layered(&schema, &defaults),
            schema,
            defaults,
            children: Vec::new(),
        };

        debug!(
            name = %node.name,
            kind = %node.kind,
            templates = node.templates.len(),
            "Building composer node"
        );

        match kind.population() {
            Population::Explicit => {}
            Population::FromSchema => node.populate_from_schema(table),
            Population::FromDefaults => node.populate_from_defaults(table),
        }

        node
    }

    pub fn leaf(name: impl Into<String>, schema: Value, defaults: Value) -> Self {
        Self::new(Kind::Leaf, name, schema, defaults, &ClassTable::new())
    }

    /// add a child, replacing an existing child of the same name
    pub fn push_child(&mut self, child: Node) {
        match self.children.iter_mut().find(|existing| existing.name == child.name) {
            Some(existing) => {
                warn!(parent = %self.name, child = %child.name, "Replacing child with duplicate name");
                *existing = child;
            }
            None => self.children.push(child),
        }
    }

    pub fn with_child(mut self, child: Node) -> Self {
        self.push_child(child);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn defaults(&self) -> &Value {
        &self.defaults
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    pub fn child(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|child| child.name == name)
    }

    /// depth first search for a node named `name`, starting with `self`
    pub fn find(&self, name: &str) -> Option<&Node> {
        if self.name == name {
            return Some(self);
        }

        self.children.iter().find_map(|child| child.find(name))
    }

    fn populate_from_schema(&mut self, table: &ClassTable) {
        let Some(schema) = self.schema.as_mapping() else {
            return;
        };
        let mut children = Vec::new();

        for (key, child_schema) in schema {
            let Some(child_name) = tree::key_string(key) else {
                warn!(parent = %self.name, key = ?key, "Skipping schema entry with a non scalar key");
                continue;
            };
            if tree::is_reserved(&child_name) {
                continue;
            }
            let is_list = tree::has_key(child_schema, LIST);

            match self.defaults.get(child_name.as_str()) {
                Some(child_defaults) if is_list => {
                    children.push(table.construct(
                        &child_name,
                        child_schema.clone(),
                        child_defaults.clone(),
                    ));
                }
                Some(child_defaults) => {
                    debug!(parent = %self.name, "Handling leaf item {child_name}");
                    children.push(Node::new(
                        Kind::Leaf,
                        child_name,
                        child_schema.clone(),
                        child_defaults.clone(),
                        table,
                    ));
                }
                None if is_list => {
                    debug!(parent = %self.name, "Skipping list item {child_name}: in schema but not in defaults");
                }
                None => {
                    debug!(parent = %self.name, "Adding leaf item {child_name} without defaults");
                    children.push(Node::new(
                        Kind::Leaf,
                        child_name,
                        child_schema.clone(),
                        tree::empty(),
                        table,
                    ));
                }
            }
        }

        for child in children {
            self.push_child(child);
        }
    }

    fn populate_from_defaults(&mut self, table: &ClassTable) {
        let Some(list_schema) = self.schema.get(LIST).cloned() else {
            debug!(name = %self.name, "No list schema, nothing to manage");
            return;
        };
        let Some(defaults) = self.defaults.as_mapping().cloned() else {
            return;
        };

        for (key, child_defaults) in defaults {
            let Some(child_name) = tree::key_string(&key) else {
                continue;
            };
            if tree::is_reserved(&child_name) {
                continue;
            }

            debug!(parent = %self.name, "Handling managed child {child_name}");
            self.push_child(Node::new(
                Kind::ManagedChoice,
                child_name,
                list_schema.clone(),
                child_defaults,
                table,
            ));
        }
    }
}
