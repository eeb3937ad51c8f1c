//! Schema driven job script composer.
//!
//! A declarative schema plus site defaults are turned into a tree of
//! [`Node`]s once. The tree exports a nested options document for a user
//! interface and, given a flat set of dotted choices, resolves its templates
//! bottom-up into the final job script.

pub mod choices;
pub mod kind;
pub mod node;
pub mod registry;
pub mod template;
pub mod tree;

pub use choices::{parse_choices, Choices, ComposerError};
pub use kind::{Kind, OptionsShape, Population, Routing};
pub use node::Node;
pub use registry::{ClassTable, Constructor, NodeFactory, DEFAULT_LIST_KIND};
pub use template::{safe_substitute, Substitution, Templates};

/// template name every root node is expected to resolve
pub const SCRIPT: &str = "SCRIPT";
