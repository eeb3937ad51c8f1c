use std::{fmt, str::FromStr};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown node kind '{0}'")]
pub struct UnknownKind(pub String);

/// The seven observable node behaviours.
///
/// Each kind is a fixed selection of three orthogonal policies, see
/// [`Kind::population`], [`Kind::options_shape`] and [`Kind::routing`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Leaf,
    Composite,
    Choice,
    AutoChoice,
    ManagedChoice,
    ManagerChoice,
    AutoManagerChoice,
}

/// how children are created at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Population {
    /// children are only added explicitly
    Explicit,
    /// one child per top-level schema key
    FromSchema,
    /// one managed child per defaults key, all sharing `schema.list`
    FromDefaults,
}

/// shape of the exported options document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionsShape {
    /// schema copy with `values` overlaid by the defaults
    Values,
    /// `{child: options}`
    Children,
    /// schema copy with `choices: {child: options}` and no `list`
    Menu,
    /// `{list: {child: options}}`
    Managed,
}

/// how incoming choices reach the children
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routing {
    /// merge choices and resolve own templates
    Merge,
    /// same choices to every child, no own resolution
    Broadcast,
    /// keys go to the child named by their first segment, results are folded
    /// into own resolution
    ByPrefix,
    /// only the child named by `choices[NAME]` is visited
    ActiveChild,
}

impl Kind {
    pub const ALL: [Kind; 7] = [
        Kind::Leaf,
        Kind::Composite,
        Kind::Choice,
        Kind::AutoChoice,
        Kind::ManagedChoice,
        Kind::ManagerChoice,
        Kind::AutoManagerChoice,
    ];

    pub fn population(self) -> Population {
        match self {
            Kind::AutoChoice | Kind::ManagedChoice => Population::FromSchema,
            Kind::AutoManagerChoice => Population::FromDefaults,
            Kind::Leaf | Kind::Composite | Kind::Choice | Kind::ManagerChoice => {
                Population::Explicit
            }
        }
    }

    pub fn options_shape(self) -> OptionsShape {
        match self {
            Kind::Leaf => OptionsShape::Values,
            Kind::Composite | Kind::AutoChoice => OptionsShape::Children,
            Kind::Choice | Kind::ManagerChoice | Kind::AutoManagerChoice => OptionsShape::Menu,
            Kind::ManagedChoice => OptionsShape::Managed,
        }
    }

    pub fn routing(self) -> Routing {
        match self {
            Kind::Leaf => Routing::Merge,
            Kind::Composite | Kind::Choice => Routing::Broadcast,
            Kind::AutoChoice | Kind::ManagedChoice => Routing::ByPrefix,
            Kind::ManagerChoice | Kind::AutoManagerChoice => Routing::ActiveChild,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Kind::Leaf => "leaf",
            Kind::Composite => "composite",
            Kind::Choice => "choice",
            Kind::AutoChoice => "auto_choice",
            Kind::ManagedChoice => "managed_choice",
            Kind::ManagerChoice => "manager_choice",
            Kind::AutoManagerChoice => "auto_manager_choice",
        }
    }
}

impl FromStr for Kind {
    type Err = UnknownKind;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let normalized = name.to_lowercase().replace('-', "_");

        Kind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| UnknownKind(name.to_string()))
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
