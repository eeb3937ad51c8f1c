use super::Node;
use crate::{kind::Routing, template::Substitution};
use tracing::{debug, trace};

/// leading segment of a dotted choice key
pub fn first_segment(key: &str) -> &str {
    key.split('.').next().unwrap_or(key)
}

impl Node {
    /// Resolve this node's templates for one flat set of choices.
    ///
    /// Pure with respect to the tree: the same input always gives the same
    /// output and nothing in the node is modified.
    pub fn substitute(&self, choices: &Substitution) -> Substitution {
        trace!(name = %self.name, kind = %self.kind, choices = ?choices, "Substituting");

        let resolved = match self.kind.routing() {
            Routing::Merge => self.merge_choices(choices),
            Routing::Broadcast => self.broadcast(choices),
            Routing::ByPrefix => self.route_by_prefix(choices),
            Routing::ActiveChild => self.route_to_active(choices),
        };

        for (key, value) in resolved.iter() {
            trace!(name = %self.name, "{key} ::> {value}");
        }

        resolved
    }

    /// the child selected by `choices[NAME]`, if any
    pub fn active_child(&self, choices: &Substitution) -> Option<&Node> {
        choices
            .get(&self.name)
            .and_then(|active| self.child(active))
    }

    /// the active child together with what it resolves to
    pub fn active_branch(&self, choices: &Substitution) -> Option<(&Node, Substitution)> {
        let child = self.active_child(choices)?;
        let resolved = child.substitute(&self.forward_to(child, choices));

        Some((child, resolved))
    }

    fn merge_choices(&self, choices: &Substitution) -> Substitution {
        let mut merged = choices.clone();
        merged.extend(self.templates.resolve(choices));

        merged
    }

    fn broadcast(&self, choices: &Substitution) -> Substitution {
        for child in self.children.iter() {
            let resolved = child.substitute(choices);
            trace!(name = %self.name, child = %child.name, entries = resolved.len(), "Broadcast child resolved");
        }

        Substitution::new()
    }

    fn route_by_prefix(&self, choices: &Substitution) -> Substitution {
        let mut folded = choices.clone();

        for child in self.children.iter() {
            let routed: Substitution = choices
                .iter()
                .filter(|(key, _)| first_segment(key) == child.name)
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();

            if routed.is_empty() {
                continue;
            }

            folded.extend(child.substitute(&routed));
        }

        self.templates.resolve(&folded)
    }

    fn route_to_active(&self, choices: &Substitution) -> Substitution {
        match self.active_branch(choices) {
            Some((_, resolved)) => resolved,
            None => {
                debug!(
                    name = %self.name,
                    active = ?choices.get(&self.name),
                    "No child matches the active selection"
                );

                Substitution::new()
            }
        }
    }

    /// Rewrite the keys addressed to this manager for its active child.
    ///
    /// `NAME.<child>.rest` becomes `rest`; any other `NAME.rest` becomes
    /// `rest`. The bare `NAME` selector itself is not forwarded.
    fn forward_to(&self, child: &Node, choices: &Substitution) -> Substitution {
        choices
            .iter()
            .filter_map(|(key, value)| {
                let rest = key.strip_prefix(self.name.as_str())?.strip_prefix('.')?;
                let forwarded = match rest.split_once('.') {
                    Some((head, tail)) if head == child.name => tail,
                    _ => rest,
                };

                (!forwarded.is_empty()).then(|| (forwarded.to_string(), value.clone()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::first_segment;

    #[test]
    fn splits_on_first_dot() {
        assert_eq!(first_segment("SCHEDULER.Slurm.QUEUE"), "SCHEDULER");
        assert_eq!(first_segment("DIVIDER"), "DIVIDER");
        assert_eq!(first_segment(""), "");
    }
}
