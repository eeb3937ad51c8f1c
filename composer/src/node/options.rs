use super::Node;
use crate::{
    kind::OptionsShape,
    tree::{self, CHOICES, LIST, SUBSTITUTIONS, VALUES},
};
use serde_yaml::{Mapping, Value};

impl Node {
    /// The options document describing this node to a user interface.
    pub fn get_gui_options(&self) -> Value {
        match self.kind.options_shape() {
            OptionsShape::Values => self.value_options(),
            OptionsShape::Children => Value::Mapping(self.child_options()),
            OptionsShape::Menu => self.menu_options(),
            OptionsShape::Managed => {
                let mut options = Mapping::new();
                options.insert(LIST.into(), Value::Mapping(self.child_options()));

                Value::Mapping(options)
            }
        }
    }

    /// JSON rendering of [`Node::get_gui_options`]
    pub fn gui_options_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.get_gui_options())
    }

    fn child_options(&self) -> Mapping {
        self.children
            .iter()
            .map(|child| (Value::String(child.name.clone()), child.get_gui_options()))
            .collect()
    }

    fn schema_mapping(&self) -> Mapping {
        self.schema.as_mapping().cloned().unwrap_or_default()
    }

    fn value_options(&self) -> Value {
        let mut options = self.schema_mapping();

        match options.get_mut(VALUES) {
            Some(values) => tree::overlay_values(values, &self.defaults),
            None => {
                let values = match &self.defaults {
                    Value::Mapping(defaults) => Value::Mapping(tree::without_key(defaults, SUBSTITUTIONS)),
                    defaults => defaults.clone(),
                };
                options.insert(VALUES.into(), values);
            }
        }

        Value::Mapping(options)
    }

    fn menu_options(&self) -> Value {
        let mut options = tree::without_key(&self.schema_mapping(), LIST);

        if !self.children.is_empty() {
            options.insert(CHOICES.into(), Value::Mapping(self.child_options()));
        }

        Value::Mapping(options)
    }
}

#[cfg(test)]
mod tests {
    use crate::{kind::Kind, node::Node, registry::ClassTable};
    use serde_yaml::Value;

    fn yaml(source: &str) -> Value {
        serde_yaml::from_str(source).unwrap()
    }

    #[test]
    fn leaf_overlays_defaults_on_values() {
        let leaf = Node::leaf("QUEUE", yaml("{values: {X: 1}}"), yaml("{X: 2, Y: 3}"));

        assert_eq!(leaf.get_gui_options(), yaml("{values: {X: 2, Y: 3}}"));
    }

    #[test]
    fn leaf_without_values_exports_defaults() {
        let leaf = Node::leaf(
            "ACCOUNT",
            yaml("{label: Account, substitutions: {LINE: '-A ${ACCOUNT}'}}"),
            yaml("[cin_staff, cin_visual]"),
        );

        assert_eq!(
            leaf.get_gui_options(),
            yaml("{label: Account, substitutions: {LINE: '-A ${ACCOUNT}'}, values: [cin_staff, cin_visual]}")
        );
    }

    #[test]
    fn choice_nests_children_and_drops_list() {
        let choice = Node::new(
            Kind::Choice,
            "SERVICE",
            yaml("{label: Service, list: {}}"),
            Value::Null,
            &ClassTable::new(),
        )
        .with_child(Node::leaf("vnc", yaml("{}"), yaml("{}")));

        assert_eq!(
            choice.get_gui_options(),
            yaml("{label: Service, choices: {vnc: {values: {}}}}")
        );
    }

    #[test]
    fn managed_choice_wraps_children_in_list() {
        let managed = Node::new(
            Kind::ManagedChoice,
            "Slurm",
            yaml("{QUEUE: {label: Queue}}"),
            yaml("{QUEUE: [debug]}"),
            &ClassTable::new(),
        );

        assert_eq!(
            managed.get_gui_options(),
            yaml("{list: {QUEUE: {label: Queue, values: [debug]}}}")
        );
    }
}
