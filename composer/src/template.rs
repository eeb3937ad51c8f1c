//! Tolerant placeholder substitution.
//!
//! Placeholders are written `$name` or `${name}`; the braced form also accepts
//! dotted and dashed names (`${SCHEDULER.QUEUE}`). `$$` yields a literal `$`.
//! A placeholder without a matching key is left verbatim so that a later,
//! higher level pass can still fill it in.

use crate::tree::{self, SUBSTITUTIONS};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_yaml::Value;
use std::collections::BTreeMap;
use tracing::warn;

/// flat map of resolved names -> values, also used for incoming choices
pub type Substitution = BTreeMap<String, String>;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\$(?:(?P<escaped>\$)|(?P<named>[_A-Za-z][_A-Za-z0-9]*)|\{(?P<braced>[_A-Za-z][_A-Za-z0-9.\-]*)\})",
    )
    .unwrap()
});

/// resolve every known placeholder of `template` from `values`
pub fn safe_substitute(template: &str, values: &Substitution) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures| {
            if caps.name("escaped").is_some() {
                return "$".to_string();
            }

            let name = caps
                .name("named")
                .or_else(|| caps.name("braced"))
                .map(|m| m.as_str())
                .unwrap_or_default();

            match values.get(name) {
                Some(value) => value.clone(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// The substitution templates owned by a single composer node.
///
/// Built once from the node's schema and defaults: the schema's
/// `substitutions` map, overridden key by key by the defaults' own
/// `substitutions` map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Templates(BTreeMap<String, String>);

impl Templates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn layered(schema: &Value, defaults: &Value) -> Self {
        let mut templates = Self::new();

        for layer in [schema, defaults] {
            let Some(Value::Mapping(substitutions)) = layer.get(SUBSTITUTIONS) else {
                continue;
            };

            for (key, value) in substitutions {
                match (tree::key_string(key), tree::scalar_string(value)) {
                    (Some(name), Some(template)) => {
                        templates.0.insert(name, template);
                    }
                    (name, _) => {
                        warn!(name = ?name, "Ignoring substitution that is not a plain string");
                    }
                }
            }
        }

        templates
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// resolve all templates against `values`; misses stay literal
    pub fn resolve(&self, values: &Substitution) -> Substitution {
        self.0
            .iter()
            .map(|(name, template)| (name.clone(), safe_substitute(template, values)))
            .collect()
    }
}

impl FromIterator<(String, String)> for Templates {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn values(pairs: &[(&str, &str)]) -> Substitution {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[rstest]
    #[case("#SBATCH -p ${QUEUE}", "#SBATCH -p gll_usr")]
    #[case("#SBATCH -p $QUEUE", "#SBATCH -p gll_usr")]
    #[case("${QUEUE}_${ACCOUNT}", "gll_usr_${ACCOUNT}")]
    #[case("cost: $$5 for $QUEUE", "cost: $5 for gll_usr")]
    #[case("echo $SLURM_JOB_ID", "echo $SLURM_JOB_ID")]
    #[case("plain text", "plain text")]
    #[case("trailing $", "trailing $")]
    fn substitutes_known_keys_only(#[case] template: &str, #[case] expected: &str) {
        let input = values(&[("QUEUE", "gll_usr")]);

        assert_eq!(safe_substitute(template, &input), expected);
    }

    #[test]
    fn braced_names_may_be_dotted() {
        let input = values(&[("SCHEDULER.QUEUE", "debug")]);

        assert_eq!(safe_substitute("-p ${SCHEDULER.QUEUE}", &input), "-p debug");
        // the bare form stops at the dot
        assert_eq!(
            safe_substitute("-p $SCHEDULER.QUEUE", &input),
            "-p $SCHEDULER.QUEUE"
        );
    }

    #[test]
    fn substituted_values_are_not_rescanned() {
        let input = values(&[("A", "${B}"), ("B", "never")]);

        assert_eq!(safe_substitute("${A}", &input), "${B}");
    }

    #[test]
    fn defaults_override_schema_substitutions() {
        let schema: Value = serde_yaml::from_str(
            "substitutions:\n  HEADER: '#schema'\n  LINE: '-p ${QUEUE}'\n",
        )
        .unwrap();
        let defaults: Value =
            serde_yaml::from_str("substitutions:\n  HEADER: '#site'\n  NODES: 2\n").unwrap();

        let templates = Templates::layered(&schema, &defaults);

        assert_eq!(templates.len(), 3);
        assert_eq!(templates.get("HEADER"), Some("#site"));
        assert_eq!(templates.get("LINE"), Some("-p ${QUEUE}"));
        assert_eq!(templates.get("NODES"), Some("2"));
    }

    #[test]
    fn resolution_reaches_a_fixed_point() {
        let templates: Templates = [
            ("SCRIPT".to_string(), "run ${CMD} on ${QUEUE}".to_string()),
            ("LINE".to_string(), "-A ${ACCOUNT}".to_string()),
        ]
        .into_iter()
        .collect();
        let input = values(&[("CMD", "vnc"), ("QUEUE", "debug")]);

        let first = templates.resolve(&input);
        let again: Templates = first.clone().into_iter().collect();

        assert_eq!(first["SCRIPT"], "run vnc on debug");
        assert_eq!(first["LINE"], "-A ${ACCOUNT}");
        assert_eq!(again.resolve(&input), first);
    }
}
