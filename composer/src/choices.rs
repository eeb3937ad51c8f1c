use crate::template::Substitution;
use serde_json::Value;
use thiserror::Error;

/// flat dotted-path -> value selections supplied by a client
pub type Choices = Substitution;

#[derive(Error, Debug)]
pub enum ComposerError {
    #[error("Choices document is not valid JSON")]
    InvalidJson(#[from] serde_json::Error),
    #[error("Choices document must be a JSON object")]
    NotAnObject,
    #[error("Choice '{0}' must be a scalar value")]
    NestedChoice(String),
}

/// Parse the serialized choices document sent by a client.
///
/// Values are expected to be strings; numbers and booleans are accepted and
/// kept in their textual form, `null` becomes an empty string.
pub fn parse_choices(document: &str) -> Result<Choices, ComposerError> {
    let Value::Object(entries) = serde_json::from_str::<Value>(document)? else {
        return Err(ComposerError::NotAnObject);
    };

    entries
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(string) => string,
                Value::Number(number) => number.to_string(),
                Value::Bool(boolean) => boolean.to_string(),
                Value::Null => String::new(),
                Value::Array(_) | Value::Object(_) => return Err(ComposerError::NestedChoice(key)),
            };

            Ok((key, value))
        })
        .collect()
}
