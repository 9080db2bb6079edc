//! Compiled JSON schemas.

use std::sync::Arc;

use serde_json::{Value, json};

use crate::{Error, Result, SchemaValidationError, Stage};

/// A named, compiled JSON Schema.
///
/// Cloning is cheap; the compiled validator is shared.
#[derive(Debug, Clone)]
pub struct Schema {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    name: String,
    document: Value,
    // `None` accepts every value.
    validator: Option<jsonschema::Validator>,
}

impl Schema {
    /// Compile a schema document.
    pub fn new(name: impl Into<String>, document: Value) -> Result<Self> {
        let name = name.into();
        let validator = jsonschema::options()
            .build(&document)
            .map_err(|e| Error::InvalidSchema {
                name: name.clone(),
                message: e.to_string(),
            })?;

        Ok(Self {
            inner: Arc::new(Inner {
                name,
                document,
                validator: Some(validator),
            }),
        })
    }

    /// A schema that accepts every value.
    pub fn any(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                document: json!({}),
                validator: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn document(&self) -> &Value {
        &self.inner.document
    }

    pub fn is_valid(&self, value: &Value) -> bool {
        self.inner
            .validator
            .as_ref()
            .is_none_or(|validator| validator.is_valid(value))
    }

    /// Validate `value`, collecting every violation.
    pub fn check(&self, stage: Stage, value: &Value) -> std::result::Result<(), SchemaValidationError> {
        let Some(validator) = &self.inner.validator else {
            return Ok(());
        };
        let errors: Vec<String> = validator.iter_errors(value).map(|e| e.to_string()).collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(SchemaValidationError {
                schema: self.inner.name.clone(),
                stage,
                errors,
            })
        }
    }

    /// Names of the top-level properties the schema declares.
    ///
    /// Used to check parameter mappings against both sides of a policy slot.
    pub fn property_names(&self) -> Vec<&str> {
        self.inner
            .document
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| props.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.property_names().contains(&name)
    }
}
