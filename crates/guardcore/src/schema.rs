use crate::Value;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Primitive type of a schema field
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Object,
    Array,
    Select,
}

impl FieldType {
    fn accepts(&self, value: &Value) -> bool {
        match self {
            FieldType::String | FieldType::Select => matches!(value, Value::String(_)),
            FieldType::Number => matches!(value, Value::Number(_)),
            FieldType::Boolean => matches!(value, Value::Bool(_)),
            FieldType::Object => matches!(value, Value::Object(_)),
            FieldType::Array => matches!(value, Value::Array(_)),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Object => "object",
            FieldType::Array => "array",
            FieldType::Select => "select",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchemaField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub required: bool,
    #[serde(default)]
    pub description: String,
    /// Allowed values for `select` fields
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl SchemaField {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
            description: String::new(),
            options: Vec::new(),
            default: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = options.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }
}

/// Declared inputs, outputs and configuration of a node
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NodeSchema {
    pub inputs: Vec<SchemaField>,
    pub outputs: Vec<SchemaField>,
    pub config: Vec<SchemaField>,
}

impl NodeSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn input(mut self, field: SchemaField) -> Self {
        self.inputs.push(field);
        self
    }

    pub fn output(mut self, field: SchemaField) -> Self {
        self.outputs.push(field);
        self
    }

    pub fn config_field(mut self, field: SchemaField) -> Self {
        self.config.push(field);
        self
    }

    pub fn required_input_names(&self) -> impl Iterator<Item = &str> {
        self.inputs
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name.as_str())
    }

    pub fn output_names(&self) -> impl Iterator<Item = &str> {
        self.outputs.iter().map(|f| f.name.as_str())
    }

    /// Check required config fields and primitive types.
    ///
    /// Keys not declared in the schema are ignored so that engine-level
    /// switches such as `stopOnError` can travel in the same map.
    pub fn validate_config(&self, config: &HashMap<String, Value>) -> ConfigValidation {
        let mut errors = Vec::new();

        for field in &self.config {
            match config.get(&field.name) {
                None | Some(Value::Null) => {
                    if field.required {
                        errors.push(format!("Missing required field: {}", field.name));
                    }
                }
                Some(value) if !field.field_type.accepts(value) => {
                    errors.push(format!(
                        "Field '{}' must be {}, got {}",
                        field.name,
                        field.field_type.label(),
                        value.type_name()
                    ));
                }
                Some(Value::String(choice)) if field.field_type == FieldType::Select => {
                    if !field.options.iter().any(|o| o == choice) {
                        errors.push(format!(
                            "Field '{}' must be one of [{}], got '{}'",
                            field.name,
                            field.options.join(", "),
                            choice
                        ));
                    }
                }
                Some(_) => {}
            }
        }

        ConfigValidation::from_errors(errors)
    }
}

/// Outcome of `configure`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConfigValidation {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ConfigValidation {
    pub fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }

    pub fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }

    /// Layer node-specific rules on top of the schema check
    pub fn push_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
        self.valid = false;
    }
}
