//! Attribute schemas: which attributes a resource kind accepts, their
//! types, and who owns each value (the declaration, the provider, or both).

use crate::attr::{Attr, Attributes};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Value type of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrType {
    String,
    Bool,
    Int,
    /// Homogeneous list of scalars
    List(&'static AttrType),
    /// Repeated nested block; each element is an object with these attributes
    Blocks(&'static [AttributeSchema]),
}

impl AttrType {
    fn name(&self) -> &'static str {
        match self {
            AttrType::String => "string",
            AttrType::Bool => "bool",
            AttrType::Int => "number",
            AttrType::List(_) => "list",
            AttrType::Blocks(_) => "list of objects",
        }
    }
}

/// Who supplies the value of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Must be declared
    Required,
    /// May be declared
    Optional,
    /// Assigned by the provider, never declared
    Computed,
}

/// Schema of a single attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeSchema {
    pub name: &'static str,
    pub ty: AttrType,
    pub mode: Mode,
    /// Value must never be shown in plans or logs
    pub sensitive: bool,
    /// A change cannot be applied in place
    pub force_new: bool,
    /// Declared value is sent to the provider but never returned by it
    pub write_only: bool,
    /// Provider discloses the value exactly once, in the create response
    pub write_once: bool,
}

impl AttributeSchema {
    const fn new(name: &'static str, ty: AttrType, mode: Mode) -> Self {
        Self {
            name,
            ty,
            mode,
            sensitive: false,
            force_new: false,
            write_only: false,
            write_once: false,
        }
    }

    pub const fn required(name: &'static str, ty: AttrType) -> Self {
        Self::new(name, ty, Mode::Required)
    }

    pub const fn optional(name: &'static str, ty: AttrType) -> Self {
        Self::new(name, ty, Mode::Optional)
    }

    pub const fn computed(name: &'static str, ty: AttrType) -> Self {
        Self::new(name, ty, Mode::Computed)
    }

    pub const fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    pub const fn force_new(mut self) -> Self {
        self.force_new = true;
        self
    }

    pub const fn write_only(mut self) -> Self {
        self.write_only = true;
        self
    }

    pub const fn write_once(mut self) -> Self {
        self.write_once = true;
        self
    }

    /// Whether a read of the remote resource can ever produce this value.
    pub fn is_readable(&self) -> bool {
        !self.write_only && !self.write_once
    }
}

/// Schema of a resource kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceSchema {
    /// Host-facing type name, e.g. `linode_instance`
    pub type_name: &'static str,
    pub attributes: &'static [AttributeSchema],
}

/// A declared attribute tree that does not fit the schema.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{path}: {message}")]
pub struct ValidationError {
    /// Attribute path, e.g. `bucket_access[1].cluster`
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl ResourceSchema {
    /// Look up an attribute by name.
    pub fn attribute(&self, name: &str) -> Option<&AttributeSchema> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Attributes whose value cannot be recovered by reading the resource.
    pub fn unreadable(&self) -> impl Iterator<Item = &AttributeSchema> {
        self.attributes.iter().filter(|a| !a.is_readable())
    }

    /// Attributes that must never be displayed.
    pub fn is_sensitive(&self, name: &str) -> bool {
        self.attribute(name).is_some_and(|a| a.sensitive)
    }

    /// Validate a declared attribute tree.
    ///
    /// Rejects unsupported names, values for provider-computed attributes,
    /// missing required attributes, unknown values and type mismatches.
    pub fn validate(&self, declared: &Attributes) -> Result<(), ValidationError> {
        for name in declared.known_names().chain(declared.unknown_names()) {
            if self.attribute(name).is_none() {
                return Err(ValidationError::new(
                    name,
                    format!("unsupported attribute for {}", self.type_name),
                ));
            }
        }

        for attr in self.attributes {
            match (declared.get(attr.name), attr.mode) {
                (Attr::Known(_) | Attr::Unknown, Mode::Computed) => {
                    let what = if attr.sensitive {
                        "sensitive value"
                    } else {
                        "value"
                    };
                    return Err(ValidationError::new(
                        attr.name,
                        format!("{what} is computed by the provider and cannot be set"),
                    ));
                }
                (Attr::Absent, Mode::Required) => {
                    return Err(ValidationError::new(attr.name, "required attribute is missing"));
                }
                (Attr::Unknown, _) => {
                    return Err(ValidationError::new(
                        attr.name,
                        "value is not known yet and cannot be applied",
                    ));
                }
                (Attr::Known(value), _) => check_type(attr.name, &attr.ty, value)?,
                (Attr::Absent, _) => {}
            }
        }
        Ok(())
    }
}

fn check_type(path: &str, ty: &AttrType, value: &Value) -> Result<(), ValidationError> {
    let ok = match (ty, value) {
        (AttrType::String, Value::String(_)) | (AttrType::Bool, Value::Bool(_)) => true,
        (AttrType::Int, Value::Number(n)) => n.is_i64() || n.is_u64(),
        (AttrType::List(inner), Value::Array(items)) => {
            for (i, item) in items.iter().enumerate() {
                check_type(&format!("{path}[{i}]"), inner, item)?;
            }
            true
        }
        (AttrType::Blocks(fields), Value::Array(items)) => {
            for (i, item) in items.iter().enumerate() {
                check_block(&format!("{path}[{i}]"), fields, item)?;
            }
            true
        }
        _ => false,
    };

    if ok {
        Ok(())
    } else {
        Err(ValidationError::new(
            path,
            format!("expected {}, got {}", ty.name(), json_type(value)),
        ))
    }
}

fn check_block(
    path: &str,
    fields: &[AttributeSchema],
    value: &Value,
) -> Result<(), ValidationError> {
    let Value::Object(map) = value else {
        return Err(ValidationError::new(
            path,
            format!("expected object, got {}", json_type(value)),
        ));
    };

    if let Some(name) = map.keys().find(|k| !fields.iter().any(|f| f.name == *k)) {
        return Err(ValidationError::new(
            format!("{path}.{name}"),
            "unsupported attribute",
        ));
    }

    for field in fields {
        let field_path = format!("{path}.{}", field.name);
        match map.get(field.name) {
            None | Some(Value::Null) if field.mode == Mode::Required => {
                return Err(ValidationError::new(field_path, "required attribute is missing"));
            }
            None | Some(Value::Null) => {}
            Some(v) => check_type(&field_path, &field.ty, v)?,
        }
    }
    Ok(())
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

impl fmt::Display for ResourceSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const GRANT: &[AttributeSchema] = &[
        AttributeSchema::required("bucket_name", AttrType::String),
        AttributeSchema::required("cluster", AttrType::String),
        AttributeSchema::required("permissions", AttrType::String),
    ];

    const SCHEMA: ResourceSchema = ResourceSchema {
        type_name: "test_key",
        attributes: &[
            AttributeSchema::computed("id", AttrType::Int),
            AttributeSchema::required("label", AttrType::String),
            AttributeSchema::computed("secret_key", AttrType::String)
                .sensitive()
                .write_once(),
            AttributeSchema::optional("tags", AttrType::List(&AttrType::String)),
            AttributeSchema::optional("bucket_access", AttrType::Blocks(GRANT)).force_new(),
        ],
    };

    fn validate(value: serde_json::Value) -> Result<(), ValidationError> {
        SCHEMA.validate(&Attributes::from_json(value))
    }

    #[test]
    fn test_valid_tree() {
        validate(json!({
            "label": "k",
            "tags": ["a", "b"],
            "bucket_access": [{"bucket_name": "b1", "cluster": "c1", "permissions": "read_only"}]
        }))
        .unwrap();
    }

    #[test]
    fn test_required_missing() {
        let err = validate(json!({})).unwrap_err();
        assert_eq!(err.path, "label");
    }

    #[test]
    fn test_computed_sensitive_rejected() {
        let err = validate(json!({"label": "k", "secret_key": "x"})).unwrap_err();
        assert_eq!(err.path, "secret_key");
        assert!(err.message.contains("sensitive value is computed"));
    }

    #[test]
    fn test_type_mismatch_in_nested_block() {
        let err = validate(json!({
            "label": "k",
            "bucket_access": [
                {"bucket_name": "b1", "cluster": "c1", "permissions": "read_only"},
                {"bucket_name": "b2", "cluster": 7, "permissions": "read_only"}
            ]
        }))
        .unwrap_err();
        assert_eq!(err.path, "bucket_access[1].cluster");
        assert_eq!(err.message, "expected string, got number");
    }

    #[test]
    fn test_unsupported_attribute() {
        let err = validate(json!({"label": "k", "colour": "red"})).unwrap_err();
        assert_eq!(err.path, "colour");
    }

    #[test]
    fn test_unknown_declared_value_rejected() {
        let mut attrs = Attributes::from_json(json!({}));
        attrs.set_unknown("label");
        let err = SCHEMA.validate(&attrs).unwrap_err();
        assert!(err.message.contains("not known yet"));
    }

    #[test]
    fn test_unreadable_attributes() {
        let names: Vec<_> = SCHEMA.unreadable().map(|a| a.name).collect();
        assert_eq!(names, vec!["secret_key"]);
    }
}
