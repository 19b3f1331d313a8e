//! Field declarations.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use entgraph_core::{Dialect, FieldKind, ValidationError, Value};

use crate::validate::Validator;

/// Application-side default of a field.
#[derive(Clone)]
pub enum DefaultValue {
    Static(Value),
    Computed(Arc<dyn Fn() -> Value + Send + Sync>),
}

impl DefaultValue {
    pub fn computed<F>(f: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        DefaultValue::Computed(Arc::new(f))
    }

    /// Produce the default value.
    pub fn value(&self) -> Value {
        match self {
            DefaultValue::Static(v) => v.clone(),
            DefaultValue::Computed(f) => f(),
        }
    }
}

impl fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultValue::Static(v) => write!(f, "Static({v:?})"),
            DefaultValue::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

/// Whether a create must carry a value for a field.
///
/// Computed once when the graph is built, from the field's flags, its
/// defaults and the dialects the graph is configured for.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Requiredness {
    #[default]
    Optional,
    Required,
    /// Required only for the dialects mapped to `true`.
    PerDialect(BTreeMap<Dialect, bool>),
}

impl Requiredness {
    /// Resolve against the active dialect. Unlisted dialects are required.
    pub fn is_required(&self, dialect: Dialect) -> bool {
        match self {
            Requiredness::Optional => false,
            Requiredness::Required => true,
            Requiredness::PerDialect(map) => map.get(&dialect).copied().unwrap_or(true),
        }
    }
}

/// A scalar field of an entity type.
#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub column: String,
    pub kind: FieldKind,
    /// May be left unset on create.
    pub optional: bool,
    /// May hold NULL; read back as `None` rather than the zero value.
    pub nillable: bool,
    /// Cannot change after create.
    pub immutable: bool,
    pub unique: bool,
    /// Identifier generated by the backend.
    pub auto_increment: bool,
    pub default: Option<DefaultValue>,
    /// Applied on every update that leaves the field unset.
    pub update_default: Option<DefaultValue>,
    /// Backend-side default expressions, per dialect.
    pub db_defaults: BTreeMap<Dialect, String>,
    pub validators: Vec<Validator>,
    /// Allowed values of an `Enum` field.
    pub enum_values: Vec<String>,
    /// The field stores an edge's foreign key.
    pub edge_fk: bool,
    /// Declared in the schema, as opposed to emitted by the resolver.
    pub user_defined: bool,
    pub requiredness: Requiredness,
}

impl Field {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        let name = name.into();
        Self {
            column: name.clone(),
            name,
            kind,
            optional: false,
            nillable: false,
            immutable: false,
            unique: false,
            auto_increment: false,
            default: None,
            update_default: None,
            db_defaults: BTreeMap::new(),
            validators: Vec::new(),
            enum_values: Vec::new(),
            edge_fk: false,
            user_defined: true,
            requiredness: Requiredness::Optional,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::String)
    }

    pub fn int(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Int32)
    }

    pub fn int64(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Int64)
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Float64)
    }

    pub fn bool(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Bool)
    }

    pub fn time(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Time)
    }

    pub fn uuid(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Uuid)
    }

    pub fn bytes(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Bytes)
    }

    pub fn json(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Json)
    }

    pub fn enumeration<I, S>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut field = Self::new(name, FieldKind::Enum);
        field.enum_values = values.into_iter().map(Into::into).collect();
        field
    }

    /// Storage column, when it differs from the field name.
    pub fn storage_key(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn nillable(mut self) -> Self {
        self.nillable = true;
        self
    }

    pub fn immutable(mut self) -> Self {
        self.immutable = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(DefaultValue::Static(value.into()));
        self
    }

    pub fn default_fn<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.default = Some(DefaultValue::computed(f));
        self
    }

    pub fn update_default_fn<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.update_default = Some(DefaultValue::computed(f));
        self
    }

    /// Backend default used by `dialect` when the field is left unset.
    pub fn db_default(mut self, dialect: Dialect, expr: impl Into<String>) -> Self {
        self.db_defaults.insert(dialect, expr.into());
        self
    }

    pub fn validate(mut self, validator: Validator) -> Self {
        self.validators.push(validator);
        self
    }

    pub fn validator_count(&self) -> usize {
        self.validators.len()
    }

    /// Whether the field must be present on create under `dialect`.
    pub fn is_required(&self, dialect: Dialect) -> bool {
        self.requiredness.is_required(dialect)
    }

    /// Run the kind check, enum membership and every validator.
    /// First failure wins.
    pub fn check_value(&self, type_name: &str, value: &Value) -> Result<(), ValidationError> {
        let fail = |cause: String| {
            ValidationError::new(
                self.name.clone(),
                format!("invalid value for field {type_name}.{}: {cause}", self.name),
            )
        };
        if value.is_null() && !self.nillable && !self.optional {
            return Err(fail("value is NULL".to_string()));
        }
        self.kind.accepts(value).map_err(fail)?;
        if self.kind == FieldKind::Enum && !self.enum_values.is_empty() {
            if let Some(s) = value.as_str() {
                if !self.enum_values.iter().any(|v| v == s) {
                    return Err(fail(format!(
                        "{s:?} is not one of [{}]",
                        self.enum_values.join(", ")
                    )));
                }
            }
        }
        for validator in &self.validators {
            validator.check(value).map_err(fail)?;
        }
        Ok(())
    }

    /// Compute requiredness for the configured dialects.
    pub(crate) fn resolve_requiredness(&mut self, dialects: &[Dialect]) {
        self.requiredness = if self.optional || self.default.is_some() || self.auto_increment {
            Requiredness::Optional
        } else if self.db_defaults.is_empty() {
            Requiredness::Required
        } else if dialects.len() > 1 {
            Requiredness::PerDialect(
                dialects
                    .iter()
                    .map(|d| (*d, !self.db_defaults.contains_key(d)))
                    .collect(),
            )
        } else {
            match dialects.first() {
                Some(d) if self.db_defaults.contains_key(d) => Requiredness::Optional,
                _ => Requiredness::Required,
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requiredness_single_dialect_collapses() {
        let mut field = Field::time("created_at").db_default(Dialect::Postgres, "now()");
        field.resolve_requiredness(&[Dialect::Postgres]);
        assert_eq!(field.requiredness, Requiredness::Optional);
        field.resolve_requiredness(&[Dialect::Mysql]);
        assert_eq!(field.requiredness, Requiredness::Required);
    }

    #[test]
    fn test_requiredness_branches_on_dialect() {
        let mut field = Field::time("created_at").db_default(Dialect::Postgres, "now()");
        field.resolve_requiredness(&[Dialect::Postgres, Dialect::Sqlite]);
        assert!(!field.is_required(Dialect::Postgres));
        assert!(field.is_required(Dialect::Sqlite));
    }

    #[test]
    fn test_defaults_make_field_optional() {
        let mut field = Field::int("rank").default(0_i64);
        field.resolve_requiredness(&[Dialect::Postgres]);
        assert_eq!(field.requiredness, Requiredness::Optional);
        let mut bare = Field::string("name");
        bare.resolve_requiredness(&[Dialect::Postgres]);
        assert_eq!(bare.requiredness, Requiredness::Required);
    }

    #[test]
    fn test_check_value_enum_and_validators() {
        let status = Field::enumeration("status", ["draft", "published"]);
        assert!(status.check_value("Post", &Value::from("draft")).is_ok());
        let err = status
            .check_value("Post", &Value::from("deleted"))
            .unwrap_err();
        assert_eq!(err.name, "status");

        let name = Field::string("name").validate(Validator::MaxLen(3));
        assert!(name.check_value("User", &Value::from("abcd")).is_err());
        assert!(name.check_value("User", &Value::Int(1)).is_err());
    }

    #[test]
    fn test_computed_default() {
        let field = Field::int64("n").default_fn(|| Value::Int(7));
        assert_eq!(field.default.map(|d| d.value()), Some(Value::Int(7)));
    }
}
