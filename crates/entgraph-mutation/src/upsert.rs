//! Upsert conflict resolution.
//!
//! An upsert is a conflict target plus an ordered list of resolutions. The
//! resolutions are folded, in order, into one [`ConflictAction`] once the
//! inserted columns are known.

use entgraph_core::{
    ConflictAction, ConflictTarget, ConflictUpdate, ConflictValue, Error, Result, Value,
};
use entgraph_schema::EntityType;

/// How a conflicting row is resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Overwrite every inserted column with the new value, except the
    /// identifier and immutable fields.
    UpdateNewValues,
    /// Keep the existing row, still touching it so its id is returned.
    Ignore,
    /// Leave the existing row untouched; no id is returned on conflict.
    DoNothing,
    /// Set one column explicitly.
    Custom(String, ConflictValue),
}

/// Accumulated upsert directives.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Upsert {
    pub target: Option<ConflictTarget>,
    pub resolutions: Vec<Resolution>,
}

impl Upsert {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.target.is_none() && self.resolutions.is_empty()
    }

    /// Conflict on a set of columns.
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target = Some(ConflictTarget::Columns(
            columns.into_iter().map(Into::into).collect(),
        ));
        self
    }

    /// Conflict on a named constraint.
    pub fn constraint(mut self, name: impl Into<String>) -> Self {
        self.target = Some(ConflictTarget::Constraint(name.into()));
        self
    }

    pub fn resolve_with(mut self, resolution: Resolution) -> Self {
        self.resolutions.push(resolution);
        self
    }

    /// Fails when no directive was given.
    pub fn ensure_directives(&self, type_name: &str) -> Result<()> {
        if self.is_empty() {
            return Err(Error::Custom(format!(
                "missing options for {type_name} create on_conflict"
            )));
        }
        Ok(())
    }

    /// Fold the directives into a conflict clause for an insert of
    /// `columns` into `ty`.
    ///
    /// Without a target the identifier column is used; without a
    /// resolution the conflict is ignored (`DO NOTHING`).
    pub fn resolve(&self, ty: &EntityType, columns: &[String]) -> Result<ConflictAction> {
        self.ensure_directives(&ty.name)?;
        let target = match &self.target {
            Some(target) => target.clone(),
            None => ConflictTarget::Columns(ty.id_column().map(str::to_string).into_iter().collect()),
        };
        let mut update = ConflictUpdate::DoNothing;
        for resolution in &self.resolutions {
            match resolution {
                Resolution::DoNothing => update = ConflictUpdate::DoNothing,
                Resolution::UpdateNewValues => {
                    for column in updatable(ty, columns) {
                        push_set(&mut update, column, ConflictValue::Excluded);
                    }
                }
                Resolution::Ignore => {
                    for column in columns {
                        push_set(&mut update, column, ConflictValue::Unchanged);
                    }
                }
                Resolution::Custom(column, value) => push_set(&mut update, column, value.clone()),
            }
        }
        if matches!(&update, ConflictUpdate::Set(sets) if sets.is_empty()) {
            update = ConflictUpdate::DoNothing;
        }
        Ok(ConflictAction { target, update })
    }
}

/// Add or replace one SET entry; a preceding `DoNothing` is discarded.
fn push_set(update: &mut ConflictUpdate, column: &str, value: ConflictValue) {
    if matches!(update, ConflictUpdate::DoNothing) {
        *update = ConflictUpdate::Set(Vec::new());
    }
    if let ConflictUpdate::Set(sets) = update {
        match sets.iter_mut().find(|(c, _)| c == column) {
            Some(entry) => entry.1 = value,
            None => sets.push((column.to_string(), value)),
        }
    }
}

fn updatable<'a>(ty: &'a EntityType, columns: &'a [String]) -> impl Iterator<Item = &'a String> {
    columns.iter().filter(move |column| {
        if ty.id_column() == Some(column.as_str()) {
            return false;
        }
        !ty.fields
            .iter()
            .any(|f| &f.column == *column && f.immutable)
    })
}

/// Shorthand for `Resolution::Custom(column, ConflictValue::Value(value))`.
pub fn set_value(column: impl Into<String>, value: impl Into<Value>) -> Resolution {
    Resolution::Custom(column.into(), ConflictValue::Value(value.into()))
}

/// Shorthand for `Resolution::Custom(column, ConflictValue::Add(delta))`.
pub fn add_value(column: impl Into<String>, delta: impl Into<Value>) -> Resolution {
    Resolution::Custom(column.into(), ConflictValue::Add(delta.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use entgraph_schema::Field;

    fn user() -> EntityType {
        EntityType::new("User")
            .field(Field::string("name").unique())
            .field(Field::int("age"))
            .field(Field::time("created_at").immutable())
    }

    fn columns() -> Vec<String> {
        vec!["id".into(), "name".into(), "age".into(), "created_at".into()]
    }

    #[test]
    fn test_zero_directives_is_an_error() {
        let err = Upsert::default().resolve(&user(), &columns()).unwrap_err();
        assert!(matches!(err, Error::Custom(_)));
    }

    #[test]
    fn test_update_new_values_skips_id_and_immutable() {
        let upsert = Upsert {
            target: Some(ConflictTarget::Columns(vec!["name".into()])),
            resolutions: vec![Resolution::UpdateNewValues],
        };
        let action = upsert.resolve(&user(), &columns()).unwrap();
        assert_eq!(
            action.update,
            ConflictUpdate::Set(vec![
                ("name".into(), ConflictValue::Excluded),
                ("age".into(), ConflictValue::Excluded),
            ])
        );
    }

    #[test]
    fn test_resolutions_compose_in_order() {
        let upsert = Upsert::new()
            .columns(["name"])
            .resolve_with(Resolution::UpdateNewValues)
            .resolve_with(add_value("age", 1_i64));
        let action = upsert.resolve(&user(), &columns()).unwrap();
        let ConflictUpdate::Set(sets) = action.update else {
            panic!("expected a SET list");
        };
        assert_eq!(sets[1], ("age".into(), ConflictValue::Add(Value::Int(1))));
    }

    #[test]
    fn test_target_only_defaults_to_do_nothing() {
        let upsert = Upsert {
            target: Some(ConflictTarget::Constraint("users_name_key".into())),
            resolutions: Vec::new(),
        };
        let action = upsert.resolve(&user(), &columns()).unwrap();
        assert_eq!(action.update, ConflictUpdate::DoNothing);
    }

    #[test]
    fn test_resolution_without_target_uses_id() {
        let upsert = Upsert::new().resolve_with(Resolution::Ignore);
        let action = upsert.resolve(&user(), &columns()).unwrap();
        assert_eq!(action.target, ConflictTarget::Columns(vec!["id".into()]));
    }
}
