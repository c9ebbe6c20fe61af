//! Registry validation: naming collisions and constraint syntax, checked once after linking.

use crate::error::ConfigError;
use crate::schema::Registry;
use crate::view::validation_rules;
use std::collections::HashSet;

pub fn validate(registry: &Registry) -> Result<(), ConfigError> {
    for model in registry.models() {
        let mut codes = HashSet::new();
        let mut columns = HashSet::new();
        for field in &model.fields {
            if !codes.insert(field.code.as_str()) {
                return Err(ConfigError::Duplicate {
                    model: model.code.clone(),
                    what: "field code",
                    name: field.code.clone(),
                });
            }
            if field.is_stored() && !columns.insert(field.storage_column()) {
                return Err(ConfigError::Duplicate {
                    model: model.code.clone(),
                    what: "column",
                    name: field.storage_column().to_string(),
                });
            }
            if field.is_association() && field.association.is_none() {
                return Err(ConfigError::MissingReference {
                    kind: "association",
                    id: format!("{}.{}", model.code, field.code),
                });
            }
        }
        validation_rules(registry, model)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::error::ConfigError;
    use crate::schema::{Attribute, Entity, EntityRef, Kind, Registry};

    struct Clash;
    impl Entity for Clash {
        const TABLE: &'static str = "clashes";
        const TITLE: &'static str = "Clash";
        fn attributes() -> Vec<Attribute> {
            vec![
                Attribute::new("id", Kind::Int),
                Attribute::new("name", Kind::Text),
                Attribute::new("label", Kind::Text).tag("column:name"),
            ]
        }
    }

    struct BadRule;
    impl Entity for BadRule {
        const TABLE: &'static str = "bad_rules";
        const TITLE: &'static str = "Bad rule";
        fn attributes() -> Vec<Attribute> {
            vec![
                Attribute::new("id", Kind::Int),
                Attribute::new("name", Kind::Text).validate("required,max=abc"),
            ]
        }
    }

    #[test]
    fn duplicate_columns_rejected() {
        let err = Registry::register(&[EntityRef::of::<Clash>()]).unwrap_err();
        assert!(matches!(err, ConfigError::Duplicate { what: "column", .. }));
    }

    #[test]
    fn malformed_constraints_rejected() {
        let err = Registry::register(&[EntityRef::of::<BadRule>()]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidAnnotation { .. }));
    }
}
