//! View and validation descriptors generated from the registry.

mod rules;
mod views;

pub use rules::{validation_rules, Rule, RuleSet};
pub use views::{create_view, filter_view, list_view, model_schema, update_view, FieldView, Lookup, ModelSchema, SelectOption};
