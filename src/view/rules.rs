//! Validation rule trees derived from each field's constraint annotation.

use crate::error::ConfigError;
use crate::schema::{Field, Model, Registry};
use regex::Regex;
use serde::Serialize;

/// Named patterns usable as `regex=<alias>`.
const PATTERN_ALIASES: &[(&str, &str, &str)] = &[
    ("slug", r"^[a-z0-9]+(?:-[a-z0-9]+)*$", "may contain only lowercase letters, digits and dashes"),
    ("phone", r"^\+?[0-9]{7,15}$", "must be a phone number"),
    ("hexcolor", r"^#(?:[0-9a-fA-F]{3}|[0-9a-fA-F]{6})$", "must be a hex color like #a0b1c2"),
    ("latin", r"^[A-Za-z0-9 .,'_-]*$", "may contain only latin letters, digits and punctuation"),
    ("code", r"^[A-Za-z][A-Za-z0-9_]*$", "must start with a letter and contain only letters, digits and underscores"),
];

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "rule", rename_all = "camelCase")]
pub enum Rule {
    Required,
    /// Minimum number, text length or item count.
    Min { value: f64 },
    Max { value: f64 },
    Len { value: usize },
    Email,
    Uuid,
    OneOf { values: Vec<String> },
    Pattern { pattern: String, message: String },
}

/// Rules for one field. `element` holds the rules applied to each item of a collection.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSet {
    pub field: String,
    #[serde(rename = "type")]
    pub type_name: &'static str,
    pub multiple: bool,
    pub rules: Vec<Rule>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub element: Option<Box<RuleSet>>,
}

/// Rule sets for every field that declares constraints.
pub fn validation_rules(registry: &Registry, model: &Model) -> Result<Vec<RuleSet>, ConfigError> {
    let mut sets = Vec::new();
    for field in &model.fields {
        let Some(raw) = field.constraints.as_deref() else {
            continue;
        };
        let tokens: Vec<&str> = raw.split(',').map(str::trim).filter(|t| !t.is_empty()).collect();
        let set = parse_rules(
            model,
            field,
            &tokens,
            field.multiple,
            element_type(registry, field),
        )?;
        sets.push(set);
    }
    Ok(sets)
}

/// Element type of a field: the association target's key type, else the field's own type.
fn element_type(registry: &Registry, field: &Field) -> &'static str {
    match registry.field_target(field) {
        Some(target) => target.primary_key().kind.type_name(),
        None if field.is_media() => crate::schema::FieldKind::Uuid.type_name(),
        None => field.kind.type_name(),
    }
}

fn parse_rules(
    model: &Model,
    field: &Field,
    tokens: &[&str],
    multiple: bool,
    element: &'static str,
) -> Result<RuleSet, ConfigError> {
    let bad = |message: String| ConfigError::annotation(&model.code, &field.name, message);
    let mut set = RuleSet {
        field: field.code.clone(),
        type_name: if multiple { "array" } else { element },
        multiple,
        rules: Vec::new(),
        element: None,
    };

    for (i, token) in tokens.iter().enumerate() {
        let (name, arg) = match token.split_once('=') {
            Some((n, a)) => (n.trim(), Some(a.trim())),
            None => (*token, None),
        };
        let rule = match (name, arg) {
            ("dive", None) => {
                if !multiple {
                    return Err(bad("'dive' on a single-valued field".into()));
                }
                set.element = Some(Box::new(parse_rules(model, field, &tokens[i + 1..], false, element)?));
                break;
            }
            ("required", None) => Rule::Required,
            ("email", None) => Rule::Email,
            ("uuid", None) => Rule::Uuid,
            ("min", Some(a)) => Rule::Min {
                value: a.parse().map_err(|_| bad(format!("'min' expects a number, got '{}'", a)))?,
            },
            ("max", Some(a)) => Rule::Max {
                value: a.parse().map_err(|_| bad(format!("'max' expects a number, got '{}'", a)))?,
            },
            ("len", Some(a)) => Rule::Len {
                value: a.parse().map_err(|_| bad(format!("'len' expects a count, got '{}'", a)))?,
            },
            ("oneof", Some(a)) => Rule::OneOf {
                values: a.split_whitespace().map(str::to_string).collect(),
            },
            ("regex", Some(a)) => pattern(a).map_err(bad)?,
            (name, _) => return Err(bad(format!("unknown or malformed constraint '{}'", name))),
        };
        set.rules.push(rule);
    }
    Ok(set)
}

/// Expand an alias, or accept a literal expression that compiles.
fn pattern(arg: &str) -> Result<Rule, String> {
    if let Some((_, pattern, message)) = PATTERN_ALIASES.iter().find(|(alias, _, _)| *alias == arg) {
        return Ok(Rule::Pattern {
            pattern: pattern.to_string(),
            message: message.to_string(),
        });
    }
    Regex::new(arg).map_err(|e| format!("invalid pattern '{}': {}", arg, e))?;
    Ok(Rule::Pattern {
        pattern: arg.to_string(),
        message: format!("must match {}", arg),
    })
}
