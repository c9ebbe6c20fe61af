//! Structural validation: the rule trees of each model applied to candidate elements.

use crate::error::AppError;
use crate::schema::{Model, ModelId, Registry};
use crate::value::Element;
use crate::view::{validation_rules, Rule, RuleSet};
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

const EMAIL_PATTERN: &str = r"^[^@\s]+@[^@\s]+\.[^@\s]+$";

/// Structural validator consumed by the action layer.
pub trait Validator: Send + Sync {
    /// Validate every constrained field. Absent fields count as zero values.
    fn validate(&self, registry: &Registry, element: &Element) -> Result<(), AppError>;

    /// Validate only fields present in the element; `required` is not enforced for missing ones.
    fn validate_partial(&self, registry: &Registry, element: &Element) -> Result<(), AppError>;
}

/// Default [`Validator`]: interprets the generated rule sets, caching them per model.
#[derive(Default)]
pub struct RuleValidator {
    rules: RwLock<HashMap<ModelId, Arc<Vec<RuleSet>>>>,
    patterns: RwLock<HashMap<String, Regex>>,
}

impl RuleValidator {
    pub fn new() -> Self {
        Self::default()
    }

    fn rules_for(&self, registry: &Registry, model: &Model) -> Result<Arc<Vec<RuleSet>>, AppError> {
        if let Some(rules) = self.rules.read().ok().and_then(|m| m.get(&model.id).cloned()) {
            return Ok(rules);
        }
        let rules = Arc::new(validation_rules(registry, model)?);
        if let Ok(mut cache) = self.rules.write() {
            cache.insert(model.id, rules.clone());
        }
        Ok(rules)
    }

    fn pattern(&self, pattern: &str) -> Result<Regex, AppError> {
        if let Some(re) = self.patterns.read().ok().and_then(|m| m.get(pattern).cloned()) {
            return Ok(re);
        }
        let re = Regex::new(pattern).map_err(|e| AppError::Internal(format!("invalid pattern {}: {}", pattern, e)))?;
        if let Ok(mut cache) = self.patterns.write() {
            cache.insert(pattern.to_string(), re.clone());
        }
        Ok(re)
    }

    fn check(&self, registry: &Registry, element: &Element, partial: bool) -> Result<(), AppError> {
        let model = registry.model(element.model);
        for set in self.rules_for(registry, model)?.iter() {
            let Some(field) = model.field(&set.field) else { continue };
            let value = match element.get(&set.field) {
                Some(v) => field.from_static_value(registry, v),
                None if partial => continue,
                None => Value::Null,
            };
            self.check_value(&set.field, &value, set)?;
        }
        Ok(())
    }

    fn check_value(&self, path: &str, v: &Value, set: &RuleSet) -> Result<(), AppError> {
        let fail = |message: String| Err(AppError::Validation(format!("{} {}", path, message)));
        for rule in &set.rules {
            match rule {
                Rule::Required => {
                    if is_zero(v) {
                        return fail("is required".into());
                    }
                }
                _ if v.is_null() => {}
                Rule::Min { value } => {
                    if measure(v).is_some_and(|n| n < *value) {
                        return fail(format!("must be at least {}", value));
                    }
                }
                Rule::Max { value } => {
                    if measure(v).is_some_and(|n| n > *value) {
                        return fail(format!("must be at most {}", value));
                    }
                }
                Rule::Len { value } => {
                    if measure(v).is_some_and(|n| n != *value as f64) {
                        return fail(format!("must have length {}", value));
                    }
                }
                Rule::Email => {
                    if let Some(s) = v.as_str() {
                        if !self.pattern(EMAIL_PATTERN)?.is_match(s) {
                            return fail("must be a valid email".into());
                        }
                    }
                }
                Rule::Uuid => {
                    if let Some(s) = v.as_str() {
                        if uuid::Uuid::parse_str(s).is_err() {
                            return fail("must be a valid UUID".into());
                        }
                    }
                }
                Rule::OneOf { values } => {
                    let text = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    if !values.iter().any(|a| *a == text) {
                        return fail(format!("must be one of: {}", values.join(", ")));
                    }
                }
                Rule::Pattern { pattern, message } => {
                    if let Some(s) = v.as_str() {
                        if !self.pattern(pattern)?.is_match(s) {
                            return fail(message.clone());
                        }
                    }
                }
            }
        }
        if let (Some(element), Value::Array(items)) = (&set.element, v) {
            for (i, item) in items.iter().enumerate() {
                self.check_value(&format!("{}[{}]", path, i), item, element)?;
            }
        }
        Ok(())
    }
}

impl Validator for RuleValidator {
    fn validate(&self, registry: &Registry, element: &Element) -> Result<(), AppError> {
        self.check(registry, element, false)
    }

    fn validate_partial(&self, registry: &Registry, element: &Element) -> Result<(), AppError> {
        self.check(registry, element, true)
    }
}

fn is_zero(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

/// Number, character count or item count, depending on the shape.
fn measure(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => Some(s.chars().count() as f64),
        Value::Array(a) => Some(a.len() as f64),
        _ => None,
    }
}
