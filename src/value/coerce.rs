//! Type-directed conversion between loose JSON input and [`FieldValue`]s.

use super::{Element, FieldValue, Reference};
use crate::case::to_dash_case;
use crate::error::AppError;
use crate::schema::{Entity, Field, FieldKind, Model, Registry, MEDIA_KEY};
use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

impl Field {
    /// Zero value of the field: empty list for multiple fields, the scalar zero otherwise.
    pub fn zero_value(&self) -> FieldValue {
        if self.multiple {
            FieldValue::List(Vec::new())
        } else {
            self.element_zero()
        }
    }

    fn element_zero(&self) -> FieldValue {
        match self.kind {
            FieldKind::Bool => FieldValue::Bool(false),
            FieldKind::Int => FieldValue::Int(0),
            FieldKind::Float => FieldValue::Float(0.0),
            FieldKind::Text => FieldValue::Text(String::new()),
            FieldKind::Uuid => FieldValue::Uuid(Uuid::nil()),
            FieldKind::Time | FieldKind::Json | FieldKind::Media | FieldKind::Association => FieldValue::Null,
        }
    }

    /// Carries a top-level `required` constraint.
    pub fn is_required(&self) -> bool {
        self.constraints.as_deref().map_or(false, |c| {
            c.split(',')
                .map(str::trim)
                .take_while(|t| *t != "dive")
                .any(|t| t == "required")
        })
    }

    /// Optional unique text left empty: stored as NULL and exempt from the uniqueness check.
    pub fn is_blank_unique(&self, value: &FieldValue) -> bool {
        self.unique
            && !self.primary
            && !self.is_required()
            && matches!(value, FieldValue::Text(s) if s.is_empty())
    }

    /// Convert a raw value into this field's static type.
    pub fn to_static_value(&self, registry: &Registry, raw: &Value) -> Result<FieldValue, AppError> {
        if raw.is_null() {
            return Ok(self.zero_value());
        }
        if !self.multiple {
            return self.to_static_element(registry, raw);
        }
        match raw {
            Value::Array(items) => items
                .iter()
                .map(|item| self.to_static_element(registry, item))
                .collect::<Result<Vec<_>, _>>()
                .map(FieldValue::List),
            // a bare id on a multi-valued reference is a list of one
            scalar if self.is_reference() && !scalar.is_object() => {
                Ok(FieldValue::List(vec![self.to_static_element(registry, scalar)?]))
            }
            other => Err(AppError::invalid_value(
                &self.code,
                format!("expected an array, got {}", json_type(other)),
            )),
        }
    }

    /// Absent input behaves like null.
    pub fn to_static_value_opt(&self, registry: &Registry, raw: Option<&Value>) -> Result<FieldValue, AppError> {
        match raw {
            Some(raw) => self.to_static_value(registry, raw),
            None => Ok(self.zero_value()),
        }
    }

    /// Coerce each raw value as a single element of this field. Nulls stay `Null`
    /// so filters can express open bounds and `IS NULL`.
    pub fn slice_to_static_values(&self, registry: &Registry, raws: &[Value]) -> Result<Vec<FieldValue>, AppError> {
        raws.iter()
            .map(|raw| match raw {
                Value::Null => Ok(FieldValue::Null),
                raw => self.to_static_element(registry, raw),
            })
            .collect()
    }

    /// Convert one element (ignoring `multiple`).
    pub fn to_static_element(&self, registry: &Registry, raw: &Value) -> Result<FieldValue, AppError> {
        if raw.is_null() {
            return Ok(self.element_zero());
        }
        match self.kind {
            FieldKind::Association => {
                let target = registry
                    .field_target(self)
                    .ok_or_else(|| AppError::Internal(format!("field {} is not linked", self.code)))?;
                decode_reference(registry, target, &self.code, raw)
            }
            FieldKind::Media => decode_media(&self.code, raw),
            kind => decode_scalar(&self.code, kind, raw),
        }
    }

    /// Project a value back to JSON. References collapse to their primary key.
    pub fn from_static_value(&self, registry: &Registry, value: &FieldValue) -> Value {
        match value {
            FieldValue::List(items) => Value::Array(items.iter().map(|v| self.collapse(registry, v)).collect()),
            other => self.collapse(registry, other),
        }
    }

    fn collapse(&self, registry: &Registry, value: &FieldValue) -> Value {
        match value {
            FieldValue::Ref(reference) if self.is_reference() => reference
                .get(self.reference_key(registry))
                .map(FieldValue::to_json)
                .unwrap_or(Value::Null),
            other => other.to_json(),
        }
    }

    /// Key identifying a referenced object: the target's primary key code, or `id` for media.
    pub fn reference_key<'r>(&'r self, registry: &'r Registry) -> &'r str {
        match registry.field_target(self) {
            Some(target) => &target.primary_key().code,
            None => MEDIA_KEY,
        }
    }

    /// Primary keys held by a reference value, in order, nulls skipped.
    pub fn reference_keys(&self, registry: &Registry, value: &FieldValue) -> Vec<FieldValue> {
        let key = self.reference_key(registry);
        let pick = |v: &FieldValue| match v {
            FieldValue::Ref(r) => r.get(key).filter(|k| !k.is_null()).cloned(),
            _ => None,
        };
        match value {
            FieldValue::List(items) => items.iter().filter_map(pick).collect(),
            single => pick(single).into_iter().collect(),
        }
    }

    /// Whether two values are the same for change detection. References compare by primary key.
    pub fn same_value(&self, registry: &Registry, a: &FieldValue, b: &FieldValue) -> bool {
        self.from_static_value(registry, a) == self.from_static_value(registry, b)
    }
}

fn json_type(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn decode<T: DeserializeOwned>(code: &str, raw: &Value) -> Result<T, AppError> {
    serde_json::from_value(raw.clone()).map_err(|e| AppError::invalid_value(code, e))
}

fn decode_scalar(code: &str, kind: FieldKind, raw: &Value) -> Result<FieldValue, AppError> {
    match (kind, raw) {
        (FieldKind::Bool, Value::Bool(b)) => return Ok(FieldValue::Bool(*b)),
        (FieldKind::Text, Value::String(s)) => return Ok(FieldValue::Text(s.clone())),
        (FieldKind::Int, Value::Number(n)) if n.is_i64() => {
            if let Some(n) = n.as_i64() {
                return Ok(FieldValue::Int(n));
            }
        }
        (FieldKind::Float, Value::Number(n)) => {
            if let Some(f) = n.as_f64() {
                return Ok(FieldValue::Float(f));
            }
        }
        (FieldKind::Json, v) => return Ok(FieldValue::Json(v.clone())),
        _ => {}
    }

    // query strings and path segments deliver everything as text
    if let Value::String(s) = raw {
        let s = s.trim();
        let parsed = match kind {
            FieldKind::Bool => Some(s.parse::<bool>().map(FieldValue::Bool).map_err(|e| e.to_string())),
            FieldKind::Int => Some(s.parse::<i64>().map(FieldValue::Int).map_err(|e| e.to_string())),
            FieldKind::Float => Some(match s.parse::<f64>() {
                Ok(f) if f.is_finite() => Ok(FieldValue::Float(f)),
                Ok(f) => Err(format!("{} is not a finite number", f)),
                Err(e) => Err(e.to_string()),
            }),
            FieldKind::Time => s
                .parse::<NaiveDate>()
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|dt| Ok(FieldValue::Time(dt.and_utc()))),
            _ => None,
        };
        if let Some(parsed) = parsed {
            return parsed.map_err(|e| AppError::invalid_value(code, e));
        }
    }

    match kind {
        FieldKind::Bool => decode::<bool>(code, raw).map(FieldValue::Bool),
        FieldKind::Int => decode::<i64>(code, raw).map(FieldValue::Int),
        FieldKind::Float => decode::<f64>(code, raw).map(FieldValue::Float),
        FieldKind::Text => decode::<String>(code, raw).map(FieldValue::Text),
        FieldKind::Uuid => decode::<Uuid>(code, raw).map(FieldValue::Uuid),
        FieldKind::Time => decode::<DateTime<Utc>>(code, raw).map(FieldValue::Time),
        FieldKind::Json => Ok(FieldValue::Json(raw.clone())),
        FieldKind::Media | FieldKind::Association => {
            Err(AppError::Internal(format!("field {} is not a scalar", code)))
        }
    }
}

/// Expand a bare key into `{pk: key}` and decode the object through the target's fields.
fn decode_reference(registry: &Registry, target: &Model, code: &str, raw: &Value) -> Result<FieldValue, AppError> {
    let pk = target.primary_key();
    let object = match raw {
        Value::Object(map) => map.clone(),
        Value::Array(_) => return Err(AppError::invalid_value(code, "expected a single reference, got array")),
        scalar => {
            let mut map = Map::new();
            map.insert(pk.code.clone(), scalar.clone());
            map
        }
    };

    let mut reference = Reference::new();
    for field in &target.fields {
        if let Some(v) = object.get(&field.code) {
            let value = field.to_static_value(registry, v).map_err(|e| nest(code, e))?;
            reference.insert(field.code.clone(), value);
        }
    }
    match reference.get(&pk.code) {
        Some(key) if !key.is_null() => Ok(FieldValue::Ref(reference)),
        _ => Err(AppError::invalid_value(code, format!("reference requires '{}'", pk.code))),
    }
}

fn decode_media(code: &str, raw: &Value) -> Result<FieldValue, AppError> {
    let key = match raw {
        Value::Object(map) => map
            .get(MEDIA_KEY)
            .ok_or_else(|| AppError::invalid_value(code, format!("media reference requires '{}'", MEDIA_KEY)))?,
        scalar => scalar,
    };
    let id = decode_scalar(code, FieldKind::Uuid, key)?;
    Ok(FieldValue::Ref(Reference::from([(MEDIA_KEY.to_string(), id)])))
}

fn nest(code: &str, err: AppError) -> AppError {
    match err {
        AppError::InvalidValue { field, reason } => AppError::InvalidValue {
            field: format!("{}.{}", code, field),
            reason,
        },
        other => other,
    }
}

impl Model {
    /// Build an element from a raw object. Every selected field is present; absent keys take the zero value.
    pub fn new_element(
        &self,
        registry: &Registry,
        raw: &Map<String, Value>,
        select: impl Fn(&Field) -> bool,
    ) -> Result<Element, AppError> {
        let mut element = Element::new(self.id);
        for field in self.fields.iter().filter(|f| select(f)) {
            let value = field.to_static_value_opt(registry, raw.get(&field.code))?;
            element.set(field.code.clone(), value);
        }
        Ok(element)
    }

    /// Like [`Model::new_element`] but only keys present in `raw` are set.
    pub fn patch_element(
        &self,
        registry: &Registry,
        raw: &Map<String, Value>,
        select: impl Fn(&Field) -> bool,
    ) -> Result<Element, AppError> {
        let mut element = Element::new(self.id);
        for field in self.fields.iter().filter(|f| select(f)) {
            if let Some(v) = raw.get(&field.code) {
                element.set(field.code.clone(), field.to_static_value(registry, v)?);
            }
        }
        Ok(element)
    }

    /// Project an element into a JSON object, dropping fields the selector rejects.
    pub fn project(&self, registry: &Registry, element: &Element, select: impl Fn(&Field) -> bool) -> Map<String, Value> {
        self.fields
            .iter()
            .filter(|f| select(f))
            .filter_map(|f| {
                element
                    .get(&f.code)
                    .map(|v| (f.code.clone(), f.from_static_value(registry, v)))
            })
            .collect()
    }
}

impl Element {
    /// Convert a typed domain value into a generic element.
    pub fn from_entity<T: Entity + Serialize>(registry: &Registry, entity: &T) -> Result<Element, AppError> {
        let model = entity_model::<T>(registry)?;
        let raw = match serde_json::to_value(entity).map_err(|e| AppError::Internal(e.to_string()))? {
            Value::Object(map) => map,
            other => {
                return Err(AppError::Internal(format!(
                    "{} serialized to {}, expected an object",
                    model.code,
                    json_type(&other)
                )))
            }
        };
        model.new_element(registry, &raw, |_| true)
    }

    /// Convert back into a typed domain value. References arrive as primary keys.
    pub fn into_entity<T: Entity + DeserializeOwned>(&self, registry: &Registry) -> Result<T, AppError> {
        let model = entity_model::<T>(registry)?;
        let object = model.project(registry, self, |_| true);
        serde_json::from_value(Value::Object(object)).map_err(|e| AppError::Internal(e.to_string()))
    }
}

fn entity_model<T: Entity>(registry: &Registry) -> Result<&Model, AppError> {
    let code = to_dash_case(T::TABLE);
    registry
        .get(&code)
        .ok_or_else(|| AppError::NotFound(format!("model '{}'", code)))
}
