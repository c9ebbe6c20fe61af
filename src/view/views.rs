//! UI form descriptors: create, update, filter and list views of a model.

use crate::error::ConfigError;
use crate::schema::{Field, FieldKind, Model, Registry, View};
use crate::view::rules::{validation_rules, RuleSet};
use serde::Serialize;
use serde_json::Value;

/// Parameterized request for the distinct values of one field.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Lookup {
    pub model: String,
    pub field: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SelectOption {
    pub value: Value,
    pub label: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldView {
    pub code: String,
    pub title: String,
    pub widget: String,
    #[serde(rename = "type")]
    pub type_name: &'static str,
    pub multiple: bool,
    pub sortable: bool,
    pub disabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub precision: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lookup: Option<Lookup>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<SelectOption>,
}

impl FieldView {
    fn of(registry: &Registry, field: &Field, disabled: bool) -> Self {
        FieldView {
            code: field.code.clone(),
            title: field.title.clone(),
            widget: field.widget.clone(),
            type_name: field.kind.type_name(),
            multiple: field.multiple,
            sortable: field.sortable,
            disabled,
            block: field.block.clone(),
            precision: field.precision,
            step: field.step,
            lookup: registry.field_target(field).map(|target| Lookup {
                model: target.code.clone(),
                field: target.primary_key().code.clone(),
            }),
            options: Vec::new(),
        }
    }
}

/// Everything a client needs to render and validate one model.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSchema {
    pub code: String,
    pub title: String,
    pub primary_key: String,
    pub create: Vec<FieldView>,
    pub update: Vec<FieldView>,
    pub filter: Vec<FieldView>,
    pub list: Vec<FieldView>,
    pub rules: Vec<RuleSet>,
}

pub fn model_schema(registry: &Registry, model: &Model) -> Result<ModelSchema, ConfigError> {
    Ok(ModelSchema {
        code: model.code.clone(),
        title: model.title.clone(),
        primary_key: model.primary_key().code.clone(),
        create: create_view(registry, model),
        update: update_view(registry, model),
        filter: filter_view(registry, model),
        list: list_view(registry, model),
        rules: validation_rules(registry, model)?,
    })
}

fn form_view(registry: &Registry, model: &Model, view: View) -> Vec<FieldView> {
    model
        .fields
        .iter()
        .filter(|f| !f.hidden.contains(view))
        .map(|f| FieldView::of(registry, f, f.disabled.contains(view)))
        .collect()
}

pub fn create_view(registry: &Registry, model: &Model) -> Vec<FieldView> {
    form_view(registry, model, View::Create)
}

pub fn update_view(registry: &Registry, model: &Model) -> Vec<FieldView> {
    form_view(registry, model, View::Update)
}

/// Columns of the list view. Media and association fields are never listed.
pub fn list_view(registry: &Registry, model: &Model) -> Vec<FieldView> {
    model
        .fields
        .iter()
        .filter(|f| !f.hidden.list && !f.is_reference())
        .map(|f| FieldView::of(registry, f, true))
        .collect()
}

/// Filterable fields, re-typed for query building.
pub fn filter_view(registry: &Registry, model: &Model) -> Vec<FieldView> {
    model
        .fields
        .iter()
        .filter(|f| f.filterable && !f.is_media() && f.kind != FieldKind::Json)
        .map(|f| {
            let mut view = FieldView::of(registry, f, false);
            view.sortable = false;
            match f.kind {
                FieldKind::Time => {
                    view.widget = "dateRange".into();
                    view.multiple = false;
                }
                FieldKind::Bool => {
                    view.widget = "select".into();
                    view.multiple = false;
                    view.options = vec![
                        SelectOption {
                            value: Value::Bool(true),
                            label: "Yes".into(),
                        },
                        SelectOption {
                            value: Value::Bool(false),
                            label: "No".into(),
                        },
                    ];
                }
                FieldKind::Association => {
                    view.widget = "select".into();
                    view.multiple = true;
                }
                _ => {
                    view.widget = "select".into();
                    view.multiple = true;
                    view.lookup = Some(Lookup {
                        model: model.code.clone(),
                        field: f.code.clone(),
                    });
                }
            }
            view
        })
        .collect()
}
