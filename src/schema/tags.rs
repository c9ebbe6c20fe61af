//! Attribute annotations: `key[:value]` tokens separated by `;`, applied through a fixed handler table.

use crate::case::{humanize, to_camel_case, to_snake_case};
use crate::error::ConfigError;
use crate::schema::model::{AssociationKind, Field, FieldKind, ModelId, View, ViewSet};
use crate::schema::types::{Attribute, EntityTarget, Kind};

/// Parsed annotation of one attribute.
#[derive(Debug, Default)]
pub(crate) struct Tags {
    entries: Vec<(String, Option<String>)>,
}

impl Tags {
    /// `Ok(None)` when the attribute is marked ignored (`-`).
    pub(crate) fn parse(model: &str, attr: &Attribute) -> Result<Option<Tags>, ConfigError> {
        let mut tags = Tags::default();
        for token in attr.tags.split(';').map(str::trim).filter(|t| !t.is_empty()) {
            if token == "-" {
                return Ok(None);
            }
            let (key, value) = match token.split_once(':') {
                Some((k, v)) => (k.trim(), Some(v.trim().to_string())),
                None => (token, None),
            };
            if key.is_empty() {
                return Err(ConfigError::annotation(model, &attr.name, format!("empty tag key in '{}'", token)));
            }
            if !HANDLERS.iter().any(|(k, _)| *k == key) {
                return Err(ConfigError::annotation(model, &attr.name, format!("unknown tag '{}'", key)));
            }
            if tags.entries.iter().any(|(k, _)| k == key) {
                return Err(ConfigError::annotation(model, &attr.name, format!("duplicate tag '{}'", key)));
            }
            tags.entries.push((key.to_string(), value));
        }
        Ok(Some(tags))
    }

    /// `None`: absent. `Some(None)`: bare flag. `Some(Some(v))`: explicit value.
    fn get(&self, key: &str) -> Option<Option<&str>> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_deref())
    }
}

/// Association skeleton queued for the registry link pass.
#[derive(Clone, Debug)]
pub(crate) struct AssociationDecl {
    pub kind: AssociationKind,
    pub target: EntityTarget,
    pub foreign_key: Option<String>,
    pub reference: Option<String>,
    pub join_table: Option<String>,
    pub join_foreign_key: Option<String>,
    pub join_reference: Option<String>,
    pub join_sort: Option<String>,
}

pub(crate) struct Draft<'a> {
    model: &'a str,
    attr: &'a Attribute,
    pub field: Field,
    pub association: Option<AssociationDecl>,
    pub disabled_declared: bool,
}

type Tag<'t> = Option<Option<&'t str>>;
type Handler = fn(&mut Draft<'_>, Tag<'_>) -> Result<(), ConfigError>;

/// Applied in this order for every attribute, whether or not the tag is present.
const HANDLERS: &[(&str, Handler)] = &[
    ("code", code),
    ("column", column),
    ("title", title),
    ("pk", pk),
    ("multiple", multiple),
    ("sort", sort),
    ("filter", filter),
    ("unique", unique),
    ("hidden", hidden),
    ("disabled", disabled),
    ("position", position),
    ("block", block),
    ("precision", precision),
    ("step", step),
    ("view", view),
    ("belongsTo", belongs_to),
    ("hasOne", has_one),
    ("hasMany", has_many),
    ("m2m", many_to_many),
    ("fk", foreign_key),
    ("ref", reference),
    ("joinTable", join_table),
    ("joinFk", join_foreign_key),
    ("joinRef", join_reference),
    ("joinSort", join_sort),
];

/// Build one field draft from an attribute. `Ok(None)` for ignored attributes.
pub(crate) fn build_field<'a>(
    model_code: &'a str,
    model: ModelId,
    index: usize,
    attr: &'a Attribute,
) -> Result<Option<Draft<'a>>, ConfigError> {
    let Some(tags) = Tags::parse(model_code, attr)? else {
        return Ok(None);
    };
    let (kind, multiple, target) = static_kind(model_code, attr)?;
    let mut draft = Draft {
        model: model_code,
        attr,
        field: Field {
            model,
            name: attr.name.clone(),
            code: String::new(),
            column: String::new(),
            title: String::new(),
            kind,
            multiple,
            primary: false,
            sortable: false,
            filterable: false,
            unique: false,
            hidden: ViewSet::NONE,
            disabled: ViewSet::NONE,
            widget: String::new(),
            precision: None,
            step: None,
            position: None,
            block: None,
            index,
            constraints: attr.constraints.clone(),
            association: None,
        },
        association: target.map(|target| AssociationDecl {
            kind: if multiple {
                AssociationKind::ManyToMany
            } else {
                AssociationKind::BelongsTo
            },
            target,
            foreign_key: None,
            reference: None,
            join_table: None,
            join_foreign_key: None,
            join_reference: None,
            join_sort: None,
        }),
        disabled_declared: false,
    };
    for (key, handler) in HANDLERS {
        handler(&mut draft, tags.get(key))?;
    }
    Ok(Some(draft))
}

fn static_kind(
    model: &str,
    attr: &Attribute,
) -> Result<(FieldKind, bool, Option<EntityTarget>), ConfigError> {
    let (inner, multiple) = match &attr.kind {
        Kind::List(inner) => (inner.as_ref(), true),
        other => (other, false),
    };
    let kind = match inner {
        Kind::Bool => FieldKind::Bool,
        Kind::Int => FieldKind::Int,
        Kind::Float => FieldKind::Float,
        Kind::Text => FieldKind::Text,
        Kind::Uuid => FieldKind::Uuid,
        Kind::Time => FieldKind::Time,
        Kind::Json => FieldKind::Json,
        Kind::Media => FieldKind::Media,
        Kind::Entity(target) => return Ok((FieldKind::Association, multiple, Some(target.clone()))),
        Kind::List(_) => {
            return Err(ConfigError::annotation(model, &attr.name, "nested sequences are not supported"))
        }
    };
    Ok((kind, multiple, None))
}

impl Draft<'_> {
    fn err(&self, message: impl Into<String>) -> ConfigError {
        ConfigError::annotation(self.model, &self.attr.name, message)
    }

    fn flag(&self, key: &str, tag: Tag<'_>) -> Result<bool, ConfigError> {
        match tag {
            None => Ok(false),
            Some(None) => Ok(true),
            Some(Some(_)) => Err(self.err(format!("tag '{}' takes no value", key))),
        }
    }

    fn value(&self, key: &str, tag: Tag<'_>) -> Result<Option<String>, ConfigError> {
        match tag {
            None => Ok(None),
            Some(Some(v)) if !v.is_empty() => Ok(Some(v.to_string())),
            _ => Err(self.err(format!("tag '{}' requires a value", key))),
        }
    }

    fn association_mut(&mut self, key: &str) -> Result<&mut AssociationDecl, ConfigError> {
        let err = self.err(format!("tag '{}' applies to entity references only", key));
        self.association.as_mut().ok_or(err)
    }

    fn views(&self, value: &str) -> Result<ViewSet, ConfigError> {
        let mut set = ViewSet::NONE;
        for part in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let view = View::parse(part).ok_or_else(|| self.err(format!("unknown view '{}'", part)))?;
            set.insert(view);
        }
        Ok(set)
    }

    fn set_kind(&mut self, key: &str, tag: Tag<'_>, kind: AssociationKind) -> Result<(), ConfigError> {
        if !self.flag(key, tag)? {
            return Ok(());
        }
        let multiple = self.field.multiple;
        let wants_multiple = matches!(kind, AssociationKind::HasMany | AssociationKind::ManyToMany);
        if multiple != wants_multiple {
            return Err(self.err(format!(
                "'{}' requires a {} reference",
                key,
                if wants_multiple { "sequence" } else { "single" }
            )));
        }
        self.association_mut(key)?.kind = kind;
        Ok(())
    }

    fn set_key(
        &mut self,
        key: &str,
        tag: Tag<'_>,
        apply: fn(&mut AssociationDecl, String),
    ) -> Result<(), ConfigError> {
        if let Some(v) = self.value(key, tag)? {
            apply(self.association_mut(key)?, v);
        }
        Ok(())
    }
}

fn code(d: &mut Draft<'_>, tag: Tag<'_>) -> Result<(), ConfigError> {
    d.field.code = d.value("code", tag)?.unwrap_or_else(|| to_camel_case(&d.attr.name));
    Ok(())
}

fn column(d: &mut Draft<'_>, tag: Tag<'_>) -> Result<(), ConfigError> {
    d.field.column = d.value("column", tag)?.unwrap_or_else(|| to_snake_case(&d.attr.name));
    Ok(())
}

fn title(d: &mut Draft<'_>, tag: Tag<'_>) -> Result<(), ConfigError> {
    d.field.title = d.value("title", tag)?.unwrap_or_else(|| humanize(&d.attr.name));
    Ok(())
}

fn pk(d: &mut Draft<'_>, tag: Tag<'_>) -> Result<(), ConfigError> {
    if d.flag("pk", tag)? {
        if d.field.multiple || d.field.is_reference() || d.field.kind == FieldKind::Json {
            return Err(d.err("primary key must be a scalar"));
        }
        d.field.primary = true;
    }
    Ok(())
}

fn multiple(d: &mut Draft<'_>, tag: Tag<'_>) -> Result<(), ConfigError> {
    if d.flag("multiple", tag)? && !d.field.multiple {
        return Err(d.err("'multiple' requires a sequence type"));
    }
    Ok(())
}

fn sort(d: &mut Draft<'_>, tag: Tag<'_>) -> Result<(), ConfigError> {
    d.field.sortable = d.flag("sort", tag)?;
    if d.field.sortable && (d.field.multiple || d.field.is_reference()) {
        return Err(d.err("only single scalar fields are sortable"));
    }
    Ok(())
}

fn filter(d: &mut Draft<'_>, tag: Tag<'_>) -> Result<(), ConfigError> {
    d.field.filterable = d.flag("filter", tag)?;
    Ok(())
}

fn unique(d: &mut Draft<'_>, tag: Tag<'_>) -> Result<(), ConfigError> {
    d.field.unique = d.flag("unique", tag)?;
    if d.field.unique && (d.field.multiple || d.field.is_association()) {
        return Err(d.err("'unique' applies to single stored values"));
    }
    Ok(())
}

fn hidden(d: &mut Draft<'_>, tag: Tag<'_>) -> Result<(), ConfigError> {
    d.field.hidden = match tag {
        None => ViewSet::NONE,
        Some(None) => ViewSet {
            create: true,
            update: true,
            list: true,
        },
        Some(Some(v)) => d.views(v)?,
    };
    Ok(())
}

fn disabled(d: &mut Draft<'_>, tag: Tag<'_>) -> Result<(), ConfigError> {
    d.disabled_declared = tag.is_some();
    d.field.disabled = match tag {
        None if d.field.primary => ViewSet::EDIT,
        None => ViewSet::NONE,
        Some(None) => ViewSet::EDIT,
        Some(Some(v)) => d.views(v)?,
    };
    Ok(())
}

fn position(d: &mut Draft<'_>, tag: Tag<'_>) -> Result<(), ConfigError> {
    if let Some(v) = d.value("position", tag)? {
        let n: u32 = v.parse().map_err(|_| d.err(format!("position '{}' is not a number", v)))?;
        d.field.position = (n > 0).then_some(n);
    }
    Ok(())
}

fn block(d: &mut Draft<'_>, tag: Tag<'_>) -> Result<(), ConfigError> {
    d.field.block = d.value("block", tag)?;
    Ok(())
}

fn precision(d: &mut Draft<'_>, tag: Tag<'_>) -> Result<(), ConfigError> {
    if let Some(v) = d.value("precision", tag)? {
        if d.field.kind != FieldKind::Float {
            return Err(d.err("'precision' applies to float fields"));
        }
        let p: u32 = v.parse().map_err(|_| d.err(format!("precision '{}' is not a number", v)))?;
        d.field.precision = Some(p);
    }
    Ok(())
}

fn step(d: &mut Draft<'_>, tag: Tag<'_>) -> Result<(), ConfigError> {
    match d.value("step", tag)? {
        Some(v) => {
            if d.field.kind != FieldKind::Float {
                return Err(d.err("'step' applies to float fields"));
            }
            let s: f64 = v.parse().map_err(|_| d.err(format!("step '{}' is not a number", v)))?;
            d.field.step = Some(s);
        }
        None => {
            d.field.step = d
                .field
                .precision
                .and_then(|p| i32::try_from(p).ok())
                .map(|p| 10f64.powi(-p));
        }
    }
    Ok(())
}

fn view(d: &mut Draft<'_>, tag: Tag<'_>) -> Result<(), ConfigError> {
    d.field.widget = match d.value("view", tag)? {
        Some(v) => v,
        None => match d.field.kind {
            FieldKind::Bool => "checkbox",
            FieldKind::Int | FieldKind::Float => "number",
            FieldKind::Association => "select",
            FieldKind::Time => "datetime",
            FieldKind::Media => "media",
            FieldKind::Json => "json",
            FieldKind::Text | FieldKind::Uuid => "text",
        }
        .to_string(),
    };
    Ok(())
}

fn belongs_to(d: &mut Draft<'_>, tag: Tag<'_>) -> Result<(), ConfigError> {
    d.set_kind("belongsTo", tag, AssociationKind::BelongsTo)
}

fn has_one(d: &mut Draft<'_>, tag: Tag<'_>) -> Result<(), ConfigError> {
    d.set_kind("hasOne", tag, AssociationKind::HasOne)
}

fn has_many(d: &mut Draft<'_>, tag: Tag<'_>) -> Result<(), ConfigError> {
    d.set_kind("hasMany", tag, AssociationKind::HasMany)
}

fn many_to_many(d: &mut Draft<'_>, tag: Tag<'_>) -> Result<(), ConfigError> {
    d.set_kind("m2m", tag, AssociationKind::ManyToMany)
}

fn foreign_key(d: &mut Draft<'_>, tag: Tag<'_>) -> Result<(), ConfigError> {
    d.set_key("fk", tag, |a, v| a.foreign_key = Some(v))
}

fn reference(d: &mut Draft<'_>, tag: Tag<'_>) -> Result<(), ConfigError> {
    d.set_key("ref", tag, |a, v| a.reference = Some(v))
}

fn join_table(d: &mut Draft<'_>, tag: Tag<'_>) -> Result<(), ConfigError> {
    d.set_key("joinTable", tag, |a, v| a.join_table = Some(v))
}

fn join_foreign_key(d: &mut Draft<'_>, tag: Tag<'_>) -> Result<(), ConfigError> {
    d.set_key("joinFk", tag, |a, v| a.join_foreign_key = Some(v))
}

fn join_reference(d: &mut Draft<'_>, tag: Tag<'_>) -> Result<(), ConfigError> {
    d.set_key("joinRef", tag, |a, v| a.join_reference = Some(v))
}

fn join_sort(d: &mut Draft<'_>, tag: Tag<'_>) -> Result<(), ConfigError> {
    d.set_key("joinSort", tag, |a, v| a.join_sort = Some(v))?;
    // Last handler: join tags are only meaningful on many-to-many.
    if let Some(a) = &d.association {
        let has_join = a.join_table.is_some()
            || a.join_foreign_key.is_some()
            || a.join_reference.is_some()
            || a.join_sort.is_some();
        if has_join && a.kind != AssociationKind::ManyToMany {
            return Err(d.err("join tags require a many-to-many association"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(attr: &Attribute) -> Result<Option<Draft<'_>>, ConfigError> {
        build_field("examples", ModelId(0), 0, attr)
    }

    #[test]
    fn defaults_follow_conventions() {
        let attr = Attribute::new("created_by_name", Kind::Text);
        let d = draft(&attr).unwrap().unwrap();
        assert_eq!(d.field.code, "createdByName");
        assert_eq!(d.field.column, "created_by_name");
        assert_eq!(d.field.title, "Created by name");
        assert_eq!(d.field.widget, "text");
        assert!(!d.field.sortable && !d.field.filterable && !d.field.primary);
    }

    #[test]
    fn explicit_values_override_defaults() {
        let attr = Attribute::new("price", Kind::Float)
            .tag("code:cost;column:price_cents;title:Cost;sort;filter;precision:2;position:3;block:main");
        let d = draft(&attr).unwrap().unwrap();
        assert_eq!(d.field.code, "cost");
        assert_eq!(d.field.column, "price_cents");
        assert_eq!(d.field.title, "Cost");
        assert!(d.field.sortable && d.field.filterable);
        assert_eq!(d.field.precision, Some(2));
        assert!((d.field.step.unwrap() - 0.01).abs() < 1e-12);
        assert_eq!(d.field.position, Some(3));
        assert_eq!(d.field.block.as_deref(), Some("main"));
        assert_eq!(d.field.widget, "number");
    }

    #[test]
    fn ignored_attribute_is_skipped() {
        let attr = Attribute::new("cache", Kind::Json).tag("-");
        assert!(draft(&attr).unwrap().is_none());
    }

    #[test]
    fn pk_is_disabled_for_edit_unless_declared() {
        let attr = Attribute::new("id", Kind::Uuid).tag("pk");
        let d = draft(&attr).unwrap().unwrap();
        assert!(d.field.primary);
        assert_eq!(d.field.disabled, ViewSet::EDIT);

        let attr = Attribute::new("slug", Kind::Text).tag("pk;disabled:update");
        let d = draft(&attr).unwrap().unwrap();
        assert!(!d.field.disabled.create && d.field.disabled.update);
    }

    #[test]
    fn malformed_annotations_fail() {
        for tags in ["bogus", "sort;sort", "position:x", "code", "sort:yes", "precision:2"] {
            let attr = Attribute::new("name", Kind::Text).tag(tags);
            assert!(draft(&attr).is_err(), "tags '{}' should fail", tags);
        }
        let attr = Attribute::new("name", Kind::Text).tag("multiple");
        assert!(draft(&attr).is_err());
        let attr = Attribute::new("name", Kind::Text).tag("fk:x");
        assert!(draft(&attr).is_err());
    }

    #[test]
    fn association_kind_defaults_and_checks() {
        let single = Attribute::new("category", Kind::entity_code("categories"));
        let d = draft(&single).unwrap().unwrap();
        assert_eq!(d.field.kind, FieldKind::Association);
        assert_eq!(d.field.widget, "select");
        assert_eq!(d.association.as_ref().unwrap().kind, AssociationKind::BelongsTo);

        let many = Attribute::new("tags", Kind::list(Kind::entity_code("tags"))).tag("joinSort:position");
        let d = draft(&many).unwrap().unwrap();
        assert!(d.field.multiple);
        let a = d.association.unwrap();
        assert_eq!(a.kind, AssociationKind::ManyToMany);
        assert_eq!(a.join_sort.as_deref(), Some("position"));

        let bad = Attribute::new("items", Kind::entity_code("items")).tag("hasMany");
        assert!(draft(&bad).is_err());
        let bad = Attribute::new("items", Kind::list(Kind::entity_code("items"))).tag("hasMany;joinSort:pos");
        assert!(draft(&bad).is_err());
    }

    #[test]
    fn views_parse() {
        let attr = Attribute::new("secret", Kind::Text).tag("hidden:list,update");
        let d = draft(&attr).unwrap().unwrap();
        assert!(d.field.hidden.list && d.field.hidden.update && !d.field.hidden.create);

        let attr = Attribute::new("secret", Kind::Text).tag("hidden:everywhere");
        assert!(draft(&attr).is_err());
    }
}
