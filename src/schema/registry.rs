//! Entity registry: builds models from declarations, links associations, orders fields.

use crate::case::singular;
use crate::error::ConfigError;
use crate::schema::model::{Association, AssociationKind, Field, Model, ModelId, CREATED_AT, UPDATED_AT};
use crate::schema::tags::{build_field, AssociationDecl};
use crate::schema::types::{Attribute, Declaration, EntityRef, EntityTarget, Kind};
use crate::schema::validate;
use std::collections::HashMap;

/// Read-only set of models. Built once at startup and shared behind an `Arc`.
#[derive(Debug)]
pub struct Registry {
    models: Vec<Model>,
    by_code: HashMap<String, ModelId>,
}

impl Registry {
    /// Register the given entity types and everything they reference.
    pub fn register(types: &[EntityRef]) -> Result<Registry, ConfigError> {
        let mut builder = Builder::default();
        for entity in types {
            builder.register(entity)?;
        }
        let registry = builder.finish()?;
        validate(&registry)?;
        tracing::info!(
            models = registry.models.len(),
            codes = ?registry.models.iter().map(|m| m.code.as_str()).collect::<Vec<_>>(),
            "entity registry built"
        );
        Ok(registry)
    }

    pub fn model(&self, id: ModelId) -> &Model {
        &self.models[id.0]
    }

    pub fn get(&self, code: &str) -> Option<&Model> {
        self.by_code.get(code).map(|id| self.model(*id))
    }

    pub fn models(&self) -> &[Model] {
        &self.models
    }

    pub fn target(&self, association: &Association) -> &Model {
        self.model(association.target)
    }

    /// Target model of an association field.
    pub fn field_target(&self, field: &Field) -> Option<&Model> {
        field.association().map(|a| self.target(a))
    }
}

struct Pending {
    model: ModelId,
    field: String,
    decl: AssociationDecl,
}

#[derive(Default)]
struct Builder {
    models: Vec<Model>,
    by_code: HashMap<String, ModelId>,
    pending: Vec<Pending>,
}

impl Builder {
    /// Depth-first: the model is stored before its targets are visited, which
    /// terminates cycles and self-references.
    fn register(&mut self, entity: &EntityRef) -> Result<ModelId, ConfigError> {
        let code = entity.code();
        if let Some(id) = self.by_code.get(&code) {
            return Ok(*id);
        }
        let id = ModelId(self.models.len());
        let (model, pending) = build_model(id, (entity.declare)())?;
        tracing::debug!(model = %model.code, fields = model.fields.len(), "model built");
        self.by_code.insert(code, id);
        self.models.push(model);
        for p in &pending {
            if let EntityTarget::Type(target) = &p.decl.target {
                self.register(target)?;
            }
        }
        self.pending.extend(pending);
        Ok(id)
    }

    fn finish(mut self) -> Result<Registry, ConfigError> {
        self.link()?;
        for model in &mut self.models {
            order_fields(model);
        }
        Ok(Registry {
            models: self.models,
            by_code: self.by_code,
        })
    }

    /// Second pass: needs every model of the batch, since defaults use the target's table and key.
    fn link(&mut self) -> Result<(), ConfigError> {
        for p in std::mem::take(&mut self.pending) {
            let target_code = match &p.decl.target {
                EntityTarget::Type(r) => r.code(),
                EntityTarget::Code(c) => c.clone(),
            };
            let target = *self.by_code.get(&target_code).ok_or_else(|| ConfigError::MissingReference {
                kind: "model",
                id: target_code.clone(),
            })?;
            let association = {
                let owner = &self.models[p.model.0];
                let field = owner
                    .field(&p.field)
                    .ok_or_else(|| ConfigError::MissingReference {
                        kind: "field",
                        id: format!("{}.{}", owner.code, p.field),
                    })?;
                resolve_keys(owner, field, &self.models[target.0], &p.decl)
            };
            let owner = &mut self.models[p.model.0];
            if let Some(field) = owner.fields.iter_mut().find(|f| f.code == p.field) {
                field.association = Some(association);
            }
        }
        Ok(())
    }
}

fn build_model(id: ModelId, decl: Declaration) -> Result<(Model, Vec<Pending>), ConfigError> {
    let code = crate::case::to_dash_case(decl.table);
    if decl.attributes.is_empty() {
        return Err(ConfigError::annotation(&code, "*", "entity declares no attributes"));
    }

    let mut attributes = decl.attributes;
    for (column, name) in [(CREATED_AT, "created_at"), (UPDATED_AT, "updated_at")] {
        let declared = attributes
            .iter()
            .any(|a| crate::case::to_snake_case(&a.name) == column);
        if !declared {
            attributes.push(
                Attribute::new(name, Kind::Time).tag("sort;filter;hidden:create,update;disabled:create,update"),
            );
        }
    }

    let mut fields = Vec::with_capacity(attributes.len());
    let mut pending = Vec::new();
    let mut fallback_disabled = true;
    for attr in &attributes {
        let Some(draft) = build_field(&code, id, fields.len(), attr)? else {
            continue;
        };
        if draft.field.name == "id" {
            fallback_disabled = !draft.disabled_declared;
        }
        if let Some(decl) = draft.association {
            pending.push(Pending {
                model: id,
                field: draft.field.code.clone(),
                decl,
            });
        }
        fields.push(draft.field);
    }

    let explicit: Vec<usize> = fields
        .iter()
        .enumerate()
        .filter(|(_, f)| f.primary)
        .map(|(i, _)| i)
        .collect();
    let pk = match explicit.as_slice() {
        [one] => *one,
        [] => {
            let i = fields
                .iter()
                .position(|f| f.name == "id" && !f.multiple && !f.is_reference())
                .ok_or_else(|| ConfigError::InvalidPrimaryKey {
                    model: code.clone(),
                    message: "no primary key declared and no 'id' attribute".into(),
                })?;
            let f = &mut fields[i];
            f.primary = true;
            if fallback_disabled {
                f.disabled = crate::schema::model::ViewSet::EDIT;
            }
            i
        }
        many => {
            return Err(ConfigError::InvalidPrimaryKey {
                model: code,
                message: format!("{} fields marked as primary key", many.len()),
            })
        }
    };

    Ok((
        Model {
            id,
            code,
            title: decl.title.to_string(),
            table: decl.table.to_string(),
            fields,
            pk,
        },
        pending,
    ))
}

fn resolve_keys(owner: &Model, field: &Field, target: &Model, decl: &AssociationDecl) -> Association {
    let owner_pk = owner.primary_key().column.as_str();
    let target_pk = target.primary_key().column.as_str();
    let or = |explicit: &Option<String>, default: String| explicit.clone().unwrap_or(default);

    let mut association = Association {
        kind: decl.kind,
        target: target.id,
        target_code: target.code.clone(),
        foreign_key: String::new(),
        reference: String::new(),
        join_table: None,
        join_foreign_key: None,
        join_reference: None,
        join_sort: None,
    };
    match decl.kind {
        AssociationKind::BelongsTo => {
            association.foreign_key = or(&decl.foreign_key, format!("{}_{}", singular(&field.column), target_pk));
            association.reference = or(&decl.reference, target_pk.to_string());
        }
        AssociationKind::HasOne | AssociationKind::HasMany => {
            association.foreign_key = or(&decl.foreign_key, format!("{}_{}", singular(&owner.table), target_pk));
            association.reference = or(&decl.reference, owner_pk.to_string());
        }
        AssociationKind::ManyToMany => {
            association.foreign_key = or(&decl.foreign_key, owner_pk.to_string());
            association.reference = or(&decl.reference, target_pk.to_string());
            let join_fk = or(&decl.join_foreign_key, format!("{}_{}", singular(&owner.table), owner_pk));
            let mut join_ref = or(&decl.join_reference, format!("{}_{}", singular(&target.table), target_pk));
            if join_ref == join_fk && decl.join_reference.is_none() {
                join_ref = format!("{}_{}", singular(&field.column), target_pk);
            }
            association.join_table = Some(or(&decl.join_table, format!("{}_{}", owner.table, target.table)));
            association.join_foreign_key = Some(join_fk);
            association.join_reference = Some(join_ref);
            association.join_sort = decl.join_sort.clone();
        }
    }
    association
}

/// Positioned fields first (ascending), then the rest in declaration order.
fn order_fields(model: &mut Model) {
    let pk_code = model.primary_key().code.clone();
    model
        .fields
        .sort_by_key(|f| (f.position.is_none(), f.position.unwrap_or(0), f.index));
    model.pk = model.fields.iter().position(|f| f.code == pk_code).unwrap_or(0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::model::{FieldKind, ViewSet};
    use crate::testing::{Category, Example, Tag};

    struct NoKey;
    impl crate::schema::Entity for NoKey {
        const TABLE: &'static str = "no_keys";
        const TITLE: &'static str = "No key";
        fn attributes() -> Vec<Attribute> {
            vec![Attribute::new("name", Kind::Text)]
        }
    }

    struct TwoKeys;
    impl crate::schema::Entity for TwoKeys {
        const TABLE: &'static str = "two_keys";
        const TITLE: &'static str = "Two keys";
        fn attributes() -> Vec<Attribute> {
            vec![
                Attribute::new("a", Kind::Text).tag("pk"),
                Attribute::new("b", Kind::Text).tag("pk"),
            ]
        }
    }

    struct Dangling;
    impl crate::schema::Entity for Dangling {
        const TABLE: &'static str = "danglings";
        const TITLE: &'static str = "Dangling";
        fn attributes() -> Vec<Attribute> {
            vec![
                Attribute::new("id", Kind::Int),
                Attribute::new("owner", Kind::entity_code("owners")),
            ]
        }
    }

    struct Node;
    impl crate::schema::Entity for Node {
        const TABLE: &'static str = "nodes";
        const TITLE: &'static str = "Node";
        fn attributes() -> Vec<Attribute> {
            vec![
                Attribute::new("id", Kind::Int),
                Attribute::new("parent", Kind::entity::<Node>()),
                Attribute::new("children", Kind::list(Kind::entity::<Node>())).tag("hasMany;fk:parent_id"),
                Attribute::new("links", Kind::list(Kind::entity::<Node>())),
            ]
        }
    }

    #[test]
    fn registers_transitive_targets() {
        let registry = Registry::register(&[EntityRef::of::<Example>()]).unwrap();
        assert!(registry.get("examples").is_some());
        assert!(registry.get("categories").is_some());
        assert!(registry.get("tags").is_some());
    }

    #[test]
    fn primary_key_must_be_unique_and_present() {
        assert!(matches!(
            Registry::register(&[EntityRef::of::<NoKey>()]),
            Err(ConfigError::InvalidPrimaryKey { .. })
        ));
        assert!(matches!(
            Registry::register(&[EntityRef::of::<TwoKeys>()]),
            Err(ConfigError::InvalidPrimaryKey { .. })
        ));
        let registry = Registry::register(&[EntityRef::of::<Example>()]).unwrap();
        let pk = registry.get("examples").unwrap().primary_key();
        assert_eq!(pk.code, "id");
        assert_eq!(pk.disabled, ViewSet::EDIT);
    }

    #[test]
    fn fallback_id_is_primary_key() {
        let registry = Registry::register(&[EntityRef::of::<Node>()]).unwrap();
        let node = registry.get("nodes").unwrap();
        assert_eq!(node.primary_key().name, "id");
        assert!(node.primary_key().disabled.create);
    }

    #[test]
    fn unresolved_target_fails() {
        assert!(matches!(
            Registry::register(&[EntityRef::of::<Dangling>()]),
            Err(ConfigError::MissingReference { kind: "model", .. })
        ));
    }

    #[test]
    fn self_references_link_to_same_model() {
        let registry = Registry::register(&[EntityRef::of::<Node>()]).unwrap();
        let node = registry.get("nodes").unwrap();
        let parent = node.field("parent").unwrap().association().unwrap();
        assert_eq!(parent.target, node.id);
        assert_eq!(parent.kind, AssociationKind::BelongsTo);
        assert_eq!(parent.foreign_key, "parent_id");

        let children = node.field("children").unwrap().association().unwrap();
        assert_eq!(children.kind, AssociationKind::HasMany);
        assert_eq!(children.foreign_key, "parent_id");
        assert_eq!(children.reference, "id");

        let links = node.field("links").unwrap().association().unwrap();
        assert_eq!(links.join_table.as_deref(), Some("nodes_nodes"));
        assert_eq!(links.join_foreign_key.as_deref(), Some("node_id"));
        assert_eq!(links.join_reference.as_deref(), Some("link_id"));
    }

    #[test]
    fn convention_defaults() {
        let registry = Registry::register(&[EntityRef::of::<Example>(), EntityRef::of::<Category>()]).unwrap();
        let example = registry.get("examples").unwrap();

        let category = example.field("category").unwrap().association().unwrap();
        assert_eq!(category.foreign_key, "category_id");
        assert_eq!(category.reference, "id");
        assert_eq!(example.field("category").unwrap().storage_column(), "category_id");

        let tags = example.field("tags").unwrap().association().unwrap();
        assert_eq!(tags.kind, AssociationKind::ManyToMany);
        assert_eq!(tags.join_table.as_deref(), Some("examples_tags"));
        assert_eq!(tags.join_foreign_key.as_deref(), Some("example_id"));
        assert_eq!(tags.join_reference.as_deref(), Some("tag_id"));
        assert_eq!(tags.join_sort.as_deref(), Some("position"));

        let categories = registry.get("categories").unwrap();
        let examples = categories.field("examples").unwrap().association().unwrap();
        assert_eq!(examples.kind, AssociationKind::HasMany);
        assert_eq!(examples.foreign_key, "category_id");
    }

    #[test]
    fn fields_ordered_by_position_then_declaration() {
        let registry = Registry::register(&[EntityRef::of::<Example>()]).unwrap();
        let example = registry.get("examples").unwrap();
        let codes: Vec<&str> = example.fields.iter().map(|f| f.code.as_str()).collect();
        assert_eq!(codes[0], "name");
        assert_eq!(codes[1], "id");
        assert_eq!(example.primary_key().code, "id");
        let declared: Vec<&str> = example.declared_fields().iter().map(|f| f.code.as_str()).collect();
        assert_eq!(declared[0], "id");
        assert_eq!(declared.last().copied(), Some("updatedAt"));
    }

    #[test]
    fn timestamps_are_added() {
        let registry = Registry::register(&[EntityRef::of::<Category>()]).unwrap();
        let category = registry.get("categories").unwrap();
        let updated = category.updated_at().unwrap();
        assert_eq!(updated.code, "updatedAt");
        assert_eq!(updated.kind, FieldKind::Time);
        assert!(updated.sortable && updated.filterable);
        assert!(updated.hidden.create && updated.disabled.update);
    }
}
