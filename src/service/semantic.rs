//! Checks that need storage: uniqueness, association existence, media existence.

use crate::error::{AppError, ConfigError};
use crate::repository::{Filter, Repository};
use crate::schema::{Field, Model, Registry};
use crate::service::media::MediaService;
use crate::value::{Element, FieldValue};
use uuid::Uuid;

pub(crate) struct Semantics<'a> {
    pub registry: &'a Registry,
    pub repository: &'a dyn Repository,
    pub media: Option<&'a dyn MediaService>,
}

impl Semantics<'_> {
    /// Check the given fields of `element`; fields absent from it are skipped.
    pub async fn check(&self, model: &Model, element: &Element, fields: &[&Field]) -> Result<(), AppError> {
        for field in fields {
            let Some(value) = element.get(&field.code) else { continue };
            if field.unique {
                self.check_unique(model, element, field, value).await?;
            }
            if field.is_association() {
                self.check_targets(field, value).await?;
            }
            if field.is_media() {
                self.check_media(model, field, value).await?;
            }
        }
        Ok(())
    }

    async fn check_unique(&self, model: &Model, element: &Element, field: &Field, value: &FieldValue) -> Result<(), AppError> {
        if value.is_null() || field.multiple || field.is_blank_unique(value) {
            return Ok(());
        }
        let mut filter = Filter::default().with(field.code.clone(), vec![value.clone()]);
        filter.exclude = element.primary_key(model).filter(|pk| !pk.is_null()).cloned();
        let taken = self
            .repository
            .count(model, &filter)
            .await
            .map_err(|e| e.context("unique check", &model.code))?;
        if taken > 0 {
            return Err(AppError::Conflict(format!(
                "{} {} already exists",
                field.code,
                field.from_static_value(self.registry, value)
            )));
        }
        Ok(())
    }

    async fn check_targets(&self, field: &Field, value: &FieldValue) -> Result<(), AppError> {
        let Some(target) = self.registry.field_target(field) else {
            return Ok(());
        };
        let keys = distinct(field.reference_keys(self.registry, value));
        if keys.is_empty() {
            return Ok(());
        }
        let filter = Filter::default().with(target.primary_key().code.clone(), keys.clone());
        let found = self
            .repository
            .count(target, &filter)
            .await
            .map_err(|e| e.context("association check", &target.code))?;
        if found != keys.len() as i64 {
            return Err(AppError::NotFound(format!(
                "{}: {} of {} referenced {} not found",
                field.code,
                keys.len() as i64 - found,
                keys.len(),
                target.code
            )));
        }
        Ok(())
    }

    async fn check_media(&self, model: &Model, field: &Field, value: &FieldValue) -> Result<(), AppError> {
        let ids: Vec<Uuid> = field
            .reference_keys(self.registry, value)
            .into_iter()
            .filter_map(|k| match k {
                FieldValue::Uuid(id) => Some(id),
                _ => None,
            })
            .collect();
        if ids.is_empty() {
            return Ok(());
        }
        let media = self.media.ok_or_else(|| ConfigError::MediaServiceRequired {
            model: model.code.clone(),
        })?;
        media.check_ids_exist(&ids).await
    }
}

fn distinct(keys: Vec<FieldValue>) -> Vec<FieldValue> {
    let mut out: Vec<FieldValue> = Vec::with_capacity(keys.len());
    for k in keys {
        if !out.contains(&k) {
            out.push(k);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::testing::{account_registry, MemoryRepository};
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn blank_optional_unique_never_conflicts() {
        let registry = Arc::new(account_registry());
        let repository = MemoryRepository::new(registry.clone());
        repository.insert_raw("accounts", json!({"id": Uuid::new_v4().to_string(), "email": "a@example.com"}));
        repository.insert_raw(
            "accounts",
            json!({"id": Uuid::new_v4().to_string(), "email": "b@example.com", "handle": "neo"}),
        );
        let semantics = Semantics {
            registry: &registry,
            repository: &repository,
            media: None,
        };
        let accounts = registry.get("accounts").unwrap();
        let fields: Vec<&Field> = accounts.fields.iter().filter(|f| f.unique).collect();
        let candidate = |raw: serde_json::Value| {
            let mut raw = raw;
            raw["id"] = json!(Uuid::new_v4().to_string());
            accounts.new_element(&registry, raw.as_object().unwrap(), |_| true).unwrap()
        };

        let blank = candidate(json!({"email": "c@example.com", "handle": ""}));
        semantics.check(accounts, &blank, &fields).await.unwrap();

        let taken = candidate(json!({"email": "d@example.com", "handle": "neo"}));
        let err = semantics.check(accounts, &taken, &fields).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        // required unique text is still checked
        let email = candidate(json!({"email": "a@example.com"}));
        let err = semantics.check(accounts, &email, &fields).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }
}
