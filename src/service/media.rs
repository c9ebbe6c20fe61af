use crate::error::AppError;
use async_trait::async_trait;
use uuid::Uuid;

/// Media collaborator. Required as soon as any registered model has a media field.
#[async_trait]
pub trait MediaService: Send + Sync {
    /// `BadRequest` naming the missing ids when any of them is unknown.
    async fn check_ids_exist(&self, ids: &[Uuid]) -> Result<(), AppError>;
}
