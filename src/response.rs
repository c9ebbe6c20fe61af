//! Standard response envelope helpers.

use crate::service::Page;
use axum::{http::StatusCode, Json};
use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Serialize)]
pub struct SuccessOne<T> {
    pub data: T,
}

#[derive(Serialize)]
pub struct SuccessPage {
    pub data: Vec<Map<String, Value>>,
    pub meta: PageMeta,
}

#[derive(Serialize)]
pub struct PageMeta {
    pub count: usize,
    pub total: i64,
}

pub fn success_one<T: Serialize>(data: T) -> (StatusCode, Json<SuccessOne<T>>) {
    (StatusCode::OK, Json(SuccessOne { data }))
}

pub fn created<T: Serialize>(data: T) -> (StatusCode, Json<SuccessOne<T>>) {
    (StatusCode::CREATED, Json(SuccessOne { data }))
}

pub fn success_page(page: Page) -> (StatusCode, Json<SuccessPage>) {
    let count = page.items.len();
    (
        StatusCode::OK,
        Json(SuccessPage {
            data: page.items,
            meta: PageMeta {
                count,
                total: page.total,
            },
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn page_meta_carries_total() {
        let mut row = Map::new();
        row.insert("id".into(), json!(1));
        let (status, Json(body)) = success_page(Page {
            items: vec![row],
            total: 7,
        });
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            serde_json::to_value(body).unwrap(),
            json!({"data": [{"id": 1}], "meta": {"count": 1, "total": 7}})
        );
        assert_eq!(created(json!("x")).0, StatusCode::CREATED);
    }
}
