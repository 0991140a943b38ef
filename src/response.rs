//! Success envelopes: `{"data": ...}` for one resource, `{"data": [...], "meta": {"count": n}}`
//! for a listing.

use axum::{http::StatusCode, Json};
use serde::Serialize;
use serde_json::{json, Value};

#[derive(Serialize)]
pub struct SuccessOne<T> {
    pub data: T,
}

#[derive(Serialize)]
pub struct SuccessMany<T> {
    pub data: Vec<T>,
    pub meta: MetaCount,
}

#[derive(Serialize)]
pub struct MetaCount {
    pub count: usize,
}

type Reply<T> = (StatusCode, Json<T>);

pub fn success_one<T: Serialize>(data: T) -> Reply<SuccessOne<T>> {
    (StatusCode::CREATED, Json(SuccessOne { data }))
}

pub fn success_one_ok<T: Serialize>(data: T) -> Reply<SuccessOne<T>> {
    (StatusCode::OK, Json(SuccessOne { data }))
}

pub fn success_many<T: Serialize>(data: Vec<T>) -> Reply<SuccessMany<T>> {
    let meta = MetaCount { count: data.len() };
    (StatusCode::OK, Json(SuccessMany { data, meta }))
}

/// 201 with the new resource's primary key.
pub fn resource_created(id: Value) -> Reply<SuccessOne<Value>> {
    success_one(json!({ "id": id }))
}

pub fn resource_updated() -> Reply<SuccessOne<Value>> {
    success_one_ok(json!({ "updated": true }))
}

pub fn resource_deleted() -> Reply<SuccessOne<Value>> {
    success_one_ok(json!({ "deleted": true }))
}
