//! JSON response envelope.
//!
//! ```json
//! {"code": 200, "status": "success", "message": "OK", "data": [...], "pagination": {...}}
//! ```

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{Map, Value, json};
use url::Url;

use crate::query::{PageMeta, PaginationMode};

/// Envelope builder. Keys render in a fixed order: `code`, `status`,
/// `message`, data entries, merged entries, `pagination`.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    code: StatusCode,
    message: Option<String>,
    data: Map<String, Value>,
    extra: Map<String, Value>,
    pagination: Option<Value>,
}

impl ApiResponse {
    /// Status is `"error"` for 4xx and 5xx codes, `"success"` otherwise.
    pub fn new(code: StatusCode) -> Self {
        Self {
            code,
            message: None,
            data: Map::new(),
            extra: Map::new(),
            pagination: None,
        }
    }

    pub fn success() -> Self {
        Self::new(StatusCode::OK)
    }

    pub fn error(code: StatusCode, message: Option<String>) -> Self {
        Self {
            message,
            ..Self::new(code)
        }
    }

    pub fn code(&self) -> StatusCode {
        self.code
    }

    pub fn status(&self) -> &'static str {
        if self.code.is_client_error() || self.code.is_server_error() {
            "error"
        } else {
            "success"
        }
    }

    /// Custom message; the canonical reason phrase is used otherwise.
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Put projected data under `wrapper`.
    pub fn data(mut self, wrapper: impl Into<String>, value: Value) -> Self {
        self.data.insert(wrapper.into(), value);
        self
    }

    /// Pagination block for a page of results. Page links are `base_url`
    /// with its `page` query parameter replaced.
    pub fn with_page(mut self, meta: &PageMeta, base_url: &Url) -> Self {
        self.pagination = Some(pagination_block(meta, base_url));
        self
    }

    /// Extra top-level keys. Later values replace earlier ones, including
    /// the envelope's own keys.
    pub fn merge(mut self, entries: Map<String, Value>) -> Self {
        self.extra.extend(entries);
        self
    }

    pub fn into_value(self) -> Value {
        let status = self.status();
        let Self {
            code,
            message,
            data,
            extra,
            pagination,
        } = self;
        let message = message
            .unwrap_or_else(|| code.canonical_reason().unwrap_or_default().to_string());

        let mut body = Map::new();
        body.insert("code".to_string(), json!(code.as_u16()));
        body.insert("status".to_string(), json!(status));
        body.insert("message".to_string(), Value::String(message));
        body.extend(data);
        body.extend(extra);
        if let Some(pagination) = pagination {
            body.insert("pagination".to_string(), pagination);
        }
        Value::Object(body)
    }
}

impl IntoResponse for ApiResponse {
    fn into_response(self) -> Response {
        let code = self.code;
        (code, Json(self.into_value())).into_response()
    }
}

fn pagination_block(meta: &PageMeta, base_url: &Url) -> Value {
    let next = meta.has_more.then(|| page_url(base_url, meta.current_page + 1));
    let prev = meta
        .has_previous()
        .then(|| page_url(base_url, meta.current_page - 1));

    let mut block = Map::new();
    block.insert("current_page".to_string(), json!(meta.current_page));
    block.insert("from".to_string(), json!(meta.from()));
    if meta.mode == PaginationMode::Full {
        block.insert("last_page".to_string(), json!(meta.last_page()));
    }
    block.insert("next_page_url".to_string(), json!(next));
    block.insert("per_page".to_string(), json!(meta.per_page));
    block.insert("prev_page_url".to_string(), json!(prev));
    block.insert("to".to_string(), json!(meta.to()));
    if meta.mode == PaginationMode::Full {
        block.insert("total".to_string(), json!(meta.total));
    }
    Value::Object(block)
}

fn page_url(base: &Url, page: u32) -> String {
    let kept: Vec<(String, String)> = base
        .query_pairs()
        .filter(|(key, _)| key != "page")
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    let mut url = base.clone();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair("page", &page.to_string());
    url.to_string()
}
