use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use zpravy_core::Page;
use zpravy_ingest::ArticleFilter;

use super::{api_error, default_limit, ApiResult};
use crate::app::AppState;

#[derive(Debug, Deserialize)]
pub struct ListArticlesQuery {
    pub source: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

/// GET /api/articles: read-only, most recently ingested first. `total`
/// counts every match, not just the returned page.
pub async fn list_articles(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ListArticlesQuery>,
) -> ApiResult<Json<Value>> {
    let page = Page::new(q.limit, q.offset);
    let filter = ArticleFilter { source: q.source };
    let articles = state.gate.list_articles(&filter, page).map_err(api_error)?;
    let total = state.gate.count(&filter).map_err(api_error)?;
    Ok(Json(json!({
        "articles": articles,
        "total": total,
        "limit": page.limit,
        "offset": page.offset,
    })))
}
