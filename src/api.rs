// src/api.rs
//! Thin admin surface: health, dedup-state introspection, and a dry-run
//! classify endpoint. Holds only shared read-side handles; the decision
//! engine itself is never reachable from here.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

use crate::accounts::MembershipHandle;
use crate::classifier::Classifier;
use crate::engine::EngineStats;

#[derive(Clone)]
pub struct AppState {
    pub classifier: Classifier,
    pub stats: Arc<EngineStats>,
    pub membership: MembershipHandle,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/debug/state", get(debug_state))
        .route("/debug/classify", post(debug_classify))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

#[derive(Serialize)]
struct StateResp {
    seen: u64,
    promoted: u64,
    link_suppressed: u64,
    ignore_members: usize,
    membership_last_refresh: Option<String>,
}

async fn debug_state(State(state): State<AppState>) -> Json<StateResp> {
    Json(StateResp {
        seen: state.stats.seen.load(Ordering::Relaxed),
        promoted: state.stats.promoted.load(Ordering::Relaxed),
        link_suppressed: state.stats.link_suppressed.load(Ordering::Relaxed),
        ignore_members: state.membership.len(),
        membership_last_refresh: state.membership.last_refresh().map(|t| t.to_rfc3339()),
    })
}

#[derive(Deserialize)]
struct ClassifyReq {
    item: crate::item::Item,
}

#[derive(Serialize)]
struct ClassifyResp {
    topical: bool,
    reasons: Vec<String>,
}

/// Dry-run classification; no engine state is touched.
async fn debug_classify(
    State(state): State<AppState>,
    Json(body): Json<ClassifyReq>,
) -> Json<ClassifyResp> {
    let verdict = state.classifier.is_topical_item(&body.item, Utc::now());
    Json(ClassifyResp {
        topical: verdict.topical,
        reasons: verdict.reasons,
    })
}
