//! Access-check endpoint for the UI layer.

use axum::{
    Json,
    extract::{Query, State},
    http::HeaderMap,
};
use serde::{Deserialize, Serialize};

use sigshield_core::{AccessDecision, AccessTier};

use crate::error::Result;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CheckQuery {
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct CheckResponse {
    pub path: String,
    pub tier: AccessTier,
    pub decision: AccessDecision,
}

/// Report the decision the gate would make for the caller on `path`.
///
/// # Route
///
/// `GET /api/access/check?path=...`
///
/// # Errors
///
/// Fails like the gate does: auth or store outages are errors, never "allow".
#[tracing::instrument(skip_all, fields(path = %query.path))]
pub async fn check(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<CheckQuery>,
) -> Result<Json<CheckResponse>> {
    let tier = state.policy().tier_for(&query.path);
    let decision = if tier == AccessTier::Public {
        AccessDecision::Allow
    } else {
        let principal = state.resolve_principal(&headers).await?;
        state.gate().evaluate(tier, &principal)
    };

    Ok(Json(CheckResponse {
        path: query.path,
        tier,
        decision,
    }))
}
