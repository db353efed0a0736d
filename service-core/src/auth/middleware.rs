use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use super::jwt::{AccessClaims, JwtService};
use crate::error::AppError;

/// Access requirement attached to a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrustTier {
    pub authenticate: bool,
    pub authorize: bool,
}

impl TrustTier {
    pub const PUBLIC: TrustTier = TrustTier {
        authenticate: false,
        authorize: false,
    };
    pub const PRIVATE: TrustTier = TrustTier {
        authenticate: true,
        authorize: false,
    };
    pub const PROTECTED: TrustTier = TrustTier {
        authenticate: true,
        authorize: true,
    };
}

/// Per-route middleware state: who verifies, and what is required.
#[derive(Clone)]
pub struct TierGuard {
    pub verifier: JwtService,
    pub tier: TrustTier,
}

/// Enforces a route's trust tier before its pipeline runs. Verified claims are
/// inserted into request extensions.
pub async fn require_trust_tier(
    State(guard): State<TierGuard>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    if !guard.tier.authenticate {
        return Ok(next.run(req).await);
    }

    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| {
            AppError::Unauthorized(anyhow::anyhow!("missing or invalid authorization header"))
        })?;

    let claims = guard.verifier.verify(token).map_err(|e| {
        tracing::debug!(error = %e, "Rejected session credential");
        AppError::Unauthorized(anyhow::anyhow!("invalid or expired token"))
    })?;

    if guard.tier.authorize && !claims.is_admin() {
        tracing::warn!(user_id = %claims.sub, "Non-admin caller rejected on protected route");
        return Err(AppError::Forbidden(anyhow::anyhow!("user not authorized")));
    }

    req.extensions_mut().insert(claims);

    Ok(next.run(req).await)
}
