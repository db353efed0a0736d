pub mod jwt;
pub mod middleware;

pub use jwt::{ADMIN_ROLE, AccessClaims, JwtService};
pub use middleware::{TierGuard, TrustTier, require_trust_tier};
