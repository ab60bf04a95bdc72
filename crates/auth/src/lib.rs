//! `campusledger-auth` — pure authentication/authorization boundary.
//!
//! Decoupled from HTTP and storage. Identity and account management are owned
//! by the surrounding platform; this crate only consumes verified claims and
//! answers policy questions.

pub mod authorize;
pub mod claims;
pub mod jwt;
pub mod permissions;
pub mod principal;
pub mod roles;

pub use authorize::{AuthzError, CommandAuthorization, Principal, authorize};
pub use claims::{JwtClaims, TokenValidationError, validate_claims};
pub use jwt::{Hs256JwtValidator, JwtError, JwtValidator};
pub use permissions::Permission;
pub use principal::{PrincipalId, TenantMembership};
pub use roles::Role;
