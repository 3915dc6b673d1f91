//! Authentication module for Parley

pub mod identity;
pub mod jwt;

pub use identity::{extract_credential, AuthFailure, IdentityResolver};
pub use jwt::{Claims, JwtError, JwtManager, TokenType};
