#!/usr/bin/env cargo
//! Access token utility for Parley
//!
//! Signs a token for an existing account so a socket client can connect
//! during local development.
//!
//! Usage:
//!   cargo run --bin mint-token -- 42
//!
//! Reads JWT_SECRET (and JWT_EXPIRY_HOURS) from the environment or `.env`.

use std::env;

use anyhow::{bail, Context};
use parley_api::auth::JwtManager;
use parley_shared::PrincipalId;

fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let Some(arg) = env::args().nth(1) else {
        bail!("Usage: mint-token <user-id>");
    };
    let principal = arg
        .parse()
        .map(PrincipalId)
        .with_context(|| format!("'{arg}' is not a numeric user id"))?;

    let secret = env::var("JWT_SECRET").context("JWT_SECRET must be set")?;
    if secret.len() < 32 {
        bail!("JWT_SECRET must be at least 32 characters");
    }
    let expiry_hours = env::var("JWT_EXPIRY_HOURS")
        .ok()
        .and_then(|h| h.parse().ok())
        .unwrap_or(24);

    let jwt = JwtManager::new(&secret, expiry_hours);
    let (token, jti) = jwt.generate_access_token(principal)?;

    println!("\n===========================================");
    println!("Access token for user {}:", principal);
    println!("===========================================");
    println!("{}", token);
    println!("===========================================\n");

    println!("jti: {}", jti);
    println!("\nConnect with:");
    println!("  ws://localhost:3000/ws?token={}", token);

    Ok(())
}
