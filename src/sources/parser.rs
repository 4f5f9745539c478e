//! Parsing of OAuth2 token endpoint responses.

use anyhow::{anyhow, Result};
use base64::Engine;
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::cache::token::Token;
use crate::utils::constants::DEFAULT_TOKEN_TYPE;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    token_type: Option<String>,
    // some issuers send it as a string
    expires_in: Option<Value>,
    scope: Option<String>,
    refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JwtClaims {
    exp: i64,
}

/// Build a `Token` from a token endpoint body.
///
/// The lifetime comes from `expires_in`; without it the `exp` claim of a JWT
/// access token is used. Anything else is a malformed response.
pub fn parse_token_response(body: &str, renewal_lead_time: u64) -> Result<Token> {
    let response: TokenResponse = serde_json::from_str(body)
        .map_err(|e| anyhow!("invalid token response body: {}", e))?;

    if response.access_token.is_empty() {
        return Err(anyhow!("access_token is empty"));
    }

    let expires_in = match response.expires_in {
        Some(value) => parse_expires_in(&value)?,
        None => get_jwt_expires_in(&response.access_token)?,
    };
    if expires_in == 0 {
        return Err(anyhow!("expires_in must be > 0"));
    }

    let token_type = response
        .token_type
        .filter(|token_type| !token_type.is_empty())
        .unwrap_or_else(|| DEFAULT_TOKEN_TYPE.to_owned());

    Ok(Token::new(response.access_token, token_type, expires_in)
        .with_renewal_lead_time(renewal_lead_time)
        .with_scope(response.scope)
        .with_refresh_token(response.refresh_token))
}

fn parse_expires_in(value: &Value) -> Result<u64> {
    match value {
        Value::Number(number) => number
            .as_u64()
            .ok_or_else(|| anyhow!("expires_in '{}' is not a positive integer", number)),
        Value::String(text) => text
            .trim()
            .parse::<u64>()
            .map_err(|e| anyhow!("expires_in '{}' is not a number: {}", text, e)),
        other => Err(anyhow!("expires_in has unexpected type: {}", other)),
    }
}

fn decode_jwt_claims(token: &str) -> Result<JwtClaims> {
    let parts: Vec<&str> = token.split('.').collect();
    let payload = match parts.as_slice() {
        [_, payload, _] => payload.trim_end_matches('='),
        _ => return Err(anyhow!("no expires_in and access_token is not a JWT")),
    };

    let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| anyhow!("base64 decode error: {}", e))?;

    serde_json::from_slice::<JwtClaims>(&decoded)
        .map_err(|e| anyhow!("invalid JWT payload: {}", e))
}

fn get_jwt_expires_in(token: &str) -> Result<u64> {
    let exp = decode_jwt_claims(token)?.exp;
    let remaining = exp - Utc::now().timestamp();
    if remaining <= 0 {
        return Err(anyhow!("JWT expired at {}", exp));
    }
    debug!(expires_at = exp, "expiry taken from JWT exp claim");
    Ok(remaining as u64)
}
