//! `X-Runtime-Secret` auth for `/channel-run` and `/runtime/plugins/sync`.
//! Constant-time comparison so timing doesn't leak how much of the
//! configured secret a guess got right.

use axum::http::HeaderMap;
use subtle::ConstantTimeEq;

use rb_domain::error::Error;

pub fn check_runtime_secret(headers: &HeaderMap, configured: &str) -> Result<(), Error> {
    // An unset secret means the deployment accepts any caller (flagged as a
    // config warning, not an error) — matches local/dev setups that never
    // configured RUNTIME_SECRET.
    if configured.is_empty() {
        return Ok(());
    }

    let provided = headers.get("x-runtime-secret").and_then(|v| v.to_str().ok()).unwrap_or("");
    if provided.as_bytes().ct_eq(configured.as_bytes()).unwrap_u8() != 1 {
        return Err(Error::Auth("invalid or missing X-Runtime-Secret".into()));
    }
    Ok(())
}
