use axum::{extract::State, http::HeaderMap, Json};
use subtle::ConstantTimeEq;

use crate::{
    error::{Error, Result},
    services::sweeper::SweepReport,
    AppState,
};

/// Runs one auto-submit pass. Meant for an external scheduler.
pub async fn run_sweep(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SweepReport>> {
    verify_secret(&headers, &state.sweep_secret)?;
    let report = state.sweeper.run_once().await?;
    Ok(Json(report))
}

fn verify_secret(headers: &HeaderMap, expected: &str) -> Result<()> {
    let Some(secret_hdr) = headers.get("x-webhook-secret") else {
        return Err(Error::Unauthorized("missing_webhook_secret".into()));
    };
    let provided = secret_hdr
        .to_str()
        .map_err(|_| Error::Unauthorized("invalid_secret_header".into()))?;
    if expected.is_empty() {
        return Err(Error::Unauthorized("sweep_secret_not_configured".into()));
    }
    if ConstantTimeEq::ct_eq(provided.as_bytes(), expected.as_bytes()).into() {
        Ok(())
    } else {
        Err(Error::Unauthorized("invalid_webhook_secret".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_must_match_exactly() {
        let mut headers = HeaderMap::new();
        assert!(verify_secret(&headers, "s3cret").is_err());

        headers.insert("x-webhook-secret", "s3cret".parse().unwrap());
        assert!(verify_secret(&headers, "s3cret").is_ok());
        assert!(verify_secret(&headers, "s3cret2").is_err());
        assert!(verify_secret(&headers, "").is_err());
    }
}
