use crate::error::{PortalError, PortalResult};
use async_trait::async_trait;
use reqwest::Url;

/// Retrieves a document's raw bytes by reference. Never retries.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn fetch(&self, reference: Option<&str>) -> PortalResult<Vec<u8>>;
}

/// Absolute `http(s)` references are used as-is; anything else is resolved
/// against the store origin.
pub fn resolve_reference(origin: &str, reference: Option<&str>) -> PortalResult<Url> {
    let reference = reference
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .ok_or_else(|| PortalError::DocumentUnavailable("document_reference_missing".into()))?;
    if reference.starts_with("http://") || reference.starts_with("https://") {
        return Url::parse(reference)
            .map_err(|e| PortalError::DocumentUnavailable(format!("document_url_invalid:{e}")));
    }
    let base = Url::parse(origin)
        .map_err(|e| PortalError::DocumentUnavailable(format!("store_origin_invalid:{e}")))?;
    base.join(reference)
        .map_err(|e| PortalError::DocumentUnavailable(format!("document_url_invalid:{e}")))
}
