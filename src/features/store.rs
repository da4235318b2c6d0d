//! Document store adapter: uploads, record updates, listings and sign-in over
//! the store's REST API.

use crate::config::PortalConfig;
use crate::error::{PortalError, PortalResult};
use crate::features::fetcher::{resolve_reference, DocumentSource};
use crate::features::model::{
    decode_auth, decode_contracts, decode_documents, decode_gallery, decode_upload, error_message,
    AssetReference, ContractRecord, DocumentEntry, DocumentKind, GalleryPhoto,
};
use crate::features::session::{require, Authenticator, Session};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::multipart::{Form, Part};
use reqwest::{RequestBuilder, Response};
use serde_json::json;
use tracing::{debug, error, instrument, warn};

/// Binary uploads on the store.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn upload(
        &self,
        session: Option<&Session>,
        bytes: Vec<u8>,
        filename: &str,
    ) -> PortalResult<AssetReference>;

    /// Removes an uploaded asset. Used to compensate a failed record update.
    async fn delete_asset(&self, session: Option<&Session>, asset: &AssetReference) -> PortalResult<()>;
}

/// Contract record updates.
#[async_trait]
pub trait RecordUpdater: Send + Sync {
    /// Links `asset` to the contract and sets `signed = true`, `signedAt`.
    async fn link_and_mark_signed(
        &self,
        session: Option<&Session>,
        document_id: &str,
        asset: &AssetReference,
        signed_at: DateTime<Utc>,
    ) -> PortalResult<()>;

    async fn list_contracts(&self, session: Option<&Session>) -> PortalResult<Vec<ContractRecord>>;
}

/// Read-only listings of the non-contract sections.
#[async_trait]
pub trait DocumentCatalog: Send + Sync {
    async fn list_documents(
        &self,
        session: Option<&Session>,
        kind: DocumentKind,
    ) -> PortalResult<Vec<DocumentEntry>>;

    async fn list_gallery(&self, session: Option<&Session>) -> PortalResult<Vec<GalleryPhoto>>;
}

/// HTTP client for the document store.
pub struct StoreClient {
    origin: String,
    api_base: String,
    client: reqwest::Client,
}

impl StoreClient {
    pub fn new(config: &PortalConfig) -> PortalResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(|e| PortalError::Config(format!("http client: {e}")))?;
        Ok(Self {
            origin: config.store_origin.clone(),
            api_base: config.api_base(),
            client,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path.trim_start_matches('/'))
    }

    fn authorize(&self, req: RequestBuilder, session: &Session) -> PortalResult<RequestBuilder> {
        let value = HeaderValue::from_str(&session.bearer()?)
            .map_err(|_| PortalError::Unauthenticated)?;
        Ok(req.header(AUTHORIZATION, value))
    }

    async fn list_collection(
        &self,
        session: Option<&Session>,
        kind: DocumentKind,
    ) -> PortalResult<Vec<u8>> {
        let session = require(session)?;
        let url = self.endpoint(kind.collection());
        let client_id = session.user().id.to_string();
        let mut query: Vec<(&str, &str)> = vec![
            ("filters[client][$eq]", client_id.as_str()),
            ("sort[0]", "createdAt:desc"),
        ];
        if kind == DocumentKind::Contracts {
            query.push(("populate[0]", "client"));
            query.push(("populate[1]", "pdf"));
        } else {
            query.push(("populate", kind.populate()));
        }
        let req = self.authorize(self.client.get(&url).query(&query), session)?;
        let resp = req
            .send()
            .await
            .map_err(|e| PortalError::DocumentUnavailable(format!("list {} failed: {e}", kind.id())))?;
        let status = resp.status();
        let body = read_body(resp).await;
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(PortalError::Unauthenticated);
        }
        if !status.is_success() {
            return Err(PortalError::DocumentUnavailable(failure_detail(
                &format!("list {}", kind.id()),
                status.as_u16(),
                &body,
            )));
        }
        debug!(kind = kind.id(), bytes = body.len(), "listed collection");
        Ok(body)
    }
}

async fn read_body(resp: Response) -> Vec<u8> {
    resp.bytes().await.map(|b| b.to_vec()).unwrap_or_default()
}

/// The store has accepted the file by now, so an unreadable response leaves
/// an asset nobody holds an id for. Logged with the filename for reconciliation.
fn accepted_upload(filename: &str, body: PortalResult<Vec<u8>>) -> PortalResult<AssetReference> {
    let asset = body.and_then(|body| {
        decode_upload(&body).map_err(|e| PortalError::UploadFailed(format!("upload response: {e}")))
    });
    if let Err(e) = &asset {
        error!(filename, error = %e, "upload accepted but response unreadable, possible orphan");
    }
    asset
}

fn failure_detail(what: &str, status: u16, body: &[u8]) -> String {
    match error_message(body) {
        Some(msg) => format!("{what} status={status}: {msg}"),
        None => format!("{what} status={status}"),
    }
}

/// Partial update body for a signed contract.
pub fn signed_update_body(asset: &AssetReference, signed_at: DateTime<Utc>) -> serde_json::Value {
    json!({
        "data": {
            "pdf": asset.id,
            "signed": true,
            "signedAt": signed_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    })
}

#[async_trait]
impl DocumentSource for StoreClient {
    #[instrument(name = "store_fetch_document", skip(self))]
    async fn fetch(&self, reference: Option<&str>) -> PortalResult<Vec<u8>> {
        let url = resolve_reference(&self.origin, reference)?;
        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| PortalError::DocumentUnavailable(format!("download failed url={url}: {e}")))?;
        if !resp.status().is_success() {
            return Err(PortalError::DocumentUnavailable(format!(
                "download failed status={} url={url}",
                resp.status()
            )));
        }
        resp.bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| PortalError::DocumentUnavailable(format!("read body failed: {e}")))
    }
}

#[async_trait]
impl DocumentStore for StoreClient {
    #[instrument(name = "store_upload", skip(self, session, bytes), fields(size = bytes.len()))]
    async fn upload(
        &self,
        session: Option<&Session>,
        bytes: Vec<u8>,
        filename: &str,
    ) -> PortalResult<AssetReference> {
        let session = require(session)?;
        let part = Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str("application/pdf")
            .map_err(|e| PortalError::UploadFailed(format!("multipart: {e}")))?;
        let form = Form::new().part("files", part);
        let req = self.authorize(self.client.post(self.endpoint("upload")).multipart(form), session)?;
        let resp = req
            .send()
            .await
            .map_err(|e| PortalError::UploadFailed(format!("request: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            let body = read_body(resp).await;
            warn!(status = status.as_u16(), "upload rejected");
            return Err(PortalError::UploadFailed(failure_detail("upload", status.as_u16(), &body)));
        }
        let body = resp
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| PortalError::UploadFailed(format!("read upload response: {e}")));
        accepted_upload(filename, body)
    }

    #[instrument(name = "store_delete_asset", skip(self, session), fields(asset_id = asset.id))]
    async fn delete_asset(&self, session: Option<&Session>, asset: &AssetReference) -> PortalResult<()> {
        let session = require(session)?;
        let url = self.endpoint(&format!("upload/files/{}", asset.id));
        let req = self.authorize(self.client.delete(url), session)?;
        let resp = req
            .send()
            .await
            .map_err(|e| PortalError::Storage(format!("delete asset: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            let body = read_body(resp).await;
            return Err(PortalError::Storage(failure_detail(
                "delete asset",
                status.as_u16(),
                &body,
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordUpdater for StoreClient {
    #[instrument(name = "store_link_and_mark_signed", skip(self, session, asset), fields(asset_id = asset.id))]
    async fn link_and_mark_signed(
        &self,
        session: Option<&Session>,
        document_id: &str,
        asset: &AssetReference,
        signed_at: DateTime<Utc>,
    ) -> PortalResult<()> {
        let session = require(session)?;
        let url = self.endpoint(&format!("{}/{document_id}", DocumentKind::Contracts.collection()));
        let req = self.authorize(
            self.client.put(url).json(&signed_update_body(asset, signed_at)),
            session,
        )?;
        let resp = req
            .send()
            .await
            .map_err(|e| PortalError::PersistFailed(format!("request: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            let body = read_body(resp).await;
            warn!(status = status.as_u16(), "contract update rejected");
            return Err(PortalError::PersistFailed(failure_detail(
                "contract update",
                status.as_u16(),
                &body,
            )));
        }
        Ok(())
    }

    #[instrument(name = "store_list_contracts", skip(self, session))]
    async fn list_contracts(&self, session: Option<&Session>) -> PortalResult<Vec<ContractRecord>> {
        let body = self.list_collection(session, DocumentKind::Contracts).await?;
        decode_contracts(&body)
    }
}

#[async_trait]
impl DocumentCatalog for StoreClient {
    #[instrument(name = "store_list_documents", skip(self, session))]
    async fn list_documents(
        &self,
        session: Option<&Session>,
        kind: DocumentKind,
    ) -> PortalResult<Vec<DocumentEntry>> {
        let body = self.list_collection(session, kind).await?;
        decode_documents(&body)
    }

    #[instrument(name = "store_list_gallery", skip(self, session))]
    async fn list_gallery(&self, session: Option<&Session>) -> PortalResult<Vec<GalleryPhoto>> {
        let body = self.list_collection(session, DocumentKind::Gallery).await?;
        decode_gallery(&body)
    }
}

#[async_trait]
impl Authenticator for StoreClient {
    #[instrument(name = "store_sign_in", skip(self, password))]
    async fn sign_in(&self, identifier: &str, password: &str) -> PortalResult<Session> {
        let resp = self
            .client
            .post(self.endpoint("auth/local"))
            .json(&json!({ "identifier": identifier, "password": password }))
            .send()
            .await
            .map_err(|e| PortalError::AuthFailed(format!("request: {e}")))?;
        let status = resp.status();
        let body = read_body(resp).await;
        if !status.is_success() {
            return Err(PortalError::AuthFailed(
                error_message(&body).unwrap_or_else(|| format!("status={status}")),
            ));
        }
        let (jwt, user) = decode_auth(&body)?;
        Ok(Session::new(user, jwt))
    }
}
