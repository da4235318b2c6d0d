//! Typed records exchanged with the document store.
//!
//! Store responses are decoded through the `Wire*` schemas below and converted
//! into domain values at the adapter boundary; a missing or ill-typed required
//! field is a [`PortalError::Decode`], never a silently absent value.

use crate::error::{PortalError, PortalResult};
use chrono::{DateTime, Utc};
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};

/// The document sections listed by the portal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Budgets,
    Contracts,
    Plans,
    Certifications,
    Invoices,
    Gallery,
}

impl DocumentKind {
    pub const ALL: [DocumentKind; 6] = [
        DocumentKind::Budgets,
        DocumentKind::Contracts,
        DocumentKind::Plans,
        DocumentKind::Certifications,
        DocumentKind::Invoices,
        DocumentKind::Gallery,
    ];

    /// REST collection name on the store.
    pub fn collection(self) -> &'static str {
        match self {
            DocumentKind::Budgets => "presupuestos",
            DocumentKind::Contracts => "contratos",
            DocumentKind::Plans => "planos",
            DocumentKind::Certifications => "certificacions",
            DocumentKind::Invoices => "facturas",
            DocumentKind::Gallery => "galerias",
        }
    }

    pub fn id(self) -> &'static str {
        match self {
            DocumentKind::Budgets => "budgets",
            DocumentKind::Contracts => "contracts",
            DocumentKind::Plans => "plans",
            DocumentKind::Certifications => "certifications",
            DocumentKind::Invoices => "invoices",
            DocumentKind::Gallery => "gallery",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.id() == raw.trim())
    }

    pub fn populate(self) -> &'static str {
        match self {
            DocumentKind::Gallery => "*",
            _ => "pdf",
        }
    }
}

/// Uploaded binary on the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssetReference {
    pub id: i64,
    pub url: String,
    pub name: String,
}

/// A listed document of any non-gallery section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentEntry {
    pub id: i64,
    pub document_id: String,
    pub title: String,
    pub asset: Option<AssetReference>,
    pub legacy_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl DocumentEntry {
    /// Asset url first, legacy `pdf_url` second.
    pub fn document_url(&self) -> Option<&str> {
        self.asset
            .as_ref()
            .map(|a| a.url.as_str())
            .or(self.legacy_url.as_deref())
            .filter(|u| !u.trim().is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContractRecord {
    pub id: i64,
    /// Durable identifier used for updates; stable across revisions.
    pub document_id: String,
    pub title: String,
    pub document: Option<AssetReference>,
    pub legacy_url: Option<String>,
    pub signed: bool,
    pub signed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ContractRecord {
    pub fn document_url(&self) -> Option<&str> {
        self.document
            .as_ref()
            .map(|a| a.url.as_str())
            .or(self.legacy_url.as_deref())
            .filter(|u| !u.trim().is_empty())
    }

    pub fn as_entry(&self) -> DocumentEntry {
        DocumentEntry {
            id: self.id,
            document_id: self.document_id.clone(),
            title: self.title.clone(),
            asset: self.document.clone(),
            legacy_url: self.legacy_url.clone(),
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GalleryPhoto {
    pub id: i64,
    pub url: String,
    pub name: String,
    pub caption: Option<String>,
    pub gallery_id: i64,
    pub category: String,
    pub created_at: DateTime<Utc>,
}

pub const DEFAULT_GALLERY_CATEGORY: &str = "estado-inicial";

/// Authenticated user returned by sign-in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PortalUser {
    pub id: i64,
    pub document_id: String,
    pub email: String,
    pub full_name: String,
}

// ---- wire schemas -------------------------------------------------------
//
// Record schemas deny unknown fields. Bookkeeping fields the store always
// attaches are declared as `Ignored` so only genuinely unexpected keys fail.

type Ignored = Option<IgnoredAny>;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct WireList<T> {
    pub data: Vec<T>,
    #[serde(rename = "meta", default)]
    _meta: Ignored,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct WireAsset {
    pub id: i64,
    pub url: String,
    pub name: String,
    #[serde(rename = "documentId", default)]
    _document_id: Ignored,
    #[serde(rename = "alternativeText", default)]
    _alternative_text: Ignored,
    #[serde(rename = "caption", default)]
    _caption: Ignored,
    #[serde(rename = "width", default)]
    _width: Ignored,
    #[serde(rename = "height", default)]
    _height: Ignored,
    #[serde(rename = "formats", default)]
    _formats: Ignored,
    #[serde(rename = "hash", default)]
    _hash: Ignored,
    #[serde(rename = "ext", default)]
    _ext: Ignored,
    #[serde(rename = "mime", default)]
    _mime: Ignored,
    #[serde(rename = "size", default)]
    _size: Ignored,
    #[serde(rename = "previewUrl", default)]
    _preview_url: Ignored,
    #[serde(rename = "provider", default)]
    _provider: Ignored,
    #[serde(rename = "provider_metadata", default)]
    _provider_metadata: Ignored,
    #[serde(rename = "createdAt", default)]
    _created_at: Ignored,
    #[serde(rename = "updatedAt", default)]
    _updated_at: Ignored,
    #[serde(rename = "publishedAt", default)]
    _published_at: Ignored,
    #[serde(rename = "locale", default)]
    _locale: Ignored,
}

impl From<WireAsset> for AssetReference {
    fn from(w: WireAsset) -> Self {
        Self {
            id: w.id,
            url: w.url,
            name: w.name,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct WireDocument {
    pub id: i64,
    #[serde(rename = "documentId")]
    pub document_id: String,
    pub title: String,
    #[serde(default)]
    pub pdf: Option<WireAsset>,
    #[serde(default)]
    pub pdf_url: Option<String>,
    #[serde(default)]
    pub signed: Option<bool>,
    #[serde(rename = "signedAt", default)]
    pub signed_at: Option<DateTime<Utc>>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt", default)]
    _updated_at: Ignored,
    #[serde(rename = "publishedAt", default)]
    _published_at: Ignored,
    #[serde(rename = "locale", default)]
    _locale: Ignored,
    #[serde(rename = "user", default)]
    _user: Ignored,
    #[serde(rename = "client", default)]
    _client: Ignored,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct WirePhoto {
    pub id: i64,
    pub url: String,
    pub name: String,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(rename = "documentId", default)]
    _document_id: Ignored,
    #[serde(rename = "alternativeText", default)]
    _alternative_text: Ignored,
    #[serde(rename = "width", default)]
    _width: Ignored,
    #[serde(rename = "height", default)]
    _height: Ignored,
    #[serde(rename = "formats", default)]
    _formats: Ignored,
    #[serde(rename = "hash", default)]
    _hash: Ignored,
    #[serde(rename = "ext", default)]
    _ext: Ignored,
    #[serde(rename = "mime", default)]
    _mime: Ignored,
    #[serde(rename = "size", default)]
    _size: Ignored,
    #[serde(rename = "previewUrl", default)]
    _preview_url: Ignored,
    #[serde(rename = "provider", default)]
    _provider: Ignored,
    #[serde(rename = "provider_metadata", default)]
    _provider_metadata: Ignored,
    #[serde(rename = "createdAt", default)]
    _created_at: Ignored,
    #[serde(rename = "updatedAt", default)]
    _updated_at: Ignored,
    #[serde(rename = "publishedAt", default)]
    _published_at: Ignored,
    #[serde(rename = "locale", default)]
    _locale: Ignored,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct WireGallery {
    pub id: i64,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub photos: Option<Vec<WirePhoto>>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "documentId", default)]
    _document_id: Ignored,
    #[serde(rename = "title", default)]
    _title: Ignored,
    #[serde(rename = "updatedAt", default)]
    _updated_at: Ignored,
    #[serde(rename = "publishedAt", default)]
    _published_at: Ignored,
    #[serde(rename = "locale", default)]
    _locale: Ignored,
    #[serde(rename = "user", default)]
    _user: Ignored,
    #[serde(rename = "client", default)]
    _client: Ignored,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct WireUser {
    pub id: i64,
    #[serde(rename = "documentId", default)]
    pub document_id: Option<String>,
    pub email: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(rename = "provider", default)]
    _provider: Ignored,
    #[serde(rename = "confirmed", default)]
    _confirmed: Ignored,
    #[serde(rename = "blocked", default)]
    _blocked: Ignored,
    #[serde(rename = "createdAt", default)]
    _created_at: Ignored,
    #[serde(rename = "updatedAt", default)]
    _updated_at: Ignored,
    #[serde(rename = "publishedAt", default)]
    _published_at: Ignored,
    #[serde(rename = "locale", default)]
    _locale: Ignored,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct WireAuth {
    pub jwt: String,
    pub user: WireUser,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireErrorBody {
    pub error: Option<WireErrorDetail>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireErrorDetail {
    pub message: Option<String>,
}

fn decode<'a, T: Deserialize<'a>>(what: &str, body: &'a [u8]) -> PortalResult<T> {
    serde_json::from_slice(body).map_err(|e| PortalError::Decode(format!("{what}: {e}")))
}

pub fn decode_contracts(body: &[u8]) -> PortalResult<Vec<ContractRecord>> {
    let list: WireList<WireDocument> = decode("contract list", body)?;
    let mut records: Vec<ContractRecord> = list
        .data
        .into_iter()
        .map(|w| ContractRecord {
            id: w.id,
            document_id: w.document_id,
            title: w.title,
            document: w.pdf.map(AssetReference::from),
            legacy_url: w.pdf_url,
            signed: w.signed.unwrap_or(false),
            signed_at: w.signed_at,
            created_at: w.created_at,
        })
        .collect();
    records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
    Ok(records)
}

pub fn decode_documents(body: &[u8]) -> PortalResult<Vec<DocumentEntry>> {
    let list: WireList<WireDocument> = decode("document list", body)?;
    let mut entries: Vec<DocumentEntry> = list
        .data
        .into_iter()
        .map(|w| DocumentEntry {
            id: w.id,
            document_id: w.document_id,
            title: w.title,
            asset: w.pdf.map(AssetReference::from),
            legacy_url: w.pdf_url,
            created_at: w.created_at,
        })
        .collect();
    entries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
    Ok(entries)
}

/// Flattens galleries into individual photos tagged with their category.
pub fn decode_gallery(body: &[u8]) -> PortalResult<Vec<GalleryPhoto>> {
    let list: WireList<WireGallery> = decode("gallery list", body)?;
    let mut photos = Vec::new();
    for gallery in list.data {
        let category = gallery
            .category
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_GALLERY_CATEGORY.to_string());
        for photo in gallery.photos.unwrap_or_default() {
            photos.push(GalleryPhoto {
                id: photo.id,
                url: photo.url,
                name: photo.name,
                caption: photo.caption,
                gallery_id: gallery.id,
                category: category.clone(),
                created_at: gallery.created_at,
            });
        }
    }
    photos.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
    Ok(photos)
}

/// Upload responses are a list of descriptors; the first one is the asset.
pub fn decode_upload(body: &[u8]) -> PortalResult<AssetReference> {
    let assets: Vec<WireAsset> = decode("upload response", body)?;
    assets
        .into_iter()
        .next()
        .map(AssetReference::from)
        .ok_or_else(|| PortalError::Decode("upload response: empty asset list".into()))
}

pub(crate) fn decode_auth(body: &[u8]) -> PortalResult<(String, PortalUser)> {
    let auth: WireAuth = decode("auth response", body)?;
    if auth.jwt.trim().is_empty() {
        return Err(PortalError::Decode("auth response: empty jwt".into()));
    }
    let user = PortalUser {
        id: auth.user.id,
        document_id: auth
            .user
            .document_id
            .unwrap_or_else(|| auth.user.id.to_string()),
        full_name: auth
            .user
            .username
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| auth.user.email.clone()),
        email: auth.user.email,
    };
    Ok((auth.jwt, user))
}

/// Best-effort extraction of the store's error message from a failure body.
pub(crate) fn error_message(body: &[u8]) -> Option<String> {
    serde_json::from_slice::<WireErrorBody>(body)
        .ok()
        .and_then(|b| b.error)
        .and_then(|d| d.message)
}
