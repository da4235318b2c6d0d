//! In-memory stand-ins for the store and fixtures shared by tests.

use crate::error::{PortalError, PortalResult};
use crate::features::fetcher::DocumentSource;
use crate::features::model::{
    AssetReference, ContractRecord, DocumentEntry, DocumentKind, GalleryPhoto, PortalUser,
};
use crate::features::session::{require, Authenticator, Session};
use crate::features::signing::Clock;
use crate::features::signature_pad::{Point, StrokeCapture};
use crate::features::store::{DocumentCatalog, DocumentStore, RecordUpdater};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream, StringFormat};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

/// A PDF with `pages` A4 pages, each carrying its own text line.
pub fn sample_pdf(pages: u32) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });
    let mut kids = Vec::new();
    for n in 1..=pages {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), Object::Integer(24)]),
                Operation::new("Td", vec![Object::Integer(72), Object::Integer(700)]),
                Operation::new(
                    "Tj",
                    vec![Object::String(
                        format!("Contrato pagina {n}").into_bytes(),
                        StringFormat::Literal,
                    )],
                ),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().expect("encode fixture content"),
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(Object::Reference(page_id));
    }
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => pages as i64,
            "Resources" => resources_id,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(595),
                Object::Integer(842),
            ],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    let mut out = Vec::new();
    doc.save_to(&mut out).expect("save fixture pdf");
    out
}

/// The one-stroke signature from the reference scenario.
pub fn sample_capture() -> StrokeCapture {
    let mut capture = StrokeCapture::new();
    capture.begin(Point::new(10.0, 10.0));
    capture.extend(Point::new(50.0, 50.0));
    capture.end();
    capture
}

pub fn sample_signature_png() -> Vec<u8> {
    sample_capture()
        .rasterize(70, 30)
        .expect("rasterize fixture")
        .png_bytes()
        .to_vec()
}

pub fn sample_user() -> PortalUser {
    PortalUser {
        id: 7,
        document_id: "u7".into(),
        email: "ana@example.com".into(),
        full_name: "Ana Cliente".into(),
    }
}

pub fn sample_session() -> Session {
    Session::new(sample_user(), "test-jwt")
}

pub fn contract(document_id: &str, signed: bool) -> ContractRecord {
    ContractRecord {
        id: 1,
        document_id: document_id.into(),
        title: format!("Contrato {document_id}"),
        document: Some(AssetReference {
            id: 100,
            url: format!("/uploads/{document_id}.pdf"),
            name: format!("{document_id}.pdf"),
        }),
        legacy_url: None,
        signed,
        signed_at: None,
        created_at: Utc.with_ymd_and_hms(2025, 1, 10, 12, 0, 0).unwrap(),
    }
}

pub struct FixedClock(pub DateTime<Utc>);

impl FixedClock {
    pub fn sample() -> Self {
        Self(Utc.with_ymd_and_hms(2025, 3, 4, 8, 5, 0).unwrap())
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

#[derive(Default)]
struct MemoryInner {
    documents: HashMap<String, Vec<u8>>,
    assets: BTreeMap<i64, (AssetReference, Vec<u8>)>,
    contracts: Vec<ContractRecord>,
    entries: HashMap<DocumentKind, Vec<DocumentEntry>>,
    photos: Vec<GalleryPhoto>,
    next_asset_id: i64,
    fetch_calls: usize,
    upload_calls: usize,
    persist_calls: usize,
    fail_fetch: bool,
    fail_upload: bool,
    fail_persist: bool,
    fail_delete: bool,
}

/// Store double that keeps everything in memory and can be told to fail at
/// any stage.
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MemoryInner {
                next_asset_id: 500,
                ..MemoryInner::default()
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Registers a contract and serves `pdf` at its document url.
    pub fn with_contract(self, record: ContractRecord, pdf: Vec<u8>) -> Self {
        {
            let mut inner = self.lock();
            if let Some(url) = record.document_url() {
                inner.documents.insert(url.to_string(), pdf);
            }
            inner.contracts.push(record);
        }
        self
    }

    pub fn with_entries(self, kind: DocumentKind, entries: Vec<DocumentEntry>, pdf: &[u8]) -> Self {
        {
            let mut inner = self.lock();
            for entry in &entries {
                if let Some(url) = entry.document_url() {
                    inner.documents.insert(url.to_string(), pdf.to_vec());
                }
            }
            inner.entries.insert(kind, entries);
        }
        self
    }

    pub fn with_photos(self, photos: Vec<GalleryPhoto>) -> Self {
        self.lock().photos = photos;
        self
    }

    pub fn fail_fetch(&self) {
        self.lock().fail_fetch = true;
    }

    pub fn fail_upload(&self) {
        self.lock().fail_upload = true;
    }

    pub fn fail_persist(&self, fail: bool) {
        self.lock().fail_persist = fail;
    }

    pub fn fail_delete(&self) {
        self.lock().fail_delete = true;
    }

    pub fn contract(&self, document_id: &str) -> Option<ContractRecord> {
        self.lock()
            .contracts
            .iter()
            .find(|c| c.document_id == document_id)
            .cloned()
    }

    pub fn asset_ids(&self) -> Vec<i64> {
        self.lock().assets.keys().copied().collect()
    }

    pub fn asset_bytes(&self, id: i64) -> Option<Vec<u8>> {
        self.lock().assets.get(&id).map(|(_, bytes)| bytes.clone())
    }

    /// Uploaded assets no contract points at.
    pub fn orphaned_assets(&self) -> Vec<i64> {
        let inner = self.lock();
        inner
            .assets
            .keys()
            .copied()
            .filter(|id| {
                !inner
                    .contracts
                    .iter()
                    .any(|c| c.document.as_ref().map(|a| a.id) == Some(*id))
            })
            .collect()
    }

    pub fn fetch_calls(&self) -> usize {
        self.lock().fetch_calls
    }

    pub fn upload_calls(&self) -> usize {
        self.lock().upload_calls
    }

    pub fn persist_calls(&self) -> usize {
        self.lock().persist_calls
    }
}

#[async_trait]
impl DocumentSource for MemoryStore {
    async fn fetch(&self, reference: Option<&str>) -> PortalResult<Vec<u8>> {
        let mut inner = self.lock();
        inner.fetch_calls += 1;
        let reference = reference
            .ok_or_else(|| PortalError::DocumentUnavailable("document_reference_missing".into()))?;
        if inner.fail_fetch {
            return Err(PortalError::DocumentUnavailable(format!(
                "download failed status=404 url={reference}"
            )));
        }
        if let Some(bytes) = inner.documents.get(reference) {
            return Ok(bytes.clone());
        }
        inner
            .assets
            .values()
            .find(|(asset, _)| asset.url == reference)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| PortalError::DocumentUnavailable(format!("not found: {reference}")))
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn upload(
        &self,
        session: Option<&Session>,
        bytes: Vec<u8>,
        filename: &str,
    ) -> PortalResult<AssetReference> {
        require(session)?.bearer()?;
        let mut inner = self.lock();
        inner.upload_calls += 1;
        if inner.fail_upload {
            return Err(PortalError::UploadFailed("upload status=500".into()));
        }
        inner.next_asset_id += 1;
        let asset = AssetReference {
            id: inner.next_asset_id,
            url: format!("/uploads/{}_{filename}", inner.next_asset_id),
            name: filename.to_string(),
        };
        inner.assets.insert(asset.id, (asset.clone(), bytes));
        Ok(asset)
    }

    async fn delete_asset(&self, session: Option<&Session>, asset: &AssetReference) -> PortalResult<()> {
        require(session)?;
        let mut inner = self.lock();
        if inner.fail_delete {
            return Err(PortalError::Storage("delete asset status=500".into()));
        }
        inner.assets.remove(&asset.id);
        Ok(())
    }
}

#[async_trait]
impl RecordUpdater for MemoryStore {
    async fn link_and_mark_signed(
        &self,
        session: Option<&Session>,
        document_id: &str,
        asset: &AssetReference,
        signed_at: DateTime<Utc>,
    ) -> PortalResult<()> {
        require(session)?;
        let mut inner = self.lock();
        inner.persist_calls += 1;
        if inner.fail_persist {
            return Err(PortalError::PersistFailed("contract update status=500".into()));
        }
        let record = inner
            .contracts
            .iter_mut()
            .find(|c| c.document_id == document_id)
            .ok_or_else(|| PortalError::PersistFailed(format!("contract update status=404: {document_id}")))?;
        record.document = Some(asset.clone());
        record.signed = true;
        record.signed_at = Some(signed_at);
        Ok(())
    }

    async fn list_contracts(&self, session: Option<&Session>) -> PortalResult<Vec<ContractRecord>> {
        require(session)?;
        let mut list = self.lock().contracts.clone();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(list)
    }
}

#[async_trait]
impl DocumentCatalog for MemoryStore {
    async fn list_documents(
        &self,
        session: Option<&Session>,
        kind: DocumentKind,
    ) -> PortalResult<Vec<DocumentEntry>> {
        require(session)?;
        let inner = self.lock();
        if kind == DocumentKind::Contracts {
            return Ok(inner.contracts.iter().map(ContractRecord::as_entry).collect());
        }
        Ok(inner.entries.get(&kind).cloned().unwrap_or_default())
    }

    async fn list_gallery(&self, session: Option<&Session>) -> PortalResult<Vec<GalleryPhoto>> {
        require(session)?;
        Ok(self.lock().photos.clone())
    }
}

#[async_trait]
impl Authenticator for MemoryStore {
    async fn sign_in(&self, identifier: &str, password: &str) -> PortalResult<Session> {
        if identifier == "ana@example.com" && password == "correct horse" {
            return Ok(sample_session());
        }
        Err(PortalError::AuthFailed("Invalid identifier or password".into()))
    }
}
