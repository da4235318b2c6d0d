//! Contract signing pipeline.
//!
//! A [`SigningSession`] walks `Idle → Capturing → Rendering → Uploading →
//! Persisting → Done`, or drops into `Failed` from any active phase. Each
//! phase runs its action once per pipeline run; nothing is retried.

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use sha2::{Digest, Sha256};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::PortalConfig;
use crate::error::{PortalError, PortalResult};
use crate::features::fetcher::DocumentSource;
use crate::features::model::{AssetReference, ContractRecord};
use crate::features::pdf;
use crate::features::session::Session;
use crate::features::signature_pad::{PointerEvent, SignatureRaster, StrokeCapture};
use crate::features::storage::sanitize_file_stem;
use crate::features::store::{DocumentStore, RecordUpdater};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SigningFailure {
    pub error: PortalError,
    /// Set when an uploaded asset could not be removed after a failed record
    /// update; it exists on the store with nothing referencing it.
    pub orphaned_asset: Option<AssetReference>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SigningPhase {
    Idle,
    Capturing,
    Rendering,
    Uploading,
    Persisting,
    Done,
    Failed(SigningFailure),
}

impl SigningPhase {
    pub fn name(&self) -> &'static str {
        match self {
            SigningPhase::Idle => "idle",
            SigningPhase::Capturing => "capturing",
            SigningPhase::Rendering => "rendering",
            SigningPhase::Uploading => "uploading",
            SigningPhase::Persisting => "persisting",
            SigningPhase::Done => "done",
            SigningPhase::Failed(_) => "failed",
        }
    }

    pub fn allows(&self, next: &SigningPhase) -> bool {
        use SigningPhase::*;
        match (self, next) {
            (Idle, Capturing)
            | (Capturing, Rendering)
            | (Rendering, Uploading)
            | (Uploading, Persisting)
            | (Persisting, Done)
            | (Failed(_), Idle) => true,
            (Capturing | Rendering | Uploading | Persisting, Failed(_)) => true,
            _ => false,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(
            self,
            SigningPhase::Rendering | SigningPhase::Uploading | SigningPhase::Persisting
        )
    }
}

/// One user's attempt at signing one contract.
#[derive(Debug)]
pub struct SigningSession {
    id: Uuid,
    record: ContractRecord,
    capture: StrokeCapture,
    phase: SigningPhase,
}

impl SigningSession {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn record(&self) -> &ContractRecord {
        &self.record
    }

    pub fn phase(&self) -> &SigningPhase {
        &self.phase
    }

    pub fn capture(&self) -> &StrokeCapture {
        &self.capture
    }

    /// Pointer input is only recorded while capturing.
    pub fn apply(&mut self, event: PointerEvent) {
        if self.phase == SigningPhase::Capturing {
            self.capture.apply(event);
        }
    }

    pub fn consume<I>(&mut self, events: I)
    where
        I: IntoIterator<Item = PointerEvent>,
    {
        for event in events {
            self.apply(event);
        }
    }

    pub fn clear(&mut self) {
        self.capture.clear();
    }

    /// Whether the "save" action should be enabled.
    pub fn can_save(&self) -> bool {
        self.phase == SigningPhase::Capturing && self.capture.has_content()
    }

    /// `Failed → Idle`. Drops every stroke so a retry starts from scratch.
    pub fn reset(&mut self) -> bool {
        if !self.phase.allows(&SigningPhase::Idle) {
            return false;
        }
        self.capture.clear();
        self.phase = SigningPhase::Idle;
        true
    }

    /// `Idle → Capturing`, guarded by the record's signed flag.
    pub fn restart(&mut self) -> bool {
        if self.record.signed || self.phase != SigningPhase::Idle {
            return false;
        }
        self.phase = SigningPhase::Capturing;
        true
    }

    fn advance(&mut self, next: SigningPhase) {
        debug_assert!(
            self.phase.allows(&next),
            "illegal signing transition {} -> {}",
            self.phase.name(),
            next.name()
        );
        info!(
            session = %self.id,
            contract = %self.record.document_id,
            from = self.phase.name(),
            to = next.name(),
            "signing transition"
        );
        self.phase = next;
    }

    fn fail(&mut self, error: PortalError, orphaned_asset: Option<AssetReference>) -> SaveOutcome {
        error!(
            session = %self.id,
            contract = %self.record.document_id,
            phase = self.phase.name(),
            code = error.code(),
            detail = %error,
            "signing failed"
        );
        let failure = SigningFailure {
            error,
            orphaned_asset,
        };
        self.advance(SigningPhase::Failed(failure.clone()));
        SaveOutcome::Failed(failure)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignedContract {
    pub asset: AssetReference,
    pub signed_at: DateTime<Utc>,
    /// SHA-256 of the uploaded bytes, lowercase hex.
    pub digest: String,
    pub record: ContractRecord,
    /// Fresh record list, when the refresh after persisting succeeded.
    pub records: Option<Vec<ContractRecord>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    /// Nothing to save, or the session is not capturing. State unchanged.
    Refused,
    Done(SignedContract),
    Failed(SigningFailure),
}

pub struct SigningServices {
    pub source: Arc<dyn DocumentSource>,
    pub store: Arc<dyn DocumentStore>,
    pub records: Arc<dyn RecordUpdater>,
    pub clock: Arc<dyn Clock>,
}

pub struct SigningOrchestrator {
    services: SigningServices,
    canvas: (u32, u32),
    caption: String,
    stamp_offset: FixedOffset,
}

impl SigningOrchestrator {
    pub fn new(services: SigningServices, config: &PortalConfig) -> PortalResult<Self> {
        let stamp_offset = FixedOffset::east_opt(config.stamp_utc_offset_minutes * 60).ok_or_else(|| {
            PortalError::Config(format!(
                "stamp utc offset out of range: {}",
                config.stamp_utc_offset_minutes
            ))
        })?;
        Ok(Self {
            services,
            canvas: (config.canvas_width, config.canvas_height),
            caption: config.stamp_caption.clone(),
            stamp_offset,
        })
    }

    pub fn canvas(&self) -> (u32, u32) {
        self.canvas
    }

    pub fn can_begin(record: &ContractRecord) -> bool {
        !record.signed
    }

    /// Opens a capture session, or `None` when the contract is already signed.
    pub fn begin(&self, record: &ContractRecord) -> Option<SigningSession> {
        if !Self::can_begin(record) {
            return None;
        }
        let mut session = SigningSession {
            id: Uuid::new_v4(),
            record: record.clone(),
            capture: StrokeCapture::new(),
            phase: SigningPhase::Idle,
        };
        session.advance(SigningPhase::Capturing);
        Some(session)
    }

    /// Runs the pipeline for a capturing session with content.
    pub async fn save(&self, session: &mut SigningSession, auth: Option<&Session>) -> SaveOutcome {
        if !session.can_save() {
            return SaveOutcome::Refused;
        }
        let span = info_span!(
            "signing_pipeline",
            session = %session.id,
            contract = %session.record.document_id
        );
        self.run(session, auth).instrument(span).await
    }

    async fn run(&self, session: &mut SigningSession, auth: Option<&Session>) -> SaveOutcome {
        let raster = match session.capture.rasterize(self.canvas.0, self.canvas.1) {
            Ok(raster) => raster,
            Err(e) => return session.fail(e, None),
        };
        session.advance(SigningPhase::Rendering);
        session.capture.clear();

        let signed_at = self.services.clock.now();
        let signed_bytes = match self.render(&session.record, &raster, signed_at).await {
            Ok(bytes) => bytes,
            Err(e) => return session.fail(e, None),
        };
        let digest = format!("{:x}", Sha256::digest(&signed_bytes));

        session.advance(SigningPhase::Uploading);
        let filename = signed_filename(&session.record.title, signed_at);
        let asset = match self.services.store.upload(auth, signed_bytes, &filename).await {
            Ok(asset) => asset,
            Err(e) => return session.fail(e, None),
        };
        info!(asset_id = asset.id, %digest, "signed document uploaded");

        session.advance(SigningPhase::Persisting);
        if let Err(e) = self
            .services
            .records
            .link_and_mark_signed(auth, &session.record.document_id, &asset, signed_at)
            .await
        {
            let orphan = self.compensate(auth, &asset).await;
            return session.fail(e, orphan);
        }

        session.advance(SigningPhase::Done);
        let records = match self.services.records.list_contracts(auth).await {
            Ok(list) => Some(list),
            Err(e) => {
                warn!(code = e.code(), detail = %e, "record list refresh failed after signing");
                None
            }
        };
        let record = records
            .as_ref()
            .and_then(|list| {
                list.iter()
                    .find(|r| r.document_id == session.record.document_id)
                    .cloned()
            })
            .unwrap_or_else(|| ContractRecord {
                document: Some(asset.clone()),
                signed: true,
                signed_at: Some(signed_at),
                ..session.record.clone()
            });
        session.record = record.clone();

        SaveOutcome::Done(SignedContract {
            asset,
            signed_at,
            digest,
            record,
            records,
        })
    }

    async fn render(
        &self,
        record: &ContractRecord,
        raster: &SignatureRaster,
        signed_at: DateTime<Utc>,
    ) -> PortalResult<Vec<u8>> {
        let original = self.services.source.fetch(record.document_url()).await?;
        let local = signed_at.with_timezone(&self.stamp_offset);
        let png = raster.png_bytes().to_vec();
        let caption = self.caption.clone();
        // stamping is CPU-bound; keep it off the async workers
        tokio::task::spawn_blocking(move || pdf::stamp(&original, &png, &caption, &local))
            .await
            .map_err(|e| PortalError::MalformedDocument(format!("stamp task failed: {e}")))?
    }

    /// Deletes an asset whose record update failed. Returns it back when the
    /// delete fails too, so the orphan is reported instead of lost.
    async fn compensate(&self, auth: Option<&Session>, asset: &AssetReference) -> Option<AssetReference> {
        match self.services.store.delete_asset(auth, asset).await {
            Ok(()) => {
                info!(asset_id = asset.id, "uploaded asset removed after failed record update");
                None
            }
            Err(e) => {
                error!(asset_id = asset.id, url = %asset.url, detail = %e, "orphaned asset left on store");
                Some(asset.clone())
            }
        }
    }
}

/// `<title>_firmado_<yyyymmddHHMMSS>.pdf` with the title reduced to a safe stem.
pub fn signed_filename(title: &str, signed_at: DateTime<Utc>) -> String {
    let stem = sanitize_file_stem(title, "contrato");
    format!("{stem}_firmado_{}.pdf", signed_at.format("%Y%m%d%H%M%S"))
}
