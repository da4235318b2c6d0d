use crate::error::{PortalError, PortalResult};
use crate::features::fetcher::DocumentSource;
use crate::features::model::{DocumentEntry, DocumentKind, GalleryPhoto};
use crate::features::storage::{sanitize_file_stem, write_atomic};
use crate::state::AppState;
use crate::ui::{node, Button as UiButton, Card as UiCard, Column as UiColumn, Image as UiImage, Text as UiText};
use rust_i18n::t;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

pub fn ensure_pdf(bytes: &[u8]) -> PortalResult<()> {
    match infer::get(bytes) {
        Some(kind) if kind.mime_type() == "application/pdf" => Ok(()),
        Some(kind) => Err(PortalError::MalformedDocument(format!(
            "expected pdf, got {}",
            kind.mime_type()
        ))),
        None => Err(PortalError::MalformedDocument("unrecognized content".into())),
    }
}

/// Fetches an entry's PDF and stores it as `<title>.pdf` in `dir`.
pub async fn download(source: &dyn DocumentSource, entry: &DocumentEntry, dir: &Path) -> PortalResult<PathBuf> {
    let bytes = source.fetch(entry.document_url()).await?;
    ensure_pdf(&bytes)?;
    let filename = format!("{}.pdf", sanitize_file_stem(&entry.title, "documento"));
    let path = write_atomic(dir, &filename, &bytes)?;
    info!(document = %entry.document_id, path = %path.display(), bytes = bytes.len(), "document downloaded");
    Ok(path)
}

/// Photos keyed by gallery category, in category order; each group keeps the
/// incoming order.
pub fn group_gallery(photos: &[GalleryPhoto]) -> BTreeMap<&str, Vec<&GalleryPhoto>> {
    let mut grouped: BTreeMap<&str, Vec<&GalleryPhoto>> = BTreeMap::new();
    for photo in photos {
        grouped.entry(photo.category.as_str()).or_default().push(photo);
    }
    grouped
}

pub fn section_title(kind: DocumentKind) -> String {
    let key = format!("section_{}", kind.id());
    t!(key.as_str()).into_owned()
}

pub fn render_documents_screen(state: &AppState, kind: DocumentKind) -> Value {
    let title = section_title(kind);
    let mut children = vec![node(UiText::new(&title).size(20.0))];

    if kind == DocumentKind::Contracts {
        if state.contracts.is_empty() {
            children.push(node(UiText::new(&t!("documents_empty")).size(14.0)));
        }
        for record in &state.contracts {
            let date = record.created_at.format("%d/%m/%Y").to_string();
            let status = if record.signed {
                t!("contract_status_signed")
            } else {
                t!("contract_status_pending")
            };
            let mut body = vec![node(UiText::new(&status).size(12.0).content_description("contract_status"))];
            body.push(node(
                UiButton::new(&t!("document_download"), "document_download")
                    .payload(&record.document_id)
                    .disabled(record.document_url().is_none()),
            ));
            if !record.signed {
                body.push(node(
                    UiButton::new(&t!("contract_sign"), "sign_open")
                        .id("sign_open_btn")
                        .payload(&record.document_id),
                ));
            }
            children.push(node(UiCard::new(body).title(&record.title).subtitle(&date).padding(12)));
        }
    } else {
        if state.documents.is_empty() {
            children.push(node(UiText::new(&t!("documents_empty")).size(14.0)));
        }
        for entry in &state.documents {
            let date = entry.created_at.format("%d/%m/%Y").to_string();
            let body = vec![node(
                UiButton::new(&t!("document_download"), "document_download")
                    .payload(&entry.document_id)
                    .disabled(entry.document_url().is_none()),
            )];
            children.push(node(UiCard::new(body).title(&entry.title).subtitle(&date).padding(12)));
        }
    }

    if let Some(path) = &state.last_download {
        let saved = t!("document_saved", path = path.display());
        children.push(node(UiText::new(&saved).size(12.0).content_description("download_path")));
    }
    node(UiColumn::new(children).padding(24))
}

pub fn render_gallery_screen(state: &AppState) -> Value {
    let title = section_title(DocumentKind::Gallery);
    let mut children = vec![node(UiText::new(&title).size(20.0))];
    if state.gallery.is_empty() {
        children.push(node(UiText::new(&t!("documents_empty")).size(14.0)));
    }
    for (category, photos) in group_gallery(&state.gallery) {
        let items: Vec<Value> = photos
            .iter()
            .map(|photo| {
                let label = photo.caption.as_deref().unwrap_or(&photo.name);
                node(UiImage::new(&photo.url).content_description(label))
            })
            .collect();
        let count = photos.len().to_string();
        children.push(node(UiCard::new(items).title(category).subtitle(&count).padding(8)));
    }
    node(UiColumn::new(children).padding(24))
}
