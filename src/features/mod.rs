pub mod documents;
pub mod fetcher;
pub mod model;
pub mod pdf;
pub mod session;
pub mod signature_pad;
pub mod signing;
pub mod storage;
pub mod store;

#[cfg(test)]
pub mod fakes;

use crate::state::AppState;
use crate::ui::{node, Button as UiButton, Card as UiCard, Column as UiColumn, Text as UiText};
use model::DocumentKind;
use rust_i18n::t;
use serde_json::Value;

/// A home menu entry.
pub struct Feature {
    pub id: &'static str,
    pub kind: DocumentKind,
    pub action: &'static str,
}

pub fn feature_catalog() -> Vec<Feature> {
    DocumentKind::ALL
        .into_iter()
        .map(|kind| Feature {
            id: kind.id(),
            kind,
            action: if kind == DocumentKind::Gallery {
                "gallery_screen"
            } else {
                "documents_screen"
            },
        })
        .collect()
}

/// Render the home screen using a catalog of sections.
pub fn render_menu(state: &AppState, user_name: &str, catalog: &[Feature]) -> Value {
    let greeting = t!("home_greeting", name = user_name);
    let mut children = vec![
        node(UiText::new(&greeting).size(22.0)),
        node(UiText::new(&t!("home_subtitle")).size(14.0)),
    ];

    let buttons: Vec<Value> = catalog
        .iter()
        .map(|f| {
            let label = documents::section_title(f.kind);
            node(UiButton::new(&label, f.action).id(f.id).payload(f.id))
        })
        .collect();
    children.push(node(UiCard::new(vec![node(UiColumn::new(buttons))]).padding(12)));
    children.push(node(UiButton::new(&t!("sign_out"), "sign_out").id("sign_out_btn")));
    if let Some(err) = &state.last_error {
        children.push(node(
            UiText::new(&err.message)
                .size(14.0)
                .content_description("error_text"),
        ));
    }

    node(UiColumn::new(children).padding(32))
}
