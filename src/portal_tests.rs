use crate::config::PortalConfig;
use crate::features::fakes::{contract, sample_pdf, FixedClock, MemoryStore};
use crate::features::model::{DocumentEntry, DocumentKind, GalleryPhoto};
use crate::features::signing::SigningPhase;
use crate::state::Screen;
use crate::{Portal, PortalServices};
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;

fn portal_with(store: &Arc<MemoryStore>, download_dir: Option<PathBuf>) -> Portal {
    let services = PortalServices {
        auth: store.clone(),
        catalog: store.clone(),
        source: store.clone(),
        store: store.clone(),
        records: store.clone(),
        clock: Arc::new(FixedClock::sample()),
    };
    let config = PortalConfig {
        download_dir,
        ..PortalConfig::default()
    };
    Portal::new(config, services).expect("portal")
}

fn contracts_store() -> Arc<MemoryStore> {
    Arc::new(
        MemoryStore::new()
            .with_contract(contract("c1", false), sample_pdf(2))
            .with_contract(contract("c2", true), sample_pdf(1)),
    )
}

async fn send(portal: &mut Portal, command: Value) -> Value {
    let out = portal.dispatch(&command.to_string()).await;
    serde_json::from_str(&out).expect("ui json")
}

async fn sign_in(portal: &mut Portal) -> Value {
    send(
        portal,
        json!({
            "action": "sign_in",
            "bindings": { "identifier": "ana@example.com", "password": "correct horse" }
        }),
    )
    .await
}

fn nodes(ui: &Value) -> Vec<&Value> {
    fn walk<'a>(node: &'a Value, acc: &mut Vec<&'a Value>) {
        acc.push(node);
        if let Some(children) = node.get("children").and_then(Value::as_array) {
            for child in children {
                walk(child, acc);
            }
        }
    }
    let mut out = Vec::new();
    walk(ui, &mut out);
    out
}

fn find<'a>(ui: &'a Value, key: &str, value: &str) -> Option<&'a Value> {
    nodes(ui)
        .into_iter()
        .find(|n| n.get(key).and_then(Value::as_str) == Some(value))
}

fn has_error(ui: &Value, code: &str) -> bool {
    find(ui, "content_description", code).is_some()
}

const STROKE: &str = r#"[{"kind":"down","x":10,"y":10},{"kind":"move","x":50,"y":50},{"kind":"up"}]"#;

fn stroke_events() -> Value {
    serde_json::from_str(STROKE).unwrap()
}

#[tokio::test]
async fn starts_on_login_and_rejects_bad_credentials() {
    let store = contracts_store();
    let mut portal = portal_with(&store, None);
    let ui = send(&mut portal, json!({"action": "init"})).await;
    assert!(find(&ui, "action", "sign_in").is_some());

    let ui = send(
        &mut portal,
        json!({"action": "sign_in", "bindings": {"identifier": "ana@example.com", "password": "nope"}}),
    )
    .await;
    assert!(has_error(&ui, "auth_failed"));
    assert!(portal.session().is_none());
    assert_eq!(portal.state().current_screen(), Screen::Login);
    let identifier = find(&ui, "bind_key", "identifier").unwrap();
    assert_eq!(identifier.get("text").and_then(Value::as_str), Some("ana@example.com"));
}

#[tokio::test]
async fn lists_require_a_session() {
    let store = contracts_store();
    let mut portal = portal_with(&store, None);
    let ui = send(&mut portal, json!({"action": "documents_screen", "payload": "contracts"})).await;
    assert!(has_error(&ui, "unauthenticated"));
    assert_eq!(portal.state().current_screen(), Screen::Login);
}

#[tokio::test]
async fn sign_in_then_sign_out_clears_everything() {
    let store = contracts_store();
    let mut portal = portal_with(&store, None);
    let ui = sign_in(&mut portal).await;
    assert_eq!(portal.state().current_screen(), Screen::Home);
    assert!(find(&ui, "payload", "contracts").is_some());

    send(&mut portal, json!({"action": "documents_screen", "payload": "contracts"})).await;
    assert_eq!(portal.state().contracts.len(), 2);

    let ui = send(&mut portal, json!({"action": "sign_out"})).await;
    assert!(portal.session().is_none());
    assert!(portal.state().contracts.is_empty());
    assert_eq!(portal.state().nav_stack, vec![Screen::Login]);
    assert!(find(&ui, "action", "sign_in").is_some());
}

#[tokio::test]
async fn contract_signing_end_to_end() {
    let store = contracts_store();
    let mut portal = portal_with(&store, None);
    sign_in(&mut portal).await;
    let ui = send(&mut portal, json!({"action": "documents_screen", "payload": "contracts"})).await;
    assert!(find(&ui, "payload", "c2").is_some());

    let ui = send(&mut portal, json!({"action": "sign_open", "payload": "c1"})).await;
    assert_eq!(portal.state().current_screen(), Screen::SignContract);
    let save = find(&ui, "action", "sign_save").unwrap();
    assert_eq!(save.get("disabled").and_then(Value::as_bool), Some(true));

    let ui = send(&mut portal, json!({"action": "sign_strokes", "events": stroke_events()})).await;
    let pad = find(&ui, "type", "SignaturePad").unwrap();
    let preview = pad.get("preview").and_then(Value::as_str).unwrap();
    assert!(preview.starts_with("data:image/png;base64,"));
    assert!(find(&ui, "action", "sign_save").unwrap().get("disabled").is_none());

    let ui = send(&mut portal, json!({"action": "sign_save"})).await;
    assert!(find(&ui, "content_description", "sign_done").is_some());
    assert!(find(&ui, "content_description", "sign_digest").is_some());
    let signing = portal.state().signing.as_ref().unwrap();
    assert_eq!(signing.phase(), &SigningPhase::Done);
    assert!(store.contract("c1").unwrap().signed);
    assert!(portal
        .state()
        .contracts
        .iter()
        .any(|c| c.document_id == "c1" && c.signed));

    let ui = send(&mut portal, json!({"action": "sign_close"})).await;
    assert_eq!(portal.state().current_screen(), Screen::Documents(DocumentKind::Contracts));
    assert!(find(&ui, "action", "sign_open").is_none());
}

#[tokio::test]
async fn empty_save_is_a_guarded_no_op() {
    let store = contracts_store();
    let mut portal = portal_with(&store, None);
    sign_in(&mut portal).await;
    send(&mut portal, json!({"action": "documents_screen", "payload": "contracts"})).await;
    send(&mut portal, json!({"action": "sign_open", "payload": "c1"})).await;

    let ui = send(&mut portal, json!({"action": "sign_save"})).await;
    assert!(!has_error(&ui, "signature_empty"));
    assert!(portal.state().last_error.is_none());
    let save = find(&ui, "action", "sign_save").unwrap();
    assert_eq!(save.get("disabled").and_then(Value::as_bool), Some(true));
    assert_eq!(
        portal.state().signing.as_ref().map(|s| s.phase().clone()),
        Some(SigningPhase::Capturing)
    );
    assert_eq!(store.fetch_calls(), 0);
    assert_eq!(store.upload_calls(), 0);
}

#[tokio::test]
async fn signed_contracts_cannot_be_opened_for_signing() {
    let store = contracts_store();
    let mut portal = portal_with(&store, None);
    sign_in(&mut portal).await;
    send(&mut portal, json!({"action": "documents_screen", "payload": "contracts"})).await;
    let ui = send(&mut portal, json!({"action": "sign_open", "payload": "c2"})).await;
    assert!(has_error(&ui, "invalid_command"));
    assert!(portal.state().signing.is_none());
    assert_eq!(portal.state().current_screen(), Screen::Documents(DocumentKind::Contracts));
}

#[tokio::test]
async fn failed_save_offers_retry_with_a_clean_pad() {
    let store = contracts_store();
    store.fail_persist(true);
    store.fail_delete();
    let mut portal = portal_with(&store, None);
    sign_in(&mut portal).await;
    send(&mut portal, json!({"action": "documents_screen", "payload": "contracts"})).await;
    send(&mut portal, json!({"action": "sign_open", "payload": "c1"})).await;
    send(&mut portal, json!({"action": "sign_strokes", "events": stroke_events()})).await;

    let ui = send(&mut portal, json!({"action": "sign_save"})).await;
    assert!(has_error(&ui, "persist_failed"));
    assert!(find(&ui, "content_description", "sign_orphaned_asset").is_some());
    assert!(find(&ui, "action", "sign_retry").is_some());
    assert!(!store.contract("c1").unwrap().signed);

    let ui = send(&mut portal, json!({"action": "sign_retry"})).await;
    let signing = portal.state().signing.as_ref().unwrap();
    assert_eq!(signing.phase(), &SigningPhase::Capturing);
    assert!(!signing.capture().has_content());
    assert!(find(&ui, "type", "SignaturePad").unwrap().get("preview").is_none());
}

#[tokio::test]
async fn download_lands_in_configured_directory() {
    let dir = tempfile::tempdir().unwrap();
    let invoice = DocumentEntry {
        id: 9,
        document_id: "f1".into(),
        title: "Factura enero".into(),
        asset: None,
        legacy_url: Some("/uploads/factura_enero.pdf".into()),
        created_at: Utc.with_ymd_and_hms(2025, 1, 31, 18, 0, 0).unwrap(),
    };
    let store = Arc::new(MemoryStore::new().with_entries(
        DocumentKind::Invoices,
        vec![invoice],
        &sample_pdf(1),
    ));
    let mut portal = portal_with(&store, Some(dir.path().to_path_buf()));
    sign_in(&mut portal).await;
    send(&mut portal, json!({"action": "documents_screen", "payload": "invoices"})).await;
    let ui = send(&mut portal, json!({"action": "document_download", "payload": "f1"})).await;

    let expected = dir.path().join("Factura_enero.pdf");
    assert_eq!(portal.state().last_download.as_deref(), Some(expected.as_path()));
    assert!(expected.is_file());
    assert!(find(&ui, "content_description", "download_path").is_some());
}

#[tokio::test]
async fn gallery_groups_photos_by_category() {
    let at = Utc.with_ymd_and_hms(2025, 2, 1, 9, 0, 0).unwrap();
    let photo = |id: i64, category: &str| GalleryPhoto {
        id,
        url: format!("/uploads/p{id}.jpg"),
        name: format!("p{id}.jpg"),
        caption: None,
        gallery_id: 1,
        category: category.into(),
        created_at: at,
    };
    let store = Arc::new(MemoryStore::new().with_photos(vec![
        photo(1, "obra"),
        photo(2, "estado-inicial"),
        photo(3, "obra"),
    ]));
    let mut portal = portal_with(&store, None);
    sign_in(&mut portal).await;
    let ui = send(&mut portal, json!({"action": "gallery_screen"})).await;
    assert_eq!(portal.state().current_screen(), Screen::Gallery);
    let cards: Vec<&Value> = nodes(&ui)
        .into_iter()
        .filter(|n| n.get("type").and_then(Value::as_str) == Some("Card"))
        .collect();
    assert_eq!(cards.len(), 2);
    assert_eq!(cards[0].get("title").and_then(Value::as_str), Some("estado-inicial"));
    assert_eq!(cards[1].get("subtitle").and_then(Value::as_str), Some("2"));
}

#[test]
fn remote_services_build_from_default_config() {
    assert!(PortalServices::remote(&PortalConfig::default()).is_ok());
}

#[tokio::test]
async fn login_screen_renders_identifier_hint() {
    let store = contracts_store();
    let mut portal = portal_with(&store, None);
    let ui = send(&mut portal, json!({"action": "init"})).await;
    let identifier = find(&ui, "bind_key", "identifier").unwrap();
    assert!(identifier.get("hint").and_then(Value::as_str).is_some_and(|h| !h.is_empty()));
}

#[tokio::test]
async fn malformed_commands_render_an_error() {
    let store = contracts_store();
    let mut portal = portal_with(&store, None);
    let out = portal.dispatch("{not json").await;
    let ui: Value = serde_json::from_str(&out).unwrap();
    assert!(has_error(&ui, "invalid_command"));

    let ui = send(&mut portal, json!({"action": "launch_rockets"})).await;
    assert!(has_error(&ui, "invalid_command"));

    let ui = send(&mut portal, json!({"action": "documents_screen", "payload": "memes"})).await;
    assert!(has_error(&ui, "invalid_command"));
}

#[tokio::test]
async fn documents_screen_with_gallery_payload_opens_gallery() {
    let store = contracts_store();
    let mut portal = portal_with(&store, None);
    sign_in(&mut portal).await;
    send(&mut portal, json!({"action": "documents_screen", "payload": "gallery"})).await;
    assert_eq!(portal.state().current_screen(), Screen::Gallery);
    send(&mut portal, json!({"action": "back"})).await;
    assert_eq!(portal.state().current_screen(), Screen::Home);
}
