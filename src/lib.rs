rust_i18n::i18n!("locales", fallback = "en");

pub mod config;
pub mod error;
pub mod features;
pub mod i18n;
pub mod logging;
pub mod state;
pub mod ui;

#[cfg(test)]
mod portal_tests;

use config::PortalConfig;
use error::{PortalError, PortalResult};
use features::documents::{render_documents_screen, render_gallery_screen};
use features::fetcher::DocumentSource;
use features::model::{DocumentEntry, DocumentKind};
use features::session::{Authenticator, Session};
use features::signature_pad::PointerEvent;
use features::signing::{
    Clock, SaveOutcome, SigningOrchestrator, SigningPhase, SigningServices, SystemClock,
};
use features::store::{DocumentCatalog, DocumentStore, RecordUpdater, StoreClient};
use features::{feature_catalog, render_menu};
use rust_i18n::t;
use serde::Deserialize;
use serde_json::{json, Value};
use state::{AppState, Screen, ShownError};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, info_span, warn, Instrument};
use ui::{
    node, Button as UiButton, Column as UiColumn, Progress as UiProgress,
    SignaturePad as UiSignaturePad, Text as UiText, TextInput as UiTextInput,
};

#[derive(Default, Deserialize)]
struct Command {
    action: String,
    payload: Option<String>,
    bindings: Option<HashMap<String, String>>,
    events: Option<Vec<PointerEvent>>,
    locale: Option<String>,
}

enum Action {
    Init { locale: Option<String> },
    SetLocale(String),
    Back,
    SignIn { identifier: String, password: String },
    SignOut,
    Home,
    DocumentsScreen(DocumentKind),
    GalleryScreen,
    Refresh,
    Download { document_id: String },
    SignOpen { document_id: String },
    SignStrokes(Vec<PointerEvent>),
    SignClear,
    SignSave,
    SignRetry,
    SignClose,
}

fn parse_action(command: Command) -> PortalResult<Action> {
    let Command {
        action,
        payload,
        bindings,
        events,
        locale,
    } = command;
    let mut bindings = bindings.unwrap_or_default();
    let payload = payload.map(|p| p.trim().to_string()).filter(|p| !p.is_empty());
    let required = |what: &str| PortalError::InvalidCommand(format!("{action}: missing {what}"));

    match action.as_str() {
        "init" => Ok(Action::Init { locale }),
        "set_locale" => locale
            .or(payload)
            .map(Action::SetLocale)
            .ok_or_else(|| required("locale")),
        "back" => Ok(Action::Back),
        "sign_in" => {
            let identifier = bindings
                .remove("identifier")
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| required("identifier"))?;
            let password = bindings
                .remove("password")
                .filter(|v| !v.is_empty())
                .ok_or_else(|| required("password"))?;
            Ok(Action::SignIn {
                identifier,
                password,
            })
        }
        "sign_out" => Ok(Action::SignOut),
        "home" => Ok(Action::Home),
        "documents_screen" => {
            let raw = payload.ok_or_else(|| required("section"))?;
            match DocumentKind::parse(&raw) {
                Some(DocumentKind::Gallery) => Ok(Action::GalleryScreen),
                Some(kind) => Ok(Action::DocumentsScreen(kind)),
                None => Err(PortalError::InvalidCommand(format!("unknown section: {raw}"))),
            }
        }
        "gallery_screen" => Ok(Action::GalleryScreen),
        "refresh" => Ok(Action::Refresh),
        "document_download" => payload
            .map(|document_id| Action::Download { document_id })
            .ok_or_else(|| required("document")),
        "sign_open" => payload
            .map(|document_id| Action::SignOpen { document_id })
            .ok_or_else(|| required("contract")),
        "sign_strokes" => Ok(Action::SignStrokes(events.unwrap_or_default())),
        "sign_clear" => Ok(Action::SignClear),
        "sign_save" => Ok(Action::SignSave),
        "sign_retry" => Ok(Action::SignRetry),
        "sign_close" => Ok(Action::SignClose),
        other => Err(PortalError::InvalidCommand(format!("unknown action: {other}"))),
    }
}

/// External collaborators the portal talks to.
pub struct PortalServices {
    pub auth: Arc<dyn Authenticator>,
    pub catalog: Arc<dyn DocumentCatalog>,
    pub source: Arc<dyn DocumentSource>,
    pub store: Arc<dyn DocumentStore>,
    pub records: Arc<dyn RecordUpdater>,
    pub clock: Arc<dyn Clock>,
}

impl PortalServices {
    /// Every service backed by the remote store.
    pub fn remote(config: &PortalConfig) -> PortalResult<Self> {
        let client = Arc::new(StoreClient::new(config)?);
        Ok(Self {
            auth: client.clone(),
            catalog: client.clone(),
            source: client.clone(),
            store: client.clone(),
            records: client,
            clock: Arc::new(SystemClock),
        })
    }
}

/// Application root. Owns the session and all UI state; every command goes
/// through [`Portal::dispatch`].
pub struct Portal {
    config: PortalConfig,
    state: AppState,
    session: Option<Session>,
    auth: Arc<dyn Authenticator>,
    catalog: Arc<dyn DocumentCatalog>,
    source: Arc<dyn DocumentSource>,
    records: Arc<dyn RecordUpdater>,
    orchestrator: SigningOrchestrator,
}

impl Portal {
    pub fn new(config: PortalConfig, services: PortalServices) -> PortalResult<Self> {
        let orchestrator = SigningOrchestrator::new(
            SigningServices {
                source: services.source.clone(),
                store: services.store,
                records: services.records.clone(),
                clock: services.clock,
            },
            &config,
        )?;
        let mut state = AppState::new();
        i18n::update_locale(&mut state, &config.locale);
        state.ensure_navigation();
        Ok(Self {
            config,
            state,
            session: None,
            auth: services.auth,
            catalog: services.catalog,
            source: services.source,
            records: services.records,
            orchestrator,
        })
    }

    /// Configuration from `OBRA_PORTAL_*`, tracing installed, remote store.
    pub fn from_env() -> PortalResult<Self> {
        let config = PortalConfig::from_env()?;
        logging::init_tracing(&config);
        let services = PortalServices::remote(&config)?;
        Self::new(config, services)
    }

    pub fn config(&self) -> &PortalConfig {
        &self.config
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// JSON command in, JSON UI tree out.
    pub async fn dispatch(&mut self, input: &str) -> String {
        let value = match serde_json::from_str::<Command>(input) {
            Ok(command) => {
                let span = info_span!("dispatch", action = %command.action);
                self.handle_command(command).instrument(span).await
            }
            Err(e) => error_ui(&PortalError::InvalidCommand(format!("invalid_json:{e}"))),
        };
        value.to_string()
    }

    async fn handle_command(&mut self, command: Command) -> Value {
        self.state.ensure_navigation();
        let action = match parse_action(command) {
            Ok(action) => action,
            Err(err) => {
                self.show_error(&err);
                return render_ui(self);
            }
        };
        self.state.last_error = None;
        if let Err(err) = self.apply(action).await {
            if err == PortalError::Unauthenticated {
                self.end_session();
            }
            self.show_error(&err);
        }
        render_ui(self)
    }

    async fn apply(&mut self, action: Action) -> PortalResult<()> {
        match action {
            Action::Init { locale } => {
                if let Some(locale) = locale {
                    i18n::update_locale(&mut self.state, &locale);
                }
                if self.session.is_some() && self.state.current_screen() == Screen::Login {
                    self.state.reset_navigation(Screen::Home);
                }
            }
            Action::SetLocale(locale) => i18n::update_locale(&mut self.state, &locale),
            Action::Back => {
                if self.state.current_screen() == Screen::SignContract {
                    self.state.signing = None;
                }
                self.state.pop_screen();
                self.state.last_download = None;
            }
            Action::SignIn {
                identifier,
                password,
            } => {
                self.state.login_identifier = Some(identifier.clone());
                let session = self.auth.sign_in(&identifier, &password).await?;
                info!(user = session.user().id, "signed in");
                self.state.reset_runtime();
                self.session = Some(session);
                self.state.reset_navigation(Screen::Home);
            }
            Action::SignOut => {
                info!("signed out");
                self.end_session();
            }
            Action::Home => {
                self.require_session()?;
                self.state.reset_navigation(Screen::Home);
            }
            Action::DocumentsScreen(kind) => {
                self.load_documents(kind).await?;
                self.state.last_download = None;
                self.state.push_screen(Screen::Documents(kind));
            }
            Action::GalleryScreen => {
                self.load_gallery().await?;
                self.state.push_screen(Screen::Gallery);
            }
            Action::Refresh => match self.state.current_screen() {
                Screen::Documents(kind) => self.load_documents(kind).await?,
                Screen::Gallery => self.load_gallery().await?,
                _ => {}
            },
            Action::Download { document_id } => {
                self.require_session()?;
                let entry = self.find_entry(&document_id)?;
                let dir = features::storage::download_dir(&self.config);
                let path = features::documents::download(self.source.as_ref(), &entry, &dir).await?;
                self.state.last_download = Some(path);
            }
            Action::SignOpen { document_id } => {
                self.require_session()?;
                let record = self
                    .state
                    .contracts
                    .iter()
                    .find(|c| c.document_id == document_id)
                    .ok_or_else(|| PortalError::InvalidCommand(format!("unknown contract: {document_id}")))?;
                let session = self.orchestrator.begin(record).ok_or_else(|| {
                    PortalError::InvalidCommand(format!("contract already signed: {document_id}"))
                })?;
                self.state.signing = Some(session);
                self.state.last_signed = None;
                self.state.push_screen(Screen::SignContract);
            }
            Action::SignStrokes(events) => {
                self.signing_mut()?.consume(events);
            }
            Action::SignClear => self.signing_mut()?.clear(),
            Action::SignSave => self.save_signature().await?,
            Action::SignRetry => {
                let signing = self.signing_mut()?;
                if signing.reset() {
                    signing.restart();
                }
            }
            Action::SignClose => {
                self.state.signing = None;
                if self.state.current_screen() == Screen::SignContract {
                    self.state.pop_screen();
                }
            }
        }
        Ok(())
    }

    async fn save_signature(&mut self) -> PortalResult<()> {
        let signing = self
            .state
            .signing
            .as_mut()
            .ok_or_else(|| PortalError::InvalidCommand("no signing session".into()))?;
        match self.orchestrator.save(signing, self.session.as_ref()).await {
            SaveOutcome::Refused => Ok(()),
            SaveOutcome::Done(signed) => {
                match &signed.records {
                    Some(records) => self.state.contracts = records.clone(),
                    None => {
                        if let Some(slot) = self
                            .state
                            .contracts
                            .iter_mut()
                            .find(|c| c.document_id == signed.record.document_id)
                        {
                            *slot = signed.record.clone();
                        }
                    }
                }
                self.state.last_signed = Some(signed);
                Ok(())
            }
            // the failure stays visible in the session phase; the error panel
            // carries the localized message
            SaveOutcome::Failed(failure) => Err(failure.error),
        }
    }

    async fn load_documents(&mut self, kind: DocumentKind) -> PortalResult<()> {
        let session = self.require_session()?;
        if kind == DocumentKind::Contracts {
            let contracts = self.records.list_contracts(Some(session)).await?;
            self.state.contracts = contracts;
        } else {
            let documents = self.catalog.list_documents(Some(session), kind).await?;
            self.state.documents = documents;
        }
        Ok(())
    }

    async fn load_gallery(&mut self) -> PortalResult<()> {
        let session = self.require_session()?;
        let photos = self.catalog.list_gallery(Some(session)).await?;
        self.state.gallery = photos;
        Ok(())
    }

    fn find_entry(&self, document_id: &str) -> PortalResult<DocumentEntry> {
        self.state
            .contracts
            .iter()
            .find(|c| c.document_id == document_id)
            .map(|c| c.as_entry())
            .or_else(|| {
                self.state
                    .documents
                    .iter()
                    .find(|d| d.document_id == document_id)
                    .cloned()
            })
            .ok_or_else(|| PortalError::InvalidCommand(format!("unknown document: {document_id}")))
    }

    fn require_session(&self) -> PortalResult<&Session> {
        features::session::require(self.session.as_ref())
    }

    fn signing_mut(&mut self) -> PortalResult<&mut features::signing::SigningSession> {
        self.state
            .signing
            .as_mut()
            .ok_or_else(|| PortalError::InvalidCommand("no signing session".into()))
    }

    fn end_session(&mut self) {
        self.session = None;
        self.state.reset_runtime();
        self.state.reset_navigation(Screen::Login);
    }

    fn show_error(&mut self, err: &PortalError) {
        warn!(code = err.code(), detail = %err, "action failed");
        self.state.last_error = Some(ShownError {
            code: err.code().to_string(),
            message: err.user_message(),
        });
    }
}

fn error_ui(err: &PortalError) -> Value {
    json!({
        "type": "Column",
        "padding": 24,
        "children": [
            { "type": "Text", "text": t!("error_title"), "size": 18.0 },
            { "type": "Text", "text": err.user_message(), "content_description": err.code() }
        ]
    })
}

fn render_ui(portal: &Portal) -> Value {
    let state = &portal.state;
    match state.current_screen() {
        Screen::Login => render_login_screen(state),
        Screen::Home => {
            let name = portal
                .session
                .as_ref()
                .map(|s| s.user().full_name.as_str())
                .unwrap_or_default();
            render_menu(state, name, &feature_catalog())
        }
        Screen::Documents(kind) => with_chrome(render_documents_screen(state, kind), state),
        Screen::Gallery => with_chrome(render_gallery_screen(state), state),
        Screen::SignContract => render_sign_screen(state, portal.orchestrator.canvas()),
    }
}

/// Appends the error panel and back button to a screen column.
fn with_chrome(mut screen: Value, state: &AppState) -> Value {
    if let Some(children) = screen.get_mut("children").and_then(Value::as_array_mut) {
        push_error(children, state);
        maybe_push_back(children, state);
    }
    screen
}

fn push_error(children: &mut Vec<Value>, state: &AppState) {
    if let Some(err) = &state.last_error {
        children.push(node(
            UiText::new(&err.message)
                .size(14.0)
                .content_description(&err.code),
        ));
    }
}

fn maybe_push_back(children: &mut Vec<Value>, state: &AppState) {
    if state.nav_depth() > 1 {
        children.push(node(UiButton::new(&t!("back"), "back").id("back_btn")));
    }
}

fn render_login_screen(state: &AppState) -> Value {
    let hint = t!("login_identifier_hint");
    let mut identifier = UiTextInput::new("identifier")
        .hint(&hint)
        .single_line(true);
    if let Some(previous) = &state.login_identifier {
        identifier = identifier.text(previous);
    }
    let mut children = vec![
        node(UiText::new(&t!("login_title")).size(22.0)),
        node(identifier),
        node(
            UiTextInput::new("password")
                .hint(&t!("login_password_hint"))
                .password(true)
                .single_line(true),
        ),
        node(UiButton::new(&t!("login_submit"), "sign_in").id("sign_in_btn")),
    ];
    push_error(&mut children, state);
    node(UiColumn::new(children).padding(32))
}

fn render_sign_screen(state: &AppState, canvas: (u32, u32)) -> Value {
    let Some(signing) = &state.signing else {
        let mut children = vec![node(UiText::new(&t!("sign_no_session")))];
        push_error(&mut children, state);
        maybe_push_back(&mut children, state);
        return node(UiColumn::new(children).padding(24));
    };
    let title = t!("sign_title", title = signing.record().title);
    let mut children = vec![node(UiText::new(&title).size(20.0))];

    match signing.phase() {
        SigningPhase::Capturing => {
            let preview = signing
                .capture()
                .has_content()
                .then(|| signing.capture().rasterize(canvas.0, canvas.1).ok())
                .flatten()
                .map(|raster| raster.to_data_url());
            let mut pad = UiSignaturePad::new(canvas.0, canvas.1, "sign_strokes");
            if let Some(url) = &preview {
                pad = pad.preview(url);
            }
            children.push(node(UiText::new(&t!("sign_instructions")).size(14.0)));
            children.push(node(pad));
            children.push(node(UiButton::new(&t!("sign_clear"), "sign_clear").id("sign_clear_btn")));
            children.push(node(
                UiButton::new(&t!("sign_save"), "sign_save")
                    .id("sign_save_btn")
                    .disabled(!signing.can_save()),
            ));
        }
        SigningPhase::Rendering | SigningPhase::Uploading | SigningPhase::Persisting => {
            let key = format!("sign_phase_{}", signing.phase().name());
            children.push(node(UiSignaturePad::new(canvas.0, canvas.1, "sign_strokes").locked(true)));
            children.push(node(UiProgress::new().text(&t!(key.as_str())).content_description("sign_progress")));
        }
        SigningPhase::Done => {
            children.push(node(UiText::new(&t!("sign_done")).size(16.0).content_description("sign_done")));
            if let Some(signed) = &state.last_signed {
                let when = signed.signed_at.format("%d/%m/%Y %H:%M UTC").to_string();
                children.push(node(UiText::new(&when).size(12.0)));
                children.push(node(UiText::new(&signed.digest).size(10.0).content_description("sign_digest")));
            }
        }
        SigningPhase::Failed(failure) => {
            children.push(node(
                UiText::new(&failure.error.user_message())
                    .size(14.0)
                    .content_description(failure.error.code()),
            ));
            if let Some(orphan) = &failure.orphaned_asset {
                let note = t!("sign_orphaned_asset", name = orphan.name);
                children.push(node(UiText::new(&note).size(12.0).content_description("sign_orphaned_asset")));
            }
            children.push(node(UiButton::new(&t!("sign_retry"), "sign_retry").id("sign_retry_btn")));
        }
        SigningPhase::Idle => {
            children.push(node(UiButton::new(&t!("sign_retry"), "sign_retry").id("sign_retry_btn")));
        }
    }

    if !matches!(signing.phase(), SigningPhase::Failed(_)) {
        push_error(&mut children, state);
    }
    if !signing.phase().is_running() {
        children.push(node(UiButton::new(&t!("sign_close"), "sign_close").id("sign_close_btn")));
    }
    node(UiColumn::new(children).padding(24))
}
