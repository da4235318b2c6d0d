use crate::features::model::{ContractRecord, DocumentEntry, DocumentKind, GalleryPhoto};
use crate::features::signing::{SignedContract, SigningSession};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Screen {
    Login,
    Home,
    Documents(DocumentKind),
    Gallery,
    SignContract,
}

/// Error shown on the current screen: a stable code and its localized text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShownError {
    pub code: String,
    pub message: String,
}

pub struct AppState {
    pub nav_stack: Vec<Screen>,
    pub locale: String,
    pub last_error: Option<ShownError>,
    pub login_identifier: Option<String>,
    pub documents: Vec<DocumentEntry>,
    pub contracts: Vec<ContractRecord>,
    pub gallery: Vec<GalleryPhoto>,
    pub signing: Option<SigningSession>,
    pub last_signed: Option<SignedContract>,
    pub last_download: Option<PathBuf>,
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

impl AppState {
    pub fn new() -> Self {
        Self {
            nav_stack: Vec::new(),
            locale: "es".into(),
            last_error: None,
            login_identifier: None,
            documents: Vec::new(),
            contracts: Vec::new(),
            gallery: Vec::new(),
            signing: None,
            last_signed: None,
            last_download: None,
        }
    }

    pub fn ensure_navigation(&mut self) {
        if self.nav_stack.is_empty() {
            self.nav_stack.push(Screen::Login);
        }
    }

    pub fn current_screen(&self) -> Screen {
        self.nav_stack.last().copied().unwrap_or(Screen::Login)
    }

    pub fn nav_depth(&self) -> usize {
        let depth = self.nav_stack.len();
        if depth == 0 {
            1
        } else {
            depth
        }
    }

    pub fn push_screen(&mut self, screen: Screen) {
        self.ensure_navigation();
        if self.nav_stack.last() != Some(&screen) {
            self.nav_stack.push(screen);
        }
    }

    pub fn replace_current(&mut self, screen: Screen) {
        self.ensure_navigation();
        if let Some(last) = self.nav_stack.last_mut() {
            *last = screen;
        }
    }

    pub fn pop_screen(&mut self) {
        self.ensure_navigation();
        if self.nav_stack.len() > 1 {
            self.nav_stack.pop();
        }
    }

    /// Root the stack at `screen`, dropping history.
    pub fn reset_navigation(&mut self, screen: Screen) {
        self.nav_stack.clear();
        self.nav_stack.push(screen);
    }

    /// Drops everything tied to the signed-in user.
    pub fn reset_runtime(&mut self) {
        self.last_error = None;
        self.documents.clear();
        self.contracts.clear();
        self.gallery.clear();
        self.signing = None;
        self.last_signed = None;
        self.last_download = None;
    }
}
