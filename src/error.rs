use rust_i18n::t;
use thiserror::Error;

/// Every failure the portal can surface to the UI boundary.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PortalError {
    /// Save was attempted with no recorded stroke points.
    #[error("signature is empty")]
    EmptySignature,

    /// The original document could not be retrieved.
    #[error("document unavailable: {0}")]
    DocumentUnavailable(String),

    /// The document bytes are not a parseable PDF.
    #[error("malformed document: {0}")]
    MalformedDocument(String),

    /// The signature raster is not a valid PNG.
    #[error("signature image invalid: {0}")]
    ImageDecode(String),

    /// No session credential was available for an authenticated call.
    #[error("not authenticated")]
    Unauthenticated,

    #[error("upload failed: {0}")]
    UploadFailed(String),

    #[error("persist failed: {0}")]
    PersistFailed(String),

    /// The store answered with a body that does not match the expected schema.
    #[error("unexpected store response: {0}")]
    Decode(String),

    /// Sign-in was rejected by the store.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("local storage failed: {0}")]
    Storage(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid command: {0}")]
    InvalidCommand(String),
}

impl PortalError {
    /// Stable machine-readable code, used in logs and the JSON UI.
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptySignature => "signature_empty",
            Self::DocumentUnavailable(_) => "document_unavailable",
            Self::MalformedDocument(_) => "pdf_parse_failed",
            Self::ImageDecode(_) => "signature_image_invalid",
            Self::Unauthenticated => "unauthenticated",
            Self::UploadFailed(_) => "upload_failed",
            Self::PersistFailed(_) => "persist_failed",
            Self::Decode(_) => "store_decode_failed",
            Self::AuthFailed(_) => "auth_failed",
            Self::Storage(_) => "storage_failed",
            Self::Config(_) => "config_invalid",
            Self::InvalidCommand(_) => "invalid_command",
        }
    }

    /// Localized, human-readable message for the UI.
    pub fn user_message(&self) -> String {
        let key = format!("error_{}", self.code());
        t!(key.as_str()).into_owned()
    }
}

pub type PortalResult<T> = Result<T, PortalError>;
