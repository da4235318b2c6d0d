use crate::error::{PortalError, PortalResult};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_ORIGIN: &str = "https://dashboard.grupogersan360.com";
pub const DEFAULT_CAPTION: &str = "Firmado digitalmente";

/// Runtime settings for the portal core. Read once by the application root.
#[derive(Debug, Clone, PartialEq)]
pub struct PortalConfig {
    /// Origin of the document store; relative asset urls resolve against it.
    pub store_origin: String,
    /// Path of the REST API below the origin.
    pub api_path: String,
    pub http_timeout: Duration,
    pub canvas_width: u32,
    pub canvas_height: u32,
    pub stamp_caption: String,
    /// Offset applied to the signing instant before it is printed on the page.
    pub stamp_utc_offset_minutes: i32,
    pub download_dir: Option<PathBuf>,
    pub log_filter: String,
    pub log_json: bool,
    pub locale: String,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            store_origin: DEFAULT_ORIGIN.to_string(),
            api_path: "/api".to_string(),
            http_timeout: Duration::from_secs(30),
            canvas_width: 700,
            canvas_height: 300,
            stamp_caption: DEFAULT_CAPTION.to_string(),
            stamp_utc_offset_minutes: 60,
            download_dir: None,
            log_filter: "info".to_string(),
            log_json: false,
            locale: "es".to_string(),
        }
    }
}

impl PortalConfig {
    pub fn from_env() -> PortalResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup, falling back to defaults
    /// for missing keys. Present but unparseable values are rejected.
    pub fn from_lookup<F>(lookup: F) -> PortalResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let store_origin = get("OBRA_PORTAL_ORIGIN")
            .map(|v| v.trim_end_matches('/').to_string())
            .unwrap_or(defaults.store_origin);
        if !store_origin.starts_with("http://") && !store_origin.starts_with("https://") {
            return Err(PortalError::Config(format!(
                "OBRA_PORTAL_ORIGIN must be an http(s) origin, got {store_origin}"
            )));
        }

        let api_path = get("OBRA_PORTAL_API_PATH")
            .map(|v| format!("/{}", v.trim_matches('/')))
            .unwrap_or(defaults.api_path);

        let http_timeout = match get("OBRA_PORTAL_HTTP_TIMEOUT_SECS") {
            Some(raw) => Duration::from_secs(parse_number::<u64>("OBRA_PORTAL_HTTP_TIMEOUT_SECS", &raw)?),
            None => defaults.http_timeout,
        };

        let canvas_width = match get("OBRA_PORTAL_CANVAS_WIDTH") {
            Some(raw) => parse_number::<u32>("OBRA_PORTAL_CANVAS_WIDTH", &raw)?,
            None => defaults.canvas_width,
        };
        let canvas_height = match get("OBRA_PORTAL_CANVAS_HEIGHT") {
            Some(raw) => parse_number::<u32>("OBRA_PORTAL_CANVAS_HEIGHT", &raw)?,
            None => defaults.canvas_height,
        };
        if canvas_width == 0 || canvas_height == 0 {
            return Err(PortalError::Config("signature canvas must not be empty".into()));
        }

        let stamp_utc_offset_minutes = match get("OBRA_PORTAL_STAMP_UTC_OFFSET_MINUTES") {
            Some(raw) => parse_number::<i32>("OBRA_PORTAL_STAMP_UTC_OFFSET_MINUTES", &raw)?,
            None => defaults.stamp_utc_offset_minutes,
        };
        if stamp_utc_offset_minutes.abs() >= 24 * 60 {
            return Err(PortalError::Config(format!(
                "stamp utc offset out of range: {stamp_utc_offset_minutes}"
            )));
        }

        let log_json = match get("OBRA_PORTAL_LOG_JSON") {
            Some(raw) => parse_bool("OBRA_PORTAL_LOG_JSON", &raw)?,
            None => defaults.log_json,
        };

        Ok(Self {
            store_origin,
            api_path,
            http_timeout,
            canvas_width,
            canvas_height,
            stamp_caption: get("OBRA_PORTAL_STAMP_CAPTION").unwrap_or(defaults.stamp_caption),
            stamp_utc_offset_minutes,
            download_dir: get("OBRA_PORTAL_DOWNLOAD_DIR").map(PathBuf::from),
            log_filter: get("OBRA_PORTAL_LOG").unwrap_or(defaults.log_filter),
            log_json,
            locale: get("OBRA_PORTAL_LOCALE").unwrap_or(defaults.locale),
        })
    }

    pub fn api_base(&self) -> String {
        format!("{}{}", self.store_origin, self.api_path)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> PortalResult<T> {
    raw.parse::<T>()
        .map_err(|_| PortalError::Config(format!("{key}: not a number: {raw}")))
}

fn parse_bool(key: &str, raw: &str) -> PortalResult<bool> {
    match raw {
        "1" | "true" | "TRUE" | "yes" | "YES" => Ok(true),
        "0" | "false" | "FALSE" | "no" | "NO" => Ok(false),
        _ => Err(PortalError::Config(format!("{key}: not a boolean: {raw}"))),
    }
}
