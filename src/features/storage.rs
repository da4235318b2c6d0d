use crate::config::PortalConfig;
use crate::error::{PortalError, PortalResult};
use regex::Regex;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

#[cfg(test)]
use std::sync::Mutex;

#[cfg(test)]
pub fn test_env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

pub fn preferred_temp_dir() -> PathBuf {
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Ok(custom) = std::env::var("OBRA_PORTAL_TEMP_DIR") {
        candidates.push(PathBuf::from(custom));
    }
    if let Ok(tmpdir) = std::env::var("TMPDIR") {
        candidates.push(PathBuf::from(tmpdir));
    }
    candidates.push(std::env::temp_dir());

    for dir in candidates {
        if is_dir(&dir) {
            return dir;
        }
    }
    std::env::temp_dir()
}

pub fn downloads_dir() -> Option<PathBuf> {
    let mut candidates = Vec::new();
    if let Ok(xdg) = std::env::var("XDG_DOWNLOAD_DIR") {
        candidates.push(PathBuf::from(xdg));
    }
    if let Ok(home) = std::env::var("HOME") {
        candidates.push(PathBuf::from(home).join("Downloads"));
    }

    candidates.into_iter().find(|dir| is_dir(dir))
}

/// Configured directory first, then the user's downloads, then temp.
pub fn download_dir(config: &PortalConfig) -> PathBuf {
    if let Some(dir) = config.download_dir.as_ref().filter(|d| is_dir(d)) {
        return dir.clone();
    }
    downloads_dir().unwrap_or_else(preferred_temp_dir)
}

fn is_dir(path: &Path) -> bool {
    std::fs::metadata(path).map(|m| m.is_dir()).unwrap_or(false)
}

fn unsafe_run() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\w\-]+").ok()).as_ref()
}

/// Reduces a title to letters, digits, `_` and `-`. Runs of anything else
/// become one `_`. Falls back to `fallback` when nothing is left.
pub fn sanitize_file_stem(title: &str, fallback: &str) -> String {
    let title = title.trim();
    let replaced = match unsafe_run() {
        Some(re) => re.replace_all(title, "_").into_owned(),
        None => title
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
            .collect(),
    };
    let stem = replaced.trim_matches('_');
    if stem.is_empty() {
        fallback.to_string()
    } else {
        stem.to_string()
    }
}

/// Writes through a temp file in `dir` so a partial download never shows up
/// under the final name.
pub fn write_atomic(dir: &Path, filename: &str, bytes: &[u8]) -> PortalResult<PathBuf> {
    std::fs::create_dir_all(dir)
        .map_err(|e| PortalError::Storage(format!("create {}: {e}", dir.display())))?;
    let target = dir.join(filename);
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .map_err(|e| PortalError::Storage(format!("temp file in {}: {e}", dir.display())))?;
    tmp.write_all(bytes)
        .and_then(|_| tmp.flush())
        .map_err(|e| PortalError::Storage(format!("write {}: {e}", target.display())))?;
    tmp.persist(&target)
        .map_err(|e| PortalError::Storage(format!("persist {}: {e}", target.display())))?;
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stems_keep_word_characters() {
        assert_eq!(sanitize_file_stem("Presupuesto nº 12 / 2025", "doc"), "Presupuesto_nº_12_2025");
        assert_eq!(sanitize_file_stem("plano-planta_baja", "doc"), "plano-planta_baja");
        assert_eq!(sanitize_file_stem(" ../ ", "doc"), "doc");
    }

    #[test]
    fn configured_download_dir_wins_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let config = PortalConfig {
            download_dir: Some(dir.path().to_path_buf()),
            ..PortalConfig::default()
        };
        assert_eq!(download_dir(&config), dir.path());
    }

    #[test]
    fn missing_configured_dir_falls_back() {
        let _guard = test_env_lock().lock().unwrap_or_else(|p| p.into_inner());
        let config = PortalConfig {
            download_dir: Some(PathBuf::from("/definitely/not/here")),
            ..PortalConfig::default()
        };
        let dir = download_dir(&config);
        assert_ne!(dir, PathBuf::from("/definitely/not/here"));
        assert!(dir.is_dir());
    }

    #[test]
    fn atomic_write_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let first = write_atomic(dir.path(), "a.pdf", b"one").unwrap();
        let second = write_atomic(dir.path(), "a.pdf", b"two").unwrap();
        assert_eq!(first, second);
        assert_eq!(std::fs::read(&second).unwrap(), b"two");
        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }
}
