//! Cookie persistence for browser sessions.
//!
//! Cookies are stored as a JSON array so trust earned with the target site
//! survives restarts. Loading and saving are best-effort.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use super::{BrowserError, BrowserResult};

/// Cookie representation independent of the browser engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
}

fn default_path() -> String {
    "/".into()
}

/// Read cookies from `path`; a missing file yields an empty list.
pub fn load_cookies(path: &Path) -> BrowserResult<Vec<StoredCookie>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let contents = fs::read_to_string(path).map_err(|err| BrowserError::Cookies(err.to_string()))?;
    let cookies: Vec<StoredCookie> =
        serde_json::from_str(&contents).map_err(|err| BrowserError::Cookies(err.to_string()))?;
    Ok(cookies
        .into_iter()
        .filter(|cookie| !cookie.name.is_empty() && !cookie.domain.is_empty())
        .collect())
}

pub fn save_cookies(path: &Path, cookies: &[StoredCookie]) -> BrowserResult<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|err| BrowserError::Cookies(err.to_string()))?;
    }
    let json =
        serde_json::to_string_pretty(cookies).map_err(|err| BrowserError::Cookies(err.to_string()))?;
    fs::write(path, json).map_err(|err| BrowserError::Cookies(err.to_string()))?;
    log::debug!("saved {} cookies to {}", cookies.len(), path.display());
    Ok(())
}
