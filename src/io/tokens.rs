use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Error;
use crate::prelude::*;

const DEFAULT_FILE_NAME: &str = "resource_id_values.txt";

/// `<config dir>/cur-rollup/resource_id_values.txt`, when the platform has a config dir.
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("cur-rollup").join(DEFAULT_FILE_NAME))
}

/// Reads the newline-delimited client token list. Lines are trimmed, blank ones skipped.
pub fn load(path: &Path) -> AppResult<Vec<String>> {
    let content = fs::read_to_string(path).map_err(|source| Error::TokenList {
        path: path.display().to_string(),
        source,
    })?;

    let tokens: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect();

    Ok(tokens)
}
