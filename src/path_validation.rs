use std::path::{Component, Path, PathBuf};

/// Maximum length of a single file or directory name on common filesystems
const MAX_COMPONENT_LENGTH: usize = 255;

/// Validate that a remote-supplied name is a single, harmless path component
pub fn validate_component(name: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err("Name is empty".to_string());
    }

    if name.len() > MAX_COMPONENT_LENGTH {
        return Err(format!("Name too long (max {MAX_COMPONENT_LENGTH} bytes)"));
    }

    if name.bytes().any(|b| b == 0) {
        return Err("Name contains null bytes".to_string());
    }

    if name.chars().any(|c| c.is_control()) {
        return Err("Name contains control characters".to_string());
    }

    if name.contains('/') || name.contains('\\') {
        return Err(format!("Name contains a path separator: '{name}'"));
    }

    if name == "." || name == ".." {
        return Err("Path traversal detected (..)".to_string());
    }

    // Catches drive prefixes such as `C:` on Windows.
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(format!("Name is not a plain file name: '{name}'")),
    }
}

/// Join validated components onto `base`, refusing anything that escapes it
pub fn join_within(base: &Path, parts: &[&str]) -> Result<PathBuf, String> {
    let mut joined = base.to_path_buf();
    for part in parts {
        validate_component(part)?;
        joined.push(part);
    }

    if !joined.starts_with(base) {
        return Err("Path traversal detected: attempted to leave the download folder".to_string());
    }

    Ok(joined)
}
