use std::path::{Path, PathBuf};

/// Directory searched when no `--config` is given
pub fn default_config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".config").join("query-runner"))
}

/// Expand a leading `~` to the home directory
pub fn expand_home(path: &str) -> PathBuf {
    let rest = match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
        _ => return PathBuf::from(path),
    };
    match dirs::home_dir() {
        Some(home) => home.join(rest.trim_start_matches('/')),
        None => Path::new(path).to_path_buf(),
    }
}
