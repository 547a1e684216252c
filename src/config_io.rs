use log::error;
use once_cell::sync::Lazy;
use std::{
    fs::create_dir_all,
    path::{Path, PathBuf},
};

const FALLBACK_CONFIG_PATH: &str = "/tmp/wlxanchor";

pub static CONFIG_ROOT_PATH: Lazy<PathBuf> = Lazy::new(|| {
    if let Ok(xdg_dirs) = xdg::BaseDirectories::new() {
        let mut dir = xdg_dirs.get_config_home();
        dir.push("wlxanchor");
        return dir;
    }
    //Return fallback config path
    error!(
        "Err: Failed to find config path, using {}",
        FALLBACK_CONFIG_PATH
    );
    PathBuf::from(FALLBACK_CONFIG_PATH)
});

pub fn get_conf_d_path(config_root: &Path) -> PathBuf {
    config_root.join("conf.d")
}

// Make sure config directory is present and return root config path
pub fn ensure_config_root(config_root: &Path) -> PathBuf {
    if let Err(e) = create_dir_all(get_conf_d_path(config_root)) {
        error!(
            "Failed to create config directory {}: {}",
            config_root.to_string_lossy(),
            e
        );
    }
    config_root.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_conf_d() {
        let root = std::env::temp_dir().join(format!("wlx-anchor-io-{}", uuid::Uuid::new_v4()));
        let path = ensure_config_root(&root);
        assert_eq!(path, root);
        assert!(get_conf_d_path(&root).is_dir());
        let _ = std::fs::remove_dir_all(&root);
    }
}
