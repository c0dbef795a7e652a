use std::path::{Path, PathBuf};

use directories::ProjectDirs;

const QUALIFIER: &str = "dev";
const ORGANIZATION: &str = "kanban-sync";
const APPLICATION: &str = "kanban-sync";

/// Per-user configuration directory, if the platform exposes one.
pub fn config_dir() -> Option<PathBuf> {
    ProjectDirs::from(QUALIFIER, ORGANIZATION, APPLICATION)
        .map(|dirs| dirs.config_dir().to_path_buf())
}

/// Location of a named file inside [`config_dir`].
pub fn config_file(name: impl AsRef<Path>) -> Option<PathBuf> {
    config_dir().map(|dir| dir.join(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_file_lives_under_config_dir() {
        if let (Some(dir), Some(file)) = (config_dir(), config_file("sync.toml")) {
            assert!(file.starts_with(&dir));
            assert_eq!(file.file_name().and_then(|f| f.to_str()), Some("sync.toml"));
        }
    }
}
