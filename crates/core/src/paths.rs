use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Paths {
    pub base: PathBuf,
}

impl Paths {
    pub fn new() -> Self {
        let base = dirs::home_dir()
            .map(|h| h.join(".skylink"))
            .unwrap_or_else(|| PathBuf::from(".skylink"));
        Self { base }
    }

    pub fn with_base(base: PathBuf) -> Self {
        Self { base }
    }

    pub fn config_file(&self) -> PathBuf {
        self.base.join("config.json")
    }

    /// Backing file for the host key-value store (settings, update state).
    pub fn storage_file(&self) -> PathBuf {
        self.base.join("storage.json")
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}
