use serde::{Deserialize, Serialize};

/// A published release, as returned by GitHub's `releases/latest` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Release {
    pub tag_name: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub prerelease: bool,
    #[serde(default)]
    pub published_at: Option<String>,
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    pub browser_download_url: String,
    #[serde(default)]
    pub size: u64,
}

impl Release {
    /// Tag without its `v` prefix.
    pub fn version(&self) -> &str {
        self.tag_name.strip_prefix('v').unwrap_or(&self.tag_name)
    }

    /// The packaged extension archive, if the release carries one.
    pub fn package(&self) -> Option<&ReleaseAsset> {
        self.assets
            .iter()
            .find(|a| a.name.contains("enhanced") || a.name.contains(".zip"))
    }
}

impl ReleaseAsset {
    pub fn size_label(&self) -> String {
        format!("{} KB", (self.size as f64 / 1024.0).round() as u64)
    }
}
