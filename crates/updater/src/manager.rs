use crate::manifest::Release;
use crate::settings::UpdateSettings;
use crate::version::is_newer_version;
use reqwest::Client;
use serde::Serialize;
use skylink_core::{Config, Error, Result};
use tracing::{debug, info};

/// What a background check found out about a release.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateInfo {
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_date: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_title: Option<String>,
    pub is_prerelease: bool,
    pub size: String,
}

#[derive(Debug, Clone)]
pub enum UpdateDecision {
    UpToDate,
    /// Newer, but a prerelease and prereleases are not wanted.
    PrereleaseSkipped { version: String },
    Available(UpdateInfo),
}

/// Decides whether a release should be offered to the user.
pub struct UpdateGate {
    settings: UpdateSettings,
}

impl UpdateGate {
    pub fn new(settings: UpdateSettings) -> Self {
        Self { settings }
    }

    pub fn evaluate(&self, current_version: &str, release: &Release) -> UpdateDecision {
        let latest = release.version();
        debug!(current = %current_version, latest = %latest, "Comparing versions");

        if !is_newer_version(latest, current_version) {
            return UpdateDecision::UpToDate;
        }
        if release.prerelease && !self.settings.include_prereleases {
            return UpdateDecision::PrereleaseSkipped {
                version: latest.to_string(),
            };
        }

        let package = release.package();
        UpdateDecision::Available(UpdateInfo {
            version: latest.to_string(),
            release_date: release
                .published_at
                .as_deref()
                .and_then(|d| chrono::DateTime::parse_from_rfc3339(d).ok())
                .map(|d| d.with_timezone(&chrono::Utc)),
            download_url: package.map(|a| a.browser_download_url.clone()),
            release_notes: release.body.clone(),
            release_title: release.name.clone(),
            is_prerelease: release.prerelease,
            size: package
                .map(|a| a.size_label())
                .unwrap_or_else(|| "Unknown".to_string()),
        })
    }
}

/// Fetches the latest release from the configured endpoint.
pub struct UpdateManager {
    release_url: String,
    current_version: String,
    client: Client,
}

impl UpdateManager {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("skylink/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Other(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            release_url: config.updates.release_url.clone(),
            current_version: config.extension.version.clone(),
            client,
        })
    }

    pub fn current_version(&self) -> &str {
        &self.current_version
    }

    pub async fn latest_release(&self) -> Result<Release> {
        if self.release_url.is_empty() {
            return Err(Error::Config("updates.releaseUrl not configured".to_string()));
        }

        debug!(url = %self.release_url, "Checking for updates");

        let response = self
            .client
            .get(&self.release_url)
            .send()
            .await
            .map_err(|e| Error::Other(format!("Failed to fetch release: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Other(format!(
                "Failed to fetch release: HTTP {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| Error::Other(format!("Failed to parse release: {}", e)))
    }

    pub async fn check(&self, settings: &UpdateSettings) -> Result<UpdateDecision> {
        let release = self.latest_release().await?;
        let decision = UpdateGate::new(settings.clone()).evaluate(&self.current_version, &release);
        if let UpdateDecision::Available(info) = &decision {
            info!(version = %info.version, "Update available");
        }
        Ok(decision)
    }
}
