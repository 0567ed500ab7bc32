//! GitHub Releases client.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use launchpad_core::{Artifact, Release, ReleaseAsset, ReleaseHost, ReleaseMetadata, Result};
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use crate::HostError;

const API_BASE: &str = "https://api.github.com";
const PER_PAGE: usize = 100;

/// GitHub Releases for one repository.
pub struct GitHubReleaseHost {
    client: reqwest::Client,
    access_token: String,
    api_base: String,
    owner: String,
    repo: String,
}

impl GitHubReleaseHost {
    /// `repository` is `owner/repo`.
    pub fn new(repository: &str, access_token: String) -> std::result::Result<Self, HostError> {
        let (owner, repo) = repository
            .split_once('/')
            .filter(|(o, r)| !o.is_empty() && !r.is_empty() && !r.contains('/'))
            .ok_or_else(|| {
                HostError::Parse(format!("repository '{}' is not owner/repo", repository))
            })?;
        Ok(Self {
            client: reqwest::Client::new(),
            access_token,
            api_base: API_BASE.to_string(),
            owner: owner.to_string(),
            repo: repo.to_string(),
        })
    }

    /// Read the token from `GITHUB_TOKEN` or `LAUNCHPAD_TOKEN`.
    pub fn from_env(repository: &str) -> std::result::Result<Self, HostError> {
        let token = std::env::var("GITHUB_TOKEN")
            .or_else(|_| std::env::var("LAUNCHPAD_TOKEN"))
            .map_err(|_| {
                HostError::Request("GITHUB_TOKEN or LAUNCHPAD_TOKEN must be set".to_string())
            })?;
        Self::new(repository, token)
    }

    /// Point at a GitHub Enterprise API root.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn repo_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/{}",
            self.api_base, self.owner, self.repo, path
        )
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header("Authorization", format!("Bearer {}", self.access_token))
            .header("User-Agent", "launchpad")
            .header("Accept", "application/vnd.github+json")
    }

    async fn send(
        &self,
        builder: reqwest::RequestBuilder,
        what: &str,
    ) -> std::result::Result<reqwest::Response, HostError> {
        let response = builder
            .send()
            .await
            .map_err(|e| HostError::Request(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(HostError::NotFound(what.to_string()));
        }
        Err(HostError::Api {
            status: status.as_u16(),
            message: format!("{}: {}", what, text),
        })
    }

    async fn json<T: for<'de> Deserialize<'de>>(
        response: reqwest::Response,
    ) -> std::result::Result<T, HostError> {
        response
            .json()
            .await
            .map_err(|e| HostError::Parse(e.to_string()))
    }

    async fn release_by_tag(&self, tag: &str) -> std::result::Result<Option<GhRelease>, HostError> {
        let url = self.repo_url(&format!("releases/tags/{}", urlencoding::encode(tag)));
        match self
            .send(self.request(reqwest::Method::GET, &url), &format!("release {}", tag))
            .await
        {
            Ok(response) => Ok(Some(Self::json(response).await?)),
            Err(HostError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn latest_release_id(&self) -> std::result::Result<Option<u64>, HostError> {
        let url = self.repo_url("releases/latest");
        match self
            .send(self.request(reqwest::Method::GET, &url), "latest release")
            .await
        {
            Ok(response) => Ok(Some(Self::json::<GhRelease>(response).await?.id)),
            Err(HostError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create_release(
        &self,
        tag: &str,
        metadata: &ReleaseMetadata,
    ) -> std::result::Result<GhRelease, HostError> {
        let payload = create_payload(tag, metadata);
        let url = self.repo_url("releases");
        match self
            .send(
                self.request(reqwest::Method::POST, &url).json(&payload),
                &format!("create release {}", tag),
            )
            .await
        {
            Ok(response) => Self::json(response).await,
            // Another writer created the tag's release between our read and write.
            Err(HostError::Api { status: 422, message }) if message.contains("already_exists") => {
                Err(HostError::Conflict(tag.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    async fn update_release(
        &self,
        id: u64,
        metadata: &ReleaseMetadata,
    ) -> std::result::Result<GhRelease, HostError> {
        self.patch_release(id, &update_payload(metadata), "update").await
    }

    /// Move the "latest" flag to `id`. GitHub clears it from the previous holder.
    async fn promote_release(&self, id: u64) -> std::result::Result<GhRelease, HostError> {
        self.patch_release(id, &serde_json::json!({ "make_latest": "true" }), "promote")
            .await
    }

    async fn patch_release(
        &self,
        id: u64,
        payload: &serde_json::Value,
        action: &str,
    ) -> std::result::Result<GhRelease, HostError> {
        let url = self.repo_url(&format!("releases/{}", id));
        let response = self
            .send(
                self.request(reqwest::Method::PATCH, &url).json(payload),
                &format!("{} release {}", action, id),
            )
            .await?;
        Self::json(response).await
    }

    async fn delete_asset(&self, id: u64) -> std::result::Result<(), HostError> {
        let url = self.repo_url(&format!("releases/assets/{}", id));
        match self
            .send(
                self.request(reqwest::Method::DELETE, &url),
                &format!("asset {}", id),
            )
            .await
        {
            Ok(_) | Err(HostError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn upload_asset(
        &self,
        release: &GhRelease,
        artifact: &Artifact,
    ) -> std::result::Result<(), HostError> {
        let url = upload_url(&release.upload_url, &artifact.name, &artifact.key.id())?;
        let body = tokio::fs::read(&artifact.path).await?;

        let builder = self
            .request(reqwest::Method::POST, url.as_str())
            .header("Content-Type", "application/octet-stream")
            .body(body);
        match self
            .send(builder, &format!("upload {}", artifact.name))
            .await
        {
            Ok(_) => Ok(()),
            // Duplicate asset name: a concurrent writer uploaded first.
            Err(HostError::Api { status: 422, .. }) => Err(HostError::Conflict(release.tag_name.clone())),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl ReleaseHost for GitHubReleaseHost {
    fn name(&self) -> &'static str {
        "github"
    }

    async fn list_releases(&self) -> Result<Vec<Release>> {
        let mut releases = Vec::new();
        for page in 1.. {
            let url = self.repo_url(&format!("releases?per_page={}&page={}", PER_PAGE, page));
            let response = self
                .send(self.request(reqwest::Method::GET, &url), "releases")
                .await?;
            let batch: Vec<GhRelease> = Self::json(response).await?;
            let done = batch.len() < PER_PAGE;
            releases.extend(batch);
            if done {
                break;
            }
        }

        let latest = self.latest_release_id().await?;
        debug!(count = releases.len(), "Listed releases");
        Ok(releases
            .into_iter()
            .map(|r| {
                let is_latest = Some(r.id) == latest;
                r.into_release(is_latest)
            })
            .collect())
    }

    async fn upsert_release(
        &self,
        tag: &str,
        metadata: &ReleaseMetadata,
        artifacts: &[Artifact],
    ) -> Result<Release> {
        let release = match self.release_by_tag(tag).await? {
            Some(existing) => {
                info!(tag = %tag, id = existing.id, "Updating release");
                self.update_release(existing.id, metadata).await?
            }
            None => {
                info!(tag = %tag, "Creating release");
                self.create_release(tag, metadata).await?
            }
        };

        for artifact in artifacts {
            if let Some(asset) = release.assets.iter().find(|a| a.name == artifact.name) {
                if asset.checksum().as_deref() == Some(artifact.checksum.as_str()) {
                    debug!(asset = %artifact.name, "Asset unchanged, skipping upload");
                    continue;
                }
                debug!(asset = %artifact.name, "Replacing asset");
                self.delete_asset(asset.id).await?;
            }
            info!(asset = %artifact.name, size = artifact.size, "Uploading asset");
            self.upload_asset(&release, artifact).await?;
        }

        // Only a release with its assets in place may become latest.
        if metadata.make_latest {
            info!(tag = %tag, id = release.id, "Marking release as latest");
            self.promote_release(release.id).await?;
        }

        let refreshed = self
            .release_by_tag(tag)
            .await?
            .ok_or_else(|| HostError::NotFound(format!("release {}", tag)))?;
        let latest = self.latest_release_id().await?;
        let is_latest = Some(refreshed.id) == latest;
        Ok(refreshed.into_release(is_latest))
    }

    async fn delete_release(&self, id: &str) -> Result<()> {
        let url = self.repo_url(&format!("releases/{}", id));
        self.send(
            self.request(reqwest::Method::DELETE, &url),
            &format!("release {}", id),
        )
        .await?;
        Ok(())
    }

    async fn delete_tag(&self, name: &str) -> Result<()> {
        let url = self.repo_url(&format!("git/refs/tags/{}", urlencoding::encode(name)));
        match self
            .send(
                self.request(reqwest::Method::DELETE, &url),
                &format!("tag {}", name),
            )
            .await
        {
            Ok(_) => Ok(()),
            // GitHub answers 422 "Reference does not exist" for missing refs.
            Err(HostError::Api { status: 422, message })
                if message.contains("Reference does not exist") =>
            {
                Err(HostError::NotFound(format!("tag {}", name)).into())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Body for creating a release. It is never made latest here: the flag moves
/// only after the assets are uploaded.
fn create_payload(tag: &str, metadata: &ReleaseMetadata) -> serde_json::Value {
    serde_json::json!({
        "tag_name": tag,
        "target_commitish": metadata.target_commitish,
        "name": metadata.name,
        "body": metadata.body,
        "draft": metadata.draft,
        "prerelease": metadata.prerelease,
        "make_latest": "false",
    })
}

/// Body for updating a release. Leaves the "latest" flag where it is.
fn update_payload(metadata: &ReleaseMetadata) -> serde_json::Value {
    serde_json::json!({
        "name": metadata.name,
        "body": metadata.body,
        "draft": metadata.draft,
        "prerelease": metadata.prerelease,
    })
}

/// Expand the `upload_url` template (`.../assets{?name,label}`) for one asset.
fn upload_url(template: &str, name: &str, label: &str) -> std::result::Result<Url, HostError> {
    let base = template.split('{').next().unwrap_or(template);
    let mut url = Url::parse(base).map_err(|e| HostError::Parse(e.to_string()))?;
    url.query_pairs_mut()
        .append_pair("name", name)
        .append_pair("label", label);
    Ok(url)
}

#[derive(Debug, Deserialize)]
struct GhRelease {
    id: u64,
    tag_name: String,
    name: Option<String>,
    body: Option<String>,
    created_at: DateTime<Utc>,
    published_at: Option<DateTime<Utc>>,
    upload_url: String,
    #[serde(default)]
    assets: Vec<GhAsset>,
}

impl GhRelease {
    fn into_release(self, latest: bool) -> Release {
        let updated_at = self
            .assets
            .iter()
            .map(|a| a.updated_at)
            .chain(self.published_at)
            .max()
            .unwrap_or(self.created_at)
            .max(self.created_at);
        Release {
            id: self.id.to_string(),
            name: self.name.unwrap_or_else(|| self.tag_name.clone()),
            tag: self.tag_name,
            body: self.body.unwrap_or_default(),
            created_at: self.created_at,
            updated_at,
            assets: self.assets.into_iter().map(GhAsset::into_asset).collect(),
            latest,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GhAsset {
    id: u64,
    name: String,
    label: Option<String>,
    size: u64,
    updated_at: DateTime<Utc>,
    /// `sha256:<hex>` on recent API versions.
    digest: Option<String>,
}

impl GhAsset {
    fn checksum(&self) -> Option<String> {
        self.digest
            .as_deref()
            .and_then(|d| d.strip_prefix("sha256:"))
            .map(str::to_string)
    }

    fn into_asset(self) -> ReleaseAsset {
        ReleaseAsset {
            id: self.id.to_string(),
            checksum: self.checksum(),
            name: self.name,
            label: self.label.filter(|l| !l.is_empty()),
            size: self.size,
        }
    }
}
