//! Fetching quickstart inputs and delivering deployable artifacts.

use std::fmt;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt as _;
use reqwest::multipart::{Form, Part};
use reqwest::Client;

use crate::config::QuickstartConfig;
use crate::error::{AppError, Result};
use crate::instance::{Instance, LocalInstance, StagedQuickstart};

const USER_AGENT: &str = "quickstart-launcher";
const PACKAGE_SERVICE_PATH: &str = "/crx/packmgr/service.jsp";
const PACKAGE_UPLOAD_TIMEOUT: Duration = Duration::from_secs(600);
const ARTIFACT_EXTENSIONS: &[&str] = &["zip", "jar"];

/// Where `create` gets its jar and license from.
#[async_trait]
pub trait QuickstartSource: Send + Sync {
    async fn stage(&self) -> Result<StagedQuickstart>;
}

/// Resolves configured locations: local paths as-is, http(s) URLs downloaded once.
pub struct ConfiguredSource {
    config: QuickstartConfig,
    client: Client,
}

impl ConfiguredSource {
    pub fn new(config: QuickstartConfig, connection_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(connection_timeout)
            .timeout(Duration::from_millis(config.download_timeout_ms))
            .build()
            .map_err(|e| AppError::network(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }

    async fn resolve(&self, location: Option<&str>) -> Result<Option<PathBuf>> {
        let Some(location) = location.map(str::trim).filter(|l| !l.is_empty()) else {
            return Ok(None);
        };
        if !is_remote(location) {
            return Ok(Some(PathBuf::from(location)));
        }

        let dest = self.config.download_dir.join(file_name_from_url(location)?);
        if dest.exists() {
            log::info!("Using previously downloaded {:?}", dest);
        } else {
            log::info!("Downloading {} to {:?}", location, dest);
            download_file(&self.client, location, &dest).await?;
        }
        Ok(Some(dest))
    }
}

#[async_trait]
impl QuickstartSource for ConfiguredSource {
    async fn stage(&self) -> Result<StagedQuickstart> {
        Ok(StagedQuickstart {
            jar: self.resolve(self.config.jar.as_deref()).await?,
            license: self.resolve(self.config.license.as_deref()).await?,
        })
    }
}

fn is_remote(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

/// Last path segment of a URL, ignoring query and fragment.
fn file_name_from_url(url: &str) -> Result<String> {
    let parsed =
        reqwest::Url::parse(url).map_err(|e| AppError::network_with_url(url, e.to_string()))?;
    parsed
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .ok_or_else(|| AppError::network_with_url(url, "URL does not name a file"))
}

/// Stream a download into `dest`, going through a `.part` file.
pub async fn download_file(client: &Client, url: &str, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }

    let resp = client
        .get(url)
        .header("User-Agent", USER_AGENT)
        .send()
        .await
        .map_err(|e| AppError::network_with_url(url, e.to_string()))?;
    if !resp.status().is_success() {
        return Err(AppError::network_with_url(url, resp.status().to_string()));
    }

    let partial = dest.with_extension("part");
    let mut file = fs::File::create(&partial)?;
    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| AppError::network_with_url(url, e.to_string()))?;
        file.write_all(&chunk)?;
    }
    drop(file);
    fs::rename(&partial, dest)?;
    Ok(())
}

/// A package or bundle file to deliver to instances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
}

impl Artifact {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Must be an existing `.zip` or `.jar` file.
    pub fn validate(&self) -> Result<()> {
        if !self.path.is_file() {
            return Err(AppError::config(format!(
                "Artifact not found: {}",
                self.path.display()
            )));
        }
        let extension = self
            .path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        if !ARTIFACT_EXTENSIONS.contains(&extension.as_str()) {
            return Err(AppError::config(format!(
                "Artifact {} is neither a package (.zip) nor a bundle (.jar)",
                self.path.display()
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

#[async_trait]
pub trait ArtifactDeployer: Send + Sync {
    fn validate(&self, artifact: &Artifact) -> Result<()> {
        artifact.validate()
    }

    async fn deploy(&self, artifact: &Artifact, instance: &Instance) -> Result<()>;
}

/// Drops artifacts into `crx-quickstart/install`, which the runtime picks up itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct InstallDirDeployer;

#[async_trait]
impl ArtifactDeployer for InstallDirDeployer {
    async fn deploy(&self, artifact: &Artifact, instance: &Instance) -> Result<()> {
        let local = LocalInstance::of(instance)?;
        if !local.created() {
            return Err(AppError::invalid_instance(
                local.name(),
                "instance is not created, run create first",
            ));
        }
        let install_dir = local.install_dir();
        fs::create_dir_all(&install_dir)?;
        let target = install_dir.join(artifact.file_name());
        fs::copy(&artifact.path, &target).map_err(|e| {
            AppError::io(format!(
                "Failed to copy {:?} to {:?}: {}",
                artifact.path, target, e
            ))
        })?;
        log::info!("Dropped {} into {:?}", artifact, install_dir);
        Ok(())
    }
}

/// Uploads and installs packages through the package manager service.
pub struct PackageManagerDeployer {
    client: Client,
}

impl PackageManagerDeployer {
    pub fn new(connection_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(connection_timeout)
            .timeout(PACKAGE_UPLOAD_TIMEOUT)
            .build()
            .map_err(|e| AppError::network(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

/// The service answers 200 even on failures; the body carries the verdict.
fn package_upload_succeeded(body: &str) -> bool {
    body.contains("<status code=\"200\">")
}

#[async_trait]
impl ArtifactDeployer for PackageManagerDeployer {
    async fn deploy(&self, artifact: &Artifact, instance: &Instance) -> Result<()> {
        let url = instance.url_for(PACKAGE_SERVICE_PATH);
        let bytes = tokio::fs::read(&artifact.path).await?;
        let form = Form::new()
            .text("force", "true")
            .text("install", "true")
            .part("file", Part::bytes(bytes).file_name(artifact.file_name()));

        log::info!("Uploading {} to '{}'", artifact, instance.name);
        let resp = self
            .client
            .post(&url)
            .header("User-Agent", USER_AGENT)
            .basic_auth(&instance.credentials.user, Some(&instance.credentials.password))
            .multipart(form)
            .send()
            .await
            .map_err(|e| AppError::network_with_url(&url, e.to_string()))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| AppError::network_with_url(&url, e.to_string()))?;
        if !status.is_success() || !package_upload_succeeded(&body) {
            return Err(AppError::network_with_url(
                &url,
                format!("Package {} was not installed ({})", artifact.file_name(), status),
            ));
        }
        Ok(())
    }
}

/// Local instances get the install-dir drop, remote ones the package manager.
pub struct FleetDeployer {
    local: InstallDirDeployer,
    remote: PackageManagerDeployer,
}

impl FleetDeployer {
    pub fn new(connection_timeout: Duration) -> Result<Self> {
        Ok(Self {
            local: InstallDirDeployer,
            remote: PackageManagerDeployer::new(connection_timeout)?,
        })
    }
}

#[async_trait]
impl ArtifactDeployer for FleetDeployer {
    async fn deploy(&self, artifact: &Artifact, instance: &Instance) -> Result<()> {
        if instance.is_local() {
            self.local.deploy(artifact, instance).await
        } else {
            self.remote.deploy(artifact, instance).await
        }
    }
}
