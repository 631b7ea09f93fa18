//! Remote data sources of dataset pipelines.
//!
//! A [`DataSource`] is either a single file saved as-is or a zip archive that
//! is downloaded and extracted into a directory. Fetching reuses whatever is
//! already on disk when the caller asks for the cache.

mod archive;

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Client;
use tracing::{debug, info, instrument};
use url::Url;

use tractscore_shared::{Result, SourceConfig, SourceKind, TractScoreError};

pub use archive::extract_zip;

/// User-Agent string for download requests.
const USER_AGENT: &str = concat!("tractscore/", env!("CARGO_PKG_VERSION"));

/// Maximum number of redirects to follow for one download.
const MAX_REDIRECTS: usize = 10;

/// Default timeout in seconds for one download.
const DEFAULT_TIMEOUT_SECS: u64 = 300;

// ---------------------------------------------------------------------------
// DataSource
// ---------------------------------------------------------------------------

/// One remote input of a pipeline unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataSource {
    /// Download `url` to the file `destination`.
    File { url: Url, destination: PathBuf },
    /// Download the archive at `url` and extract it into the directory `destination`.
    Zip { url: Url, destination: PathBuf },
}

/// What [`DataSource::fetch`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The destination already existed and the cache was allowed.
    Cached,
    /// The source was downloaded; `bytes` is the response body size.
    Downloaded { bytes: u64 },
}

impl DataSource {
    pub fn file(url: Url, destination: impl Into<PathBuf>) -> Self {
        Self::File {
            url,
            destination: destination.into(),
        }
    }

    pub fn zip(url: Url, destination: impl Into<PathBuf>) -> Self {
        Self::Zip {
            url,
            destination: destination.into(),
        }
    }

    /// Build a source from a `[[datasets]]` entry, resolving its destination under `data_dir`.
    pub fn from_config(config: &SourceConfig, data_dir: &Path) -> Self {
        let destination = data_dir.join(&config.destination);
        match config.kind {
            SourceKind::File => Self::file(config.url.clone(), destination),
            SourceKind::Zip => Self::zip(config.url.clone(), destination),
        }
    }

    pub fn url(&self) -> &Url {
        match self {
            Self::File { url, .. } | Self::Zip { url, .. } => url,
        }
    }

    pub fn destination(&self) -> &Path {
        match self {
            Self::File { destination, .. } | Self::Zip { destination, .. } => destination,
        }
    }

    pub fn kind(&self) -> SourceKind {
        match self {
            Self::File { .. } => SourceKind::File,
            Self::Zip { .. } => SourceKind::Zip,
        }
    }

    /// Whether the destination is already on disk.
    pub fn is_cached(&self) -> bool {
        self.destination().exists()
    }

    /// Download the source, or reuse the destination when `use_cache` is set and it exists.
    #[instrument(skip_all, fields(url = %self.url(), destination = %self.destination().display()))]
    pub async fn fetch(&self, client: &Client, use_cache: bool) -> Result<FetchOutcome> {
        if use_cache && self.is_cached() {
            debug!("using cached source");
            return Ok(FetchOutcome::Cached);
        }

        let body = download(client, self.url()).await?;
        let bytes = body.len() as u64;

        match self {
            Self::File { destination, .. } => write_file(destination, &body)?,
            Self::Zip { destination, .. } => {
                if destination.exists() {
                    std::fs::remove_dir_all(destination)
                        .map_err(|e| TractScoreError::io(destination, e))?;
                }
                extract_zip(&body, destination)?;
            }
        }

        info!(bytes, "downloaded source");
        Ok(FetchOutcome::Downloaded { bytes })
    }

    /// Remove the destination. Missing destinations are not an error.
    pub fn clear_cache(&self) -> Result<()> {
        let destination = self.destination();
        let removed = if destination.is_dir() {
            std::fs::remove_dir_all(destination)
        } else if destination.exists() {
            std::fs::remove_file(destination)
        } else {
            return Ok(());
        };
        removed.map_err(|e| TractScoreError::io(destination, e))?;
        debug!(destination = %destination.display(), "cleared cached source");
        Ok(())
    }
}

impl std::fmt::Display for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.kind() {
            SourceKind::File => "file",
            SourceKind::Zip => "zip",
        };
        write!(f, "{kind} {} -> {}", self.url(), self.destination().display())
    }
}

// ---------------------------------------------------------------------------
// Fetching
// ---------------------------------------------------------------------------

/// HTTP settings for downloads.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Timeout for one download in seconds.
    pub timeout_secs: u64,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

/// Build a reqwest client with download settings.
pub fn build_client(opts: &FetchOptions) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .timeout(Duration::from_secs(opts.timeout_secs))
        .build()
        .map_err(|e| TractScoreError::Network(format!("failed to build HTTP client: {e}")))
}

/// Fetch every source in order.
pub async fn fetch_all(
    sources: &[DataSource],
    use_cache: bool,
    opts: &FetchOptions,
) -> Result<Vec<FetchOutcome>> {
    let client = build_client(opts)?;
    let mut outcomes = Vec::with_capacity(sources.len());
    for source in sources {
        outcomes.push(source.fetch(&client, use_cache).await?);
    }
    Ok(outcomes)
}

/// Blocking form of [`fetch_all`] for synchronous pipeline units.
///
/// Must not be called from an async task. Inside a runtime it has to run on a
/// blocking-pool thread; outside one it drives a private current-thread runtime.
/// Sources that are already cached never touch the network or a runtime.
pub fn fetch_all_blocking(
    sources: &[DataSource],
    use_cache: bool,
    opts: &FetchOptions,
) -> Result<Vec<FetchOutcome>> {
    if use_cache && sources.iter().all(DataSource::is_cached) {
        debug!(sources = sources.len(), "all sources cached");
        return Ok(vec![FetchOutcome::Cached; sources.len()]);
    }

    match tokio::runtime::Handle::try_current() {
        Ok(handle) => handle.block_on(fetch_all(sources, use_cache, opts)),
        Err(_) => tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| TractScoreError::Network(format!("failed to start runtime: {e}")))?
            .block_on(fetch_all(sources, use_cache, opts)),
    }
}

/// GET `url` and return the body of a successful response.
async fn download(client: &Client, url: &Url) -> Result<Vec<u8>> {
    let response = client
        .get(url.clone())
        .send()
        .await
        .map_err(|e| TractScoreError::Network(format!("{url}: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(TractScoreError::Network(format!("{url}: HTTP {status}")));
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| TractScoreError::Network(format!("{url}: failed to read body: {e}")))?;
    Ok(body.to_vec())
}

/// Write `bytes` to `path` through a sibling temp file and a rename.
fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| TractScoreError::io(parent, e))?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".part");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, bytes).map_err(|e| TractScoreError::io(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| TractScoreError::io(path, e))?;
    Ok(())
}
