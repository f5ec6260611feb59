//! Best-effort image downloading
//!
//! Files are streamed to a temporary `.part` file and renamed on success, so a
//! failed transfer never leaves a truncated image behind. File names are derived
//! from a hash of the source URL, which makes repeated downloads of the same URL
//! overwrite rather than duplicate.

use crate::error::{PipelineError, Result};
use crate::services::ImageIOService;
use crate::tracing_config::spans;
use futures_util::stream::TryStreamExt;
#[cfg(feature = "cli")]
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::io::StreamReader;
use tracing::Instrument;

/// Extension used when the URL does not reveal one
const DEFAULT_EXTENSION: &str = "jpg";

/// Hex characters of the URL hash kept in file names
const NAME_HASH_LEN: usize = 16;

/// Image downloader shared by all categories of a run
#[derive(Debug)]
pub struct ImageDownloader {
    client: Client,
}

/// Outcome of downloading a list of URLs into one directory
#[derive(Debug, Clone, Default)]
pub struct DownloadSummary {
    /// Files written
    pub saved: Vec<PathBuf>,
    /// `(url, reason)` for every URL that could not be fetched
    pub failures: Vec<(String, String)>,
}

impl DownloadSummary {
    #[must_use]
    pub fn attempted(&self) -> usize {
        self.saved.len() + self.failures.len()
    }
}

/// Progress bar abstraction that works with and without CLI features
#[derive(Debug)]
pub enum ProgressIndicator {
    #[cfg(feature = "cli")]
    Indicatif(ProgressBar),
    NoOp,
}

impl ProgressIndicator {
    /// Bar over `len` steps labelled with `prefix`
    #[must_use]
    pub fn new_bar(len: u64, prefix: &str) -> Self {
        #[cfg(feature = "cli")]
        {
            let pb = ProgressBar::new(len);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} {prefix} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
            );
            pb.set_prefix(prefix.to_string());
            ProgressIndicator::Indicatif(pb)
        }
        #[cfg(not(feature = "cli"))]
        {
            let _ = (len, prefix);
            ProgressIndicator::NoOp
        }
    }

    /// Set message for progress indicator
    pub fn set_message(&self, msg: String) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_message(msg),
            Self::NoOp => {
                let _ = msg;
            },
        }
    }

    /// Advance by one step
    pub fn inc(&self) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.inc(1),
            Self::NoOp => {},
        }
    }

    /// Finish progress indicator with message
    pub fn finish_with_message(&self, msg: String) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.finish_with_message(msg),
            Self::NoOp => {
                let _ = msg;
            },
        }
    }
}

impl ImageDownloader {
    /// Create a new downloader
    ///
    /// # Errors
    /// - Failed to create HTTP client
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::network_error("Failed to create HTTP client", e))?;

        Ok(Self { client })
    }

    /// Download every URL into `dest`, tolerating individual failures
    ///
    /// # Errors
    /// - The destination directory cannot be created
    pub async fn download_images(
        &self,
        dest: &Path,
        urls: &[String],
        progress: Option<&ProgressIndicator>,
    ) -> Result<DownloadSummary> {
        fs::create_dir_all(dest)
            .map_err(|e| PipelineError::file_io_error("create directory", dest, &e))?;

        let mut summary = DownloadSummary::default();
        for url in urls {
            let local_path = dest.join(file_name_for_url(url));
            if let Some(pb) = progress {
                pb.set_message(format!("{} / {}", summary.attempted() + 1, urls.len()));
            }

            match self
                .download_file(url, &local_path)
                .instrument(spans::download(url, &local_path))
                .await
            {
                Ok(bytes) => {
                    log::debug!("Saved {} ({} bytes)", local_path.display(), bytes);
                    summary.saved.push(local_path);
                },
                Err(e) => {
                    log::debug!("Skipping {}: {}", url, e);
                    summary.failures.push((url.clone(), e.to_string()));
                },
            }
        }

        Ok(summary)
    }

    /// Download a single URL to `local_path`, returning the number of bytes written
    ///
    /// # Errors
    /// - Network errors or a non-success HTTP status
    /// - File system errors while writing
    pub async fn download_file(&self, url: &str, local_path: &Path) -> Result<u64> {
        log::debug!("Downloading: {} -> {}", url, local_path.display());

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PipelineError::network_error(format!("Failed to download {}", url), e))?;

        if !response.status().is_success() {
            return Err(PipelineError::network_error(
                format!("HTTP error for {}", url),
                response.status(),
            ));
        }

        let part_path = part_path_for(local_path);
        let mut file = tokio::fs::File::create(&part_path)
            .await
            .map_err(|e| PipelineError::file_io_error("create file", &part_path, &e))?;

        let mut stream = StreamReader::new(
            response
                .bytes_stream()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
        );

        let copied = tokio::io::copy(&mut stream, &mut file).await;
        let downloaded = match copied {
            Ok(bytes) => bytes,
            Err(e) => {
                drop(file);
                remove_partial(&part_path);
                return Err(PipelineError::network_error(
                    format!("Failed to read download stream for {}", url),
                    e,
                ));
            },
        };

        let flushed = file.flush().await;
        drop(file);
        if let Err(e) = flushed {
            remove_partial(&part_path);
            return Err(PipelineError::file_io_error("flush file", &part_path, &e));
        }

        if downloaded == 0 {
            remove_partial(&part_path);
            return Err(PipelineError::network_error(
                format!("Empty response body for {}", url),
                "0 bytes",
            ));
        }

        if let Err(e) = fs::rename(&part_path, local_path) {
            remove_partial(&part_path);
            return Err(PipelineError::file_io_error("move download into place", local_path, &e));
        }

        Ok(downloaded)
    }
}

fn part_path_for(local_path: &Path) -> PathBuf {
    let mut name = local_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    local_path.with_file_name(name)
}

fn remove_partial(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        log::warn!("Failed to remove partial download {}: {}", path.display(), e);
    }
}

/// Stable file name for a URL: hash prefix plus the URL's image extension
#[must_use]
pub fn file_name_for_url(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    let stem = digest.get(..NAME_HASH_LEN).unwrap_or(&digest);
    let extension = url_extension(url).unwrap_or_else(|| DEFAULT_EXTENSION.to_string());
    format!("{}.{}", stem, extension)
}

/// Image extension of the URL path, ignoring query and fragment
fn url_extension(url: &str) -> Option<String> {
    let without_fragment = url.split('#').next().unwrap_or(url);
    let path = without_fragment.split('?').next().unwrap_or(without_fragment);
    let last_segment = path.rsplit('/').next()?;
    let (_, extension) = last_segment.rsplit_once('.')?;
    let extension = extension.to_lowercase();

    if ImageIOService::is_supported_extension(&extension) {
        Some(extension)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_name_for_url_is_stable() {
        let a = file_name_for_url("https://example.com/birds/robin.JPG?size=large");
        let b = file_name_for_url("https://example.com/birds/robin.JPG?size=large");
        assert_eq!(a, b);
        assert!(a.ends_with(".jpg"));
        assert_eq!(a.len(), NAME_HASH_LEN + ".jpg".len());

        let c = file_name_for_url("https://example.com/birds/robin.JPG?size=small");
        assert_ne!(a, c);
    }

    #[test]
    fn test_url_extension() {
        assert_eq!(url_extension("https://x/a.png").as_deref(), Some("png"));
        assert_eq!(url_extension("https://x/a.webp#frag").as_deref(), Some("webp"));
        assert_eq!(url_extension("https://x/image?id=3.jpg").as_deref(), None);
        assert_eq!(url_extension("https://x/page.html"), None);
        assert_eq!(url_extension("https://x/noext"), None);
        assert!(file_name_for_url("https://x/noext").ends_with(".jpg"));
    }

    #[test]
    fn test_part_path() {
        let path = Path::new("/data/bird/abc.jpg");
        assert_eq!(part_path_for(path), PathBuf::from("/data/bird/abc.jpg.part"));
    }

    #[tokio::test]
    async fn test_failed_downloads_are_collected() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("bird");
        let downloader = ImageDownloader::new(Duration::from_secs(2)).unwrap();

        // Port 9 on localhost is not expected to serve HTTP
        let urls = vec![
            "http://127.0.0.1:9/a.jpg".to_string(),
            "not a url".to_string(),
        ];
        let summary = downloader.download_images(&dest, &urls, None).await.unwrap();

        assert!(dest.is_dir());
        assert!(summary.saved.is_empty());
        assert_eq!(summary.failures.len(), 2);
        assert_eq!(summary.attempted(), 2);
        assert_eq!(fs::read_dir(&dest).unwrap().count(), 0);
    }

    /// Answer the first connection with a fixed body
    async fn serve_once(body: &'static [u8]) -> String {
        use tokio::io::AsyncReadExt;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = stream.read(&mut request).await;
            let header = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: image/png\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            stream.write_all(header.as_bytes()).await.unwrap();
            stream.write_all(body).await.unwrap();
            stream.shutdown().await.unwrap();
        });
        format!("http://{}/robin.png", addr)
    }

    #[tokio::test]
    async fn test_failed_rename_removes_part_file() {
        let temp_dir = TempDir::new().unwrap();
        // A non-empty directory at the destination makes the final rename fail
        let local_path = temp_dir.path().join("robin.png");
        fs::create_dir_all(local_path.join("occupied")).unwrap();

        let url = serve_once(b"not really a png").await;
        let downloader = ImageDownloader::new(Duration::from_secs(5)).unwrap();
        let err = downloader.download_file(&url, &local_path).await.unwrap_err();

        assert!(err.to_string().contains("move download into place"));
        assert!(!part_path_for(&local_path).exists());
        assert!(local_path.join("occupied").is_dir());
    }

    #[tokio::test]
    async fn test_download_file_writes_body() {
        let temp_dir = TempDir::new().unwrap();
        let local_path = temp_dir.path().join("robin.png");

        let url = serve_once(b"twelve bytes").await;
        let downloader = ImageDownloader::new(Duration::from_secs(5)).unwrap();
        let written = downloader.download_file(&url, &local_path).await.unwrap();

        assert_eq!(written, 12);
        assert_eq!(fs::read(&local_path).unwrap(), b"twelve bytes");
        assert!(!part_path_for(&local_path).exists());
    }

    #[test]
    fn test_progress_indicator_no_op() {
        let progress = ProgressIndicator::NoOp;
        progress.set_message("test message".to_string());
        progress.inc();
        progress.finish_with_message("finished".to_string());
    }

    #[cfg(feature = "cli")]
    #[test]
    fn test_progress_indicator_with_indicatif() {
        let progress = ProgressIndicator::new_bar(2, "Downloading images");
        progress.set_message("forest".to_string());
        progress.inc();
        progress.inc();
        progress.finish_with_message("done".to_string());
    }
}
