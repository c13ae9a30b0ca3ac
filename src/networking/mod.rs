use std::fs;
use std::io::Read;
use std::path::Path;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, error, info, warn};
use md5::{Digest, Md5};
use reqwest::{Client, Method, RequestBuilder, Url};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::engine::models::DownloadRecord;
use crate::error::{Result, UpdateError};
use crate::index::decode_name;
use crate::prompt::OperatorPrompt;
use crate::util::{format_size, format_speed, progress_percent};

pub mod mirror;

pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
pub const TEXT_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const READ_TIMEOUT: Duration = Duration::from_secs(60);
const CHECKSUM_SUFFIX: &str = ".md5";
const USER_AGENT: &str = concat!("triquetra/", env!("CARGO_PKG_VERSION"));

/// HTTP Basic credentials for the index server.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

/// URL rewriting applied to every request the fetcher makes.
#[derive(Clone, Copy, Debug, Default)]
pub struct TransportPolicy {
    /// Fetch `https://` resources over plain `http://`.
    pub downgrade_https: bool,
}

impl TransportPolicy {
    pub fn rewrite(&self, url: &str) -> String {
        match url.strip_prefix("https://") {
            Some(rest) if self.downgrade_https => format!("http://{rest}"),
            _ => url.to_owned(),
        }
    }
}

/// Bounded retry of failed transfers. Whether to retry at all is up to the operator.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(3),
        }
    }
}

#[derive(Clone)]
pub struct Fetcher {
    client: Client,
    credentials: Option<Credentials>,
    transport: TransportPolicy,
    retry: RetryPolicy,
    show_progress: bool,
}

impl Fetcher {
    pub fn new(
        credentials: Option<Credentials>,
        transport: TransportPolicy,
        retry: RetryPolicy,
    ) -> Self {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(CONNECT_TIMEOUT)
            .read_timeout(READ_TIMEOUT)
            .build()
            .unwrap_or_else(|err| {
                warn!("fetcher: falling back to default HTTP client configuration ({err})");
                Client::new()
            });
        Self {
            client,
            credentials,
            transport,
            retry,
            show_progress: true,
        }
    }

    /// Disable progress bars (tests, non-interactive output).
    pub fn quiet(mut self) -> Self {
        self.show_progress = false;
        self
    }

    pub(crate) fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let url = self.transport.rewrite(url);
        let builder = self.client.request(method, url);
        match &self.credentials {
            Some(creds) => builder.basic_auth(&creds.user, Some(&creds.password)),
            None => builder,
        }
    }

    /// HEAD probe. Transport errors and non-success statuses both mean "absent".
    pub async fn exists(&self, url: &str, timeout: Duration) -> bool {
        match self.request(Method::HEAD, url).timeout(timeout).send().await {
            Ok(resp) => {
                debug!("exists: {url} -> {}", resp.status());
                resp.status().is_success()
            }
            Err(err) => {
                debug!("exists: {url} failed: {err}");
                false
            }
        }
    }

    pub async fn fetch_text(&self, url: &str, timeout: Duration) -> Result<String> {
        let resp = self
            .request(Method::GET, url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| UpdateError::Fetch(format!("GET {url} failed: {e}")))?
            .error_for_status()
            .map_err(|e| UpdateError::Fetch(format!("GET {url} status error: {e}")))?;
        resp.text()
            .await
            .map_err(|e| UpdateError::Fetch(format!("GET {url} body error: {e}")))
    }

    /// Expected digest of `artifact_url`, read from its `.md5` sidecar.
    pub async fn fetch_checksum(&self, artifact_url: &str) -> Result<String> {
        let url = format!("{artifact_url}{CHECKSUM_SUFFIX}");
        let body = self.fetch_text(&url, TEXT_TIMEOUT).await?;
        parse_checksum(&body)
            .ok_or_else(|| UpdateError::Parse(format!("empty checksum file at {url}")))
    }

    /// Download `url` into `dest_dir`, reusing a local copy whose digest matches.
    ///
    /// Failed transfers are retried from scratch while the operator agrees and
    /// the retry budget lasts.
    pub async fn download(
        &self,
        url: &str,
        dest_dir: &Path,
        prompt: &dyn OperatorPrompt,
    ) -> Result<DownloadRecord> {
        let name = file_name_from_url(url)?;
        let dest = dest_dir.join(&name);
        tokio::fs::create_dir_all(dest_dir).await?;

        let mut attempt = 1;
        loop {
            match self.download_once(url, &dest, &name).await {
                Ok(record) => return Ok(record),
                Err(err) => {
                    error!("Download of {name} failed: {err}");
                    if !prompt.confirm(&format!("Download failed for {name}. Retry?")) {
                        warn!("User chose not to retry {name}. Aborting download.");
                        return Err(err);
                    }
                    if attempt >= self.retry.max_attempts {
                        error!("Maximum retries reached for {name}. Aborting.");
                        return Err(UpdateError::Fetch(format!(
                            "maximum retries reached for {name}: {err}"
                        )));
                    }
                    attempt += 1;
                    info!(
                        "Retrying download of {name} (attempt {attempt}/{})...",
                        self.retry.max_attempts
                    );
                    tokio::time::sleep(self.retry.delay).await;
                }
            }
        }
    }

    async fn download_once(&self, url: &str, dest: &Path, name: &str) -> Result<DownloadRecord> {
        if dest.exists() {
            match self.verify_local(url, dest).await {
                Ok(Some(checksum)) => {
                    info!("{name} already exists and hash matches.");
                    return Ok(DownloadRecord {
                        path: dest.to_path_buf(),
                        checksum: Some(checksum),
                        transferred: false,
                    });
                }
                Ok(None) => info!("{name} exists but hash differs, will redownload."),
                Err(err) => info!("Could not verify hash for {name} ({err}), will redownload."),
            }
        }

        info!("Downloading {name}...");
        let actual = self.transfer(url, dest, name).await?;
        let checksum = match self.fetch_checksum(url).await {
            Ok(expected) if expected != actual => {
                return Err(UpdateError::Fetch(format!(
                    "checksum mismatch for {name}: expected {expected}, got {actual}"
                )));
            }
            Ok(expected) => Some(expected),
            Err(err) => {
                warn!("No checksum published for {name} ({err}); keeping unverified file");
                None
            }
        };
        info!("Finished downloading {name}");
        Ok(DownloadRecord {
            path: dest.to_path_buf(),
            checksum,
            transferred: true,
        })
    }

    /// `Some(digest)` when the local file matches the published digest.
    async fn verify_local(&self, url: &str, dest: &Path) -> Result<Option<String>> {
        let expected = self.fetch_checksum(url).await?;
        let actual = file_md5(dest)?;
        debug!("verify: {} local={actual} remote={expected}", dest.display());
        Ok((actual == expected).then_some(expected))
    }

    /// Stream `url` to `dest`, returning the MD5 of the written bytes.
    async fn transfer(&self, url: &str, dest: &Path, name: &str) -> Result<String> {
        let response = self
            .request(Method::GET, url)
            .send()
            .await
            .map_err(|e| UpdateError::Fetch(format!("download request failed: {e}")))?
            .error_for_status()
            .map_err(|e| UpdateError::Fetch(format!("download status error: {e}")))?;

        let mut file = File::create(dest).await?;
        let total = response.content_length();
        let bar = self.progress_bar(name, total);
        let mut stream = response.bytes_stream();
        let mut hasher = Md5::new();
        let mut downloaded: u64 = 0;
        let mut last_tick = Instant::now();
        let mut last_bytes = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    bar.finish_and_clear();
                    return Err(UpdateError::Fetch(format!("stream error: {e}")));
                }
            };
            if let Err(e) = file.write_all(&chunk).await {
                bar.finish_and_clear();
                return Err(e.into());
            }
            hasher.update(&chunk);
            downloaded += chunk.len() as u64;
            bar.set_position(downloaded);

            let elapsed = last_tick.elapsed().as_secs_f32();
            if elapsed > 1.0 {
                let speed = (downloaded - last_bytes) as f32 / elapsed;
                debug!(
                    "download: {name} {:.1}% {}/{} {}",
                    progress_percent(downloaded, total),
                    format_size(downloaded),
                    total.map(format_size).unwrap_or_else(|| "?".into()),
                    format_speed(speed)
                );
                last_tick = Instant::now();
                last_bytes = downloaded;
            }
        }
        bar.finish_and_clear();
        file.flush().await?;

        if let Some(total) = total
            && downloaded < total
        {
            return Err(UpdateError::Fetch(format!(
                "download incomplete: received {downloaded} of {total} bytes"
            )));
        }

        Ok(format!("{:x}", hasher.finalize()))
    }

    fn progress_bar(&self, name: &str, total: Option<u64>) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let (bar, template) = match total {
            Some(len) => (
                ProgressBar::new(len),
                "Downloading {msg} {spinner} {percent:>3}% {bytes}/{total_bytes} {binary_bytes_per_sec}",
            ),
            None => (
                ProgressBar::new_spinner(),
                "Downloading {msg} {spinner} {bytes} {binary_bytes_per_sec}",
            ),
        };
        let style = ProgressStyle::with_template(template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .tick_chars("|/-\\ ");
        bar.set_style(style);
        bar.set_message(name.to_owned());
        bar.enable_steady_tick(Duration::from_millis(100));
        bar
    }
}

/// Resolve `relative` against `base`, which should end with `/` for folders.
pub fn join_url(base: &str, relative: &str) -> Result<String> {
    let base = Url::parse(base).map_err(|e| UpdateError::Parse(format!("bad URL {base}: {e}")))?;
    base.join(relative)
        .map(String::from)
        .map_err(|e| UpdateError::Parse(format!("cannot join {relative} onto {base}: {e}")))
}

/// Append a trailing `/` so the URL names a folder.
pub fn folder_url(base: &str) -> String {
    format!("{}/", base.trim_end_matches('/'))
}

/// Decoded last path segment of `url`.
pub fn file_name_from_url(url: &str) -> Result<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let name = decode_name(path.rsplit('/').next().unwrap_or_default());
    if name.is_empty() {
        return Err(UpdateError::Parse(format!("no file name in URL {url}")));
    }
    Ok(name)
}

/// First whitespace-delimited token, lower-cased.
pub fn parse_checksum(body: &str) -> Option<String> {
    body.split_whitespace().next().map(str::to_ascii_lowercase)
}

pub fn file_md5(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Md5::new();
    let mut buf = [0u8; 8192];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

pub fn md5_hex(data: &[u8]) -> String {
    format!("{:x}", Md5::digest(data))
}
