use std::time::Duration;

use futures_util::StreamExt;
use futures_util::future::join_all;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use reqwest::Method;
use tokio::time::{Instant, timeout, timeout_at};

use super::{Fetcher, PROBE_TIMEOUT, folder_url, join_url};
use crate::error::{Result, UpdateError};

/// Bytes read from the probe file before the measurement stops.
const PROBE_WINDOW: u64 = 1024 * 1024;

pub struct MirrorSelector<'a> {
    fetcher: &'a Fetcher,
    probe_file: String,
    show_spinner: bool,
    /// How long the body may take to fill the probe window.
    window_timeout: Duration,
}

impl<'a> MirrorSelector<'a> {
    pub fn new(fetcher: &'a Fetcher, probe_file: impl Into<String>) -> Self {
        Self {
            fetcher,
            probe_file: probe_file.into(),
            show_spinner: fetcher.show_progress,
            window_timeout: PROBE_TIMEOUT,
        }
    }

    #[cfg(test)]
    fn with_window_timeout(mut self, timeout: Duration) -> Self {
        self.window_timeout = timeout;
        self
    }

    /// Measure every candidate concurrently and return the fastest.
    ///
    /// Ties go to the candidate listed first.
    pub async fn pick_fastest(&self, candidates: &[String]) -> Result<String> {
        let spinner = self.spinner();
        let probes = candidates.iter().map(|base| self.probe_speed(base));
        let scores = join_all(probes).await;
        spinner.finish_and_clear();

        for (base, speed) in candidates.iter().zip(&scores) {
            info!("{base} speed: {speed:5.1} MB/s");
        }
        match best_candidate(candidates, &scores) {
            Some(base) => {
                info!("Fastest mirror: {base}");
                Ok(folder_url(base))
            }
            None => {
                warn!("No mirrors responded successfully.");
                Err(UpdateError::NoReachableMirror)
            }
        }
    }

    /// Return the first candidate whose index page answers.
    pub async fn pick_first_reachable(&self, candidates: &[String]) -> Result<String> {
        for base in candidates {
            let base = folder_url(base);
            info!("Testing server: {base}");
            match self.fetcher.fetch_text(&base, PROBE_TIMEOUT).await {
                Ok(_) => {
                    info!("Server available: {base}");
                    return Ok(base);
                }
                Err(err) => warn!("Server failed: {base} ({err})"),
            }
        }
        warn!("All servers failed.");
        Err(UpdateError::NoReachableMirror)
    }

    /// Approximate throughput in MiB/s over the first megabyte.
    ///
    /// Zero when the mirror does not answer in time or with success. A body
    /// still arriving when the window closes is scored on what arrived.
    async fn probe_speed(&self, base: &str) -> f64 {
        let url = match join_url(&folder_url(base), &self.probe_file) {
            Ok(url) => url,
            Err(err) => {
                warn!("mirror probe: {err}");
                return 0.0;
            }
        };
        let request = self.fetcher.request(Method::GET, &url).send();
        let response = match timeout(PROBE_TIMEOUT, request).await {
            Ok(Ok(resp)) => resp.error_for_status(),
            Ok(Err(err)) => Err(err),
            Err(_) => {
                debug!("mirror probe: {url} did not answer within {PROBE_TIMEOUT:?}");
                return 0.0;
            }
        };
        let response = match response {
            Ok(resp) => resp,
            Err(err) => {
                debug!("mirror probe: {url} failed: {err}");
                return 0.0;
            }
        };

        let started = Instant::now();
        let deadline = started + self.window_timeout;
        let mut received: u64 = 0;
        let mut stream = response.bytes_stream();
        while received < PROBE_WINDOW {
            match timeout_at(deadline, stream.next()).await {
                Ok(Some(Ok(chunk))) => received += chunk.len() as u64,
                Ok(Some(Err(err))) => {
                    debug!("mirror probe: {url} stream error: {err}");
                    return 0.0;
                }
                Ok(None) => break,
                Err(_) => {
                    debug!("mirror probe: {url} window closed after {received} bytes");
                    break;
                }
            }
        }
        let elapsed = started.elapsed().as_secs_f64();
        debug!("mirror probe: {url} received {received} bytes in {elapsed:.3}s");
        throughput(received, elapsed)
    }

    fn spinner(&self) -> ProgressBar {
        if !self.show_spinner {
            return ProgressBar::hidden();
        }
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{msg} {spinner}") {
            spinner.set_style(style.tick_chars("|/-\\ "));
        }
        spinner.set_message("Testing mirrors speed...");
        spinner.enable_steady_tick(Duration::from_millis(100));
        spinner
    }
}

fn throughput(bytes: u64, elapsed_secs: f64) -> f64 {
    if elapsed_secs > 0.0 {
        bytes as f64 / (elapsed_secs * 1024.0 * 1024.0)
    } else {
        0.0
    }
}

/// Highest positive score; earlier candidates win ties.
fn best_candidate<'c>(candidates: &'c [String], scores: &[f64]) -> Option<&'c str> {
    let mut best: Option<(usize, f64)> = None;
    for (idx, &score) in scores.iter().enumerate() {
        if score <= 0.0 {
            continue;
        }
        if best.is_none_or(|(_, top)| score > top) {
            best = Some((idx, score));
        }
    }
    best.and_then(|(idx, _)| candidates.get(idx).map(String::as_str))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use crate::networking::{RetryPolicy, TransportPolicy};
    use mockito::Server;

    fn fetcher() -> Fetcher {
        Fetcher::new(None, TransportPolicy::default(), RetryPolicy::default()).quiet()
    }

    fn candidates(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn ties_go_to_first_candidate() {
        let list = candidates(&["a", "b", "c"]);
        assert_eq!(best_candidate(&list, &[1.0, 3.0, 3.0]), Some("b"));
        assert_eq!(best_candidate(&list, &[0.0, 0.0, 0.5]), Some("c"));
        assert_eq!(best_candidate(&list, &[0.0, 0.0, 0.0]), None);
    }

    #[test]
    fn throughput_handles_zero_elapsed() {
        assert_eq!(throughput(1024, 0.0), 0.0);
        assert_eq!(throughput(2 * 1024 * 1024, 2.0), 1.0);
    }

    #[tokio::test]
    async fn surviving_mirror_is_chosen() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/speed.test")
            .with_status(200)
            .with_body(vec![7u8; 256 * 1024])
            .create_async()
            .await;
        server
            .mock("GET", "/")
            .with_status(200)
            .with_body("<html></html>")
            .create_async()
            .await;
        let good = format!("{}/", server.url());
        let list = vec![
            "http://127.0.0.1:1/".to_string(),
            good.clone(),
            "http://127.0.0.1:2/".to_string(),
        ];

        let f = fetcher();
        let selector = MirrorSelector::new(&f, "speed.test");
        assert_eq!(selector.pick_fastest(&list).await.unwrap(), good);
        assert_eq!(selector.pick_first_reachable(&list).await.unwrap(), good);
    }

    #[tokio::test]
    async fn slow_mirror_is_scored_on_partial_window() {
        let mut server = Server::new_async().await;
        let _probe = server
            .mock("GET", "/speed.test")
            .with_status(200)
            .with_chunked_body(|w| {
                for _ in 0..8 {
                    w.write_all(&[7u8; 64 * 1024])?;
                    w.flush()?;
                    std::thread::sleep(Duration::from_millis(250));
                }
                Ok(())
            })
            .create_async()
            .await;
        let slow = format!("{}/", server.url());

        let f = fetcher();
        let selector =
            MirrorSelector::new(&f, "speed.test").with_window_timeout(Duration::from_millis(600));
        assert!(selector.probe_speed(&slow).await > 0.0);
        assert_eq!(
            selector.pick_fastest(&candidates(&[slow.as_str()])).await.unwrap(),
            slow
        );
    }

    #[tokio::test]
    async fn no_reachable_mirror() {
        let f = fetcher();
        let selector = MirrorSelector::new(&f, "speed.test");
        let list = candidates(&["http://127.0.0.1:1/", "http://127.0.0.1:2"]);
        assert!(matches!(
            selector.pick_fastest(&list).await,
            Err(UpdateError::NoReachableMirror)
        ));
        assert!(matches!(
            selector.pick_first_reachable(&list).await,
            Err(UpdateError::NoReachableMirror)
        ));
    }
}
