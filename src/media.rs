use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use crossbeam_channel::{unbounded, Receiver, Sender};
use reqwest::blocking::Client;

use crate::player::debug_log;
use crate::storage::{self, MediaDimensions};

/// Cards never grow past this many layout units regardless of how tall the
/// source image is; keeps scroll geometry stable.
pub const MAX_MEDIA_HEIGHT: f64 = 400.0;

/// 16:9, used until a probe lands or when one fails.
pub const DEFAULT_ASPECT_RATIO: f64 = 0.5625;

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("probe: url required")]
    EmptyUrl,
    #[error("probe: download failed: {0}")]
    Download(String),
    #[error("probe: not an image ({0})")]
    NotAnImage(String),
    #[error("probe: decode failed: {0}")]
    Decode(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub default_ttl: Duration,
    pub workers: usize,
    pub user_agent: String,
    pub http_client: Option<Client>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(6 * 60 * 60),
            workers: 2,
            user_agent: String::new(),
            http_client: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Request {
    pub item_id: i64,
    pub url: String,
    pub container_width: f64,
    pub force: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbedSize {
    pub natural_width: u32,
    pub natural_height: u32,
    pub display_height: f64,
}

#[derive(Debug)]
pub struct Probe {
    pub item_id: i64,
    pub url: String,
    pub outcome: Result<ProbedSize, ProbeError>,
}

/// `container_width * natural_h / natural_w`, clamped to the layout maximum.
pub fn aspect_height(container_width: f64, natural_width: u32, natural_height: u32) -> f64 {
    if natural_width == 0 || natural_height == 0 {
        return fallback_height(container_width);
    }
    let height = container_width * natural_height as f64 / natural_width as f64;
    height.min(MAX_MEDIA_HEIGHT)
}

pub fn fallback_height(container_width: f64) -> f64 {
    (container_width * DEFAULT_ASPECT_RATIO).min(MAX_MEDIA_HEIGHT)
}

struct Job {
    request: Request,
    tx: Sender<Probe>,
}

struct Inner {
    store: Arc<storage::Store>,
    cfg: Config,
    client: Client,
    jobs: Sender<Job>,
    stop: Sender<()>,
}

/// Natural-size probe pool. Downloads each image attachment once, reads its
/// dimensions without a full decode, and caches them in the store so a feed
/// refresh does not re-fetch. Results come back on the per-request channel;
/// the UI drops anything whose item id has left the feed.
pub struct Manager {
    inner: Arc<Inner>,
    handles: Vec<thread::JoinHandle<()>>,
}

#[derive(Clone)]
pub struct Handle {
    inner: Arc<Inner>,
}

impl Handle {
    pub fn enqueue(&self, request: Request) -> Receiver<Probe> {
        let (tx, rx) = unbounded();
        let job = Job { request, tx };
        let _ = self.inner.jobs.send(job);
        rx
    }
}

impl Manager {
    pub fn new(store: Arc<storage::Store>, cfg: Config) -> Result<Self> {
        let mut cfg = cfg;
        if cfg.workers == 0 {
            cfg.workers = 2;
        }

        let client = if let Some(client) = cfg.http_client.clone() {
            client
        } else {
            Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .context("probe: build http client")?
        };

        let (job_tx, job_rx) = unbounded();
        let (stop_tx, stop_rx) = unbounded();

        let inner = Arc::new(Inner {
            store,
            cfg,
            client,
            jobs: job_tx,
            stop: stop_tx,
        });

        if let Err(err) = inner.store.delete_expired_media(Utc::now()) {
            debug_log(format!("probe: prune expired dimensions: {err}"));
        }

        let mut handles = Vec::new();
        for _ in 0..inner.cfg.workers {
            let rx_jobs = job_rx.clone();
            let rx_stop = stop_rx.clone();
            let worker_inner = inner.clone();
            handles.push(thread::spawn(move || worker_inner.worker(rx_jobs, rx_stop)));
        }

        Ok(Self { inner, handles })
    }

    pub fn handle(&self) -> Handle {
        Handle {
            inner: self.inner.clone(),
        }
    }

    fn shutdown(&mut self) {
        for _ in &self.handles {
            let _ = self.inner.stop.send(());
        }
        while let Some(handle) = self.handles.pop() {
            let _ = handle.join();
        }
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Inner {
    fn worker(&self, jobs: Receiver<Job>, stop: Receiver<()>) {
        loop {
            crossbeam_channel::select! {
                recv(stop) -> _ => break,
                recv(jobs) -> msg => {
                    match msg {
                        Ok(job) => self.process(job),
                        Err(_) => break,
                    }
                }
            }
        }
    }

    fn process(&self, job: Job) {
        let item_id = job.request.item_id;
        let url = job.request.url.clone();
        let outcome = self.measure(job.request);
        if let Err(err) = &outcome {
            debug_log(format!("probe failed for item {item_id} ({url}): {err}"));
        }
        let _ = job.tx.send(Probe {
            item_id,
            url,
            outcome,
        });
    }

    fn measure(&self, request: Request) -> Result<ProbedSize, ProbeError> {
        if request.url.trim().is_empty() {
            return Err(ProbeError::EmptyUrl);
        }

        if !request.force {
            if let Ok(Some(entry)) = self.store.get_media_dimensions(&request.url) {
                if entry.expires_at.map(|at| Utc::now() < at).unwrap_or(false) {
                    return Ok(ProbedSize {
                        natural_width: entry.width as u32,
                        natural_height: entry.height as u32,
                        display_height: aspect_height(
                            request.container_width,
                            entry.width as u32,
                            entry.height as u32,
                        ),
                    });
                }
            }
        }

        let (width, height) = self.download_dimensions(&request.url)?;

        let expires_at = Utc::now()
            + chrono::Duration::from_std(self.cfg.default_ttl)
                .unwrap_or_else(|_| chrono::Duration::seconds(0));
        let entry = MediaDimensions {
            id: 0,
            url: request.url.clone(),
            width: width as i64,
            height: height as i64,
            fetched_at: Utc::now(),
            expires_at: Some(expires_at),
        };
        if let Err(err) = self.store.upsert_media_dimensions(entry) {
            debug_log(format!("probe: cache dimensions for {}: {err}", request.url));
        }

        Ok(ProbedSize {
            natural_width: width,
            natural_height: height,
            display_height: aspect_height(request.container_width, width, height),
        })
    }

    fn download_dimensions(&self, url: &str) -> Result<(u32, u32), ProbeError> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, &self.cfg.user_agent)
            .send()
            .map_err(|err| ProbeError::Download(err.to_string()))?;
        if !response.status().is_success() {
            return Err(ProbeError::Download(format!(
                "status {}",
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .map_err(|err| ProbeError::Download(err.to_string()))?
            .to_vec();

        if image::guess_format(&bytes).is_err() {
            let mime = tree_magic_mini::from_u8(&bytes);
            if !mime.starts_with("image/") {
                return Err(ProbeError::NotAnImage(mime.to_string()));
            }
        }

        image::ImageReader::new(Cursor::new(&bytes))
            .with_guessed_format()
            .map_err(|err| ProbeError::Decode(err.to_string()))?
            .into_dimensions()
            .map_err(|err| ProbeError::Decode(err.to_string()))
    }
}

/// Per-item display heights for the rendered feed. Probe completions only
/// land while their item is still present; a failure keeps whatever height
/// the card already had.
#[derive(Debug, Clone)]
pub struct HeightRegistry {
    container_width: f64,
    heights: HashMap<i64, f64>,
}

impl HeightRegistry {
    pub fn new(container_width: f64) -> Self {
        Self {
            container_width,
            heights: HashMap::new(),
        }
    }

    pub fn container_width(&self) -> f64 {
        self.container_width
    }

    /// Changing the container width invalidates every measured height.
    pub fn set_container_width(&mut self, width: f64) {
        if (width - self.container_width).abs() > f64::EPSILON {
            self.container_width = width;
            self.heights.clear();
        }
    }

    pub fn height_for(&self, item_id: i64) -> f64 {
        self.heights
            .get(&item_id)
            .copied()
            .unwrap_or_else(|| fallback_height(self.container_width))
    }

    /// Apply a probe completion. Returns true when a height changed. Items
    /// that left the feed while the probe was in flight are ignored.
    pub fn apply(&mut self, rendered_ids: &HashSet<i64>, probe: &Probe) -> bool {
        if !rendered_ids.contains(&probe.item_id) {
            return false;
        }
        match &probe.outcome {
            Ok(size) => {
                let height = aspect_height(
                    self.container_width,
                    size.natural_width,
                    size.natural_height,
                );
                self.heights.insert(probe.item_id, height) != Some(height)
            }
            Err(_) => false,
        }
    }

    pub fn retain(&mut self, rendered_ids: &HashSet<i64>) {
        self.heights.retain(|id, _| rendered_ids.contains(id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn aspect_height_scales_from_natural_size() {
        assert_eq!(aspect_height(300.0, 1000, 500), 150.0);
    }

    #[test]
    fn aspect_height_clamps_tall_images() {
        assert_eq!(aspect_height(300.0, 400, 800), MAX_MEDIA_HEIGHT);
    }

    #[test]
    fn degenerate_sizes_fall_back_to_widescreen() {
        assert_eq!(aspect_height(320.0, 0, 100), fallback_height(320.0));
        assert_eq!(fallback_height(320.0), 180.0);
    }

    #[test]
    fn registry_applies_only_rendered_items() {
        let mut registry = HeightRegistry::new(300.0);
        let rendered: HashSet<i64> = [1].into_iter().collect();

        let probe = Probe {
            item_id: 1,
            url: "https://cdn.test/a.jpg".into(),
            outcome: Ok(ProbedSize {
                natural_width: 1000,
                natural_height: 500,
                display_height: 150.0,
            }),
        };
        assert!(registry.apply(&rendered, &probe));
        assert_eq!(registry.height_for(1), 150.0);

        // Item 2 unmounted before its probe resolved; nothing changes and
        // nothing panics.
        let stale = Probe {
            item_id: 2,
            url: "https://cdn.test/b.jpg".into(),
            outcome: Ok(ProbedSize {
                natural_width: 100,
                natural_height: 100,
                display_height: 300.0,
            }),
        };
        assert!(!registry.apply(&rendered, &stale));
        assert_eq!(registry.height_for(2), fallback_height(300.0));
    }

    #[test]
    fn registry_keeps_previous_height_on_failure() {
        let mut registry = HeightRegistry::new(300.0);
        let rendered: HashSet<i64> = [1].into_iter().collect();
        let good = Probe {
            item_id: 1,
            url: "https://cdn.test/a.jpg".into(),
            outcome: Ok(ProbedSize {
                natural_width: 600,
                natural_height: 600,
                display_height: 300.0,
            }),
        };
        registry.apply(&rendered, &good);

        let failed = Probe {
            item_id: 1,
            url: "https://cdn.test/a.jpg".into(),
            outcome: Err(ProbeError::Download("boom".into())),
        };
        assert!(!registry.apply(&rendered, &failed));
        assert_eq!(registry.height_for(1), 300.0);
    }

    #[test]
    fn cached_dimensions_skip_the_network() {
        let dir = tempdir().unwrap();
        let store = Arc::new(
            storage::Store::open(storage::Options {
                path: Some(dir.path().join("state.db")),
            })
            .unwrap(),
        );
        store
            .upsert_media_dimensions(MediaDimensions {
                id: 0,
                url: "https://cdn.test/cached.png".into(),
                width: 1000,
                height: 500,
                fetched_at: Utc::now(),
                expires_at: Some(Utc::now() + chrono::Duration::hours(1)),
            })
            .unwrap();

        let manager = Manager::new(store, Config::default()).unwrap();
        let rx = manager.handle().enqueue(Request {
            item_id: 9,
            url: "https://cdn.test/cached.png".into(),
            container_width: 300.0,
            force: false,
        });
        let probe = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let size = probe.outcome.unwrap();
        assert_eq!(size.natural_width, 1000);
        assert_eq!(size.display_height, 150.0);
    }
}
