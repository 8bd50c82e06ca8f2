use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use once_cell::sync::OnceCell;
use serde_json::json;

#[cfg(any(unix, target_os = "windows"))]
use rand::{distributions::Alphanumeric, Rng};
#[cfg(unix)]
use std::os::unix::net::UnixStream;

use crate::playback::{Transport, TransportError};

fn playback_debug_enabled() -> bool {
    static FLAG: OnceCell<bool> = OnceCell::new();
    *FLAG.get_or_init(|| {
        std::env::var("VOTIX_DEBUG_PLAYBACK")
            .map(|val| {
                let trimmed = val.trim();
                !(trimmed.is_empty()
                    || trimmed.eq_ignore_ascii_case("0")
                    || trimmed.eq_ignore_ascii_case("false")
                    || trimmed.eq_ignore_ascii_case("no")
                    || trimmed.eq_ignore_ascii_case("off"))
            })
            .unwrap_or(false)
    })
}

fn playback_debug_writer() -> Option<&'static Mutex<std::fs::File>> {
    static WRITER: OnceCell<Option<Mutex<std::fs::File>>> = OnceCell::new();
    WRITER
        .get_or_init(|| {
            std::env::var("VOTIX_DEBUG_PLAYBACK_LOG")
                .ok()
                .and_then(|path| {
                    OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(path)
                        .map(Mutex::new)
                        .ok()
                })
        })
        .as_ref()
}

/// Degraded-rendering log shared by the playback coordinator, the aspect
/// probe and the player sessions. Silent unless VOTIX_DEBUG_PLAYBACK is set.
pub fn debug_log(message: impl AsRef<str>) {
    if !playback_debug_enabled() {
        return;
    }
    if let Some(writer) = playback_debug_writer() {
        if let Ok(mut file) = writer.lock() {
            let _ = writeln!(file, "{}", message.as_ref());
            return;
        }
    }
    eprintln!("{}", message.as_ref());
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VideoSource {
    pub playback_url: String,
    pub label: String,
}

impl VideoSource {
    pub fn new(url: &str, label: &str) -> Option<Self> {
        let playback_url = sanitize_url(url);
        if playback_url.is_empty() {
            return None;
        }
        let label = if label.trim().is_empty() {
            "Survey video".to_string()
        } else {
            label.trim().to_string()
        };
        Some(Self {
            playback_url,
            label,
        })
    }
}

fn sanitize_url(raw: &str) -> String {
    raw.trim().replace("&amp;", "&")
}

fn push_http_headers(args: &mut Vec<String>, user_agent: &str) {
    args.push(format!("--http-header-fields=User-Agent: {}", user_agent));
}

/// Terminal geometry for an inline surface: where the media block of the
/// active card sits and how large it is, in cells and pixels.
#[derive(Clone, Copy, Debug, Default)]
pub struct SurfaceGeometry {
    pub col: u16,
    pub row: u16,
    pub cols: i32,
    pub rows: i32,
    pub pixel_width: i32,
    pub pixel_height: i32,
}

pub struct InlineLaunchOptions<'a> {
    pub mpv_path: &'a str,
    pub source: &'a VideoSource,
    pub user_agent: &'a str,
    pub geometry: SurfaceGeometry,
    pub start_muted: bool,
}

pub struct ExternalLaunchOptions<'a> {
    pub mpv_path: &'a str,
    pub source: &'a VideoSource,
    pub user_agent: &'a str,
    pub muted: bool,
}

/// A live mpv process rendering into the feed. Killed when its cell is
/// deactivated or unmounted; transport commands go over the IPC socket so
/// mute flips never restart playback.
pub struct InlineSession {
    kill_tx: Sender<()>,
    status_rx: Receiver<Result<ExitStatus>>,
    handle: Option<thread::JoinHandle<()>>,
    ipc_path: Option<Arc<String>>,
}

impl InlineSession {
    fn finalize(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    pub fn try_status(&mut self) -> Option<Result<ExitStatus>> {
        match self.status_rx.try_recv() {
            Ok(res) => {
                self.finalize();
                Some(res)
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.finalize();
                Some(Err(anyhow!("player session closed unexpectedly")))
            }
        }
    }

    pub fn stop_blocking(mut self) -> Option<Result<ExitStatus>> {
        let _ = self.kill_tx.send(());
        let res = self.status_rx.recv().ok();
        self.finalize();
        res
    }

    pub fn controls_supported(&self) -> bool {
        self.ipc_path.is_some()
    }

    fn send_property(&self, payload: serde_json::Value) -> Result<(), TransportError> {
        let Some(path) = &self.ipc_path else {
            return Err(TransportError::NotReady);
        };
        let serialized = serde_json::to_string(&json!({ "command": payload }))
            .map_err(|err| TransportError::Failed(err.to_string()))?;
        send_ipc_command_inner(path, &serialized)
            .map_err(|err| TransportError::Failed(err.to_string()))
    }
}

impl Transport for InlineSession {
    fn seek_to_start(&mut self) -> Result<(), TransportError> {
        self.send_property(json!(["seek", 0.0, "absolute"]))
    }

    fn play(&mut self) -> Result<(), TransportError> {
        self.send_property(json!(["set_property", "pause", false]))
    }

    fn pause(&mut self) -> Result<(), TransportError> {
        self.send_property(json!(["set_property", "pause", true]))
    }

    fn set_looping(&mut self, looping: bool) -> Result<(), TransportError> {
        let value = if looping { "inf" } else { "no" };
        self.send_property(json!(["set_property", "loop-file", value]))
    }

    fn set_muted(&mut self, muted: bool) -> Result<(), TransportError> {
        self.send_property(json!(["set_property", "mute", muted]))
    }
}

impl Drop for InlineSession {
    fn drop(&mut self) {
        if self.handle.is_some() {
            let _ = self.kill_tx.send(());
            let _ = self.status_rx.recv().ok();
            self.finalize();
        }
    }
}

pub fn spawn_inline_player(opts: InlineLaunchOptions<'_>) -> Result<InlineSession> {
    if opts.source.playback_url.trim().is_empty() {
        return Err(anyhow!("video URL missing"));
    }

    let (kill_tx, kill_rx) = bounded::<()>(1);
    let (status_tx, status_rx) = bounded::<Result<ExitStatus>>(1);

    let mpv_path = opts.mpv_path.to_string();
    let remote_url = opts.source.playback_url.clone();
    let label = opts.source.label.clone();
    let user_agent = opts.user_agent.to_string();
    let geometry = opts.geometry;
    let start_muted = opts.start_muted;
    let debug_enabled = playback_debug_enabled();
    #[cfg(unix)]
    let ipc_path = unique_ipc_path();
    #[cfg(not(unix))]
    let ipc_path: Option<String> = None;
    let ipc_path_for_session = ipc_path.clone();
    debug_log(format!(
        "spawning inline mpv rows={} cols={} pixels={}x{} muted={} url={} ipc={}",
        geometry.rows,
        geometry.cols,
        geometry.pixel_width,
        geometry.pixel_height,
        start_muted,
        remote_url,
        ipc_path.as_deref().unwrap_or("n/a")
    ));
    #[cfg(unix)]
    if let Some(path) = &ipc_path {
        if let Err(err) = fs::remove_file(path) {
            if err.kind() != std::io::ErrorKind::NotFound && playback_debug_enabled() {
                debug_log(format!("failed to remove stale mpv ipc path {path}: {err}"));
            }
        }
    }
    let ipc_arg = ipc_path
        .as_ref()
        .map(|path| format!("--input-ipc-server={path}"));
    let handle = thread::spawn(move || {
        let ipc_cleanup = ipc_path.clone();
        let result = (|| -> Result<ExitStatus> {
            let mut args = Vec::new();
            args.push(remote_url.clone());
            args.push("--vo=kitty".to_string());
            args.push(format!("--vo-kitty-cols={}", geometry.cols.max(1)));
            args.push(format!("--vo-kitty-rows={}", geometry.rows.max(1)));
            let left = u32::from(geometry.col).saturating_add(1);
            let top = u32::from(geometry.row).saturating_add(1);
            args.push(format!("--vo-kitty-left={}", left));
            args.push(format!("--vo-kitty-top={}", top));
            args.push(format!("--vo-kitty-width={}", geometry.pixel_width.max(1)));
            args.push(format!("--vo-kitty-height={}", geometry.pixel_height.max(1)));
            args.push("--vo-kitty-config-clear=no".to_string());
            args.push("--start=0".to_string());
            args.push(format!("--mute={}", if start_muted { "yes" } else { "no" }));
            args.push("--force-window=no".to_string());
            args.push("--keep-open=no".to_string());
            args.push("--loop-file=inf".to_string());
            args.push("--really-quiet".to_string());
            args.push("--idle=no".to_string());
            args.push("--terminal=no".to_string());
            args.push("--input-terminal=no".to_string());
            args.push("--no-config".to_string());
            args.push("--ytdl=no".to_string());
            args.push("--osc=no".to_string());
            args.push("--osd-level=0".to_string());
            args.push("--osd-duration=0".to_string());
            if let Some(arg) = &ipc_arg {
                args.push(arg.clone());
            }

            if !label.is_empty() {
                args.push(format!("--force-media-title={}", label));
            }

            push_http_headers(&mut args, &user_agent);

            if debug_enabled {
                debug_log(format!("mpv args: {:?}", args));
            }

            let mut command = Command::new(&mpv_path);
            for arg in &args {
                command.arg(arg);
            }

            command.stdin(Stdio::null());
            command.stdout(Stdio::inherit());
            if debug_enabled {
                command.stderr(Stdio::piped());
            } else {
                command.stderr(Stdio::null());
            }

            let mut child = command
                .spawn()
                .with_context(|| format!("launch mpv to play {}", remote_url))?;
            let mut stderr_handle = None;
            if debug_enabled {
                if let Some(stderr) = child.stderr.take() {
                    stderr_handle = Some(thread::spawn(move || {
                        let reader = BufReader::new(stderr);
                        for line in reader.lines().map_while(Result::ok) {
                            debug_log(format!("mpv stderr: {}", line));
                        }
                    }));
                }
            }

            loop {
                if kill_rx.try_recv().is_ok() {
                    let _ = child.kill();
                    let status = child.wait().context("wait for mpv after stop request")?;
                    if debug_enabled {
                        debug_log(format!("mpv stopped with status {:?}", status.code()));
                    }
                    if let Some(handle) = stderr_handle.take() {
                        let _ = handle.join();
                    }
                    return Ok(status);
                }

                match child.try_wait() {
                    Ok(Some(status)) => {
                        if debug_enabled {
                            debug_log(format!("mpv exited with status {:?}", status.code()));
                        }
                        if let Some(handle) = stderr_handle.take() {
                            let _ = handle.join();
                        }
                        return Ok(status);
                    }
                    Ok(None) => thread::sleep(Duration::from_millis(30)),
                    Err(err) => {
                        if debug_enabled {
                            debug_log(format!("mpv poll error: {}", err));
                        }
                        if let Some(handle) = stderr_handle.take() {
                            let _ = handle.join();
                        }
                        return Err(anyhow!(err)).context("poll mpv status");
                    }
                }
            }
        })();
        #[cfg(unix)]
        if let Some(path) = ipc_cleanup {
            cleanup_ipc_path(&path);
        }
        #[cfg(not(unix))]
        let _ = ipc_cleanup;

        let _ = status_tx.send(result);
    });

    Ok(InlineSession {
        kill_tx,
        status_rx,
        handle: Some(handle),
        ipc_path: ipc_path_for_session.map(Arc::new),
    })
}

/// Detached fullscreen playback for when the user promotes the active video
/// out of the feed.
pub fn spawn_external_player(opts: ExternalLaunchOptions<'_>) -> Result<()> {
    if opts.source.playback_url.trim().is_empty() {
        return Err(anyhow!("video playback path missing"));
    }

    let mut args = Vec::new();
    args.push(opts.source.playback_url.to_string());
    args.push("--fullscreen".to_string());
    args.push("--force-window=yes".to_string());
    args.push("--keep-open=no".to_string());
    args.push("--loop-file=inf".to_string());
    args.push(format!("--mute={}", if opts.muted { "yes" } else { "no" }));
    args.push("--really-quiet".to_string());
    args.push("--no-config".to_string());
    args.push("--ytdl=no".to_string());

    push_http_headers(&mut args, opts.user_agent);

    if !opts.source.label.is_empty() {
        args.push(format!("--force-media-title={}", opts.source.label));
    }

    let mut command = Command::new(opts.mpv_path);
    for arg in &args {
        command.arg(arg);
    }
    command.stdin(Stdio::null());
    command.stdout(Stdio::null());
    command.stderr(Stdio::null());
    command
        .spawn()
        .with_context(|| format!("launch mpv fullscreen for {}", opts.source.playback_url))?;
    Ok(())
}

#[cfg(unix)]
fn send_ipc_command_inner(path: &str, serialized: &str) -> Result<()> {
    let mut stream =
        UnixStream::connect(path).with_context(|| format!("connect to mpv IPC socket {path}"))?;
    stream
        .write_all(serialized.as_bytes())
        .context("write mpv IPC command")?;
    stream
        .write_all(b"\n")
        .context("write mpv IPC command terminator")?;
    Ok(())
}

#[cfg(target_os = "windows")]
fn send_ipc_command_inner(path: &str, serialized: &str) -> Result<()> {
    use std::fs::OpenOptions;
    use std::io::ErrorKind;

    const PIPE_RETRIES: usize = 5;
    const PIPE_RETRY_DELAY: Duration = Duration::from_millis(100);

    for attempt in 0..PIPE_RETRIES {
        match OpenOptions::new().read(true).write(true).open(path) {
            Ok(mut pipe) => {
                pipe.write_all(serialized.as_bytes())
                    .with_context(|| format!("write mpv IPC command to {path}"))?;
                pipe.write_all(b"\n")
                    .with_context(|| format!("write mpv IPC command terminator to {path}"))?;
                pipe.flush().ok();
                return Ok(());
            }
            Err(err) if err.kind() == ErrorKind::NotFound && attempt + 1 < PIPE_RETRIES => {
                thread::sleep(PIPE_RETRY_DELAY);
            }
            Err(err) => {
                return Err(anyhow!(err)).context(format!("connect to mpv IPC named pipe {path}"));
            }
        }
    }

    Err(anyhow!("connect to mpv IPC named pipe {}", path))
}

#[cfg(all(not(unix), not(target_os = "windows")))]
fn send_ipc_command_inner(_path: &str, _serialized: &str) -> Result<()> {
    Err(anyhow!(
        "Inline playback controls are not supported on this platform."
    ))
}

#[cfg(unix)]
fn unique_ipc_path() -> Option<String> {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(char::from)
        .collect();
    let mut path = std::env::temp_dir();
    path.push(format!("votix-mpv-{}-{suffix}.sock", std::process::id()));
    Some(path.to_string_lossy().to_string())
}

#[cfg(target_os = "windows")]
fn unique_ipc_path() -> Option<String> {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(char::from)
        .collect();
    Some(format!(
        r"\\.\pipe\votix-mpv-{}-{suffix}",
        std::process::id()
    ))
}

#[cfg(all(not(unix), not(target_os = "windows")))]
fn unique_ipc_path() -> Option<String> {
    None
}

#[cfg(unix)]
fn cleanup_ipc_path(path: &str) {
    if let Err(err) = fs::remove_file(path) {
        if err.kind() != std::io::ErrorKind::NotFound && playback_debug_enabled() {
            debug_log(format!("failed to remove mpv ipc path {path}: {err}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_sources_with_default_label() {
        let source = VideoSource::new("https://cdn.test/clip.mp4", "   ").unwrap();
        assert_eq!(source.label, "Survey video");
        assert_eq!(source.playback_url, "https://cdn.test/clip.mp4");
    }

    #[test]
    fn sanitizes_encoded_urls() {
        let source =
            VideoSource::new("https://cdn.test/video.mp4?token=a&amp;b=1", "Sample").unwrap();
        assert_eq!(source.playback_url, "https://cdn.test/video.mp4?token=a&b=1");
    }

    #[test]
    fn rejects_blank_urls() {
        assert!(VideoSource::new("   ", "Sample").is_none());
    }
}
