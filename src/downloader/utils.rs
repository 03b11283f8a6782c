// Helper functions shared by strategies, fetcher and reconciler

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, Command as TokioCommand};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::errors::DownloadError;
use super::models::NetworkConfig;

/// Longest file stem we produce
const MAX_STEM_CHARS: usize = 100;

fn spawn_piped(program: &str, args: &[String]) -> Result<Child, DownloadError> {
    TokioCommand::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DownloadError::ToolNotFound(program.to_string())
            } else {
                DownloadError::ExecutionError(format!("Failed to start {}: {}", program, e))
            }
        })
}

fn read_pipe<R>(mut pipe: R) -> JoinHandle<Vec<u8>>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf).await;
        buf
    })
}

/// Wait for the child, killing it on timeout or cancellation
async fn wait_or_kill(
    child: &mut Child,
    program: &str,
    deadline: tokio::time::Instant,
    cancel: &CancellationToken,
) -> Result<ExitStatus, DownloadError> {
    enum Waited {
        Exited(std::io::Result<ExitStatus>),
        TimedOut,
        Cancelled,
    }

    let waited = tokio::select! {
        status = child.wait() => Waited::Exited(status),
        _ = tokio::time::sleep_until(deadline) => Waited::TimedOut,
        _ = cancel.cancelled() => Waited::Cancelled,
    };

    match waited {
        Waited::Exited(status) => status.map_err(|e| {
            DownloadError::ExecutionError(format!("Failed to wait for {}: {}", program, e))
        }),
        Waited::TimedOut => {
            let _ = child.kill().await;
            Err(DownloadError::NetworkTimeout(format!("{} timed out", program)))
        }
        Waited::Cancelled => {
            let _ = child.kill().await;
            Err(DownloadError::Cancelled)
        }
    }
}

/// Run command with timeout and cooperative cancellation (shared utility)
pub async fn run_output_with_timeout(
    program: &str,
    args: Vec<String>,
    timeout_secs: u64,
    cancel: &CancellationToken,
) -> Result<std::process::Output, DownloadError> {
    if cancel.is_cancelled() {
        return Err(DownloadError::Cancelled);
    }
    debug!(program, args = %args.join(" "), "spawning");

    let mut child = spawn_piped(program, &args)?;
    let stdout_pipe = child.stdout.take().ok_or_else(|| {
        DownloadError::ExecutionError(format!("Failed to capture stdout from {}", program))
    })?;
    let stderr_pipe = child.stderr.take().ok_or_else(|| {
        DownloadError::ExecutionError(format!("Failed to capture stderr from {}", program))
    })?;

    let stdout_task = read_pipe(stdout_pipe);
    let stderr_task = read_pipe(stderr_pipe);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(timeout_secs);
    match wait_or_kill(&mut child, program, deadline, cancel).await {
        Ok(status) => {
            let stdout = stdout_task.await.unwrap_or_default();
            let stderr = stderr_task.await.unwrap_or_default();
            Ok(std::process::Output {
                status,
                stdout,
                stderr,
            })
        }
        Err(e) => {
            stdout_task.abort();
            stderr_task.abort();
            Err(e)
        }
    }
}

/// Run command, feeding each stdout line to `on_line`; returns exit status and stderr
pub async fn run_lines_with_timeout<F>(
    program: &str,
    args: Vec<String>,
    timeout_secs: u64,
    cancel: &CancellationToken,
    mut on_line: F,
) -> Result<(ExitStatus, String), DownloadError>
where
    F: FnMut(&str) + Send,
{
    if cancel.is_cancelled() {
        return Err(DownloadError::Cancelled);
    }
    debug!(program, args = %args.join(" "), "spawning (streaming)");

    let mut child = spawn_piped(program, &args)?;
    let stdout_pipe = child.stdout.take().ok_or_else(|| {
        DownloadError::ExecutionError(format!("Failed to capture stdout from {}", program))
    })?;
    let stderr_pipe = child.stderr.take().ok_or_else(|| {
        DownloadError::ExecutionError(format!("Failed to capture stderr from {}", program))
    })?;
    let stderr_task = read_pipe(stderr_pipe);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(timeout_secs);
    let mut lines = BufReader::new(stdout_pipe).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => on_line(&line),
                Ok(None) => break,
                Err(e) => {
                    debug!("stdout read failed: {}", e);
                    break;
                }
            },
            _ = tokio::time::sleep_until(deadline) => {
                let _ = child.kill().await;
                stderr_task.abort();
                return Err(DownloadError::NetworkTimeout(format!("{} timed out", program)));
            }
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                stderr_task.abort();
                return Err(DownloadError::Cancelled);
            }
        }
    }

    let status = match wait_or_kill(&mut child, program, deadline, cancel).await {
        Ok(status) => status,
        Err(e) => {
            stderr_task.abort();
            return Err(e);
        }
    };
    let stderr = stderr_task.await.unwrap_or_default();
    Ok((status, String::from_utf8_lossy(&stderr).into_owned()))
}

/// Build proxy arguments for yt-dlp
pub fn get_proxy_args(config: &NetworkConfig) -> Vec<String> {
    let mut args = Vec::new();

    if let Some(proxy) = &config.proxy {
        args.push("--proxy".to_string());
        args.push(proxy.clone());
    }

    args
}

/// Build timeout arguments for yt-dlp
pub fn get_timeout_args(config: &NetworkConfig) -> Vec<String> {
    let mut args = Vec::new();

    if let Some(timeout) = config.timeout {
        args.push("--socket-timeout".to_string());
        args.push(timeout.to_string());
    }

    args
}

/// Strip characters that are illegal in file names and cap the length
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*'))
        .filter(|c| !c.is_control())
        .collect();
    let trimmed = cleaned.trim().trim_matches('.');
    let capped: String = trimmed.chars().take(MAX_STEM_CHARS).collect();
    let capped = capped.trim().to_string();
    if capped.is_empty() {
        "video".to_string()
    } else {
        capped
    }
}

/// Media extensions a page URL may legitimately end with
const KNOWN_EXTENSIONS: &[&str] = &[
    "mp4", "avi", "mov", "wmv", "flv", "webm", "m4v", "m3u8", "ts", "mkv",
];

/// Infer the target extension from a media URL path, defaulting to mp4
pub fn infer_extension(media_url: &str) -> String {
    let path = url::Url::parse(media_url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| {
            media_url
                .split(['?', '#'])
                .next()
                .unwrap_or(media_url)
                .to_string()
        });
    let last = path.rsplit('/').next().unwrap_or("");
    match last.rsplit_once('.') {
        Some((_, ext)) => {
            let ext = ext.to_ascii_lowercase();
            if KNOWN_EXTENSIONS.contains(&ext.as_str()) {
                ext
            } else {
                "mp4".to_string()
            }
        }
        None => "mp4".to_string(),
    }
}

/// Logical identity of a media file name: the stem with any `.f<digits>`
/// format qualifier removed
pub fn logical_identity(file_name: &str) -> &str {
    let stem = match file_name.rsplit_once('.') {
        Some((stem, _)) => stem,
        None => file_name,
    };
    match split_format_marker(stem) {
        Some((identity, _)) => identity,
        None => stem,
    }
}

/// Split `title.f137` into (`title`, `137`)
pub fn split_format_marker(stem: &str) -> Option<(&str, &str)> {
    let (head, tail) = stem.rsplit_once(".f")?;
    if !head.is_empty() && !tail.is_empty() && tail.chars().all(|c| c.is_ascii_digit()) {
        Some((head, tail))
    } else {
        None
    }
}

/// Video container extensions (lowercase, no dot)
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "webm", "avi", "flv", "mov", "m4v", "ts"];

/// Audio-only extensions (lowercase, no dot)
pub const AUDIO_EXTENSIONS: &[&str] = &["m4a", "mp3", "aac", "wav", "opus", "ogg"];

fn extension_of(file_name: &str) -> Option<String> {
    file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
}

pub fn is_video_file_name(file_name: &str) -> bool {
    extension_of(file_name).map_or(false, |e| VIDEO_EXTENSIONS.contains(&e.as_str()))
}

pub fn is_audio_file_name(file_name: &str) -> bool {
    extension_of(file_name).map_or(false, |e| AUDIO_EXTENSIONS.contains(&e.as_str()))
}

/// Media files in `dir` whose logical identity is `identity`, sorted by name
pub fn files_with_identity(dir: &Path, identity: &str) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .flatten()
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            let media = is_video_file_name(&name) || is_audio_file_name(&name);
            (media && !name.starts_with('.') && logical_identity(&name) == identity)
                .then(|| e.path())
        })
        .collect();
    files.sort();
    files
}

/// In-progress resolver files for `identity`: `<name>.part` and `<name>.ytdl`
pub fn partial_files(dir: &Path, identity: &str) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .flatten()
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            let inner = name
                .strip_suffix(".part")
                .or_else(|| name.strip_suffix(".ytdl"))?;
            (!name.starts_with('.') && logical_identity(inner) == identity).then(|| e.path())
        })
        .collect();
    files.sort();
    files
}

/// Whether any file in `dir` already carries `stem` as its logical identity
fn stem_in_use(dir: &Path, stem: &str) -> bool {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return false;
    };
    entries.flatten().any(|entry| {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        !name.starts_with('.') && logical_identity(&name) == stem
    })
}

/// Exclusive claim on a file stem inside the download directory.
/// Removed when dropped.
#[derive(Debug)]
pub struct StemClaim {
    stem: String,
    marker: PathBuf,
}

impl StemClaim {
    pub fn stem(&self) -> &str {
        &self.stem
    }
}

impl Drop for StemClaim {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.marker);
    }
}

/// Reserve a stem no existing file uses: `base`, `base_1`, `base_2`, ...
///
/// The claim marker is created with `create_new`, so two tasks racing for
/// the same title end up with different stems.
pub fn reserve_stem(dir: &Path, base: &str) -> Result<StemClaim, DownloadError> {
    std::fs::create_dir_all(dir)?;
    for n in 0..10_000u32 {
        let stem = if n == 0 {
            base.to_string()
        } else {
            format!("{}_{}", base, n)
        };
        if stem_in_use(dir, &stem) {
            continue;
        }
        let marker = dir.join(format!(".{}.claim", stem));
        match OpenOptions::new().write(true).create_new(true).open(&marker) {
            Ok(_) => return Ok(StemClaim { stem, marker }),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(DownloadError::FetchFailed(format!(
        "no free file name for '{}'",
        base
    )))
}

/// First free path among `stem.ext`, `stem_1.ext`, ...
pub fn unique_path(dir: &Path, stem: &str, ext: &str) -> PathBuf {
    let mut candidate = dir.join(format!("{}.{}", stem, ext));
    let mut n = 1;
    while candidate.exists() {
        candidate = dir.join(format!("{}_{}.{}", stem, n, ext));
        n += 1;
    }
    candidate
}
