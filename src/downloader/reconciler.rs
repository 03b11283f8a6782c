// Post-download reconciliation
//
// 1. Pair `<id>.f<N>.<video>` with `<id>.f<M>.<audio>` and merge each pair.
// 2. Probe every whole file, video or audio, and rebuild defective audio
//    in place.
//
// Nothing here fails a task. Each step that goes wrong is logged and the
// files it touched are left as they were.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::errors::DownloadError;
use super::media_tool::{needs_repair, MediaToolkit};
use super::utils::{is_audio_file_name, is_video_file_name, split_format_marker, unique_path};

/// Separately-downloaded halves of one video
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaStreamPair {
    pub identity: String,
    pub video: PathBuf,
    pub audio: PathBuf,
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// `(identity, extension)` for a split-format part, `None` for whole files
fn split_part(path: &Path) -> Option<(String, String)> {
    let name = file_name(path);
    let (stem, ext) = name.rsplit_once('.')?;
    let (identity, _) = split_format_marker(stem)?;
    Some((identity.to_string(), ext.to_ascii_lowercase()))
}

/// Group split parts into video/audio pairs.
///
/// Returns the pairs and every file that did not end up in one.
pub fn pair_streams(files: &[PathBuf]) -> (Vec<MediaStreamPair>, Vec<PathBuf>) {
    let mut pairs: Vec<MediaStreamPair> = Vec::new();
    let mut loose = Vec::new();
    let mut videos: Vec<(String, PathBuf)> = Vec::new();
    let mut audios: Vec<(String, PathBuf)> = Vec::new();

    for path in files {
        let name = file_name(path);
        match split_part(path) {
            Some((identity, _)) if is_video_file_name(&name) => videos.push((identity, path.clone())),
            Some((identity, _)) if is_audio_file_name(&name) => audios.push((identity, path.clone())),
            _ => loose.push(path.clone()),
        }
    }

    for (identity, video) in videos {
        match audios.iter().position(|(id, _)| *id == identity) {
            Some(idx) => {
                let (_, audio) = audios.remove(idx);
                pairs.push(MediaStreamPair {
                    identity,
                    video,
                    audio,
                });
            }
            None => loose.push(video),
        }
    }
    loose.extend(audios.into_iter().map(|(_, p)| p));
    loose.sort();

    (pairs, loose)
}

/// Hidden sibling used while repairing `path`: `.<stem>.repair.<ext>`.
/// Hidden names are never claimed or listed as task output.
pub fn repair_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "video".to_string());
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "mp4".to_string());
    path.with_file_name(format!(".{}.repair.{}", stem, ext))
}

pub struct Reconciler {
    toolkit: Arc<dyn MediaToolkit>,
}

impl Reconciler {
    pub fn new(toolkit: Arc<dyn MediaToolkit>) -> Self {
        Self { toolkit }
    }

    /// Merge split pairs and repair audio; returns the files the task ends with
    pub async fn reconcile(
        &self,
        dir: &Path,
        files: Vec<PathBuf>,
        cancel: &CancellationToken,
    ) -> Vec<PathBuf> {
        let (pairs, mut outputs) = pair_streams(&files);

        for pair in pairs {
            if cancel.is_cancelled() {
                outputs.push(pair.video);
                outputs.push(pair.audio);
                continue;
            }
            match self.merge_pair(dir, &pair, cancel).await {
                Ok(merged) => outputs.push(merged),
                Err(e) => {
                    warn!(identity = %pair.identity, "merge failed, keeping parts: {}", e);
                    outputs.push(pair.video);
                    outputs.push(pair.audio);
                }
            }
        }

        let mut finals = Vec::with_capacity(outputs.len());
        for path in outputs {
            // Split halves that never found a partner are left alone
            let name = file_name(&path);
            let whole_media = is_video_file_name(&name) || is_audio_file_name(&name);
            if split_part(&path).is_none() && whole_media {
                self.repair_audio(&path, cancel).await;
            }
            finals.push(path);
        }
        finals.sort();
        finals
    }

    async fn merge_pair(
        &self,
        dir: &Path,
        pair: &MediaStreamPair,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, DownloadError> {
        let output = unique_path(dir, &pair.identity, "mp4");
        if let Err(e) = self
            .toolkit
            .merge(&pair.video, &pair.audio, &output, cancel)
            .await
        {
            let _ = tokio::fs::remove_file(&output).await;
            return Err(e);
        }

        for part in [&pair.video, &pair.audio] {
            if let Err(e) = tokio::fs::remove_file(part).await {
                warn!(part = %part.display(), "could not delete merged source: {}", e);
            }
        }
        info!(output = %output.display(), "merged video and audio");
        Ok(output)
    }

    /// Probe `path` and rebuild its audio if it is missing or substandard
    async fn repair_audio(&self, path: &Path, cancel: &CancellationToken) {
        let audio = match self.toolkit.probe_audio(path, cancel).await {
            Ok(audio) => audio,
            Err(e) => {
                warn!(file = %path.display(), "audio probe failed: {}", e);
                return;
            }
        };
        if !needs_repair(audio.as_ref()) {
            debug!(file = %path.display(), "audio ok");
            return;
        }

        info!(file = %path.display(), ?audio, "repairing audio");
        let fixed = repair_path(path);
        match self.toolkit.reencode_audio(path, &fixed, cancel).await {
            Ok(()) => {
                if let Err(e) = tokio::fs::rename(&fixed, path).await {
                    warn!(file = %path.display(), "could not replace with repaired copy: {}", e);
                    let _ = tokio::fs::remove_file(&fixed).await;
                }
            }
            Err(e) => {
                warn!(file = %path.display(), "audio repair failed: {}", e);
                let _ = tokio::fs::remove_file(&fixed).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::media_tool::AudioStreamInfo;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Toolkit that writes placeholder files and records its calls
    struct FakeToolkit {
        audio: Option<AudioStreamInfo>,
        fail_merge: bool,
        fail_reencode: bool,
        calls: Mutex<Vec<String>>,
    }

    impl FakeToolkit {
        fn new(audio: Option<AudioStreamInfo>, fail_merge: bool) -> Arc<Self> {
            Arc::new(Self {
                audio,
                fail_merge,
                fail_reencode: false,
                calls: Mutex::new(Vec::new()),
            })
        }

        /// Re-encode writes half a file and then errors
        fn broken_encoder(audio: Option<AudioStreamInfo>) -> Arc<Self> {
            Arc::new(Self {
                audio,
                fail_merge: false,
                fail_reencode: true,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MediaToolkit for FakeToolkit {
        async fn merge(
            &self,
            _video: &Path,
            _audio: &Path,
            output: &Path,
            _cancel: &CancellationToken,
        ) -> Result<(), DownloadError> {
            self.calls.lock().unwrap().push(format!("merge {}", file_name(output)));
            if self.fail_merge {
                return Err(DownloadError::Reconciliation("codec mismatch".into()));
            }
            std::fs::write(output, b"merged")?;
            Ok(())
        }

        async fn probe_audio(
            &self,
            path: &Path,
            _cancel: &CancellationToken,
        ) -> Result<Option<AudioStreamInfo>, DownloadError> {
            self.calls.lock().unwrap().push(format!("probe {}", file_name(path)));
            Ok(self.audio.clone())
        }

        async fn reencode_audio(
            &self,
            input: &Path,
            output: &Path,
            _cancel: &CancellationToken,
        ) -> Result<(), DownloadError> {
            self.calls.lock().unwrap().push(format!("reencode {}", file_name(input)));
            if self.fail_reencode {
                std::fs::write(output, b"rep")?;
                return Err(DownloadError::Reconciliation("encoder crashed".into()));
            }
            std::fs::write(output, b"repaired")?;
            Ok(())
        }
    }

    fn healthy() -> Option<AudioStreamInfo> {
        Some(AudioStreamInfo {
            codec: "aac".into(),
            sample_rate: Some(44100),
            channels: Some(2),
            bit_rate: Some(128_000),
        })
    }

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, b"data").unwrap();
        path
    }

    #[test]
    fn test_pair_streams() {
        let files = vec![
            PathBuf::from("/d/a.f137.mp4"),
            PathBuf::from("/d/a.f140.m4a"),
            PathBuf::from("/d/b.f137.mp4"),
            PathBuf::from("/d/c.mp4"),
        ];
        let (pairs, loose) = pair_streams(&files);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].identity, "a");
        assert_eq!(pairs[0].audio, PathBuf::from("/d/a.f140.m4a"));
        assert_eq!(loose, vec![PathBuf::from("/d/b.f137.mp4"), PathBuf::from("/d/c.mp4")]);
    }

    #[test]
    fn test_repair_path() {
        assert_eq!(
            repair_path(Path::new("/d/clip.mp4")),
            PathBuf::from("/d/.clip.repair.mp4")
        );
    }

    #[tokio::test]
    async fn test_pair_is_merged_and_sources_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let video = touch(dir.path(), "clip.f137.mp4");
        let audio = touch(dir.path(), "clip.f140.m4a");
        let toolkit = FakeToolkit::new(healthy(), false);
        let reconciler = Reconciler::new(toolkit.clone());

        let out = reconciler
            .reconcile(dir.path(), vec![video.clone(), audio.clone()], &CancellationToken::new())
            .await;

        assert_eq!(out, vec![dir.path().join("clip.mp4")]);
        assert!(!video.exists());
        assert!(!audio.exists());
        assert_eq!(toolkit.calls(), vec!["merge clip.mp4", "probe clip.mp4"]);
    }

    #[tokio::test]
    async fn test_failed_merge_keeps_both_parts() {
        let dir = tempfile::tempdir().unwrap();
        let video = touch(dir.path(), "clip.f137.mp4");
        let audio = touch(dir.path(), "clip.f140.m4a");
        let reconciler = Reconciler::new(FakeToolkit::new(healthy(), true));

        let out = reconciler
            .reconcile(dir.path(), vec![video.clone(), audio.clone()], &CancellationToken::new())
            .await;

        assert_eq!(out.len(), 2);
        assert!(video.exists() && audio.exists());
        assert!(!dir.path().join("clip.mp4").exists());
    }

    #[tokio::test]
    async fn test_single_half_is_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let video = touch(dir.path(), "clip.f137.mp4");
        let toolkit = FakeToolkit::new(None, false);
        let reconciler = Reconciler::new(toolkit.clone());

        let out = reconciler
            .reconcile(dir.path(), vec![video.clone()], &CancellationToken::new())
            .await;

        assert_eq!(out, vec![video]);
        assert!(toolkit.calls().is_empty());
    }

    #[tokio::test]
    async fn test_healthy_audio_is_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let clip = touch(dir.path(), "clip.mp4");
        let toolkit = FakeToolkit::new(healthy(), false);
        let reconciler = Reconciler::new(toolkit.clone());

        reconciler
            .reconcile(dir.path(), vec![clip.clone()], &CancellationToken::new())
            .await;

        assert_eq!(std::fs::read(&clip).unwrap(), b"data");
        assert_eq!(toolkit.calls(), vec!["probe clip.mp4"]);
    }

    #[tokio::test]
    async fn test_missing_audio_is_repaired_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let clip = touch(dir.path(), "clip.mp4");
        let toolkit = FakeToolkit::new(None, false);
        let reconciler = Reconciler::new(toolkit.clone());

        let out = reconciler
            .reconcile(dir.path(), vec![clip.clone()], &CancellationToken::new())
            .await;

        assert_eq!(out, vec![clip.clone()]);
        assert_eq!(std::fs::read(&clip).unwrap(), b"repaired");
        assert!(!dir.path().join(".clip.repair.mp4").exists());
        assert_eq!(toolkit.calls(), vec!["probe clip.mp4", "reencode clip.mp4"]);
    }

    #[tokio::test]
    async fn test_failed_repair_keeps_original() {
        let dir = tempfile::tempdir().unwrap();
        let clip = touch(dir.path(), "clip.mp4");
        let toolkit = FakeToolkit::broken_encoder(None);
        let reconciler = Reconciler::new(toolkit.clone());

        let out = reconciler
            .reconcile(dir.path(), vec![clip.clone()], &CancellationToken::new())
            .await;

        assert_eq!(out, vec![clip.clone()]);
        assert_eq!(std::fs::read(&clip).unwrap(), b"data");
        assert!(!repair_path(&clip).exists());
        assert_eq!(toolkit.calls(), vec!["probe clip.mp4", "reencode clip.mp4"]);
    }

    #[tokio::test]
    async fn test_repair_does_not_touch_lookalike_file() {
        let dir = tempfile::tempdir().unwrap();
        let clip = touch(dir.path(), "clip.mp4");
        // Another task's output whose name resembles a repair sibling
        let neighbour = dir.path().join("clip_fixed_audio.mp4");
        std::fs::write(&neighbour, b"theirs").unwrap();
        let reconciler = Reconciler::new(FakeToolkit::new(None, false));

        reconciler
            .reconcile(dir.path(), vec![clip.clone()], &CancellationToken::new())
            .await;

        assert_eq!(std::fs::read(&clip).unwrap(), b"repaired");
        assert_eq!(std::fs::read(&neighbour).unwrap(), b"theirs");
    }

    #[tokio::test]
    async fn test_whole_audio_file_is_probed() {
        let dir = tempfile::tempdir().unwrap();
        let song = touch(dir.path(), "song.m4a");
        let toolkit = FakeToolkit::new(healthy(), false);
        let reconciler = Reconciler::new(toolkit.clone());

        let out = reconciler
            .reconcile(dir.path(), vec![song.clone()], &CancellationToken::new())
            .await;

        assert_eq!(out, vec![song]);
        assert_eq!(toolkit.calls(), vec!["probe song.m4a"]);
    }
}
