// ffmpeg / ffprobe wrappers used by the reconciler

use async_trait::async_trait;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::errors::DownloadError;
use super::tools::{ToolManager, ToolType};
use super::utils::run_output_with_timeout;

/// Audio below this bitrate (bits/s) is re-encoded
pub const MIN_AUDIO_BITRATE: u64 = 64_000;
/// Audio below this sample rate (Hz) is re-encoded
pub const MIN_SAMPLE_RATE: u32 = 22_050;

/// First audio stream as reported by ffprobe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioStreamInfo {
    pub codec: String,
    pub sample_rate: Option<u32>,
    pub channels: Option<u32>,
    pub bit_rate: Option<u64>,
}

impl AudioStreamInfo {
    /// Parse `codec_name,sample_rate,channels,bit_rate` csv output
    pub fn parse_csv(output: &str) -> Option<Self> {
        let line = output.lines().map(str::trim).find(|l| !l.is_empty())?;
        let mut fields = line.split(',').map(str::trim);

        fn num<T: std::str::FromStr>(field: Option<&str>) -> Option<T> {
            field.filter(|f| *f != "N/A").and_then(|f| f.parse().ok())
        }

        let codec = fields.next().filter(|c| !c.is_empty())?.to_string();
        Some(Self {
            codec,
            sample_rate: num(fields.next()),
            channels: num(fields.next()),
            bit_rate: num(fields.next()),
        })
    }
}

/// Whether a file's audio has to be rebuilt.
///
/// Missing stream, unreadable bitrate, low bitrate and low sample rate all
/// count as defective.
pub fn needs_repair(audio: Option<&AudioStreamInfo>) -> bool {
    let Some(audio) = audio else {
        return true;
    };
    match audio.bit_rate {
        None => return true,
        Some(rate) if rate < MIN_AUDIO_BITRATE => return true,
        Some(_) => {}
    }
    matches!(audio.sample_rate, Some(rate) if rate < MIN_SAMPLE_RATE)
}

#[async_trait]
pub trait MediaToolkit: Send + Sync {
    /// Mux `video` and `audio` into `output`, copying video and re-encoding audio
    async fn merge(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), DownloadError>;

    /// First audio stream of `path`, `None` if the file has none
    async fn probe_audio(
        &self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<Option<AudioStreamInfo>, DownloadError>;

    /// Copy video from `input` into `output` with standard AAC audio
    async fn reencode_audio(
        &self,
        input: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), DownloadError>;
}

/// Normalized audio: 128k, 44.1 kHz, stereo, in `codec`
fn audio_args(codec: &str) -> Vec<String> {
    ["-c:a", codec, "-b:a", "128k", "-ar", "44100", "-ac", "2"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Audio encoder the output container can hold; AAC unless the extension rules it out
fn audio_codec_for(output: &Path) -> &'static str {
    let ext = output
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "mp3" => "libmp3lame",
        "opus" | "ogg" | "webm" => "libopus",
        "wav" => "pcm_s16le",
        _ => "aac",
    }
}

pub struct FfmpegToolkit {
    ffmpeg_path: String,
    ffprobe_path: String,
    ffmpeg_timeout_secs: u64,
    probe_timeout_secs: u64,
}

impl FfmpegToolkit {
    pub fn new(ffmpeg_timeout_secs: u64, probe_timeout_secs: u64) -> Self {
        let tools = ToolManager::new();
        Self {
            ffmpeg_path: tools.resolve(ToolType::Ffmpeg),
            ffprobe_path: tools.resolve(ToolType::Ffprobe),
            ffmpeg_timeout_secs,
            probe_timeout_secs,
        }
    }

    pub fn with_paths(mut self, ffmpeg: Option<String>, ffprobe: Option<String>) -> Self {
        if let Some(path) = ffmpeg {
            self.ffmpeg_path = path;
        }
        if let Some(path) = ffprobe {
            self.ffprobe_path = path;
        }
        self
    }

    fn merge_args(video: &Path, audio: &Path, output: &Path) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(),
            "-i".to_string(),
            video.to_string_lossy().into_owned(),
            "-i".to_string(),
            audio.to_string_lossy().into_owned(),
            "-c:v".to_string(),
            "copy".to_string(),
        ];
        args.extend(audio_args("aac"));
        args.extend(["-map", "0:v:0", "-map", "1:a:0"].iter().map(|s| s.to_string()));
        args.push(output.to_string_lossy().into_owned());
        args
    }

    fn reencode_args(input: &Path, output: &Path) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(),
            "-i".to_string(),
            input.to_string_lossy().into_owned(),
            "-c:v".to_string(),
            "copy".to_string(),
        ];
        args.extend(audio_args(audio_codec_for(output)));
        args.push(output.to_string_lossy().into_owned());
        args
    }

    fn probe_args(path: &Path) -> Vec<String> {
        vec![
            "-v".to_string(),
            "error".to_string(),
            "-select_streams".to_string(),
            "a:0".to_string(),
            "-show_entries".to_string(),
            "stream=codec_name,sample_rate,channels,bit_rate".to_string(),
            "-of".to_string(),
            "csv=p=0".to_string(),
            path.to_string_lossy().into_owned(),
        ]
    }

    async fn run_ffmpeg(
        &self,
        args: Vec<String>,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), DownloadError> {
        let out =
            run_output_with_timeout(&self.ffmpeg_path, args, self.ffmpeg_timeout_secs, cancel)
                .await?;
        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            let tail: Vec<&str> = stderr.lines().rev().take(3).collect();
            return Err(DownloadError::Reconciliation(format!(
                "ffmpeg exited with {}: {}",
                out.status,
                tail.into_iter().rev().collect::<Vec<_>>().join(" | ")
            )));
        }
        let written = tokio::fs::metadata(output).await.map(|m| m.len()).unwrap_or(0);
        if written == 0 {
            return Err(DownloadError::Reconciliation(format!(
                "ffmpeg produced no output at {}",
                output.display()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl MediaToolkit for FfmpegToolkit {
    async fn merge(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), DownloadError> {
        debug!(video = %video.display(), audio = %audio.display(), "merging streams");
        self.run_ffmpeg(Self::merge_args(video, audio, output), output, cancel)
            .await
    }

    async fn probe_audio(
        &self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<Option<AudioStreamInfo>, DownloadError> {
        let out = run_output_with_timeout(
            &self.ffprobe_path,
            Self::probe_args(path),
            self.probe_timeout_secs,
            cancel,
        )
        .await?;
        if !out.status.success() {
            return Err(DownloadError::Reconciliation(format!(
                "ffprobe failed on {}: {}",
                path.display(),
                String::from_utf8_lossy(&out.stderr).trim()
            )));
        }
        Ok(AudioStreamInfo::parse_csv(&String::from_utf8_lossy(
            &out.stdout,
        )))
    }

    async fn reencode_audio(
        &self,
        input: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), DownloadError> {
        debug!(input = %input.display(), "re-encoding audio");
        self.run_ffmpeg(Self::reencode_args(input, output), output, cancel)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn info(sample_rate: Option<u32>, bit_rate: Option<u64>) -> AudioStreamInfo {
        AudioStreamInfo {
            codec: "aac".into(),
            sample_rate,
            channels: Some(2),
            bit_rate,
        }
    }

    #[test]
    fn test_parse_csv() {
        let parsed = AudioStreamInfo::parse_csv("aac,44100,2,128000\n").unwrap();
        assert_eq!(parsed, info(Some(44100), Some(128_000)));

        let parsed = AudioStreamInfo::parse_csv("opus,48000,2,N/A").unwrap();
        assert_eq!(parsed.bit_rate, None);

        assert!(AudioStreamInfo::parse_csv("").is_none());
        assert!(AudioStreamInfo::parse_csv("\n  \n").is_none());
    }

    #[test]
    fn test_needs_repair() {
        assert!(needs_repair(None));
        assert!(needs_repair(Some(&info(Some(44100), None))));
        assert!(needs_repair(Some(&info(Some(44100), Some(32_000)))));
        assert!(needs_repair(Some(&info(Some(16000), Some(128_000)))));
        assert!(!needs_repair(Some(&info(Some(44100), Some(128_000)))));
        assert!(!needs_repair(Some(&info(Some(22050), Some(64_000)))));
        // Unknown sample rate alone is tolerated
        assert!(!needs_repair(Some(&info(None, Some(96_000)))));
    }

    #[test]
    fn test_merge_args_normalize_audio() {
        let args = FfmpegToolkit::merge_args(
            &PathBuf::from("a.f137.mp4"),
            &PathBuf::from("a.f140.m4a"),
            &PathBuf::from("a.mp4"),
        );
        let joined = args.join(" ");
        assert!(joined.contains("-c:v copy -c:a aac -b:a 128k -ar 44100 -ac 2"));
        assert_eq!(args.last().map(String::as_str), Some("a.mp4"));
    }

    #[test]
    fn test_reencode_codec_follows_container() {
        let args = FfmpegToolkit::reencode_args(Path::new("a.mp4"), Path::new(".a.repair.mp4"));
        assert!(args.join(" ").contains("-c:v copy -c:a aac -b:a 128k"));

        assert_eq!(audio_codec_for(Path::new("song.mp3")), "libmp3lame");
        assert_eq!(audio_codec_for(Path::new("clip.WEBM")), "libopus");
        assert_eq!(audio_codec_for(Path::new("song.m4a")), "aac");
    }

    #[tokio::test]
    async fn test_missing_ffprobe_is_error() {
        let toolkit = FfmpegToolkit::new(5, 5)
            .with_paths(None, Some("definitely-not-ffprobe-xyz".to_string()));
        let err = toolkit
            .probe_audio(Path::new("x.mp4"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::ToolNotFound(_)));
    }
}
