// FormatSelector - resolver format choice
//
// Turns a quality preference into a yt-dlp format spec, and an info dump
// into the single URL the fetcher should use:
// - platform format lists take priority over generic height caps
// - muxed progressive formats can be streamed directly
// - split video/audio and HLS/DASH go through resolver download mode

use super::extractors::{ExtendedFormat, ResolvedInfo};
use super::models::{Delivery, Quality};
use super::platforms::PlatformProfile;
use super::utils::infer_extension;

/// Chosen media URL and how to fetch it
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedMedia {
    pub url: String,
    pub ext: String,
    pub delivery: Delivery,
}

/// Format selector with H.264 preference
pub struct FormatSelector;

impl FormatSelector {
    /// yt-dlp format spec for a platform and quality preference
    pub fn format_spec(profile: &PlatformProfile, quality: Quality) -> String {
        let listed = match quality {
            Quality::High => profile.formats.high,
            Quality::Medium => profile.formats.medium,
            Quality::Low => profile.formats.low,
        };
        if !listed.is_empty() {
            let mut spec = listed.join("/");
            if !listed.contains(&"best") && !listed.contains(&"worst") {
                spec.push_str("/best");
            }
            return spec;
        }
        Self::get_format_spec(quality)
    }

    /// Get generic format spec for yt-dlp based on quality value
    pub fn get_format_spec(quality: Quality) -> String {
        match quality {
            Quality::High => "bv*+ba/best".to_string(),
            Quality::Medium => "bv*[height<=720]+ba/b[height<=720]/bv*+ba/best".to_string(),
            Quality::Low => "bv*[height<=480]+ba/b[height<=480]/worst".to_string(),
        }
    }

    /// Pick the URL to fetch from an info dump
    pub fn select(info: &ResolvedInfo) -> Option<SelectedMedia> {
        let fallback_ext = info.ext.clone().unwrap_or_else(|| "mp4".to_string());

        // Resolver picked separate streams: only it can merge them
        if info.requested_formats.len() > 1 {
            let url = info
                .requested_formats
                .iter()
                .find_map(|f| f.url.clone())
                .unwrap_or_else(|| info.webpage_url.clone());
            return Some(SelectedMedia {
                url,
                ext: fallback_ext,
                delivery: Delivery::Split,
            });
        }

        if let Some(url) = &info.url {
            return Some(SelectedMedia {
                url: url.clone(),
                ext: fallback_ext,
                delivery: Self::delivery_for(info.protocol.as_deref(), url),
            });
        }

        let muxed: Vec<&ExtendedFormat> = info
            .formats
            .iter()
            .filter(|f| f.is_muxed() && f.is_progressive())
            .collect();
        if let Some(best) = Self::find_best_video(&muxed) {
            let url = best.url.clone()?;
            let ext = if best.ext.is_empty() {
                infer_extension(&url)
            } else {
                best.ext.clone()
            };
            return Some(SelectedMedia {
                url,
                ext,
                delivery: Delivery::Progressive,
            });
        }

        // Anything with a URL still tells us the page is resolvable
        info.formats.iter().rev().find_map(|f| {
            f.url.as_ref().map(|url| SelectedMedia {
                url: url.clone(),
                ext: fallback_ext.clone(),
                delivery: Delivery::Manifest,
            })
        })
    }

    fn delivery_for(protocol: Option<&str>, url: &str) -> Delivery {
        let segmented = protocol.map_or(false, |p| {
            p.starts_with("m3u8") || p.contains("dash") || p.contains('+')
        });
        if segmented || url.contains(".m3u8") || url.contains(".mpd") {
            Delivery::Manifest
        } else {
            Delivery::Progressive
        }
    }

    /// Find best video format (highest resolution with H.264 preference)
    fn find_best_video<'a>(formats: &[&'a ExtendedFormat]) -> Option<&'a ExtendedFormat> {
        // First try to find best H.264 (most compatible)
        let best_h264 = formats
            .iter()
            .filter(|f| f.is_h264())
            .max_by_key(|f| f.height.unwrap_or(0));

        if let Some(h264) = best_h264 {
            // Check if there's a significantly higher resolution in other codecs
            let best_any = formats.iter().max_by_key(|f| f.height.unwrap_or(0));

            if let Some(any) = best_any {
                let h264_height = h264.height.unwrap_or(0);
                let any_height = any.height.unwrap_or(0);

                if any_height > h264_height * 3 / 2 {
                    return Some(any);
                }
            }

            return Some(h264);
        }

        // Fallback to highest resolution, then largest file
        formats
            .iter()
            .max_by_key(|f| (f.height.unwrap_or(0), f.effective_size().unwrap_or(0)))
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::platforms::{profile, PlatformId};

    fn make_muxed_format(height: u32, vcodec: &str) -> ExtendedFormat {
        ExtendedFormat {
            format_id: format!("{}p", height),
            ext: "mp4".to_string(),
            url: Some(format!("https://cdn.example.com/{}.mp4", height)),
            protocol: Some("https".to_string()),
            width: Some(height * 16 / 9),
            height: Some(height),
            vcodec: Some(vcodec.to_string()),
            acodec: Some("mp4a.40.2".to_string()),
            ..Default::default()
        }
    }

    fn make_video_only(height: u32) -> ExtendedFormat {
        ExtendedFormat {
            acodec: Some("none".to_string()),
            video_only: true,
            ..make_muxed_format(height, "avc1.640028")
        }
    }

    #[test]
    fn test_platform_formats_take_priority() {
        let spec = FormatSelector::format_spec(profile(PlatformId::Bilibili), Quality::High);
        assert_eq!(spec, "100024+30280/100023+30232/100022+30216/best");
        let low = FormatSelector::format_spec(profile(PlatformId::Bilibili), Quality::Low);
        assert_eq!(low, "16+30216/worst");
    }

    #[test]
    fn test_generic_spec_when_platform_has_none() {
        let spec = FormatSelector::format_spec(profile(PlatformId::Sohu), Quality::Medium);
        assert!(spec.contains("height<=720"));
    }

    #[test]
    fn test_h264_preference() {
        let formats = vec![
            make_muxed_format(1080, "vp9"),
            make_muxed_format(1080, "avc1.4d401f"),
        ];

        let refs: Vec<&ExtendedFormat> = formats.iter().collect();
        let best = FormatSelector::find_best_video(&refs);

        assert!(best.unwrap().is_h264());
    }

    #[test]
    fn test_select_top_level_url() {
        let info = ResolvedInfo {
            url: Some("https://cdn.example.com/a.mp4".into()),
            ext: Some("mp4".into()),
            protocol: Some("https".into()),
            ..Default::default()
        };
        let sel = FormatSelector::select(&info).unwrap();
        assert_eq!(sel.delivery, Delivery::Progressive);
        assert_eq!(sel.url, "https://cdn.example.com/a.mp4");
    }

    #[test]
    fn test_select_hls_is_manifest() {
        let info = ResolvedInfo {
            url: Some("https://cdn.example.com/index.m3u8".into()),
            protocol: Some("m3u8_native".into()),
            ..Default::default()
        };
        assert_eq!(FormatSelector::select(&info).unwrap().delivery, Delivery::Manifest);
    }

    #[test]
    fn test_select_split_streams() {
        let audio = ExtendedFormat {
            vcodec: Some("none".into()),
            audio_only: true,
            ..make_muxed_format(0, "none")
        };
        let info = ResolvedInfo {
            requested_formats: vec![make_video_only(1080), audio],
            ext: Some("mp4".into()),
            ..Default::default()
        };
        assert_eq!(FormatSelector::select(&info).unwrap().delivery, Delivery::Split);
    }

    #[test]
    fn test_select_prefers_muxed_progressive() {
        let info = ResolvedInfo {
            formats: vec![
                make_video_only(1080),
                make_muxed_format(360, "avc1.42001E"),
                make_muxed_format(720, "avc1.64001F"),
            ],
            ..Default::default()
        };
        let sel = FormatSelector::select(&info).unwrap();
        assert_eq!(sel.url, "https://cdn.example.com/720.mp4");
        assert_eq!(sel.delivery, Delivery::Progressive);
    }

    #[test]
    fn test_select_nothing() {
        assert!(FormatSelector::select(&ResolvedInfo::default()).is_none());
    }
}
