// Site classifier - static platform table and URL → profile lookup
//
// The table is immutable and ordered; the first profile whose domain
// fragment matches the URL host wins. No network access happens here.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::models::StrategyKind::{self, Browser, Resolver, Scrape};

/// Known platforms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformId {
    Bilibili,
    Sohu,
    #[serde(rename = "360kan")]
    Kan360,
    BaiduBaike,
    Pinshan,
    #[serde(rename = "youtube")]
    YouTube,
}

impl PlatformId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bilibili => "bilibili",
            Self::Sohu => "sohu",
            Self::Kan360 => "360kan",
            Self::BaiduBaike => "baidu_baike",
            Self::Pinshan => "pinshan",
            Self::YouTube => "youtube",
        }
    }
}

impl fmt::Display for PlatformId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an identifier is recovered from the page URL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenScheme {
    None,
    /// Base64 path segment wrapping an inner `/<digits>.shtml` path
    Base64Path,
    /// Identifier carried in a query parameter
    QueryParam(&'static str),
    /// Identifier matched from the URL path
    PathPattern(&'static str),
}

/// Resolver format lists per quality preference
#[derive(Debug, Clone, Copy)]
pub struct QualityFormats {
    pub high: &'static [&'static str],
    pub medium: &'static [&'static str],
    pub low: &'static [&'static str],
}

impl QualityFormats {
    const EMPTY: Self = Self {
        high: &[],
        medium: &[],
        low: &[],
    };
}

/// Per-platform extraction configuration
#[derive(Debug, Clone)]
pub struct PlatformProfile {
    pub id: PlatformId,
    pub name: &'static str,
    /// Host fragments matched against the URL host
    pub domains: &'static [&'static str],
    /// Ordered strategy chain
    pub strategies: &'static [StrategyKind],
    /// Referer header sent with every request for this platform
    pub referer: &'static str,
    /// Minimum spacing between consecutive task starts on this platform
    pub rate_limit: Duration,
    /// Iframe hosts that carry the real player
    pub embed_hosts: &'static [&'static str],
    pub token: TokenScheme,
    /// File name prefix for fetched media
    pub file_prefix: &'static str,
    /// Page-data probe endpoint with `{secondId}` and `{lemmaId}` placeholders
    pub page_data_api: Option<&'static str>,
    /// Page text meaning the video is gone
    pub error_markers: &'static [&'static str],
    pub formats: QualityFormats,
}

impl PlatformProfile {
    /// Whether `host` belongs to this platform
    pub fn matches_host(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        self.domains.iter().any(|d| {
            host == *d || host.ends_with(&format!(".{}", d))
        })
    }
}

/// Platform table in classification order
pub static PLATFORMS: &[PlatformProfile] = &[
    PlatformProfile {
        id: PlatformId::Bilibili,
        name: "Bilibili",
        domains: &["bilibili.com", "b23.tv"],
        strategies: &[Resolver, Scrape],
        referer: "https://www.bilibili.com/",
        rate_limit: Duration::from_millis(1000),
        embed_hosts: &[],
        token: TokenScheme::PathPattern(r"(BV[0-9A-Za-z]{10})"),
        file_prefix: "bilibili",
        page_data_api: None,
        error_markers: &[],
        formats: QualityFormats {
            high: &["100024+30280", "100023+30232", "100022+30216"],
            medium: &["80+30280", "64+30216", "32+30216"],
            low: &["16+30216", "worst"],
        },
    },
    PlatformProfile {
        id: PlatformId::Sohu,
        name: "Sohu Video",
        domains: &["sohu.com"],
        strategies: &[Resolver, Browser, Scrape],
        referer: "https://tv.sohu.com/",
        rate_limit: Duration::from_millis(2000),
        embed_hosts: &[],
        token: TokenScheme::Base64Path,
        file_prefix: "sohu",
        page_data_api: None,
        error_markers: &[],
        formats: QualityFormats::EMPTY,
    },
    PlatformProfile {
        id: PlatformId::Kan360,
        name: "360kan Video",
        domains: &["360kan.com"],
        strategies: &[Resolver, Browser, Scrape],
        referer: "https://tv.360kan.com/",
        rate_limit: Duration::from_millis(2000),
        embed_hosts: &["le.com"],
        token: TokenScheme::QueryParam("id"),
        file_prefix: "360kan",
        page_data_api: None,
        error_markers: &[],
        formats: QualityFormats::EMPTY,
    },
    PlatformProfile {
        id: PlatformId::BaiduBaike,
        name: "Baidu Baike",
        domains: &["baike.baidu.com"],
        strategies: &[Resolver, Scrape],
        referer: "https://baike.baidu.com/",
        rate_limit: Duration::from_millis(1000),
        embed_hosts: &[],
        token: TokenScheme::PathPattern(r"/(\d+)(?:[/?#]|$)"),
        file_prefix: "baidu",
        page_data_api: Some(
            "https://baike.baidu.com/api/videoinfo?secondId={secondId}&lemmaId={lemmaId}",
        ),
        error_markers: &["你找的视频出错啦"],
        formats: QualityFormats::EMPTY,
    },
    PlatformProfile {
        id: PlatformId::Pinshan,
        name: "Pinshan",
        domains: &["pinshan.com"],
        strategies: &[Resolver, Scrape],
        referer: "https://www.pinshan.com/",
        rate_limit: Duration::from_millis(1000),
        embed_hosts: &[],
        token: TokenScheme::None,
        file_prefix: "pinshan",
        page_data_api: None,
        error_markers: &[],
        formats: QualityFormats::EMPTY,
    },
    PlatformProfile {
        id: PlatformId::YouTube,
        name: "YouTube",
        domains: &["youtube.com", "youtu.be"],
        strategies: &[Resolver],
        referer: "https://www.youtube.com/",
        rate_limit: Duration::from_millis(1000),
        embed_hosts: &[],
        token: TokenScheme::QueryParam("v"),
        file_prefix: "youtube",
        page_data_api: None,
        error_markers: &[],
        formats: QualityFormats::EMPTY,
    },
];

/// Classify a URL; `None` means Unknown
pub fn classify(url: &str) -> Option<&'static PlatformProfile> {
    let parsed = url::Url::parse(url.trim()).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    let host = parsed.host_str()?;
    PLATFORMS.iter().find(|p| p.matches_host(host))
}

/// Lookup by id
pub fn profile(id: PlatformId) -> &'static PlatformProfile {
    PLATFORMS
        .iter()
        .find(|p| p.id == id)
        .unwrap_or(&PLATFORMS[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_known_hosts() {
        let cases = [
            ("https://www.bilibili.com/video/BV1xx411c7mD", PlatformId::Bilibili),
            ("https://tv.sohu.com/v/dXMvMzM1OTQxNzQ3LzM5NzAwNjYyLnNodG1s.html", PlatformId::Sohu),
            ("https://www.360kan.com/m/haPkY0osSHX5Tx.html", PlatformId::Kan360),
            ("https://baike.baidu.com/item/foo/123", PlatformId::BaiduBaike),
            ("http://www.pinshan.com/video/1.html", PlatformId::Pinshan),
            ("https://youtu.be/dQw4w9WgXcQ", PlatformId::YouTube),
            ("https://m.youtube.com/watch?v=dQw4w9WgXcQ", PlatformId::YouTube),
        ];
        for (url, expected) in cases {
            assert_eq!(classify(url).map(|p| p.id), Some(expected), "{}", url);
        }
    }

    #[test]
    fn test_classify_unknown() {
        assert!(classify("https://example.com/video.mp4").is_none());
        assert!(classify("not a url").is_none());
        assert!(classify("ftp://www.bilibili.com/x").is_none());
    }

    #[test]
    fn test_domain_fragment_must_be_suffix() {
        // A lookalike host must not match
        assert!(classify("https://bilibili.com.evil.net/x").is_none());
        assert!(classify("https://notbilibili.com/x").is_none());
    }

    #[test]
    fn test_every_profile_has_a_strategy() {
        for p in PLATFORMS {
            assert!(!p.strategies.is_empty(), "{}", p.name);
            assert_eq!(profile(p.id).id, p.id);
        }
    }
}
