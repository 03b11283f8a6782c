// Resolver diagnostics - classifies yt-dlp stderr so chain failure
// reasons say why the resolver gave up

use serde::{Deserialize, Serialize};

/// Reasons a resolver run can fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    /// HTTP 403 Forbidden - general access denied
    Http403Forbidden,

    /// Geographic restriction
    GeoBlocked,

    /// Network timeout (soft IP block)
    NetworkTimeout,

    /// Rate limiting (429 or similar)
    RateLimited,

    /// Bot detection / captcha
    BotDetection,

    /// Login, membership or age check required
    LoginRequired,

    /// Video deleted or unavailable
    VideoUnavailable,

    /// DRM-protected content
    DrmProtected,

    /// Resolver has no extractor for the site
    UnsupportedUrl,

    /// Page resolved but no format matched the request
    NoFormats,

    Unknown,
}

impl FailureReason {
    /// Check if the same request may work later or via another route
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Http403Forbidden
                | Self::NetworkTimeout
                | Self::RateLimited
                | Self::BotDetection
        )
    }

    /// Another strategy (browser or scrape) can still find the media
    pub fn page_fallback_might_work(&self) -> bool {
        !matches!(
            self,
            Self::DrmProtected | Self::VideoUnavailable | Self::LoginRequired | Self::GeoBlocked
        )
    }

    /// Human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            Self::Http403Forbidden => "Access denied (HTTP 403)",
            Self::GeoBlocked => "Geographic restriction",
            Self::NetworkTimeout => "Network timeout",
            Self::RateLimited => "Rate limited by site",
            Self::BotDetection => "Bot detection triggered",
            Self::LoginRequired => "Login required",
            Self::VideoUnavailable => "Video unavailable",
            Self::DrmProtected => "DRM-protected content",
            Self::UnsupportedUrl => "Site not supported by resolver",
            Self::NoFormats => "No matching formats",
            Self::Unknown => "Unknown failure",
        }
    }
}

/// Detailed diagnostics information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverDiagnostics {
    /// Primary failure reason
    pub reason: FailureReason,

    /// First useful line of the error output
    pub context: Option<String>,

    /// Raw error patterns that matched
    pub matched_patterns: Vec<String>,
}

impl ResolverDiagnostics {
    /// Short form used in chain failure reasons
    pub fn summary(&self) -> String {
        match &self.context {
            Some(ctx) => format!("{} ({})", self.reason.description(), ctx),
            None => self.reason.description().to_string(),
        }
    }
}

/// Stderr fragments per reason, checked top to bottom (most specific first)
const RULES: &[(FailureReason, &[&str])] = &[
    (
        FailureReason::DrmProtected,
        &["drm", "widevine", "playready", "fairplay", "encrypted media"],
    ),
    (
        FailureReason::UnsupportedUrl,
        &["unsupported url", "no suitable extractor"],
    ),
    (
        FailureReason::NoFormats,
        &["requested format is not available", "no video formats found"],
    ),
    (
        FailureReason::LoginRequired,
        &["sign in", "login required", "members only", "age-restricted", "cookies"],
    ),
    (
        FailureReason::VideoUnavailable,
        &[
            "video unavailable",
            "video is unavailable",
            "has been removed",
            "no longer available",
            "private video",
        ],
    ),
    (
        FailureReason::GeoBlocked,
        &["not available in your country", "blocked in your country", "geo restrict", "geo-restrict"],
    ),
    (
        FailureReason::RateLimited,
        &["429", "rate limit", "too many requests"],
    ),
    (
        FailureReason::BotDetection,
        &["captcha", "unusual traffic", "not a bot"],
    ),
    (FailureReason::Http403Forbidden, &["403", "forbidden"]),
    (
        FailureReason::NetworkTimeout,
        &["timeout", "timed out", "connection refused", "network unreachable"],
    ),
];

/// Classify resolver stderr; `None` for empty output
pub fn diagnose_error(error: &str) -> Option<FailureReason> {
    if error.trim().is_empty() {
        return None;
    }
    let lower = error.to_lowercase();
    let reason = RULES
        .iter()
        .find(|(_, needles)| needles.iter().any(|n| lower.contains(n)))
        .map(|(reason, _)| *reason)
        .unwrap_or(FailureReason::Unknown);
    Some(reason)
}

/// Reason, the `ERROR:` line and every rule fragment that matched
pub fn analyze_error(error: &str) -> ResolverDiagnostics {
    let lower = error.to_lowercase();
    let matched_patterns = RULES
        .iter()
        .flat_map(|(_, needles)| needles.iter())
        .filter(|n| lower.contains(*n))
        .map(|n| n.to_string())
        .collect();

    let context = error
        .lines()
        .map(str::trim)
        .find(|l| l.to_lowercase().starts_with("error:"))
        .map(|s| s.chars().take(200).collect());

    ResolverDiagnostics {
        reason: diagnose_error(error).unwrap_or(FailureReason::Unknown),
        context,
        matched_patterns,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_403_detection() {
        let error = "ERROR: HTTP Error 403: Forbidden";
        assert_eq!(diagnose_error(error), Some(FailureReason::Http403Forbidden));
    }

    #[test]
    fn test_unsupported_url_detection() {
        let error = "ERROR: Unsupported URL: https://www.pinshan.com/video/1.html";
        assert_eq!(diagnose_error(error), Some(FailureReason::UnsupportedUrl));
        assert!(FailureReason::UnsupportedUrl.page_fallback_might_work());
    }

    #[test]
    fn test_no_formats_detection() {
        let error = "ERROR: [BiliBili] BV1xx: Requested format is not available";
        assert_eq!(diagnose_error(error), Some(FailureReason::NoFormats));
    }

    #[test]
    fn test_timeout_detection() {
        let error = "yt-dlp timed out";
        assert_eq!(diagnose_error(error), Some(FailureReason::NetworkTimeout));
    }

    #[test]
    fn test_geo_detection() {
        let error = "Video not available in your country";
        assert_eq!(diagnose_error(error), Some(FailureReason::GeoBlocked));
    }

    #[test]
    fn test_drm_detection() {
        let error = "This video is DRM protected";
        assert_eq!(diagnose_error(error), Some(FailureReason::DrmProtected));
        assert!(!FailureReason::DrmProtected.page_fallback_might_work());
    }

    #[test]
    fn test_empty_is_none() {
        assert_eq!(diagnose_error("  "), None);
    }

    #[test]
    fn test_analyze_picks_error_line() {
        let diag = analyze_error("[generic] foo\nERROR: HTTP Error 404: Not Found\n");
        assert_eq!(diag.context.as_deref(), Some("ERROR: HTTP Error 404: Not Found"));
        assert_eq!(diag.reason, FailureReason::Unknown);
        assert!(diag.summary().starts_with("Unknown failure ("));
    }

    #[test]
    fn test_analyze_collects_all_matches() {
        let diag = analyze_error("ERROR: HTTP Error 403: Forbidden (rate limit?)");
        // Rate limiting is checked before the generic 403 rule
        assert_eq!(diag.reason, FailureReason::RateLimited);
        assert!(diag.matched_patterns.contains(&"403".to_string()));
        assert!(diag.matched_patterns.contains(&"forbidden".to_string()));
    }
}
