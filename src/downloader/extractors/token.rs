// Identifier recovery from page URLs
//
// Some platforms hide the numeric video id inside a base64 path segment.
// Decoding is best effort: any failure simply means "no identifier".

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;

use crate::downloader::platforms::{PlatformProfile, TokenScheme};

const LENIENT_CONFIG: GeneralPurposeConfig = GeneralPurposeConfig::new()
    .with_decode_padding_mode(DecodePaddingMode::Indifferent)
    .with_decode_allow_trailing_bits(true);

const LENIENT_STANDARD: GeneralPurpose = GeneralPurpose::new(&alphabet::STANDARD, LENIENT_CONFIG);
const LENIENT_URL_SAFE: GeneralPurpose = GeneralPurpose::new(&alphabet::URL_SAFE, LENIENT_CONFIG);

lazy_static! {
    static ref SHTML_ID_RE: Regex = Regex::new(r"/(\d+)\.shtml").unwrap();
}

/// Recover the platform's video identifier from `url`
pub fn extract_identifier(profile: &PlatformProfile, url: &str) -> Option<String> {
    let id = match profile.token {
        TokenScheme::None => None,
        TokenScheme::Base64Path => decode_path_token(url)
            .and_then(|inner| SHTML_ID_RE.captures(&inner).map(|c| c[1].to_string())),
        TokenScheme::QueryParam(name) => url::Url::parse(url).ok().and_then(|u| {
            u.query_pairs()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.into_owned())
                .filter(|v| !v.is_empty())
        }),
        TokenScheme::PathPattern(pattern) => Regex::new(pattern)
            .ok()
            .and_then(|re| {
                let path = url::Url::parse(url).ok()?.path().to_string();
                re.captures(&path).map(|c| c[1].to_string())
            }),
    };
    debug!(platform = %profile.id, identifier = ?id, "identifier lookup");
    id
}

/// Decode the last path segment (minus `.html`) as base64 text
pub fn decode_path_token(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.filter(|s| !s.is_empty()).last()?;
    let token = segment
        .strip_suffix(".html")
        .or_else(|| segment.strip_suffix(".shtml"))
        .unwrap_or(segment);
    if token.is_empty() {
        return None;
    }

    let bytes = LENIENT_STANDARD
        .decode(token)
        .or_else(|_| LENIENT_URL_SAFE.decode(token))
        .ok()?;
    String::from_utf8(bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::platforms::{profile, PlatformId};

    const SOHU: &str = "https://tv.sohu.com/v/dXMvMzM1OTQxNzQ3LzM5NzAwNjYyLnNodG1s.html";

    #[test]
    fn test_decode_sohu_token() {
        assert_eq!(
            decode_path_token(SOHU).as_deref(),
            Some("us/335941747/39700662.shtml")
        );
        assert_eq!(
            extract_identifier(profile(PlatformId::Sohu), SOHU).as_deref(),
            Some("39700662")
        );
    }

    #[test]
    fn test_undecodable_token_is_none() {
        let url = "https://tv.sohu.com/v/!!!not-base64!!!.html";
        assert_eq!(extract_identifier(profile(PlatformId::Sohu), url), None);
        // Decodes, but carries no numeric id
        let url = "https://tv.sohu.com/v/aGVsbG8.html";
        assert_eq!(extract_identifier(profile(PlatformId::Sohu), url), None);
    }

    #[test]
    fn test_query_param_identifier() {
        let url = "https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=1";
        assert_eq!(
            extract_identifier(profile(PlatformId::YouTube), url).as_deref(),
            Some("dQw4w9WgXcQ")
        );
        assert_eq!(
            extract_identifier(profile(PlatformId::Kan360), "https://www.360kan.com/m/x.html"),
            None
        );
    }

    #[test]
    fn test_path_pattern_identifier() {
        let url = "https://www.bilibili.com/video/BV1xx411c7mD?p=1";
        assert_eq!(
            extract_identifier(profile(PlatformId::Bilibili), url).as_deref(),
            Some("BV1xx411c7mD")
        );
    }
}
