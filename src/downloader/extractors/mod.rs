// Extraction strategies - resolver, browser automation and raw page scrape
//
// Each strategy implements ExtractionStrategy; platforms pick their order
// in the static profile table. The resolver also serves the fetcher in
// download mode through the ResolverTool seam.

mod browser;
mod diagnostics;
mod resolver;
mod scrape;
mod token;
mod traits;

pub use browser::{BrowserOptions, BrowserSession, BrowserStrategy};
pub use diagnostics::{analyze_error, diagnose_error, FailureReason, ResolverDiagnostics};
pub use resolver::{parse_ytdlp_progress, ResolverStrategy, YtDlp};
pub use scrape::{is_plausible_media_url, scan_page, PageScan, PageScrapeStrategy};
pub use token::{decode_path_token, extract_identifier};
pub use traits::{
    ExtendedFormat, ExtractorConfig, ResolveRequest, ResolvedInfo, ResolverTool,
    DEFAULT_USER_AGENT,
};
