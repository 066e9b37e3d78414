//! Library defaults
//!
//! Default header values, timeouts, and redirect limits shared by the
//! client builder and the wire-request builder.

use std::time::Duration;

/// Default per-request timeout.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Default maximum number of followed redirect hops per logical request.
pub const MAX_REDIRECTS: u32 = 10;

/// Default maximum number of transport attempts per request.
pub const MAX_RETRIES: u32 = 1;

/// Default `Accept-Encoding` value advertised on every request.
pub const ACCEPT_ENCODING: &str = "br;q=1.0, gzip;q=0.9, deflate;q=0.8";

/// How many host-locale languages the default `Accept-Language` carries.
const ACCEPT_LANGUAGE_TOP_N: usize = 6;

/// `User-Agent` following RFC 7231 section 5.5.3: product/version plus a
/// platform comment.
pub fn user_agent() -> String {
    format!(
        "{}/{} ({}; {})",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}

/// `Accept-Language` built from the host locale: the top preferred languages
/// with quality factors `q = 1 - 0.1 * rank`, clamped at 0.1.
pub fn accept_language() -> String {
    let languages = host_languages();
    languages
        .iter()
        .take(ACCEPT_LANGUAGE_TOP_N)
        .enumerate()
        .map(|(rank, lang)| {
            let quality = (1.0 - 0.1 * rank as f64).max(0.1);
            format!("{lang};q={quality:.1}")
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Preferred languages of the host process, most preferred first.
///
/// `LANGUAGE` (colon-separated) wins over `LC_ALL` over `LANG`; the C locale
/// and empty values fall back to `en`.
fn host_languages() -> Vec<String> {
    let raw = std::env::var("LANGUAGE")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(|v| v.split(':').map(str::to_string).collect::<Vec<_>>())
        .or_else(|| {
            std::env::var("LC_ALL")
                .or_else(|_| std::env::var("LANG"))
                .ok()
                .map(|v| vec![v])
        })
        .unwrap_or_default();

    let mut languages: Vec<String> = raw
        .into_iter()
        .filter_map(|entry| {
            // "en_US.UTF-8" -> "en-US"
            let tag = entry.split('.').next()?.trim().replace('_', "-");
            if tag.is_empty() || tag == "C" || tag == "POSIX" {
                None
            } else {
                Some(tag)
            }
        })
        .collect();
    languages.dedup();
    if languages.is_empty() {
        languages.push("en".to_string());
    }
    languages
}
