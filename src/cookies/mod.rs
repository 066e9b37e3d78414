//! Cookie storage
//!
//! An in-process cookie store shared by the real transport path and stub
//! synthesis, so stubbed exchanges install and replay cookies exactly like
//! wire exchanges. The store is internally locked and safe to share.

use std::collections::HashMap;
use std::sync::Mutex;

use cookie::Cookie;
use url::Url;

/// Thread-safe cookie store keyed by host.
#[derive(Debug, Default)]
pub struct CookieStore {
    inner: Mutex<HashMap<String, Vec<Cookie<'static>>>>,
}

impl CookieStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and install every `Set-Cookie` value of a response, keyed by
    /// the request URL. A `Max-Age=0` cookie removes its stored namesake.
    pub fn store_response_cookies(&self, url: &Url, set_cookie_values: &[String]) {
        let Some(host) = url.host_str() else { return };
        let mut inner = self.inner.lock().expect("cookie store lock poisoned");
        for raw in set_cookie_values {
            let Ok(parsed) = Cookie::parse(raw.clone()) else {
                continue;
            };
            let parsed = parsed.into_owned();
            let key = parsed
                .domain()
                .map(|d| d.trim_start_matches('.').to_string())
                .unwrap_or_else(|| host.to_string());
            let jar = inner.entry(key).or_default();
            jar.retain(|c| c.name() != parsed.name() || c.path() != parsed.path());
            let expired = parsed
                .max_age()
                .map(|age| age.is_zero())
                .unwrap_or(false);
            if !expired {
                jar.push(parsed);
            }
        }
    }

    /// Install a single cookie for a URL.
    pub fn add(&self, url: &Url, cookie: Cookie<'static>) {
        if let Some(host) = url.host_str() {
            let mut inner = self.inner.lock().expect("cookie store lock poisoned");
            let jar = inner.entry(host.to_string()).or_default();
            jar.retain(|c| c.name() != cookie.name() || c.path() != cookie.path());
            jar.push(cookie);
        }
    }

    /// Cookies applicable to a URL (host match plus path prefix).
    pub fn cookies_for(&self, url: &Url) -> Vec<Cookie<'static>> {
        let Some(host) = url.host_str() else {
            return Vec::new();
        };
        let path = url.path();
        let inner = self.inner.lock().expect("cookie store lock poisoned");
        inner
            .iter()
            .filter(|(domain, _)| {
                host == domain.as_str() || host.ends_with(&format!(".{domain}"))
            })
            .flat_map(|(_, jar)| jar.iter())
            .filter(|c| path.starts_with(c.path().unwrap_or("/")))
            .cloned()
            .collect()
    }

    /// Value for the outgoing `Cookie` header, if any cookie applies.
    pub fn cookie_header(&self, url: &Url) -> Option<String> {
        let cookies = self.cookies_for(url);
        if cookies.is_empty() {
            return None;
        }
        Some(
            cookies
                .iter()
                .map(|c| format!("{}={}", c.name(), c.value()))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    pub fn clear(&self) {
        self.inner.lock().expect("cookie store lock poisoned").clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn stored_cookies_replay_on_matching_host() {
        let store = CookieStore::new();
        let u = url("https://api.example.com/v1/login");
        store.store_response_cookies(&u, &["session=abc123; Path=/".to_string()]);
        assert_eq!(
            store.cookie_header(&url("https://api.example.com/v1/user")),
            Some("session=abc123".to_string())
        );
        assert_eq!(store.cookie_header(&url("https://other.com/")), None);
    }

    #[test]
    fn path_scoping_is_honored() {
        let store = CookieStore::new();
        let u = url("https://example.com/admin/login");
        store.store_response_cookies(&u, &["admin=1; Path=/admin".to_string()]);
        assert!(store.cookie_header(&url("https://example.com/admin/panel")).is_some());
        assert!(store.cookie_header(&url("https://example.com/public")).is_none());
    }

    #[test]
    fn same_name_replaces_and_max_age_zero_removes() {
        let store = CookieStore::new();
        let u = url("https://example.com/");
        store.store_response_cookies(&u, &["t=1".to_string()]);
        store.store_response_cookies(&u, &["t=2".to_string()]);
        assert_eq!(store.cookie_header(&u), Some("t=2".to_string()));
        store.store_response_cookies(&u, &["t=gone; Max-Age=0".to_string()]);
        assert_eq!(store.cookie_header(&u), None);
    }

    #[test]
    fn domain_attribute_extends_to_subdomains() {
        let store = CookieStore::new();
        let u = url("https://www.example.com/");
        store.store_response_cookies(&u, &["site=x; Domain=.example.com".to_string()]);
        assert!(store.cookie_header(&url("https://api.example.com/")).is_some());
    }
}
