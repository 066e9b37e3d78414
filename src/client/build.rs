//! Wire request materialization
//!
//! Turns a (client, request) pair into the concrete [`WireRequest`] handed
//! to the transport: URL composition, policy resolution, layered header
//! merging, body serialization, parameter routing, and the cookie header.
//! All failures here surface before any transport interaction.

use url::Url;

use super::{CachePolicy, ClientInner};
use crate::body::Body;
use crate::cookies::CookieStore;
use crate::error::Error;
use crate::headers::HeaderSet;
use crate::request::Request;
use crate::transport::WireRequest;

pub(crate) fn build_wire_request(
    client: &ClientInner,
    request: &Request,
    cookies: &CookieStore,
) -> Result<WireRequest, Error> {
    let mut url = compose_url(client.base_url.as_ref(), &request.route)?;

    let timeout = request.timeout.unwrap_or(client.timeout);
    let cache_policy = request.cache_policy.unwrap_or(client.cache_policy);

    // Route parameters, resolving `Auto` against the method.
    let params_to_query = request
        .params
        .as_ref()
        .map(|_| request.params_destination.resolves_to_query(&request.method))
        .unwrap_or(false);

    // Parameters destined for the body become the effective body.
    let form_body;
    let body: &Body = match (&request.params, params_to_query) {
        (Some(params), false) => {
            if !request.body.is_empty() {
                return Err(Error::InvalidParameter(
                    "request already has a body; parameters cannot be encoded into it".into(),
                ));
            }
            form_body = Body::form(params.clone());
            &form_body
        }
        _ => &request.body,
    };
    let encoded = body.encode()?;

    // Merge order: library defaults, client defaults, body headers,
    // request headers. Later layers override.
    let mut headers = HeaderSet::new();
    headers.set("Accept-Encoding", crate::defaults::ACCEPT_ENCODING);
    headers.set("Accept-Language", crate::defaults::accept_language());
    headers.set("User-Agent", crate::defaults::user_agent());
    headers.merge(&client.default_headers);
    headers.merge(&encoded.headers);
    headers.merge(&request.headers);

    match cache_policy {
        CachePolicy::Default => {}
        CachePolicy::NoStore => headers.set_if_absent("Cache-Control", "no-store"),
        CachePolicy::OnlyIfCached => headers.set_if_absent("Cache-Control", "only-if-cached"),
    }
    if let Some(offset) = request.resume_offset {
        headers.set_if_absent("Range", format!("bytes={offset}-"));
    }

    if params_to_query {
        if let Some(params) = &request.params {
            append_query(&mut url, &params.encode());
        }
    }

    if let Some(cookie) = cookies.cookie_header(&url) {
        headers.set_if_absent("Cookie", cookie);
    }

    let mut wire = WireRequest {
        id: request.id(),
        method: request.method.clone(),
        url,
        headers,
        payload: encoded.payload,
        timeout,
        cache_policy,
    };

    // The user transform sees the fully materialized request.
    if let Some(modifier) = &request.url_modifier {
        modifier(&mut wire)?;
    }
    Ok(wire)
}

/// Concatenate the client base URL and the route, requiring an absolute
/// parseable result.
fn compose_url(base: Option<&Url>, route: &str) -> Result<Url, Error> {
    // An absolute route stands on its own.
    if route.starts_with("http://") || route.starts_with("https://") {
        return Ok(Url::parse(route)?);
    }
    match base {
        Some(base) => {
            let base_str = base.as_str().trim_end_matches('/');
            let joined = if route.is_empty() {
                base_str.to_string()
            } else if route.starts_with('/') {
                format!("{base_str}{route}")
            } else {
                format!("{base_str}/{route}")
            };
            Ok(Url::parse(&joined)?)
        }
        None => Err(Error::InvalidUrl(format!(
            "route '{route}' is relative and the client has no base URL"
        ))),
    }
}

/// Append an already-encoded query string to a URL, preserving any
/// existing query.
fn append_query(url: &mut Url, encoded: &str) {
    if encoded.is_empty() {
        return;
    }
    match url.query() {
        Some(existing) if !existing.is_empty() => {
            let merged = format!("{existing}&{encoded}");
            url.set_query(Some(&merged));
        }
        _ => url.set_query(Some(encoded)),
    }
}
