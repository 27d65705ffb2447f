//! Automatic redirect following.
//!
//! Redirect targets arrive in the `Location` header, which the HTTP
//! specification requires to be an absolute URL. Servers violate this in
//! practice and send relative values, so resolution is an explicit
//! "resolve possibly-relative URL against the prior request's URL" step,
//! with the same rules as resolving a relative link in a document against
//! its base, rather than an assumption of absoluteness.

use http::header::{
    HeaderValue, AUTHORIZATION, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, COOKIE, HOST,
    LOCATION, PROXY_AUTHORIZATION, TRANSFER_ENCODING, WWW_AUTHENTICATE,
};
use http::{HeaderMap, Method, StatusCode};
use tracing::debug;
use url::Url;

use crate::client::execute::Executor;
use crate::client::request::Request;
use crate::client::response::Response;
use crate::Error;

/// How many redirects to follow before giving up, matching the original
/// client's default.
pub const DEFAULT_MAX_REDIRECTS: usize = 5;

/// Whether and how far to follow redirects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectPolicy {
    follow: bool,
    max_redirects: usize,
}

impl RedirectPolicy {
    /// Follow up to `max_redirects` redirects.
    pub fn limited(max_redirects: usize) -> Self {
        Self {
            follow: true,
            max_redirects,
        }
    }

    /// Do not follow redirects; 3xx responses are returned directly.
    pub fn none() -> Self {
        Self {
            follow: false,
            max_redirects: 0,
        }
    }

    /// Whether following is enabled.
    pub fn follow(&self) -> bool {
        self.follow
    }

    /// The redirect budget.
    pub fn max_redirects(&self) -> usize {
        self.max_redirects
    }
}

impl Default for RedirectPolicy {
    fn default() -> Self {
        Self::limited(DEFAULT_MAX_REDIRECTS)
    }
}

/// Issue `request` and follow redirects within `policy`, producing the
/// final response with the chain of prior responses linked via `previous`.
pub(crate) async fn follow(
    executor: &Executor,
    request: Request,
    policy: &RedirectPolicy,
) -> Result<Response, Error> {
    let mut response = executor.issue(&request).await?;

    if !policy.follow {
        return Ok(response);
    }

    let mut current = request;
    let mut remaining = policy.max_redirects;

    loop {
        if !is_redirect(response.status()) {
            return Ok(response);
        }
        let Some(location) = response.headers().get(LOCATION) else {
            return Ok(response);
        };
        if remaining == 0 {
            return Err(Error::TooManyRedirects {
                limit: policy.max_redirects,
            });
        }

        let next_url = resolve_location(current.url(), location)?;
        let method = redirect_method(response.status(), current.method());

        let mut headers = current.headers().clone();
        let mut body = current.body().cloned();

        // Each hop derives Host from its own URL.
        headers.remove(HOST);

        // 301/302/303 downgrade non-GET/HEAD to GET; the body and its
        // framing headers go with it. 307/308 keep both.
        if method != *current.method() {
            body = None;
            headers.remove(CONTENT_LENGTH);
            headers.remove(CONTENT_TYPE);
            headers.remove(CONTENT_ENCODING);
            headers.remove(TRANSFER_ENCODING);
        }

        remove_sensitive_headers(&mut headers, current.url(), &next_url);

        debug!(
            status = response.status().as_u16(),
            location = %next_url,
            remaining,
            "following redirect"
        );

        let mut next = Request::new(method, next_url);
        *next.headers_mut() = headers;
        next.set_body(body);

        let next_response = executor.issue(&next).await?;
        response = next_response.with_previous(response);
        current = next;
        remaining -= 1;
    }
}

pub(crate) fn is_redirect(status: StatusCode) -> bool {
    status == StatusCode::MOVED_PERMANENTLY
        || status == StatusCode::FOUND
        || status == StatusCode::SEE_OTHER
        || status == StatusCode::TEMPORARY_REDIRECT
        || status == StatusCode::PERMANENT_REDIRECT
}

/// The method for the follow-up request: 301/302/303 downgrade anything
/// other than GET/HEAD to GET; 307/308 preserve the method.
pub(crate) fn redirect_method(status: StatusCode, method: &Method) -> Method {
    let downgrades = status == StatusCode::MOVED_PERMANENTLY
        || status == StatusCode::FOUND
        || status == StatusCode::SEE_OTHER;

    if downgrades && *method != Method::GET && *method != Method::HEAD {
        Method::GET
    } else {
        method.clone()
    }
}

/// Resolve a possibly-relative `Location` value against the URL of the
/// request that produced the redirect.
pub(crate) fn resolve_location(base: &Url, location: &HeaderValue) -> Result<Url, Error> {
    let text = location.to_str().map_err(|_| Error::Redirect {
        location: String::from_utf8_lossy(location.as_bytes()).into_owned(),
        source: None,
    })?;

    base.join(text).map_err(|source| Error::Redirect {
        location: text.to_owned(),
        source: Some(source),
    })
}

/// Strip credential-bearing headers when the redirect changes hosts.
fn remove_sensitive_headers(headers: &mut HeaderMap, previous: &Url, next: &Url) {
    let cross_host = next.host_str() != previous.host_str()
        || next.port_or_known_default() != previous.port_or_known_default();
    if cross_host {
        headers.remove(AUTHORIZATION);
        headers.remove(COOKIE);
        headers.remove(PROXY_AUTHORIZATION);
        headers.remove(WWW_AUTHENTICATE);
    }
}
