//! Buffered responses and the redirect chain.

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use url::Url;

/// A completed response.
///
/// When redirects were followed, `previous` links to the response that
/// triggered this one, forming a chain with the most recent response first.
/// Responses are immutable once returned to the caller.
#[derive(Debug)]
pub struct Response {
    url: Url,
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    previous: Option<Box<Response>>,
}

impl Response {
    pub(crate) fn new(url: Url, status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            url,
            status,
            headers,
            body,
            previous: None,
        }
    }

    pub(crate) fn with_previous(mut self, previous: Response) -> Self {
        self.previous = Some(Box::new(previous));
        self
    }

    /// The URL of the request that produced this response.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The response status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The response headers. Lookup is case-insensitive.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The buffered response body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Consume the response, returning its body.
    pub fn into_body(self) -> Bytes {
        self.body
    }

    /// The response this one was redirected from, if any.
    pub fn previous(&self) -> Option<&Response> {
        self.previous.as_deref()
    }

    /// Walk the redirect chain, most recent response first.
    pub fn chain(&self) -> Chain<'_> {
        Chain {
            next: Some(self),
        }
    }
}

/// Iterator over a redirect chain, most recent response first.
#[derive(Debug)]
pub struct Chain<'a> {
    next: Option<&'a Response>,
}

impl<'a> Iterator for Chain<'a> {
    type Item = &'a Response;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.previous();
        Some(current)
    }
}
