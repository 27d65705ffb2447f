use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpListener;

use hoplink::client::DestinationKey;
use hoplink::{Client, Error, RedirectPolicy, Request, TlsPolicy};

struct ParsedRequest {
    method: String,
    path: String,
    body: Vec<u8>,
}

type Router = Arc<dyn Fn(&ParsedRequest) -> String + Send + Sync>;

/// A minimal keep-alive HTTP/1.1 server. Counts accepted connections and
/// served requests so tests can observe connection reuse.
struct TestServer {
    addr: SocketAddr,
    connections: Arc<AtomicUsize>,
    requests: Arc<AtomicUsize>,
}

impl TestServer {
    async fn start<F>(router: F) -> Self
    where
        F: Fn(&ParsedRequest) -> String + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(AtomicUsize::new(0));
        let router: Router = Arc::new(router);

        let accepted = connections.clone();
        let served = requests.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                accepted.fetch_add(1, Ordering::SeqCst);
                let router = router.clone();
                let served = served.clone();
                tokio::spawn(async move {
                    let (read, mut write) = stream.into_split();
                    let mut reader = BufReader::new(read);
                    loop {
                        let Some(request) = read_request(&mut reader).await else {
                            return;
                        };
                        served.fetch_add(1, Ordering::SeqCst);
                        let reply = router(&request);
                        if write.write_all(reply.as_bytes()).await.is_err() {
                            return;
                        }
                    }
                });
            }
        });

        Self {
            addr,
            connections,
            requests,
        }
    }

    fn url(&self, path: &str) -> url::Url {
        format!("http://{}{}", self.addr, path).parse().unwrap()
    }

    fn key(&self) -> DestinationKey {
        DestinationKey::try_from(&self.url("/")).unwrap()
    }

    fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

async fn read_request(reader: &mut BufReader<OwnedReadHalf>) -> Option<ParsedRequest> {
    let mut head = String::new();
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await.ok()?;
        if n == 0 {
            return None;
        }
        if line == "\r\n" {
            break;
        }
        head.push_str(&line);
    }

    let mut parts = head.lines().next()?.split_whitespace();
    let method = parts.next()?.to_owned();
    let path = parts.next()?.to_owned();

    let length = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            if name.eq_ignore_ascii_case("content-length") {
                value.trim().parse::<usize>().ok()
            } else {
                None
            }
        })
        .unwrap_or(0);

    let mut body = vec![0u8; length];
    if length > 0 {
        reader.read_exact(&mut body).await.ok()?;
    }

    Some(ParsedRequest { method, path, body })
}

fn respond(status: u16, headers: &[(&str, &str)], body: &str) -> String {
    let reason = match status {
        200 => "OK",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        _ => "Other",
    };
    let mut response = format!("HTTP/1.1 {status} {reason}\r\n");
    for (name, value) in headers {
        response.push_str(&format!("{name}: {value}\r\n"));
    }
    response.push_str(&format!("content-length: {}\r\n\r\n{body}", body.len()));
    response
}

#[tokio::test]
async fn get_ok() {
    let _ = tracing_subscriber::fmt::try_init();

    let server = TestServer::start(|_| respond(200, &[("X-Custom", "yes")], "hello")).await;
    let client = Client::new();

    let response = client.get(server.url("/")).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(&response.body()[..], b"hello");
    // Header lookup is case-insensitive.
    assert_eq!(response.headers().get("x-custom").unwrap(), "yes");
    assert!(response.previous().is_none());
}

#[tokio::test]
async fn sequential_requests_reuse_the_connection() {
    let _ = tracing_subscriber::fmt::try_init();

    let server = TestServer::start(|_| respond(200, &[], "ok")).await;
    let client = Client::new();

    client.get(server.url("/")).await.unwrap();
    let first = client.registry().get(&server.key()).unwrap().id();

    client.get(server.url("/again")).await.unwrap();
    let second = client.registry().get(&server.key()).unwrap().id();

    assert_eq!(first, second, "connection should be re-used");
    assert_eq!(server.connections(), 1);
    assert_eq!(server.requests(), 2);
}

#[tokio::test]
async fn concurrent_requests_share_a_connection() {
    let _ = tracing_subscriber::fmt::try_init();

    let server = TestServer::start(|_| respond(200, &[], "ok")).await;
    let client = Client::new();

    let (a, b) = futures_util::future::join(
        client.get(server.url("/a")),
        client.get(server.url("/b")),
    )
    .await;
    assert_eq!(a.unwrap().status(), 200);
    assert_eq!(b.unwrap().status(), 200);

    assert_eq!(server.connections(), 1);
    assert_eq!(server.requests(), 2);
}

#[tokio::test]
async fn follows_relative_location_redirect() {
    let _ = tracing_subscriber::fmt::try_init();

    // A relative Location violates the HTTP specification but occurs in
    // practice; it must resolve against the URL of the request that
    // produced it.
    let server = TestServer::start(|request| match request.path.as_str() {
        "/a/" => respond(302, &[("Location", "/b")], ""),
        "/b" => respond(200, &[], "done"),
        _ => respond(404, &[], ""),
    })
    .await;
    let client = Client::new();

    let response = client.get(server.url("/a/")).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(&response.body()[..], b"done");
    assert_eq!(response.url().path(), "/b");

    let previous = response.previous().unwrap();
    assert_eq!(previous.status(), 302);
    assert_eq!(previous.url().path(), "/a/");
    assert!(previous.previous().is_none());

    let chain: Vec<u16> = response.chain().map(|r| r.status().as_u16()).collect();
    assert_eq!(chain, vec![200, 302]);
}

#[tokio::test]
async fn post_downgrades_to_get_on_303() {
    let _ = tracing_subscriber::fmt::try_init();

    let server = TestServer::start(|request| match request.path.as_str() {
        "/submit" => respond(303, &[("Location", "/result")], ""),
        "/result" => respond(
            200,
            &[],
            &format!("{}:{}", request.method, request.body.len()),
        ),
        _ => respond(404, &[], ""),
    })
    .await;
    let client = Client::new();

    let request = Request::new(http::Method::POST, server.url("/submit")).with_body("payload");
    let response = client.request(request).await.unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(&response.body()[..], b"GET:0");
    assert_eq!(response.previous().unwrap().status(), 303);
}

#[tokio::test]
async fn temporary_redirect_preserves_method_and_body() {
    let _ = tracing_subscriber::fmt::try_init();

    let server = TestServer::start(|request| match request.path.as_str() {
        "/a" => respond(307, &[("Location", "/b")], ""),
        "/b" => respond(
            200,
            &[],
            &format!("{}:{}", request.method, String::from_utf8_lossy(&request.body)),
        ),
        _ => respond(404, &[], ""),
    })
    .await;
    let client = Client::new();

    let request = Request::new(http::Method::POST, server.url("/a")).with_body("payload");
    let response = client.request(request).await.unwrap();

    assert_eq!(&response.body()[..], b"POST:payload");
}

#[tokio::test]
async fn redirect_budget_exhaustion_discards_the_chain() {
    let _ = tracing_subscriber::fmt::try_init();

    let server = TestServer::start(|_| respond(302, &[("Location", "/loop")], "")).await;
    let client = Client::new();

    let error = client.get(server.url("/loop")).await.unwrap_err();
    assert!(matches!(error, Error::TooManyRedirects { limit: 5 }));
    // The initial request plus the full budget of follows.
    assert_eq!(server.requests(), 6);
}

#[tokio::test]
async fn redirects_disabled_returns_the_response_directly() {
    let _ = tracing_subscriber::fmt::try_init();

    let server =
        TestServer::start(|_| respond(301, &[("Location", "/elsewhere")], "moved")).await;
    let client = Client::builder().without_redirects().build();

    let response = client.get(server.url("/")).await.unwrap();
    assert_eq!(response.status(), 301);
    assert!(response.previous().is_none());
    assert_eq!(server.requests(), 1);
}

#[tokio::test]
async fn per_request_policy_overrides_the_default() {
    let _ = tracing_subscriber::fmt::try_init();

    let server = TestServer::start(|request| match request.path.as_str() {
        "/a" => respond(302, &[("Location", "/b")], ""),
        _ => respond(200, &[], "ok"),
    })
    .await;
    let client = Client::new();

    let response = client
        .request_with_policy(Request::get(server.url("/a")), RedirectPolicy::none())
        .await
        .unwrap();
    assert_eq!(response.status(), 302);
    assert_eq!(server.requests(), 1);
}

#[tokio::test]
async fn redirect_without_location_is_terminal() {
    let _ = tracing_subscriber::fmt::try_init();

    let server = TestServer::start(|_| respond(302, &[], "lost")).await;
    let client = Client::new();

    let response = client.get(server.url("/")).await.unwrap();
    assert_eq!(response.status(), 302);
    assert!(response.previous().is_none());
}

#[tokio::test]
async fn nonexistent_host_is_a_name_resolution_error() {
    let _ = tracing_subscriber::fmt::try_init();

    let client = Client::new();
    let error = client
        .get("http://name-that-should-not-resolve.invalid/".parse().unwrap())
        .await
        .unwrap_err();

    assert!(
        matches!(error, Error::NameResolution { ref host, .. } if host.ends_with(".invalid")),
        "expected name resolution error, got: {error}"
    );
}

#[tokio::test]
async fn connection_refused_is_a_transport_error() {
    let _ = tracing_subscriber::fmt::try_init();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = Client::new();
    let error = client
        .get(format!("http://{addr}/").parse().unwrap())
        .await
        .unwrap_err();
    assert!(matches!(error, Error::Transport(_)));
}

#[tokio::test]
async fn failed_connection_is_invalidated_and_rebuilt() {
    let _ = tracing_subscriber::fmt::try_init();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        // First connection is dropped without a response; the second is
        // served properly.
        let (stream, _) = listener.accept().await.unwrap();
        drop(stream);

        let (stream, _) = listener.accept().await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut reader = BufReader::new(read);
        if read_request(&mut reader).await.is_some() {
            let _ = write
                .write_all(respond(200, &[], "recovered").as_bytes())
                .await;
        }
    });

    let client = Client::new();
    let url: url::Url = format!("http://{addr}/").parse().unwrap();
    let key = DestinationKey::try_from(&url).unwrap();

    let first = client.registry().get_or_create(&key, &TlsPolicy::default());

    let error = client.get(url.clone()).await.unwrap_err();
    assert!(matches!(error, Error::Transport(_)));
    assert!(
        client.registry().get(&key).is_none(),
        "failed connection should be invalidated"
    );

    let response = client.get(url).await.unwrap();
    assert_eq!(&response.body()[..], b"recovered");
    let rebuilt = client.registry().get(&key).unwrap();
    assert_ne!(rebuilt.id(), first.id(), "connection should be rebuilt");
}

#[tokio::test]
async fn timeout_is_a_transport_error_and_invalidates() {
    let _ = tracing_subscriber::fmt::try_init();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        // Accept and read, but never respond.
        let (stream, _) = listener.accept().await.unwrap();
        let mut buffer = vec![0u8; 4096];
        let (mut read, _write) = stream.into_split();
        while read.read(&mut buffer).await.map_or(false, |n| n > 0) {}
    });

    let client = Client::builder()
        .with_timeout(Duration::from_millis(200))
        .build();
    let url: url::Url = format!("http://{addr}/").parse().unwrap();
    let key = DestinationKey::try_from(&url).unwrap();

    let error = client.get(url).await.unwrap_err();
    assert!(matches!(error, Error::Transport(_)));
    assert!(client.registry().get(&key).is_none());
}

#[tokio::test]
async fn shared_registry_shares_connections() {
    let _ = tracing_subscriber::fmt::try_init();

    let server = TestServer::start(|_| respond(200, &[], "ok")).await;

    let first = Client::new();
    let second = Client::builder()
        .with_registry(first.registry().clone())
        .build();

    first.get(server.url("/")).await.unwrap();
    second.get(server.url("/")).await.unwrap();

    assert_eq!(server.connections(), 1);
}
