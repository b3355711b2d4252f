//! Basic HTTP client.

use std::time::Duration;

use bytes::Bytes;
use http::{Request, Response};
use http_body_util::Full;
use hyper::body::{Body, Incoming};
use hyper_rustls::HttpsConnectorBuilder;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Builder},
    rt::{TokioExecutor, TokioTimer},
};
use tokio::time::Instant;
use tower::{timeout::TimeoutLayer, util::BoxCloneSyncService, BoxError, Service as _, ServiceBuilder, ServiceExt as _};
use tracing::debug;

/// An HTTP client.
///
/// Supports both `http://` and `https://` URIs. TLS connections are verified against the Mozilla root certificates
/// bundled by `webpki-roots`.
#[derive(Clone)]
pub struct HttpClient<B = Full<Bytes>> {
    inner: BoxCloneSyncService<Request<B>, Response<Incoming>, BoxError>,
}

impl HttpClient<Full<Bytes>> {
    /// Creates a new builder for configuring an HTTP client.
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::default()
    }
}

impl<B> HttpClient<B>
where
    B: Body + Send + Unpin + 'static,
    B::Data: Send,
    B::Error: Into<BoxError>,
{
    /// Sends a request to the server, and waits for a response.
    ///
    /// # Errors
    ///
    /// If there was an error sending the request, or the request timed out, an error will be returned.
    pub async fn send(&mut self, req: Request<B>) -> Result<Response<Incoming>, BoxError> {
        self.inner.ready().await?.call(req).await
    }
}

/// An HTTP client that periodically discards its connection pool.
///
/// Long-lived clients otherwise hold onto idle connections indefinitely, which keeps sockets (and server-side state)
/// around well past the point they are useful and makes it harder for load balancers to rebalance. Every
/// `reset_interval`, the next request is made through a freshly built client, and the old client's pooled connections
/// are dropped along with it.
pub struct ResetHttpClient<B = Full<Bytes>> {
    client: HttpClient<B>,
    client_builder: HttpClientBuilder,
    reset_interval: Duration,
    last_reset: Instant,
}

impl<B> ResetHttpClient<B>
where
    B: Body + Send + Unpin + 'static,
    B::Data: Send,
    B::Error: Into<BoxError>,
{
    /// Creates a new `ResetHttpClient` with the specified reset interval.
    ///
    /// A zero interval disables resetting.
    pub fn new(builder: HttpClientBuilder, reset_interval: Duration) -> Self {
        let client = builder.clone().build();

        Self {
            client,
            client_builder: builder,
            reset_interval,
            last_reset: Instant::now(),
        }
    }

    fn reset_if_needed(&mut self) -> bool {
        if self.reset_interval.is_zero() || self.last_reset.elapsed() < self.reset_interval {
            return false;
        }

        debug!(interval = ?self.reset_interval, "Recycling HTTP client connections.");
        self.client = self.client_builder.clone().build();
        self.last_reset = Instant::now();
        true
    }

    /// Sends a request to the server, and waits for a response.
    ///
    /// # Errors
    ///
    /// If there was an error sending the request, or the request timed out, an error will be returned.
    pub async fn send(&mut self, req: Request<B>) -> Result<Response<Incoming>, BoxError> {
        self.reset_if_needed();
        self.client.send(req).await
    }
}

/// An HTTP client builder.
///
/// # Defaults
///
/// - 10 second connect timeout, 60 second per-request timeout
/// - connection pool for reusing connections (45 second idle connection timeout, and a maximum of 5 idle connections
///   per host)
#[derive(Clone)]
pub struct HttpClientBuilder {
    connect_timeout: Duration,
    request_timeout: Duration,
    idle_conn_timeout: Duration,
    max_idle_conns_per_host: usize,
}

impl HttpClientBuilder {
    /// Sets the timeout when connecting to the remote host.
    ///
    /// Defaults to 10 seconds.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the per-request timeout.
    ///
    /// Covers the whole request, from acquiring a connection to receiving the response head.
    ///
    /// Defaults to 60 seconds.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the idle connection timeout.
    ///
    /// Once a connection has been idle in the pool for longer than this duration, it will be closed and removed from
    /// the pool.
    ///
    /// Defaults to 45 seconds.
    pub fn with_idle_conn_timeout(mut self, timeout: Duration) -> Self {
        self.idle_conn_timeout = timeout;
        self
    }

    /// Sets the maximum number of idle connections per host.
    ///
    /// Defaults to 5.
    pub fn with_max_idle_conns_per_host(mut self, max: usize) -> Self {
        self.max_idle_conns_per_host = max;
        self
    }

    /// Builds the `HttpClient`.
    pub fn build<B>(self) -> HttpClient<B>
    where
        B: Body + Send + Unpin + 'static,
        B::Data: Send,
        B::Error: Into<BoxError>,
    {
        // The HTTP connector must not enforce `http://`, or it rejects the URIs the TLS connector hands it.
        let mut http_connector = HttpConnector::new();
        http_connector.set_connect_timeout(Some(self.connect_timeout));
        http_connector.enforce_http(false);

        let connector = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let mut hyper_builder = Builder::new(TokioExecutor::new());
        hyper_builder
            .pool_timer(TokioTimer::new())
            .pool_max_idle_per_host(self.max_idle_conns_per_host)
            .pool_idle_timeout(self.idle_conn_timeout);
        let client = hyper_builder.build(connector);

        let service = ServiceBuilder::new()
            .layer(TimeoutLayer::new(self.request_timeout))
            .service(client.map_err(BoxError::from));
        let inner = BoxCloneSyncService::new(service);

        HttpClient { inner }
    }
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(60),
            idle_conn_timeout: Duration::from_secs(45),
            max_idle_conns_per_host: 5,
        }
    }
}
