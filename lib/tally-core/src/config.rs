use std::time::Duration;

use http::{uri::Scheme, Uri};
use serde::Deserialize;
use tally_config::GenericConfiguration;
use tally_error::{generic_error, GenericError};

use crate::{data_model::is_valid_name, hostname::normalize_hostname};

const fn default_sample_interval_secs() -> u64 {
    15
}

const fn default_max_queue_len() -> usize {
    200_000
}

const fn default_batch_size() -> usize {
    500
}

const fn default_handoff_channel_capacity() -> usize {
    1024
}

const fn default_request_timeout_secs() -> u64 {
    60
}

const fn default_connection_reset_interval_secs() -> u64 {
    60
}

const fn default_connect_timeout_secs() -> u64 {
    10
}

const fn default_idle_conn_timeout_secs() -> u64 {
    45
}

const fn default_max_idle_conns_per_host() -> usize {
    5
}

const fn default_retry_backoff_ms() -> u64 {
    5000
}

const fn default_idle_poll_interval_ms() -> u64 {
    1000
}

fn default_endpoint() -> String {
    "http://localhost:4242".to_string()
}

/// Pipeline configuration.
///
/// Can be deserialized from a [`GenericConfiguration`] with [`from_configuration`][Self::from_configuration], or
/// built programmatically starting from [`Default`] and the `with_*` methods.
#[derive(Clone, Debug, Deserialize)]
pub struct PipelineConfiguration {
    /// Base URL of the ingestion endpoint.
    ///
    /// Batches are sent to `{endpoint}/api/put`. Both `http://` and `https://` URLs are supported.
    ///
    /// Defaults to `http://localhost:4242`.
    #[serde(default = "default_endpoint")]
    endpoint: String,

    /// How often the registry is sampled, in seconds.
    ///
    /// Defaults to 15 seconds.
    #[serde(default = "default_sample_interval_secs")]
    sample_interval_secs: u64,

    /// Maximum number of points held in the queue.
    ///
    /// Points arriving while the queue is full are dropped.
    ///
    /// Defaults to 200,000.
    #[serde(default = "default_max_queue_len")]
    max_queue_len: usize,

    /// Maximum number of points sent in a single request.
    ///
    /// Defaults to 500.
    #[serde(default = "default_batch_size")]
    batch_size: usize,

    /// Capacity of the channel between the sampler and the queue.
    ///
    /// Sampling, and restoring points from failed batches, wait for space when the channel is full.
    ///
    /// Defaults to 1024.
    #[serde(default = "default_handoff_channel_capacity")]
    handoff_channel_capacity: usize,

    /// Whether to log batches instead of sending them.
    ///
    /// Defaults to `false`.
    #[serde(default)]
    print_only: bool,

    /// Whether to skip registering the pipeline's own `collect.*` series.
    ///
    /// Defaults to `false`.
    #[serde(default)]
    disable_self_metrics: bool,

    /// Prefix prepended to every metric name, separated by a `.`.
    ///
    /// Defaults to unset.
    #[serde(default)]
    metric_root: Option<String>,

    /// Hostname used for the `host` tag.
    ///
    /// An empty value disables the `host` tag entirely. Defaults to unset, in which case the hostname reported by the
    /// operating system is used.
    #[serde(default)]
    hostname: Option<String>,

    /// Per-request timeout, in seconds.
    ///
    /// Defaults to 60 seconds.
    #[serde(default = "default_request_timeout_secs")]
    request_timeout_secs: u64,

    /// How often idle connections are recycled, in seconds.
    ///
    /// Setting this to 0 disables recycling. Defaults to 60 seconds.
    #[serde(default = "default_connection_reset_interval_secs")]
    connection_reset_interval_secs: u64,

    /// Timeout when connecting to the endpoint, in seconds.
    ///
    /// Defaults to 10 seconds.
    #[serde(default = "default_connect_timeout_secs")]
    connect_timeout_secs: u64,

    /// How long a connection may sit idle in the pool before it is closed, in seconds.
    ///
    /// Defaults to 45 seconds.
    #[serde(default = "default_idle_conn_timeout_secs")]
    idle_conn_timeout_secs: u64,

    /// Maximum number of idle connections kept per host.
    ///
    /// Defaults to 5.
    #[serde(default = "default_max_idle_conns_per_host")]
    max_idle_conns_per_host: usize,

    /// How long to wait after a failed request before sending the next batch, in milliseconds.
    ///
    /// Defaults to 5000 milliseconds.
    #[serde(default = "default_retry_backoff_ms")]
    retry_backoff_ms: u64,

    /// How long to wait before checking the queue again when it is empty, in milliseconds.
    ///
    /// Defaults to 1000 milliseconds.
    #[serde(default = "default_idle_poll_interval_ms")]
    idle_poll_interval_ms: u64,
}

impl PipelineConfiguration {
    /// Creates a new `PipelineConfiguration` from the given configuration.
    ///
    /// # Errors
    ///
    /// If any field has an invalid type, an error will be returned.
    pub fn from_configuration(config: &GenericConfiguration) -> Result<Self, GenericError> {
        Ok(config.as_typed()?)
    }

    /// Sets the base URL of the ingestion endpoint.
    pub fn with_endpoint<S: Into<String>>(mut self, endpoint: S) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Sets the sampling interval, in seconds.
    pub fn with_sample_interval_secs(mut self, secs: u64) -> Self {
        self.sample_interval_secs = secs;
        self
    }

    /// Sets the maximum number of queued points.
    pub fn with_max_queue_len(mut self, max_queue_len: usize) -> Self {
        self.max_queue_len = max_queue_len;
        self
    }

    /// Sets the maximum number of points per request.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Sets the capacity of the channel between the sampler and the queue.
    pub fn with_handoff_channel_capacity(mut self, capacity: usize) -> Self {
        self.handoff_channel_capacity = capacity;
        self
    }

    /// Sets whether batches are logged instead of sent.
    pub fn with_print_only(mut self, print_only: bool) -> Self {
        self.print_only = print_only;
        self
    }

    /// Sets whether the pipeline's own series are skipped.
    pub fn with_self_metrics_disabled(mut self, disabled: bool) -> Self {
        self.disable_self_metrics = disabled;
        self
    }

    /// Sets the prefix prepended to every metric name.
    pub fn with_metric_root<S: Into<String>>(mut self, root: S) -> Self {
        self.metric_root = Some(root.into());
        self
    }

    /// Sets the hostname used for the `host` tag.
    pub fn with_hostname<S: Into<String>>(mut self, hostname: S) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    /// Sets the per-request timeout, in seconds.
    pub fn with_request_timeout_secs(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    /// Sets how often idle connections are recycled, in seconds.
    pub fn with_connection_reset_interval_secs(mut self, secs: u64) -> Self {
        self.connection_reset_interval_secs = secs;
        self
    }

    /// Sets the connect timeout, in seconds.
    pub fn with_connect_timeout_secs(mut self, secs: u64) -> Self {
        self.connect_timeout_secs = secs;
        self
    }

    /// Sets how long a connection may sit idle in the pool, in seconds.
    pub fn with_idle_conn_timeout_secs(mut self, secs: u64) -> Self {
        self.idle_conn_timeout_secs = secs;
        self
    }

    /// Sets the maximum number of idle connections kept per host.
    pub fn with_max_idle_conns_per_host(mut self, max: usize) -> Self {
        self.max_idle_conns_per_host = max;
        self
    }

    /// Sets the backoff after a failed request, in milliseconds.
    pub fn with_retry_backoff_ms(mut self, ms: u64) -> Self {
        self.retry_backoff_ms = ms;
        self
    }

    /// Sets the wait between checks of an empty queue, in milliseconds.
    pub fn with_idle_poll_interval_ms(mut self, ms: u64) -> Self {
        self.idle_poll_interval_ms = ms;
        self
    }

    pub(crate) fn sample_interval(&self) -> Duration {
        Duration::from_secs(self.sample_interval_secs)
    }

    pub(crate) fn max_queue_len(&self) -> usize {
        self.max_queue_len
    }

    pub(crate) fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub(crate) fn handoff_channel_capacity(&self) -> usize {
        self.handoff_channel_capacity
    }

    pub(crate) fn print_only(&self) -> bool {
        self.print_only
    }

    pub(crate) fn self_metrics_disabled(&self) -> bool {
        self.disable_self_metrics
    }

    pub(crate) fn metric_root(&self) -> Option<&str> {
        self.metric_root.as_deref()
    }

    pub(crate) fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }

    pub(crate) fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub(crate) fn connection_reset_interval(&self) -> Duration {
        Duration::from_secs(self.connection_reset_interval_secs)
    }

    pub(crate) fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub(crate) fn idle_conn_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_conn_timeout_secs)
    }

    pub(crate) fn max_idle_conns_per_host(&self) -> usize {
        self.max_idle_conns_per_host
    }

    pub(crate) fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub(crate) fn idle_poll_interval(&self) -> Duration {
        Duration::from_millis(self.idle_poll_interval_ms)
    }

    /// Checks the configuration for values the pipeline cannot run with.
    ///
    /// # Errors
    ///
    /// If any value is out of range, or the metric root or hostname is not a valid name, an error will be returned.
    pub(crate) fn validate(&self) -> Result<(), GenericError> {
        if self.sample_interval_secs == 0 {
            return Err(generic_error!("Sample interval must be greater than zero."));
        }

        if self.max_queue_len == 0 {
            return Err(generic_error!("Maximum queue length must be greater than zero."));
        }

        if self.batch_size == 0 {
            return Err(generic_error!("Batch size must be greater than zero."));
        }

        if self.handoff_channel_capacity == 0 {
            return Err(generic_error!("Hand-off channel capacity must be greater than zero."));
        }

        if let Some(root) = &self.metric_root {
            if !is_valid_name(root) {
                return Err(generic_error!("Invalid metric root '{}'.", root));
            }
        }

        // An empty normalized hostname disables the `host` tag, so only a non-empty one has to be a valid tag value.
        if let Some(hostname) = &self.hostname {
            let normalized = normalize_hostname(hostname);
            if !normalized.is_empty() && !is_valid_name(&normalized) {
                return Err(generic_error!("Invalid hostname '{}'.", hostname));
            }
        }

        Ok(())
    }

    /// Returns the full URI that batches are sent to.
    ///
    /// # Errors
    ///
    /// If the endpoint is not a valid absolute `http://` or `https://` URL, an error will be returned.
    pub(crate) fn api_put_uri(&self) -> Result<Uri, GenericError> {
        let raw = format!("{}/api/put", self.endpoint.trim_end_matches('/'));
        let uri = raw
            .parse::<Uri>()
            .map_err(|e| generic_error!("Invalid endpoint '{}': {}", self.endpoint, e))?;

        let scheme_supported = matches!(uri.scheme(), Some(scheme) if *scheme == Scheme::HTTP || *scheme == Scheme::HTTPS);
        if !scheme_supported || uri.authority().is_none() {
            return Err(generic_error!(
                "Invalid endpoint '{}': must be an absolute http:// or https:// URL.",
                self.endpoint
            ));
        }

        Ok(uri)
    }
}

impl Default for PipelineConfiguration {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            sample_interval_secs: default_sample_interval_secs(),
            max_queue_len: default_max_queue_len(),
            batch_size: default_batch_size(),
            handoff_channel_capacity: default_handoff_channel_capacity(),
            print_only: false,
            disable_self_metrics: false,
            metric_root: None,
            hostname: None,
            request_timeout_secs: default_request_timeout_secs(),
            connection_reset_interval_secs: default_connection_reset_interval_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            idle_conn_timeout_secs: default_idle_conn_timeout_secs(),
            max_idle_conns_per_host: default_max_idle_conns_per_host(),
            retry_backoff_ms: default_retry_backoff_ms(),
            idle_poll_interval_ms: default_idle_poll_interval_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use tally_config::ConfigurationLoader;

    use super::*;

    #[test]
    fn empty_configuration_uses_defaults() {
        let generic = ConfigurationLoader::default().into_generic().unwrap();
        let config = PipelineConfiguration::from_configuration(&generic).unwrap();

        assert_eq!(config.endpoint, "http://localhost:4242");
        assert_eq!(config.sample_interval(), Duration::from_secs(15));
        assert_eq!(config.max_queue_len(), 200_000);
        assert_eq!(config.batch_size(), 500);
        assert_eq!(config.handoff_channel_capacity(), 1024);
        assert!(!config.print_only());
        assert!(!config.self_metrics_disabled());
        assert_eq!(config.metric_root(), None);
        assert_eq!(config.hostname(), None);
        assert_eq!(config.request_timeout(), Duration::from_secs(60));
        assert_eq!(config.connection_reset_interval(), Duration::from_secs(60));
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.idle_conn_timeout(), Duration::from_secs(45));
        assert_eq!(config.max_idle_conns_per_host(), 5);
        assert_eq!(config.retry_backoff(), Duration::from_millis(5000));
        assert_eq!(config.idle_poll_interval(), Duration::from_millis(1000));
        config.validate().unwrap();
    }

    #[test]
    fn reads_values_from_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(b"endpoint: http://tsdb:4242/\nbatch_size: 50\nmetric_root: myapp\nprint_only: true\n")
            .unwrap();

        let generic = ConfigurationLoader::default()
            .from_yaml(file.path())
            .unwrap()
            .into_generic()
            .unwrap();
        let config = PipelineConfiguration::from_configuration(&generic).unwrap();

        assert_eq!(config.batch_size(), 50);
        assert_eq!(config.metric_root(), Some("myapp"));
        assert!(config.print_only());
        assert_eq!(config.api_put_uri().unwrap(), "http://tsdb:4242/api/put");
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let base = PipelineConfiguration::default();

        assert!(base.clone().with_batch_size(0).validate().is_err());
        assert!(base.clone().with_max_queue_len(0).validate().is_err());
        assert!(base.clone().with_sample_interval_secs(0).validate().is_err());
        assert!(base.clone().with_handoff_channel_capacity(0).validate().is_err());
        assert!(base.clone().with_metric_root("my app").validate().is_err());
        assert!(base.with_metric_root("my.app").validate().is_ok());
    }

    #[test]
    fn hostname_must_be_empty_or_valid() {
        let base = PipelineConfiguration::default();

        assert!(base.clone().with_hostname("web01.example.com").validate().is_ok());
        assert!(base.clone().with_hostname("").validate().is_ok());
        assert!(base.clone().with_hostname("  ").validate().is_ok());
        assert!(base.clone().with_hostname("web 01").validate().is_err());
        assert!(base.with_hostname("web,01").validate().is_err());
    }

    #[test]
    fn endpoint_must_be_absolute_http_or_https() {
        let base = PipelineConfiguration::default();

        assert_eq!(
            base.clone().with_endpoint("http://127.0.0.1:4242").api_put_uri().unwrap(),
            "http://127.0.0.1:4242/api/put"
        );
        assert_eq!(
            base.clone().with_endpoint("https://tsdb.example.com/").api_put_uri().unwrap(),
            "https://tsdb.example.com/api/put"
        );
        assert!(base.clone().with_endpoint("not a url").api_put_uri().is_err());
        assert!(base.clone().with_endpoint("ftp://tsdb:4242").api_put_uri().is_err());
        assert!(base.with_endpoint("/relative").api_put_uri().is_err());
    }
}
