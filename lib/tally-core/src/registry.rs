use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use snafu::{ResultExt as _, Snafu};

use crate::{
    data_model::{is_valid_name, TagSet, Value},
    hostname::{normalize_hostname, os_hostname, HostnameError},
};

const HOST_TAG: &str = "host";

/// Evaluates a callback gauge.
pub(crate) type GaugeFn = Arc<dyn Fn() -> Value + Send + Sync>;

/// The kind of name that failed validation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NameKind {
    /// A metric name.
    Metric,

    /// A tag key.
    TagKey,

    /// A tag value.
    TagValue,
}

impl fmt::Display for NameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Metric => write!(f, "metric name"),
            Self::TagKey => write!(f, "tag key"),
            Self::TagValue => write!(f, "tag value"),
        }
    }
}

/// Registration error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum RegistrationError {
    /// A metric name, tag key, or tag value contained disallowed characters.
    #[snafu(display(
        "Invalid {} '{}': only letters, ASCII digits, '-', '_', '.' and '/' are allowed.",
        kind,
        name
    ))]
    InvalidName {
        /// What the invalid name was used as.
        kind: NameKind,

        /// The invalid name.
        name: String,
    },

    /// The local hostname was needed for the `host` tag but could not be resolved.
    #[snafu(display("Failed to determine value for host tag: {}", source))]
    Hostname {
        /// Error source.
        source: HostnameError,
    },
}

/// A registered series.
#[derive(Clone)]
pub(crate) struct Series<T> {
    pub metric: String,
    pub tags: TagSet,
    pub value: T,
}

#[derive(Default)]
struct SeriesMaps {
    counters: HashMap<String, Series<i64>>,
    gauges: HashMap<String, Series<GaugeFn>>,
    puts: HashMap<String, Series<Value>>,
}

/// Point-in-time copy of the registry, taken by the sampler.
pub(crate) struct Snapshot {
    pub counters: Vec<Series<i64>>,
    pub gauges: Vec<Series<GaugeFn>>,
    pub puts: Vec<Series<Value>>,
}

/// Where the value of the injected `host` tag comes from.
#[derive(Debug)]
enum HostSource {
    /// The hostname reported by the operating system, resolved on first use.
    Os,

    /// A fixed, already normalized hostname.
    Fixed(String),

    /// No `host` tag is injected.
    Omit,
}

struct RegistryInner {
    series: Mutex<SeriesMaps>,
    host: HostSource,
}

/// Registry of series to be sampled.
///
/// Three kinds of series can be registered:
///
/// - counters ([`add`][Self::add]), which accumulate and are emitted with their running total on every tick
/// - callback gauges ([`set`][Self::set]), whose callback is evaluated on every tick
/// - put gauges ([`put`][Self::put]), whose value is emitted on the next tick only
///
/// Series are keyed by their metric name and tags. If the tags have no `host` tag, one is added using the local
/// hostname. Setting `host` to an empty string opts out, and the tag is removed instead.
///
/// The registry is cheaply cloneable, and all clones refer to the same set of series.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl Registry {
    /// Creates a new `Registry` that tags series with the hostname reported by the operating system.
    pub fn new() -> Self {
        Self::from_host_source(HostSource::Os)
    }

    /// Creates a new `Registry` that tags series with the given hostname.
    ///
    /// The hostname is normalized the same way as one reported by the operating system. If nothing is left after
    /// normalization, such as for an empty string, no `host` tag is injected at all.
    pub fn with_hostname(hostname: &str) -> Self {
        let hostname = normalize_hostname(hostname);
        if hostname.is_empty() {
            Self::from_host_source(HostSource::Omit)
        } else {
            Self::from_host_source(HostSource::Fixed(hostname))
        }
    }

    fn from_host_source(host: HostSource) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                series: Mutex::new(SeriesMaps::default()),
                host,
            }),
        }
    }

    /// Increments the counter identified by `metric` and `tags` by `delta`, creating it if it does not yet exist.
    ///
    /// # Errors
    ///
    /// If the metric name or tags are invalid, or the local hostname could not be resolved, an error will be
    /// returned and the counter is left untouched.
    pub fn add(&self, metric: &str, tags: &TagSet, delta: i64) -> Result<(), RegistrationError> {
        let (key, tags) = self.resolve_series(metric, tags)?;

        let mut series = self.lock_series();
        let counter = series.counters.entry(key).or_insert_with(|| Series {
            metric: metric.to_string(),
            tags,
            value: 0,
        });
        counter.value = counter.value.saturating_add(delta);

        Ok(())
    }

    /// Registers a callback gauge identified by `metric` and `tags`.
    ///
    /// `f` is called on every sampling tick, outside of any registry lock, and must not have side effects. Registering
    /// the same series again replaces the previous callback.
    ///
    /// # Errors
    ///
    /// If the metric name or tags are invalid, or the local hostname could not be resolved, an error will be
    /// returned and the gauge is not registered.
    pub fn set<F, V>(&self, metric: &str, tags: &TagSet, f: F) -> Result<(), RegistrationError>
    where
        F: Fn() -> V + Send + Sync + 'static,
        V: Into<Value>,
    {
        let (key, tags) = self.resolve_series(metric, tags)?;
        let value: GaugeFn = Arc::new(move || f().into());

        self.lock_series().gauges.insert(
            key,
            Series {
                metric: metric.to_string(),
                tags,
                value,
            },
        );

        Ok(())
    }

    /// Sets the value of the put gauge identified by `metric` and `tags`.
    ///
    /// The value is emitted by the next sampling tick and then discarded. Putting a value for the same series again
    /// before that tick replaces the pending value.
    ///
    /// # Errors
    ///
    /// If the metric name or tags are invalid, or the local hostname could not be resolved, an error will be
    /// returned and the value is discarded.
    pub fn put<V>(&self, metric: &str, tags: &TagSet, value: V) -> Result<(), RegistrationError>
    where
        V: Into<Value>,
    {
        let (key, tags) = self.resolve_series(metric, tags)?;

        self.lock_series().puts.insert(
            key,
            Series {
                metric: metric.to_string(),
                tags,
                value: value.into(),
            },
        );

        Ok(())
    }

    /// Returns the current value of the counter identified by `metric` and `tags`, if it exists.
    ///
    /// Tags are resolved the same way as during registration, including the `host` tag.
    pub fn counter_value(&self, metric: &str, tags: &TagSet) -> Option<i64> {
        let (key, _) = self.resolve_series(metric, tags).ok()?;
        self.lock_series().counters.get(&key).map(|counter| counter.value)
    }

    /// Returns the number of registered series, including put gauges waiting to be sampled.
    pub fn len(&self) -> usize {
        let series = self.lock_series();
        series.counters.len() + series.gauges.len() + series.puts.len()
    }

    /// Returns `true` if no series are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies out every series, clearing pending put gauges.
    ///
    /// Callback gauges are returned unevaluated.
    pub(crate) fn snapshot(&self) -> Snapshot {
        let mut series = self.lock_series();
        Snapshot {
            counters: series.counters.values().cloned().collect(),
            gauges: series.gauges.values().cloned().collect(),
            puts: std::mem::take(&mut series.puts).into_values().collect(),
        }
    }

    fn lock_series(&self) -> MutexGuard<'_, SeriesMaps> {
        // No user code runs while the lock is held, so the maps are consistent even if a holder panicked.
        self.inner.series.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Validates a series and returns its key along with its final tags.
    fn resolve_series(&self, metric: &str, tags: &TagSet) -> Result<(String, TagSet), RegistrationError> {
        check_name(NameKind::Metric, metric)?;

        let mut tags = tags.clone();
        match tags.get(HOST_TAG) {
            Some("") => {
                tags.remove(HOST_TAG);
            }
            Some(_) => {}
            None => match &self.inner.host {
                HostSource::Os => {
                    tags.insert(HOST_TAG, os_hostname().context(Hostname)?);
                }
                HostSource::Fixed(hostname) => {
                    tags.insert(HOST_TAG, hostname.clone());
                }
                HostSource::Omit => {}
            },
        }

        for (key, value) in tags.iter() {
            check_name(NameKind::TagKey, key)?;
            check_name(NameKind::TagValue, value)?;
        }

        let key = format!("{}{}", metric, tags);
        Ok((key, tags))
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("host", &self.inner.host)
            .field("series", &self.len())
            .finish()
    }
}

fn check_name(kind: NameKind, name: &str) -> Result<(), RegistrationError> {
    if is_valid_name(name) {
        Ok(())
    } else {
        InvalidName { kind, name }.fail()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Registry {
        Registry::with_hostname("Test-Host.example.com")
    }

    #[test]
    fn invalid_metric_name_is_rejected() {
        let registry = registry();

        let error = registry.add("cpu%", &TagSet::new(), 1).unwrap_err();
        assert!(matches!(
            error,
            RegistrationError::InvalidName {
                kind: NameKind::Metric,
                ..
            }
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn invalid_tags_are_rejected() {
        let registry = registry();

        let error = registry
            .set("cpu.idle", &TagSet::from([("bad key", "x")]), || 1)
            .unwrap_err();
        assert!(matches!(error, RegistrationError::InvalidName { kind: NameKind::TagKey, ref name } if name == "bad key"));

        let error = registry
            .put("cpu.idle", &TagSet::from([("zone", "a,b")]), 1)
            .unwrap_err();
        assert!(matches!(error, RegistrationError::InvalidName { kind: NameKind::TagValue, ref name } if name == "a,b"));

        assert!(registry.is_empty());
    }

    #[test]
    fn host_tag_is_injected_when_absent() {
        let registry = registry();
        registry.put("cpu.idle", &TagSet::from([("zone", "a")]), 1).unwrap();

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.puts[0].tags, TagSet::from([("host", "test-host"), ("zone", "a")]));
    }

    #[test]
    fn explicit_host_tag_is_kept() {
        let registry = registry();
        registry.add("cpu.idle", &TagSet::from([("host", "other")]), 1).unwrap();

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.counters[0].tags, TagSet::from([("host", "other")]));
    }

    #[test]
    fn empty_host_tag_opts_out() {
        let registry = registry();
        registry.add("cpu.idle", &TagSet::from([("host", "")]), 1).unwrap();

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.counters.len(), 1);
        assert!(snapshot.counters[0].tags.is_empty());
        assert_eq!(registry.counter_value("cpu.idle", &TagSet::from([("host", "")])), Some(1));
    }

    #[test]
    fn empty_hostname_omits_host_tag() {
        for hostname in ["", "  ", ".local"] {
            let registry = Registry::with_hostname(hostname);
            registry.add("cpu.idle", &TagSet::from([("zone", "a")]), 1).unwrap();
            registry.put("cpu.user", &TagSet::new(), 2).unwrap();

            let snapshot = registry.snapshot();
            assert_eq!(snapshot.counters[0].tags, TagSet::from([("zone", "a")]));
            assert!(snapshot.puts[0].tags.is_empty());
        }

        // An explicit tag still wins.
        let registry = Registry::with_hostname("");
        registry.add("cpu.idle", &TagSet::from([("host", "web01")]), 1).unwrap();
        assert_eq!(registry.snapshot().counters[0].tags, TagSet::from([("host", "web01")]));
    }

    #[test]
    fn counters_accumulate() {
        let registry = registry();
        let tags = TagSet::from([("zone", "a")]);

        for delta in [1, 2, 3, -1] {
            registry.add("requests", &tags, delta).unwrap();
        }

        assert_eq!(registry.counter_value("requests", &tags), Some(5));
        assert_eq!(registry.counter_value("requests", &TagSet::new()), None);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn counters_survive_snapshots() {
        let registry = registry();
        registry.add("requests", &TagSet::new(), 2).unwrap();

        assert_eq!(registry.snapshot().counters[0].value, 2);
        registry.add("requests", &TagSet::new(), 3).unwrap();
        assert_eq!(registry.snapshot().counters[0].value, 5);
    }

    #[test]
    fn callback_gauges_are_replaced() {
        let registry = registry();
        registry.set("queue.depth", &TagSet::new(), || 1).unwrap();
        registry.set("queue.depth", &TagSet::new(), || 2.5).unwrap();

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.gauges.len(), 1);
        assert_eq!((snapshot.gauges[0].value)(), Value::Float(2.5));

        // Callback gauges are kept across snapshots.
        assert_eq!(registry.snapshot().gauges.len(), 1);
    }

    #[test]
    fn put_gauges_are_cleared_by_snapshot() {
        let registry = registry();
        registry.put("batch.size", &TagSet::new(), 10).unwrap();
        registry.put("batch.size", &TagSet::new(), 20).unwrap();

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.puts.len(), 1);
        assert_eq!(snapshot.puts[0].value, Value::Integer(20));

        assert!(registry.snapshot().puts.is_empty());
        assert!(registry.is_empty());
    }

    #[test]
    fn series_kinds_are_independent() {
        let registry = registry();
        registry.add("x", &TagSet::new(), 1).unwrap();
        registry.set("x", &TagSet::new(), || 1).unwrap();
        registry.put("x", &TagSet::new(), 1).unwrap();

        assert_eq!(registry.len(), 3);
    }
}
