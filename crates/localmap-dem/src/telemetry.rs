//! Metric declarations for terrain acquisition.
//!
//! Metrics go through the `metrics` facade; nothing is recorded unless the
//! embedding application installs a recorder. Call [`describe_metrics`] once
//! at startup to register descriptions.

use metrics::{describe_counter, describe_histogram, Unit};

/// The kind of metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// A monotonically increasing counter.
    Counter,
    /// A histogram for recording distributions.
    Histogram,
}

/// A metric declaration with its metadata.
#[derive(Debug, Clone)]
pub struct Metric {
    /// The metric name (e.g., "localmap.dem.tiles_fetched").
    pub name: &'static str,
    /// Counter or histogram.
    pub kind: MetricKind,
    /// Human-readable description.
    pub description: &'static str,
    /// Unit of measurement.
    pub unit: Unit,
}

impl Metric {
    const fn counter(name: &'static str, description: &'static str, unit: Unit) -> Self {
        Self {
            name,
            kind: MetricKind::Counter,
            description,
            unit,
        }
    }

    const fn histogram(name: &'static str, description: &'static str, unit: Unit) -> Self {
        Self {
            name,
            kind: MetricKind::Histogram,
            description,
            unit,
        }
    }

    /// Registers this metric's description with the installed recorder.
    pub fn describe(&self) {
        match self.kind {
            MetricKind::Counter => describe_counter!(self.name, self.unit, self.description),
            MetricKind::Histogram => describe_histogram!(self.name, self.unit, self.description),
        }
    }
}

/// All metric definitions. Every metric carries a `source` label.
pub mod metric_defs {
    use super::{Metric, Unit};

    /// Tiles required by acquisitions.
    pub const TILES_REQUESTED: Metric = Metric::counter(
        "localmap.dem.tiles_requested",
        "Tiles required to cover requested areas",
        Unit::Count,
    );

    /// Tiles served from the local cache.
    pub const CACHE_HITS: Metric = Metric::counter(
        "localmap.dem.cache_hits",
        "Tiles served from the local tile cache",
        Unit::Count,
    );

    /// Tiles downloaded from a mirror.
    pub const TILES_FETCHED: Metric = Metric::counter(
        "localmap.dem.tiles_fetched",
        "Tiles downloaded from a mirror",
        Unit::Count,
    );

    /// Bytes downloaded from mirrors.
    pub const BYTES_FETCHED: Metric = Metric::counter(
        "localmap.dem.bytes_fetched",
        "Bytes downloaded from mirrors",
        Unit::Bytes,
    );

    /// Individual mirror attempts that failed.
    pub const MIRROR_FAILURES: Metric = Metric::counter(
        "localmap.dem.mirror_failures",
        "Mirror attempts that failed (timeout, HTTP error, connection error, undersized body)",
        Unit::Count,
    );

    /// Requests whose source was replaced by a global one.
    pub const SOURCE_SUBSTITUTIONS: Metric = Metric::counter(
        "localmap.dem.source_substitutions",
        "Acquisitions that switched to a global source",
        Unit::Count,
    );

    /// Acquisitions that ended with a synthetic raster.
    pub const SYNTHETIC_FALLBACKS: Metric = Metric::counter(
        "localmap.dem.synthetic_fallbacks",
        "Acquisitions that fell back to synthetic terrain",
        Unit::Count,
    );

    /// Wall-clock time of complete acquisitions.
    pub const ACQUISITION_DURATION: Metric = Metric::histogram(
        "localmap.dem.acquisition_duration_seconds",
        "Duration of elevation acquisitions",
        Unit::Seconds,
    );

    /// Every metric, for registration.
    pub const ALL: &[Metric] = &[
        TILES_REQUESTED,
        CACHE_HITS,
        TILES_FETCHED,
        BYTES_FETCHED,
        MIRROR_FAILURES,
        SOURCE_SUBSTITUTIONS,
        SYNTHETIC_FALLBACKS,
        ACQUISITION_DURATION,
    ];
}

/// Register descriptions for every metric in [`metric_defs`].
pub fn describe_metrics() {
    for metric in metric_defs::ALL {
        metric.describe();
    }
}
