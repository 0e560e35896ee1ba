//! Metric declarations for the gprox pipeline.
//!
//! Every metric the tile cache, mosaic engine, proximity engine and writer
//! record is declared once in [`metric_defs`], with its unit and label keys.
//! Recording goes through the `metrics` facade, so nothing is collected
//! unless the embedding application installs a recorder.
//!
//! ```rust,ignore
//! use gprox_metrics::{describe_metrics, metric_defs, MetricLabels};
//!
//! describe_metrics();
//!
//! let labels = MetricLabels::new("esa-worldcover");
//! metrics::counter!(metric_defs::CACHE_HITS.name, &labels.to_labels()).increment(1);
//! ```

use metrics::{describe_counter, describe_histogram, Unit};

/// Counter or histogram. The pipeline records no gauges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Histogram,
}

/// A metric name with the metadata handed to the recorder at startup.
///
/// ```rust
/// use gprox_metrics::{Metric, MetricKind};
/// use metrics::Unit;
///
/// const TILES_FETCHED: Metric = Metric::counter("gprox.example.tiles_fetched")
///     .with_description("Tiles fetched from the remote store")
///     .with_unit(Unit::Count)
///     .with_labels(&["source"]);
///
/// assert_eq!(TILES_FETCHED.kind, MetricKind::Counter);
/// ```
#[derive(Debug, Clone)]
pub struct Metric {
    pub name: &'static str,
    pub kind: MetricKind,
    pub description: &'static str,
    pub unit: Option<Unit>,
    /// Label keys the recording sites attach.
    pub labels: &'static [&'static str],
}

impl Metric {
    const fn new(name: &'static str, kind: MetricKind) -> Self {
        Self {
            name,
            kind,
            description: "",
            unit: None,
            labels: &[],
        }
    }

    pub const fn counter(name: &'static str) -> Self {
        Self::new(name, MetricKind::Counter)
    }

    pub const fn histogram(name: &'static str) -> Self {
        Self::new(name, MetricKind::Histogram)
    }

    pub const fn with_description(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    pub const fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = Some(unit);
        self
    }

    pub const fn with_labels(mut self, labels: &'static [&'static str]) -> Self {
        self.labels = labels;
        self
    }

    /// Register the description (and unit) with the installed recorder.
    pub fn describe(&self) {
        match (self.kind, self.unit) {
            (MetricKind::Counter, Some(unit)) => {
                describe_counter!(self.name, unit, self.description);
            }
            (MetricKind::Counter, None) => {
                describe_counter!(self.name, self.description);
            }
            (MetricKind::Histogram, Some(unit)) => {
                describe_histogram!(self.name, unit, self.description);
            }
            (MetricKind::Histogram, None) => {
                describe_histogram!(self.name, self.description);
            }
        }
    }
}

/// All metric definitions for the pipeline.
pub mod metric_defs {
    use super::{Metric, Unit};

    /// Label present on every store-scoped metric.
    pub const SOURCE_LABELS: &[&str] = &["source"];

    // ========================================================================
    // Tile Cache
    // ========================================================================

    pub const CACHE_HITS: Metric = Metric::counter("gprox.cache.hits")
        .with_description("Tile cache lookups served from disk")
        .with_unit(Unit::Count)
        .with_labels(SOURCE_LABELS);

    pub const CACHE_MISSES: Metric = Metric::counter("gprox.cache.misses")
        .with_description("Tile cache lookups with no local copy")
        .with_unit(Unit::Count)
        .with_labels(SOURCE_LABELS);

    /// Cached copies replaced because the remote object changed.
    pub const CACHE_REVALIDATED: Metric = Metric::counter("gprox.cache.revalidated")
        .with_description("Cached tiles re-downloaded after the remote object changed")
        .with_unit(Unit::Count)
        .with_labels(SOURCE_LABELS);

    /// Cached copies reused because the store offered nothing to compare.
    pub const CACHE_UNVALIDATED: Metric = Metric::counter("gprox.cache.unvalidated")
        .with_description("Cached tiles reused without a usable remote version")
        .with_unit(Unit::Count)
        .with_labels(SOURCE_LABELS);

    pub const CACHE_DOWNLOADED_BYTES: Metric = Metric::counter("gprox.cache.downloaded_bytes")
        .with_description("Bytes downloaded from remote stores")
        .with_unit(Unit::Bytes)
        .with_labels(SOURCE_LABELS);

    // ========================================================================
    // Mosaic
    // ========================================================================

    pub const MOSAIC_SOURCES: Metric = Metric::histogram("gprox.mosaic.sources")
        .with_description("Sources stitched per mosaic")
        .with_unit(Unit::Count);

    /// Pixels per band, summed over outputs.
    pub const MOSAIC_OUTPUT_PIXELS: Metric = Metric::counter("gprox.mosaic.output_pixels")
        .with_description("Pixels per band produced by the mosaic engine")
        .with_unit(Unit::Count);

    // ========================================================================
    // Proximity
    // ========================================================================

    /// Labels: kernel
    pub const PROXIMITY_DURATION: Metric = Metric::histogram("gprox.proximity.duration_ms")
        .with_description("Wall-clock time of a proximity computation in milliseconds")
        .with_unit(Unit::Milliseconds)
        .with_labels(&["kernel"]);

    // ========================================================================
    // Output
    // ========================================================================

    pub const OUTPUT_FILES_WRITTEN: Metric = Metric::counter("gprox.output.files_written")
        .with_description("GeoTIFF files written")
        .with_unit(Unit::Count);

    pub const ALL: &[&Metric] = &[
        &CACHE_HITS,
        &CACHE_MISSES,
        &CACHE_REVALIDATED,
        &CACHE_UNVALIDATED,
        &CACHE_DOWNLOADED_BYTES,
        &MOSAIC_SOURCES,
        &MOSAIC_OUTPUT_PIXELS,
        &PROXIMITY_DURATION,
        &OUTPUT_FILES_WRITTEN,
    ];
}

/// The `source` label carried by tile cache metrics.
///
/// ```rust
/// use gprox_metrics::MetricLabels;
///
/// let labels = MetricLabels::new("esa-worldcover");
/// assert_eq!(labels.to_labels(), vec![("source", "esa-worldcover".to_string())]);
/// ```
#[derive(Debug, Clone)]
pub struct MetricLabels {
    /// Remote store name.
    pub source: String,
}

impl MetricLabels {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    /// Key/value pairs in the form the `metrics` macros accept.
    pub fn to_labels(&self) -> Vec<(&'static str, String)> {
        vec![("source", self.source.clone())]
    }
}

/// Describe every pipeline metric. Call once, after installing a recorder.
pub fn describe_metrics() {
    for metric in metric_defs::ALL {
        metric.describe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_metrics_carry_source_label() {
        for metric in [
            &metric_defs::CACHE_HITS,
            &metric_defs::CACHE_MISSES,
            &metric_defs::CACHE_REVALIDATED,
            &metric_defs::CACHE_UNVALIDATED,
            &metric_defs::CACHE_DOWNLOADED_BYTES,
        ] {
            assert_eq!(metric.labels, metric_defs::SOURCE_LABELS, "{}", metric.name);
        }
    }

    #[test]
    fn test_metric_definitions() {
        assert_eq!(metric_defs::CACHE_HITS.kind, MetricKind::Counter);
        assert_eq!(metric_defs::CACHE_DOWNLOADED_BYTES.unit, Some(Unit::Bytes));
        assert_eq!(metric_defs::MOSAIC_SOURCES.kind, MetricKind::Histogram);
        assert_eq!(metric_defs::PROXIMITY_DURATION.unit, Some(Unit::Milliseconds));
        assert_eq!(metric_defs::PROXIMITY_DURATION.labels, &["kernel"]);
    }

    #[test]
    fn test_all_metric_names_unique() {
        let mut names: Vec<_> = metric_defs::ALL.iter().map(|m| m.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), metric_defs::ALL.len());
    }

    #[test]
    fn test_describe_without_recorder() {
        // no recorder installed: describing must be a no-op
        describe_metrics();
    }
}
