/// Prometheusメトリクス定義。
use prometheus::{
    Counter, Histogram, Registry, register_counter_with_registry,
    register_histogram_with_registry,
};
use std::sync::Arc;

/// メトリクスコレクター。
#[derive(Debug, Clone)]
pub struct Metrics {
    // カウンター
    pub candidates_fetched: Counter,
    pub duplicates_dropped: Counter,
    pub prefilter_dropped: Counter,
    pub candidates_classified: Counter,
    pub candidates_excluded: Counter,
    pub candidates_verified: Counter,
    pub candidates_unverified: Counter,
    pub records_emitted: Counter,

    // ヒストグラム
    pub fetch_duration: Histogram,
    pub classify_duration: Histogram,
    pub verify_duration: Histogram,
}

impl Metrics {
    /// 新しいメトリクスコレクターを作成する。
    pub fn new(registry: Arc<Registry>) -> Result<Self, prometheus::Error> {
        Ok(Self {
            candidates_fetched: register_counter_with_registry!(
                "cinescout_candidates_fetched_total",
                "Total number of candidates fetched from the search surface",
                registry
            )?,
            duplicates_dropped: register_counter_with_registry!(
                "cinescout_duplicates_dropped_total",
                "Total number of duplicate candidates dropped during merge",
                registry
            )?,
            prefilter_dropped: register_counter_with_registry!(
                "cinescout_prefilter_dropped_total",
                "Total number of candidates dropped by the keyword pre-filter",
                registry
            )?,
            candidates_classified: register_counter_with_registry!(
                "cinescout_candidates_classified_total",
                "Total number of candidates that survived classification",
                registry
            )?,
            candidates_excluded: register_counter_with_registry!(
                "cinescout_candidates_excluded_total",
                "Total number of candidates excluded by classification",
                registry
            )?,
            candidates_verified: register_counter_with_registry!(
                "cinescout_candidates_verified_total",
                "Total number of candidates verified against the metadata catalog",
                registry
            )?,
            candidates_unverified: register_counter_with_registry!(
                "cinescout_candidates_unverified_total",
                "Total number of candidates that proceeded unverified",
                registry
            )?,
            records_emitted: register_counter_with_registry!(
                "cinescout_records_emitted_total",
                "Total number of ranked records emitted to the sink",
                registry
            )?,
            fetch_duration: register_histogram_with_registry!(
                "cinescout_fetch_duration_seconds",
                "Wall-clock duration of the fetch stage",
                registry
            )?,
            classify_duration: register_histogram_with_registry!(
                "cinescout_classify_duration_seconds",
                "Wall-clock duration of the classification stage",
                registry
            )?,
            verify_duration: register_histogram_with_registry!(
                "cinescout_verify_duration_seconds",
                "Wall-clock duration of the verification stage",
                registry
            )?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_register_on_a_fresh_registry() {
        let registry = Arc::new(Registry::new());
        let metrics = Metrics::new(Arc::clone(&registry)).expect("metrics should register");

        metrics.candidates_fetched.inc_by(3.0);
        metrics.records_emitted.inc();

        let families = registry.gather();
        assert!(families
            .iter()
            .any(|family| family.get_name() == "cinescout_candidates_fetched_total"));
    }

    #[test]
    fn duplicate_registration_fails() {
        let registry = Arc::new(Registry::new());
        let _metrics = Metrics::new(Arc::clone(&registry)).expect("first registration");

        assert!(Metrics::new(registry).is_err());
    }
}
