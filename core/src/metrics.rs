use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Mutex;

const DURATION_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];
const SIZE_BUCKETS: &[f64] = &[
    64.0, 256.0, 1024.0, 4096.0, 16384.0, 65536.0, 262144.0, 1048576.0,
];
const SCORE_BUCKETS: &[f64] = &[0.5, 0.6, 0.7, 0.8, 0.9, 0.95, 0.99, 1.0];

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Series {
    name: &'static str,
    labels: Vec<(&'static str, String)>,
}

impl Series {
    fn new(name: &'static str, labels: &[(&'static str, &str)]) -> Self {
        Self {
            name,
            labels: labels
                .iter()
                .map(|(key, value)| (*key, value.to_string()))
                .collect(),
        }
    }

    fn has_label(&self, key: &str, value: &str) -> bool {
        self.labels
            .iter()
            .any(|(label_key, label_value)| *label_key == key && label_value == value)
    }

    fn render_labels(&self, extra: Option<(&str, String)>) -> String {
        let mut pairs: Vec<String> = self
            .labels
            .iter()
            .map(|(key, value)| format!("{}=\"{}\"", key, value))
            .collect();
        if let Some((key, value)) = extra {
            pairs.push(format!("{}=\"{}\"", key, value));
        }
        if pairs.is_empty() {
            String::new()
        } else {
            format!("{{{}}}", pairs.join(","))
        }
    }
}

#[derive(Debug, Clone)]
struct Histogram {
    bounds: &'static [f64],
    counts: Vec<u64>,
    sum: f64,
    count: u64,
}

impl Histogram {
    fn new(bounds: &'static [f64]) -> Self {
        Self {
            bounds,
            counts: vec![0; bounds.len()],
            sum: 0.0,
            count: 0,
        }
    }

    fn observe(&mut self, value: f64) {
        for (idx, bound) in self.bounds.iter().enumerate() {
            if value <= *bound {
                self.counts[idx] += 1;
            }
        }
        self.sum += value;
        self.count += 1;
    }
}

#[derive(Default)]
struct MetricsState {
    counters: BTreeMap<Series, u64>,
    gauges: BTreeMap<Series, f64>,
    histograms: BTreeMap<Series, Histogram>,
}

/// Process-wide metric registry: labeled counters, gauges and histograms
/// behind one mutex. `render_text` enumerates everything in exposition
/// format; no scrape endpoint lives in the core.
pub struct MetricsRegistry {
    state: Mutex<MetricsState>,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MetricsState::default()),
        }
    }

    fn inc(&self, name: &'static str, labels: &[(&'static str, &str)], by: u64) {
        let mut state = self.state.lock().unwrap();
        *state.counters.entry(Series::new(name, labels)).or_insert(0) += by;
    }

    fn set(&self, name: &'static str, labels: &[(&'static str, &str)], value: f64) {
        let mut state = self.state.lock().unwrap();
        state.gauges.insert(Series::new(name, labels), value);
    }

    fn observe(
        &self,
        name: &'static str,
        labels: &[(&'static str, &str)],
        bounds: &'static [f64],
        value: f64,
    ) {
        let mut state = self.state.lock().unwrap();
        state
            .histograms
            .entry(Series::new(name, labels))
            .or_insert_with(|| Histogram::new(bounds))
            .observe(value);
    }

    pub fn record_query(&self, project_id: &str, status: &str, duration_secs: f64) {
        self.inc(
            "project_queries_total",
            &[("project_id", project_id), ("status", status)],
            1,
        );
        self.observe(
            "project_query_duration_seconds",
            &[("project_id", project_id)],
            DURATION_BUCKETS,
            duration_secs,
        );
    }

    pub fn record_cache_lookup(&self, project_id: &str, hit: bool) {
        let name = if hit {
            "project_cache_hits_total"
        } else {
            "project_cache_misses_total"
        };
        self.inc(name, &[("project_id", project_id)], 1);
    }

    pub fn record_ingest(&self, project_id: &str, status: &str) {
        self.inc(
            "project_ingests_total",
            &[("project_id", project_id), ("status", status)],
            1,
        );
    }

    pub fn record_error(&self, project_id: &str, error_type: &str) {
        self.inc(
            "project_errors_total",
            &[("project_id", project_id), ("error_type", error_type)],
            1,
        );
    }

    pub fn set_documents_total(&self, project_id: &str, documents: u64) {
        self.set(
            "project_documents_total",
            &[("project_id", project_id)],
            documents as f64,
        );
    }

    pub fn record_key_validation(&self, project_id: &str, result: &str) {
        self.inc(
            "project_api_key_validations_total",
            &[("project_id", project_id), ("result", result)],
            1,
        );
    }

    pub fn set_api_keys_active(&self, project_id: &str, active: u64) {
        self.set(
            "project_api_keys_active",
            &[("project_id", project_id)],
            active as f64,
        );
    }

    pub fn record_project_created(&self) {
        self.inc("project_creations_total", &[], 1);
    }

    pub fn record_project_updated(&self) {
        self.inc("project_updates_total", &[], 1);
    }

    pub fn record_project_deleted(&self) {
        self.inc("project_deletions_total", &[], 1);
    }

    pub fn record_chunking(&self, strategy: &str, duration_secs: f64, chunk_sizes: &[usize]) {
        self.observe(
            "chunking_duration_seconds",
            &[("strategy", strategy)],
            DURATION_BUCKETS,
            duration_secs,
        );
        self.inc("chunks_created_total", &[], chunk_sizes.len() as u64);
        for size in chunk_sizes {
            self.observe("chunk_size_bytes", &[], SIZE_BUCKETS, *size as f64);
        }
    }

    pub fn record_query_expansion(&self, duration_secs: f64) {
        self.inc("query_expansions_total", &[], 1);
        self.observe(
            "query_expansion_duration_seconds",
            &[],
            DURATION_BUCKETS,
            duration_secs,
        );
    }

    pub fn record_semantic_cache(&self, hit: bool, similarity: Option<f32>) {
        let name = if hit {
            "semantic_cache_hits_total"
        } else {
            "semantic_cache_misses_total"
        };
        self.inc(name, &[], 1);
        if let Some(similarity) = similarity {
            self.observe(
                "semantic_cache_similarity_scores",
                &[],
                SCORE_BUCKETS,
                similarity as f64,
            );
        }
    }

    pub fn record_heartbeat_failure(&self, project_id: &str) {
        self.inc(
            "heartbeat_failures_total",
            &[("project_id", project_id)],
            1,
        );
    }

    /// Drops every series labeled with the project, keeping label cardinality
    /// bounded by the number of live projects.
    pub fn remove_project(&self, project_id: &str) {
        let mut state = self.state.lock().unwrap();
        state
            .counters
            .retain(|series, _| !series.has_label("project_id", project_id));
        state
            .gauges
            .retain(|series, _| !series.has_label("project_id", project_id));
        state
            .histograms
            .retain(|series, _| !series.has_label("project_id", project_id));
    }

    /// Text exposition of the whole registry, one family at a time.
    pub fn render_text(&self) -> String {
        let state = self.state.lock().unwrap();
        let mut out = String::new();

        let mut last_family = "";
        for (series, value) in &state.counters {
            if series.name != last_family {
                let _ = writeln!(out, "# TYPE {} counter", series.name);
                last_family = series.name;
            }
            let _ = writeln!(out, "{}{} {}", series.name, series.render_labels(None), value);
        }

        let mut last_family = "";
        for (series, value) in &state.gauges {
            if series.name != last_family {
                let _ = writeln!(out, "# TYPE {} gauge", series.name);
                last_family = series.name;
            }
            let _ = writeln!(out, "{}{} {}", series.name, series.render_labels(None), value);
        }

        let mut last_family = "";
        for (series, histogram) in &state.histograms {
            if series.name != last_family {
                let _ = writeln!(out, "# TYPE {} histogram", series.name);
                last_family = series.name;
            }
            for (idx, bound) in histogram.bounds.iter().enumerate() {
                let _ = writeln!(
                    out,
                    "{}_bucket{} {}",
                    series.name,
                    series.render_labels(Some(("le", bound.to_string()))),
                    histogram.counts[idx]
                );
            }
            let _ = writeln!(
                out,
                "{}_bucket{} {}",
                series.name,
                series.render_labels(Some(("le", "+Inf".to_string()))),
                histogram.count
            );
            let _ = writeln!(
                out,
                "{}_sum{} {}",
                series.name,
                series.render_labels(None),
                histogram.sum
            );
            let _ = writeln!(
                out,
                "{}_count{} {}",
                series.name,
                series.render_labels(None),
                histogram.count
            );
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_per_label_set() {
        let registry = MetricsRegistry::new();
        registry.record_query("p1", "ok", 0.02);
        registry.record_query("p1", "ok", 0.04);
        registry.record_query("p1", "error", 0.5);

        let text = registry.render_text();
        assert!(text.contains("project_queries_total{project_id=\"p1\",status=\"ok\"} 2"));
        assert!(text.contains("project_queries_total{project_id=\"p1\",status=\"error\"} 1"));
    }

    #[test]
    fn histogram_buckets_are_cumulative() {
        let registry = MetricsRegistry::new();
        registry.record_query("p1", "ok", 0.02);
        registry.record_query("p1", "ok", 0.2);

        let text = registry.render_text();
        assert!(text
            .contains("project_query_duration_seconds_bucket{project_id=\"p1\",le=\"0.025\"} 1"));
        assert!(
            text.contains("project_query_duration_seconds_bucket{project_id=\"p1\",le=\"0.25\"} 2")
        );
        assert!(
            text.contains("project_query_duration_seconds_bucket{project_id=\"p1\",le=\"+Inf\"} 2")
        );
        assert!(text.contains("project_query_duration_seconds_count{project_id=\"p1\"} 2"));
    }

    #[test]
    fn remove_project_drops_all_series() {
        let registry = MetricsRegistry::new();
        registry.record_query("p1", "ok", 0.02);
        registry.record_query("p2", "ok", 0.02);
        registry.set_documents_total("p1", 5);

        registry.remove_project("p1");

        let text = registry.render_text();
        assert!(!text.contains("project_id=\"p1\""));
        assert!(text.contains("project_id=\"p2\""));
    }

    #[test]
    fn unlabeled_families_render_without_braces() {
        let registry = MetricsRegistry::new();
        registry.record_project_created();
        registry.record_semantic_cache(true, Some(0.97));

        let text = registry.render_text();
        assert!(text.contains("project_creations_total 1"));
        assert!(text.contains("semantic_cache_hits_total 1"));
        assert!(text.contains("semantic_cache_similarity_scores_bucket{le=\"0.99\"} 1"));
    }

    #[test]
    fn gauges_overwrite_rather_than_accumulate() {
        let registry = MetricsRegistry::new();
        registry.set_documents_total("p1", 5);
        registry.set_documents_total("p1", 3);

        let text = registry.render_text();
        assert!(text.contains("project_documents_total{project_id=\"p1\"} 3"));
    }
}
