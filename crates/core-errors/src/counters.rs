//! Per-worker metrics, merged at join points.
//!
//! Every worker owns a [`CounterState`]; the pool merges them into the main
//! thread's state when a stage finishes. Nothing here is thread-safe on
//! purpose: ownership does the synchronization.

/// Counter, category-counter, and histogram storage for one thread.
#[derive(Debug, Default, Clone)]
pub struct CounterState {
    counters: ahash::AHashMap<String, u64>,
    categories: ahash::AHashMap<(String, String), u64>,
    histograms: ahash::AHashMap<(String, u32), u64>,
}

impl CounterState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, counter: &str, value: u64) {
        *self.counters.entry(counter.to_owned()).or_default() += value;
    }

    pub fn inc(&mut self, counter: &str) {
        self.add(counter, 1);
    }

    /// `category/name` counters, e.g. `lsp.messages.processed/sorbet.mergedEdits`.
    pub fn category_add(&mut self, category: &str, name: &str, value: u64) {
        *self
            .categories
            .entry((category.to_owned(), name.to_owned()))
            .or_default() += value;
    }

    pub fn histogram_inc(&mut self, histogram: &str, bucket: u32, value: u64) {
        *self
            .histograms
            .entry((histogram.to_owned(), bucket))
            .or_default() += value;
    }

    pub fn counter(&self, counter: &str) -> u64 {
        self.counters.get(counter).copied().unwrap_or(0)
    }

    pub fn category(&self, category: &str, name: &str) -> u64 {
        self.categories
            .get(&(category.to_owned(), name.to_owned()))
            .copied()
            .unwrap_or(0)
    }

    /// Fold another worker's counters into this one.
    pub fn merge(&mut self, other: CounterState) {
        for (k, v) in other.counters {
            *self.counters.entry(k).or_default() += v;
        }
        for (k, v) in other.categories {
            *self.categories.entry(k).or_default() += v;
        }
        for (k, v) in other.histograms {
            *self.histograms.entry(k).or_default() += v;
        }
    }

    /// Render in the statsd line format (`prefix.name:value|c`), sorted so
    /// output is stable.
    pub fn to_statsd_lines(&self, prefix: &str) -> String {
        let mut lines: Vec<String> = Vec::new();
        for (name, value) in &self.counters {
            lines.push(format!("{prefix}.{name}:{value}|c"));
        }
        for ((category, name), value) in &self.categories {
            lines.push(format!("{prefix}.{category}.{name}:{value}|c"));
        }
        for ((histogram, bucket), value) in &self.histograms {
            lines.push(format!("{prefix}.{histogram}.{bucket}:{value}|c"));
        }
        lines.sort();
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn merge_sums_across_workers() {
        let mut main = CounterState::new();
        main.add("types.input.files", 3);
        let mut worker = CounterState::new();
        worker.add("types.input.files", 2);
        worker.category_add("lsp.messages.processed", "sorbet.mergedEdits", 2);
        main.merge(worker);
        assert_eq!(main.counter("types.input.files"), 5);
        assert_eq!(main.category("lsp.messages.processed", "sorbet.mergedEdits"), 2);
    }

    #[test]
    fn statsd_lines_are_sorted_and_prefixed() {
        let mut state = CounterState::new();
        state.add("b", 1);
        state.add("a", 2);
        assert_eq!(state.to_statsd_lines("lattice"), "lattice.a:2|c\nlattice.b:1|c");
    }

    #[test]
    fn missing_counters_read_zero() {
        let state = CounterState::new();
        assert_eq!(state.counter("nope"), 0);
        assert_eq!(state.category("no", "pe"), 0);
    }
}
