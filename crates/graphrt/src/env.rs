use std::env;
use std::sync::OnceLock;

static GRAPHRT_PASS_STATS: OnceLock<bool> = OnceLock::new();
static GRAPHRT_TRANSITION_MEMORY: OnceLock<Option<bool>> = OnceLock::new();
static GRAPHRT_NUM_THREADS: OnceLock<Option<usize>> = OnceLock::new();

fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

fn non_empty_var(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Some(value),
        _ => None,
    }
}

pub(crate) fn pass_stats_enabled() -> bool {
    *GRAPHRT_PASS_STATS.get_or_init(|| {
        non_empty_var("GRAPHRT_PASS_STATS")
            .map(|value| parse_bool(&value))
            .unwrap_or(false)
    })
}

pub(crate) fn transition_memory_override() -> Option<bool> {
    *GRAPHRT_TRANSITION_MEMORY
        .get_or_init(|| non_empty_var("GRAPHRT_TRANSITION_MEMORY").map(|value| parse_bool(&value)))
}

pub(crate) fn num_threads_override() -> Option<usize> {
    *GRAPHRT_NUM_THREADS.get_or_init(|| {
        non_empty_var("GRAPHRT_NUM_THREADS").and_then(|value| value.trim().parse::<usize>().ok())
    })
}
