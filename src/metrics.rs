use std::sync::atomic::{AtomicU64, Ordering};
use serde::Serialize;

use crate::models::Usage;

// counters shared by every clone of a client
#[derive(Debug, Default)]
pub struct ClientMetrics {
    pub completions: AtomicU64,
    pub streams: AtomicU64,
    pub failures: AtomicU64,
    pub prompt_tokens: AtomicU64,
    pub completion_tokens: AtomicU64,
}

impl ClientMetrics {
    pub fn new() -> Self {

        Self::default()

    }

    pub fn record_completion(&self, usage: &Usage) {

        self.completions.fetch_add(1, Ordering::Relaxed);
        self.prompt_tokens.fetch_add(usage.prompt_tokens, Ordering::Relaxed);
        self.completion_tokens.fetch_add(usage.completion_tokens, Ordering::Relaxed);

    }

    // streamed responses carry no usage block, so only the stream is counted
    pub fn record_stream(&self) {

        self.streams.fetch_add(1, Ordering::Relaxed);

    }

    pub fn record_failure(&self) {

        self.failures.fetch_add(1, Ordering::Relaxed);

    }

    pub fn snapshot(&self) -> MetricsSnapshot {

        MetricsSnapshot {
            completions: self.completions.load(Ordering::Relaxed),
            streams: self.streams.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            prompt_tokens: self.prompt_tokens.load(Ordering::Relaxed),
            completion_tokens: self.completion_tokens.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub completions: u64,
    pub streams: u64,
    pub failures: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl MetricsSnapshot {
    pub fn total_requests(&self) -> u64 {

        self.completions + self.streams + self.failures

    }

    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    pub fn failure_rate(&self) -> f64 {

        let total = self.total_requests();
        if total == 0 {
            return 0.0;
        }
        (self.failures as f64 / total as f64) * 100.0

    }
}
