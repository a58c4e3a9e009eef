//! Connection Metrics
//!
//! Counters plus round-trip latency statistics for the feed connection.
//! Mutation is crate-internal: the router, the connection manager and the
//! outbox feed it; everyone else reads an immutable [`MetricsSnapshot`].

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::Serialize;

/// Smoothing factor for the latency moving average.
pub const LATENCY_EMA_ALPHA: f64 = 0.2;

/// Coarse connection quality bucket derived from round-trip latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityLevel {
    /// At most 100ms.
    Excellent,
    /// At most 500ms.
    Good,
    /// At most 1000ms.
    Fair,
    /// Above 1000ms.
    Poor,
    /// No round trip measured yet.
    #[default]
    Unknown,
}

impl QualityLevel {
    /// Bucket a latency measurement.
    #[must_use]
    pub fn from_latency_ms(latency_ms: f64) -> Self {
        if !latency_ms.is_finite() || latency_ms < 0.0 {
            Self::Unknown
        } else if latency_ms <= 100.0 {
            Self::Excellent
        } else if latency_ms <= 500.0 {
            Self::Good
        } else if latency_ms <= 1000.0 {
            Self::Fair
        } else {
            Self::Poor
        }
    }

    /// Lowercase label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Excellent => "excellent",
            Self::Good => "good",
            Self::Fair => "fair",
            Self::Poor => "poor",
            Self::Unknown => "unknown",
        }
    }
}

/// Point-in-time copy of all metrics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    /// Frames received from the transport.
    pub messages_received: u64,
    /// Frames or outbound messages dropped (bad input, overflow, encode failure).
    pub messages_dropped: u64,
    /// Messages written to the transport.
    pub messages_sent: u64,
    /// Most recent round-trip latency.
    pub last_latency_ms: Option<f64>,
    /// Exponential moving average of round-trip latency.
    pub avg_latency_ms: Option<f64>,
    /// Errors observed (transport, timeout, server, configuration).
    pub error_count: u64,
    /// Reconnect attempts scheduled.
    pub reconnect_count: u64,
    /// Quality bucket of the last round trip.
    pub quality_level: QualityLevel,
}

#[derive(Debug, Default)]
struct LatencyState {
    last_ms: Option<f64>,
    avg_ms: Option<f64>,
    quality: QualityLevel,
}

/// Aggregates connection metrics.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    messages_received: AtomicU64,
    messages_dropped: AtomicU64,
    messages_sent: AtomicU64,
    error_count: AtomicU64,
    reconnect_count: AtomicU64,
    latency: RwLock<LatencyState>,
}

impl MetricsCollector {
    /// Create a collector with everything at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_error(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reconnect(&self) {
        self.reconnect_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Fold a round-trip measurement into the latency statistics and return
    /// the new quality level.
    pub(crate) fn record_latency(&self, latency_ms: f64) -> QualityLevel {
        let mut latency = self.latency.write();
        latency.last_ms = Some(latency_ms);
        latency.avg_ms = Some(latency.avg_ms.map_or(latency_ms, |avg| {
            LATENCY_EMA_ALPHA.mul_add(latency_ms, (1.0 - LATENCY_EMA_ALPHA) * avg)
        }));
        latency.quality = QualityLevel::from_latency_ms(latency_ms);
        latency.quality
    }

    /// Current quality level.
    #[must_use]
    pub fn quality(&self) -> QualityLevel {
        self.latency.read().quality
    }

    /// Immutable copy of every metric.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let latency = self.latency.read();
        MetricsSnapshot {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            last_latency_ms: latency.last_ms,
            avg_latency_ms: latency.avg_ms,
            error_count: self.error_count.load(Ordering::Relaxed),
            reconnect_count: self.reconnect_count.load(Ordering::Relaxed),
            quality_level: latency.quality,
        }
    }
}
