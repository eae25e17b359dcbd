//! Rolling performance statistics.

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::TelemetrySettings;
use crate::detect::DetectorOutcome;
use crate::snapshot::Snapshot;

/// Latest-value statistics for overlays. Overwritten in place; not a history.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PerformanceStats {
    /// Detection completions per second over the rolling window.
    pub fps: f32,
    pub inference_time_ms: f32,
    /// Peak confidence of the latest result.
    pub confidence: f32,
    /// Capture-to-dispatch time of the latest automatic command.
    pub latency_ms: f32,
    pub object_count: usize,
    pub bitrate_kbps: Option<u32>,
    /// Frames discarded because a detection was still in flight. Monotonic per session.
    pub dropped_frames: u64,
    pub model_name: String,
}

pub struct TelemetryAggregator {
    window: usize,
    completions: VecDeque<Instant>,
    stats: PerformanceStats,
    published: Arc<Snapshot<PerformanceStats>>,
}

impl TelemetryAggregator {
    pub fn new(settings: &TelemetrySettings, model_name: &str) -> Self {
        let stats = PerformanceStats {
            model_name: model_name.to_string(),
            ..PerformanceStats::default()
        };
        Self {
            window: settings.fps_window.max(2),
            completions: VecDeque::with_capacity(settings.fps_window.max(2)),
            published: Arc::new(Snapshot::new(stats.clone())),
            stats,
        }
    }

    /// Read side shared with session handles.
    pub fn shared(&self) -> Arc<Snapshot<PerformanceStats>> {
        Arc::clone(&self.published)
    }

    pub fn stats(&self) -> &PerformanceStats {
        &self.stats
    }

    /// A detection request finished (or was given up on) at `now`.
    pub fn record_completion(&mut self, now: Instant) {
        if self.completions.len() == self.window {
            self.completions.pop_front();
        }
        self.completions.push_back(now);
        self.stats.fps = windowed_rate(&self.completions);
        self.publish();
    }

    pub fn record_result(&mut self, inference_time: Duration, outcome: &DetectorOutcome) {
        self.stats.inference_time_ms = millis(inference_time);
        self.stats.confidence = outcome.peak_confidence();
        self.stats.object_count = outcome.object_count();
        self.publish();
    }

    pub fn record_dropped(&mut self, total: u64) {
        if total != self.stats.dropped_frames {
            self.stats.dropped_frames = total;
            self.publish();
        }
    }

    pub fn record_dispatch(&mut self, captured_at: Instant, now: Instant) {
        self.stats.latency_ms = millis(now.saturating_duration_since(captured_at));
        self.publish();
    }

    pub fn record_bitrate(&mut self, kbps: Option<u32>) {
        if kbps != self.stats.bitrate_kbps {
            self.stats.bitrate_kbps = kbps;
            self.publish();
        }
    }

    fn publish(&self) {
        self.published.publish(self.stats.clone());
    }
}

fn windowed_rate(completions: &VecDeque<Instant>) -> f32 {
    let (Some(first), Some(last)) = (completions.front(), completions.back()) else {
        return 0.0;
    };
    let span = last.saturating_duration_since(*first).as_secs_f32();
    if completions.len() < 2 || span <= 0.0 {
        return 0.0;
    }
    (completions.len() - 1) as f32 / span
}

fn millis(duration: Duration) -> f32 {
    duration.as_secs_f32() * 1_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::DetectionBox;
    use crate::error::FailureKind;

    fn aggregator(window: usize) -> TelemetryAggregator {
        TelemetryAggregator::new(&TelemetrySettings { fps_window: window }, "blob")
    }

    #[test]
    fn fps_is_a_windowed_rate() {
        let mut t = aggregator(5);
        let t0 = Instant::now();
        t.record_completion(t0);
        assert_eq!(t.stats().fps, 0.0);
        for i in 1..=4 {
            t.record_completion(t0 + Duration::from_millis(100 * i));
        }
        assert!((t.stats().fps - 10.0).abs() < 0.01);

        // Window slides: only the last five completions (50 ms apart) count.
        for i in 1..=5 {
            t.record_completion(t0 + Duration::from_millis(400 + 50 * i));
        }
        assert!((t.stats().fps - 20.0).abs() < 0.01);
    }

    #[test]
    fn result_fields_come_from_latest_outcome() {
        let mut t = aggregator(30);
        let outcome = DetectorOutcome::Detections(vec![
            DetectionBox::new("person", 0.5, 0.5, 0.1, 0.1, 0.8),
            DetectionBox::new("person", 0.2, 0.5, 0.1, 0.1, 0.6),
        ]);
        t.record_result(Duration::from_millis(42), &outcome);
        let stats = t.shared().load();
        assert_eq!(stats.object_count, 2);
        assert!((stats.confidence - 0.8).abs() < 1e-6);
        assert!((stats.inference_time_ms - 42.0).abs() < 1e-3);
        assert_eq!(stats.model_name, "blob");

        t.record_result(
            Duration::from_millis(5),
            &DetectorOutcome::Failure {
                kind: FailureKind::Error,
            },
        );
        assert_eq!(t.shared().load().object_count, 0);
        assert_eq!(t.shared().load().confidence, 0.0);
    }

    #[test]
    fn latency_dropped_and_bitrate_are_published() {
        let mut t = aggregator(30);
        let reader = t.shared();
        let captured = Instant::now();
        t.record_dispatch(captured, captured + Duration::from_millis(120));
        t.record_dropped(7);
        t.record_bitrate(Some(4_000));
        let stats = reader.load();
        assert!((stats.latency_ms - 120.0).abs() < 1e-3);
        assert_eq!(stats.dropped_frames, 7);
        assert_eq!(stats.bitrate_kbps, Some(4_000));
    }

    #[test]
    fn stats_serialize_for_the_ui() {
        let json = serde_json::to_value(PerformanceStats::default()).unwrap();
        for key in [
            "fps",
            "inference_time_ms",
            "confidence",
            "latency_ms",
            "object_count",
            "bitrate_kbps",
            "dropped_frames",
            "model_name",
        ] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
    }
}
