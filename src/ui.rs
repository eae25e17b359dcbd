//! Terminal display for the binaries: startup stages and a live tracking status line.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

use crate::telemetry::PerformanceStats;
use crate::tracking::TrackingState;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool) -> Self {
        Self { mode, is_tty }
    }

    pub fn from_args(ui_flag: Option<&str>, is_tty: bool) -> Self {
        let mode = match ui_flag {
            Some("plain") => UiMode::Plain,
            Some("pretty") => UiMode::Pretty,
            _ => UiMode::Auto,
        };
        Self::new(mode, is_tty)
    }

    fn pretty(&self) -> bool {
        self.is_tty && self.mode != UiMode::Plain
    }

    /// Announce a startup stage; the returned guard reports its duration when dropped.
    pub fn stage(&self, name: &str) -> StageGuard {
        let spinner = if self.pretty() {
            let spinner = ProgressBar::new_spinner();
            spinner.set_draw_target(ProgressDrawTarget::stderr());
            spinner.enable_steady_tick(Duration::from_millis(120));
            spinner.set_style(
                ProgressStyle::with_template("{spinner} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            spinner.set_message(format!("{name}…"));
            Some(spinner)
        } else {
            eprintln!("==> {}", name);
            None
        };
        StageGuard {
            name: name.to_string(),
            start: Instant::now(),
            spinner,
        }
    }

    /// Live status for a run of known length.
    pub fn run_progress(&self, total: Duration) -> RunProgress {
        let bar = if self.pretty() {
            let bar = ProgressBar::new(total.as_millis() as u64);
            bar.set_draw_target(ProgressDrawTarget::stderr());
            bar.set_style(
                ProgressStyle::with_template("[{elapsed_precise}] {wide_bar} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
            );
            Some(bar)
        } else {
            None
        };
        RunProgress {
            bar,
            last_plain: None,
        }
    }
}

pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let message = format!("✔ {} ({})", self.name, format_duration(self.start.elapsed()));
        match &self.spinner {
            Some(spinner) => spinner.finish_with_message(message),
            None => eprintln!("{message}"),
        }
    }
}

/// Plain mode prints at most this often.
const PLAIN_EVERY: Duration = Duration::from_secs(1);

pub struct RunProgress {
    bar: Option<ProgressBar>,
    last_plain: Option<Instant>,
}

impl RunProgress {
    pub fn update(&mut self, elapsed: Duration, state: &TrackingState, stats: &PerformanceStats) {
        let line = status_line(state, stats);
        match &self.bar {
            Some(bar) => {
                bar.set_position(elapsed.as_millis() as u64);
                bar.set_message(line);
            }
            None => {
                let due = self.last_plain.map_or(true, |at| at.elapsed() >= PLAIN_EVERY);
                if due {
                    eprintln!("{:>6.1}s {}", elapsed.as_secs_f32(), line);
                    self.last_plain = Some(Instant::now());
                }
            }
        }
    }

    pub fn finish(self) {
        if let Some(bar) = self.bar {
            bar.finish_and_clear();
        }
    }
}

/// One-line status banner, e.g. `Locked · 14.8 fps · 12ms · dropped 3 · reacq 1`.
pub fn status_line(state: &TrackingState, stats: &PerformanceStats) -> String {
    let mut line = format!(
        "{} · {:.1} fps · {:.0}ms · dropped {}",
        state.phase, stats.fps, stats.inference_time_ms, stats.dropped_frames
    );
    if state.missed_frame_count > 0 {
        line.push_str(&format!(" · missed {}", state.missed_frame_count));
    }
    if state.reacquisitions > 0 {
        line.push_str(&format!(" · reacq {}", state.reacquisitions));
    }
    if state.tracked_frames > 0 {
        line.push_str(&format!(" · tracked {}", state.tracked_frames));
    }
    line
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::TrackingPhase;

    #[test]
    fn status_line_shows_only_nonzero_counters() {
        let mut state = TrackingState {
            phase: TrackingPhase::Locked,
            ..TrackingState::default()
        };
        let stats = PerformanceStats {
            fps: 14.84,
            inference_time_ms: 12.2,
            dropped_frames: 3,
            ..PerformanceStats::default()
        };
        assert_eq!(
            status_line(&state, &stats),
            "Locked · 14.8 fps · 12ms · dropped 3"
        );
        state.reacquisitions = 1;
        assert!(status_line(&state, &stats).ends_with("· reacq 1"));
    }

    #[test]
    fn plain_mode_never_draws_bars() {
        let ui = Ui::from_args(Some("plain"), true);
        assert!(!ui.pretty());
        assert!(Ui::from_args(None, true).pretty());
        assert!(!Ui::from_args(Some("pretty"), false).pretty());
    }
}
