use std::collections::HashMap;
use std::time::Instant;

/// Cross-cutting logger for indexing-run events.
///
/// Keeps the use case free of any particular output mechanism; the CLI uses
/// [`StdoutPipelineLogger`], tests and embedders that consume the event
/// channel directly use [`NullPipelineLogger`].
pub trait PipelineLogger: Send {
    /// Report run progress as a percentage plus status text.
    fn progress(&mut self, percent: u8, status: &str);

    /// Record how long a named stage took (`detect` per sampled frame,
    /// `cluster` and `persist` once per run).
    fn timing(&mut self, stage: &str, duration_ms: f64);

    /// Record a point-in-time metric, e.g. `faces_per_frame`.
    fn metric(&mut self, name: &str, value: f64);

    fn info(&mut self, message: &str);

    /// Emit an end-of-run summary. Default: no-op.
    fn summary(&self) {}
}

pub struct NullPipelineLogger;

impl PipelineLogger for NullPipelineLogger {
    fn progress(&mut self, _percent: u8, _status: &str) {}
    fn timing(&mut self, _stage: &str, _duration_ms: f64) {}
    fn metric(&mut self, _name: &str, _value: f64) {}
    fn info(&mut self, _message: &str) {}
}

/// Records per-stage timings and metrics and logs progress through `log`.
///
/// Progress lines are emitted only when the percentage has moved by at least
/// `step` since the last logged line (or hits a milestone of 100).
pub struct StdoutPipelineLogger {
    step: u8,
    last_logged: Option<u8>,
    timings: HashMap<String, Vec<f64>>,
    metrics: HashMap<String, Vec<f64>>,
    start_time: Instant,
}

impl StdoutPipelineLogger {
    pub fn new(step: u8) -> Self {
        Self {
            step: step.max(1),
            last_logged: None,
            timings: HashMap::new(),
            metrics: HashMap::new(),
            start_time: Instant::now(),
        }
    }

    /// Returns the formatted summary, or `None` if nothing was recorded.
    pub fn summary_string(&self) -> Option<String> {
        if self.timings.is_empty() && self.metrics.is_empty() {
            return None;
        }

        let elapsed_ms = self.start_time.elapsed().as_secs_f64() * 1000.0;
        let mut lines = vec![format!("Run summary ({:.1}s total):", elapsed_ms / 1000.0)];

        let mut stages: Vec<_> = self.timings.keys().collect();
        stages.sort();
        for stage in stages {
            let durations = &self.timings[stage];
            let total_ms: f64 = durations.iter().sum();
            let avg_ms = total_ms / durations.len().max(1) as f64;
            let pct = if elapsed_ms > 0.0 {
                total_ms / elapsed_ms * 100.0
            } else {
                0.0
            };
            lines.push(format!(
                "  {stage:10}: {n:5} x avg {avg_ms:7.1}ms  total {total_ms:8.0}ms  ({pct:4.1}%)",
                n = durations.len()
            ));
        }

        let mut names: Vec<_> = self.metrics.keys().collect();
        names.sort();
        for name in names {
            let values = &self.metrics[name];
            let total: f64 = values.iter().sum();
            let avg = total / values.len().max(1) as f64;
            lines.push(format!("  {name}: avg {avg:.2}, total {total:.0}"));
        }

        Some(lines.join("\n"))
    }

    pub fn timings_for(&self, stage: &str) -> Option<&[f64]> {
        self.timings.get(stage).map(|v| v.as_slice())
    }

    pub fn metrics_for(&self, name: &str) -> Option<&[f64]> {
        self.metrics.get(name).map(|v| v.as_slice())
    }

    fn should_log(&self, percent: u8) -> bool {
        match self.last_logged {
            None => true,
            Some(last) => (percent == 100 && last != 100) || percent >= last.saturating_add(self.step),
        }
    }
}

impl Default for StdoutPipelineLogger {
    fn default() -> Self {
        Self::new(5)
    }
}

impl PipelineLogger for StdoutPipelineLogger {
    fn progress(&mut self, percent: u8, status: &str) {
        if self.should_log(percent) {
            self.last_logged = Some(percent);
            log::info!("[{percent:3}%] {status}");
        }
    }

    fn timing(&mut self, stage: &str, duration_ms: f64) {
        self.timings
            .entry(stage.to_string())
            .or_default()
            .push(duration_ms);
    }

    fn metric(&mut self, name: &str, value: f64) {
        self.metrics
            .entry(name.to_string())
            .or_default()
            .push(value);
    }

    fn info(&mut self, message: &str) {
        log::info!("{message}");
    }

    fn summary(&self) {
        if let Some(text) = self.summary_string() {
            log::info!("\n\n{text}");
        }
    }
}
