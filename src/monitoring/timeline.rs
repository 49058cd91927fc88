//! Run Timeline
//!
//! Records when each job starts and finishes so the final report can
//! show per-job durations and an ASCII chart of the run.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// What happened to a job at a point in the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobEvent {
    Started,
    Finished { ok: bool },
    /// Outputs were already up to date; the job never started.
    Skipped,
    /// An upstream failure meant the job never started.
    Blocked,
}

#[derive(Debug, Clone)]
struct TimelineEntry {
    job: String,
    event: JobEvent,
    at: Instant,
}

/// Orders job events against the start of the run.
#[derive(Debug, Clone)]
pub struct Timeline {
    entries: Vec<TimelineEntry>,
    started: Instant,
}

impl Timeline {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            started: Instant::now(),
        }
    }

    pub fn record(&mut self, job: impl Into<String>, event: JobEvent) {
        self.entries.push(TimelineEntry {
            job: job.into(),
            event,
            at: Instant::now(),
        });
    }

    /// Time since the run began.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Wall-clock duration of every job that ran, in start order.
    /// Skipped and blocked jobs have no duration and do not appear.
    pub fn durations(&self) -> Vec<(String, u128)> {
        let mut spans = self.spans();
        spans.sort_by_key(|(_, start, _, _)| *start);
        spans
            .into_iter()
            .map(|(job, start, end, _)| (job, end - start))
            .collect()
    }

    /// An ASCII chart of when each job ran relative to the whole run.
    /// Failed jobs draw their bar with `x` instead of `#`.
    pub fn gantt_chart(&self) -> String {
        let mut output = String::from("\nRun timeline:\n\n");

        let total_ms = self.started.elapsed().as_millis();
        if total_ms == 0 {
            return output;
        }

        // Scale to 60 characters width
        let scale = 60.0 / total_ms as f64;

        let mut rows = self.spans();
        rows.sort_by_key(|(_, start, _, _)| *start);

        for (job, start, end, ok) in rows {
            let lead = (start as f64 * scale) as usize;
            let width = ((end - start) as f64 * scale).max(1.0) as usize;
            let glyph = if ok { "#" } else { "x" };

            output.push_str(&format!(
                "{:>20} |{}{}| ({} ms)\n",
                clip(&job, 20),
                " ".repeat(lead),
                glyph.repeat(width),
                end - start
            ));
        }

        output.push_str(&format!("\nTotal: {} ms\n", total_ms));
        output
    }

    /// (job, start_ms, end_ms, ok) for every started-and-finished job.
    fn spans(&self) -> Vec<(String, u128, u128, bool)> {
        let mut starts: HashMap<&str, u128> = HashMap::new();
        let mut spans = Vec::new();

        for entry in &self.entries {
            let at = entry.at.duration_since(self.started).as_millis();
            match entry.event {
                JobEvent::Started => {
                    starts.insert(entry.job.as_str(), at);
                }
                JobEvent::Finished { ok } => {
                    if let Some(&start) = starts.get(entry.job.as_str()) {
                        spans.push((entry.job.clone(), start, at, ok));
                    }
                }
                JobEvent::Skipped | JobEvent::Blocked => {}
            }
        }

        spans
    }
}

impl Default for Timeline {
    fn default() -> Self {
        Self::new()
    }
}

fn clip(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    // A fixed byte offset can land inside a multibyte character.
    let mut cut = max_len.saturating_sub(3);
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", &s[..cut])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn durations_cover_started_and_finished_jobs() {
        let mut timeline = Timeline::new();
        timeline.record("align[sample=a]", JobEvent::Started);
        thread::sleep(Duration::from_millis(30));
        timeline.record("align[sample=a]", JobEvent::Finished { ok: true });

        let durations = timeline.durations();
        assert_eq!(durations.len(), 1);
        assert_eq!(durations[0].0, "align[sample=a]");
        assert!(durations[0].1 >= 30);
    }

    #[test]
    fn unfinished_jobs_have_no_duration() {
        let mut timeline = Timeline::new();
        timeline.record("hung", JobEvent::Started);
        assert!(timeline.durations().is_empty());
    }

    #[test]
    fn skipped_and_blocked_jobs_have_no_duration() {
        let mut timeline = Timeline::new();
        timeline.record("cached", JobEvent::Skipped);
        timeline.record("downstream", JobEvent::Blocked);
        assert!(timeline.durations().is_empty());
    }

    #[test]
    fn durations_are_in_start_order() {
        let mut timeline = Timeline::new();
        timeline.record("first", JobEvent::Started);
        thread::sleep(Duration::from_millis(20));
        timeline.record("second", JobEvent::Started);
        thread::sleep(Duration::from_millis(20));
        timeline.record("second", JobEvent::Finished { ok: true });
        timeline.record("first", JobEvent::Finished { ok: true });

        let names: Vec<_> = timeline.durations().into_iter().map(|(j, _)| j).collect();
        assert_eq!(names, vec!["first", "second"]);
    }

    #[test]
    fn chart_draws_one_bar_per_job() {
        let mut timeline = Timeline::new();
        timeline.record("align", JobEvent::Started);
        thread::sleep(Duration::from_millis(30));
        timeline.record("align", JobEvent::Finished { ok: true });
        timeline.record("sort", JobEvent::Started);
        thread::sleep(Duration::from_millis(30));
        timeline.record("sort", JobEvent::Finished { ok: false });

        let chart = timeline.gantt_chart();
        assert!(chart.contains("align"));
        assert!(chart.contains("sort"));
        assert!(chart.contains('#'));
        assert!(chart.contains('x'));
        assert!(chart.contains("Total:"));
    }

    #[test]
    fn elapsed_tracks_the_run() {
        let timeline = Timeline::new();
        thread::sleep(Duration::from_millis(30));
        assert!(timeline.elapsed().as_millis() >= 30);
    }

    #[test]
    fn long_job_names_are_clipped() {
        assert_eq!(clip("short", 20), "short");
        let long = "align[lane=1, sample=alpha]";
        let clipped = clip(long, 20);
        assert_eq!(clipped.len(), 20);
        assert!(clipped.ends_with("..."));
    }

    #[test]
    fn multibyte_names_clip_on_char_boundaries() {
        let wide = "ä".repeat(15);
        let clipped = clip(&wide, 20);
        assert!(clipped.ends_with("..."));
        assert!(clipped.chars().count() <= 20);

        let mut timeline = Timeline::new();
        timeline.record(wide.clone(), JobEvent::Started);
        thread::sleep(Duration::from_millis(10));
        timeline.record(wide, JobEvent::Finished { ok: true });
        assert!(timeline.gantt_chart().contains("..."));
    }
}
