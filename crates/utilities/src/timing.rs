use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

use log::debug;
use log::warn;
use rustc_hash::FxHashMap;

/// Collects the durations of named phases of the computation, for example
/// every merge step or every fixpoint of the dominance computation.
#[derive(Default, Clone)]
pub struct Timing {
    results: Rc<RefCell<Vec<(String, f64)>>>,
}

/// Measures the time between its creation and the call to `finish()`.
///
/// Finish should be called explicitly, a timer that is dropped unfinished is
/// not registered.
pub struct Timer {
    name: String,
    start: Instant,
    results: Rc<RefCell<Vec<(String, f64)>>>,
    registered: bool,
}

/// Summary of all timers that share a name.
#[derive(Debug, Clone, PartialEq)]
pub struct TimingSummary {
    pub name: String,
    pub total: f64,
    pub min: f64,
    pub max: f64,
    pub count: usize,
}

impl TimingSummary {
    pub fn average(&self) -> f64 {
        self.total / self.count as f64
    }
}

impl Timing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new timer with the given name.
    pub fn start(&self, name: &str) -> Timer {
        Timer {
            name: name.to_string(),
            start: Instant::now(),
            results: self.results.clone(),
            registered: false,
        }
    }

    /// Returns the finished timers aggregated by name, sorted by name.
    pub fn summary(&self) -> Vec<TimingSummary> {
        let mut map: FxHashMap<String, TimingSummary> = FxHashMap::default();
        for (name, time) in self.results.borrow().iter() {
            map.entry(name.clone())
                .and_modify(|summary| {
                    summary.count += 1;
                    summary.total += *time;
                    summary.min = summary.min.min(*time);
                    summary.max = summary.max.max(*time);
                })
                .or_insert(TimingSummary {
                    name: name.clone(),
                    total: *time,
                    min: *time,
                    max: *time,
                    count: 1,
                });
        }

        let mut result: Vec<TimingSummary> = map.into_values().collect();
        result.sort_by(|a, b| a.name.cmp(&b.name));
        result
    }

    /// Prints all the finished timers aggregated by name, only the total is shown for a single measurement.
    pub fn print(&self) {
        for summary in self.summary() {
            if summary.count == 1 {
                eprintln!("Time {}: {:.3}s", summary.name, summary.total);
            } else {
                eprintln!(
                    "Time {}: {:.3}s, min: {:.3}s, max: {:.3}s, avg: {:.3}s, n: {}",
                    summary.name,
                    summary.total,
                    summary.min,
                    summary.max,
                    summary.average(),
                    summary.count
                );
            }
        }
    }
}

impl Timer {
    /// Returns the number of seconds since the timer was started.
    pub fn elapsed(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    /// Finishes the timer and registers the result.
    pub fn finish(&mut self) {
        let time = self.elapsed();
        debug!("Time {}: {:.3}s", self.name, time);

        self.results.borrow_mut().push((self.name.clone(), time));
        self.registered = true
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        if !self.registered {
            warn!("Timer {} was dropped before 'finish()'", self.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use test_log::test;

    #[test]
    fn test_timing_summary() {
        let timing = Timing::new();
        for _ in 0..3 {
            timing.start("merge").finish();
        }
        timing.start("shrink").finish();

        let summary = timing.summary();
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].name, "merge");
        assert_eq!(summary[0].count, 3);
        assert!(summary[0].min <= summary[0].max);
        assert_eq!(summary[1].count, 1);
    }
}
