use std::time::Instant;

use log::info;

/// A time and memory budget that long running loops poll between steps.
///
/// Exceeding the budget is not an error, the caller stops early and keeps
/// whatever has been computed so far.
#[derive(Debug, Clone)]
pub struct Budget {
    start: Instant,
    limit_seconds: Option<f64>,
    limit_memory_kb: Option<usize>,
}

impl Budget {
    pub fn new(limit_seconds: Option<f64>, limit_memory_kb: Option<usize>) -> Self {
        Self {
            start: Instant::now(),
            limit_seconds,
            limit_memory_kb,
        }
    }

    /// A budget that never runs out.
    pub fn unlimited() -> Self {
        Self::new(None, None)
    }

    /// Starts a new budget limited by the given number of seconds, but never
    /// exceeding the remaining time of this budget.
    pub fn sub_budget(&self, limit_seconds: f64) -> Budget {
        let seconds = match self.remaining_seconds() {
            Some(remaining) => remaining.min(limit_seconds),
            None => limit_seconds,
        };
        Budget::new(Some(seconds), self.limit_memory_kb)
    }

    pub fn elapsed_seconds(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    pub fn remaining_seconds(&self) -> Option<f64> {
        self.limit_seconds
            .map(|limit| (limit - self.elapsed_seconds()).max(0.0))
    }

    pub fn out_of_time(&self) -> bool {
        self.limit_seconds
            .is_some_and(|limit| self.elapsed_seconds() > limit)
    }

    pub fn out_of_memory(&self) -> bool {
        match (self.limit_memory_kb, peak_memory_kb()) {
            (Some(limit), Some(peak)) => peak > limit,
            _ => false,
        }
    }

    /// Returns true when either limit has been exceeded, and logs which one.
    pub fn exhausted(&self) -> bool {
        if self.out_of_time() {
            info!("Time limit of {:?}s exceeded", self.limit_seconds);
            true
        } else if self.out_of_memory() {
            info!("Memory limit of {:?}KB exceeded", self.limit_memory_kb);
            true
        } else {
            false
        }
    }
}

/// Returns the peak virtual memory of this process in KB, when the platform reports it.
pub fn peak_memory_kb() -> Option<usize> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    parse_peak_memory(&status)
}

fn parse_peak_memory(status: &str) -> Option<usize> {
    status
        .lines()
        .find(|line| line.starts_with("VmPeak:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|value| value.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    use test_log::test;

    #[test]
    fn test_parse_peak_memory() {
        let status = "Name:\tldsim\nVmPeak:\t  123456 kB\nVmSize:\t  100000 kB\n";
        assert_eq!(parse_peak_memory(status), Some(123456));
        assert_eq!(parse_peak_memory("Name:\tldsim\n"), None);
    }

    #[test]
    fn test_unlimited_budget() {
        let budget = Budget::unlimited();
        assert!(!budget.exhausted());
        assert_eq!(budget.remaining_seconds(), None);

        let sub = budget.sub_budget(10.0);
        assert!(sub.remaining_seconds().is_some_and(|s| s <= 10.0));
    }

    #[test]
    fn test_zero_budget() {
        let budget = Budget::new(Some(0.0), None);
        std::thread::sleep(std::time::Duration::from_millis(2));
        assert!(budget.out_of_time());
        assert!(budget.sub_budget(100.0).remaining_seconds().is_some_and(|s| s == 0.0));
    }
}
