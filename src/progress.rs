// src/progress.rs

//! Progress reporting decoupled from rendering
//!
//! The core reports `(current, total, label)` triples during downloads and
//! extraction. A total of 0 means the size is not known yet.

/// Label used while an archive is downloading
pub const DOWNLOADING: &str = "Downloading:";

/// Label used while archive entries are extracted
pub const EXTRACTING: &str = "Extracting: ";

/// Receiver of progress updates
pub trait ProgressSink {
    fn progress(&mut self, current: u64, total: u64, label: &str);
}

impl<F> ProgressSink for F
where
    F: FnMut(u64, u64, &str),
{
    fn progress(&mut self, current: u64, total: u64, label: &str) {
        self(current, total, label)
    }
}

/// Sink that discards every update
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn progress(&mut self, _current: u64, _total: u64, _label: &str) {}
}

/// Completed fraction in `[0.0, 1.0]`, or 0.0 while the total is unknown
pub fn fraction(current: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (current as f64 / total as f64).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fraction_unknown_total() {
        assert_eq!(fraction(512, 0), 0.0);
    }

    #[test]
    fn test_fraction_clamps() {
        assert_eq!(fraction(50, 200), 0.25);
        assert_eq!(fraction(300, 200), 1.0);
    }

    #[test]
    fn test_closure_sink_receives_updates() {
        let mut seen = Vec::new();
        {
            let mut sink = |current: u64, total: u64, label: &str| {
                seen.push((current, total, label.to_string()));
            };
            sink.progress(1, 2, DOWNLOADING);
            sink.progress(2, 2, DOWNLOADING);
        }
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1], (2, 2, DOWNLOADING.to_string()));
    }
}
