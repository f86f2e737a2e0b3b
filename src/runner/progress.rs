use once_cell::sync::Lazy;
use regex::Regex;

static DURATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Duration:\s*(\d+):(\d{2}):(\d{2}(?:\.\d+)?)").expect("duration regex")
});
static TIME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"time=\s*(\d+):(\d{2}):(\d{2}(?:\.\d+)?)").expect("time regex")
});
static PERCENT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{1,3}(?:\.\d+)?)%").expect("percent regex")
});

/// Best-effort classifier turning one line of tool output into a progress
/// fraction. Lines it does not understand yield `None`.
pub trait LineParser: Send {
    fn parse_line(&mut self, line: &str) -> Option<f32>;
}

/// Ignores every line.
pub struct NoProgress;

impl LineParser for NoProgress {
    fn parse_line(&mut self, _line: &str) -> Option<f32> {
        None
    }
}

/// Elapsed `time=HH:MM:SS.xx` over the expected total. When no total is
/// supplied it is learned from the input's `Duration:` banner line.
pub struct FfmpegProgress {
    total_seconds: Option<f64>,
}

impl FfmpegProgress {
    pub fn new(total_seconds: Option<f64>) -> Self {
        Self {
            total_seconds: total_seconds.filter(|t| *t > 0.0),
        }
    }
}

fn hms_to_seconds(caps: &regex::Captures) -> Option<f64> {
    let hours: f64 = caps.get(1)?.as_str().parse().ok()?;
    let minutes: f64 = caps.get(2)?.as_str().parse().ok()?;
    let seconds: f64 = caps.get(3)?.as_str().parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

impl LineParser for FfmpegProgress {
    fn parse_line(&mut self, line: &str) -> Option<f32> {
        if self.total_seconds.is_none() {
            if let Some(caps) = DURATION_RE.captures(line) {
                self.total_seconds = hms_to_seconds(&caps).filter(|t| *t > 0.0);
                return None;
            }
        }

        let total = self.total_seconds?;
        let caps = TIME_RE.captures(line)?;
        let elapsed = hms_to_seconds(&caps)?;
        Some((elapsed / total).clamp(0.0, 1.0) as f32)
    }
}

/// `NN.N%` markers as printed by the fetch tool.
pub struct PercentProgress;

impl LineParser for PercentProgress {
    fn parse_line(&mut self, line: &str) -> Option<f32> {
        let caps = PERCENT_RE.captures(line)?;
        let percent: f32 = caps.get(1)?.as_str().parse().ok()?;
        if percent > 100.0 {
            return None;
        }
        Some(percent / 100.0)
    }
}
