use std::io::{self, Write};
use std::time::Instant;

use crate::pipeline::JobStats;

/// Human-facing status lines on stderr, stamped with the time since start.
#[derive(Clone, Debug)]
pub struct ConsoleProgress {
    enabled: bool,
    t0: Instant,
}

impl ConsoleProgress {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            t0: Instant::now(),
        }
    }

    pub fn info(&self, msg: impl AsRef<str>) {
        if !self.enabled {
            return;
        }
        let ts = fmt_elapsed(self.t0.elapsed().as_secs_f64());
        let mut stderr = io::stderr().lock();
        let _ = writeln!(stderr, "[{ts}] {}", msg.as_ref());
    }

    pub fn progress(&self, label: &str, current: usize, total: usize) {
        if !self.enabled {
            return;
        }
        let line = progress_line(label, current, total);
        let ts = fmt_elapsed(self.t0.elapsed().as_secs_f64());
        let mut stderr = io::stderr().lock();
        let _ = writeln!(stderr, "[{ts}] {line}");
    }

    /// End-of-job report.
    pub fn summary(&self, stats: &JobStats) {
        if !self.enabled {
            return;
        }
        let mut stderr = io::stderr().lock();
        for line in summary_lines(stats) {
            let _ = writeln!(stderr, "{line}");
        }
    }
}

fn progress_line(label: &str, current: usize, total: usize) -> String {
    let total = total.max(1);
    let current = current.min(total);
    let pct = (current as f64 / total as f64) * 100.0;
    format!("{label} {current}/{total} ({pct:5.1}%)")
}

fn summary_lines(stats: &JobStats) -> Vec<String> {
    let t = &stats.translator;
    let mut lines = vec![
        format!("Output: {}", stats.output),
        format!(
            "Slides: {}/{} processed, {} rewritten, {} skipped",
            stats.slides_processed,
            stats.slides_total,
            stats.slides_rewritten,
            stats.slide_errors.len()
        ),
        format!(
            "Paragraphs: {} ({} translated), unique texts: {}",
            stats.paragraphs, stats.paragraphs_translated, stats.unique_texts
        ),
        format!(
            "Texts: {} translated, {} unchanged, {} from cache, {} failed",
            t.texts_translated, t.texts_untranslated, t.cache_hits, t.failed_texts
        ),
        format!(
            "Requests: {} ok, {} failed batches, {} rate-limit retries",
            t.api_calls, t.failed_batches, t.rate_limit_retries
        ),
        format!(
            "Tokens (estimated): {} in, {} out, {} saved by cache",
            t.input_tokens, t.output_tokens, t.cached_tokens
        ),
        format!(
            "Estimated cost: {:.4} ({:.4} per 1k tokens, {} tokens)",
            stats.cost.total_cost, stats.cost.cost_per_1k_tokens, stats.cost.total_tokens
        ),
    ];
    if let Some(c) = &stats.cache {
        lines.push(format!(
            "Cache: {} entries, hit rate {:.1}%",
            c.size, c.hit_rate
        ));
    }
    for e in &stats.slide_errors {
        lines.push(format!("  slide {} ({}): {}", e.index, e.part_name, e.message));
    }
    lines.push(format!("Elapsed: {}", fmt_elapsed(stats.elapsed_secs)));
    lines
}

fn fmt_elapsed(seconds: f64) -> String {
    let seconds = seconds.max(0.0) as u64;
    let h = seconds / 3600;
    let m = (seconds % 3600) / 60;
    let s = seconds % 60;
    if h > 0 {
        format!("{h:02}:{m:02}:{s:02}")
    } else {
        format!("{m:02}:{s:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::{fmt_elapsed, progress_line, summary_lines};
    use crate::ir::SlideError;
    use crate::pipeline::cost::PricingPolicy;
    use crate::pipeline::translator::TranslatorStats;
    use crate::pipeline::JobStats;

    #[test]
    fn progress_is_clamped() {
        assert_eq!(progress_line("Translated", 5, 0), "Translated 1/1 (100.0%)");
        assert_eq!(progress_line("Translated", 1, 4), "Translated 1/4 ( 25.0%)");
    }

    #[test]
    fn elapsed_switches_to_hours() {
        assert_eq!(fmt_elapsed(65.4), "01:05");
        assert_eq!(fmt_elapsed(3725.0), "01:02:05");
    }

    #[test]
    fn summary_lists_slide_errors() {
        let stats = JobStats {
            slides_total: 3,
            slides_processed: 2,
            slide_errors: vec![SlideError {
                index: 2,
                part_name: "ppt/slides/slide2.xml".to_string(),
                message: "parse xml".to_string(),
            }],
            ..JobStats::default()
        };
        let lines = summary_lines(&stats);
        assert!(lines.iter().any(|l| l.starts_with("Slides: 2/3 processed")));
        assert!(lines
            .iter()
            .any(|l| l.contains("slide 2 (ppt/slides/slide2.xml): parse xml")));
        assert!(!lines.iter().any(|l| l.starts_with("Cache:")));
    }

    #[test]
    fn summary_prices_the_token_estimate() {
        let translator = TranslatorStats {
            input_tokens: 1_000_000,
            output_tokens: 100_000,
            ..TranslatorStats::default()
        };
        let stats = JobStats {
            cost: PricingPolicy::default().summarize(&translator),
            translator,
            ..JobStats::default()
        };
        let lines = summary_lines(&stats);
        assert!(lines
            .iter()
            .any(|l| l == "Estimated cost: 5.2500 (0.0048 per 1k tokens, 1100000 tokens)"));
    }
}
