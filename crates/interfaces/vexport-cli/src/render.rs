use std::collections::HashMap;
use std::sync::Mutex;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use vexport_core::ProgressSample;
use vexport_pipeline::ProgressSink;

/// One bar per file plus a bar counting finished files.
pub struct IndicatifSink {
    multi: MultiProgress,
    total: ProgressBar,
    bars: Mutex<HashMap<usize, ProgressBar>>,
}

impl IndicatifSink {
    pub fn new() -> Self {
        let multi = MultiProgress::new();
        let total = multi.add(ProgressBar::new(0));
        total.set_style(style("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} files {msg}"));
        total.set_message("waiting for lease");
        Self {
            multi,
            total,
            bars: Mutex::new(HashMap::new()),
        }
    }

    pub fn finish(&self, message: &'static str) {
        if let Ok(bars) = self.bars.lock() {
            for bar in bars.values() {
                if !bar.is_finished() {
                    bar.abandon();
                }
            }
        }
        self.total.finish_with_message(message);
    }

    fn bar_for(&self, sample: &ProgressSample) -> Option<ProgressBar> {
        let mut bars = self.bars.lock().ok()?;
        let bar = bars.entry(sample.item_index).or_insert_with(|| {
            self.total.inc_length(1);
            self.total.set_message("downloading");
            let bar = self.multi.add(ProgressBar::new(100));
            bar.set_style(style("  {bar:30.green/white} {pos:>3}% {msg}"));
            bar.set_message(sample.item_name.clone());
            bar
        });
        Some(bar.clone())
    }
}

impl Default for IndicatifSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for IndicatifSink {
    fn on_progress(&self, sample: &ProgressSample) {
        let Some(bar) = self.bar_for(sample) else {
            return;
        };
        bar.set_position(sample.percent_done as u64);
        if sample.percent_done == 100 {
            bar.finish();
            self.total.inc(1);
        }
    }
}

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-")
}
