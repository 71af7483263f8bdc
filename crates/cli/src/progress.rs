use gitvec_indexer::{ProgressControl, ProgressSink};
use indicatif::{ProgressBar, ProgressStyle};

/// Terminal progress bar fed by the engine's per-file reports
pub struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    pub fn new(visible: bool) -> Self {
        let bar = if visible {
            ProgressBar::new(0)
        } else {
            ProgressBar::hidden()
        };
        let style = ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
        )
        .map_or_else(|_| ProgressStyle::default_bar(), |s| s.progress_chars("=>-"));
        bar.set_style(style);
        Self { bar }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ProgressSink for BarProgress {
    fn report(&self, current: usize, total: usize, path: &str, _info: &str) -> ProgressControl {
        self.bar.set_length(total as u64);
        self.bar.set_position(current as u64);
        let short = path.rsplit('/').next().unwrap_or(path);
        self.bar.set_message(short.to_string());
        ProgressControl::Continue
    }
}
