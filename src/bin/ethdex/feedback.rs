pub use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

pub struct Feedback {
    multi: MultiProgress,
}

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-")
}

impl Feedback {
    pub fn indeterminate_progress_bar(&self) -> ProgressBar {
        let pb = ProgressBar::new_spinner();
        pb.set_style(style("{spinner:.green} [{elapsed_precise}] {msg}"));

        self.multi.add(pb)
    }

    pub fn block_progress_bar(&self, total: u64) -> ProgressBar {
        let pb = ProgressBar::new(total);

        pb.set_style(style(
            "{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} {per_sec:>7} blocks/s (eta: {eta}) {msg}",
        ));

        self.multi.add(pb)
    }
}

impl Default for Feedback {
    fn default() -> Self {
        let multi = MultiProgress::new();
        Self { multi }
    }
}
