use indicatif::{ProgressBar, ProgressStyle};
use sample_cache_core::ProgressReporter;
use std::sync::Mutex;
use std::time::Duration;

/// CLI progress reporter using indicatif progress bars.
///
/// - Refresh: one tick per enumerated sample
/// - Staging: one tick per staged file
pub struct CliReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliReporter {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn start_bar(&self, len: usize, what: &str) {
        let pb = ProgressBar::new(len as u64);
        let template = format!(
            "  {{spinner:.cyan}} {} [{{bar:30.cyan/dim}}] {{pos}}/{{len}} {{wide_msg}}",
            what
        );
        let style = ProgressStyle::with_template(&template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("━╸─")
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");
        pb.set_style(style);
        pb.enable_steady_tick(Duration::from_millis(80));

        if let Ok(mut guard) = self.bar.lock() {
            if let Some(old) = guard.take() {
                old.finish_and_clear();
            }
            *guard = Some(pb);
        }
    }

    fn tick(&self, message: &str) {
        if let Ok(guard) = self.bar.lock() {
            if let Some(pb) = guard.as_ref() {
                pb.inc(1);
                pb.set_message(message.to_string());
            }
        }
    }

    fn finish_bar(&self) {
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(pb) = guard.take() {
                pb.finish_and_clear();
            }
        }
    }
}

impl ProgressReporter for CliReporter {
    fn on_refresh_start(&self, cached: usize, to_enumerate: usize) {
        eprintln!(
            "  \x1b[32m✓\x1b[0m {} samples from cache, {} to enumerate",
            cached, to_enumerate
        );
        if to_enumerate > 0 {
            self.start_bar(to_enumerate, "Enumerating");
        }
    }

    fn on_sample_enumerated(&self, sample: &str, _files_added: usize) {
        self.tick(sample);
    }

    fn on_refresh_complete(&self, samples: usize, duration_secs: f64) {
        self.finish_bar();
        eprintln!(
            "  \x1b[32m✓\x1b[0m Refresh complete: {} samples in {:.2}s",
            samples, duration_secs
        );
    }

    fn on_stage_start(&self, files: usize) {
        self.start_bar(files, "Staging");
    }

    fn on_file_staged(&self, path: &str, _transferred: bool) {
        self.tick(path);
    }

    fn on_stage_complete(&self, files: usize, duration_secs: f64) {
        self.finish_bar();
        eprintln!(
            "  \x1b[32m✓\x1b[0m Staging complete: {} files in {:.2}s",
            files, duration_secs
        );
    }
}
