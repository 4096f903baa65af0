//! Progress reporting on stderr.
//!
//! Everything we print to the terminal goes through [`Ui`], so log lines and
//! summaries never land in the middle of a half-drawn progress bar.

use std::{io, sync::Arc, time::Duration};

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressFinish, ProgressStyle};

const BAR_TEMPLATE: &str =
    "  {prefix:3}{msg:25} {pos:>4}/{len:4} {elapsed_precise} {wide_bar:.green/white} {eta_precise}";
const SPINNER_TEMPLATE: &str = "{spinner} {prefix:3}{msg}";
const TICK: Duration = Duration::from_millis(250);

/// Labels for a progress indicator.
pub struct ProgressConfig<'a> {
    pub emoji: &'a str,
    /// Shown while running.
    pub msg: &'a str,
    /// Shown once the indicator is dropped or finished.
    pub done_msg: &'a str,
}

/// Handle to the terminal. Cheap to clone.
#[derive(Clone)]
pub struct Ui {
    bars: Arc<MultiProgress>,
}

impl Ui {
    pub fn init() -> Ui {
        Ui {
            bars: Arc::new(MultiProgress::new()),
        }
    }

    #[cfg(test)]
    pub fn init_for_tests() -> Ui {
        Ui {
            bars: Arc::new(MultiProgress::with_draw_target(ProgressDrawTarget::hidden())),
        }
    }

    /// Stop drawing anything. Used when results are streamed to stdout.
    pub fn hide_progress_bars(&self) {
        self.bars.set_draw_target(ProgressDrawTarget::hidden());
    }

    /// A `tracing` writer that pauses the bars while it writes.
    pub fn get_stderr_writer(&self) -> SafeStderrWriter {
        SafeStderrWriter { ui: self.clone() }
    }

    /// Print a one-line status message, e.g. a summary at the end of a run.
    pub fn display_message(&self, emoji: &str, msg: &str) {
        self.bars.suspend(|| eprintln!("{emoji:3}{msg}"));
    }

    /// A spinner for work of unknown length.
    pub fn new_spinner(&self, config: &ProgressConfig<'_>) -> ProgressBar {
        self.add(ProgressBar::new_spinner(), SPINNER_TEMPLATE, config)
    }

    /// A bar if we know how many items to expect, otherwise a spinner.
    pub fn new_from_size_hint(
        &self,
        config: &ProgressConfig<'_>,
        size_hint: (usize, Option<usize>),
    ) -> ProgressBar {
        match size_hint {
            (_, Some(len)) if len > 0 => self.add(ProgressBar::new(len as u64), BAR_TEMPLATE, config),
            _ => self.new_spinner(config),
        }
    }

    fn add(&self, pb: ProgressBar, template: &str, config: &ProgressConfig<'_>) -> ProgressBar {
        let style = ProgressStyle::with_template(template)
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        let pb = self.bars.add(pb.with_style(style));
        #[cfg(test)]
        pb.set_draw_target(ProgressDrawTarget::hidden());
        pb.set_prefix(config.emoji.to_owned());
        pb.set_message(config.msg.to_owned());
        pb.enable_steady_tick(TICK);
        pb.with_finish(ProgressFinish::WithMessage(config.done_msg.to_owned().into()))
    }
}

/// Writes to stderr with the progress bars suspended.
#[derive(Clone)]
pub struct SafeStderrWriter {
    ui: Ui,
}

impl io::Write for SafeStderrWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.ui.bars.suspend(|| io::stderr().write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.ui.bars.suspend(|| io::stderr().flush())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for SafeStderrWriter {
    type Writer = SafeStderrWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: ProgressConfig<'static> = ProgressConfig {
        emoji: "📄",
        msg: "Extracting",
        done_msg: "Extracted",
    };

    #[test]
    fn test_size_hint_picks_indicator() {
        let ui = Ui::init_for_tests();
        assert_eq!(ui.new_from_size_hint(&CONFIG, (0, Some(3))).length(), Some(3));
        assert_eq!(ui.new_from_size_hint(&CONFIG, (0, Some(0))).length(), None);
        assert_eq!(ui.new_from_size_hint(&CONFIG, (5, None)).length(), None);
    }
}
