use std::io::IsTerminal;

use spinoff::{Color, Spinner, spinners};

use crate::calculation::run_report::Stage;

/// Stage-by-stage progress on an interactive terminal, silent everywhere else.
pub struct Progress {
    spinner: Option<Spinner>,
    step: usize,
    total: usize,
}

impl Progress {
    /// No spinner at all. Updates are dropped and `finish` prints straight to stdout.
    pub fn hidden() -> Self {
        Progress {
            spinner: None,
            step: 0,
            total: 0,
        }
    }

    /// A spinner, unless `--no-animate` was given or stdout is a pipe or a file.
    pub fn unless_no_terminal_or(no_animate: bool) -> Self {
        if no_animate || !std::io::stdout().is_terminal() {
            return Progress::hidden();
        }

        Progress {
            spinner: Some(Spinner::new(spinners::Dots, "Starting", Color::Blue)),
            ..Progress::hidden()
        }
    }

    /// Number of stages the run is going to go through.
    pub fn plan(&mut self, stages: usize) {
        self.step = 0;
        self.total = stages;
    }

    pub fn begin(&mut self, stage: Stage, subject: &str) {
        self.step += 1;
        let line = status_line(self.step, self.total, stage, subject);

        if let Some(spinner) = self.spinner.as_mut() {
            spinner.update_text(line);
        }
    }

    pub fn finish(&mut self, message: &str) {
        // Taking the spinner out keeps Drop from stopping it a second time.
        match self.spinner.take() {
            Some(mut spinner) => spinner.stop_with_message(message),
            None => println!("{message}"),
        }
    }
}

impl Drop for Progress {
    fn drop(&mut self) {
        if let Some(spinner) = self.spinner.as_mut() {
            // `clear()` leaves the cursor in a weird spot, an empty stop message doesn't.
            spinner.stop_with_message("");
        }
    }
}

// private

fn status_line(step: usize, total: usize, stage: Stage, subject: &str) -> String {
    let line = format!("[{step}/{total}] {}", stage.label());

    if subject.is_empty() {
        line
    } else {
        format!("{line} {subject}")
    }
}
