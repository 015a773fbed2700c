mod app;
mod calculation;
mod cli;
mod config;
mod display;
mod error;
mod io;
mod pipeline;
mod prelude;
mod router;

use jiff::Zoned;
use tracing_subscriber::EnvFilter;

use app::App;
use cli::Cli;
use prelude::*;

fn main() -> AppResult<()> {
    let cli = Cli::new();
    init_tracing(&cli.log_level)?;

    let mut app = App::new(cli);

    // The default period follows the local calendar, like the schedule that runs us.
    let today = Zoned::now().date();

    let mut report = router::dispatch(&mut app, today)?;
    let rendered = report.render(app.cli.unformatted)?;

    if app.cli.writes_csv_to_stdout() {
        eprintln!("{rendered}");
    } else {
        app.progress.finish(&rendered);
    }

    // The report is out, now the cause gets its own diagnostic and a non-zero exit.
    match report.take_failure() {
        Some(failure) => Err(failure),
        None => Ok(()),
    }
}

// private

/// Logs go to stderr. Stdout carries the report, or the CSV with `--output -`.
fn init_tracing(log_level: &str) -> AppResult<()> {
    let filter = EnvFilter::try_new(log_level)
        .into_diagnostic()
        .wrap_err_with(|| format!("Invalid log filter '{log_level}'"))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}
