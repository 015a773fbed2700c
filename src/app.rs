use crate::cli::Cli;
use crate::display::Progress;

pub struct App {
    pub cli: Cli,
    pub progress: Progress,
}

impl App {
    pub fn new(cli: Cli) -> Self {
        // The spinner draws on stdout, which the CSV needs for itself with `--output -`.
        let no_animate = cli.no_animate || cli.writes_csv_to_stdout();

        App {
            progress: Progress::unless_no_terminal_or(no_animate),
            cli,
        }
    }
}
