use indicatif::{ProgressBar, ProgressStyle};
use nu_ansi_term::{Color, Style};
use sqlbatch::ResultSet;
use std::fmt::Display;
use std::io::IsTerminal;
use std::time::{Duration, Instant};

const MAX_CELL_WIDTH: usize = 40;
const COLUMN_GAP: &str = "  ";

/// When report output is colored.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ColorChoice {
    /// Only when stdout is a terminal.
    Auto,
    Always,
    Never,
}

/// Text report writer for `plan` and `run`.
pub struct Ui {
    styles: Option<Styles>,
    quiet: bool,
}

impl Ui {
    pub fn new(color: ColorChoice, quiet: bool) -> Self {
        let colored = !quiet
            && match color {
                ColorChoice::Auto => std::io::stdout().is_terminal(),
                ColorChoice::Always => true,
                ColorChoice::Never => false,
            };
        Self {
            styles: colored.then(Styles::default),
            quiet,
        }
    }

    /// Prints right-aligned `key: value` pairs under a heading.
    pub fn section<'a, I, V>(&self, title: &str, rows: I)
    where
        I: IntoIterator<Item = (&'a str, V)>,
        V: Display,
    {
        let rows: Vec<(&str, String)> = rows
            .into_iter()
            .map(|(key, value)| (key, value.to_string()))
            .collect();
        if rows.is_empty() {
            return;
        }
        self.heading(title);
        let width = rows.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
        for (key, value) in rows {
            let key = format!("{key:>width$}:");
            println!("  {} {value}", self.paint(|s| s.key, key));
        }
    }

    pub fn list<I>(&self, title: &str, entries: I)
    where
        I: IntoIterator<Item = String>,
    {
        let entries: Vec<String> = entries.into_iter().collect();
        if entries.is_empty() {
            return;
        }
        self.heading(title);
        for entry in entries {
            println!("  - {entry}");
        }
    }

    /// Prints a result set as an aligned text table.
    pub fn table(&self, title: &str, result: &ResultSet) {
        self.heading(title);
        if result.columns.is_empty() {
            println!("  (no columns)");
            return;
        }
        let cells: Vec<Vec<String>> = result
            .rows
            .iter()
            .map(|row| row.iter().map(|value| clip(&value.to_string())).collect())
            .collect();
        let widths: Vec<usize> = result
            .columns
            .iter()
            .enumerate()
            .map(|(idx, name)| {
                cells
                    .iter()
                    .filter_map(|row| row.get(idx))
                    .map(|cell| cell.chars().count())
                    .fold(name.chars().count(), usize::max)
            })
            .collect();

        let header = align(result.columns.iter(), &widths);
        println!("  {}", self.paint(|s| s.key, header));
        for row in &cells {
            println!("  {}", align(row.iter(), &widths));
        }
        if cells.is_empty() {
            println!("  (no rows)");
        }
    }

    pub fn success(&self, message: &str) {
        if self.quiet {
            println!("{message}");
        } else {
            println!("{} {message}", self.paint(|s| s.ok, "ok"));
        }
    }

    pub fn warn(&self, message: &str) {
        if self.quiet {
            eprintln!("{message}");
        } else {
            eprintln!("{} {message}", self.paint(|s| s.warn, "warning:"));
        }
    }

    /// Starts a spinner that reports how long the labelled task ran.
    pub fn task(&self, label: impl Into<String>) -> TaskGuard<'_> {
        let label = label.into();
        let spinner = self.styles.as_ref().map(|styles| {
            let pb = ProgressBar::new_spinner();
            pb.set_style(styles.spinner.clone());
            pb.set_message(label.clone());
            pb.enable_steady_tick(Duration::from_millis(120));
            pb
        });
        TaskGuard {
            ui: self,
            label,
            start: Instant::now(),
            spinner,
            done: false,
        }
    }

    fn heading(&self, title: &str) {
        if self.quiet {
            println!("{title}");
        } else {
            println!("{}", self.paint(|s| s.heading, format!("== {title}")));
        }
    }

    fn paint(&self, pick: impl Fn(&Styles) -> Style, text: impl Into<String>) -> String {
        let text = text.into();
        match &self.styles {
            Some(styles) => pick(styles).paint(text).to_string(),
            None => text,
        }
    }
}

fn align<'a>(cells: impl Iterator<Item = &'a String>, widths: &[usize]) -> String {
    let line = cells
        .zip(widths)
        .map(|(cell, width)| format!("{cell:<width$}"))
        .collect::<Vec<_>>()
        .join(COLUMN_GAP);
    line.trim_end().to_string()
}

fn clip(cell: &str) -> String {
    let flat = cell.replace('\n', " ");
    if flat.chars().count() <= MAX_CELL_WIDTH {
        return flat;
    }
    let kept: String = flat.chars().take(MAX_CELL_WIDTH - 1).collect();
    format!("{kept}…")
}

/// Clears the spinner on [`TaskGuard::finish`]; dropping it unfinished reports a failure.
pub struct TaskGuard<'a> {
    ui: &'a Ui,
    label: String,
    start: Instant,
    spinner: Option<ProgressBar>,
    done: bool,
}

impl TaskGuard<'_> {
    pub fn finish(mut self) -> Duration {
        self.done = true;
        if let Some(pb) = self.spinner.take() {
            pb.finish_and_clear();
        }
        self.start.elapsed()
    }
}

impl Drop for TaskGuard<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let message = format!(
            "{} failed after {}",
            self.label,
            format_duration(self.start.elapsed())
        );
        match self.spinner.take() {
            Some(pb) => pb.abandon_with_message(message),
            None => self.ui.warn(&message),
        }
    }
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs_f64();
    if secs >= 1.0 {
        format!("{secs:.2}s")
    } else {
        format!("{}ms", duration.as_millis())
    }
}

struct Styles {
    heading: Style,
    key: Style,
    ok: Style,
    warn: Style,
    spinner: ProgressStyle,
}

impl Default for Styles {
    fn default() -> Self {
        Self {
            heading: Style::new().fg(Color::Cyan).bold(),
            key: Style::new().bold(),
            ok: Style::new().fg(Color::Green).bold(),
            warn: Style::new().fg(Color::Yellow).bold(),
            spinner: ProgressStyle::with_template("{spinner} {msg} ({elapsed})")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        }
    }
}
