//! User-facing terminal lines, colored only when stdout is a TTY.

use owo_colors::OwoColorize;

fn is_tty() -> bool {
    atty::is(atty::Stream::Stdout)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tone {
    Info,
    Warn,
    Error,
    Success,
}

impl Tone {
    fn label(self) -> &'static str {
        match self {
            Tone::Info => "info:",
            Tone::Warn => "warn:",
            Tone::Error => "error:",
            Tone::Success => "ok:",
        }
    }

    fn to_stderr(self) -> bool {
        matches!(self, Tone::Warn | Tone::Error)
    }
}

fn prefix(tone: Tone, color: bool) -> String {
    if !color {
        return tone.label().to_string();
    }
    match tone {
        Tone::Info => tone.label().cyan().bold().to_string(),
        Tone::Warn => tone.label().yellow().bold().to_string(),
        Tone::Error => tone.label().red().bold().to_string(),
        Tone::Success => tone.label().green().bold().to_string(),
    }
}

fn emit(tone: Tone, msg: &str) {
    let line = format!("{} {}", prefix(tone, is_tty()), msg);
    if tone.to_stderr() {
        eprintln!("{line}");
    } else {
        println!("{line}");
    }
}

pub fn print_info(msg: &str) {
    emit(Tone::Info, msg);
}

pub fn print_warn(msg: &str) {
    emit(Tone::Warn, msg);
}

pub fn print_error(msg: &str) {
    emit(Tone::Error, msg);
}

pub fn print_success(msg: &str) {
    emit(Tone::Success, msg);
}

/// Print a plain line (no prefix), for output users may script against.
pub fn print_user(msg: &str) {
    println!("{msg}");
}
