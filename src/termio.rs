//! Terminal I/O, with colors!

use std::io::Write;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

/// Print an OK message, in green.
pub fn print_ok(msg: &str) {
    print_colored(
        StandardStream::stdout(ColorChoice::Auto),
        Color::Green,
        "OK   ",
        msg,
    );
}

/// Print a warning message, in yellow.
pub fn print_warn(msg: &str) {
    print_colored(
        StandardStream::stderr(ColorChoice::Auto),
        Color::Yellow,
        "WARN ",
        msg,
    );
}

/// Print an error message, in red.
pub fn print_err(msg: &str) {
    print_colored(
        StandardStream::stderr(ColorChoice::Auto),
        Color::Red,
        "ERROR",
        msg,
    );
}

fn print_colored(
    mut stream: StandardStream,
    color: Color,
    label: &str,
    msg: &str,
) {
    stream
        .set_color(ColorSpec::new().set_fg(Some(color)))
        .expect("set color");
    writeln!(&mut stream, "{label} {msg}").expect("write message");

    stream.reset().expect("reset color");
}
