use colored::Colorize;
use std::fmt;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::registry::LookupSpan;

/// Formatter for the user-facing stdout layer.
///
/// Informational lines print clean, with no timestamps or metadata, since
/// they are the binary's primary output (responses, listen-mode status).
/// Problems stand out instead of blending in: warnings and errors carry a
/// colored severity prefix, while debug and trace lines are dimmed so
/// high verbosity reads as background noise next to the real output.
pub struct ConsoleFormatter;

impl<S, N> FormatEvent<S, N> for ConsoleFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        // Render the message into a buffer first; prefix and styling
        // depend on the level and apply to the finished line.
        let mut message = String::new();
        ctx.format_fields(Writer::new(&mut message), event)?;

        match *event.metadata().level() {
            Level::ERROR => {
                writeln!(writer, "{} {}", "error:".red().bold(), message.red())
            }
            Level::WARN => {
                writeln!(writer, "{} {}", "warning:".yellow().bold(), message.yellow())
            }
            Level::INFO => writeln!(writer, "{}", message),
            Level::DEBUG => writeln!(writer, "{}", message.dimmed()),
            Level::TRACE => writeln!(writer, "{}", message.bright_black()),
        }
    }
}
