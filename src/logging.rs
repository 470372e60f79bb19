//! Log output setup and console status lines

use std::io::{self, IsTerminal};

use colored::*;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use crate::error::{Error, Result};

/// Filter directive for a verbosity count; `RUST_LOG` overrides it
pub fn filter_directive(verbosity: u8, quiet: bool) -> &'static str {
    if quiet {
        return "error";
    }
    match verbosity {
        0 => "segtrain=info,warn",
        1 => "segtrain=debug,info",
        2 => "segtrain=trace,debug",
        _ => "trace",
    }
}

/// Install the global subscriber
pub fn init_logging(verbosity: u8, quiet: bool, json_output: bool) -> Result<()> {
    let env_filter = match std::env::var("RUST_LOG") {
        Ok(_) if !quiet => EnvFilter::try_from_default_env()
            .map_err(|e| Error::config(format!("Invalid RUST_LOG: {}", e)))?,
        _ => EnvFilter::new(filter_directive(verbosity, quiet)),
    };

    let registry = tracing_subscriber::registry();
    let result = if json_output {
        let layer = fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_writer(io::stderr)
            .with_filter(env_filter);
        registry.with(layer).try_init()
    } else if io::stderr().is_terminal() {
        let layer = fmt::layer()
            .with_ansi(true)
            .with_span_events(FmtSpan::NONE)
            .event_format(ColoredFormatter)
            .with_writer(io::stderr)
            .with_filter(env_filter);
        registry.with(layer).try_init()
    } else {
        let layer = fmt::layer()
            .with_target(false)
            .with_ansi(false)
            .without_time()
            .with_writer(io::stderr)
            .with_filter(env_filter);
        registry.with(layer).try_init()
    };

    result.map_err(|e| Error::Other(anyhow::anyhow!("Failed to install logger: {}", e)))
}

/// Compact colored terminal format: `HH:MM:SS LEVEL [session-N] message`.
///
/// The session tag comes from the `handle` field of an enclosing span.
struct ColoredFormatter;

impl<S, N> fmt::FormatEvent<S, N> for ColoredFormatter
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    N: for<'a> fmt::FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &fmt::FmtContext<'_, S, N>,
        mut writer: fmt::format::Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let now = chrono::Local::now();
        write!(writer, "{} ", now.format("%H:%M:%S").to_string().dimmed())?;

        let level = match *event.metadata().level() {
            Level::ERROR => "ERROR".red().bold(),
            Level::WARN => "WARN".yellow().bold(),
            Level::INFO => "INFO".green().bold(),
            Level::DEBUG => "DEBUG".blue().bold(),
            Level::TRACE => "TRACE".purple().bold(),
        };
        write!(writer, "{} ", level)?;

        let handle = ctx.event_scope().and_then(|scope| {
            scope.from_root().find_map(|span| {
                let extensions = span.extensions();
                extensions
                    .get::<fmt::FormattedFields<N>>()
                    .and_then(|fields| handle_field(fields.as_str()).map(str::to_owned))
            })
        });
        if let Some(handle) = handle {
            write!(writer, "{} ", format!("[{}]", handle).cyan())?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Value of a `handle=` entry in formatted span fields
fn handle_field(fields: &str) -> Option<&str> {
    fields
        .split_whitespace()
        .find_map(|field| field.strip_prefix("handle="))
}

/// Print a success line
pub fn success(message: &str) {
    if io::stdout().is_terminal() {
        println!("{} {}", "✓".green().bold(), message);
    } else {
        println!("SUCCESS: {}", message);
    }
}

/// Print a warning line to stderr
pub fn warning(message: &str) {
    if io::stderr().is_terminal() {
        eprintln!("{} {}", "⚠".yellow().bold(), message);
    } else {
        eprintln!("WARNING: {}", message);
    }
}

/// Print an error line to stderr
pub fn error(message: &str) {
    if io::stderr().is_terminal() {
        eprintln!("{} {}", "✗".red().bold(), message);
    } else {
        eprintln!("ERROR: {}", message);
    }
}
