//! Purpose: `haverscan` CLI entry point and command dispatch.
//! Role: Binary crate root; parses args, runs the pipeline, emits results on stdout.
//! Invariants: `average` and `check` emit one JSON value on stdout (or text with --output text).
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `core::error::to_exit_code`.
//! Invariants: Logs go to stderr only; stdout stays machine-readable.
use std::io::{self, IsTerminal};
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum, ValueHint, error::ErrorKind as ClapErrorKind};
use serde_json::{Map, Value, json};
use std::error::Error as StdError;
use tracing_subscriber::EnvFilter;

mod report_json;

use haverscan::core::accumulate::Summation;
use haverscan::core::error::{Error, ErrorKind, to_exit_code};
use haverscan::core::extract::{Delimiters, check_structure};
use haverscan::core::haversine::EARTH_RADIUS_KM;
use haverscan::core::input::InputBuffer;
use haverscan::core::pipeline::{
    EmptyPolicy, InputFormat, Pipeline, PipelineConfig, Report, StructureMode, TimingPrecision,
};
use report_json::{check_json, run_json};

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

fn main() {
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err((err, color_mode)) => {
            emit_error(&err, color_mode);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, (Error, ColorMode)> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    (
                        Error::new(ErrorKind::Io)
                            .with_message("failed to write help")
                            .with_source(io_err),
                        ColorMode::Auto,
                    )
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                return Err((
                    Error::new(ErrorKind::Usage)
                        .with_message(clap_error_summary(&err))
                        .with_hint("Try `haverscan --help`."),
                    ColorMode::Auto,
                ));
            }
        },
    };

    init_tracing(cli.verbose);
    let color_mode = cli.color;

    let result = match cli.command {
        Command::Average(args) => run_average(args),
        Command::Check(args) => run_check(args),
    };

    result
        .map(|()| RunOutcome::ok())
        .map_err(add_data_hint)
        .map_err(add_io_hint)
        .map_err(add_internal_hint)
        .map_err(|err| (err, color_mode))
}

#[derive(Parser)]
#[command(
    name = "haverscan",
    version,
    about = "Average great-circle distance over large coordinate-pair files",
    long_about = None,
    after_help = r#"EXAMPLES
  $ haverscan average data/pairs.json
  $ haverscan average data/pairs.json --threads 0 --output text
  $ haverscan average data/pairs.f64 --format binary
  $ haverscan check data/pairs.json

NOTES
  - Records are innermost {...} objects with numeric fields x0, y0, x1, y1
  - Set RUST_LOG=debug for shard and phase diagnostics on stderr"#,
    arg_required_else_help = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        default_value = "auto",
        value_enum,
        help = "Colorize stderr diagnostics: auto|always|never"
    )]
    color: ColorMode,
    #[arg(long, short = 'v', global = true, help = "Log phase progress to stderr")]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ColorMode {
    Auto,
    Always,
    Never,
}

impl ColorMode {
    fn use_color(self, is_tty: bool) -> bool {
        match self {
            ColorMode::Auto => is_tty,
            ColorMode::Always => true,
            ColorMode::Never => false,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum FormatCli {
    Json,
    Binary,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum SummationCli {
    Kahan,
    Neumaier,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum OutputMode {
    Json,
    Text,
}

#[derive(Subcommand)]
enum Command {
    /// Compute the mean haversine distance over every record in a file
    Average(AverageArgs),
    /// Validate delimiter structure and count records without decoding them
    Check(CheckArgs),
}

#[derive(Args)]
struct DelimiterArgs {
    #[arg(long, default_value = "{", value_parser = parse_delimiter, help = "Record open delimiter (one ASCII char)")]
    open: u8,
    #[arg(long, default_value = "}", value_parser = parse_delimiter, help = "Record close delimiter (one ASCII char)")]
    close: u8,
}

impl DelimiterArgs {
    fn delimiters(&self) -> Delimiters {
        Delimiters {
            open: self.open,
            close: self.close,
        }
    }
}

#[derive(Args)]
struct AverageArgs {
    #[arg(help = "Input file", value_hint = ValueHint::FilePath)]
    path: PathBuf,
    #[arg(long, default_value_t = EARTH_RADIUS_KM, help = "Sphere radius (km)")]
    radius: f64,
    #[command(flatten)]
    delimiters: DelimiterArgs,
    #[arg(long, value_enum, default_value = "json", help = "Input record format")]
    format: FormatCli,
    #[arg(long, help = "Reject unbalanced delimiters / partial binary records")]
    strict: bool,
    #[arg(long, default_value_t = 1, help = "Worker threads (0 = one per CPU)")]
    threads: usize,
    #[arg(long, help = "Report whole-second timings")]
    coarse_timing: bool,
    #[arg(long, help = "Report mean 0 instead of failing when no records are found")]
    allow_empty: bool,
    #[arg(long, value_enum, default_value = "kahan", help = "Compensated summation scheme")]
    summation: SummationCli,
    #[arg(long, value_enum, default_value = "json", help = "Result format on stdout")]
    output: OutputMode,
}

impl AverageArgs {
    fn config(&self) -> PipelineConfig {
        PipelineConfig {
            radius: self.radius,
            delimiters: self.delimiters.delimiters(),
            format: match self.format {
                FormatCli::Json => InputFormat::Json,
                FormatCli::Binary => InputFormat::Binary,
            },
            structure: if self.strict {
                StructureMode::Strict
            } else {
                StructureMode::Lenient
            },
            threads: self.threads,
            timing: if self.coarse_timing {
                TimingPrecision::Coarse
            } else {
                TimingPrecision::Fine
            },
            empty: if self.allow_empty {
                EmptyPolicy::Zero
            } else {
                EmptyPolicy::Error
            },
            summation: match self.summation {
                SummationCli::Kahan => Summation::Kahan,
                SummationCli::Neumaier => Summation::Neumaier,
            },
        }
    }
}

#[derive(Args)]
struct CheckArgs {
    #[arg(help = "Input file", value_hint = ValueHint::FilePath)]
    path: PathBuf,
    #[command(flatten)]
    delimiters: DelimiterArgs,
}

fn parse_delimiter(input: &str) -> Result<u8, String> {
    match input.as_bytes() {
        [byte] if byte.is_ascii() => Ok(*byte),
        _ => Err(format!("expected a single ASCII character, got {input:?}")),
    }
}

fn run_average(args: AverageArgs) -> Result<(), Error> {
    let config = args.config();
    let report = Pipeline::load(&args.path, config)?.run()?;
    match args.output {
        OutputMode::Json => {
            let ts = rfc3339_now();
            emit_json(run_json(&args.path, &config, &report, &ts));
        }
        OutputMode::Text => emit_report_text(&report),
    }
    Ok(())
}

fn run_check(args: CheckArgs) -> Result<(), Error> {
    let delimiters = args.delimiters.delimiters();
    delimiters.validate()?;
    let buffer = InputBuffer::open(&args.path)?;
    let records = check_structure(&buffer, delimiters).map_err(|err| err.with_path(&args.path))?;
    tracing::info!(records, bytes = buffer.len(), "structure check passed");
    emit_json(check_json(&args.path, records, buffer.len()));
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "info" } else { "warn" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

fn rfc3339_now() -> String {
    use time::OffsetDateTime;
    use time::format_description::well_known::Rfc3339;
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "unknown".to_string())
}

fn emit_json(value: Value) {
    let pretty = io::stdout().is_terminal();
    let json = if pretty {
        serde_json::to_string_pretty(&value)
    } else {
        serde_json::to_string(&value)
    }
    .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string());
    println!("{json}");
}

fn report_text(report: &Report) -> String {
    let throughput = report
        .throughput
        .map(|value| format!("{value}"))
        .unwrap_or_else(|| "n/a".to_string());
    format!(
        "Result {}\nPairs = {}\nBytes = {}\nInput = {} seconds{}\nMath = {} seconds{}\nTotal = {} seconds\nThroughput = {throughput} haversines/second",
        report.mean,
        report.count,
        report.bytes,
        report.parse_secs,
        bandwidth_suffix(report.parse_mb_per_sec),
        report.compute_secs,
        bandwidth_suffix(report.compute_mb_per_sec),
        report.total_secs
    )
}

fn bandwidth_suffix(mb_per_sec: Option<f64>) -> String {
    mb_per_sec
        .map(|value| format!(" ({value:.2} MB/s)"))
        .unwrap_or_default()
}

fn emit_report_text(report: &Report) {
    println!("{}", report_text(report));
}

#[derive(Copy, Clone, Debug)]
enum AnsiColor {
    Red,
    Yellow,
}

fn colorize_label(label: &str, enabled: bool, color: AnsiColor) -> String {
    if !enabled {
        return label.to_string();
    }
    let code = match color {
        AnsiColor::Red => "31",
        AnsiColor::Yellow => "33",
    };
    format!("\u{1b}[{code}m{label}\u{1b}[0m")
}

fn emit_error(err: &Error, color_mode: ColorMode) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        eprintln!("{}", error_text(err, color_mode.use_color(is_tty)));
        return;
    }

    let value = error_json(err);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::NotFound => "not found".to_string(),
        ErrorKind::Busy => "resource is busy".to_string(),
        ErrorKind::Permission => "permission denied".to_string(),
        ErrorKind::Io => "i/o error".to_string(),
        ErrorKind::Decode => "record could not be decoded".to_string(),
        ErrorKind::Structural => "unbalanced record delimiters".to_string(),
        ErrorKind::EmptyDataset => "no records found".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }
    if let Some(offset) = err.offset() {
        inner.insert("offset".to_string(), json!(offset));
    }
    if let Some(span) = err.span() {
        inner.insert("span".to_string(), json!([span.start(), span.end()]));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error, use_color: bool) -> String {
    let mut lines = Vec::new();
    lines.push(format!(
        "{} {}",
        colorize_label("error:", use_color, AnsiColor::Red),
        error_message(err)
    ));

    if let Some(hint) = err.hint() {
        lines.push(format!(
            "{} {hint}",
            colorize_label("hint:", use_color, AnsiColor::Yellow)
        ));
    }
    if let Some(path) = err.path() {
        lines.push(format!(
            "{} {}",
            colorize_label("path:", use_color, AnsiColor::Yellow),
            path.display()
        ));
    }
    match (err.span(), err.offset()) {
        (Some(span), _) => lines.push(format!(
            "{} {}..={}",
            colorize_label("bytes:", use_color, AnsiColor::Yellow),
            span.start(),
            span.end()
        )),
        (None, Some(offset)) => lines.push(format!(
            "{} {offset}",
            colorize_label("offset:", use_color, AnsiColor::Yellow)
        )),
        (None, None) => {}
    }
    for cause in error_causes(err) {
        lines.push(format!(
            "{} {cause}",
            colorize_label("caused by:", use_color, AnsiColor::Yellow)
        ));
    }
    lines.join("\n")
}

fn add_io_hint(err: Error) -> Error {
    if err.hint().is_some() {
        return err;
    }
    match err.kind() {
        ErrorKind::NotFound => err.with_hint("Input file not found. Check the path."),
        ErrorKind::Permission => err.with_hint("Permission denied. Check read permissions on the input."),
        ErrorKind::Busy => {
            err.with_hint("Input is exclusively locked by another process. Retry once it is released.")
        }
        ErrorKind::Io => err.with_hint("I/O error. Check the path and filesystem."),
        _ => err,
    }
}

fn add_data_hint(err: Error) -> Error {
    if err.hint().is_some() {
        return err;
    }
    match err.kind() {
        ErrorKind::Decode => err.with_hint(
            "Each record needs numeric fields x0, y0, x1, y1. Fix the record at the reported bytes and rerun.",
        ),
        ErrorKind::Structural => err.with_hint(
            "Delimiters are unbalanced. Run without --strict for best-effort scanning, or fix the input.",
        ),
        ErrorKind::EmptyDataset => {
            err.with_hint("No records matched the delimiters. Check --open/--close or pass --allow-empty.")
        }
        _ => err,
    }
}

fn add_internal_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Internal || err.hint().is_some() {
        return err;
    }
    err.with_hint(
        "Unexpected internal failure. Retry with RUST_BACKTRACE=1 and share command/context if it persists.",
    )
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}
