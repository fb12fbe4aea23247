//! Purpose: `lpack` CLI entry point: `pack` and `unpack`.
//! Role: Binary crate root; parses args, runs one engine call, emits a JSON summary on stdout.
//! Invariants: Non-interactive errors are emitted as JSON on stderr; TTYs get text lines.
//! Invariants: Process exit code equals the FFI status code (`api::to_status_code`).
use std::error::Error as StdError;
use std::io::{self, IsTerminal};
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum, ValueHint, error::ErrorKind as ClapErrorKind};
use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing_subscriber::EnvFilter;

use layer_pack::api::{
    Compression, Error, ErrorKind, LayerKind, PackManifest, PackOptions, UnpackOptions, pack_dir,
    to_status_code, unpack_file,
};

#[derive(Parser, Debug)]
#[command(
    name = "lpack",
    version,
    about = "Pack a directory into a single layer file, or unpack one safely",
    after_help = r#"EXAMPLES
  $ lpack pack assets/ base.pack --name base --kind base
  $ lpack pack thai/ thai.pack --name thai --kind text --lang th --priority 10 --compress
  $ lpack unpack thai.pack out/

EXIT CODES
  0 ok, 1 invalid argument, 2 not found, 3 format error, 4 integrity error,
  5 I/O error, 6 unsafe path rejected, 7 cleanup incomplete after failure"#,
    arg_required_else_help = true
)]
struct Cli {
    #[arg(
        long,
        default_value = "auto",
        value_enum,
        help = "Colorize stderr diagnostics: auto|always|never"
    )]
    color: ColorMode,

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

#[derive(Copy, Clone, Debug, ValueEnum)]
enum KindArg {
    Base,
    Text,
    Image,
    Audio,
    Script,
    Mod,
    Other,
}

impl From<KindArg> for LayerKind {
    fn from(value: KindArg) -> Self {
        match value {
            KindArg::Base => LayerKind::Base,
            KindArg::Text => LayerKind::Text,
            KindArg::Image => LayerKind::Image,
            KindArg::Audio => LayerKind::Audio,
            KindArg::Script => LayerKind::Script,
            KindArg::Mod => LayerKind::Mod,
            KindArg::Other => LayerKind::Other,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(
        about = "Pack a directory tree into a pack file",
        long_about = r#"Pack a directory tree into a single pack file.

Entries are stored in path order, so the same tree always gives the same bytes.
The pack is written to a temp file next to PACK_FILE and renamed into place."#
    )]
    Pack {
        #[arg(value_hint = ValueHint::DirPath)]
        source: PathBuf,
        #[arg(value_hint = ValueHint::FilePath)]
        pack: PathBuf,
        #[arg(long, help = "Layer name (default: PACK_FILE stem)")]
        name: Option<String>,
        #[arg(long, value_enum, default_value = "other")]
        kind: KindArg,
        #[arg(long, help = "Language tag, e.g. th or en")]
        lang: Option<String>,
        #[arg(long, default_value_t = 0, allow_negative_numbers = true, help = "Higher wins when layers overlap")]
        priority: i32,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        author: Option<String>,
        #[arg(long)]
        website: Option<String>,
        #[arg(long, help = "Compress file content with zstd")]
        compress: bool,
        #[arg(
            long,
            default_value_t = 3,
            value_parser = clap::value_parser!(i32).range(1..=22),
            help = "zstd level used with --compress (1-22)"
        )]
        zstd_level: i32,
    },
    #[command(
        about = "Unpack a pack file into a directory",
        long_about = r#"Unpack a pack file into a directory.

Fail-fast: the first corrupt or unsafe entry aborts the run and everything written so far
is removed again."#
    )]
    Unpack {
        #[arg(value_hint = ValueHint::FilePath)]
        pack: PathBuf,
        #[arg(value_hint = ValueHint::DirPath)]
        output: PathBuf,
        #[arg(long, help = "Fail instead of replacing files that already exist")]
        no_overwrite: bool,
    },
}

fn main() {
    init_tracing();
    let exit_code = match run() {
        Ok(code) => code,
        Err((err, color_mode)) => {
            emit_error(&err, color_mode);
            to_status_code(&err)
        }
    };
    std::process::exit(exit_code);
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

fn run() -> Result<i32, (Error, ColorMode)> {
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
                let code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    1
                } else {
                    0
                };
                return Ok(code);
            }
            _ => {
                return Err((
                    Error::new(ErrorKind::InvalidArgument)
                        .with_message(clap_error_summary(&err))
                        .with_hint("Try `lpack --help`."),
                    ColorMode::Auto,
                ));
            }
        },
    };

    let color_mode = cli.color;
    dispatch(cli.command)
        .map_err(add_hint)
        .map_err(|err| (err, color_mode))?;
    Ok(0)
}

fn dispatch(command: Command) -> Result<(), Error> {
    match command {
        Command::Pack {
            source,
            pack,
            name,
            kind,
            lang,
            priority,
            description,
            author,
            website,
            compress,
            zstd_level,
        } => {
            let name = name.unwrap_or_else(|| {
                pack.file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .unwrap_or_default()
            });
            let options = PackOptions {
                manifest: PackManifest {
                    name,
                    kind: kind.into(),
                    lang,
                    priority,
                    description,
                    version: None,
                    author,
                    website,
                },
                compression: if compress {
                    Compression::Zstd { level: zstd_level }
                } else {
                    Compression::Store
                },
            };
            let summary = pack_dir(&source, &pack, &options)?;
            emit_json(&summary)
        }
        Command::Unpack {
            pack,
            output,
            no_overwrite,
        } => {
            let options = UnpackOptions {
                overwrite: !no_overwrite,
            };
            let summary = unpack_file(&pack, &output, &options)?;
            emit_json(&summary)
        }
    }
}

// Stdout stays one JSON line unless a person is reading it.
fn emit_json(summary: &impl Serialize) -> Result<(), Error> {
    let json = if io::stdout().is_terminal() {
        serde_json::to_string_pretty(summary)
    } else {
        serde_json::to_string(summary)
    }
    .map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message("failed to encode summary")
            .with_source(err)
    })?;
    println!("{json}");
    Ok(())
}

fn add_hint(err: Error) -> Error {
    if err.hint().is_some() {
        return err;
    }
    if err.cleanup_incomplete() {
        return err.with_hint("Some extracted files could not be removed; see `cleanup`.");
    }
    match err.kind() {
        ErrorKind::Format => err.with_hint("Not a valid pack file, or written by a newer lpack."),
        ErrorKind::Integrity => err.with_hint("Pack content is corrupt. Re-create or re-download it."),
        ErrorKind::PathTraversal => {
            err.with_hint("The pack holds an unsafe path; it was not extracted.")
        }
        ErrorKind::Io => err.with_hint("I/O error. Check the path, filesystem, and disk space."),
        _ => err,
    }
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
        "{\"error\":{\"kind\":\"Io\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::InvalidArgument => "invalid argument".to_string(),
        ErrorKind::NotFound => "not found".to_string(),
        ErrorKind::Format => "invalid pack format".to_string(),
        ErrorKind::Integrity => "checksum mismatch".to_string(),
        ErrorKind::Io => "i/o error".to_string(),
        ErrorKind::PathTraversal => "unsafe path rejected".to_string(),
        ErrorKind::CleanupIncomplete => "cleanup incomplete".to_string(),
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
    if let Some(entry) = err.entry() {
        inner.insert("entry".to_string(), json!(entry));
    }
    if let Some(offset) = err.offset() {
        inner.insert("offset".to_string(), json!(offset));
    }
    if err.cleanup_incomplete() {
        let leftovers: Vec<String> = err
            .cleanup()
            .iter()
            .map(|path| path.display().to_string())
            .collect();
        inner.insert("cleanup".to_string(), json!(leftovers));
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
    if let Some(entry) = err.entry() {
        lines.push(format!(
            "{} {entry}",
            colorize_label("entry:", use_color, AnsiColor::Yellow)
        ));
    }
    for leftover in err.cleanup() {
        lines.push(format!(
            "{} {}",
            colorize_label("left behind:", use_color, AnsiColor::Yellow),
            leftover.display()
        ));
    }
    let causes = error_causes(err);
    if let Some(cause) = causes.first() {
        lines.push(format!(
            "{} {cause}",
            colorize_label("caused by:", use_color, AnsiColor::Yellow)
        ));
    }
    lines.join("\n")
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
