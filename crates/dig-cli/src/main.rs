#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use ext2dig::{
    CsvWriter, DigError, JsonLinesWriter, Record, RecordSink, RecordStreams, ScanOptions,
    ScanSession, TombstonePolicy,
};
use std::env;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "EXT2DIG_LOG";

/// Parsed command line.
#[derive(Debug)]
struct CliArgs {
    image: PathBuf,
    json: bool,
    interleaved: bool,
    out_dir: Option<PathBuf>,
    options: ScanOptions,
}

fn main() {
    init_logging();
    if let Err(error) = run() {
        eprintln!("error: {error:#}");
        std::process::exit(exit_code(&error));
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

/// Structural scan failures exit 2; usage and open failures exit 1.
fn exit_code(error: &anyhow::Error) -> i32 {
    error.downcast_ref::<DigError>().map_or(1, DigError::exit_code)
}

fn run() -> Result<()> {
    let Some(args) = parse_args(env::args().skip(1))? else {
        print_usage(&mut io::stdout().lock())?;
        return Ok(());
    };

    let session = ScanSession::open_path(&args.image, args.options.clone())
        .with_context(|| format!("failed to open ext2 image {}", args.image.display()))?;
    info!(
        image = %args.image.display(),
        groups = session.geometry().groups_count,
        block_size = session.geometry().block_size,
        "image opened"
    );

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());

    if args.interleaved {
        let mut streams = args.out_dir.as_ref().map(|_| RecordStreams::new());
        if args.json {
            let mut writer = JsonLinesWriter::new(&mut out);
            session.scan(&mut Tee::new(&mut writer, streams.as_mut()))?;
        } else {
            let mut writer = CsvWriter::new(&mut out);
            session.scan(&mut Tee::new(&mut writer, streams.as_mut()))?;
        }
        if let (Some(dir), Some(streams)) = (&args.out_dir, &streams) {
            streams
                .write_files(dir)
                .with_context(|| format!("failed to write streams to {}", dir.display()))?;
        }
    } else {
        let mut streams = RecordStreams::new();
        session.scan(&mut streams)?;
        if let Some(dir) = &args.out_dir {
            streams
                .write_files(dir)
                .with_context(|| format!("failed to write streams to {}", dir.display()))?;
        }
        if args.json {
            streams.write_json_lines(&mut out)?;
        } else {
            streams.write_csv(&mut out)?;
        }
    }

    out.flush().context("failed to flush stdout")?;
    Ok(())
}

/// Forwards every record to `out` and, when present, keeps a copy in
/// per-kind streams.
struct Tee<'a> {
    out: &'a mut dyn RecordSink,
    streams: Option<&'a mut RecordStreams>,
}

impl<'a> Tee<'a> {
    fn new(out: &'a mut dyn RecordSink, streams: Option<&'a mut RecordStreams>) -> Self {
        Self { out, streams }
    }
}

impl RecordSink for Tee<'_> {
    fn accept(&mut self, record: Record) -> ext2dig::Result<()> {
        if let Some(streams) = self.streams.as_deref_mut() {
            streams.accept(record.clone())?;
        }
        self.out.accept(record)
    }
}

/// Returns `None` when help was requested.
fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Option<CliArgs>> {
    let mut image: Option<PathBuf> = None;
    let mut json = false;
    let mut interleaved = false;
    let mut out_dir: Option<PathBuf> = None;
    let mut options = ScanOptions::default();

    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--help" | "-h" | "help" => return Ok(None),
            "--json" => json = true,
            "--interleaved" => interleaved = true,
            "--out-dir" => {
                let dir = args.next().context("--out-dir requires a directory")?;
                out_dir = Some(PathBuf::from(dir));
            }
            "--tombstone" => {
                let raw = args.next().context("--tombstone requires stop or skip")?;
                options.tombstone_policy = match raw.as_str() {
                    "stop" => TombstonePolicy::Stop,
                    "skip" => TombstonePolicy::Skip,
                    other => bail!("invalid --tombstone value: {other} (expected stop or skip)"),
                };
            }
            "--no-inline-symlinks" => options.inline_symlink_pointers = false,
            "--skip-validation" => options.skip_validation = true,
            flag if flag.starts_with('-') => {
                print_usage(&mut io::stderr().lock())?;
                bail!("unknown option: {flag}");
            }
            path => {
                if image.is_some() {
                    bail!("unexpected extra argument: {path}");
                }
                image = Some(PathBuf::from(path));
            }
        }
    }

    let Some(image) = image else {
        print_usage(&mut io::stderr().lock())?;
        bail!("missing <image> argument");
    };
    Ok(Some(CliArgs {
        image,
        json,
        interleaved,
        out_dir,
        options,
    }))
}

/// Help goes to stdout when asked for and to stderr alongside usage errors.
fn print_usage(out: &mut impl Write) -> io::Result<()> {
    writeln!(out, "ext2dig: extract ext2 metadata as record rows\n")?;
    writeln!(out, "USAGE:")?;
    writeln!(out, "  ext2dig <image> [--json] [--interleaved] [--out-dir <dir>]")?;
    writeln!(out, "                  [--tombstone stop|skip] [--no-inline-symlinks] [--skip-validation]")?;
    writeln!(out)?;
    writeln!(out, "OUTPUT:")?;
    writeln!(out, "  Rows are grouped by kind: SUPERBLOCK, GROUP, BFREE, IFREE, INODE, DIRENT, INDIRECT.")?;
    writeln!(out, "  --interleaved prints rows in scan order instead.")?;
    writeln!(out, "  --out-dir also writes one CSV file per kind into <dir>.")?;
    writeln!(out)?;
    writeln!(out, "LOGGING:")?;
    writeln!(out, "  Diagnostics go to stderr; set {LOG_ENV}=debug for more detail.")
}
