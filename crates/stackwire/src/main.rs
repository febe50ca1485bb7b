use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use clap::{Parser, Subcommand};
use stackwire_core::backend::NativeConfig;
use stackwire_core::report::write_report;
use stackwire_core::types::BackendKind;
use stackwire_core::{Buffer, Handle, HandleFlags, ProcessId, Reader};
use stackwire_utils::{debug, info, init_logging, init_logging_with_level, LogFormat, LogLevel, LoggingGuard, Settings};

/// Capture call stacks into a compact binary stream and print them back.
#[derive(Parser, Debug)]
#[command(name = "stackwire")]
#[command(version)]
#[command(about = "Capture call stacks into a compact binary stream and print them back", long_about = None)]
struct Cli
{
    /// Log level (overrides RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands
{
    /// Print a capture previously written with --output
    Parse
    {
        /// File holding the raw stream
        file: PathBuf,
        /// The file is a whole shared region from `local --shared --output`, not a bare stream
        #[arg(long, default_value_t = false)]
        region: bool,
    },
    /// Capture the stack of this process
    Local
    {
        #[command(flatten)]
        capture: CaptureArgs,
        /// Capture into a shared memory mapping instead of heap memory
        #[arg(long, default_value_t = false)]
        shared: bool,
    },
    /// Capture the stack of another process through ptrace
    Remote
    {
        /// Process (or thread) id to capture
        pid: i32,
        #[command(flatten)]
        capture: CaptureArgs,
        /// Milliseconds to wait for the target to stop after attaching
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
}

/// Flags shared by the capturing commands; unset flags fall back to the
/// `STACKWIRE_*` environment
#[derive(clap::Args, Debug, Default)]
struct CaptureArgs
{
    /// Write the raw stream here instead of printing a report
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Backend: native or symbolized
    #[arg(short, long)]
    backend: Option<String>,
    /// Capture buffer size in bytes
    #[arg(long)]
    capacity: Option<usize>,
    /// Stop after this many frames
    #[arg(long)]
    max_frames: Option<usize>,
}

impl CaptureArgs
{
    fn apply(&self, settings: &mut Settings)
    {
        if let Some(backend) = &self.backend {
            settings.backend.clone_from(backend);
        }
        if let Some(capacity) = self.capacity {
            settings.buffer_size = capacity;
        }
        if let Some(max_frames) = self.max_frames {
            settings.max_frames = max_frames;
        }
    }
}

fn main()
{
    let cli = Cli::parse();

    let _guard = match start_logging(cli.log_level) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = run_command(cli) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn start_logging(level: Option<LogLevel>) -> Result<LoggingGuard, stackwire_utils::LoggingError>
{
    match level {
        Some(level) => {
            let format = std::env::var(stackwire_utils::logging::LOG_FORMAT_ENV)
                .ok()
                .and_then(|s| s.parse::<LogFormat>().ok())
                .unwrap_or_default();
            init_logging_with_level(level, format)
        }
        None => init_logging(),
    }
}

fn run_command(cli: Cli) -> Result<(), Box<dyn std::error::Error>>
{
    match cli.command {
        Commands::Parse { file, region } => {
            let bytes = fs::read(&file)?;
            info!("Parsing {} ({} bytes)", file.display(), bytes.len());
            let reader = if region {
                // Written by `local --shared`: the mapping was page-aligned, no padding
                Reader::from_region_at(&bytes, 0)?
            } else {
                Reader::from_payload(&bytes)?
            };
            print_report(reader)
        }
        Commands::Local { capture, shared } => {
            let mut settings = Settings::from_env()?;
            capture.apply(&mut settings);
            let handle = create_handle(&settings)?;
            info!("Capturing local stack with the {} backend", handle.kind());
            if shared {
                capture_shared(&handle, &settings, capture.output.as_deref())
            } else {
                let mut bytes = vec![0u8; settings.buffer_size];
                let mut buffer = Buffer::new(&mut bytes)?;
                let size = handle.unwind(&mut buffer)?;
                emit(&buffer, size, capture.output.as_deref())
            }
        }
        Commands::Remote {
            pid,
            capture,
            timeout_ms,
        } => {
            let mut settings = Settings::from_env()?;
            capture.apply(&mut settings);
            if let Some(timeout_ms) = timeout_ms {
                settings.attach_timeout = Duration::from_millis(timeout_ms);
            }
            let handle = create_handle(&settings)?;
            info!("Capturing process {} with the {} backend", pid, handle.kind());
            let mut bytes = vec![0u8; settings.buffer_size];
            let mut buffer = Buffer::new(&mut bytes)?;
            let size = handle.unwind_remote(&mut buffer, ProcessId(pid))?;
            emit(&buffer, size, capture.output.as_deref())
        }
    }
}

fn create_handle(settings: &Settings) -> Result<Handle, Box<dyn std::error::Error>>
{
    let kind: BackendKind = settings.backend.parse()?;
    let config = NativeConfig {
        max_frames: settings.max_frames,
        attach_timeout: settings.attach_timeout,
    };
    debug!(?settings, "Creating handle");
    Ok(Handle::with_config(kind, config, HandleFlags::empty())?)
}

#[cfg(unix)]
fn capture_shared(handle: &Handle, settings: &Settings, output: Option<&Path>) -> Result<(), Box<dyn std::error::Error>>
{
    use stackwire_core::shm::{self, SharedRegion};

    if let Some(dir) = &settings.cache_dir {
        shm::set_cache_dir(dir);
    }
    let mut region = SharedRegion::create(settings.buffer_size)?;
    let size = handle.unwind(&mut region.buffer()?)?;
    debug!(fd = ?region.fd(), size, "Captured into shared memory");

    let reader = region.reader()?;
    match output {
        Some(path) => {
            // Keep the prologue so `parse --region` can read it back
            fs::write(path, region.as_bytes())?;
            info!("Wrote {} byte region to {}", region.len(), path.display());
            Ok(())
        }
        None => print_report(reader),
    }
}

#[cfg(not(unix))]
fn capture_shared(_: &Handle, _: &Settings, _: Option<&Path>) -> Result<(), Box<dyn std::error::Error>>
{
    Err("shared memory capture needs a Unix target".into())
}

fn emit(buffer: &Buffer<'_>, size: usize, output: Option<&Path>) -> Result<(), Box<dyn std::error::Error>>
{
    match output {
        Some(path) => {
            fs::write(path, &buffer.payload()[..size])?;
            info!("Wrote {} byte stream to {}", size, path.display());
            Ok(())
        }
        None => print_report(buffer.reader()?),
    }
}

fn print_report(reader: Reader<'_>) -> Result<(), Box<dyn std::error::Error>>
{
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let backend = reader.backend().map_or("unknown", BackendKind::name);
    writeln!(
        out,
        "Thread: {}  Backend: {}  Architecture: {}",
        reader.tid(),
        backend,
        reader.architecture()
    )?;
    write_report(reader, &mut out)?;
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_parse_remote_flags()
    {
        let cli = Cli::try_parse_from([
            "stackwire",
            "remote",
            "4242",
            "--timeout-ms",
            "50",
            "-b",
            "symbolized",
            "--max-frames",
            "8",
        ])
        .unwrap();
        let Commands::Remote {
            pid,
            capture,
            timeout_ms,
        } = cli.command
        else {
            panic!("expected remote command");
        };
        assert_eq!(pid, 4242);
        assert_eq!(timeout_ms, Some(50));
        assert_eq!(capture.backend.as_deref(), Some("symbolized"));
        assert_eq!(capture.max_frames, Some(8));
        assert_eq!(capture.output, None);
    }

    #[test]
    fn test_log_level_is_global()
    {
        let cli = Cli::try_parse_from(["stackwire", "local", "--log-level", "debug"]).unwrap();
        assert_eq!(cli.log_level, Some(LogLevel::Debug));
    }

    #[test]
    fn test_flags_override_settings()
    {
        let mut settings = Settings::default();
        let args = CaptureArgs {
            backend: Some("symbolized".to_string()),
            capacity: Some(4096),
            ..CaptureArgs::default()
        };
        args.apply(&mut settings);
        assert_eq!(settings.backend, "symbolized");
        assert_eq!(settings.buffer_size, 4096);
        assert_eq!(settings.max_frames, Settings::DEFAULT_MAX_FRAMES);
    }

    #[test]
    fn test_unknown_backend_is_rejected()
    {
        let settings = Settings {
            backend: "libunwind".to_string(),
            ..Settings::default()
        };
        assert!(create_handle(&settings).is_err());
    }

    #[test]
    fn test_local_capture_round_trips_through_a_file()
    {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.bin");
        let settings = Settings {
            max_frames: 4,
            ..Settings::default()
        };

        let handle = create_handle(&settings).unwrap();
        let mut bytes = vec![0u8; settings.buffer_size];
        let mut buffer = Buffer::new(&mut bytes).unwrap();
        let size = handle.unwind(&mut buffer).unwrap();
        emit(&buffer, size, Some(&path)).unwrap();

        let written = fs::read(&path).unwrap();
        assert_eq!(written.len(), size);
        let reader = Reader::from_payload(&written).unwrap();
        assert_eq!(reader.backend(), Some(BackendKind::Native));
        assert!(reader.count() <= 4);
    }

    #[cfg(unix)]
    #[test]
    fn test_shared_region_dump_reads_back_from_file()
    {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("region.bin");
        let settings = Settings {
            buffer_size: 16 * 1024,
            max_frames: 4,
            ..Settings::default()
        };
        let handle = create_handle(&settings).unwrap();
        capture_shared(&handle, &settings, Some(&path)).unwrap();

        // fs::read lands at whatever alignment the allocator picks
        let written = fs::read(&path).unwrap();
        assert_eq!(written.len(), 16 * 1024);
        let reader = Reader::from_region_at(&written, 0).unwrap();
        assert_eq!(reader.backend(), Some(BackendKind::Native));
        assert!(reader.count() <= 4);
    }
}
