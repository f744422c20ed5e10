//! usb-repair
//!
//! Command-line front end for the device operation service: lists attached
//! USB devices and runs maintenance operations against one of them.

mod i18n;
mod render;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand, ValueEnum};
use common::{DeviceSelector, OperationKind, OperationResult, ScanMode, setup_logging};
use i18n::{Label, Locale, text};
use render::{ConsoleReporter, DeviceEntry};
use service::config::expand_path;
use service::{
    DeviceEnumerator, Dispatcher, OperationParams, ProcessRunner, Registry, ResultReporter,
    RusbBackend, SystemRunner, Target, ToolConfig, TracingReporter, UsbBackend,
};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "usb-repair")]
#[command(author, version, about = "USB repair tool - reset, check, format, scan and back up USB drives")]
#[command(long_about = "
Lists attached USB devices and runs maintenance tools against a chosen device.
Filesystem work is delegated to fsck, mkfs, badblocks and cp, run through sudo.

EXAMPLES:
    # List attached USB devices
    usb-repair list

    # Show strings of one device (by VID:PID or by bus/address)
    usb-repair info 0781:5567
    usb-repair info 1/4

    # Reset a device
    usb-repair reset 0781:5567

    # Check and repair a filesystem
    usb-repair check /dev/sdb1

    # Format as ext4 without the confirmation prompt
    usb-repair --yes format /dev/sdb1 --fs ext4

    # Back up the files of a mounted stick to a directory
    usb-repair backup /media/usb ~/backups/stick

CONFIGURATION:
    The tool looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/usb-repair/config.toml
    3. /etc/usb-repair/config.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    /// Message language (en, fr)
    #[arg(long, value_name = "LANG", global = true)]
    lang: Option<Locale>,

    /// Kill external tools still running after this many seconds
    #[arg(long, value_name = "SECS", global = true)]
    timeout: Option<u64>,

    /// Skip the confirmation prompt for destructive operations
    #[arg(short, long, global = true)]
    yes: bool,

    /// Print the command that would run and exit
    #[arg(long, global = true)]
    dry_run: bool,

    /// Machine-readable output
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List attached USB devices
    List,
    /// Show manufacturer, product and serial strings of a device
    Info {
        /// VID:PID, BUS/ADDRESS or /dev/bus/usb/BBB/DDD
        device: DeviceSelector,
    },
    /// Reset a USB device
    Reset {
        /// VID:PID, BUS/ADDRESS or /dev/bus/usb/BBB/DDD
        device: DeviceSelector,
    },
    /// Check a filesystem and repair it automatically
    Check {
        /// Block device, e.g. /dev/sdb1
        path: PathBuf,
    },
    /// Create a new filesystem on a device
    Format {
        /// Block device, e.g. /dev/sdb1
        path: PathBuf,
        /// Filesystem type (vfat, ntfs, ext4, ...)
        #[arg(long = "fs", value_name = "TYPE")]
        filesystem: Option<String>,
    },
    /// Scan a device for bad sectors
    Scan {
        /// Block device, e.g. /dev/sdb
        path: PathBuf,
        #[arg(long, value_enum, default_value_t = ScanArg::ReadOnly)]
        mode: ScanArg,
    },
    /// Copy the files of a mounted device to a destination, preserving attributes
    Backup {
        /// Mount point of the device, e.g. /media/usb (a /dev node would be
        /// copied as a node, not as data)
        path: PathBuf,
        /// Destination directory
        destination: PathBuf,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ScanArg {
    ReadOnly,
    NonDestructive,
    Destructive,
}

impl From<ScanArg> for ScanMode {
    fn from(arg: ScanArg) -> Self {
        match arg {
            ScanArg::ReadOnly => ScanMode::ReadOnly,
            ScanArg::NonDestructive => ScanMode::NonDestructive,
            ScanArg::Destructive => ScanMode::Destructive,
        }
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Returns whether the requested action succeeded
fn run() -> Result<bool> {
    let args = Args::parse();

    // Handle --save-config flag early (before loading config)
    if args.save_config {
        let config = ToolConfig::default();
        let path = ToolConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(true);
    }

    let config = if let Some(ref path) = args.config {
        ToolConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        ToolConfig::load_or_default()
    };

    // Use CLI log level if specified, otherwise use config value
    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.general.log_level);
    setup_logging(log_level, config.general.log_file_path().as_deref())
        .context("Failed to setup logging")?;

    info!("usb-repair v{}", env!("CARGO_PKG_VERSION"));

    let locale = match args.lang {
        Some(locale) => locale,
        None => config
            .general
            .locale
            .parse()
            .map_err(|e: String| anyhow!(e))?,
    };

    let Some(command) = args.command else {
        return Err(anyhow!("no command given, see --help"));
    };

    let filters = config
        .usb
        .device_filters()
        .context("Invalid USB filters")?;
    let enumerator = DeviceEnumerator::new(RusbBackend::new())
        .with_filters(filters)
        .mass_storage_only(config.usb.mass_storage_only);
    let dispatcher = Dispatcher::new(
        Registry::new(config.commands.clone()),
        enumerator,
        SystemRunner::new(),
    )
    .with_timeout(config.execution.timeout_with_override(args.timeout));

    let ui = Ui {
        locale,
        json: args.json,
        assume_yes: args.yes,
        dry_run: args.dry_run,
    };

    let (kind, target, params) = match command {
        Command::List => return list_devices(&ui, &dispatcher),
        Command::Info { device } => return show_device(&ui, &dispatcher, &device),
        Command::Reset { device } => (
            OperationKind::Reset,
            Target::Device(device),
            OperationParams::default(),
        ),
        Command::Check { path } => (
            OperationKind::CheckRepair,
            Target::Path(path.into()),
            OperationParams::default(),
        ),
        Command::Format { path, filesystem } => (
            OperationKind::Format,
            Target::Path(path.into()),
            OperationParams::with_filesystem(
                filesystem.unwrap_or_else(|| config.commands.default_filesystem.clone()),
            ),
        ),
        Command::Scan { path, mode } => (
            OperationKind::ScanBadSectors,
            Target::Path(path.into()),
            OperationParams::with_scan_mode(mode.into()),
        ),
        Command::Backup { path, destination } => (
            OperationKind::Backup,
            Target::Path(path.into()),
            OperationParams::with_destination(expand_path(&destination)),
        ),
    };

    ui.dispatch(
        &dispatcher,
        kind,
        &target,
        &params,
        &mut io::stdin().lock(),
        &mut io::stdout().lock(),
    )
}

type UsbDispatcher = Dispatcher<RusbBackend, SystemRunner>;

/// Presentation settings for one invocation
struct Ui {
    locale: Locale,
    json: bool,
    assume_yes: bool,
    dry_run: bool,
}

impl Ui {
    /// Run one operation, asking on `input` first when it destroys data
    fn dispatch<B: UsbBackend, R: ProcessRunner>(
        &self,
        dispatcher: &Dispatcher<B, R>,
        kind: OperationKind,
        target: &Target,
        params: &OperationParams,
        input: &mut impl BufRead,
        out: &mut impl Write,
    ) -> Result<bool> {
        if self.dry_run {
            return self.print_dry_run(dispatcher, kind, target, params, out);
        }

        if kind.is_destructive(params.scan_mode)
            && !self.assume_yes
            && !self.confirm(input, out)?
        {
            writeln!(out, "{}", text(self.locale, Label::Aborted))?;
            return Ok(false);
        }

        let result = dispatcher.execute(kind, target, params);
        Ok(self.report(&result, out))
    }

    fn print_dry_run<B: UsbBackend, R: ProcessRunner>(
        &self,
        dispatcher: &Dispatcher<B, R>,
        kind: OperationKind,
        target: &Target,
        params: &OperationParams,
        out: &mut impl Write,
    ) -> Result<bool> {
        match dispatcher.registry().resolve(kind, target, params) {
            Ok(resolved) => {
                writeln!(out, "{}: {}", text(self.locale, Label::DryRun), resolved)?;
                Ok(true)
            }
            Err(e) => Ok(self.report(&OperationResult::failure(kind, &e), out)),
        }
    }

    fn report(&self, result: &OperationResult, out: &mut impl Write) -> bool {
        TracingReporter.report(result);
        ConsoleReporter::new(out, self.locale, self.json).report(result);
        result.succeeded()
    }

    fn confirm(&self, input: &mut impl BufRead, out: &mut impl Write) -> Result<bool> {
        write!(out, "{} ", text(self.locale, Label::ConfirmDestructive))?;
        out.flush().context("Failed to flush stdout")?;

        let mut answer = String::new();
        input
            .read_line(&mut answer)
            .context("Failed to read confirmation")?;
        debug!("Confirmation answer: {:?}", answer.trim());
        Ok(i18n::is_confirmation(self.locale, &answer))
    }
}

/// List USB devices with their descriptor strings
fn list_devices(ui: &Ui, dispatcher: &UsbDispatcher) -> Result<bool> {
    let enumerator = dispatcher.enumerator();
    let devices = match enumerator.list_attached() {
        Ok(devices) => devices,
        Err(e) => {
            eprintln!("{}: {}", text(ui.locale, Label::Failure), e);
            return Ok(false);
        }
    };

    let entries: Vec<DeviceEntry> = devices
        .into_iter()
        .map(|device| {
            let descriptor = enumerator
                .backend()
                .read_descriptor(&device)
                .unwrap_or_default();
            DeviceEntry { device, descriptor }
        })
        .collect();

    if ui.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&entries).context("Failed to serialize devices")?
        );
    } else {
        print!("{}", render::device_list(ui.locale, &entries));
    }
    Ok(true)
}

/// Print the descriptor strings of one device
fn show_device(ui: &Ui, dispatcher: &UsbDispatcher, selector: &DeviceSelector) -> Result<bool> {
    match dispatcher.enumerator().describe_device(selector) {
        Ok(descriptor) => {
            if ui.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&descriptor)
                        .context("Failed to serialize descriptor")?
                );
            } else {
                print!("{}", render::descriptor(ui.locale, &descriptor));
            }
            Ok(true)
        }
        Err(e) => {
            eprintln!("{}: {}", text(ui.locale, Label::Failure), e);
            Ok(false)
        }
    }
}
