//! efm8flash - command-line tool for Silicon Labs EFM8 factory bootloaders.

mod commands;
mod config;
mod image;
mod select;

use {
    anyhow::Result,
    clap::{Parser, Subcommand, ValueEnum},
    clap_complete::Shell,
    config::Config,
    console::style,
    env_logger::Env,
    log::{debug, warn},
    std::{
        env,
        path::PathBuf,
        process::ExitCode,
        sync::atomic::{AtomicBool, Ordering},
    },
};

/// Whether stderr is connected to a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(false);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Whether progress bars and colors should be drawn.
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed)
}

/// Whether the user pressed Ctrl-C.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// Classified CLI failures, each with a stable exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Bad invocation or no device could be selected.
    #[error("{0}")]
    Usage(String),
    /// Configuration file could not be used.
    #[error("{0}")]
    Config(String),
    /// The selected bootloader is not the expected part.
    #[error("{0}")]
    DeviceNotFound(String),
    /// The user cancelled the operation.
    #[error("{0}")]
    Cancelled(String),
}

impl CliError {
    /// Process exit code for this failure.
    pub(crate) fn exit_code(&self) -> u8 {
        match self {
            Self::Usage(_) => 2,
            Self::Config(_) => 3,
            Self::DeviceNotFound(_) => 4,
            Self::Cancelled(_) => 130,
        }
    }
}

/// Exit code for a library error.
fn library_exit_code(err: &efm8flash::Error) -> u8 {
    use efm8flash::Error;

    match err {
        Error::DeviceNotFound
        | Error::DeviceNotIdentified
        | Error::NotIdentified
        | Error::UnknownProduct { .. } => 4,
        Error::VerificationFailed { .. } => 5,
        Error::Unsupported(_) => 2,
        Error::Interrupted => 130,
        _ => 1,
    }
}

/// Map an error chain to the process exit code. The outermost classified
/// error wins; anything unclassified is a generic failure.
pub(crate) fn exit_code_for(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if let Some(cli_err) = cause.downcast_ref::<CliError>() {
            return cli_err.exit_code();
        }
        if let Some(lib_err) = cause.downcast_ref::<efm8flash::Error>() {
            return library_exit_code(lib_err);
        }
    }
    1
}

/// Bootloader transport selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum TransportArg {
    /// USB HID bootloader (EFM8UB parts).
    Hid,
    /// UART bootloader on a serial port.
    Uart,
    /// SMBus bootloader (not available on this host).
    Smbus,
}

/// A USB vendor/product id pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct UsbId {
    /// Vendor id.
    pub vid: u16,
    /// Product id, 0 matches any.
    pub pid: u16,
}

/// efm8flash - Flash Silicon Labs EFM8 microcontrollers through their
/// factory bootloader.
#[derive(Parser, Debug)]
#[command(
    name = "efm8flash",
    author,
    version,
    about,
    propagate_version = true,
    after_help = "Examples:\n  \
                  efm8flash list\n  \
                  efm8flash flash firmware.hex\n  \
                  efm8flash --mcu EFM8UB10F16G_QFN28 erase\n  \
                  efm8flash --transport uart --port /dev/ttyUSB0 --family ub1 flash app.bin"
)]
#[allow(clippy::struct_excessive_bools)]
pub struct Cli {
    /// USB id of the bootloader, as hex VID:PID (PID 0 matches any).
    #[arg(short = 'd', long, global = true, env = "EFM8FLASH_DEVICE", value_name = "VID:PID", value_parser = parse_usb_id)]
    device: Option<UsbId>,

    /// HID device path, as printed by `efm8flash list`.
    #[arg(long, global = true)]
    path: Option<String>,

    /// Only use a bootloader that identifies as this part.
    #[arg(long, global = true, value_name = "PART")]
    mcu: Option<String>,

    /// Bootloader transport (default: uart when a port is set, else hid).
    #[arg(short = 't', long, global = true, env = "EFM8FLASH_TRANSPORT", value_enum)]
    transport: Option<TransportArg>,

    /// Serial port for the UART bootloader.
    #[arg(short = 'p', long, global = true, env = "EFM8FLASH_PORT")]
    port: Option<String>,

    /// Baud rate for the UART bootloader (default: 115200).
    #[arg(short = 'b', long, global = true, env = "EFM8FLASH_BAUD")]
    baud: Option<u32>,

    /// Device family behind a UART bootloader (ub1, ub2, ub3).
    #[arg(short = 'f', long, global = true)]
    family: Option<String>,

    /// Verbose output (-v debug, -vv trace with packet dumps).
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Quiet mode (warnings and errors only).
    #[arg(short = 'q', long, global = true)]
    quiet: bool,

    /// Never prompt; fail instead.
    #[arg(long, global = true, env = "EFM8FLASH_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Path to a config file (replaces the default lookup).
    #[arg(long = "config", global = true, value_name = "FILE")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List connected HID bootloaders.
    List {
        /// Output the device list as JSON to stdout.
        #[arg(long)]
        json: bool,

        /// One line per device.
        #[arg(long)]
        short: bool,
    },

    /// Write an Intel HEX or raw binary image to application flash.
    Flash {
        /// Image file (.hex/.ihx, anything else is raw binary).
        file: PathBuf,

        /// Load address of a raw binary image.
        #[arg(long, value_parser = parse_hex_u32)]
        base_address: Option<u32>,

        /// Erase all application flash before writing.
        #[arg(long)]
        erase: bool,

        /// Leave the bootloader running after writing.
        #[arg(long)]
        no_reset: bool,
    },

    /// Erase all application flash, page 0 first.
    Erase {
        /// Start the application afterwards.
        #[arg(long)]
        reset: bool,
    },

    /// Leave the bootloader and start the application.
    Reset,

    /// Write the flash lock byte.
    Lock {
        /// Lock byte, hex (e.g. 0x7F).
        #[arg(value_parser = parse_hex_u8)]
        lock_byte: u8,
    },

    /// Clear the bootloader signature so the bootloader no longer runs.
    DisableBootloader {
        /// Do not ask for confirmation.
        #[arg(long)]
        yes: bool,
    },

    /// Show segments, pages and CRCs of an image file.
    Info {
        /// Image file.
        file: PathBuf,

        /// Load address of a raw binary image.
        #[arg(long, value_parser = parse_hex_u32)]
        base_address: Option<u32>,

        /// Output information as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// List supported parts.
    Parts {
        /// Output the catalog as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions (auto-detected if not specified with --install).
        #[arg(value_enum)]
        shell: Option<Shell>,

        /// Automatically install completions to your shell configuration.
        #[arg(long)]
        install: bool,
    },
}

/// Parse a "VID:PID" pair of hex numbers.
fn parse_usb_id(s: &str) -> Result<UsbId, String> {
    let Some((vid, pid)) = s.split_once(':') else {
        return Err(format!("Invalid device id: '{s}'. Expected VID:PID (e.g. '10C4:EAC9')"));
    };
    let parse = |part: &str| -> Result<u16, String> {
        let value = parse_hex_u32(part)?;
        u16::try_from(value).map_err(|_| format!("USB id out of range: '{part}'"))
    };
    Ok(UsbId {
        vid: parse(vid)?,
        pid: parse(pid)?,
    })
}

/// Parse hexadecimal number (supports 0x prefix and underscores).
fn parse_hex_u32(s: &str) -> Result<u32, String> {
    let s = s.trim();
    let s = s
        .trim_start_matches("0x")
        .trim_start_matches("0X");
    let s: String = s
        .chars()
        .filter(|c| *c != '_')
        .collect();
    u32::from_str_radix(&s, 16).map_err(|e| format!("Invalid hex value: {e}"))
}

/// Parse a single hex byte.
fn parse_hex_u8(s: &str) -> Result<u8, String> {
    let value = parse_hex_u32(s)?;
    u8::try_from(value).map_err(|_| format!("Byte out of range: '{s}'"))
}

fn install_interrupt_handler() {
    let result = ctrlc::set_handler(|| {
        if INTERRUPTED.swap(true, Ordering::Relaxed) {
            // Second Ctrl-C: give up immediately
            std::process::exit(130);
        }
        eprintln!(
            "\n{} Stopping after the current page...",
            style("⚠").yellow()
        );
    });
    if let Err(e) = result {
        warn!("Could not install Ctrl-C handler: {e}");
    }
    efm8flash::set_interrupt_checker(was_interrupted);
}

fn run(cli: &Cli) -> Result<()> {
    let config = match &cli.config_path {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load(),
    };
    config.validate()?;

    match &cli.command {
        Commands::List { json, short } => commands::device::cmd_list(cli, &config, *json, *short),
        Commands::Flash {
            file,
            base_address,
            erase,
            no_reset,
        } => commands::flash::cmd_flash(cli, &config, file, *base_address, *erase, *no_reset),
        Commands::Erase { reset } => commands::flash::cmd_erase(cli, &config, *reset),
        Commands::Reset => commands::device::cmd_reset(cli, &config),
        Commands::Lock { lock_byte } => commands::device::cmd_lock(cli, &config, *lock_byte),
        Commands::DisableBootloader { yes } => {
            commands::device::cmd_disable_bootloader(cli, &config, *yes)
        },
        Commands::Info {
            file,
            base_address,
            json,
        } => commands::info::cmd_info(cli, file, *base_address, *json),
        Commands::Parts { json } => commands::info::cmd_parts(cli, *json),
        Commands::Completions { shell, install } => {
            if *install {
                commands::completions::cmd_completions_install(*shell)
            } else {
                let shell = shell.ok_or_else(|| {
                    CliError::Usage(
                        "specify a shell type, e.g.: efm8flash completions bash \
                         (or use --install to auto-detect)"
                            .to_string(),
                    )
                })?;
                commands::completions::cmd_completions(shell);
                Ok(())
            }
        },
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);
    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "efm8flash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    install_interrupt_handler();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            ExitCode::from(exit_code_for(&err))
        },
    }
}
