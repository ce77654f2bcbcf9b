//! Bootloader selection.
//!
//! Resolves the command line and configuration into one open, identified
//! bootloader session:
//! - HID bootloaders are enumerated, identified and filtered by path and part
//! - More than one match prompts via dialoguer on a TTY and fails otherwise
//! - UART bootloaders are opened directly on the configured port

use {
    crate::{Cli, CliError, TransportArg, UsbId, config::Config},
    anyhow::{Context, Result},
    console::style,
    dialoguer::{Error as DialoguerError, Select, theme::ColorfulTheme},
    efm8flash::{
        DeviceDescriptor, DiscoveredBootloader, Efm8Flasher, SILICON_LABS_VID, Transport,
        device,
        transport::{HidTransport, SerialConfig, UartTransport},
    },
    log::{debug, info},
    std::io::IsTerminal,
};

/// Default UART bootloader baud rate.
pub(crate) const DEFAULT_BAUD: u32 = 115_200;

/// A connected bootloader behind any transport.
pub(crate) type Session = Efm8Flasher<Box<dyn Transport>>;

fn usage_err(message: impl Into<String>) -> anyhow::Error {
    // Selection failures map to exit code 2 so scripts can tell them apart
    CliError::Usage(message.into()).into()
}

/// Which transport the invocation asks for.
pub(crate) fn resolve_transport(cli: &Cli, config: &Config) -> TransportArg {
    cli.transport
        .unwrap_or_else(|| {
            if cli.port.is_some()
                || config
                    .uart
                    .port
                    .is_some()
            {
                TransportArg::Uart
            } else {
                TransportArg::Hid
            }
        })
}

/// USB id filter: flag/env first, then config, then any Silicon Labs PID.
pub(crate) fn resolve_usb_id(cli: &Cli, config: &Config) -> UsbId {
    cli.device
        .unwrap_or(UsbId {
            vid: config
                .device
                .vid
                .unwrap_or(SILICON_LABS_VID),
            pid: config
                .device
                .pid
                .unwrap_or(0),
        })
}

/// Expected part name, if any.
pub(crate) fn resolve_mcu<'a>(cli: &'a Cli, config: &'a Config) -> Option<&'a str> {
    cli.mcu
        .as_deref()
        .or(config
            .device
            .mcu
            .as_deref())
}

/// Whether `device` is acceptable for the `--mcu` filter.
pub(crate) fn mcu_matches(mcu: Option<&str>, device: Option<&DeviceDescriptor>) -> bool {
    match (mcu, device) {
        (None, _) => true,
        (Some(wanted), Some(device)) => device
            .name
            .eq_ignore_ascii_case(wanted),
        (Some(_), None) => false,
    }
}

/// Keep the bootloaders that pass the path and part filters.
pub(crate) fn filter_bootloaders(
    found: Vec<DiscoveredBootloader>,
    path: Option<&str>,
    mcu: Option<&str>,
) -> Vec<DiscoveredBootloader> {
    found
        .into_iter()
        .filter(|b| path.is_none_or(|p| b.info.path == p))
        .filter(|b| mcu_matches(mcu, b.device.as_ref()))
        .collect()
}

/// Enumerate HID bootloaders matching the invocation's filters.
pub(crate) fn find_hid_bootloaders(cli: &Cli, config: &Config) -> Result<Vec<DiscoveredBootloader>> {
    let usb_id = resolve_usb_id(cli, config);
    debug!(
        "Looking for HID bootloaders {:04X}:{:04X}",
        usb_id.vid, usb_id.pid
    );
    let found = efm8flash::discover_bootloaders(usb_id.vid, usb_id.pid)
        .context("Failed to enumerate HID devices")?;
    Ok(filter_bootloaders(
        found,
        cli.path.as_deref(),
        resolve_mcu(cli, config),
    ))
}

/// Open and identify the bootloader the invocation refers to.
pub(crate) fn open_session(cli: &Cli, config: &Config) -> Result<Session> {
    match resolve_transport(cli, config) {
        TransportArg::Hid => open_hid_session(cli, config),
        TransportArg::Uart => open_uart_session(cli, config),
        TransportArg::Smbus => Err(efm8flash::Error::Unsupported(
            "The SMBus bootloader transport is not available on this host".to_string(),
        )
        .into()),
    }
}

fn open_hid_session(cli: &Cli, config: &Config) -> Result<Session> {
    let candidates = find_hid_bootloaders(cli, config)?;
    let selected = select_bootloader(candidates, cli.non_interactive)?;
    info!("Using {}", selected.short_description());

    let transport: Box<dyn Transport> = Box::new(HidTransport::new(selected.info));
    let mut flasher = Efm8Flasher::new(transport);
    flasher.connect()?;
    Ok(flasher)
}

fn open_uart_session(cli: &Cli, config: &Config) -> Result<Session> {
    let port = cli
        .port
        .clone()
        .or_else(|| {
            config
                .uart
                .port
                .clone()
        })
        .ok_or_else(|| usage_err("The UART transport needs a serial port (--port)"))?;
    let baud = cli
        .baud
        .or(config.uart.baud)
        .unwrap_or(DEFAULT_BAUD);
    let family_name = cli
        .family
        .as_deref()
        .or(config
            .uart
            .family
            .as_deref())
        .ok_or_else(|| usage_err("The UART transport needs a device family (--family ub1|ub2|ub3)"))?;
    let family = device::family_by_name(family_name)
        .ok_or_else(|| usage_err(format!("Unknown device family '{family_name}'")))?;

    info!("Using {port} at {baud} baud ({})", family.name);

    let transport: Box<dyn Transport> =
        Box::new(UartTransport::new(SerialConfig::new(&port, baud, family.product_id)));
    let mut flasher = Efm8Flasher::new(transport);
    let device = flasher.connect()?;

    let mcu = resolve_mcu(cli, config);
    if !mcu_matches(mcu, Some(&device)) {
        let _ = flasher.disconnect();
        return Err(CliError::DeviceNotFound(format!(
            "Bootloader on {port} is {}, expected {}",
            device.name,
            mcu.unwrap_or_default()
        ))
        .into());
    }
    Ok(flasher)
}

/// Pick exactly one bootloader, prompting when several match.
pub(crate) fn select_bootloader(
    mut candidates: Vec<DiscoveredBootloader>,
    non_interactive: bool,
) -> Result<DiscoveredBootloader> {
    match candidates.len() {
        0 => Err(usage_err("No EFM8 bootloader found")),
        1 => Ok(candidates.remove(0)),
        count => {
            if non_interactive {
                return Err(usage_err(format!(
                    "Multiple devices found ({count}); select one with --path or --mcu"
                )));
            }
            ensure_interactive_terminal(count)?;

            let items: Vec<String> = candidates
                .iter()
                .map(DiscoveredBootloader::short_description)
                .collect();
            let index = Select::with_theme(&ColorfulTheme::default())
                .with_prompt(format!(
                    "{count} bootloaders found, select one"
                ))
                .items(&items)
                .default(0)
                .interact_opt()
                .map_err(map_prompt_error)?
                .ok_or_else(|| CliError::Cancelled("Device selection cancelled".to_string()))?;
            Ok(candidates.swap_remove(index))
        },
    }
}

fn ensure_interactive_terminal(count: usize) -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(usage_err(format!(
            "Multiple devices found ({count}); select one with --path or --mcu"
        )))
    }
}

/// Ask a yes/no question; non-interactive callers must pass `--yes` instead.
pub(crate) fn confirm(prompt: &str, non_interactive: bool) -> Result<bool> {
    if non_interactive || !(std::io::stdin().is_terminal() && std::io::stderr().is_terminal()) {
        return Err(usage_err(format!(
            "{prompt} Refusing without --yes in non-interactive mode"
        )));
    }
    dialoguer::Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("{} {prompt}", style("⚠").yellow()))
        .default(false)
        .interact()
        .map_err(map_prompt_error)
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                CliError::Cancelled("Selection cancelled".to_string()).into()
            } else {
                usage_err(format!("Prompt failed: {io_err}"))
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        clap::Parser,
        efm8flash::transport::HidBootloaderInfo,
    };

    fn bootloader(path: &str, part: Option<&str>) -> DiscoveredBootloader {
        let device = part.map(|name| {
            *device::find_part(name)
                .unwrap()
                .1
        });
        DiscoveredBootloader {
            info: HidBootloaderInfo {
                path: path.to_string(),
                vendor_id: 0x10C4,
                product_id: 0xEAC9,
                serial_number: None,
                product: None,
            },
            device,
        }
    }

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(
            std::iter::once("efm8flash")
                .chain(args.iter().copied())
                .chain(std::iter::once("reset")),
        )
        .unwrap()
    }

    #[test]
    fn test_resolve_transport_defaults_to_hid() {
        let config = Config::default();
        assert_eq!(resolve_transport(&cli(&[]), &config), TransportArg::Hid);
    }

    #[test]
    fn test_resolve_transport_port_implies_uart() {
        let config = Config::default();
        assert_eq!(
            resolve_transport(&cli(&["--port", "/dev/ttyUSB0"]), &config),
            TransportArg::Uart
        );

        let mut config = Config::default();
        config.uart.port = Some("COM4".to_string());
        assert_eq!(resolve_transport(&cli(&[]), &config), TransportArg::Uart);
        assert_eq!(
            resolve_transport(&cli(&["--transport", "hid"]), &config),
            TransportArg::Hid
        );
    }

    #[test]
    fn test_resolve_usb_id_precedence() {
        let mut config = Config::default();
        assert_eq!(
            resolve_usb_id(&cli(&[]), &config),
            UsbId {
                vid: 0x10C4,
                pid: 0
            }
        );

        config.device.pid = Some(0xEACB);
        assert_eq!(resolve_usb_id(&cli(&[]), &config).pid, 0xEACB);
        assert_eq!(
            resolve_usb_id(&cli(&["--device", "1234:5678"]), &config),
            UsbId {
                vid: 0x1234,
                pid: 0x5678
            }
        );
    }

    #[test]
    fn test_resolve_mcu_precedence() {
        let mut config = Config::default();
        config.device.mcu = Some("EFM8UB30F40G_QFN20".to_string());
        assert_eq!(resolve_mcu(&cli(&[]), &config), Some("EFM8UB30F40G_QFN20"));
        assert_eq!(
            resolve_mcu(&cli(&["--mcu", "EFM8UB10F8G_QFN20"]), &config),
            Some("EFM8UB10F8G_QFN20")
        );
    }

    #[test]
    fn test_filter_by_mcu_skips_unidentified() {
        let found = vec![
            bootloader("a", Some("EFM8UB10F16G_QFN28")),
            bootloader("b", None),
            bootloader("c", Some("EFM8UB10F8G_QFN20")),
        ];
        let kept = filter_bootloaders(found, None, Some("efm8ub10f8g_qfn20"));
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].info.path, "c");
    }

    #[test]
    fn test_filter_by_path() {
        let found = vec![bootloader("a", None), bootloader("b", None)];
        let kept = filter_bootloaders(found, Some("b"), None);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].info.path, "b");
    }

    #[test]
    fn test_select_none_is_usage_error() {
        let err = select_bootloader(Vec::new(), true).unwrap_err();
        assert_eq!(crate::exit_code_for(&err), 2);
    }

    #[test]
    fn test_select_single() {
        let selected = select_bootloader(vec![bootloader("only", None)], true).unwrap();
        assert_eq!(selected.info.path, "only");
    }

    #[test]
    fn test_select_multiple_non_interactive_fails() {
        let err = select_bootloader(vec![bootloader("a", None), bootloader("b", None)], true)
            .unwrap_err();
        assert_eq!(crate::exit_code_for(&err), 2);
        assert!(err
            .to_string()
            .contains("Multiple devices"));
    }

    #[test]
    fn test_confirm_non_interactive_refuses() {
        let err = confirm("Really?", true).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::Usage(_))
        ));
    }

    #[test]
    fn test_open_uart_requires_port_and_family() {
        let config = Config::default();
        let err = open_session(&cli(&["--transport", "uart"]), &config)
            .err()
            .unwrap();
        assert_eq!(crate::exit_code_for(&err), 2);

        let err = open_session(&cli(&["--port", "/dev/null-efm8"]), &config)
            .err()
            .unwrap();
        assert!(err
            .to_string()
            .contains("family"));
    }

    #[test]
    fn test_open_smbus_is_unsupported() {
        let err = open_session(&cli(&["--transport", "smbus"]), &Config::default())
            .err()
            .unwrap();
        assert!(matches!(
            err.downcast_ref::<efm8flash::Error>(),
            Some(efm8flash::Error::Unsupported(_))
        ));
        assert_eq!(crate::exit_code_for(&err), 2);
    }
}
