//! Commands that talk to a bootloader without writing an image.

use {
    super::with_session,
    crate::{Cli, CliError, config::Config, select},
    anyhow::Result,
    console::style,
};

/// List command implementation.
///
/// Descriptions go to stdout; an empty list is not an error.
pub(crate) fn cmd_list(cli: &Cli, config: &Config, json: bool, short: bool) -> Result<()> {
    let found = select::find_hid_bootloaders(cli, config)?;

    if json {
        let devices: Vec<serde_json::Value> = found
            .iter()
            .map(|b| {
                serde_json::json!({
                    "path": b.info.path,
                    "vid": b.info.vendor_id,
                    "pid": b.info.product_id,
                    "serial": b.info.serial_number,
                    "product": b.info.product,
                    "mcu": b.device,
                })
            })
            .collect();
        let output = serde_json::json!({
            "ok": true,
            "data": {
                "devices": devices,
            }
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    if found.is_empty() {
        if !cli.quiet {
            eprintln!("  {}", style("No EFM8 bootloaders found").dim());
        }
        return Ok(());
    }

    for bootloader in &found {
        if short {
            println!("{}", bootloader.short_description());
        } else {
            println!("{}", bootloader.description());
        }
    }
    Ok(())
}

/// Reset command implementation.
pub(crate) fn cmd_reset(cli: &Cli, config: &Config) -> Result<()> {
    with_session(cli, config, |flasher| {
        flasher.reset_mcu()?;
        Ok(())
    })?;
    if !cli.quiet {
        eprintln!("{} Application started", style("✓").green());
    }
    Ok(())
}

/// Lock command implementation.
pub(crate) fn cmd_lock(cli: &Cli, config: &Config, lock_byte: u8) -> Result<()> {
    with_session(cli, config, |flasher| {
        flasher.lock(lock_byte)?;
        Ok(())
    })?;
    if !cli.quiet {
        eprintln!(
            "{} Lock byte set to 0x{lock_byte:02X}",
            style("✓").green()
        );
    }
    Ok(())
}

/// Disable-bootloader command implementation.
pub(crate) fn cmd_disable_bootloader(cli: &Cli, config: &Config, yes: bool) -> Result<()> {
    if !yes
        && !select::confirm(
            "This clears the bootloader signature; the bootloader will no longer start.",
            cli.non_interactive,
        )?
    {
        return Err(CliError::Cancelled("Aborted".to_string()).into());
    }

    with_session(cli, config, |flasher| {
        flasher.disable_bootloader()?;
        Ok(())
    })?;
    if !cli.quiet {
        eprintln!("{} Bootloader disabled", style("✓").green());
    }
    Ok(())
}
