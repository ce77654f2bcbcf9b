//! Flash and erase command implementations.

use {
    super::{phase_reporter, progress_bar, with_session},
    crate::{Cli, CliError, config::Config, image::load_image, was_interrupted},
    anyhow::{Context, Result},
    console::style,
    efm8flash::FlashImage,
    std::path::Path,
};

fn ensure_not_interrupted() -> Result<()> {
    if was_interrupted() {
        Err(CliError::Cancelled("Interrupted".to_string()).into())
    } else {
        Ok(())
    }
}

/// Flash command implementation.
pub(crate) fn cmd_flash(
    cli: &Cli,
    config: &Config,
    file: &Path,
    base_address: Option<u32>,
    erase: bool,
    no_reset: bool,
) -> Result<()> {
    if !cli.quiet {
        eprintln!(
            "{} Loading image {}",
            style("📦").cyan(),
            file.display()
        );
    }

    let (format, image) = load_image(file, base_address)?;
    let Some(max_address) = image.max_address() else {
        return Err(CliError::Usage(format!("{} contains no data", file.display())).into());
    };

    if !cli.quiet {
        eprintln!(
            "{} {format} image: {} bytes in {} segment(s), up to 0x{max_address:04X}",
            style("ℹ").blue(),
            image.len(),
            image
                .populated_segments()
                .len()
        );
    }
    ensure_not_interrupted()?;

    let reset = !(no_reset || config.flash.no_reset);

    with_session(cli, config, |flasher| {
        if !cli.quiet {
            if let Some(device) = flasher.device() {
                eprintln!("{} Connected to {device}", style("✓").green());
            }
        }

        let pb = progress_bar(cli);
        if erase {
            flasher
                .erase_application_with_progress(phase_reporter(&pb))
                .context("Erasing application flash failed")?;
        }
        flasher
            .write_image_with_progress(&image, phase_reporter(&pb))
            .context("Flashing failed")?;
        pb.finish_with_message("Complete");

        if reset {
            if !cli.quiet {
                eprintln!("{} Starting application", style("🔄").cyan());
            }
            flasher.reset_mcu()?;
        }
        Ok(())
    })?;

    if !cli.quiet {
        eprintln!(
            "\n{} Flashing completed",
            style("🎉")
                .green()
                .bold()
        );
    }
    Ok(())
}

/// Erase command implementation.
pub(crate) fn cmd_erase(cli: &Cli, config: &Config, reset: bool) -> Result<()> {
    with_session(cli, config, |flasher| {
        if !cli.quiet {
            eprintln!("{} Erasing application flash", style("🗑").red());
        }
        let pb = progress_bar(cli);
        flasher
            .erase_application_with_progress(phase_reporter(&pb))
            .context("Erasing application flash failed")?;
        pb.finish_and_clear();

        if reset {
            flasher.reset_mcu()?;
        }
        Ok(())
    })?;

    if !cli.quiet {
        eprintln!(
            "\n{} Erase completed",
            style("✓")
                .green()
                .bold()
        );
    }
    Ok(())
}
