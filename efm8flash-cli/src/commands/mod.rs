//! Command implementations.
//!
//! Each subcommand is implemented in its own module for clean separation.

pub(crate) mod completions;
pub(crate) mod device;
pub(crate) mod flash;
pub(crate) mod info;

use {
    crate::{
        Cli, use_fancy_output,
        config::Config,
        select::{self, Session},
    },
    anyhow::Result,
    indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle},
    log::warn,
};

const PROGRESS_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}";

/// Open the selected bootloader, run `f`, and always release it afterwards.
///
/// The error from `f` wins over a failure to close.
pub(crate) fn with_session<R, F>(cli: &Cli, config: &Config, f: F) -> Result<R>
where
    F: FnOnce(&mut Session) -> Result<R>,
{
    let mut flasher = select::open_session(cli, config)?;
    let result = f(&mut flasher);
    if let Err(e) = flasher.disconnect() {
        warn!("Failed to close bootloader: {e}");
    }
    result
}

/// Progress bar on stderr, hidden when quiet or not on a terminal.
pub(crate) fn progress_bar(cli: &Cli) -> ProgressBar {
    if cli.quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }
    let style = ProgressStyle::with_template(PROGRESS_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    let pb = ProgressBar::new(0);
    pb.set_style(style);
    pb.set_draw_target(ProgressDrawTarget::stderr());
    pb
}

/// Adapt a progress bar to the library's `(phase, done, total)` callback.
pub(crate) fn phase_reporter(pb: &ProgressBar) -> impl FnMut(&str, usize, usize) + '_ {
    let mut current_phase = String::new();
    move |phase: &str, done: usize, total: usize| {
        if phase != current_phase {
            current_phase = phase.to_string();
            pb.set_message(current_phase.clone());
            pb.set_length(total as u64);
        }
        pb.set_position(done as u64);
    }
}
