//! Interactive serial port selection.
//!
//! The chooser runs inside the port session's connect step:
//! - An explicit `--port` always wins
//! - Known USB-serial bridges are preferred over other ports
//! - A single known bridge is picked without asking
//! - Several candidates are offered in a dialoguer prompt
//! - Non-interactive mode never prompts

use {
    console::style,
    dialoguer::{Confirm, Error as DialoguerError, Select, theme::ColorfulTheme},
    invflash::{DetectedPort, Error, PortSelector, Result},
    log::info,
    std::io::{self, IsTerminal},
};

/// Options for serial port selection.
#[derive(Debug, Clone, Default)]
pub struct SerialOptions {
    /// Explicit port specified via CLI.
    pub port: Option<String>,
    /// Non-interactive mode (fail instead of prompting).
    pub non_interactive: bool,
}

/// Build the selector used by the connector on manual connect.
pub fn port_selector(options: SerialOptions) -> PortSelector {
    Box::new(move |ports| choose_port(ports, &options, prompt_port))
}

/// Pick a port among `ports` (known bridges first).
///
/// `Ok(None)` means the operator declined. Setup problems (nothing to pick
/// from, ambiguous choice without a terminal) are configuration errors.
fn choose_port<F>(ports: &[DetectedPort], options: &SerialOptions, prompt: F) -> Result<Option<String>>
where
    F: FnOnce(&[&DetectedPort]) -> Result<Option<usize>>,
{
    if let Some(name) = &options.port {
        return Ok(Some(name.clone()));
    }
    if ports.is_empty() {
        return Err(Error::Config(
            "No serial ports found. Connect the inverter or pass --port".into(),
        ));
    }

    let known: Vec<&DetectedPort> = ports.iter().filter(|p| p.device.is_known()).collect();
    let candidates: Vec<&DetectedPort> = if known.is_empty() {
        ports.iter().collect()
    } else {
        known
    };

    if options.non_interactive {
        return match candidates.as_slice() {
            [only] => Ok(Some(only.name.clone())),
            _ => Err(Error::Config(format!(
                "Found multiple serial ports ({}); pass --port in non-interactive mode",
                candidates.len()
            ))),
        };
    }

    if let [only] = candidates.as_slice() {
        if only.device.is_known() {
            info!("Auto-selected port: {}", only.label());
            return Ok(Some(only.name.clone()));
        }
    }

    if !(io::stdin().is_terminal() && io::stderr().is_terminal()) {
        return Err(Error::Config(
            "Port selection requires an interactive terminal; pass --port".into(),
        ));
    }

    Ok(prompt(&candidates)?.and_then(|index| candidates.get(index).map(|p| p.name.clone())))
}

fn map_prompt_error(err: DialoguerError) -> Error {
    match err {
        DialoguerError::IO(io_err) => Error::Io(io_err),
    }
}

fn is_cancel(err: &DialoguerError) -> bool {
    let DialoguerError::IO(io_err) = err;
    io_err.kind() == io::ErrorKind::Interrupted
}

/// Ask the operator to choose among `candidates`.
fn prompt_port(candidates: &[&DetectedPort]) -> Result<Option<usize>> {
    if let [only] = candidates {
        let confirmed = Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(format!("Use {}?", only.label()))
            .default(true)
            .interact_opt();
        return match confirmed {
            Ok(answer) => Ok(answer.unwrap_or(false).then_some(0)),
            Err(e) if is_cancel(&e) => Ok(None),
            Err(e) => Err(map_prompt_error(e)),
        };
    }

    eprintln!(
        "{} Found {} serial ports",
        style("ℹ").blue(),
        candidates.len()
    );

    let term_width = usize::from(console::Term::stderr().size().1);
    let max_item_width = term_width.saturating_sub(4);
    let labels: Vec<String> = candidates
        .iter()
        .map(|port| {
            let label = if port.device.is_known() {
                style(port.label()).bold().to_string()
            } else {
                port.label()
            };
            console::truncate_str(&label, max_item_width, "\u{2026}").into_owned()
        })
        .collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select the inverter's serial port")
        .items(&labels)
        .default(0)
        .interact_opt();

    match selection {
        Ok(index) => Ok(index),
        Err(e) if is_cancel(&e) => Ok(None),
        Err(e) => Err(map_prompt_error(e)),
    }
}

/// Offer to remember `port` so the next run reconnects without prompting.
pub fn ask_remember_port(port: &str) -> bool {
    if !(io::stdin().is_terminal() && io::stderr().is_terminal()) {
        return false;
    }
    Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Remember {port} for next time?"))
        .default(true)
        .interact_opt()
        .ok()
        .flatten()
        .unwrap_or(false)
}
