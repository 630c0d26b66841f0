//! Firmware update command implementation.

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use invflash::{
    Catalog, CatalogImageProvider, Error, FileImageProvider, FirmwareImage, ImageProvider,
    NativeConnector, PortSession, TargetType, UpdateConfig, UpdateSnapshot, Updater,
};
use log::{debug, warn};
use std::path::Path;
use std::time::Duration;

use crate::config::Config;
use crate::serial::{SerialOptions, ask_remember_port, port_selector};
use crate::{Cli, CliError, use_fancy_output, was_interrupted};

/// Default per-step response timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Pick the image source: explicit file, configured file, then catalog.
fn load_image(target: TargetType, explicit: Option<&Path>, config: &Config) -> Result<FirmwareImage> {
    let mut provider: Box<dyn ImageProvider> = if let Some(path) = explicit {
        Box::new(FileImageProvider::new().with_image(target, path))
    } else if let Some(path) = config.images.for_target(target) {
        Box::new(FileImageProvider::new().with_image(target, path.clone()))
    } else if let Some(catalog) = &config.images.catalog {
        let catalog = Catalog::from_file(catalog)
            .with_context(|| format!("Failed to load firmware catalog {}", catalog.display()))?;
        Box::new(CatalogImageProvider::new(catalog))
    } else {
        return Err(CliError::Usage(format!(
            "No firmware image for {target}. Pass --image or configure [images] in invflash.toml"
        ))
        .into());
    };

    provider
        .fetch(target)
        .with_context(|| format!("Failed to load {target} firmware image"))
}

fn connect_error(err: Error) -> anyhow::Error {
    match err {
        Error::NoDeviceSelected => CliError::Cancelled("Port selection cancelled".into()).into(),
        Error::Config(msg) => CliError::Usage(msg).into(),
        other => anyhow::Error::new(other).context("Failed to connect to the inverter"),
    }
}

/// Reopen a remembered port if there is one, otherwise select and open a port.
fn connect(session: &mut PortSession<NativeConnector>, has_authorized: bool) -> Result<()> {
    if has_authorized {
        match session.auto_connect() {
            Ok(true) => return Ok(()),
            Ok(false) => debug!("Remembered port not present"),
            Err(e) => debug!("Auto-connect failed: {e}"),
        }
    }
    session.connect().map(|_| ()).map_err(connect_error)
}

fn progress_bar(hidden: bool) -> Result<ProgressBar> {
    if hidden {
        return Ok(ProgressBar::hidden());
    }
    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
            .context("Invalid progress template")?
            .progress_chars("#>-"),
    );
    pb.set_draw_target(ProgressDrawTarget::stderr());
    Ok(pb)
}

/// Update command implementation.
pub(crate) fn cmd_update(
    cli: &Cli,
    config: &mut Config,
    image: Option<&Path>,
    json: bool,
) -> Result<()> {
    let quiet = cli.quiet || json;
    let target: TargetType = cli
        .target
        .map(Into::into)
        .or_else(|| config.target())
        .unwrap_or_default();
    let timeout = Duration::from_secs(
        cli.timeout
            .or(config.update.timeout_secs)
            .unwrap_or(DEFAULT_TIMEOUT_SECS),
    );

    let image = load_image(target, image, config)?;
    if !quiet {
        eprintln!(
            "{} Loaded {target} image {} ({} bytes)",
            style("📦").cyan(),
            image.source.display(),
            image.len()
        );
    }

    let mut connector = NativeConnector::new().with_selector(port_selector(SerialOptions {
        port: cli.port.clone(),
        non_interactive: cli.non_interactive,
    }));
    let remembered = config.port.serial.clone();
    for name in cli.port.iter().chain(remembered.iter()) {
        connector.authorize(name.as_str());
    }

    let mut session = PortSession::new(connector);
    if !quiet {
        eprintln!("{} Connecting...", style("⏳").yellow());
    }
    connect(&mut session, cli.port.is_some() || remembered.is_some())?;
    let port_name = session.port_name().unwrap_or_default().to_string();
    if !quiet {
        eprintln!("{} Connected to {port_name}", style("🔌").cyan());
    }

    if cli.port.is_none()
        && !cli.non_interactive
        && !json
        && remembered.as_deref() != Some(port_name.as_str())
        && ask_remember_port(&port_name)
    {
        if let Err(e) = config.remember_port(&port_name) {
            warn!("Could not save port: {e}");
        }
    }

    let pb = progress_bar(quiet || !use_fancy_output())?;
    let mut last_message = String::new();
    let mut updater = Updater::new(
        session,
        UpdateConfig {
            response_timeout: timeout,
        },
    );

    let result = updater.run(
        target,
        image.bytes,
        |snapshot: &UpdateSnapshot| {
            pb.set_position(u64::from(snapshot.percent));
            if snapshot.message != last_message {
                last_message.clone_from(&snapshot.message);
                let headline = snapshot.message.lines().next().unwrap_or_default();
                if pb.is_hidden() && !quiet {
                    eprintln!("  {:>3}% {headline}", snapshot.percent);
                }
                pb.set_message(headline.to_string());
            }
        },
        was_interrupted,
    );

    updater.port_mut().disconnect();

    match result {
        Ok(snapshot) => {
            pb.finish_with_message("done");
            if json {
                let out = serde_json::to_string_pretty(&snapshot)
                    .context("Failed to serialize update result")?;
                println!("{out}");
            } else if !cli.quiet {
                eprintln!("\n{} {}", style("🎉").green().bold(), snapshot.message);
            }
            Ok(())
        },
        Err(e) => {
            pb.abandon();
            if was_interrupted() {
                return Err(CliError::Cancelled("Update interrupted".into()).into());
            }
            let message = updater.session().message().to_string();
            Err(anyhow::Error::new(e).context(message))
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_load_image_prefers_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let explicit = dir.path().join("explicit.bin");
        let configured = dir.path().join("configured.bin");
        fs::write(&explicit, [1u8; 10]).unwrap();
        fs::write(&configured, [2u8; 20]).unwrap();

        let mut config = Config::default();
        config.images.arm = Some(configured.clone());

        let image = load_image(TargetType::Arm, Some(&explicit), &config).unwrap();
        assert_eq!(image.len(), 10);

        let image = load_image(TargetType::Arm, None, &config).unwrap();
        assert_eq!(image.source, configured);
    }

    #[test]
    fn test_load_image_from_catalog() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("dsp.bin"), [3u8; 30]).unwrap();
        let catalog = dir.path().join("catalog.json");
        fs::write(
            &catalog,
            r#"[{"name": "megarevo", "hardware": [
                {"hardware_version": "1.0.0", "types": [{"name": "tms320app_inverter", "url": "dsp.bin"}]}
            ]}]"#,
        )
        .unwrap();

        let mut config = Config::default();
        config.images.catalog = Some(catalog);
        let image = load_image(TargetType::Dsp, None, &config).unwrap();
        assert_eq!(image.bytes, vec![3u8; 30]);
    }

    #[test]
    fn test_missing_image_is_usage_error() {
        let err = load_image(TargetType::Dsp, None, &Config::default()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::Usage(_))
        ));
    }

    #[test]
    fn test_connect_error_classification() {
        let cancelled = connect_error(Error::NoDeviceSelected);
        assert!(matches!(
            cancelled.downcast_ref::<CliError>(),
            Some(CliError::Cancelled(_))
        ));

        let usage = connect_error(Error::Config("no ports".into()));
        assert!(matches!(
            usage.downcast_ref::<CliError>(),
            Some(CliError::Usage(_))
        ));

        let runtime = connect_error(Error::PortOpen {
            port: "COM1".into(),
            reason: "busy".into(),
        });
        assert!(runtime.downcast_ref::<CliError>().is_none());
    }
}
