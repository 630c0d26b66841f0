//! Serial port listing.

use anyhow::{Context, Result};
use console::style;
use invflash::{DetectedPort, detect_ports, rank_ports};

/// Render ports as the JSON array printed by `list-ports --json`.
fn ports_json(ports: &[DetectedPort]) -> serde_json::Value {
    ports
        .iter()
        .map(|p| {
            serde_json::json!({
                "name": p.name,
                "device": p.device.name(),
                "known": p.device.is_known(),
                "vid": p.vid,
                "pid": p.pid,
                "manufacturer": p.manufacturer,
                "product": p.product,
                "serial": p.serial,
            })
        })
        .collect()
}

/// List ports command implementation.
pub(crate) fn cmd_list_ports(json: bool, remembered: Option<&str>) -> Result<()> {
    let detected = rank_ports(detect_ports());

    if json {
        let out = serde_json::to_string_pretty(&ports_json(&detected))
            .context("Failed to serialize port list")?;
        println!("{out}");
        return Ok(());
    }

    eprintln!("{}", style("Available serial ports").bold().underlined());

    if detected.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
        return Ok(());
    }

    for port in &detected {
        let device_type = if port.device.is_known() {
            format!(" [{}]", style(port.device.name()).yellow())
        } else {
            String::new()
        };
        let vid_pid = match (port.vid, port.pid) {
            (Some(vid), Some(pid)) => format!(" ({vid:04X}:{pid:04X})"),
            _ => String::new(),
        };
        let product = port
            .product
            .as_deref()
            .map(|p| format!(" - {}", style(p).dim()))
            .unwrap_or_default();
        let marker = if remembered == Some(port.name.as_str()) {
            format!(" {}", style("(remembered)").green())
        } else {
            String::new()
        };

        eprintln!(
            "  {} {}{device_type}{vid_pid}{product}{marker}",
            style("•").green(),
            style(&port.name).cyan(),
        );
    }

    Ok(())
}
