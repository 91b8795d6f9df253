//! Plain-text tables for the terminal

use cueboard_core::domain::{DeviceListing, InvalidSound, SoundListing};
use std::fmt::Write;

pub fn devices(rows: &[DeviceListing]) -> String {
    if rows.is_empty() {
        return "No audio devices found.\n".to_string();
    }

    let width = rows
        .iter()
        .map(|r| r.device.name.len())
        .max()
        .unwrap_or(0)
        .max("Name".len());

    let mut out = String::new();
    let _ = writeln!(out, "    #  {:<width$}  In  Out", "Name");
    for row in rows {
        let marker = if row.is_selected { '*' } else { ' ' };
        let default = if row.device.is_default_output {
            "  (default)"
        } else {
            ""
        };
        let _ = writeln!(
            out,
            "{}  {:>2}  {:<width$}  {:>2}  {:>3}{}",
            marker,
            row.index,
            row.device.name,
            row.device.max_input_channels,
            row.device.max_output_channels,
            default,
        );
    }
    out
}

pub fn sounds(rows: &[SoundListing]) -> String {
    if rows.is_empty() {
        return "No sounds loaded.\n".to_string();
    }

    let width = rows.iter().map(|r| r.name.len()).max().unwrap_or(0);
    let mut out = String::new();
    for row in rows {
        match &row.hotkey {
            Some(key) => {
                let _ = writeln!(out, "{:<width$}  {}", row.name, key);
            }
            None => {
                let _ = writeln!(out, "{}", row.name);
            }
        }
    }
    out
}

pub fn hotkeys(bindings: &[(String, String)]) -> String {
    if bindings.is_empty() {
        return "No hotkeys bound.\n".to_string();
    }

    let width = bindings.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
    let mut out = String::new();
    for (key, sound) in bindings {
        let _ = writeln!(out, "{:<width$}  -> {}", key, sound);
    }
    out
}

pub fn invalid(files: &[InvalidSound]) -> String {
    let mut out = String::new();
    for file in files {
        let _ = writeln!(out, "  {}: {}", file.path.display(), file.reason);
    }
    out
}
