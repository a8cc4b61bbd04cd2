//! Rendering contacts for the terminal

use anyhow::Result;
use clap::ValueEnum;
use std::io::{self, Write};

use contacts::{Contact, format_contact, vcard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
    Vcf,
}

pub fn print_list(list: &[Contact], format: OutputFormat) -> Result<()> {
    let mut out = io::stdout().lock();
    match format {
        OutputFormat::Json => writeln!(out, "{}", serde_json::to_string_pretty(list)?)?,
        OutputFormat::Vcf => {
            for contact in list {
                write!(out, "{}", vcard::encode(contact))?;
            }
        }
        OutputFormat::Table => write!(out, "{}", table(list))?,
    }
    Ok(())
}

pub fn print_one(contact: &Contact, format: OutputFormat) -> Result<()> {
    let mut out = io::stdout().lock();
    match format {
        OutputFormat::Json => writeln!(out, "{}", serde_json::to_string_pretty(contact)?)?,
        OutputFormat::Vcf => write!(out, "{}", vcard::encode(contact))?,
        OutputFormat::Table => writeln!(out, "{}", format_contact(contact))?,
    }
    Ok(())
}

/// UID, name, email and phone columns separated by two spaces
fn table(list: &[Contact]) -> String {
    let header = ["UID", "NAME", "EMAIL", "PHONE"];
    let rows: Vec<[&str; 4]> = list
        .iter()
        .map(|c| {
            [
                c.uid().map(|id| id.as_str()).unwrap_or_default(),
                c.full_name(),
                c.primary_email().unwrap_or_default(),
                c.primary_phone().unwrap_or_default(),
            ]
        })
        .collect();

    let mut widths = header.map(|h| h.chars().count());
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    for row in std::iter::once(header).chain(rows) {
        let line: Vec<String> = row
            .iter()
            .zip(widths)
            .map(|(cell, width)| format!("{:<width$}", cell, width = width))
            .collect();
        out.push_str(line.join("  ").trim_end());
        out.push('\n');
    }
    out
}
