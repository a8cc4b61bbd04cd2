//! Human-readable contact summaries for terminal output

use chrono::NaiveDate;
use std::fmt::Write;

use crate::google::{INTEREST_KEY, LOCATION_KEY, OCCUPATION_KEY, SKILL_KEY};
use crate::models::{Address, Contact, TypedValue, parse_date};

const HIGHLIGHTED_EXTENSIONS: [(&str, &str); 4] = [
    (INTEREST_KEY, "Interest"),
    (SKILL_KEY, "Skill"),
    (OCCUPATION_KEY, "Occupation"),
    (LOCATION_KEY, "Location"),
];

/// Render a multi-line summary of a contact
pub fn format_contact(contact: &Contact) -> String {
    let mut out = String::new();

    let name = contact.full_name();
    if !name.is_empty() {
        let _ = writeln!(out, "{}", name);
        let _ = writeln!(out, "{}", "-".repeat(name.chars().count()));
    }

    if let Some(nickname) = contact.nicknames.first() {
        line(&mut out, "Nickname", nickname);
    }

    let org = contact
        .organization
        .as_deref()
        .map(|o| o.replace(';', ", ").trim_end_matches([',', ' ']).to_string())
        .filter(|o| !o.is_empty());
    match (org, contact.title.as_deref().filter(|t| !t.is_empty())) {
        (Some(org), Some(title)) => line(&mut out, "Work", &format!("{}, {}", title, org)),
        (Some(org), None) => line(&mut out, "Org", &org),
        (None, Some(title)) => line(&mut out, "Title", title),
        (None, None) => {}
    }

    for phone in &contact.phones {
        labeled(&mut out, "Phone", phone, "phone");
    }
    for email in &contact.emails {
        labeled(&mut out, "Email", email, "email");
    }
    for address in &contact.addresses {
        let text = format_address(address);
        if !text.is_empty() {
            let kind = address.kind.as_deref().unwrap_or("address");
            line(&mut out, "Address", &format!("{} ({})", text, kind));
        }
    }

    if let Some(birthday) = contact.birthday.as_deref() {
        line(&mut out, "Birthday", &format_display_date(birthday));
    }
    if let Some(anniversary) = contact.anniversary.as_deref() {
        line(&mut out, "Anniv", &format_display_date(anniversary));
    }

    for url in &contact.urls {
        labeled(&mut out, "URL", url, "url");
    }
    for im in &contact.impps {
        line(&mut out, "IM", &im.value);
    }
    for related in &contact.related {
        labeled(&mut out, "Related", related, "related");
    }

    if let Some(gender) = contact.gender.as_deref() {
        line(&mut out, "Gender", gender);
    }
    if let Some(note) = contact.note.as_deref() {
        line(&mut out, "Note", note);
    }

    for (key, label) in HIGHLIGHTED_EXTENSIONS {
        for ext in contact.extension_values(key) {
            line(&mut out, label, &ext.value);
        }
    }

    if let Some(id) = contact.uid() {
        line(&mut out, "UID", id.as_str());
    }

    out.trim_end_matches('\n').to_string()
}

/// Street, city, region, postal code and country, skipping empty parts
pub fn format_address(address: &Address) -> String {
    [
        address.street.as_str(),
        &address.city,
        &address.region,
        &address.postal_code,
        &address.country,
    ]
    .into_iter()
    .filter(|part| !part.is_empty())
    .collect::<Vec<_>>()
    .join(", ")
}

/// `19900615` => `Jun 15, 1990`, `--0310` => `Mar 10`, anything else unchanged
pub fn format_display_date(value: &str) -> String {
    let Some(date) = parse_date(value) else {
        return value.to_string();
    };
    let shown = NaiveDate::from_ymd_opt(date.year.unwrap_or(2000), date.month, date.day);
    match (shown, date.year) {
        (Some(d), Some(_)) => d.format("%b %-d, %Y").to_string(),
        (Some(d), None) => d.format("%b %-d").to_string(),
        (None, _) => value.to_string(),
    }
}

fn line(out: &mut String, label: &str, value: &str) {
    let _ = writeln!(out, "  {:<10} {}", format!("{}:", label), value);
}

fn labeled(out: &mut String, label: &str, value: &TypedValue, fallback: &str) {
    let kind = value.kind.as_deref().unwrap_or(fallback);
    line(out, label, &format!("{} ({})", value.value, kind));
}
