//! vCard 4.0 encoding and decoding for contact records
//!
//! Encoding emits CRLF line endings and folds lines at 75 octets.
//! Decoding accepts LF or CRLF input, unfolds continuation lines, strips
//! property groups (`item1.TEL`) and keeps unknown properties as extensions.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};

use crate::models::{
    Address, Contact, ContactId, Extension, StructuredName, TypedValue, format_timestamp,
    parse_timestamp,
};

/// Vendor property carrying the provider concurrency tag
pub const ETAG_PROPERTY: &str = "X-GOOGLE-ETAG";
/// Vendor property carrying the last sync timestamp
pub const LAST_SYNCED_PROPERTY: &str = "X-LAST-SYNCED";
/// Vendor property carrying identifier provenance
pub const ORIGIN_PROPERTY: &str = "X-CONTACTS-ORIGIN";

const MAX_LINE_OCTETS: usize = 75;

/// Encode a contact as a single vCard 4.0 document
pub fn encode(contact: &Contact) -> String {
    let mut out = Encoder::default();
    out.raw("BEGIN", None, "VCARD");
    out.raw("VERSION", None, "4.0");

    if let Some(id) = &contact.id {
        out.text("UID", None, id.as_str());
        out.raw(ORIGIN_PROPERTY, None, id.origin());
    }
    out.text("FN", None, &contact.formatted_name);
    if let Some(name) = &contact.name {
        out.structured(
            "N",
            None,
            &[&name.family, &name.given, &name.middle, &name.prefix, &name.suffix],
        );
    }
    for nickname in &contact.nicknames {
        out.text("NICKNAME", None, nickname);
    }
    out.typed_list("TEL", &contact.phones);
    out.typed_list("EMAIL", &contact.emails);
    for address in &contact.addresses {
        out.structured(
            "ADR",
            address.kind.as_deref(),
            &[
                &address.po_box,
                &address.extended,
                &address.street,
                &address.city,
                &address.region,
                &address.postal_code,
                &address.country,
            ],
        );
    }
    if let Some(org) = &contact.organization {
        let components: Vec<&str> = org.splitn(2, ';').collect();
        out.structured("ORG", None, &components);
    }
    out.optional("TITLE", contact.title.as_deref());
    out.optional("BDAY", contact.birthday.as_deref());
    out.optional("ANNIVERSARY", contact.anniversary.as_deref());
    out.optional("GENDER", contact.gender.as_deref());
    out.optional("NOTE", contact.note.as_deref());
    out.optional("PHOTO", contact.photo.as_deref());
    out.typed_list("URL", &contact.urls);
    out.typed_list("IMPP", &contact.impps);
    out.typed_list("RELATED", &contact.related);
    out.typed_list("CALURI", &contact.calendar_urls);
    for language in &contact.languages {
        out.text("LANG", None, language);
    }
    if let Some(revision) = &contact.revision {
        out.raw("REV", None, &format_timestamp(revision));
    }
    out.optional(ETAG_PROPERTY, contact.etag.as_deref());
    if let Some(synced) = &contact.last_synced {
        out.raw(LAST_SYNCED_PROPERTY, None, &format_timestamp(synced));
    }
    for extension in &contact.extensions {
        out.text(&extension.key, extension.kind.as_deref(), &extension.value);
    }

    out.raw("END", None, "VCARD");
    out.finish()
}

/// Decode the first vCard document in `input`
pub fn decode(input: &str) -> Result<Contact> {
    let lines = unfold(input);
    let mut iter = lines.iter().filter(|l| !l.trim().is_empty());

    let first = iter.next().context("Empty vCard document")?;
    if !first.trim().eq_ignore_ascii_case("BEGIN:VCARD") {
        bail!("vCard must start with BEGIN:VCARD, found {:?}", first);
    }

    let mut contact = Contact::default();
    let mut uid: Option<String> = None;
    let mut origin: Option<String> = None;
    let mut closed = false;

    for line in iter {
        let property = parse_line(line).with_context(|| format!("Malformed vCard line: {:?}", line))?;

        match property.name.as_str() {
            "END" if property.value.eq_ignore_ascii_case("VCARD") => {
                closed = true;
                break;
            }
            "BEGIN" => bail!("Nested vCard documents are not supported"),
            "VERSION" => {}
            "UID" => uid = Some(unescape(&property.value)),
            ORIGIN_PROPERTY => origin = Some(unescape(&property.value)),
            "FN" => contact.formatted_name = unescape(&property.value),
            "N" => {
                let mut parts = split_structured(&property.value).into_iter();
                contact.name = Some(StructuredName {
                    family: parts.next().unwrap_or_default(),
                    given: parts.next().unwrap_or_default(),
                    middle: parts.next().unwrap_or_default(),
                    prefix: parts.next().unwrap_or_default(),
                    suffix: parts.next().unwrap_or_default(),
                });
            }
            "NICKNAME" => contact.nicknames.push(unescape(&property.value)),
            "TEL" => contact.phones.push(property.typed_value()),
            "EMAIL" => contact.emails.push(property.typed_value()),
            "URL" => contact.urls.push(property.typed_value()),
            "IMPP" => contact.impps.push(property.typed_value()),
            "RELATED" => contact.related.push(property.typed_value()),
            "CALURI" => contact.calendar_urls.push(property.typed_value()),
            "ADR" => {
                let mut parts = split_structured(&property.value).into_iter();
                contact.addresses.push(Address {
                    po_box: parts.next().unwrap_or_default(),
                    extended: parts.next().unwrap_or_default(),
                    street: parts.next().unwrap_or_default(),
                    city: parts.next().unwrap_or_default(),
                    region: parts.next().unwrap_or_default(),
                    postal_code: parts.next().unwrap_or_default(),
                    country: parts.next().unwrap_or_default(),
                    kind: property.kind.clone(),
                });
            }
            "ORG" => {
                let parts = split_structured(&property.value);
                let org = parts.join(";");
                contact.organization.get_or_insert(org);
            }
            "TITLE" => set_once(&mut contact.title, &property.value),
            "BDAY" => set_once(&mut contact.birthday, &property.value),
            "ANNIVERSARY" => set_once(&mut contact.anniversary, &property.value),
            "GENDER" => set_once(&mut contact.gender, &property.value),
            "NOTE" => set_once(&mut contact.note, &property.value),
            "PHOTO" => set_once(&mut contact.photo, &property.value),
            "LANG" => contact.languages.push(unescape(&property.value)),
            "REV" => contact.revision = property.timestamp(),
            ETAG_PROPERTY => set_once(&mut contact.etag, &property.value),
            LAST_SYNCED_PROPERTY => contact.last_synced = property.timestamp(),
            _ => contact.extensions.push(Extension {
                key: property.name.clone(),
                value: unescape(&property.value),
                kind: property.kind.clone(),
            }),
        }
    }

    if !closed {
        bail!("vCard is missing END:VCARD");
    }

    contact.id = uid.filter(|u| !u.is_empty()).map(|uid| {
        origin
            .as_deref()
            .and_then(|o| ContactId::with_origin(uid.clone(), o))
            .unwrap_or_else(|| ContactId::from_legacy(uid))
    });

    Ok(contact)
}

fn set_once(slot: &mut Option<String>, raw: &str) {
    if slot.is_none() {
        *slot = Some(unescape(raw));
    }
}

#[derive(Default)]
struct Encoder {
    out: String,
}

impl Encoder {
    /// Write a value that needs no escaping
    fn raw(&mut self, name: &str, kind: Option<&str>, value: &str) {
        let mut line = String::with_capacity(name.len() + value.len() + 8);
        line.push_str(name);
        if let Some(kind) = kind.filter(|k| !k.is_empty()) {
            line.push_str(";TYPE=");
            line.push_str(&quote_param(kind));
        }
        line.push(':');
        line.push_str(value);
        fold_into(&mut self.out, &line);
    }

    fn text(&mut self, name: &str, kind: Option<&str>, value: &str) {
        self.raw(name, kind, &escape(value, false));
    }

    fn optional(&mut self, name: &str, value: Option<&str>) {
        if let Some(value) = value {
            self.text(name, None, value);
        }
    }

    fn structured(&mut self, name: &str, kind: Option<&str>, components: &[&str]) {
        let value = components
            .iter()
            .map(|c| escape(c, true))
            .collect::<Vec<_>>()
            .join(";");
        self.raw(name, kind, &value);
    }

    fn typed_list(&mut self, name: &str, values: &[TypedValue]) {
        for value in values {
            self.text(name, value.kind.as_deref(), &value.value);
        }
    }

    fn finish(self) -> String {
        self.out
    }
}

/// Escape a value. Structured components also escape `;` and `,`.
fn escape(value: &str, structured: bool) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                out.push_str("\\n");
            }
            '\n' => out.push_str("\\n"),
            ';' | ',' if structured => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// Split a structured value on unescaped `;`, unescaping each component
fn split_structured(value: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut escaped = false;
    for c in value.chars() {
        if escaped {
            current.push('\\');
            current.push(c);
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == ';' {
            parts.push(unescape(&current));
            current.clear();
        } else {
            current.push(c);
        }
    }
    if escaped {
        current.push('\\');
    }
    parts.push(unescape(&current));
    parts
}

/// Encode a parameter value with RFC 6868 caret escapes, quoting it when
/// it contains a separator
fn quote_param(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '^' => encoded.push_str("^^"),
            '"' => encoded.push_str("^'"),
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                encoded.push_str("^n");
            }
            '\n' => encoded.push_str("^n"),
            _ => encoded.push(c),
        }
    }
    if encoded.contains([':', ';', ',']) {
        format!("\"{}\"", encoded)
    } else {
        encoded
    }
}

/// Reverse RFC 6868 caret escapes; unknown sequences are kept as written
fn unquote_param(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '^' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => out.push('\n'),
            Some('\'') => out.push('"'),
            Some('^') => out.push('^'),
            Some(other) => {
                out.push('^');
                out.push(other);
            }
            None => out.push('^'),
        }
    }
    out
}

/// Append a content line, folding at 75 octets on UTF-8 boundaries
fn fold_into(out: &mut String, line: &str) {
    let mut rest = line;
    let mut limit = MAX_LINE_OCTETS;
    let mut first = true;
    while rest.len() > limit {
        let mut split = limit;
        while !rest.is_char_boundary(split) {
            split -= 1;
        }
        if !first {
            out.push(' ');
        }
        out.push_str(&rest[..split]);
        out.push_str("\r\n");
        rest = &rest[split..];
        first = false;
        // Continuation lines spend one octet on the leading space
        limit = MAX_LINE_OCTETS - 1;
    }
    if !first {
        out.push(' ');
    }
    out.push_str(rest);
    out.push_str("\r\n");
}

/// Join folded continuation lines back onto their logical line
fn unfold(input: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for physical in input.split('\n') {
        let physical = physical.strip_suffix('\r').unwrap_or(physical);
        if let Some(continuation) = physical.strip_prefix([' ', '\t'])
            && let Some(last) = lines.last_mut()
        {
            last.push_str(continuation);
            continue;
        }
        lines.push(physical.to_string());
    }
    lines
}

/// A parsed content line
struct RawProperty {
    name: String,
    kind: Option<String>,
    value: String,
}

impl RawProperty {
    fn typed_value(&self) -> TypedValue {
        TypedValue {
            value: unescape(&self.value),
            kind: self.kind.clone(),
        }
    }

    fn timestamp(&self) -> Option<DateTime<Utc>> {
        let parsed = parse_timestamp(&self.value);
        if parsed.is_none() {
            log::debug!("Ignoring unparsable {} value {:?}", self.name, self.value);
        }
        parsed
    }
}

fn parse_line(line: &str) -> Result<RawProperty> {
    let colon = find_unquoted(line, ':').context("missing ':' separator")?;
    let (head, value) = (&line[..colon], &line[colon + 1..]);

    let mut segments = split_unquoted(head, ';').into_iter();
    let full_name = segments.next().unwrap_or_default();
    let name = full_name
        .rsplit('.')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_uppercase();
    if name.is_empty() {
        bail!("missing property name");
    }

    let mut kind = None;
    for param in segments {
        let Some((key, param_value)) = param.split_once('=') else {
            continue;
        };
        if key.trim().eq_ignore_ascii_case("TYPE") {
            if kind.is_none() {
                kind = first_param_value(param_value);
            }
        } else {
            log::debug!("Dropping {} parameter {:?}", name, key.trim());
        }
    }

    Ok(RawProperty {
        name,
        kind,
        value: value.to_string(),
    })
}

fn first_param_value(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let value = match raw.strip_prefix('"').and_then(|r| r.strip_suffix('"')) {
        Some(quoted) => unquote_param(quoted),
        None => unquote_param(raw.split(',').next().unwrap_or_default()),
    };
    (!value.is_empty()).then_some(value)
}

fn find_unquoted(s: &str, needle: char) -> Option<usize> {
    let mut quoted = false;
    for (i, c) in s.char_indices() {
        match c {
            '"' => quoted = !quoted,
            c if c == needle && !quoted => return Some(i),
            _ => {}
        }
    }
    None
}

fn split_unquoted(s: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut rest = s;
    while let Some(i) = find_unquoted(rest, separator) {
        parts.push(&rest[..i]);
        rest = &rest[i + 1..];
    }
    parts.push(rest);
    parts
}
