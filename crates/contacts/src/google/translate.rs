//! People API <-> contact record translation
//!
//! Reading is close to lossless: every People API field group lands either
//! in a standard vCard property or in an `X-GOOGLE-*` extension. Writing
//! only carries the groups the update API accepts.

use super::api::{
    Date, DatedEntry, Name, Organization, Person, PostalAddress, TypedEntry, ValueEntry,
};
use crate::models::{
    Address, Contact, ContactId, Extension, StructuredName, TypedValue, format_date, parse_date,
};

/// Field mask sent with `updateContact`
pub const UPDATE_PERSON_FIELDS: &str =
    "names,phoneNumbers,emailAddresses,addresses,organizations,birthdays,biographies,urls";

pub(crate) const EVENT_KEY: &str = "X-GOOGLE-EVENT";
pub(crate) const INTEREST_KEY: &str = "X-GOOGLE-INTEREST";
pub(crate) const SKILL_KEY: &str = "X-GOOGLE-SKILL";
pub(crate) const OCCUPATION_KEY: &str = "X-GOOGLE-OCCUPATION";
pub(crate) const LOCATION_KEY: &str = "X-GOOGLE-LOCATION";
const GROUP_MEMBERSHIP_KEY: &str = "X-GOOGLE-GROUP-MEMBERSHIP";
const CUSTOM_PREFIX: &str = "X-GOOGLE-CUSTOM-";
const CLIENT_PREFIX: &str = "X-GOOGLE-CLIENT-";
const EXTERNAL_ID_KEY: &str = "X-GOOGLE-EXTERNAL-ID";
const KEYWORD_KEY: &str = "X-GOOGLE-KEYWORD";
const COVER_PHOTO_KEY: &str = "X-GOOGLE-COVER-PHOTO";
const AGE_RANGE_KEY: &str = "X-GOOGLE-AGE-RANGE";
const SOURCE_KEY: &str = "X-GOOGLE-SOURCE";

/// Build an extension key from a prefix and arbitrary user text.
///
/// The user part is upper-cased; whitespace and anything else that is not
/// legal in a vCard property name (letters, digits, `-`) becomes `-`.
pub fn extension_key(prefix: &str, user_key: &str) -> String {
    let suffix: String = user_key
        .chars()
        .flat_map(char::to_uppercase)
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect();
    format!("{}{}", prefix, suffix)
}

/// Convert a People API person to a contact record
pub fn person_to_contact(person: Person) -> Contact {
    let id = person
        .resource_name
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string();

    let mut contact = Contact {
        id: Some(ContactId::provider(id.clone())),
        etag: non_empty(person.etag),
        ..Default::default()
    };

    if let Some(name) = person.names.into_iter().next() {
        contact.formatted_name = name.display_name;
        contact.name = Some(StructuredName {
            family: name.family_name,
            given: name.given_name,
            middle: name.middle_name,
            prefix: name.honorific_prefix,
            suffix: name.honorific_suffix,
        });
    }

    contact.nicknames = values(person.nicknames);
    contact.phones = person.phone_numbers.into_iter().map(lowered).collect();
    contact.emails = person.email_addresses.into_iter().map(lowered).collect();
    contact.addresses = person
        .addresses
        .into_iter()
        .map(|a| Address {
            po_box: a.po_box,
            extended: a.extended_address,
            street: a.street_address,
            city: a.city,
            region: a.region,
            postal_code: a.postal_code,
            country: a.country,
            kind: non_empty(a.kind.to_lowercase()),
        })
        .collect();

    if let Some(org) = person.organizations.into_iter().next() {
        let mut value = org.name;
        if !org.department.is_empty() {
            value.push(';');
            value.push_str(&org.department);
        }
        contact.organization = non_empty(value);
        contact.title = non_empty(org.title);
    }

    contact.birthday = person
        .birthdays
        .into_iter()
        .next()
        .and_then(|b| encode_date(b.date));

    contact.photo = person.photos.into_iter().next().map(|p| p.url);
    contact.note = person.biographies.into_iter().next().map(|b| b.value);
    contact.urls = person.urls.into_iter().map(lowered).collect();

    for event in person.events {
        let Some(date) = encode_date(event.date) else {
            continue;
        };
        if event.kind.eq_ignore_ascii_case("anniversary") {
            contact.anniversary = Some(date);
        } else {
            contact
                .extensions
                .push(Extension::with_kind(EVENT_KEY, date, &event.kind));
        }
    }

    contact.gender = person.genders.into_iter().next().map(|g| g.value);

    contact.impps = person
        .im_clients
        .into_iter()
        .map(|im| {
            let uri = format!("{}:{}", im.protocol.to_lowercase(), im.username);
            TypedValue::labeled(uri, &im.kind.to_lowercase())
        })
        .chain(person.sip_addresses.into_iter().map(|sip| {
            TypedValue::labeled(format!("sip:{}", sip.value), &sip.kind.to_lowercase())
        }))
        .collect();

    contact.related = person
        .relations
        .into_iter()
        .map(|r| TypedValue::labeled(r.person, &r.kind.to_lowercase()))
        .collect();
    contact.calendar_urls = person
        .calendar_urls
        .into_iter()
        .map(|c| TypedValue::labeled(c.url, &c.kind.to_lowercase()))
        .collect();
    contact.languages = values(person.locales);

    let ext = &mut contact.extensions;
    ext.extend(person.interests.into_iter().map(|v| Extension::new(INTEREST_KEY, v.value)));
    ext.extend(person.skills.into_iter().map(|v| Extension::new(SKILL_KEY, v.value)));
    ext.extend(
        person
            .occupations
            .into_iter()
            .map(|v| Extension::new(OCCUPATION_KEY, v.value)),
    );
    ext.extend(
        person
            .locations
            .into_iter()
            .map(|l| Extension::with_kind(LOCATION_KEY, l.value, &l.kind)),
    );
    ext.extend(
        person
            .memberships
            .into_iter()
            .filter_map(|m| m.contact_group_membership)
            .map(|g| Extension::new(GROUP_MEMBERSHIP_KEY, g.contact_group_resource_name)),
    );
    ext.extend(
        person
            .user_defined
            .into_iter()
            .map(|kv| Extension::new(extension_key(CUSTOM_PREFIX, &kv.key), kv.value)),
    );
    ext.extend(
        person
            .client_data
            .into_iter()
            .map(|kv| Extension::new(extension_key(CLIENT_PREFIX, &kv.key), kv.value)),
    );
    ext.extend(
        person
            .external_ids
            .into_iter()
            .map(|e| Extension::with_kind(EXTERNAL_ID_KEY, e.value, &e.kind)),
    );
    ext.extend(
        person
            .misc_keywords
            .into_iter()
            .map(|k| Extension::with_kind(KEYWORD_KEY, k.value, &k.kind)),
    );
    ext.extend(
        person
            .cover_photos
            .into_iter()
            .map(|c| Extension::new(COVER_PHOTO_KEY, c.url)),
    );
    ext.extend(
        person
            .age_ranges
            .into_iter()
            .map(|a| Extension::new(AGE_RANGE_KEY, a.age_range)),
    );
    if let Some(metadata) = person.metadata {
        ext.extend(
            metadata
                .sources
                .into_iter()
                .map(|s| Extension::with_kind(SOURCE_KEY, s.id, &s.kind)),
        );
    }

    if contact.formatted_name.is_empty() {
        contact.formatted_name = id;
    }

    contact
}

/// Convert a contact record to a People API create/update payload.
///
/// Only names, phones, emails, addresses, organization, birthday,
/// biography and URLs are carried; everything else is dropped.
pub fn contact_to_person(contact: &Contact) -> Person {
    let mut person = Person {
        etag: contact.etag.clone().unwrap_or_default(),
        ..Default::default()
    };

    if let Some(name) = &contact.name {
        person.names.push(Name {
            family_name: name.family.clone(),
            given_name: name.given.clone(),
            middle_name: name.middle.clone(),
            honorific_prefix: name.prefix.clone(),
            honorific_suffix: name.suffix.clone(),
            ..Default::default()
        });
    } else if !contact.formatted_name.is_empty() {
        person.names.push(Name {
            display_name: contact.formatted_name.clone(),
            ..Default::default()
        });
    }

    person.phone_numbers = contact.phones.iter().map(typed_entry).collect();
    person.email_addresses = contact.emails.iter().map(typed_entry).collect();
    person.addresses = contact
        .addresses
        .iter()
        .map(|a| PostalAddress {
            po_box: a.po_box.clone(),
            extended_address: a.extended.clone(),
            street_address: a.street.clone(),
            city: a.city.clone(),
            region: a.region.clone(),
            postal_code: a.postal_code.clone(),
            country: a.country.clone(),
            kind: a.kind.clone().unwrap_or_default(),
        })
        .collect();

    let org = contact.organization.as_deref().unwrap_or_default();
    let title = contact.title.as_deref().unwrap_or_default();
    if !org.is_empty() || !title.is_empty() {
        let (name, department) = org.split_once(';').unwrap_or((org, ""));
        person.organizations.push(Organization {
            name: name.to_string(),
            department: department.to_string(),
            title: title.to_string(),
        });
    }

    if let Some(date) = contact.birthday.as_deref().and_then(parse_date) {
        person.birthdays.push(DatedEntry {
            date: Some(Date {
                year: date.year.unwrap_or(0),
                month: date.month as i32,
                day: date.day as i32,
            }),
            kind: String::new(),
        });
    }

    if let Some(note) = &contact.note {
        person.biographies.push(ValueEntry {
            value: note.clone(),
        });
    }

    person.urls = contact.urls.iter().map(typed_entry).collect();
    person
}

fn encode_date(date: Option<Date>) -> Option<String> {
    let date = date?;
    if date.month <= 0 || date.day <= 0 {
        return None;
    }
    format_date(date.year, date.month as u32, date.day as u32)
}

fn lowered(entry: TypedEntry) -> TypedValue {
    TypedValue::labeled(entry.value, &entry.kind.to_lowercase())
}

fn typed_entry(value: &TypedValue) -> TypedEntry {
    TypedEntry {
        value: value.value.clone(),
        kind: value.kind.clone().unwrap_or_default(),
    }
}

fn values(entries: Vec<ValueEntry>) -> Vec<String> {
    entries.into_iter().map(|e| e.value).collect()
}

fn non_empty(s: String) -> Option<String> {
    (!s.is_empty()).then_some(s)
}
