//! Domain models for contact records

mod contact;
mod date;

pub use contact::{Address, Contact, ContactId, Extension, StructuredName, TypedValue};
pub use date::{PartialDate, format_date, format_timestamp, parse_date, parse_timestamp};
