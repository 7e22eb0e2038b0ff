//! Atom wire helpers: text escaping, feed ids, and the entry-flattening
//! parser that turns feed documents back into typed entities and events.

use std::collections::HashMap;

use crate::entity::{Entity, MessageStream, Variable};
use crate::error::{Error, Result};
use crate::event::{DurMeasurement, DurMessage, Event, InstMeasurement};
use crate::rfc3339;
use crate::units::{Quantity, Unit, UnitRegistry};

/// The location of the standard metering service. Atom ids always start with
/// this canonical prefix, regardless of the URI used to contact the service.
pub const DEFAULT_URI_PREFIX: &str = "https://www.google.com/powermeter/feeds";

/// XML namespace attributes stamped on every element we emit.
pub const XMLNS_ATTRIBUTES: &str = " xmlns=\"http://www.w3.org/2005/Atom\" \
     xmlns:meter=\"http://schemas.google.com/meter/2008\"";

/// Escapes plain text for safe transmission inside XML.
pub fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('"', "&quot;")
}

fn unescape_text(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// The Atom id for an entity path: the canonical URI prefix plus the path.
pub fn atom_id(path: &str) -> String {
    format!("{DEFAULT_URI_PREFIX}{path}")
}

/// Splits a path or full feed URI into its path components.
pub fn path_components(uri_or_path: &str) -> Vec<&str> {
    let path = uri_or_path
        .strip_prefix(DEFAULT_URI_PREFIX)
        .unwrap_or(uri_or_path);
    path.trim_start_matches('/').split('/').collect()
}

/// One parsed `<entry>` flattened into key-value pairs: each child element
/// under its name, each child attribute under `element/attribute`.
type FlatEntry = HashMap<String, String>;

/// A single feed entry: either an entity or an event.
#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    Entity(Entity),
    Event(Event),
}

/// Flattens every `<entry>` element in the document. Child elements become
/// keys with their character content as the value; attributes become
/// `element/attribute` keys. Only `<link rel="related">` attributes are kept.
fn flatten_entries(content: &str) -> Vec<FlatEntry> {
    let mut entries = Vec::new();
    let mut entry: Option<FlatEntry> = None;
    let mut field: Option<String> = None;
    let mut text = String::new();

    let mut rest = content;
    while let Some(open) = rest.find('<') {
        if entry.is_some() && field.is_some() {
            text.push_str(&unescape_text(&rest[..open]));
        }
        let Some(close) = rest[open..].find('>').map(|i| open + i) else {
            break;
        };
        let tag = &rest[open + 1..close];
        rest = &rest[close + 1..];

        // Declarations and comments carry no entry data.
        if tag.starts_with('?') || tag.starts_with('!') {
            continue;
        }

        if let Some(name) = tag.strip_prefix('/') {
            let name = name.trim();
            if name == "entry" {
                if let Some(done) = entry.take() {
                    entries.push(done);
                }
                field = None;
            } else if field.as_deref() == Some(name) {
                if let Some(map) = entry.as_mut() {
                    map.insert(name.to_string(), std::mem::take(&mut text));
                }
                field = None;
            }
            continue;
        }

        let self_closing = tag.ends_with('/');
        let (name, attrs) = parse_tag(tag.trim_end_matches('/'));
        if let Some(map) = entry.as_mut() {
            field = Some(name.to_string());
            text.clear();
            let keep_attrs = name != "link"
                || attrs.iter().any(|(key, value)| key == "rel" && value == "related");
            if keep_attrs {
                for (key, value) in attrs {
                    map.insert(format!("{name}/{key}"), value);
                }
            }
            if self_closing {
                map.insert(name.to_string(), String::new());
                field = None;
            }
        } else if name == "entry" && !self_closing {
            entry = Some(FlatEntry::new());
        }
    }
    entries
}

/// Splits an opening tag into its element name and `key="value"` attributes.
fn parse_tag(tag: &str) -> (&str, Vec<(String, String)>) {
    let tag = tag.trim();
    let name_end = tag.find(char::is_whitespace).unwrap_or(tag.len());
    let name = &tag[..name_end];
    let mut attrs = Vec::new();
    let mut rest = tag[name_end..].trim_start();
    while let Some(eq) = rest.find('=') {
        let key = rest[..eq].trim();
        let Some(quoted) = rest[eq + 1..].trim_start().strip_prefix('"') else {
            break;
        };
        let Some(end) = quoted.find('"') else {
            break;
        };
        attrs.push((key.to_string(), unescape_text(&quoted[..end])));
        rest = quoted[end + 1..].trim_start();
    }
    (name, attrs)
}

fn text_field<'m>(entry: &'m FlatEntry, key: &str) -> Result<&'m str> {
    entry
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| Error::MalformedEntry(format!("missing field '{key}'")))
}

fn number_field(entry: &FlatEntry, key: &str) -> Result<f64> {
    let raw = text_field(entry, key)?;
    raw.trim()
        .parse()
        .map_err(|_| Error::MalformedEntry(format!("unparsable number in '{key}': {raw:?}")))
}

fn time_field(entry: &FlatEntry, key: &str) -> Result<f64> {
    rfc3339::from_timestamp(text_field(entry, key)?)
}

fn unit_field(registry: &UnitRegistry, entry: &FlatEntry, key: &str) -> Result<Unit> {
    let symbol = text_field(entry, key)?;
    registry
        .by_symbol(symbol)
        .ok_or_else(|| Error::MalformedEntry(format!("unknown unit symbol {symbol:?}")))
}

/// Measurement entries carry their value and uncertainty in one unit.
fn quantity_fields(registry: &UnitRegistry, entry: &FlatEntry) -> Result<(Quantity, Quantity)> {
    let unit = unit_field(registry, entry, "meter:quantity/meter:unit")?;
    let value = number_field(entry, "meter:quantity")?;
    let uncertainty = number_field(entry, "meter:quantity/meter:uncertainty")?;
    Ok((Quantity::new(value, unit), Quantity::new(uncertainty, unit)))
}

/// Parses every `<entry>` element in an Atom document into typed entities
/// and events. Entries of a kind the client does not know are skipped.
pub fn parse_entries(registry: &UnitRegistry, content: &str) -> Result<Vec<Entry>> {
    let mut results = Vec::new();
    for entry in flatten_entries(content) {
        if let Some(parsed) = parse_entry(registry, &entry)? {
            results.push(parsed);
        }
    }
    Ok(results)
}

fn parse_entry(registry: &UnitRegistry, entry: &FlatEntry) -> Result<Option<Entry>> {
    let id = text_field(entry, "id")?;
    let components = path_components(id);
    if components.len() < 2 {
        return Err(Error::MalformedEntry(format!("entry id too short: {id:?}")));
    }
    let kind = components[components.len() - 2];
    let local_id = components[components.len() - 1];
    let subject_path = format!("/{}", components[..components.len() - 2].join("/"));

    let parsed = match kind {
        "variable" => {
            if components.len() < 5 {
                return Err(Error::MalformedEntry(format!(
                    "variable id too short: {id:?}"
                )));
            }
            Entry::Entity(Entity::Variable(Variable::new(
                components[1],
                components[2],
                local_id,
                text_field(entry, "title")?,
                text_field(entry, "content")?,
                text_field(entry, "meter:location")?,
                text_field(entry, "meter:type")?,
                unit_field(registry, entry, "meter:unit")?,
                entry.contains_key("meter:cumulative"),
                entry.contains_key("meter:durational"),
            )))
        }
        "messageStream" => {
            if components.len() < 4 {
                return Err(Error::MalformedEntry(format!(
                    "message stream id too short: {id:?}"
                )));
            }
            Entry::Entity(Entity::MessageStream(MessageStream::new(
                components[components.len() - 3],
                local_id,
                text_field(entry, "title")?,
                text_field(entry, "content")?,
            )))
        }
        "durMeasurement" => {
            let (quantity, uncertainty) = quantity_fields(registry, entry)?;
            Entry::Event(Event::Durational(DurMeasurement::new(
                subject_path.as_str(),
                time_field(entry, "meter:startTime")?,
                time_field(entry, "meter:endTime")?,
                quantity,
                number_field(entry, "meter:startTime/meter:uncertainty")?,
                number_field(entry, "meter:endTime/meter:uncertainty")?,
                uncertainty,
            )))
        }
        "durMessage" => Entry::Event(Event::Message(DurMessage::new(
            subject_path.as_str(),
            time_field(entry, "meter:startTime")?,
            time_field(entry, "meter:endTime")?,
            text_field(entry, "title")?,
            text_field(entry, "content")?,
            entry.get("link/href").cloned(),
            0,
        ))),
        "instMeasurement" => {
            let (quantity, uncertainty) = quantity_fields(registry, entry)?;
            Entry::Event(Event::Instantaneous(InstMeasurement::new(
                subject_path.as_str(),
                time_field(entry, "meter:occurTime")?,
                quantity,
                number_field(entry, "meter:occurTime/meter:uncertainty")?,
                uncertainty,
                entry.contains_key("meter:initial"),
            )))
        }
        _ => return Ok(None),
    };
    Ok(Some(parsed))
}
