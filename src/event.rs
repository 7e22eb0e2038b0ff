//! Measurement and message events: immutable observations attached to a
//! subject entity, with structural equality and Atom serialization.

use std::fmt;

use crate::atom::{atom_id, escape_text, XMLNS_ATTRIBUTES};
use crate::entity::EntityRef;
use crate::error::Result;
use crate::rfc3339;
use crate::units::{Quantity, Unit};

/// Derives a path-safe identifier from an event's primary timestamp:
/// the RFC 3339 rendering with the colons swapped out.
fn event_id(primary_time: f64) -> String {
    rfc3339::to_timestamp(primary_time).replace(':', "_")
}

/// The three event kinds the service understands, as they appear in feed
/// paths and queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Instantaneous,
    Durational,
    Message,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Instantaneous => "instMeasurement",
            EventKind::Durational => "durMeasurement",
            EventKind::Message => "durMessage",
        }
    }

    /// The field that keys time-range queries for this kind.
    pub(crate) fn time_field(self) -> &'static str {
        match self {
            EventKind::Instantaneous => "occurTime",
            EventKind::Durational | EventKind::Message => "startTime",
        }
    }
}

/// An instantaneous measurement: one point-in-time register observation.
#[derive(Debug, Clone, PartialEq)]
pub struct InstMeasurement {
    pub subject_path: String,
    /// Time of the measurement in seconds since the epoch.
    pub occur_time: f64,
    pub quantity: Quantity,
    /// Uncertainty in `occur_time`, in seconds.
    pub occur_time_uncertainty: f64,
    pub quantity_uncertainty: Quantity,
    /// True if a meter reset preceded this measurement.
    pub initial: bool,
    id: String,
}

impl InstMeasurement {
    pub fn new<'a>(
        subject: impl Into<EntityRef<'a>>,
        occur_time: f64,
        quantity: Quantity,
        occur_time_uncertainty: f64,
        quantity_uncertainty: Quantity,
        initial: bool,
    ) -> Self {
        Self {
            subject_path: subject.into().path().to_string(),
            occur_time,
            quantity,
            occur_time_uncertainty,
            quantity_uncertainty,
            initial,
            id: event_id(occur_time),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Produces the XML `<entry>` element for this event. The quantity is
    /// written in kilowatt-hours, so it must be an energy quantity.
    pub fn to_xml(&self) -> Result<String> {
        Ok(format!(
            r#"
<entry{xmlns}>
  <id>{id}</id>
  <category scheme="http://schemas.google.com/g/2005#kind"
            term="http://schemas.google.com/meter/2008#instMeasurement"/>
  <meter:subject>{subject}</meter:subject>
  <meter:occurTime meter:uncertainty="{time_uncertainty:.6}">{occur_time}</meter:occurTime>
  <meter:quantity meter:uncertainty="{quantity_uncertainty:.6}" meter:unit="kW h">
    {value:.6}
  </meter:quantity>
{initial}</entry>
"#,
            xmlns = XMLNS_ATTRIBUTES,
            id = atom_id(&format!(
                "{}/{}/{}",
                self.subject_path,
                EventKind::Instantaneous.as_str(),
                self.id
            )),
            subject = atom_id(&self.subject_path),
            time_uncertainty = self.occur_time_uncertainty,
            occur_time = rfc3339::to_timestamp(self.occur_time),
            quantity_uncertainty = self
                .quantity_uncertainty
                .convert_to(Unit::KilowattHour)?
                .value,
            value = self.quantity.convert_to(Unit::KilowattHour)?.value,
            initial = if self.initial {
                "  <meter:initial/>\n"
            } else {
                ""
            },
        ))
    }
}

impl fmt::Display for InstMeasurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}{}",
            rfc3339::to_timestamp(self.occur_time),
            self.quantity,
            if self.initial { " (initial)" } else { "" }
        )
    }
}

/// A durational measurement: a delta observed over an explicit interval.
#[derive(Debug, Clone, PartialEq)]
pub struct DurMeasurement {
    pub subject_path: String,
    /// Start of the measured interval in seconds since the epoch.
    pub start_time: f64,
    /// End of the measured interval in seconds since the epoch.
    pub end_time: f64,
    pub quantity: Quantity,
    /// Uncertainty in `start_time`, in seconds.
    pub start_time_uncertainty: f64,
    /// Uncertainty in `end_time`, in seconds.
    pub end_time_uncertainty: f64,
    pub quantity_uncertainty: Quantity,
    id: String,
}

impl DurMeasurement {
    #[allow(clippy::too_many_arguments)]
    pub fn new<'a>(
        subject: impl Into<EntityRef<'a>>,
        start_time: f64,
        end_time: f64,
        quantity: Quantity,
        start_time_uncertainty: f64,
        end_time_uncertainty: f64,
        quantity_uncertainty: Quantity,
    ) -> Self {
        Self {
            subject_path: subject.into().path().to_string(),
            start_time,
            end_time,
            quantity,
            start_time_uncertainty,
            end_time_uncertainty,
            quantity_uncertainty,
            id: event_id(start_time),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Produces the XML `<entry>` element for this event. The quantity is
    /// written in kilowatt-hours, so it must be an energy quantity.
    pub fn to_xml(&self) -> Result<String> {
        Ok(format!(
            r#"
<entry{xmlns}>
  <id>{id}</id>
  <category scheme="http://schemas.google.com/g/2005#kind"
            term="http://schemas.google.com/meter/2008#durMeasurement"/>
  <meter:subject>{subject}</meter:subject>
  <meter:startTime meter:uncertainty="{start_uncertainty:.6}">{start_time}</meter:startTime>
  <meter:endTime meter:uncertainty="{end_uncertainty:.6}">{end_time}</meter:endTime>
  <meter:quantity meter:uncertainty="{quantity_uncertainty:.6}" meter:unit="kW h">
    {value:.6}
  </meter:quantity>
</entry>
"#,
            xmlns = XMLNS_ATTRIBUTES,
            id = atom_id(&format!(
                "{}/{}/{}",
                self.subject_path,
                EventKind::Durational.as_str(),
                self.id
            )),
            subject = atom_id(&self.subject_path),
            start_uncertainty = self.start_time_uncertainty,
            start_time = rfc3339::to_timestamp(self.start_time),
            end_uncertainty = self.end_time_uncertainty,
            end_time = rfc3339::to_timestamp(self.end_time),
            quantity_uncertainty = self
                .quantity_uncertainty
                .convert_to(Unit::KilowattHour)?
                .value,
            value = self.quantity.convert_to(Unit::KilowattHour)?.value,
        ))
    }
}

impl fmt::Display for DurMeasurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to {}: {}",
            rfc3339::to_timestamp(self.start_time),
            rfc3339::to_timestamp(self.end_time),
            self.quantity
        )
    }
}

/// A durational message shown to the user over an interval. Only available
/// to utility providers.
#[derive(Debug, Clone, PartialEq)]
pub struct DurMessage {
    pub subject_path: String,
    pub start_time: f64,
    pub start_time_uncertainty: f64,
    pub end_time: f64,
    pub end_time_uncertainty: f64,
    /// Message title in plain text.
    pub title: String,
    /// Message content in plain text.
    pub content: String,
    /// Optional URL shown as a link with the message.
    pub link: Option<String>,
    /// Optional priority; greater than zero when set.
    pub priority: u32,
    id: String,
}

impl DurMessage {
    pub fn new<'a>(
        subject: impl Into<EntityRef<'a>>,
        start_time: f64,
        end_time: f64,
        title: &str,
        content: &str,
        link: Option<String>,
        priority: u32,
    ) -> Self {
        Self {
            subject_path: subject.into().path().to_string(),
            start_time,
            start_time_uncertainty: 0.0,
            end_time,
            end_time_uncertainty: 0.0,
            title: title.to_string(),
            content: content.to_string(),
            link,
            priority,
            id: event_id(start_time),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Produces the XML `<entry>` element for this event.
    pub fn to_xml(&self) -> String {
        format!(
            r#"
<entry{xmlns}>
  <id>{id}</id>
  <category scheme="http://schemas.google.com/g/2005#kind"
            term="http://schemas.google.com/meter/2008#durMessage"/>
  <meter:subject>{subject}</meter:subject>
  <meter:startTime meter:uncertainty="0">{start_time}</meter:startTime>
  <meter:endTime meter:uncertainty="0">{end_time}</meter:endTime>
  <meter:priority>{priority}</meter:priority>
  <title type="text">{title}</title>
  <content type="text">{content}</content>
{link}</entry>
"#,
            xmlns = XMLNS_ATTRIBUTES,
            id = atom_id(&format!(
                "{}/{}/{}",
                self.subject_path,
                EventKind::Message.as_str(),
                self.id
            )),
            subject = atom_id(&self.subject_path),
            start_time = rfc3339::to_timestamp(self.start_time),
            end_time = rfc3339::to_timestamp(self.end_time),
            priority = self.priority,
            title = escape_text(&self.title),
            content = escape_text(&self.content),
            link = match &self.link {
                Some(href) => format!("  <link rel=\"related\" href=\"{}\"/>\n", escape_text(href)),
                None => String::new(),
            },
        )
    }
}

impl fmt::Display for DurMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to {}: {:?}, priority: {}",
            rfc3339::to_timestamp(self.start_time),
            rfc3339::to_timestamp(self.end_time),
            self.content,
            self.priority
        )
    }
}

/// Any event the service accepts or returns.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Instantaneous(InstMeasurement),
    Durational(DurMeasurement),
    Message(DurMessage),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Instantaneous(_) => EventKind::Instantaneous,
            Event::Durational(_) => EventKind::Durational,
            Event::Message(_) => EventKind::Message,
        }
    }

    pub fn subject_path(&self) -> &str {
        match self {
            Event::Instantaneous(e) => &e.subject_path,
            Event::Durational(e) => &e.subject_path,
            Event::Message(e) => &e.subject_path,
        }
    }

    /// Path-safe identifier derived from the primary timestamp.
    pub fn id(&self) -> &str {
        match self {
            Event::Instantaneous(e) => e.id(),
            Event::Durational(e) => e.id(),
            Event::Message(e) => e.id(),
        }
    }

    /// Produces the XML `<entry>` element for this event.
    pub fn to_xml(&self) -> Result<String> {
        match self {
            Event::Instantaneous(e) => e.to_xml(),
            Event::Durational(e) => e.to_xml(),
            Event::Message(e) => Ok(e.to_xml()),
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Instantaneous(e) => e.fmt(f),
            Event::Durational(e) => e.fmt(f),
            Event::Message(e) => e.fmt(f),
        }
    }
}

impl From<InstMeasurement> for Event {
    fn from(event: InstMeasurement) -> Self {
        Event::Instantaneous(event)
    }
}

impl From<DurMeasurement> for Event {
    fn from(event: DurMeasurement) -> Self {
        Event::Durational(event)
    }
}

impl From<DurMessage> for Event {
    fn from(event: DurMessage) -> Self {
        Event::Message(event)
    }
}
