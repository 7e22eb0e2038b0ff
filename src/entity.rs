//! Entities the metering service tracks: measurable variables and provider
//! message streams. Entities are immutable value objects addressed by a
//! hierarchical path.

use crate::atom::{atom_id, XMLNS_ATTRIBUTES};
use crate::units::Unit;

/// The parent of an entity path, i.e. the feed the entity is posted to.
fn parent_path(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}

/// A variable: one measurable stream tracked for a user, e.g. the
/// electricity consumption of a single meter.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    /// The owner's user id (a string of decimal digits).
    pub user_id: String,
    /// The highest-level domain name of the data provider.
    pub provider_domain: String,
    /// The identifier of this variable under its provider.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Description of the variable's physical location.
    pub location: String,
    /// Type tag, e.g. `electricity_consumption`.
    pub variable_type: String,
    /// Unit of measurement for readings on this variable.
    pub unit: Unit,
    /// Whether readings are cumulative register values.
    pub cumulative: bool,
    /// Whether all measurements are durational (otherwise instantaneous).
    pub durational: bool,
    path: String,
}

impl Variable {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        user_id: &str,
        provider_domain: &str,
        variable_id: &str,
        name: &str,
        description: &str,
        location: &str,
        variable_type: &str,
        unit: Unit,
        cumulative: bool,
        durational: bool,
    ) -> Self {
        let path = format!("/user/{user_id}/{provider_domain}/variable/{variable_id}");
        Self {
            user_id: user_id.to_string(),
            provider_domain: provider_domain.to_string(),
            id: variable_id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            location: location.to_string(),
            variable_type: variable_type.to_string(),
            unit,
            cumulative,
            durational,
            path,
        }
    }

    /// Hierarchical path of this variable.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Path of the feed this variable is posted to.
    pub fn feed_path(&self) -> &str {
        parent_path(&self.path)
    }

    /// Produces the XML `<entry>` element for this entity.
    pub fn to_xml(&self) -> String {
        format!(
            r#"
<entry{xmlns}>
  <id>{id}</id>
  <meter:variableId>{variable_id}</meter:variableId>
  <title>{name}</title>
  <content type="text">{description}</content>
  <meter:location>{location}</meter:location>
  <meter:type>{variable_type}</meter:type>
  <meter:unit>{unit}</meter:unit>
{cumulative}{durational}</entry>
"#,
            xmlns = XMLNS_ATTRIBUTES,
            id = atom_id(&self.path),
            variable_id = self.id,
            name = self.name,
            description = self.description,
            location = self.location,
            variable_type = self.variable_type,
            unit = self.unit,
            cumulative = if self.cumulative {
                "  <meter:cumulative/>\n"
            } else {
                ""
            },
            durational = if self.durational {
                "  <meter:durational/>\n"
            } else {
                ""
            },
        )
    }
}

/// A provider's message stream. Message streams are only available to
/// utility providers.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageStream {
    /// The highest-level domain name of the provider.
    pub provider_domain: String,
    /// The identifier of this stream under its provider.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    path: String,
}

impl MessageStream {
    pub fn new(provider_domain: &str, stream_id: &str, name: &str, description: &str) -> Self {
        let path = format!("/provider/{provider_domain}/messageStream/{stream_id}");
        Self {
            provider_domain: provider_domain.to_string(),
            id: stream_id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            path,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn feed_path(&self) -> &str {
        parent_path(&self.path)
    }

    /// Produces the XML `<entry>` element for this entity.
    pub fn to_xml(&self) -> String {
        format!(
            r#"
<entry{xmlns}>
  <id>{id}</id>
  <meter:messageStreamId>{stream_id}</meter:messageStreamId>
  <title>{name}</title>
  <content type="text">{description}</content>
</entry>
"#,
            xmlns = XMLNS_ATTRIBUTES,
            id = atom_id(&self.path),
            stream_id = self.id,
            name = self.name,
            description = self.description,
        )
    }
}

/// Either kind of addressable entity.
#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    Variable(Variable),
    MessageStream(MessageStream),
}

impl Entity {
    pub fn path(&self) -> &str {
        match self {
            Entity::Variable(v) => v.path(),
            Entity::MessageStream(m) => m.path(),
        }
    }

    pub fn feed_path(&self) -> &str {
        match self {
            Entity::Variable(v) => v.feed_path(),
            Entity::MessageStream(m) => m.feed_path(),
        }
    }

    pub fn to_xml(&self) -> String {
        match self {
            Entity::Variable(v) => v.to_xml(),
            Entity::MessageStream(m) => m.to_xml(),
        }
    }
}

/// A subject reference: operations that report about an entity accept either
/// a raw path or a typed entity, and resolve the path once at the boundary.
#[derive(Debug, Clone, Copy)]
pub enum EntityRef<'a> {
    Path(&'a str),
    Variable(&'a Variable),
    MessageStream(&'a MessageStream),
}

impl EntityRef<'_> {
    /// The entity path this reference resolves to.
    pub fn path(&self) -> &str {
        match self {
            EntityRef::Path(path) => path,
            EntityRef::Variable(v) => v.path(),
            EntityRef::MessageStream(m) => m.path(),
        }
    }
}

impl<'a> From<&'a str> for EntityRef<'a> {
    fn from(path: &'a str) -> Self {
        EntityRef::Path(path)
    }
}

impl<'a> From<&'a String> for EntityRef<'a> {
    fn from(path: &'a String) -> Self {
        EntityRef::Path(path)
    }
}

impl<'a> From<&'a Variable> for EntityRef<'a> {
    fn from(variable: &'a Variable) -> Self {
        EntityRef::Variable(variable)
    }
}

impl<'a> From<&'a MessageStream> for EntityRef<'a> {
    fn from(stream: &'a MessageStream) -> Self {
        EntityRef::MessageStream(stream)
    }
}

impl<'a> From<&'a Entity> for EntityRef<'a> {
    fn from(entity: &'a Entity) -> Self {
        match entity {
            Entity::Variable(v) => EntityRef::Variable(v),
            Entity::MessageStream(m) => EntityRef::MessageStream(m),
        }
    }
}
