//! Schema descriptors and the generic document shape stored by the index.
//!
//! Notes never reach the index as-is: they are converted to a
//! [`GenericDocument`] that is validated against the registered [`Schema`],
//! and converted back when results come out of a search.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{NoteError, Result};
use crate::types::Note;

pub const NOTE_SCHEMA_TYPE: &str = "Note";
pub const TEXT_PROPERTY: &str = "text";

/// How a string property is tokenized into the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexingType {
    /// Stored but not searchable.
    None,
    /// A query term must equal a token.
    ExactTerms,
    /// A query term may be a prefix of a token.
    Prefixes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    Optional,
    Required,
    Repeated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyConfig {
    pub name: String,
    pub cardinality: Cardinality,
    pub indexing_type: IndexingType,
}

impl PropertyConfig {
    pub fn string(name: impl Into<String>, indexing_type: IndexingType) -> Self {
        Self {
            name: name.into(),
            cardinality: Cardinality::Optional,
            indexing_type,
        }
    }

    pub fn with_cardinality(mut self, cardinality: Cardinality) -> Self {
        self.cardinality = cardinality;
        self
    }

    pub fn is_indexed(&self) -> bool {
        self.indexing_type != IndexingType::None
    }
}

/// Declared shape of one document type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub schema_type: String,
    pub properties: Vec<PropertyConfig>,
}

impl Schema {
    pub fn new(schema_type: impl Into<String>) -> Self {
        Self {
            schema_type: schema_type.into(),
            properties: Vec::new(),
        }
    }

    pub fn with_property(mut self, property: PropertyConfig) -> Self {
        self.properties.push(property);
        self
    }

    pub fn property(&self, name: &str) -> Option<&PropertyConfig> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Checks a document's properties against this schema.
    /// Returns a human-readable reason on mismatch.
    pub fn validate(&self, doc: &GenericDocument) -> std::result::Result<(), String> {
        if doc.schema_type != self.schema_type {
            return Err(format!(
                "document type {} does not match schema {}",
                doc.schema_type, self.schema_type
            ));
        }
        for name in doc.properties.keys() {
            if self.property(name).is_none() {
                return Err(format!("unknown property {name} for type {}", self.schema_type));
            }
        }
        for prop in &self.properties {
            let count = doc.properties.get(&prop.name).map_or(0, Vec::len);
            match prop.cardinality {
                Cardinality::Required if count != 1 => {
                    return Err(format!("property {} requires exactly one value", prop.name));
                }
                Cardinality::Optional if count > 1 => {
                    return Err(format!("property {} accepts at most one value", prop.name));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// The index's untyped document: identity, type, and string properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenericDocument {
    pub namespace: String,
    pub id: String,
    pub schema_type: String,
    /// Assigned by the index when the document is put.
    pub creation_timestamp_millis: i64,
    pub properties: BTreeMap<String, Vec<String>>,
}

impl GenericDocument {
    pub fn new(
        namespace: impl Into<String>,
        id: impl Into<String>,
        schema_type: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            id: id.into(),
            schema_type: schema_type.into(),
            creation_timestamp_millis: 0,
            properties: BTreeMap::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.entry(name.into()).or_default().push(value.into());
        self
    }

    /// First value of a string property.
    pub fn property_string(&self, name: &str) -> Option<&str> {
        self.properties
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }
}

/// Schema registered for [`Note`] documents. `text` is prefix-indexed.
pub fn note_schema() -> Schema {
    Schema::new(NOTE_SCHEMA_TYPE).with_property(
        PropertyConfig::string(TEXT_PROPERTY, IndexingType::Prefixes)
            .with_cardinality(Cardinality::Required),
    )
}

impl From<&Note> for GenericDocument {
    fn from(note: &Note) -> Self {
        GenericDocument::new(&note.namespace, &note.id, NOTE_SCHEMA_TYPE)
            .with_property(TEXT_PROPERTY, &note.text)
    }
}

impl TryFrom<&GenericDocument> for Note {
    type Error = NoteError;

    fn try_from(doc: &GenericDocument) -> Result<Self> {
        if doc.schema_type != NOTE_SCHEMA_TYPE {
            return Err(NoteError::InvalidDocument(format!(
                "{}/{} has type {}, expected {NOTE_SCHEMA_TYPE}",
                doc.namespace, doc.id, doc.schema_type
            )));
        }
        let text = doc.property_string(TEXT_PROPERTY).ok_or_else(|| {
            NoteError::InvalidDocument(format!(
                "{}/{} has no {TEXT_PROPERTY} property",
                doc.namespace, doc.id
            ))
        })?;
        Ok(Note {
            namespace: doc.namespace.clone(),
            id: doc.id.clone(),
            text: text.to_string(),
        })
    }
}
