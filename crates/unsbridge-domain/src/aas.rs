//! Structured view of an AAS environment document.
//!
//! This is the object the ingress adapters hand to the traversal: the JSON
//! serialization of an Asset Administration Shell environment deserializes
//! directly into these types. Unknown keys in the source document are
//! ignored — AAS files routinely carry vendor extensions.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AasEnvironment {
    #[serde(default)]
    pub asset_administration_shells: Vec<AssetShell>,
    #[serde(default)]
    pub submodels: Vec<Submodel>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetShell {
    pub id: String,
    pub id_short: Option<String>,
    pub asset_information: Option<AssetInformation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetInformation {
    pub global_asset_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submodel {
    pub id: String,
    pub id_short: Option<String>,
    pub semantic_id: Option<Reference>,
    #[serde(default)]
    pub submodel_elements: Vec<SubmodelElement>,
}

/// A reference chain. The spine treats semantic ids as opaque strings, so
/// only the first key's value is surfaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    #[serde(rename = "type", default)]
    pub reference_type: Option<String>,
    #[serde(default)]
    pub keys: Vec<Key>,
}

impl Reference {
    pub fn as_identifier(&self) -> Option<&str> {
        self.keys.first().map(|k| k.value.as_str())
    }

    /// Flat rendering of the whole key chain, comma-separated.
    pub fn render(&self) -> String {
        self.keys
            .iter()
            .map(|k| k.value.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Key {
    #[serde(rename = "type", default)]
    pub key_type: Option<String>,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Qualifier {
    #[serde(rename = "type")]
    pub qualifier_type: String,
    pub value: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LangString {
    pub language: String,
    pub text: String,
}

/// One submodel element, discriminated by the AAS `modelType` field.
///
/// Anything the traversal does not understand lands in `Unknown` so a
/// single foreign element never aborts a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "modelType", rename_all_fields = "camelCase")]
pub enum SubmodelElement {
    Property {
        id_short: Option<String>,
        value_type: Option<String>,
        value: Option<String>,
        semantic_id: Option<Reference>,
        #[serde(default)]
        qualifiers: Vec<Qualifier>,
    },
    MultiLanguageProperty {
        id_short: Option<String>,
        #[serde(default)]
        value: Vec<LangString>,
        semantic_id: Option<Reference>,
    },
    Range {
        id_short: Option<String>,
        value_type: Option<String>,
        min: Option<String>,
        max: Option<String>,
        semantic_id: Option<Reference>,
        #[serde(default)]
        qualifiers: Vec<Qualifier>,
    },
    #[serde(rename = "SubmodelElementCollection")]
    Collection {
        id_short: Option<String>,
        #[serde(default)]
        value: Vec<SubmodelElement>,
        semantic_id: Option<Reference>,
    },
    #[serde(rename = "SubmodelElementList")]
    List {
        id_short: Option<String>,
        #[serde(default)]
        value: Vec<SubmodelElement>,
        semantic_id: Option<Reference>,
    },
    Entity {
        id_short: Option<String>,
        entity_type: Option<String>,
        global_asset_id: Option<String>,
        #[serde(default)]
        statements: Vec<SubmodelElement>,
        semantic_id: Option<Reference>,
    },
    ReferenceElement {
        id_short: Option<String>,
        value: Option<Reference>,
        semantic_id: Option<Reference>,
    },
    RelationshipElement {
        id_short: Option<String>,
        first: Option<Reference>,
        second: Option<Reference>,
        semantic_id: Option<Reference>,
    },
    File {
        id_short: Option<String>,
        value: Option<String>,
        content_type: Option<String>,
        semantic_id: Option<Reference>,
    },
    Blob {
        id_short: Option<String>,
        /// Base64-encoded payload, per the AAS JSON serialization.
        value: Option<String>,
        content_type: Option<String>,
        semantic_id: Option<Reference>,
    },
    #[serde(other)]
    Unknown,
}

impl SubmodelElement {
    pub fn id_short(&self) -> Option<&str> {
        match self {
            SubmodelElement::Property { id_short, .. }
            | SubmodelElement::MultiLanguageProperty { id_short, .. }
            | SubmodelElement::Range { id_short, .. }
            | SubmodelElement::Collection { id_short, .. }
            | SubmodelElement::List { id_short, .. }
            | SubmodelElement::Entity { id_short, .. }
            | SubmodelElement::ReferenceElement { id_short, .. }
            | SubmodelElement::RelationshipElement { id_short, .. }
            | SubmodelElement::File { id_short, .. }
            | SubmodelElement::Blob { id_short, .. } => id_short.as_deref(),
            SubmodelElement::Unknown => None,
        }
    }

    /// Unit qualifier, when the element carries one.
    pub fn unit(&self) -> Option<&str> {
        let qualifiers = match self {
            SubmodelElement::Property { qualifiers, .. }
            | SubmodelElement::Range { qualifiers, .. } => qualifiers,
            _ => return None,
        };
        qualifiers
            .iter()
            .find(|q| q.qualifier_type.eq_ignore_ascii_case("unit"))
            .and_then(|q| q.value.as_deref())
    }
}
