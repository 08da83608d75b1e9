use base64::Engine as _;
use tracing::warn;
use unsbridge_domain::aas::{
    AasEnvironment, LangString, Reference, Submodel, SubmodelElement,
};
use unsbridge_domain::{AssetUri, LeafKind, LeafRecord, LeafValue};
use xxhash_rust::xxh3::xxh3_64;

use crate::error::ElementError;

/// Output of one traversal pass: records in emission order plus the
/// per-element errors encountered along the way.
#[derive(Debug, Default)]
pub struct Flattened {
    pub records: Vec<LeafRecord>,
    pub errors: Vec<ElementError>,
}

/// Flatten every submodel of an environment.
///
/// The containing asset is the first shell's `globalAssetId`, falling back
/// to the shell id, then to the origin URI for shell-less documents.
pub fn flatten_environment(
    env: &AasEnvironment,
    origin_uri: &str,
    timestamp_ms: i64,
) -> Flattened {
    let asset_uri = env
        .asset_administration_shells
        .first()
        .map(|shell| {
            shell
                .asset_information
                .as_ref()
                .and_then(|info| info.global_asset_id.clone())
                .unwrap_or_else(|| shell.id.clone())
        })
        .unwrap_or_else(|| origin_uri.to_string());
    let asset_uri = AssetUri::new(asset_uri);

    let mut out = Flattened::default();
    for submodel in &env.submodels {
        flatten_submodel(submodel, &asset_uri, origin_uri, timestamp_ms, &mut out);
    }
    out
}

/// Flatten one submodel into `out`, appending records and errors.
pub fn flatten_submodel(
    submodel: &Submodel,
    asset_uri: &AssetUri,
    origin_uri: &str,
    timestamp_ms: i64,
    out: &mut Flattened,
) {
    let id_short = submodel
        .id_short
        .clone()
        .unwrap_or_else(|| tail_of(&submodel.id));
    let mut cx = Context {
        asset_uri,
        submodel_id: &submodel.id,
        submodel_id_short: &id_short,
        origin_uri,
        timestamp_ms,
        out,
    };
    for (index, element) in submodel.submodel_elements.iter().enumerate() {
        walk(element, &[], index, &mut cx);
    }
}

struct Context<'a> {
    asset_uri: &'a AssetUri,
    submodel_id: &'a str,
    submodel_id_short: &'a str,
    origin_uri: &'a str,
    timestamp_ms: i64,
    out: &'a mut Flattened,
}

impl Context<'_> {
    fn emit(
        &mut self,
        path: Vec<String>,
        kind: LeafKind,
        value: LeafValue,
        value_type: String,
        semantic_id: Option<&Reference>,
        unit: Option<&str>,
    ) {
        self.out.records.push(LeafRecord {
            asset_uri: self.asset_uri.clone(),
            submodel_id: self.submodel_id.to_string(),
            submodel_id_short: self.submodel_id_short.to_string(),
            path,
            kind,
            value,
            value_type,
            semantic_id: semantic_id
                .and_then(|r| r.as_identifier())
                .map(String::from),
            unit: unit.map(String::from),
            source_timestamp_ms: self.timestamp_ms,
            origin_uri: self.origin_uri.to_string(),
        });
    }

    fn error(&mut self, path: Vec<String>, reason: impl Into<String>) {
        let err = ElementError {
            asset_uri: self.asset_uri.clone(),
            submodel_id: self.submodel_id.to_string(),
            path,
            reason: reason.into(),
        };
        warn!(%err, "skipping malformed element");
        self.out.errors.push(err);
    }
}

/// Segment for an element: its idShort, or the positional index when the
/// source left it out.
fn segment(element: &SubmodelElement, index: usize) -> String {
    element
        .id_short()
        .map(String::from)
        .unwrap_or_else(|| index.to_string())
}

fn tail_of(id: &str) -> String {
    id.trim_end_matches('/')
        .rsplit(['/', ':'])
        .next()
        .unwrap_or(id)
        .to_string()
}

fn extend(path: &[String], segment: String) -> Vec<String> {
    let mut next = path.to_vec();
    next.push(segment);
    next
}

fn walk(element: &SubmodelElement, path: &[String], index: usize, cx: &mut Context<'_>) {
    let here = extend(path, segment(element, index));
    match element {
        SubmodelElement::Property {
            value_type,
            value,
            semantic_id,
            ..
        } => {
            let vt = value_type.clone().unwrap_or_else(|| "xs:string".into());
            match parse_value(value.as_deref(), &vt) {
                Ok(parsed) => cx.emit(
                    here,
                    LeafKind::Property,
                    parsed,
                    vt,
                    semantic_id.as_ref(),
                    element.unit(),
                ),
                Err(reason) => cx.error(here, reason),
            }
        }
        SubmodelElement::MultiLanguageProperty {
            value, semantic_id, ..
        } => {
            // Single-value rendering: the `en` string, else the first one.
            let text = pick_language(value);
            cx.emit(
                here,
                LeafKind::Property,
                text.map(LeafValue::Text).unwrap_or(LeafValue::Null),
                "xs:string".into(),
                semantic_id.as_ref(),
                None,
            );
        }
        SubmodelElement::Range {
            value_type,
            min,
            max,
            semantic_id,
            ..
        } => {
            let vt = value_type.clone().unwrap_or_else(|| "xs:double".into());
            let unit = element.unit();
            match (min.as_deref(), max.as_deref()) {
                (Some(lo), Some(hi)) => {
                    match (parse_value(Some(lo), &vt), parse_value(Some(hi), &vt)) {
                        (Ok(lo), Ok(hi)) => {
                            cx.emit(
                                extend(&here, "min".into()),
                                LeafKind::Range,
                                lo,
                                vt.clone(),
                                semantic_id.as_ref(),
                                unit,
                            );
                            cx.emit(
                                extend(&here, "max".into()),
                                LeafKind::Range,
                                hi,
                                vt,
                                semantic_id.as_ref(),
                                unit,
                            );
                        }
                        _ => cx.error(here, format!("range bounds do not parse as {}", vt)),
                    }
                }
                (Some(single), None) | (None, Some(single)) => {
                    match parse_value(Some(single), &vt) {
                        Ok(v) => cx.emit(here, LeafKind::Range, v, vt, semantic_id.as_ref(), unit),
                        Err(reason) => cx.error(here, reason),
                    }
                }
                (None, None) => cx.error(here, "range carries neither bound"),
            }
        }
        SubmodelElement::Collection { value, .. } | SubmodelElement::List { value, .. } => {
            for (i, child) in value.iter().enumerate() {
                walk(child, &here, i, cx);
            }
        }
        SubmodelElement::Entity {
            global_asset_id,
            statements,
            semantic_id,
            ..
        } => {
            if let Some(global) = global_asset_id {
                cx.emit(
                    here.clone(),
                    LeafKind::Entity,
                    LeafValue::Text(global.clone()),
                    "xs:anyURI".into(),
                    semantic_id.as_ref(),
                    None,
                );
            }
            for (i, statement) in statements.iter().enumerate() {
                walk(statement, &here, i, cx);
            }
        }
        SubmodelElement::ReferenceElement {
            value, semantic_id, ..
        } => match value {
            Some(reference) => cx.emit(
                here,
                LeafKind::ReferenceElement,
                LeafValue::Text(reference.render()),
                "xs:string".into(),
                semantic_id.as_ref(),
                None,
            ),
            None => cx.error(here, "reference element carries no reference"),
        },
        SubmodelElement::RelationshipElement {
            first,
            second,
            semantic_id,
            ..
        } => match (first, second) {
            (Some(a), Some(b)) => cx.emit(
                here,
                LeafKind::Relationship,
                LeafValue::Text(format!("{} -> {}", a.render(), b.render())),
                "xs:string".into(),
                semantic_id.as_ref(),
                None,
            ),
            _ => cx.error(here, "relationship is missing an endpoint"),
        },
        SubmodelElement::File {
            value,
            content_type,
            semantic_id,
            ..
        } => cx.emit(
            here,
            LeafKind::File,
            value
                .clone()
                .map(LeafValue::Text)
                .unwrap_or(LeafValue::Null),
            content_type.clone().unwrap_or_else(|| "xs:string".into()),
            semantic_id.as_ref(),
            None,
        ),
        SubmodelElement::Blob {
            value,
            content_type,
            semantic_id,
            ..
        } => {
            // Raw bytes are not forwarded; the record carries a content hash.
            let encoded = match value {
                Some(v) => v,
                None => {
                    cx.error(here, "blob carries no payload");
                    return;
                }
            };
            match base64::engine::general_purpose::STANDARD.decode(encoded) {
                Ok(bytes) => {
                    let digest = format!("{:016x}", xxh3_64(&bytes));
                    cx.emit(
                        here,
                        LeafKind::Blob,
                        LeafValue::Text(digest),
                        content_type
                            .clone()
                            .unwrap_or_else(|| "application/octet-stream".into()),
                        semantic_id.as_ref(),
                        None,
                    );
                }
                Err(_) => cx.error(here, "blob payload is not valid base64"),
            }
        }
        SubmodelElement::Unknown => cx.error(here, "unrecognized element model type"),
    }
}

fn pick_language(strings: &[LangString]) -> Option<String> {
    strings
        .iter()
        .find(|s| s.language.eq_ignore_ascii_case("en"))
        .or_else(|| strings.first())
        .map(|s| s.text.clone())
}

/// Parse a textual AAS value into the typed union. Absent values are Null
/// regardless of declared type.
fn parse_value(raw: Option<&str>, value_type: &str) -> Result<LeafValue, String> {
    let raw = match raw {
        Some(r) => r,
        None => return Ok(LeafValue::Null),
    };
    match value_type.trim_start_matches("xs:") {
        "boolean" => match raw {
            "true" | "1" => Ok(LeafValue::Bool(true)),
            "false" | "0" => Ok(LeafValue::Bool(false)),
            _ => Err(format!("'{}' is not a boolean", raw)),
        },
        "byte" | "short" | "int" | "integer" | "long" | "unsignedByte" | "unsignedShort"
        | "unsignedInt" | "unsignedLong" => raw
            .trim()
            .parse::<i64>()
            .map(LeafValue::Int)
            .map_err(|_| format!("'{}' is not an integer", raw)),
        "float" | "double" | "decimal" => raw
            .trim()
            .parse::<f64>()
            .map(LeafValue::Float)
            .map_err(|_| format!("'{}' is not a number", raw)),
        _ => Ok(LeafValue::Text(raw.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use unsbridge_domain::aas::AasEnvironment;

    fn env(doc: &str) -> AasEnvironment {
        serde_json::from_str(doc).unwrap()
    }

    const PRESS: &str = r#"{
        "assetAdministrationShells": [{
            "id": "urn:shell:press",
            "assetInformation": { "globalAssetId": "urn:acme:press-01" }
        }],
        "submodels": [{
            "id": "urn:sm:tech",
            "idShort": "TechData",
            "submodelElements": [
                { "modelType": "Property", "idShort": "Serial",
                  "valueType": "xs:string", "value": "AB123456" },
                { "modelType": "SubmodelElementCollection", "idShort": "Motor", "value": [
                    { "modelType": "Property", "idShort": "Temp",
                      "valueType": "xs:double", "value": "25.5",
                      "qualifiers": [{ "type": "Unit", "value": "degC" }] }
                ]},
                { "modelType": "Range", "idShort": "OpTemp",
                  "valueType": "xs:double", "min": "-10", "max": "60" }
            ]
        }]
    }"#;

    #[test]
    fn flattening_is_depth_first_and_ordered() {
        let flat = flatten_environment(&env(PRESS), "file:///press.json", 1000);
        assert!(flat.errors.is_empty());
        let names: Vec<String> = flat.records.iter().map(|r| r.metric_name()).collect();
        assert_eq!(
            names,
            vec![
                "TechData/Serial",
                "TechData/Motor/Temp",
                "TechData/OpTemp/min",
                "TechData/OpTemp/max",
            ]
        );
        assert_eq!(flat.records[0].asset_uri.as_str(), "urn:acme:press-01");
        assert_eq!(flat.records[1].unit.as_deref(), Some("degC"));
        assert_eq!(flat.records[1].value, LeafValue::Float(25.5));
        assert_eq!(flat.records[2].kind, LeafKind::Range);
    }

    #[test]
    fn flattening_is_deterministic() {
        let a = flatten_environment(&env(PRESS), "file:///press.json", 1000);
        let b = flatten_environment(&env(PRESS), "file:///press.json", 1000);
        assert_eq!(a.records, b.records);
    }

    #[test]
    fn malformed_element_skips_but_siblings_survive() {
        let doc = r#"{
            "submodels": [{
                "id": "urn:sm:x",
                "idShort": "SM",
                "submodelElements": [
                    { "modelType": "Property", "idShort": "Bad",
                      "valueType": "xs:int", "value": "not-a-number" },
                    { "modelType": "Property", "idShort": "Good",
                      "valueType": "xs:int", "value": "42" }
                ]
            }]
        }"#;
        let flat = flatten_environment(&env(doc), "file:///x.json", 0);
        assert_eq!(flat.errors.len(), 1);
        assert_eq!(flat.errors[0].path, vec!["Bad".to_string()]);
        assert_eq!(flat.records.len(), 1);
        assert_eq!(flat.records[0].value, LeafValue::Int(42));
    }

    #[test]
    fn missing_id_short_uses_positional_index() {
        let doc = r#"{
            "submodels": [{
                "id": "urn:sm:x",
                "idShort": "SM",
                "submodelElements": [
                    { "modelType": "SubmodelElementList", "idShort": "Readings", "value": [
                        { "modelType": "Property", "valueType": "xs:int", "value": "1" },
                        { "modelType": "Property", "valueType": "xs:int", "value": "2" }
                    ]}
                ]
            }]
        }"#;
        let flat = flatten_environment(&env(doc), "file:///x.json", 0);
        let names: Vec<String> = flat.records.iter().map(|r| r.metric_name()).collect();
        assert_eq!(names, vec!["SM/Readings/0", "SM/Readings/1"]);
    }

    #[test]
    fn entity_emits_global_asset_id_and_statements() {
        let doc = r#"{
            "submodels": [{
                "id": "urn:sm:x",
                "idShort": "SM",
                "submodelElements": [
                    { "modelType": "Entity", "idShort": "Drive",
                      "entityType": "SelfManagedEntity",
                      "globalAssetId": "urn:acme:drive-7",
                      "statements": [
                        { "modelType": "Property", "idShort": "Rpm",
                          "valueType": "xs:int", "value": "1480" }
                      ]}
                ]
            }]
        }"#;
        let flat = flatten_environment(&env(doc), "file:///x.json", 0);
        assert_eq!(flat.records.len(), 2);
        assert_eq!(flat.records[0].kind, LeafKind::Entity);
        assert_eq!(
            flat.records[0].value,
            LeafValue::Text("urn:acme:drive-7".into())
        );
        assert_eq!(flat.records[1].metric_name(), "SM/Drive/Rpm");
    }

    #[test]
    fn blob_is_hashed_not_forwarded() {
        // "aGVsbG8=" is base64 for "hello".
        let doc = r#"{
            "submodels": [{
                "id": "urn:sm:x",
                "idShort": "SM",
                "submodelElements": [
                    { "modelType": "Blob", "idShort": "Manual",
                      "contentType": "application/pdf", "value": "aGVsbG8=" }
                ]
            }]
        }"#;
        let flat = flatten_environment(&env(doc), "file:///x.json", 0);
        assert_eq!(flat.records.len(), 1);
        let rec = &flat.records[0];
        assert_eq!(rec.kind, LeafKind::Blob);
        assert_eq!(rec.value_type, "application/pdf");
        match &rec.value {
            LeafValue::Text(hex) => assert_eq!(hex.len(), 16),
            other => panic!("expected hash text, got {:?}", other),
        }
    }

    #[test]
    fn reference_and_relationship_render_as_text() {
        let doc = r#"{
            "submodels": [{
                "id": "urn:sm:x",
                "idShort": "SM",
                "submodelElements": [
                    { "modelType": "ReferenceElement", "idShort": "SeeAlso",
                      "value": { "keys": [{ "type": "GlobalReference", "value": "urn:doc:1" }] } },
                    { "modelType": "RelationshipElement", "idShort": "FeededBy",
                      "first": { "keys": [{ "value": "urn:a" }] },
                      "second": { "keys": [{ "value": "urn:b" }] } }
                ]
            }]
        }"#;
        let flat = flatten_environment(&env(doc), "file:///x.json", 0);
        assert_eq!(flat.records[0].value, LeafValue::Text("urn:doc:1".into()));
        assert_eq!(
            flat.records[1].value,
            LeafValue::Text("urn:a -> urn:b".into())
        );
    }
}
