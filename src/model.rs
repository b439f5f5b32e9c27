//! # Data Model
//!
//! Typed records for the knowledge base collections: effects, the evidence that
//! supports them, and the variant clusters that reference them. Sets are kept in
//! `BTreeSet`s so that merged payloads have a stable, normalized ordering.

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

/// Opaque identifier of an effect record.
///
/// Stored documents may carry ids as JSON strings or integers; both decode to
/// the string form. Ids made only of digits compare by numeric value and sort
/// before all other ids, which compare lexicographically. So `"9" < "10"` and
/// `"10" < "E1"`. The minimum id of a duplicate group becomes the canonical one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct EffectId(pub String);

impl EffectId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EffectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EffectId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Identifier of a variant cluster. Decodes and orders like [`EffectId`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct VariantId(pub String);

impl VariantId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Id of the cluster derived from an external identifier, e.g. `pango:B.1.1.7`.
    pub fn for_identifier(namespace: &str, name: &str) -> Self {
        Self(format!("{}:{}", namespace, name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VariantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for VariantId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

macro_rules! document_id {
    ($name:ident) => {
        impl Ord for $name {
            fn cmp(&self, other: &Self) -> Ordering {
                compare_ids(&self.0, &other.0)
            }
        }

        impl PartialOrd for $name {
            fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
                Some(self.cmp(other))
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                deserializer.deserialize_any(IdVisitor).map(Self)
            }
        }
    };
}

document_id!(EffectId);
document_id!(VariantId);

/// Digits of a numeric id without leading zeros
fn numeric(id: &str) -> Option<&str> {
    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let trimmed = id.trim_start_matches('0');
    Some(if trimmed.is_empty() { "0" } else { trimmed })
}

fn compare_ids(left: &str, right: &str) -> Ordering {
    match (numeric(left), numeric(right)) {
        (Some(a), Some(b)) => a
            .len()
            .cmp(&b.len())
            .then_with(|| a.cmp(b))
            .then_with(|| left.cmp(right)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => left.cmp(right),
    }
}

struct IdVisitor;

impl Visitor<'_> for IdVisitor {
    type Value = String;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a string or integer id")
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<String, E> {
        Ok(value.to_string())
    }

    fn visit_string<E: de::Error>(self, value: String) -> Result<String, E> {
        Ok(value)
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<String, E> {
        Ok(value.to_string())
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<String, E> {
        if value < 0 {
            return Err(E::invalid_value(de::Unexpected::Signed(value), &self));
        }
        Ok(value.to_string())
    }
}

/// Identity key of an effect: records agreeing on every field are the same effect.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EffectKey {
    pub kind: Option<String>,
    pub level: Option<String>,
    pub method: Option<String>,
    pub aa_changes: Vec<String>,
}

/// A functional consequence of one or more amino-acid changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Effect {
    #[serde(alias = "_id")]
    pub id: EffectId,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(alias = "lv", default)]
    pub level: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub aa_changes: Vec<String>,
    /// Ids of duplicates folded into this record. Only populated between
    /// canonicalization and finalization.
    #[serde(
        default,
        alias = "effects_to_eliminate",
        skip_serializing_if = "BTreeSet::is_empty"
    )]
    pub eliminated_ids: BTreeSet<EffectId>,
}

impl Effect {
    /// Create a new effect without any eliminated duplicates
    pub fn new(
        id: impl Into<String>,
        kind: Option<&str>,
        level: Option<&str>,
        method: Option<&str>,
        aa_changes: Vec<String>,
    ) -> Self {
        Self {
            id: EffectId::new(id),
            kind: kind.map(str::to_string),
            level: level.map(str::to_string),
            method: method.map(str::to_string),
            aa_changes,
            eliminated_ids: BTreeSet::new(),
        }
    }

    /// The identity key this record is grouped by
    pub fn identity_key(&self) -> EffectKey {
        EffectKey {
            kind: self.kind.clone(),
            level: self.level.clone(),
            method: self.method.clone(),
            aa_changes: self.aa_changes.clone(),
        }
    }

    /// Lower-cases the descriptive fields and replaces underscores with spaces,
    /// the same way ingestion uniforms effect descriptors.
    pub fn normalized(mut self) -> Self {
        let uniform = |value: Option<String>| value.map(|v| v.to_lowercase().replace('_', " "));
        self.kind = uniform(self.kind);
        self.level = uniform(self.level);
        self.method = uniform(self.method);
        self
    }
}

/// Natural key of an evidence record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EvidenceKey {
    pub citation: Option<String>,
    pub kind: Option<String>,
    pub uri: Option<String>,
    pub publisher: Option<String>,
}

impl EvidenceKey {
    /// Encode the key as a collision-free string (length-prefixed parts).
    pub fn encode(&self) -> String {
        [&self.citation, &self.kind, &self.uri, &self.publisher]
            .iter()
            .map(|part| match part {
                Some(value) => format!("{}:{}", value.len(), value),
                None => "~".to_string(),
            })
            .collect::<Vec<_>>()
            .join("|")
    }
}

/// A citation supporting one or more effects
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    /// Storage id. Repeated ingestion gives duplicates distinct ids, so the
    /// natural key alone cannot address a record before reconciliation.
    #[serde(default, alias = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub citation: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub publisher: Option<String>,
    #[serde(default)]
    pub effect_ids: BTreeSet<EffectId>,
}

impl Evidence {
    pub fn new(
        citation: Option<&str>,
        kind: Option<&str>,
        uri: Option<&str>,
        publisher: Option<&str>,
        effect_ids: impl IntoIterator<Item = EffectId>,
    ) -> Self {
        Self {
            id: None,
            citation: citation.map(str::to_string),
            kind: kind.map(str::to_string),
            uri: uri.map(str::to_string),
            publisher: publisher.map(str::to_string),
            effect_ids: effect_ids.into_iter().collect(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn key(&self) -> EvidenceKey {
        EvidenceKey {
            citation: self.citation.clone(),
            kind: self.kind.clone(),
            uri: self.uri.clone(),
            publisher: self.publisher.clone(),
        }
    }

    /// Lower-cases citation, type and publisher. The uri is left as is.
    pub fn normalized(mut self) -> Self {
        self.citation = self.citation.map(|v| v.to_lowercase());
        self.kind = self.kind.map(|v| v.to_lowercase());
        self.publisher = self.publisher.map(|v| v.to_lowercase());
        self
    }
}

/// A name given to a variant by some organization or nomenclature
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Alias {
    pub org: String,
    pub name: String,
    #[serde(default, rename = "v_class")]
    pub variant_class: Option<String>,
}

impl Alias {
    pub fn new(org: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            org: org.into(),
            name: name.into(),
            variant_class: None,
        }
    }

    pub fn with_class(mut self, variant_class: impl Into<String>) -> Self {
        self.variant_class = Some(variant_class.into());
        self
    }

    /// Whether this alias belongs to the given namespace (case-insensitive).
    pub fn in_namespace(&self, namespace: &str) -> bool {
        self.org.eq_ignore_ascii_case(namespace)
    }
}

/// A set of changes attributed to a variant by one organization
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Characterization {
    pub org: String,
    pub changes: Vec<String>,
}

impl Characterization {
    pub fn new(org: impl Into<String>, changes: Vec<String>) -> Self {
        Self {
            org: org.into(),
            changes,
        }
    }
}

/// A variant cluster grouping one or more lineages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    #[serde(alias = "_id")]
    pub id: VariantId,
    #[serde(default)]
    pub aliases: BTreeSet<Alias>,
    #[serde(default, alias = "org_2_aa_changes")]
    pub aa_change_groups: BTreeSet<Characterization>,
    #[serde(default, alias = "org_2_nuc_changes")]
    pub nuc_change_groups: BTreeSet<Characterization>,
    #[serde(default, alias = "effects")]
    pub effect_ids: BTreeSet<EffectId>,
}

impl Variant {
    /// Create an empty variant cluster
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: VariantId::new(id),
            aliases: BTreeSet::new(),
            aa_change_groups: BTreeSet::new(),
            nuc_change_groups: BTreeSet::new(),
            effect_ids: BTreeSet::new(),
        }
    }

    pub fn with_alias(mut self, alias: Alias) -> Self {
        self.aliases.insert(alias);
        self
    }

    pub fn with_aa_changes(mut self, group: Characterization) -> Self {
        self.aa_change_groups.insert(group);
        self
    }

    pub fn with_nuc_changes(mut self, group: Characterization) -> Self {
        self.nuc_change_groups.insert(group);
        self
    }

    pub fn with_effect(mut self, effect_id: impl Into<String>) -> Self {
        self.effect_ids.insert(EffectId::new(effect_id));
        self
    }

    /// Names this variant carries under the given namespace
    pub fn identifiers<'a>(&'a self, namespace: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.aliases
            .iter()
            .filter(move |alias| alias.in_namespace(namespace))
            .map(|alias| alias.name.as_str())
    }

    pub fn has_identifier(&self, namespace: &str) -> bool {
        self.identifiers(namespace).next().is_some()
    }

    /// Union every array attribute of `other` into this cluster. The id is kept.
    pub fn absorb(&mut self, other: &Variant) {
        self.aliases.extend(other.aliases.iter().cloned());
        self.aa_change_groups
            .extend(other.aa_change_groups.iter().cloned());
        self.nuc_change_groups
            .extend(other.nuc_change_groups.iter().cloned());
        self.effect_ids.extend(other.effect_ids.iter().cloned());
    }
}

/// An amino-acid change descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AaChange {
    #[serde(alias = "_id")]
    pub id: String,
    pub change_id: String,
    #[serde(default)]
    pub protein: Option<String>,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub pos: Option<i64>,
    #[serde(default)]
    pub alt: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub length: Option<i64>,
    #[serde(default)]
    pub is_optional: Option<bool>,
}

impl AaChange {
    pub fn new(id: impl Into<String>, change_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            change_id: change_id.into(),
            protein: None,
            reference: None,
            pos: None,
            alt: None,
            kind: None,
            length: None,
            is_optional: None,
        }
    }
}

/// Protein described by a structure annotation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProteinCharacterization {
    pub protein_name: String,
    #[serde(default)]
    pub aa_length: Option<i64>,
    #[serde(default)]
    pub aa_sequence: Option<String>,
}

/// A structural annotation of the reference genome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Structure {
    #[serde(alias = "_id")]
    pub id: String,
    pub annotation_id: String,
    #[serde(default)]
    pub start_on_ref: Option<i64>,
    #[serde(default)]
    pub stop_on_ref: Option<i64>,
    #[serde(default)]
    pub protein_characterization: Vec<ProteinCharacterization>,
}

impl Structure {
    pub fn new(id: impl Into<String>, annotation_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            annotation_id: annotation_id.into(),
            start_on_ref: None,
            stop_on_ref: None,
            protein_characterization: Vec::new(),
        }
    }

    pub fn with_protein(mut self, protein_name: impl Into<String>) -> Self {
        self.protein_characterization.push(ProteinCharacterization {
            protein_name: protein_name.into(),
            aa_length: None,
            aa_sequence: None,
        });
        self
    }
}

/// A region of a protein with a described function or domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProteinRegion {
    #[serde(alias = "_id")]
    pub id: String,
    pub protein_name: String,
    #[serde(default)]
    pub start_on_prot: Option<i64>,
    #[serde(default)]
    pub stop_on_prot: Option<i64>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

impl ProteinRegion {
    pub fn new(id: impl Into<String>, protein_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            protein_name: protein_name.into(),
            start_on_prot: None,
            stop_on_prot: None,
            description: None,
            kind: None,
            category: None,
        }
    }
}
