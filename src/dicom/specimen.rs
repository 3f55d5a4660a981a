//! Specimen module: the slide container and the samples placed on it.
//!
//! Sample preparation is recorded as a single staining step. Its content
//! items name the sample, the processing type and every stain, plus the
//! fixative and embedding medium when known. Substance names are matched
//! case-insensitively against the coded concepts below.

use dicom_core::{DataElement, Length, PrimitiveValue, Tag, VR};
use dicom_core::value::DataSetSequence;
use dicom::dictionary_std::tags;
use dicom_object::InMemDicomObject;
use serde::{Deserialize, Serialize};

use crate::error::{DicomizeError, Result};

use super::uid::UidGenerator;

/// A coded concept: Code Value, Coding Scheme Designator and Code Meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Code {
    /// Code Value.
    pub value: &'static str,
    /// Coding Scheme Designator.
    pub scheme: &'static str,
    /// Code Meaning.
    pub meaning: &'static str,
}

impl Code {
    const fn sct(value: &'static str, meaning: &'static str) -> Self {
        Self {
            value,
            scheme: "SCT",
            meaning,
        }
    }

    const fn dcm(value: &'static str, meaning: &'static str) -> Self {
        Self {
            value,
            scheme: "DCM",
            meaning,
        }
    }

    /// Code item for a code sequence.
    pub fn item(&self) -> InMemDicomObject {
        InMemDicomObject::from_element_iter([
            element(tags::CODE_VALUE, VR::SH, self.value),
            element(tags::CODING_SCHEME_DESIGNATOR, VR::SH, self.scheme),
            element(tags::CODE_MEANING, VR::LO, self.meaning),
        ])
    }
}

/// Embedding media (CID 8115).
pub const EMBEDDING_MEDIA: &[Code] = &[
    Code::sct("311731000", "Paraffin wax"),
    Code::sct("433469005", "Tissue freezing medium"),
];

/// Tissue fixatives (CID 8114).
pub const FIXATIVES: &[Code] = &[
    Code::sct("431510009", "Formalin"),
    Code::sct("434162003", "Neutral Buffered Formalin"),
];

/// Tissue stains (CID 8112).
pub const STAINS: &[Code] = &[
    Code::sct("12710003", "hematoxylin stain"),
    Code::sct("36879007", "water soluble eosin stain"),
];

const SPECIMEN_IDENTIFIER: Code = Code::dcm("121041", "Specimen Identifier");
const PROCESSING_TYPE: Code = Code::dcm("111701", "Processing type");
const STAINING: Code = Code::sct("127790008", "Staining");
const USING_SUBSTANCE: Code = Code::sct("424361007", "Using substance");
const TISSUE_FIXATIVE: Code = Code::sct("430864009", "Tissue Fixative");
const EMBEDDING_MEDIUM: Code = Code::sct("430863003", "Embedding medium");

pub(crate) const SLIDE: Code = Code::sct("258661006", "Slide");
pub(crate) const COVERSLIP: Code = Code::sct("433472003", "Microscope slide coverslip");

fn lookup(table: &[Code], kind: &str, name: &str) -> Result<Code> {
    table
        .iter()
        .find(|code| code.meaning.eq_ignore_ascii_case(name.trim()))
        .copied()
        .ok_or_else(|| {
            let known: Vec<&str> = table.iter().map(|code| code.meaning).collect();
            DicomizeError::Config(format!(
                "unknown {} \"{}\" (expected one of: {})",
                kind,
                name,
                known.join(", ")
            ))
        })
}

pub(crate) fn element(tag: Tag, vr: VR, value: impl Into<PrimitiveValue>) -> DataElement<InMemDicomObject> {
    DataElement::new(tag, vr, value.into())
}

pub(crate) fn sequence(tag: Tag, items: Vec<InMemDicomObject>) -> DataElement<InMemDicomObject> {
    DataElement::new(tag, VR::SQ, DataSetSequence::new(items, Length::UNDEFINED))
}

/// One sample on the slide and how it was prepared.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SampleInfo {
    /// Specimen Identifier.
    pub id: String,
    /// Embedding medium name, e.g. "Paraffin wax".
    pub embedding_medium: Option<String>,
    /// Fixative name, e.g. "Formalin".
    pub fixative: Option<String>,
    /// Stain names, e.g. "hematoxylin stain".
    pub stainings: Vec<String>,
}

impl SampleInfo {
    /// Sample with an identifier and no preparation details.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Resolve substance names to codes.
    pub fn prepare(&self) -> Result<PreparedSample> {
        if self.id.trim().is_empty() {
            return Err(DicomizeError::Config("sample identifier is empty".into()));
        }
        let embedding_medium = self
            .embedding_medium
            .as_deref()
            .map(|name| lookup(EMBEDDING_MEDIA, "embedding medium", name))
            .transpose()?;
        let fixative = self
            .fixative
            .as_deref()
            .map(|name| lookup(FIXATIVES, "fixative", name))
            .transpose()?;
        let stains = self
            .stainings
            .iter()
            .map(|name| lookup(STAINS, "stain", name))
            .collect::<Result<Vec<_>>>()?;

        if stains.is_empty() && (embedding_medium.is_some() || fixative.is_some()) {
            log::warn!(
                "Sample {} has no stainings; fixative and embedding medium are not recorded",
                self.id
            );
        }

        Ok(PreparedSample {
            id: self.id.clone(),
            embedding_medium,
            fixative,
            stains,
        })
    }
}

/// Slide container and its samples.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpecimenInfo {
    /// Container Identifier of the slide.
    pub slide_id: String,
    /// Samples on the slide; at least one.
    pub samples: Vec<SampleInfo>,
}

impl Default for SpecimenInfo {
    fn default() -> Self {
        Self {
            slide_id: "slide".into(),
            samples: vec![SampleInfo::new("sample")],
        }
    }
}

impl SpecimenInfo {
    /// Check identifiers and resolve every sample.
    pub fn prepare(&self) -> Result<Vec<PreparedSample>> {
        if self.slide_id.trim().is_empty() {
            return Err(DicomizeError::Config("slide identifier is empty".into()));
        }
        if self.samples.is_empty() {
            return Err(DicomizeError::Config("specimen has no samples".into()));
        }
        self.samples.iter().map(SampleInfo::prepare).collect()
    }
}

/// A sample whose substances have been resolved to codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedSample {
    id: String,
    embedding_medium: Option<Code>,
    fixative: Option<Code>,
    stains: Vec<Code>,
}

impl PreparedSample {
    pub(crate) fn bare(id: &str) -> Self {
        Self {
            id: id.to_string(),
            embedding_medium: None,
            fixative: None,
            stains: Vec::new(),
        }
    }

    /// Specimen Identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Specimen Description Sequence item with a fresh Specimen UID.
    pub fn description(&self, uids: &dyn UidGenerator) -> InMemDicomObject {
        InMemDicomObject::from_element_iter([
            element(tags::SPECIMEN_IDENTIFIER, VR::LO, self.id.as_str()),
            element(tags::SPECIMEN_UID, VR::UI, uids.generate()),
            sequence(tags::ISSUER_OF_THE_SPECIMEN_IDENTIFIER_SEQUENCE, vec![]),
            sequence(tags::SPECIMEN_PREPARATION_SEQUENCE, self.preparation_steps()),
        ])
    }

    /// Specimen Preparation Sequence items; empty without stainings.
    pub fn preparation_steps(&self) -> Vec<InMemDicomObject> {
        if self.stains.is_empty() {
            return Vec::new();
        }

        let mut items = vec![
            text_item(SPECIMEN_IDENTIFIER, &self.id),
            code_item(PROCESSING_TYPE, STAINING),
        ];
        items.extend(self.stains.iter().map(|stain| code_item(USING_SUBSTANCE, *stain)));
        if let Some(fixative) = self.fixative {
            items.push(code_item(TISSUE_FIXATIVE, fixative));
        }
        if let Some(medium) = self.embedding_medium {
            items.push(code_item(EMBEDDING_MEDIUM, medium));
        }

        vec![InMemDicomObject::from_element_iter([sequence(
            tags::SPECIMEN_PREPARATION_STEP_CONTENT_ITEM_SEQUENCE,
            items,
        )])]
    }
}

fn text_item(name: Code, text: &str) -> InMemDicomObject {
    InMemDicomObject::from_element_iter([
        element(tags::VALUE_TYPE, VR::CS, "TEXT"),
        sequence(tags::CONCEPT_NAME_CODE_SEQUENCE, vec![name.item()]),
        element(tags::TEXT_VALUE, VR::UT, text),
    ])
}

fn code_item(name: Code, value: Code) -> InMemDicomObject {
    InMemDicomObject::from_element_iter([
        element(tags::VALUE_TYPE, VR::CS, "CODE"),
        sequence(tags::CONCEPT_NAME_CODE_SEQUENCE, vec![name.item()]),
        sequence(tags::CONCEPT_CODE_SEQUENCE, vec![value.item()]),
    ])
}
