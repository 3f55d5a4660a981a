//! VL Whole Slide Microscopy datasets.
//!
//! Builds the attributes shared by every level of a converted slide once,
//! then derives one instance per pyramid level carrying that level's frames.

use std::path::{Path, PathBuf};

use dicom_core::value::PixelFragmentSequence;
use dicom_core::{DataElement, PrimitiveValue, VR};
use dicom::dictionary_std::tags;
use dicom_object::{FileDicomObject, FileMetaTableBuilder, InMemDicomObject};

use crate::error::{DicomizeError, Result};
use crate::pipeline::LevelOutput;

use super::specimen::{element, sequence, PreparedSample, SpecimenInfo, COVERSLIP, SLIDE};
use super::uid::{RandomUid, UidGenerator};

/// VL Whole Slide Microscopy Image Storage.
pub const VL_WSI_SOP_CLASS_UID: &str = "1.2.840.10008.5.1.4.1.1.77.1.6";

/// Kind of image an instance holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageFlavor {
    /// Pyramid level of the slide.
    #[default]
    Volume,
    /// Slide label.
    Label,
    /// Low-resolution overview.
    Overview,
}

impl ImageFlavor {
    /// Value used in Image Type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Volume => "VOLUME",
            Self::Label => "LABEL",
            Self::Overview => "OVERVIEW",
        }
    }
}

/// Image Type for an instance. Only the base volume level is not resampled.
pub fn image_type(flavor: ImageFlavor, level: usize) -> [&'static str; 4] {
    let resampled = if flavor == ImageFlavor::Volume && level == 0 {
        "NONE"
    } else {
        "RESAMPLED"
    };
    ["ORIGINAL", "PRIMARY", flavor.as_str(), resampled]
}

/// Equipment attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Manufacturer.
    pub manufacturer: Option<String>,
    /// Manufacturer's Model Name.
    pub model_name: Option<String>,
    /// Device Serial Number.
    pub serial_number: Option<String>,
    /// Software Versions.
    pub software_versions: Vec<String>,
}

fn strs(values: &[&str]) -> PrimitiveValue {
    PrimitiveValue::Strs(values.iter().map(|v| v.to_string()).collect())
}

fn code(value: &str, scheme: &str, meaning: &str) -> InMemDicomObject {
    InMemDicomObject::from_element_iter([
        element(tags::CODE_VALUE, VR::SH, value),
        element(tags::CODING_SCHEME_DESIGNATOR, VR::SH, scheme),
        element(tags::CODE_MEANING, VR::LO, meaning),
    ])
}

/// Builder for the attributes shared by all levels of one slide.
pub struct WsiDatasetBuilder {
    uids: Box<dyn UidGenerator>,
    flavor: ImageFlavor,
    device: Option<DeviceInfo>,
    slide_id: String,
    samples: Vec<PreparedSample>,
}

impl Default for WsiDatasetBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl WsiDatasetBuilder {
    /// Builder with random UIDs and a generic specimen.
    pub fn new() -> Self {
        Self {
            uids: Box::new(RandomUid),
            flavor: ImageFlavor::Volume,
            device: None,
            slide_id: "slide".into(),
            samples: vec![PreparedSample::bare("sample")],
        }
    }

    /// Use `uids` for every generated UID.
    pub fn uid_generator<G: UidGenerator + 'static>(mut self, uids: G) -> Self {
        self.uids = Box::new(uids);
        self
    }

    /// Image flavor written to Image Type.
    pub fn flavor(mut self, flavor: ImageFlavor) -> Self {
        self.flavor = flavor;
        self
    }

    /// Add the equipment module.
    pub fn device(mut self, device: DeviceInfo) -> Self {
        self.device = Some(device);
        self
    }

    /// Replace the generic specimen with a described slide.
    ///
    /// Fails on empty identifiers and unknown substance names.
    pub fn specimen(mut self, specimen: &SpecimenInfo) -> Result<Self> {
        self.samples = specimen.prepare()?;
        self.slide_id = specimen.slide_id.clone();
        Ok(self)
    }

    /// Generate the shared UIDs and attributes.
    pub fn build(self) -> WsiInstanceWriter {
        let mut base = self.wsi_module();
        if let Some(device) = &self.device {
            for elem in device_module(device) {
                base.put(elem);
            }
        }
        for elem in self.specimen_module() {
            base.put(elem);
        }
        base.put(optical_path_module());

        WsiInstanceWriter {
            base,
            uids: self.uids,
            flavor: self.flavor,
        }
    }

    fn wsi_module(&self) -> InMemDicomObject {
        let dimension_organization_uid = self.uids.generate();
        let organization = InMemDicomObject::from_element_iter([element(
            tags::DIMENSION_ORGANIZATION_UID,
            VR::UI,
            dimension_organization_uid.as_str(),
        )]);
        let index = InMemDicomObject::from_element_iter([
            element(
                tags::DIMENSION_ORGANIZATION_UID,
                VR::UI,
                dimension_organization_uid.as_str(),
            ),
            element(
                tags::DIMENSION_INDEX_POINTER,
                VR::AT,
                PrimitiveValue::Tags(std::iter::once(tags::PLANE_POSITION_SLIDE_SEQUENCE).collect()),
            ),
        ]);

        InMemDicomObject::from_element_iter([
            element(tags::STUDY_INSTANCE_UID, VR::UI, self.uids.generate()),
            element(tags::SERIES_INSTANCE_UID, VR::UI, self.uids.generate()),
            element(tags::FRAME_OF_REFERENCE_UID, VR::UI, self.uids.generate()),
            element(tags::MODALITY, VR::CS, "SM"),
            element(tags::SOP_CLASS_UID, VR::UI, VL_WSI_SOP_CLASS_UID),
            sequence(tags::DIMENSION_ORGANIZATION_SEQUENCE, vec![organization]),
            sequence(tags::DIMENSION_INDEX_SEQUENCE, vec![index]),
            element(tags::BURNED_IN_ANNOTATION, VR::CS, "NO"),
            element(tags::SPECIMEN_LABEL_IN_IMAGE, VR::CS, "NO"),
            element(tags::VOLUMETRIC_PROPERTIES, VR::CS, "VOLUME"),
        ])
    }

    fn specimen_module(&self) -> Vec<DataElement<InMemDicomObject>> {
        let component = InMemDicomObject::from_element_iter([
            element(tags::CONTAINER_COMPONENT_MATERIAL, VR::CS, "GLASS"),
            sequence(tags::CONTAINER_COMPONENT_TYPE_CODE_SEQUENCE, vec![COVERSLIP.item()]),
        ]);
        let descriptions = self
            .samples
            .iter()
            .map(|sample| sample.description(self.uids.as_ref()))
            .collect();

        vec![
            element(tags::CONTAINER_IDENTIFIER, VR::LO, self.slide_id.as_str()),
            sequence(tags::ISSUER_OF_THE_CONTAINER_IDENTIFIER_SEQUENCE, vec![]),
            sequence(tags::CONTAINER_TYPE_CODE_SEQUENCE, vec![SLIDE.item()]),
            sequence(tags::CONTAINER_COMPONENT_SEQUENCE, vec![component]),
            sequence(tags::SPECIMEN_DESCRIPTION_SEQUENCE, descriptions),
        ]
    }
}

fn device_module(device: &DeviceInfo) -> Vec<DataElement<InMemDicomObject>> {
    let mut elements = Vec::new();
    if let Some(manufacturer) = &device.manufacturer {
        elements.push(element(tags::MANUFACTURER, VR::LO, manufacturer.as_str()));
    }
    if let Some(model) = &device.model_name {
        elements.push(element(tags::MANUFACTURER_MODEL_NAME, VR::LO, model.as_str()));
    }
    if let Some(serial) = &device.serial_number {
        elements.push(element(tags::DEVICE_SERIAL_NUMBER, VR::LO, serial.as_str()));
    }
    if !device.software_versions.is_empty() {
        let versions: Vec<&str> = device.software_versions.iter().map(String::as_str).collect();
        elements.push(element(tags::SOFTWARE_VERSIONS, VR::LO, strs(&versions)));
    }
    elements
}

fn optical_path_module() -> DataElement<InMemDicomObject> {
    let path = InMemDicomObject::from_element_iter([
        element(tags::OPTICAL_PATH_IDENTIFIER, VR::SH, "0"),
        sequence(
            tags::ILLUMINATION_TYPE_CODE_SEQUENCE,
            vec![code("111744", "DCM", "Brightfield illumination")],
        ),
        sequence(
            tags::ILLUMINATION_COLOR_CODE_SEQUENCE,
            vec![code("R-102C0", "SRT", "Full Spectrum")],
        ),
    ]);
    sequence(tags::OPTICAL_PATH_SEQUENCE, vec![path])
}

/// Produces one instance per pyramid level from the shared attributes.
pub struct WsiInstanceWriter {
    base: InMemDicomObject,
    uids: Box<dyn UidGenerator>,
    flavor: ImageFlavor,
}

impl WsiInstanceWriter {
    /// Attributes shared by all instances.
    pub fn base(&self) -> &InMemDicomObject {
        &self.base
    }

    /// Build the instance for one converted level.
    pub fn instance(&self, output: LevelOutput) -> Result<FileDicomObject<InMemDicomObject>> {
        let grid = output.grid;
        let binding = output.binding;
        let bits = output.bits_allocated();
        let level = grid.index();
        let sop_instance_uid = self.uids.generate();
        let frames = output.stream.frame_count();

        let mut obj = self.base.clone();
        obj.put(element(tags::SOP_INSTANCE_UID, VR::UI, sop_instance_uid.as_str()));
        obj.put(element(tags::INSTANCE_NUMBER, VR::IS, (level + 1).to_string()));
        obj.put(element(tags::IMAGE_TYPE, VR::CS, strs(&image_type(self.flavor, level))));
        obj.put(element(tags::DIMENSION_ORGANIZATION_TYPE, VR::CS, "TILED_FULL"));
        obj.put(element(tags::TOTAL_PIXEL_MATRIX_COLUMNS, VR::UL, grid.level.width));
        obj.put(element(tags::TOTAL_PIXEL_MATRIX_ROWS, VR::UL, grid.level.height));
        obj.put(element(tags::NUMBER_OF_FRAMES, VR::IS, frames.to_string()));

        let rows = u16::try_from(grid.tile_height)
            .map_err(|_| DicomizeError::Dicom(format!("tile height {} exceeds Rows", grid.tile_height)))?;
        let columns = u16::try_from(grid.tile_width)
            .map_err(|_| DicomizeError::Dicom(format!("tile width {} exceeds Columns", grid.tile_width)))?;
        obj.put(element(tags::ROWS, VR::US, rows));
        obj.put(element(tags::COLUMNS, VR::US, columns));
        obj.put(element(tags::SAMPLES_PER_PIXEL, VR::US, 3_u16));
        obj.put(element(
            tags::PHOTOMETRIC_INTERPRETATION,
            VR::CS,
            binding.photometric_interpretation,
        ));
        obj.put(element(tags::PLANAR_CONFIGURATION, VR::US, 0_u16));
        obj.put(element(tags::BITS_ALLOCATED, VR::US, bits));
        obj.put(element(tags::BITS_STORED, VR::US, bits));
        obj.put(element(tags::HIGH_BIT, VR::US, bits - 1));
        obj.put(element(tags::PIXEL_REPRESENTATION, VR::US, 0_u16));

        if binding.lossy {
            obj.put(element(tags::LOSSY_IMAGE_COMPRESSION, VR::CS, "01"));
            let method = if binding.pixel_encoding == crate::pixel::PixelEncoding::YCbCr {
                "ISO_10918_1"
            } else {
                "ISO_15444_1"
            };
            obj.put(element(tags::LOSSY_IMAGE_COMPRESSION_METHOD, VR::CS, method));
        } else {
            obj.put(element(tags::LOSSY_IMAGE_COMPRESSION, VR::CS, "00"));
        }

        if binding.encapsulated {
            let (offsets, fragments) = output.stream.into_fragments();
            obj.put(DataElement::new(
                tags::PIXEL_DATA,
                VR::OB,
                PixelFragmentSequence::new(offsets, fragments),
            ));
        } else if bits > 8 {
            let data = output.stream.native_pixel_data();
            let words = data
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect();
            obj.put(element(tags::PIXEL_DATA, VR::OW, PrimitiveValue::U16(words)));
        } else {
            obj.put(element(tags::PIXEL_DATA, VR::OB, output.stream.native_pixel_data()));
        }

        log::debug!(
            "Built instance {} for level {} ({} frames, {})",
            sop_instance_uid,
            level,
            frames,
            binding.name
        );

        obj.with_meta(
            FileMetaTableBuilder::new()
                .transfer_syntax(binding.uid)
                .media_storage_sop_class_uid(VL_WSI_SOP_CLASS_UID)
                .media_storage_sop_instance_uid(sop_instance_uid),
        )
        .map_err(|e| DicomizeError::Dicom(e.to_string()))
    }

    /// Write the instance for `output` into `dir` as `level_<n>.dcm`.
    pub fn write_level<P: AsRef<Path>>(&self, output: LevelOutput, dir: P) -> Result<PathBuf> {
        let path = dir.as_ref().join(format!("level_{}.dcm", output.grid.index()));
        let file = self.instance(output)?;
        file.write_to_file(&path)?;
        log::info!("Wrote {}", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CodecChoice, ConversionConfig};
    use crate::dicom::uid::SequentialUid;
    use crate::dicom::SampleInfo;
    use crate::pipeline::ConversionPipeline;
    use crate::pixel::{BackgroundColor, PixelBuffer};
    use crate::source::ImagePyramidSource;
    use dicom_object::open_file;

    fn source() -> ImagePyramidSource {
        ImagePyramidSource::from_levels(
            vec![
                PixelBuffer::filled(64, 48, 3, 8, BackgroundColor::new(200, 120, 90)),
                PixelBuffer::filled(32, 24, 3, 8, BackgroundColor::new(200, 120, 90)),
            ],
            32,
            32,
        )
        .unwrap()
    }

    fn convert(codec: CodecChoice) -> Vec<LevelOutput> {
        let config = ConversionConfig {
            workers: Some(1),
            ..ConversionConfig::with_codec(codec)
        };
        ConversionPipeline::new(config).convert(&source()).unwrap()
    }

    fn writer() -> WsiInstanceWriter {
        WsiDatasetBuilder::new()
            .uid_generator(SequentialUid::new("1.2.826.0.1"))
            .device(DeviceInfo {
                manufacturer: Some("Scanner manufacturer".into()),
                software_versions: vec!["1.0".into()],
                ..Default::default()
            })
            .build()
    }

    #[test]
    fn test_image_type() {
        assert_eq!(
            image_type(ImageFlavor::Volume, 0),
            ["ORIGINAL", "PRIMARY", "VOLUME", "NONE"]
        );
        assert_eq!(image_type(ImageFlavor::Volume, 2)[3], "RESAMPLED");
        assert_eq!(image_type(ImageFlavor::Label, 0)[3], "RESAMPLED");
    }

    #[test]
    fn test_base_dataset_attributes() {
        let writer = writer();
        let base = writer.base();

        assert_eq!(base.element(tags::MODALITY).unwrap().to_str().unwrap(), "SM");
        assert_eq!(
            base.element(tags::STUDY_INSTANCE_UID).unwrap().to_str().unwrap(),
            "1.2.826.0.1.2"
        );
        assert_eq!(
            base.element(tags::MANUFACTURER).unwrap().to_str().unwrap(),
            "Scanner manufacturer"
        );
        let index = base.element(tags::DIMENSION_INDEX_SEQUENCE).unwrap();
        let items = index.items().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(
            items[0].element(tags::DIMENSION_ORGANIZATION_UID).unwrap().to_str().unwrap(),
            "1.2.826.0.1.1"
        );
        assert!(base.element(tags::OPTICAL_PATH_SEQUENCE).is_ok());
        assert!(base.element(tags::DEVICE_SERIAL_NUMBER).is_err());
    }

    #[test]
    fn test_encapsulated_instance_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let writer = writer();

        let outputs = convert(CodecChoice::Jpeg);
        let expected_offsets = outputs[0].stream.offsets().to_vec();
        let path = writer.write_level(outputs[0].clone(), dir.path()).unwrap();

        let obj = open_file(&path).unwrap();
        assert_eq!(obj.meta().transfer_syntax(), "1.2.840.10008.1.2.4.50");
        assert_eq!(
            obj.element(tags::NUMBER_OF_FRAMES).unwrap().to_int::<u32>().unwrap(),
            4
        );
        assert_eq!(
            obj.element(tags::PHOTOMETRIC_INTERPRETATION).unwrap().to_str().unwrap(),
            "YBR_FULL_422"
        );
        assert_eq!(
            obj.element(tags::TOTAL_PIXEL_MATRIX_COLUMNS).unwrap().to_int::<u32>().unwrap(),
            64
        );

        let pixel_data = obj.element(tags::PIXEL_DATA).unwrap().value();
        assert_eq!(pixel_data.fragments().unwrap().len(), 4);
        assert_eq!(pixel_data.offset_table().unwrap(), expected_offsets.as_slice());
    }

    #[test]
    fn test_native_instance_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let writer = writer();

        let outputs = convert(CodecChoice::Uncompressed);
        let path = writer.write_level(outputs[1].clone(), dir.path()).unwrap();
        assert!(path.ends_with("level_1.dcm"));

        let obj = open_file(&path).unwrap();
        assert_eq!(obj.meta().transfer_syntax(), "1.2.840.10008.1.2.1");
        assert_eq!(
            obj.element(tags::NUMBER_OF_FRAMES).unwrap().to_int::<u32>().unwrap(),
            1
        );
        assert_eq!(
            obj.element(tags::IMAGE_TYPE).unwrap().to_multi_str().unwrap()[3].trim(),
            "RESAMPLED"
        );
        let bytes = obj.element(tags::PIXEL_DATA).unwrap().to_bytes().unwrap();
        assert_eq!(bytes.len(), 32 * 32 * 3);
        assert_eq!(&bytes[..3], &[200, 120, 90]);
    }

    #[test]
    fn test_specimen_sequences_written() {
        let dir = tempfile::tempdir().unwrap();
        let specimen = SpecimenInfo {
            slide_id: "S-42".into(),
            samples: vec![
                SampleInfo {
                    embedding_medium: Some("Paraffin wax".into()),
                    fixative: Some("Neutral Buffered Formalin".into()),
                    stainings: vec!["hematoxylin stain".into()],
                    ..SampleInfo::new("A")
                },
                SampleInfo::new("B"),
            ],
        };
        let writer = WsiDatasetBuilder::new()
            .uid_generator(SequentialUid::new("1.2.826.0.1"))
            .specimen(&specimen)
            .unwrap()
            .build();
        let path = writer
            .write_level(convert(CodecChoice::Uncompressed)[1].clone(), dir.path())
            .unwrap();
        let obj = open_file(&path).unwrap();

        assert_eq!(
            obj.element(tags::CONTAINER_IDENTIFIER).unwrap().to_str().unwrap().trim(),
            "S-42"
        );
        let descriptions = obj.element(tags::SPECIMEN_DESCRIPTION_SEQUENCE).unwrap();
        let descriptions = descriptions.items().unwrap();
        assert_eq!(descriptions.len(), 2);

        let uid = |item: &InMemDicomObject| {
            item.element(tags::SPECIMEN_UID).unwrap().to_str().unwrap().trim().to_string()
        };
        assert_ne!(uid(&descriptions[0]), uid(&descriptions[1]));

        let steps = descriptions[0].element(tags::SPECIMEN_PREPARATION_SEQUENCE).unwrap();
        let steps = steps.items().unwrap();
        assert_eq!(steps.len(), 1);
        let content = steps[0]
            .element(tags::SPECIMEN_PREPARATION_STEP_CONTENT_ITEM_SEQUENCE)
            .unwrap()
            .items()
            .unwrap();
        let concepts: Vec<String> = content
            .iter()
            .filter_map(|item| item.element(tags::CONCEPT_CODE_SEQUENCE).ok())
            .map(|codes| {
                let code = &codes.items().unwrap()[0];
                code.element(tags::CODE_MEANING).unwrap().to_str().unwrap().trim().to_string()
            })
            .collect();
        assert_eq!(
            concepts,
            ["Staining", "hematoxylin stain", "Neutral Buffered Formalin", "Paraffin wax"]
        );

        let unstained = descriptions[1].element(tags::SPECIMEN_PREPARATION_SEQUENCE).unwrap();
        assert!(unstained.items().unwrap().is_empty());
    }

    #[test]
    fn test_unknown_fixative_rejected() {
        let specimen = SpecimenInfo {
            samples: vec![SampleInfo {
                fixative: Some("glue".into()),
                ..SampleInfo::new("A")
            }],
            ..Default::default()
        };
        assert!(matches!(
            WsiDatasetBuilder::new().specimen(&specimen),
            Err(DicomizeError::Config(_))
        ));
    }

    #[test]
    fn test_levels_share_series() {
        let writer = writer();
        let outputs = convert(CodecChoice::Jpeg2000Lossless);

        let first = writer.instance(outputs[0].clone()).unwrap();
        let second = writer.instance(outputs[1].clone()).unwrap();

        let series = |obj: &FileDicomObject<InMemDicomObject>| {
            obj.element(tags::SERIES_INSTANCE_UID).unwrap().to_str().unwrap().to_string()
        };
        let instance = |obj: &FileDicomObject<InMemDicomObject>| {
            obj.element(tags::SOP_INSTANCE_UID).unwrap().to_str().unwrap().to_string()
        };
        assert_eq!(series(&first), series(&second));
        assert_ne!(instance(&first), instance(&second));
        assert_eq!(
            first.element(tags::PHOTOMETRIC_INTERPRETATION).unwrap().to_str().unwrap(),
            "YBR_RCT"
        );
        assert_eq!(
            first.element(tags::LOSSY_IMAGE_COMPRESSION).unwrap().to_str().unwrap(),
            "00"
        );
    }
}
