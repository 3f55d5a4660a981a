//! DICOM output: encapsulated pixel data, WSI datasets and file writing.

mod assembler;
mod dataset;
mod specimen;
mod uid;

pub use assembler::{MultiFrameAssembler, MultiFrameStream};
pub use dataset::{
    image_type, DeviceInfo, ImageFlavor, WsiDatasetBuilder, WsiInstanceWriter,
    VL_WSI_SOP_CLASS_UID,
};
pub use specimen::{
    Code, PreparedSample, SampleInfo, SpecimenInfo, EMBEDDING_MEDIA, FIXATIVES, STAINS,
};
pub use uid::{RandomUid, SequentialUid, UidGenerator, UUID_ROOT};

use dicom::encoding::TransferSyntaxIndex;
use dicom_transfer_syntax_registry::TransferSyntaxRegistry;

/// Registered name of a transfer syntax, if the registry knows it.
pub fn transfer_syntax_name(uid: &str) -> Option<String> {
    let registry = TransferSyntaxRegistry;
    registry.get(uid).map(|ts| ts.name().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CodecChoice;

    #[test]
    fn test_bound_transfer_syntaxes_are_registered() {
        for choice in [
            CodecChoice::Uncompressed,
            CodecChoice::Jpeg,
            CodecChoice::Jpeg2000Lossless,
            CodecChoice::Jpeg2000,
        ] {
            let uid = choice.binding().uid;
            assert!(transfer_syntax_name(uid).is_some(), "{} is not registered", uid);
        }
        assert!(transfer_syntax_name("1.2.3.4").is_none());
    }
}
