// SPDX-License-Identifier: GPL-3.0-only

use provision_types::ImageMetadata;

/// Decode the per-node metadata record. Anything unreadable counts as "no
/// metadata": images are then written without checksum verification.
pub fn parse_image_metadata(raw: &str) -> ImageMetadata {
    if raw.trim().is_empty() {
        return ImageMetadata::default();
    }
    match serde_yaml::from_str(raw) {
        Ok(metadata) => metadata,
        Err(e) => {
            tracing::warn!("Failed to decode image metadata: {}", e);
            ImageMetadata::default()
        }
    }
}

pub fn render_image_metadata(metadata: &ImageMetadata) -> Result<String, serde_yaml::Error> {
    serde_yaml::to_string(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_yaml_record() {
        let raw = "images:\n- container_name: fake_image.img.gz\n  raw_md5: fakeroot\n  raw_size: 1\nos:\n  name: ubuntu\n  major: 14\n  minor: 4\n";
        let metadata = parse_image_metadata(raw);
        let record = metadata
            .image_by_container_name("fake_image.img.gz")
            .expect("record");
        assert_eq!(record.raw_md5.as_deref(), Some("fakeroot"));
        assert_eq!(record.raw_size, Some(1));
        assert_eq!(metadata.os.map(|os| os.major), Some(14));
    }

    #[test]
    fn garbage_is_empty_metadata() {
        assert_eq!(parse_image_metadata("{{ not yaml"), ImageMetadata::default());
        assert_eq!(parse_image_metadata(""), ImageMetadata::default());
    }
}
