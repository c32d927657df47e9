use crate::{EXIT_CHECK_FAILED, EXIT_CONFIG_ERROR};
use springboard_config::HarnessManifest;
use springboard_loader::{HarnessImage, ImageError};

/// Exit code for an image that could not be inspected. A readable ELF that
/// lacks the harness exports fails the check; anything else is bad input.
pub fn failure_code(err: &anyhow::Error) -> u8 {
    if err.downcast_ref::<ImageError>().is_some() {
        EXIT_CHECK_FAILED
    } else {
        EXIT_CONFIG_ERROR
    }
}

/// Differences between a built image and the manifest it should follow.
/// Empty when the image honors the placement contract.
pub fn verify(image: &HarnessImage, manifest: &HarnessManifest) -> Vec<String> {
    let mut problems = Vec::new();

    if image.buffer.address != manifest.buffer.address {
        problems.push(format!(
            "buffer linked at {:#x}, manifest agrees on {:#x}",
            image.buffer.address, manifest.buffer.address
        ));
    }
    if let Err(e) = manifest.check_buffer_fits(image.buffer.size as usize) {
        problems.push(e.to_string());
    }
    if image.marker != manifest.marker.as_bytes() {
        problems.push(format!(
            "marker is \"{}\", manifest expects \"{}\"",
            image.marker.escape_ascii(),
            manifest.marker.as_bytes().escape_ascii()
        ));
    }
    if image.argument != manifest.buffer.argument {
        problems.push(format!(
            "buffer argument is {}, manifest expects {}",
            image.argument, manifest.buffer.argument
        ));
    }

    problems
}

pub fn render(image: &HarnessImage) -> String {
    let mut out = String::new();
    out.push_str(&format!("entry point : {:#x}\n", image.entry_point));
    out.push_str(&format!("variant     : {}\n", image.variant));
    out.push_str(&format!("marker      : \"{}\"\n", image.marker.escape_ascii()));
    out.push_str(&format!(
        "buffer      : {:#x} ({} bytes, sha256 {})\n",
        image.buffer.address, image.buffer.size, image.buffer.sha256
    ));
    if image.transfers {
        out.push_str(&format!("argument    : {}\n", image.argument));
    }
    for seg in &image.segments {
        out.push_str(&format!("segment     : {:#010x} {} bytes\n", seg.address, seg.size));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use springboard_loader::{BufferPlacement, SegmentInfo};

    fn manifest() -> HarnessManifest {
        HarnessManifest::from_yaml(
            r#"
schema_version: "1.0"
name: test
board:
  uart_tx: 0x4000C000
  flash: { base: 0x0, size: "256KiB" }
  ram: { base: 0x20000000, size: "64KiB" }
marker: "OK\n"
buffer:
  address: 0x30000
  size: "64KiB"
  argument: 1
"#,
        )
        .unwrap()
    }

    fn image() -> HarnessImage {
        HarnessImage {
            entry_point: 0x401,
            segments: vec![SegmentInfo {
                address: 0,
                size: 0x400,
            }],
            variant: "print-then-transfer",
            transfers: true,
            marker: b"OK\n".to_vec(),
            argument: 1,
            buffer: BufferPlacement {
                address: 0x30000,
                size: 2,
                sha256: String::new(),
            },
        }
    }

    #[test]
    fn test_matching_image() {
        assert!(verify(&image(), &manifest()).is_empty());
    }

    #[test]
    fn test_misplaced_buffer() {
        let mut image = image();
        image.buffer.address = 0x20000;
        let problems = verify(&image, &manifest());
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("buffer linked at 0x20000"));
    }

    #[test]
    fn test_oversized_buffer_and_marker() {
        let mut image = image();
        image.buffer.size = 0x10001;
        image.marker = b"READY\n".to_vec();
        image.argument = 0;
        let problems = verify(&image, &manifest());
        assert_eq!(problems.len(), 3);
        assert!(problems[1].contains("READY\\n"));
    }

    #[test]
    fn test_failure_code() {
        let missing = anyhow::Error::new(ImageError::MissingSymbol("READY_MARKER"));
        assert_eq!(failure_code(&missing), EXIT_CHECK_FAILED);

        let unknown = anyhow::Error::new(ImageError::UnknownVariant(9));
        assert_eq!(failure_code(&unknown), EXIT_CHECK_FAILED);

        let unreadable = anyhow::anyhow!("Failed to read ELF file");
        assert_eq!(failure_code(&unreadable), EXIT_CONFIG_ERROR);
    }

    #[test]
    fn test_render() {
        let text = render(&image());
        assert!(text.contains("variant     : print-then-transfer"));
        assert!(text.contains("marker      : \"OK\\n\""));
        assert!(text.contains("buffer      : 0x30000 (2 bytes"));
        assert!(text.contains("argument    : 1"));
    }
}
