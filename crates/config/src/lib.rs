use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::Path;

pub const SCHEMA_VERSION: &str = "1.0";

/// Environment variable naming the manifest the firmware is built from.
pub const MANIFEST_ENV: &str = "SPRINGBOARD_MANIFEST";
/// Environment variable naming a raw buffer file. Overrides `buffer.source`.
pub const CODEBUF_ENV: &str = "SPRINGBOARD_CODEBUF";

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ManifestError {
    #[error("Unsupported schema_version '{0}'. Supported versions: '1.0'")]
    UnsupportedSchema(String),
    #[error("marker cannot be empty")]
    EmptyMarker,
    #[error("marker contains a NUL at byte {0}; it would end the marker early")]
    MarkerContainsNul(usize),
    #[error("invalid size '{value}' for {field}")]
    InvalidSize { field: &'static str, value: String },
    #[error("{field} {addr:#x} does not fit a 32-bit address space")]
    AddressOutOfRange { field: &'static str, addr: u64 },
    #[error("uart_tx {0:#x} is not aligned to a 32-bit register")]
    MisalignedUart(u64),
    #[error("buffer address {address:#x} is not inside flash ({flash_base:#x}..{flash_end:#x})")]
    BufferOutsideFlash {
        address: u64,
        flash_base: u64,
        flash_end: u64,
    },
    #[error("buffer region ends at {end:#x}, past the end of flash at {flash_end:#x}")]
    BufferOverflowsFlash { end: u64, flash_end: u64 },
    #[error("buffer is {len} bytes but only {size} are reserved")]
    BufferTooLarge { len: u64, size: u64 },
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MemoryRange {
    pub base: u64,
    pub size: String, // e.g. "256KiB"
}

impl MemoryRange {
    fn size_bytes(&self, field: &'static str) -> std::result::Result<u64, ManifestError> {
        parse_size(&self.size).map_err(|_| ManifestError::InvalidSize {
            field,
            value: self.size.clone(),
        })
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct BoardConfig {
    /// Address of the UART transmit data register.
    pub uart_tx: u64,
    pub flash: MemoryRange,
    pub ram: MemoryRange,
}

/// Canned single-instruction Thumb buffers.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinBuffer {
    /// `b .` - branches to itself forever.
    Spin,
    /// `bx lr` - returns straight to the harness.
    Return,
}

impl BuiltinBuffer {
    pub fn bytes(self) -> &'static [u8] {
        match self {
            BuiltinBuffer::Spin => &[0xFE, 0xE7],
            BuiltinBuffer::Return => &[0x70, 0x47],
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BuiltinSource {
    pub builtin: BuiltinBuffer,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FileSource {
    pub file: String,
}

/// Where the generated instruction bytes come from.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum BufferSource {
    Builtin(BuiltinSource),
    File(FileSource),
}

impl Default for BufferSource {
    fn default() -> Self {
        BufferSource::Builtin(BuiltinSource {
            builtin: BuiltinBuffer::Spin,
        })
    }
}

impl BufferSource {
    /// Fetch the raw bytes. File paths are resolved against `base_dir`.
    /// The bytes are opaque: nothing about them is checked.
    pub fn load(&self, base_dir: &Path) -> Result<Vec<u8>> {
        match self {
            BufferSource::Builtin(src) => Ok(src.builtin.bytes().to_vec()),
            BufferSource::File(src) => {
                let path = base_dir.join(&src.file);
                std::fs::read(&path)
                    .with_context(|| format!("Failed to read code buffer at {:?}", path))
            }
        }
    }
}

fn default_argument() -> i32 {
    springboard_core::DEFAULT_ARGUMENT
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct BufferConfig {
    /// Fixed address the buffer is linked at.
    pub address: u64,
    /// Bytes reserved for the buffer, e.g. "64KiB".
    pub size: String,
    #[serde(default = "default_argument")]
    pub argument: i32,
    #[serde(default)]
    pub source: BufferSource,
}

fn default_marker() -> String {
    String::from_utf8_lossy(springboard_core::DEFAULT_MARKER).into_owned()
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct HarnessManifest {
    pub schema_version: String,
    pub name: String,
    pub board: BoardConfig,
    #[serde(default = "default_marker")]
    pub marker: String,
    pub buffer: BufferConfig,
}

/// Resolved, validated memory map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub flash_base: u64,
    /// Flash left to the harness itself, below the buffer.
    pub flash_len: u64,
    pub buffer_base: u64,
    pub buffer_len: u64,
    pub ram_base: u64,
    pub ram_len: u64,
}

impl HarnessManifest {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let f = std::fs::File::open(&path)
            .with_context(|| format!("Failed to open harness manifest at {:?}", path.as_ref()))?;
        let manifest: Self =
            serde_yaml::from_reader(f).context("Failed to parse Harness Manifest YAML")?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let manifest: Self =
            serde_yaml::from_str(yaml).context("Failed to parse Harness Manifest YAML")?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn validate(&self) -> std::result::Result<(), ManifestError> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(ManifestError::UnsupportedSchema(self.schema_version.clone()));
        }

        validate_marker(self.marker.as_bytes())?;

        if self.board.uart_tx > u32::MAX as u64 {
            return Err(ManifestError::AddressOutOfRange {
                field: "uart_tx",
                addr: self.board.uart_tx,
            });
        }
        if self.board.uart_tx % 4 != 0 {
            return Err(ManifestError::MisalignedUart(self.board.uart_tx));
        }

        self.layout().map(|_| ())
    }

    /// Carve the buffer region off the top of flash.
    pub fn layout(&self) -> std::result::Result<Layout, ManifestError> {
        let flash = &self.board.flash;
        let flash_size = flash.size_bytes("board.flash.size")?;
        let ram_size = self.board.ram.size_bytes("board.ram.size")?;
        let buffer_size = parse_size(&self.buffer.size).map_err(|_| ManifestError::InvalidSize {
            field: "buffer.size",
            value: self.buffer.size.clone(),
        })?;

        let flash_end = flash
            .base
            .checked_add(flash_size)
            .ok_or(ManifestError::AddressOutOfRange {
                field: "board.flash",
                addr: flash.base,
            })?;
        let address = self.buffer.address;
        if address <= flash.base || address >= flash_end {
            return Err(ManifestError::BufferOutsideFlash {
                address,
                flash_base: flash.base,
                flash_end,
            });
        }
        let end = address
            .checked_add(buffer_size)
            .ok_or(ManifestError::AddressOutOfRange {
                field: "buffer",
                addr: address,
            })?;
        if end > flash_end {
            return Err(ManifestError::BufferOverflowsFlash { end, flash_end });
        }
        let ram_end = self
            .board
            .ram
            .base
            .checked_add(ram_size)
            .ok_or(ManifestError::AddressOutOfRange {
                field: "board.ram",
                addr: self.board.ram.base,
            })?;
        for (field, addr) in [("board.flash", flash_end), ("board.ram", ram_end)] {
            if addr > u32::MAX as u64 + 1 {
                return Err(ManifestError::AddressOutOfRange { field, addr });
            }
        }

        Ok(Layout {
            flash_base: flash.base,
            flash_len: address - flash.base,
            buffer_base: address,
            buffer_len: buffer_size,
            ram_base: self.board.ram.base,
            ram_len: ram_size,
        })
    }

    pub fn check_buffer_fits(&self, len: usize) -> std::result::Result<(), ManifestError> {
        let layout = self.layout()?;
        if len as u64 > layout.buffer_len {
            return Err(ManifestError::BufferTooLarge {
                len: len as u64,
                size: layout.buffer_len,
            });
        }
        Ok(())
    }

    /// Render the `memory.x` the firmware links with. The buffer gets its own
    /// region and a `.codebuf` output section pinned to its origin; exported
    /// metadata goes to a kept `.harness_meta` section in flash.
    pub fn linker_script(&self) -> std::result::Result<String, ManifestError> {
        let l = self.layout()?;
        let mut out = String::new();
        let _ = writeln!(out, "/* Generated from harness manifest '{}' */", self.name);
        out.push_str("MEMORY\n{\n");
        let _ = writeln!(out, "  FLASH   : ORIGIN = {:#010x}, LENGTH = {}", l.flash_base, l.flash_len);
        let _ = writeln!(out, "  CODEBUF : ORIGIN = {:#010x}, LENGTH = {}", l.buffer_base, l.buffer_len);
        let _ = writeln!(out, "  RAM     : ORIGIN = {:#010x}, LENGTH = {}", l.ram_base, l.ram_len);
        out.push_str("}\n\n");
        out.push_str("SECTIONS\n{\n");
        out.push_str("  .codebuf ORIGIN(CODEBUF) :\n  {\n");
        out.push_str("    KEEP(*(.codebuf .codebuf.*));\n");
        out.push_str("  } > CODEBUF\n\n");
        out.push_str("  .harness_meta : ALIGN(4)\n  {\n");
        out.push_str("    KEEP(*(.harness_meta .harness_meta.*));\n");
        out.push_str("  } > FLASH\n");
        out.push_str("} INSERT AFTER .rodata;\n");
        Ok(out)
    }

    /// Render the constants the firmware includes at build time.
    pub fn rust_constants(&self, buffer_len: usize) -> std::result::Result<String, ManifestError> {
        let layout = self.layout()?;
        let marker: Vec<String> = self.marker.bytes().map(|b| b.to_string()).collect();

        let mut out = String::new();
        let _ = writeln!(out, "pub const UART_TX: usize = {:#x};", self.board.uart_tx);
        let _ = writeln!(out, "pub const READY_MARKER_LEN: usize = {};", self.marker.len());
        let _ = writeln!(
            out,
            "pub const READY_MARKER_BYTES: [u8; READY_MARKER_LEN] = [{}];",
            marker.join(", ")
        );
        let _ = writeln!(out, "pub const BUFFER_ADDRESS: usize = {:#x};", layout.buffer_base);
        let _ = writeln!(out, "pub const BUFFER_ARGUMENT: i32 = {};", self.buffer.argument);
        let _ = writeln!(out, "pub const CODE_BUFFER_LEN: usize = {};", buffer_len);
        Ok(out)
    }
}

/// A marker must put at least one byte on the wire, and a NUL would cut it
/// short.
pub fn validate_marker(marker: &[u8]) -> std::result::Result<(), ManifestError> {
    if marker.is_empty() {
        return Err(ManifestError::EmptyMarker);
    }
    if let Some(pos) = marker.iter().position(|&b| b == 0) {
        return Err(ManifestError::MarkerContainsNul(pos));
    }
    Ok(())
}

pub fn parse_size(size_str: &str) -> Result<u64> {
    use human_size::{Byte, Size, SpecificSize};
    let s: Size = size_str
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid size format: {}", e))?;
    let bytes: SpecificSize<Byte> = s.into();
    Ok(bytes.value() as u64)
}
