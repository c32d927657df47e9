use anyhow::{anyhow, Context, Result};
use goblin::elf::program_header::PT_LOAD;
use goblin::elf::Elf;
use serde::Serialize;
use sha2::{Digest, Sha256};
use springboard_core::{PrintThenTransfer, Variant};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Symbols the firmware exports for host tooling.
pub const BUFFER_SYMBOL: &str = "CODE_BUFFER";
pub const MARKER_SYMBOL: &str = "READY_MARKER";
pub const VARIANT_SYMBOL: &str = "HARNESS_VARIANT";
pub const ARGUMENT_SYMBOL: &str = "BUFFER_ARGUMENT";

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ImageError {
    #[error("symbol `{0}` not found in image")]
    MissingSymbol(&'static str),
    #[error("symbol `{symbol}` at {addr:#x} ({size} bytes) is not backed by a loadable segment")]
    NotLoaded {
        symbol: &'static str,
        addr: u64,
        size: u64,
    },
    #[error("unknown harness variant id {0}")]
    UnknownVariant(u8),
}

#[derive(Debug, Clone)]
pub struct Segment {
    pub start_addr: u64,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ProgramImage {
    pub entry_point: u64,
    pub segments: Vec<Segment>,
}

impl ProgramImage {
    pub fn new(entry_point: u64) -> Self {
        Self {
            entry_point,
            segments: Vec::new(),
        }
    }

    pub fn add_segment(&mut self, start_addr: u64, data: Vec<u8>) {
        self.segments.push(Segment { start_addr, data });
    }

    /// Bytes at `[addr, addr + len)`, if one segment covers all of them.
    pub fn read(&self, addr: u64, len: u64) -> Option<&[u8]> {
        self.segments.iter().find_map(|seg| {
            let end = seg.start_addr + seg.data.len() as u64;
            if addr >= seg.start_addr && addr.checked_add(len)? <= end {
                let offset = (addr - seg.start_addr) as usize;
                Some(&seg.data[offset..offset + len as usize])
            } else {
                None
            }
        })
    }
}

fn image_from_elf(elf: &Elf, buffer: &[u8]) -> Result<ProgramImage> {
    info!("ELF Entry Point: {:#x}", elf.entry);

    let mut program_image = ProgramImage::new(elf.entry);

    for ph in &elf.program_headers {
        if ph.p_type == PT_LOAD {
            // Load address: everything the harness exports lives in flash.
            let start_addr = ph.p_paddr;
            let size = ph.p_filesz as usize;
            let offset = ph.p_offset as usize;

            if size == 0 {
                continue;
            }

            debug!(
                "Found Loadable Segment: Addr={:#x}, Size={} bytes, Offset={:#x}",
                start_addr, size, offset
            );

            if offset + size > buffer.len() {
                return Err(anyhow!("Segment out of bounds in ELF file"));
            }

            program_image.add_segment(start_addr, buffer[offset..offset + size].to_vec());
        }
    }

    if program_image.segments.is_empty() {
        warn!("No loadable segments found in ELF file");
    }

    Ok(program_image)
}

/// Where the instruction buffer ended up in a built harness.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BufferPlacement {
    pub address: u64,
    pub size: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SegmentInfo {
    pub address: u64,
    pub size: u64,
}

/// What a built harness will do when it runs.
#[derive(Debug, Clone, Serialize)]
pub struct HarnessImage {
    pub entry_point: u64,
    pub segments: Vec<SegmentInfo>,
    pub variant: &'static str,
    pub transfers: bool,
    pub marker: Vec<u8>,
    pub argument: i32,
    pub buffer: BufferPlacement,
}

/// Read the exported harness symbols out of a linked firmware image.
pub fn inspect(path: &Path) -> Result<HarnessImage> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read ELF file: {:?}", path))?;
    let elf = Elf::parse(&bytes).context("Failed to parse ELF binary")?;
    let image = image_from_elf(&elf, &bytes)?;

    let (_, variant) = symbol_bytes(&elf, &image, VARIANT_SYMBOL)?;
    let variant_id = variant.first().copied().unwrap_or(u8::MAX);
    let variant = decode_variant(variant_id)?;

    let (_, marker) = symbol_bytes(&elf, &image, MARKER_SYMBOL)?;
    let (_, argument) = symbol_bytes(&elf, &image, ARGUMENT_SYMBOL)?;
    let argument = argument
        .try_into()
        .map(i32::from_le_bytes)
        .map_err(|_| anyhow!("`{}` is not a 32-bit value", ARGUMENT_SYMBOL))?;

    let (buffer_addr, buffer) = symbol_bytes(&elf, &image, BUFFER_SYMBOL)?;
    debug!("{} at {:#x}, {} bytes", BUFFER_SYMBOL, buffer_addr, buffer.len());

    Ok(HarnessImage {
        entry_point: image.entry_point,
        segments: image
            .segments
            .iter()
            .map(|seg| SegmentInfo {
                address: seg.start_addr,
                size: seg.data.len() as u64,
            })
            .collect(),
        variant,
        transfers: variant_id == PrintThenTransfer::ID,
        marker: marker.to_vec(),
        argument,
        buffer: BufferPlacement {
            address: buffer_addr,
            size: buffer.len() as u64,
            sha256: sha256_hex(buffer),
        },
    })
}

fn symbol_bytes<'a>(
    elf: &Elf,
    image: &'a ProgramImage,
    name: &'static str,
) -> Result<(u64, &'a [u8]), ImageError> {
    let (addr, size) = elf
        .syms
        .iter()
        .find(|sym| elf.strtab.get_at(sym.st_name) == Some(name))
        .map(|sym| (sym.st_value, sym.st_size))
        .ok_or(ImageError::MissingSymbol(name))?;
    let data = image.read(addr, size).ok_or(ImageError::NotLoaded {
        symbol: name,
        addr,
        size,
    })?;
    Ok((addr, data))
}

pub fn decode_variant(id: u8) -> Result<&'static str, ImageError> {
    springboard_core::variant::name_of(id).ok_or(ImageError::UnknownVariant(id))
}

pub fn sha256_hex(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> ProgramImage {
        let mut image = ProgramImage::new(0x101);
        image.add_segment(0x0, vec![0xAA; 0x100]);
        image.add_segment(0x3_0000, vec![0xFE, 0xE7]);
        image
    }

    #[test]
    fn test_read_within_segment() {
        let image = image();
        assert_eq!(image.read(0x3_0000, 2), Some(&[0xFE, 0xE7][..]));
        assert_eq!(image.read(0x10, 4), Some(&[0xAA; 4][..]));
        assert_eq!(image.read(0x3_0000, 0), Some(&[][..]));
    }

    #[test]
    fn test_read_outside_segments() {
        let image = image();
        assert_eq!(image.read(0x3_0000, 3), None);
        assert_eq!(image.read(0xFE, 4), None);
        assert_eq!(image.read(0x2000_0000, 1), None);
        assert_eq!(image.read(u64::MAX, 2), None);
    }

    #[test]
    fn test_decode_variant() {
        assert_eq!(decode_variant(0), Ok("print-and-halt"));
        assert_eq!(decode_variant(1), Ok("print-then-transfer"));
        assert_eq!(decode_variant(7), Err(ImageError::UnknownVariant(7)));
    }

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(sha256_hex(&[0xFE, 0xE7]).len(), 64);
    }

    /// Minimal little-endian ELF32 with one PT_LOAD segment and a symbol
    /// table, laid out the way the linker leaves a harness image.
    struct ElfBuilder {
        entry: u32,
        load_addr: u32,
        data: Vec<u8>,
        symbols: Vec<(&'static str, u32, u32)>,
    }

    fn push_u16(out: &mut Vec<u8>, v: u16) {
        out.extend_from_slice(&v.to_le_bytes());
    }

    fn push_u32(out: &mut Vec<u8>, v: u32) {
        out.extend_from_slice(&v.to_le_bytes());
    }

    fn align4(out: &mut Vec<u8>) {
        while out.len() % 4 != 0 {
            out.push(0);
        }
    }

    impl ElfBuilder {
        fn build(&self) -> Vec<u8> {
            const EHDR: u32 = 52;
            const PHDR: u32 = 32;
            let data_off = EHDR + PHDR;

            let mut body = self.data.clone();
            align4(&mut body);

            let strtab_off = data_off + body.len() as u32;
            let mut strtab = vec![0u8];
            let mut names = Vec::new();
            for (name, _, _) in &self.symbols {
                names.push(strtab.len() as u32);
                strtab.extend_from_slice(name.as_bytes());
                strtab.push(0);
            }
            align4(&mut strtab);

            let symtab_off = strtab_off + strtab.len() as u32;
            let mut symtab = vec![0u8; 16];
            for ((_, value, size), name) in self.symbols.iter().zip(&names) {
                push_u32(&mut symtab, *name);
                push_u32(&mut symtab, *value);
                push_u32(&mut symtab, *size);
                symtab.push(0x11); // STB_GLOBAL | STT_OBJECT
                symtab.push(0);
                push_u16(&mut symtab, 1);
            }

            let shdr_off = symtab_off + symtab.len() as u32;

            let mut out = Vec::new();
            out.extend_from_slice(&[0x7F, b'E', b'L', b'F', 1, 1, 1, 0]);
            out.extend_from_slice(&[0; 8]);
            push_u16(&mut out, 2); // ET_EXEC
            push_u16(&mut out, 40); // EM_ARM
            push_u32(&mut out, 1);
            push_u32(&mut out, self.entry);
            push_u32(&mut out, EHDR);
            push_u32(&mut out, shdr_off);
            push_u32(&mut out, 0);
            push_u16(&mut out, EHDR as u16);
            push_u16(&mut out, PHDR as u16);
            push_u16(&mut out, 1);
            push_u16(&mut out, 40);
            push_u16(&mut out, 3);
            push_u16(&mut out, 2);

            // PT_LOAD
            push_u32(&mut out, 1);
            push_u32(&mut out, data_off);
            push_u32(&mut out, self.load_addr);
            push_u32(&mut out, self.load_addr);
            push_u32(&mut out, self.data.len() as u32);
            push_u32(&mut out, self.data.len() as u32);
            push_u32(&mut out, 5);
            push_u32(&mut out, 4);

            out.extend_from_slice(&body);
            out.extend_from_slice(&strtab);
            out.extend_from_slice(&symtab);

            // Null, .symtab, .strtab
            out.extend_from_slice(&[0; 40]);
            for v in [0, 2, 0, 0, symtab_off, symtab.len() as u32, 2, 1, 4, 16] {
                push_u32(&mut out, v);
            }
            for v in [0, 3, 0, 0, strtab_off, strtab.len() as u32, 0, 0, 1, 0] {
                push_u32(&mut out, v);
            }
            out
        }

        fn write(&self, name: &str) -> std::path::PathBuf {
            let path = std::env::temp_dir().join(format!(
                "springboard-{}-{}.elf",
                name,
                std::process::id()
            ));
            fs::write(&path, self.build()).unwrap();
            path
        }
    }

    /// Flash at 0x1000: marker, variant, argument, then a two-byte buffer.
    fn harness_elf(variant: u8) -> ElfBuilder {
        let mut data = b"OK\n\0".to_vec();
        data.push(variant);
        data.extend_from_slice(&[0; 3]);
        data.extend_from_slice(&(-2i32).to_le_bytes());
        data.extend_from_slice(&[0; 4]);
        data.extend_from_slice(&[0xFE, 0xE7]);
        ElfBuilder {
            entry: 0x1001,
            load_addr: 0x1000,
            data,
            symbols: vec![
                (MARKER_SYMBOL, 0x1000, 3),
                (VARIANT_SYMBOL, 0x1004, 1),
                (ARGUMENT_SYMBOL, 0x1008, 4),
                (BUFFER_SYMBOL, 0x1010, 2),
            ],
        }
    }

    fn image_error(err: &anyhow::Error) -> &ImageError {
        err.downcast_ref::<ImageError>().unwrap()
    }

    #[test]
    fn test_inspect_harness_image() {
        let path = harness_elf(1).write("transfer");
        let image = inspect(&path).unwrap();
        let _ = fs::remove_file(&path);

        assert_eq!(image.entry_point, 0x1001);
        assert_eq!(
            image.segments,
            vec![SegmentInfo {
                address: 0x1000,
                size: 0x12
            }]
        );
        assert_eq!(image.variant, "print-then-transfer");
        assert!(image.transfers);
        assert_eq!(image.marker, b"OK\n");
        assert_eq!(image.argument, -2);
        assert_eq!(
            image.buffer,
            BufferPlacement {
                address: 0x1010,
                size: 2,
                sha256: sha256_hex(&[0xFE, 0xE7]),
            }
        );
    }

    #[test]
    fn test_inspect_print_and_halt() {
        let path = harness_elf(0).write("halt");
        let image = inspect(&path).unwrap();
        let _ = fs::remove_file(&path);

        assert_eq!(image.variant, "print-and-halt");
        assert!(!image.transfers);
    }

    #[test]
    fn test_inspect_unknown_variant() {
        let path = harness_elf(9).write("unknown-variant");
        let err = inspect(&path).unwrap_err();
        let _ = fs::remove_file(&path);

        assert_eq!(image_error(&err), &ImageError::UnknownVariant(9));
    }

    #[test]
    fn test_inspect_missing_symbol() {
        let mut elf = harness_elf(1);
        elf.symbols.retain(|(name, _, _)| *name != MARKER_SYMBOL);
        let path = elf.write("missing-marker");
        let err = inspect(&path).unwrap_err();
        let _ = fs::remove_file(&path);

        assert_eq!(image_error(&err), &ImageError::MissingSymbol(MARKER_SYMBOL));
    }

    #[test]
    fn test_inspect_symbol_not_loaded() {
        let mut elf = harness_elf(1);
        for sym in elf.symbols.iter_mut() {
            if sym.0 == BUFFER_SYMBOL {
                sym.1 = 0x3_0000;
            }
        }
        let path = elf.write("unloaded-buffer");
        let err = inspect(&path).unwrap_err();
        let _ = fs::remove_file(&path);

        assert_eq!(
            image_error(&err),
            &ImageError::NotLoaded {
                symbol: BUFFER_SYMBOL,
                addr: 0x3_0000,
                size: 2
            }
        );
    }

    #[test]
    fn test_load_missing_file() {
        let err = inspect(Path::new("definitely-missing.elf")).unwrap_err();
        assert!(err.to_string().contains("Failed to read ELF file"));
    }

    #[test]
    fn test_inspect_rejects_non_elf() {
        let path = std::env::temp_dir().join("springboard-not-an-elf.bin");
        fs::write(&path, b"not an elf").unwrap();
        let err = inspect(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse ELF binary"));
        let _ = fs::remove_file(&path);
    }
}
