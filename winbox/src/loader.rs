// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! PE image mapper.
//!
//! Materializes a PE32+ image into guest memory the way the Windows loader
//! would: headers first, then each section's raw data, base relocations if
//! the image had to move, and finally per-section page protections. Export
//! resolution walks the export directory of the *mapped* image, so RVAs are
//! honored even when file and section alignment differ.

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::{info, warn};
use winbox_common_nt::pe::{
    IMAGE_DIRECTORY_ENTRY_BASERELOC, IMAGE_DIRECTORY_ENTRY_EXPORT, IMAGE_DLLCHARACTERISTICS_DYNAMIC_BASE,
    IMAGE_DOS_SIGNATURE, IMAGE_NT_OPTIONAL_HDR64_MAGIC, IMAGE_NT_SIGNATURE, IMAGE_REL_BASED_ABSOLUTE,
    IMAGE_REL_BASED_DIR64, IMAGE_SCN_MEM_EXECUTE, IMAGE_SCN_MEM_READ, IMAGE_SCN_MEM_WRITE,
    ImageBaseRelocation, ImageDataDirectory, ImageDosHeader, ImageExportDirectory, ImageNtHeaders64,
    ImageSectionHeader,
};
use zerocopy::{FromBytes, FromZeros as _, IntoBytes};

use crate::cpu::{EmulatorError, MemoryPermission, X64Emulator};

pub(crate) const PAGE_SIZE: u64 = 0x1000;

pub(crate) fn page_align_up(value: u64) -> u64 {
    value.next_multiple_of(PAGE_SIZE)
}

/// A module materialized into guest memory.
#[derive(Clone, Debug)]
pub struct MappedBinary {
    /// Base the image actually landed at.
    pub image_base: u64,
    /// `OptionalHeader.SizeOfImage`.
    pub size_of_image: u64,
    /// Exported name to guest virtual address. Aliases may share an address.
    pub exports: BTreeMap<String, u64>,
}

/// Errors from parsing or mapping a PE image.
#[derive(Debug, Error)]
pub enum PeError {
    #[error("image data truncated at offset {offset:#x}")]
    Truncated { offset: usize },

    #[error("not a PE image: bad DOS signature")]
    BadDosSignature,

    #[error("not a PE image: bad NT signature")]
    BadNtSignature,

    #[error("unsupported optional-header magic {magic:#x} (only PE32+ is supported)")]
    UnsupportedMagic { magic: u16 },

    #[error("failed to map binary: preferred base {base:#x} unavailable and image is not relocatable")]
    NotRelocatable { base: u64 },

    #[error("export name ordinal {ordinal} is out of range")]
    InvalidExportOrdinal { ordinal: u16 },

    #[error(transparent)]
    Emulator(#[from] EmulatorError),
}

/// Parse `data` as a PE32+ image and map it into guest memory.
///
/// `name` is used only for logging. Returns the chosen base, the image size
/// and the resolved export table.
pub fn map_binary(
    emu: &mut dyn X64Emulator,
    data: &[u8],
    name: &str,
) -> Result<MappedBinary, PeError> {
    let (dos, _) =
        ImageDosHeader::read_from_prefix(data).map_err(|_| PeError::Truncated { offset: 0 })?;
    if dos.e_magic != IMAGE_DOS_SIGNATURE {
        return Err(PeError::BadDosSignature);
    }

    let nt_offset = usize::try_from(dos.e_lfanew).map_err(|_| PeError::BadNtSignature)?;
    let nt_bytes = data
        .get(nt_offset..)
        .ok_or(PeError::Truncated { offset: nt_offset })?;
    let (nt, _) = ImageNtHeaders64::read_from_prefix(nt_bytes)
        .map_err(|_| PeError::Truncated { offset: nt_offset })?;
    if nt.Signature != IMAGE_NT_SIGNATURE {
        return Err(PeError::BadNtSignature);
    }
    let optional = nt.OptionalHeader;
    if optional.Magic != IMAGE_NT_OPTIONAL_HDR64_MAGIC {
        return Err(PeError::UnsupportedMagic {
            magic: optional.Magic,
        });
    }

    let preferred_base = optional.ImageBase;
    let size_of_image = u64::from(optional.SizeOfImage);

    // Reserve the whole image range read-only; sections refine this below.
    let image_base = match emu.allocate_memory(preferred_base, size_of_image, MemoryPermission::READ)
    {
        Ok(()) => preferred_base,
        Err(_) => {
            if optional.DllCharacteristics & IMAGE_DLLCHARACTERISTICS_DYNAMIC_BASE == 0 {
                return Err(PeError::NotRelocatable {
                    base: preferred_base,
                });
            }
            let base = emu.find_free_allocation_base(size_of_image)?;
            emu.allocate_memory(base, size_of_image, MemoryPermission::READ)?;
            base
        }
    };

    info!(
        module = name,
        base = format_args!("{image_base:#x}"),
        "mapping image"
    );

    let size_of_headers = optional.SizeOfHeaders as usize;
    let headers = data.get(..size_of_headers).ok_or(PeError::Truncated {
        offset: size_of_headers,
    })?;
    emu.write_memory(image_base, headers)?;

    // IMAGE_FIRST_SECTION: section headers follow the optional header.
    let sections_offset = nt_offset
        + size_of::<u32>()
        + size_of::<winbox_common_nt::pe::ImageFileHeader>()
        + usize::from(nt.FileHeader.SizeOfOptionalHeader);
    let mut sections = Vec::with_capacity(usize::from(nt.FileHeader.NumberOfSections));
    for index in 0..usize::from(nt.FileHeader.NumberOfSections) {
        let offset = sections_offset + index * size_of::<ImageSectionHeader>();
        let bytes = data.get(offset..).ok_or(PeError::Truncated { offset })?;
        let (section, _) = ImageSectionHeader::read_from_prefix(bytes)
            .map_err(|_| PeError::Truncated { offset })?;
        sections.push(section);
    }

    for section in &sections {
        let target = image_base + u64::from(section.VirtualAddress);
        if section.SizeOfRawData > 0 {
            let copy_len = section.SizeOfRawData.min(section.VirtualSize) as usize;
            let start = section.PointerToRawData as usize;
            let raw = data
                .get(start..start + copy_len)
                .ok_or(PeError::Truncated { offset: start })?;
            if !raw.is_empty() {
                emu.write_memory(target, raw)?;
            }
        }
    }

    // Copy the directory table out of the packed header before indexing it.
    let directories = optional.DataDirectory;

    // Fix the image up for its new base while everything is still writable
    // from the host side.
    if image_base != preferred_base {
        apply_relocations(
            emu,
            image_base,
            preferred_base,
            directories[IMAGE_DIRECTORY_ENTRY_BASERELOC],
        )?;
    }

    for section in &sections {
        let target = image_base + u64::from(section.VirtualAddress);
        let mut perms = MemoryPermission::NONE;
        if section.Characteristics & IMAGE_SCN_MEM_EXECUTE != 0 {
            perms |= MemoryPermission::EXEC;
        }
        if section.Characteristics & IMAGE_SCN_MEM_READ != 0 {
            perms |= MemoryPermission::READ;
        }
        if section.Characteristics & IMAGE_SCN_MEM_WRITE != 0 {
            perms |= MemoryPermission::WRITE;
        }
        let span = page_align_up(u64::from(section.SizeOfRawData.max(section.VirtualSize)));
        emu.protect_memory(target, span, perms)?;
    }

    let exports = resolve_exports(emu, image_base, directories[IMAGE_DIRECTORY_ENTRY_EXPORT])?;

    Ok(MappedBinary {
        image_base,
        size_of_image,
        exports,
    })
}

/// Walk the base-relocation directory of the mapped image and rebase every
/// `DIR64` entry by the load delta.
fn apply_relocations(
    emu: &mut dyn X64Emulator,
    image_base: u64,
    preferred_base: u64,
    directory: ImageDataDirectory,
) -> Result<(), PeError> {
    if !directory.is_present() {
        warn!(
            base = format_args!("{image_base:#x}"),
            "image moved but carries no relocation directory"
        );
        return Ok(());
    }

    let delta = image_base.wrapping_sub(preferred_base);
    let directory_base = image_base + u64::from(directory.VirtualAddress);
    let mut offset = 0u64;
    while offset + size_of::<ImageBaseRelocation>() as u64 <= u64::from(directory.Size) {
        let mut block = ImageBaseRelocation::new_zeroed();
        emu.read_memory(directory_base + offset, block.as_mut_bytes())?;
        let block_size = u64::from(block.SizeOfBlock);
        if block_size < size_of::<ImageBaseRelocation>() as u64 {
            break;
        }

        let entry_bytes = (block_size - size_of::<ImageBaseRelocation>() as u64) as usize;
        let mut entries = vec![0u8; entry_bytes];
        emu.read_memory(
            directory_base + offset + size_of::<ImageBaseRelocation>() as u64,
            &mut entries,
        )?;

        for entry in entries.chunks_exact(2) {
            let entry = u16::from_le_bytes([entry[0], entry[1]]);
            let kind = entry >> 12;
            let page_offset = u64::from(entry & 0x0FFF);
            match kind {
                IMAGE_REL_BASED_ABSOLUTE => {}
                IMAGE_REL_BASED_DIR64 => {
                    let target = image_base + u64::from(block.VirtualAddress) + page_offset;
                    let mut value = [0u8; 8];
                    emu.read_memory(target, &mut value)?;
                    let fixed = u64::from_le_bytes(value).wrapping_add(delta);
                    emu.write_memory(target, &fixed.to_le_bytes())?;
                }
                other => {
                    warn!(kind = other, "skipping unsupported relocation type");
                }
            }
        }

        offset += block_size;
    }

    Ok(())
}

/// Resolve named exports from the mapped image.
fn resolve_exports(
    emu: &mut dyn X64Emulator,
    image_base: u64,
    directory: ImageDataDirectory,
) -> Result<BTreeMap<String, u64>, PeError> {
    let mut exports = BTreeMap::new();
    if !directory.is_present() {
        return Ok(exports);
    }

    let mut export_dir = ImageExportDirectory::new_zeroed();
    emu.read_memory(
        image_base + u64::from(directory.VirtualAddress),
        export_dir.as_mut_bytes(),
    )?;

    let functions = read_u32_array(
        emu,
        image_base + u64::from(export_dir.AddressOfFunctions),
        export_dir.NumberOfFunctions as usize,
    )?;
    let names = read_u32_array(
        emu,
        image_base + u64::from(export_dir.AddressOfNames),
        export_dir.NumberOfNames as usize,
    )?;
    let ordinals = read_u16_array(
        emu,
        image_base + u64::from(export_dir.AddressOfNameOrdinals),
        export_dir.NumberOfNames as usize,
    )?;

    for (name_rva, ordinal) in names.iter().zip(&ordinals) {
        let name = read_c_string(emu, image_base + u64::from(*name_rva))?;
        let rva = functions
            .get(usize::from(*ordinal))
            .ok_or(PeError::InvalidExportOrdinal { ordinal: *ordinal })?;
        exports.insert(name, image_base + u64::from(*rva));
    }

    Ok(exports)
}

fn read_u32_array(
    emu: &mut dyn X64Emulator,
    addr: u64,
    count: usize,
) -> Result<Vec<u32>, PeError> {
    let mut bytes = vec![0u8; count * 4];
    emu.read_memory(addr, &mut bytes)?;
    Ok(bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

fn read_u16_array(
    emu: &mut dyn X64Emulator,
    addr: u64,
    count: usize,
) -> Result<Vec<u16>, PeError> {
    let mut bytes = vec![0u8; count * 2];
    emu.read_memory(addr, &mut bytes)?;
    Ok(bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect())
}

/// Read a NUL-terminated byte string from guest memory.
fn read_c_string(emu: &mut dyn X64Emulator, addr: u64) -> Result<String, PeError> {
    let mut bytes = Vec::new();
    loop {
        let mut b = [0u8; 1];
        emu.read_memory(addr + bytes.len() as u64, &mut b)?;
        if b[0] == 0 {
            break;
        }
        bytes.push(b[0]);
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::GuestMemory;
    use crate::cpu::mock::MockCpu;
    use crate::testutil::{PeBuilder, SectionSpec};

    const TEST_BASE: u64 = 0x1_8000_0000;

    #[test]
    fn minimal_image_maps_at_preferred_base() {
        let mut builder = PeBuilder::new(TEST_BASE);
        builder.sections.push(SectionSpec {
            virtual_address: 0x1000,
            virtual_size: 0x100,
            raw: (0..0x100).map(|i| i as u8).collect(),
            characteristics: IMAGE_SCN_MEM_EXECUTE | IMAGE_SCN_MEM_READ,
        });
        let file = builder.build();

        let mut cpu = MockCpu::new();
        let binary = map_binary(&mut cpu, &file, "test.exe").unwrap();

        assert_eq!(binary.image_base, TEST_BASE);
        assert_eq!(binary.size_of_image, 0x2000);
        assert!(binary.exports.is_empty());

        assert_eq!(cpu.allocations[0].addr, TEST_BASE);
        assert_eq!(cpu.allocations[0].size, 0x2000);
        assert_eq!(cpu.allocations[0].perms, MemoryPermission::READ);

        let text = cpu
            .protections
            .iter()
            .find(|p| p.addr == TEST_BASE + 0x1000)
            .unwrap();
        assert_eq!(text.size, 0x1000, "protection spans the aligned section");
        assert_eq!(text.perms, MemoryPermission::READ_EXEC);

        let mut bytes = vec![0u8; 0x100];
        cpu.read_memory(TEST_BASE + 0x1000, &mut bytes).unwrap();
        let expected: Vec<u8> = (0..0x100).map(|i| i as u8).collect();
        assert_eq!(bytes, expected);
    }

    #[test]
    fn occupied_base_falls_back_when_relocatable() {
        let mut builder = PeBuilder::new(TEST_BASE);
        builder.dll_characteristics = IMAGE_DLLCHARACTERISTICS_DYNAMIC_BASE;
        let file = builder.build();

        let mut cpu = MockCpu::new();
        cpu.allocate_memory(TEST_BASE, 0x1000, MemoryPermission::READ)
            .unwrap();
        cpu.free_bases = vec![0x2_0000_0000];

        let binary = map_binary(&mut cpu, &file, "test.dll").unwrap();
        assert_eq!(binary.image_base, 0x2_0000_0000);
        assert!(
            cpu.allocations
                .iter()
                .any(|a| a.addr == 0x2_0000_0000 && a.size == 0x2000)
        );
    }

    #[test]
    fn occupied_base_is_fatal_without_dynamic_base() {
        let file = PeBuilder::new(TEST_BASE).build();

        let mut cpu = MockCpu::new();
        cpu.allocate_memory(TEST_BASE, 0x1000, MemoryPermission::READ)
            .unwrap();

        assert!(matches!(
            map_binary(&mut cpu, &file, "test.exe"),
            Err(PeError::NotRelocatable { base: TEST_BASE })
        ));
    }

    #[test]
    fn export_aliases_share_an_address() {
        let file = PeBuilder::new(TEST_BASE)
            .with_exports(&[("foo", 0x500), ("bar", 0x500), ("baz", 0x600)])
            .build();

        let mut cpu = MockCpu::new();
        let binary = map_binary(&mut cpu, &file, "aliased.dll").unwrap();

        assert_eq!(binary.exports.len(), 3);
        assert_eq!(binary.exports["foo"], TEST_BASE + 0x500);
        assert_eq!(binary.exports["bar"], TEST_BASE + 0x500);
        assert_eq!(binary.exports["baz"], TEST_BASE + 0x600);
    }

    #[test]
    fn moved_image_gets_dir64_fixups() {
        // One DIR64 entry at .text+0x10; the relocation block lives in the
        // header region at RVA 0x300.
        let mut raw = vec![0u8; 0x100];
        raw[0x10..0x18].copy_from_slice(&(TEST_BASE + 0x1234).to_le_bytes());

        let mut block = Vec::new();
        block.extend_from_slice(
            ImageBaseRelocation {
                VirtualAddress: 0x1000,
                SizeOfBlock: 12,
            }
            .as_bytes(),
        );
        block.extend_from_slice(&((IMAGE_REL_BASED_DIR64 << 12) | 0x10).to_le_bytes());
        block.extend_from_slice(&0u16.to_le_bytes()); // ABSOLUTE pad entry

        let mut builder = PeBuilder::new(TEST_BASE);
        builder.dll_characteristics = IMAGE_DLLCHARACTERISTICS_DYNAMIC_BASE;
        builder.reloc_dir = Some(ImageDataDirectory {
            VirtualAddress: 0x300,
            Size: block.len() as u32,
        });
        builder.header_blob.push((0x300, block));
        builder.sections.push(SectionSpec {
            virtual_address: 0x1000,
            virtual_size: 0x100,
            raw,
            characteristics: IMAGE_SCN_MEM_READ | IMAGE_SCN_MEM_WRITE,
        });
        let file = builder.build();

        let mut cpu = MockCpu::new();
        cpu.allocate_memory(TEST_BASE, 0x1000, MemoryPermission::READ)
            .unwrap();
        cpu.free_bases = vec![0x2_0000_0000];

        let binary = map_binary(&mut cpu, &file, "moved.dll").unwrap();
        assert_eq!(binary.image_base, 0x2_0000_0000);

        let mut fixed = [0u8; 8];
        cpu.read_memory(0x2_0000_0000 + 0x1010, &mut fixed).unwrap();
        assert_eq!(u64::from_le_bytes(fixed), 0x2_0000_0000 + 0x1234);
    }

    #[test]
    fn unmoved_image_is_not_fixed_up() {
        let mut raw = vec![0u8; 0x100];
        raw[0x10..0x18].copy_from_slice(&(TEST_BASE + 0x1234).to_le_bytes());

        let mut block = Vec::new();
        block.extend_from_slice(
            ImageBaseRelocation {
                VirtualAddress: 0x1000,
                SizeOfBlock: 10,
            }
            .as_bytes(),
        );
        block.extend_from_slice(&((IMAGE_REL_BASED_DIR64 << 12) | 0x10).to_le_bytes());

        let mut builder = PeBuilder::new(TEST_BASE);
        builder.dll_characteristics = IMAGE_DLLCHARACTERISTICS_DYNAMIC_BASE;
        builder.reloc_dir = Some(ImageDataDirectory {
            VirtualAddress: 0x300,
            Size: block.len() as u32,
        });
        builder.header_blob.push((0x300, block));
        builder.sections.push(SectionSpec {
            virtual_address: 0x1000,
            virtual_size: 0x100,
            raw,
            characteristics: IMAGE_SCN_MEM_READ,
        });
        let file = builder.build();

        let mut cpu = MockCpu::new();
        map_binary(&mut cpu, &file, "inplace.dll").unwrap();

        let mut value = [0u8; 8];
        cpu.read_memory(TEST_BASE + 0x1010, &mut value).unwrap();
        assert_eq!(u64::from_le_bytes(value), TEST_BASE + 0x1234);
    }

    #[test]
    fn bss_section_is_protected_without_raw_data() {
        let mut builder = PeBuilder::new(TEST_BASE);
        builder.sections.push(SectionSpec {
            virtual_address: 0x1000,
            virtual_size: 0x800,
            raw: Vec::new(),
            characteristics: IMAGE_SCN_MEM_READ | IMAGE_SCN_MEM_WRITE,
        });
        let file = builder.build();

        let mut cpu = MockCpu::new();
        map_binary(&mut cpu, &file, "bss.exe").unwrap();

        let bss = cpu
            .protections
            .iter()
            .find(|p| p.addr == TEST_BASE + 0x1000)
            .unwrap();
        assert_eq!(bss.size, 0x1000);
        assert_eq!(bss.perms, MemoryPermission::READ_WRITE);
    }

    #[test]
    fn section_without_characteristics_is_unreadable() {
        let mut builder = PeBuilder::new(TEST_BASE);
        builder.sections.push(SectionSpec {
            virtual_address: 0x1000,
            virtual_size: 0x100,
            raw: vec![0xCC; 0x100],
            characteristics: 0,
        });
        let file = builder.build();

        let mut cpu = MockCpu::new();
        map_binary(&mut cpu, &file, "dark.exe").unwrap();

        let section = cpu
            .protections
            .iter()
            .find(|p| p.addr == TEST_BASE + 0x1000)
            .unwrap();
        assert_eq!(section.perms, MemoryPermission::NONE);
    }

    #[test]
    fn garbage_input_is_rejected() {
        let mut cpu = MockCpu::new();
        assert!(matches!(
            map_binary(&mut cpu, &[0u8; 16], "short.bin"),
            Err(PeError::Truncated { .. })
        ));

        let mut not_mz = PeBuilder::new(TEST_BASE).build();
        not_mz[0] = b'E';
        not_mz[1] = b'M';
        assert!(matches!(
            map_binary(&mut cpu, &not_mz, "notmz.bin"),
            Err(PeError::BadDosSignature)
        ));

        let mut bad_nt = PeBuilder::new(TEST_BASE).build();
        bad_nt[0x40] = 0;
        assert!(matches!(
            map_binary(&mut cpu, &bad_nt, "badnt.bin"),
            Err(PeError::BadNtSignature)
        ));
    }
}
