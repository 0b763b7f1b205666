//! Crate-local helpers for building synthetic PE32+ images in tests.

use winbox_common_nt::pe::{
    IMAGE_DIRECTORY_ENTRY_BASERELOC, IMAGE_DIRECTORY_ENTRY_EXPORT, IMAGE_DOS_SIGNATURE,
    IMAGE_NT_OPTIONAL_HDR64_MAGIC, IMAGE_NT_SIGNATURE, ImageDataDirectory, ImageDosHeader,
    ImageExportDirectory, ImageFileHeader, ImageNtHeaders64, ImageOptionalHeader64,
    ImageSectionHeader,
};
use zerocopy::{FromZeros, IntoBytes};

pub(crate) const HEADERS_SIZE: u32 = 0x400;

pub(crate) struct SectionSpec {
    pub virtual_address: u32,
    pub virtual_size: u32,
    pub raw: Vec<u8>,
    pub characteristics: u32,
}

/// Builds a minimal PE32+ file in memory.
///
/// Raw section data is laid out after the headers at ascending file offsets.
/// Bytes placed via `header_blob` land inside the header region, which the
/// mapper copies verbatim, so directory payloads (exports, relocations) can
/// live there with RVA == file offset.
pub(crate) struct PeBuilder {
    pub image_base: u64,
    pub size_of_image: u32,
    pub dll_characteristics: u16,
    pub sections: Vec<SectionSpec>,
    pub header_blob: Vec<(usize, Vec<u8>)>,
    pub export_dir: Option<ImageDataDirectory>,
    pub reloc_dir: Option<ImageDataDirectory>,
}

impl PeBuilder {
    pub fn new(image_base: u64) -> Self {
        Self {
            image_base,
            size_of_image: 0x2000,
            dll_characteristics: 0,
            sections: Vec::new(),
            header_blob: Vec::new(),
            export_dir: None,
            reloc_dir: None,
        }
    }

    /// Add an export payload at RVA 0x200 mapping each `(name, rva)` pair.
    ///
    /// Function RVAs are deduplicated, so aliases resolve to one slot.
    pub fn with_exports(mut self, entries: &[(&str, u32)]) -> Self {
        let dir_rva = 0x200u32;

        let mut functions: Vec<u32> = Vec::new();
        let mut ordinals: Vec<u16> = Vec::new();
        for (_, rva) in entries {
            let slot = match functions.iter().position(|f| f == rva) {
                Some(slot) => slot,
                None => {
                    functions.push(*rva);
                    functions.len() - 1
                }
            };
            ordinals.push(slot as u16);
        }

        let functions_rva = dir_rva + size_of::<ImageExportDirectory>() as u32;
        let names_rva = functions_rva + (functions.len() * 4) as u32;
        let ordinals_rva = names_rva + (entries.len() * 4) as u32;
        let strings_rva = ordinals_rva + (entries.len() * 2) as u32;

        let mut strings = Vec::new();
        let mut name_rvas = Vec::new();
        for (name, _) in entries {
            name_rvas.push(strings_rva + strings.len() as u32);
            strings.extend_from_slice(name.as_bytes());
            strings.push(0);
        }

        let mut export_dir = ImageExportDirectory::new_zeroed();
        export_dir.NumberOfFunctions = functions.len() as u32;
        export_dir.NumberOfNames = entries.len() as u32;
        export_dir.AddressOfFunctions = functions_rva;
        export_dir.AddressOfNames = names_rva;
        export_dir.AddressOfNameOrdinals = ordinals_rva;

        self.header_blob
            .push((dir_rva as usize, export_dir.as_bytes().to_vec()));
        self.header_blob
            .push((functions_rva as usize, functions.as_bytes().to_vec()));
        self.header_blob
            .push((names_rva as usize, name_rvas.as_bytes().to_vec()));
        self.header_blob
            .push((ordinals_rva as usize, ordinals.as_bytes().to_vec()));
        self.header_blob.push((strings_rva as usize, strings));

        self.export_dir = Some(ImageDataDirectory {
            VirtualAddress: dir_rva,
            Size: 0x200,
        });
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut dos = ImageDosHeader::new_zeroed();
        dos.e_magic = IMAGE_DOS_SIGNATURE;
        dos.e_lfanew = 0x40;

        let mut nt = ImageNtHeaders64::new_zeroed();
        nt.Signature = IMAGE_NT_SIGNATURE;
        nt.FileHeader = ImageFileHeader::new_zeroed();
        nt.FileHeader.NumberOfSections = self.sections.len() as u16;
        nt.FileHeader.SizeOfOptionalHeader = size_of::<ImageOptionalHeader64>() as u16;
        nt.OptionalHeader.Magic = IMAGE_NT_OPTIONAL_HDR64_MAGIC;
        nt.OptionalHeader.ImageBase = self.image_base;
        nt.OptionalHeader.SizeOfImage = self.size_of_image;
        nt.OptionalHeader.SizeOfHeaders = HEADERS_SIZE;
        nt.OptionalHeader.DllCharacteristics = self.dll_characteristics;
        let mut directories = nt.OptionalHeader.DataDirectory;
        if let Some(dir) = self.export_dir {
            directories[IMAGE_DIRECTORY_ENTRY_EXPORT] = dir;
        }
        if let Some(dir) = self.reloc_dir {
            directories[IMAGE_DIRECTORY_ENTRY_BASERELOC] = dir;
        }
        nt.OptionalHeader.DataDirectory = directories;

        let mut raw_offset = HEADERS_SIZE;
        let mut file = Vec::new();
        file.extend_from_slice(dos.as_bytes());
        file.extend_from_slice(nt.as_bytes());
        for spec in &self.sections {
            let mut section = ImageSectionHeader::new_zeroed();
            section.Name = *b".sect\0\0\0";
            section.VirtualAddress = spec.virtual_address;
            section.VirtualSize = spec.virtual_size;
            section.SizeOfRawData = spec.raw.len() as u32;
            section.PointerToRawData = if spec.raw.is_empty() { 0 } else { raw_offset };
            section.Characteristics = spec.characteristics;
            raw_offset += spec.raw.len() as u32;
            file.extend_from_slice(section.as_bytes());
        }

        file.resize(HEADERS_SIZE as usize, 0);
        for (offset, bytes) in &self.header_blob {
            file[*offset..*offset + bytes.len()].copy_from_slice(bytes);
        }
        for spec in &self.sections {
            file.extend_from_slice(&spec.raw);
        }
        file
    }
}
