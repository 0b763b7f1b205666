// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! PE32+ on-disk structures and constants.
//!
//! Only what a 64-bit user-mode image mapper needs: DOS and NT headers,
//! section headers, the export directory and the base-relocation blocks.
//! All structures are `#[repr(C, packed)]` views of the file bytes and are
//! read by copy, never by reference.

#![allow(non_snake_case)]

use zerocopy::{FromBytes, Immutable, IntoBytes};

/// `"MZ"`.
pub const IMAGE_DOS_SIGNATURE: u16 = 0x5A4D;
/// `"PE\0\0"`.
pub const IMAGE_NT_SIGNATURE: u32 = 0x0000_4550;
/// PE32+ optional-header magic.
pub const IMAGE_NT_OPTIONAL_HDR64_MAGIC: u16 = 0x20B;

pub const IMAGE_NUMBEROF_DIRECTORY_ENTRIES: usize = 16;
pub const IMAGE_DIRECTORY_ENTRY_EXPORT: usize = 0;
pub const IMAGE_DIRECTORY_ENTRY_BASERELOC: usize = 5;

/// Section can be executed.
pub const IMAGE_SCN_MEM_EXECUTE: u32 = 0x2000_0000;
/// Section can be read.
pub const IMAGE_SCN_MEM_READ: u32 = 0x4000_0000;
/// Section can be written.
pub const IMAGE_SCN_MEM_WRITE: u32 = 0x8000_0000;

/// Image can be rebased at load time.
pub const IMAGE_DLLCHARACTERISTICS_DYNAMIC_BASE: u16 = 0x0040;

/// Relocation entry types (upper four bits of each block entry).
pub const IMAGE_REL_BASED_ABSOLUTE: u16 = 0;
pub const IMAGE_REL_BASED_DIR64: u16 = 10;

/// `IMAGE_DOS_HEADER`.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable)]
pub struct ImageDosHeader {
    pub e_magic: u16,
    pub e_cblp: u16,
    pub e_cp: u16,
    pub e_crlc: u16,
    pub e_cparhdr: u16,
    pub e_minalloc: u16,
    pub e_maxalloc: u16,
    pub e_ss: u16,
    pub e_sp: u16,
    pub e_csum: u16,
    pub e_ip: u16,
    pub e_cs: u16,
    pub e_lfarlc: u16,
    pub e_ovno: u16,
    pub e_res: [u16; 4],
    pub e_oemid: u16,
    pub e_oeminfo: u16,
    pub e_res2: [u16; 10],
    pub e_lfanew: i32,
}

/// `IMAGE_FILE_HEADER`.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable)]
pub struct ImageFileHeader {
    pub Machine: u16,
    pub NumberOfSections: u16,
    pub TimeDateStamp: u32,
    pub PointerToSymbolTable: u32,
    pub NumberOfSymbols: u32,
    pub SizeOfOptionalHeader: u16,
    pub Characteristics: u16,
}

/// `IMAGE_DATA_DIRECTORY`.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default, FromBytes, IntoBytes, Immutable)]
pub struct ImageDataDirectory {
    pub VirtualAddress: u32,
    pub Size: u32,
}

impl ImageDataDirectory {
    /// Whether the directory is present and non-empty.
    pub fn is_present(&self) -> bool {
        self.VirtualAddress != 0 && self.Size != 0
    }
}

/// `IMAGE_OPTIONAL_HEADER64`.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable)]
pub struct ImageOptionalHeader64 {
    pub Magic: u16,
    pub MajorLinkerVersion: u8,
    pub MinorLinkerVersion: u8,
    pub SizeOfCode: u32,
    pub SizeOfInitializedData: u32,
    pub SizeOfUninitializedData: u32,
    pub AddressOfEntryPoint: u32,
    pub BaseOfCode: u32,
    pub ImageBase: u64,
    pub SectionAlignment: u32,
    pub FileAlignment: u32,
    pub MajorOperatingSystemVersion: u16,
    pub MinorOperatingSystemVersion: u16,
    pub MajorImageVersion: u16,
    pub MinorImageVersion: u16,
    pub MajorSubsystemVersion: u16,
    pub MinorSubsystemVersion: u16,
    pub Win32VersionValue: u32,
    pub SizeOfImage: u32,
    pub SizeOfHeaders: u32,
    pub CheckSum: u32,
    pub Subsystem: u16,
    pub DllCharacteristics: u16,
    pub SizeOfStackReserve: u64,
    pub SizeOfStackCommit: u64,
    pub SizeOfHeapReserve: u64,
    pub SizeOfHeapCommit: u64,
    pub LoaderFlags: u32,
    pub NumberOfRvaAndSizes: u32,
    pub DataDirectory: [ImageDataDirectory; IMAGE_NUMBEROF_DIRECTORY_ENTRIES],
}

/// `IMAGE_NT_HEADERS64`.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable)]
pub struct ImageNtHeaders64 {
    pub Signature: u32,
    pub FileHeader: ImageFileHeader,
    pub OptionalHeader: ImageOptionalHeader64,
}

/// `IMAGE_SECTION_HEADER`. `VirtualSize` is the `Misc` union member.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable)]
pub struct ImageSectionHeader {
    pub Name: [u8; 8],
    pub VirtualSize: u32,
    pub VirtualAddress: u32,
    pub SizeOfRawData: u32,
    pub PointerToRawData: u32,
    pub PointerToRelocations: u32,
    pub PointerToLinenumbers: u32,
    pub NumberOfRelocations: u16,
    pub NumberOfLinenumbers: u16,
    pub Characteristics: u32,
}

/// `IMAGE_EXPORT_DIRECTORY`.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable)]
pub struct ImageExportDirectory {
    pub Characteristics: u32,
    pub TimeDateStamp: u32,
    pub MajorVersion: u16,
    pub MinorVersion: u16,
    pub Name: u32,
    pub Base: u32,
    pub NumberOfFunctions: u32,
    pub NumberOfNames: u32,
    pub AddressOfFunctions: u32,
    pub AddressOfNames: u32,
    pub AddressOfNameOrdinals: u32,
}

/// `IMAGE_BASE_RELOCATION`: header of one relocation block, followed by
/// `(SizeOfBlock - 8) / 2` packed `u16` entries.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable)]
pub struct ImageBaseRelocation {
    pub VirtualAddress: u32,
    pub SizeOfBlock: u32,
}

const _: () = {
    use core::mem::size_of;

    assert!(size_of::<ImageDosHeader>() == 0x40);
    assert!(size_of::<ImageFileHeader>() == 0x14);
    assert!(size_of::<ImageOptionalHeader64>() == 0xF0);
    assert!(size_of::<ImageNtHeaders64>() == 0x108);
    assert!(size_of::<ImageSectionHeader>() == 0x28);
    assert!(size_of::<ImageExportDirectory>() == 0x28);
    assert!(size_of::<ImageBaseRelocation>() == 0x8);
};
