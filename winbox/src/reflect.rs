// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Offset-to-field-name decoding for guest structures.
//!
//! Consumed only by the tracing hooks; nothing correctness-critical reads
//! these names.

use std::collections::BTreeMap;

use winbox_common_nt::layout::StructLayout;

/// Field-name lookup table for one structure type.
pub struct TypeInfo {
    type_name: &'static str,
    members: BTreeMap<usize, &'static str>,
}

impl TypeInfo {
    /// Build the lookup table for `T`.
    pub fn of<T: StructLayout>() -> Self {
        Self {
            type_name: T::TYPE_NAME,
            members: T::FIELDS.iter().copied().collect(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Decode a byte offset into the enclosing field.
    ///
    /// An exact hit returns the field name; an offset between two fields
    /// returns `"name+delta"` for the preceding one; anything at or past the
    /// last field's offset (and anything in an empty table) returns
    /// `"<N/A>"`.
    pub fn field_name(&self, offset: usize) -> String {
        if let Some(name) = self.members.get(&offset) {
            return (*name).to_string();
        }
        if self.members.range(offset..).next().is_none() {
            return "<N/A>".to_string();
        }
        match self.members.range(..offset).next_back() {
            Some((&field_offset, &name)) => format!("{name}+{}", offset - field_offset),
            None => "<N/A>".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use winbox_common_nt::nt::{Peb, Teb, UnicodeString};

    use super::*;

    #[test]
    fn exact_offsets_decode_to_field_names() {
        let info = TypeInfo::of::<UnicodeString>();
        assert_eq!(info.type_name(), "UNICODE_STRING");
        assert_eq!(info.field_name(0), "Length");
        assert_eq!(info.field_name(2), "MaximumLength");
        assert_eq!(info.field_name(8), "Buffer");
    }

    #[test]
    fn interior_offsets_decode_to_field_plus_delta() {
        let info = TypeInfo::of::<UnicodeString>();
        assert_eq!(info.field_name(3), "MaximumLength+1");
        assert_eq!(info.field_name(12), "<N/A>", "past the last field offset");
    }

    #[test]
    fn known_teb_landmarks() {
        let info = TypeInfo::of::<Teb>();
        assert_eq!(info.field_name(0x00), "NtTib");
        assert_eq!(info.field_name(0x30), "NtTib+48");
        assert_eq!(info.field_name(0x60), "ProcessEnvironmentBlock");
        assert_eq!(info.field_name(0x68), "LastErrorValue");
    }

    #[test]
    fn known_peb_landmarks() {
        let info = TypeInfo::of::<Peb>();
        assert_eq!(info.field_name(0x10), "ImageBaseAddress");
        assert_eq!(info.field_name(0x20), "ProcessParameters");
        assert_eq!(info.field_name(0x14), "ImageBaseAddress+4");
    }

    #[test]
    fn decoding_never_reads_past_the_table() {
        struct Empty;
        impl StructLayout for Empty {
            const TYPE_NAME: &'static str = "EMPTY";
            const FIELDS: &'static [(usize, &'static str)] = &[];
        }

        let info = TypeInfo::of::<Empty>();
        assert_eq!(info.field_name(0), "<N/A>");
        assert_eq!(info.field_name(100), "<N/A>");
    }
}
