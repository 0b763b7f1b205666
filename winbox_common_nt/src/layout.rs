//! Field-offset tables for guest structures.
//!
//! The emulator core decodes raw byte offsets into field names when tracing
//! guest accesses. Rather than pulling in a reflection framework, each guest
//! structure carries a constant `(offset, name)` table built with
//! [`core::mem::offset_of!`], so the table can never drift from the actual
//! layout.

/// A guest structure with a known field-offset table.
///
/// `FIELDS` must be sorted by offset and contain one entry per named field.
/// Reserved padding regions are listed like any other field so that offset
/// decoding degrades gracefully inside them.
pub trait StructLayout {
    /// Display name of the structure (the Windows name, e.g. `"TEB"`).
    const TYPE_NAME: &'static str;

    /// `(byte offset, field name)` pairs in ascending offset order.
    const FIELDS: &'static [(usize, &'static str)];
}

/// Implements [`StructLayout`] for a structure from a field list.
///
/// Offsets come from `offset_of!`, names from `stringify!`. A field whose
/// Rust name differs from its Windows name (keywords, mostly) can be listed
/// as `RustName as "WindowsName"`.
#[macro_export]
macro_rules! struct_layout {
    ($ty:ty, $name:literal, [$($field:ident $(as $display:literal)?),* $(,)?]) => {
        impl $crate::layout::StructLayout for $ty {
            const TYPE_NAME: &'static str = $name;
            const FIELDS: &'static [(usize, &'static str)] = &[
                $($crate::struct_layout!(@entry $ty, $field $(as $display)?),)*
            ];
        }
    };
    (@entry $ty:ty, $field:ident) => {
        (core::mem::offset_of!($ty, $field), stringify!($field))
    };
    (@entry $ty:ty, $field:ident as $display:literal) => {
        (core::mem::offset_of!($ty, $field), $display)
    };
}
