//! # Internal Macros
//!
//! Accessor generation for zerocopy header structs that use big-endian
//! wrapper types (`zerocopy::big_endian::{U16, U32, U64}`), which is what
//! every persisted LatticeDB header uses.
//!
//! ```ignore
//! use zerocopy::big_endian::{U16, U64};
//!
//! #[repr(C)]
//! struct Header {
//!     next: U64,
//!     data_len: U16,
//! }
//!
//! impl Header {
//!     zerocopy_be_accessors! {
//!         next: u64,
//!         data_len: u16,
//!     }
//! }
//!
//! // Generates:
//! // pub fn next(&self) -> u64 { self.next.get() }
//! // pub fn set_next(&mut self, val: u64) { self.next = U64::new(val); }
//! // pub fn data_len(&self) -> u16 { self.data_len.get() }
//! // pub fn set_data_len(&mut self, val: u16) { self.data_len = U16::new(val); }
//! ```

/// Generates getter and setter methods for zerocopy big-endian fields.
#[macro_export]
macro_rules! zerocopy_be_accessors {
    (@impl $field:ident, u16) => {
        ::paste::paste! {
            #[inline]
            pub fn $field(&self) -> u16 {
                self.$field.get()
            }

            #[inline]
            pub fn [<set_ $field>](&mut self, val: u16) {
                self.$field = ::zerocopy::big_endian::U16::new(val);
            }
        }
    };
    (@impl $field:ident, u32) => {
        ::paste::paste! {
            #[inline]
            pub fn $field(&self) -> u32 {
                self.$field.get()
            }

            #[inline]
            pub fn [<set_ $field>](&mut self, val: u32) {
                self.$field = ::zerocopy::big_endian::U32::new(val);
            }
        }
    };
    (@impl $field:ident, u64) => {
        ::paste::paste! {
            #[inline]
            pub fn $field(&self) -> u64 {
                self.$field.get()
            }

            #[inline]
            pub fn [<set_ $field>](&mut self, val: u64) {
                self.$field = ::zerocopy::big_endian::U64::new(val);
            }
        }
    };
    ($($field:ident : $ty:tt),* $(,)?) => {
        $(
            $crate::zerocopy_be_accessors!(@impl $field, $ty);
        )*
    };
}
