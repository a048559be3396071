// Copyright (C) 2023 Nitrokey GmbH
// SPDX-License-Identifier: LGPL-3.0-only

/// Declares a C-like enum backed by `u8`, with `From<Enum> for u8` and
/// `TryFrom<u8> for Enum` generated from the variant discriminants.
///
/// An optional `#![mask(..)]` inner item restricts which bits of the input
/// byte are considered when converting back from `u8` - used for PCB
/// sub-fields that share a byte with bits owned by other fields.
macro_rules! enum_u8 {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $(#![mask($mask:expr)])?
            $($variant:ident = $value:expr),* $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis enum $name {
            $($variant = $value),*
        }

        impl From<$name> for u8 {
            fn from(value: $name) -> u8 {
                value as u8
            }
        }

        impl core::convert::TryFrom<u8> for $name {
            type Error = ();
            fn try_from(value: u8) -> Result<Self, ()> {
                #[allow(unused_mut, unused_variables)]
                let mut masked = value;
                $(masked &= $mask;)?
                match masked {
                    $($value => Ok(Self::$variant),)*
                    _ => Err(()),
                }
            }
        }
    };
}

pub(crate) use enum_u8;
