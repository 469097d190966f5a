//! Conversions between the neutral wire encodings and the native
//! constants of the host platform.
//!
//! Every enum group converts with a total function in each direction.
//! An unrecognized neutral value maps to an invalid native value so the
//! subsequent native call fails visibly instead of doing something
//! unintended; an unrecognized native value maps to the group's
//! `Unknown` variant.
//!
//! Bitmask groups convert bit-by-bit. Neutral bit positions are fixed
//! by the wire format and never coincide with native positions by
//! accident: an unmapped neutral bit turns into the all-ones native
//! mask, and an unmapped native bit sets the neutral `UNKNOWN` bit.

/// Declares a neutral constant group plus its three converters.
///
/// Duplicate native values are allowed; `h2rpc` resolves them to the
/// first variant listed.
macro_rules! rpc_const_enum {
    (
        $(#[$outer:meta])*
        pub enum $name:ident / $rpc2h:ident / $h2rpc:ident {
            $($variant:ident = $native:expr => $text:expr,)+
            @unknown $unknown:ident => $unknown_native:expr,
        }
    ) => {
        $(#[$outer])*
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
        pub enum $name {
            $($variant,)+
            $unknown,
        }

        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                    $name::$unknown => concat!("<", stringify!($unknown), ">"),
                }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                $name::$unknown
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        pub fn $rpc2h(v: $name) -> libc::c_int {
            match v {
                $($name::$variant => $native,)+
                $name::$unknown => $unknown_native,
            }
        }

        pub fn $h2rpc(v: libc::c_int) -> $name {
            $(
                if v == $native {
                    return $name::$variant;
                }
            )+
            $name::$unknown
        }
    };
}

pub mod address;
pub mod fcntls;
pub mod ioctls;
pub mod netdb;
pub mod polls;
pub mod signals;
pub mod socket;
pub mod win;
