#[doc(hidden)]
#[macro_export]
macro_rules! dummy {
    ($t:expr) => {
        ()
    };
}

/// Declares a hardware buffer slot enum, with an `ALL` list ordered from the
/// lowest to the highest numbered slot.
#[doc(hidden)]
#[macro_export]
macro_rules! slot_def {
    (
        $(#[doc = $doc:expr])*
        $name:ident => {
            $(
                $(#[doc = $slot_doc:expr])*
                $slot:ident = $n:expr
            ),*
        }
    ) => {
        $(#[doc = $doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        #[cfg_attr(feature = "defmt", derive(defmt::Format))]
        #[cfg_attr(feature = "ufmt", derive(ufmt::derive::uDebug))]
        pub enum $name {
            $(
                $(#[doc = $slot_doc])*
                $slot,
            )*
        }

        impl $name {
            #[doc = concat!("All valid options for [`", stringify!($name), "`].")]
            pub const ALL: [Self; <[_]>::len(&[$($crate::dummy!($slot)),*])] = [$(Self::$slot),*];

            #[doc = concat!("Hardware index of the [`", stringify!($name), "`] slot.")]
            pub const fn index(self) -> u8 {
                match self {
                    $(Self::$slot => $n,)*
                }
            }
        }
    };
}

// Driver tracing. Forwards to `defmt` when the feature is enabled and expands to
// nothing otherwise.

macro_rules! trace {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        defmt::trace!($($arg)*);
    }};
}

macro_rules! debug {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        defmt::debug!($($arg)*);
    }};
}

pub(crate) use {debug, trace};
