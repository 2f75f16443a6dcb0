//! Macros for datastream error handling.
//!
//! Readers, transformers and writers build most of their failures through these macros so the
//! resulting [`crate::error::EtlError`] keeps a static description and an optional detail.

/// Creates an [`crate::error::EtlError`] from error kind and description.
///
/// The optional third argument is rendered with `to_string` and becomes the error detail.
#[macro_export]
macro_rules! etl_error {
    ($kind:expr, $desc:expr) => {
        $crate::error::EtlError::from(($kind, $desc))
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        $crate::error::EtlError::from(($kind, $desc, $detail.to_string()))
    };
}

/// Creates and returns an [`crate::error::EtlError`] from the current function.
#[macro_export]
macro_rules! bail {
    ($kind:expr, $desc:expr) => {
        return Err($crate::etl_error!($kind, $desc))
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        return Err($crate::etl_error!($kind, $desc, $detail))
    };
}
