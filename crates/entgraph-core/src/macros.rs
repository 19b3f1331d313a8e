/// Unwrap an `Outcome::Ok`, returning early with any other variant.
///
/// The error arm accepts anything convertible into the caller's error type.
#[macro_export]
macro_rules! try_outcome {
    ($expr:expr) => {
        match $expr {
            $crate::Outcome::Ok(value) => value,
            $crate::Outcome::Err(err) => return $crate::Outcome::Err(::core::convert::From::from(err)),
            $crate::Outcome::Cancelled(reason) => return $crate::Outcome::Cancelled(reason),
            $crate::Outcome::Panicked(payload) => return $crate::Outcome::Panicked(payload),
        }
    };
}

/// Lift a `Result` into the surrounding `Outcome`-returning function.
#[macro_export]
macro_rules! try_result {
    ($expr:expr) => {
        match $expr {
            ::core::result::Result::Ok(value) => value,
            ::core::result::Result::Err(err) => {
                return $crate::Outcome::Err(::core::convert::From::from(err));
            }
        }
    };
}
