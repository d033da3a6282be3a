// Error taxonomy for the Mookodi control server. Every fallible
// operation in this crate and in `mookodi-server` returns
// `Result<T, CanonicalError>`; the constructors here pick the
// `CanonicalErrorCode` that corresponds to each kind of failure listed
// in the design (config, hardware, invariant, busy, timeout, aborted,
// filesystem). `to_tonic_status` performs the same boundary conversion
// the RPC handlers need when returning errors to clients.

use canonical_error::{
    aborted_error, deadline_exceeded_error, failed_precondition_error,
    internal_error, invalid_argument_error,
    CanonicalError, CanonicalErrorCode,
};

/// A required configuration key was missing, out of range, or malformed.
/// Raised before any hardware is touched.
pub fn config_error(msg: &str) -> CanonicalError {
    failed_precondition_error(&format!("config error: {}", msg))
}

/// The detector driver, USB stack, or serial link reported a failure.
/// `source` carries the driver/transport-supplied error code or message.
pub fn hardware_error(msg: &str, source: &str) -> CanonicalError {
    internal_error(&format!("hardware error: {} ({})", msg, source))
}

/// A request did not satisfy the detector's whole-pixel or bounds rules.
pub fn invariant_violation(msg: &str) -> CanonicalError {
    invalid_argument_error(&format!("invariant violation: {}", msg))
}

/// A `start_*` call arrived while a worker was already live.
pub fn busy_error(msg: &str) -> CanonicalError {
    aborted_error(&format!("busy: {}", msg))
}

/// A bounded wait (exposure deadline, deploy/stow wait, filter-position
/// wait) exceeded its bound.
pub fn timeout_error(msg: &str) -> CanonicalError {
    deadline_exceeded_error(&format!("timeout: {}", msg))
}

/// An operation was terminated because `abort_exposure` was set.
pub fn aborted_error_kind(msg: &str) -> CanonicalError {
    aborted_error(&format!("aborted: {}", msg))
}

/// A FITS directory could not be created, or a file could not be opened.
pub fn filesystem_error(msg: &str) -> CanonicalError {
    internal_error(&format!("filesystem error: {}", msg))
}

/// Converts a `CanonicalError` into the `tonic::Status` returned to RPC
/// clients. This is the handler-boundary conversion called for by the
/// "exceptions for control flow" redesign note: everywhere else in the
/// server, errors are `Result` values.
pub fn to_tonic_status(err: CanonicalError) -> tonic::Status {
    tonic::Status::new(
        match err.code {
            CanonicalErrorCode::Unknown => tonic::Code::Unknown,
            CanonicalErrorCode::InvalidArgument => tonic::Code::InvalidArgument,
            CanonicalErrorCode::DeadlineExceeded => tonic::Code::DeadlineExceeded,
            CanonicalErrorCode::NotFound => tonic::Code::NotFound,
            CanonicalErrorCode::AlreadyExists => tonic::Code::AlreadyExists,
            CanonicalErrorCode::PermissionDenied => tonic::Code::PermissionDenied,
            CanonicalErrorCode::Unauthenticated => tonic::Code::Unauthenticated,
            CanonicalErrorCode::ResourceExhausted => tonic::Code::ResourceExhausted,
            CanonicalErrorCode::FailedPrecondition => tonic::Code::FailedPrecondition,
            CanonicalErrorCode::Aborted => tonic::Code::Aborted,
            CanonicalErrorCode::OutOfRange => tonic::Code::OutOfRange,
            CanonicalErrorCode::Unimplemented => tonic::Code::Unimplemented,
            CanonicalErrorCode::Internal => tonic::Code::Internal,
            CanonicalErrorCode::Unavailable => tonic::Code::Unavailable,
            CanonicalErrorCode::DataLoss => tonic::Code::DataLoss,
        },
        err.message,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_maps_to_failed_precondition() {
        let e = config_error("missing key ccd.ncols");
        assert_eq!(e.code, CanonicalErrorCode::FailedPrecondition);
        assert!(e.message.contains("ccd.ncols"));
    }

    #[test]
    fn timeout_error_maps_to_deadline_exceeded() {
        let status = to_tonic_status(timeout_error("deploy wait"));
        assert_eq!(status.code(), tonic::Code::DeadlineExceeded);
    }

    #[test]
    fn busy_and_aborted_share_a_code_but_differ_in_message() {
        let busy = busy_error("worker already running");
        let aborted = aborted_error_kind("abort_exposure requested");
        assert_eq!(busy.code, CanonicalErrorCode::Aborted);
        assert_eq!(aborted.code, CanonicalErrorCode::Aborted);
        assert_ne!(busy.message, aborted.message);
    }
}
