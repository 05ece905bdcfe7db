//! Property-based tests for error classification.

use proptest::prelude::*;
use refresh_token_service::error::{
    TOKEN_INTERNAL_ERROR, TOKEN_INVALID, TOKEN_VALIDATION_FAILED,
};
use refresh_token_service::TokenError;

/// Arbitrary error message generator
fn arb_error_message() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 ]{1,100}".prop_map(|s| s)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Reuse detection is indistinguishable from an invalid token to callers.
    #[test]
    fn prop_reuse_renders_as_invalid(reason in arb_error_message(), jti in "[a-f0-9-]{36}") {
        let invalid = TokenError::invalid_token(reason);
        let reuse = TokenError::ReuseDetected { jti };

        prop_assert_eq!(invalid.to_string(), reuse.to_string());
        prop_assert_eq!(invalid.code(), reuse.code());
        prop_assert_eq!(reuse.code(), TOKEN_INVALID);
        prop_assert!(invalid.is_unauthenticated() && reuse.is_unauthenticated());
    }

    /// Invalid token reasons never leak into the rendered message.
    #[test]
    fn prop_invalid_reason_not_exposed(reason in arb_error_message()) {
        let err = TokenError::invalid_token(format!("secret-detail {reason}"));
        prop_assert!(!err.to_string().contains("secret-detail"));
    }

    /// Store and signer failures are internal, caller mistakes are not.
    #[test]
    fn prop_internal_classification(msg in arb_error_message()) {
        for err in [
            TokenError::storage(msg.clone()),
            TokenError::StorageConflict(msg.clone()),
            TokenError::signing(msg.clone()),
            TokenError::ChainCorrupted(msg.clone()),
        ] {
            prop_assert!(err.is_internal());
            prop_assert_eq!(err.code(), TOKEN_INTERNAL_ERROR);
        }

        let validation = TokenError::validation(msg.clone());
        prop_assert!(!validation.is_internal());
        prop_assert_eq!(validation.code(), TOKEN_VALIDATION_FAILED);
        prop_assert!(!TokenError::invalid_token(msg).is_internal());
    }
}
