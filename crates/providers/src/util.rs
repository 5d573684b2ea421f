//! Shared utility functions for provider adapters.

use tourney_domain::error::{Error, Result};

/// Convert a [`reqwest::Error`] into the domain [`Error`] type.
///
/// Timeout errors map to [`Error::Timeout`]; everything else maps to
/// [`Error::Provider`].
pub(crate) fn from_reqwest(provider_id: &str, e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::provider(provider_id, e.to_string())
    }
}

/// Resolve an API key from an environment variable.
pub fn resolve_api_key(env_var: &str) -> Result<String> {
    std::env::var(env_var).map_err(|_| {
        Error::Validation(format!(
            "environment variable '{env_var}' not set or not valid UTF-8"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_api_key_env_var() {
        let var_name = "TOURNEY_TEST_RESOLVE_ENV_KEY";
        std::env::set_var(var_name, "env-secret-value");
        assert_eq!(resolve_api_key(var_name).unwrap(), "env-secret-value");
        std::env::remove_var(var_name);
    }

    #[test]
    fn resolve_api_key_missing() {
        let err = resolve_api_key("TOURNEY_TEST_NONEXISTENT_VAR").unwrap_err();
        assert!(err.is_validation());
    }
}
