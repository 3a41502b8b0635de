//! URL utilities for building generate-content endpoints
//!
//! Base URLs come from user configuration and may carry trailing slashes;
//! model names may or may not carry the `models/` resource prefix.

/// Normalize a base URL by removing trailing slashes
///
/// # Examples
///
/// ```
/// use streamchat::utils::url::normalize_base_url;
///
/// assert_eq!(
///     normalize_base_url("https://generativelanguage.googleapis.com/v1beta/"),
///     "https://generativelanguage.googleapis.com/v1beta"
/// );
/// ```
pub fn normalize_base_url(base_url: &str) -> String {
    base_url.trim().trim_end_matches('/').to_string()
}

/// Join a base URL and an endpoint path without doubling slashes
pub fn construct_api_url(base_url: &str, endpoint: &str) -> String {
    let normalized_base = normalize_base_url(base_url);
    let endpoint = endpoint.trim_start_matches('/');
    format!("{}/{}", normalized_base, endpoint)
}

/// URL of a model method such as `streamGenerateContent`
///
/// # Examples
///
/// ```
/// use streamchat::utils::url::model_method_url;
///
/// assert_eq!(
///     model_method_url("https://example.test/v1beta", "models/gemini-pro", "streamGenerateContent"),
///     "https://example.test/v1beta/models/gemini-pro:streamGenerateContent"
/// );
/// ```
pub fn model_method_url(base_url: &str, model: &str, method: &str) -> String {
    let model = model.trim().trim_start_matches("models/");
    construct_api_url(base_url, &format!("models/{model}:{method}"))
}
