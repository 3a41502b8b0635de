//! Authentication utilities for API requests

use crate::core::transport::HttpRequest;

/// Header carrying the credential; the key never appears in the URL.
pub const API_KEY_HEADER: &str = "x-goog-api-key";

/// Attach the credential to an outbound request
pub fn add_auth_headers(request: HttpRequest, api_key: &str) -> HttpRequest {
    request.with_header(API_KEY_HEADER, api_key.trim())
}
