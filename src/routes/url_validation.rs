use url::Url;

use crate::error::AppError;

pub fn validate_http_url(raw: &str) -> Result<Url, AppError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AppError::bad_request(
            "No URL provided. Please provide a valid URL as a query parameter.",
        ));
    }
    let parsed = Url::parse(trimmed)
        .map_err(|err| AppError::bad_request(format!("Invalid URL: {err}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        scheme => Err(AppError::bad_request(format!(
            "Only http and https URLs are allowed, got {scheme}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_http_and_https() {
        assert!(validate_http_url(" https://video.example/watch?v=1 ").is_ok());
        assert!(validate_http_url("http://video.example").is_ok());
    }

    #[test]
    fn rejects_blank_relative_and_other_schemes() {
        for raw in ["", "   ", "not a url", "file:///etc/passwd", "ftp://x.example/a"] {
            assert!(matches!(validate_http_url(raw), Err(AppError::BadRequest(_))), "{raw}");
        }
    }
}
