use std::collections::BTreeSet;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StatusCodeError {
    #[error("'{token}' is not a valid status code")]
    NotANumber { token: String },
    #[error("status code '{token}' is outside the range 100-599")]
    OutOfRange { token: String },
}

/// Parses a free-text list of extra status codes, e.g. `"404, 429;503"`.
///
/// Tokens are separated by `,` or `;`. Blank input yields an empty set.
pub fn parse_allowed_status_codes(text: &str) -> Result<BTreeSet<u16>, StatusCodeError> {
    let mut codes = BTreeSet::new();
    for raw in text.split([',', ';']) {
        let token = raw.trim();
        if token.is_empty() {
            continue;
        }
        let code: i64 = token.parse().map_err(|_| StatusCodeError::NotANumber {
            token: token.to_string(),
        })?;
        if !(100..=599).contains(&code) {
            return Err(StatusCodeError::OutOfRange {
                token: token.to_string(),
            });
        }
        codes.insert(code as u16);
    }
    Ok(codes)
}

/// 2xx always succeeds; anything else only when it appears in `allowed`.
pub fn is_success_status(status: u16, allowed: Option<&str>) -> bool {
    if (200..=299).contains(&status) {
        return true;
    }
    match allowed {
        Some(text) => parse_allowed_status_codes(text)
            .map(|codes| codes.contains(&status))
            .unwrap_or(false),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mixed_separators() {
        let codes = parse_allowed_status_codes("404, 429;503").unwrap();
        assert_eq!(codes.into_iter().collect::<Vec<_>>(), vec![404, 429, 503]);
    }

    #[test]
    fn blank_input_is_empty_set() {
        assert!(parse_allowed_status_codes("").unwrap().is_empty());
        assert!(parse_allowed_status_codes("   ").unwrap().is_empty());
        assert!(parse_allowed_status_codes(" , ;").unwrap().is_empty());
    }

    #[test]
    fn rejects_non_numeric_token() {
        let err = parse_allowed_status_codes("404,foo").unwrap_err();
        assert_eq!(err, StatusCodeError::NotANumber { token: "foo".into() });
        assert!(!err.to_string().is_empty());
        assert!(err.to_string().contains("foo"));
    }

    #[test]
    fn rejects_out_of_range() {
        assert!(matches!(
            parse_allowed_status_codes("99"),
            Err(StatusCodeError::OutOfRange { .. })
        ));
        assert!(matches!(
            parse_allowed_status_codes("600"),
            Err(StatusCodeError::OutOfRange { .. })
        ));
        assert!(parse_allowed_status_codes("100;599").is_ok());
    }

    #[test]
    fn two_hundreds_always_succeed() {
        assert!(is_success_status(200, None));
        assert!(is_success_status(204, Some("garbage")));
        assert!(is_success_status(299, Some("")));
    }

    #[test]
    fn non_2xx_needs_allow_list() {
        assert!(!is_success_status(404, None));
        assert!(!is_success_status(404, Some("")));
        assert!(is_success_status(404, Some("404,429")));
        assert!(!is_success_status(500, Some("404,429")));
        assert!(!is_success_status(301, Some("301,bogus")));
    }
}
