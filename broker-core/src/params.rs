use std::collections::{BTreeSet, HashMap};

use broker_db::model::ForwardCookiePolicy;

use crate::error::CoreError;

/// Splits, trims, and lower-cases a comma-separated domain list. Rejects an
/// empty result.
pub fn parse_domains(raw: &str) -> Result<Vec<String>, CoreError> {
    let domains: Vec<String> = raw
        .split(',')
        .map(|d| d.trim().to_ascii_lowercase())
        .filter(|d| !d.is_empty())
        .collect();
    if domains.is_empty() {
        return Err(CoreError::bad_request("domains must not be empty"));
    }
    Ok(domains)
}

pub fn sorted(domains: &[String]) -> Vec<String> {
    let mut sorted = domains.to_vec();
    sorted.sort();
    sorted
}

/// *Cookie options*: missing → all/[];
/// `""` → none/[]; `*` → all/[]; otherwise whitelist from comma-list.
pub fn cookie_options(forward_cookies: Option<&str>) -> (ForwardCookiePolicy, Vec<String>) {
    match forward_cookies {
        None => (ForwardCookiePolicy::All, vec![]),
        Some(raw) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                (ForwardCookiePolicy::None, vec![])
            } else if trimmed == "*" {
                (ForwardCookiePolicy::All, vec![])
            } else {
                (
                    ForwardCookiePolicy::Whitelist,
                    trimmed.split(',').map(|c| c.trim().to_owned()).filter(|c| !c.is_empty()).collect(),
                )
            }
        }
    }
}

/// *Header options*: missing → []. Otherwise strip spaces and comma-split.
pub fn header_options(forward_headers: Option<&str>) -> Vec<String> {
    match forward_headers {
        None => vec![],
        Some(raw) => raw.split(',').map(|h| h.trim().to_owned()).filter(|h| !h.is_empty()).collect(),
    }
}

/// *Header normalisation*: upper-case, set-deduplicate, sort ascending.
/// Idempotent: normalising twice equals normalising once.
pub fn normalize_headers(headers: &[String]) -> Vec<String> {
    let set: BTreeSet<String> = headers.iter().map(|h| h.to_ascii_uppercase()).collect();
    set.into_iter().collect()
}

pub fn parse_error_responses(raw: Option<&HashMap<String, String>>) -> HashMap<String, String> {
    raw.cloned().unwrap_or_default()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_domains_normalises_case_and_whitespace() {
        assert_eq!(
            parse_domains("foo.example, BAR.example").unwrap(),
            vec!["foo.example".to_owned(), "bar.example".to_owned()]
        );
    }

    #[test]
    fn parse_domains_rejects_empty() {
        assert!(parse_domains("  ,  ").is_err());
    }

    #[test]
    fn cookie_options_missing_is_all() {
        assert_eq!(cookie_options(None), (ForwardCookiePolicy::All, vec![]));
    }

    #[test]
    fn cookie_options_empty_string_is_none() {
        assert_eq!(cookie_options(Some("  ")), (ForwardCookiePolicy::None, vec![]));
    }

    #[test]
    fn cookie_options_star_is_all() {
        assert_eq!(cookie_options(Some("*")), (ForwardCookiePolicy::All, vec![]));
    }

    #[test]
    fn cookie_options_list_is_whitelist() {
        assert_eq!(
            cookie_options(Some("a, b")),
            (ForwardCookiePolicy::Whitelist, vec!["a".to_owned(), "b".to_owned()])
        );
    }

    #[test]
    fn normalize_headers_is_idempotent() {
        let once = normalize_headers(&["host".to_owned(), "X-Foo".to_owned(), "host".to_owned()]);
        let twice = normalize_headers(&once);
        assert_eq!(once, twice);
        assert_eq!(once, vec!["HOST".to_owned(), "X-FOO".to_owned()]);
    }
}
