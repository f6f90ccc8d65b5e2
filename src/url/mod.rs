//! URL handling module
//!
//! Builds listing and detail endpoint URLs from a brand's base URI, and
//! renders the exact URL a request was sent to (query parameters included).

use crate::{UrlError, UrlResult};
use std::collections::BTreeMap;
use url::Url;

/// Joins a brand base URI and an API path
///
/// Trailing slashes on the base and empty segments in the path are ignored,
/// so `https://x.test/` + `/cds-au/v1/banking/products` and
/// `https://x.test` + `cds-au/v1/banking/products` produce the same URL.
///
/// # Examples
///
/// ```
/// use cdr_crawler::url::endpoint_url;
///
/// let url = endpoint_url("https://bank.example/api/", "/cds-au/v1/banking/products").unwrap();
/// assert_eq!(url.as_str(), "https://bank.example/api/cds-au/v1/banking/products");
/// ```
pub fn endpoint_url(base_uri: &str, path: &str) -> UrlResult<Url> {
    append_segments(base_uri, path.split('/'))
}

/// Builds the detail URL for one item: `<base>/<path>/<item id>`
///
/// The item id is a single, percent-encoded path segment.
pub fn item_url(base_uri: &str, path: &str, item_id: &str) -> UrlResult<Url> {
    append_segments(base_uri, path.split('/').chain(std::iter::once(item_id)))
}

/// Renders `url` with `params` merged into its query string
///
/// Existing query pairs are kept unless a parameter of the same name replaces
/// them; unparseable input is returned untouched.
pub fn with_query(url: &str, params: &BTreeMap<String, String>) -> String {
    if params.is_empty() {
        return url.to_string();
    }

    let Ok(mut parsed) = Url::parse(url) else {
        return url.to_string();
    };

    let mut pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(key, _)| !params.contains_key(&**key))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    pairs.extend(params.iter().map(|(k, v)| (k.clone(), v.clone())));

    parsed.query_pairs_mut().clear().extend_pairs(pairs);
    parsed.to_string()
}

fn append_segments<'a>(
    base_uri: &str,
    segments: impl Iterator<Item = &'a str>,
) -> UrlResult<Url> {
    let mut url = Url::parse(base_uri.trim()).map_err(|source| UrlError::Parse {
        url: base_uri.to_string(),
        source,
    })?;

    url.path_segments_mut()
        .map_err(|_| UrlError::CannotBeABase(base_uri.to_string()))?
        .pop_if_empty()
        .extend(segments.filter(|segment| !segment.is_empty()));

    Ok(url)
}
