//! RFC 8288 `Link` header parsing

use reqwest::header::{HeaderMap, LINK};

/// One link-value from a `Link` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkValue {
    /// URI reference between the angle brackets, unresolved
    pub target: String,

    /// Lower-cased relation types from the `rel` parameter
    pub rels: Vec<String>,
}

impl LinkValue {
    pub fn has_rel(&self, rel: &str) -> bool {
        self.rels.iter().any(|r| r.eq_ignore_ascii_case(rel))
    }
}

/// Parses a single `Link` header value into its link-values
///
/// Handles multiple comma-separated links, quoted and unquoted `rel` values,
/// and space-separated relation lists (`rel="next last"`). Commas inside the
/// angle brackets or inside quoted parameters do not split links.
pub fn parse_link_header(value: &str) -> Vec<LinkValue> {
    let mut links = Vec::new();
    let mut rest = value;

    while let Some(start) = rest.find('<') {
        let after = &rest[start + 1..];
        let Some(end) = after.find('>') else {
            break;
        };

        let target = after[..end].trim().to_string();
        let tail = &after[end + 1..];

        let mut in_quotes = false;
        let mut split = tail.len();
        for (i, c) in tail.char_indices() {
            match c {
                '"' => in_quotes = !in_quotes,
                ',' if !in_quotes => {
                    split = i;
                    break;
                }
                _ => {}
            }
        }

        let rels = parse_rels(&tail[..split]);
        links.push(LinkValue { target, rels });
        rest = &tail[split..];
    }

    links
}

fn parse_rels(params: &str) -> Vec<String> {
    let mut rels = Vec::new();

    for param in params.split(';') {
        let Some((key, value)) = param.split_once('=') else {
            continue;
        };
        if !key.trim().eq_ignore_ascii_case("rel") {
            continue;
        }
        let value = value.trim().trim_matches('"');
        rels.extend(value.split_whitespace().map(|r| r.to_ascii_lowercase()));
    }

    rels
}

/// Finds the target of the first link with relation `rel` across all `Link`
/// headers of a response
pub fn find_link(headers: &HeaderMap, rel: &str) -> Option<String> {
    headers
        .get_all(LINK)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(parse_link_header)
        .find(|link| link.has_rel(rel))
        .map(|link| link.target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_parse_github_style_header() {
        let header = r#"<https://api.example.com/items?page=2>; rel="next", <https://api.example.com/items?page=5>; rel="last""#;
        let links = parse_link_header(header);

        assert_eq!(links.len(), 2);
        assert_eq!(links[0].target, "https://api.example.com/items?page=2");
        assert!(links[0].has_rel("next"));
        assert!(links[1].has_rel("last"));
    }

    #[test]
    fn test_parse_unquoted_rel() {
        let links = parse_link_header("</items?after=abc>; rel=next");
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].target, "/items?after=abc");
        assert!(links[0].has_rel("next"));
    }

    #[test]
    fn test_parse_multiple_relations() {
        let links = parse_link_header(r#"<https://x.test/p/3>; rel="next last"; title="end""#);
        assert!(links[0].has_rel("next"));
        assert!(links[0].has_rel("last"));
    }

    #[test]
    fn test_comma_inside_target() {
        let links =
            parse_link_header(r#"<https://x.test/items?ids=1,2,3>; rel="next", <https://x.test/a>; rel="prev""#);
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].target, "https://x.test/items?ids=1,2,3");
    }

    #[test]
    fn test_comma_inside_quoted_param() {
        let links = parse_link_header(r#"<https://x.test/2>; title="a, b"; rel="next""#);
        assert_eq!(links.len(), 1);
        assert!(links[0].has_rel("next"));
    }

    #[test]
    fn test_garbage_yields_nothing() {
        assert!(parse_link_header("").is_empty());
        assert!(parse_link_header("not a link header").is_empty());
        assert!(parse_link_header("<unterminated; rel=next").is_empty());
    }

    #[test]
    fn test_find_link_across_headers() {
        let mut headers = HeaderMap::new();
        headers.append(LINK, HeaderValue::from_static(r#"<https://x.test/1>; rel="prev""#));
        headers.append(LINK, HeaderValue::from_static(r#"<https://x.test/3>; rel="next""#));

        assert_eq!(
            find_link(&headers, "next").as_deref(),
            Some("https://x.test/3")
        );
        assert_eq!(find_link(&headers, "NEXT").as_deref(), Some("https://x.test/3"));
        assert_eq!(find_link(&headers, "last"), None);
    }
}
