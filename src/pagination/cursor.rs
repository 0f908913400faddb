//! Page cursors: where the next request of a job goes
//!
//! Each strategy keeps its own position state in one variant of
//! [`PageCursor`]. The engine asks the cursor for the request URL, fetches the
//! page, and then asks it to advance; `None` from [`PageCursor::advance`]
//! means the source has no further pages.

use crate::pagination::extract::extract_cursor;
use crate::pagination::link_header::find_link;
use crate::pagination::{PaginationConfig, PaginationStrategy};
use reqwest::header::HeaderMap;
use serde_json::Value;
use url::Url;

/// Position within a paginated endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageCursor {
    /// The only page of a non-paginated endpoint
    Single,

    /// Item offset of the next page
    Offset { offset: u64 },

    /// Page number of the next page
    PageNumber { page: u64 },

    /// Token for the next page; `None` on the first request
    Cursor { token: Option<String> },

    /// URL of the next page; `None` on the first request
    Link { url: Option<Url> },
}

impl PageCursor {
    /// Cursor for the first page of an attempt
    pub fn initial(strategy: &PaginationStrategy) -> Self {
        match strategy {
            PaginationStrategy::None => Self::Single,
            PaginationStrategy::Offset { .. } => Self::Offset { offset: 0 },
            PaginationStrategy::PageNumber { start_page, .. } => Self::PageNumber {
                page: *start_page,
            },
            PaginationStrategy::Cursor { .. } => Self::Cursor { token: None },
            PaginationStrategy::LinkHeader { .. } => Self::Link { url: None },
        }
    }

    /// Builds the URL of the page this cursor points at
    pub fn request_url(&self, base: &Url, config: &PaginationConfig) -> Url {
        let page_size = config.page_size.to_string();

        match (self, &config.strategy) {
            (
                Self::Offset { offset },
                PaginationStrategy::Offset {
                    offset_param,
                    limit_param,
                },
            ) => with_params(
                base,
                &[
                    (offset_param.as_str(), offset.to_string()),
                    (limit_param.as_str(), page_size),
                ],
            ),
            (
                Self::PageNumber { page },
                PaginationStrategy::PageNumber {
                    page_param,
                    size_param,
                    ..
                },
            ) => {
                let mut params = vec![(page_param.as_str(), page.to_string())];
                if let Some(size_param) = size_param {
                    params.push((size_param.as_str(), page_size));
                }
                with_params(base, &params)
            }
            (
                Self::Cursor { token },
                PaginationStrategy::Cursor {
                    cursor_param,
                    limit_param,
                    ..
                },
            ) => {
                let mut params = Vec::new();
                if let Some(token) = token {
                    params.push((cursor_param.as_str(), token.clone()));
                }
                if let Some(limit_param) = limit_param {
                    params.push((limit_param.as_str(), page_size));
                }
                with_params(base, &params)
            }
            // Continuation links are followed verbatim
            (Self::Link { url: Some(url) }, _) => url.clone(),
            (Self::Link { url: None }, PaginationStrategy::LinkHeader { limit_param, .. }) => {
                match limit_param {
                    Some(limit_param) => with_params(base, &[(limit_param.as_str(), page_size)]),
                    None => base.clone(),
                }
            }
            _ => base.clone(),
        }
    }

    /// Computes the cursor of the page after the one just fetched
    ///
    /// # Arguments
    ///
    /// * `config` - The job's pagination configuration
    /// * `body` - Parsed body of the page just fetched
    /// * `headers` - Response headers of the page just fetched
    /// * `page_url` - URL the page was served from, for resolving relative links
    ///
    /// # Returns
    ///
    /// * `Some(cursor)` - There is a next page
    /// * `None` - The source signalled there are no more pages
    pub fn advance(
        &self,
        config: &PaginationConfig,
        body: &Value,
        headers: &HeaderMap,
        page_url: &Url,
    ) -> Option<PageCursor> {
        match (self, &config.strategy) {
            (Self::Single, _) => None,
            (Self::Offset { offset }, _) => Some(Self::Offset {
                offset: offset + u64::from(config.page_size),
            }),
            (Self::PageNumber { page }, _) => Some(Self::PageNumber { page: page + 1 }),
            (Self::Cursor { token }, PaginationStrategy::Cursor { cursor_pointer, .. }) => {
                let next = extract_cursor(body, cursor_pointer)?;
                // A source that hands back the same token would loop forever
                if token.as_deref() == Some(next.as_str()) {
                    return None;
                }
                Some(Self::Cursor { token: Some(next) })
            }
            (Self::Link { .. }, PaginationStrategy::LinkHeader { rel, .. }) => {
                let target = find_link(headers, rel)?;
                let next = page_url.join(&target).ok()?;
                if &next == page_url {
                    return None;
                }
                Some(Self::Link { url: Some(next) })
            }
            _ => None,
        }
    }
}

/// Returns `base` with the given query parameters set, replacing any existing
/// parameters of the same name
fn with_params(base: &Url, params: &[(&str, String)]) -> Url {
    if params.is_empty() {
        return base.clone();
    }

    let kept: Vec<(String, String)> = base
        .query_pairs()
        .filter(|(k, _)| !params.iter().any(|(name, _)| &**k == *name))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let mut url = base.clone();
    {
        let mut query = url.query_pairs_mut();
        query.clear();
        for (k, v) in &kept {
            query.append_pair(k, v);
        }
        for (name, value) in params {
            query.append_pair(name, value);
        }
    }
    url
}
