use crate::pagination::PaginationError;
use serde::{Deserialize, Serialize};

/// Default number of items requested per page
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// Default page cap when a job does not set one
pub const DEFAULT_MAX_PAGES: u32 = 50;

/// Absolute ceiling on pages per attempt, regardless of configuration
pub const MAX_PAGES_CEILING: u32 = 1000;

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

fn default_max_pages() -> u32 {
    DEFAULT_MAX_PAGES
}

fn default_true() -> bool {
    true
}

fn default_offset_param() -> String {
    "offset".to_string()
}

fn default_limit_param() -> String {
    "limit".to_string()
}

fn default_page_param() -> String {
    "page".to_string()
}

fn default_size_param() -> Option<String> {
    Some("per_page".to_string())
}

fn default_start_page() -> u64 {
    1
}

fn default_cursor_param() -> String {
    "cursor".to_string()
}

fn default_cursor_pointer() -> String {
    "/next_cursor".to_string()
}

fn default_rel() -> String {
    "next".to_string()
}

/// Page-advancement protocol, with its strategy-specific parameter names
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PaginationStrategy {
    /// A single request; the endpoint is not paginated
    None,

    /// `?offset=<n * page_size>&limit=<page_size>`
    Offset {
        #[serde(default = "default_offset_param")]
        offset_param: String,
        #[serde(default = "default_limit_param")]
        limit_param: String,
    },

    /// `?page=<start_page + n>&per_page=<page_size>`
    #[serde(rename = "Page", alias = "PageNumber")]
    PageNumber {
        #[serde(default = "default_page_param")]
        page_param: String,
        #[serde(default = "default_size_param")]
        size_param: Option<String>,
        #[serde(default = "default_start_page")]
        start_page: u64,
    },

    /// Opaque token read from the previous response body
    Cursor {
        #[serde(default = "default_cursor_param")]
        cursor_param: String,
        /// JSON pointer to the next-cursor token in the response body
        #[serde(default = "default_cursor_pointer")]
        cursor_pointer: String,
        #[serde(default)]
        limit_param: Option<String>,
    },

    /// RFC 8288 `Link` response header
    LinkHeader {
        #[serde(default = "default_rel")]
        rel: String,
        #[serde(default)]
        limit_param: Option<String>,
    },
}

impl PaginationStrategy {
    /// Short name used in logs and audit rows
    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Offset { .. } => "offset",
            Self::PageNumber { .. } => "page",
            Self::Cursor { .. } => "cursor",
            Self::LinkHeader { .. } => "link_header",
        }
    }

    /// Returns true if the strategy walks more than one page
    pub fn is_paginated(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// Returns true if page boundaries are derived from item counts
    ///
    /// Only these strategies can tell a short page from the last page, so
    /// stop-on-partial applies to them alone.
    pub fn is_count_based(&self) -> bool {
        matches!(self, Self::Offset { .. } | Self::PageNumber { .. })
    }
}

/// Per-job pagination configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationConfig {
    #[serde(flatten)]
    pub strategy: PaginationStrategy,

    /// Items requested per page
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Page cap for one attempt (clamped to [`MAX_PAGES_CEILING`])
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    /// Static wait between pages (milliseconds)
    #[serde(default)]
    pub delay_ms: u64,

    /// Stop when a page returns no items
    #[serde(default = "default_true")]
    pub stop_on_empty: bool,

    /// Stop when a page returns fewer than `page_size` items
    #[serde(default = "default_true")]
    pub stop_on_partial: bool,

    /// JSON pointer to the item array in each response body
    #[serde(default)]
    pub items_pointer: Option<String>,
}

impl PaginationConfig {
    /// Creates a configuration with default policy fields
    pub fn new(strategy: PaginationStrategy) -> Self {
        Self {
            strategy,
            page_size: DEFAULT_PAGE_SIZE,
            max_pages: DEFAULT_MAX_PAGES,
            delay_ms: 0,
            stop_on_empty: true,
            stop_on_partial: true,
            items_pointer: None,
        }
    }

    /// Page cap actually enforced for an attempt
    pub fn effective_max_pages(&self) -> u32 {
        if self.strategy.is_paginated() {
            self.max_pages.min(MAX_PAGES_CEILING)
        } else {
            1
        }
    }

    /// Validates the configuration
    ///
    /// A job with an invalid configuration can never succeed, so the worker
    /// dead-letters it without retrying.
    pub fn validate(&self) -> Result<(), PaginationError> {
        if self.page_size == 0 {
            return Err(PaginationError::InvalidConfig(
                "page_size must be >= 1".to_string(),
            ));
        }

        if self.max_pages == 0 {
            return Err(PaginationError::InvalidConfig(
                "max_pages must be >= 1".to_string(),
            ));
        }

        if let Some(pointer) = &self.items_pointer {
            validate_pointer("items_pointer", pointer)?;
        }

        match &self.strategy {
            PaginationStrategy::None => {}
            PaginationStrategy::Offset {
                offset_param,
                limit_param,
            } => {
                validate_param("offset_param", offset_param)?;
                validate_param("limit_param", limit_param)?;
                if offset_param == limit_param {
                    return Err(PaginationError::InvalidConfig(format!(
                        "offset_param and limit_param must differ, both are '{}'",
                        offset_param
                    )));
                }
            }
            PaginationStrategy::PageNumber {
                page_param,
                size_param,
                ..
            } => {
                validate_param("page_param", page_param)?;
                if let Some(size_param) = size_param {
                    validate_param("size_param", size_param)?;
                }
            }
            PaginationStrategy::Cursor {
                cursor_param,
                cursor_pointer,
                limit_param,
            } => {
                validate_param("cursor_param", cursor_param)?;
                validate_pointer("cursor_pointer", cursor_pointer)?;
                if let Some(limit_param) = limit_param {
                    validate_param("limit_param", limit_param)?;
                }
            }
            PaginationStrategy::LinkHeader { rel, limit_param } => {
                validate_param("rel", rel)?;
                if let Some(limit_param) = limit_param {
                    validate_param("limit_param", limit_param)?;
                }
            }
        }

        Ok(())
    }
}

fn validate_param(field: &str, value: &str) -> Result<(), PaginationError> {
    if value.trim().is_empty() {
        return Err(PaginationError::InvalidConfig(format!(
            "{} cannot be empty",
            field
        )));
    }
    Ok(())
}

fn validate_pointer(field: &str, pointer: &str) -> Result<(), PaginationError> {
    // RFC 6901: the empty pointer selects the whole document
    if !pointer.is_empty() && !pointer.starts_with('/') {
        return Err(PaginationError::InvalidConfig(format!(
            "{} must be a JSON pointer starting with '/', got '{}'",
            field, pointer
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_offset_from_trigger() {
        let config: PaginationConfig = serde_json::from_str(
            r#"{
                "type": "Offset",
                "page_size": 50,
                "max_pages": 50,
                "delay_ms": 1000,
                "stop_on_empty": true,
                "stop_on_partial": true,
                "offset_param": "_start",
                "limit_param": "_limit"
            }"#,
        )
        .unwrap();

        assert_eq!(
            config.strategy,
            PaginationStrategy::Offset {
                offset_param: "_start".to_string(),
                limit_param: "_limit".to_string(),
            }
        );
        assert_eq!(config.page_size, 50);
        assert_eq!(config.delay_ms, 1000);
    }

    #[test]
    fn test_deserialize_defaults() {
        let config: PaginationConfig = serde_json::from_str(r#"{ "type": "Cursor" }"#).unwrap();
        assert_eq!(config.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(config.max_pages, DEFAULT_MAX_PAGES);
        assert_eq!(config.delay_ms, 0);
        assert!(config.stop_on_empty);
        assert!(config.stop_on_partial);
        assert_eq!(
            config.strategy,
            PaginationStrategy::Cursor {
                cursor_param: "cursor".to_string(),
                cursor_pointer: "/next_cursor".to_string(),
                limit_param: None,
            }
        );
    }

    #[test]
    fn test_page_strategy_accepts_both_names() {
        let page: PaginationConfig = serde_json::from_str(r#"{ "type": "Page" }"#).unwrap();
        let page_number: PaginationConfig =
            serde_json::from_str(r#"{ "type": "PageNumber" }"#).unwrap();
        assert_eq!(page, page_number);

        match page.strategy {
            PaginationStrategy::PageNumber {
                start_page,
                size_param,
                ..
            } => {
                assert_eq!(start_page, 1);
                assert_eq!(size_param.as_deref(), Some("per_page"));
            }
            other => panic!("unexpected strategy {:?}", other),
        }
    }

    #[test]
    fn test_unknown_strategy_rejected() {
        let result = serde_json::from_str::<PaginationConfig>(r#"{ "type": "Scroll" }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_effective_max_pages_is_clamped() {
        let mut config = PaginationConfig::new(PaginationStrategy::Offset {
            offset_param: "offset".to_string(),
            limit_param: "limit".to_string(),
        });
        config.max_pages = 5000;
        assert_eq!(config.effective_max_pages(), MAX_PAGES_CEILING);

        config.max_pages = 5;
        assert_eq!(config.effective_max_pages(), 5);
    }

    #[test]
    fn test_none_strategy_is_single_page() {
        let mut config = PaginationConfig::new(PaginationStrategy::None);
        config.max_pages = 20;
        assert_eq!(config.effective_max_pages(), 1);
    }

    #[test]
    fn test_validate_rejects_zero_page_size() {
        let mut config = PaginationConfig::new(PaginationStrategy::None);
        config.page_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_max_pages() {
        let mut config = PaginationConfig::new(PaginationStrategy::None);
        config.max_pages = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_pointer() {
        let config = PaginationConfig::new(PaginationStrategy::Cursor {
            cursor_param: "cursor".to_string(),
            cursor_pointer: "meta.next".to_string(),
            limit_param: None,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_clashing_offset_params() {
        let config = PaginationConfig::new(PaginationStrategy::Offset {
            offset_param: "n".to_string(),
            limit_param: "n".to_string(),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_stop_on_partial_scope() {
        assert!(PaginationStrategy::Offset {
            offset_param: "o".to_string(),
            limit_param: "l".to_string()
        }
        .is_count_based());
        assert!(!PaginationStrategy::LinkHeader {
            rel: "next".to_string(),
            limit_param: None
        }
        .is_count_based());
        assert!(!PaginationStrategy::None.is_paginated());
    }
}
