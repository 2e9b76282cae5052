//! Offset and cursor pagination shared by every search backend.
//!
//! A cursor is the hex encoding of `offset:<n>`, so it survives URLs and
//! query strings unchanged.

use crate::error::{AppError, Result};
use crate::models::{PageRequest, Pagination, PaginationConfig, PaginationKind};

const CURSOR_PREFIX: &str = "offset:";

pub fn encode_cursor(offset: usize) -> String {
    hex::encode(format!("{CURSOR_PREFIX}{offset}"))
}

pub fn decode_cursor(cursor: &str) -> Result<usize> {
    let bytes = hex::decode(cursor)
        .map_err(|e| AppError::validation(format!("invalid cursor: {e}")))?;
    let text = String::from_utf8(bytes)
        .map_err(|e| AppError::validation(format!("invalid cursor: {e}")))?;
    text.strip_prefix(CURSOR_PREFIX)
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| AppError::validation(format!("invalid cursor: {text}")))
}

/// Resolves page requests against the configured limits.
#[derive(Debug, Clone)]
pub struct Paginator {
    default_limit: usize,
    max_limit: usize,
}

impl Paginator {
    pub fn new(config: &PaginationConfig) -> Self {
        Self {
            default_limit: config.default_limit.max(1),
            max_limit: config.max_limit.max(1),
        }
    }

    /// Clamp the limit and pick offset or cursor paging.
    ///
    /// A valid cursor overrides `offset`; an invalid one is ignored.
    pub fn request(&self, limit: Option<usize>, offset: usize, cursor: Option<&str>) -> PageRequest {
        let limit = limit.unwrap_or(self.default_limit).clamp(1, self.max_limit);
        match cursor.map(decode_cursor) {
            Some(Ok(offset)) => PageRequest {
                kind: PaginationKind::Cursor,
                limit,
                offset,
            },
            Some(Err(e)) => {
                log::warn!("{}; falling back to offset {}", e, offset);
                PageRequest {
                    kind: PaginationKind::Offset,
                    limit,
                    offset,
                }
            }
            None => PageRequest {
                kind: PaginationKind::Offset,
                limit,
                offset,
            },
        }
    }

    /// Slice one page out of the full sorted list.
    pub fn paginate<T>(&self, items: Vec<T>, request: &PageRequest) -> (Vec<T>, Pagination) {
        let total = items.len();
        let page: Vec<T> = items
            .into_iter()
            .skip(request.offset)
            .take(request.limit)
            .collect();
        let end = request.offset.saturating_add(page.len());
        let has_more = end < total;

        let pagination = Pagination {
            kind: request.kind,
            limit: request.limit,
            offset: request.offset,
            cursor: (request.kind == PaginationKind::Cursor).then(|| encode_cursor(request.offset)),
            next_cursor: has_more.then(|| encode_cursor(end)),
            total,
            has_more,
        };
        (page, pagination)
    }
}
