//! Composable stream primitives: chunking, a paged producer and
//! filter/map/aggregate stages that work on raw arrays and page envelopes
//! alike.

use futures::stream::{self, Stream, StreamExt};
use serde::Serialize;

/// Split `items` into owned chunks of at most `size` elements.
pub fn chunked<T: Clone>(items: &[T], size: usize) -> Vec<Vec<T>> {
    items.chunks(size.max(1)).map(<[T]>::to_vec).collect()
}

/// One page of a paged sequence.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub data: Vec<T>,
    /// Zero-based page number
    pub page: usize,
    pub has_more: bool,
}

/// Lazily yield `items` as pages of `page_size`.
///
/// Finite; every call starts again from page zero.
pub fn pages<T>(items: Vec<T>, page_size: usize) -> impl Stream<Item = Page<T>> {
    let page_size = page_size.max(1);
    stream::unfold((items.into_iter(), 0usize, false), move |(mut rest, page, done)| async move {
        if done {
            return None;
        }
        let data: Vec<T> = rest.by_ref().take(page_size).collect();
        let has_more = rest.len() > 0;
        if data.is_empty() && page > 0 {
            return None;
        }
        Some((
            Page {
                data,
                page,
                has_more,
            },
            (rest, page + 1, !has_more),
        ))
    })
}

/// Input to a transform stage: a plain array or a page envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Batch<T> {
    Raw(Vec<T>),
    Page(Page<T>),
}

impl<T> Batch<T> {
    pub fn items(&self) -> &[T] {
        match self {
            Batch::Raw(items) => items,
            Batch::Page(page) => &page.data,
        }
    }

    pub fn into_items(self) -> Vec<T> {
        match self {
            Batch::Raw(items) => items,
            Batch::Page(page) => page.data,
        }
    }

    /// Keep matching items; page metadata is preserved.
    pub fn filter(self, mut keep: impl FnMut(&T) -> bool) -> Batch<T> {
        match self {
            Batch::Raw(items) => Batch::Raw(items.into_iter().filter(|i| keep(i)).collect()),
            Batch::Page(page) => Batch::Page(Page {
                data: page.data.into_iter().filter(|i| keep(i)).collect(),
                page: page.page,
                has_more: page.has_more,
            }),
        }
    }

    /// Transform every item; page metadata is preserved.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Batch<U> {
        match self {
            Batch::Raw(items) => Batch::Raw(items.into_iter().map(f).collect()),
            Batch::Page(page) => Batch::Page(Page {
                data: page.data.into_iter().map(f).collect(),
                page: page.page,
                has_more: page.has_more,
            }),
        }
    }
}

impl<T> From<Vec<T>> for Batch<T> {
    fn from(items: Vec<T>) -> Self {
        Batch::Raw(items)
    }
}

impl<T> From<Page<T>> for Batch<T> {
    fn from(page: Page<T>) -> Self {
        Batch::Page(page)
    }
}

/// Fold every item of every batch into one accumulator.
pub async fn aggregate<T, A, S>(batches: S, init: A, mut f: impl FnMut(A, T) -> A) -> A
where
    S: Stream<Item = Batch<T>>,
{
    let mut acc = init;
    let mut batches = Box::pin(batches);
    while let Some(batch) = batches.next().await {
        for item in batch.into_items() {
            acc = f(acc, item);
        }
    }
    acc
}
