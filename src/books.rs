//! Book metadata records and the lookup seam used before `AddBook`.
//!
//! Lookups happen outside the reducer. A failed lookup aborts the action
//! before anything is dispatched, so shared state is never touched.

use std::{future::Future, pin::Pin};

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::model::Gift;

/// Resolved book metadata, in the Open Library `jscmd=data` shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    /// Book title; becomes the gift description.
    pub title: String,
    /// Cover images.
    #[serde(default)]
    pub cover: Cover,
    /// External identifiers.
    #[serde(default)]
    pub identifiers: Identifiers,
}

/// Cover image URIs.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Cover {
    /// Medium-size cover URI.
    #[serde(default)]
    pub medium: String,
}

/// Identifier lists.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Identifiers {
    /// ISBN-10 values; the first is the primary id.
    #[serde(default)]
    pub isbn_10: Vec<String>,
}

impl Book {
    /// Primary identifier, used as the gift id.
    pub fn primary_id(&self) -> Option<&str> {
        self.identifiers.isbn_10.first().map(String::as_str)
    }

    /// Derives an unreserved gift, or `None` without a primary id.
    pub fn to_gift(&self) -> Option<Gift> {
        let id = self.primary_id()?;
        Some(Gift::new(id, self.title.clone(), self.cover.medium.clone()))
    }
}

/// Metadata lookup failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    /// Network, decode, or missing-record failure.
    #[error("book lookup for {isbn} failed: {reason}")]
    Failed {
        /// Requested ISBN.
        isbn: String,
        /// Human readable cause.
        reason: String,
    },
}

impl LookupError {
    fn failed(isbn: &str, reason: impl Into<String>) -> Self {
        Self::Failed {
            isbn: isbn.to_string(),
            reason: reason.into(),
        }
    }
}

/// Boxed future returned by [`BookLookup::lookup`].
pub type LookupFuture<'a> = Pin<Box<dyn Future<Output = Result<Book, LookupError>> + Send + 'a>>;

/// Resolves an ISBN to book metadata.
pub trait BookLookup: Send + Sync {
    /// Looks up `isbn`. Implementations must not retry on their own.
    fn lookup<'a>(&'a self, isbn: &'a str) -> LookupFuture<'a>;
}

/// Open Library endpoint for `isbn`.
pub fn open_library_url(isbn: &str) -> String {
    format!("http://openlibrary.org/api/books?bibkeys=ISBN:{isbn}&jscmd=data&format=json")
}

/// Decodes an Open Library `jscmd=data` response body for `isbn`.
pub fn parse_open_library(isbn: &str, body: &[u8]) -> Result<Book, LookupError> {
    let mut root: serde_json::Map<String, Value> =
        serde_json::from_slice(body).map_err(|e| LookupError::failed(isbn, e.to_string()))?;
    let entry = root
        .remove(&format!("ISBN:{isbn}"))
        .ok_or_else(|| LookupError::failed(isbn, "no record in response"))?;
    let book: Book =
        serde_json::from_value(entry).map_err(|e| LookupError::failed(isbn, e.to_string()))?;
    if book.primary_id().is_none() {
        return Err(LookupError::failed(isbn, "record has no isbn_10 identifier"));
    }
    Ok(book)
}

/// Fixed in-memory catalogue.
#[derive(Debug, Clone, Default)]
pub struct StaticBookLookup {
    books: HashMap<String, Book>,
}

impl StaticBookLookup {
    /// Empty catalogue; every lookup fails.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `book` under `isbn`.
    pub fn with_book(mut self, isbn: impl Into<String>, book: Book) -> Self {
        self.books.insert(isbn.into(), book);
        self
    }
}

impl BookLookup for StaticBookLookup {
    fn lookup<'a>(&'a self, isbn: &'a str) -> LookupFuture<'a> {
        Box::pin(async move {
            self.books
                .get(isbn)
                .cloned()
                .ok_or_else(|| LookupError::failed(isbn, "unknown isbn"))
        })
    }
}
