//! Opaque paging cursors.
//!
//! A bookmark names the last record a query served: one *fragment* per
//! `(table, index)` pair, whose path is the packet's index path followed by
//! the record's unique-key columns, all in string form. The wire form is a
//! base64-wrapped JSON document; hosts treat it as an opaque token.

use crate::error::{Result, StoreError};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// One `(table, index)` continuation point inside a bookmark.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Fragment {
    pub table: String,
    pub index: String,
    /// `(column name, string value)` pairs: the index path levels followed
    /// by the unique-key columns.
    pub path: Vec<(String, String)>,
}

impl Fragment {
    /// Looks up the recorded string value for a column.
    pub fn value(&self, column: &str) -> Option<&str> {
        self.path
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Document {
    fragments: Vec<Fragment>,
}

/// Opaque continuation token for a sorted, limited query.
///
/// Produced by [`Cursor::bookmark`](crate::query::Cursor::bookmark) and
/// consumed by [`Query::after_bookmark`](crate::query::Query::after_bookmark);
/// only this engine produces and understands the token format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bookmark {
    fragments: Vec<Fragment>,
}

impl Bookmark {
    pub(crate) fn new(fragments: Vec<Fragment>) -> Self {
        Self { fragments }
    }

    /// The fragment recorded for a `(table, index)` pair, if any.
    pub(crate) fn fragment_for(&self, table: &str, index: &str) -> Option<&Fragment> {
        self.fragments
            .iter()
            .find(|f| f.table == table && f.index == index)
    }

    /// Serializes the bookmark into its opaque string form.
    pub fn encode(&self) -> String {
        let document = Document {
            fragments: self.fragments.clone(),
        };
        let json = serde_json::to_vec(&document).expect("bookmark document serializes");
        STANDARD.encode(json)
    }

    /// Parses an opaque token produced by [`Bookmark::encode`].
    ///
    /// Any malformed token surfaces as [`StoreError::InvalidBookmark`],
    /// never as a lower-level parse error.
    pub fn decode(token: &str) -> Result<Self> {
        let json = STANDARD
            .decode(token)
            .map_err(|_| StoreError::InvalidBookmark("token is not a bookmark".into()))?;
        let document: Document = serde_json::from_slice(&json)
            .map_err(|_| StoreError::InvalidBookmark("token is not a bookmark".into()))?;
        Ok(Self {
            fragments: document.fragments,
        })
    }
}
