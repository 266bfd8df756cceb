//! Record Module
//!
//! Types shared by the stores and the cache.
//!
//! ## Responsibilities
//! - `Document`: the generic structured form a record is stored as
//! - `Record`: the encode/decode capability every cached type provides
//! - `RecordIndexEntry`: where a record's body lives on disk

mod index;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;

use crate::error::{AtlasError, Result};

pub use index::{FileHandle, RecordIndexEntry};

/// Generic structured document (a record body before decoding)
pub type Document = serde_json::Value;

/// A type that can be cached by a [`Manager`](crate::manager::Manager)
///
/// The serde derives supply the field mapping at compile time; implementors
/// only name their identity field.
///
/// ```rust,ignore
/// #[derive(Clone, Serialize, Deserialize)]
/// struct Widget {
///     id: String,
///     name: String,
/// }
///
/// impl Record for Widget {
///     fn record_key(&self) -> String {
///         self.id.clone()
///     }
/// }
/// ```
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// The key this record is stored under
    fn record_key(&self) -> String;

    /// Encode into a document
    fn encode(&self) -> Result<Document> {
        serde_json::to_value(self).map_err(|e| AtlasError::Encode {
            key: self.record_key(),
            reason: e.to_string(),
        })
    }

    /// Decode from a document read back under `key`
    fn decode(key: &str, document: &Document) -> Result<Self> {
        Self::deserialize(document).map_err(|e| AtlasError::Decode {
            key: key.to_string(),
            reason: e.to_string(),
            document: Box::new(document.clone()),
        })
    }
}
