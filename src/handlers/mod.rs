//! HTTP request handlers.

mod blobs;
mod jobs;
mod models;
mod recycle;
mod thumbnails;
mod uploads;

pub use blobs::*;
pub use jobs::*;
pub use models::*;
pub use recycle::*;
pub use thumbnails::*;
pub use uploads::*;

use serde::Serialize;
use serde_json::json;

use crate::storage::Page;

/// Serializes a page into the listing envelope.
pub fn page_envelope<T: Serialize>(page: Page<T>) -> serde_json::Value {
    json!({
        "items": page.items,
        "totalCount": page.total_count,
        "page": page.page,
        "pageSize": page.page_size,
        "totalPages": page.total_pages(),
    })
}
