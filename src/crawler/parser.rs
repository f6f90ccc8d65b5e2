//! Payload inspection for listing, detail and directory responses
//!
//! This module only locates what the crawler needs to keep walking:
//! - Pagination metadata (`meta.totalPages`)
//! - Item identifiers and their classification fields
//! - Brand records in the data holder directory
//!
//! Shape problems are never errors here. They surface as `None` (or as a
//! skipped record) and the caller logs and moves on.

use crate::state::ItemObservation;
use serde_json::Value;

/// Key of the sub-brand field on listed items
const SUB_BRAND_KEY: &str = "brand";

/// Declared total page count of a listing page
///
/// Accepts a JSON number or a numeric string. Returns `None` when the field
/// is missing or malformed; callers treat that as a single page.
pub fn total_pages(body: &Value) -> Option<u32> {
    let raw = body.get("meta")?.get("totalPages")?;
    let pages = match raw {
        Value::Number(n) => n.as_u64()?,
        Value::String(s) => s.trim().parse::<u64>().ok()?,
        _ => return None,
    };
    u32::try_from(pages).ok()
}

/// Items listed on one listing page
///
/// Returns `None` when `data.<listing_key>` is not a list. Entries that are
/// not objects, or that lack a usable identifier, are silently left out.
///
/// # Arguments
///
/// * `body` - Decoded listing payload
/// * `listing_key` - Key of the item list inside `data` (e.g. `products`)
/// * `item_id_key` - Identifier key on each item (e.g. `productId`)
/// * `classification_key` - Classification key on each item (e.g. `productCategory`)
pub fn listing_items(
    body: &Value,
    listing_key: &str,
    item_id_key: &str,
    classification_key: &str,
) -> Option<Vec<ItemObservation>> {
    let items = body.get("data")?.get(listing_key)?.as_array()?;

    Some(
        items
            .iter()
            .filter_map(|item| {
                let item = item.as_object()?;
                let item_id = scalar_string(item.get(item_id_key)?)?;
                Some(ItemObservation {
                    item_id,
                    sub_brand: item.get(SUB_BRAND_KEY).and_then(scalar_string),
                    category: item.get(classification_key).and_then(scalar_string),
                })
            })
            .collect(),
    )
}

/// True unless `data.<listing_key>` is a non-empty list
pub fn is_empty_listing(body: Option<&Value>, listing_key: &str) -> bool {
    !body
        .and_then(|b| b.get("data"))
        .and_then(|d| d.get(listing_key))
        .and_then(Value::as_array)
        .is_some_and(|items| !items.is_empty())
}

/// True unless `data` is a non-empty object
pub fn is_empty_detail(body: Option<&Value>) -> bool {
    !body
        .and_then(|b| b.get("data"))
        .and_then(Value::as_object)
        .is_some_and(|detail| !detail.is_empty())
}

/// A brand record from the data holder directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryBrand {
    pub brand_id: String,
    pub brand_name: String,
    pub base_uri: String,
}

/// One record of the directory's `data` list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryRecord {
    Brand(DirectoryBrand),
    /// Not an object, or missing an id, a name or a base URI
    Incomplete { index: usize },
}

/// Brand records of a directory payload, in listing order
///
/// The brand id is `dataHolderBrandId`, falling back to `interimId`.
/// Returns `None` when `data` is not a list.
pub fn directory_records(body: &Value) -> Option<Vec<DirectoryRecord>> {
    let records = body.get("data")?.as_array()?;

    Some(
        records
            .iter()
            .enumerate()
            .map(|(index, record)| {
                directory_brand(record)
                    .map(DirectoryRecord::Brand)
                    .unwrap_or(DirectoryRecord::Incomplete { index })
            })
            .collect(),
    )
}

fn directory_brand(record: &Value) -> Option<DirectoryBrand> {
    let record = record.as_object()?;
    let brand_id = ["dataHolderBrandId", "interimId"]
        .iter()
        .find_map(|key| record.get(*key).and_then(scalar_string))?;
    let brand_name = record.get("brandName").and_then(scalar_string)?;
    let base_uri = record.get("publicBaseUri").and_then(scalar_string)?;

    Some(DirectoryBrand {
        brand_id,
        brand_name,
        base_uri,
    })
}

/// Renders strings and numbers; anything else (or an empty string) is `None`
///
/// Booleans are not identifiers and never become registry keys.
fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
