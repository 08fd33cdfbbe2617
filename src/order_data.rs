//! Order-file extraction.
//!
//! Order exports sit directly under each group directory, one file per
//! transaction, recognizable by "Order" in the file name. Each file holds a
//! header plus a flat, document-ordered `<Item>` list. No deduplication
//! happens here; that is the loader's job.

use chrono::NaiveDateTime;
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::master_data::group_dirs;
use crate::vocab::ORDER_FILE_FRAGMENT;
use crate::xml::{self, ExtractError, XmlFile};

/// `<Date>` + `<Time>` of an order header (second resolution).
pub const ORDER_DATE_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

/// One transaction header.
#[derive(Debug, Clone)]
pub struct OrderRecord {
    pub date_time: NaiveDateTime,
    pub filepath: PathBuf,
    pub mode: String,
    pub consecutive_number: i64,
    pub terminal_number: i64,
    pub terminal_name: String,
    pub clerk_number: i64,
    pub customer_number: Option<i64>,
    pub table_number: i64,
}

/// One `<Item>` element, in document order.
#[derive(Debug, Clone)]
pub struct OrderItemRecord {
    pub item_type: i64,
    pub item_number: i64,
    pub name: String,
    pub qty: i64,
    pub value: f64,
    pub option: Option<String>,
}

/// Order export files under every group directory of an organization,
/// sorted for stable re-runs.
pub fn order_files(org_path: &Path) -> io::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for group_dir in group_dirs(org_path)? {
        let entries = match std::fs::read_dir(&group_dir) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(dir = %group_dir.display(), error = %err, "Cannot list group directory");
                continue;
            }
        };
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.contains(ORDER_FILE_FRAGMENT) {
                out.push(path);
            }
        }
    }
    out.sort();
    Ok(out)
}

/// Parse one order file into its header and items.
pub fn extract_order(path: &Path) -> Result<(OrderRecord, Vec<OrderItemRecord>), ExtractError> {
    let file = XmlFile::load(path)?;
    let doc = file.parse()?;
    let root = doc.root_element();

    let date = xml::require_text(root, "Date", path)?;
    let time = xml::require_text(root, "Time", path)?;
    let stamp = format!("{date} {time}");
    let date_time = NaiveDateTime::parse_from_str(&stamp, ORDER_DATE_FORMAT).map_err(|_| {
        ExtractError::BadFieldValue {
            tag: "Date",
            value: stamp,
            path: path.to_path_buf(),
        }
    })?;

    let customer_number = xml::child(root, "Customer").and_then(|c| xml::optional_i64(c, "CustomerID"));

    let order = OrderRecord {
        date_time,
        filepath: path.to_path_buf(),
        mode: xml::require_text(root, "Mode", path)?.to_string(),
        consecutive_number: xml::require_i64(root, "ConsecutiveNo", path)?,
        terminal_number: xml::require_i64(root, "TerminalNo", path)?,
        terminal_name: xml::require_text(root, "TerminalName", path)?.to_string(),
        clerk_number: xml::require_i64(root, "ClerkNo", path)?,
        customer_number,
        table_number: xml::require_i64(root, "TableNo", path)?,
    };

    let mut items = Vec::new();
    for item in root.children().filter(|n| n.has_tag_name("Item")) {
        items.push(OrderItemRecord {
            item_type: xml::require_i64(item, "ItemType", path)?,
            item_number: xml::require_i64(item, "ItemNo", path)?,
            name: xml::require_text(item, "ItemName", path)?.to_string(),
            qty: xml::require_i64(item, "Qty", path)?,
            value: xml::require_f64(item, "Value", path)?,
            option: xml::child_text(item, "Options").map(|s| s.to_string()),
        });
    }

    Ok((order, items))
}
