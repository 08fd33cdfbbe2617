//! Business vocabularies baked into the POS export format.
//!
//! The terminal firmware identifies entities and behaviors by literal
//! strings and small integer codes. They are collected here, as data, so the
//! business rules built on them stay auditable in one place.

/// Master-file kinds, matched against the document-level `<Name>` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MasterKind {
    FixedTotalizer,
    FreeFunction,
    Group,
    Department,
    Plu,
    Plu2nd,
    Clerk,
    Customer,
    MixMatch,
    Tax,
}

impl MasterKind {
    /// The exact label the exporter writes. "Totaliser" and the plural
    /// "Customers" are the terminal's spellings, not ours.
    pub fn label(self) -> &'static str {
        match self {
            MasterKind::FixedTotalizer => "Fixed Totaliser",
            MasterKind::FreeFunction => "Free Function",
            MasterKind::Group => "Group",
            MasterKind::Department => "Department",
            MasterKind::Plu => "PLU",
            MasterKind::Plu2nd => "PLU 2nd",
            MasterKind::Clerk => "Clerk",
            MasterKind::Customer => "Customers",
            MasterKind::MixMatch => "Mix & Match",
            MasterKind::Tax => "Tax table",
        }
    }
}

/// Order line types as exported in `<ItemType>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemType {
    Plu,
    FreeFunction,
    Text,
    Plu2nd,
    FixedTotal,
}

impl ItemType {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(ItemType::Plu),
            1 => Some(ItemType::FreeFunction),
            2 => Some(ItemType::Text),
            3 => Some(ItemType::Plu2nd),
            4 => Some(ItemType::FixedTotal),
            _ => None,
        }
    }

    pub fn code(self) -> i64 {
        match self {
            ItemType::Plu => 0,
            ItemType::FreeFunction => 1,
            ItemType::Text => 2,
            ItemType::Plu2nd => 3,
            ItemType::FixedTotal => 4,
        }
    }

    /// PLU and PLU-2nd lines are the sellable product lines.
    pub fn is_product(self) -> bool {
        matches!(self, ItemType::Plu | ItemType::Plu2nd)
    }
}

/// Function code of payment-completing free functions (cash, card, ...).
pub const TENDER_FUNCTION_CODE: &str = "TENDER";

/// Function code that forces a negative price in detailed reports.
pub const DEPOSIT_FUNCTION_CODE: &str = "DEPOSIT";

/// Free functions with a fixed quantity of 1 regardless of the stored qty:
/// tender, +, -, +%, -%, no sale, paid out, deposit, media exchange, tip,
/// paid/pay on account, add checks. The terminal does not flag these in the
/// export; the set is a fixed lookup table.
pub const ONE_QTY_FUNCTION_CODES: &[&str] = &[
    "TENDER",
    "+",
    "-",
    "+%",
    "-%",
    "NS",
    "PAID OUT",
    "DEPOSIT",
    "MEDIA EXCHANGE",
    "TIP",
    "PAID ON ACCOUNT",
    "PAY ACCOUNT",
    "ADD CHECKS",
];

/// Master name of the void free function.
pub const VOID_FUNCTION_NAME: &str = "VOID";

/// Line-name prefix the terminal writes on voided lines.
pub const VOID_NAME_PREFIX: &str = "VD:";

/// Display prefix attached to voided products in PLU sales output.
pub const VOID_DISPLAY_PREFIX: &str = "**VOID**";

/// Held (not yet committed) items; excluded from totalizer views.
pub const HOLD_FUNCTION_NAME: &str = "HOLD";

/// Free-text note function; its order lines carry their own display name.
pub const FREE_TEXT_FUNCTION_NAME: &str = "FREE TEXT";

/// Substring identifying cash-type tender lines (e.g. "CASH", "CASH-10").
pub const CASH_NAME_FRAGMENT: &str = "CASH";

/// Text line that follows a cash tender and carries the amount handed back.
pub const CHANGE_LINE_NAME: &str = "CHANGE";

/// Offset added to the last digit of a tender line's `<Options>` field to
/// obtain the in-drawer fixed totalizer number (CAID/CRID/CHID/CQID routing).
pub const MAGIC_INDRAWER_NUMBER: i64 = 3;

/// Substring that marks a group subdirectory inside an organization
/// directory.
pub const GROUP_DIR_FRAGMENT: &str = "group";

/// Substring that marks the master-files subdirectory inside a group
/// directory ("Master Files", "MASTER FILES", ...).
pub const MASTER_DIR_FRAGMENT: &str = "master";

/// Substring that marks an order export file name.
pub const ORDER_FILE_FRAGMENT: &str = "Order";
