//! Sales statistics over a time window. Read-only.
//!
//! `StatsDataExtractor` scopes every view to one organization and an
//! inclusive `[start, end]` window on the owning order's timestamp. Each
//! view is a single pass over that scoped line set; there is no caching
//! between calls.
//!
//! Money discipline: running sums are re-rounded (2 decimals, half up)
//! after every accumulation, matching the terminal's own running-total
//! behavior. Summing first and rounding once produces different totals;
//! reported history must keep matching the terminal.

use indexmap::IndexMap;
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;

use chrono::NaiveDateTime;

use crate::db::DB_DATE_FORMAT;
use crate::price::{price_from_f64, price_value, round_price, vat_net};
use crate::vocab::{
    ItemType, DEPOSIT_FUNCTION_CODE, FREE_TEXT_FUNCTION_NAME, HOLD_FUNCTION_NAME,
    ONE_QTY_FUNCTION_CODES, TENDER_FUNCTION_CODE, VOID_DISPLAY_PREFIX, VOID_FUNCTION_NAME,
};

/// Cap for the recent-sales feed.
const LAST_SALES_LIMIT: usize = 100;

/// One accumulated bucket of a view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsEntry {
    pub name: String,
    pub price_sum: Decimal,
    pub qty_sum: i64,
}

impl StatsEntry {
    fn zero(name: &str) -> Self {
        Self {
            name: name.to_string(),
            price_sum: Decimal::ZERO,
            qty_sum: 0,
        }
    }
}

/// One row of the recent-sales feed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SaleSummary {
    pub id: i64,
    pub date_time: String,
    pub site: String,
    pub sales_total: Decimal,
}

/// One scoped order line with everything the views need already joined in.
struct ScopedLine {
    id: i64,
    order_id: i64,
    item_type: i64,
    func_number: Option<String>,
    name: String,
    qty: i64,
    value: f64,
    change: Option<f64>,
    free_func_id: Option<i64>,
    free_func_name: Option<String>,
    free_func_code: Option<String>,
    product_entry_id: Option<i64>,
    product_name: Option<String>,
    department_id: Option<i64>,
    department_name: Option<String>,
    group_id: Option<i64>,
    group_name: Option<String>,
    tax_name: Option<String>,
    tax_rate: Option<i64>,
    fixed_total_name: Option<String>,
    clerk_id: Option<i64>,
    clerk_name: Option<String>,
}

impl ScopedLine {
    fn is_product(&self) -> bool {
        ItemType::from_code(self.item_type).is_some_and(ItemType::is_product)
    }

    fn is_tender(&self) -> bool {
        self.item_type == ItemType::FreeFunction.code()
            && self.func_number.as_deref() == Some(TENDER_FUNCTION_CODE)
    }
}

/// Write `price`/`qty` into the bucket keyed `"{entry_id}_{unique_id}"`.
///
/// The incoming price is rounded, added, and the running sum re-rounded
/// after the addition; do not collapse this into a single final rounding.
fn accumulate(
    map: &mut IndexMap<String, StatsEntry>,
    entry_id: &str,
    name: &str,
    price: Decimal,
    qty: i64,
    unique_id: &str,
) {
    let price = round_price(price);
    let key = format!("{entry_id}_{unique_id}");
    let entry = map
        .entry(key)
        .or_insert_with(|| StatsEntry::zero(name));
    entry.price_sum += price;
    entry.qty_sum += qty;
    entry.price_sum = round_price(entry.price_sum);
}

/// Fold one line into the synthetic Gross/Net buckets: product lines feed
/// Gross, tender free-function lines feed Net.
fn accumulate_gross_net(
    map: &mut IndexMap<String, StatsEntry>,
    item_type: i64,
    price: Decimal,
    qty: i64,
    func_number: Option<&str>,
) {
    let bucket = if ItemType::from_code(item_type).is_some_and(ItemType::is_product) {
        "Gross"
    } else if item_type == ItemType::FreeFunction.code()
        && func_number == Some(TENDER_FUNCTION_CODE)
    {
        "Net"
    } else {
        return;
    };

    if let Some(entry) = map.get_mut(bucket) {
        entry.price_sum += price;
        entry.price_sum = round_price(entry.price_sum);
        entry.qty_sum += qty;
    }
}

/// Extracts statistics for one organization over one time window.
pub struct StatsDataExtractor<'a> {
    conn: &'a Connection,
    org_id: i64,
    start: String,
    end: String,
}

impl<'a> StatsDataExtractor<'a> {
    pub fn new(
        conn: &'a Connection,
        org_id: i64,
        start_time: NaiveDateTime,
        end_time: NaiveDateTime,
    ) -> Self {
        Self {
            conn,
            org_id,
            start: start_time.format(DB_DATE_FORMAT).to_string(),
            end: end_time.format(DB_DATE_FORMAT).to_string(),
        }
    }

    /// The scoped line set, in insertion order, with master names joined in.
    /// Product attributes come from whichever of plu/plu_2nd the line
    /// references.
    fn scoped_lines(&self) -> rusqlite::Result<Vec<ScopedLine>> {
        let mut stmt = self.conn.prepare(
            "SELECT ol.id, o.id, ol.item_type, ol.func_number, ol.name, ol.qty, ol.value,
                    ol.change, ol.free_func_id, ff.name, ff.function_number,
                    COALESCE(p.id, p2.id), COALESCE(p.name, p2.name),
                    COALESCE(p.department_id, p2.department_id), d.name,
                    COALESCE(p.group_id, p2.group_id), g.name,
                    t.name, t.rate,
                    ft.name, o.clerk_id, c.name
             FROM order_lines ol
             JOIN orders o ON o.id = ol.order_id
             LEFT JOIN plu p ON p.id = ol.product_id
             LEFT JOIN plu_2nd p2 ON p2.id = ol.product_2nd_id
             LEFT JOIN departments d ON d.id = COALESCE(p.department_id, p2.department_id)
             LEFT JOIN groups g ON g.id = COALESCE(p.group_id, p2.group_id)
             LEFT JOIN taxes t ON t.id = COALESCE(p.tax_id, p2.tax_id)
             LEFT JOIN free_functions ff ON ff.id = ol.free_func_id
             LEFT JOIN fixed_totalizers ft ON ft.id = ol.fixed_total_id
             LEFT JOIN clerks c ON c.id = o.clerk_id
             WHERE o.org_id = ?1 AND o.date_time >= ?2 AND o.date_time <= ?3
             ORDER BY ol.id",
        )?;

        let rows = stmt.query_map(params![self.org_id, self.start, self.end], |r| {
            Ok(ScopedLine {
                id: r.get(0)?,
                order_id: r.get(1)?,
                item_type: r.get(2)?,
                func_number: r.get(3)?,
                name: r.get::<_, Option<String>>(4)?.unwrap_or_default(),
                qty: r.get(5)?,
                value: r.get(6)?,
                change: r.get(7)?,
                free_func_id: r.get(8)?,
                free_func_name: r.get(9)?,
                free_func_code: r.get(10)?,
                product_entry_id: r.get(11)?,
                product_name: r.get(12)?,
                department_id: r.get(13)?,
                department_name: r.get(14)?,
                group_id: r.get(15)?,
                group_name: r.get(16)?,
                tax_name: r.get(17)?,
                tax_rate: r.get(18)?,
                fixed_total_name: r.get(19)?,
                clerk_id: r.get(20)?,
                clerk_name: r.get(21)?,
            })
        })?;

        rows.collect()
    }

    /// Department sales. Product lines only; a product without a department
    /// is excluded from this breakdown.
    pub fn department_sales(&self) -> rusqlite::Result<IndexMap<String, StatsEntry>> {
        let mut map = IndexMap::new();

        for line in self.scoped_lines()? {
            if !line.is_product() {
                continue;
            }
            let (Some(dep_id), Some(dep_name)) = (line.department_id, line.department_name.clone())
            else {
                continue;
            };
            accumulate(
                &mut map,
                &dep_id.to_string(),
                &dep_name,
                price_from_f64(line.value),
                line.qty,
                "",
            );
        }

        Ok(map)
    }

    /// Group sales. Product lines only; a product without a group is
    /// excluded from this breakdown.
    pub fn group_sales(&self) -> rusqlite::Result<IndexMap<String, StatsEntry>> {
        let mut map = IndexMap::new();

        for line in self.scoped_lines()? {
            if !line.is_product() {
                continue;
            }
            let (Some(group_id), Some(group_name)) = (line.group_id, line.group_name.clone())
            else {
                continue;
            };
            accumulate(
                &mut map,
                &group_id.to_string(),
                &group_name,
                price_from_f64(line.value),
                line.qty,
                "",
            );
        }

        Ok(map)
    }

    /// PLU sales. In detailed mode every line is its own entry (keyed by the
    /// order-line id), for single-order receipts; otherwise lines sum per
    /// product. Voided products get a display-name marker.
    pub fn plu_sales(&self, detailed_report: bool) -> rusqlite::Result<IndexMap<String, StatsEntry>> {
        let mut map = IndexMap::new();

        for line in self.scoped_lines()? {
            if !line.is_product() {
                continue;
            }
            let (Some(product_id), Some(product_name)) =
                (line.product_entry_id, line.product_name.clone())
            else {
                continue;
            };

            let unique_id = if detailed_report {
                line.id.to_string()
            } else {
                String::new()
            };

            let display_name = if line.free_func_name.as_deref() == Some(VOID_FUNCTION_NAME) {
                format!("{VOID_DISPLAY_PREFIX}{product_name}")
            } else {
                product_name
            };

            accumulate(
                &mut map,
                &product_id.to_string(),
                &display_name,
                price_value(line.value),
                line.qty,
                &unique_id,
            );
        }

        Ok(map)
    }

    /// Fixed totalizers: always-present Gross/Net buckets, a VAT and a net
    /// (`<Tax> AMT`) bucket per encountered tax, and one bucket per
    /// fixed totalizer that tender lines route into. Held lines are not yet
    /// committed sales and stay out entirely.
    pub fn fixed_totalizers(&self) -> rusqlite::Result<IndexMap<String, StatsEntry>> {
        let mut map = IndexMap::new();
        map.insert("Gross".to_string(), StatsEntry::zero("Gross"));
        map.insert("Net".to_string(), StatsEntry::zero("Net"));

        for line in self.scoped_lines()? {
            if line.free_func_name.as_deref() == Some(HOLD_FUNCTION_NAME) {
                continue;
            }

            let qty = line.qty;
            let mut price = price_value(line.value);

            if line.is_product() {
                // A product without a tax contributes nothing to this view.
                let (Some(tax_name), Some(tax_rate)) = (line.tax_name.clone(), line.tax_rate)
                else {
                    continue;
                };

                let tax_amt_name = format!("{tax_name} AMT");
                let (vat, net_amount) = vat_net(tax_rate, price);

                if map.contains_key(&tax_name) {
                    if let Some(entry) = map.get_mut(&tax_name) {
                        entry.price_sum += vat;
                    }
                    if let Some(entry) = map.get_mut(&tax_amt_name) {
                        entry.price_sum += net_amount;
                    }
                } else {
                    map.insert(
                        tax_name.clone(),
                        StatsEntry {
                            name: tax_name.clone(),
                            price_sum: vat,
                            qty_sum: 0,
                        },
                    );
                    map.insert(
                        tax_amt_name.clone(),
                        StatsEntry {
                            name: tax_amt_name,
                            price_sum: net_amount,
                            qty_sum: 0,
                        },
                    );
                }
            } else if line.is_tender() && line.free_func_id.is_some() {
                // Promo lines can carry item type 1 with no function behind
                // them and a negative value; the free_func_id guard keeps
                // them out.
                if let Some(change) = line.change {
                    price -= price_value(change);
                }
                if let Some(ft_name) = line.fixed_total_name.clone() {
                    accumulate(&mut map, &ft_name, &ft_name, price, qty, "");
                }
            }

            accumulate_gross_net(&mut map, line.item_type, price, qty, line.func_number.as_deref());
        }

        Ok(map)
    }

    /// The most recent sales in the window, newest first, capped at 100.
    /// A sale's total is its tender lines' value net of change.
    pub fn last_100_sales(&self) -> rusqlite::Result<Vec<SaleSummary>> {
        let site: String = self
            .conn
            .query_row(
                "SELECT name FROM organizations WHERE id = ?1",
                [self.org_id],
                |r| r.get(0),
            )
            .optional()?
            .unwrap_or_default();

        let mut totals: HashMap<i64, Decimal> = HashMap::new();
        for line in self.scoped_lines()? {
            if !line.is_tender() {
                continue;
            }
            let total = totals.entry(line.order_id).or_default();
            *total += price_from_f64(line.value);
            if let Some(change) = line.change {
                *total -= price_from_f64(change);
            }
        }

        let mut stmt = self.conn.prepare(
            "SELECT id, date_time FROM orders
             WHERE org_id = ?1 AND date_time >= ?2 AND date_time <= ?3
             ORDER BY date_time DESC
             LIMIT ?4",
        )?;
        let rows = stmt.query_map(
            params![self.org_id, self.start, self.end, LAST_SALES_LIMIT as i64],
            |r| Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?)),
        )?;

        let mut out = Vec::new();
        for row in rows {
            let (order_id, date_time) = row?;
            out.push(SaleSummary {
                id: order_id,
                date_time,
                site: site.clone(),
                sales_total: round_price(totals.get(&order_id).copied().unwrap_or_default()),
            });
        }

        Ok(out)
    }

    /// Tender takings per clerk, net of change.
    pub fn clerks_breakdown(&self) -> rusqlite::Result<IndexMap<String, StatsEntry>> {
        let mut map = IndexMap::new();

        for line in self.scoped_lines()? {
            if !line.is_tender() {
                continue;
            }
            let (Some(clerk_id), Some(clerk_name)) = (line.clerk_id, line.clerk_name.clone())
            else {
                continue;
            };

            let mut price = price_from_f64(line.value);
            if let Some(change) = line.change {
                price -= price_from_f64(change);
            }

            accumulate(
                &mut map,
                &clerk_id.to_string(),
                &clerk_name,
                price,
                line.qty,
                "",
            );
        }

        Ok(map)
    }

    /// Free-function breakdown.
    ///
    /// Summary mode (for the dashboard tables): HOLD and FREE TEXT lines are
    /// left out, the master function name labels the bucket, change is
    /// netted out of cash tenders, and prices/quantities fold to absolute
    /// values so voided corrections read as positive totals.
    ///
    /// Detailed mode (for single-order receipts): nothing is left out, the
    /// line's own literal name labels the bucket (a FREE TEXT line shows its
    /// note text), change stays in, and deposits flip negative.
    pub fn free_functions(
        &self,
        detailed_report: bool,
    ) -> rusqlite::Result<IndexMap<String, StatsEntry>> {
        let mut map = IndexMap::new();

        for line in self.scoped_lines()? {
            let Some(free_func_id) = line.free_func_id else {
                continue;
            };

            let fixed_qty = line
                .free_func_code
                .as_deref()
                .is_some_and(|code| ONE_QTY_FUNCTION_CODES.contains(&code));
            let raw_qty = if fixed_qty { 1 } else { line.qty };
            let qty = raw_qty.abs();
            let mut price = price_from_f64(line.value).abs();

            let name = if !detailed_report {
                let master_name = line.free_func_name.clone().unwrap_or_default();
                if master_name == HOLD_FUNCTION_NAME || master_name == FREE_TEXT_FUNCTION_NAME {
                    continue;
                }
                if let Some(change) = line.change {
                    price -= price_from_f64(change);
                }
                master_name
            } else {
                if line.free_func_code.as_deref() == Some(DEPOSIT_FUNCTION_CODE) {
                    price = -price;
                }
                line.name.clone()
            };

            accumulate(&mut map, &free_func_id.to_string(), &name, price, qty, "");
        }

        Ok(map)
    }

    /// Total change handed back across the window (cash-type tenders).
    pub fn calculate_change(&self) -> rusqlite::Result<Decimal> {
        let mut total = Decimal::ZERO;
        for line in self.scoped_lines()? {
            if line.item_type != ItemType::FreeFunction.code() {
                continue;
            }
            if let Some(change) = line.change {
                total += price_from_f64(change);
            }
        }
        Ok(round_price(total))
    }

    /// Total collected across the window: tender values net of change.
    pub fn calculate_total_sales(&self) -> rusqlite::Result<Decimal> {
        let mut total = Decimal::ZERO;
        for line in self.scoped_lines()? {
            if !line.is_tender() {
                continue;
            }
            total += price_from_f64(line.value);
            if let Some(change) = line.change {
                total -= price_from_f64(change);
            }
        }
        Ok(round_price(total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use rusqlite::params;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn dt(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, DB_DATE_FORMAT).unwrap()
    }

    /// Organization 1 with a small catalog: one tax, one group/department,
    /// two products (CHIPS intentionally orphaned), clerks, a drawer
    /// totalizer, and the business free functions.
    fn setup() -> Connection {
        let conn = db::open_in_memory_for_test();
        conn.execute_batch(
            "INSERT INTO organizations (id, name, data_dir) VALUES (1, 'Kiosk One', '/data/kiosk');
             INSERT INTO taxes (id, org_id, number, date_time, filepath, data_dir, name, rate)
                 VALUES (1, 1, 1, '2019-01-01 00:00:00', 'f', 'd', 'VAT', 20);
             INSERT INTO groups (id, org_id, number, date_time, filepath, data_dir, name)
                 VALUES (1, 1, 1, '2019-01-01 00:00:00', 'f', 'd', 'DRINKS');
             INSERT INTO departments (id, org_id, number, date_time, filepath, data_dir, name, group_id)
                 VALUES (1, 1, 2, '2019-01-01 00:00:00', 'f', 'd', 'KITCHEN', 1);
             INSERT INTO plu (id, org_id, number, date_time, filepath, data_dir, name,
                              group_id, department_id, price, tax_id, mix_match_id)
                 VALUES (1, 1, 11, '2019-01-01 00:00:00', 'f', 'd', 'COLA', 1, 1, 2.50, 1, NULL),
                        (2, 1, 12, '2019-01-01 00:00:00', 'f', 'd', 'CHIPS', NULL, NULL, 1.95, NULL, NULL);
             INSERT INTO clerks (id, org_id, number, date_time, filepath, data_dir, name)
                 VALUES (1, 1, 3, '2019-01-01 00:00:00', 'f', 'd', 'ALICE'),
                        (2, 1, 4, '2019-01-01 00:00:00', 'f', 'd', 'BOB');
             INSERT INTO fixed_totalizers (id, org_id, number, date_time, filepath, data_dir, name)
                 VALUES (1, 1, 3, '2019-01-01 00:00:00', 'f', 'd', 'CAID');
             INSERT INTO free_functions (id, org_id, number, date_time, filepath, data_dir, name, function_number)
                 VALUES (1, 1, 4, '2019-01-01 00:00:00', 'f', 'd', 'CASH', 'TENDER'),
                        (2, 1, 9, '2019-01-01 00:00:00', 'f', 'd', 'VOID', 'VOID'),
                        (3, 1, 5, '2019-01-01 00:00:00', 'f', 'd', 'HOLD', 'HOLD'),
                        (4, 1, 6, '2019-01-01 00:00:00', 'f', 'd', 'FREE TEXT', 'FREE TEXT'),
                        (5, 1, 7, '2019-01-01 00:00:00', 'f', 'd', 'DEPOSIT', 'DEPOSIT'),
                        (6, 1, 8, '2019-01-01 00:00:00', 'f', 'd', 'DISC', '-%');",
        )
        .unwrap();
        conn
    }

    fn insert_order(conn: &Connection, id: i64, date_time: &str, clerk_id: i64) {
        conn.execute(
            "INSERT INTO orders (id, org_id, date_time, consecutive_number, clerk_id)
             VALUES (?1, 1, ?2, ?1, ?3)",
            params![id, date_time, clerk_id],
        )
        .unwrap();
    }

    #[allow(clippy::too_many_arguments)]
    fn insert_line(
        conn: &Connection,
        order_id: i64,
        item_type: i64,
        name: &str,
        qty: i64,
        value: f64,
        product_id: Option<i64>,
        free_func_id: Option<i64>,
        func_number: Option<&str>,
        fixed_total_id: Option<i64>,
        change: Option<f64>,
    ) {
        conn.execute(
            "INSERT INTO order_lines
             (order_id, item_type, func_number, name, qty, value, product_id, free_func_id,
              fixed_total_id, change)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                order_id,
                item_type,
                func_number,
                name,
                qty,
                value,
                product_id,
                free_func_id,
                fixed_total_id,
                change
            ],
        )
        .unwrap();
    }

    /// Standard receipt: 2x COLA, 1x CHIPS, paid with 30.00 cash on an 8.05
    /// change.
    fn standard_receipt(conn: &Connection) {
        insert_order(conn, 1, "2019-02-05 12:00:00", 1);
        insert_line(conn, 1, 0, "COLA", 2, 5.00, Some(1), None, None, None, None);
        insert_line(conn, 1, 0, "CHIPS", 1, 1.95, Some(2), None, None, None, None);
        insert_line(
            conn,
            1,
            1,
            "CASH",
            0,
            30.00,
            None,
            Some(1),
            Some("TENDER"),
            Some(1),
            Some(8.05),
        );
    }

    fn february<'a>(conn: &'a Connection) -> StatsDataExtractor<'a> {
        StatsDataExtractor::new(conn, 1, dt("2019-02-01 00:00:00"), dt("2019-02-28 23:59:59"))
    }

    #[test]
    fn test_accumulate_rounds_after_every_step() {
        let mut map = IndexMap::new();
        for _ in 0..3 {
            accumulate(&mut map, "x", "X", dec("0.005"), 1, "");
        }
        // Per-step half-up: 0.01 + 0.01 + 0.01, not round(0.015) = 0.02.
        assert_eq!(map["x_"].price_sum, dec("0.03"));
        assert_ne!(map["x_"].price_sum, round_price(dec("0.015")));
        assert_eq!(map["x_"].qty_sum, 3);
    }

    #[test]
    fn test_free_function_change_divergence() {
        let conn = setup();
        standard_receipt(&conn);
        let stats = february(&conn);

        // Summary mode nets the change out of the cash tender...
        let summary = stats.free_functions(false).unwrap();
        assert_eq!(summary["1_"].price_sum, dec("21.95"));
        // ...the receipt view shows the gross amount handed over.
        let detailed = stats.free_functions(true).unwrap();
        assert_eq!(detailed["1_"].price_sum, dec("30.00"));

        // Tender is in the fixed-quantity set.
        assert_eq!(summary["1_"].qty_sum, 1);
        assert_eq!(detailed["1_"].qty_sum, 1);
    }

    #[test]
    fn test_hold_exclusion() {
        let conn = setup();
        insert_order(&conn, 2, "2019-02-06 10:00:00", 1);
        insert_line(
            &conn,
            2,
            1,
            "HOLD ",
            0,
            10.30,
            None,
            Some(3),
            Some("HOLD"),
            None,
            None,
        );
        let stats = february(&conn);

        let summary = stats.free_functions(false).unwrap();
        assert!(
            summary.values().all(|e| e.name != "HOLD" && e.name != "HOLD "),
            "held lines stay out of the summary table"
        );

        let detailed = stats.free_functions(true).unwrap();
        assert!(detailed.values().any(|e| e.name == "HOLD "));

        // Held lines never reach the totalizer view either.
        let totals = stats.fixed_totalizers().unwrap();
        assert_eq!(totals["Net"].price_sum, Decimal::ZERO);
    }

    #[test]
    fn test_free_text_aliasing() {
        let conn = setup();
        insert_order(&conn, 2, "2019-02-06 10:00:00", 1);
        insert_line(
            &conn,
            2,
            1,
            "NO SAUCE",
            1,
            0.00,
            None,
            Some(4),
            Some("FREE TEXT"),
            None,
            None,
        );
        let stats = february(&conn);

        let summary = stats.free_functions(false).unwrap();
        assert!(!summary.contains_key("4_"), "FREE TEXT never shows in summary");

        let detailed = stats.free_functions(true).unwrap();
        assert_eq!(detailed["4_"].name, "NO SAUCE");
    }

    #[test]
    fn test_deposit_negates_in_detailed_mode() {
        let conn = setup();
        insert_order(&conn, 2, "2019-02-06 10:00:00", 1);
        insert_line(
            &conn,
            2,
            1,
            "DEPOSIT",
            1,
            4.00,
            None,
            Some(5),
            Some("DEPOSIT"),
            None,
            None,
        );
        let stats = february(&conn);

        let summary = stats.free_functions(false).unwrap();
        assert_eq!(summary["5_"].price_sum, dec("4.00"));
        let detailed = stats.free_functions(true).unwrap();
        assert_eq!(detailed["5_"].price_sum, dec("-4.00"));
    }

    #[test]
    fn test_one_qty_rule_and_absolute_values() {
        let conn = setup();
        insert_order(&conn, 2, "2019-02-06 10:00:00", 1);
        insert_line(
            &conn,
            2,
            1,
            "DISC",
            3,
            -1.50,
            None,
            Some(6),
            Some("-%"),
            None,
            None,
        );
        let stats = february(&conn);

        let summary = stats.free_functions(false).unwrap();
        assert_eq!(summary["6_"].qty_sum, 1, "-% has a fixed quantity of 1");
        assert_eq!(summary["6_"].price_sum, dec("1.50"), "folded positive");
    }

    #[test]
    fn test_fixed_totalizers_gross_net_and_vat() {
        let conn = setup();
        standard_receipt(&conn);
        let stats = february(&conn);
        let totals = stats.fixed_totalizers().unwrap();

        // CHIPS has no tax reference and is excluded from this view; COLA
        // alone feeds Gross.
        assert_eq!(totals["Gross"].price_sum, dec("5.00"));
        assert_eq!(totals["Gross"].qty_sum, 2);

        // Net is the tender minus the change handed back.
        assert_eq!(totals["Net"].price_sum, dec("21.95"));

        // 5.00 gross at 20%: 0.83 VAT, 4.17 net amount.
        assert_eq!(totals["VAT"].price_sum, dec("0.83"));
        assert_eq!(totals["VAT AMT"].price_sum, dec("4.17"));

        // The tender routed into the CAID drawer bucket, net of change.
        assert_eq!(totals["CAID_"].price_sum, dec("21.95"));
    }

    #[test]
    fn test_department_and_group_sales_exclude_orphans() {
        let conn = setup();
        standard_receipt(&conn);
        let stats = february(&conn);

        let departments = stats.department_sales().unwrap();
        assert_eq!(departments.len(), 1, "CHIPS has no department");
        assert_eq!(departments["1_"].name, "KITCHEN");
        assert_eq!(departments["1_"].price_sum, dec("5.00"));
        assert_eq!(departments["1_"].qty_sum, 2);

        let groups = stats.group_sales().unwrap();
        assert_eq!(groups.len(), 1, "CHIPS has no group");
        assert_eq!(groups["1_"].name, "DRINKS");
        assert_eq!(groups["1_"].price_sum, dec("5.00"));
    }

    #[test]
    fn test_plu_sales_summed_and_detailed() {
        let conn = setup();
        insert_order(&conn, 3, "2019-02-07 09:00:00", 1);
        insert_line(&conn, 3, 0, "COLA", 1, 2.50, Some(1), None, None, None, None);
        // Voided repeat of the same product.
        insert_line(
            &conn,
            3,
            0,
            "VD:COLA",
            -1,
            -2.50,
            Some(1),
            Some(2),
            Some("VOID"),
            None,
            None,
        );
        let stats = february(&conn);

        let summed = stats.plu_sales(false).unwrap();
        assert_eq!(summed.len(), 1, "one product, one bucket");
        assert_eq!(summed["1_"].price_sum, dec("0.00"));
        assert_eq!(summed["1_"].qty_sum, 0);

        let detailed = stats.plu_sales(true).unwrap();
        assert_eq!(detailed.len(), 2, "each line is its own entry");
        assert!(detailed.values().any(|e| e.name == "COLA" && e.price_sum == dec("2.50")));
        assert!(detailed
            .values()
            .any(|e| e.name == "**VOID**COLA" && e.price_sum == dec("-2.50")));
    }

    #[test]
    fn test_clerks_breakdown() {
        let conn = setup();
        standard_receipt(&conn);
        insert_order(&conn, 2, "2019-02-06 10:00:00", 2);
        insert_line(
            &conn,
            2,
            1,
            "CASH",
            0,
            10.00,
            None,
            Some(1),
            Some("TENDER"),
            Some(1),
            None,
        );
        let stats = february(&conn);

        let clerks = stats.clerks_breakdown().unwrap();
        assert_eq!(clerks["1_"].name, "ALICE");
        assert_eq!(clerks["1_"].price_sum, dec("21.95"));
        assert_eq!(clerks["2_"].name, "BOB");
        assert_eq!(clerks["2_"].price_sum, dec("10.00"));
    }

    #[test]
    fn test_last_100_sales_order_and_totals() {
        let conn = setup();
        standard_receipt(&conn);
        insert_order(&conn, 2, "2019-02-06 10:00:00", 2);
        insert_line(
            &conn,
            2,
            1,
            "CASH",
            0,
            10.00,
            None,
            Some(1),
            Some("TENDER"),
            Some(1),
            None,
        );
        let stats = february(&conn);

        let sales = stats.last_100_sales().unwrap();
        assert_eq!(sales.len(), 2);
        // Newest first.
        assert_eq!(sales[0].id, 2);
        assert_eq!(sales[0].sales_total, dec("10.00"));
        assert_eq!(sales[1].id, 1);
        assert_eq!(sales[1].sales_total, dec("21.95"));
        assert_eq!(sales[0].site, "Kiosk One");
    }

    #[test]
    fn test_last_100_sales_caps_at_100() {
        let conn = setup();
        for i in 0..105 {
            let date_time = format!("2019-02-10 10:{:02}:{:02}", i / 60, i % 60);
            insert_order(&conn, 100 + i, &date_time, 1);
        }
        let stats = february(&conn);

        let sales = stats.last_100_sales().unwrap();
        assert_eq!(sales.len(), 100, "feed truncates, it does not paginate");
        assert_eq!(sales[0].id, 204, "newest order leads");
        assert_eq!(sales[0].sales_total, Decimal::ZERO);
    }

    #[test]
    fn test_change_and_total_sales_helpers() {
        let conn = setup();
        standard_receipt(&conn);
        let stats = february(&conn);

        assert_eq!(stats.calculate_change().unwrap(), dec("8.05"));
        assert_eq!(stats.calculate_total_sales().unwrap(), dec("21.95"));
    }

    #[test]
    fn test_empty_window_is_valid_and_zero() {
        let conn = setup();
        standard_receipt(&conn);
        let stats = StatsDataExtractor::new(
            &conn,
            1,
            dt("2020-01-01 00:00:00"),
            dt("2020-01-31 23:59:59"),
        );

        assert!(stats.department_sales().unwrap().is_empty());
        assert!(stats.group_sales().unwrap().is_empty());
        assert!(stats.plu_sales(false).unwrap().is_empty());
        assert!(stats.free_functions(false).unwrap().is_empty());
        assert!(stats.clerks_breakdown().unwrap().is_empty());
        assert!(stats.last_100_sales().unwrap().is_empty());
        assert_eq!(stats.calculate_change().unwrap(), Decimal::ZERO);
        assert_eq!(stats.calculate_total_sales().unwrap(), Decimal::ZERO);

        // The totalizer view still renders its synthetic buckets.
        let totals = stats.fixed_totalizers().unwrap();
        assert_eq!(totals.len(), 2);
        assert_eq!(totals["Gross"].price_sum, Decimal::ZERO);
        assert_eq!(totals["Net"].price_sum, Decimal::ZERO);
    }

    #[test]
    fn test_window_bounds_are_inclusive() {
        let conn = setup();
        standard_receipt(&conn);
        // Window collapsed onto the order's own timestamp.
        let stats = StatsDataExtractor::new(
            &conn,
            1,
            dt("2019-02-05 12:00:00"),
            dt("2019-02-05 12:00:00"),
        );

        assert_eq!(stats.calculate_total_sales().unwrap(), dec("21.95"));
    }

    #[test]
    fn test_gross_net_rederivable_from_raw_lines() {
        let conn = setup();
        standard_receipt(&conn);
        insert_order(&conn, 2, "2019-02-06 10:00:00", 2);
        insert_line(&conn, 2, 0, "COLA", 1, 2.50, Some(1), None, None, None, None);
        insert_line(
            &conn,
            2,
            1,
            "CASH",
            0,
            2.50,
            None,
            Some(1),
            Some("TENDER"),
            Some(1),
            None,
        );
        let stats = february(&conn);
        let totals = stats.fixed_totalizers().unwrap();

        // Independently derived: Gross = taxed product values, Net = tender
        // values net of change.
        assert_eq!(totals["Gross"].price_sum, dec("7.50"));
        assert_eq!(totals["Net"].price_sum, dec("24.45"));
    }
}
