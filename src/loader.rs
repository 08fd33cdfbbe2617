//! Entity resolution and loading.
//!
//! Turns extracted master/order records into relational rows, one
//! organization at a time. Master kinds load in strict dependency order
//! because later kinds resolve natural-number references against rows
//! inserted by earlier steps. Each organization runs inside one
//! transaction; a failure rolls that organization back, is logged, and the
//! run continues with the next one.
//!
//! Natural-number resolution goes through in-memory indexes seeded from
//! already-committed rows and extended on every insert, so re-runs are
//! idempotent and lookups stay O(1).

use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::db::DB_DATE_FORMAT;
use crate::master_data::{
    self, ClerkRecord, CustomerRecord, DepartmentRecord, FixedTotalizerRecord, FreeFunctionRecord,
    GroupRecord, MasterHeader, MixMatchRecord, Plu2ndRecord, PluRecord, TaxRecord,
};
use crate::order_data::{self, OrderItemRecord};
use crate::vocab::{
    ItemType, CHANGE_LINE_NAME, CASH_NAME_FRAGMENT, GROUP_DIR_FRAGMENT, MAGIC_INDRAWER_NUMBER,
    VOID_FUNCTION_NAME, VOID_NAME_PREFIX,
};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("invalid organization directory {}: {reason}", path.display())]
    DirectoryShape { path: PathBuf, reason: &'static str },

    #[error("failed to scan {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

/// Per-organization row counts for one run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OrgLoadStats {
    pub masters_inserted: usize,
    pub masters_skipped: usize,
    pub orders_inserted: usize,
    pub orders_skipped: usize,
    pub lines_inserted: usize,
}

/// Outcome of a whole data-root run.
#[derive(Debug, Default)]
pub struct LoadSummary {
    pub loaded: Vec<(String, OrgLoadStats)>,
    /// Organizations skipped before any insert (invalid directory shape).
    pub skipped: Vec<String>,
    /// Organizations whose load failed and was rolled back.
    pub failed: Vec<(String, String)>,
}

// ---------------------------------------------------------------------------
// Resolution indexes
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct PluRef {
    id: i64,
    mix_match_id: Option<i64>,
}

#[derive(Clone)]
struct FreeFuncRef {
    id: i64,
    function_number: String,
}

/// Number → surrogate-id maps for one organization, seeded from committed
/// rows and extended on every insert.
#[derive(Default)]
struct OrgIndexes {
    taxes: HashMap<i64, i64>,
    groups: HashMap<i64, i64>,
    departments: HashMap<i64, i64>,
    mix_match: HashMap<i64, i64>,
    plu: HashMap<i64, PluRef>,
    plu_keys: HashSet<(i64, String)>,
    plu_2nd: HashMap<i64, i64>,
    plu_2nd_keys: HashSet<(i64, String)>,
    clerks: HashMap<i64, i64>,
    customers: HashMap<i64, i64>,
    fixed_totals: HashMap<i64, i64>,
    fixed_total_names: HashMap<String, i64>,
    free_funcs: HashMap<i64, FreeFuncRef>,
    free_func_names: HashMap<String, FreeFuncRef>,
}

fn seed_number_index(
    conn: &Connection,
    sql: &str,
    org_id: i64,
    map: &mut HashMap<i64, i64>,
) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([org_id], |r| Ok((r.get::<_, i64>(0)?, r.get::<_, i64>(1)?)))?;
    for row in rows {
        let (number, id) = row?;
        map.entry(number).or_insert(id);
    }
    Ok(())
}

fn seed_indexes(conn: &Connection, org_id: i64) -> rusqlite::Result<OrgIndexes> {
    let mut idx = OrgIndexes::default();

    seed_number_index(
        conn,
        "SELECT number, id FROM taxes WHERE org_id = ?1 ORDER BY id",
        org_id,
        &mut idx.taxes,
    )?;
    seed_number_index(
        conn,
        "SELECT number, id FROM groups WHERE org_id = ?1 ORDER BY id",
        org_id,
        &mut idx.groups,
    )?;
    seed_number_index(
        conn,
        "SELECT number, id FROM departments WHERE org_id = ?1 ORDER BY id",
        org_id,
        &mut idx.departments,
    )?;
    seed_number_index(
        conn,
        "SELECT number, id FROM mix_match WHERE org_id = ?1 ORDER BY id",
        org_id,
        &mut idx.mix_match,
    )?;
    seed_number_index(
        conn,
        "SELECT number, id FROM clerks WHERE org_id = ?1 ORDER BY id",
        org_id,
        &mut idx.clerks,
    )?;
    seed_number_index(
        conn,
        "SELECT number, id FROM customers WHERE org_id = ?1 ORDER BY id",
        org_id,
        &mut idx.customers,
    )?;

    {
        let mut stmt = conn.prepare(
            "SELECT number, id, name, mix_match_id FROM plu WHERE org_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map([org_id], |r| {
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, i64>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, Option<i64>>(3)?,
            ))
        })?;
        for row in rows {
            let (number, id, name, mix_match_id) = row?;
            idx.plu_keys.insert((number, name));
            idx.plu.entry(number).or_insert(PluRef { id, mix_match_id });
        }
    }

    {
        let mut stmt =
            conn.prepare("SELECT number, id, name FROM plu_2nd WHERE org_id = ?1 ORDER BY id")?;
        let rows = stmt.query_map([org_id], |r| {
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, i64>(1)?,
                r.get::<_, String>(2)?,
            ))
        })?;
        for row in rows {
            let (number, id, name) = row?;
            idx.plu_2nd_keys.insert((number, name));
            idx.plu_2nd.entry(number).or_insert(id);
        }
    }

    {
        let mut stmt = conn
            .prepare("SELECT number, id, name FROM fixed_totalizers WHERE org_id = ?1 ORDER BY id")?;
        let rows = stmt.query_map([org_id], |r| {
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, i64>(1)?,
                r.get::<_, Option<String>>(2)?,
            ))
        })?;
        for row in rows {
            let (number, id, name) = row?;
            idx.fixed_totals.entry(number).or_insert(id);
            if let Some(name) = name {
                idx.fixed_total_names.entry(name).or_insert(id);
            }
        }
    }

    {
        let mut stmt = conn.prepare(
            "SELECT number, id, name, function_number FROM free_functions
             WHERE org_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map([org_id], |r| {
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, i64>(1)?,
                r.get::<_, Option<String>>(2)?,
                r.get::<_, Option<String>>(3)?,
            ))
        })?;
        for row in rows {
            let (number, id, name, function_number) = row?;
            let fref = FreeFuncRef {
                id,
                function_number: function_number.unwrap_or_default(),
            };
            idx.free_funcs.entry(number).or_insert(fref.clone());
            if let Some(name) = name {
                idx.free_func_names.entry(name).or_insert(fref);
            }
        }
    }

    Ok(idx)
}

// ---------------------------------------------------------------------------
// Directory validation and organization registration
// ---------------------------------------------------------------------------

fn dir_has_entries(path: &Path) -> bool {
    std::fs::read_dir(path)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

/// Validate the expected export layout before any insert: at least one
/// "group" subdirectory and at least one non-empty master-files directory.
pub fn validate_org_dir(org_path: &Path) -> Result<(), LoadError> {
    let groups = master_data::group_dirs(org_path).map_err(|source| LoadError::Io {
        path: org_path.to_path_buf(),
        source,
    })?;

    let has_group_dir = groups.iter().any(|g| {
        g.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.to_lowercase().contains(GROUP_DIR_FRAGMENT))
    });
    if !has_group_dir {
        return Err(LoadError::DirectoryShape {
            path: org_path.to_path_buf(),
            reason: "no group subdirectory",
        });
    }

    let has_master_files = groups
        .iter()
        .filter_map(|g| master_data::master_files_dir(g))
        .any(|mf| dir_has_entries(&mf));
    if !has_master_files {
        return Err(LoadError::DirectoryShape {
            path: org_path.to_path_buf(),
            reason: "no non-empty master files directory",
        });
    }

    Ok(())
}

/// Look up or create the organization row for a data directory.
pub fn ensure_organization(
    conn: &Connection,
    name: &str,
    data_dir: &Path,
) -> Result<i64, rusqlite::Error> {
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM organizations WHERE name = ?1",
            params![name],
            |r| r.get(0),
        )
        .optional()?;
    if let Some(id) = existing {
        return Ok(id);
    }

    conn.execute(
        "INSERT INTO organizations (name, data_dir) VALUES (?1, ?2)",
        params![name, data_dir.to_string_lossy()],
    )?;
    let id = conn.last_insert_rowid();
    info!(org = name, id, "Registered organization");
    Ok(id)
}

// ---------------------------------------------------------------------------
// Whole-run entry point
// ---------------------------------------------------------------------------

/// Load every organization directory under `data_root`.
///
/// Failure isolation is per organization: one broken directory never stops
/// the others. Only a data-root scan failure is fatal.
pub fn load_all(conn: &mut Connection, data_root: &Path) -> Result<LoadSummary, LoadError> {
    let mut org_dirs: Vec<PathBuf> = std::fs::read_dir(data_root)
        .map_err(|source| LoadError::Io {
            path: data_root.to_path_buf(),
            source,
        })?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.is_dir())
        .collect();
    org_dirs.sort();

    let mut summary = LoadSummary::default();

    for org_dir in org_dirs {
        let name = org_dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        if let Err(err) = validate_org_dir(&org_dir) {
            warn!(org = %name, error = %err, "Skipping organization");
            summary.skipped.push(name);
            continue;
        }

        match load_one(conn, &name, &org_dir, data_root) {
            Ok(stats) => {
                info!(
                    org = %name,
                    masters = stats.masters_inserted,
                    orders = stats.orders_inserted,
                    lines = stats.lines_inserted,
                    "Organization loaded"
                );
                summary.loaded.push((name, stats));
            }
            Err(err) => {
                error!(org = %name, error = %err, "Organization load failed, rolled back");
                summary.failed.push((name, err.to_string()));
            }
        }
    }

    Ok(summary)
}

fn load_one(
    conn: &mut Connection,
    name: &str,
    org_path: &Path,
    data_root: &Path,
) -> Result<OrgLoadStats, LoadError> {
    let tx = conn.transaction()?;
    let org_id = ensure_organization(&tx, name, org_path)?;
    let stats = load_organization(&tx, org_id, org_path, data_root)?;
    tx.commit()?;
    Ok(stats)
}

/// Load one organization's master data and orders. The caller provides the
/// transaction boundary.
pub fn load_organization(
    conn: &Connection,
    org_id: i64,
    org_path: &Path,
    data_root: &Path,
) -> Result<OrgLoadStats, LoadError> {
    let mut idx = seed_indexes(conn, org_id)?;
    let mut stats = OrgLoadStats::default();

    insert_taxes(conn, org_id, org_path, data_root, &mut idx, &mut stats)?;
    insert_groups(conn, org_id, org_path, data_root, &mut idx, &mut stats)?;
    insert_departments(conn, org_id, org_path, data_root, &mut idx, &mut stats)?;
    insert_mix_match(conn, org_id, org_path, data_root, &mut idx, &mut stats)?;
    insert_plu(conn, org_id, org_path, data_root, &mut idx, &mut stats)?;
    insert_plu_2nd(conn, org_id, org_path, data_root, &mut idx, &mut stats)?;
    insert_clerks(conn, org_id, org_path, data_root, &mut idx, &mut stats)?;
    insert_customers(conn, org_id, org_path, data_root, &mut idx, &mut stats)?;
    insert_fixed_totalizers(conn, org_id, org_path, data_root, &mut idx, &mut stats)?;
    insert_free_functions(conn, org_id, org_path, data_root, &mut idx, &mut stats)?;
    insert_orders(conn, org_id, org_path, &idx, &mut stats)?;

    Ok(stats)
}

// ---------------------------------------------------------------------------
// Master inserts (dependency order)
// ---------------------------------------------------------------------------

fn fmt_header(header: &MasterHeader) -> (String, String, String) {
    (
        header.date_time.format(DB_DATE_FORMAT).to_string(),
        header.filepath.to_string_lossy().to_string(),
        header.data_dir.to_string_lossy().to_string(),
    )
}

fn insert_taxes(
    conn: &Connection,
    org_id: i64,
    org_path: &Path,
    data_root: &Path,
    idx: &mut OrgIndexes,
    stats: &mut OrgLoadStats,
) -> Result<(), LoadError> {
    for rec in master_data::extract::<TaxRecord>(org_path, data_root) {
        if idx.taxes.contains_key(&rec.number) {
            stats.masters_skipped += 1;
            continue;
        }
        let (date_time, filepath, data_dir) = fmt_header(&rec.header);
        conn.execute(
            "INSERT INTO taxes (org_id, number, date_time, filepath, data_dir, name, rate)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![org_id, rec.number, date_time, filepath, data_dir, rec.name, rec.rate],
        )?;
        idx.taxes.insert(rec.number, conn.last_insert_rowid());
        stats.masters_inserted += 1;
    }
    Ok(())
}

fn insert_groups(
    conn: &Connection,
    org_id: i64,
    org_path: &Path,
    data_root: &Path,
    idx: &mut OrgIndexes,
    stats: &mut OrgLoadStats,
) -> Result<(), LoadError> {
    for rec in master_data::extract::<GroupRecord>(org_path, data_root) {
        if idx.groups.contains_key(&rec.number) {
            stats.masters_skipped += 1;
            continue;
        }
        let (date_time, filepath, data_dir) = fmt_header(&rec.header);
        conn.execute(
            "INSERT INTO groups (org_id, number, date_time, filepath, data_dir, name)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![org_id, rec.number, date_time, filepath, data_dir, rec.name],
        )?;
        idx.groups.insert(rec.number, conn.last_insert_rowid());
        stats.masters_inserted += 1;
    }
    Ok(())
}

fn insert_departments(
    conn: &Connection,
    org_id: i64,
    org_path: &Path,
    data_root: &Path,
    idx: &mut OrgIndexes,
    stats: &mut OrgLoadStats,
) -> Result<(), LoadError> {
    for rec in master_data::extract::<DepartmentRecord>(org_path, data_root) {
        if idx.departments.contains_key(&rec.number) {
            stats.masters_skipped += 1;
            continue;
        }
        let group_id = resolve(&idx.groups, rec.group_number, "group");
        let (date_time, filepath, data_dir) = fmt_header(&rec.header);
        conn.execute(
            "INSERT INTO departments (org_id, number, date_time, filepath, data_dir, name, group_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![org_id, rec.number, date_time, filepath, data_dir, rec.name, group_id],
        )?;
        idx.departments.insert(rec.number, conn.last_insert_rowid());
        stats.masters_inserted += 1;
    }
    Ok(())
}

fn insert_mix_match(
    conn: &Connection,
    org_id: i64,
    org_path: &Path,
    data_root: &Path,
    idx: &mut OrgIndexes,
    stats: &mut OrgLoadStats,
) -> Result<(), LoadError> {
    for rec in master_data::extract::<MixMatchRecord>(org_path, data_root) {
        if idx.mix_match.contains_key(&rec.number) {
            stats.masters_skipped += 1;
            continue;
        }
        let (date_time, filepath, data_dir) = fmt_header(&rec.header);
        conn.execute(
            "INSERT INTO mix_match
             (org_id, number, date_time, filepath, data_dir, name, operation_type, qty_req, amount)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                org_id,
                rec.number,
                date_time,
                filepath,
                data_dir,
                rec.name,
                rec.operation_type,
                rec.qty_req,
                rec.amount
            ],
        )?;
        idx.mix_match.insert(rec.number, conn.last_insert_rowid());
        stats.masters_inserted += 1;
    }
    Ok(())
}

fn insert_plu(
    conn: &Connection,
    org_id: i64,
    org_path: &Path,
    data_root: &Path,
    idx: &mut OrgIndexes,
    stats: &mut OrgLoadStats,
) -> Result<(), LoadError> {
    for rec in master_data::extract::<PluRecord>(org_path, data_root) {
        let key = (rec.number, rec.name.clone());
        if idx.plu_keys.contains(&key) {
            stats.masters_skipped += 1;
            continue;
        }
        let group_id = resolve(&idx.groups, rec.group_number, "group");
        let department_id = resolve(&idx.departments, rec.department_number, "department");
        let tax_id = resolve(&idx.taxes, rec.tax_number, "tax");
        let mix_match_id = rec
            .mix_match_number
            .and_then(|n| resolve(&idx.mix_match, n, "mix-match"));
        let (date_time, filepath, data_dir) = fmt_header(&rec.header);
        conn.execute(
            "INSERT INTO plu
             (org_id, number, date_time, filepath, data_dir, name, group_id, department_id,
              price, tax_id, mix_match_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                org_id,
                rec.number,
                date_time,
                filepath,
                data_dir,
                rec.name,
                group_id,
                department_id,
                rec.price,
                tax_id,
                mix_match_id
            ],
        )?;
        let id = conn.last_insert_rowid();
        idx.plu_keys.insert(key);
        idx.plu
            .entry(rec.number)
            .or_insert(PluRef { id, mix_match_id });
        stats.masters_inserted += 1;
    }
    Ok(())
}

fn insert_plu_2nd(
    conn: &Connection,
    org_id: i64,
    org_path: &Path,
    data_root: &Path,
    idx: &mut OrgIndexes,
    stats: &mut OrgLoadStats,
) -> Result<(), LoadError> {
    for rec in master_data::extract::<Plu2ndRecord>(org_path, data_root) {
        let key = (rec.number, rec.name.clone());
        if idx.plu_2nd_keys.contains(&key) {
            stats.masters_skipped += 1;
            continue;
        }
        let group_id = resolve(&idx.groups, rec.group_number, "group");
        let department_id = resolve(&idx.departments, rec.department_number, "department");
        let tax_id = resolve(&idx.taxes, rec.tax_number, "tax");
        let (date_time, filepath, data_dir) = fmt_header(&rec.header);
        conn.execute(
            "INSERT INTO plu_2nd
             (org_id, number, date_time, filepath, data_dir, name, group_id, department_id,
              price, tax_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                org_id,
                rec.number,
                date_time,
                filepath,
                data_dir,
                rec.name,
                group_id,
                department_id,
                rec.price,
                tax_id
            ],
        )?;
        let id = conn.last_insert_rowid();
        idx.plu_2nd_keys.insert(key);
        idx.plu_2nd.entry(rec.number).or_insert(id);
        stats.masters_inserted += 1;
    }
    Ok(())
}

fn insert_clerks(
    conn: &Connection,
    org_id: i64,
    org_path: &Path,
    data_root: &Path,
    idx: &mut OrgIndexes,
    stats: &mut OrgLoadStats,
) -> Result<(), LoadError> {
    for rec in master_data::extract::<ClerkRecord>(org_path, data_root) {
        if idx.clerks.contains_key(&rec.number) {
            stats.masters_skipped += 1;
            continue;
        }
        let (date_time, filepath, data_dir) = fmt_header(&rec.header);
        conn.execute(
            "INSERT INTO clerks (org_id, number, date_time, filepath, data_dir, name)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![org_id, rec.number, date_time, filepath, data_dir, rec.name],
        )?;
        idx.clerks.insert(rec.number, conn.last_insert_rowid());
        stats.masters_inserted += 1;
    }
    Ok(())
}

fn insert_customers(
    conn: &Connection,
    org_id: i64,
    org_path: &Path,
    data_root: &Path,
    idx: &mut OrgIndexes,
    stats: &mut OrgLoadStats,
) -> Result<(), LoadError> {
    for rec in master_data::extract::<CustomerRecord>(org_path, data_root) {
        if idx.customers.contains_key(&rec.number) {
            stats.masters_skipped += 1;
            continue;
        }
        let (date_time, filepath, data_dir) = fmt_header(&rec.header);
        conn.execute(
            "INSERT INTO customers
             (org_id, number, date_time, filepath, data_dir, first_name, surname,
              addr1, addr2, addr3, postcode, phone, email, overdraft_limit, custgroup_number)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                org_id,
                rec.number,
                date_time,
                filepath,
                data_dir,
                rec.first_name,
                rec.surname,
                rec.addr1,
                rec.addr2,
                rec.addr3,
                rec.postcode,
                rec.phone,
                rec.email,
                rec.overdraft_limit,
                rec.custgroup_number
            ],
        )?;
        idx.customers.insert(rec.number, conn.last_insert_rowid());
        stats.masters_inserted += 1;
    }
    Ok(())
}

fn insert_fixed_totalizers(
    conn: &Connection,
    org_id: i64,
    org_path: &Path,
    data_root: &Path,
    idx: &mut OrgIndexes,
    stats: &mut OrgLoadStats,
) -> Result<(), LoadError> {
    for rec in master_data::extract::<FixedTotalizerRecord>(org_path, data_root) {
        if idx.fixed_totals.contains_key(&rec.number) {
            stats.masters_skipped += 1;
            continue;
        }
        let (date_time, filepath, data_dir) = fmt_header(&rec.header);
        conn.execute(
            "INSERT INTO fixed_totalizers (org_id, number, date_time, filepath, data_dir, name)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![org_id, rec.number, date_time, filepath, data_dir, rec.name],
        )?;
        let id = conn.last_insert_rowid();
        idx.fixed_totals.insert(rec.number, id);
        idx.fixed_total_names.entry(rec.name.clone()).or_insert(id);
        stats.masters_inserted += 1;
    }
    Ok(())
}

fn insert_free_functions(
    conn: &Connection,
    org_id: i64,
    org_path: &Path,
    data_root: &Path,
    idx: &mut OrgIndexes,
    stats: &mut OrgLoadStats,
) -> Result<(), LoadError> {
    for rec in master_data::extract::<FreeFunctionRecord>(org_path, data_root) {
        if idx.free_funcs.contains_key(&rec.number) {
            stats.masters_skipped += 1;
            continue;
        }
        let (date_time, filepath, data_dir) = fmt_header(&rec.header);
        conn.execute(
            "INSERT INTO free_functions
             (org_id, number, date_time, filepath, data_dir, name, function_number)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                org_id,
                rec.number,
                date_time,
                filepath,
                data_dir,
                rec.name,
                rec.function_number
            ],
        )?;
        let fref = FreeFuncRef {
            id: conn.last_insert_rowid(),
            function_number: rec.function_number.clone(),
        };
        idx.free_funcs.insert(rec.number, fref.clone());
        idx.free_func_names.entry(rec.name.clone()).or_insert(fref);
        stats.masters_inserted += 1;
    }
    Ok(())
}

fn resolve(map: &HashMap<i64, i64>, number: i64, kind: &str) -> Option<i64> {
    let id = map.get(&number).copied();
    if id.is_none() {
        debug!(number, kind, "Unresolved reference, storing null");
    }
    id
}

// ---------------------------------------------------------------------------
// Orders and order lines
// ---------------------------------------------------------------------------

#[derive(Default)]
struct NewOrderLine {
    func_number: Option<String>,
    product_id: Option<i64>,
    product_2nd_id: Option<i64>,
    free_func_id: Option<i64>,
    fixed_total_id: Option<i64>,
    mix_match_id: Option<i64>,
    value: f64,
    change: Option<f64>,
}

fn insert_orders(
    conn: &Connection,
    org_id: i64,
    org_path: &Path,
    idx: &OrgIndexes,
    stats: &mut OrgLoadStats,
) -> Result<(), LoadError> {
    let files = order_data::order_files(org_path).map_err(|source| LoadError::Io {
        path: org_path.to_path_buf(),
        source,
    })?;

    for file in files {
        let (order, items) = match order_data::extract_order(&file) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(file = %file.display(), error = %err, "Skipping order file");
                continue;
            }
        };

        let date_time = order.date_time.format(DB_DATE_FORMAT).to_string();
        let duplicate: Option<i64> = conn
            .query_row(
                "SELECT id FROM orders
                 WHERE org_id = ?1 AND consecutive_number = ?2 AND date_time = ?3",
                params![org_id, order.consecutive_number, date_time],
                |r| r.get(0),
            )
            .optional()?;
        if duplicate.is_some() {
            stats.orders_skipped += 1;
            continue;
        }

        let clerk_id = idx.clerks.get(&order.clerk_number).copied();
        let customer_id = order
            .customer_number
            .and_then(|n| idx.customers.get(&n).copied());

        conn.execute(
            "INSERT INTO orders
             (org_id, date_time, filepath, mode, consecutive_number, terminal_number,
              terminal_name, clerk_id, customer_id, table_number)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                org_id,
                date_time,
                order.filepath.to_string_lossy(),
                order.mode,
                order.consecutive_number,
                order.terminal_number,
                order.terminal_name,
                clerk_id,
                customer_id,
                order.table_number
            ],
        )?;
        let order_id = conn.last_insert_rowid();
        stats.orders_inserted += 1;

        insert_order_lines(conn, order_id, &items, idx, stats)?;
    }

    Ok(())
}

/// Single forward pass over an order's items, in document order. The pass
/// order matters: change inference peeks at the following line.
fn insert_order_lines(
    conn: &Connection,
    order_id: i64,
    items: &[OrderItemRecord],
    idx: &OrgIndexes,
    stats: &mut OrgLoadStats,
) -> Result<(), LoadError> {
    for (pos, item) in items.iter().enumerate() {
        let Some(item_type) = ItemType::from_code(item.item_type) else {
            debug!(code = item.item_type, "Skipping unrecognized item type");
            continue;
        };

        let mut line = NewOrderLine {
            value: item.value,
            ..NewOrderLine::default()
        };

        match item_type {
            ItemType::Plu => {
                if let Some(plu) = idx.plu.get(&item.item_number) {
                    line.product_id = Some(plu.id);
                    // the product's promotion follows it onto the line
                    line.mix_match_id = plu.mix_match_id;
                } else {
                    debug!(number = item.item_number, "Unresolved PLU on order line");
                }
            }
            ItemType::FreeFunction => {
                if let Some(func) = idx.free_funcs.get(&item.item_number) {
                    line.free_func_id = Some(func.id);
                    line.func_number = Some(func.function_number.clone());
                } else {
                    debug!(number = item.item_number, "Unresolved free function");
                }

                // Cash tenders are followed by a text line carrying the
                // amount handed back. The line keeps its gross value; every
                // aggregate nets the change out at read time.
                if item.name.contains(CASH_NAME_FRAGMENT) {
                    if let Some(next) = items.get(pos + 1) {
                        if next.item_type == ItemType::Text.code() && next.name == CHANGE_LINE_NAME
                        {
                            line.change = Some(next.value);
                        }
                    }
                }

                // The option field's last digit routes the tender into a
                // physical cash drawer totalizer (CAID/CRID/CHID/CQID).
                if let Some(option) = &item.option {
                    if let Some(digit) = option.chars().last().and_then(|c| c.to_digit(10)) {
                        let drawer_number = i64::from(digit) + MAGIC_INDRAWER_NUMBER;
                        line.fixed_total_id = idx.fixed_totals.get(&drawer_number).copied();
                    }
                }
            }
            ItemType::Text => {}
            ItemType::Plu2nd => {
                line.product_2nd_id = idx.plu_2nd.get(&item.item_number).copied();
                if line.product_2nd_id.is_none() {
                    debug!(number = item.item_number, "Unresolved PLU 2nd on order line");
                }
            }
            ItemType::FixedTotal => {
                // Fixed-total lines reference their totalizer by name.
                line.fixed_total_id = idx.fixed_total_names.get(item.name.trim()).copied();
            }
        }

        // Negative quantity or a "VD:" name marks a voided line; it gets the
        // organization's VOID function attached whatever its own type is.
        if item.qty < 0 || item.name.starts_with(VOID_NAME_PREFIX) {
            if let Some(void_func) = idx.free_func_names.get(VOID_FUNCTION_NAME) {
                line.free_func_id = Some(void_func.id);
                line.func_number = Some(void_func.function_number.clone());
            } else {
                debug!("Voided line but no VOID free function registered");
            }
        }

        conn.execute(
            "INSERT INTO order_lines
             (order_id, item_type, func_number, name, qty, value, product_id, product_2nd_id,
              free_func_id, fixed_total_id, mix_match_id, change)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                order_id,
                item.item_type,
                line.func_number,
                item.name,
                item.qty,
                line.value,
                line.product_id,
                line.product_2nd_id,
                line.free_func_id,
                line.fixed_total_id,
                line.mix_match_id,
                line.change
            ],
        )?;
        stats.lines_inserted += 1;
    }

    Ok(())
}
