//! Master-file extraction.
//!
//! Walks an organization's export tree (group directories, each with a
//! "Master Files" subdirectory) and turns master-file records into typed
//! value objects. A POS system may split one logical table across several
//! files; every file whose document label matches is processed and the
//! records concatenated.

use chrono::NaiveDateTime;
use roxmltree::Node;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::vocab::{MasterKind, MASTER_DIR_FRAGMENT};
use crate::xml::{self, ExtractError, XmlFile};

/// `<Date>` + `<Time>` of a master-file export header.
pub const MASTER_DATE_FORMAT: &str = "%d/%m/%Y %H:%M";

/// Provenance shared by every master record: export timestamp and source
/// location.
#[derive(Debug, Clone)]
pub struct MasterHeader {
    pub date_time: NaiveDateTime,
    pub filepath: PathBuf,
    pub data_dir: PathBuf,
}

/// A typed master-file record. Implementations pull their fields from fixed
/// child-tag paths of a `<Record>` node; a missing required tag fails with
/// `RecordFieldMissing` and the extractor skips that record.
pub trait MasterRecord: Sized {
    const KIND: MasterKind;

    fn from_record(header: &MasterHeader, record: Node<'_, '_>) -> Result<Self, ExtractError>;

    /// Placeholder records are discarded before `from_record` runs. The
    /// default checks the `<Name>` tag for any word character.
    fn is_blank(record: Node<'_, '_>) -> bool {
        !xml::tag_has_content(xml::child_text(record, "Name"))
    }
}

// ---------------------------------------------------------------------------
// Typed records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FixedTotalizerRecord {
    pub header: MasterHeader,
    pub number: i64,
    pub name: String,
}

impl MasterRecord for FixedTotalizerRecord {
    const KIND: MasterKind = MasterKind::FixedTotalizer;

    fn from_record(header: &MasterHeader, record: Node<'_, '_>) -> Result<Self, ExtractError> {
        let path = &header.filepath;
        Ok(Self {
            header: header.clone(),
            number: xml::require_i64(record, "Number", path)?,
            name: xml::require_text(record, "Name", path)?.to_string(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct FreeFunctionRecord {
    pub header: MasterHeader,
    pub number: i64,
    pub name: String,
    /// Function code, e.g. "TENDER", "DEPOSIT", "VOID".
    pub function_number: String,
}

impl MasterRecord for FreeFunctionRecord {
    const KIND: MasterKind = MasterKind::FreeFunction;

    fn from_record(header: &MasterHeader, record: Node<'_, '_>) -> Result<Self, ExtractError> {
        let path = &header.filepath;
        Ok(Self {
            header: header.clone(),
            number: xml::require_i64(record, "Number", path)?,
            // Some exports pad function names with trailing spaces.
            name: xml::require_text(record, "Name", path)?.trim().to_string(),
            function_number: xml::require_text(record, "FunctionNo", path)?.to_string(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct GroupRecord {
    pub header: MasterHeader,
    pub number: i64,
    pub name: String,
}

impl MasterRecord for GroupRecord {
    const KIND: MasterKind = MasterKind::Group;

    fn from_record(header: &MasterHeader, record: Node<'_, '_>) -> Result<Self, ExtractError> {
        let path = &header.filepath;
        Ok(Self {
            header: header.clone(),
            number: xml::require_i64(record, "Number", path)?,
            name: xml::require_text(record, "Name", path)?.to_string(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct DepartmentRecord {
    pub header: MasterHeader,
    pub number: i64,
    pub name: String,
    /// Natural group number; resolved (or nulled) at load time.
    pub group_number: i64,
}

impl MasterRecord for DepartmentRecord {
    const KIND: MasterKind = MasterKind::Department;

    fn from_record(header: &MasterHeader, record: Node<'_, '_>) -> Result<Self, ExtractError> {
        let path = &header.filepath;
        Ok(Self {
            header: header.clone(),
            number: xml::require_i64(record, "Number", path)?,
            name: xml::require_text(record, "Name", path)?.to_string(),
            group_number: xml::require_i64(record, "GroupNo", path)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct TaxRecord {
    pub header: MasterHeader,
    pub number: i64,
    pub name: String,
    /// Integer rate in percent.
    pub rate: i64,
}

impl MasterRecord for TaxRecord {
    const KIND: MasterKind = MasterKind::Tax;

    fn from_record(header: &MasterHeader, record: Node<'_, '_>) -> Result<Self, ExtractError> {
        let path = &header.filepath;
        Ok(Self {
            header: header.clone(),
            number: xml::require_i64(record, "Number", path)?,
            name: xml::require_text(record, "Name", path)?.to_string(),
            rate: xml::require_i64(record, "Rate", path)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct PluRecord {
    pub header: MasterHeader,
    pub number: i64,
    pub name: String,
    pub group_number: i64,
    pub department_number: i64,
    pub price: f64,
    pub tax_number: i64,
    /// Optional on the wire; older exports omit the tag entirely.
    pub mix_match_number: Option<i64>,
}

impl MasterRecord for PluRecord {
    const KIND: MasterKind = MasterKind::Plu;

    fn from_record(header: &MasterHeader, record: Node<'_, '_>) -> Result<Self, ExtractError> {
        let path = &header.filepath;
        Ok(Self {
            header: header.clone(),
            number: xml::require_i64(record, "Number", path)?,
            name: xml::require_text(record, "Name", path)?.to_string(),
            group_number: xml::require_i64(record, "GroupNo", path)?,
            department_number: xml::require_i64(record, "DepartmentNo", path)?,
            price: xml::require_f64(record, "Price", path)?,
            tax_number: xml::require_i64(record, "TaxNo", path)?,
            mix_match_number: xml::optional_i64(record, "MixMatch"),
        })
    }
}

#[derive(Debug, Clone)]
pub struct Plu2ndRecord {
    pub header: MasterHeader,
    pub number: i64,
    pub name: String,
    pub group_number: i64,
    pub department_number: i64,
    pub price: f64,
    pub tax_number: i64,
}

impl MasterRecord for Plu2ndRecord {
    const KIND: MasterKind = MasterKind::Plu2nd;

    fn from_record(header: &MasterHeader, record: Node<'_, '_>) -> Result<Self, ExtractError> {
        let path = &header.filepath;
        Ok(Self {
            header: header.clone(),
            number: xml::require_i64(record, "Number", path)?,
            name: xml::require_text(record, "Name", path)?.to_string(),
            group_number: xml::require_i64(record, "GroupNo", path)?,
            department_number: xml::require_i64(record, "DepartmentNo", path)?,
            price: xml::require_f64(record, "Price", path)?,
            tax_number: xml::require_i64(record, "TaxNo", path)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ClerkRecord {
    pub header: MasterHeader,
    pub number: i64,
    pub name: String,
}

impl MasterRecord for ClerkRecord {
    const KIND: MasterKind = MasterKind::Clerk;

    fn from_record(header: &MasterHeader, record: Node<'_, '_>) -> Result<Self, ExtractError> {
        let path = &header.filepath;
        Ok(Self {
            header: header.clone(),
            number: xml::require_i64(record, "Number", path)?,
            name: xml::require_text(record, "Name", path)?.to_string(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct CustomerRecord {
    pub header: MasterHeader,
    pub number: i64,
    pub first_name: String,
    pub surname: String,
    pub addr1: String,
    pub addr2: String,
    pub addr3: String,
    pub postcode: String,
    pub phone: String,
    pub email: String,
    pub overdraft_limit: String,
    pub custgroup_number: Option<i64>,
}

impl MasterRecord for CustomerRecord {
    const KIND: MasterKind = MasterKind::Customer;

    fn from_record(header: &MasterHeader, record: Node<'_, '_>) -> Result<Self, ExtractError> {
        let path = &header.filepath;
        let text = |tag| xml::child_text(record, tag).unwrap_or("").to_string();
        Ok(Self {
            header: header.clone(),
            number: xml::require_i64(record, "Number", path)?,
            first_name: text("FirstName"),
            surname: text("Surname"),
            addr1: text("Address1"),
            addr2: text("Address2"),
            addr3: text("Address3"),
            postcode: text("Postcode"),
            phone: text("Telephone"),
            email: text("Email"),
            overdraft_limit: text("OverDraftLimit"),
            custgroup_number: xml::optional_i64(record, "CustGroupNo"),
        })
    }

    /// Customers carry no `<Name>` tag; the record is a placeholder only
    /// when both name parts are blank.
    fn is_blank(record: Node<'_, '_>) -> bool {
        !xml::tag_has_content(xml::child_text(record, "FirstName"))
            && !xml::tag_has_content(xml::child_text(record, "Surname"))
    }
}

#[derive(Debug, Clone)]
pub struct MixMatchRecord {
    pub header: MasterHeader,
    pub number: i64,
    pub name: String,
    pub operation_type: i64,
    pub qty_req: i64,
    pub amount: f64,
}

impl MasterRecord for MixMatchRecord {
    const KIND: MasterKind = MasterKind::MixMatch;

    fn from_record(header: &MasterHeader, record: Node<'_, '_>) -> Result<Self, ExtractError> {
        let path = &header.filepath;
        Ok(Self {
            header: header.clone(),
            number: xml::require_i64(record, "Number", path)?,
            name: xml::require_text(record, "Name", path)?.to_string(),
            operation_type: xml::require_i64(record, "OperationType", path)?,
            qty_req: xml::require_i64(record, "QtyReq", path)?,
            amount: xml::require_f64(record, "Amount", path)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Directory walking
// ---------------------------------------------------------------------------

/// Subdirectories of an organization's data directory, sorted by name so
/// re-runs process files in a stable order.
pub fn group_dirs(org_path: &Path) -> io::Result<Vec<PathBuf>> {
    let mut dirs: Vec<PathBuf> = std::fs::read_dir(org_path)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    Ok(dirs)
}

/// The master-files subdirectory of a group directory, located by a
/// case-insensitive "master" match on the directory name. `None` when the
/// group has no master files; not fatal.
pub fn master_files_dir(group_dir: &Path) -> Option<PathBuf> {
    let entries = std::fs::read_dir(group_dir).ok()?;
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if name.to_lowercase().contains(MASTER_DIR_FRAGMENT) {
                return Some(path);
            }
        }
    }
    None
}

fn files_in(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|p| p.is_file())
            .collect(),
        Err(err) => {
            warn!(dir = %dir.display(), error = %err, "Cannot list master files directory");
            Vec::new()
        }
    };
    files.sort();
    files
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Extract every record of kind `T` across the organization's master files.
///
/// Per-file failures (malformed XML, missing header tags) are logged and
/// skipped; they never abort the remaining files of the organization.
pub fn extract<T: MasterRecord>(org_path: &Path, data_dir: &Path) -> Vec<T> {
    let mut out = Vec::new();

    let groups = match group_dirs(org_path) {
        Ok(groups) => groups,
        Err(err) => {
            warn!(org = %org_path.display(), error = %err, "Cannot list organization directory");
            return out;
        }
    };

    for group_dir in groups {
        let Some(mf_dir) = master_files_dir(&group_dir) else {
            debug!(group = %group_dir.display(), "No master files directory");
            continue;
        };

        for file in files_in(&mf_dir) {
            match extract_from_file::<T>(&file, data_dir) {
                Ok(mut records) => out.append(&mut records),
                Err(err) => {
                    warn!(file = %file.display(), error = %err, "Skipping master file")
                }
            }
        }
    }

    out
}

/// Records of kind `T` from one master file; empty when the document label
/// does not match.
fn extract_from_file<T: MasterRecord>(path: &Path, data_dir: &Path) -> Result<Vec<T>, ExtractError> {
    let file = XmlFile::load(path)?;
    let doc = file.parse()?;

    if xml::doc_label(&doc) != Some(T::KIND.label()) {
        return Ok(Vec::new());
    }

    let header = parse_header(&doc, path, data_dir)?;
    let mut out = Vec::new();

    for record in xml::records(&doc, path)? {
        if T::is_blank(record) {
            continue;
        }
        match T::from_record(&header, record) {
            Ok(typed) => out.push(typed),
            Err(err) => warn!(file = %path.display(), error = %err, "Skipping record"),
        }
    }

    Ok(out)
}

fn parse_header(
    doc: &roxmltree::Document,
    path: &Path,
    data_dir: &Path,
) -> Result<MasterHeader, ExtractError> {
    let root = doc.root_element();
    let date = xml::require_text(root, "Date", path)?;
    let time = xml::require_text(root, "Time", path)?;
    let stamp = format!("{date} {time}");
    let date_time = NaiveDateTime::parse_from_str(&stamp, MASTER_DATE_FORMAT).map_err(|_| {
        ExtractError::BadFieldValue {
            tag: "Date",
            value: stamp,
            path: path.to_path_buf(),
        }
    })?;

    Ok(MasterHeader {
        date_time,
        filepath: path.to_path_buf(),
        data_dir: data_dir.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn fixture_org() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("posdm_master_{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(dir.join("Group 1").join("Master Files")).unwrap();
        dir
    }

    fn write_master(org: &Path, group: &str, file: &str, label: &str, records: &str) {
        let dir = org.join(group);
        fs::create_dir_all(&dir).unwrap();
        let doc = format!(
            "<Export><Name>{label}</Name><Date>01/02/2019</Date><Time>10:30</Time>\
             <Records>{records}</Records></Export>"
        );
        fs::write(dir.join(file), doc).unwrap();
    }

    #[test]
    fn test_extract_plu_records() {
        let org = fixture_org();
        write_master(
            &org,
            "Group 1/Master Files",
            "PLU.xml",
            "PLU",
            "<Record><Number>11</Number><Name>COLA</Name><GroupNo>1</GroupNo>\
             <DepartmentNo>2</DepartmentNo><Price>2.50</Price><TaxNo>1</TaxNo>\
             <MixMatch>7</MixMatch></Record>\
             <Record><Number>12</Number><Name>CHIPS</Name><GroupNo>1</GroupNo>\
             <DepartmentNo>2</DepartmentNo><Price>1.95</Price><TaxNo>1</TaxNo></Record>\
             <Record><Number>13</Number><Name>   </Name><GroupNo>1</GroupNo>\
             <DepartmentNo>2</DepartmentNo><Price>0.00</Price><TaxNo>1</TaxNo></Record>",
        );

        let plus: Vec<PluRecord> = extract(&org, &org);
        assert_eq!(plus.len(), 2, "blank-name record must be discarded");
        assert_eq!(plus[0].number, 11);
        assert_eq!(plus[0].mix_match_number, Some(7));
        assert_eq!(plus[1].name, "CHIPS");
        assert_eq!(plus[1].mix_match_number, None);
        assert_eq!(
            plus[0].header.date_time,
            NaiveDateTime::parse_from_str("01/02/2019 10:30", MASTER_DATE_FORMAT).unwrap()
        );
    }

    #[test]
    fn test_case_insensitive_master_dir() {
        let org = fixture_org();
        write_master(
            &org,
            "Group 2/MASTER FILES",
            "Clerk.xml",
            "Clerk",
            "<Record><Number>1</Number><Name>ALICE</Name></Record>",
        );

        let clerks: Vec<ClerkRecord> = extract(&org, &org);
        assert_eq!(clerks.len(), 1);
        assert_eq!(clerks[0].name, "ALICE");
    }

    #[test]
    fn test_multiple_files_same_label_concatenate() {
        let org = fixture_org();
        write_master(
            &org,
            "Group 1/Master Files",
            "Group_a.xml",
            "Group",
            "<Record><Number>1</Number><Name>DRINKS</Name></Record>",
        );
        write_master(
            &org,
            "Group 1/Master Files",
            "Group_b.xml",
            "Group",
            "<Record><Number>2</Number><Name>FOOD</Name></Record>",
        );

        let groups: Vec<GroupRecord> = extract(&org, &org);
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn test_wrong_label_ignored() {
        let org = fixture_org();
        write_master(
            &org,
            "Group 1/Master Files",
            "Clerk.xml",
            "Clerk",
            "<Record><Number>1</Number><Name>ALICE</Name></Record>",
        );

        let groups: Vec<GroupRecord> = extract(&org, &org);
        assert!(groups.is_empty());
    }

    #[test]
    fn test_malformed_file_does_not_abort_others() {
        let org = fixture_org();
        fs::write(
            org.join("Group 1").join("Master Files").join("bad.xml"),
            "<oops",
        )
        .unwrap();
        write_master(
            &org,
            "Group 1/Master Files",
            "Tax.xml",
            "Tax table",
            "<Record><Number>1</Number><Name>VAT</Name><Rate>20</Rate></Record>",
        );

        let taxes: Vec<TaxRecord> = extract(&org, &org);
        assert_eq!(taxes.len(), 1);
        assert_eq!(taxes[0].rate, 20);
    }

    #[test]
    fn test_customer_blank_rule() {
        let org = fixture_org();
        write_master(
            &org,
            "Group 1/Master Files",
            "Customers.xml",
            "Customers",
            "<Record><Number>1</Number><FirstName>JO</FirstName><Surname>SMITH</Surname></Record>\
             <Record><Number>2</Number><FirstName></FirstName><Surname>BLOGGS</Surname></Record>\
             <Record><Number>3</Number><FirstName> </FirstName><Surname>  </Surname></Record>",
        );

        let customers: Vec<CustomerRecord> = extract(&org, &org);
        assert_eq!(customers.len(), 2, "only the both-blank record is discarded");
        assert_eq!(customers[1].surname, "BLOGGS");
        assert_eq!(customers[1].first_name, "");
        assert_eq!(customers[0].custgroup_number, None);
    }

    #[test]
    fn test_record_missing_required_field_skipped() {
        let org = fixture_org();
        write_master(
            &org,
            "Group 1/Master Files",
            "Department.xml",
            "Department",
            "<Record><Number>5</Number><Name>KITCHEN</Name><GroupNo>1</GroupNo></Record>\
             <Record><Number>6</Number><Name>BAR</Name></Record>",
        );

        let deps: Vec<DepartmentRecord> = extract(&org, &org);
        assert_eq!(deps.len(), 1, "record without GroupNo is skipped");
        assert_eq!(deps[0].name, "KITCHEN");
    }
}
