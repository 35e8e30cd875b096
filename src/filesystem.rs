//! The top-level facade: opens a volume, exposes the root directory, and
//! resolves paths and children.

use log::{debug, info, warn};

use crate::binary::epoch_sentinel;
use crate::enumerator::{MftEnumerator, MftSource};
use crate::error::{NtfsError, Result};
use crate::index::{parse_index_allocation, parse_index_root, IndexEntry};
use crate::nonresident::NonResidentView;
use crate::record::{
    Attribute, AttributeBody, MftRecord, MftReference, Namespace, RECORD_MFT, RECORD_MFTMIRR,
    RECORD_ROOT, RECORD_VOLUME, ATTR_TYPE_DATA, ATTR_TYPE_FILE_NAME, ATTR_TYPE_INDEX_ALLOCATION,
    ATTR_TYPE_INDEX_ROOT, ATTR_TYPE_VOLUME_NAME,
};
use crate::vbr::Vbr;
use crate::volume::{ClusterAccessor, Volume};
use chrono::{DateTime, Utc};

/// How the MFT's own data is held in memory once located.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterializationPolicy {
    AlwaysCopy,
    AlwaysView,
    /// Materialize when the MFT is at most `threshold_bytes`, otherwise keep
    /// a virtual view over the runlist.
    Auto { threshold_bytes: u64 },
}

impl Default for MaterializationPolicy {
    fn default() -> Self {
        MaterializationPolicy::Auto {
            threshold_bytes: 500 * 1024 * 1024,
        }
    }
}

/// Configuration for [`open`].
#[derive(Debug, Clone, Copy)]
pub struct OpenOptions {
    pub volume_offset: u64,
    pub cluster_size_override: Option<u32>,
    pub materialization: MaterializationPolicy,
}

impl Default for OpenOptions {
    fn default() -> Self {
        OpenOptions {
            volume_offset: 0,
            cluster_size_override: None,
            materialization: MaterializationPolicy::default(),
        }
    }
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn volume_offset(mut self, offset: u64) -> Self {
        self.volume_offset = offset;
        self
    }

    pub fn cluster_size(mut self, size: u32) -> Self {
        self.cluster_size_override = Some(size);
        self
    }

    pub fn materialization(mut self, policy: MaterializationPolicy) -> Self {
        self.materialization = policy;
        self
    }
}

/// An open, read-only NTFS volume.
pub struct Filesystem<'a> {
    vbr: Vbr,
    clusters: ClusterAccessor<'a>,
    enumerator: MftEnumerator<'a>,
}

fn mft_view_for_record<'a>(
    clusters: ClusterAccessor<'a>,
    record: &MftRecord,
) -> Result<NonResidentView<'a>> {
    let data_attr = record.attribute(ATTR_TYPE_DATA)?.ok_or(NtfsError::AttributeNotFound {
        record_number: record.record_number,
        attr_type: ATTR_TYPE_DATA,
    })?;
    match data_attr.body {
        AttributeBody::NonResident { runs, .. } => Ok(NonResidentView::new(clusters, runs)),
        AttributeBody::Resident(_) => Err(NtfsError::CorruptFilesystem {
            reason: "$MFT DATA attribute is resident".to_string(),
        }),
    }
}

fn probe_reaches_end(view: &NonResidentView<'_>) -> Result<()> {
    if view.len() == 0 {
        return Err(NtfsError::CorruptFilesystem {
            reason: "$MFT has zero length".to_string(),
        });
    }
    view.byte_at(view.len() - 1).map(|_| ())
}

impl<'a> Filesystem<'a> {
    /// Opens an NTFS volume from `buffer`, applying `options`.
    pub fn open(buffer: &'a [u8], options: OpenOptions) -> Result<Self> {
        let volume = Volume::new(buffer, options.volume_offset);
        let sector0 = volume.slice(0, 512)?;
        let vbr = Vbr::decode(sector0)?;
        let cluster_size = options.cluster_size_override.unwrap_or_else(|| vbr.cluster_size());
        let clusters = ClusterAccessor::new(&volume, cluster_size);

        info!(
            "opening NTFS volume: cluster_size={} mft_lcn={} mftmirr_lcn={}",
            cluster_size, vbr.mft_lcn, vbr.mftmirr_lcn
        );

        let mft_record_size = vbr.mft_record_size();
        let record0 = Self::read_bootstrap_record(&clusters, vbr.mft_offset(), mft_record_size, RECORD_MFT);
        let view = match record0.and_then(|r| mft_view_for_record(clusters, &r).map(|v| (r, v))) {
            Ok((_, view)) if probe_reaches_end(&view).is_ok() => view,
            _ => {
                warn!("primary $MFT unreadable, falling back to $MFTMirr");
                let record1 = Self::read_bootstrap_record(
                    &clusters,
                    vbr.mftmirr_offset(),
                    mft_record_size,
                    RECORD_MFTMIRR,
                )?;
                let view = mft_view_for_record(clusters, &record1)?;
                probe_reaches_end(&view)?;
                view
            }
        };

        let source = match options.materialization {
            MaterializationPolicy::AlwaysView => MftSource::View(view),
            MaterializationPolicy::AlwaysCopy => {
                let len = view.len();
                MftSource::Materialized(view.slice(0, len)?)
            }
            MaterializationPolicy::Auto { threshold_bytes } => {
                if view.len() <= threshold_bytes {
                    let len = view.len();
                    MftSource::Materialized(view.slice(0, len)?)
                } else {
                    MftSource::View(view)
                }
            }
        };

        let enumerator = MftEnumerator::new(source, mft_record_size);
        debug!("$MFT resolved: {} records", enumerator.record_count());

        Ok(Filesystem {
            vbr,
            clusters,
            enumerator,
        })
    }

    fn read_bootstrap_record(
        clusters: &ClusterAccessor<'a>,
        byte_offset: u64,
        record_size: u32,
        record_number: u64,
    ) -> Result<MftRecord> {
        let cluster_size = clusters.cluster_size() as u64;
        let lo_cluster = byte_offset / cluster_size;
        let hi_cluster = lo_cluster + (record_size as u64).div_ceil(cluster_size);
        let raw = clusters.slice(lo_cluster, hi_cluster)?;
        let intra = (byte_offset % cluster_size) as usize;
        MftRecord::decode(&raw[intra..intra + record_size as usize], record_number)
    }

    pub fn vbr(&self) -> &Vbr {
        &self.vbr
    }

    pub fn enumerator(&self) -> &MftEnumerator<'a> {
        &self.enumerator
    }

    /// Returns the resident bytes or a non-resident view for any attribute
    /// obtained from a record this filesystem owns.
    pub fn attribute_data(&self, attr: &Attribute) -> Result<AttributeData<'a>> {
        match &attr.body {
            AttributeBody::Resident(bytes) => Ok(AttributeData::Resident(bytes.clone())),
            AttributeBody::NonResident { runs, .. } => {
                Ok(AttributeData::NonResident(NonResidentView::new(self.clusters, runs.clone())))
            }
        }
    }

    pub fn get_record(&self, n: u64) -> Result<MftRecord> {
        self.enumerator.get_record(n)
    }

    pub fn root(&self) -> Result<Directory<'_, 'a>> {
        let record = self.enumerator.get_record(RECORD_ROOT)?;
        Ok(Directory { fs: self, record })
    }

    /// Reads the resident VOLUME_NAME attribute off record #3 ($Volume), if present.
    pub fn volume_label(&self) -> Result<Option<String>> {
        let record = self.enumerator.get_record(RECORD_VOLUME)?;
        let Some(attr) = record.attribute(ATTR_TYPE_VOLUME_NAME)? else {
            return Ok(None);
        };
        let Some(bytes) = attr.resident_value() else {
            return Ok(None);
        };
        Ok(Some(crate::binary::read_utf16le(bytes, 0, bytes.len())?))
    }

    /// Resolves a `\`- or `/`-separated path to a node, starting at the root.
    /// A single path must not mix separators.
    pub fn path_entry(&self, path: &str) -> Result<Node<'_, 'a>> {
        let root = self.enumerator.get_record(RECORD_ROOT)?;
        resolve_relative_path(self, root, path)
    }
}

/// Resolves a `\`- or `/`-separated path starting from `start`, used by both
/// [`Filesystem::path_entry`] (root-anchored) and [`Directory::path_entry`]
/// (directory-anchored). A single path must not mix separators.
fn resolve_relative_path<'fs, 'a>(
    fs: &'fs Filesystem<'a>,
    start: MftRecord,
    path: &str,
) -> Result<Node<'fs, 'a>> {
    let has_back = path.contains('\\');
    let has_fwd = path.contains('/');
    if has_back && has_fwd {
        return Err(NtfsError::UnsupportedPath { path: path.to_string() });
    }
    let sep = if has_back { '\\' } else { '/' };

    let mut current_record = start;
    let components: Vec<&str> = path.split(sep).filter(|c| !c.is_empty()).collect();

    for component in components {
        let dir = Directory {
            fs,
            record: current_record.clone(),
        };
        let entry = dir.child_entry(component)?;
        current_record = fs.enumerator.get_record(entry.mft_reference.record_number)?;
    }

    if current_record.is_directory() {
        Ok(Node::Directory(Directory {
            fs,
            record: current_record,
        }))
    } else {
        Ok(Node::File(File {
            fs,
            record: current_record,
        }))
    }
}

pub enum AttributeData<'a> {
    Resident(Vec<u8>),
    NonResident(NonResidentView<'a>),
}

impl<'a> AttributeData<'a> {
    pub fn len(&self) -> u64 {
        match self {
            AttributeData::Resident(b) => b.len() as u64,
            AttributeData::NonResident(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn read(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        match self {
            AttributeData::Resident(b) => {
                crate::binary::read_bytes(b, offset as usize, len).map(|s| s.to_vec())
            }
            AttributeData::NonResident(v) => v.slice(offset, offset + len as u64),
        }
    }
}

pub enum Node<'fs, 'a> {
    File(File<'fs, 'a>),
    Directory(Directory<'fs, 'a>),
}

/// Shared metadata accessors backed by a decoded MFT record.
struct Metadata {
    standard_information: Option<crate::record::StandardInformation>,
    filenames: Vec<crate::record::FileNameInfo>,
}

impl Metadata {
    fn load(fs: &Filesystem<'_>, record: &MftRecord) -> Result<Self> {
        let standard_information = fs
            .enumerator
            .attribute(record, crate::record::ATTR_TYPE_STANDARD_INFORMATION)?
            .map(|a| a.standard_information())
            .transpose()?;
        let filenames = record
            .attributes_of_type(ATTR_TYPE_FILE_NAME)?
            .into_iter()
            .filter_map(|a| a.file_name().ok())
            .collect();
        Ok(Metadata {
            standard_information,
            filenames,
        })
    }

    fn preferred_filename(&self) -> Option<&crate::record::FileNameInfo> {
        self.filenames
            .iter()
            .find(|n| matches!(n.namespace, Namespace::Win32 | Namespace::Win32AndDos))
            .or_else(|| self.filenames.first())
    }

    fn preferred_name(&self) -> Option<&str> {
        self.preferred_filename().map(|n| n.name.as_str())
    }
}

pub struct File<'fs, 'a> {
    fs: &'fs Filesystem<'a>,
    record: MftRecord,
}

impl<'fs, 'a> File<'fs, 'a> {
    pub fn name(&self) -> Result<String> {
        Ok(Metadata::load(self.fs, &self.record)?
            .preferred_name()
            .unwrap_or("")
            .to_string())
    }

    pub fn full_path(&self) -> String {
        self.fs.enumerator.get_path(&self.record)
    }

    pub fn mft_reference(&self) -> MftReference {
        self.fs.enumerator.mft_reference(&self.record)
    }

    /// The directory this file is named in, per its preferred
    /// FILENAME_INFORMATION parent reference.
    pub fn parent_directory(&self) -> Result<Directory<'fs, 'a>> {
        let parent_ref = self
            .fs
            .enumerator
            .parent_of(&self.record)
            .ok_or(NtfsError::NoParent { record_number: self.record.record_number })?;
        let record = self.fs.enumerator.get_record(parent_ref.record_number)?;
        Ok(Directory { fs: self.fs, record })
    }

    fn default_data_attribute(&self) -> Result<Option<Attribute>> {
        self.fs.enumerator.attribute(&self.record, ATTR_TYPE_DATA)
    }

    pub fn size(&self) -> Result<u64> {
        if let Some(attr) = self.default_data_attribute()? {
            return Ok(match &attr.body {
                AttributeBody::Resident(b) => b.len() as u64,
                AttributeBody::NonResident { data_size, .. } => *data_size,
            });
        }
        let meta = Metadata::load(self.fs, &self.record)?;
        Ok(meta.filenames.first().map(|n| n.logical_size).unwrap_or(0))
    }

    pub fn data_attribute_kind(&self) -> Result<DataAttributeKind> {
        Ok(match self.default_data_attribute()? {
            None => DataAttributeKind::Absent,
            Some(attr) if attr.is_resident() => DataAttributeKind::Resident,
            Some(_) => DataAttributeKind::NonResident,
        })
    }

    pub fn read(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let attr = self.default_data_attribute()?.ok_or(NtfsError::AttributeNotFound {
            record_number: self.record.record_number,
            attr_type: ATTR_TYPE_DATA,
        })?;
        self.fs.attribute_data(&attr)?.read(offset, len)
    }

    pub fn si_created(&self) -> Result<DateTime<Utc>> {
        Ok(Metadata::load(self.fs, &self.record)?
            .standard_information
            .map(|si| si.created)
            .unwrap_or_else(epoch_sentinel))
    }

    pub fn si_modified(&self) -> Result<DateTime<Utc>> {
        Ok(Metadata::load(self.fs, &self.record)?
            .standard_information
            .map(|si| si.modified)
            .unwrap_or_else(epoch_sentinel))
    }

    pub fn si_accessed(&self) -> Result<DateTime<Utc>> {
        Ok(Metadata::load(self.fs, &self.record)?
            .standard_information
            .map(|si| si.accessed)
            .unwrap_or_else(epoch_sentinel))
    }

    /// STANDARD_INFORMATION's MFT-modified ("changed") timestamp.
    pub fn si_changed(&self) -> Result<DateTime<Utc>> {
        Ok(Metadata::load(self.fs, &self.record)?
            .standard_information
            .map(|si| si.mft_modified)
            .unwrap_or_else(epoch_sentinel))
    }

    pub fn fn_created(&self) -> Result<DateTime<Utc>> {
        Ok(Metadata::load(self.fs, &self.record)?
            .preferred_filename()
            .map(|n| n.created)
            .unwrap_or_else(epoch_sentinel))
    }

    pub fn fn_modified(&self) -> Result<DateTime<Utc>> {
        Ok(Metadata::load(self.fs, &self.record)?
            .preferred_filename()
            .map(|n| n.modified)
            .unwrap_or_else(epoch_sentinel))
    }

    pub fn fn_changed(&self) -> Result<DateTime<Utc>> {
        Ok(Metadata::load(self.fs, &self.record)?
            .preferred_filename()
            .map(|n| n.mft_modified)
            .unwrap_or_else(epoch_sentinel))
    }

    pub fn fn_accessed(&self) -> Result<DateTime<Utc>> {
        Ok(Metadata::load(self.fs, &self.record)?
            .preferred_filename()
            .map(|n| n.accessed)
            .unwrap_or_else(epoch_sentinel))
    }

    pub fn filenames(&self) -> Result<Vec<crate::record::FileNameInfo>> {
        Ok(Metadata::load(self.fs, &self.record)?.filenames)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataAttributeKind {
    Resident,
    NonResident,
    Absent,
}

pub struct Directory<'fs, 'a> {
    fs: &'fs Filesystem<'a>,
    record: MftRecord,
}

impl<'fs, 'a> Directory<'fs, 'a> {
    pub fn name(&self) -> Result<String> {
        if self.record.record_number == RECORD_ROOT {
            return Ok(String::new());
        }
        Ok(Metadata::load(self.fs, &self.record)?
            .preferred_name()
            .unwrap_or("")
            .to_string())
    }

    pub fn full_path(&self) -> String {
        self.fs.enumerator.get_path(&self.record)
    }

    pub fn mft_reference(&self) -> MftReference {
        self.fs.enumerator.mft_reference(&self.record)
    }

    /// The parent of this directory, per its preferred FILENAME_INFORMATION
    /// parent reference. The root directory (record #5) has none.
    pub fn parent_directory(&self) -> Result<Directory<'fs, 'a>> {
        if self.record.record_number == RECORD_ROOT {
            return Err(NtfsError::NoParent { record_number: self.record.record_number });
        }
        let parent_ref = self
            .fs
            .enumerator
            .parent_of(&self.record)
            .ok_or(NtfsError::NoParent { record_number: self.record.record_number })?;
        let record = self.fs.enumerator.get_record(parent_ref.record_number)?;
        Ok(Directory { fs: self.fs, record })
    }

    /// Resolves a `\`- or `/`-separated path relative to this directory.
    pub fn path_entry(&self, relative: &str) -> Result<Node<'fs, 'a>> {
        resolve_relative_path(self.fs, self.record.clone(), relative)
    }

    /// Raw index entries for this directory: INDEX_ALLOCATION's blocks if
    /// present, otherwise INDEX_ROOT's inline node. Self-entries (`.`
    /// pointing back at the root) are skipped; children are de-duplicated
    /// by MFT record number.
    fn raw_children(&self) -> Result<Vec<IndexEntry>> {
        let entries = if let Some(alloc_attr) = self.fs.enumerator.attribute(&self.record, ATTR_TYPE_INDEX_ALLOCATION)? {
            let root_attr = self
                .fs
                .enumerator
                .attribute(&self.record, ATTR_TYPE_INDEX_ROOT)?
                .ok_or(NtfsError::DirectoryNotFound { record_number: self.record.record_number })?;
            let root_bytes = root_attr.resident_value().ok_or_else(|| NtfsError::InvalidRecord {
                structure: "INDEX_ROOT",
                offset: 0,
                reason: "not resident".to_string(),
            })?;
            let index_block_size = crate::binary::read_u32(root_bytes, 8)?;

            let data = self.fs.attribute_data(&alloc_attr)?;
            let bytes = match data {
                AttributeData::NonResident(view) => view.slice(0, view.len())?,
                AttributeData::Resident(b) => b,
            };
            let nodes = parse_index_allocation(bytes, index_block_size)?;
            let mut all = Vec::new();
            for node in &nodes {
                all.extend(node.entries()?);
            }
            all
        } else {
            let root_attr = self
                .fs
                .enumerator
                .attribute(&self.record, ATTR_TYPE_INDEX_ROOT)?
                .ok_or(NtfsError::DirectoryNotFound { record_number: self.record.record_number })?;
            let root_bytes = root_attr.resident_value().ok_or_else(|| NtfsError::InvalidRecord {
                structure: "INDEX_ROOT",
                offset: 0,
                reason: "not resident".to_string(),
            })?;
            let node = parse_index_root(root_bytes)?;
            node.entries()?
        };

        let mut seen = std::collections::HashSet::new();
        let mut result = Vec::new();
        for entry in entries {
            if entry.mft_reference.record_number == RECORD_ROOT && entry.file_name == "." {
                continue;
            }
            if seen.insert(entry.mft_reference.record_number) {
                result.push(entry);
            }
        }
        Ok(result)
    }

    /// Deleted-entry residue from the directory's index slack space.
    pub fn slack_children(&self) -> Result<Vec<IndexEntry>> {
        let mut out = Vec::new();
        if let Some(alloc_attr) = self.fs.enumerator.attribute(&self.record, ATTR_TYPE_INDEX_ALLOCATION)? {
            let root_attr = self.fs.enumerator.attribute(&self.record, ATTR_TYPE_INDEX_ROOT)?;
            if let Some(root_attr) = root_attr {
                if let Some(root_bytes) = root_attr.resident_value() {
                    let index_block_size = crate::binary::read_u32(root_bytes, 8)?;
                    if let AttributeData::NonResident(view) = self.fs.attribute_data(&alloc_attr)? {
                        let bytes = view.slice(0, view.len())?;
                        for node in parse_index_allocation(bytes, index_block_size)? {
                            out.extend(node.slack_entries()?);
                        }
                    }
                }
            }
        }
        if let Some(root_attr) = self.fs.enumerator.attribute(&self.record, ATTR_TYPE_INDEX_ROOT)? {
            if let Some(root_bytes) = root_attr.resident_value() {
                out.extend(parse_index_root(root_bytes)?.slack_entries()?);
            }
        }
        Ok(out)
    }

    pub fn children(&self) -> Result<Vec<Node<'fs, 'a>>> {
        self.raw_children()?
            .into_iter()
            .map(|entry| {
                let record = self.fs.enumerator.get_record(entry.mft_reference.record_number)?;
                Ok(if record.is_directory() {
                    Node::Directory(Directory {
                        fs: self.fs,
                        record,
                    })
                } else {
                    Node::File(File {
                        fs: self.fs,
                        record,
                    })
                })
            })
            .collect()
    }

    pub fn files(&self) -> Result<Vec<File<'fs, 'a>>> {
        Ok(self
            .children()?
            .into_iter()
            .filter_map(|n| match n {
                Node::File(f) => Some(f),
                Node::Directory(_) => None,
            })
            .collect())
    }

    pub fn directories(&self) -> Result<Vec<Directory<'fs, 'a>>> {
        Ok(self
            .children()?
            .into_iter()
            .filter_map(|n| match n {
                Node::Directory(d) => Some(d),
                Node::File(_) => None,
            })
            .collect())
    }

    fn child_entry(&self, name: &str) -> Result<IndexEntry> {
        self.raw_children()?
            .into_iter()
            .find(|e| e.file_name.eq_ignore_ascii_case(name))
            .ok_or_else(|| NtfsError::ChildNotFound {
                parent_record: self.record.record_number,
                name: name.to_string(),
            })
    }

    pub fn child(&self, name: &str) -> Result<Node<'fs, 'a>> {
        let entry = self.child_entry(name)?;
        let record = self.fs.enumerator.get_record(entry.mft_reference.record_number)?;
        Ok(if record.is_directory() {
            Node::Directory(Directory { fs: self.fs, record })
        } else {
            Node::File(File { fs: self.fs, record })
        })
    }
}
