use std::path::Path;

use tracing::debug;

use sandpatch_wire::{CANARY_LEN, HASH_LEN, MAX_NAME_LEN, MAX_PATCH_SIZE};

use crate::descriptor::{PatchDescriptor, PatchFlags};
use crate::digest::sha1_digest;
use crate::error::{FormatError, Result};

/// Eight-byte cookie opening every container.
pub const PATCH_FILE_COOKIE: [u8; 8] = *b"XSPATCH2";

/// Container filename extension.
pub const PATCH_FILE_EXT: &str = ".raxlpxs";

/// Containers are named `<40-hex-sha1>.raxlpxs`: 48 characters.
const PATCH_FILENAME_LEN: usize = 48;

/// Fixed width of the NUL-padded version and compile-date strings.
const VERSION_FIELD_LEN: usize = 32;

/// Pre-flight assertion retained for the predecessor tool: expected bytes
/// at an absolute address. This applier refuses containers that carry any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckEntry {
    pub addr: u64,
    pub expected: Vec<u8>,
}

/// One function to patch: symbol name, its absolute address in the
/// running target, and the entry offset of its replacement in the blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionPatch {
    pub name: String,
    pub old_addr: u64,
    pub new_rel_offset: u32,
}

/// Named-table replacement retained for the predecessor tool; refused by
/// this applier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TablePatch {
    pub name: String,
    pub addr: u64,
    pub data: Vec<u8>,
}

/// A decoded `<sha1>.raxlpxs` container.
///
/// Produced all-or-nothing: a `PatchFile` in hand means the filename
/// matched the content hash, the cookie was present, and every section
/// decoded completely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchFile {
    /// Hash embedded in the filename, equal to sha1(file content).
    pub file_hash: [u8; HASH_LEN],
    pub target_version: String,
    pub target_compile_date: String,
    /// Legacy reference address; must be zero for this applier.
    pub crowbar_addr: u64,
    /// Virtual address the blob was linked against (first-stage base).
    pub reloc_base: u64,
    pub blob: Vec<u8>,
    /// Second-stage fixups: offsets of 4-byte slots inside the blob.
    pub relocations: Vec<u32>,
    pub checks: Vec<CheckEntry>,
    pub functions: Vec<FunctionPatch>,
    pub tables: Vec<TablePatch>,
}

/// Pull the declared SHA-1 out of a container filename, validating its
/// shape: the extension, the exact length, and 40 hex digits.
pub fn extract_hash_from_filename(filename: &str) -> Result<[u8; HASH_LEN]> {
    if !filename.ends_with(PATCH_FILE_EXT) || filename.len() != PATCH_FILENAME_LEN {
        return Err(FormatError::BadFilename(filename.to_string()));
    }
    let digits = filename
        .get(..2 * HASH_LEN)
        .ok_or_else(|| FormatError::BadFilename(filename.to_string()))?;
    let mut hash = [0u8; HASH_LEN];
    hex::decode_to_slice(digits, &mut hash)
        .map_err(|_| FormatError::BadFilename(filename.to_string()))?;
    Ok(hash)
}

/// The canonical filename for container content.
pub fn content_filename(content: &[u8]) -> String {
    format!("{}{PATCH_FILE_EXT}", hex::encode(sha1_digest(content)))
}

impl PatchFile {
    /// Load and fully validate a container from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| FormatError::BadFilename(path.display().to_string()))?;
        let content = std::fs::read(path)?;
        Self::from_bytes(filename, &content)
    }

    /// Decode a container from its filename and raw content.
    ///
    /// Gate order: filename shape, content hash against the filename
    /// (the filename↔hash↔content double binding), cookie, then the
    /// sections in wire order. Every gate is hard; there is no partial
    /// success.
    pub fn from_bytes(filename: &str, content: &[u8]) -> Result<Self> {
        let file_hash = extract_hash_from_filename(filename)?;

        let computed = sha1_digest(content);
        if computed != file_hash {
            return Err(FormatError::HashMismatch {
                declared: hex::encode(file_hash),
                computed: hex::encode(computed),
            });
        }

        let mut parser = ByteParser::new(content);
        if parser.take(PATCH_FILE_COOKIE.len(), "cookie")? != PATCH_FILE_COOKIE {
            return Err(FormatError::BadSignature);
        }

        let target_version = parser.padded_string(VERSION_FIELD_LEN, "target version")?;
        let target_compile_date = parser.padded_string(VERSION_FIELD_LEN, "compile date")?;
        let crowbar_addr = parser.u64("crowbar address")?;
        let reloc_base = parser.u64("relocation base")?;

        let blob_len = parser.u32("blob length")? as usize;
        if blob_len == 0 || blob_len >= MAX_PATCH_SIZE {
            return Err(FormatError::Truncated("blob length"));
        }
        let blob = parser.take(blob_len, "blob")?.to_vec();

        let reloc_count = parser.u16("relocation count")? as usize;
        parser.plausible(reloc_count, 4, "relocation table")?;
        let mut relocations = Vec::with_capacity(reloc_count);
        for _ in 0..reloc_count {
            relocations.push(parser.u32("relocation entry")?);
        }

        let check_count = parser.u16("check count")? as usize;
        parser.plausible(check_count, 10, "check table")?;
        let mut checks = Vec::with_capacity(check_count);
        for _ in 0..check_count {
            let addr = parser.u64("check address")?;
            let len = parser.u16("check data length")? as usize;
            let expected = parser.take(len, "check data")?.to_vec();
            checks.push(CheckEntry { addr, expected });
        }

        let func_count = parser.u16("function count")? as usize;
        parser.plausible(func_count, 14, "function table")?;
        let mut functions = Vec::with_capacity(func_count);
        for _ in 0..func_count {
            let name = parser.short_string("function name")?;
            let old_addr = parser.u64("function address")?;
            let new_rel_offset = parser.u32("function entry offset")?;
            functions.push(FunctionPatch {
                name,
                old_addr,
                new_rel_offset,
            });
        }

        let table_count = parser.u16("table count")? as usize;
        parser.plausible(table_count, 12, "table patches")?;
        let mut tables = Vec::with_capacity(table_count);
        for _ in 0..table_count {
            let name = parser.short_string("table name")?;
            let addr = parser.u64("table address")?;
            let len = parser.u16("table data length")? as usize;
            let data = parser.take(len, "table data")?.to_vec();
            tables.push(TablePatch { name, addr, data });
        }

        debug!(
            filename,
            blob_len,
            relocations = relocations.len(),
            functions = functions.len(),
            "decoded patch container"
        );

        Ok(Self {
            file_hash,
            target_version,
            target_compile_date,
            crowbar_addr,
            reloc_base,
            blob,
            relocations,
            checks,
            functions,
            tables,
        })
    }

    /// Encode this container back into wire form (the packer side).
    ///
    /// The result's canonical filename comes from [`content_filename`].
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(128 + self.blob.len());
        out.extend_from_slice(&PATCH_FILE_COOKIE);
        out.extend_from_slice(&pad_string(&self.target_version));
        out.extend_from_slice(&pad_string(&self.target_compile_date));
        out.extend_from_slice(&self.crowbar_addr.to_le_bytes());
        out.extend_from_slice(&self.reloc_base.to_le_bytes());
        out.extend_from_slice(&(self.blob.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.blob);
        out.extend_from_slice(&(self.relocations.len() as u16).to_le_bytes());
        for reloc in &self.relocations {
            out.extend_from_slice(&reloc.to_le_bytes());
        }
        out.extend_from_slice(&(self.checks.len() as u16).to_le_bytes());
        for check in &self.checks {
            out.extend_from_slice(&check.addr.to_le_bytes());
            out.extend_from_slice(&(check.expected.len() as u16).to_le_bytes());
            out.extend_from_slice(&check.expected);
        }
        out.extend_from_slice(&(self.functions.len() as u16).to_le_bytes());
        for func in &self.functions {
            out.extend_from_slice(&(func.name.len() as u16).to_le_bytes());
            out.extend_from_slice(func.name.as_bytes());
            out.extend_from_slice(&func.old_addr.to_le_bytes());
            out.extend_from_slice(&func.new_rel_offset.to_le_bytes());
        }
        out.extend_from_slice(&(self.tables.len() as u16).to_le_bytes());
        for table in &self.tables {
            out.extend_from_slice(&(table.name.len() as u16).to_le_bytes());
            out.extend_from_slice(table.name.as_bytes());
            out.extend_from_slice(&table.addr.to_le_bytes());
            out.extend_from_slice(&(table.data.len() as u16).to_le_bytes());
            out.extend_from_slice(&table.data);
        }
        out
    }

    /// Gate a decoded container against the running target.
    ///
    /// Version and compile date must match exactly, and the applier
    /// refuses the legacy feature set outright rather than ignoring it.
    pub fn check_compatible(
        &self,
        running_version: &str,
        running_compile_date: &str,
    ) -> Result<()> {
        if self.target_version != running_version {
            return Err(FormatError::VersionMismatch { field: "version" });
        }
        if self.target_compile_date != running_compile_date {
            return Err(FormatError::VersionMismatch {
                field: "compile date",
            });
        }
        if self.crowbar_addr != 0 {
            return Err(FormatError::UnsupportedFeature("crowbar reference address"));
        }
        if !self.checks.is_empty() {
            return Err(FormatError::UnsupportedFeature("pre-flight check entries"));
        }
        if !self.tables.is_empty() {
            return Err(FormatError::UnsupportedFeature("table patches"));
        }
        Ok(())
    }

    /// Build the socket apply request for one function of this container.
    ///
    /// The socket protocol redirects a jump target to the start of the
    /// submitted blob, so only entry-offset-zero functions can be carried
    /// over it. `build_id` is the running target's content id and
    /// `canary` the bytes expected live at the function today; both come
    /// from outside the container.
    pub fn descriptor_for(
        &self,
        func: &FunctionPatch,
        build_id: [u8; HASH_LEN],
        canary: [u8; CANARY_LEN],
    ) -> Result<PatchDescriptor> {
        if func.new_rel_offset != 0 {
            return Err(FormatError::UnsupportedFeature(
                "non-zero function entry offset",
            ));
        }
        let descriptor = PatchDescriptor {
            build_id,
            name: func.name.clone(),
            content_hash: sha1_digest(&self.blob),
            blob: self.blob.clone(),
            canary,
            jump_target: func.old_addr,
            flags: PatchFlags::WRITE_ONCE,
            relocations: self.relocations.clone(),
        };
        descriptor.validate()?;
        Ok(descriptor)
    }
}

fn pad_string(s: &str) -> [u8; VERSION_FIELD_LEN] {
    let mut out = [0u8; VERSION_FIELD_LEN];
    let bytes = s.as_bytes();
    let n = bytes.len().min(VERSION_FIELD_LEN);
    out[..n].copy_from_slice(&bytes[..n]);
    out
}

/// Sequential decoder over the container bytes. Every accessor names the
/// section it is inside so truncation errors point somewhere useful.
struct ByteParser<'a> {
    rest: &'a [u8],
}

impl<'a> ByteParser<'a> {
    fn new(content: &'a [u8]) -> Self {
        Self { rest: content }
    }

    fn take(&mut self, n: usize, section: &'static str) -> Result<&'a [u8]> {
        if self.rest.len() < n {
            return Err(FormatError::Truncated(section));
        }
        let (head, tail) = self.rest.split_at(n);
        self.rest = tail;
        Ok(head)
    }

    fn u16(&mut self, section: &'static str) -> Result<u16> {
        let raw = self.take(2, section)?;
        Ok(u16::from_le_bytes([raw[0], raw[1]]))
    }

    fn u32(&mut self, section: &'static str) -> Result<u32> {
        let raw = self.take(4, section)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn u64(&mut self, section: &'static str) -> Result<u64> {
        let raw = self.take(8, section)?;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(raw);
        Ok(u64::from_le_bytes(bytes))
    }

    fn padded_string(&mut self, width: usize, section: &'static str) -> Result<String> {
        let raw = self.take(width, section)?;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(width);
        std::str::from_utf8(&raw[..end])
            .map(str::to_string)
            .map_err(|_| FormatError::Truncated(section))
    }

    /// A u16-length-prefixed short string, bounded by `MAX_NAME_LEN`.
    fn short_string(&mut self, section: &'static str) -> Result<String> {
        let len = self.u16(section)? as usize;
        if len == 0 || len > MAX_NAME_LEN {
            return Err(FormatError::Truncated(section));
        }
        let raw = self.take(len, section)?;
        std::str::from_utf8(raw)
            .map(str::to_string)
            .map_err(|_| FormatError::Truncated(section))
    }

    /// Reject a count no suffix of this file could satisfy before
    /// allocating for it.
    fn plausible(&self, count: usize, min_entry_size: usize, section: &'static str) -> Result<()> {
        if count * min_entry_size > self.rest.len() {
            return Err(FormatError::Truncated(section));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn sample_file() -> PatchFile {
        PatchFile {
            file_hash: [0; HASH_LEN], // recomputed by callers as needed
            target_version: "4.17.2".into(),
            target_compile_date: "2026-04-01".into(),
            crowbar_addr: 0,
            reloc_base: 0xffff_8000_0010_0000,
            blob: vec![0x90, 0x90, 0xC3, 0x00, 0x00, 0x00, 0x00],
            relocations: vec![3],
            checks: Vec::new(),
            functions: vec![FunctionPatch {
                name: "do_domctl".into(),
                old_addr: 0xffff_8000_0023_4560,
                new_rel_offset: 0,
            }],
            tables: Vec::new(),
        }
    }

    pub(crate) fn encoded_sample() -> (String, Vec<u8>) {
        let content = sample_file().to_bytes();
        (content_filename(&content), content)
    }

    #[test]
    fn roundtrip_through_container_bytes() {
        let (filename, content) = encoded_sample();
        let decoded = PatchFile::from_bytes(&filename, &content).unwrap();
        assert_eq!(decoded.target_version, "4.17.2");
        assert_eq!(decoded.target_compile_date, "2026-04-01");
        assert_eq!(decoded.blob, sample_file().blob);
        assert_eq!(decoded.relocations, vec![3]);
        assert_eq!(decoded.functions.len(), 1);
        assert_eq!(decoded.functions[0].name, "do_domctl");
        assert_eq!(decoded.file_hash, sha1_digest(&content));
    }

    #[test]
    fn filename_shape_gates() {
        assert!(extract_hash_from_filename("patch.bin").is_err());
        assert!(extract_hash_from_filename(&format!("{}{}", "a".repeat(39), ".raxlpxs")).is_err());
        assert!(extract_hash_from_filename(&format!(
            "{}{}",
            "z".repeat(40),
            ".raxlpxs"
        ))
        .is_err());
        let good = format!("{}{}", "0123456789abcdef0123456789abcdef01234567", ".raxlpxs");
        assert_eq!(
            extract_hash_from_filename(&good).unwrap()[..2],
            [0x01, 0x23]
        );
    }

    #[test]
    fn one_corrupt_byte_is_a_hash_mismatch() {
        let (filename, mut content) = encoded_sample();
        content[20] ^= 0x01;
        assert!(matches!(
            PatchFile::from_bytes(&filename, &content).unwrap_err(),
            FormatError::HashMismatch { .. }
        ));
    }

    #[test]
    fn wrong_cookie_is_bad_signature() {
        let mut content = sample_file().to_bytes();
        content[0] = b'Y';
        let filename = content_filename(&content);
        assert!(matches!(
            PatchFile::from_bytes(&filename, &content).unwrap_err(),
            FormatError::BadSignature
        ));
    }

    #[test]
    fn truncated_blob_reported_with_section() {
        let mut content = sample_file().to_bytes();
        content.truncate(PATCH_FILE_COOKIE.len() + 2 * VERSION_FIELD_LEN + 16 + 4 + 2);
        let filename = content_filename(&content);
        match PatchFile::from_bytes(&filename, &content).unwrap_err() {
            FormatError::Truncated(section) => assert_eq!(section, "blob"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn implausible_count_rejected_before_allocation() {
        let mut file = sample_file();
        file.functions.clear();
        let mut content = file.to_bytes();
        // Overwrite the function count (last 4 bytes are table count +
        // func count in this sample); patch func_count to u16::MAX.
        let len = content.len();
        content[len - 4..len - 2].copy_from_slice(&u16::MAX.to_le_bytes());
        let filename = content_filename(&content);
        assert!(matches!(
            PatchFile::from_bytes(&filename, &content).unwrap_err(),
            FormatError::Truncated("function table")
        ));
    }

    #[test]
    fn compatibility_gate_matches_exactly() {
        let file = sample_file();
        assert!(file.check_compatible("4.17.2", "2026-04-01").is_ok());
        assert!(matches!(
            file.check_compatible("4.17.3", "2026-04-01").unwrap_err(),
            FormatError::VersionMismatch { field: "version" }
        ));
        assert!(matches!(
            file.check_compatible("4.17.2", "2026-04-02").unwrap_err(),
            FormatError::VersionMismatch {
                field: "compile date"
            }
        ));
    }

    #[test]
    fn legacy_features_refused_not_ignored() {
        let mut file = sample_file();
        file.crowbar_addr = 0x1000;
        assert!(matches!(
            file.check_compatible("4.17.2", "2026-04-01").unwrap_err(),
            FormatError::UnsupportedFeature("crowbar reference address")
        ));

        let mut file = sample_file();
        file.checks.push(CheckEntry {
            addr: 0x2000,
            expected: vec![0x90],
        });
        assert!(matches!(
            file.check_compatible("4.17.2", "2026-04-01").unwrap_err(),
            FormatError::UnsupportedFeature("pre-flight check entries")
        ));

        let mut file = sample_file();
        file.tables.push(TablePatch {
            name: "hypercall_table".into(),
            addr: 0x3000,
            data: vec![0x00; 8],
        });
        assert!(matches!(
            file.check_compatible("4.17.2", "2026-04-01").unwrap_err(),
            FormatError::UnsupportedFeature("table patches")
        ));
    }

    #[test]
    fn legacy_container_with_checks_still_parses() {
        // Parsing and the compatibility gate are separate: the predecessor
        // tool's containers decode fine, they are just refused later.
        let mut file = sample_file();
        file.checks.push(CheckEntry {
            addr: 0xffff_8000_0000_1000,
            expected: vec![0x55, 0x48, 0x89, 0xe5],
        });
        file.tables.push(TablePatch {
            name: "exception_table".into(),
            addr: 0xffff_8000_0000_2000,
            data: vec![0xAA; 4],
        });
        let content = file.to_bytes();
        let decoded = PatchFile::from_bytes(&content_filename(&content), &content).unwrap();
        assert_eq!(decoded.checks.len(), 1);
        assert_eq!(decoded.tables.len(), 1);
        assert_eq!(decoded.checks[0].expected, vec![0x55, 0x48, 0x89, 0xe5]);
    }

    #[test]
    fn descriptor_for_entry_offset_zero_only() {
        let file = sample_file();
        let desc = file
            .descriptor_for(&file.functions[0], [7; HASH_LEN], [0xCC; CANARY_LEN])
            .unwrap();
        assert_eq!(desc.jump_target, file.functions[0].old_addr);
        assert_eq!(desc.blob, file.blob);
        assert_eq!(desc.content_hash, sha1_digest(&file.blob));
        assert!(desc.flags.contains(PatchFlags::WRITE_ONCE));

        let mut func = file.functions[0].clone();
        func.new_rel_offset = 0x40;
        assert!(matches!(
            file.descriptor_for(&func, [7; HASH_LEN], [0xCC; CANARY_LEN])
                .unwrap_err(),
            FormatError::UnsupportedFeature(_)
        ));
    }

    #[test]
    fn load_reads_from_disk() {
        let dir = std::env::temp_dir().join(format!(
            "sandpatch-format-load-{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let (filename, content) = encoded_sample();
        let path = dir.join(&filename);
        std::fs::write(&path, &content).unwrap();

        let decoded = PatchFile::load(&path).unwrap();
        assert_eq!(decoded.blob, sample_file().blob);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
