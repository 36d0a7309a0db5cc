//! Core object model for sqlgit
//!
//! Git objects are content-addressed: the id of an object is the SHA-1 of
//! `"<kind> <len>\0"` followed by its content. Only the parts of the commit,
//! tree and tag formats needed to follow links between objects are parsed.

use bytes::Bytes;
use sha1::{Digest, Sha1};
use std::fmt;
use std::io::Cursor;
use std::str::FromStr;

use crate::storage::{Result, StorageError};

/// Length of a raw object id in bytes
pub const OBJECT_ID_LEN: usize = 20;

/// Length of a hex-encoded object id
pub const OBJECT_ID_HEX_LEN: usize = OBJECT_ID_LEN * 2;

/// Tree entry mode of a submodule commit; such entries point outside the repository
pub const GITLINK_MODE: u32 = 0o160000;

/// Tree entry mode of a subdirectory
pub const TREE_MODE: u32 = 0o40000;

/// Tree entry mode of a regular file
pub const FILE_MODE: u32 = 0o100644;

/// Unique identifier for any stored object
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId([u8; OBJECT_ID_LEN]);

impl ObjectId {
    /// Create a new ObjectId from raw bytes
    pub fn new(bytes: [u8; OBJECT_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// The null id, used by push requests to mean "delete"
    pub fn zero() -> Self {
        Self([0u8; OBJECT_ID_LEN])
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// Compute the id of an object from its kind and content
    pub fn compute(kind: ObjectKind, data: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(encode_header(kind, data.len() as u64));
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    /// Build an id from a raw 20-byte slice
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; OBJECT_ID_LEN] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    /// Convert to hexadecimal string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from a full-length hexadecimal string
    pub fn from_hex(hex_str: &str) -> std::result::Result<Self, hex::FromHexError> {
        if hex_str.len() != OBJECT_ID_HEX_LEN {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; OBJECT_ID_LEN];
        hex::decode_to_slice(hex_str, &mut arr)?;
        Ok(Self(arr))
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; OBJECT_ID_LEN] {
        &self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for ObjectId {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

/// Object type discriminator, numbered with git's type codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Commit,
    Tree,
    Blob,
    Tag,
}

impl ObjectKind {
    /// Numeric type code stored in the `type` column
    pub fn type_code(self) -> i64 {
        match self {
            ObjectKind::Commit => 1,
            ObjectKind::Tree => 2,
            ObjectKind::Blob => 3,
            ObjectKind::Tag => 4,
        }
    }

    pub fn from_type_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(ObjectKind::Commit),
            2 => Some(ObjectKind::Tree),
            3 => Some(ObjectKind::Blob),
            4 => Some(ObjectKind::Tag),
            _ => None,
        }
    }

    /// Name used in the object header
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectKind::Commit => "commit",
            ObjectKind::Tree => "tree",
            ObjectKind::Blob => "blob",
            ObjectKind::Tag => "tag",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "commit" => Some(ObjectKind::Commit),
            "tree" => Some(ObjectKind::Tree),
            "blob" => Some(ObjectKind::Blob),
            "tag" => Some(ObjectKind::Tag),
            _ => None,
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encode the `"<kind> <len>\0"` header that prefixes content when hashing
pub fn encode_header(kind: ObjectKind, len: u64) -> Vec<u8> {
    let mut header = format!("{} {}", kind.as_str(), len).into_bytes();
    header.push(0);
    header
}

/// An object as stored: kind plus content bytes (without header)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawObject {
    pub kind: ObjectKind,
    pub data: Bytes,
}

impl RawObject {
    pub fn new(kind: ObjectKind, data: impl Into<Bytes>) -> Self {
        Self {
            kind,
            data: data.into(),
        }
    }

    /// Compute the object ID
    pub fn id(&self) -> ObjectId {
        ObjectId::compute(self.kind, &self.data)
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Stream over the content bytes
    pub fn reader(&self) -> Cursor<Bytes> {
        Cursor::new(self.data.clone())
    }

    /// Objects this object points at, with the kind each link implies.
    ///
    /// Commits yield their tree and parents, trees their entries (except
    /// submodule links), tags their target. Blobs have no links.
    pub fn links(&self) -> Result<Vec<(ObjectId, ObjectKind)>> {
        match self.kind {
            ObjectKind::Blob => Ok(Vec::new()),
            ObjectKind::Commit => {
                let commit = Commit::parse(&self.data)?;
                let mut links = Vec::with_capacity(commit.parents.len() + 1);
                links.push((commit.tree, ObjectKind::Tree));
                links.extend(commit.parents.into_iter().map(|p| (p, ObjectKind::Commit)));
                Ok(links)
            }
            ObjectKind::Tree => Ok(Tree::parse(&self.data)?
                .entries
                .into_iter()
                .filter(|e| !e.is_gitlink())
                .map(|e| {
                    let kind = if e.is_tree() { ObjectKind::Tree } else { ObjectKind::Blob };
                    (e.id, kind)
                })
                .collect()),
            ObjectKind::Tag => {
                let tag = Tag::parse(&self.data)?;
                Ok(vec![(tag.object, tag.kind)])
            }
        }
    }
}

/// Directory tree entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    /// Unix-style mode (e.g. 0o100644, 0o40000)
    pub mode: u32,
    /// Name of the entry
    pub name: String,
    /// Object ID (points to Blob or Tree)
    pub id: ObjectId,
}

impl TreeEntry {
    pub fn new(mode: u32, name: impl Into<String>, id: ObjectId) -> Self {
        Self {
            mode,
            name: name.into(),
            id,
        }
    }

    pub fn is_tree(&self) -> bool {
        self.mode == TREE_MODE
    }

    pub fn is_gitlink(&self) -> bool {
        self.mode == GITLINK_MODE
    }

    // git orders tree entries as if directory names ended with '/'
    fn sort_key(&self) -> Vec<u8> {
        let mut key = self.name.as_bytes().to_vec();
        if self.is_tree() {
            key.push(b'/');
        }
        key
    }
}

/// Directory object
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tree {
    pub entries: Vec<TreeEntry>,
}

impl Tree {
    pub fn new(mut entries: Vec<TreeEntry>) -> Self {
        entries.sort_by_key(|e| e.sort_key());
        Self { entries }
    }

    /// Parse `<octal mode> <name>\0<20-byte id>` records
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut entries = Vec::new();
        let mut rest = data;
        while !rest.is_empty() {
            let space = position(rest, b' ').ok_or_else(|| corrupt("tree entry without mode"))?;
            let mode = std::str::from_utf8(&rest[..space])
                .ok()
                .and_then(|m| u32::from_str_radix(m, 8).ok())
                .ok_or_else(|| corrupt("tree entry with invalid mode"))?;
            rest = &rest[space + 1..];
            let nul = position(rest, 0).ok_or_else(|| corrupt("tree entry without name"))?;
            let name = String::from_utf8_lossy(&rest[..nul]).into_owned();
            rest = &rest[nul + 1..];
            if rest.len() < OBJECT_ID_LEN {
                return Err(corrupt("truncated tree entry"));
            }
            let id = ObjectId::from_slice(&rest[..OBJECT_ID_LEN])
                .ok_or_else(|| corrupt("truncated tree entry"))?;
            rest = &rest[OBJECT_ID_LEN..];
            entries.push(TreeEntry { mode, name, id });
        }
        Ok(Self { entries })
    }

    /// Serialize to git's binary tree format
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for entry in &self.entries {
            out.extend_from_slice(format!("{:o} {}", entry.mode, entry.name).as_bytes());
            out.push(0);
            out.extend_from_slice(entry.id.as_bytes());
        }
        out
    }
}

/// Commit object, reduced to its links plus the fields needed to write one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    /// Tree object ID for this commit
    pub tree: ObjectId,
    /// Parent commit IDs (empty for initial commit)
    pub parents: Vec<ObjectId>,
    /// `Name <email>` of author and committer
    pub author: String,
    /// Commit timestamp (Unix seconds)
    pub timestamp: i64,
    pub message: String,
}

impl Commit {
    pub fn new(tree: ObjectId, parents: Vec<ObjectId>, author: impl Into<String>, timestamp: i64, message: impl Into<String>) -> Self {
        Self {
            tree,
            parents,
            author: author.into(),
            timestamp,
            message: message.into(),
        }
    }

    /// Parse the header block of a commit
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut tree = None;
        let mut parents = Vec::new();
        let mut author = String::new();
        let mut timestamp = 0;
        let (headers, message) = split_message(data);
        for line in headers.split(|b| *b == b'\n') {
            if let Some(hex) = line.strip_prefix(b"tree ") {
                tree = Some(parse_hex_id(hex)?);
            } else if let Some(hex) = line.strip_prefix(b"parent ") {
                parents.push(parse_hex_id(hex)?);
            } else if let Some(sig) = line.strip_prefix(b"author ") {
                let sig = String::from_utf8_lossy(sig);
                // "<name> <email> <time> <tz>"
                let mut fields = sig.rsplitn(3, ' ');
                let _tz = fields.next();
                timestamp = fields.next().and_then(|t| t.parse().ok()).unwrap_or(0);
                author = fields.next().unwrap_or_default().to_string();
            }
        }
        Ok(Self {
            tree: tree.ok_or_else(|| corrupt("commit without tree"))?,
            parents,
            author,
            timestamp,
            message: String::from_utf8_lossy(message).into_owned(),
        })
    }

    /// Serialize to git's commit format
    pub fn encode(&self) -> Vec<u8> {
        let mut out = format!("tree {}\n", self.tree);
        for parent in &self.parents {
            out.push_str(&format!("parent {}\n", parent));
        }
        out.push_str(&format!("author {} {} +0000\n", self.author, self.timestamp));
        out.push_str(&format!("committer {} {} +0000\n", self.author, self.timestamp));
        out.push('\n');
        out.push_str(&self.message);
        out.into_bytes()
    }
}

/// Annotated tag object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub object: ObjectId,
    pub kind: ObjectKind,
    pub name: String,
}

impl Tag {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut object = None;
        let mut kind = None;
        let mut name = String::new();
        let (headers, _) = split_message(data);
        for line in headers.split(|b| *b == b'\n') {
            if let Some(hex) = line.strip_prefix(b"object ") {
                object = Some(parse_hex_id(hex)?);
            } else if let Some(k) = line.strip_prefix(b"type ") {
                kind = ObjectKind::from_name(&String::from_utf8_lossy(k));
            } else if let Some(n) = line.strip_prefix(b"tag ") {
                name = String::from_utf8_lossy(n).into_owned();
            }
        }
        Ok(Self {
            object: object.ok_or_else(|| corrupt("tag without object"))?,
            kind: kind.ok_or_else(|| corrupt("tag without type"))?,
            name,
        })
    }

    pub fn encode(&self, tagger: &str, message: &str) -> Vec<u8> {
        format!(
            "object {}\ntype {}\ntag {}\ntagger {} 0 +0000\n\n{}",
            self.object, self.kind, self.name, tagger, message
        )
        .into_bytes()
    }
}

fn position(data: &[u8], needle: u8) -> Option<usize> {
    data.iter().position(|b| *b == needle)
}

fn split_message(data: &[u8]) -> (&[u8], &[u8]) {
    match data.windows(2).position(|w| w == b"\n\n") {
        Some(pos) => (&data[..pos], &data[pos + 2..]),
        None => (data, &[]),
    }
}

fn parse_hex_id(hex: &[u8]) -> Result<ObjectId> {
    std::str::from_utf8(hex)
        .ok()
        .and_then(|s| ObjectId::from_hex(s.trim()).ok())
        .ok_or_else(|| corrupt("invalid object id in header"))
}

fn corrupt(msg: &str) -> StorageError {
    StorageError::Corrupt(msg.to_string())
}
