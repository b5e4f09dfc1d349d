//! One-file-per-session persistence.
//!
//! File layout, all words in native byte order:
//!
//! ```text
//! [BOUNDARY][file_size:u32][RECORD_SIZE:u32][record][BOUNDARY][BEGIN .. END][BOUNDARY]
//! ```
//!
//! Every read and write of a session file happens under a single store-wide
//! I/O lock. Writes go to a hidden temporary sibling which is then renamed
//! over the target.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, warn};
use zerocopy::IntoBytes;

use crate::codec::{self, BEGIN, BOUNDARY, END, WORD};
use crate::error::{Error, Result};
use crate::expiry::{ExpiryPolicy, now};
use crate::pool::Pool;
use crate::record::{RECORD_SIZE, RecordHeader, SessionId, SessionRecord, SessionState};

const SIZE_AT: usize = WORD;
const RECORD_SIZE_AT: usize = 2 * WORD;
const RECORD_AT: usize = 3 * WORD;
const MIDDLE_AT: usize = RECORD_AT + RECORD_SIZE;
const TREE_AT: usize = MIDDLE_AT + WORD;

/// Smallest well-formed file: the fixed header, an empty tree and the
/// trailing boundary.
pub const MIN_FILE_LEN: usize = TREE_AT + 3 * WORD;

fn word_at(buf: &[u8], at: usize) -> u32 {
    let mut word = [0u8; WORD];
    word.copy_from_slice(&buf[at..at + WORD]);
    u32::from_ne_bytes(word)
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> Error + '_ {
    move |source| Error::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Serialize a record and its value tree into the file layout.
pub fn encode_file(record: &SessionRecord) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(MIN_FILE_LEN + 256);
    out.extend_from_slice(&BOUNDARY.to_ne_bytes());
    out.extend_from_slice(&0u32.to_ne_bytes());
    out.extend_from_slice(&(RECORD_SIZE as u32).to_ne_bytes());
    out.extend_from_slice(record.to_header().as_bytes());
    out.extend_from_slice(&BOUNDARY.to_ne_bytes());
    codec::encode(&record.tree, &mut out)?;
    out.extend_from_slice(&BOUNDARY.to_ne_bytes());

    let size = u32::try_from(out.len())
        .map_err(|_| Error::Corrupt(format!("session of {} bytes is too large", out.len())))?;
    out[SIZE_AT..SIZE_AT + WORD].copy_from_slice(&size.to_ne_bytes());
    Ok(out)
}

/// Validate the fixed framing of a session file without decoding the tree.
pub fn check_structure(buf: &[u8]) -> Result<()> {
    if buf.len() < MIN_FILE_LEN {
        return Err(Error::Corrupt(format!(
            "file is {} bytes, shorter than the {MIN_FILE_LEN} byte minimum",
            buf.len()
        )));
    }
    if word_at(buf, 0) != BOUNDARY {
        return Err(Error::Corrupt("missing leading boundary".into()));
    }
    let stored = word_at(buf, SIZE_AT) as usize;
    if stored != buf.len() {
        return Err(Error::Corrupt(format!(
            "stored size {stored} does not match file size {}",
            buf.len()
        )));
    }
    let record_size = word_at(buf, RECORD_SIZE_AT) as usize;
    if record_size != RECORD_SIZE {
        return Err(Error::Corrupt(format!(
            "record size {record_size} does not match expected {RECORD_SIZE}"
        )));
    }
    if word_at(buf, MIDDLE_AT) != BOUNDARY {
        return Err(Error::Corrupt("missing boundary after record".into()));
    }
    if word_at(buf, TREE_AT) != BEGIN {
        return Err(Error::Corrupt("value tree does not open with BEGIN".into()));
    }
    let tail = buf.len() - WORD;
    if word_at(buf, tail) != BOUNDARY {
        return Err(Error::Corrupt("missing trailing boundary".into()));
    }
    if word_at(buf, tail - WORD) != END {
        return Err(Error::Corrupt("value tree is not closed before trailing boundary".into()));
    }
    Ok(())
}

fn read_header_into(buf: &[u8], record: &mut SessionRecord) -> Result<()> {
    check_structure(buf)?;
    let header = RecordHeader::read(&buf[RECORD_AT..MIDDLE_AT])?;
    record.apply_header(&header)
}

fn read_tree_into(buf: &[u8], record: &mut SessionRecord) -> Result<()> {
    let body = &buf[TREE_AT..buf.len() - WORD];
    let (tree, used) = codec::decode(body)?;
    if used != body.len() {
        return Err(Error::Corrupt(format!(
            "{} trailing bytes after value tree",
            body.len() - used
        )));
    }
    record.tree = tree;
    Ok(())
}

/// Fully decode a session file, without expiry checks.
pub fn decode_file(buf: &[u8]) -> Result<SessionRecord> {
    let mut record = SessionRecord::default();
    read_header_into(buf, &mut record)?;
    read_tree_into(buf, &mut record)?;
    Ok(record)
}

/// Check that `dir` exists, is a directory and accepts new files.
pub fn validate_dir(dir: &Path) -> Result<()> {
    let unusable = |reason: String| Error::Directory {
        path: dir.to_path_buf(),
        reason,
    };

    let meta = fs::metadata(dir).map_err(|e| unusable(e.to_string()))?;
    if !meta.is_dir() {
        return Err(unusable("not a directory".into()));
    }

    let probe = dir.join(format!(".keeper-probe-{}", std::process::id()));
    fs::write(&probe, b"").map_err(|e| unusable(format!("not writable: {e}")))?;
    let _ = fs::remove_file(&probe);
    Ok(())
}

/// Session files in a single directory, named by session id.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    policy: ExpiryPolicy,
    io: Mutex<()>,
    pool: Arc<Pool<SessionRecord>>,
}

impl FileStore {
    /// Open a store over an existing, writable directory.
    pub fn open(
        dir: impl Into<PathBuf>,
        policy: ExpiryPolicy,
        pool: Arc<Pool<SessionRecord>>,
    ) -> Result<Self> {
        let dir = dir.into();
        validate_dir(&dir)?;
        Ok(Self {
            dir,
            policy,
            io: Mutex::new(()),
            pool,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn policy(&self) -> ExpiryPolicy {
        self.policy
    }

    pub fn pool(&self) -> &Arc<Pool<SessionRecord>> {
        &self.pool
    }

    pub fn path_for(&self, id: &SessionId) -> PathBuf {
        self.dir.join(id.as_str())
    }

    /// Hold the store-wide I/O lock.
    pub(crate) fn lock_io(&self) -> MutexGuard<'_, ()> {
        self.io.lock()
    }

    /// Write `record` to its file, replacing any previous version.
    pub fn save(&self, record: &SessionRecord) -> Result<()> {
        let bytes = encode_file(record)?;
        let path = self.path_for(&record.id);
        let tmp = self.dir.join(format!(".{}.tmp", record.id));

        let _io = self.lock_io();
        fs::write(&tmp, &bytes).map_err(io_error(&tmp))?;
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(io_error(&path)(e));
        }
        debug!(session_id = %record.id, bytes = bytes.len(), "Saved session");
        Ok(())
    }

    /// Read, validate and decode the session file for `id`.
    ///
    /// Expired sessions are reported as [`Error::Expired`] and left on disk.
    pub fn read(&self, id: &SessionId) -> Result<SessionRecord> {
        let path = self.path_for(id);
        let buf = {
            let _io = self.lock_io();
            fs::read(&path).map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Error::NotFound(id.to_string())
                } else {
                    io_error(&path)(e)
                }
            })?
        };

        let mut record = self.pool.acquire();
        match self.decode_live(&buf, id, &mut record) {
            Ok(()) => Ok(record),
            Err(e) => {
                self.pool.release(record);
                Err(e)
            }
        }
    }

    fn decode_live(&self, buf: &[u8], id: &SessionId, record: &mut SessionRecord) -> Result<()> {
        read_header_into(buf, record)?;
        if record.id != *id {
            return Err(Error::Corrupt(format!("file holds session {}", record.id)));
        }
        let now = now();
        if self.policy.record_expired_at(record, now) {
            return Err(Error::Expired(id.to_string()));
        }
        read_tree_into(buf, record)?;
        record.state = SessionState::LOADED;
        record.opened_at = now;
        Ok(())
    }

    /// Load a live session, or None if it is absent, corrupt or expired.
    pub fn load(&self, id: &SessionId) -> Option<SessionRecord> {
        match self.read(id) {
            Ok(record) => {
                debug!(session_id = %id, "Loaded session from disk");
                Some(record)
            }
            Err(e) if e.is_corruption() => {
                warn!(session_id = %id, error = %e, "Discarding unreadable session file");
                None
            }
            Err(e) => {
                debug!(session_id = %id, reason = %e, "Session not loaded");
                None
            }
        }
    }

    /// Unlink the file for `id`. Returns true if a file was removed.
    pub fn delete(&self, id: &SessionId) -> bool {
        let path = self.path_for(id);
        let _io = self.lock_io();
        match fs::remove_file(&path) {
            Ok(()) => true,
            Err(e) => {
                debug!(session_id = %id, error = %e, "Session file not deleted");
                false
            }
        }
    }
}
