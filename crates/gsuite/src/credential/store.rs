// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential persistence: one JSON file per identity with atomic writes.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::Context;
use parking_lot::RwLock;

use crate::credential::Credential;

/// Keyed load/save of one credential per identity.
///
/// `save` is a full replace. Implementations must never let a concurrent
/// `load` observe a partially written credential.
pub trait CredentialStore: Send + Sync {
    /// Return the stored credential, or `None` if none was ever saved.
    fn load(&self, identity: &str) -> anyhow::Result<Option<Credential>>;

    fn save(&self, identity: &str, credential: &Credential) -> anyhow::Result<()>;
}

/// File-backed store: `<dir>/.oauth2.<identity>.json`.
///
/// The identity is percent-encoded into the file name so distinct identities
/// never share a file.
pub struct FileCredentialStore {
    dir: PathBuf,
}

impl FileCredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, identity: &str) -> PathBuf {
        self.dir.join(format!(".oauth2.{}.json", encode_identity(identity)))
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self, identity: &str) -> anyhow::Result<Option<Credential>> {
        let path = self.path_for(identity);
        let contents = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", path.display()))
            }
        };
        let cred: Credential = serde_json::from_str(&contents)
            .with_context(|| format!("corrupt credential file {}", path.display()))?;
        if cred.identity != identity {
            anyhow::bail!(
                "credential file {} belongs to {}, not {identity}",
                path.display(),
                cred.identity
            );
        }
        Ok(Some(cred))
    }

    fn save(&self, identity: &str, credential: &Credential) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create {}", self.dir.display()))?;
        let json = serde_json::to_string_pretty(credential)?;
        write_atomic(&self.path_for(identity), json.as_bytes())?;
        tracing::debug!(account = %identity, "persisted credential");
        Ok(())
    }
}

/// In-process store, used for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryCredentialStore {
    creds: RwLock<HashMap<String, Credential>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self, identity: &str) -> anyhow::Result<Option<Credential>> {
        Ok(self.creds.read().get(identity).cloned())
    }

    fn save(&self, identity: &str, credential: &Credential) -> anyhow::Result<()> {
        self.creds.write().insert(identity.to_owned(), credential.clone());
        Ok(())
    }
}

/// Write to a unique temp file in the same directory, then rename over `path`.
///
/// The temp name carries PID + counter so concurrent saves never share a
/// temp file (a shorter write would otherwise leave trailing bytes). On unix
/// the temp file is created 0600, so the token is never readable by others.
fn write_atomic(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    static COUNTER: AtomicU32 = AtomicU32::new(0);

    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    let tmp_name = format!(
        "{}.{}.{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy(),
        std::process::id(),
        seq,
    );
    let tmp_path = path.with_file_name(tmp_name);

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options
        .open(&tmp_path)
        .with_context(|| format!("failed to create {}", tmp_path.display()))?;

    let written = file.write_all(bytes).and_then(|()| file.sync_all());
    drop(file);
    let result = written
        .with_context(|| format!("failed to write {}", tmp_path.display()))
        .and_then(|()| {
            std::fs::rename(&tmp_path, path)
                .with_context(|| format!("failed to rename into {}", path.display()))
        });
    if result.is_err() {
        let _ = std::fs::remove_file(&tmp_path);
    }
    result
}

/// Injective file-name encoding: keeps `[A-Za-z0-9@.+-]` and writes every
/// other byte (including `%` and `_`) as `%XX`. No output contains `/`.
fn encode_identity(identity: &str) -> String {
    let mut out = String::with_capacity(identity.len());
    for b in identity.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'@' | b'.' | b'-' | b'+' => {
                out.push(char::from(b))
            }
            _ => {
                let _ = write!(out, "%{b:02X}");
            }
        }
    }
    out
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
