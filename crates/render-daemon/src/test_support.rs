//! Test doubles: fake editly executables and in-memory object stores.
//!
//! All scripts are written once, before any of them runs. Writing an
//! executable while other test threads fork can make exec fail with
//! ETXTBSY, so nothing is created lazily per test.

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};
use async_trait::async_trait;
use crate::error::StorageError;
use crate::storage::ObjectStore;

/// Object store kept in memory; refuses to overwrite like the real one
#[derive(Default)]
pub struct MemoryStore {
    pub objects: Mutex<HashMap<String, Vec<u8>>>,
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, _content_type: &str) -> Result<(), StorageError> {
        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(key) {
            return Err(StorageError::Rejected { status: 409, body: "exists".to_string() });
        }
        objects.insert(key.to_string(), bytes);
        Ok(())
    }

    fn public_url(&self, key: &str) -> Result<String, StorageError> {
        Ok(format!("https://cdn.test/{}", key))
    }
}

/// Object store whose uploads always fail
pub struct FailingStore;

#[async_trait]
impl ObjectStore for FailingStore {
    async fn put(&self, _key: &str, _bytes: Vec<u8>, _content_type: &str) -> Result<(), StorageError> {
        Err(StorageError::Rejected { status: 500, body: "storage down".to_string() })
    }

    fn public_url(&self, key: &str) -> Result<String, StorageError> {
        Ok(format!("https://cdn.test/{}", key))
    }
}

#[derive(Debug, Clone, Copy)]
pub enum FakeEditly {
    /// Copies the spec to the output path
    Ok,
    /// Like `Ok`, after a short pause so concurrent jobs overlap
    Slow,
    /// Writes about 1 MiB so streaming spans many chunks
    Large,
    /// Exits 0 without producing output
    NoOutput,
    /// Produces output but exits 2
    Fails,
    /// Never finishes on its own
    Hangs,
}

const PREAMBLE: &str = "#!/bin/sh
if [ \"$DISPLAY\" != \":99\" ]; then echo \"unexpected DISPLAY=$DISPLAY\" >&2; exit 3; fi
if [ ! -f spec.json ]; then echo \"not running in workspace\" >&2; exit 4; fi
";

fn script(kind: FakeEditly) -> (&'static str, String) {
    let body = match kind {
        FakeEditly::Ok => "echo \"rendering $1\"\necho progress >&2\ncp \"$1\" \"$3\"\n",
        FakeEditly::Slow => "sleep 0.3\ncp \"$1\" \"$3\"\n",
        FakeEditly::Large => "head -c 1048576 /dev/zero > \"$3\"\n",
        FakeEditly::NoOutput => "echo done\nexit 0\n",
        FakeEditly::Fails => "cp \"$1\" \"$3\"\necho boom >&2\nexit 2\n",
        FakeEditly::Hangs => "exec sleep 30\n",
    };
    let name = match kind {
        FakeEditly::Ok => "editly-ok",
        FakeEditly::Slow => "editly-slow",
        FakeEditly::Large => "editly-large",
        FakeEditly::NoOutput => "editly-no-output",
        FakeEditly::Fails => "editly-fails",
        FakeEditly::Hangs => "editly-hangs",
    };
    (name, format!("{}{}", PREAMBLE, body))
}

#[cfg(unix)]
fn scripts_dir() -> &'static tempfile::TempDir {
    static DIR: OnceLock<tempfile::TempDir> = OnceLock::new();
    DIR.get_or_init(|| {
        let dir = tempfile::tempdir().expect("create fake editly dir");
        for kind in [
            FakeEditly::Ok,
            FakeEditly::Slow,
            FakeEditly::Large,
            FakeEditly::NoOutput,
            FakeEditly::Fails,
            FakeEditly::Hangs,
        ] {
            let (name, contents) = script(kind);
            let path = dir.path().join(name);
            std::fs::write(&path, contents).expect("write fake editly");
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
                .expect("chmod fake editly");
        }
        dir
    })
}

/// Path to the fake editly of the given kind
#[cfg(unix)]
pub fn fake_editly(kind: FakeEditly) -> PathBuf {
    scripts_dir().path().join(script(kind).0)
}
