//! File cache of validated annotations, keyed by prompt hash.
//!
//! Best-effort: read and write errors are swallowed so a broken cache never fails a run.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use super::client::CompletionRequest;
use super::Annotation;

#[derive(Debug, Clone)]
pub struct AnnotationCache {
    dir: PathBuf,
}

impl AnnotationCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let _ = fs::create_dir_all(&dir); // best-effort
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn get(&self, key: &str) -> Option<Annotation> {
        let s = fs::read_to_string(self.path(key)).ok()?;
        serde_json::from_str(&s).ok()
    }

    pub fn put(&self, key: &str, value: &Annotation) {
        if let Err(e) = self.write(key, value) {
            tracing::debug!(target: "annotate", error = %e, "annotation cache write failed");
        }
    }

    fn write(&self, key: &str, value: &Annotation) -> io::Result<()> {
        let path = self.path(key);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec(value).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let mut f = fs::File::create(&tmp)?;
        f.write_all(&json)?;
        fs::rename(tmp, path)?;
        Ok(())
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

/// SHA-256 over model and both prompts, hex.
pub fn cache_key(model: &str, req: &CompletionRequest) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    for part in [model, &req.system, &req.user] {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for b in digest.iter() {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}
