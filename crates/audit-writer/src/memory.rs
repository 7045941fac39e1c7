//! In-memory implementation of the append capability for tests and local development.

use crate::opener::{AppendHandle, AppendOpener};

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

#[derive(Debug, Default)]
struct Inner {
    contents: HashMap<String, Vec<u8>>,
    opens: HashMap<String, usize>,
    closes: HashMap<String, usize>,
    open_handles: HashMap<String, usize>,
    fail_open: HashSet<String>,
    fail_write: HashSet<String>,
    fail_close: HashSet<String>,
    panic_open: HashSet<String>,
    panic_close: HashSet<String>,
}

/// Opener that appends into shared in-memory buffers and records every open and close.
#[derive(Clone, Debug, Default)]
pub struct MemoryOpener {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryOpener {
    /// Creates a new `MemoryOpener`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything appended to `path` so far, as UTF-8.
    #[must_use]
    pub fn content(&self, path: &str) -> Option<String> {
        self.inner
            .lock()
            .contents
            .get(path)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    /// Number of successful opens of `path`.
    #[must_use]
    pub fn open_count(&self, path: &str) -> usize {
        self.inner.lock().opens.get(path).copied().unwrap_or(0)
    }

    /// Number of close attempts on handles for `path`, failed ones included.
    #[must_use]
    pub fn close_count(&self, path: &str) -> usize {
        self.inner.lock().closes.get(path).copied().unwrap_or(0)
    }

    /// Number of handles for `path` that are open and not yet closed.
    #[must_use]
    pub fn open_handles(&self, path: &str) -> usize {
        self.inner.lock().open_handles.get(path).copied().unwrap_or(0)
    }

    /// Make opens of `path` fail (or succeed again).
    pub fn set_fail_open(&self, path: &str, fail: bool) {
        toggle(&mut self.inner.lock().fail_open, path, fail);
    }

    /// Make writes to `path` fail (or succeed again).
    pub fn set_fail_write(&self, path: &str, fail: bool) {
        toggle(&mut self.inner.lock().fail_write, path, fail);
    }

    /// Make closes of handles for `path` fail (or succeed again).
    pub fn set_fail_close(&self, path: &str, fail: bool) {
        toggle(&mut self.inner.lock().fail_close, path, fail);
    }

    /// Make opens of `path` panic.
    pub fn set_panic_open(&self, path: &str, panic: bool) {
        toggle(&mut self.inner.lock().panic_open, path, panic);
    }

    /// Make closes of handles for `path` panic. The close is still recorded.
    pub fn set_panic_close(&self, path: &str, panic: bool) {
        toggle(&mut self.inner.lock().panic_close, path, panic);
    }
}

fn toggle(set: &mut HashSet<String>, path: &str, on: bool) {
    if on {
        set.insert(path.to_string());
    } else {
        set.remove(path);
    }
}

#[async_trait]
impl AppendOpener for MemoryOpener {
    type Handle = MemoryHandle;

    async fn open_for_append(&self, path: &str) -> io::Result<MemoryHandle> {
        let mut inner = self.inner.lock();

        if inner.panic_open.contains(path) {
            drop(inner);
            panic!("injected panic opening {path}");
        }

        if inner.fail_open.contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("injected open failure for {path}"),
            ));
        }

        *inner.opens.entry(path.to_string()).or_default() += 1;
        *inner.open_handles.entry(path.to_string()).or_default() += 1;
        inner.contents.entry(path.to_string()).or_default();
        drop(inner);

        Ok(MemoryHandle {
            path: path.to_string(),
            inner: self.inner.clone(),
        })
    }
}

/// Handle produced by [`MemoryOpener`].
#[derive(Debug)]
pub struct MemoryHandle {
    path: String,
    inner: Arc<Mutex<Inner>>,
}

#[async_trait]
impl AppendHandle for MemoryHandle {
    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        let mut inner = self.inner.lock();

        if inner.fail_write.contains(&self.path) {
            return Err(io::Error::other(format!(
                "injected write failure for {}",
                self.path
            )));
        }

        inner
            .contents
            .entry(self.path.clone())
            .or_default()
            .extend_from_slice(buf);

        Ok(())
    }

    async fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    async fn close(self) -> io::Result<()> {
        let mut inner = self.inner.lock();

        *inner.closes.entry(self.path.clone()).or_default() += 1;
        if let Some(open) = inner.open_handles.get_mut(&self.path) {
            *open = open.saturating_sub(1);
        }

        if inner.panic_close.contains(&self.path) {
            drop(inner);
            panic!("injected panic closing {}", self.path);
        }

        if inner.fail_close.contains(&self.path) {
            return Err(io::Error::other(format!(
                "injected close failure for {}",
                self.path
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_opens_and_content() {
        let opener = MemoryOpener::new();

        let mut handle = opener.open_for_append("a").await.unwrap();
        handle.write_all(b"1\n").await.unwrap();
        handle.close().await.unwrap();

        let mut handle = opener.open_for_append("a").await.unwrap();
        handle.write_all(b"2\n").await.unwrap();

        assert_eq!(opener.content("a").as_deref(), Some("1\n2\n"));
        assert_eq!(opener.open_count("a"), 2);
        assert_eq!(opener.close_count("a"), 1);
        assert_eq!(opener.open_handles("a"), 1);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let opener = MemoryOpener::new();

        opener.set_fail_open("a", true);
        assert!(opener.open_for_append("a").await.is_err());
        assert_eq!(opener.open_count("a"), 0);

        opener.set_fail_open("a", false);
        opener.set_fail_write("a", true);
        let mut handle = opener.open_for_append("a").await.unwrap();
        assert!(handle.write_all(b"x").await.is_err());

        opener.set_fail_close("a", true);
        assert!(handle.close().await.is_err());
        assert_eq!(opener.open_handles("a"), 0);
    }
}
