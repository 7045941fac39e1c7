//! The capability the worker uses to open destinations.

use std::io;
use std::path::Path;

use async_trait::async_trait;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;

/// An open destination that lines can be appended to.
#[async_trait]
pub trait AppendHandle: Send + Sized + 'static {
    /// Write the whole buffer.
    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Push any buffered bytes down to the destination.
    async fn flush(&mut self) -> io::Result<()>;

    /// Close the handle. Consumes it, so a handle can only be closed once.
    async fn close(self) -> io::Result<()>;
}

/// Opens destinations for append. Called once per cache miss.
#[async_trait]
pub trait AppendOpener: Send + Sync + 'static {
    /// Handle type produced by this opener.
    type Handle: AppendHandle;

    /// Open `path` for append, creating it if needed. Existing content must be kept.
    async fn open_for_append(&self, path: &str) -> io::Result<Self::Handle>;
}

/// Opens real files through `tokio::fs`.
#[derive(Clone, Debug, Default)]
pub struct FsOpener {
    create_dirs: bool,
    sync_on_close: bool,
}

impl FsOpener {
    /// Creates a new `FsOpener` that expects parent directories to exist.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            create_dirs: false,
            sync_on_close: false,
        }
    }

    /// Also create missing parent directories when opening.
    #[must_use]
    pub const fn with_create_dirs(mut self, create_dirs: bool) -> Self {
        self.create_dirs = create_dirs;
        self
    }

    /// Also `fsync` each file when its handle is closed. Off by default, since every
    /// eviction then blocks the worker on the disk.
    #[must_use]
    pub const fn with_sync_on_close(mut self, sync_on_close: bool) -> Self {
        self.sync_on_close = sync_on_close;
        self
    }
}

#[async_trait]
impl AppendOpener for FsOpener {
    type Handle = FsHandle;

    async fn open_for_append(&self, path: &str) -> io::Result<FsHandle> {
        let parent = Path::new(path)
            .parent()
            .filter(|parent| self.create_dirs && !parent.as_os_str().is_empty());
        if let Some(parent) = parent {
            fs::create_dir_all(parent).await?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path).await?;

        Ok(FsHandle {
            file,
            sync_on_close: self.sync_on_close,
        })
    }
}

/// Handle produced by [`FsOpener`].
#[derive(Debug)]
pub struct FsHandle {
    file: File,
    sync_on_close: bool,
}

#[async_trait]
impl AppendHandle for FsHandle {
    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.file.write_all(buf).await
    }

    async fn flush(&mut self) -> io::Result<()> {
        self.file.flush().await
    }

    async fn close(mut self) -> io::Result<()> {
        self.file.flush().await?;

        if self.sync_on_close {
            self.file.sync_all().await?;
        }

        Ok(())
    }
}
