// Read-only input buffer: memory-mapped file under a shared lock, or owned bytes.
use std::fs::File;
use std::io;
use std::ops::Deref;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use libc::{EACCES, EPERM};
use memmap2::Mmap;

use crate::core::error::{Error, ErrorKind};

enum Backing {
    Mapped {
        // Keeps the shared lock alive for as long as the mapping is.
        _file: File,
        mmap: Mmap,
    },
    Owned(Vec<u8>),
}

pub struct InputBuffer {
    path: Option<PathBuf>,
    backing: Backing,
}

impl InputBuffer {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|err| open_error(err, &path))?;

        FileExt::try_lock_shared(&file).map_err(|err| {
            Error::new(lock_error_kind(&err))
                .with_message("failed to take shared lock on input")
                .with_path(&path)
                .with_source(err)
        })?;

        let len = file
            .metadata()
            .map(|meta| meta.len())
            .map_err(|err| Error::new(ErrorKind::Io).with_path(&path).with_source(err))?;

        if len == 0 {
            tracing::debug!(path = %path.display(), "input is empty; skipping mmap");
            return Ok(Self {
                path: Some(path),
                backing: Backing::Owned(Vec::new()),
            });
        }

        // Safety: the mapping is read-only and cooperating writers are excluded
        // by the shared lock held in `_file`.
        let mmap = unsafe {
            Mmap::map(&file).map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("failed to map input")
                    .with_path(&path)
                    .with_source(err)
            })?
        };

        Ok(Self {
            path: Some(path),
            backing: Backing::Mapped { _file: file, mmap },
        })
    }

    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            path: None,
            backing: Backing::Owned(bytes.into()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_mapped(&self) -> bool {
        matches!(self.backing, Backing::Mapped { .. })
    }

    pub fn as_bytes(&self) -> &[u8] {
        match &self.backing {
            Backing::Mapped { mmap, .. } => mmap,
            Backing::Owned(bytes) => bytes,
        }
    }
}

impl Deref for InputBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_bytes()
    }
}

fn open_error(err: io::Error, path: &Path) -> Error {
    let kind = match err.kind() {
        io::ErrorKind::NotFound => ErrorKind::NotFound,
        _ => lock_error_kind(&err),
    };
    Error::new(kind)
        .with_message("failed to open input")
        .with_path(path)
        .with_source(err)
}

fn lock_error_kind(err: &io::Error) -> ErrorKind {
    let errno = err.raw_os_error().unwrap_or_default();
    if errno == EACCES || errno == EPERM {
        return ErrorKind::Permission;
    }
    match err.kind() {
        io::ErrorKind::WouldBlock => ErrorKind::Busy,
        io::ErrorKind::PermissionDenied => ErrorKind::Permission,
        _ => ErrorKind::Io,
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::InputBuffer;
    use crate::core::error::ErrorKind;

    #[test]
    fn open_maps_file_contents() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        file.write_all(b"{\"x0\":1,\"y0\":2,\"x1\":3,\"y1\":4}")
            .expect("write");
        file.flush().expect("flush");

        let buffer = InputBuffer::open(file.path()).expect("open");
        assert!(buffer.is_mapped());
        assert_eq!(buffer.path(), Some(file.path()));
        assert_eq!(&buffer[..1], b"{");
        assert_eq!(buffer.len(), 29);
    }

    #[test]
    fn empty_file_is_not_mapped() {
        let file = tempfile::NamedTempFile::new().expect("tempfile");
        let buffer = InputBuffer::open(file.path()).expect("open");
        assert!(!buffer.is_mapped());
        assert!(buffer.is_empty());
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = InputBuffer::open(dir.path().join("absent.json"))
            .err()
            .expect("missing file should fail");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.path().is_some());
    }

    #[test]
    fn lock_errors_map_to_expected_kinds() {
        let err = std::io::Error::from_raw_os_error(libc::EWOULDBLOCK);
        assert_eq!(super::lock_error_kind(&err), ErrorKind::Busy);

        let err = std::io::Error::from_raw_os_error(libc::EACCES);
        assert_eq!(super::lock_error_kind(&err), ErrorKind::Permission);

        let err = std::io::Error::from_raw_os_error(libc::EIO);
        assert_eq!(super::lock_error_kind(&err), ErrorKind::Io);
    }
}
