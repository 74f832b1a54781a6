use chrono_tz::Tz;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::WriteError;
use crate::output::file_stamp;

/// Append-only store of raw fetched pages, one file per fetch.
#[derive(Debug, Clone)]
pub struct PageArchive {
    dir: PathBuf,
    tz: Tz,
}

impl PageArchive {
    pub fn new(dir: impl Into<PathBuf>, tz: Tz) -> Self {
        Self {
            dir: dir.into(),
            tz,
        }
    }

    pub fn from_config(cfg: &Config, tz: Tz) -> Self {
        Self::new(cfg.provider_archive_dir(), tz)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes `content` to `<stamp>.html`. An existing file is never
    /// replaced; same-second fetches get a numeric suffix.
    pub fn store(&self, content: &str) -> Result<PathBuf, WriteError> {
        fs::create_dir_all(&self.dir).map_err(|e| WriteError::io(&self.dir, e))?;

        let stamp = file_stamp(&self.tz);
        let mut n = 0u32;
        loop {
            let name = if n == 0 {
                format!("{}.html", stamp)
            } else {
                format!("{}_{}.html", stamp, n)
            };
            let path = self.dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(content.as_bytes())
                        .map_err(|e| WriteError::io(&path, e))?;
                    return Ok(path);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => n += 1,
                Err(e) => return Err(WriteError::io(&path, e)),
            }
        }
    }
}
