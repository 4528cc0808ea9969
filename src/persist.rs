// Plain-text files are written next to their destination and renamed into
// place, so readers never see a half-written index.
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use tempfile::NamedTempFile;

use crate::error::{IndexError, Result};

pub(crate) fn write_atomic<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut dyn Write) -> Result<()>,
{
    let parent_dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent_dir).map_err(|e| IndexError::open(parent_dir, e))?;
    let temp_file = NamedTempFile::new_in(parent_dir).map_err(|e| IndexError::open(path, e))?;
    {
        let mut writer = BufWriter::new(temp_file.as_file());
        write(&mut writer)?;
        writer.flush()?;
    }
    temp_file
        .persist(path)
        .map_err(|e| IndexError::open(path, e.error))?;
    Ok(())
}

pub(crate) fn open(path: &Path) -> Result<BufReader<File>> {
    let fh = File::open(path).map_err(|e| IndexError::open(path, e))?;
    Ok(BufReader::new(fh))
}
