//! Zip packaging of addon directories.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::AddonResult;

/// Writes `<dest_dir>/<name>.zip` containing everything under `root`.
///
/// Entry names are relative to `root`. If the archive lands inside `root`
/// it is not added to itself.
pub fn pack_directory(root: &Path, dest_dir: &Path, name: &str) -> AddonResult<PathBuf> {
    fs::create_dir_all(dest_dir)?;
    let archive_path = dest_dir.join(format!("{}.zip", name));

    let file = File::create(&archive_path)?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    // Compare canonical paths so a relative dest_dir is still recognized.
    let skip = fs::canonicalize(&archive_path).ok();
    add_dir(&mut writer, root, root, options, skip.as_deref())?;
    writer.finish()?;

    debug!("Packed {} into {}", root.display(), archive_path.display());
    Ok(archive_path)
}

fn add_dir(
    writer: &mut ZipWriter<File>,
    root: &Path,
    dir: &Path,
    options: SimpleFileOptions,
    skip: Option<&Path>,
) -> AddonResult<()> {
    let mut entries: Vec<_> = fs::read_dir(dir)?.collect::<io::Result<_>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        if skip.is_some() && fs::canonicalize(&path).ok().as_deref() == skip {
            continue;
        }

        let name = entry_name(root, &path);
        if entry.file_type()?.is_dir() {
            writer.add_directory(format!("{}/", name), options)?;
            add_dir(writer, root, &path, options, skip)?;
        } else {
            writer.start_file(name, options)?;
            let mut source = File::open(&path)?;
            io::copy(&mut source, writer)?;
        }
    }

    Ok(())
}

/// Zip entry names always use forward slashes.
fn entry_name(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
