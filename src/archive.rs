//! Blocking zip helpers. Call through `tokio::task::spawn_blocking`.

use std::{
    fs::{self, File},
    io,
    path::Path,
};

use walkdir::WalkDir;
use zip::{CompressionMethod, ZipArchive, ZipWriter, write::SimpleFileOptions};

/// Archives the contents of `src` (not `src` itself) into a new zip at `dest`.
pub fn zip_dir(src: &Path, dest: &Path) -> Result<usize, String> {
    let file = File::create(dest).map_err(|e| e.to_string())?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut files = 0;

    for entry in WalkDir::new(src).sort_by_file_name() {
        let entry = entry.map_err(|e| e.to_string())?;
        let rel = entry.path().strip_prefix(src).map_err(|e| e.to_string())?;
        if rel.as_os_str().is_empty() {
            continue;
        }

        let name = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if entry.file_type().is_dir() {
            zip.add_directory(name, options).map_err(|e| e.to_string())?;
        } else {
            zip.start_file(name, options).map_err(|e| e.to_string())?;
            let mut input = File::open(entry.path()).map_err(|e| e.to_string())?;
            io::copy(&mut input, &mut zip).map_err(|e| e.to_string())?;
            files += 1;
        }
    }

    zip.finish().map_err(|e| e.to_string())?;
    Ok(files)
}

/// Extracts `archive` into `dest`, overwriting files. Entries for which
/// `keep_existing` returns true are skipped when the target already exists.
/// Entries that would escape `dest` abort the extraction.
pub fn unzip(
    archive: &Path,
    dest: &Path,
    keep_existing: &dyn Fn(&Path) -> bool,
) -> Result<usize, String> {
    let file = File::open(archive).map_err(|e| e.to_string())?;
    let mut zip = ZipArchive::new(file).map_err(|e| e.to_string())?;
    let mut written = 0;

    fs::create_dir_all(dest).map_err(|e| e.to_string())?;

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(|e| e.to_string())?;
        let Some(rel) = entry.enclosed_name() else {
            return Err(format!("unsafe entry path in archive: {}", entry.name()));
        };
        let out = dest.join(&rel);

        if entry.is_dir() {
            fs::create_dir_all(&out).map_err(|e| e.to_string())?;
            continue;
        }

        if keep_existing(&rel) && out.exists() {
            continue;
        }

        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }
        let mut output = File::create(&out).map_err(|e| format!("{}: {e}", out.display()))?;
        io::copy(&mut entry, &mut output).map_err(|e| format!("{}: {e}", out.display()))?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&out, fs::Permissions::from_mode(mode))
                .map_err(|e| e.to_string())?;
        }

        written += 1;
    }

    Ok(written)
}
