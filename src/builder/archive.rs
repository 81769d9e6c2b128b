// src/builder/archive.rs

//! Source archive extraction and patching
//!
//! Archive types are detected from content, never from the file name: some
//! projects publish `.tar.gz` sdists that are really zip files.

use crate::error::{Error, Result};
use crate::logger::BuildLog;
use crate::process::{CommandSpec, ProcessRunner, path_arg, system_env, system_tool};
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Component, Path, PathBuf};

/// Offset of the `ustar` magic in a tar header block
const USTAR_OFFSET: usize = 257;

/// Byte range of the checksum field in a tar header block
const CHECKSUM_FIELD: std::ops::Range<usize> = 148..156;

/// Compression wrapped around a tar stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Xz,
    Zstd,
}

impl Compression {
    /// Detect compression from magic bytes
    ///
    /// - Gzip: `1f 8b`
    /// - XZ: `fd 37 7a 58 5a 00`
    /// - Zstd: `28 b5 2f fd`
    pub fn from_magic_bytes(data: &[u8]) -> Self {
        if data.starts_with(&[0x1f, 0x8b]) {
            Self::Gzip
        } else if data.starts_with(&[0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00]) {
            Self::Xz
        } else if data.starts_with(&[0x28, 0xb5, 0x2f, 0xfd]) {
            Self::Zstd
        } else {
            Self::None
        }
    }

    fn decoder<'a, R: Read + 'a>(self, reader: R) -> io::Result<Box<dyn Read + 'a>> {
        Ok(match self {
            Self::None => Box::new(reader),
            Self::Gzip => Box::new(flate2::read::MultiGzDecoder::new(reader)),
            Self::Xz => Box::new(xz2::read::XzDecoder::new(reader)),
            Self::Zstd => Box::new(zstd::stream::read::Decoder::new(reader)?),
        })
    }
}

/// Container format of a source archive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    Tar(Compression),
}

fn format_error(archive: &Path, detail: impl std::fmt::Display) -> Error {
    Error::ArchiveFormat(format!("{}: {}", archive.display(), detail))
}

/// Identify an archive by content
pub fn sniff(archive: &Path) -> Result<ArchiveKind> {
    let mut header = Vec::with_capacity(512);
    File::open(archive)?.take(512).read_to_end(&mut header)?;

    if header.starts_with(b"PK\x03\x04") || header.starts_with(b"PK\x05\x06") {
        return Ok(ArchiveKind::Zip);
    }

    let compression = Compression::from_magic_bytes(&header);
    let block = if compression == Compression::None {
        header
    } else {
        let mut block = Vec::with_capacity(512);
        compression
            .decoder(File::open(archive)?)
            .and_then(|d| d.take(512).read_to_end(&mut block))
            .map_err(|e| format_error(archive, e))?;
        block
    };

    if is_tar_header(&block) {
        Ok(ArchiveKind::Tar(compression))
    } else {
        Err(format_error(archive, "can't identify archive type"))
    }
}

/// Whether `block` starts with a tar header
///
/// Pre-POSIX (v7) tarballs carry no `ustar` magic, so a header whose
/// checksum verifies is accepted as well.
fn is_tar_header(block: &[u8]) -> bool {
    if block.get(USTAR_OFFSET..USTAR_OFFSET + 5) == Some(b"ustar".as_slice()) {
        return true;
    }
    let Some(block) = block.get(..512) else {
        return false;
    };
    if block[0] == 0 {
        return false;
    }
    let Ok(stored) = tar::Header::from_byte_slice(block).cksum() else {
        return false;
    };
    let computed: u32 = block
        .iter()
        .enumerate()
        .map(|(i, byte)| {
            if CHECKSUM_FIELD.contains(&i) {
                u32::from(b' ')
            } else {
                u32::from(*byte)
            }
        })
        .sum();
    stored == computed
}

/// Drop the first `strip` components of an archive member path
///
/// Returns `None` for members that disappear entirely, and for any path
/// that would escape the destination.
pub fn strip_components(path: &Path, strip: usize) -> Option<PathBuf> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if parts.len() <= strip {
        return None;
    }
    Some(parts[strip..].iter().collect())
}

/// Extract `archive` into `dest`, stripping `strip` leading path components
pub fn extract(archive: &Path, dest: &Path, strip: usize) -> Result<()> {
    fs::create_dir_all(dest)?;
    match sniff(archive)? {
        ArchiveKind::Zip => extract_zip(archive, dest, strip),
        ArchiveKind::Tar(compression) => extract_tar(archive, compression, dest, strip),
    }
}

fn extract_tar(archive: &Path, compression: Compression, dest: &Path, strip: usize) -> Result<()> {
    let reader = compression
        .decoder(BufReader::new(File::open(archive)?))
        .map_err(|e| format_error(archive, e))?;
    let mut tar = tar::Archive::new(reader);
    tar.set_preserve_permissions(true);

    for entry in tar.entries().map_err(|e| format_error(archive, e))? {
        let mut entry = entry.map_err(|e| format_error(archive, e))?;
        if matches!(
            entry.header().entry_type(),
            tar::EntryType::XGlobalHeader | tar::EntryType::XHeader
        ) {
            continue;
        }

        let path = entry.path().map_err(|e| format_error(archive, e))?.into_owned();
        let Some(relative) = strip_components(&path, strip) else {
            continue;
        };

        let target = dest.join(relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        // Hard link names are archive paths and get the same stripping
        if entry.header().entry_type().is_hard_link() {
            let link = entry
                .link_name()
                .map_err(|e| format_error(archive, e))?
                .and_then(|link| strip_components(&link, strip));
            let Some(link) = link else {
                return Err(format_error(
                    archive,
                    format!("{}: hard link target outside the archive", path.display()),
                ));
            };
            fs::hard_link(dest.join(link), &target)?;
            continue;
        }

        entry
            .unpack(&target)
            .map_err(|e| format_error(archive, format!("{}: {}", path.display(), e)))?;
    }
    Ok(())
}

fn extract_zip(archive: &Path, dest: &Path, strip: usize) -> Result<()> {
    let file = File::open(archive)?;
    let mut zip = zip::ZipArchive::new(BufReader::new(file)).map_err(|e| format_error(archive, e))?;

    for i in 0..zip.len() {
        let mut member = zip.by_index(i).map_err(|e| format_error(archive, e))?;
        let Some(path) = member.enclosed_name() else {
            return Err(format_error(archive, format!("unsafe member name {}", member.name())));
        };
        let Some(relative) = strip_components(&path, strip) else {
            continue;
        };

        let target = dest.join(relative);
        if member.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        io::copy(&mut member, &mut out)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = member.unix_mode() {
                fs::set_permissions(&target, fs::Permissions::from_mode(mode))?;
            }
        }
    }
    Ok(())
}

/// Apply a patch file to `workdir` with `patch -p1`
pub fn apply_patch(
    runner: &dyn ProcessRunner,
    log: &mut BuildLog,
    patch: &Path,
    workdir: &Path,
) -> Result<()> {
    let command = CommandSpec::new(system_tool("patch"))
        .args(["-p1", "--ignore-whitespace", "--quiet", "--input"])
        .arg(path_arg(patch))
        .current_dir(workdir)
        .envs(&system_env());

    runner
        .run(log, &command)
        .map_err(|e| Error::PatchApplication {
            patch: patch.to_path_buf(),
            source: Box::new(e),
        })
}
