//! load binaries and hand their DWARF sections to gimli
use anyhow::{Context, Result};
use gimli::{EndianRcSlice, RunTimeEndian};
use object::{Object, ObjectSection};
use std::borrow::Cow;
use std::path::Path;

pub type DwarfReader = EndianRcSlice<RunTimeEndian>;

pub fn load_file(path: &Path) -> Result<Vec<u8>> {
    log::debug!("load file: {}", path.display());

    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open file: {}", path.display()))?;

    // SAFETY: the mapping is copied out before the file handle is dropped
    let mmap = unsafe { memmap2::Mmap::map(&file) }
        .with_context(|| format!("failed to map file: {}", path.display()))?;
    let data = mmap.to_vec();

    log::debug!("file load success, size: {} bytes", data.len());
    Ok(data)
}

/// section loader for `gimli::Dwarf::load`. sections missing from the object,
/// or failing to decompress, load as empty.
pub fn object_section_loader(
    data: &[u8],
) -> Result<impl Fn(gimli::SectionId) -> Result<DwarfReader> + '_> {
    let object_file = object::File::parse(data).context("not a recognized object file")?;
    let endianness = if object_file.is_little_endian() {
        RunTimeEndian::Little
    } else {
        RunTimeEndian::Big
    };
    log::debug!("parse object file success ({:?})", endianness);

    Ok(move |id: gimli::SectionId| -> Result<DwarfReader> {
        let name = id.name();
        let bytes = match object_file.section_by_name(name) {
            Some(section) => section.uncompressed_data().unwrap_or_else(|err| {
                log::warn!("decompress section fail, section: {}: {}", name, err);
                Cow::Borrowed(&[][..])
            }),
            None => Cow::Borrowed(&[][..]),
        };

        Ok(EndianRcSlice::new(
            std::rc::Rc::from(bytes.into_owned()),
            endianness,
        ))
    })
}
