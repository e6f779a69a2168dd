use goblin::pe::{optional_header::OptionalHeader, section_table::SectionTable};

use super::section_table::calculate_offset_from_rva;
use crate::error::HyperlightError;
use crate::Result;

/// A single entry from a `.reloc` base relocation block: a relocation
/// `typ` (one of the `IMAGE_REL_BASED_*` constants) to apply at the file
/// offset `page_base_rva + page_offset`.
#[derive(Debug, Copy, Clone)]
pub(crate) struct BaseRelocation {
    pub(crate) typ: u8,
    pub(crate) page_base_rva: u32,
    pub(crate) page_offset: u16,
}

/// Walk the `.reloc` directory (`IMAGE_DIRECTORY_ENTRY_BASERELOC`) of a PE
/// image and return every relocation entry it contains.
///
/// goblin parses the COFF/optional headers and section table but does not
/// interpret the base relocation directory itself, so this locates the
/// directory via the optional header's data directories and defers the
/// actual block walk to [`walk_relocation_blocks`].
pub(crate) fn get_base_relocations(
    payload: &[u8],
    sections: &[SectionTable],
    optional_header: OptionalHeader,
) -> Result<Vec<BaseRelocation>> {
    let dir = match optional_header.data_directories.get_base_relocation_table() {
        Some(dir) if dir.size > 0 => dir,
        _ => return Ok(Vec::new()),
    };

    let file_offset = calculate_offset_from_rva(sections, dir.virtual_address as u64).ok_or_else(|| {
        HyperlightError::LoadError(format!(
            "base relocation directory RVA {:#x} is not contained in any section",
            dir.virtual_address
        ))
    })?;

    walk_relocation_blocks(payload, file_offset as usize, dir.size as usize)
}

/// Parse `size` bytes of base-relocation block data starting at `start`
/// within `payload`.
///
/// Per <https://docs.microsoft.com/en-us/windows/win32/debug/pe-format#the-reloc-section-image-only>,
/// each block starts with an 8-byte header (`page_base_rva`,
/// `size_of_block`) followed by `(size_of_block - 8) / 2` 16-bit entries,
/// each packing a 4-bit relocation type in the high nibble and a 12-bit
/// in-page offset in the low 12 bits. Blocks are laid out back-to-back
/// until `size` bytes have been consumed.
fn walk_relocation_blocks(payload: &[u8], start: usize, size: usize) -> Result<Vec<BaseRelocation>> {
    let dir_end = start
        .checked_add(size)
        .ok_or(HyperlightError::IntegerOverflow)?;
    if dir_end > payload.len() {
        return Err(HyperlightError::TruncatedImage);
    }

    let mut relocations = Vec::new();
    let mut file_offset = start;
    while file_offset < dir_end {
        if file_offset + 8 > payload.len() {
            return Err(HyperlightError::TruncatedImage);
        }
        let page_base_rva = u32::from_le_bytes(payload[file_offset..file_offset + 4].try_into()?);
        let size_of_block = u32::from_le_bytes(payload[file_offset + 4..file_offset + 8].try_into()?);
        if size_of_block < 8 {
            return Err(HyperlightError::LoadError(format!(
                "invalid base relocation block size {size_of_block}"
            )));
        }
        let block_end = file_offset + size_of_block as usize;
        if block_end > payload.len() {
            return Err(HyperlightError::TruncatedImage);
        }

        let mut entry_offset = file_offset + 8;
        while entry_offset + 2 <= block_end {
            let raw = u16::from_le_bytes(payload[entry_offset..entry_offset + 2].try_into()?);
            relocations.push(BaseRelocation {
                typ: (raw >> 12) as u8,
                page_base_rva,
                page_offset: raw & 0x0FFF,
            });
            entry_offset += 2;
        }

        file_offset = block_end;
    }

    Ok(relocations)
}

#[cfg(test)]
mod tests {
    use super::walk_relocation_blocks;

    #[test]
    fn walks_a_single_block_with_two_entries() {
        let mut payload = vec![0u8; 64];
        let page_base_rva = 0x2000u32;
        let size_of_block = 12u32; // header + 2 entries
        payload[0..4].copy_from_slice(&page_base_rva.to_le_bytes());
        payload[4..8].copy_from_slice(&size_of_block.to_le_bytes());
        // IMAGE_REL_BASED_DIR64 (10) at page offset 0x100
        payload[8..10].copy_from_slice(&(((10u16) << 12) | 0x100).to_le_bytes());
        // IMAGE_REL_BASED_ABSOLUTE (0) padding entry
        payload[10..12].copy_from_slice(&0u16.to_le_bytes());

        let relocs = walk_relocation_blocks(&payload, 0, size_of_block as usize).unwrap();
        assert_eq!(relocs.len(), 2);
        assert_eq!(relocs[0].typ, 10);
        assert_eq!(relocs[0].page_base_rva, page_base_rva);
        assert_eq!(relocs[0].page_offset, 0x100);
        assert_eq!(relocs[1].typ, 0);
    }

    #[test]
    fn rejects_truncated_block() {
        let payload = vec![0u8; 4];
        assert!(walk_relocation_blocks(&payload, 0, 12).is_err());
    }

    #[test]
    fn walks_consecutive_blocks() {
        let mut payload = vec![0u8; 32];
        payload[0..4].copy_from_slice(&0x1000u32.to_le_bytes());
        payload[4..8].copy_from_slice(&10u32.to_le_bytes()); // header + 1 entry
        payload[8..10].copy_from_slice(&(((10u16) << 12) | 0x008).to_le_bytes());

        payload[10..14].copy_from_slice(&0x2000u32.to_le_bytes());
        payload[14..18].copy_from_slice(&10u32.to_le_bytes());
        payload[18..20].copy_from_slice(&(((10u16) << 12) | 0x010).to_le_bytes());

        let relocs = walk_relocation_blocks(&payload, 0, 20).unwrap();
        assert_eq!(relocs.len(), 2);
        assert_eq!(relocs[0].page_base_rva, 0x1000);
        assert_eq!(relocs[1].page_base_rva, 0x2000);
        assert_eq!(relocs[1].page_offset, 0x010);
    }
}
