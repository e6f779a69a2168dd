use goblin::pe::{optional_header::OptionalHeader, PE};
use std::io::{Cursor, Write};

use super::base_relocations;
use crate::error::HyperlightError;
use crate::Result;

const IMAGE_REL_BASED_ABSOLUTE: u8 = 0;
const IMAGE_REL_BASED_DIR64: u8 = 10;
const IMAGE_FILE_MACHINE_AMD64: u16 = 0x8664;
const CHARACTERISTICS_RELOCS_STRIPPED: u16 = 0x0001;
const CHARACTERISTICS_EXECUTABLE_IMAGE: u16 = 0x0002;

/// An owned, parsed representation of a guest PE32+ image.
///
/// Holds just enough of the file to relocate it to an arbitrary load
/// address and find its entrypoint, stack, and heap sizes; it is not a
/// general-purpose PE parser.
pub struct PEInfo {
    payload: Vec<u8>,
    optional_header: OptionalHeader,
}

impl PEInfo {
    /// Parse `pe_bytes` as a PE32+ (64-bit) executable image.
    ///
    /// Rejects anything that is not a non-relocation-stripped x64
    /// executable image, since those are the only kind of guest binary
    /// this sandbox can load.
    pub fn new(pe_bytes: &[u8]) -> Result<Self> {
        let pe = PE::parse(pe_bytes).map_err(|_| HyperlightError::BadSignature)?;

        if pe.header.coff_header.machine != IMAGE_FILE_MACHINE_AMD64 {
            return Err(HyperlightError::NotPE32Plus);
        }
        if !pe.is_64 {
            return Err(HyperlightError::NotPE32Plus);
        }
        if (pe.header.coff_header.characteristics & CHARACTERISTICS_EXECUTABLE_IMAGE)
            != CHARACTERISTICS_EXECUTABLE_IMAGE
        {
            return Err(HyperlightError::LoadError(
                "image does not carry the executable-image characteristic".to_string(),
            ));
        }
        if (pe.header.coff_header.characteristics & CHARACTERISTICS_RELOCS_STRIPPED)
            == CHARACTERISTICS_RELOCS_STRIPPED
        {
            return Err(HyperlightError::LoadError(
                "base relocations have been stripped from this image".to_string(),
            ));
        }

        let optional_header = pe
            .header
            .optional_header
            .ok_or(HyperlightError::TruncatedImage)?;

        Ok(Self {
            payload: Vec::from(pe_bytes),
            optional_header,
        })
    }

    /// A reference to the raw, unrelocated file contents.
    pub fn get_payload(&self) -> &[u8] {
        &self.payload
    }

    /// The length of the PE file payload, in bytes.
    pub fn get_payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Offset of the entrypoint from the image base.
    pub fn entry_point_offset(&self) -> u64 {
        self.optional_header.standard_fields.address_of_entry_point
    }

    /// The load address the image was linked for.
    pub fn preferred_load_address(&self) -> u64 {
        self.optional_header.windows_fields.image_base
    }

    /// Reserved stack size, from the optional header.
    pub fn stack_reserve(&self) -> u64 {
        self.optional_header.windows_fields.size_of_stack_reserve
    }

    /// Committed stack size, from the optional header.
    pub fn stack_commit(&self) -> u64 {
        self.optional_header.windows_fields.size_of_stack_commit
    }

    /// Reserved heap size, from the optional header.
    pub fn heap_reserve(&self) -> u64 {
        self.optional_header.windows_fields.size_of_heap_reserve
    }

    /// Committed heap size, from the optional header.
    pub fn heap_commit(&self) -> u64 {
        self.optional_header.windows_fields.size_of_heap_commit
    }

    /// Apply `patches` in place to `payload`, writing each relocated
    /// virtual address as a little-endian `u64` at its offset.
    pub fn apply_relocation_patches(
        payload: &mut [u8],
        patches: Vec<RelocationPatch>,
    ) -> Result<usize> {
        let payload_len = payload.len();
        let mut cur = Cursor::new(payload);
        let mut applied = 0usize;
        for patch in patches {
            if patch.offset >= payload_len {
                return Err(HyperlightError::LoadError(format!(
                    "relocation patch offset {:#x} is past the end of the {payload_len}-byte payload",
                    patch.offset
                )));
            }
            cur.set_position(patch.offset as u64);
            cur.write_all(&patch.relocated_virtual_address.to_le_bytes())?;
            applied += 1;
        }
        Ok(applied)
    }

    /// Compute the patches needed to rebase every absolute address the
    /// `.reloc` directory names so the image behaves correctly when
    /// loaded at `address_to_load_at` instead of its preferred address.
    ///
    /// See <https://docs.microsoft.com/en-us/windows/win32/debug/pe-format#the-reloc-section-image-only>.
    pub fn get_exe_relocation_patches(
        &self,
        payload: &[u8],
        address_to_load_at: usize,
    ) -> Result<Vec<RelocationPatch>> {
        let addr_diff = (address_to_load_at as u64).wrapping_sub(self.preferred_load_address());
        if addr_diff == 0 {
            return Ok(Vec::new());
        }

        let pe = PE::parse(payload).map_err(|_| HyperlightError::BadSignature)?;
        let relocations =
            base_relocations::get_base_relocations(payload, &pe.sections, self.optional_header)?;
        let mut patches = Vec::with_capacity(relocations.len());

        for reloc in relocations {
            match reloc.typ {
                IMAGE_REL_BASED_DIR64 => {
                    let offset = reloc.page_base_rva as u64 + reloc.page_offset as u64;
                    let offset_usize = offset as usize;
                    if offset_usize + 8 > payload.len() {
                        return Err(HyperlightError::TruncatedImage);
                    }
                    let original_address = u64::from_le_bytes(
                        payload[offset_usize..offset_usize + 8]
                            .try_into()
                            .map_err(|_| HyperlightError::IntegerOverflow)?,
                    );
                    let relocated_virtual_address = original_address.wrapping_add(addr_diff);
                    patches.push(RelocationPatch {
                        offset: offset_usize,
                        relocated_virtual_address,
                    });
                }
                IMAGE_REL_BASED_ABSOLUTE => (),
                other => return Err(HyperlightError::UnsupportedReloc(other as u32)),
            }
        }
        Ok(patches)
    }
}

/// A single patch: write `relocated_virtual_address` at `offset` in the
/// loaded image.
#[derive(Debug, Copy, Clone)]
pub struct RelocationPatch {
    offset: usize,
    relocated_virtual_address: u64,
}

#[cfg(test)]
mod tests {
    use super::{PEInfo, RelocationPatch};

    #[test]
    fn rejects_non_pe_bytes() {
        assert!(PEInfo::new(&[0u8; 64]).is_err());
    }

    #[test]
    fn rejects_truncated_dos_header() {
        assert!(PEInfo::new(&[b'M', b'Z']).is_err());
    }

    #[test]
    fn applies_relocation_patches_in_place() {
        let mut payload = vec![0u8; 32];
        let patches = vec![
            RelocationPatch {
                offset: 0,
                relocated_virtual_address: 0x1_4000_1000,
            },
            RelocationPatch {
                offset: 8,
                relocated_virtual_address: 0x1_4000_2000,
            },
        ];
        let applied = PEInfo::apply_relocation_patches(&mut payload, patches).unwrap();
        assert_eq!(applied, 2);
        assert_eq!(
            u64::from_le_bytes(payload[0..8].try_into().unwrap()),
            0x1_4000_1000
        );
        assert_eq!(
            u64::from_le_bytes(payload[8..16].try_into().unwrap()),
            0x1_4000_2000
        );
    }

    #[test]
    fn rejects_patch_past_end_of_payload() {
        let mut payload = vec![0u8; 4];
        let patches = vec![RelocationPatch {
            offset: 100,
            relocated_virtual_address: 0,
        }];
        assert!(PEInfo::apply_relocation_patches(&mut payload, patches).is_err());
    }
}
