/// Extends goblin to walk the `.reloc` base relocation directory, which it
/// parses the header of but does not interpret.
pub(crate) mod base_relocations;
/// A fixed-size summary of the PE headers needed to lay out guest memory.
pub mod headers;
/// Parsing and relocation of a PE32+ guest image.
pub mod pe_info;
/// Locating a relative virtual address within the section table.
pub(crate) mod section_table;
