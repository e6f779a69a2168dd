/// Page size of the host, used to size guard pages and round memory
/// requests up to a page boundary.
pub(crate) fn get_os_page_size() -> usize {
    page_size::get()
}
