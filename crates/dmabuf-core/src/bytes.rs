//! Byte views of plain `#[repr(C)]` records.

/// View a `#[repr(C)]` value as raw bytes, for socket payloads and pixel
/// uploads.
///
/// # Safety
///
/// Only implement on `#[repr(C)]` or `#[repr(transparent)]` types whose fields
/// are all plain integers with no padding, pointers or references.
///
/// # Example
///
/// ```rust
/// use dmabuf_core::AsBytes;
///
/// #[repr(C)]
/// struct Header {
///     tag: u32,
///     len: u32,
/// }
///
/// unsafe impl AsBytes for Header {}
///
/// let h = Header { tag: 1, len: 2 };
/// assert_eq!(h.as_bytes().len(), 8);
/// ```
pub unsafe trait AsBytes: Sized {
    /// View `self` as a byte slice of length `size_of::<Self>()`.
    fn as_bytes(&self) -> &[u8] {
        unsafe {
            std::slice::from_raw_parts(self as *const Self as *const u8, std::mem::size_of::<Self>())
        }
    }
}
