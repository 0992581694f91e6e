//! Boundary tags bracketing every heap block.
//!
//! A block is `[Header, payload, Footer]`; `Header::size` counts all three.
//! Footers land wherever the payload ends, which is only guaranteed to be
//! [`BLOCK_ALIGN`]ed, so every footer access goes through the unaligned
//! helpers here.

use core::ptr;

const HEADER_MAGIC: u32 = 0x8EAD_B10C;
const FOOTER_MAGIC: u32 = 0xF007_B10C;

/// Start-of-block tag.
#[repr(C)]
pub struct Header {
    magic: u32,
    pub is_hole: bool,
    size: u32,
}

impl Header {
    pub const fn size(&self) -> usize {
        self.size as usize
    }
}

/// End-of-block tag, pointing back at its [`Header`] so the block below a
/// freed one can be found without walking the heap.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct Footer {
    magic: u32,
    pub header: *mut Header,
}

/// Bytes both tags of one block take together.
pub const TAG_OVERHEAD: usize = size_of::<Header>() + size_of::<Footer>();

/// Alignment of every block base and block size.
pub const BLOCK_ALIGN: usize = align_of::<Header>();

/// Write a complete block over `[addr, addr + size)`: header at the front,
/// footer referencing it at the back.
///
/// # Safety
///
/// The range must be writable memory owned by the caller, `size` at least
/// [`TAG_OVERHEAD`] and `addr` aligned to [`BLOCK_ALIGN`].
#[allow(clippy::cast_possible_truncation)] // heap extents stay far below u32::MAX
pub unsafe fn write_block(addr: usize, size: usize, is_hole: bool) -> *mut Header {
    debug_assert!(size >= TAG_OVERHEAD);
    debug_assert!(addr.is_multiple_of(BLOCK_ALIGN));
    let header = addr as *mut Header;
    // SAFETY: both tags land inside the caller's range; the footer helper
    // tolerates its unaligned position.
    unsafe {
        header.write(Header {
            magic: HEADER_MAGIC,
            is_hole,
            size: size as u32,
        });
        write_footer(
            addr + size - size_of::<Footer>(),
            Footer {
                magic: FOOTER_MAGIC,
                header,
            },
        );
    }
    header
}

/// Read the footer stored at `addr`.
///
/// # Safety
///
/// `addr` must be the last [`size_of::<Footer>()`] bytes of a live block.
pub unsafe fn read_footer(addr: usize) -> Footer {
    // SAFETY: forwarded; unaligned read because footers float with the
    // payload size.
    unsafe { (addr as *const Footer).read_unaligned() }
}

/// # Safety
///
/// As [`read_footer`], for writing.
pub unsafe fn write_footer(addr: usize, footer: Footer) {
    // SAFETY: forwarded.
    unsafe { (addr as *mut Footer).write_unaligned(footer) };
}

/// Verify both magics and the footer back-reference of the block at
/// `header`.
///
/// # Safety
///
/// `header` must point at what the caller believes is a block tag. On any
/// mismatch this panics; a torn tag means the heap is corrupt and nothing
/// in it can be trusted any longer.
pub unsafe fn check(header: *mut Header) {
    // SAFETY: per contract the header bytes are readable; the footer is
    // only touched once the header magic vouches for the size field.
    let (magic, size) = unsafe { ((*header).magic, (*header).size()) };
    assert!(magic == HEADER_MAGIC, "heap corruption: bad header magic");
    let footer = unsafe { read_footer(header as usize + size - size_of::<Footer>()) };
    assert!(
        footer.magic == FOOTER_MAGIC,
        "heap corruption: bad footer magic"
    );
    assert!(
        ptr::eq(footer.header, header),
        "heap corruption: footer does not reference its header"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_round_trips_through_tags() {
        let mut backing = [0u8; 256];
        let addr = (&raw mut backing) as usize;
        // only exercise an aligned prefix of the buffer
        let base = mm_addr::align_up(addr, BLOCK_ALIGN);

        let header = unsafe { write_block(base, 200, true) };
        assert!(unsafe { (*header).is_hole });
        assert_eq!(unsafe { (*header).size() }, 200);
        unsafe { check(header) };

        let footer = unsafe { read_footer(base + 200 - size_of::<Footer>()) };
        assert!(ptr::eq(footer.header, header));
    }

    #[test]
    #[should_panic(expected = "heap corruption")]
    fn a_scribbled_header_fails_verification() {
        let mut backing = [0u8; 256];
        let base = mm_addr::align_up((&raw mut backing) as usize, BLOCK_ALIGN);
        let header = unsafe { write_block(base, 64, false) };
        unsafe { (base as *mut u32).write(0xDEAD_BEEF) };
        unsafe { check(header) };
    }
}
