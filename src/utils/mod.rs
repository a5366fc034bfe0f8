//! Various utilities functions and types

mod rectangle;

pub use self::rectangle::{align_down, align_up, Rectangle};

/// Copies `lines` rows of `bytes` bytes each between two strided planes.
///
/// Rows beyond the end of either slice are skipped.
pub fn copy_plane(dst: &mut [u8], dst_stride: usize, src: &[u8], src_stride: usize, bytes: usize, lines: usize) {
    if dst_stride == src_stride && bytes == src_stride {
        let len = (bytes * lines).min(dst.len()).min(src.len());
        dst[..len].copy_from_slice(&src[..len]);
        return;
    }
    for line in 0..lines {
        let (d, s) = (line * dst_stride, line * src_stride);
        if d + bytes > dst.len() || s + bytes > src.len() {
            break;
        }
        dst[d..d + bytes].copy_from_slice(&src[s..s + bytes]);
    }
}
