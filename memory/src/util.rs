use std::ops::Range;

/// Number of bytes required to move `offset` to the next `align` boundary.
pub(crate) fn padding(offset: u64, align: u64) -> u64 {
    match offset % align {
        0 => 0,
        rem => align - rem,
    }
}

/// Widen range so that both ends are multiple of `align`.
pub(crate) fn align_range(range: Range<u64>, align: u64) -> Range<u64> {
    let start = range.start - range.start % align;
    let end = ((range.end - 1) / align + 1) * align;
    start..end
}

/// Clamp `range` to fit within `bounds`.
pub(crate) fn clamp_range(range: Range<u64>, bounds: Range<u64>) -> Range<u64> {
    use std::cmp::{max, min};
    min(bounds.end, max(bounds.start, range.start))..min(bounds.end, max(bounds.start, range.end))
}

/// Check if `sub` fits within `range`.
pub(crate) fn is_sub_range(range: Range<u64>, sub: Range<u64>) -> bool {
    sub.start >= range.start && sub.end <= range.end
}

#[cfg(target_pointer_width = "64")]
pub(crate) fn fits_usize(_value: u64) -> bool {
    true
}

#[cfg(not(target_pointer_width = "64"))]
pub(crate) fn fits_usize(value: u64) -> bool {
    value <= usize::max_value() as u64
}
