//! Output frame geometry.

/// Fits a source frame inside `bounds`, preserving aspect ratio.
///
/// Never upscales. Both dimensions are rounded down to even numbers, as
/// required by 4:2:0 chroma subsampling. Unknown or zero source dimensions
/// yield the bounding box itself.
pub fn fit_within(source: Option<(u32, u32)>, bounds: (u32, u32)) -> (u32, u32) {
    let (box_w, box_h) = bounds;
    let (src_w, src_h) = match source {
        Some((w, h)) if w > 0 && h > 0 => (w as u64, h as u64),
        _ => return (box_w, box_h),
    };
    let (bw, bh) = (box_w as u64, box_h as u64);

    let (w, h) = if src_w <= bw && src_h <= bh {
        (src_w, src_h)
    } else if src_w * bh >= src_h * bw {
        // Width is the limiting side.
        (bw, src_h * bw / src_w)
    } else {
        (src_w * bh / src_h, bh)
    };

    let even = |v: u64| (v / 2 * 2) as u32;
    let out_w = match even(w) {
        0 => box_w,
        v => v,
    };
    let out_h = match even(h) {
        0 => box_h,
        v => v,
    };

    (out_w, out_h)
}
