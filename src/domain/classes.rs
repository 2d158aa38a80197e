// ============================================================
// Layer 3 — Symbol Channels
// ============================================================
// Every label mask is decoded into CHANNEL_NUM one-hot channels,
// whatever its on-disk convention.

/// Number of per-pixel classes the segmentation model predicts.
pub const CHANNEL_NUM: usize = 4;

pub const BACKGROUND:  usize = 0;
pub const NOTEHEADS:   usize = 1;
pub const STEMS_BEAMS: usize = 2;
pub const STAFF_LINES: usize = 3;

pub fn channel_name(channel: usize) -> &'static str {
    match channel {
        BACKGROUND  => "background",
        NOTEHEADS   => "noteheads",
        STEMS_BEAMS => "stems_beams",
        STAFF_LINES => "staff_lines",
        _           => "unknown",
    }
}
