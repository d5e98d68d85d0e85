//! HLS playlist text for transcoded recordings

use crate::catalog::BitrateLevel;
use std::fmt::Write;

/// Entries written to every variant playlist
pub const VARIANT_SEGMENT_COUNT: u32 = 10;

/// Seconds per variant playlist entry
pub const VARIANT_SEGMENT_SECONDS: u32 = 10;

/// `{recording_id}_{bitrate}.m3u8`
pub fn variant_playlist_name(recording_id: &str, bitrate_kbps: u32) -> String {
    format!("{}_{}.m3u8", recording_id, bitrate_kbps)
}

/// `{recording_id}_{bitrate}_{index:03}.ts`
pub fn segment_name(recording_id: &str, bitrate_kbps: u32, index: u32) -> String {
    format!("{}_{}_{:03}.ts", recording_id, bitrate_kbps, index)
}

/// Master playlist with one stream entry per profile, ascending by bitrate
pub fn master_playlist(recording_id: &str, profiles: &[BitrateLevel]) -> String {
    let mut sorted: Vec<&BitrateLevel> = profiles.iter().collect();
    sorted.sort_by_key(|level| level.bitrate_kbps);

    let mut out = String::from("#EXTM3U\n#EXT-X-VERSION:3\n");
    for level in sorted {
        // Writing to a String cannot fail
        let _ = writeln!(
            out,
            "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={},FRAME-RATE={:.3},NAME=\"{}\"",
            level.bandwidth_bps(),
            level.resolution,
            level.frame_rate,
            level.label
        );
        out.push_str(&variant_playlist_name(recording_id, level.bitrate_kbps));
        out.push('\n');
    }
    out
}

/// Variant (media) playlist for one rendition. The segment list is fixed at
/// ten 10-second entries.
pub fn variant_playlist(recording_id: &str, bitrate_kbps: u32) -> String {
    let mut out = String::from("#EXTM3U\n#EXT-X-VERSION:3\n");
    let _ = writeln!(out, "#EXT-X-TARGETDURATION:{}", VARIANT_SEGMENT_SECONDS);
    out.push_str("#EXT-X-MEDIA-SEQUENCE:0\n#EXT-X-PLAYLIST-TYPE:VOD\n");
    for index in 0..VARIANT_SEGMENT_COUNT {
        let _ = writeln!(out, "#EXTINF:{:.1},", VARIANT_SEGMENT_SECONDS as f64);
        out.push_str(&segment_name(recording_id, bitrate_kbps, index));
        out.push('\n');
    }
    out.push_str("#EXT-X-ENDLIST\n");
    out
}
