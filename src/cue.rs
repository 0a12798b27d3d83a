//! Minimal CUE-sheet parser: enough to recover per-track type and data
//! start offset for CD-ROM TOC building. Grounded on `loadCueSheet`'s
//! track-table output, not on CUE syntax coverage in general.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackType {
    Audio,
    Data,
}

#[derive(Debug, Clone, Copy)]
pub struct CueTrack {
    pub number: u8,
    pub track_type: TrackType,
    /// Start of this track's user data, in sectors (INDEX 01, not the
    /// pregap's INDEX 00).
    pub data_start: u32,
    /// Start of the pregap if one was declared, else equal to `data_start`.
    pub pregap_start: u32,
}

/// Parses a `.cue` sheet's `TRACK`/`INDEX` directives. Only a single `FILE`
/// is supported (multi-bin cue sheets are out of scope); frame addresses
/// are `MM:SS:FF` relative to that file.
pub fn parse(cue_text: &str) -> Vec<CueTrack> {
    let mut tracks = Vec::new();
    let mut current_number = 0u8;
    let mut current_type = TrackType::Data;
    let mut pregap_start: Option<u32> = None;

    for line in cue_text.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("TRACK") {
            let mut parts = rest.split_whitespace();
            current_number = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
            current_type = match parts.next() {
                Some(m) if m.starts_with("AUDIO") => TrackType::Audio,
                _ => TrackType::Data,
            };
            pregap_start = None;
        } else if let Some(rest) = line.strip_prefix("INDEX") {
            let mut parts = rest.split_whitespace();
            let index_num: u32 = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
            let msf = parts.next().unwrap_or("");
            let Some(frames) = parse_msf(msf) else {
                continue;
            };
            if index_num == 0 {
                pregap_start = Some(frames);
            } else if index_num == 1 {
                tracks.push(CueTrack {
                    number: current_number,
                    track_type: current_type,
                    data_start: frames,
                    pregap_start: pregap_start.unwrap_or(frames),
                });
            }
        }
    }

    tracks
}

fn parse_msf(s: &str) -> Option<u32> {
    let mut parts = s.splitn(3, ':');
    let m: u32 = parts.next()?.parse().ok()?;
    let s_: u32 = parts.next()?.parse().ok()?;
    let f: u32 = parts.next()?.parse().ok()?;
    Some(m * 60 * 75 + s_ * 75 + f)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_two_track_cue_sheet() {
        let cue = "\
FILE \"image.bin\" BINARY
  TRACK 01 AUDIO
    INDEX 01 00:00:00
  TRACK 02 MODE1/2048
    INDEX 00 05:14:42
    INDEX 01 05:16:42
";
        let tracks = parse(cue);
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].track_type, TrackType::Audio);
        assert_eq!(tracks[0].data_start, 0);
        assert_eq!(tracks[1].track_type, TrackType::Data);
        assert_eq!(tracks[1].data_start, 5 * 60 * 75 + 16 * 75 + 42);
        assert_eq!(tracks[1].pregap_start, 5 * 60 * 75 + 14 * 75 + 42);
    }
}
