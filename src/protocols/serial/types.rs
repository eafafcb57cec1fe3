/// Marker opening the first line of a packet.
pub const START_MARKER: [u8; 2] = [0x06, 0x09];

/// Marker opening every following line of the same packet.
pub const CONTINUATION_MARKER: [u8; 2] = [0x04, 0x14];

/// Marker (2) plus trailing newline (1).
pub const LINE_OVERHEAD: usize = 3;

/// Size of the big-endian length prefix of a serial packet.
pub const LENGTH_PREFIX: usize = 2;

/// Size of the trailing CRC-16 of a serial packet.
pub const CRC_LEN: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Start,
    Continuation,
}

impl FrameKind {
    pub fn marker(self) -> [u8; 2] {
        match self {
            Self::Start => START_MARKER,
            Self::Continuation => CONTINUATION_MARKER,
        }
    }
}

/// One marked line with its marker and trailing whitespace removed.
#[derive(Debug, PartialEq, Eq)]
pub struct SerialFrame<'a> {
    pub kind: FrameKind,
    pub body: &'a [u8],
}

impl<'a> SerialFrame<'a> {
    /// Finds the first frame marker in `line`; anything before it is noise.
    pub fn scan(line: &'a [u8]) -> Option<Self> {
        let (pos, kind) = line.windows(2).enumerate().find_map(|(i, w)| {
            if w == START_MARKER {
                Some((i, FrameKind::Start))
            } else if w == CONTINUATION_MARKER {
                Some((i, FrameKind::Continuation))
            } else {
                None
            }
        })?;

        let mut body = &line[pos + 2..];
        while let Some((last, rest)) = body.split_last() {
            if last.is_ascii_whitespace() {
                body = rest;
            } else {
                break;
            }
        }

        Some(Self { kind, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_skips_log_noise() {
        let line = b"[00:00:01.000] <inf> boot\x06\x09AAAA\r\n";
        let frame = SerialFrame::scan(line).unwrap();
        assert_eq!(frame.kind, FrameKind::Start);
        assert_eq!(frame.body, b"AAAA");
    }

    #[test]
    fn scan_ignores_unmarked_lines() {
        assert!(SerialFrame::scan(b"uart:~$ \n").is_none());
        assert!(SerialFrame::scan(b"").is_none());
    }

    #[test]
    fn scan_detects_continuation() {
        let frame = SerialFrame::scan(b"\x04\x14QUJD\n").unwrap();
        assert_eq!(frame.kind, FrameKind::Continuation);
        assert_eq!(frame.body, b"QUJD");
    }
}
