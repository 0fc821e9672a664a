// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/agriscan

//! Marker-scanning parser for the rig's multipart JPEG stream
//!
//! The /stream endpoint interleaves boundary and header text with raw JPEG
//! payloads, and network reads never line up with frame boundaries. Only the
//! binary start/end-of-image markers are trusted; everything between frames
//! is thrown away unparsed.

use bytes::{Buf, Bytes, BytesMut};
use futures::stream::{self, Stream, StreamExt};

/// JPEG start-of-image marker
pub const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];

/// JPEG end-of-image marker
pub const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];

fn find_marker(haystack: &[u8], marker: &[u8; 2], from: usize) -> Option<usize> {
    if haystack.len() < from + 2 {
        return None;
    }
    haystack[from..]
        .windows(2)
        .position(|w| w == marker)
        .map(|i| i + from)
}

/// Accumulating frame extractor
#[derive(Debug, Default)]
pub struct FrameParser {
    buffer: BytesMut,
    frames_emitted: u64,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes from the wire
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Pull the next complete frame out of the buffer, if one is there.
    ///
    /// Call repeatedly after each `push`: a single read can carry several
    /// frames.
    pub fn next_frame(&mut self) -> Option<Bytes> {
        let start = match find_marker(&self.buffer, &JPEG_SOI, 0) {
            Some(start) => start,
            None => {
                // Last byte may be the first half of a split SOI
                if self.buffer.len() > 1 {
                    let discard = self.buffer.len() - 1;
                    self.buffer.advance(discard);
                }
                return None;
            }
        };

        let end = match find_marker(&self.buffer, &JPEG_EOI, start + 2) {
            Some(end) => end,
            None => {
                self.buffer.advance(start);
                return None;
            }
        };

        self.buffer.advance(start);
        let frame = self.buffer.split_to(end - start + 2).freeze();
        self.frames_emitted += 1;
        Some(frame)
    }

    /// Push a chunk and drain every frame it completes
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.push(chunk);
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame() {
            frames.push(frame);
        }
        frames
    }

    /// Bytes retained while waiting for more data
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn frames_emitted(&self) -> u64 {
        self.frames_emitted
    }
}

/// Turn a stream of network chunks into a stream of complete JPEG frames.
///
/// A transport error is yielded once and ends the stream; a fresh call is
/// needed to restart.
pub fn frame_stream<S, E>(chunks: S) -> impl Stream<Item = Result<Bytes, E>>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    stream::unfold(
        (chunks, FrameParser::new(), false),
        |(mut chunks, mut parser, finished)| async move {
            if finished {
                return None;
            }
            loop {
                if let Some(frame) = parser.next_frame() {
                    return Some((Ok(frame), (chunks, parser, false)));
                }
                match chunks.next().await {
                    Some(Ok(chunk)) => parser.push(&chunk),
                    Some(Err(e)) => return Some((Err(e), (chunks, parser, true))),
                    None => return None,
                }
            }
        },
    )
}

/// Wrap a frame as one multipart/x-mixed-replace part
pub fn multipart_part(frame: &[u8]) -> Bytes {
    let header = format!(
        "--frame\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        frame.len()
    );
    let mut part = BytesMut::with_capacity(header.len() + frame.len() + 2);
    part.extend_from_slice(header.as_bytes());
    part.extend_from_slice(frame);
    part.extend_from_slice(b"\r\n");
    part.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_jpeg(fill: u8, len: usize) -> Vec<u8> {
        let mut data = JPEG_SOI.to_vec();
        // Body must not contain 0xFF so no marker appears inside it
        data.extend(std::iter::repeat(fill).take(len));
        data.extend_from_slice(&JPEG_EOI);
        data
    }

    fn wire(frames: &[Vec<u8>]) -> Vec<u8> {
        let mut out = Vec::new();
        for frame in frames {
            out.extend_from_slice(&multipart_part(frame));
        }
        out
    }

    #[test]
    fn test_two_frames_every_chunk_size() {
        let a = fake_jpeg(0x11, 50);
        let b = fake_jpeg(0x22, 73);
        let data = wire(&[a.clone(), b.clone()]);

        for chunk_size in 1..=data.len() {
            let mut parser = FrameParser::new();
            let mut frames = Vec::new();
            for chunk in data.chunks(chunk_size) {
                frames.extend(parser.feed(chunk));
            }
            assert_eq!(frames.len(), 2, "chunk size {}", chunk_size);
            assert_eq!(&frames[0][..], &a[..]);
            assert_eq!(&frames[1][..], &b[..]);
        }
    }

    #[test]
    fn test_split_inside_markers() {
        let a = fake_jpeg(0x33, 10);
        let b = fake_jpeg(0x44, 10);
        let mut data = a.clone();
        data.extend_from_slice(b"junk");
        data.extend_from_slice(&b);

        // Split between 0xFF and 0xD8 of the second SOI, then inside its EOI
        let soi_b = a.len() + 4;
        let eoi_b = data.len() - 1;
        let mut parser = FrameParser::new();
        let mut frames = parser.feed(&data[..soi_b + 1]);
        frames.extend(parser.feed(&data[soi_b + 1..eoi_b]));
        frames.extend(parser.feed(&data[eoi_b..]));

        assert_eq!(frames.len(), 2);
        assert_eq!(&frames[0][..], &a[..]);
        assert_eq!(&frames[1][..], &b[..]);
    }

    #[test]
    fn test_multiple_frames_in_one_read() {
        let frames_in: Vec<_> = (0..4).map(|i| fake_jpeg(i as u8 + 1, 20)).collect();
        let mut parser = FrameParser::new();
        let frames = parser.feed(&wire(&frames_in));
        assert_eq!(frames.len(), 4);
        assert_eq!(parser.frames_emitted(), 4);
    }

    #[test]
    fn test_garbage_keeps_only_last_byte() {
        let mut parser = FrameParser::new();
        assert!(parser.feed(b"--frame\r\nContent-Type: image/jpeg\r\n").is_empty());
        assert_eq!(parser.buffered(), 1);

        // Trailing 0xFF survives and pairs with the next read
        assert!(parser.feed(&[0x00, 0xFF]).is_empty());
        assert_eq!(parser.buffered(), 1);
        let frames = parser.feed(&[0xD8, 0x01, 0x02, 0xFF, 0xD9]);
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], &[0xFF, 0xD8, 0x01, 0x02, 0xFF, 0xD9]);
    }

    #[test]
    fn test_incomplete_frame_discards_prefix() {
        let mut parser = FrameParser::new();
        assert!(parser.feed(b"header\xFF\xD8\x01\x02").is_empty());
        assert_eq!(parser.buffered(), 4);
    }

    #[test]
    fn test_eoi_must_follow_soi() {
        // An EOI before the SOI must not close the frame
        let mut parser = FrameParser::new();
        let frames = parser.feed(&[0xFF, 0xD9, 0xFF, 0xD8, 0x05, 0xFF, 0xD9]);
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], &[0xFF, 0xD8, 0x05, 0xFF, 0xD9]);
    }

    #[tokio::test]
    async fn test_frame_stream_over_chunks() {
        let a = fake_jpeg(0x55, 30);
        let b = fake_jpeg(0x66, 30);
        let data = wire(&[a.clone(), b.clone()]);
        let chunks: Vec<Result<Bytes, std::io::Error>> = data
            .chunks(7)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();

        let frames: Vec<_> = frame_stream(stream::iter(chunks)).collect().await;
        assert_eq!(frames.len(), 2);
        assert_eq!(&frames[0].as_ref().unwrap()[..], &a[..]);
        assert_eq!(&frames[1].as_ref().unwrap()[..], &b[..]);
    }

    #[tokio::test]
    async fn test_frame_stream_ends_after_error() {
        let chunks: Vec<Result<Bytes, &str>> = vec![
            Ok(Bytes::from_static(&[0xFF, 0xD8, 0x01, 0xFF, 0xD9])),
            Err("reset"),
            Ok(Bytes::from_static(&[0xFF, 0xD8, 0x02, 0xFF, 0xD9])),
        ];
        let items: Vec<_> = frame_stream(stream::iter(chunks)).collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(items[1].is_err());
    }

    #[test]
    fn test_multipart_part_layout() {
        let part = multipart_part(&[0xFF, 0xD8, 0xFF, 0xD9]);
        assert!(part.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\nContent-Length: 4\r\n\r\n"));
        assert!(part.ends_with(&[0xFF, 0xD9, b'\r', b'\n']));
    }
}
