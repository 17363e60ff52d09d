//! UAVTalk framing
//!
//! Wire layout:
//!
//! ```text
//! [SYNC=0x3C][CMD|0x20][LENGTH u16 LE][OBJECT_ID u32 LE]
//!     [INSTANCE_ID u16 LE, multi-instance only][PAYLOAD][CRC8]
//! ```
//!
//! LENGTH counts from the sync byte through the last payload byte and does
//! not include the CRC. The command byte is XORed with 0x20, a protocol
//! version marker stripped on decode and reapplied on encode.
//!
//! The [`Deframer`] recovers frames from an unreliable byte stream: it
//! resynchronizes on the sync byte, rejects impossible LENGTH values using
//! the catalog's largest object, and drops exactly the offending span on a
//! CRC mismatch so the scan always makes progress.

use crate::crc::crc8;
use bytes::{Bytes, BytesMut};
use thiserror::Error;
use uavtalk_core::{codec, Catalog, Cmd, CodecError, ObjectData, ObjectId, Packet, SHORT_HEADER_LENGTH};

/// Frame sync byte.
pub const SYNC: u8 = 0x3C;

/// Protocol version marker XORed into the command byte.
pub const VERSION_MASK: u8 = 0x20;

/// Framing and frame-decode errors. All of these are recovered locally;
/// none reset the link.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("crc mismatch: frame carries {got:#04x}, computed {computed:#04x}")]
    CrcMismatch { got: u8, computed: u8 },
    #[error("unknown command byte {0:#04x}")]
    UnknownCmd(u8),
    #[error("unknown object id {0}")]
    UnknownObjectId(ObjectId),
    #[error("frame shorter than its header")]
    Truncated,
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Incremental frame extractor over a rolling byte buffer.
pub struct Deframer {
    buf: BytesMut,
    /// Largest admissible LENGTH value: the catalog's biggest object frame
    /// plus header slack.
    max_length: usize,
}

impl Deframer {
    /// `max_object_length` comes from [`Catalog::max_object_length`].
    pub fn new(max_object_length: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
            max_length: max_object_length + SHORT_HEADER_LENGTH + 2,
        }
    }

    /// Append newly received bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Extract the next frame.
    ///
    /// `Some(Ok(frame))` yields a complete CRC-valid frame, sync byte
    /// through CRC inclusive. `Some(Err(_))` reports a corrupt frame whose
    /// span has already been discarded. `None` means more bytes are needed.
    pub fn next_frame(&mut self) -> Option<Result<Bytes, FrameError>> {
        let mut search = 0;
        loop {
            let Some(sync) = find_sync(&self.buf, search) else {
                // Nothing before the next sync byte can start a frame.
                self.buf.clear();
                return None;
            };

            if self.buf.len() - sync < SHORT_HEADER_LENGTH {
                let _ = self.buf.split_to(sync);
                return None;
            }

            let length = u16::from_le_bytes([self.buf[sync + 2], self.buf[sync + 3]]) as usize;
            if length > self.max_length {
                // Spurious sync byte inside other data; step past it.
                search = sync + 1;
                continue;
            }

            if self.buf.len() - sync < length + 1 {
                let _ = self.buf.split_to(sync);
                return None;
            }

            let computed = crc8(0, &self.buf[sync..sync + length]);
            let got = self.buf[sync + length];
            let consumed = self.buf.split_to(sync + length + 1);
            if computed != got {
                return Some(Err(FrameError::CrcMismatch { got, computed }));
            }
            let frame = Bytes::copy_from_slice(&consumed[sync..]);
            return Some(Ok(frame));
        }
    }
}

fn find_sync(buf: &BytesMut, from: usize) -> Option<usize> {
    buf[from..].iter().position(|&b| b == SYNC).map(|p| p + from)
}

/// Encode a packet into a complete frame.
pub fn encode(packet: &Packet) -> Result<Vec<u8>, FrameError> {
    let mut frame = Vec::with_capacity(usize::from(packet.frame_length()) + 1);
    frame.push(SYNC);
    frame.push(packet.cmd as u8 | VERSION_MASK);
    frame.extend_from_slice(&packet.frame_length().to_le_bytes());
    frame.extend_from_slice(&packet.definition.object_id.0.to_le_bytes());
    if !packet.definition.single_instance {
        frame.extend_from_slice(&packet.instance_id.to_le_bytes());
    }
    if packet.cmd.has_payload() {
        frame.extend_from_slice(&codec::map_to_wire(&packet.definition, &packet.data)?);
    }
    frame.push(crc8(0, &frame));
    Ok(frame)
}

/// Decode a CRC-valid frame into a packet, resolving the definition through
/// the catalog.
pub fn decode(catalog: &Catalog, frame: &[u8]) -> Result<Packet, FrameError> {
    if frame.len() < SHORT_HEADER_LENGTH + 1 {
        return Err(FrameError::Truncated);
    }

    let cmd = Cmd::try_from(frame[1] ^ VERSION_MASK).map_err(FrameError::UnknownCmd)?;
    let object_id = ObjectId(u32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]]));
    let definition = catalog
        .by_id(object_id)
        .cloned()
        .ok_or(FrameError::UnknownObjectId(object_id))?;

    let mut header = SHORT_HEADER_LENGTH;
    let mut instance_id = 0;
    if !definition.single_instance {
        if frame.len() < SHORT_HEADER_LENGTH + 3 {
            return Err(FrameError::Truncated);
        }
        instance_id = u16::from_le_bytes([frame[8], frame[9]]);
        header += 2;
    }

    let data = if cmd.has_payload() {
        let payload = frame
            .get(header..frame.len() - 1)
            .ok_or(FrameError::Truncated)?;
        codec::wire_to_map(&definition, payload)?
    } else {
        ObjectData::new()
    };

    Ok(Packet::new(definition, cmd, instance_id, data))
}

/// Render a byte span as `aa:bb:cc` for link debugging.
pub fn hex_dump(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uavtalk_core::xml;

    fn catalog() -> Catalog {
        let single = r#"<object name="BaroState" singleinstance="true" settings="false">
            <field name="Altitude" units="m" type="float" elements="1"/>
            <field name="Temperature" units="C" type="int16" elements="1"/>
        </object>"#;
        let multi = r#"<object name="CameraDesired" singleinstance="false" settings="false">
            <field name="Azimuth" units="deg" type="float" elements="1"/>
        </object>"#;
        Catalog::from_objects(vec![
            xml::parse_object("baro.xml", single).unwrap(),
            xml::parse_object("camera.xml", multi).unwrap(),
        ])
        .unwrap()
    }

    fn baro_update(catalog: &Catalog) -> Packet {
        Packet::new(
            catalog.by_name("BaroState").unwrap().clone(),
            Cmd::ObjectCmd,
            0,
            json!({"Altitude": 123.5, "Temperature": -40})
                .as_object()
                .unwrap()
                .clone(),
        )
    }

    #[test]
    fn encode_layout() {
        let catalog = catalog();
        let frame = encode(&baro_update(&catalog)).unwrap();

        assert_eq!(frame[0], SYNC);
        assert_eq!(frame[1], 0x20); // ObjectCmd under the version mask
        // LENGTH: 8 header + 6 payload, CRC excluded.
        assert_eq!(u16::from_le_bytes([frame[2], frame[3]]), 14);
        assert_eq!(frame.len(), 15);
        assert_eq!(*frame.last().unwrap(), crc8(0, &frame[..14]));
    }

    #[test]
    fn golden_frame() {
        // Known-good frame for BaroState {Altitude: 123.5, Temperature: -40},
        // captured from a reference encoder.
        let catalog = catalog();
        let frame = encode(&baro_update(&catalog)).unwrap();
        assert_eq!(frame, hex::decode("3c200e00b8dd65600000f742d8ffa2").unwrap());
    }

    #[test]
    fn decode_round_trip() {
        let catalog = catalog();
        let packet = baro_update(&catalog);
        let frame = encode(&packet).unwrap();
        let decoded = decode(&catalog, &frame).unwrap();

        assert_eq!(decoded.cmd, Cmd::ObjectCmd);
        assert_eq!(decoded.definition.object_id, packet.definition.object_id);
        assert_eq!(decoded.data, packet.data);
    }

    #[test]
    fn instance_id_present_only_on_multi_instance() {
        let catalog = catalog();
        let packet = Packet::new(
            catalog.by_name("CameraDesired").unwrap().clone(),
            Cmd::ObjectCmd,
            3,
            json!({"Azimuth": 90.0}).as_object().unwrap().clone(),
        );
        let frame = encode(&packet).unwrap();
        // 8 header + 2 instance id + 4 payload.
        assert_eq!(u16::from_le_bytes([frame[2], frame[3]]), 14);
        let decoded = decode(&catalog, &frame).unwrap();
        assert_eq!(decoded.instance_id, 3);
    }

    #[test]
    fn bare_ack_has_no_payload() {
        let catalog = catalog();
        let packet = Packet::new(
            catalog.by_name("BaroState").unwrap().clone(),
            Cmd::ObjectAck,
            0,
            ObjectData::new(),
        );
        let frame = encode(&packet).unwrap();
        assert_eq!(frame.len(), SHORT_HEADER_LENGTH + 1);
        let decoded = decode(&catalog, &frame).unwrap();
        assert_eq!(decoded.cmd, Cmd::ObjectAck);
        assert!(decoded.data.is_empty());
    }

    #[test]
    fn unknown_object_id_is_an_error() {
        let catalog = catalog();
        let mut frame = encode(&baro_update(&catalog)).unwrap();
        frame[4] ^= 0xFF;
        let length = frame.len() - 1;
        let crc = crc8(0, &frame[..length]);
        frame[length] = crc;
        assert!(matches!(
            decode(&catalog, &frame),
            Err(FrameError::UnknownObjectId(_))
        ));
    }

    fn feed_chunked(deframer: &mut Deframer, stream: &[u8], chunk: usize) -> Vec<Bytes> {
        let mut frames = Vec::new();
        for piece in stream.chunks(chunk) {
            deframer.extend(piece);
            while let Some(result) = deframer.next_frame() {
                if let Ok(frame) = result {
                    frames.push(frame);
                }
            }
        }
        frames
    }

    #[test]
    fn recovers_frames_from_junk_and_corruption() {
        let catalog = catalog();
        let good = encode(&baro_update(&catalog)).unwrap();
        let mut corrupt = good.clone();
        *corrupt.last_mut().unwrap() ^= 0xA5;

        let mut stream = Vec::new();
        stream.extend_from_slice(&[0x00, 0x11, 0x22, 0x33]);
        stream.extend_from_slice(&good);
        stream.extend_from_slice(&[0xFF, 0xEE]);
        stream.extend_from_slice(&corrupt);
        stream.extend_from_slice(&good);

        // The result must not depend on how the stream is chunked.
        for chunk in [1, 2, 3, 7, stream.len()] {
            let mut deframer = Deframer::new(catalog.max_object_length());
            let frames = feed_chunked(&mut deframer, &stream, chunk);
            assert_eq!(frames.len(), 2, "chunk size {chunk}");
            for frame in &frames {
                assert_eq!(&frame[..], &good[..]);
            }
        }
    }

    #[test]
    fn impossible_length_does_not_stall() {
        let catalog = catalog();
        let good = encode(&baro_update(&catalog)).unwrap();

        // A sync byte followed by an absurd LENGTH must be skipped, not
        // waited on.
        let mut stream = vec![SYNC, 0x20, 0xFF, 0xFF];
        stream.extend_from_slice(&good);

        let mut deframer = Deframer::new(catalog.max_object_length());
        let frames = feed_chunked(&mut deframer, &stream, stream.len());
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], &good[..]);
    }

    #[test]
    fn short_length_frame_is_dropped_as_corrupt() {
        let catalog = catalog();
        let good = encode(&baro_update(&catalog)).unwrap();

        // LENGTH=4 with garbage: CRC cannot match, span must be dropped.
        let mut stream = vec![SYNC, 0x20, 0x04, 0x00, 0xAB];
        stream.extend_from_slice(&good);

        let mut deframer = Deframer::new(catalog.max_object_length());
        deframer.extend(&stream);

        let first = deframer.next_frame().unwrap();
        assert!(matches!(first, Err(FrameError::CrcMismatch { .. })));
        let second = deframer.next_frame().unwrap().unwrap();
        assert_eq!(&second[..], &good[..]);
    }

    #[test]
    fn waits_for_more_data() {
        let catalog = catalog();
        let good = encode(&baro_update(&catalog)).unwrap();
        let mut deframer = Deframer::new(catalog.max_object_length());

        deframer.extend(&good[..5]);
        assert!(deframer.next_frame().is_none());
        deframer.extend(&good[5..]);
        assert_eq!(&deframer.next_frame().unwrap().unwrap()[..], &good[..]);
    }
}
