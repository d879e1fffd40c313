//! Length-prefixed binary framing and fixed-field primitive codecs
//!
//! Every frame on either channel is `[i32 length][i32 opcode][payload]`, little endian,
//! where `length` counts the opcode and payload bytes. Primitives are written in a fixed
//! field order per opcode; there is no self-describing layer.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use glam::{Quat, Vec3};

use super::protocol::ProtocolError;

/// Upper bound on `length`; anything larger is treated as a corrupt stream
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Bytes taken by the length prefix
const LEN_PREFIX: usize = 4;
/// Bytes taken by the opcode
const OPCODE_LEN: usize = 4;

/// One decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub opcode: i32,
    pub payload: Bytes,
}

/// Wrap an opcode and payload into a complete frame
pub fn encode_frame(opcode: i32, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(LEN_PREFIX + OPCODE_LEN + payload.len());
    buf.put_i32_le((OPCODE_LEN + payload.len()) as i32);
    buf.put_i32_le(opcode);
    buf.put_slice(payload);
    buf.freeze()
}

/// Parse exactly one frame from a datagram; trailing bytes are an error
pub fn parse_frame(mut data: Bytes) -> Result<Frame, ProtocolError> {
    let len = read_len(&data)?;
    data.advance(LEN_PREFIX);
    if data.len() != len {
        return Err(ProtocolError::Truncated {
            needed: len,
            available: data.len(),
        });
    }
    let opcode = data.get_i32_le();
    Ok(Frame {
        opcode,
        payload: data,
    })
}

fn read_len(data: &[u8]) -> Result<usize, ProtocolError> {
    if data.len() < LEN_PREFIX {
        return Err(ProtocolError::Truncated {
            needed: LEN_PREFIX,
            available: data.len(),
        });
    }
    let raw = i32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    if raw < OPCODE_LEN as i32 || raw as usize > MAX_FRAME_LEN {
        return Err(ProtocolError::InvalidLength(raw));
    }
    Ok(raw as usize)
}

/// Incremental decoder for the reliable stream channel
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
        }
    }

    /// Append raw bytes read from the stream
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Pop the next complete frame, if one is buffered.
    ///
    /// An invalid length prefix poisons the stream; callers should drop the connection.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        if self.buf.len() < LEN_PREFIX {
            return Ok(None);
        }
        let len = read_len(&self.buf)?;
        if self.buf.len() < LEN_PREFIX + len {
            return Ok(None);
        }
        self.buf.advance(LEN_PREFIX);
        let mut body = self.buf.split_to(len).freeze();
        let opcode = body.get_i32_le();
        Ok(Some(Frame {
            opcode,
            payload: body,
        }))
    }
}

/// Fixed-field writers for wire primitives
pub trait WireWrite {
    fn put_vec3(&mut self, v: Vec3);
    fn put_quat(&mut self, q: Quat);
    fn put_bool(&mut self, b: bool);
    fn put_str(&mut self, s: &str) -> Result<(), ProtocolError>;
}

impl WireWrite for BytesMut {
    fn put_vec3(&mut self, v: Vec3) {
        self.put_f32_le(v.x);
        self.put_f32_le(v.y);
        self.put_f32_le(v.z);
    }

    fn put_quat(&mut self, q: Quat) {
        self.put_f32_le(q.x);
        self.put_f32_le(q.y);
        self.put_f32_le(q.z);
        self.put_f32_le(q.w);
    }

    fn put_bool(&mut self, b: bool) {
        self.put_u8(b as u8);
    }

    fn put_str(&mut self, s: &str) -> Result<(), ProtocolError> {
        let len = u16::try_from(s.len()).map_err(|_| ProtocolError::StringTooLong(s.len()))?;
        self.put_u16_le(len);
        self.put_slice(s.as_bytes());
        Ok(())
    }
}

/// Bounds-checked reader over a frame payload
pub struct WireReader {
    buf: Bytes,
}

impl WireReader {
    pub fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    fn need(&self, n: usize) -> Result<(), ProtocolError> {
        if self.buf.remaining() < n {
            Err(ProtocolError::Truncated {
                needed: n,
                available: self.buf.remaining(),
            })
        } else {
            Ok(())
        }
    }

    pub fn u8(&mut self) -> Result<u8, ProtocolError> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn bool(&mut self) -> Result<bool, ProtocolError> {
        Ok(self.u8()? != 0)
    }

    pub fn u16(&mut self) -> Result<u16, ProtocolError> {
        self.need(2)?;
        Ok(self.buf.get_u16_le())
    }

    pub fn i32(&mut self) -> Result<i32, ProtocolError> {
        self.need(4)?;
        Ok(self.buf.get_i32_le())
    }

    pub fn u32(&mut self) -> Result<u32, ProtocolError> {
        self.need(4)?;
        Ok(self.buf.get_u32_le())
    }

    pub fn u64(&mut self) -> Result<u64, ProtocolError> {
        self.need(8)?;
        Ok(self.buf.get_u64_le())
    }

    /// Reads a float and rejects NaN/inf so client data can never poison the simulation
    pub fn f32(&mut self) -> Result<f32, ProtocolError> {
        self.need(4)?;
        let v = self.buf.get_f32_le();
        if v.is_finite() {
            Ok(v)
        } else {
            Err(ProtocolError::NonFinite)
        }
    }

    pub fn vec3(&mut self) -> Result<Vec3, ProtocolError> {
        Ok(Vec3::new(self.f32()?, self.f32()?, self.f32()?))
    }

    pub fn quat(&mut self) -> Result<Quat, ProtocolError> {
        let (x, y, z, w) = (self.f32()?, self.f32()?, self.f32()?, self.f32()?);
        Ok(Quat::from_xyzw(x, y, z, w))
    }

    pub fn string(&mut self) -> Result<String, ProtocolError> {
        let len = self.u16()? as usize;
        self.need(len)?;
        let raw = self.buf.split_to(len);
        String::from_utf8(raw.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)
    }

    /// Payloads must be consumed exactly
    pub fn finish(self) -> Result<(), ProtocolError> {
        if self.buf.has_remaining() {
            Err(ProtocolError::TrailingBytes(self.buf.remaining()))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoder_handles_split_and_coalesced_frames() {
        let a = encode_frame(5, &[1, 2, 3]);
        let b = encode_frame(7, &[]);
        let mut stream = Vec::new();
        stream.extend_from_slice(&a);
        stream.extend_from_slice(&b);

        let mut decoder = FrameDecoder::new();
        decoder.extend(&stream[..6]);
        assert_eq!(decoder.next_frame().unwrap(), None);
        decoder.extend(&stream[6..]);

        let first = decoder.next_frame().unwrap().unwrap();
        assert_eq!(first.opcode, 5);
        assert_eq!(&first.payload[..], &[1, 2, 3]);
        let second = decoder.next_frame().unwrap().unwrap();
        assert_eq!(second.opcode, 7);
        assert!(second.payload.is_empty());
        assert_eq!(decoder.next_frame().unwrap(), None);
    }

    #[test]
    fn oversized_length_is_rejected() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&((MAX_FRAME_LEN as i32) + 1).to_le_bytes());
        assert!(matches!(
            decoder.next_frame(),
            Err(ProtocolError::InvalidLength(_))
        ));
    }

    #[test]
    fn datagram_with_wrong_length_is_rejected() {
        let mut raw = BytesMut::new();
        raw.put_i32_le(12);
        raw.put_i32_le(1);
        assert!(parse_frame(raw.freeze()).is_err());
        assert!(parse_frame(encode_frame(1, &[9])).is_ok());
    }

    #[test]
    fn reader_rejects_truncation_and_nan() {
        let mut buf = BytesMut::new();
        buf.put_f32_le(f32::NAN);
        let mut reader = WireReader::new(buf.freeze());
        assert_eq!(reader.f32(), Err(ProtocolError::NonFinite));

        let mut reader = WireReader::new(Bytes::from_static(&[1, 0]));
        assert!(matches!(
            reader.u32(),
            Err(ProtocolError::Truncated { needed: 4, .. })
        ));
    }

    #[test]
    fn strings_are_length_prefixed() {
        let mut buf = BytesMut::new();
        buf.put_str("héllo").unwrap();
        let mut reader = WireReader::new(buf.freeze());
        assert_eq!(reader.string().unwrap(), "héllo");
        reader.finish().unwrap();
    }
}
