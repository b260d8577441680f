//! Wire format of a call.
//!
//! Every frame is a 4-byte big-endian length prefix followed by a one-byte
//! tag and the frame body:
//!
//! | tag | frame    | body                                   | direction        |
//! |-----|----------|----------------------------------------|------------------|
//! | 1   | `Open`   | JSON [`CallHeader`]                    | client → server  |
//! | 2   | `Chunk`  | raw bytes                              | both             |
//! | 3   | `End`    | empty                                  | client → server  |
//! | 4   | `Status` | JSON [`CallStatus`]                    | server → client  |
//!
//! A call is `Open, Chunk*, End` upstream and `Chunk*, Status` downstream.
//! Frames larger than the configured message limit are rejected by the codec.

use crate::error::{ErrorCode, ServiceError};
use crate::pipeline::registry::OperationArgs;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::io;
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

const TAG_OPEN: u8 = 1;
const TAG_CHUNK: u8 = 2;
const TAG_END: u8 = 3;
const TAG_STATUS: u8 = 4;

/// Length of the tag that precedes every frame body.
const TAG_LEN: usize = 1;

/// First frame of every call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallHeader {
    pub method: String,
    #[serde(default)]
    pub args: OperationArgs,
}

/// Terminal frame of every call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallStatus {
    pub code: ErrorCode,
    #[serde(default)]
    pub message: String,
    /// Bytes of output streamed before this status.
    #[serde(default)]
    pub output_bytes: u64,
}

impl CallStatus {
    pub fn ok(output_bytes: u64) -> Self {
        Self {
            code: ErrorCode::Ok,
            message: String::new(),
            output_bytes,
        }
    }

    pub fn failed(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            output_bytes: 0,
        }
    }

    pub fn from_error(error: &ServiceError) -> Self {
        Self::failed(error.code(), error.to_string())
    }

    pub fn is_ok(&self) -> bool {
        self.code == ErrorCode::Ok
    }

    /// `Ok(output_bytes)` for a successful call, [`ServiceError::Remote`] otherwise.
    pub fn into_result(self) -> Result<u64, ServiceError> {
        if self.is_ok() {
            Ok(self.output_bytes)
        } else {
            Err(ServiceError::Remote {
                code: self.code,
                message: self.message,
            })
        }
    }
}

/// One protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Open(CallHeader),
    Chunk(Bytes),
    End,
    Status(CallStatus),
}

impl Frame {
    /// Short name for log and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Frame::Open(_) => "Open",
            Frame::Chunk(_) => "Chunk",
            Frame::End => "End",
            Frame::Status(_) => "Status",
        }
    }

    fn parse(mut frame: Bytes) -> io::Result<Self> {
        if frame.is_empty() {
            return Err(invalid("empty frame"));
        }
        let body = frame.split_off(TAG_LEN);
        match frame[0] {
            TAG_OPEN => serde_json::from_slice(&body)
                .map(Frame::Open)
                .map_err(|e| invalid(format!("malformed call header: {e}"))),
            TAG_CHUNK => Ok(Frame::Chunk(body)),
            TAG_END if body.is_empty() => Ok(Frame::End),
            TAG_END => Err(invalid("End frame carries a body")),
            TAG_STATUS => serde_json::from_slice(&body)
                .map(Frame::Status)
                .map_err(|e| invalid(format!("malformed call status: {e}"))),
            tag => Err(invalid(format!("unknown frame tag {tag}"))),
        }
    }
}

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

/// Length-delimited [`Frame`] codec.
#[derive(Debug)]
pub struct FrameCodec {
    inner: LengthDelimitedCodec,
}

impl FrameCodec {
    /// `max_message_bytes` bounds the body of a single frame.
    pub fn new(max_message_bytes: usize) -> Self {
        let inner = LengthDelimitedCodec::builder()
            .big_endian()
            .length_field_length(4)
            .max_frame_length(max_message_bytes.saturating_add(TAG_LEN))
            .new_codec();
        Self { inner }
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> io::Result<Option<Frame>> {
        match self.inner.decode(src)? {
            Some(frame) => Frame::parse(frame.freeze()).map(Some),
            None => Ok(None),
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> io::Result<()> {
        let payload = match frame {
            Frame::Open(header) => tagged_json(TAG_OPEN, &header)?,
            Frame::Chunk(data) => {
                let mut buf = BytesMut::with_capacity(TAG_LEN + data.len());
                buf.put_u8(TAG_CHUNK);
                buf.extend_from_slice(&data);
                buf
            }
            Frame::End => BytesMut::from(&[TAG_END][..]),
            Frame::Status(status) => tagged_json(TAG_STATUS, &status)?,
        };
        self.inner.encode(payload.freeze(), dst)
    }
}

fn tagged_json<T: Serialize>(tag: u8, value: &T) -> io::Result<BytesMut> {
    let json = serde_json::to_vec(value).map_err(|e| invalid(e.to_string()))?;
    let mut buf = BytesMut::with_capacity(TAG_LEN + json.len());
    buf.put_u8(tag);
    buf.extend_from_slice(&json);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(codec: &mut FrameCodec, frame: Frame) -> BytesMut {
        let mut buf = BytesMut::new();
        codec.encode(frame, &mut buf).unwrap();
        buf
    }

    #[test]
    fn frames_survive_the_codec() {
        let mut codec = FrameCodec::new(1024);
        let frames = vec![
            Frame::Open(CallHeader {
                method: "ResizeImage".into(),
                args: OperationArgs::resize(640, 480),
            }),
            Frame::Chunk(Bytes::from_static(b"\x00\x01binary\xff")),
            Frame::Chunk(Bytes::new()),
            Frame::End,
            Frame::Status(CallStatus::failed(
                ErrorCode::ToolExecution,
                "ImageMagick failed with code 1: no decode delegate",
            )),
        ];

        let mut wire = BytesMut::new();
        for frame in frames.clone() {
            codec.encode(frame, &mut wire).unwrap();
        }
        let mut decoded = Vec::new();
        while let Some(frame) = codec.decode(&mut wire).unwrap() {
            decoded.push(frame);
        }
        assert_eq!(decoded, frames);
        assert!(wire.is_empty());
    }

    #[test]
    fn chunk_layout_is_length_tag_body() {
        let mut codec = FrameCodec::new(1024);
        let wire = encode(&mut codec, Frame::Chunk(Bytes::from_static(b"abc")));
        assert_eq!(&wire[..], &[0, 0, 0, 4, TAG_CHUNK, b'a', b'b', b'c']);
    }

    #[test]
    fn partial_frame_waits_for_more_bytes() {
        let mut codec = FrameCodec::new(1024);
        let wire = encode(&mut codec, Frame::Chunk(Bytes::from_static(b"hello")));
        let mut partial = BytesMut::from(&wire[..wire.len() - 2]);
        assert!(codec.decode(&mut partial).unwrap().is_none());
        partial.extend_from_slice(&wire[wire.len() - 2..]);
        assert_eq!(
            codec.decode(&mut partial).unwrap(),
            Some(Frame::Chunk(Bytes::from_static(b"hello")))
        );
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut big = FrameCodec::new(1 << 20);
        let mut wire = encode(&mut big, Frame::Chunk(Bytes::from(vec![7u8; 4096])));
        let mut small = FrameCodec::new(1024);
        let err = small.decode(&mut wire).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn chunk_at_the_limit_is_accepted() {
        let mut codec = FrameCodec::new(1024);
        let mut wire = encode(&mut codec, Frame::Chunk(Bytes::from(vec![1u8; 1024])));
        assert!(matches!(codec.decode(&mut wire).unwrap(), Some(Frame::Chunk(c)) if c.len() == 1024));
    }

    #[test]
    fn unknown_tag_and_bad_json_are_invalid_data() {
        let mut codec = FrameCodec::new(1024);
        for body in [&[9u8, 1, 2][..], &[TAG_OPEN, b'{'][..], &[TAG_END, 0][..], &[][..]] {
            let mut wire = BytesMut::new();
            wire.put_u32(body.len() as u32);
            wire.extend_from_slice(body);
            let err = codec.decode(&mut wire).unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::InvalidData, "body {body:?}");
        }
    }

    #[test]
    fn header_json_shape() {
        let header = CallHeader {
            method: "ConvertImageFormat".into(),
            args: OperationArgs::format("webp"),
        };
        let json = serde_json::to_value(&header).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"method": "ConvertImageFormat", "args": {"format": "webp"}})
        );

        // Args may be omitted entirely.
        let parsed: CallHeader = serde_json::from_str(r#"{"method":"CompressPDF"}"#).unwrap();
        assert_eq!(parsed.args, OperationArgs::default());
    }

    #[test]
    fn status_codes_use_wire_names() {
        let json = serde_json::to_string(&CallStatus::ok(12)).unwrap();
        assert_eq!(json, r#"{"code":"OK","message":"","output_bytes":12}"#);

        let failed = CallStatus::failed(ErrorCode::IoError, "disk full");
        let err = failed.into_result().unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Remote { code: ErrorCode::IoError, ref message } if message == "disk full"
        ));
        assert_eq!(CallStatus::ok(5).into_result().unwrap(), 5);
    }

    #[test]
    fn status_from_error_keeps_message() {
        let err = ServiceError::ToolExecution {
            tool: "Ghostscript".into(),
            status: 1,
            output: "Unrecoverable error".into(),
        };
        let status = CallStatus::from_error(&err);
        assert_eq!(status.code, ErrorCode::ToolExecution);
        assert_eq!(
            status.message,
            "Ghostscript failed with code 1: Unrecoverable error"
        );
    }
}
