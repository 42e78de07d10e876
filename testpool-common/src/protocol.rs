// Copyright 2024-2025 Golem Cloud
//
// Licensed under the Golem Source License v1.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://license.golem.cloud/LICENSE
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The coordinator <-> worker wire protocol.
//!
//! Every frame is `u32 length | u8 tag | payload`, payload encoded as JSON.
//! The message set is closed; request identifiers are assigned monotonically
//! on the coordinator side and responses may arrive in any order. A partial
//! frame at EOF is termination, not an error to recover from.

use crate::model::{CodeSource, TestResult};
use bytes::{Buf, BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use tokio_util::codec::{Decoder, Encoder};

pub type RequestId = u64;

const HEADER_LEN: usize = 4 + 1;

/// Frames larger than this are rejected as protocol corruption.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Tag {
    Eval = 1,
    EvalCode = 2,
    Profile = 3,
    Result = 4,
    Value = 5,
    Error = 6,
}

impl Tag {
    fn from_byte(byte: u8) -> Result<Self, ProtocolError> {
        match byte {
            1 => Ok(Tag::Eval),
            2 => Ok(Tag::EvalCode),
            3 => Ok(Tag::Profile),
            4 => Ok(Tag::Result),
            5 => Ok(Tag::Value),
            6 => Ok(Tag::Error),
            other => Err(ProtocolError::UnknownTag(other)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("unknown frame tag {0}")]
    UnknownTag(u8),
    #[error("frame of {0} bytes exceeds the {MAX_FRAME_LEN} byte limit")]
    FrameTooLarge(usize),
    #[error("malformed {tag:?} payload: {source}")]
    MalformedPayload {
        tag: Tag,
        source: serde_json::Error,
    },
    #[error("unexpected {0:?} frame in this direction")]
    UnexpectedTag(Tag),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A setup shipped inside an EVAL request: the code by reference plus the
/// worker-keyed sink its output is captured to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupSpec {
    pub name: String,
    pub code: CodeSource,
    pub log_path: Option<PathBuf>,
}

/// Everything a worker needs to evaluate one item once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalSpec {
    pub item_id: String,
    pub name: String,
    pub file: PathBuf,
    pub line: u32,
    pub code: CodeSource,
    pub setups: Vec<SetupSpec>,
    pub tags: BTreeSet<String>,
    pub default_imports: bool,
    pub run_number: u32,
    /// Capture file for the item's output; `None` means eager mode, leave
    /// stdio untouched.
    pub log_path: Option<PathBuf>,
}

/// A serialized exception crossing the process boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireError {
    pub message: String,
}

impl WireError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Coordinator -> worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    Eval {
        request_id: RequestId,
        spec: EvalSpec,
    },
    EvalCode {
        request_id: RequestId,
        code: CodeSource,
    },
    /// Fire-and-forget diagnostic stack capture request.
    Profile {
        nseconds: u64,
        label: String,
    },
}

impl Request {
    pub fn tag(&self) -> Tag {
        match self {
            Request::Eval { .. } => Tag::Eval,
            Request::EvalCode { .. } => Tag::EvalCode,
            Request::Profile { .. } => Tag::Profile,
        }
    }

    pub fn expects_response(&self) -> bool {
        !matches!(self, Request::Profile { .. })
    }
}

/// Worker -> coordinator. Every non-fire-and-forget request is answered
/// exactly once with one of these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    Result {
        request_id: RequestId,
        result: TestResult,
    },
    Value {
        request_id: RequestId,
        value: serde_json::Value,
    },
    Error {
        request_id: RequestId,
        error: WireError,
    },
}

impl Response {
    pub fn tag(&self) -> Tag {
        match self {
            Response::Result { .. } => Tag::Result,
            Response::Value { .. } => Tag::Value,
            Response::Error { .. } => Tag::Error,
        }
    }

    pub fn request_id(&self) -> RequestId {
        match self {
            Response::Result { request_id, .. }
            | Response::Value { request_id, .. }
            | Response::Error { request_id, .. } => *request_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EvalPayload {
    request_id: RequestId,
    spec: EvalSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EvalCodePayload {
    request_id: RequestId,
    code: CodeSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProfilePayload {
    nseconds: u64,
    label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ResultPayload {
    request_id: RequestId,
    result: TestResult,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ValuePayload {
    request_id: RequestId,
    value: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ErrorPayload {
    request_id: RequestId,
    error: WireError,
}

fn decode_payload<T: DeserializeOwned>(tag: Tag, payload: &[u8]) -> Result<T, ProtocolError> {
    serde_json::from_slice(payload).map_err(|source| ProtocolError::MalformedPayload { tag, source })
}

fn encode_frame(
    dst: &mut BytesMut,
    tag: Tag,
    payload: &impl Serialize,
) -> Result<(), ProtocolError> {
    let bytes = serde_json::to_vec(payload)
        .map_err(|source| ProtocolError::MalformedPayload { tag, source })?;
    if bytes.len() + 1 > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge(bytes.len() + 1));
    }
    dst.reserve(HEADER_LEN + bytes.len());
    dst.put_u32((bytes.len() + 1) as u32);
    dst.put_u8(tag as u8);
    dst.put_slice(&bytes);
    Ok(())
}

/// Pulls one `tag + payload` frame out of `src`, or `None` when incomplete.
fn decode_frame(src: &mut BytesMut) -> Result<Option<(Tag, BytesMut)>, ProtocolError> {
    if src.len() < 4 {
        return Ok(None);
    }
    let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge(len));
    }
    if len == 0 {
        return Err(ProtocolError::UnknownTag(0));
    }
    if src.len() < 4 + len {
        return Ok(None);
    }
    src.advance(4);
    let tag = Tag::from_byte(src[0])?;
    src.advance(1);
    let payload = src.split_to(len - 1);
    Ok(Some((tag, payload)))
}

/// Codec for the coordinator side: encodes [`Request`], decodes [`Response`].
#[derive(Debug, Default)]
pub struct CoordinatorCodec;

impl Encoder<Request> for CoordinatorCodec {
    type Error = ProtocolError;

    fn encode(&mut self, request: Request, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let tag = request.tag();
        match request {
            Request::Eval { request_id, spec } => {
                encode_frame(dst, tag, &EvalPayload { request_id, spec })
            }
            Request::EvalCode { request_id, code } => {
                encode_frame(dst, tag, &EvalCodePayload { request_id, code })
            }
            Request::Profile { nseconds, label } => {
                encode_frame(dst, tag, &ProfilePayload { nseconds, label })
            }
        }
    }
}

impl Decoder for CoordinatorCodec {
    type Item = Response;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some((tag, payload)) = decode_frame(src)? else {
            return Ok(None);
        };
        let response = match tag {
            Tag::Result => {
                let ResultPayload { request_id, result } = decode_payload(tag, &payload)?;
                Response::Result { request_id, result }
            }
            Tag::Value => {
                let ValuePayload { request_id, value } = decode_payload(tag, &payload)?;
                Response::Value { request_id, value }
            }
            Tag::Error => {
                let ErrorPayload { request_id, error } = decode_payload(tag, &payload)?;
                Response::Error { request_id, error }
            }
            other => return Err(ProtocolError::UnexpectedTag(other)),
        };
        Ok(Some(response))
    }
}

/// Codec for the worker side: decodes [`Request`], encodes [`Response`].
#[derive(Debug, Default)]
pub struct WorkerCodec;

impl Encoder<Response> for WorkerCodec {
    type Error = ProtocolError;

    fn encode(&mut self, response: Response, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let tag = response.tag();
        match response {
            Response::Result { request_id, result } => {
                encode_frame(dst, tag, &ResultPayload { request_id, result })
            }
            Response::Value { request_id, value } => {
                encode_frame(dst, tag, &ValuePayload { request_id, value })
            }
            Response::Error { request_id, error } => {
                encode_frame(dst, tag, &ErrorPayload { request_id, error })
            }
        }
    }
}

impl Decoder for WorkerCodec {
    type Item = Request;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some((tag, payload)) = decode_frame(src)? else {
            return Ok(None);
        };
        let request = match tag {
            Tag::Eval => {
                let EvalPayload { request_id, spec } = decode_payload(tag, &payload)?;
                Request::Eval { request_id, spec }
            }
            Tag::EvalCode => {
                let EvalCodePayload { request_id, code } = decode_payload(tag, &payload)?;
                Request::EvalCode { request_id, code }
            }
            Tag::Profile => {
                let ProfilePayload { nseconds, label } = decode_payload(tag, &payload)?;
                Request::Profile { nseconds, label }
            }
            other => return Err(ProtocolError::UnexpectedTag(other)),
        };
        Ok(Some(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PerfStats, TestResult};

    fn roundtrip_request(request: Request) -> Request {
        let mut buf = BytesMut::new();
        CoordinatorCodec
            .encode(request, &mut buf)
            .expect("encode failed");
        WorkerCodec
            .decode(&mut buf)
            .expect("decode failed")
            .expect("frame incomplete")
    }

    #[test]
    fn eval_code_roundtrips_through_both_codecs() {
        let decoded = roundtrip_request(Request::EvalCode {
            request_id: 7,
            code: CodeSource::anonymous("gc full"),
        });
        match decoded {
            Request::EvalCode { request_id, code } => {
                assert_eq!(request_id, 7);
                assert_eq!(code.text, "gc full");
            }
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn response_dispatches_by_request_id() {
        let mut buf = BytesMut::new();
        for request_id in [3u64, 1, 2] {
            WorkerCodec
                .encode(
                    Response::Result {
                        request_id,
                        result: TestResult {
                            run_number: 1,
                            outcomes: vec![],
                            stats: PerfStats::default(),
                        },
                    },
                    &mut buf,
                )
                .expect("encode failed");
        }
        let mut codec = CoordinatorCodec;
        let mut seen = vec![];
        while let Some(response) = codec.decode(&mut buf).expect("decode failed") {
            seen.push(response.request_id());
        }
        assert_eq!(seen, vec![3, 1, 2]);
    }

    #[test]
    fn partial_frame_stays_buffered() {
        let mut buf = BytesMut::new();
        CoordinatorCodec
            .encode(
                Request::Profile {
                    nseconds: 10,
                    label: "stalled".to_string(),
                },
                &mut buf,
            )
            .expect("encode failed");
        let mut partial = buf.split_to(buf.len() - 1);
        assert!(
            WorkerCodec
                .decode(&mut partial)
                .expect("decode failed")
                .is_none()
        );
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u32(1);
        buf.put_u8(99);
        let err = WorkerCodec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownTag(99)));
    }
}
