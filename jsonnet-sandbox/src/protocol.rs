//! Wire format between evaluators and their worker processes.
//!
//! Requests are JSON-encoded [`EvaluationRequest`]s. A one-shot process
//! receives exactly one request as its entire stdin. A pooled worker
//! receives a stream of requests, each terminated by a single NUL byte, and
//! answers each with a NUL-terminated response. NUL is used instead of a
//! newline because snippets and outputs routinely contain newlines, while
//! the JSON encoder escapes NUL inside strings.
//!
//! A response starting with [`ERROR_PREFIX`] is an evaluation error; any
//! other response is the raw output.

use crate::error::Error;
use crate::types::EvaluationRequest;
use std::io::{self, BufRead};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Byte terminating every message on a pooled worker's pipes.
pub const FRAME_DELIMITER: u8 = 0;

/// Marks a response as an evaluation error.
pub const ERROR_PREFIX: &str = "ERROR: ";

pub fn encode_request(request: &EvaluationRequest) -> Result<Vec<u8>, Error> {
    Ok(serde_json::to_vec(request)?)
}

pub fn decode_request(payload: &[u8]) -> Result<EvaluationRequest, serde_json::Error> {
    serde_json::from_slice(payload)
}

/// Appends the frame delimiter to an encoded message.
pub fn frame(mut payload: Vec<u8>) -> Vec<u8> {
    payload.push(FRAME_DELIMITER);
    payload
}

pub fn encode_response(result: Result<String, String>) -> String {
    match result {
        Ok(output) => output,
        Err(message) => format!("{}{}", ERROR_PREFIX, message),
    }
}

pub fn decode_response(response: String) -> Result<String, Error> {
    match response.strip_prefix(ERROR_PREFIX) {
        Some(message) => Err(Error::Evaluation(message.to_string())),
        None => Ok(response),
    }
}

/// Blocking reader that splits a byte stream on [`FRAME_DELIMITER`].
pub struct FrameReader<R> {
    reader: R,
    buffer: Vec<u8>,
}

impl<R: BufRead> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(4096),
        }
    }

    /// Next frame without its delimiter, or `None` at EOF. Trailing bytes
    /// without a delimiter are returned as a final frame.
    pub fn next_frame(&mut self) -> io::Result<Option<&[u8]>> {
        self.buffer.clear();
        if self.reader.read_until(FRAME_DELIMITER, &mut self.buffer)? == 0 {
            return Ok(None);
        }
        if self.buffer.last() == Some(&FRAME_DELIMITER) {
            self.buffer.pop();
        }
        Ok(Some(&self.buffer))
    }
}

/// Async counterpart of [`FrameReader::next_frame`]: fills `buffer` with the
/// next frame and returns `false` at EOF.
pub async fn read_frame<R>(reader: &mut R, buffer: &mut Vec<u8>) -> io::Result<bool>
where
    R: AsyncBufRead + Unpin,
{
    buffer.clear();
    if reader.read_until(FRAME_DELIMITER, buffer).await? == 0 {
        return Ok(false);
    }
    if buffer.last() == Some(&FRAME_DELIMITER) {
        buffer.pop();
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Bindings;
    use std::io::Cursor;

    fn sample_request() -> EvaluationRequest {
        let mut bindings = Bindings::default();
        bindings.ext_code("code", "{ a: 1 }");
        bindings.ext_var("var", "line one\nline two");
        bindings.ext_var("var", "again");
        bindings.tla_code("flag", "true");
        bindings.tla_var("nul", "before\0after");
        EvaluationRequest::new(
            "config.jsonnet",
            "local a = 1;\n// comment\n{ a: a, s: \"\\u0000\" }",
            bindings,
        )
    }

    #[test]
    fn test_request_survives_framing() {
        let request = sample_request();
        let payload = encode_request(&request).unwrap();
        assert!(!payload.contains(&FRAME_DELIMITER));

        let mut stream = frame(payload.clone());
        stream.extend(frame(payload));

        let mut reader = FrameReader::new(Cursor::new(stream));
        for _ in 0..2 {
            let frame = reader.next_frame().unwrap().expect("frame");
            assert_eq!(decode_request(frame).unwrap(), request);
        }
        assert!(reader.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_wire_field_names() {
        let value: serde_json::Value =
            serde_json::from_slice(&encode_request(&sample_request()).unwrap()).unwrap();
        for field in ["Filename", "Snippet", "ExtCodes", "ExtVars", "TLACodes", "TLAVars"] {
            assert!(value.get(field).is_some(), "missing {}", field);
        }
        assert_eq!(value["ExtVars"][1]["Key"], "var");
        assert_eq!(value["ExtVars"][1]["Value"], "again");
    }

    #[test]
    fn test_missing_binding_lists_default_to_empty() {
        let request = decode_request(br#"{"Filename":"f","Snippet":"1+1"}"#).unwrap();
        assert_eq!(request.snippet, "1+1");
        assert!(request.bindings.is_empty());
    }

    #[test]
    fn test_unterminated_final_frame_is_returned() {
        let mut reader = FrameReader::new(Cursor::new(b"first\0second".to_vec()));
        assert_eq!(reader.next_frame().unwrap(), Some(&b"first"[..]));
        assert_eq!(reader.next_frame().unwrap(), Some(&b"second"[..]));
        assert_eq!(reader.next_frame().unwrap(), None);
    }

    #[test]
    fn test_response_prefix() {
        assert_eq!(decode_response("{\"a\": 1}".into()).unwrap(), "{\"a\": 1}");

        let encoded = encode_response(Err("RUNTIME ERROR: boom".into()));
        assert!(encoded.starts_with(ERROR_PREFIX));
        match decode_response(encoded) {
            Err(Error::Evaluation(message)) => assert_eq!(message, "RUNTIME ERROR: boom"),
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_async_reader_matches_blocking_reader() {
        let mut input = Cursor::new(b"one\0two\nlines\0".to_vec());
        let mut buffer = Vec::new();

        assert!(read_frame(&mut input, &mut buffer).await.unwrap());
        assert_eq!(buffer, b"one");
        assert!(read_frame(&mut input, &mut buffer).await.unwrap());
        assert_eq!(buffer, b"two\nlines");
        assert!(!read_frame(&mut input, &mut buffer).await.unwrap());
    }
}
