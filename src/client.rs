use crate::protocol::{AskRequest, ConversationTurn, ExportRequest, ProcessResponse};
use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::multipart;
use reqwest::Client as HttpClient;
use std::path::Path;
use tracing::{debug, warn};

/// Response header carrying base64-encoded JSON with the retrieval snippets
/// an answer was grounded on.
const SOURCE_CHUNKS_HEADER: &str = "x-source-chunks";

pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The exchange failed before any of the answer arrived: transport
    /// error, or a non-success status.
    #[error("backend request failed: {0}")]
    Request(String),
    /// The answer stream broke after part of the answer had already
    /// arrived. A body failure before any fragment is a `Request` failure.
    #[error("answer stream interrupted: {0}")]
    Stream(String),
    /// The export exchange failed. The conversation is left untouched.
    #[error("export failed: {0}")]
    Export(String),
    /// Export was invoked on an empty conversation; no request was issued.
    #[error("nothing to export")]
    NothingToExport,
}

/// HTTP client for the document question-answering backend.
#[derive(Clone)]
pub struct BackendClient {
    base_url: String,
    http: HttpClient,
}

impl BackendClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: normalize_base_url(base_url),
            http: HttpClient::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Verifies the backend answers at all. Used to fail fast on startup.
    pub async fn health(&self) -> ClientResult<()> {
        let response = self
            .http
            .get(format!("{}/", self.base_url))
            .send()
            .await
            .map_err(|err| ClientError::Request(err.to_string()))?;

        if !response.status().is_success() {
            return Err(ClientError::Request(format!(
                "health check returned {}",
                response.status()
            )));
        }

        Ok(())
    }

    /// Uploads a document and opens a backend session scoped to it.
    pub async fn process_document(&self, path: &Path) -> ClientResult<ProcessResponse> {
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|err| ClientError::Request(format!("cannot read {}: {}", path.display(), err)))?;

        let part = multipart::Part::bytes(bytes).file_name(file_name);
        let part = match path.extension().and_then(|ext| ext.to_str()) {
            Some("pdf") => part.mime_str("application/pdf"),
            Some("txt") => part.mime_str("text/plain"),
            Some("docx") => part.mime_str(
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
            ),
            _ => Ok(part),
        }
        .map_err(|err| ClientError::Request(err.to_string()))?;
        let form = multipart::Form::new().part("file", part);

        let response = self
            .http
            .post(format!("{}/process", self.base_url))
            .multipart(form)
            .send()
            .await
            .map_err(|err| ClientError::Request(err.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Request(format!(
                "failed to process document: {} - {}",
                status, body
            )));
        }

        response
            .json()
            .await
            .map_err(|err| ClientError::Request(err.to_string()))
    }

    /// Submits a question and opens the streamed answer.
    ///
    /// `history` is the conversation before this question; the question
    /// itself travels in its own field. Dropping the returned stream aborts
    /// the exchange. There is no read timeout; the caller owns pacing.
    pub async fn ask(
        &self,
        session_id: &str,
        question: &str,
        history: Vec<ConversationTurn>,
    ) -> ClientResult<AnswerStream> {
        let request = AskRequest {
            session_id: session_id.to_string(),
            question: question.to_string(),
            chat_history: history,
        };
        debug!(
            history_len = request.chat_history.len(),
            "submitting question"
        );

        let response = self
            .http
            .post(format!("{}/query", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|err| ClientError::Request(err.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Request(format!(
                "failed to submit question: {} - {}",
                status, body
            )));
        }

        let sources = decode_source_header(response.headers().get(SOURCE_CHUNKS_HEADER));

        Ok(AnswerStream {
            chunks: response
                .bytes_stream()
                .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
                .boxed(),
            decoder: Utf8Decoder::default(),
            done: false,
            produced: false,
            sources,
        })
    }

    /// One atomic request/response exchange for the PDF summary. Empty
    /// conversations are rejected locally; no request goes out for them.
    pub async fn export_pdf(&self, turns: &[ConversationTurn]) -> ClientResult<Vec<u8>> {
        if turns.is_empty() {
            return Err(ClientError::NothingToExport);
        }

        let request = ExportRequest {
            chat_history: turns.to_vec(),
        };
        let response = self
            .http
            .post(format!("{}/export/pdf", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|err| ClientError::Export(err.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Export(format!(
                "failed to export summary: {} - {}",
                status, body
            )));
        }

        let payload = response
            .bytes()
            .await
            .map_err(|err| ClientError::Export(err.to_string()))?;
        debug!(bytes = payload.len(), "export payload received");
        Ok(payload.to_vec())
    }
}

/// A streamed answer: a lazy, finite sequence of decoded text fragments.
/// The end of the HTTP body is the only completion signal; there is no
/// sentinel in the payload.
pub struct AnswerStream {
    chunks: BoxStream<'static, Result<Vec<u8>, reqwest::Error>>,
    decoder: Utf8Decoder,
    done: bool,
    produced: bool,
    sources: Vec<String>,
}

impl AnswerStream {
    /// Next decoded fragment, or `None` once the backend closes the stream.
    /// A byte chunk that ends inside a multi-byte character produces no
    /// fragment on its own; the tail carries over into the next chunk.
    pub async fn next_fragment(&mut self) -> Option<ClientResult<String>> {
        if self.done {
            return None;
        }

        loop {
            match self.chunks.next().await {
                Some(Ok(chunk)) => {
                    let fragment = self.decoder.feed(&chunk);
                    if fragment.is_empty() {
                        continue;
                    }
                    self.produced = true;
                    return Some(Ok(fragment));
                }
                Some(Err(err)) => {
                    self.done = true;
                    // An error before any decoded text is a request failure,
                    // not an interrupted answer.
                    let detail = err.to_string();
                    return Some(Err(if self.produced {
                        ClientError::Stream(detail)
                    } else {
                        ClientError::Request(detail)
                    }));
                }
                None => {
                    self.done = true;
                    return self.decoder.finish().map(Ok);
                }
            }
        }
    }

    /// Retrieval snippets advertised alongside the answer, if any.
    pub fn sources(&self) -> &[String] {
        &self.sources
    }
}

/// Incremental UTF-8 decoder.
///
/// Byte chunks off the wire can split a multi-byte sequence anywhere, so
/// decoding carries the unfinished tail from one chunk into the next
/// instead of treating each chunk independently. Invalid bytes decode to
/// U+FFFD.
#[derive(Debug, Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    fn feed(&mut self, chunk: &[u8]) -> String {
        let mut buf = std::mem::take(&mut self.pending);
        buf.extend_from_slice(chunk);

        let mut out = String::new();
        let mut offset = 0;
        while offset < buf.len() {
            match std::str::from_utf8(&buf[offset..]) {
                Ok(valid) => {
                    out.push_str(valid);
                    offset = buf.len();
                }
                Err(err) => {
                    let end = offset + err.valid_up_to();
                    out.push_str(std::str::from_utf8(&buf[offset..end]).unwrap_or(""));
                    match err.error_len() {
                        // Garbage bytes: replace them and keep going.
                        Some(bad) => {
                            out.push('\u{FFFD}');
                            offset = end + bad;
                        }
                        // The chunk ends inside a multi-byte sequence. Keep
                        // the tail until the rest of it arrives.
                        None => {
                            self.pending = buf.split_off(end);
                            return out;
                        }
                    }
                }
            }
        }

        out
    }

    /// Flushes an unfinished trailing sequence once the stream has closed.
    fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            self.pending.clear();
            Some('\u{FFFD}'.to_string())
        }
    }
}

fn normalize_base_url(value: &str) -> String {
    value.trim_end_matches('/').to_string()
}

/// The source-chunks header is advisory: anything absent or malformed
/// decodes to the empty list, never an error.
fn decode_source_header(value: Option<&reqwest::header::HeaderValue>) -> Vec<String> {
    let Some(raw) = value.and_then(|v| v.to_str().ok()) else {
        return Vec::new();
    };
    let Ok(bytes) = BASE64_STANDARD.decode(raw) else {
        warn!("ignoring undecodable source-chunks header");
        return Vec::new();
    };
    match serde_json::from_slice::<Vec<String>>(&bytes) {
        Ok(sources) => sources,
        Err(err) => {
            warn!(%err, "ignoring malformed source-chunks header");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn decoder_passes_whole_chunks_through() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.feed(b"plain ascii"), "plain ascii");
        assert_eq!(decoder.feed("déjà vu".as_bytes()), "déjà vu");
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn decoder_carries_split_two_byte_sequence() {
        // "é" is 0xC3 0xA9.
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.feed(b"caf\xC3"), "caf");
        assert_eq!(decoder.feed(b"\xA9 au lait"), "\u{e9} au lait");
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn decoder_carries_four_byte_sequence_across_three_chunks() {
        // U+1F600 is 0xF0 0x9F 0x98 0x80.
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.feed(b"\xF0"), "");
        assert_eq!(decoder.feed(b"\x9F\x98"), "");
        assert_eq!(decoder.feed(b"\x80!"), "\u{1F600}!");
    }

    #[test]
    fn decoder_replaces_invalid_bytes() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.feed(b"ok \xFF go"), "ok \u{FFFD} go");
    }

    #[test]
    fn decoder_flushes_dangling_tail_as_replacement() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.feed(b"end \xE2\x9C"), "end ");
        assert_eq!(decoder.finish(), Some("\u{FFFD}".to_string()));
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn source_header_decodes_base64_json() {
        let encoded = BASE64_STANDARD.encode(r#"["chunk one","chunk two"]"#);
        let value = HeaderValue::from_str(&encoded).unwrap();
        assert_eq!(
            decode_source_header(Some(&value)),
            vec!["chunk one".to_string(), "chunk two".to_string()]
        );
    }

    #[test]
    fn source_header_tolerates_garbage() {
        assert!(decode_source_header(None).is_empty());

        let not_base64 = HeaderValue::from_static("!!not-base64!!");
        assert!(decode_source_header(Some(&not_base64)).is_empty());

        let not_json = HeaderValue::from_str(&BASE64_STANDARD.encode("not json")).unwrap();
        assert!(decode_source_header(Some(&not_json)).is_empty());
    }

    #[test]
    fn base_url_loses_trailing_slash() {
        let client = BackendClient::new("http://localhost:8000/");
        assert_eq!(client.base_url(), "http://localhost:8000");
    }
}
