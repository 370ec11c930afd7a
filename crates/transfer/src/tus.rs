//! [`ChunkSink`] speaking the tus 1.0.0 resumable upload protocol.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::{CONTENT_TYPE, HeaderMap, LOCATION};
use reqwest::{StatusCode, Url};
use tracing::{debug, warn};

use crate::TransferError;
use crate::chunked::Chunk;
use crate::sink::{BoxFuture, ChunkSink, SinkError};
use crate::types::TransferMetadata;

const TUS_VERSION: &str = "1.0.0";
const OFFSET_CONTENT_TYPE: &str = "application/offset+octet-stream";

const H_TUS_RESUMABLE: &str = "Tus-Resumable";
const H_UPLOAD_LENGTH: &str = "Upload-Length";
const H_UPLOAD_OFFSET: &str = "Upload-Offset";
const H_UPLOAD_METADATA: &str = "Upload-Metadata";
const H_UPLOAD_CHECKSUM: &str = "Upload-Checksum";

/// tus client bound to one creation endpoint.
pub struct TusSink {
    http: reqwest::Client,
    endpoint: Url,
    checksums: bool,
}

impl TusSink {
    /// Creates a sink for the creation endpoint at `endpoint`.
    pub fn new(endpoint: &str) -> Result<Self, TransferError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| TransferError::InvalidEndpoint(format!("{endpoint}: {e}")))?;
        Ok(Self {
            http: reqwest::Client::new(),
            endpoint,
            checksums: false,
        })
    }

    /// Uses a preconfigured HTTP client (timeouts, proxies, ...).
    pub fn with_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// Sends an `Upload-Checksum` header with every chunk. Only enable
    /// against servers advertising the checksum extension.
    pub fn with_checksums(mut self, enabled: bool) -> Self {
        self.checksums = enabled;
        self
    }

    /// The creation endpoint.
    pub fn endpoint(&self) -> &str {
        self.endpoint.as_str()
    }

    async fn do_create(&self, size: u64, metadata: &TransferMetadata) -> Result<String, SinkError> {
        let mut req = self
            .http
            .post(self.endpoint.clone())
            .header(H_TUS_RESUMABLE, TUS_VERSION)
            .header(H_UPLOAD_LENGTH, size.to_string());
        let encoded = encode_metadata(metadata);
        if !encoded.is_empty() {
            req = req.header(H_UPLOAD_METADATA, encoded);
        }

        let resp = req.send().await.map_err(transport)?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let location = resp
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| SinkError::Rejected("creation response without Location".into()))?;
        let resolved = self
            .endpoint
            .join(location)
            .map_err(|e| SinkError::Rejected(format!("invalid Location {location:?}: {e}")))?;
        debug!(location = %resolved, size, "tus upload created");
        Ok(resolved.into())
    }

    async fn do_head(&self, location: &str) -> Result<u64, SinkError> {
        let resp = self
            .http
            .head(location)
            .header(H_TUS_RESUMABLE, TUS_VERSION)
            .send()
            .await
            .map_err(transport)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(classify_status(status, ""));
        }
        parse_offset(resp.headers())
    }

    async fn do_patch(&self, location: &str, chunk: Chunk) -> Result<u64, SinkError> {
        let mut req = self
            .http
            .patch(location)
            .header(H_TUS_RESUMABLE, TUS_VERSION)
            .header(H_UPLOAD_OFFSET, chunk.offset.to_string())
            .header(CONTENT_TYPE, OFFSET_CONTENT_TYPE);
        if self.checksums {
            match checksum_header(&chunk.checksum) {
                Some(value) => req = req.header(H_UPLOAD_CHECKSUM, value),
                None => warn!(offset = chunk.offset, "chunk checksum is not valid hex, sending without"),
            }
        }

        let resp = req.body(chunk.data).send().await.map_err(transport)?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }
        parse_offset(resp.headers())
    }
}

impl ChunkSink for TusSink {
    fn create<'a>(
        &'a self,
        size: u64,
        metadata: &'a TransferMetadata,
    ) -> BoxFuture<'a, Result<String, SinkError>> {
        Box::pin(self.do_create(size, metadata))
    }

    fn acknowledged_offset<'a>(&'a self, location: &'a str) -> BoxFuture<'a, Result<u64, SinkError>> {
        Box::pin(self.do_head(location))
    }

    fn send_chunk<'a>(
        &'a self,
        location: &'a str,
        chunk: Chunk,
    ) -> BoxFuture<'a, Result<u64, SinkError>> {
        Box::pin(self.do_patch(location, chunk))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Encodes metadata as `key base64(value)` pairs joined by commas.
///
/// Keys must be non-empty and free of spaces and commas; others are dropped.
fn encode_metadata(metadata: &TransferMetadata) -> String {
    metadata
        .iter()
        .filter(|(k, _)| {
            let valid = !k.is_empty() && !k.contains([' ', ',']);
            if !valid {
                warn!(key = %k, "dropping invalid upload metadata key");
            }
            valid
        })
        .map(|(k, v)| {
            if v.is_empty() {
                k.clone()
            } else {
                format!("{k} {}", STANDARD.encode(v))
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Maps a non-success status onto retryable or terminal failure.
///
/// Client errors are terminal except conflicts, locks, timeouts and rate
/// limiting. Everything else is retried.
fn classify_status(status: StatusCode, body: &str) -> SinkError {
    let msg = if body.is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {}", body.trim())
    };
    let retryable_client = matches!(
        status,
        StatusCode::CONFLICT
            | StatusCode::LOCKED
            | StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
    );
    if status.is_client_error() && !retryable_client {
        SinkError::Rejected(msg)
    } else {
        SinkError::Transient(msg)
    }
}

fn parse_offset(headers: &HeaderMap) -> Result<u64, SinkError> {
    headers
        .get(H_UPLOAD_OFFSET)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .ok_or_else(|| SinkError::Transient("response without valid Upload-Offset".into()))
}

/// `sha256 <base64 digest>` from a hex digest.
fn checksum_header(hex_digest: &str) -> Option<String> {
    let raw = hex::decode(hex_digest).ok()?;
    Some(format!("sha256 {}", STANDARD.encode(raw)))
}

fn transport(e: reqwest::Error) -> SinkError {
    SinkError::Transient(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunked::checksum_bytes;
    use std::collections::HashMap;
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::{TcpListener, TcpStream};

    // -- Pure helpers -------------------------------------------------------

    #[test]
    fn metadata_is_base64_encoded() {
        let mut meta = TransferMetadata::new();
        meta.insert("filetype".into(), "video/mp4".into());
        meta.insert("title".into(), "clip.mp4".into());
        meta.insert("bad key".into(), "x".into());
        meta.insert("empty".into(), String::new());

        assert_eq!(
            encode_metadata(&meta),
            "empty,filetype dmlkZW8vbXA0,title Y2xpcC5tcDQ="
        );
    }

    #[test]
    fn status_classification() {
        for code in [400, 401, 403, 404, 410, 413, 415] {
            let status = StatusCode::from_u16(code).unwrap();
            assert!(!classify_status(status, "").is_transient(), "{code}");
        }
        for code in [408, 409, 423, 429, 500, 502, 503, 504] {
            let status = StatusCode::from_u16(code).unwrap();
            assert!(classify_status(status, "").is_transient(), "{code}");
        }
        assert_eq!(
            classify_status(StatusCode::FORBIDDEN, " nope \n"),
            SinkError::Rejected("HTTP 403 Forbidden: nope".into())
        );
    }

    #[test]
    fn checksum_header_from_hex() {
        let hex = checksum_bytes(b"hello");
        let header = checksum_header(&hex).unwrap();
        assert!(header.starts_with("sha256 "));
        assert_eq!(STANDARD.decode(&header[7..]).unwrap(), hex::decode(hex).unwrap());
        assert!(checksum_header("not-hex").is_none());
    }

    #[test]
    fn invalid_endpoint_rejected() {
        assert!(matches!(
            TusSink::new("not a url"),
            Err(TransferError::InvalidEndpoint(_))
        ));
    }

    // -- Loopback tus server ------------------------------------------------

    #[derive(Default)]
    struct TusServer {
        uploads: HashMap<String, (u64, Vec<u8>)>,
        next_id: u32,
        last_metadata: Option<String>,
        last_checksum: Option<String>,
        fail_patches: Vec<u16>,
    }

    impl TusServer {
        fn respond(
            &mut self,
            method: &str,
            path: &str,
            headers: &HashMap<String, String>,
            body: Vec<u8>,
        ) -> (u16, Vec<(&'static str, String)>) {
            if headers.get("tus-resumable").map(String::as_str) != Some(TUS_VERSION) {
                return (412, vec![]);
            }
            match method {
                "POST" if path == "/files/" => {
                    let Some(length) = headers.get("upload-length").and_then(|v| v.parse().ok())
                    else {
                        return (400, vec![]);
                    };
                    let id = format!("/files/{}", self.next_id);
                    self.next_id += 1;
                    self.uploads.insert(id.clone(), (length, Vec::new()));
                    self.last_metadata = headers.get("upload-metadata").cloned();
                    (201, vec![("Location", id)])
                }
                "HEAD" => match self.uploads.get(path) {
                    Some((length, data)) => (
                        200,
                        vec![
                            ("Upload-Offset", data.len().to_string()),
                            ("Upload-Length", length.to_string()),
                        ],
                    ),
                    None => (404, vec![]),
                },
                "PATCH" => {
                    if !self.fail_patches.is_empty() {
                        return (self.fail_patches.remove(0), vec![]);
                    }
                    if headers.get("content-type").map(String::as_str) != Some(OFFSET_CONTENT_TYPE)
                    {
                        return (415, vec![]);
                    }
                    self.last_checksum = headers.get("upload-checksum").cloned();
                    let Some((_, data)) = self.uploads.get_mut(path) else {
                        return (404, vec![]);
                    };
                    let offset: Option<usize> =
                        headers.get("upload-offset").and_then(|v| v.parse().ok());
                    if offset != Some(data.len()) {
                        return (409, vec![]);
                    }
                    data.extend_from_slice(&body);
                    (204, vec![("Upload-Offset", data.len().to_string())])
                }
                _ => (405, vec![]),
            }
        }
    }

    async fn handle_conn(stream: TcpStream, state: Arc<Mutex<TusServer>>) -> std::io::Result<()> {
        let mut reader = BufReader::new(stream);
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).await? == 0 {
                return Ok(());
            }
            let mut parts = line.split_whitespace();
            let method = parts.next().unwrap_or_default().to_string();
            let path = parts.next().unwrap_or_default().to_string();

            let mut headers = HashMap::new();
            loop {
                let mut h = String::new();
                reader.read_line(&mut h).await?;
                let h = h.trim_end();
                if h.is_empty() {
                    break;
                }
                if let Some((k, v)) = h.split_once(':') {
                    headers.insert(k.trim().to_ascii_lowercase(), v.trim().to_string());
                }
            }
            let len = headers
                .get("content-length")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            let mut body = vec![0u8; len];
            reader.read_exact(&mut body).await?;

            let (status, extra) = state
                .lock()
                .unwrap()
                .respond(&method, &path, &headers, body);
            let mut resp = format!("HTTP/1.1 {status} X\r\n");
            if status != 204 {
                resp.push_str("content-length: 0\r\n");
            }
            for (k, v) in extra {
                resp.push_str(&format!("{k}: {v}\r\n"));
            }
            resp.push_str("\r\n");
            reader.get_mut().write_all(resp.as_bytes()).await?;
        }
    }

    async fn spawn_server() -> (SocketAddr, Arc<Mutex<TusServer>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(TusServer::default()));
        let s = Arc::clone(&state);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(handle_conn(stream, Arc::clone(&s)));
            }
        });
        (addr, state)
    }

    fn chunk(offset: u64, data: &[u8]) -> Chunk {
        Chunk {
            offset,
            data: data.to_vec(),
            checksum: checksum_bytes(data),
        }
    }

    #[tokio::test]
    async fn create_patch_head_roundtrip() {
        let (addr, server) = spawn_server().await;
        let sink = TusSink::new(&format!("http://{addr}/files/"))
            .unwrap()
            .with_checksums(true);

        let mut meta = TransferMetadata::new();
        meta.insert("title".into(), "clip.mp4".into());
        let location = sink.create(8, &meta).await.unwrap();
        assert_eq!(location, format!("http://{addr}/files/0"));
        assert_eq!(
            server.lock().unwrap().last_metadata.as_deref(),
            Some("title Y2xpcC5tcDQ=")
        );

        assert_eq!(sink.acknowledged_offset(&location).await.unwrap(), 0);
        assert_eq!(sink.send_chunk(&location, chunk(0, b"abcd")).await.unwrap(), 4);
        assert_eq!(sink.acknowledged_offset(&location).await.unwrap(), 4);
        assert_eq!(sink.send_chunk(&location, chunk(4, b"efgh")).await.unwrap(), 8);

        let s = server.lock().unwrap();
        assert_eq!(s.uploads["/files/0"].1, b"abcdefgh");
        assert!(s.last_checksum.as_deref().unwrap().starts_with("sha256 "));
    }

    #[tokio::test]
    async fn unknown_location_is_rejected() {
        let (addr, _server) = spawn_server().await;
        let sink = TusSink::new(&format!("http://{addr}/files/")).unwrap();

        let err = sink
            .acknowledged_offset(&format!("http://{addr}/files/404"))
            .await
            .unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn patch_failures_are_classified() {
        let (addr, server) = spawn_server().await;
        let sink = TusSink::new(&format!("http://{addr}/files/")).unwrap();
        let location = sink.create(4, &TransferMetadata::new()).await.unwrap();

        server.lock().unwrap().fail_patches = vec![503, 409, 403];
        let e1 = sink.send_chunk(&location, chunk(0, b"abcd")).await.unwrap_err();
        let e2 = sink.send_chunk(&location, chunk(0, b"abcd")).await.unwrap_err();
        let e3 = sink.send_chunk(&location, chunk(0, b"abcd")).await.unwrap_err();
        assert!(e1.is_transient());
        assert!(e2.is_transient());
        assert!(!e3.is_transient());
    }

    #[tokio::test]
    async fn unreachable_server_is_transient() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let sink = TusSink::new(&format!("http://{addr}/files/")).unwrap();
        let err = sink.create(1, &TransferMetadata::new()).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn engine_over_tus_survives_server_errors() {
        use crate::{
            ChunkedTransferEngine, Fingerprint, MediaFile, MemoryResumeStore, RetrySchedule,
            TransferEngine, TransferEvent, TransferRequest,
        };

        let (addr, server) = spawn_server().await;
        server.lock().unwrap().fail_patches = vec![500, 502];
        let endpoint = format!("http://{addr}/files/");

        let sink = Arc::new(TusSink::new(&endpoint).unwrap());
        let store = Arc::new(MemoryResumeStore::new());
        let engine = ChunkedTransferEngine::new(sink, store.clone())
            .with_retry_schedule(RetrySchedule::from_millis(&[0, 0, 0]))
            .with_chunk_size(4);

        let file = MediaFile::from_bytes("clip.mp4", "video/mp4", b"0123456789".to_vec());
        let fingerprint = Fingerprint::derive(&file, &endpoint).unwrap();
        let mut handle = engine.start(TransferRequest {
            file,
            fingerprint,
            metadata: TransferMetadata::new(),
            resume: None,
        });

        let mut last = None;
        while let Some(ev) = handle.recv().await {
            last = Some(ev);
        }
        assert!(matches!(last, Some(TransferEvent::Succeeded)));
        assert_eq!(server.lock().unwrap().uploads["/files/0"].1, b"0123456789");
        assert!(store.is_empty());
    }
}
