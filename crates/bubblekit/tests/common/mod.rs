use std::{pin::Pin, sync::Arc, time::Duration};

use anyhow::Result;
use bubblekit::{BubbleServer, Frame, FrameBody, Runtime, RuntimeConfig};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".to_string().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

/// Short windows so timeout scenarios finish in test time.
pub fn fast_config() -> RuntimeConfig {
    RuntimeConfig {
        heartbeat_interval: Duration::from_millis(100),
        first_event_timeout: Duration::from_millis(250),
        idle_timeout: Duration::from_millis(400),
        sink_buffer: 64,
    }
}

pub struct TestServer {
    pub base: String,
    pub server: BubbleServer,
    pub client: reqwest::Client,
}

pub async fn start(runtime: Runtime) -> Result<TestServer> {
    init_tracing();
    let server = BubbleServer::serve(Arc::new(runtime), "127.0.0.1:0".parse()?).await?;
    Ok(TestServer {
        base: format!("http://{}", server.config.bind),
        server,
        client: reqwest::Client::new(),
    })
}

impl TestServer {
    pub fn stream_request(&self, user_id: &str, body: serde_json::Value) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}/api/conversations/stream", self.base))
            .header("User-Id", user_id)
            .header("Content-Type", "application/json")
            .body(body.to_string())
    }

    /// Open a stream and read every frame until the server closes it.
    pub async fn stream_to_end(
        &self,
        user_id: &str,
        body: serde_json::Value,
    ) -> Result<Vec<Frame>> {
        let response = self.stream_request(user_id, body).send().await?;
        anyhow::ensure!(response.status() == reqwest::StatusCode::OK, "unexpected status");
        anyhow::ensure!(
            response
                .headers()
                .get("content-type")
                .and_then(|v| v.to_str().ok())
                == Some("application/x-ndjson"),
            "unexpected content type"
        );
        Ok(FrameReader::new(response).collect_all().await)
    }

    pub async fn cancel(&self, stream_id: &str) -> Result<serde_json::Value> {
        let response = self
            .client
            .post(format!("{}/api/streams/{stream_id}/cancel", self.base))
            .send()
            .await?;
        anyhow::ensure!(response.status() == reqwest::StatusCode::OK, "unexpected status");
        Ok(response.json().await?)
    }

    pub async fn messages(&self, user_id: &str, conversation_id: &str) -> Result<serde_json::Value> {
        let response = self
            .client
            .get(format!(
                "{}/api/conversations/{conversation_id}/messages",
                self.base
            ))
            .header("User-Id", user_id)
            .send()
            .await?;
        anyhow::ensure!(response.status() == reqwest::StatusCode::OK, "unexpected status");
        Ok(response.json().await?)
    }
}

/// Incremental NDJSON reader over a streaming response body.
pub struct FrameReader {
    stream: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
    buffer: Vec<u8>,
}

impl FrameReader {
    pub fn new(response: reqwest::Response) -> Self {
        FrameReader {
            stream: Box::pin(response.bytes_stream()),
            buffer: Vec::new(),
        }
    }

    pub async fn next_frame(&mut self) -> Option<Frame> {
        loop {
            if let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = self.buffer.drain(..=pos).collect();
                let frame = serde_json::from_slice(&line[..line.len() - 1])
                    .expect("stream lines parse as frames");
                return Some(frame);
            }
            match self.stream.next().await {
                Some(Ok(chunk)) => self.buffer.extend_from_slice(&chunk),
                Some(Err(_)) | None => return None,
            }
        }
    }

    pub async fn collect_all(mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame().await {
            frames.push(frame);
        }
        frames
    }
}

/// Compact tag for sequence assertions; bubble-level and stream-level `done`
/// are distinguished.
pub fn frame_type(frame: &Frame) -> &'static str {
    match &frame.body {
        FrameBody::Started { .. } => "started",
        FrameBody::Meta { .. } => "meta",
        FrameBody::Progress { .. } => "progress",
        FrameBody::Heartbeat => "heartbeat",
        FrameBody::Config { .. } => "config",
        FrameBody::Set { .. } => "set",
        FrameBody::Delta { .. } => "delta",
        FrameBody::Done {
            bubble_id: Some(_), ..
        } => "bubble_done",
        FrameBody::Done { .. } => "stream_done",
        FrameBody::Interrupted { .. } => "interrupted",
        FrameBody::Error { .. } => "error",
    }
}

pub fn frame_types(frames: &[Frame]) -> Vec<&'static str> {
    frames.iter().map(frame_type).collect()
}

/// Every stream must number its frames 0,1,2,… with a single stream id.
pub fn assert_contiguous(frames: &[Frame]) {
    assert!(!frames.is_empty(), "stream produced no frames");
    let stream_id = frames[0].stream_id.clone();
    for (expected, frame) in frames.iter().enumerate() {
        assert_eq!(frame.seq, expected as u64, "seq gap at {expected}");
        assert_eq!(frame.stream_id, stream_id, "stream id changed mid-stream");
    }
}

/// Exactly one terminal frame, and it is the last one.
pub fn assert_single_terminal(frames: &[Frame]) {
    let terminals = frames.iter().filter(|f| f.body.is_terminal()).count();
    assert_eq!(terminals, 1, "expected exactly one terminal frame");
    assert!(
        frames.last().is_some_and(|f| f.body.is_terminal()),
        "terminal frame must be last"
    );
}
