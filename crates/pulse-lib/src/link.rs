//! Pub/sub collaborators: fire-and-forget telemetry and the request/response
//! readiness analysis service.

use crate::{error::LinkError, metrics::hrv::finalize};
use chrono::Local;
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub trait TelemetryPublisher {
    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), LinkError>;
}

pub trait AnalysisTransport {
    fn send(&mut self, topic: &str, payload: &[u8]) -> Result<(), LinkError>;
    /// Raw payloads arriving on the response topic.
    fn responses(&self) -> &Receiver<Vec<u8>>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSpec {
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Vec<u32>,
    pub analysis: AnalysisSpec,
}

impl AnalysisRequest {
    pub fn readiness(id: u64, intervals_ms: &[u32]) -> Self {
        Self {
            id,
            kind: "RRI".into(),
            data: intervals_ms.to_vec(),
            analysis: AnalysisSpec {
                kind: "readiness".into(),
            },
        }
    }
}

/// Indices returned by the analysis service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub stress_index: f64,
    pub readiness: f64,
    pub mean_hr_bpm: f64,
    pub rmssd_ms: f64,
    pub pns_index: f64,
    pub sns_index: f64,
    #[serde(default)]
    pub create_timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisData {
    pub analysis: AnalysisResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResponse {
    pub id: u64,
    pub data: AnalysisData,
}

/// Request/response correlation on top of an [`AnalysisTransport`].
pub struct AnalysisClient {
    transport: Box<dyn AnalysisTransport>,
    request_topic: String,
    next_id: u64,
}

impl AnalysisClient {
    pub fn new(transport: Box<dyn AnalysisTransport>, request_topic: impl Into<String>) -> Self {
        Self {
            transport,
            request_topic: request_topic.into(),
            next_id: 1,
        }
    }

    /// Send the intervals and wait for the matching response. Responses for
    /// other ids and unparsable payloads are skipped until the deadline.
    pub fn request(
        &mut self,
        intervals_ms: &[u32],
        timeout: Duration,
    ) -> Result<AnalysisResult, LinkError> {
        let id = self.next_id;
        self.next_id += 1;
        let payload = serde_json::to_vec(&AnalysisRequest::readiness(id, intervals_ms))?;
        self.transport.send(&self.request_topic, &payload)?;
        debug!("analysis request {id} sent with {} intervals", intervals_ms.len());

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(LinkError::Timeout(timeout.as_millis() as u64));
            }
            let bytes = match self.transport.responses().recv_timeout(remaining) {
                Ok(bytes) => bytes,
                Err(RecvTimeoutError::Timeout) => {
                    return Err(LinkError::Timeout(timeout.as_millis() as u64))
                }
                Err(RecvTimeoutError::Disconnected) => return Err(LinkError::Disconnected),
            };
            match serde_json::from_slice::<AnalysisResponse>(&bytes) {
                Ok(response) if response.id == id => return Ok(response.data.analysis),
                Ok(response) => debug!("skipping response for request {}", response.id),
                Err(err) => warn!("skipping malformed analysis response: {err}"),
            }
        }
    }
}

type Subscribers = HashMap<String, Vec<Sender<Vec<u8>>>>;

/// In-process topic broker. Clones share the same subscriptions.
#[derive(Clone, Default)]
pub struct LoopbackBroker {
    topics: Arc<Mutex<Subscribers>>,
}

impl LoopbackBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn topics(&self) -> MutexGuard<'_, Subscribers> {
        match self.topics.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn subscribe(&self, topic: &str) -> Receiver<Vec<u8>> {
        let (tx, rx) = unbounded();
        self.topics().entry(topic.to_string()).or_default().push(tx);
        rx
    }

    /// Deliver to every live subscriber of `topic`; returns how many got it.
    pub fn publish(&self, topic: &str, payload: &[u8]) -> usize {
        let mut topics = self.topics();
        let Some(subscribers) = topics.get_mut(topic) else {
            return 0;
        };
        subscribers.retain(|tx| tx.send(payload.to_vec()).is_ok());
        subscribers.len()
    }

    /// A client that publishes through this broker and listens on `response_topic`.
    pub fn client(&self, response_topic: &str) -> LoopbackClient {
        LoopbackClient {
            broker: self.clone(),
            responses: self.subscribe(response_topic),
        }
    }
}

pub struct LoopbackClient {
    broker: LoopbackBroker,
    responses: Receiver<Vec<u8>>,
}

impl TelemetryPublisher for LoopbackClient {
    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), LinkError> {
        self.broker.publish(topic, payload);
        Ok(())
    }
}

impl AnalysisTransport for LoopbackClient {
    fn send(&mut self, topic: &str, payload: &[u8]) -> Result<(), LinkError> {
        self.broker.publish(topic, payload);
        Ok(())
    }

    fn responses(&self) -> &Receiver<Vec<u8>> {
        &self.responses
    }
}

/// Offline stand-in for the readiness service. Answers every request on the
/// broker with indices derived from the time-domain HRV of its intervals.
pub struct LoopbackAnalyzer {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl LoopbackAnalyzer {
    pub fn spawn(broker: &LoopbackBroker, request_topic: &str, response_topic: &str) -> Self {
        let requests = broker.subscribe(request_topic);
        let broker = broker.clone();
        let response_topic = response_topic.to_string();
        let (stop_tx, stop_rx) = bounded(1);
        let handle = thread::spawn(move || loop {
            if stop_rx.try_recv().is_ok() {
                break;
            }
            match requests.recv_timeout(Duration::from_millis(20)) {
                Ok(raw) => answer(&broker, &response_topic, &raw),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        });
        Self {
            stop_tx,
            handle: Some(handle),
        }
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.stop_tx.try_send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for LoopbackAnalyzer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Rough readiness indices from RMSSD and mean HR; not the remote model.
pub fn estimate_readiness(intervals_ms: &[u32]) -> AnalysisResult {
    let hrv = finalize(intervals_ms);
    AnalysisResult {
        stress_index: hrv.mean_hr_bpm / hrv.rmssd_ms.max(1.0),
        readiness: (hrv.rmssd_ms * 1.5).clamp(0.0, 100.0),
        mean_hr_bpm: hrv.mean_hr_bpm,
        rmssd_ms: hrv.rmssd_ms,
        pns_index: (hrv.rmssd_ms - 35.0) / 15.0,
        sns_index: (hrv.mean_hr_bpm - 70.0) / 10.0,
        create_timestamp: Local::now().to_rfc3339(),
    }
}

fn answer(broker: &LoopbackBroker, response_topic: &str, raw: &[u8]) {
    let request: AnalysisRequest = match serde_json::from_slice(raw) {
        Ok(request) => request,
        Err(err) => {
            warn!("analyzer ignoring malformed request: {err}");
            return;
        }
    };
    let response = AnalysisResponse {
        id: request.id,
        data: AnalysisData {
            analysis: estimate_readiness(&request.data),
        },
    };
    match serde_json::to_vec(&response) {
        Ok(payload) => {
            broker.publish(response_topic, &payload);
        }
        Err(err) => warn!("analyzer failed to encode response: {err}"),
    }
}

#[derive(Serialize)]
struct TopicLine<'a> {
    topic: &'a str,
    payload: Value,
}

/// Writes one `{"topic":..,"payload":..}` JSON line per message.
pub struct JsonLinesPublisher<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesPublisher<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> TelemetryPublisher for JsonLinesPublisher<W> {
    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), LinkError> {
        let payload = serde_json::from_slice(payload)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(payload).into_owned()));
        let line = serde_json::to_string(&TopicLine { topic, payload })?;
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}
