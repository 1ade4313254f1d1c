use iggy::client::{Client, UserClient};
use iggy::clients::client::IggyClient;
use iggy::messages::send_messages::{Message, Partitioning};
use iggy::utils::duration::IggyDuration;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::str::FromStr;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::thread;
use std::time::{Duration, Instant};

/// Configuration for control loop debugging
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    /// Address of the iggy server
    pub iggy_url: String,
    /// Stream name for debugging data
    pub stream_name: String,
    /// Topic name for this loop's data
    pub topic_name: String,
    /// Unique ID for this loop instance
    pub loop_id: String,
    /// Optional sampling rate (in Hz) for debug data
    pub sample_rate_hz: Option<f64>,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            iggy_url: "127.0.0.1:8090".to_string(),
            stream_name: "powerloop_debug".to_string(),
            topic_name: "control_loops".to_string(),
            loop_id: "control_loop".to_string(),
            sample_rate_hz: None,
        }
    }
}

/// Term breakdown of one control loop computation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopSample {
    pub setpoint: f64,
    pub input: f64,
    pub error: f64,
    pub p_term: f64,
    pub i_term: f64,
    pub d_term: f64,
    pub f_term: f64,
    pub output: f64,
}

/// A sample as it goes over the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopDebugRecord {
    /// Timestamp in milliseconds since UNIX epoch
    pub timestamp: u128,
    pub loop_id: String,
    pub setpoint: f64,
    pub input: f64,
    pub error: f64,
    pub p_term: f64,
    pub i_term: f64,
    pub d_term: f64,
    pub f_term: f64,
    pub output: f64,
}

/// Ships control loop samples to iggy from a background thread.
///
/// Falls back to a JSON-lines file (`<loop_id>_debug.log`) when the server
/// cannot be reached. Recording never blocks the control cycle.
pub struct LoopDebugger {
    config: DebugConfig,
    tx: Sender<LoopDebugRecord>,
    last_sample: Option<Instant>,
    sample_interval: Option<Duration>,
}

impl LoopDebugger {
    /// Create a debugger and start its publishing thread
    pub fn new(config: DebugConfig) -> Self {
        let (tx, rx) = channel();

        let sample_interval = config
            .sample_rate_hz
            .filter(|hz| *hz > 0.0)
            .map(|hz| Duration::from_secs_f64(1.0 / hz));

        let thread_config = config.clone();
        thread::spawn(move || publish(thread_config, rx));

        Self {
            config,
            tx,
            last_sample: None,
            sample_interval,
        }
    }

    /// Queue a sample, subject to the configured sample rate
    pub fn record(&mut self, sample: LoopSample) {
        let now = Instant::now();
        if let (Some(interval), Some(last)) = (self.sample_interval, self.last_sample) {
            if now.duration_since(last) < interval {
                return;
            }
        }
        self.last_sample = Some(now);

        let record = LoopDebugRecord {
            timestamp: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|since| since.as_millis())
                .unwrap_or_default(),
            loop_id: self.config.loop_id.clone(),
            setpoint: sample.setpoint,
            input: sample.input,
            error: sample.error,
            p_term: sample.p_term,
            i_term: sample.i_term,
            d_term: sample.d_term,
            f_term: sample.f_term,
            output: sample.output,
        };

        if let Err(e) = self.tx.send(record) {
            warn!("Failed to queue debug sample: {}", e);
        }
    }
}

fn append_to_file(path: &str, json: &str) {
    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(mut file) => {
            if let Err(e) = writeln!(file, "{}", json) {
                error!("Error writing to debug log {}: {}", path, e);
            }
        }
        Err(e) => error!("Error opening debug log {}: {}", path, e),
    }
}

fn publish(config: DebugConfig, rx: Receiver<LoopDebugRecord>) {
    let log_filename = format!("{}_debug.log", config.loop_id);
    info!(
        "Debugging '{}' to iggy at {} (stream: {}, topic: {}), backup file {}",
        config.loop_id, config.iggy_url, config.stream_name, config.topic_name, log_filename
    );

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return;
        }
    };

    let connection_string = format!("iggy://iggy:iggy@{}", config.iggy_url);
    let producer = runtime.block_on(async {
        let client = IggyClient::from_connection_string(&connection_string).ok()?;
        client.connect().await.ok()?;
        client.login_user("iggy", "iggy").await.ok()?;

        let mut producer = client
            .producer(&config.stream_name, &config.topic_name)
            .ok()?
            .batch_size(1000)
            .send_interval(IggyDuration::from_str("1ms").ok()?)
            .partitioning(Partitioning::balanced())
            .build();
        producer.init().await.ok()?;
        Some(producer)
    });

    if producer.is_none() {
        warn!("Could not reach iggy, falling back to file logging only");
    }

    while let Ok(record) = rx.recv() {
        let json = match serde_json::to_string(&record) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize debug sample: {}", e);
                continue;
            }
        };
        append_to_file(&log_filename, &json);

        if let Some(producer) = &producer {
            let result = runtime.block_on(async {
                let message = Message::new(None, json.into_bytes().into(), None);
                producer.send(vec![message]).await
            });
            if let Err(e) = result {
                error!("Failed to send message to iggy: {}", e);
            }
        }
    }
}
