//! Progress reporting: a local JSON-lines log and an optional remote
//! experiment tracker.

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// One logged record: step, epoch and named values.
#[derive(Clone, Debug, Serialize)]
pub struct LogRecord {
    pub step: usize,
    pub epoch: f64,
    pub values: Map<String, Value>,
}

impl LogRecord {
    pub fn new(step: usize, epoch: f64) -> Self {
        Self {
            step,
            epoch,
            values: Map::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.values.insert(key.to_string(), value.into());
        self
    }

    pub fn to_json(&self) -> Value {
        let mut obj = self.values.clone();
        obj.insert("step".into(), json!(self.step));
        obj.insert("epoch".into(), json!(self.epoch));
        obj.insert("timestamp".into(), json!(chrono::Local::now().to_rfc3339()));
        Value::Object(obj)
    }
}

pub trait Reporter {
    fn report(&mut self, record: &LogRecord) -> Result<()>;

    /// Run configuration, sent once before training.
    fn config(&mut self, _config: &Value) -> Result<()> {
        Ok(())
    }
}

/// Appends every record to `trainer_log.jsonl`.
pub struct JsonlReporter {
    writer: BufWriter<File>,
}

impl JsonlReporter {
    pub fn create(output_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(output_dir)?;
        let path = output_dir.join("trainer_log.jsonl");
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening {:?}", path))?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }
}

impl Reporter for JsonlReporter {
    fn report(&mut self, record: &LogRecord) -> Result<()> {
        serde_json::to_writer(&mut self.writer, &record.to_json())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

/// POSTs records as JSON to a tracking endpoint. Failures are logged and
/// never interrupt training.
pub struct HttpReporter {
    url: String,
    run_name: String,
    agent: ureq::Agent,
}

impl HttpReporter {
    pub fn new(url: &str, run_name: &str) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(Duration::from_secs(10)).build();
        Self {
            url: url.trim_end_matches('/').to_string(),
            run_name: run_name.to_string(),
            agent,
        }
    }

    fn post(&self, kind: &str, payload: Value) {
        let body = json!({ "run": self.run_name, "kind": kind, "data": payload }).to_string();
        match self
            .agent
            .post(&self.url)
            .set("Content-Type", "application/json")
            .send_string(&body)
        {
            Ok(resp) => debug!("tracker accepted {} ({})", kind, resp.status()),
            Err(e) => warn!("⚠️ Failed to report {} to {}: {}", kind, self.url, e),
        }
    }
}

impl Reporter for HttpReporter {
    fn report(&mut self, record: &LogRecord) -> Result<()> {
        self.post("log", record.to_json());
        Ok(())
    }

    fn config(&mut self, config: &Value) -> Result<()> {
        self.post("config", config.clone());
        Ok(())
    }
}

/// Fans records out to every reporter.
#[derive(Default)]
pub struct Reporters(Vec<Box<dyn Reporter>>);

impl Reporters {
    pub fn push(&mut self, reporter: Box<dyn Reporter>) {
        self.0.push(reporter);
    }

    pub fn report(&mut self, record: &LogRecord) -> Result<()> {
        self.0.iter_mut().try_for_each(|r| r.report(record))
    }

    pub fn config(&mut self, config: &Value) -> Result<()> {
        self.0.iter_mut().try_for_each(|r| r.config(config))
    }
}
