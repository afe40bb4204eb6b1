//! Ordered stages wired by bounded channels.
//!
//! ```text
//! input ──▶ [stage 0 workers] ──▶ [stage 1 workers] ──▶ ... ──▶ output
//! ```
//!
//! `stop` pushes one sentinel into the first stage. Every worker re-emits
//! the sentinel into its own input before exiting, so all siblings see it.
//! Once a stage's workers are joined, exactly one sentinel must remain on
//! its input; a single sentinel is then forwarded to the next stage. The
//! output therefore ends with exactly one sentinel.

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::message::Message;
use crate::processors::{CentroidProcessor, StageProcessor, WindowProcessor};
use crate::stage::{Stage, StageReport};
use crossbeam_channel::{bounded, Receiver, Sender};
use log::info;
use std::time::Duration;

struct Link {
    tx: Sender<Message>,
    rx: Receiver<Message>,
}

impl Link {
    fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity);
        Self { tx, rx }
    }
}

/// Summary returned by [`Pipeline::stop`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    /// One report per stage, in order.
    pub stages: Vec<StageReport>,
}

impl PipelineReport {
    /// Worker faults across all stages.
    #[must_use]
    pub fn faults(&self) -> usize {
        self.stages.iter().map(StageReport::faults).sum()
    }
}

/// A running or runnable multi-stage pipeline.
pub struct Pipeline {
    stages: Vec<Stage>,
    /// `links[i]` feeds stage `i`; the last link is the pipeline output.
    links: Vec<Link>,
    shutdown_timeout: Duration,
    started: bool,
}

impl Pipeline {
    /// Builds a pipeline from ordered stages.
    ///
    /// # Errors
    /// Returns [`PipelineError::NoStages`] for an empty stage list.
    pub fn new(stages: Vec<Stage>, channel_capacity: usize) -> Result<Self> {
        if stages.is_empty() {
            return Err(PipelineError::NoStages);
        }
        let links = (0..=stages.len())
            .map(|_| Link::new(channel_capacity.max(1)))
            .collect();
        Ok(Self {
            stages,
            links,
            shutdown_timeout: Duration::from_secs(10),
            started: false,
        })
    }

    /// Sets how long `stop` waits to deliver each sentinel.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Windower (one worker) followed by the centroid stage.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid.
    pub fn standard(config: &PipelineConfig) -> Result<Self> {
        config.validate()?;

        let detector = config.detector.clone();
        let window = config.window.clone();
        let inline_clock = config.inline_clock;
        let windower = Stage::new("window", 1, move || {
            let mut processor = WindowProcessor::new(detector.clone(), window.clone());
            if inline_clock {
                processor = processor.with_inline_clock();
            }
            Ok(Box::new(processor) as Box<dyn StageProcessor>)
        });

        let centroid = config.centroid.clone();
        let forward = config.forward_events;
        let centroider = Stage::new("centroid", config.centroid_workers, move || {
            let processor = CentroidProcessor::new(centroid.clone())?.with_forward_events(forward);
            Ok(Box::new(processor) as Box<dyn StageProcessor>)
        });

        Ok(Self::new(vec![windower, centroider], config.channel_capacity)?
            .with_shutdown_timeout(config.shutdown_timeout()))
    }

    /// Sender feeding the first stage.
    #[must_use]
    pub fn input(&self) -> Sender<Message> {
        self.links[0].tx.clone()
    }

    /// Receiver draining the last stage. Must be drained while running.
    #[must_use]
    pub fn output(&self) -> Receiver<Message> {
        self.links[self.stages.len()].rx.clone()
    }

    /// Stage names in order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(Stage::name).collect()
    }

    /// Launches every stage's workers.
    ///
    /// # Errors
    /// Fails if already started, if a processor cannot be built or a thread
    /// cannot be spawned.
    pub fn start(&mut self) -> Result<()> {
        if self.started {
            return Err(PipelineError::AlreadyStarted);
        }
        for (i, stage) in self.stages.iter_mut().enumerate() {
            let input = &self.links[i];
            let output = &self.links[i + 1];
            stage.start(&input.rx, &input.tx, &output.tx)?;
        }
        self.started = true;
        info!("pipeline started: {:?}", self.stage_names());
        Ok(())
    }

    /// Sends the sentinel and tears the stages down in order.
    ///
    /// # Errors
    /// Returns [`PipelineError::ShutdownProtocol`] if a stage's input holds
    /// anything but the sentinel after its workers exit, or if a sentinel
    /// cannot be delivered in time.
    pub fn stop(&mut self) -> Result<PipelineReport> {
        if !self.started {
            return Err(PipelineError::NotStarted);
        }
        self.started = false;

        self.send_sentinel(0)?;
        let mut reports = Vec::with_capacity(self.stages.len());
        for i in 0..self.stages.len() {
            let report = self.stages[i].join(&self.links[i].rx)?;
            info!(
                "stage '{}' stopped: {} messages, {} faulted workers",
                report.name,
                report.processed(),
                report.faults()
            );
            reports.push(report);
            self.send_sentinel(i + 1)?;
        }
        Ok(PipelineReport { stages: reports })
    }

    fn send_sentinel(&self, link: usize) -> Result<()> {
        self.links[link]
            .tx
            .send_timeout(Message::Sentinel, self.shutdown_timeout)
            .map_err(|_| PipelineError::ShutdownProtocol {
                stage: self
                    .stages
                    .get(link)
                    .map_or_else(|| "output".to_string(), |s| s.name().to_string()),
                detail: "sentinel could not be delivered".to_string(),
            })
    }
}
