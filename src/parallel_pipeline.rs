// THEORY:
// The `parallel_pipeline` splits the engine along its one natural seam. Light
// segmentation is a pure function of a single frame, so it fans out across a
// pool of workers. Tracking and classification mutate one shared track table
// whose meaning depends on capture order, so they stay on a single consumer.
//
// Data flow:
//
//   FrameSource --frame_id--> dispatcher --round robin--> workers (segment)
//                                                            |
//   reports <-- TrackingStage <-- reorder buffer <--results--+
//
// Workers finish out of order. Their results are parked in `pending_frames`
// until `next_expected_frame` arrives, and only then handed to the tracker, so
// the track table sees exactly the sequence the sequential pipeline would.

use crate::config::PipelineConfig;
use crate::core_modules::classifier::{Classifier, ClassifierModel};
use crate::core_modules::detection::Detection;
use crate::core_modules::light_segmenter::LightSegmenter;
use crate::error::VisionError;
use crate::pipeline::{FrameReport, PipelineStats, TrackingStage};
use crate::source::FrameSource;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Outstanding frames allowed per worker before the source is paused.
const FRAMES_PER_WORKER: usize = 2;

/// A frame on its way to a segmentation worker.
#[derive(Debug, Clone)]
struct FrameBuffer {
    data: Vec<u8>,
    frame_id: u64,
    timestamp: Instant,
}

/// What came back from a worker, or a frame the source could not deliver.
#[derive(Debug)]
struct SegmentedFrame {
    frame_id: u64,
    timestamp: Instant,
    detections: Result<Vec<Detection>, VisionError>,
}

/// Fan-out of segmentation work: one dispatcher, `size` workers, one result channel.
struct WorkerPool {
    task_sender: mpsc::UnboundedSender<FrameBuffer>,
    workers: Vec<tokio::task::JoinHandle<()>>,
    dispatcher: tokio::task::JoinHandle<()>,
}

impl WorkerPool {
    fn new(
        segmenter: Arc<LightSegmenter>,
        size: usize,
    ) -> (Self, mpsc::UnboundedReceiver<SegmentedFrame>) {
        let size = size.max(1);
        let (task_sender, mut task_receiver) = mpsc::unbounded_channel::<FrameBuffer>();
        let (result_sender, result_receiver) = mpsc::unbounded_channel::<SegmentedFrame>();

        let (worker_senders, worker_receivers): (Vec<_>, Vec<_>) = (0..size)
            .map(|_| mpsc::unbounded_channel::<FrameBuffer>())
            .unzip();

        let dispatcher = tokio::spawn(async move {
            let mut worker_idx = 0;
            while let Some(frame) = task_receiver.recv().await {
                if worker_senders[worker_idx].send(frame).is_err() {
                    warn!(worker = worker_idx, "segmentation worker gone");
                }
                worker_idx = (worker_idx + 1) % size;
            }
        });

        let mut workers = Vec::with_capacity(size);
        for (worker_idx, mut worker_receiver) in worker_receivers.into_iter().enumerate() {
            let segmenter = Arc::clone(&segmenter);
            let result_sender = result_sender.clone();
            let worker = tokio::spawn(async move {
                while let Some(frame) = worker_receiver.recv().await {
                    let FrameBuffer {
                        data,
                        frame_id,
                        timestamp,
                    } = frame;
                    let segmenter = Arc::clone(&segmenter);
                    let detections =
                        match tokio::task::spawn_blocking(move || segmenter.segment(&data)).await {
                            Ok(result) => result.map_err(VisionError::from),
                            Err(err) => Err(VisionError::Worker(err.to_string())),
                        };
                    debug!(worker = worker_idx, frame_id, "segmented");
                    let segmented = SegmentedFrame {
                        frame_id,
                        timestamp,
                        detections,
                    };
                    if result_sender.send(segmented).is_err() {
                        break;
                    }
                }
            });
            workers.push(worker);
        }

        (
            Self {
                task_sender,
                workers,
                dispatcher,
            },
            result_receiver,
        )
    }

    fn submit(&self, frame: FrameBuffer) -> Result<(), VisionError> {
        self.task_sender
            .send(frame)
            .map_err(|_| VisionError::PipelineClosed)
    }

    /// Closes the task channel and waits for every worker to drain.
    async fn shutdown(self) {
        drop(self.task_sender);
        let _ = self.dispatcher.await;
        for result in futures::future::join_all(self.workers).await {
            if let Err(err) = result {
                warn!(error = %err, "segmentation worker ended abnormally");
            }
        }
    }
}

/// Concurrent pipeline: parallel segmentation, single-writer tracking.
pub struct ParallelPipeline {
    config: PipelineConfig,
    segmenter: Arc<LightSegmenter>,
    stage: TrackingStage,
    worker_count: usize,
    max_in_flight: usize,
}

impl ParallelPipeline {
    /// Validates `config`. One worker per CPU.
    pub fn new(config: PipelineConfig) -> Result<Self, VisionError> {
        config.validate()?;
        let classifier = Classifier::from_config(config.classifier.clone());
        Ok(Self::assemble(config, classifier))
    }

    pub fn with_model(
        config: PipelineConfig,
        model: Box<dyn ClassifierModel>,
    ) -> Result<Self, VisionError> {
        config.validate()?;
        let classifier = Classifier::with_model(model, config.classifier.clone());
        Ok(Self::assemble(config, classifier))
    }

    fn assemble(config: PipelineConfig, classifier: Classifier) -> Self {
        let worker_count = num_cpus::get().max(1);
        Self {
            segmenter: Arc::new(LightSegmenter::new(
                config.image_width,
                config.image_height,
                config.detection.clone(),
            )),
            stage: TrackingStage::new(&config, classifier),
            config,
            worker_count,
            max_in_flight: worker_count * FRAMES_PER_WORKER,
        }
    }

    pub fn with_workers(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count.max(1);
        self
    }

    /// Upper bound on frames pulled from the source but not yet tracked.
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Pulls frames from `source` until it ends or `cancel` turns true, sending one
    /// `FrameReport` per processed frame, in capture order, to `reports`.
    ///
    /// On cancellation no new frames are read; frames already dispatched are
    /// finished and reported. The track table is discarded when the run ends.
    pub async fn run<S: FrameSource>(
        mut self,
        source: &mut S,
        mut cancel: watch::Receiver<bool>,
        reports: mpsc::Sender<FrameReport>,
    ) -> Result<PipelineStats, VisionError> {
        if let Some(rate) = source.frame_rate() {
            self.stage.set_frame_rate(rate);
        }
        info!(
            workers = self.worker_count,
            max_in_flight = self.max_in_flight,
            strategy = self.stage.classifier().strategy_name(),
            "parallel pipeline started"
        );

        let started = Instant::now();
        let (pool, mut results) = WorkerPool::new(Arc::clone(&self.segmenter), self.worker_count);
        let mut pending_frames: HashMap<u64, SegmentedFrame> = HashMap::new();
        let mut next_expected_frame = 0u64;
        let mut next_frame_id = 0u64;
        let mut in_flight = 0usize;
        let mut stats = PipelineStats::default();

        let mut source_done = false;
        let mut cancelled = *cancel.borrow();
        let mut cancel_open = true;
        let mut reports_open = true;

        loop {
            if (source_done || cancelled) && in_flight == 0 {
                break;
            }

            tokio::select! {
                biased;

                changed = cancel.changed(), if cancel_open && !cancelled => {
                    match changed {
                        Ok(()) => {
                            if *cancel.borrow_and_update() {
                                cancelled = true;
                                info!(in_flight, "cancellation requested, draining");
                            }
                        }
                        Err(_) => cancel_open = false,
                    }
                }

                segmented = results.recv(), if in_flight > 0 => {
                    let Some(segmented) = segmented else {
                        return Err(VisionError::PipelineClosed);
                    };
                    in_flight -= 1;
                    pending_frames.insert(segmented.frame_id, segmented);
                }

                frame = source.next_frame(), if !source_done && !cancelled && in_flight < self.max_in_flight => {
                    match frame {
                        None => source_done = true,
                        Some(frame) => {
                            let frame_id = next_frame_id;
                            next_frame_id += 1;
                            stats.frames_received += 1;
                            let timestamp = Instant::now();
                            match frame {
                                Ok(data) => {
                                    pool.submit(FrameBuffer { data, frame_id, timestamp })?;
                                    in_flight += 1;
                                }
                                Err(err) => {
                                    pending_frames.insert(
                                        frame_id,
                                        SegmentedFrame { frame_id, timestamp, detections: Err(err) },
                                    );
                                }
                            }
                        }
                    }
                }
            }

            // Apply every frame that is now next in capture order.
            while let Some(segmented) = pending_frames.remove(&next_expected_frame) {
                next_expected_frame += 1;
                match segmented.detections {
                    Ok(detections) => {
                        let report = self.stage.advance(detections, segmented.frame_id);
                        stats.frames_processed += 1;
                        debug!(
                            frame_id = segmented.frame_id,
                            latency_us = segmented.timestamp.elapsed().as_micros() as u64,
                            "frame tracked"
                        );
                        if reports_open && reports.send(report).await.is_err() {
                            warn!("report receiver dropped, reports are discarded from now on");
                            reports_open = false;
                        }
                    }
                    Err(err) => {
                        stats.frames_skipped += 1;
                        warn!(frame_id = segmented.frame_id, error = %err, "skipping frame");
                    }
                }
            }
        }

        pool.shutdown().await;

        let counters = self.stage.tracker().counters();
        let stats = PipelineStats {
            tracks_created: counters.created,
            tracks_evicted: counters.evicted,
            elapsed: started.elapsed(),
            ..stats
        };
        self.stage.reset();
        stats.log_summary("parallel");
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::classifier::Label;
    use crate::pipeline::VisionPipeline;
    use std::collections::VecDeque;

    const WIDTH: u32 = 64;
    const HEIGHT: u32 = 48;

    struct VecSource {
        frames: VecDeque<Result<Vec<u8>, VisionError>>,
        frame_rate: Option<f64>,
        /// Flips the cancel flag once this many frames have been handed out.
        cancel_after: Option<(usize, watch::Sender<bool>)>,
        served: usize,
    }

    impl VecSource {
        fn new(frames: Vec<Vec<u8>>) -> Self {
            Self {
                frames: frames.into_iter().map(Ok).collect(),
                frame_rate: Some(10.0),
                cancel_after: None,
                served: 0,
            }
        }
    }

    impl FrameSource for VecSource {
        async fn next_frame(&mut self) -> Option<Result<Vec<u8>, VisionError>> {
            let frame = self.frames.pop_front()?;
            self.served += 1;
            if let Some((limit, sender)) = &self.cancel_after {
                if self.served >= *limit {
                    let _ = sender.send(true);
                }
            }
            Some(frame)
        }

        fn frame_rate(&self) -> Option<f64> {
            self.frame_rate
        }
    }

    fn config() -> PipelineConfig {
        PipelineConfig::for_frame_size(WIDTH, HEIGHT)
    }

    fn frame(lit: bool) -> Vec<u8> {
        let mut frame = vec![0u8; (WIDTH * HEIGHT * 4) as usize];
        if lit {
            for row in 16..28 {
                for col in 20..32 {
                    let i = ((row * WIDTH + col) * 4) as usize;
                    frame[i..i + 4].copy_from_slice(&[235, 235, 235, 255]);
                }
            }
        }
        frame
    }

    fn blinking_frames(count: usize) -> Vec<Vec<u8>> {
        (0..count).map(|i| frame(i % 10 < 5)).collect()
    }

    async fn collect(mut receiver: mpsc::Receiver<FrameReport>) -> Vec<FrameReport> {
        let mut reports = Vec::new();
        while let Some(report) = receiver.recv().await {
            reports.push(report);
        }
        reports
    }

    #[tokio::test]
    async fn reports_arrive_in_capture_order_and_match_sequential() {
        let frames = blinking_frames(40);
        let mut source = VecSource::new(frames.clone());
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let (report_tx, report_rx) = mpsc::channel(8);
        let collector = tokio::spawn(collect(report_rx));

        let pipeline = ParallelPipeline::new(config())
            .expect("pipeline")
            .with_workers(4);
        let stats = pipeline
            .run(&mut source, cancel_rx, report_tx)
            .await
            .expect("run");
        let reports = collector.await.expect("collector");

        assert_eq!(stats.frames_processed, 40);
        assert_eq!(reports.len(), 40);
        for (expected, report) in reports.iter().enumerate() {
            assert_eq!(report.frame_index, expected as u64);
        }

        let mut sequential_config = config();
        sequential_config.frame_rate = 10.0;
        let mut sequential = VisionPipeline::new(sequential_config).expect("pipeline");
        for (frame, parallel) in frames.iter().zip(&reports) {
            let report = sequential.process_frame(frame).expect("frame");
            assert_eq!(&report, parallel);
        }
        assert_eq!(reports[39].lights[0].label, Label::Blinking);
    }

    #[tokio::test]
    async fn cancellation_drains_dispatched_frames_only() {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let mut source = VecSource::new(blinking_frames(40));
        source.cancel_after = Some((6, cancel_tx));
        let (report_tx, report_rx) = mpsc::channel(64);
        let collector = tokio::spawn(collect(report_rx));

        let stats = ParallelPipeline::new(config())
            .expect("pipeline")
            .with_workers(2)
            .with_max_in_flight(2)
            .run(&mut source, cancel_rx, report_tx)
            .await
            .expect("run");
        let reports = collector.await.expect("collector");

        assert!(stats.frames_received >= 6 && stats.frames_received < 40);
        assert_eq!(stats.frames_processed, stats.frames_received);
        assert_eq!(reports.len() as u64, stats.frames_processed);
        for (expected, report) in reports.iter().enumerate() {
            assert_eq!(report.frame_index, expected as u64);
        }
    }

    #[tokio::test]
    async fn already_cancelled_run_reads_nothing() {
        let (_cancel_tx, cancel_rx) = watch::channel(true);
        let mut source = VecSource::new(blinking_frames(10));
        let (report_tx, _report_rx) = mpsc::channel(16);
        let stats = ParallelPipeline::new(config())
            .expect("pipeline")
            .run(&mut source, cancel_rx, report_tx)
            .await
            .expect("run");
        assert_eq!(stats.frames_received, 0);
        assert_eq!(source.frames.len(), 10);
    }

    #[tokio::test]
    async fn bad_frames_are_skipped_without_breaking_order() {
        let mut source = VecSource::new(vec![frame(true), vec![0u8; 12], frame(true)]);
        source
            .frames
            .insert(2, Err(VisionError::Source("unreadable".into())));
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let (report_tx, report_rx) = mpsc::channel(16);
        let collector = tokio::spawn(collect(report_rx));

        let stats = ParallelPipeline::new(config())
            .expect("pipeline")
            .with_workers(3)
            .run(&mut source, cancel_rx, report_tx)
            .await
            .expect("run");
        let reports = collector.await.expect("collector");

        assert_eq!(stats.frames_received, 4);
        assert_eq!(stats.frames_skipped, 2);
        let indices: Vec<u64> = reports.iter().map(|r| r.frame_index).collect();
        assert_eq!(indices, vec![0, 3]);
        assert_eq!(reports[1].lights.len(), 1);
        assert_eq!(stats.tracks_created, 1);
    }
}
