//! TrackerPipeline for combining an observation source with tracking.

use thiserror::Error;

use crate::error::TrackerError;
use crate::tracker::{MultiObjectTracker, TrackSnapshot, TrackerConfig};

use super::ObservationSource;

/// Failure of either half of a [`TrackerPipeline`].
#[derive(Debug, Error)]
pub enum PipelineError<E: std::error::Error + 'static> {
    #[error("observation source failed")]
    Source(#[source] E),
    #[error(transparent)]
    Tracker(#[from] TrackerError),
}

/// A combined tracker that bundles an observation source with the
/// `MultiObjectTracker`.
pub struct TrackerPipeline<S: ObservationSource> {
    source: S,
    tracker: MultiObjectTracker,
}

impl<S: ObservationSource> TrackerPipeline<S> {
    /// Create a new tracking pipeline with the given source and tracker config.
    pub fn new(source: S, config: TrackerConfig) -> Result<Self, TrackerError> {
        Ok(Self {
            source,
            tracker: MultiObjectTracker::new(config)?,
        })
    }

    /// Create a new tracking pipeline with default tracker configuration.
    pub fn with_default_config(source: S) -> Result<Self, TrackerError> {
        Self::new(source, TrackerConfig::default())
    }

    /// Pull one frame from the source and update the tracker.
    ///
    /// Returns `Ok(None)` once the source is exhausted.
    pub fn process_frame(&mut self) -> Result<Option<Vec<TrackSnapshot>>, PipelineError<S::Error>> {
        let Some(frame) = self.source.next_frame().map_err(PipelineError::Source)? else {
            return Ok(None);
        };
        let snapshot = self.tracker.update(&frame.observations, frame.dt)?;
        Ok(Some(snapshot))
    }

    /// Drain the source, handing every snapshot to `sink`. Returns the number
    /// of frames processed.
    pub fn run<F>(&mut self, mut sink: F) -> Result<u64, PipelineError<S::Error>>
    where
        F: FnMut(u64, &[TrackSnapshot]),
    {
        let mut frames = 0;
        while let Some(snapshot) = self.process_frame()? {
            frames += 1;
            sink(self.tracker.frame_count(), &snapshot);
        }
        Ok(frames)
    }

    /// Get a reference to the underlying source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Get a mutable reference to the underlying source.
    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// Get a reference to the underlying tracker.
    pub fn tracker(&self) -> &MultiObjectTracker {
        &self.tracker
    }

    /// Get a mutable reference to the underlying tracker.
    pub fn tracker_mut(&mut self) -> &mut MultiObjectTracker {
        &mut self.tracker
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integration::Frame;
    use crate::tracker::Observation;

    struct MockSource {
        frames: std::vec::IntoIter<Frame>,
    }

    impl ObservationSource for MockSource {
        type Error = std::io::Error;

        fn next_frame(&mut self) -> Result<Option<Frame>, Self::Error> {
            Ok(self.frames.next())
        }
    }

    struct FailingSource;

    impl ObservationSource for FailingSource {
        type Error = std::io::Error;

        fn next_frame(&mut self) -> Result<Option<Frame>, Self::Error> {
            Err(std::io::Error::other("sensor offline"))
        }
    }

    #[test]
    fn test_tracker_pipeline() {
        let frames = (0..3)
            .map(|i| Frame::new(vec![Observation::new(i as f64 * 0.1, 0.0)], 0.1))
            .collect::<Vec<_>>();
        let source = MockSource {
            frames: frames.into_iter(),
        };

        let mut pipeline = TrackerPipeline::with_default_config(source).unwrap();
        let mut seen = Vec::new();
        let processed = pipeline
            .run(|frame, tracks| seen.push((frame, tracks.len())))
            .unwrap();

        assert_eq!(processed, 3);
        assert_eq!(seen, vec![(1, 1), (2, 1), (3, 1)]);
        assert_eq!(pipeline.tracker().len(), 1);
        assert!(pipeline.process_frame().unwrap().is_none());
    }

    #[test]
    fn test_source_error_is_propagated() {
        let mut pipeline = TrackerPipeline::with_default_config(FailingSource).unwrap();
        assert!(matches!(
            pipeline.process_frame(),
            Err(PipelineError::Source(_))
        ));
    }

    #[test]
    fn test_tracker_error_is_propagated() {
        let source = MockSource {
            frames: vec![Frame::new(Vec::<Observation>::new(), f64::NAN)].into_iter(),
        };
        let mut pipeline = TrackerPipeline::with_default_config(source).unwrap();
        assert!(matches!(
            pipeline.process_frame(),
            Err(PipelineError::Tracker(TrackerError::InvalidTimeStep(_)))
        ));
    }
}
