//! Per-request progress through the intercept points.
//!
//! ```text
//! Pending(p) ──run(p)──▶ Running(p) ──▶ Pending(next) | Terminated(p) | Completed
//! ```
//!
//! Points run in their fixed order. Points may be left out, but a point can
//! never run after a later one.

use bastion_types::{Request, Response};
use tracing::debug;

use crate::cancel::CancellationToken;
use crate::error::{PipelineError, Result};
use crate::pipeline::{Outcome, Pipeline};
use crate::point::InterceptPoint;

/// Where a request is in its traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraversalState {
    /// Waiting to run this point or a later one.
    Pending(InterceptPoint),
    /// Dispatching interceptors of this point.
    Running(InterceptPoint),
    /// Stopped at this point; nothing else runs.
    Terminated(InterceptPoint),
    /// Every point has run.
    Completed,
}

/// Drives one request through a [`Pipeline`].
#[derive(Debug)]
pub struct Traversal<'p> {
    pipeline: &'p Pipeline,
    state: TraversalState,
    cancel: CancellationToken,
    ran: usize,
    skipped: usize,
}

impl<'p> Traversal<'p> {
    pub fn new(pipeline: &'p Pipeline) -> Self {
        Self {
            pipeline,
            state: TraversalState::Pending(InterceptPoint::BeforeAuth),
            cancel: CancellationToken::new(),
            ran: 0,
            skipped: 0,
        }
    }

    /// Uses `cancel` to stop dispatching.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn state(&self) -> TraversalState {
        self.state
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self.state,
            TraversalState::Terminated(_) | TraversalState::Completed
        )
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self.state, TraversalState::Terminated(_))
    }

    /// Interceptors run so far, across points.
    pub fn ran(&self) -> usize {
        self.ran
    }

    /// Interceptors skipped so far, across points.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Runs `point`.
    ///
    /// # Errors
    ///
    /// [`PipelineError::OutOfOrder`] if a later point already ran and
    /// [`PipelineError::Finished`] once the traversal terminated or completed.
    pub fn run(
        &mut self,
        point: InterceptPoint,
        request: &mut Request,
        response: &mut Response,
    ) -> Result<Outcome> {
        let expected = match self.state {
            TraversalState::Pending(expected) => expected,
            state @ (TraversalState::Running(_)
            | TraversalState::Terminated(_)
            | TraversalState::Completed) => {
                return Err(PipelineError::Finished {
                    requested: point,
                    state,
                });
            }
        };
        if point < expected {
            return Err(PipelineError::OutOfOrder {
                requested: point,
                last: InterceptPoint::ALL[expected.index() - 1],
            });
        }

        self.state = TraversalState::Running(point);
        let outcome = self.pipeline.run_with(point, request, response, &self.cancel);
        self.ran += outcome.ran;
        self.skipped += outcome.skipped;

        self.state = if outcome.is_terminated() {
            debug!(point = %point, termination = ?outcome.termination, "Traversal terminated");
            TraversalState::Terminated(point)
        } else {
            point
                .next()
                .map_or(TraversalState::Completed, TraversalState::Pending)
        };

        Ok(outcome)
    }

    /// Runs every remaining point up to and including `last`, stopping early
    /// on termination.
    pub fn run_through(
        &mut self,
        last: InterceptPoint,
        request: &mut Request,
        response: &mut Response,
    ) -> Result<()> {
        while let TraversalState::Pending(point) = self.state {
            if point > last {
                break;
            }
            self.run(point, request, response)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Log, Recorder};
    use bastion_types::Method;

    fn pipeline(log: &Log) -> Pipeline {
        Pipeline::builder()
            .register(Recorder::new("auth", InterceptPoint::AfterAuth).with_log(log.clone()))
            .register(Recorder::new("before", InterceptPoint::BeforeHandler).with_log(log.clone()))
            .register(Recorder::new("response", InterceptPoint::Response).with_log(log.clone()))
            .build()
            .unwrap()
    }

    fn request() -> Request {
        Request::new(Method::Get, "/shop/orders")
    }

    #[test]
    fn runs_every_point_to_completion() {
        let log = Log::default();
        let pipeline = pipeline(&log);
        let mut traversal = Traversal::new(&pipeline);

        traversal
            .run_through(InterceptPoint::Response, &mut request(), &mut Response::new())
            .unwrap();

        assert_eq!(traversal.state(), TraversalState::Completed);
        assert_eq!(log.entries(), vec!["auth", "before", "response"]);
        assert_eq!(traversal.ran(), 3);
    }

    #[test]
    fn rejects_running_an_earlier_point() {
        let pipeline = pipeline(&Log::default());
        let mut traversal = Traversal::new(&pipeline);
        let (mut req, mut resp) = (request(), Response::new());

        traversal.run(InterceptPoint::BeforeHandler, &mut req, &mut resp).unwrap();
        let err = traversal
            .run(InterceptPoint::AfterAuth, &mut req, &mut resp)
            .unwrap_err();

        assert_eq!(
            err,
            PipelineError::OutOfOrder {
                requested: InterceptPoint::AfterAuth,
                last: InterceptPoint::BeforeHandler,
            }
        );
    }

    #[test]
    fn termination_stops_later_points() {
        let log = Log::default();
        let pipeline = Pipeline::builder()
            .register(
                Recorder::new("deny", InterceptPoint::AfterAuth)
                    .failing_with(403)
                    .with_log(log.clone()),
            )
            .register(Recorder::new("response", InterceptPoint::Response).with_log(log.clone()))
            .build()
            .unwrap();
        let mut traversal = Traversal::new(&pipeline);
        let (mut req, mut resp) = (request(), Response::new());

        traversal
            .run_through(InterceptPoint::Response, &mut req, &mut resp)
            .unwrap();

        assert_eq!(
            traversal.state(),
            TraversalState::Terminated(InterceptPoint::AfterAuth)
        );
        assert_eq!(log.entries(), vec!["deny"]);
        assert!(matches!(
            traversal.run(InterceptPoint::Response, &mut req, &mut resp),
            Err(PipelineError::Finished { .. })
        ));
    }

    #[test]
    fn cancellation_terminates() {
        let log = Log::default();
        let pipeline = pipeline(&log);
        let token = CancellationToken::new();
        let mut traversal = Traversal::new(&pipeline).with_cancellation(token.clone());
        let (mut req, mut resp) = (request(), Response::new());

        traversal.run(InterceptPoint::AfterAuth, &mut req, &mut resp).unwrap();
        token.cancel();
        traversal
            .run_through(InterceptPoint::Response, &mut req, &mut resp)
            .unwrap();

        assert_eq!(log.entries(), vec!["auth"]);
        assert_eq!(
            traversal.state(),
            TraversalState::Terminated(InterceptPoint::BeforeHandler)
        );
    }

    #[test]
    fn run_through_stops_at_the_requested_point() {
        let log = Log::default();
        let pipeline = pipeline(&log);
        let mut traversal = Traversal::new(&pipeline);
        let (mut req, mut resp) = (request(), Response::new());

        traversal
            .run_through(InterceptPoint::BeforeHandler, &mut req, &mut resp)
            .unwrap();
        assert_eq!(
            traversal.state(),
            TraversalState::Pending(InterceptPoint::AfterHandler)
        );

        traversal
            .run_through(InterceptPoint::Response, &mut req, &mut resp)
            .unwrap();
        assert_eq!(log.entries(), vec!["auth", "before", "response"]);
    }
}
