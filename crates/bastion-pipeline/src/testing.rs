//! Configurable interceptor for pipeline tests.

use std::sync::{Arc, Mutex};

use bastion_types::{Request, Response};

use crate::error::InterceptorError;
use crate::interceptor::Interceptor;
use crate::point::InterceptPoint;

/// Shared record of which recorders handled a request.
#[derive(Debug, Clone, Default)]
pub(crate) struct Log(Arc<Mutex<Vec<String>>>);

impl Log {
    pub(crate) fn push(&self, entry: &str) {
        self.0.lock().expect("log lock").push(entry.to_string());
    }

    pub(crate) fn entries(&self) -> Vec<String> {
        self.0.lock().expect("log lock").clone()
    }
}

#[derive(Debug, Clone, Copy)]
enum Behavior {
    Pass,
    Decline,
    Fail(u16),
    Error,
    Panic,
}

#[derive(Debug, Clone)]
pub(crate) struct Recorder {
    name: String,
    point: InterceptPoint,
    priority: i32,
    behavior: Behavior,
    log: Log,
}

impl Recorder {
    pub(crate) fn new(name: &str, point: InterceptPoint) -> Self {
        Self {
            name: name.to_string(),
            point,
            priority: 0,
            behavior: Behavior::Pass,
            log: Log::default(),
        }
    }

    /// Recorders at `BeforeHandler` sharing one log.
    pub(crate) fn family(specs: &[(&str, i32)]) -> (Log, Vec<Recorder>) {
        let log = Log::default();
        let recorders = specs
            .iter()
            .map(|(name, priority)| {
                Recorder::new(name, InterceptPoint::BeforeHandler)
                    .with_priority(*priority)
                    .with_log(log.clone())
            })
            .collect();
        (log, recorders)
    }

    pub(crate) fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub(crate) fn with_log(mut self, log: Log) -> Self {
        self.log = log;
        self
    }

    pub(crate) fn declining(mut self) -> Self {
        self.behavior = Behavior::Decline;
        self
    }

    pub(crate) fn failing_with(mut self, status: u16) -> Self {
        self.behavior = Behavior::Fail(status);
        self
    }

    pub(crate) fn erroring(mut self) -> Self {
        self.behavior = Behavior::Error;
        self
    }

    pub(crate) fn panicking(mut self) -> Self {
        self.behavior = Behavior::Panic;
        self
    }
}

impl Interceptor for Recorder {
    fn name(&self) -> &str {
        &self.name
    }

    fn intercept_point(&self) -> InterceptPoint {
        self.point
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn resolve(&self, _request: &Request) -> bool {
        !matches!(self.behavior, Behavior::Decline)
    }

    fn handle(
        &self,
        _request: &mut Request,
        response: &mut Response,
    ) -> Result<(), InterceptorError> {
        self.log.push(&self.name);
        match self.behavior {
            Behavior::Pass | Behavior::Decline => Ok(()),
            Behavior::Fail(status) => {
                response.set_error(status, "refused by recorder");
                Ok(())
            }
            Behavior::Error => Err(InterceptorError::fault("recorder error")),
            Behavior::Panic => panic!("recorder panic"),
        }
    }
}
