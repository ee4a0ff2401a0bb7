use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use interchange::errors::RegistrationError;
use interchange::registration::ControlService;
use interchange::types::RegistrationInfo;

/// A control service that:
/// - records every registration call (endpoint id per call)
/// - fails the first `fail_first` calls, then returns `info`
/// - fails every call from `fail_after` on, if set.
#[derive(Clone)]
pub struct FakeControlService {
    info: RegistrationInfo,
    fail_first: usize,
    fail_after: Option<usize>,
    calls: Arc<AtomicUsize>,
    endpoints: Arc<Mutex<Vec<String>>>,
}

impl FakeControlService {
    pub fn new(info: RegistrationInfo) -> Self {
        Self {
            info,
            fail_first: 0,
            fail_after: None,
            calls: Arc::new(AtomicUsize::new(0)),
            endpoints: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing_first(mut self, n: usize) -> Self {
        self.fail_first = n;
        self
    }

    /// Answers the first `n` calls, then fails forever.
    pub fn failing_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    /// Never succeeds.
    pub fn always_failing(info: RegistrationInfo) -> Self {
        Self::new(info).failing_first(usize::MAX)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn endpoints(&self) -> Vec<String> {
        self.endpoints.lock().unwrap().clone()
    }
}

impl ControlService for FakeControlService {
    fn register_endpoint<'a>(
        &'a self,
        endpoint_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<RegistrationInfo, RegistrationError>> + Send + 'a>>
    {
        Box::pin(async move {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.endpoints.lock().unwrap().push(endpoint_id.to_string());

            let outage = self.fail_after.is_some_and(|n| call >= n);
            if call < self.fail_first || outage {
                return Err(RegistrationError::Rejected {
                    status: 503,
                    body: format!("fake outage (call {})", call + 1),
                });
            }
            Ok(self.info.clone())
        })
    }
}
