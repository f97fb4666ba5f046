use crux_core::capability::{Capability, CapabilityContext, Operation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Control surface for the platform location services. Continuous fixes are
/// pushed by the shell as `Event::DeviceFixReceived` while a watch is active;
/// this capability only covers permission, one-shot reads, and watch control.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LocationOperation {
    RequestPermission,
    GetCurrent,
    StartWatch,
    StopWatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawFix {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_m: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LocationOutput {
    Permission { granted: bool },
    Fix(RawFix),
    WatchStarted,
    WatchStopped,
}

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq)]
pub enum LocationError {
    #[error("location permission denied")]
    PermissionDenied,

    #[error("location unavailable: {message}")]
    Unavailable { message: String },
}

pub type LocationResult = Result<LocationOutput, LocationError>;

impl Operation for LocationOperation {
    type Output = LocationResult;
}

pub struct DeviceLocation<Ev> {
    context: CapabilityContext<LocationOperation, Ev>,
}

impl<Ev> Capability<Ev> for DeviceLocation<Ev> {
    type Operation = LocationOperation;
    type MappedSelf<MappedEv> = DeviceLocation<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> Ev + Send + Sync + 'static,
        Ev: 'static,
        NewEv: 'static,
    {
        DeviceLocation::new(self.context.map_event(f))
    }
}

impl<Ev> DeviceLocation<Ev>
where
    Ev: 'static,
{
    pub fn new(context: CapabilityContext<LocationOperation, Ev>) -> Self {
        Self { context }
    }

    pub fn request_permission<F>(&self, make_event: F)
    where
        F: FnOnce(LocationResult) -> Ev + Send + 'static,
    {
        self.run(LocationOperation::RequestPermission, make_event);
    }

    pub fn get_current<F>(&self, make_event: F)
    where
        F: FnOnce(LocationResult) -> Ev + Send + 'static,
    {
        self.run(LocationOperation::GetCurrent, make_event);
    }

    pub fn start_watch<F>(&self, make_event: F)
    where
        F: FnOnce(LocationResult) -> Ev + Send + 'static,
    {
        self.run(LocationOperation::StartWatch, make_event);
    }

    pub fn stop_watch<F>(&self, make_event: F)
    where
        F: FnOnce(LocationResult) -> Ev + Send + 'static,
    {
        self.run(LocationOperation::StopWatch, make_event);
    }

    fn run<F>(&self, operation: LocationOperation, make_event: F)
    where
        F: FnOnce(LocationResult) -> Ev + Send + 'static,
    {
        let context = self.context.clone();
        self.context.spawn(async move {
            let result = context.request_from_shell(operation).await;
            context.update_app(make_event(result));
        });
    }
}
