use crux_core::capability::{Capability, CapabilityContext, Operation};
use serde::{Deserialize, Serialize};

/// Fire-and-forget analytics forwarded to the shell. Nothing here may carry
/// tokens, coordinates at full precision, or other user-identifying payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TelemetryOperation {
    Counter { name: String, value: u64 },
    Gauge { name: String, value: f64 },
    Event { name: String, attributes: Vec<(String, String)> },
    Warn { name: String, message: String },
    Error { name: String, message: String },
}

impl Operation for TelemetryOperation {
    type Output = ();
}

pub struct Telemetry<Ev> {
    context: CapabilityContext<TelemetryOperation, Ev>,
}

impl<Ev> Capability<Ev> for Telemetry<Ev> {
    type Operation = TelemetryOperation;
    type MappedSelf<MappedEv> = Telemetry<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> Ev + Send + Sync + 'static,
        Ev: 'static,
        NewEv: 'static,
    {
        Telemetry::new(self.context.map_event(f))
    }
}

impl<Ev> Telemetry<Ev>
where
    Ev: 'static,
{
    pub fn new(context: CapabilityContext<TelemetryOperation, Ev>) -> Self {
        Self { context }
    }

    pub fn counter(&self, name: &str, value: u64) {
        self.emit(TelemetryOperation::Counter {
            name: name.to_string(),
            value,
        });
    }

    pub fn gauge(&self, name: &str, value: f64) {
        self.emit(TelemetryOperation::Gauge {
            name: name.to_string(),
            value,
        });
    }

    pub fn event(&self, name: &str, attributes: &[(&str, &str)]) {
        self.emit(TelemetryOperation::Event {
            name: name.to_string(),
            attributes: attributes
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        });
    }

    pub fn warn(&self, name: &str, message: &str) {
        self.emit(TelemetryOperation::Warn {
            name: name.to_string(),
            message: message.to_string(),
        });
    }

    pub fn error(&self, name: &str, message: &str) {
        self.emit(TelemetryOperation::Error {
            name: name.to_string(),
            message: message.to_string(),
        });
    }

    fn emit(&self, operation: TelemetryOperation) {
        let context = self.context.clone();
        self.context.spawn(async move {
            context.notify_shell(operation).await;
        });
    }
}
