use crux_core::capability::{Capability, CapabilityContext, Operation};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Identifies one armed timer. The debounce logic bumps a generation counter
/// every time it re-arms, so a stale expiry can be recognized and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimerId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeOperation {
    NotifyAfter { id: TimerId, millis: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerElapsed {
    pub id: TimerId,
}

impl Operation for TimeOperation {
    type Output = TimerElapsed;
}

pub struct Time<Ev> {
    context: CapabilityContext<TimeOperation, Ev>,
}

impl<Ev> Capability<Ev> for Time<Ev> {
    type Operation = TimeOperation;
    type MappedSelf<MappedEv> = Time<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> Ev + Send + Sync + 'static,
        Ev: 'static,
        NewEv: 'static,
    {
        Time::new(self.context.map_event(f))
    }
}

impl<Ev> Time<Ev>
where
    Ev: 'static,
{
    pub fn new(context: CapabilityContext<TimeOperation, Ev>) -> Self {
        Self { context }
    }

    pub fn notify_after<F>(&self, id: TimerId, duration: Duration, make_event: F)
    where
        F: FnOnce(TimerElapsed) -> Ev + Send + 'static,
    {
        let millis = duration.as_millis() as u64;
        let context = self.context.clone();
        self.context.spawn(async move {
            let elapsed = context
                .request_from_shell(TimeOperation::NotifyAfter { id, millis })
                .await;
            context.update_app(make_event(elapsed));
        });
    }
}
