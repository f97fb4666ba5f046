mod http;
mod location;
mod store;
mod telemetry;
mod time;

pub use self::http::{
    ApiPath, Http, HttpError, HttpHeaders, HttpMethod, HttpOperation, HttpOutput, HttpRequest,
    HttpResult, ValidatedUrl, DEFAULT_TIMEOUT_MS,
};
pub use self::location::{
    DeviceLocation, LocationError, LocationOperation, LocationOutput, LocationResult, RawFix,
};
pub use self::store::{
    Store, StoreBackend, StoreError, StoreKey, StoreOperation, StoreOutput, StoreResult,
};
pub use self::telemetry::{Telemetry, TelemetryOperation};
pub use self::time::{Time, TimeOperation, TimerElapsed, TimerId};

// We use Crux's built-in Render capability directly because it provides
// all necessary functionality for triggering view updates.
pub use crux_core::render::Render;

use crate::{App, Event};

pub type AppHttp = Http<Event>;
pub type AppStore = Store<Event>;
pub type AppTime = Time<Event>;
pub type AppLocation = DeviceLocation<Event>;
pub type AppTelemetry = Telemetry<Event>;
pub type AppRender = Render<Event>;

#[derive(crux_core::macros::Effect)]
pub struct Capabilities {
    pub render: Render<Event>,
    pub http: Http<Event>,
    pub store: Store<Event>,
    pub time: Time<Event>,
    pub location: DeviceLocation<Event>,
    pub telemetry: Telemetry<Event>,
}

impl Capabilities {
    pub fn render(&self) -> &AppRender {
        &self.render
    }

    pub fn http(&self) -> &AppHttp {
        &self.http
    }

    pub fn store(&self) -> &AppStore {
        &self.store
    }

    pub fn time(&self) -> &AppTime {
        &self.time
    }

    pub fn location(&self) -> &AppLocation {
        &self.location
    }

    pub fn telemetry(&self) -> &AppTelemetry {
        &self.telemetry
    }
}
