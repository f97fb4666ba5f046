//! Resolution of the single "effective location" from competing sources.
//!
//! Priority: a manual pick beats the device GPS, which beats the
//! server-stored profile location. The development-only fallback (feature
//! `dev-fallback`) fills the gap when nothing has resolved; production
//! builds report no location instead.
//!
//! Device fixes are debounced (bursts inside the window collapse to the
//! latest fix) and filtered (a fix within [`SIGNIFICANT_CHANGE_M`] of the
//! last refresh-triggering coordinate is dropped). While a manual pick is
//! active, device fixes are ignored outright until the user explicitly
//! reverts to "current location".

use serde::{Deserialize, Serialize};

use crate::capabilities::TimerId;
use crate::{haversine_distance, ValidatedCoordinate};

pub const DEBOUNCE_WINDOW_MS: u64 = 2_000;
pub const SIGNIFICANT_CHANGE_M: f64 = 500.0;

pub const DEV_FALLBACK_LAT: f64 = 55.6761;
pub const DEV_FALLBACK_LNG: f64 = 12.5683;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationSource {
    Manual,
    Device,
    Server,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EffectiveLocation {
    pub coordinate: ValidatedCoordinate,
    pub source: LocationSource,
}

#[derive(Debug, Clone, PartialEq)]
enum State {
    Unresolved,
    Manual {
        coordinate: ValidatedCoordinate,
        label: String,
    },
    Device {
        fix: ValidatedCoordinate,
    },
    Server {
        coordinate: ValidatedCoordinate,
    },
}

/// An accepted transition: the caller refreshes location-dependent
/// collections, and syncs the coordinates to the server profile iff
/// `sync_to_server` (set at most once per session, device fixes only).
#[derive(Debug, Clone, PartialEq)]
pub struct LocationChange {
    pub location: EffectiveLocation,
    pub sync_to_server: bool,
}

#[derive(Debug)]
pub struct LocationResolver {
    state: State,
    /// Coordinate of the last accepted transition, whatever its source —
    /// the significant-change filter compares against this.
    last_refresh_coordinate: Option<ValidatedCoordinate>,
    /// Server-stored location seen while a higher-priority source was
    /// active; the state to fall back to when that source goes away.
    remembered_server: Option<ValidatedCoordinate>,
    pending_fix: Option<ValidatedCoordinate>,
    debounce_generation: u64,
    synced_to_server: bool,
}

impl Default for LocationResolver {
    fn default() -> Self {
        Self {
            state: State::Unresolved,
            last_refresh_coordinate: None,
            remembered_server: None,
            pending_fix: None,
            debounce_generation: 0,
            synced_to_server: false,
        }
    }
}

impl LocationResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn effective(&self) -> Option<EffectiveLocation> {
        match &self.state {
            State::Manual { coordinate, .. } => Some(EffectiveLocation {
                coordinate: *coordinate,
                source: LocationSource::Manual,
            }),
            State::Device { fix } => Some(EffectiveLocation {
                coordinate: *fix,
                source: LocationSource::Device,
            }),
            State::Server { coordinate } => Some(EffectiveLocation {
                coordinate: *coordinate,
                source: LocationSource::Server,
            }),
            State::Unresolved => {
                if cfg!(feature = "dev-fallback") {
                    let coordinate = ValidatedCoordinate::new(DEV_FALLBACK_LAT, DEV_FALLBACK_LNG)
                        .expect("fallback coordinate is valid");
                    Some(EffectiveLocation {
                        coordinate,
                        source: LocationSource::Fallback,
                    })
                } else {
                    None
                }
            }
        }
    }

    pub fn has_location(&self) -> bool {
        self.effective().is_some()
    }

    pub fn is_manual(&self) -> bool {
        matches!(self.state, State::Manual { .. })
    }

    pub fn manual_label(&self) -> Option<&str> {
        match &self.state {
            State::Manual { label, .. } => Some(label.as_str()),
            _ => None,
        }
    }

    /// A device fix arrived. Returns the debounce timer to arm, or `None`
    /// while a manual pick has GPS frozen out. A fix arriving inside the
    /// window replaces the buffered one and re-arms; the stale timer is
    /// recognized by its generation and dropped on expiry.
    pub fn note_device_fix(&mut self, fix: ValidatedCoordinate) -> Option<TimerId> {
        if self.is_manual() {
            return None;
        }

        self.pending_fix = Some(fix);
        self.debounce_generation += 1;
        Some(TimerId(self.debounce_generation))
    }

    /// The debounce window closed. Stale generations and insignificant
    /// moves resolve to `None`; otherwise the buffered fix is accepted.
    pub fn debounce_elapsed(&mut self, timer: TimerId) -> Option<LocationChange> {
        if timer.0 != self.debounce_generation {
            return None;
        }

        let fix = self.pending_fix.take()?;

        if !self.is_significant(fix) {
            return None;
        }

        self.state = State::Device { fix };
        Some(self.accept(fix, LocationSource::Device))
    }

    /// The user picked a saved address. Freezes device fixes out until
    /// [`Self::use_current_location`]; always an accepted transition.
    pub fn set_manual(
        &mut self,
        coordinate: ValidatedCoordinate,
        label: impl Into<String>,
    ) -> LocationChange {
        self.state = State::Manual {
            coordinate,
            label: label.into(),
        };
        // Invalidate any in-flight debounce.
        self.pending_fix = None;
        self.debounce_generation += 1;

        self.accept(coordinate, LocationSource::Manual)
    }

    /// The user reverted to "current location". Leaves `Manual` and
    /// re-evaluates the freshest known fix against the filter; with no fix
    /// to hand the state falls back by priority (server, then unresolved)
    /// and the caller requests a live read.
    pub fn use_current_location(
        &mut self,
        live_fix: Option<ValidatedCoordinate>,
    ) -> Option<LocationChange> {
        if !self.is_manual() {
            return None;
        }

        match live_fix {
            Some(fix) => {
                self.state = State::Device { fix };
                if self.is_significant(fix) {
                    Some(self.accept(fix, LocationSource::Device))
                } else {
                    None
                }
            }
            None => {
                self.state = match self.last_server_coordinate() {
                    Some(coordinate) => State::Server { coordinate },
                    None => State::Unresolved,
                };
                None
            }
        }
    }

    /// Adopt the server-stored profile location. Lowest-priority live
    /// source: only fills in while nothing else has resolved.
    pub fn adopt_server_location(
        &mut self,
        coordinate: ValidatedCoordinate,
    ) -> Option<LocationChange> {
        self.remembered_server = Some(coordinate);

        match self.state {
            State::Unresolved => {
                self.state = State::Server { coordinate };
                Some(self.accept(coordinate, LocationSource::Server))
            }
            _ => None,
        }
    }

    /// Sign-out: account-derived sources (manual pick, server location) and
    /// the per-session write-back latch are gone; an ambient device fix is
    /// not account data and survives.
    pub fn reset_for_sign_out(&mut self) {
        self.synced_to_server = false;
        self.last_refresh_coordinate = None;
        self.remembered_server = None;
        if !matches!(self.state, State::Device { .. }) {
            self.state = State::Unresolved;
        }
    }

    fn is_significant(&self, fix: ValidatedCoordinate) -> bool {
        match self.last_refresh_coordinate {
            Some(last) => haversine_distance(last, fix) >= SIGNIFICANT_CHANGE_M,
            None => true,
        }
    }

    fn accept(&mut self, coordinate: ValidatedCoordinate, source: LocationSource) -> LocationChange {
        self.last_refresh_coordinate = Some(coordinate);

        let sync_to_server = source == LocationSource::Device && !self.synced_to_server;
        if sync_to_server {
            self.synced_to_server = true;
        }

        LocationChange {
            location: EffectiveLocation { coordinate, source },
            sync_to_server,
        }
    }

    fn last_server_coordinate(&self) -> Option<ValidatedCoordinate> {
        self.remembered_server
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn coord(lat: f64, lng: f64) -> ValidatedCoordinate {
        ValidatedCoordinate::new(lat, lng).unwrap()
    }

    // Roughly 111 m per 0.001 degrees of latitude.
    const NEAR: f64 = 0.001; // ~111 m — below the 500 m threshold
    const FAR: f64 = 0.006; // ~667 m — above it

    #[test]
    fn starts_unresolved_without_fallback() {
        let resolver = LocationResolver::new();
        #[cfg(not(feature = "dev-fallback"))]
        assert!(!resolver.has_location());
        #[cfg(feature = "dev-fallback")]
        assert_eq!(
            resolver.effective().unwrap().source,
            LocationSource::Fallback
        );
    }

    #[test]
    fn first_fix_is_accepted_after_debounce() {
        let mut resolver = LocationResolver::new();
        let timer = resolver.note_device_fix(coord(55.0, 12.0)).unwrap();

        let change = resolver.debounce_elapsed(timer).unwrap();
        assert_eq!(change.location.source, LocationSource::Device);
        assert!(change.sync_to_server);
        assert_eq!(resolver.effective().unwrap().coordinate, coord(55.0, 12.0));
    }

    #[test]
    fn burst_within_window_collapses_to_latest() {
        let mut resolver = LocationResolver::new();
        let first = resolver.note_device_fix(coord(55.0, 12.0)).unwrap();
        let second = resolver.note_device_fix(coord(55.0 + NEAR, 12.0)).unwrap();

        // The superseded timer expires first and must be dropped.
        assert_eq!(resolver.debounce_elapsed(first), None);

        let change = resolver.debounce_elapsed(second).unwrap();
        assert_eq!(change.location.coordinate, coord(55.0 + NEAR, 12.0));

        // Exactly one accepted transition came out of the burst.
        assert_eq!(resolver.debounce_elapsed(second), None);
    }

    #[test]
    fn insignificant_move_is_filtered() {
        let mut resolver = LocationResolver::new();
        let timer = resolver.note_device_fix(coord(55.0, 12.0)).unwrap();
        resolver.debounce_elapsed(timer).unwrap();

        let timer = resolver.note_device_fix(coord(55.0 + NEAR, 12.0)).unwrap();
        assert_eq!(resolver.debounce_elapsed(timer), None);
        // Effective location still reflects the accepted fix.
        assert_eq!(resolver.effective().unwrap().coordinate, coord(55.0, 12.0));
    }

    #[test]
    fn significant_move_is_accepted_without_resync() {
        let mut resolver = LocationResolver::new();
        let timer = resolver.note_device_fix(coord(55.0, 12.0)).unwrap();
        assert!(resolver.debounce_elapsed(timer).unwrap().sync_to_server);

        let timer = resolver.note_device_fix(coord(55.0 + FAR, 12.0)).unwrap();
        let change = resolver.debounce_elapsed(timer).unwrap();
        // The server write-back happens at most once per session.
        assert!(!change.sync_to_server);
    }

    #[test]
    fn manual_pick_freezes_out_device_fixes() {
        let mut resolver = LocationResolver::new();
        let change = resolver.set_manual(coord(55.0, 12.0), "Home");
        assert_eq!(change.location.source, LocationSource::Manual);
        assert!(!change.sync_to_server);

        assert_eq!(resolver.note_device_fix(coord(56.0, 13.0)), None);
        assert_eq!(resolver.effective().unwrap().coordinate, coord(55.0, 12.0));
        assert_eq!(resolver.manual_label(), Some("Home"));
    }

    #[test]
    fn manual_pick_invalidates_inflight_debounce() {
        let mut resolver = LocationResolver::new();
        let timer = resolver.note_device_fix(coord(56.0, 13.0)).unwrap();
        resolver.set_manual(coord(55.0, 12.0), "Home");

        assert_eq!(resolver.debounce_elapsed(timer), None);
        assert_eq!(resolver.effective().unwrap().source, LocationSource::Manual);
    }

    #[test]
    fn revert_to_device_with_far_fix_refreshes() {
        let mut resolver = LocationResolver::new();
        resolver.set_manual(coord(55.0, 12.0), "Home");

        let change = resolver
            .use_current_location(Some(coord(55.0 + FAR, 12.0)))
            .unwrap();
        assert_eq!(change.location.source, LocationSource::Device);
    }

    #[test]
    fn revert_to_device_near_last_trigger_skips_refresh() {
        let mut resolver = LocationResolver::new();
        resolver.set_manual(coord(55.0, 12.0), "Home");

        let accepted = resolver.use_current_location(Some(coord(55.0 + NEAR, 12.0)));
        assert_eq!(accepted, None);
        // The state still left Manual.
        assert_eq!(resolver.effective().unwrap().source, LocationSource::Device);
    }

    #[test]
    fn revert_without_fix_falls_back_by_priority() {
        let mut resolver = LocationResolver::new();
        resolver.adopt_server_location(coord(54.0, 11.0)).unwrap();
        resolver.set_manual(coord(55.0, 12.0), "Home");

        assert_eq!(resolver.use_current_location(None), None);
        assert_eq!(resolver.effective().unwrap().source, LocationSource::Server);
    }

    #[test]
    fn server_location_only_fills_unresolved() {
        let mut resolver = LocationResolver::new();
        let change = resolver.adopt_server_location(coord(54.0, 11.0)).unwrap();
        assert_eq!(change.location.source, LocationSource::Server);

        let timer = resolver.note_device_fix(coord(55.0, 12.0)).unwrap();
        resolver.debounce_elapsed(timer).unwrap();

        // A later profile fetch must not displace the device fix.
        assert_eq!(resolver.adopt_server_location(coord(53.0, 10.0)), None);
        assert_eq!(resolver.effective().unwrap().source, LocationSource::Device);
    }

    #[test]
    fn sign_out_resets_account_sources_and_latch() {
        let mut resolver = LocationResolver::new();
        resolver.set_manual(coord(55.0, 12.0), "Home");
        resolver.reset_for_sign_out();

        #[cfg(not(feature = "dev-fallback"))]
        assert!(!resolver.has_location());

        // The next session may write back again.
        let timer = resolver.note_device_fix(coord(55.0, 12.0)).unwrap();
        assert!(resolver.debounce_elapsed(timer).unwrap().sync_to_server);
    }

    #[test]
    fn sign_out_keeps_ambient_device_fix() {
        let mut resolver = LocationResolver::new();
        let timer = resolver.note_device_fix(coord(55.0, 12.0)).unwrap();
        resolver.debounce_elapsed(timer).unwrap();

        resolver.reset_for_sign_out();
        assert_eq!(resolver.effective().unwrap().source, LocationSource::Device);
    }

    proptest! {
        #[test]
        fn device_fixes_never_escape_manual_freeze(
            lat in -80.0f64..80.0,
            lng in -170.0f64..170.0,
        ) {
            let mut resolver = LocationResolver::new();
            resolver.set_manual(coord(55.0, 12.0), "Home");

            prop_assert_eq!(resolver.note_device_fix(coord(lat, lng)), None);
            prop_assert_eq!(
                resolver.effective().unwrap().coordinate,
                coord(55.0, 12.0)
            );
        }

        #[test]
        fn filter_is_monotone_in_distance(delta in 0.0f64..0.004) {
            // Anything under ~444 m of the last trigger is never accepted.
            let mut resolver = LocationResolver::new();
            let timer = resolver.note_device_fix(coord(0.0, 0.0)).unwrap();
            resolver.debounce_elapsed(timer).unwrap();

            let timer = resolver.note_device_fix(coord(delta, 0.0)).unwrap();
            prop_assert_eq!(resolver.debounce_elapsed(timer), None);
        }
    }
}
