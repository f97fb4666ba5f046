#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]

pub mod capabilities;
pub mod credentials;
pub mod envelope;
pub mod location;
pub mod mutation;
pub mod sealed;

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroize;

use capabilities::{
    ApiPath, HttpMethod, HttpRequest, HttpResult, LocationOutput, LocationResult, RawFix,
    StoreBackend, StoreKey, StoreOutput, StoreResult, TimerElapsed, ValidatedUrl,
};
use credentials::{Credential, CredentialVault, LEGACY_ACCESS_KEY, LEGACY_REFRESH_KEY,
    SEALED_RECORD_KEY};
use envelope::{decode_ack, decode_envelope, decode_error_message, decode_paginated};
use location::{EffectiveLocation, LocationChange, LocationResolver, LocationSource,
    DEBOUNCE_WINDOW_MS};
use mutation::MutationLedger;
use sealed::Sealer;

pub use app::App;
pub use capabilities::{Capabilities, Effect};

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;
pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_CACHED_BAGS: usize = 500;
pub const AUTH_TIMEOUT: Duration = Duration::from_secs(30);
pub const REFRESH_TIMEOUT: Duration = Duration::from_secs(30);
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
pub const TOGGLE_TIMEOUT: Duration = Duration::from_secs(30);
pub const LOCATION_SYNC_TIMEOUT: Duration = Duration::from_secs(15);

pub const FILTER_OPTIONS_KEY: &str = "filter_options";

// --- API error taxonomy ---

#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApiError {
    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("response contained no data")]
    NoData,

    #[error("failed to decode response: {cause}")]
    Decoding { cause: String },

    #[error("server error: {message}")]
    Server { message: String },

    #[error("unauthorized")]
    Unauthorized,

    #[error("network error: {cause}")]
    Network { cause: String },
}

pub type ApiResult<T> = Result<T, ApiError>;

// --- UI-facing error surface ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorSeverity {
    Transient,
    Permanent,
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Network,
    Timeout,
    Authentication,
    Validation,
    NotFound,
    Conflict,
    Server,
    Storage,
    Deserialization,
    Crypto,
    Location,
    InvalidState,
    Internal,
    Unknown,
}

impl ErrorKind {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Network => "NETWORK_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::Authentication => "AUTH_ERROR",
            Self::Validation => "VALIDATION_ERROR",
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::Server => "SERVER_ERROR",
            Self::Storage => "STORAGE_ERROR",
            Self::Deserialization => "DESERIALIZATION_ERROR",
            Self::Crypto => "CRYPTO_ERROR",
            Self::Location => "LOCATION_ERROR",
            Self::InvalidState => "INVALID_STATE",
            Self::Internal => "INTERNAL_ERROR",
            Self::Unknown => "UNKNOWN_ERROR",
        }
    }

    #[must_use]
    pub const fn default_severity(self) -> ErrorSeverity {
        match self {
            Self::Network
            | Self::Timeout
            | Self::Conflict
            | Self::Server
            | Self::Storage
            | Self::Location => ErrorSeverity::Transient,
            Self::Deserialization | Self::Crypto | Self::Internal | Self::InvalidState => {
                ErrorSeverity::Fatal
            }
            Self::Authentication | Self::Validation | Self::NotFound | Self::Unknown => {
                ErrorSeverity::Permanent
            }
        }
    }

    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Network
                | Self::Timeout
                | Self::Conflict
                | Self::Server
                | Self::Storage
                | Self::Location
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppError {
    pub kind: ErrorKind,
    pub severity: ErrorSeverity,
    pub message: String,
    pub internal_message: Option<String>,
}

impl AppError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: kind.default_severity(),
            message: message.into(),
            internal_message: None,
        }
    }

    #[must_use]
    pub fn with_internal(mut self, internal: impl Into<String>) -> Self {
        self.internal_message = Some(internal.into());
        self
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.kind.code()
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind.is_retryable() && !matches!(self.severity, ErrorSeverity::Fatal)
    }

    #[must_use]
    pub fn user_facing_message(&self) -> String {
        match self.kind {
            ErrorKind::Network => {
                "Unable to connect. Please check your internet connection and try again.".into()
            }
            ErrorKind::Timeout => "The request timed out. Please try again.".into(),
            ErrorKind::Authentication => "Your session has expired. Please sign in again.".into(),
            ErrorKind::Validation => self.message.clone(),
            ErrorKind::NotFound => "The requested item could not be found.".into(),
            ErrorKind::Conflict => {
                "This action conflicts with a recent change. Please refresh and try again.".into()
            }
            ErrorKind::Server => {
                "The service is having trouble right now. Please try again.".into()
            }
            ErrorKind::Storage => "Unable to save data on this device.".into(),
            ErrorKind::Deserialization => {
                "A data error occurred. Please contact support if this persists.".into()
            }
            ErrorKind::Crypto => "A security error occurred. Please sign in again.".into(),
            ErrorKind::Location => {
                "Unable to determine your location. Please check your GPS settings.".into()
            }
            ErrorKind::InvalidState => "The app is in an invalid state. Please restart it.".into(),
            ErrorKind::Internal | ErrorKind::Unknown => {
                "Something went wrong. Please try again.".into()
            }
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code(), self.message)?;
        if let Some(internal) = &self.internal_message {
            write!(f, " (internal: {internal})")?;
        }
        Ok(())
    }
}

impl std::error::Error for AppError {}

impl From<ApiError> for AppError {
    fn from(e: ApiError) -> Self {
        match e {
            ApiError::InvalidRequest { reason } => {
                AppError::new(ErrorKind::InvalidState, "Malformed request").with_internal(reason)
            }
            ApiError::NoData => {
                AppError::new(ErrorKind::Deserialization, "The server returned an empty response")
            }
            ApiError::Decoding { cause } => {
                AppError::new(ErrorKind::Deserialization, "Unreadable server response")
                    .with_internal(cause)
            }
            ApiError::Server { message } => AppError::new(ErrorKind::Server, message),
            ApiError::Unauthorized => {
                AppError::new(ErrorKind::Authentication, "Session expired")
            }
            ApiError::Network { cause } => {
                AppError::new(ErrorKind::Network, "Network error").with_internal(cause)
            }
        }
    }
}

// --- Coordinates ---

#[derive(Debug, Clone, Error, PartialEq)]
pub enum CoordinateError {
    #[error("Latitude {0} is out of valid range [-90, 90]")]
    LatitudeOutOfRange(f64),
    #[error("Longitude {0} is out of valid range [-180, 180]")]
    LongitudeOutOfRange(f64),
    #[error("Coordinate value is not finite (NaN or Infinity)")]
    NonFinite,
}

impl From<CoordinateError> for AppError {
    fn from(e: CoordinateError) -> Self {
        AppError::new(ErrorKind::Validation, e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidatedCoordinate {
    lat: f64,
    lng: f64,
}

impl ValidatedCoordinate {
    pub fn new(lat: f64, lng: f64) -> Result<Self, CoordinateError> {
        if !lat.is_finite() || !lng.is_finite() {
            return Err(CoordinateError::NonFinite);
        }
        if !(-90.0..=90.0).contains(&lat) {
            return Err(CoordinateError::LatitudeOutOfRange(lat));
        }
        if !(-180.0..=180.0).contains(&lng) {
            return Err(CoordinateError::LongitudeOutOfRange(lng));
        }
        Ok(Self { lat, lng })
    }

    #[must_use]
    pub const fn lat(self) -> f64 {
        self.lat
    }

    #[must_use]
    pub const fn lng(self) -> f64 {
        self.lng
    }

    #[must_use]
    pub fn distance_to(self, other: Self) -> f64 {
        haversine_distance(self, other)
    }
}

#[must_use]
pub fn haversine_distance(p1: ValidatedCoordinate, p2: ValidatedCoordinate) -> f64 {
    const EPSILON: f64 = 1e-10;

    if (p1.lat - p2.lat).abs() < EPSILON && (p1.lng - p2.lng).abs() < EPSILON {
        return 0.0;
    }

    let lat1_rad = p1.lat.to_radians();
    let lat2_rad = p2.lat.to_radians();
    let delta_lat = (p2.lat - p1.lat).to_radians();
    let delta_lng = (p2.lng - p1.lng).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lng / 2.0).sin().powi(2);
    let a = a.clamp(0.0, 1.0);

    let c = 2.0 * a.sqrt().asin();
    let result = EARTH_RADIUS_M * c;

    if result.is_finite() {
        result
    } else {
        f64::MAX
    }
}

#[must_use]
pub fn format_distance(meters: f64) -> String {
    if !meters.is_finite() || meters < 0.0 {
        return "Unknown".to_string();
    }

    if meters < 1000.0 {
        format!("{meters:.0} m")
    } else if meters < 10_000.0 {
        format!("{:.1} km", meters / 1000.0)
    } else {
        format!("{:.0} km", meters / 1000.0)
    }
}

#[must_use]
pub fn format_price(cents: u32, currency: &str) -> String {
    let whole = cents / 100;
    let fraction = cents % 100;
    match currency {
        "EUR" => format!("€{whole}.{fraction:02}"),
        "USD" => format!("${whole}.{fraction:02}"),
        "GBP" => format!("£{whole}.{fraction:02}"),
        other => format!("{whole}.{fraction:02} {other}"),
    }
}

// --- Secret wrappers for event payloads: redact Debug, zeroize on drop ---

#[derive(Clone, PartialEq, Eq)]
pub struct Sensitive(String);

impl Sensitive {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Sensitive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl Drop for Sensitive {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct SensitiveBytes(Vec<u8>);

impl SensitiveBytes {
    #[must_use]
    pub fn new(value: impl Into<Vec<u8>>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn expose(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for SensitiveBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl Drop for SensitiveBytes {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

// --- Typed ids ---

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BagId(pub String);

impl BagId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BagId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// --- Domain payloads (wire shapes are camelCase) ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileLocation {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: UserId,
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub location: Option<ProfileLocation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bag {
    pub id: BagId,
    pub store_name: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub price_cents: u32,
    pub currency: String,
    #[serde(with = "envelope::flexible_timestamp")]
    pub pickup_start: DateTime<Utc>,
    #[serde(with = "envelope::flexible_timestamp")]
    pub pickup_end: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub distance_meters: Option<f64>,
    pub items_left: u32,
    pub is_favorite: bool,
    #[serde(default)]
    pub image_url: Option<ValidatedUrl>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthPayload {
    pub user: UserProfile,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPayload {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FavoritePayload {
    pub is_favorited: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct FilterOptions {
    #[serde(default)]
    pub max_price_cents: Option<u32>,
    #[serde(default)]
    pub dietary: Vec<String>,
    #[serde(default)]
    pub min_items: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SocialProvider {
    Apple,
    Google,
    Facebook,
}

impl SocialProvider {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Apple => "apple",
            Self::Google => "google",
            Self::Facebook => "facebook",
        }
    }
}

// Request bodies.

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginBody<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterBody<'a> {
    name: &'a str,
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SocialAuthBody<'a> {
    provider: &'a str,
    token: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshBody<'a> {
    refresh_token: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ToggleFavoriteBody {
    was_favorited: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SyncLocationBody {
    latitude: f64,
    longitude: f64,
}

// --- Authenticated request pipeline ---

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestPurpose {
    Login,
    Register,
    SocialAuth,
    FetchProfile,
    FetchBags { page: u32 },
    FetchFavorites,
    ToggleFavorite { bag_id: BagId, mutation_id: String },
    SyncLocation,
}

impl RequestPurpose {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Register => "register",
            Self::SocialAuth => "social_auth",
            Self::FetchProfile => "fetch_profile",
            Self::FetchBags { .. } => "fetch_bags",
            Self::FetchFavorites => "fetch_favorites",
            Self::ToggleFavorite { .. } => "toggle_favorite",
            Self::SyncLocation => "sync_location",
        }
    }
}

/// One logical API call, reproducible for the single bounded retry after a
/// token refresh.
#[derive(Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub purpose: RequestPurpose,
    pub method: HttpMethod,
    pub path: ApiPath,
    pub body: Option<Vec<u8>>,
    pub timeout: Duration,
    pub authenticated: bool,
    pub retry_on_unauthorized: bool,
}

impl std::fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequest")
            .field("purpose", &self.purpose.name())
            .field("method", &self.method.as_str())
            .field("path", &self.path.as_str())
            .field("body_len", &self.body.as_ref().map(Vec::len))
            .field("authenticated", &self.authenticated)
            .field("retry_on_unauthorized", &self.retry_on_unauthorized)
            .finish()
    }
}

impl PendingRequest {
    fn new(
        purpose: RequestPurpose,
        method: HttpMethod,
        path: ApiPath,
        body: Option<Vec<u8>>,
        timeout: Duration,
        authenticated: bool,
    ) -> Self {
        Self {
            purpose,
            method,
            path,
            body,
            timeout,
            authenticated,
            retry_on_unauthorized: true,
        }
    }

    fn json_body<T: Serialize>(value: &T) -> ApiResult<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| ApiError::InvalidRequest {
            reason: e.to_string(),
        })
    }

    fn path(path: impl Into<String>) -> ApiResult<ApiPath> {
        ApiPath::new(path).map_err(|e| ApiError::InvalidRequest {
            reason: e.to_string(),
        })
    }

    pub fn login(email: &str, password: &str) -> ApiResult<Self> {
        Ok(Self::new(
            RequestPurpose::Login,
            HttpMethod::Post,
            Self::path("/api/v1/auth/login")?,
            Some(Self::json_body(&LoginBody { email, password })?),
            AUTH_TIMEOUT,
            false,
        ))
    }

    pub fn register(name: &str, email: &str, password: &str) -> ApiResult<Self> {
        Ok(Self::new(
            RequestPurpose::Register,
            HttpMethod::Post,
            Self::path("/api/v1/auth/register")?,
            Some(Self::json_body(&RegisterBody { name, email, password })?),
            AUTH_TIMEOUT,
            false,
        ))
    }

    pub fn social_auth(provider: SocialProvider, token: &str) -> ApiResult<Self> {
        Ok(Self::new(
            RequestPurpose::SocialAuth,
            HttpMethod::Post,
            Self::path("/api/v1/auth/social")?,
            Some(Self::json_body(&SocialAuthBody {
                provider: provider.as_str(),
                token,
            })?),
            AUTH_TIMEOUT,
            false,
        ))
    }

    pub fn fetch_profile() -> ApiResult<Self> {
        Ok(Self::new(
            RequestPurpose::FetchProfile,
            HttpMethod::Get,
            Self::path("/api/v1/profile")?,
            None,
            FETCH_TIMEOUT,
            true,
        ))
    }

    pub fn fetch_bags(
        coordinate: ValidatedCoordinate,
        page: u32,
        filters: &FilterOptions,
    ) -> ApiResult<Self> {
        let mut path = format!(
            "/api/v1/bags?lat={:.6}&lng={:.6}&page={page}&limit={DEFAULT_PAGE_SIZE}",
            coordinate.lat(),
            coordinate.lng(),
        );
        if let Some(max_price) = filters.max_price_cents {
            path.push_str(&format!("&maxPrice={max_price}"));
        }
        if filters.min_items > 0 {
            path.push_str(&format!("&minItems={}", filters.min_items));
        }

        Ok(Self::new(
            RequestPurpose::FetchBags { page },
            HttpMethod::Get,
            Self::path(path)?,
            None,
            FETCH_TIMEOUT,
            true,
        ))
    }

    pub fn fetch_favorites() -> ApiResult<Self> {
        Ok(Self::new(
            RequestPurpose::FetchFavorites,
            HttpMethod::Get,
            Self::path("/api/v1/favorites")?,
            None,
            FETCH_TIMEOUT,
            true,
        ))
    }

    pub fn toggle_favorite(
        bag_id: &BagId,
        mutation_id: String,
        was_favorited: bool,
    ) -> ApiResult<Self> {
        Ok(Self::new(
            RequestPurpose::ToggleFavorite {
                bag_id: bag_id.clone(),
                mutation_id,
            },
            HttpMethod::Post,
            Self::path(format!("/api/v1/bags/{bag_id}/favorite"))?,
            Some(Self::json_body(&ToggleFavoriteBody { was_favorited })?),
            TOGGLE_TIMEOUT,
            true,
        ))
    }

    pub fn sync_location(coordinate: ValidatedCoordinate) -> ApiResult<Self> {
        Ok(Self::new(
            RequestPurpose::SyncLocation,
            HttpMethod::Put,
            Self::path("/api/v1/profile/location")?,
            Some(Self::json_body(&SyncLocationBody {
                latitude: coordinate.lat(),
                longitude: coordinate.lng(),
            })?),
            LOCATION_SYNC_TIMEOUT,
            true,
        ))
    }
}

/// What an HTTP completion means for the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseDisposition {
    Success(Vec<u8>),
    Unauthorized,
    Failure(ApiError),
}

/// Classify a transport result by status: 2xx is a success, 401 goes to the
/// token lifecycle path, anything else becomes a typed failure with the
/// best message the error envelope yields.
#[must_use]
pub fn classify_response(result: &HttpResult) -> ResponseDisposition {
    match result {
        Err(e) => ResponseDisposition::Failure(ApiError::Network {
            cause: e.to_string(),
        }),
        Ok(output) if output.is_success() => ResponseDisposition::Success(output.body.clone()),
        Ok(output) if output.status == 401 => ResponseDisposition::Unauthorized,
        Ok(output) => ResponseDisposition::Failure(ApiError::Server {
            message: decode_error_message(&output.body)
                .unwrap_or_else(|| format!("Server error: {}", output.status)),
        }),
    }
}

// --- App state ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AppState {
    #[default]
    Loading,
    Unauthenticated,
    Authenticating,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ToastKind {
    #[default]
    Info,
    Success,
    Warning,
    Error,
}

impl ToastKind {
    #[must_use]
    pub const fn default_duration_ms(self) -> u64 {
        match self {
            Self::Info => 3000,
            Self::Success => 2000,
            Self::Warning => 4000,
            Self::Error => 5000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToastMessage {
    pub message: String,
    pub kind: ToastKind,
    pub duration_ms: u64,
}

impl ToastMessage {
    #[must_use]
    pub fn new(message: impl Into<String>, kind: ToastKind) -> Self {
        Self {
            message: message.into(),
            kind,
            duration_ms: kind.default_duration_ms(),
        }
    }
}

/// Which legacy preference key a startup read was for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacySlot {
    Access,
    Refresh,
}

/// Collects the two legacy reads; the migration plan runs once both landed.
#[derive(Debug, Default)]
pub struct MigrationReads {
    access: Option<Option<String>>,
    refresh: Option<Option<String>>,
}

impl MigrationReads {
    pub fn record(&mut self, slot: LegacySlot, value: Option<String>) {
        match slot {
            LegacySlot::Access => self.access = Some(value),
            LegacySlot::Refresh => self.refresh = Some(value),
        }
    }

    /// `Some` once both keys have been read, consuming the buffered values.
    pub fn complete(&mut self) -> Option<(Option<String>, Option<String>)> {
        if self.access.is_some() && self.refresh.is_some() {
            Some((self.access.take().flatten(), self.refresh.take().flatten()))
        } else {
            None
        }
    }
}

// --- Model ---

pub struct Model {
    pub state: AppState,
    pub vault: CredentialVault,
    pub sealer: Option<Sealer>,
    pub user: Option<UserProfile>,
    pub resolver: LocationResolver,
    pub last_device_fix: Option<ValidatedCoordinate>,
    pub bags: Vec<Bag>,
    pub bags_page: u32,
    pub bags_has_more: bool,
    pub favorites: Vec<Bag>,
    pub filter_options: FilterOptions,
    pub favorite_mutations: MutationLedger<BagId, bool>,
    pub refresh_in_flight: bool,
    pub refresh_waiters: VecDeque<PendingRequest>,
    pub migration_reads: MigrationReads,
    pub network_online: bool,
    pub is_refreshing: bool,
    pub active_error: Option<AppError>,
    pub active_toast: Option<ToastMessage>,
}

impl Default for Model {
    fn default() -> Self {
        Self {
            state: AppState::Loading,
            vault: CredentialVault::new(),
            sealer: None,
            user: None,
            resolver: LocationResolver::new(),
            last_device_fix: None,
            bags: Vec::new(),
            bags_page: 1,
            bags_has_more: false,
            favorites: Vec::new(),
            filter_options: FilterOptions::default(),
            favorite_mutations: MutationLedger::new(),
            refresh_in_flight: false,
            refresh_waiters: VecDeque::new(),
            migration_reads: MigrationReads::default(),
            network_online: true,
            is_refreshing: false,
            active_error: None,
            active_toast: None,
        }
    }
}

impl Model {
    #[must_use]
    pub fn is_logged_in(&self) -> bool {
        self.vault.is_logged_in()
    }

    #[must_use]
    pub fn effective_location(&self) -> Option<EffectiveLocation> {
        self.resolver.effective()
    }

    #[must_use]
    pub fn has_location(&self) -> bool {
        self.resolver.has_location()
    }

    pub fn set_error(&mut self, error: AppError) {
        self.active_error = Some(error);
    }

    pub fn clear_error(&mut self) {
        self.active_error = None;
    }

    pub fn show_toast(&mut self, message: impl Into<String>, kind: ToastKind) {
        self.active_toast = Some(ToastMessage::new(message, kind));
    }

    pub fn clear_toast(&mut self) {
        self.active_toast = None;
    }

    #[must_use]
    pub fn favorite_value(&self, bag_id: &BagId) -> Option<bool> {
        self.bags
            .iter()
            .find(|b| &b.id == bag_id)
            .map(|b| b.is_favorite)
            .or_else(|| {
                self.favorites
                    .iter()
                    .find(|b| &b.id == bag_id)
                    .map(|b| b.is_favorite)
            })
    }

    /// Set the cached favorite flag everywhere the bag is cached, and keep
    /// the favorites collection consistent with it.
    pub fn apply_favorite_value(&mut self, bag_id: &BagId, value: bool) {
        if let Some(bag) = self.bags.iter_mut().find(|b| &b.id == bag_id) {
            bag.is_favorite = value;
        }

        if value {
            if !self.favorites.iter().any(|b| &b.id == bag_id) {
                if let Some(bag) = self.bags.iter().find(|b| &b.id == bag_id) {
                    self.favorites.push(bag.clone());
                }
            } else if let Some(bag) = self.favorites.iter_mut().find(|b| &b.id == bag_id) {
                bag.is_favorite = true;
            }
        } else {
            self.favorites.retain(|b| &b.id != bag_id);
        }
    }

    pub fn enforce_collection_limits(&mut self) {
        if self.bags.len() > MAX_CACHED_BAGS {
            self.bags.truncate(MAX_CACHED_BAGS);
        }
    }
}

// --- Events ---

#[derive(Debug, Clone)]
pub enum Event {
    Noop,

    AppStarted { install_key: SensitiveBytes },
    NetworkStatusChanged { online: bool },

    // Startup restore & one-time legacy migration
    SealedRecordRead { result: Box<StoreResult> },
    LegacyTokenRead { slot: LegacySlot, result: Box<StoreResult> },
    LegacyCleanupDone { result: Box<StoreResult> },
    CredentialsPersisted { result: Box<StoreResult> },
    FilterOptionsRead { result: Box<StoreResult> },
    FilterOptionsPersisted { result: Box<StoreResult> },

    // Auth
    LoginSubmitted { email: String, password: Sensitive },
    RegisterSubmitted { name: String, email: String, password: Sensitive },
    SocialAuthCompleted { provider: SocialProvider, provider_token: Sensitive },
    SignOutRequested,

    // Location
    LocationPermissionRequested,
    LocationCapabilityResult(Box<LocationResult>),
    DeviceFixReceived { latitude: f64, longitude: f64, accuracy_m: Option<f64> },
    SavedAddressSelected { label: String, latitude: f64, longitude: f64 },
    UseCurrentLocationRequested,
    LocationDebounceElapsed(TimerElapsed),

    // Collections
    RefreshRequested,
    LoadMoreRequested,
    FilterOptionsChanged(FilterOptions),

    // Favorites
    FavoriteToggleRequested { bag_id: String },

    // Pipeline completions
    ApiResponse { request: Box<PendingRequest>, result: Box<HttpResult> },
    RefreshTokenResponse { result: Box<HttpResult> },

    DismissError,
    DismissToast,
}

impl Event {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Noop => "noop",
            Self::AppStarted { .. } => "app_started",
            Self::NetworkStatusChanged { .. } => "network_status_changed",
            Self::SealedRecordRead { .. } => "sealed_record_read",
            Self::LegacyTokenRead { .. } => "legacy_token_read",
            Self::LegacyCleanupDone { .. } => "legacy_cleanup_done",
            Self::CredentialsPersisted { .. } => "credentials_persisted",
            Self::FilterOptionsRead { .. } => "filter_options_read",
            Self::FilterOptionsPersisted { .. } => "filter_options_persisted",
            Self::LoginSubmitted { .. } => "login_submitted",
            Self::RegisterSubmitted { .. } => "register_submitted",
            Self::SocialAuthCompleted { .. } => "social_auth_completed",
            Self::SignOutRequested => "sign_out_requested",
            Self::LocationPermissionRequested => "location_permission_requested",
            Self::LocationCapabilityResult(_) => "location_capability_result",
            Self::DeviceFixReceived { .. } => "device_fix_received",
            Self::SavedAddressSelected { .. } => "saved_address_selected",
            Self::UseCurrentLocationRequested => "use_current_location_requested",
            Self::LocationDebounceElapsed(_) => "location_debounce_elapsed",
            Self::RefreshRequested => "refresh_requested",
            Self::LoadMoreRequested => "load_more_requested",
            Self::FilterOptionsChanged(_) => "filter_options_changed",
            Self::FavoriteToggleRequested { .. } => "favorite_toggle_requested",
            Self::ApiResponse { .. } => "api_response",
            Self::RefreshTokenResponse { .. } => "refresh_token_response",
            Self::DismissError => "dismiss_error",
            Self::DismissToast => "dismiss_toast",
        }
    }

    #[must_use]
    pub const fn is_user_initiated(&self) -> bool {
        matches!(
            self,
            Self::LoginSubmitted { .. }
                | Self::RegisterSubmitted { .. }
                | Self::SocialAuthCompleted { .. }
                | Self::SignOutRequested
                | Self::LocationPermissionRequested
                | Self::SavedAddressSelected { .. }
                | Self::UseCurrentLocationRequested
                | Self::RefreshRequested
                | Self::LoadMoreRequested
                | Self::FilterOptionsChanged(_)
                | Self::FavoriteToggleRequested { .. }
                | Self::DismissError
                | Self::DismissToast
        )
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::Noop
    }
}

// --- View model ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationView {
    pub latitude: f64,
    pub longitude: f64,
    pub source: LocationSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BagView {
    pub id: String,
    pub title: String,
    pub store_name: String,
    pub price_text: String,
    pub distance_text: String,
    pub pickup_start: String,
    pub pickup_end: String,
    pub items_left: u32,
    pub is_favorite: bool,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserFacingError {
    pub message: String,
    pub code: String,
    pub is_retryable: bool,
}

impl From<&AppError> for UserFacingError {
    fn from(error: &AppError) -> Self {
        Self {
            message: error.user_facing_message(),
            code: error.code().to_string(),
            is_retryable: error.is_retryable(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToastView {
    pub message: String,
    pub kind: ToastKind,
    pub duration_ms: u64,
}

impl From<&ToastMessage> for ToastView {
    fn from(toast: &ToastMessage) -> Self {
        Self {
            message: toast.message.clone(),
            kind: toast.kind,
            duration_ms: toast.duration_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewModel {
    pub state: AppState,
    pub is_logged_in: bool,
    pub user_name: Option<String>,
    pub has_location: bool,
    pub effective_location: Option<LocationView>,
    pub manual_address_label: Option<String>,
    pub bags: Vec<BagView>,
    pub favorites: Vec<BagView>,
    pub has_more_bags: bool,
    pub is_refreshing: bool,
    pub online: bool,
    pub filter_options: FilterOptions,
    pub error: Option<UserFacingError>,
    pub toast: Option<ToastView>,
}

// --- The app ---

pub mod app {
    use super::*;

    #[derive(Default)]
    pub struct App;

    impl App {
        fn validate_coordinates(lat: f64, lng: f64) -> Result<ValidatedCoordinate, AppError> {
            ValidatedCoordinate::new(lat, lng).map_err(AppError::from)
        }

        fn secure_record_key() -> StoreKey {
            StoreKey::new(StoreBackend::Secure, SEALED_RECORD_KEY)
                .expect("secure record key is valid")
        }

        fn legacy_key(slot: LegacySlot) -> StoreKey {
            let name = match slot {
                LegacySlot::Access => LEGACY_ACCESS_KEY,
                LegacySlot::Refresh => LEGACY_REFRESH_KEY,
            };
            StoreKey::new(StoreBackend::Preferences, name).expect("legacy key is valid")
        }

        fn filter_options_key() -> StoreKey {
            StoreKey::new(StoreBackend::Preferences, FILTER_OPTIONS_KEY)
                .expect("filter options key is valid")
        }

        /// The single choke point for API calls: lowers a [`PendingRequest`]
        /// into an HTTP effect, attaching the bearer token when one is
        /// stored (absence is not an error here — the 401 path handles it).
        fn send_api_request(request: PendingRequest, model: &Model, caps: &Capabilities) {
            let mut http_request = HttpRequest::new(request.method, request.path.clone());
            http_request.timeout_ms = request.timeout.as_millis() as u64;

            if request.body.is_some()
                && http_request
                    .headers
                    .insert("Content-Type", "application/json")
                    .is_err()
            {
                caps.telemetry().error("request_header_failed", "content-type");
            }
            http_request.body = request.body.clone();

            if request.authenticated {
                if let Some(token) = model.vault.access_token() {
                    if http_request
                        .headers
                        .insert("Authorization", format!("Bearer {token}"))
                        .is_err()
                    {
                        caps.telemetry().warn("bearer_attach_failed", request.purpose.name());
                    }
                }
            }

            if let RequestPurpose::ToggleFavorite { mutation_id, .. } = &request.purpose {
                let _ = http_request.headers.insert("Idempotency-Key", mutation_id.clone());
            }

            caps.http().send(http_request, move |result| Event::ApiResponse {
                request: Box::new(request),
                result: Box::new(result),
            });
        }

        /// Token Lifecycle Manager entry point. Callers queue themselves on
        /// `refresh_waiters` first; the network call is issued only if no
        /// refresh is already in flight, so at most one exists at a time.
        fn begin_refresh(model: &mut Model, caps: &Capabilities) {
            if model.refresh_in_flight {
                return;
            }

            let refresh_token = model.vault.refresh_token().map(str::to_owned);
            let Some(refresh_token) = refresh_token else {
                tracing::warn!("refresh requested with no stored refresh token");
                Self::fail_refresh(model, caps);
                return;
            };

            let body = match serde_json::to_vec(&RefreshBody {
                refresh_token: &refresh_token,
            }) {
                Ok(body) => body,
                Err(e) => {
                    caps.telemetry().error("refresh_serialize_failed", &e.to_string());
                    Self::fail_refresh(model, caps);
                    return;
                }
            };

            let http_request = match HttpRequest::post("/api/v1/auth/refresh")
                .and_then(|r| r.with_body(body))
                .and_then(|r| r.with_header("Content-Type", "application/json"))
                .and_then(|r| r.with_timeout(REFRESH_TIMEOUT))
            {
                Ok(request) => request,
                Err(e) => {
                    caps.telemetry().error("refresh_build_failed", &e.to_string());
                    Self::fail_refresh(model, caps);
                    return;
                }
            };

            model.refresh_in_flight = true;
            caps.telemetry().event("token_refresh_started", &[]);

            caps.http().send(http_request, |result| Event::RefreshTokenResponse {
                result: Box::new(result),
            });
        }

        /// The shared refresh settled. Exactly one of the two branches runs,
        /// and the waiter queue drains exactly once either way.
        fn handle_refresh_settled(result: &HttpResult, model: &mut Model, caps: &Capabilities) {
            model.refresh_in_flight = false;

            let token_payload = match classify_response(result) {
                ResponseDisposition::Success(body) => decode_envelope::<TokenPayload>(&body),
                ResponseDisposition::Unauthorized => Err(ApiError::Unauthorized),
                ResponseDisposition::Failure(e) => Err(e),
            };

            match token_payload {
                Ok(tokens) => {
                    match Credential::new(tokens.access_token, tokens.refresh_token) {
                        Ok(credential) => {
                            model.vault.set(credential);
                            Self::persist_credentials(model, caps);
                            caps.telemetry().event("token_refresh_success", &[]);
                            tracing::debug!("token refresh succeeded, draining waiters");

                            let waiters = std::mem::take(&mut model.refresh_waiters);
                            for waiter in waiters {
                                Self::send_api_request(waiter, model, caps);
                            }
                        }
                        Err(_) => {
                            caps.telemetry().error("token_refresh_incomplete_pair", "");
                            Self::fail_refresh(model, caps);
                        }
                    }
                }
                Err(e) => {
                    caps.telemetry().error("token_refresh_failed", &e.to_string());
                    Self::fail_refresh(model, caps);
                }
            }
        }

        /// Any refresh failure clears credentials (a stale token must never
        /// linger in storage), fails every waiter with `Unauthorized`, and
        /// forces a return to the unauthenticated flow.
        fn fail_refresh(model: &mut Model, caps: &Capabilities) {
            model.refresh_in_flight = false;
            model.vault.clear();
            caps.store().delete(Self::secure_record_key(), |result| {
                Event::CredentialsPersisted {
                    result: Box::new(result),
                }
            });

            let waiters = std::mem::take(&mut model.refresh_waiters);
            for waiter in waiters {
                Self::handle_api_failure(&waiter.purpose, ApiError::Unauthorized, model, caps);
            }

            model.user = None;
            model.state = AppState::Unauthenticated;
            model.set_error(AppError::new(ErrorKind::Authentication, "Session expired"));
        }

        /// Pipeline classification for one completed request.
        fn handle_api_response(
            request: PendingRequest,
            result: &HttpResult,
            model: &mut Model,
            caps: &Capabilities,
        ) {
            match classify_response(result) {
                ResponseDisposition::Success(body) => {
                    Self::handle_api_success(&request.purpose, &body, model, caps);
                }
                ResponseDisposition::Unauthorized => {
                    let eligible = request.authenticated
                        && request.retry_on_unauthorized
                        && model.vault.refresh_token().is_some();

                    if eligible {
                        // Queue for exactly one retry after the shared
                        // refresh settles.
                        let mut retry = request;
                        retry.retry_on_unauthorized = false;
                        model.refresh_waiters.push_back(retry);
                        Self::begin_refresh(model, caps);
                    } else {
                        model.vault.clear();
                        caps.store().delete(Self::secure_record_key(), |result| {
                            Event::CredentialsPersisted {
                                result: Box::new(result),
                            }
                        });
                        if request.authenticated {
                            model.user = None;
                            model.state = AppState::Unauthenticated;
                        }
                        Self::handle_api_failure(
                            &request.purpose,
                            ApiError::Unauthorized,
                            model,
                            caps,
                        );
                    }
                }
                ResponseDisposition::Failure(error) => {
                    Self::handle_api_failure(&request.purpose, error, model, caps);
                }
            }
        }

        fn handle_api_success(
            purpose: &RequestPurpose,
            body: &[u8],
            model: &mut Model,
            caps: &Capabilities,
        ) {
            match purpose {
                RequestPurpose::Login | RequestPurpose::Register | RequestPurpose::SocialAuth => {
                    match decode_envelope::<AuthPayload>(body) {
                        Ok(payload) => Self::establish_session(payload, model, caps),
                        Err(e) => {
                            model.state = AppState::Unauthenticated;
                            model.set_error(e.into());
                            caps.telemetry().error("auth_decode_failed", purpose.name());
                        }
                    }
                }

                RequestPurpose::FetchProfile => match decode_envelope::<UserProfile>(body) {
                    Ok(profile) => {
                        Self::adopt_profile(profile, model, caps);
                        caps.telemetry().event("profile_loaded", &[]);
                    }
                    Err(e) => {
                        caps.telemetry().error("profile_decode_failed", &e.to_string());
                    }
                },

                RequestPurpose::FetchBags { page } => {
                    model.is_refreshing = false;
                    match decode_paginated::<Bag>(body) {
                        Ok(listing) => {
                            if *page <= 1 {
                                model.bags = listing.data;
                            } else {
                                model.bags.extend(listing.data);
                            }
                            model.bags_page = listing.pagination.page;
                            model.bags_has_more = listing.pagination.has_more;
                            model.enforce_collection_limits();
                            model.clear_error();

                            caps.telemetry().event(
                                "bags_loaded",
                                &[("count", &model.bags.len().to_string())],
                            );
                        }
                        Err(e) => {
                            model.set_error(e.into());
                            caps.telemetry().error("bags_decode_failed", "fetch_bags");
                        }
                    }
                }

                RequestPurpose::FetchFavorites => match decode_paginated::<Bag>(body) {
                    Ok(listing) => {
                        model.favorites = listing.data;
                        caps.telemetry().event(
                            "favorites_loaded",
                            &[("count", &model.favorites.len().to_string())],
                        );
                    }
                    Err(e) => {
                        caps.telemetry().error("favorites_decode_failed", &e.to_string());
                    }
                },

                RequestPurpose::ToggleFavorite { bag_id, mutation_id } => {
                    match decode_envelope::<FavoritePayload>(body) {
                        Ok(payload) => {
                            model.favorite_mutations.commit(mutation_id);
                            // Server truth wins, even over our own guess.
                            model.apply_favorite_value(bag_id, payload.is_favorited);
                            caps.telemetry().event("favorite_toggled", &[]);
                        }
                        Err(e) => {
                            if let Some(entry) = model.favorite_mutations.rollback(mutation_id) {
                                model.apply_favorite_value(bag_id, entry.previous);
                            }
                            model.show_toast(
                                AppError::from(e).user_facing_message(),
                                ToastKind::Error,
                            );
                            caps.telemetry().error("favorite_decode_failed", bag_id.as_str());
                        }
                    }
                }

                RequestPurpose::SyncLocation => match decode_ack(body) {
                    Ok(()) => caps.telemetry().event("location_synced", &[]),
                    Err(e) => caps.telemetry().warn("location_sync_rejected", &e.to_string()),
                },
            }
        }

        fn handle_api_failure(
            purpose: &RequestPurpose,
            error: ApiError,
            model: &mut Model,
            caps: &Capabilities,
        ) {
            caps.telemetry().warn(
                &format!("api_failure.{}", purpose.name()),
                &error.to_string(),
            );

            match purpose {
                RequestPurpose::Login | RequestPurpose::Register | RequestPurpose::SocialAuth => {
                    model.state = AppState::Unauthenticated;
                    let surfaced = if error == ApiError::Unauthorized {
                        AppError::new(ErrorKind::Validation, "Invalid email or password")
                    } else {
                        error.into()
                    };
                    model.set_error(surfaced);
                }

                RequestPurpose::FetchProfile => {
                    // Non-critical: the session stands, the profile stays
                    // whatever we had.
                    tracing::debug!("profile fetch failed: {error}");
                }

                RequestPurpose::FetchBags { .. } => {
                    // Keep stale collections visible; the user gets a retry
                    // affordance instead of an empty screen.
                    model.is_refreshing = false;
                    model.set_error(error.into());
                }

                RequestPurpose::FetchFavorites => {
                    tracing::debug!("favorites fetch failed: {error}");
                }

                RequestPurpose::ToggleFavorite { bag_id, mutation_id } => {
                    if let Some(entry) = model.favorite_mutations.rollback(mutation_id) {
                        model.apply_favorite_value(bag_id, entry.previous);
                    }
                    model.show_toast(
                        AppError::from(error).user_facing_message(),
                        ToastKind::Error,
                    );
                }

                RequestPurpose::SyncLocation => {
                    // Best-effort write-back: never surfaced.
                    tracing::debug!("location write-back failed: {error}");
                }
            }
        }

        /// A successful login/register/social-auth response.
        fn establish_session(payload: AuthPayload, model: &mut Model, caps: &Capabilities) {
            match Credential::new(payload.access_token, payload.refresh_token) {
                Ok(credential) => {
                    model.vault.set(credential);
                    Self::persist_credentials(model, caps);
                }
                Err(_) => {
                    model.state = AppState::Unauthenticated;
                    model.set_error(AppError::new(
                        ErrorKind::Authentication,
                        "Sign-in response was missing tokens",
                    ));
                    caps.telemetry().error("auth_incomplete_pair", "");
                    return;
                }
            }

            model.state = AppState::Ready;
            Self::adopt_profile(payload.user, model, caps);
            caps.telemetry().event("session_established", &[]);

            Self::fetch_collections(model, caps);
        }

        fn adopt_profile(profile: UserProfile, model: &mut Model, caps: &Capabilities) {
            let server_location = profile
                .location
                .as_ref()
                .and_then(|l| ValidatedCoordinate::new(l.latitude, l.longitude).ok());
            model.user = Some(profile);

            if let Some(coordinate) = server_location {
                if let Some(change) = model.resolver.adopt_server_location(coordinate) {
                    Self::apply_location_change(&change, model, caps);
                }
            }
        }

        /// Re-fetch location-dependent collections. Skipped entirely until
        /// a location resolves.
        fn fetch_collections(model: &mut Model, caps: &Capabilities) {
            let Some(location) = model.resolver.effective() else {
                tracing::debug!("collection fetch skipped: no effective location");
                return;
            };

            match PendingRequest::fetch_bags(location.coordinate, 1, &model.filter_options) {
                Ok(request) => {
                    model.is_refreshing = true;
                    Self::send_api_request(request, model, caps);
                }
                Err(e) => model.set_error(e.into()),
            }

            match PendingRequest::fetch_favorites() {
                Ok(request) => Self::send_api_request(request, model, caps),
                Err(e) => caps.telemetry().error("favorites_request_invalid", &e.to_string()),
            }
        }

        /// An accepted location transition: refresh collections, and issue
        /// the per-session best-effort profile write-back when flagged.
        fn apply_location_change(change: &LocationChange, model: &mut Model, caps: &Capabilities) {
            caps.telemetry().event(
                "location_changed",
                &[("source", match change.location.source {
                    LocationSource::Manual => "manual",
                    LocationSource::Device => "device",
                    LocationSource::Server => "server",
                    LocationSource::Fallback => "fallback",
                })],
            );

            if model.is_logged_in() {
                Self::fetch_collections(model, caps);
            }

            if change.sync_to_server && model.is_logged_in() {
                match PendingRequest::sync_location(change.location.coordinate) {
                    Ok(request) => Self::send_api_request(request, model, caps),
                    Err(e) => {
                        caps.telemetry().warn("location_sync_invalid", &e.to_string());
                    }
                }
            }
        }

        fn handle_device_fix(raw: RawFix, model: &mut Model, caps: &Capabilities) {
            let coordinate = match Self::validate_coordinates(raw.latitude, raw.longitude) {
                Ok(c) => c,
                Err(_) => {
                    caps.telemetry().warn(
                        "device_fix_invalid",
                        &format!("{}, {}", raw.latitude, raw.longitude),
                    );
                    return;
                }
            };

            model.last_device_fix = Some(coordinate);

            if let Some(timer) = model.resolver.note_device_fix(coordinate) {
                caps.time().notify_after(
                    timer,
                    Duration::from_millis(DEBOUNCE_WINDOW_MS),
                    Event::LocationDebounceElapsed,
                );
            }
        }

        fn persist_credentials(model: &Model, caps: &Capabilities) {
            let Some(sealer) = &model.sealer else {
                caps.telemetry().error("persist_without_sealer", "");
                return;
            };

            match model.vault.seal_for_storage(sealer) {
                Ok(Some(envelope)) => {
                    caps.store().set(Self::secure_record_key(), envelope, |result| {
                        Event::CredentialsPersisted {
                            result: Box::new(result),
                        }
                    });
                }
                Ok(None) => {
                    caps.store().delete(Self::secure_record_key(), |result| {
                        Event::CredentialsPersisted {
                            result: Box::new(result),
                        }
                    });
                }
                Err(e) => {
                    caps.telemetry().error("credential_seal_failed", &e.to_string());
                }
            }
        }

        fn persist_filter_options(model: &Model, caps: &Capabilities) {
            match serde_json::to_vec(&model.filter_options) {
                Ok(bytes) => {
                    caps.store().set(Self::filter_options_key(), bytes, |result| {
                        Event::FilterOptionsPersisted {
                            result: Box::new(result),
                        }
                    });
                }
                Err(e) => caps.telemetry().error("filters_serialize_failed", &e.to_string()),
            }
        }

        /// Run the one-time plaintext-token migration from whatever the two
        /// legacy reads produced.
        fn run_migration(
            access: Option<String>,
            refresh: Option<String>,
            model: &mut Model,
            caps: &Capabilities,
        ) {
            let plan = credentials::plan_migration(access, refresh);

            if plan.delete_legacy {
                for slot in [LegacySlot::Access, LegacySlot::Refresh] {
                    caps.store().delete(Self::legacy_key(slot), |result| {
                        Event::LegacyCleanupDone {
                            result: Box::new(result),
                        }
                    });
                }
            }

            match plan.adopt {
                Some(credential) => {
                    model.vault.set(credential);
                    Self::persist_credentials(model, caps);
                    model.state = AppState::Ready;
                    caps.telemetry().event("legacy_tokens_migrated", &[]);

                    match PendingRequest::fetch_profile() {
                        Ok(request) => Self::send_api_request(request, model, caps),
                        Err(e) => caps.telemetry().error("profile_request_invalid", &e.to_string()),
                    }
                    Self::fetch_collections(model, caps);
                }
                None => {
                    model.state = AppState::Unauthenticated;
                }
            }
        }

        /// Sign-out tears down everything session-scoped. Filter preferences
        /// are device-scoped and deliberately survive into the next login.
        fn sign_out(model: &mut Model, caps: &Capabilities) {
            model.vault.clear();
            caps.store().delete(Self::secure_record_key(), |result| {
                Event::CredentialsPersisted {
                    result: Box::new(result),
                }
            });

            model.user = None;
            model.bags.clear();
            model.favorites.clear();
            model.bags_page = 1;
            model.bags_has_more = false;
            model.favorite_mutations.clear();
            model.refresh_in_flight = false;
            model.refresh_waiters.clear();
            model.is_refreshing = false;
            model.resolver.reset_for_sign_out();
            model.clear_error();
            model.state = AppState::Unauthenticated;

            caps.telemetry().event("signed_out", &[]);
        }
    }

    impl crux_core::App for App {
        type Event = Event;
        type Model = Model;
        type ViewModel = ViewModel;
        type Capabilities = Capabilities;

        fn update(&self, event: Event, model: &mut Model, caps: &Capabilities) {
            let event_name = event.name();
            caps.telemetry().counter(&format!("event.{event_name}"), 1);
            if event.is_user_initiated() {
                caps.telemetry().event("user_action", &[("event", event_name)]);
            }

            match event {
                Event::Noop => {}

                Event::AppStarted { install_key } => {
                    model.state = AppState::Loading;

                    match Sealer::with_os_rng(install_key.expose()) {
                        Ok(sealer) => {
                            tracing::debug!(
                                fingerprint = %sealer.key_fingerprint(),
                                "sealer initialized"
                            );
                            model.sealer = Some(sealer);
                        }
                        Err(e) => {
                            caps.telemetry().error("sealer_init_failed", &e.to_string());
                        }
                    }

                    caps.store().get(Self::secure_record_key(), |result| {
                        Event::SealedRecordRead {
                            result: Box::new(result),
                        }
                    });
                    caps.store().get(Self::filter_options_key(), |result| {
                        Event::FilterOptionsRead {
                            result: Box::new(result),
                        }
                    });

                    caps.render().render();
                }

                Event::NetworkStatusChanged { online } => {
                    let was_online = model.network_online;
                    model.network_online = online;

                    if online && !was_online && model.state == AppState::Ready {
                        Self::fetch_collections(model, caps);
                    }

                    caps.render().render();
                }

                Event::SealedRecordRead { result } => {
                    match *result {
                        Ok(StoreOutput::Read(Some(bytes))) => {
                            let restored = match &model.sealer {
                                Some(sealer) => model.vault.restore_from_sealed(&bytes, sealer),
                                None => false,
                            };

                            if restored {
                                model.state = AppState::Ready;
                                caps.telemetry().event("session_restored", &[]);

                                match PendingRequest::fetch_profile() {
                                    Ok(request) => Self::send_api_request(request, model, caps),
                                    Err(e) => caps
                                        .telemetry()
                                        .error("profile_request_invalid", &e.to_string()),
                                }
                                Self::fetch_collections(model, caps);
                            } else {
                                // Unreadable record: treat as signed out and
                                // drop the corpse.
                                caps.store().delete(Self::secure_record_key(), |result| {
                                    Event::CredentialsPersisted {
                                        result: Box::new(result),
                                    }
                                });
                                model.state = AppState::Unauthenticated;
                                caps.telemetry().warn("sealed_record_unreadable", "");
                            }
                        }
                        Ok(StoreOutput::Read(None)) => {
                            // Nothing sealed yet: check for tokens an older
                            // release left in plaintext.
                            for slot in [LegacySlot::Access, LegacySlot::Refresh] {
                                caps.store().get(Self::legacy_key(slot), move |result| {
                                    Event::LegacyTokenRead {
                                        slot,
                                        result: Box::new(result),
                                    }
                                });
                            }
                        }
                        Ok(_) => {
                            caps.telemetry().error("sealed_record_unexpected_output", "");
                            model.state = AppState::Unauthenticated;
                        }
                        Err(e) => {
                            caps.telemetry().error("sealed_record_read_failed", &e.to_string());
                            model.state = AppState::Unauthenticated;
                        }
                    }
                    caps.render().render();
                }

                Event::LegacyTokenRead { slot, result } => {
                    let value = match *result {
                        Ok(StoreOutput::Read(Some(bytes))) => String::from_utf8(bytes).ok(),
                        Ok(_) => None,
                        Err(e) => {
                            caps.telemetry().warn("legacy_read_failed", &e.to_string());
                            None
                        }
                    };

                    model.migration_reads.record(slot, value);
                    if let Some((access, refresh)) = model.migration_reads.complete() {
                        Self::run_migration(access, refresh, model, caps);
                    }
                    caps.render().render();
                }

                Event::LegacyCleanupDone { result } => {
                    if let Err(e) = *result {
                        caps.telemetry().warn("legacy_cleanup_failed", &e.to_string());
                    }
                }

                Event::CredentialsPersisted { result } => {
                    if let Err(e) = *result {
                        caps.telemetry().error("credential_persist_failed", &e.to_string());
                    }
                }

                Event::FilterOptionsRead { result } => {
                    if let Ok(StoreOutput::Read(Some(bytes))) = *result {
                        match serde_json::from_slice::<FilterOptions>(&bytes) {
                            Ok(options) => model.filter_options = options,
                            Err(e) => {
                                caps.telemetry().warn("filters_decode_failed", &e.to_string());
                            }
                        }
                    }
                }

                Event::FilterOptionsPersisted { result } => {
                    if let Err(e) = *result {
                        caps.telemetry().warn("filters_persist_failed", &e.to_string());
                    }
                }

                Event::LoginSubmitted { email, password } => {
                    model.state = AppState::Authenticating;
                    model.clear_error();

                    match PendingRequest::login(&email, password.expose()) {
                        Ok(request) => Self::send_api_request(request, model, caps),
                        Err(e) => {
                            model.state = AppState::Unauthenticated;
                            model.set_error(e.into());
                        }
                    }
                    caps.render().render();
                }

                Event::RegisterSubmitted { name, email, password } => {
                    model.state = AppState::Authenticating;
                    model.clear_error();

                    match PendingRequest::register(&name, &email, password.expose()) {
                        Ok(request) => Self::send_api_request(request, model, caps),
                        Err(e) => {
                            model.state = AppState::Unauthenticated;
                            model.set_error(e.into());
                        }
                    }
                    caps.render().render();
                }

                Event::SocialAuthCompleted { provider, provider_token } => {
                    model.state = AppState::Authenticating;
                    model.clear_error();

                    match PendingRequest::social_auth(provider, provider_token.expose()) {
                        Ok(request) => Self::send_api_request(request, model, caps),
                        Err(e) => {
                            model.state = AppState::Unauthenticated;
                            model.set_error(e.into());
                        }
                    }
                    caps.render().render();
                }

                Event::SignOutRequested => {
                    Self::sign_out(model, caps);
                    caps.render().render();
                }

                Event::LocationPermissionRequested => {
                    caps.location().request_permission(|result| {
                        Event::LocationCapabilityResult(Box::new(result))
                    });
                }

                Event::LocationCapabilityResult(result) => {
                    match *result {
                        Ok(LocationOutput::Permission { granted }) => {
                            caps.telemetry().event(
                                "location_permission",
                                &[("granted", if granted { "true" } else { "false" })],
                            );
                            if granted {
                                caps.location().start_watch(|result| {
                                    Event::LocationCapabilityResult(Box::new(result))
                                });
                                caps.location().get_current(|result| {
                                    Event::LocationCapabilityResult(Box::new(result))
                                });
                            }
                        }
                        Ok(LocationOutput::Fix(raw)) => {
                            Self::handle_device_fix(raw, model, caps);
                        }
                        Ok(LocationOutput::WatchStarted | LocationOutput::WatchStopped) => {}
                        Err(e) => {
                            caps.telemetry().warn("location_capability_failed", &e.to_string());
                        }
                    }
                    caps.render().render();
                }

                Event::DeviceFixReceived { latitude, longitude, accuracy_m } => {
                    Self::handle_device_fix(
                        RawFix {
                            latitude,
                            longitude,
                            accuracy_m,
                        },
                        model,
                        caps,
                    );
                    caps.render().render();
                }

                Event::SavedAddressSelected { label, latitude, longitude } => {
                    match Self::validate_coordinates(latitude, longitude) {
                        Ok(coordinate) => {
                            let change = model.resolver.set_manual(coordinate, label);
                            Self::apply_location_change(&change, model, caps);
                        }
                        Err(e) => model.set_error(e),
                    }
                    caps.render().render();
                }

                Event::UseCurrentLocationRequested => {
                    let live_fix = model.last_device_fix;
                    match model.resolver.use_current_location(live_fix) {
                        Some(change) => Self::apply_location_change(&change, model, caps),
                        None => {
                            let on_device = matches!(
                                model.resolver.effective().map(|l| l.source),
                                Some(LocationSource::Device)
                            );
                            if !on_device {
                                caps.location().get_current(|result| {
                                    Event::LocationCapabilityResult(Box::new(result))
                                });
                            }
                        }
                    }
                    caps.render().render();
                }

                Event::LocationDebounceElapsed(elapsed) => {
                    if let Some(change) = model.resolver.debounce_elapsed(elapsed.id) {
                        Self::apply_location_change(&change, model, caps);
                    }
                    caps.render().render();
                }

                Event::RefreshRequested => {
                    if !model.network_online {
                        model.show_toast("No internet connection", ToastKind::Warning);
                        caps.render().render();
                        return;
                    }

                    if model.is_refreshing {
                        return;
                    }

                    Self::fetch_collections(model, caps);
                    caps.render().render();
                }

                Event::LoadMoreRequested => {
                    if !model.network_online || model.is_refreshing || !model.bags_has_more {
                        return;
                    }

                    let Some(location) = model.resolver.effective() else {
                        return;
                    };

                    let next_page = model.bags_page + 1;
                    match PendingRequest::fetch_bags(
                        location.coordinate,
                        next_page,
                        &model.filter_options,
                    ) {
                        Ok(request) => {
                            model.is_refreshing = true;
                            Self::send_api_request(request, model, caps);
                        }
                        Err(e) => model.set_error(e.into()),
                    }
                    caps.render().render();
                }

                Event::FilterOptionsChanged(options) => {
                    model.filter_options = options;
                    Self::persist_filter_options(model, caps);

                    if model.state == AppState::Ready {
                        Self::fetch_collections(model, caps);
                    }
                    caps.render().render();
                }

                Event::FavoriteToggleRequested { bag_id } => {
                    let bag_id = BagId::new(bag_id);

                    if !model.network_online {
                        model.show_toast("No internet connection", ToastKind::Warning);
                        caps.render().render();
                        return;
                    }

                    if model.favorite_mutations.has_pending_for(&bag_id) {
                        return;
                    }

                    let Some(previous) = model.favorite_value(&bag_id) else {
                        caps.telemetry().warn("toggle_unknown_bag", bag_id.as_str());
                        return;
                    };

                    let proposed = !previous;
                    let mutation_id =
                        model.favorite_mutations.begin(bag_id.clone(), previous, proposed);

                    let request = match PendingRequest::toggle_favorite(
                        &bag_id,
                        mutation_id.clone(),
                        previous,
                    ) {
                        Ok(request) => request,
                        Err(e) => {
                            model.favorite_mutations.rollback(&mutation_id);
                            model.set_error(e.into());
                            caps.render().render();
                            return;
                        }
                    };

                    // Optimistic flip: the UI reflects the change with zero
                    // latency, reconciled when the server answers.
                    model.apply_favorite_value(&bag_id, proposed);
                    caps.render().render();

                    Self::send_api_request(request, model, caps);
                }

                Event::ApiResponse { request, result } => {
                    Self::handle_api_response(*request, &result, model, caps);
                    caps.render().render();
                }

                Event::RefreshTokenResponse { result } => {
                    Self::handle_refresh_settled(&result, model, caps);
                    caps.render().render();
                }

                Event::DismissError => {
                    model.clear_error();
                    caps.render().render();
                }

                Event::DismissToast => {
                    model.clear_toast();
                    caps.render().render();
                }
            }
        }

        fn view(&self, model: &Model) -> ViewModel {
            let effective = model.resolver.effective();

            let to_bag_view = |bag: &Bag| -> BagView {
                let distance = bag.distance_meters.or_else(|| {
                    let here = effective?.coordinate;
                    let there = ValidatedCoordinate::new(bag.latitude, bag.longitude).ok()?;
                    Some(haversine_distance(here, there))
                });

                BagView {
                    id: bag.id.as_str().to_string(),
                    title: bag.title.clone(),
                    store_name: bag.store_name.clone(),
                    price_text: format_price(bag.price_cents, &bag.currency),
                    distance_text: distance.map_or_else(|| "—".to_string(), format_distance),
                    pickup_start: bag.pickup_start.to_rfc3339(),
                    pickup_end: bag.pickup_end.to_rfc3339(),
                    items_left: bag.items_left,
                    is_favorite: bag.is_favorite,
                    image_url: bag.image_url.as_ref().map(|u| u.as_str().to_string()),
                }
            };

            ViewModel {
                state: model.state,
                is_logged_in: model.is_logged_in(),
                user_name: model.user.as_ref().map(|u| u.name.clone()),
                has_location: model.has_location(),
                effective_location: effective.map(|l| LocationView {
                    latitude: l.coordinate.lat(),
                    longitude: l.coordinate.lng(),
                    source: l.source,
                }),
                manual_address_label: model.resolver.manual_label().map(str::to_string),
                bags: model.bags.iter().map(&to_bag_view).collect(),
                favorites: model.favorites.iter().map(&to_bag_view).collect(),
                has_more_bags: model.bags_has_more,
                is_refreshing: model.is_refreshing,
                online: model.network_online,
                filter_options: model.filter_options.clone(),
                error: model.active_error.as_ref().map(UserFacingError::from),
                toast: model.active_toast.as_ref().map(ToastView::from),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_bag(id: &str, is_favorite: bool) -> Bag {
        let pickup_start = DateTime::<Utc>::from_timestamp(1_773_480_413, 0).unwrap();
        Bag {
            id: BagId::new(id),
            store_name: "Corner Bakery".into(),
            title: "Surprise Bag".into(),
            description: None,
            price_cents: 499,
            currency: "EUR".into(),
            pickup_start,
            pickup_end: pickup_start + chrono::Duration::hours(2),
            latitude: 55.0,
            longitude: 12.0,
            distance_meters: None,
            items_left: 3,
            is_favorite,
            image_url: None,
        }
    }

    mod error_tests {
        use super::*;

        #[test]
        fn unauthorized_maps_to_authentication() {
            let error = AppError::from(ApiError::Unauthorized);
            assert_eq!(error.kind, ErrorKind::Authentication);
            assert!(error
                .user_facing_message()
                .contains("Please sign in again"));
        }

        #[test]
        fn network_errors_are_retryable() {
            let error = AppError::from(ApiError::Network {
                cause: "dns".into(),
            });
            assert_eq!(error.kind, ErrorKind::Network);
            assert!(error.is_retryable());
        }

        #[test]
        fn decoding_errors_are_fatal() {
            let error = AppError::from(ApiError::Decoding {
                cause: "bad json".into(),
            });
            assert_eq!(error.severity, ErrorSeverity::Fatal);
            assert!(!error.is_retryable());
        }

        #[test]
        fn server_error_carries_message() {
            let error = AppError::from(ApiError::Server {
                message: "inventory closed".into(),
            });
            assert_eq!(error.message, "inventory closed");
        }

        #[test]
        fn display_includes_code_and_internal() {
            let error = AppError::new(ErrorKind::Network, "Network error")
                .with_internal("connection refused");
            let rendered = error.to_string();
            assert!(rendered.contains("NETWORK_ERROR"));
            assert!(rendered.contains("connection refused"));
        }
    }

    mod coordinate_tests {
        use super::*;

        #[test]
        fn valid_coordinates() {
            assert!(ValidatedCoordinate::new(0.0, 0.0).is_ok());
            assert!(ValidatedCoordinate::new(90.0, 180.0).is_ok());
            assert!(ValidatedCoordinate::new(-90.0, -180.0).is_ok());
        }

        #[test]
        fn out_of_range_latitude() {
            assert!(matches!(
                ValidatedCoordinate::new(91.0, 0.0),
                Err(CoordinateError::LatitudeOutOfRange(_))
            ));
        }

        #[test]
        fn out_of_range_longitude() {
            assert!(matches!(
                ValidatedCoordinate::new(0.0, -181.0),
                Err(CoordinateError::LongitudeOutOfRange(_))
            ));
        }

        #[test]
        fn non_finite_rejected() {
            assert!(matches!(
                ValidatedCoordinate::new(f64::NAN, 0.0),
                Err(CoordinateError::NonFinite)
            ));
            assert!(matches!(
                ValidatedCoordinate::new(0.0, f64::INFINITY),
                Err(CoordinateError::NonFinite)
            ));
        }

        #[test]
        fn same_point_distance_is_zero() {
            let p = ValidatedCoordinate::new(51.5074, -0.1278).unwrap();
            assert_eq!(haversine_distance(p, p), 0.0);
        }

        #[test]
        fn london_paris_distance() {
            let london = ValidatedCoordinate::new(51.5074, -0.1278).unwrap();
            let paris = ValidatedCoordinate::new(48.8566, 2.3522).unwrap();
            let distance = haversine_distance(london, paris);
            assert!((distance - 343_500.0).abs() < 10_000.0);
        }
    }

    mod format_tests {
        use super::*;

        #[test]
        fn distance_formatting() {
            assert_eq!(format_distance(0.0), "0 m");
            assert_eq!(format_distance(999.0), "999 m");
            assert_eq!(format_distance(1500.0), "1.5 km");
            assert_eq!(format_distance(15000.0), "15 km");
            assert_eq!(format_distance(f64::NAN), "Unknown");
            assert_eq!(format_distance(-1.0), "Unknown");
        }

        #[test]
        fn price_formatting() {
            assert_eq!(format_price(499, "EUR"), "€4.99");
            assert_eq!(format_price(1000, "USD"), "$10.00");
            assert_eq!(format_price(305, "GBP"), "£3.05");
            assert_eq!(format_price(700, "DKK"), "7.00 DKK");
        }
    }

    mod pipeline_tests {
        use super::*;
        use crate::capabilities::{HttpError, HttpHeaders, HttpOutput};

        fn output(status: u16, body: &[u8]) -> HttpResult {
            Ok(HttpOutput {
                status,
                headers: HttpHeaders::new(),
                body: body.to_vec(),
                request_id: "req-1".into(),
            })
        }

        #[test]
        fn two_xx_is_success() {
            let result = output(200, br#"{"success":true,"data":{}}"#);
            assert!(matches!(
                classify_response(&result),
                ResponseDisposition::Success(_)
            ));
        }

        #[test]
        fn four_oh_one_routes_to_refresh_path() {
            let result = output(401, b"");
            assert_eq!(
                classify_response(&result),
                ResponseDisposition::Unauthorized
            );
        }

        #[test]
        fn other_status_uses_envelope_message() {
            let result = output(422, br#"{"success":false,"error":"bag sold out"}"#);
            assert_eq!(
                classify_response(&result),
                ResponseDisposition::Failure(ApiError::Server {
                    message: "bag sold out".into()
                })
            );
        }

        #[test]
        fn other_status_without_envelope_synthesizes_message() {
            let result = output(503, b"<html>oops</html>");
            assert_eq!(
                classify_response(&result),
                ResponseDisposition::Failure(ApiError::Server {
                    message: "Server error: 503".into()
                })
            );
        }

        #[test]
        fn transport_failure_is_network_error() {
            let result: HttpResult = Err(HttpError::Timeout { timeout_ms: 30_000 });
            assert!(matches!(
                classify_response(&result),
                ResponseDisposition::Failure(ApiError::Network { .. })
            ));
        }

        #[test]
        fn login_request_is_unauthenticated() {
            let request = PendingRequest::login("a@b.c", "hunter2").unwrap();
            assert_eq!(request.method, HttpMethod::Post);
            assert_eq!(request.path.as_str(), "/api/v1/auth/login");
            assert!(!request.authenticated);
            assert!(request.retry_on_unauthorized);
        }

        #[test]
        fn fetch_bags_path_carries_coordinates_and_page() {
            let coordinate = ValidatedCoordinate::new(55.6761, 12.5683).unwrap();
            let request =
                PendingRequest::fetch_bags(coordinate, 2, &FilterOptions::default()).unwrap();
            let path = request.path.as_str();
            assert!(path.starts_with("/api/v1/bags?lat=55.676100&lng=12.568300"));
            assert!(path.contains("page=2"));
            assert!(request.authenticated);
        }

        #[test]
        fn fetch_bags_path_includes_filters() {
            let coordinate = ValidatedCoordinate::new(55.0, 12.0).unwrap();
            let filters = FilterOptions {
                max_price_cents: Some(600),
                dietary: vec![],
                min_items: 2,
            };
            let request = PendingRequest::fetch_bags(coordinate, 1, &filters).unwrap();
            assert!(request.path.as_str().contains("maxPrice=600"));
            assert!(request.path.as_str().contains("minItems=2"));
        }

        #[test]
        fn toggle_request_carries_previous_value() {
            let request = PendingRequest::toggle_favorite(
                &BagId::new("bag-1"),
                "mut-1".into(),
                false,
            )
            .unwrap();
            assert_eq!(request.path.as_str(), "/api/v1/bags/bag-1/favorite");
            assert_eq!(
                request.body.as_deref(),
                Some(br#"{"wasFavorited":false}"#.as_slice())
            );
        }

        #[test]
        fn debug_redacts_request_body() {
            let request = PendingRequest::login("a@b.c", "hunter2").unwrap();
            let rendered = format!("{request:?}");
            assert!(!rendered.contains("hunter2"));
            assert!(rendered.contains("body_len"));
        }
    }

    mod model_tests {
        use super::*;

        #[test]
        fn default_model_is_loading_and_logged_out() {
            let model = Model::default();
            assert_eq!(model.state, AppState::Loading);
            assert!(!model.is_logged_in());
            assert!(!model.has_location());
            assert!(model.bags.is_empty());
        }

        #[test]
        fn favorite_value_looks_in_both_collections() {
            let mut model = Model::default();
            model.bags.push(test_bag("bag-1", false));
            model.favorites.push(test_bag("bag-2", true));

            assert_eq!(model.favorite_value(&BagId::new("bag-1")), Some(false));
            assert_eq!(model.favorite_value(&BagId::new("bag-2")), Some(true));
            assert_eq!(model.favorite_value(&BagId::new("bag-3")), None);
        }

        #[test]
        fn applying_favorite_updates_both_collections() {
            let mut model = Model::default();
            model.bags.push(test_bag("bag-1", false));

            model.apply_favorite_value(&BagId::new("bag-1"), true);
            assert!(model.bags[0].is_favorite);
            assert_eq!(model.favorites.len(), 1);

            model.apply_favorite_value(&BagId::new("bag-1"), false);
            assert!(!model.bags[0].is_favorite);
            assert!(model.favorites.is_empty());
        }

        #[test]
        fn collection_limit_is_enforced() {
            let mut model = Model::default();
            for i in 0..(MAX_CACHED_BAGS + 10) {
                model.bags.push(test_bag(&format!("bag-{i}"), false));
            }
            model.enforce_collection_limits();
            assert_eq!(model.bags.len(), MAX_CACHED_BAGS);
        }

        #[test]
        fn toast_lifecycle() {
            let mut model = Model::default();
            model.show_toast("Saved", ToastKind::Success);
            assert_eq!(model.active_toast.as_ref().unwrap().duration_ms, 2000);
            model.clear_toast();
            assert!(model.active_toast.is_none());
        }

        #[test]
        fn migration_reads_complete_only_after_both() {
            let mut reads = MigrationReads::default();
            reads.record(LegacySlot::Access, Some("a".into()));
            assert!(reads.complete().is_none());

            reads.record(LegacySlot::Refresh, None);
            assert_eq!(reads.complete(), Some((Some("a".to_string()), None)));
        }
    }

    mod event_tests {
        use super::*;

        #[test]
        fn event_default_is_noop() {
            assert!(matches!(Event::default(), Event::Noop));
        }

        #[test]
        fn event_names() {
            assert_eq!(Event::RefreshRequested.name(), "refresh_requested");
            assert_eq!(Event::SignOutRequested.name(), "sign_out_requested");
            assert_eq!(
                Event::FavoriteToggleRequested {
                    bag_id: "x".into()
                }
                .name(),
                "favorite_toggle_requested"
            );
        }

        #[test]
        fn user_initiated_classification() {
            assert!(Event::RefreshRequested.is_user_initiated());
            assert!(Event::SignOutRequested.is_user_initiated());
            assert!(!Event::Noop.is_user_initiated());
            assert!(!Event::RefreshTokenResponse {
                result: Box::new(Err(capabilities::HttpError::Cancelled))
            }
            .is_user_initiated());
        }

        #[test]
        fn sensitive_values_are_redacted_in_debug() {
            let event = Event::LoginSubmitted {
                email: "a@b.c".into(),
                password: Sensitive::new("hunter2"),
            };
            let rendered = format!("{event:?}");
            assert!(!rendered.contains("hunter2"));
            assert!(rendered.contains("[REDACTED]"));
        }
    }

    mod view_tests {
        use super::*;
        use crate::app::App;
        use crux_core::App as _;

        #[test]
        fn view_reflects_logged_out_default() {
            let app = App;
            let view = app.view(&Model::default());
            assert!(!view.is_logged_in);
            assert!(!view.has_location);
            assert!(view.bags.is_empty());
            assert!(view.error.is_none());
        }

        #[test]
        fn view_formats_bags() {
            let mut model = Model::default();
            model.bags.push(test_bag("bag-1", true));

            let app = App;
            let view = app.view(&model);
            let bag = &view.bags[0];
            assert_eq!(bag.price_text, "€4.99");
            assert!(bag.is_favorite);
            // No effective location and no server distance: placeholder.
            assert_eq!(bag.distance_text, "—");
        }

        #[test]
        fn view_computes_distance_from_effective_location() {
            let mut model = Model::default();
            model.bags.push(test_bag("bag-1", false));
            let timer = model
                .resolver
                .note_device_fix(ValidatedCoordinate::new(55.0, 12.0).unwrap())
                .unwrap();
            model.resolver.debounce_elapsed(timer).unwrap();

            let app = App;
            let view = app.view(&model);
            // Bag sits exactly at the fix.
            assert_eq!(view.bags[0].distance_text, "0 m");
            assert_eq!(
                view.effective_location.unwrap().source,
                location::LocationSource::Device
            );
        }

        #[test]
        fn view_surfaces_error_with_retry_flag() {
            let mut model = Model::default();
            model.set_error(AppError::new(ErrorKind::Network, "Network error"));

            let app = App;
            let view = app.view(&model);
            let error = view.error.unwrap();
            assert!(error.is_retryable);
            assert_eq!(error.code, "NETWORK_ERROR");
        }
    }
}
