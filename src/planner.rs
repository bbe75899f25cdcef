use reqwest::Client;
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;

use crate::config::RouterConfig;
use crate::error::{Error, PlannerError, Result};
use crate::itinerary::PlanResponse;
use crate::types::{BoundingCoordinates, Location};

/// Resolves a free-text address to a coordinate.
#[allow(async_fn_in_trait)]
pub trait Geocoder {
    async fn geocode(&self, address: &str) -> Result<Location>;
}

/// External transit planner. One call is one attempt; retries are the caller's business.
#[allow(async_fn_in_trait)]
pub trait TransitPlanner {
    async fn plan(&self, origin: &Location, destination: &Location) -> std::result::Result<PlanResponse, PlannerError>;
}

/// Runs `operation` up to `attempts` times, sleeping `delay` after each
/// retryable failure. Non-retryable failures are returned at once.
pub async fn with_retries<F, Fut, T>(attempts: u32, delay: Duration, operation: F) -> std::result::Result<T, PlannerError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = std::result::Result<T, PlannerError>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(err) if err.is_retryable() && attempt < attempts => {
                log::warn!("Transit planner attempt {}/{} failed: {}. Retrying in {:?}", attempt, attempts, err, delay);
                attempt += 1;
                pause(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(not(target_arch = "wasm32"))]
async fn pause(delay: Duration) {
    tokio::time::sleep(delay).await;
}

#[cfg(target_arch = "wasm32")]
#[wasm_bindgen::prelude::wasm_bindgen]
extern "C" {
    #[wasm_bindgen(js_name = setTimeout)]
    fn set_timeout(handler: &wasm_bindgen_futures::js_sys::Function, timeout: i32) -> wasm_bindgen::JsValue;
}

#[cfg(target_arch = "wasm32")]
async fn pause(delay: Duration) {
    use wasm_bindgen_futures::js_sys;

    let millis = i32::try_from(delay.as_millis()).unwrap_or(i32::MAX);
    let promise = js_sys::Promise::new(&mut |resolve, _reject| {
        set_timeout(&resolve, millis);
    });
    let _ = wasm_bindgen_futures::JsFuture::from(promise).await;
}

/// OpenTripPlanner client (the MTAG API for Grenoble by default).
pub struct OtpPlanner {
    client: Client,
    url: String,
    mode: String,
    max_walk_distance_m: u32,
    num_itineraries: u32,
    timeout: Duration,
}

impl OtpPlanner {
    pub fn new(config: &RouterConfig) -> Self {
        OtpPlanner {
            client: Client::new(),
            url: format!("{}/routers/default/plan", config.planner_url.trim_end_matches('/')),
            mode: config.planner_mode.clone(),
            max_walk_distance_m: config.max_walk_distance_m,
            num_itineraries: config.num_itineraries,
            timeout: config.planner_timeout(),
        }
    }
}

impl TransitPlanner for OtpPlanner {
    async fn plan(&self, origin: &Location, destination: &Location) -> std::result::Result<PlanResponse, PlannerError> {
        let response = self
            .client
            .get(&self.url)
            .query(&[
                ("fromPlace", format!("{},{}", origin.latitude, origin.longitude)),
                ("toPlace", format!("{},{}", destination.latitude, destination.longitude)),
                ("mode", self.mode.clone()),
                ("maxWalkDistance", self.max_walk_distance_m.to_string()),
                ("numItineraries", self.num_itineraries.to_string()),
            ])
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json::<PlanResponse>().await?)
    }
}

#[derive(Deserialize)]
struct NominatimPlace {
    lat: String,
    lon: String,
}

/// Nominatim search restricted to the configured view box.
pub struct NominatimGeocoder {
    client: Client,
    url: String,
    viewbox: BoundingCoordinates,
    timeout: Duration,
}

impl NominatimGeocoder {
    pub fn new(config: &RouterConfig) -> Self {
        NominatimGeocoder {
            client: Client::new(),
            url: config.geocoder_url.clone(),
            viewbox: config.viewbox.clone(),
            timeout: config.geocoder_timeout(),
        }
    }
}

fn upstream(err: reqwest::Error) -> Error {
    Error::Upstream(format!("geocoder: {}", err))
}

impl Geocoder for NominatimGeocoder {
    async fn geocode(&self, address: &str) -> Result<Location> {
        let viewbox = format!(
            "{},{},{},{}",
            self.viewbox.west_longitude,
            self.viewbox.north_latitude,
            self.viewbox.east_longitude,
            self.viewbox.south_latitude
        );
        let places = self
            .client
            .get(&self.url)
            .query(&[
                ("q", address),
                ("format", "json"),
                ("limit", "1"),
                ("viewbox", viewbox.as_str()),
                ("bounded", "1"),
            ])
            .header(reqwest::header::USER_AGENT, concat!("rust-route-calc/", env!("CARGO_PKG_VERSION")))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(upstream)?
            .error_for_status()
            .map_err(upstream)?
            .json::<Vec<NominatimPlace>>()
            .await
            .map_err(upstream)?;

        let place = places
            .first()
            .ok_or_else(|| Error::AddressNotFound(address.to_string()))?;
        let location = match (place.lat.parse::<f64>(), place.lon.parse::<f64>()) {
            (Ok(latitude), Ok(longitude)) => Location { latitude, longitude },
            _ => return Err(Error::InvalidData(format!("geocoder returned {},{}", place.lat, place.lon))),
        };
        if !self.viewbox.contains(&location) {
            return Err(Error::AddressNotFound(address.to_string()));
        }
        log::debug!("Geocoded '{}' to {},{}", address, location.latitude, location.longitude);
        Ok(location)
    }
}

#[cfg(test)]
#[tokio::test]
async fn test_retries_only_transient_failures() {
    use std::cell::Cell;

    let calls = Cell::new(0);
    let result = with_retries(3, Duration::ZERO, || {
        calls.set(calls.get() + 1);
        let n = calls.get();
        async move {
            if n < 3 {
                Err(PlannerError::ServerError(502))
            } else {
                Ok(n)
            }
        }
    })
    .await;
    assert_eq!(result, Ok(3));

    calls.set(0);
    let result: std::result::Result<(), _> = with_retries(3, Duration::ZERO, || {
        calls.set(calls.get() + 1);
        async { Err(PlannerError::Unreachable("connection refused".to_string())) }
    })
    .await;
    assert!(result.is_err());
    assert_eq!(calls.get(), 1);
}

#[cfg(test)]
#[tokio::test]
async fn test_retry_budget_is_bounded() {
    use std::cell::Cell;

    let calls = Cell::new(0);
    let result: std::result::Result<(), _> = with_retries(3, Duration::from_millis(5), || {
        calls.set(calls.get() + 1);
        async { Err(PlannerError::Timeout) }
    })
    .await;
    assert_eq!(result, Err(PlannerError::Timeout));
    assert_eq!(calls.get(), 3);
}

#[test]
fn test_planner_url_is_normalized() {
    let planner = OtpPlanner::new(&RouterConfig::default());
    assert_eq!(planner.url, "https://data.mobilites-m.fr/api/routers/default/plan");
}
