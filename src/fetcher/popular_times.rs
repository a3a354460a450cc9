use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use super::{FetchError, OccupancySource};
use crate::catalog::Venue;

pub const DEFAULT_DETAILS_URL: &str = "https://maps.googleapis.com/maps/api/place/details/json";
pub const DEFAULT_SEARCH_URL: &str = "https://www.google.com/search";

const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

/// Protobuf-ish map viewport parameter the search endpoint expects.
const SEARCH_PB: &str = "!4m12!1m3!1d4005.9771522653964!2d-122.42072974863942!3d37.8077459796541\
!2m3!1f0!2f0!3f0!3m2!1i1125!2i976!4f13.1!7i20!10b1!12m6!2m3!5m1!6e2!20e3!10b1!16b1!19m3!2m2\
!1i392!2i106!20m61!2m2!1i203!2i100!3m2!2i4!5b1!6m6!1m2!1i86!2i86!1m2!1i408!2i200!7m46!1m3!1e1\
!2b0!3e3!1m3!1e2!2b1!3e2!1m3!1e2!2b0!3e3!1m3!1e3!2b0!3e3!1m3!1e4!2b0!3e3!1m3!1e8!2b0!3e3!1m3\
!1e3!2b1!3e2!1m3!1e9!2b1!3e2!1m3!1e10!2b0!3e3!1m3!1e10!2b1!3e2!1m3!1e10!2b0!3e4!2b1!4b1!9b0\
!22m6!1sa9fVWea_MsX8adX8j8AE:1!7e81!12e3!17sa9fVWea_MsX8adX8j8AE:564!18e15!24m15!2b1!5m4!2b1\
!3b1!5b1!6b1!10m1!8e3!17b1!24b1!25b1!26b1!30m1!2b1!36b1!26m3!2m2!1i80!2i92!37m1!1e81!42b1\
!47m0!49m1!3b1";

/// Path of the place record inside the decoded search payload.
const PLACE_INFO_PATH: [usize; 4] = [0, 1, 0, 14];
/// Path of the live popularity inside the place record.
const CURRENT_POPULARITY_PATH: [usize; 3] = [84, 7, 1];

#[derive(Debug, Deserialize)]
struct DetailsResponse {
    status: String,
    #[serde(default)]
    error_message: Option<String>,
    result: Option<PlaceDetails>,
}

#[derive(Debug, Deserialize)]
struct PlaceDetails {
    name: Option<String>,
    formatted_address: Option<String>,
}

/// Live "popular times" estimate, read the way the public maps page does.
///
/// Two requests per venue: a place-details lookup (credentialed) to get the
/// searchable name and address, then a maps search whose payload carries the
/// live estimate. The payload layout is undocumented and may change; any
/// deviation surfaces as [`FetchError::Malformed`] or "no live data".
pub struct PopularTimesClient {
    client: Client,
    api_key: String,
    details_url: String,
    search_url: String,
}

impl PopularTimesClient {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            details_url: DEFAULT_DETAILS_URL.to_string(),
            search_url: DEFAULT_SEARCH_URL.to_string(),
        })
    }

    pub fn with_endpoints(mut self, details_url: impl Into<String>, search_url: impl Into<String>) -> Self {
        self.details_url = details_url.into();
        self.search_url = search_url.into();
        self
    }

    async fn search_query(&self, venue: &Venue) -> Result<String, FetchError> {
        let response = self
            .client
            .get(&self.details_url)
            .query(&[
                ("placeid", venue.place_ref.as_str()),
                ("key", self.api_key.as_str()),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(FetchError::Status(response.status().as_u16()));
        }

        let details: DetailsResponse = response
            .json()
            .await
            .map_err(|err| FetchError::Malformed(format!("place details: {err}")))?;
        if details.status != "OK" {
            let reason = match details.error_message {
                Some(message) => format!("{}: {message}", details.status),
                None => details.status,
            };
            return Err(FetchError::Rejected(reason));
        }

        let place = details
            .result
            .ok_or_else(|| FetchError::Malformed("place details without result".into()))?;
        let name = place.name.unwrap_or_else(|| venue.name.clone());
        let address = place.formatted_address.or_else(|| venue.address.clone());

        Ok(match address {
            Some(address) => format!("{name} {address}"),
            None => name,
        })
    }
}

#[async_trait]
impl OccupancySource for PopularTimesClient {
    async fn current_popularity(&self, venue: &Venue) -> Result<Option<i64>, FetchError> {
        let query = self.search_query(venue).await?;

        let response = self
            .client
            .get(&self.search_url)
            .query(&[
                ("tbm", "map"),
                ("tch", "1"),
                ("hl", "en"),
                ("q", query.as_str()),
                ("pb", SEARCH_PB),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(FetchError::Status(response.status().as_u16()));
        }

        let body = response.text().await?;
        parse_search_body(&body)
    }
}

/// Extracts the live popularity from a maps search response body.
///
/// The body is a JSON object terminated by a `/*""*/` marker; its `d` field
/// holds a second JSON document behind an XSSI guard.
pub(crate) fn parse_search_body(body: &str) -> Result<Option<i64>, FetchError> {
    let envelope = body.split("/*\"\"*/").next().unwrap_or(body);
    let end = envelope
        .rfind('}')
        .ok_or_else(|| FetchError::Malformed("search body has no JSON envelope".into()))?;
    let outer: Value = serde_json::from_str(&envelope[..=end])
        .map_err(|err| FetchError::Malformed(format!("search envelope: {err}")))?;

    let inner = outer
        .get("d")
        .and_then(Value::as_str)
        .ok_or_else(|| FetchError::Malformed("search envelope without payload".into()))?;
    let inner = inner.trim_start().trim_start_matches(")]}'");
    let payload: Value = serde_json::from_str(inner)
        .map_err(|err| FetchError::Malformed(format!("search payload: {err}")))?;

    let Some(info) = index_path(&payload, &PLACE_INFO_PATH) else {
        return Ok(None);
    };
    Ok(index_path(info, &CURRENT_POPULARITY_PATH).and_then(Value::as_i64))
}

fn index_path<'a>(value: &'a Value, path: &[usize]) -> Option<&'a Value> {
    path.iter()
        .try_fold(value, |current, &idx| current.get(idx))
        .filter(|found| !found.is_null())
}
