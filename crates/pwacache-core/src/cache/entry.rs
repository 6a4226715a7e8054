use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Request, Response};

/// A response held in a cache store, with the time it was written.
///
/// Entries never expire; the timestamp is informational only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredResponse {
    pub response: Response,
    /// Request header values captured for the names in the response's `Vary`
    #[serde(default)]
    pub vary: Vec<(String, String)>,
    pub cached_at: DateTime<Utc>,
}

impl StoredResponse {
    pub fn new(response: Response) -> Self {
        Self {
            response,
            vary: Vec::new(),
            cached_at: Utc::now(),
        }
    }

    /// Store `response` as the answer to `request`, remembering the request
    /// headers its `Vary` header names.
    pub fn for_request(request: &Request, response: Response) -> Self {
        let vary = response
            .vary()
            .into_iter()
            .filter(|name| name != "*")
            .map(|name| {
                let value = request.header_value(&name).to_string();
                (name, value)
            })
            .collect();

        Self {
            vary,
            ..Self::new(response)
        }
    }

    /// Whether this entry answers `request`. Every header the response varies
    /// on must have the value it had when stored; `Vary: *` never matches.
    pub fn matches(&self, request: &Request) -> bool {
        if self.response.vary().iter().any(|name| name == "*") {
            return false;
        }
        self.vary
            .iter()
            .all(|(name, value)| request.header_value(name) == value)
    }

    pub fn into_response(self) -> Response {
        self.response
    }

    pub fn size(&self) -> usize {
        self.response.body.len()
    }

    /// Time since the entry was written. A timestamp in the future reads as zero.
    pub fn age(&self) -> Duration {
        (Utc::now() - self.cached_at).max(Duration::zero())
    }

    /// Age truncated to its largest whole unit: `45s`, `12m`, `3h`, `2d`.
    pub fn age_label(&self) -> String {
        let age = self.age();
        if age.num_days() > 0 {
            format!("{}d", age.num_days())
        } else if age.num_hours() > 0 {
            format!("{}h", age.num_hours())
        } else if age.num_minutes() > 0 {
            format!("{}m", age.num_minutes())
        } else {
            format!("{}s", age.num_seconds())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{self, HeaderValue};
    use reqwest::Url;

    fn aged(seconds: i64) -> StoredResponse {
        let mut stored = StoredResponse::new(Response::new(200, "body"));
        stored.cached_at = Utc::now() - Duration::seconds(seconds);
        stored
    }

    fn page(accept: &'static str) -> Request {
        let url = Url::parse("http://localhost:3000/").expect("test URL should parse");
        Request::get(url).with_header(header::ACCEPT, HeaderValue::from_static(accept))
    }

    #[test]
    fn test_age_label_truncates_to_largest_unit() {
        assert_eq!(aged(45).age_label(), "45s");
        assert_eq!(aged(5 * 60 + 59).age_label(), "5m");
        assert_eq!(aged(89 * 60).age_label(), "1h");
        assert_eq!(aged(47 * 3600).age_label(), "1d");
    }

    #[test]
    fn test_age_label_future_timestamp() {
        assert_eq!(aged(-300).age_label(), "0s");
    }

    #[test]
    fn test_without_vary_matches_any_headers() {
        let stored = StoredResponse::for_request(&page("text/html"), Response::new(200, "index"));
        assert!(stored.vary.is_empty());
        assert!(stored.matches(&page("application/json")));
    }

    #[test]
    fn test_vary_restricts_matches() {
        let response = Response::new(200, "{}").with_header("Vary", "Accept");
        let stored = StoredResponse::for_request(&page("application/json"), response);

        assert_eq!(stored.vary, vec![("accept".to_string(), "application/json".to_string())]);
        assert!(stored.matches(&page("application/json")));
        assert!(!stored.matches(&page("text/html")));
    }

    #[test]
    fn test_vary_star_never_matches() {
        let response = Response::new(200, "x").with_header("Vary", "*");
        let stored = StoredResponse::for_request(&page("text/html"), response);
        assert!(!stored.matches(&page("text/html")));
    }

    #[test]
    fn test_size_is_body_length() {
        assert_eq!(StoredResponse::new(Response::new(200, "12345")).size(), 5);
    }
}
