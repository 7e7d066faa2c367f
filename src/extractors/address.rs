use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub street: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
    pub raw: String,
}

static STATE_CODES: &[&str] = &[
    "AL", "AK", "AZ", "AR", "CA", "CO", "CT", "DE", "DC", "FL", "GA", "HI", "ID", "IL", "IN",
    "IA", "KS", "KY", "LA", "ME", "MD", "MA", "MI", "MN", "MS", "MO", "MT", "NE", "NV", "NH",
    "NJ", "NM", "NY", "NC", "ND", "OH", "OK", "OR", "PA", "RI", "SC", "SD", "TN", "TX", "UT",
    "VT", "VA", "WA", "WV", "WI", "WY", "PR", "VI", "GU", "AS", "MP",
];

static WITH_STREET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<street>.+),\s*(?P<city>[^,]+?),?\s+(?P<state>[A-Za-z]{2})\.?,?\s+(?P<zip>\d{5}(?:-\d{4})?)$",
    )
    .expect("address pattern")
});

static CITY_ONLY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<city>[^,]+?),?\s+(?P<state>[A-Za-z]{2})\.?,?\s+(?P<zip>\d{5}(?:-\d{4})?)$")
        .expect("city pattern")
});

/// Parse a site address as it appears in WorkFossa cells, either on one
/// line or split across several.
pub fn parse(text: &str) -> Address {
    let lines: Vec<String> = text
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .map(|line| line.trim_matches(',').trim().to_string())
        .filter(|line| !line.is_empty())
        .collect();

    if lines.is_empty() {
        return Address::default();
    }

    let joined = lines.join(", ");

    if let Some(caps) = WITH_STREET.captures(&joined) {
        let state = caps["state"].to_uppercase();
        if is_state_code(&state) {
            return Address {
                street: non_empty(&caps["street"]),
                city: non_empty(&caps["city"]),
                state: Some(state),
                zip: Some(caps["zip"].to_string()),
                raw: joined,
            };
        }
    }

    if let Some(caps) = CITY_ONLY.captures(&joined) {
        let state = caps["state"].to_uppercase();
        if is_state_code(&state) {
            return Address {
                street: None,
                city: non_empty(&caps["city"]),
                state: Some(state),
                zip: Some(caps["zip"].to_string()),
                raw: joined,
            };
        }
    }

    Address {
        street: Some(joined.clone()),
        city: None,
        state: None,
        zip: None,
        raw: joined,
    }
}

pub fn is_state_code(code: &str) -> bool {
    STATE_CODES.contains(&code)
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim().trim_matches(',').trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

impl Address {
    pub fn is_complete(&self) -> bool {
        self.street.is_some() && self.city.is_some() && self.state.is_some() && self.zip.is_some()
    }

    /// `street, city, ST zip`, skipping whatever is missing.
    pub fn one_line(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        if let Some(street) = &self.street {
            parts.push(street.clone());
        }
        if let Some(city) = &self.city {
            parts.push(city.clone());
        }

        let tail = [self.state.as_deref(), self.zip.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        if !tail.is_empty() {
            parts.push(tail);
        }

        parts.join(", ")
    }
}
