use chrono::{NaiveDate, NaiveTime};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;

use super::address::{self, Address};
use super::element_lines;

const ROW_SELECTORS: &[&str] = &[
    "[data-work-order]",
    "tr.work-order",
    ".work-order-row",
    ".work-list-item",
    "table tbody tr",
];

/// Cell classes read into `scraped_data` and the typed fields.
const CELL_CLASSES: &[&str] = &[
    "work-order-id",
    "customer-name",
    "store-number",
    "site-name",
    "address",
    "service",
    "visit-date",
    "instructions",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceCode {
    /// 2861
    AllDispensers,
    /// 2862
    SpecificDispensers,
    /// 3002
    AllDispensersOpenNeck,
    /// 3146
    OpenNeckProver,
    Other(String),
}

impl ServiceCode {
    pub fn from_code(code: &str) -> Self {
        match code.trim() {
            "2861" => ServiceCode::AllDispensers,
            "2862" => ServiceCode::SpecificDispensers,
            "3002" => ServiceCode::AllDispensersOpenNeck,
            "3146" => ServiceCode::OpenNeckProver,
            other => ServiceCode::Other(other.to_string()),
        }
    }

    pub fn code(&self) -> &str {
        match self {
            ServiceCode::AllDispensers => "2861",
            ServiceCode::SpecificDispensers => "2862",
            ServiceCode::AllDispensersOpenNeck => "3002",
            ServiceCode::OpenNeckProver => "3146",
            ServiceCode::Other(code) => code,
        }
    }

    pub fn description(&self) -> Option<&'static str> {
        match self {
            ServiceCode::AllDispensers => Some("AccuMeasure - All Dispensers"),
            ServiceCode::SpecificDispensers => Some("AccuMeasure - Specific Dispensers"),
            ServiceCode::AllDispensersOpenNeck => {
                Some("AccuMeasure - All Dispensers (Open Neck Prover)")
            }
            ServiceCode::OpenNeckProver => Some("Open Neck Prover"),
            ServiceCode::Other(_) => None,
        }
    }

    pub fn covers_all_dispensers(&self) -> bool {
        matches!(
            self,
            ServiceCode::AllDispensers | ServiceCode::AllDispensersOpenNeck
        )
    }

    pub fn uses_open_neck_prover(&self) -> bool {
        matches!(
            self,
            ServiceCode::AllDispensersOpenNeck | ServiceCode::OpenNeckProver
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapedWorkOrder {
    pub external_id: String,
    pub detail_url: Option<String>,
    pub store_number: Option<String>,
    pub customer_name: Option<String>,
    pub site_name: Option<String>,
    pub address: Address,
    pub service_code: Option<ServiceCode>,
    pub service_name: Option<String>,
    pub service_quantity: Option<u32>,
    pub visit_date: Option<NaiveDate>,
    pub visit_time: Option<NaiveTime>,
    pub instructions: Option<String>,
    pub scraped_data: BTreeMap<String, String>,
}

static EXTERNAL_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bW-\d{4,}\b").expect("work order id pattern"));

static STORE_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#\s?(\d{2,7})\b").expect("store number pattern"));

static SERVICE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:(?P<qty>\d+)\s*x\s*)?(?P<code>\d{4})\b(?:\s*[-–:]\s*(?P<name>.+))?")
        .expect("service pattern")
});

static VISIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?P<date>\d{1,2}/\d{1,2}/\d{4})(?:\s+(?P<time>\d{1,2}:\d{2}\s*[AP]M))?")
        .expect("visit date pattern")
});

static ZIP_TAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r",?\s+[A-Za-z]{2}\.?,?\s+\d{5}(?:-\d{4})?$").expect("zip tail pattern")
});

static PAREN_COUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\(?\b(\d{1,2})\)?\s+dispensers?\b").expect("dispenser count pattern")
});

static DISPENSER_RANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bdispensers?\s*:?\s*#?(\d{1,2})\s*[-–]\s*#?(\d{1,2})\b")
        .expect("dispenser range pattern")
});

/// Read every work order row from the list page.
pub fn parse_work_order_list(html: &str) -> Vec<ScrapedWorkOrder> {
    let document = Html::parse_document(html);

    let mut orders: Vec<ScrapedWorkOrder> = ROW_SELECTORS
        .iter()
        .filter_map(|s| Selector::parse(s).ok())
        .map(|selector| {
            document
                .select(&selector)
                .filter_map(parse_row)
                .collect::<Vec<_>>()
        })
        .find(|rows| !rows.is_empty())
        .unwrap_or_default();

    let mut seen = Vec::new();
    orders.retain(|o| {
        if seen.contains(&o.external_id) {
            tracing::debug!(external_id = %o.external_id, "Dropping duplicate work order row");
            false
        } else {
            seen.push(o.external_id.clone());
            true
        }
    });
    orders
}

/// Parse one row; `None` when it carries no `W-` id.
pub fn parse_row(row: ElementRef<'_>) -> Option<ScrapedWorkOrder> {
    let lines = element_lines(row);
    let text = lines.join("\n");
    let external_id = EXTERNAL_ID.find(&text)?.as_str().to_string();

    let mut scraped_data = BTreeMap::new();
    for class in CELL_CLASSES {
        if let Some(value) = cell_text(row, class) {
            scraped_data.insert(class.to_string(), value);
        }
    }
    let cell = |class: &str| scraped_data.get(class).cloned();

    let detail_url = Selector::parse("a[href]")
        .ok()
        .and_then(|s| {
            row.select(&s)
                .find(|a| EXTERNAL_ID.is_match(&a.text().collect::<String>()))
        })
        .and_then(|a| a.value().attr("href"))
        .map(str::to_string);

    let store_number = cell("store-number")
        .as_deref()
        .or(Some(text.as_str()))
        .and_then(|t| STORE_NUMBER.captures(t))
        .map(|c| format!("#{}", &c[1]));

    let address = match cell("address") {
        Some(raw) => address::parse(&raw),
        None => address_from_lines(&lines),
    };

    // Without a service cell, only trust lines that name a catalogued code
    // or a quantity; bare four-digit numbers are usually house numbers.
    let service_source = cell("service").or_else(|| {
        lines
            .iter()
            .find(|l| {
                SERVICE
                    .captures(l)
                    .map(|c| {
                        c.name("qty").is_some()
                            || !matches!(ServiceCode::from_code(&c["code"]), ServiceCode::Other(_))
                    })
                    .unwrap_or(false)
            })
            .cloned()
    });
    let (service_code, service_name, service_quantity) = match service_source
        .as_deref()
        .and_then(|s| SERVICE.captures(s))
    {
        Some(caps) => {
            let code = ServiceCode::from_code(&caps["code"]);
            let name = caps
                .name("name")
                .map(|m| m.as_str().trim().to_string())
                .or_else(|| code.description().map(str::to_string));
            let quantity = caps.name("qty").and_then(|q| q.as_str().parse().ok());
            (Some(code), name, quantity)
        }
        None => (None, None, None),
    };

    let visit_source = cell("visit-date").unwrap_or_else(|| text.clone());
    let (visit_date, visit_time) = match VISIT.captures(&visit_source) {
        Some(caps) => (
            NaiveDate::parse_from_str(&caps["date"], "%m/%d/%Y").ok(),
            caps.name("time").and_then(|t| {
                let normalized = t.as_str().to_uppercase().replace(' ', "");
                NaiveTime::parse_from_str(&normalized, "%I:%M%p").ok()
            }),
        ),
        None => (None, None),
    };

    Some(ScrapedWorkOrder {
        external_id,
        detail_url,
        store_number,
        customer_name: cell("customer-name"),
        site_name: cell("site-name"),
        address,
        service_code,
        service_name,
        service_quantity,
        visit_date,
        visit_time,
        instructions: cell("instructions"),
        scraped_data,
    })
}

impl ScrapedWorkOrder {
    pub fn dispenser_hint(&self) -> Option<u32> {
        dispenser_hint(
            self.instructions.as_deref(),
            self.service_code.as_ref(),
            self.service_quantity,
        )
    }
}

/// Dispenser count stated by the portal: `(6) dispensers` or
/// `Dispensers: 1-8` in the instructions, else the quantity on an
/// all-dispensers service line.
pub fn dispenser_hint(
    instructions: Option<&str>,
    service: Option<&ServiceCode>,
    quantity: Option<u32>,
) -> Option<u32> {
    let from_count = instructions
        .and_then(|i| PAREN_COUNT.captures(i))
        .and_then(|c| c[1].parse().ok());

    let from_range = || {
        let caps = DISPENSER_RANGE.captures(instructions?)?;
        let low: u32 = caps[1].parse().ok()?;
        let high: u32 = caps[2].parse().ok()?;
        (high >= low).then(|| high - low + 1)
    };

    from_count.or_else(from_range).or_else(|| {
        service
            .filter(|code| code.covers_all_dispensers())
            .and(quantity)
    })
}

fn cell_text(row: ElementRef<'_>, class: &str) -> Option<String> {
    let selector = Selector::parse(&format!(".{}", class)).ok()?;
    let element = row.select(&selector).next()?;
    let text = element_lines(element).join("\n");
    if text.trim().is_empty() { None } else { Some(text) }
}

fn address_from_lines(lines: &[String]) -> Address {
    match lines.iter().position(|l| ZIP_TAIL.is_match(l)) {
        Some(0) => address::parse(&lines[0]),
        Some(index) => address::parse(&format!("{}\n{}", lines[index - 1], lines[index])),
        None => Address::default(),
    }
}
