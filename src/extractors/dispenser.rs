use regex::Regex;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;

use super::element_lines;
use super::fuel_grade::{self, FuelGrade};

/// Dispenser blocks have moved between these containers over the portal's
/// redesigns. Tried in order; the first one that yields a numbered block wins.
const CANDIDATE_SELECTORS: &[&str] = &[
    "[data-dispenser]",
    ".dispenser",
    ".equipment-item",
    ".dispenser-card",
    "li.equipment",
    ".panel.equipment",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScrapedDispenser {
    pub dispenser_number: String,
    pub numbers: Vec<u32>,
    pub title: Option<String>,
    pub make: Option<String>,
    pub model: Option<String>,
    pub serial_number: Option<String>,
    pub meter_type: Option<String>,
    pub number_of_nozzles: Option<u32>,
    pub stand_alone_code: Option<String>,
    pub fuel_grades: Vec<FuelGrade>,
    /// Every labelled field seen in the block, keyed by upper-cased label.
    pub fields: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TitleParts {
    pub dispenser_number: String,
    pub numbers: Vec<u32>,
    pub fuel_grades: Vec<FuelGrade>,
    pub make: Option<String>,
}

static TITLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*(?:dispenser\s*#?\s*)?(?P<number>\d{1,3}(?:\s*/\s*\d{1,3})?)\s*(?:[-–:]\s*(?P<rest>.*))?$",
    )
    .expect("title pattern")
});

static TITLE_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+[-–]\s+").expect("title segment pattern"));

static LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:^|\s)(?P<label>S/N|SERIAL NUMBER|SERIAL|MAKE|MODEL|GRADES|GRADE|STAND ALONE CODE|NUMBER OF NOZZLES \(PER SIDE\)|METER TYPE)(?:\s*:\s*|\s+|$)",
    )
    .expect("label pattern")
});

static FIRST_INTEGER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d+)").expect("integer pattern"));

/// Parse a heading such as `1/2 - Regular, Plus, Premium - Gilbarco`.
pub fn parse_title(title: &str) -> Option<TitleParts> {
    let caps = TITLE.captures(title.trim())?;

    let dispenser_number: String = caps["number"].chars().filter(|c| !c.is_whitespace()).collect();
    let numbers = dispenser_number
        .split('/')
        .filter_map(|n| n.parse::<u32>().ok())
        .collect();

    let mut fuel_grades = Vec::new();
    let mut make = None;

    if let Some(rest) = caps.name("rest").map(|m| m.as_str().trim()).filter(|r| !r.is_empty()) {
        let segments: Vec<&str> = TITLE_SEGMENT
            .split(rest)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();

        match segments.as_slice() {
            [] => {}
            [only] => {
                let grades = fuel_grade::decode_list(only);
                if !grades.is_empty() && grades.iter().all(FuelGrade::is_known) {
                    fuel_grades = grades;
                } else {
                    make = clean_value(only);
                }
            }
            [grades @ .., last] => {
                for segment in grades {
                    merge_grades(&mut fuel_grades, fuel_grade::decode_list(segment));
                }
                make = clean_value(last);
            }
        }
    }

    Some(TitleParts {
        dispenser_number,
        numbers,
        fuel_grades,
        make,
    })
}

/// Parse the text of one dispenser block. The first line is expected to
/// be the title; returns `None` when no dispenser number can be found.
pub fn parse_block(text: &str) -> Option<ScrapedDispenser> {
    let lines = merge_continuations(text.lines());
    let (title_line, field_lines) = lines.split_first()?;
    let title = parse_title(title_line)?;

    let fields = parse_fields(field_lines);

    let field = |keys: &[&str]| -> Option<String> {
        keys.iter()
            .find_map(|k| fields.get(*k))
            .and_then(|v| clean_value(v))
    };

    let mut fuel_grades = title.fuel_grades.clone();
    if let Some(grades) = field(&["GRADE", "GRADES"]) {
        merge_grades(&mut fuel_grades, fuel_grade::decode_list(&grades));
    }

    let number_of_nozzles = field(&["NUMBER OF NOZZLES (PER SIDE)"])
        .and_then(|v| FIRST_INTEGER.captures(&v).and_then(|c| c[1].parse().ok()));

    Some(ScrapedDispenser {
        dispenser_number: title.dispenser_number,
        numbers: title.numbers,
        title: Some(title_line.clone()),
        make: field(&["MAKE"]).or(title.make),
        model: field(&["MODEL"]),
        serial_number: field(&["S/N", "SERIAL NUMBER", "SERIAL"]),
        meter_type: field(&["METER TYPE"]),
        number_of_nozzles,
        stand_alone_code: field(&["STAND ALONE CODE"]),
        fuel_grades,
        fields,
    })
}

/// Extract every dispenser on a work order's equipment page.
pub fn parse_equipment_page(html: &str) -> Vec<ScrapedDispenser> {
    let document = Html::parse_document(html);

    let mut dispensers = CANDIDATE_SELECTORS
        .iter()
        .filter_map(|s| Selector::parse(s).ok())
        .map(|selector| {
            document
                .select(&selector)
                .filter_map(|element| parse_block(&element_lines(element).join("\n")))
                .collect::<Vec<_>>()
        })
        .find(|found| !found.is_empty())
        .unwrap_or_else(|| {
            tracing::debug!("No dispenser container matched, scanning page text");
            scan_text_blocks(&element_lines(document.root_element()))
        });

    let mut seen = Vec::new();
    dispensers.retain(|d| {
        if seen.contains(&d.dispenser_number) {
            false
        } else {
            seen.push(d.dispenser_number.clone());
            true
        }
    });
    dispensers.sort_by_key(|d| d.numbers.first().copied().unwrap_or(u32::MAX));
    dispensers
}

fn scan_text_blocks(lines: &[String]) -> Vec<ScrapedDispenser> {
    let lines = merge_continuations(lines.iter().map(String::as_str));
    let mut blocks: Vec<Vec<String>> = Vec::new();

    for line in lines {
        // Bare numbers are field values (nozzle counts), not headings
        let is_heading = TITLE
            .captures(&line)
            .and_then(|c| c.name("rest").map(|r| !r.as_str().trim().is_empty()))
            .unwrap_or(false);

        if is_heading {
            blocks.push(vec![line]);
        } else if let Some(block) = blocks.last_mut() {
            block.push(line);
        }
    }

    blocks
        .iter()
        .filter_map(|block| parse_block(&block.join("\n")))
        .collect()
}

fn parse_fields(lines: &[String]) -> BTreeMap<String, String> {
    let mut fields = BTreeMap::new();
    let mut pending: Option<String> = None;

    for line in lines {
        let matches: Vec<_> = LABEL.captures_iter(line).collect();

        if matches.is_empty() {
            // Label and value rendered in separate elements
            if let Some(label) = pending.take() {
                fields.entry(label).or_insert_with(|| line.trim().to_string());
            }
            continue;
        }
        pending = None;

        for (index, caps) in matches.iter().enumerate() {
            let label = caps["label"].to_uppercase();
            let whole = caps.get(0).map(|m| m.end()).unwrap_or(0);
            let end = matches
                .get(index + 1)
                .and_then(|next| next.get(0))
                .map(|m| m.start())
                .unwrap_or(line.len());
            let value = line[whole..end].trim();

            if value.is_empty() {
                pending = Some(label);
            } else {
                fields.entry(label).or_insert_with(|| value.to_string());
            }
        }
    }

    fields
}

/// Join lines that only continue the previous one, such as a heading
/// split across `<strong>1/2</strong> - Regular`.
fn merge_continuations<'a>(lines: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut merged: Vec<String> = Vec::new();

    for line in lines {
        let line = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if line.is_empty() {
            continue;
        }

        let continues = line.starts_with('-') || line.starts_with('–') || line.starts_with(':');
        match merged.last_mut() {
            Some(previous) if continues => {
                previous.push(' ');
                previous.push_str(&line);
            }
            _ => merged.push(line),
        }
    }

    merged
}

fn merge_grades(into: &mut Vec<FuelGrade>, grades: Vec<FuelGrade>) {
    for grade in grades {
        if !into.contains(&grade) {
            into.push(grade);
        }
    }
}

fn clean_value(value: &str) -> Option<String> {
    let value = value.trim().trim_matches(|c| c == ':' || c == '-').trim();
    match value.to_uppercase().as_str() {
        "" | "N/A" | "NA" | "NONE" | "UNKNOWN" => None,
        _ => Some(value.to_string()),
    }
}
