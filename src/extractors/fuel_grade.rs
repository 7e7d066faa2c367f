use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

/// A fuel product as WorkFossa reports it on equipment pages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "grade", content = "code")]
pub enum FuelGrade {
    Regular,
    Plus,
    Premium,
    SuperPremium,
    Diesel,
    DyedDiesel,
    E85,
    EthanolFree,
    Kerosene,
    Def,
    RaceFuel,
    Unknown(String),
}

static NUMERIC_CODES: &[(&str, FuelGrade)] = &[
    ("0126", FuelGrade::Regular),
    ("0127", FuelGrade::E85),
    ("0128", FuelGrade::Diesel),
    ("0129", FuelGrade::DyedDiesel),
    ("0130", FuelGrade::EthanolFree),
    ("0131", FuelGrade::SuperPremium),
    ("0133", FuelGrade::Kerosene),
    ("0134", FuelGrade::Def),
    ("0135", FuelGrade::Plus),
    ("0136", FuelGrade::Premium),
    ("0137", FuelGrade::RaceFuel),
];

// Octane ratings show up as bare numbers on older pump labels.
static ALIASES: &[(&str, FuelGrade)] = &[
    ("REGULAR", FuelGrade::Regular),
    ("REG", FuelGrade::Regular),
    ("UNL", FuelGrade::Regular),
    ("UNLEADED", FuelGrade::Regular),
    ("87", FuelGrade::Regular),
    ("PLUS", FuelGrade::Plus),
    ("MID", FuelGrade::Plus),
    ("MIDGRADE", FuelGrade::Plus),
    ("MID-GRADE", FuelGrade::Plus),
    ("89", FuelGrade::Plus),
    ("PREMIUM", FuelGrade::Premium),
    ("PREM", FuelGrade::Premium),
    ("SUPER", FuelGrade::Premium),
    ("91", FuelGrade::Premium),
    ("93", FuelGrade::Premium),
    ("SUPER PREMIUM", FuelGrade::SuperPremium),
    ("SUPREME", FuelGrade::SuperPremium),
    ("SUP", FuelGrade::SuperPremium),
    ("DIESEL", FuelGrade::Diesel),
    ("DSL", FuelGrade::Diesel),
    ("ULSD", FuelGrade::Diesel),
    ("AUTO DIESEL", FuelGrade::Diesel),
    ("DYED DIESEL", FuelGrade::DyedDiesel),
    ("OFF ROAD DIESEL", FuelGrade::DyedDiesel),
    ("OFF-ROAD DIESEL", FuelGrade::DyedDiesel),
    ("DYED", FuelGrade::DyedDiesel),
    ("E85", FuelGrade::E85),
    ("E-85", FuelGrade::E85),
    ("FLEX FUEL", FuelGrade::E85),
    ("ETHANOL FREE", FuelGrade::EthanolFree),
    ("ETHANOL-FREE", FuelGrade::EthanolFree),
    ("NON-ETHANOL", FuelGrade::EthanolFree),
    ("NON ETHANOL", FuelGrade::EthanolFree),
    ("REC", FuelGrade::EthanolFree),
    ("RECFUEL", FuelGrade::EthanolFree),
    ("REC FUEL", FuelGrade::EthanolFree),
    ("E0", FuelGrade::EthanolFree),
    ("KEROSENE", FuelGrade::Kerosene),
    ("KERO", FuelGrade::Kerosene),
    ("DEF", FuelGrade::Def),
    ("DIESEL EXHAUST FLUID", FuelGrade::Def),
    ("RACE FUEL", FuelGrade::RaceFuel),
    ("RACE", FuelGrade::RaceFuel),
];

static GRADE_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)[\s-]*GRADE$").expect("grade suffix pattern"));

static LIST_SEPARATORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s*(?:,|/|;|\||&|\band\b)\s*").expect("separator pattern"));

/// Decode a single grade code or name. Never fails: anything not in the
/// tables comes back as [`FuelGrade::Unknown`] carrying the normalized code.
pub fn decode(code: &str) -> FuelGrade {
    let collapsed = code.split_whitespace().collect::<Vec<_>>().join(" ");
    let upper = collapsed.to_uppercase();
    let normalized = GRADE_SUFFIX.replace(&upper, "").trim().to_string();

    if normalized.is_empty() {
        return FuelGrade::Unknown(upper);
    }

    if normalized.chars().all(|c| c.is_ascii_digit()) && normalized.len() <= 4 {
        // 87/89/91/93 are octane ratings, not portal codes
        if let Some(grade) = lookup_alias(&normalized) {
            return grade;
        }
        let padded = format!("{:0>4}", normalized);
        return NUMERIC_CODES
            .iter()
            .find(|(numeric, _)| *numeric == padded)
            .map(|(_, grade)| grade.clone())
            .unwrap_or(FuelGrade::Unknown(padded));
    }

    lookup_alias(&normalized).unwrap_or(FuelGrade::Unknown(normalized))
}

fn lookup_alias(normalized: &str) -> Option<FuelGrade> {
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == normalized)
        .map(|(_, grade)| grade.clone())
}

/// Decode a free-form list such as `"Regular, Plus & Premium"` or
/// `"0126 0135 0136"`. Order of first appearance is kept, duplicates dropped.
pub fn decode_list(text: &str) -> Vec<FuelGrade> {
    let mut grades: Vec<FuelGrade> = Vec::new();

    for part in LIST_SEPARATORS.split(text) {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        // "0126 0135 0136" is one part with several codes in it
        let tokens: Vec<&str> = part.split_whitespace().collect();
        let candidates: Vec<String> = if tokens.len() > 1
            && tokens.iter().all(|t| t.chars().all(|c| c.is_ascii_digit()))
        {
            tokens.iter().map(|t| t.to_string()).collect()
        } else {
            vec![part.to_string()]
        };

        for candidate in candidates {
            let grade = decode(&candidate);
            if !grades.contains(&grade) {
                grades.push(grade);
            }
        }
    }

    grades
}

/// Sort grades into the order technicians see them on the pump face.
pub fn sort_grades(grades: &mut [FuelGrade]) {
    grades.sort_by_key(|g| g.sort_key());
}

impl FuelGrade {
    pub fn display_name(&self) -> &str {
        match self {
            FuelGrade::Regular => "Regular",
            FuelGrade::Plus => "Plus",
            FuelGrade::Premium => "Premium",
            FuelGrade::SuperPremium => "Super Premium",
            FuelGrade::Diesel => "Diesel",
            FuelGrade::DyedDiesel => "Dyed Diesel",
            FuelGrade::E85 => "E85",
            FuelGrade::EthanolFree => "Ethanol Free",
            FuelGrade::Kerosene => "Kerosene",
            FuelGrade::Def => "DEF",
            FuelGrade::RaceFuel => "Race Fuel",
            FuelGrade::Unknown(code) => code,
        }
    }

    /// Plus is mixed from Regular and Premium at the nozzle on blending
    /// dispensers, so it has no meter of its own.
    pub fn is_blended(&self) -> bool {
        matches!(self, FuelGrade::Plus)
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, FuelGrade::Unknown(_))
    }

    /// Whether a calibration visit tests this product's meter. DEF is
    /// dispensed through a separate system and is never proved.
    pub fn requires_meter_test(&self) -> bool {
        self.is_known() && !self.is_blended() && !matches!(self, FuelGrade::Def)
    }

    pub fn sort_key(&self) -> (u8, String) {
        let rank = match self {
            FuelGrade::Regular => 0,
            FuelGrade::Plus => 1,
            FuelGrade::Premium => 2,
            FuelGrade::SuperPremium => 3,
            FuelGrade::EthanolFree => 4,
            FuelGrade::E85 => 5,
            FuelGrade::RaceFuel => 6,
            FuelGrade::Diesel => 7,
            FuelGrade::DyedDiesel => 8,
            FuelGrade::Kerosene => 9,
            FuelGrade::Def => 10,
            FuelGrade::Unknown(_) => 11,
        };
        let tiebreak = match self {
            FuelGrade::Unknown(code) => code.clone(),
            _ => String::new(),
        };
        (rank, tiebreak)
    }
}

impl fmt::Display for FuelGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}
