//! Core domain model: canonical standings rows, column maps, field extraction.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub const CRATE_NAME: &str = "standings-core";

/// Mandatory numeric counters every source must map: played, won, drawn,
/// lost, points.
pub const MANDATORY_NUMERIC_FIELDS: u8 = 5;

/// One normalized standings row for one team in one competition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandingRecord {
    /// Partition key; every record belongs to exactly one competition.
    pub competition: String,
    /// Trimmed display name. Empty string when extraction missed, never absent.
    pub team: String,
    pub played: u32,
    pub won: u32,
    pub drawn: u32,
    pub lost: u32,
    pub points: u32,
    pub for_points: Option<i64>,
    pub against_points: Option<i64>,
    pub point_difference: i64,
}

/// Where a canonical field lives inside a raw row.
///
/// Table sources address cells positionally; API sources address JSON keys.
/// Untagged so registry YAML reads naturally: `team: 1` vs `team: teamName`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldRef {
    Index(usize),
    Key(String),
}

/// Per-competition rule locating each canonical field within a raw row.
///
/// The same field drifts across sources (points observed at index 6, 10,
/// or 12 depending on the table layout), so the map is data, not code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMap {
    pub team: FieldRef,
    pub played: FieldRef,
    pub won: FieldRef,
    pub drawn: FieldRef,
    pub lost: FieldRef,
    pub points: FieldRef,
    #[serde(default)]
    pub for_points: Option<FieldRef>,
    #[serde(default)]
    pub against_points: Option<FieldRef>,
    #[serde(default)]
    pub point_difference: Option<FieldRef>,
}

/// One raw row as yielded by a source adapter, before normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawRow {
    Cells(Vec<String>),
    Object(JsonValue),
}

/// Result of normalizing one raw row.
///
/// `defaulted_numeric_fields` counts how many of the mandatory counters fell
/// back to zero; callers use it to flag a likely-stale column map when every
/// row of a competition defaulted everything.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub record: StandingRecord,
    pub defaulted_numeric_fields: u8,
}

/// Normalize one raw row into a canonical record.
///
/// Pure function of (row, map). Numeric cells that are empty, non-numeric or
/// unmapped resolve to zero; text cells resolve to the empty string. A row is
/// always emitted, even with an empty team, so row counts stay 1:1 with the
/// source.
pub fn extract_record(competition: &str, row: &RawRow, map: &ColumnMap) -> Extraction {
    let mut defaulted = 0u8;
    let mut counter = |field: &FieldRef| -> u32 {
        match u32_at(row, field) {
            Some(v) => v,
            None => {
                defaulted += 1;
                0
            }
        }
    };

    let played = counter(&map.played);
    let won = counter(&map.won);
    let drawn = counter(&map.drawn);
    let lost = counter(&map.lost);
    let points = counter(&map.points);

    let team = text_at(row, &map.team);
    let for_points = map.for_points.as_ref().and_then(|f| i64_at(row, f));
    let against_points = map.against_points.as_ref().and_then(|f| i64_at(row, f));

    // Derived only after the direct fields resolve: prefer the scoring
    // breakdown, fall back to the source's own column, else zero.
    let point_difference = match (for_points, against_points) {
        (Some(f), Some(a)) => f - a,
        _ => map
            .point_difference
            .as_ref()
            .and_then(|f| i64_at(row, f))
            .unwrap_or(0),
    };

    Extraction {
        record: StandingRecord {
            competition: competition.to_string(),
            team,
            played,
            won,
            drawn,
            lost,
            points,
            for_points,
            against_points,
            point_difference,
        },
        defaulted_numeric_fields: defaulted,
    }
}

fn cell<'a>(row: &'a RawRow, field: &FieldRef) -> Option<&'a JsonValue> {
    match (row, field) {
        (RawRow::Object(value), FieldRef::Key(key)) => value.get(key),
        _ => None,
    }
}

fn text_at(row: &RawRow, field: &FieldRef) -> String {
    match (row, field) {
        (RawRow::Cells(cells), FieldRef::Index(i)) => {
            cells.get(*i).map(|s| s.trim().to_string()).unwrap_or_default()
        }
        _ => cell(row, field)
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}

fn u32_at(row: &RawRow, field: &FieldRef) -> Option<u32> {
    match (row, field) {
        (RawRow::Cells(cells), FieldRef::Index(i)) => {
            cells.get(*i).and_then(|s| s.trim().parse().ok())
        }
        _ => match cell(row, field)? {
            JsonValue::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
            JsonValue::String(s) => s.trim().parse().ok(),
            _ => None,
        },
    }
}

fn i64_at(row: &RawRow, field: &FieldRef) -> Option<i64> {
    match (row, field) {
        (RawRow::Cells(cells), FieldRef::Index(i)) => {
            cells.get(*i).and_then(|s| s.trim().parse().ok())
        }
        _ => match cell(row, field)? {
            JsonValue::Number(n) => n.as_i64(),
            JsonValue::String(s) => s.trim().parse().ok(),
            _ => None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn positional_map() -> ColumnMap {
        ColumnMap {
            team: FieldRef::Index(1),
            played: FieldRef::Index(2),
            won: FieldRef::Index(3),
            drawn: FieldRef::Index(4),
            lost: FieldRef::Index(5),
            points: FieldRef::Index(10),
            for_points: Some(FieldRef::Index(6)),
            against_points: Some(FieldRef::Index(7)),
            point_difference: None,
        }
    }

    fn cells(values: &[&str]) -> RawRow {
        RawRow::Cells(values.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn full_row_extracts_and_derives_point_difference() {
        let row = cells(&[
            "1", " Saracens ", "10", "7", "1", "2", "45", "20", "", "", "30",
        ]);
        let extraction = extract_record("gallagher-premiership", &row, &positional_map());
        let record = extraction.record;

        assert_eq!(record.competition, "gallagher-premiership");
        assert_eq!(record.team, "Saracens");
        assert_eq!(record.played, 10);
        assert_eq!(record.won, 7);
        assert_eq!(record.drawn, 1);
        assert_eq!(record.lost, 2);
        assert_eq!(record.points, 30);
        assert_eq!(record.for_points, Some(45));
        assert_eq!(record.against_points, Some(20));
        assert_eq!(record.point_difference, 25);
        assert_eq!(extraction.defaulted_numeric_fields, 0);
    }

    #[test]
    fn non_numeric_cells_default_to_zero() {
        let row = cells(&["1", "Leicester", "-", "", "x", "3", "", "", "", "", "-"]);
        let extraction = extract_record("gallagher-premiership", &row, &positional_map());

        assert_eq!(extraction.record.played, 0);
        assert_eq!(extraction.record.won, 0);
        assert_eq!(extraction.record.drawn, 0);
        assert_eq!(extraction.record.lost, 3);
        assert_eq!(extraction.record.points, 0);
        assert_eq!(extraction.defaulted_numeric_fields, 4);
    }

    #[test]
    fn short_row_defaults_everything_and_is_still_emitted() {
        let row = cells(&["1"]);
        let extraction = extract_record("top-14", &row, &positional_map());

        assert_eq!(extraction.record.team, "");
        assert_eq!(extraction.record.points, 0);
        assert_eq!(extraction.record.for_points, None);
        assert_eq!(extraction.record.point_difference, 0);
        assert_eq!(extraction.defaulted_numeric_fields, MANDATORY_NUMERIC_FIELDS);
    }

    #[test]
    fn point_difference_falls_back_to_mapped_column() {
        let map = ColumnMap {
            team: FieldRef::Index(0),
            played: FieldRef::Index(1),
            won: FieldRef::Index(2),
            drawn: FieldRef::Index(3),
            lost: FieldRef::Index(4),
            points: FieldRef::Index(6),
            for_points: None,
            against_points: None,
            point_difference: Some(FieldRef::Index(5)),
        };
        let row = cells(&["Toulouse", "12", "9", "0", "3", "-14", "38"]);
        let record = extract_record("top-14", &row, &map).record;

        assert_eq!(record.point_difference, -14);
        assert_eq!(record.points, 38);
    }

    #[test]
    fn keyed_map_reads_json_numbers_and_strings() {
        let map = ColumnMap {
            team: FieldRef::Key("teamName".into()),
            played: FieldRef::Key("gamesPlayed".into()),
            won: FieldRef::Key("wins".into()),
            drawn: FieldRef::Key("draws".into()),
            lost: FieldRef::Key("losses".into()),
            points: FieldRef::Key("competitionPoints".into()),
            for_points: Some(FieldRef::Key("pointsFor".into())),
            against_points: Some(FieldRef::Key("pointsAgainst".into())),
            point_difference: None,
        };
        let row = RawRow::Object(json!({
            "teamName": "  Crusaders ",
            "gamesPlayed": 14,
            "wins": "11",
            "draws": 0,
            "losses": 3,
            "competitionPoints": 48,
            "pointsFor": 402,
            "pointsAgainst": 310,
        }));
        let extraction = extract_record("super-rugby", &row, &map);

        assert_eq!(extraction.record.team, "Crusaders");
        assert_eq!(extraction.record.played, 14);
        assert_eq!(extraction.record.won, 11);
        assert_eq!(extraction.record.points, 48);
        assert_eq!(extraction.record.point_difference, 92);
        assert_eq!(extraction.defaulted_numeric_fields, 0);
    }

    #[test]
    fn keyed_map_defaults_on_missing_or_mistyped_keys() {
        let map = ColumnMap {
            team: FieldRef::Key("teamName".into()),
            played: FieldRef::Key("gamesPlayed".into()),
            won: FieldRef::Key("wins".into()),
            drawn: FieldRef::Key("draws".into()),
            lost: FieldRef::Key("losses".into()),
            points: FieldRef::Key("competitionPoints".into()),
            for_points: None,
            against_points: None,
            point_difference: None,
        };
        let row = RawRow::Object(json!({
            "teamName": "Hurricanes",
            "wins": null,
            "draws": [1],
            "losses": "n/a",
        }));
        let extraction = extract_record("super-rugby", &row, &map);

        assert_eq!(extraction.record.team, "Hurricanes");
        assert_eq!(extraction.record.played, 0);
        assert_eq!(extraction.record.won, 0);
        assert_eq!(extraction.record.points, 0);
        assert_eq!(extraction.defaulted_numeric_fields, MANDATORY_NUMERIC_FIELDS);
    }

    #[test]
    fn field_ref_deserializes_untagged_from_yaml_shapes() {
        let index: FieldRef = serde_json::from_str("4").unwrap();
        let key: FieldRef = serde_json::from_str("\"teamName\"").unwrap();
        assert_eq!(index, FieldRef::Index(4));
        assert_eq!(key, FieldRef::Key("teamName".into()));
    }
}
