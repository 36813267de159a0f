use std::collections::BTreeMap;

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use crate::models::{BlockKind, MajorScope, SlotKey};

/// Highest period number a timetable block may contain.
pub const MAX_PERIOD: u8 = 7;

/// First column scanned for date cells; column 0 holds row labels.
pub const DATE_START_COL: usize = 1;

/// Cap on rows scanned below a header, bounding runaway grids.
const BLOCK_SCAN_LIMIT: usize = 40;

static DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{4})/(\d{1,2})/(\d{1,2})").unwrap());
static PERIOD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([1-9])\s*コマ目").unwrap());
static GRADE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"([1-9])\s*年").unwrap());
static MAJOR_ALIAS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([\wぁ-んァ-ヶ一-龠・\-]+専攻)").unwrap());

/// NFKC-normalize and trim a raw cell. Full-width digits and spaces collapse
/// to their ASCII forms, so the regexes above only deal with one shape.
pub fn normalize_text(text: &str) -> String {
    text.nfkc().collect::<String>().trim().to_string()
}

/// The raw worksheet as an indexable 2-D structure of normalized cells.
/// Reads outside the ragged row bounds yield the empty string.
#[derive(Debug, Clone)]
pub struct Grid {
    rows: Vec<Vec<String>>,
}

impl Grid {
    pub fn from_raw(raw: Vec<Vec<String>>) -> Self {
        let rows = raw
            .into_iter()
            .map(|row| row.iter().map(|c| normalize_text(c)).collect())
            .collect();
        Grid { rows }
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    pub fn cell(&self, row: usize, col: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn row(&self, row: usize) -> &[String] {
        self.rows.get(row).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// A grade header row located in the grid. The block's date row sits directly
/// below `row_index`, and its period rows below that.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub row_index: usize,
    pub grade: u8,
    pub scope: MajorScope,
    pub kind: BlockKind,
}

/// Map date cells in `row` to their column index. Cells that do not contain
/// a `YYYY/M/D`-shaped substring, or name an invalid calendar day, are
/// silently skipped.
pub fn parse_dates_from_row(row: &[String], start_col: usize) -> BTreeMap<usize, NaiveDate> {
    let mut out = BTreeMap::new();
    for (col, cell) in row.iter().enumerate().skip(start_col) {
        let Some(caps) = DATE_RE.captures(cell) else {
            continue;
        };
        let year: i32 = caps[1].parse().unwrap_or(0);
        let month: u32 = caps[2].parse().unwrap_or(0);
        let day: u32 = caps[3].parse().unwrap_or(0);
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            out.insert(col, date);
        }
    }
    out
}

/// Collect `(period, row_index)` pairs scanning downward from `start_row`.
///
/// Scanning stops at the first row whose label cell is non-empty but not a
/// period marker, or at a blank label once the first period row has been
/// seen. Periods outside `[1, MAX_PERIOD]` are skipped without ending the
/// scan.
pub fn period_rows(grid: &Grid, start_row: usize) -> Vec<(u8, usize)> {
    let mut out = Vec::new();
    let mut seen_period_row = false;
    let limit = grid.height().min(start_row + BLOCK_SCAN_LIMIT);

    for row in start_row..limit {
        let head = grid.cell(row, 0);
        if head.is_empty() {
            if seen_period_row {
                break;
            }
            continue;
        }
        let Some(caps) = PERIOD_RE.captures(head) else {
            break;
        };
        seen_period_row = true;
        let period: u8 = caps[1].parse().unwrap_or(0);
        if period == 0 || period > MAX_PERIOD {
            continue;
        }
        out.push((period, row));
    }
    out
}

/// Extract the trailing `…専攻` track name from a header cell, if present.
pub fn extract_major_alias(header_text: &str) -> Option<String> {
    if !header_text.contains("専攻") {
        return None;
    }
    MAJOR_ALIAS_RE
        .captures(header_text)
        .map(|caps| caps[1].to_string())
}

/// Locate every grade header in the grid, in row order.
///
/// A row is a header when its label matches `<digit>年` and the row below
/// announces the block kind: `時間割` for subjects, `担当` for teachers.
pub fn find_block_headers(grid: &Grid) -> Vec<BlockHeader> {
    let mut headers = Vec::new();
    for row in 0..grid.height() {
        let head = grid.cell(row, 0);
        if head.is_empty() {
            continue;
        }
        let Some(caps) = GRADE_RE.captures(head) else {
            continue;
        };
        let grade: u8 = caps[1].parse().unwrap_or(0);
        if grade == 0 {
            continue;
        }

        let next_head = grid.cell(row + 1, 0);
        let kind = if next_head.contains("時間割") {
            BlockKind::Subject
        } else if next_head.contains("担当") {
            BlockKind::Teacher
        } else {
            continue;
        };

        let scope = match extract_major_alias(head) {
            Some(alias) => MajorScope::Major(alias),
            None => MajorScope::Common,
        };
        headers.push(BlockHeader {
            row_index: row,
            grade,
            scope,
            kind,
        });
    }
    headers
}

pub type BlockMap = BTreeMap<SlotKey, String>;

/// Parse one block into a sparse `SlotKey -> cell text` map.
///
/// The date row is expected at `header_row_index + 1` and period rows from
/// `header_row_index + 2`. Cells without a resolvable date column, and empty
/// cells, are dropped rather than erred.
pub fn parse_block_map(grid: &Grid, header_row_index: usize) -> BlockMap {
    let date_map = parse_dates_from_row(grid.row(header_row_index + 1), DATE_START_COL);

    let mut out = BlockMap::new();
    for (period, row) in period_rows(grid, header_row_index + 2) {
        for (&col, &date) in &date_map {
            let cell = grid.cell(row, col);
            if cell.is_empty() {
                continue;
            }
            out.insert(SlotKey { date, period }, cell.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(rows: &[&[&str]]) -> Grid {
        Grid::from_raw(
            rows.iter()
                .map(|r| r.iter().map(|c| c.to_string()).collect())
                .collect(),
        )
    }

    #[test]
    fn normalize_folds_fullwidth_and_trims() {
        assert_eq!(normalize_text("　１コマ目 "), "1コマ目");
        assert_eq!(normalize_text("２０２４/４/１"), "2024/4/1");
    }

    #[test]
    fn dates_parse_and_reject_invalid_calendar_values() {
        let row: Vec<String> = vec![
            "".into(),
            "2024/4/1".into(),
            "2024/13/1".into(),
            "火 2024/4/2".into(),
            "memo".into(),
        ];
        let dates = parse_dates_from_row(&row, 1);
        assert_eq!(dates.len(), 2);
        assert_eq!(dates[&1], NaiveDate::from_ymd_opt(2024, 4, 1).unwrap());
        assert_eq!(dates[&3], NaiveDate::from_ymd_opt(2024, 4, 2).unwrap());
    }

    #[test]
    fn dates_ignore_columns_before_start() {
        let row: Vec<String> = vec!["2024/4/1".into(), "2024/4/2".into()];
        let dates = parse_dates_from_row(&row, 1);
        assert_eq!(dates.len(), 1);
        assert!(dates.contains_key(&1));
    }

    #[test]
    fn period_scan_stops_at_next_section() {
        let g = grid(&[
            &["1コマ目", "数学"],
            &["2コマ目", "英語"],
            &["2年 時間割", ""],
        ]);
        let rows = period_rows(&g, 0);
        assert_eq!(rows, vec![(1, 0), (2, 1)]);
    }

    #[test]
    fn period_scan_tolerates_leading_blanks_only() {
        let g = grid(&[
            &["", ""],
            &["1コマ目", "数学"],
            &["", ""],
            &["2コマ目", "英語"],
        ]);
        // blank after the first period row ends the block
        let rows = period_rows(&g, 0);
        assert_eq!(rows, vec![(1, 1)]);
    }

    #[test]
    fn period_scan_skips_out_of_range_digits() {
        let g = grid(&[&["9コマ目", "x"], &["3コマ目", "y"]]);
        let rows = period_rows(&g, 0);
        assert_eq!(rows, vec![(3, 1)]);
    }

    #[test]
    fn headers_require_kind_keyword_below() {
        let g = grid(&[
            &["1年 SC専攻"],
            &["時間割"],
            &["1年 SC専攻"],
            &["担当"],
            &["2年"],
            &["メモ"],
        ]);
        let headers = find_block_headers(&g);
        assert_eq!(headers.len(), 2);
        assert_eq!(headers[0].grade, 1);
        assert_eq!(headers[0].kind, BlockKind::Subject);
        assert_eq!(headers[0].scope, MajorScope::Major("SC専攻".into()));
        assert_eq!(headers[1].kind, BlockKind::Teacher);
    }

    #[test]
    fn header_without_major_keyword_is_common() {
        let g = grid(&[&["3年"], &["時間割"]]);
        let headers = find_block_headers(&g);
        assert_eq!(headers.len(), 1);
        assert_eq!(headers[0].grade, 3);
        assert_eq!(headers[0].scope, MajorScope::Common);
    }

    #[test]
    fn alias_extraction() {
        assert_eq!(extract_major_alias("1年 SC専攻"), Some("SC専攻".into()));
        assert_eq!(
            extract_major_alias("2年 AI・IoT専攻 時間割"),
            Some("AI・IoT専攻".into())
        );
        assert_eq!(extract_major_alias("1年"), None);
    }

    #[test]
    fn block_map_covers_dated_nonempty_cells_only() {
        let g = grid(&[
            &["1年", "", ""],
            &["", "2024/4/1", "2024/4/2"],
            &["1コマ目", "数学", ""],
            &["2コマ目", "", "英語"],
        ]);
        let map = parse_block_map(&g, 0);
        let d1 = NaiveDate::from_ymd_opt(2024, 4, 1).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2024, 4, 2).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map[&SlotKey { date: d1, period: 1 }], "数学");
        assert_eq!(map[&SlotKey { date: d2, period: 2 }], "英語");
    }

    #[test]
    fn block_map_missing_date_row_is_empty() {
        let g = grid(&[&["1年"]]);
        assert!(parse_block_map(&g, 0).is_empty());
    }
}
