//! Attendance workbook: one sheet per class, one row per student, one
//! column per date.
//!
//! The workbook is read with calamine into plain cell text, mutated in
//! memory and, only when something changed, re-rendered in full with
//! rust_xlsxwriter and swapped into place by rename.

use crate::config::WorkbookConfig;
use crate::error::Result;
use crate::recognizer::AttendanceSink;
use calamine::{open_workbook, Data, DataType, Reader, Xlsx};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkOutcome {
    Marked,
    NotFound,
    SheetMissing,
}

/// Result of applying a mark to the in-memory workbook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Applied {
    pub outcome: MarkOutcome,
    /// Whether any cell or header was modified.
    pub changed: bool,
}

#[derive(Debug, Clone)]
pub struct SheetLayout {
    pub roll_column: String,
    pub present_marker: String,
}

impl From<&WorkbookConfig> for SheetLayout {
    fn from(cfg: &WorkbookConfig) -> Self {
        Self {
            roll_column: cfg.roll_column.clone(),
            present_marker: cfg.present_marker.clone(),
        }
    }
}

/// Row-major cell text; row 0 is the header.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Sheet {
    pub name: String,
    pub rows: Vec<Vec<String>>,
}

impl Sheet {
    pub fn new(name: impl Into<String>, rows: Vec<Vec<String>>) -> Self {
        Self {
            name: name.into(),
            rows,
        }
    }

    pub fn header(&self) -> &[String] {
        self.rows.first().map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn column(&self, title: &str) -> Option<usize> {
        self.header().iter().position(|h| h.trim() == title.trim())
    }

    pub fn cell(&self, row: usize, col: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .map(String::as_str)
            .unwrap_or("")
    }

    fn set(&mut self, row: usize, col: usize, value: &str) {
        if self.rows.len() <= row {
            self.rows.resize_with(row + 1, Vec::new);
        }
        let cells = &mut self.rows[row];
        if cells.len() <= col {
            cells.resize(col + 1, String::new());
        }
        cells[col] = value.to_string();
    }

    /// First row whose roll cell reads exactly `roll_no`; numeric cells
    /// are matched by value only when no row matches as text.
    fn find_roll(&self, roll_col: usize, roll_no: &str) -> Option<usize> {
        let roll = |r: &usize| self.cell(*r, roll_col);
        (1..self.rows.len())
            .find(|r| same_roll_text(roll(r), roll_no))
            .or_else(|| (1..self.rows.len()).find(|r| same_roll_value(roll(r), roll_no)))
    }

    /// Index of the date column, appending it to the header when absent.
    fn ensure_column(&mut self, title: &str) -> (usize, bool) {
        if let Some(col) = self.column(title) {
            return (col, false);
        }
        let col = self.header().len();
        self.set(0, col, title);
        (col, true)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Workbook {
    sheets: Vec<Sheet>,
}

impl Workbook {
    pub fn from_sheets(sheets: Vec<Sheet>) -> Self {
        Self { sheets }
    }

    pub fn sheets(&self) -> &[Sheet] {
        &self.sheets
    }

    pub fn sheet(&self, name: &str) -> Option<&Sheet> {
        self.sheets.iter().find(|s| s.name.trim() == name.trim())
    }

    fn sheet_mut(&mut self, name: &str) -> Option<&mut Sheet> {
        self.sheets.iter_mut().find(|s| s.name.trim() == name.trim())
    }

    pub fn load(path: &Path, date_format: &str) -> Result<Self> {
        let mut book: Xlsx<_> = open_workbook(path)?;
        let mut sheets = Vec::new();
        for name in book.sheet_names() {
            let range = book.worksheet_range(&name)?;
            let mut rows: Vec<Vec<String>> = Vec::new();
            if let Some((row0, col0)) = range.start() {
                rows.resize_with(row0 as usize, Vec::new);
                for cells in range.rows() {
                    let mut row = vec![String::new(); col0 as usize];
                    row.extend(cells.iter().map(|c| cell_text(c, date_format)));
                    rows.push(row);
                }
            }
            sheets.push(Sheet::new(name, rows));
        }
        debug!("loaded {} sheet(s) from {}", sheets.len(), path.display());
        Ok(Self { sheets })
    }

    /// Writes every sheet to a staging file beside `path`, then renames it over `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut book = rust_xlsxwriter::Workbook::new();
        for sheet in &self.sheets {
            let ws = book.add_worksheet();
            ws.set_name(&sheet.name)?;
            for (r, cells) in sheet.rows.iter().enumerate() {
                for (c, value) in cells.iter().enumerate() {
                    if value.is_empty() {
                        continue;
                    }
                    let (row, col) = (r as u32, c as u16);
                    match exact_number(value) {
                        Some(n) => ws.write_number(row, col, n)?,
                        None => ws.write_string(row, col, value)?,
                    };
                }
            }
        }
        let bytes = book.save_to_buffer()?;

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut staged = NamedTempFile::new_in(&dir)?;
        staged.write_all(&bytes)?;
        staged.as_file().sync_all()?;
        staged.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    /// Marks `roll_no` present on `date` in the sheet for `class_name`.
    ///
    /// The date column is created on first reference even when the roll is
    /// not found. A cell that already holds the marker is left alone.
    pub fn mark_present(
        &mut self,
        class_name: &str,
        roll_no: &str,
        date: &str,
        layout: &SheetLayout,
    ) -> Applied {
        let Some(sheet) = self.sheet_mut(class_name) else {
            return Applied {
                outcome: MarkOutcome::SheetMissing,
                changed: false,
            };
        };
        let (date_col, mut changed) = sheet.ensure_column(date);

        let row = sheet
            .column(&layout.roll_column)
            .and_then(|roll_col| sheet.find_roll(roll_col, roll_no));
        let Some(row) = row else {
            return Applied {
                outcome: MarkOutcome::NotFound,
                changed,
            };
        };

        if sheet.cell(row, date_col) != layout.present_marker {
            sheet.set(row, date_col, &layout.present_marker);
            changed = true;
        }
        Applied {
            outcome: MarkOutcome::Marked,
            changed,
        }
    }
}

/// File-backed writer used by the recognition loop.
#[derive(Debug, Clone)]
pub struct AttendanceWriter {
    path: PathBuf,
    layout: SheetLayout,
    date_format: String,
}

impl AttendanceWriter {
    pub fn new(config: &WorkbookConfig) -> Self {
        Self {
            path: PathBuf::from(&config.path),
            layout: SheetLayout::from(config),
            date_format: config.date_format.clone(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mark(&self, class_name: &str, roll_no: &str, date: &str) -> Result<MarkOutcome> {
        let mut book = Workbook::load(&self.path, &self.date_format)?;
        let applied = book.mark_present(class_name, roll_no, date, &self.layout);
        if applied.changed {
            book.save(&self.path)?;
            info!(
                "workbook {} updated ({class_name}/{roll_no} on {date}: {:?})",
                self.path.display(),
                applied.outcome
            );
        } else {
            debug!("workbook unchanged for {class_name}/{roll_no} on {date}");
        }
        Ok(applied.outcome)
    }
}

impl AttendanceSink for AttendanceWriter {
    fn mark_present(&mut self, class_name: &str, roll_no: &str, date: &str) -> Result<MarkOutcome> {
        self.mark(class_name, roll_no, date)
    }
}

fn cell_text(cell: &Data, date_format: &str) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => format_number(*f),
        Data::DateTime(_) | Data::DateTimeIso(_) => match cell.as_datetime() {
            Some(dt) => dt.format(date_format).to_string(),
            None => cell.to_string(),
        },
        other => other.to_string(),
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// `value` as a number, only if rendering it back gives the same text.
fn exact_number(value: &str) -> Option<f64> {
    let n: f64 = value.parse().ok()?;
    (n.is_finite() && format_number(n) == value).then_some(n)
}

fn same_roll_text(cell: &str, roll_no: &str) -> bool {
    let cell = cell.trim();
    !cell.is_empty() && cell == roll_no.trim()
}

/// Integral numeric cells only, so a text roll such as "012" never stands in for "12".
fn same_roll_value(cell: &str, roll_no: &str) -> bool {
    match (exact_number(cell.trim()), roll_no.trim().parse::<f64>()) {
        (Some(x), Ok(y)) => x.fract() == 0.0 && x == y,
        _ => false,
    }
}
