//! In-memory tables and spreadsheet codecs
//!
//! A [`Table`] is a ragged grid of [`Cell`]s addressed with 1-based row and
//! column numbers, matching how spreadsheet users count. A [`Workbook`] holds
//! every worksheet of a file in order, so rewriting a workbook keeps the
//! sheets that were not edited. Cell values, dates and formulas survive a
//! read/write cycle; styles and the original number formats do not.
//!
//! | extension                    | read       | write             |
//! |------------------------------|------------|-------------------|
//! | `xlsx`                       | `calamine` | `rust_xlsxwriter` |
//! | `xlsm`, `xlsb`, `xls`, `ods` | `calamine` | read-only         |
//! | `csv`                        | `csv`      | `csv`, one sheet  |

use crate::error::{Error, Result};
use calamine::{Data, Range, Reader, open_workbook_auto};
use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use rust_xlsxwriter::{Format, Formula, XlsxError};
use std::path::Path;

/// Sheet name used when a file has no names of its own (csv)
pub const DEFAULT_SHEET_NAME: &str = "Sheet1";

const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// One spreadsheet cell
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Cell {
    /// No value
    #[default]
    Empty,
    /// String value
    Text(String),
    /// Numeric value
    Number(f64),
    /// Boolean value
    Bool(bool),
    /// Date, time or both, as an Excel serial day number
    DateTime(f64),
    /// Elapsed time in days
    Duration(f64),
    /// Formula and the value it last evaluated to
    Formula {
        /// Formula text without the leading `=`
        formula: String,
        /// Cached result
        value: Box<Cell>,
    },
}

static EMPTY: Cell = Cell::Empty;

impl Cell {
    /// Build a text cell; an empty string becomes [`Cell::Empty`]
    pub fn text(s: impl Into<String>) -> Self {
        let s = s.into();
        if s.is_empty() { Cell::Empty } else { Cell::Text(s) }
    }

    /// Whether the cell holds nothing
    pub fn is_empty(&self) -> bool {
        matches!(self, Cell::Empty)
    }

    /// Text rendering of the cell
    ///
    /// Integral numbers print without a fractional part, so an article code
    /// stored as the number `12345` reads back as `"12345"`. Dates print as
    /// ISO 8601 and formulas as their cached value.
    pub fn to_text(&self) -> String {
        match self {
            Cell::Empty => String::new(),
            Cell::Text(s) => s.clone(),
            Cell::Number(n) => format_number(*n),
            Cell::Bool(b) => b.to_string(),
            Cell::DateTime(serial) => format_serial(*serial),
            Cell::Duration(days) => format_duration(*days),
            Cell::Formula { value, .. } => value.to_text(),
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

// Day zero of the 1900 date system. Serials below 61 are off by one because
// Excel counts 1900-02-29.
fn excel_epoch() -> Option<NaiveDateTime> {
    NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)
}

fn serial_to_datetime(serial: f64) -> Option<NaiveDateTime> {
    let millis = (serial * MILLIS_PER_DAY).round();
    if !millis.is_finite() || millis.abs() >= i64::MAX as f64 {
        return None;
    }
    excel_epoch()?.checked_add_signed(TimeDelta::try_milliseconds(millis as i64)?)
}

fn datetime_to_serial(dt: NaiveDateTime) -> Option<f64> {
    let elapsed = dt.signed_duration_since(excel_epoch()?);
    Some(elapsed.num_milliseconds() as f64 / MILLIS_PER_DAY)
}

fn format_serial(serial: f64) -> String {
    match serial_to_datetime(serial) {
        Some(dt) if serial.fract() == 0.0 => dt.format("%Y-%m-%d").to_string(),
        Some(dt) if (0.0..1.0).contains(&serial) => dt.format("%H:%M:%S").to_string(),
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => format_number(serial),
    }
}

fn format_duration(days: f64) -> String {
    let total = (days * 86_400.0).round() as i64;
    let sign = if total < 0 { "-" } else { "" };
    let total = total.unsigned_abs();
    format!(
        "{sign}{}:{:02}:{:02}",
        total / 3600,
        total / 60 % 60,
        total % 60
    )
}

/// Parse the ISO 8601 date strings `ods` files carry
fn parse_iso_datetime(s: &str) -> Option<f64> {
    let dt = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })?;
    datetime_to_serial(dt)
}

impl From<&Data> for Cell {
    fn from(data: &Data) -> Self {
        match data {
            Data::Empty => Cell::Empty,
            Data::String(s) => Cell::text(s.as_str()),
            Data::Float(f) => Cell::Number(*f),
            Data::Int(i) => Cell::Number(*i as f64),
            Data::Bool(b) => Cell::Bool(*b),
            Data::DateTime(dt) if dt.is_duration() => Cell::Duration(dt.as_f64()),
            Data::DateTime(dt) => Cell::DateTime(dt.as_f64()),
            Data::DateTimeIso(s) => parse_iso_datetime(s)
                .map(Cell::DateTime)
                .unwrap_or_else(|| Cell::text(s.as_str())),
            // ISO durations (`PT1H30M`) are kept verbatim
            Data::DurationIso(s) => Cell::text(s.as_str()),
            Data::Error(e) => Cell::text(e.to_string()),
        }
    }
}

/// Spreadsheet file format, chosen by extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetFormat {
    /// Office Open XML workbook; readable and writable
    Xlsx,
    /// Workbook formats `calamine` can read but nothing here writes
    ReadOnlyWorkbook,
    /// Comma-separated values; readable and writable
    Csv,
}

impl SheetFormat {
    /// Detect the format from a file extension (case-insensitive)
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "xlsx" => Ok(SheetFormat::Xlsx),
            "xlsm" | "xlsb" | "xls" | "ods" => Ok(SheetFormat::ReadOnlyWorkbook),
            "csv" => Ok(SheetFormat::Csv),
            _ => Err(Error::UnsupportedFormat(path.to_path_buf())),
        }
    }
}

/// Ragged grid of cells with 1-based addressing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    rows: Vec<Vec<Cell>>,
}

impl Table {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from rows of cells; row 1 is `rows[0]`
    pub fn from_rows(rows: Vec<Vec<Cell>>) -> Self {
        let mut table = Self { rows };
        table.trim_trailing_rows();
        table
    }

    /// Row-major view of the cells
    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    /// Number of the last row (0 for an empty table)
    pub fn max_row(&self) -> u32 {
        self.rows.len() as u32
    }

    /// Number of the last column holding a value in any row
    pub fn max_column(&self) -> u32 {
        self.rows
            .iter()
            .filter_map(|row| row.iter().rposition(|c| !c.is_empty()))
            .map(|idx| idx as u32 + 1)
            .max()
            .unwrap_or(0)
    }

    /// Cell at `row`, `col` (both 1-based); out-of-range cells are empty
    pub fn cell(&self, row: u32, col: u32) -> &Cell {
        if row == 0 || col == 0 {
            return &EMPTY;
        }
        self.rows
            .get(row as usize - 1)
            .and_then(|r| r.get(col as usize - 1))
            .unwrap_or(&EMPTY)
    }

    /// Store a cell at `row`, `col` (both 1-based), growing the grid as needed
    ///
    /// Row or column 0 is ignored.
    pub fn set(&mut self, row: u32, col: u32, cell: Cell) {
        if row == 0 || col == 0 {
            return;
        }
        let (r, c) = (row as usize - 1, col as usize - 1);
        if self.rows.len() <= r {
            self.rows.resize_with(r + 1, Vec::new);
        }
        let cells = &mut self.rows[r];
        if cells.len() <= c {
            cells.resize(c + 1, Cell::Empty);
        }
        cells[c] = cell;
    }

    /// First column in `row` whose text equals `header` exactly
    pub fn find_column(&self, row: u32, header: &str) -> Option<u32> {
        (1..=self.max_column()).find(|&col| match self.cell(row, col) {
            Cell::Text(s) => s == header,
            Cell::Empty => false,
            other => other.to_text() == header,
        })
    }

    fn trim_trailing_rows(&mut self) {
        while self
            .rows
            .last()
            .is_some_and(|row| row.iter().all(Cell::is_empty))
        {
            self.rows.pop();
        }
    }

    /// Read the first worksheet of a spreadsheet file
    pub fn read(path: &Path) -> Result<Self> {
        Workbook::read(path)?
            .into_first()
            .ok_or_else(|| Error::spreadsheet(path, "workbook has no worksheets"))
    }

    /// Write the table as a single-sheet spreadsheet
    ///
    /// The format follows the extension of `path`; only `xlsx` and `csv` are
    /// writable.
    pub fn write(&self, path: &Path) -> Result<()> {
        match SheetFormat::from_path(path)? {
            SheetFormat::Xlsx => write_xlsx(path, [(DEFAULT_SHEET_NAME, self)]),
            SheetFormat::Csv => write_csv(path, self),
            SheetFormat::ReadOnlyWorkbook => Err(Error::UnsupportedFormat(path.to_path_buf())),
        }
    }
}

/// A named worksheet
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Worksheet {
    /// Sheet tab name
    pub name: String,
    /// Sheet contents
    pub table: Table,
}

/// Every worksheet of a spreadsheet file, in workbook order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Workbook {
    sheets: Vec<Worksheet>,
}

impl Workbook {
    /// Workbook holding `table` as its only sheet
    pub fn single(table: Table) -> Self {
        Self {
            sheets: vec![Worksheet {
                name: DEFAULT_SHEET_NAME.to_string(),
                table,
            }],
        }
    }

    /// Sheets in workbook order
    pub fn sheets(&self) -> &[Worksheet] {
        &self.sheets
    }

    /// The first sheet, which is the one prices are merged into
    pub fn first_mut(&mut self) -> Option<&mut Table> {
        self.sheets.first_mut().map(|s| &mut s.table)
    }

    /// Take the first sheet, dropping the rest
    pub fn into_first(self) -> Option<Table> {
        self.sheets.into_iter().next().map(|s| s.table)
    }

    /// Read every worksheet of a spreadsheet file
    pub fn read(path: &Path) -> Result<Self> {
        let book = match SheetFormat::from_path(path)? {
            SheetFormat::Csv => Self::single(read_csv(path)?),
            SheetFormat::Xlsx | SheetFormat::ReadOnlyWorkbook => read_workbook(path)?,
        };
        tracing::debug!(
            path = %path.display(),
            sheets = book.sheets.len(),
            "spreadsheet loaded"
        );
        Ok(book)
    }

    /// Write every sheet to `path`
    ///
    /// A csv file holds exactly one sheet; writing a workbook with more to
    /// csv fails rather than dropping sheets.
    pub fn write(&self, path: &Path) -> Result<()> {
        match SheetFormat::from_path(path)? {
            SheetFormat::Xlsx => write_xlsx(
                path,
                self.sheets.iter().map(|s| (s.name.as_str(), &s.table)),
            ),
            SheetFormat::Csv => match self.sheets.as_slice() {
                [sheet] => write_csv(path, &sheet.table),
                sheets => Err(Error::spreadsheet(
                    path,
                    format!("csv holds one sheet, workbook has {}", sheets.len()),
                )),
            },
            SheetFormat::ReadOnlyWorkbook => Err(Error::UnsupportedFormat(path.to_path_buf())),
        }
    }
}

struct CellFormats {
    date: Format,
    time: Format,
    datetime: Format,
    duration: Format,
}

impl CellFormats {
    fn new() -> Self {
        Self {
            date: Format::new().set_num_format("yyyy-mm-dd"),
            time: Format::new().set_num_format("hh:mm:ss"),
            datetime: Format::new().set_num_format("yyyy-mm-dd hh:mm:ss"),
            duration: Format::new().set_num_format("[h]:mm:ss"),
        }
    }

    fn for_serial(&self, serial: f64) -> &Format {
        if serial.fract() == 0.0 {
            &self.date
        } else if (0.0..1.0).contains(&serial) {
            &self.time
        } else {
            &self.datetime
        }
    }
}

fn write_xlsx<'a>(
    path: &Path,
    sheets: impl IntoIterator<Item = (&'a str, &'a Table)>,
) -> Result<()> {
    let formats = CellFormats::new();
    let mut workbook = rust_xlsxwriter::Workbook::new();

    for (name, table) in sheets {
        let sheet = workbook.add_worksheet();
        sheet
            .set_name(name)
            .and_then(|sheet| write_cells(sheet, table, &formats))
            .map_err(|e| Error::spreadsheet(path, e))?;
    }

    workbook.save(path).map_err(|e| Error::spreadsheet(path, e))
}

fn write_cells(
    sheet: &mut rust_xlsxwriter::Worksheet,
    table: &Table,
    formats: &CellFormats,
) -> std::result::Result<(), XlsxError> {
    for (r, cells) in table.rows().iter().enumerate() {
        let row = u32::try_from(r).map_err(|_| XlsxError::RowColumnLimitError)?;
        for (c, cell) in cells.iter().enumerate() {
            let col = u16::try_from(c).map_err(|_| XlsxError::RowColumnLimitError)?;
            match cell {
                Cell::Empty => continue,
                Cell::Text(s) => sheet.write_string(row, col, s.as_str())?,
                Cell::Number(n) => sheet.write_number(row, col, *n)?,
                Cell::Bool(b) => sheet.write_boolean(row, col, *b)?,
                Cell::DateTime(serial) => {
                    sheet.write_number_with_format(row, col, *serial, formats.for_serial(*serial))?
                }
                Cell::Duration(days) => {
                    sheet.write_number_with_format(row, col, *days, &formats.duration)?
                }
                Cell::Formula { formula, value } => sheet.write_formula(
                    row,
                    col,
                    Formula::new(formula.as_str()).set_result(value.to_text()),
                )?,
            };
        }
    }
    Ok(())
}

fn write_csv(path: &Path, table: &Table) -> Result<()> {
    let width = table.max_column() as usize;
    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|e| Error::spreadsheet(path, e))?;

    for cells in table.rows() {
        let record = (0..width).map(|c| cells.get(c).map(Cell::to_text).unwrap_or_default());
        writer
            .write_record(record)
            .map_err(|e| Error::spreadsheet(path, e))?;
    }
    writer.flush()?;
    Ok(())
}

fn read_workbook(path: &Path) -> Result<Workbook> {
    let mut workbook = open_workbook_auto(path).map_err(|e| Error::spreadsheet(path, e))?;

    let mut sheets = Vec::new();
    for name in workbook.sheet_names() {
        let range = workbook
            .worksheet_range(&name)
            .map_err(|e| Error::spreadsheet(path, e))?;
        let mut table = range_to_table(&range);

        match workbook.worksheet_formula(&name) {
            Ok(formulas) => overlay_formulas(&mut table, &formulas),
            Err(e) => tracing::warn!(
                path = %path.display(),
                sheet = %name,
                error = %e,
                "formulas unavailable, keeping cached values"
            ),
        }
        sheets.push(Worksheet { name, table });
    }

    if sheets.is_empty() {
        return Err(Error::spreadsheet(path, "workbook has no worksheets"));
    }
    Ok(Workbook { sheets })
}

fn range_to_table(range: &Range<Data>) -> Table {
    // calamine ranges start at the first used cell; pad back to A1
    let (first_row, first_col) = range.start().unwrap_or((0, 0));
    let mut rows = vec![Vec::new(); first_row as usize];
    for cells in range.rows() {
        let mut row = vec![Cell::Empty; first_col as usize];
        row.extend(cells.iter().map(Cell::from));
        rows.push(row);
    }
    Table::from_rows(rows)
}

fn overlay_formulas(table: &mut Table, formulas: &Range<String>) {
    let (first_row, first_col) = formulas.start().unwrap_or((0, 0));
    for (r, c, formula) in formulas.used_cells() {
        if formula.is_empty() {
            continue;
        }
        let (row, col) = (first_row + r as u32 + 1, first_col + c as u32 + 1);
        let value = Box::new(table.cell(row, col).clone());
        table.set(
            row,
            col,
            Cell::Formula {
                formula: formula.clone(),
                value,
            },
        );
    }
}

fn read_csv(path: &Path) -> Result<Table> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(|e| Error::spreadsheet(path, e))?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| Error::spreadsheet(path, e))?;
        rows.push(record.iter().map(Cell::text).collect());
    }
    Ok(Table::from_rows(rows))
}
