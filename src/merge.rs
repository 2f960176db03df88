//! Merge fetched prices back onto spreadsheet rows
//!
//! [`PriceMerger`] groups data rows by their normalized article, asks its
//! [`PriceSource`] once for every unique article, and appends four price
//! columns after the last used column. A price that cannot be resolved is
//! written as [`ERROR_SENTINEL`], one cell at a time.

use crate::error::{Error, FetchError, Result};
use crate::fetcher::{Payload, PriceSource};
use crate::product::{PriceField, PriceRecord};
use crate::sheet::{Cell, Table, Workbook};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Marker written in place of a price that could not be resolved
pub const ERROR_SENTINEL: &str = "ОШИБКА";

/// Normalized article identifier of a cell: trimmed text, empty when blank
pub fn normalize_article(cell: &Cell) -> String {
    cell.to_text().trim().to_string()
}

/// Data rows grouped by normalized article
///
/// Articles keep the order of their first row; rows keep table order within
/// each group. The blank article collects every row without an identifier.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowGroups {
    order: Vec<String>,
    rows: HashMap<String, Vec<u32>>,
}

impl RowGroups {
    /// Group every row below `header_row` by the article in `article_col`
    pub fn build(table: &Table, article_col: u32, header_row: u32) -> Self {
        let mut groups = Self::default();
        let Some(first_row) = header_row.checked_add(1) else {
            return groups;
        };
        for row in first_row..=table.max_row() {
            let article = normalize_article(table.cell(row, article_col));
            groups.push(article, row);
        }
        groups
    }

    fn push(&mut self, article: String, row: u32) {
        match self.rows.get_mut(&article) {
            Some(rows) => rows.push(row),
            None => {
                self.order.push(article.clone());
                self.rows.insert(article, vec![row]);
            }
        }
    }

    /// Unique articles in first-appearance order
    pub fn articles(&self) -> &[String] {
        &self.order
    }

    /// Rows belonging to `article`, empty if the article never appears
    pub fn rows(&self, article: &str) -> &[u32] {
        self.rows.get(article).map(Vec::as_slice).unwrap_or(&[])
    }

    /// `(article, rows)` pairs in first-appearance order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u32])> {
        self.order.iter().map(|a| (a.as_str(), self.rows(a)))
    }

    /// Number of unique articles
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether there are no data rows at all
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Summary of one merge run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Data rows below the header
    pub data_rows: usize,
    /// Unique articles, the blank one included
    pub articles: usize,
    /// Articles whose payload produced a price record
    pub resolved: usize,
    /// Articles that failed entirely
    pub failed: usize,
    /// Rows holding at least one sentinel
    pub rows_with_errors: usize,
    /// 1-based column of the first appended price column
    pub first_price_column: u32,
}

/// Appends catalog prices to a table
pub struct PriceMerger<S> {
    source: S,
}

impl<S: PriceSource> PriceMerger<S> {
    /// Create a merger resolving articles through `source`
    pub fn new(source: S) -> Self {
        Self { source }
    }

    /// The underlying price source
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Append price columns to `table` in place
    ///
    /// Fails with [`Error::ColumnNotFound`] before contacting the source
    /// when no cell of `header_row` equals `article_column`.
    pub async fn process_table(
        &self,
        table: &mut Table,
        article_column: &str,
        header_row: u32,
    ) -> Result<MergeReport> {
        let article_col = table
            .find_column(header_row, article_column)
            .ok_or_else(|| Error::ColumnNotFound {
                column: article_column.to_string(),
                header_row,
            })?;

        let groups = RowGroups::build(table, article_col, header_row);

        let first_price_column = table.max_column() + 1;
        for (offset, field) in PriceField::ALL.iter().enumerate() {
            table.set(header_row, first_price_column + offset as u32, Cell::text(field.key()));
        }

        let results = self.source.get_products(groups.articles()).await;
        let outcomes: HashMap<&str, &std::result::Result<Payload, FetchError>> = results
            .iter()
            .map(|r| (r.article.as_str(), &r.outcome))
            .collect();

        let mut report = MergeReport {
            articles: groups.len(),
            first_price_column,
            ..Default::default()
        };

        for (article, rows) in groups.iter() {
            let record = resolve(article, outcomes.get(article).copied());
            match record {
                Some(_) => report.resolved += 1,
                None => report.failed += 1,
            }

            for &row in rows {
                report.data_rows += 1;
                let mut row_has_error = false;
                for (offset, field) in PriceField::ALL.iter().enumerate() {
                    let cell = match record.and_then(|r| r.get(*field)) {
                        Some(price) => Cell::Number(price),
                        None => {
                            row_has_error = true;
                            Cell::text(ERROR_SENTINEL)
                        }
                    };
                    table.set(row, first_price_column + offset as u32, cell);
                }
                if row_has_error {
                    report.rows_with_errors += 1;
                }
            }
        }

        Ok(report)
    }

    /// Read `input`, append prices to its first sheet, write the result to
    /// `output`
    ///
    /// Every other sheet is carried through unchanged. `output` may equal
    /// `input`; deciding whether to overwrite the source is the caller's
    /// business. Returns the path written.
    pub async fn process_file(
        &self,
        input: &Path,
        output: &Path,
        article_column: &str,
        header_row: u32,
    ) -> Result<PathBuf> {
        let mut book = Workbook::read(input)?;
        let table = book
            .first_mut()
            .ok_or_else(|| Error::spreadsheet(input, "workbook has no worksheets"))?;
        let report = self
            .process_table(table, article_column, header_row)
            .await?;
        book.write(output)?;

        tracing::info!(
            output = %output.display(),
            rows = report.data_rows,
            articles = report.articles,
            resolved = report.resolved,
            failed = report.failed,
            rows_with_errors = report.rows_with_errors,
            "prices written"
        );
        Ok(output.to_path_buf())
    }
}

/// Turn one article's outcome into a price record, `None` if nothing is usable
fn resolve(
    article: &str,
    outcome: Option<&std::result::Result<Payload, FetchError>>,
) -> Option<PriceRecord> {
    match outcome {
        None => {
            tracing::warn!(article = %article, "no fetch result for article");
            None
        }
        Some(Err(_)) => None,
        Some(Ok(Payload::Record(record))) => Some(*record),
        Some(Ok(Payload::Raw(body))) => match PriceRecord::decode(body) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(article = %article, error = %e, "unusable product payload");
                None
            }
        },
    }
}
