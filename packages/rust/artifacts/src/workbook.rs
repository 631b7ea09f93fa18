//! Formatted multi-sheet workbook output.

use std::path::Path;

use rust_xlsxwriter::{Format, FormatAlign, Workbook, Worksheet, XlsxError};
use tracing::debug;

use tractscore_shared::{Result, TractScoreError};
use tractscore_table::{Table, Value};

use crate::write_bytes;

/// One worksheet: its tab name and contents.
#[derive(Debug, Clone, Copy)]
pub struct Sheet<'a> {
    pub name: &'a str,
    pub table: &'a Table,
}

/// Formatting applied uniformly to every sheet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorkbookFormat {
    /// Width of every data column, in character units.
    pub column_width: f64,
}

/// Write `sheets` into one workbook at `path`.
///
/// Headers are bold, wrapped and bottom-aligned; nulls are left as empty cells.
pub fn write_workbook(path: &Path, sheets: &[Sheet<'_>], format: WorkbookFormat) -> Result<()> {
    if sheets.is_empty() {
        return Err(TractScoreError::validation("workbook needs at least one sheet"));
    }

    let header = Format::new()
        .set_bold()
        .set_text_wrap()
        .set_align(FormatAlign::Bottom);

    let mut workbook = Workbook::new();
    for sheet in sheets {
        let worksheet = workbook.add_worksheet();
        fill_sheet(worksheet, sheet, &header, format).map_err(|e| xlsx_error(sheet.name, e))?;
        debug!(sheet = sheet.name, rows = sheet.table.len(), "filled worksheet");
    }

    let bytes = workbook
        .save_to_buffer()
        .map_err(|e| TractScoreError::Artifact(format!("encoding workbook: {e}")))?;
    write_bytes(path, &bytes)?;
    debug!(path = %path.display(), sheets = sheets.len(), "wrote workbook");
    Ok(())
}

fn fill_sheet(
    worksheet: &mut Worksheet,
    sheet: &Sheet<'_>,
    header: &Format,
    format: WorkbookFormat,
) -> std::result::Result<(), XlsxError> {
    worksheet.set_name(sheet.name)?;

    for (col, name) in sheet.table.columns().iter().enumerate() {
        let col = column_number(col)?;
        worksheet.write_string_with_format(0, col, name, header)?;
        worksheet.set_column_width(col, format.column_width)?;
    }

    let columns = sheet.table.batch().columns();
    for row_idx in 0..sheet.table.len() {
        let row_num = u32::try_from(row_idx + 1).map_err(|_| XlsxError::RowColumnLimitError)?;
        for (col, array) in columns.iter().enumerate() {
            let col = column_number(col)?;
            match Value::from_array(array.as_ref(), row_idx) {
                Value::Null => {}
                Value::Float(v) if v.is_nan() => {}
                Value::Bool(v) => {
                    worksheet.write_boolean(row_num, col, v)?;
                }
                Value::Int(v) => {
                    worksheet.write_number(row_num, col, v as f64)?;
                }
                Value::Float(v) => {
                    worksheet.write_number(row_num, col, v)?;
                }
                Value::Str(s) => {
                    worksheet.write_string(row_num, col, &s)?;
                }
            }
        }
    }
    Ok(())
}

fn column_number(col: usize) -> std::result::Result<u16, XlsxError> {
    u16::try_from(col).map_err(|_| XlsxError::RowColumnLimitError)
}

fn xlsx_error(sheet: &str, e: XlsxError) -> TractScoreError {
    TractScoreError::Artifact(format!("worksheet `{sheet}`: {e}"))
}
