//! Delimited text input and CSV output.

use std::borrow::Cow;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;

use arrow::compute::concat_batches;
use arrow::csv::reader::Format;
use arrow::csv::{ReaderBuilder, WriterBuilder};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::error::ArrowError;
use tracing::{debug, instrument};

use tractscore_shared::{Result, TractScoreError};

use crate::table::Table;

/// UTF-8 byte order mark.
pub const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Text encoding of an input file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Encoding {
    #[default]
    Utf8,
    /// ISO-8859-1 (Census gazetteer files).
    Latin1,
}

/// How to read one delimited file.
#[derive(Debug, Clone)]
pub struct ReadOptions {
    pub delimiter: u8,
    pub encoding: Encoding,
    /// Columns kept as text even when every cell looks numeric (ids with leading zeros).
    pub string_columns: Vec<String>,
    /// Only keep these columns, in file order. `None` keeps all.
    pub columns: Option<Vec<String>>,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            encoding: Encoding::Utf8,
            string_columns: Vec::new(),
            columns: None,
        }
    }
}

impl ReadOptions {
    pub fn csv() -> Self {
        Self::default()
    }

    pub fn tsv() -> Self {
        Self {
            delimiter: b'\t',
            ..Self::default()
        }
    }

    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn with_string_columns<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.string_columns = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_columns<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.columns = Some(names.into_iter().map(Into::into).collect());
        self
    }
}

/// Read a delimited file from disk.
#[instrument(skip(path, options), fields(path = %path.display()))]
pub fn read_delimited(path: &Path, options: &ReadOptions) -> Result<Table> {
    let file = File::open(path).map_err(|e| TractScoreError::io(path, e))?;
    let table = read_delimited_from(file, options)
        .map_err(|e| match e {
            TractScoreError::Parse { message } => {
                TractScoreError::parse(format!("{}: {message}", path.display()))
            }
            other => other,
        })?;
    debug!(rows = table.len(), columns = table.width(), "read table");
    Ok(table)
}

/// Read delimited text from any reader.
///
/// Column types are inferred from the data; header names are trimmed.
pub fn read_delimited_from(mut reader: impl Read, options: &ReadOptions) -> Result<Table> {
    let mut bytes = Vec::new();
    reader
        .read_to_end(&mut bytes)
        .map_err(|e| TractScoreError::parse(format!("reading input: {e}")))?;
    let decoded = decode(&bytes, options.encoding)?;
    let text = decoded.strip_prefix('\u{feff}').unwrap_or(decoded.as_ref());

    let (inferred, _) = Format::default()
        .with_header(true)
        .with_delimiter(options.delimiter)
        .infer_schema(text.as_bytes(), None)
        .map_err(parse_error)?;
    let fields: Vec<Field> = inferred
        .fields()
        .iter()
        .map(|f| {
            let name = f.name().trim();
            let data_type = if options.string_columns.iter().any(|s| s == name) {
                DataType::Utf8
            } else {
                f.data_type().clone()
            };
            Field::new(name, data_type, true)
        })
        .collect();
    let schema = Arc::new(Schema::new(fields));

    let projection: Vec<usize> = match &options.columns {
        Some(wanted) => {
            if let Some(name) = wanted.iter().find(|n| schema.index_of(n.as_str()).is_err()) {
                return Err(TractScoreError::parse(format!(
                    "expected column `{name}` not found in header"
                )));
            }
            (0..schema.fields().len())
                .filter(|&i| wanted.iter().any(|n| n == schema.field(i).name()))
                .collect()
        }
        None => (0..schema.fields().len()).collect(),
    };
    let projected = Arc::new(schema.project(&projection).map_err(parse_error)?);

    let batches = ReaderBuilder::new(Arc::clone(&schema))
        .with_header(true)
        .with_delimiter(options.delimiter)
        .with_projection(projection)
        .build(text.as_bytes())
        .map_err(parse_error)?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(parse_error)?;
    let batch = concat_batches(&projected, &batches).map_err(parse_error)?;
    Table::from_batch(batch)
}

/// Write `table` as comma-separated text with a header row.
pub fn write_csv(table: &Table, mut writer: impl Write, bom: bool) -> Result<()> {
    if bom {
        writer
            .write_all(UTF8_BOM)
            .map_err(|e| TractScoreError::Artifact(format!("writing csv: {e}")))?;
    }
    let mut csv_writer = WriterBuilder::new().with_header(true).build(writer);
    csv_writer
        .write(table.batch())
        .map_err(|e| TractScoreError::Artifact(format!("writing csv rows: {e}")))?;
    csv_writer
        .into_inner()
        .flush()
        .map_err(|e| TractScoreError::Artifact(format!("flushing csv: {e}")))?;
    Ok(())
}

/// Decode to text. Latin-1 input is read as windows-1252, its superset.
fn decode(bytes: &[u8], encoding: Encoding) -> Result<Cow<'_, str>> {
    match encoding {
        Encoding::Utf8 => encoding_rs::UTF_8
            .decode_without_bom_handling_and_without_replacement(bytes)
            .ok_or_else(|| TractScoreError::parse("input is not valid UTF-8")),
        Encoding::Latin1 => Ok(encoding_rs::WINDOWS_1252
            .decode_without_bom_handling(bytes)
            .0),
    }
}

fn parse_error(e: ArrowError) -> TractScoreError {
    TractScoreError::parse(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn infers_column_types() {
        let input = "GEOID10_TRACT,Total population,Score,Flag,Name\n\
                     01001020100,1200,0.5,True,Autauga\n\
                     72001956300,,0.25,False,Adjuntas\n";
        let table = read_delimited_from(input.as_bytes(), &ReadOptions::csv()).unwrap();

        // Numeric-looking ids lose their leading zero unless forced to text.
        assert_eq!(table.value(0, "GEOID10_TRACT"), Some(Value::Int(1001020100)));
        assert_eq!(table.value(0, "Total population"), Some(Value::Int(1200)));
        assert_eq!(table.value(1, "Total population"), Some(Value::Null));
        assert_eq!(table.value(1, "Score"), Some(Value::Float(0.25)));
        assert_eq!(table.value(0, "Flag"), Some(Value::Bool(true)));
        assert_eq!(table.value(1, "Name"), Some(Value::from("Adjuntas")));
    }

    #[test]
    fn string_columns_keep_leading_zeros() {
        let input = "\u{feff}GEOID10_TRACT,Score\n01001020100,1\n";
        let options = ReadOptions::csv().with_string_columns(["GEOID10_TRACT"]);
        let table = read_delimited_from(input.as_bytes(), &options).unwrap();

        assert_eq!(table.columns(), &["GEOID10_TRACT", "Score"]);
        assert_eq!(table.value(0, "GEOID10_TRACT"), Some(Value::from("01001020100")));
    }

    #[test]
    fn latin1_tab_separated_with_column_subset() {
        // "Doña Ana County" in ISO-8859-1; header padded like the gazetteer file.
        let mut input = b"USPS\tGEOID\tNAME\tALAND  \n".to_vec();
        input.extend_from_slice(b"NM\t35013\tDo\xf1a Ana County\t9860\n");
        let options = ReadOptions::tsv()
            .with_encoding(Encoding::Latin1)
            .with_string_columns(["GEOID", "USPS"])
            .with_columns(["USPS", "GEOID", "NAME"]);
        let table = read_delimited_from(input.as_slice(), &options).unwrap();

        assert_eq!(table.columns(), &["USPS", "GEOID", "NAME"]);
        assert_eq!(table.value(0, "NAME"), Some(Value::from("Doña Ana County")));
        assert_eq!(table.value(0, "GEOID"), Some(Value::from("35013")));
    }

    #[test]
    fn missing_selected_column_is_a_parse_error() {
        let options = ReadOptions::csv().with_columns(["fips"]);
        let err = read_delimited_from("a,b\n1,2\n".as_bytes(), &options).unwrap_err();
        assert!(matches!(err, TractScoreError::Parse { .. }));
    }

    #[test]
    fn ragged_input_is_a_parse_error() {
        let err = read_delimited_from("a,b\n1\n".as_bytes(), &ReadOptions::csv()).unwrap_err();
        assert!(matches!(err, TractScoreError::Parse { .. }));
    }

    #[test]
    fn write_csv_with_bom() {
        let table = Table::from_rows(
            ["Census tract 2010 ID", "Score"],
            vec![
                vec!["01001020100".into(), 0.5.into()],
                vec!["72001956300".into(), Value::Null],
            ],
        )
        .unwrap();
        let mut out = Vec::new();
        write_csv(&table, &mut out, true).unwrap();

        assert!(out.starts_with(UTF8_BOM));
        let text = String::from_utf8(out[UTF8_BOM.len()..].to_vec()).unwrap();
        assert_eq!(text, "Census tract 2010 ID,Score\n01001020100,0.5\n72001956300,\n");
    }
}
