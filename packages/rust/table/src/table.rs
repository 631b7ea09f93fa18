//! Column-oriented table backed by an Arrow [`RecordBatch`].

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, BooleanArray, StringArray, UInt32Array, UInt64Array};
use arrow::compute::{
    SortColumn, SortOptions, cast, filter_record_batch, lexsort_to_indices, take,
    take_record_batch,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::error::ArrowError;
use arrow::json::WriterBuilder;
use arrow::json::writer::JsonArray;
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use tracing::debug;

use tractscore_shared::{Result, TractScoreError};

use crate::value::{Value, values_to_array};

/// Suffix given to a left column whose name collides with a joined right column.
const LEFT_SUFFIX: &str = "_x";
/// Suffix given to a right column whose name collides with a left column.
const RIGHT_SUFFIX: &str = "_y";

/// A record batch with unique column names.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    batch: RecordBatch,
}

impl Table {
    /// Wrap a batch, checking its column names are unique.
    pub fn from_batch(batch: RecordBatch) -> Result<Self> {
        let mut seen = HashSet::new();
        if let Some(dup) = batch
            .schema_ref()
            .fields()
            .iter()
            .find(|f| !seen.insert(f.name().as_str()))
        {
            return Err(TractScoreError::validation(format!(
                "column `{}` appears more than once",
                dup.name()
            )));
        }
        Ok(Self { batch })
    }

    /// Build a table from named columns of equal length.
    pub fn from_columns<S: Into<String>>(
        columns: impl IntoIterator<Item = (S, ArrayRef)>,
    ) -> Result<Self> {
        let (names, arrays): (Vec<String>, Vec<ArrayRef>) =
            columns.into_iter().map(|(n, a)| (n.into(), a)).unzip();
        let rows = arrays.first().map_or(0, |a| a.len());
        let fields = names
            .into_iter()
            .zip(&arrays)
            .map(|(name, array)| Field::new(name, array.data_type().clone(), true))
            .collect();
        build(fields, arrays, rows)
    }

    /// Build a table from rows of cells; each column takes the narrowest type
    /// that holds all of its cells.
    pub fn from_rows<S: Into<String>>(
        columns: impl IntoIterator<Item = S>,
        rows: Vec<Vec<Value>>,
    ) -> Result<Self> {
        let names: Vec<String> = columns.into_iter().map(Into::into).collect();
        if let Some(row) = rows.iter().find(|r| r.len() != names.len()) {
            return Err(TractScoreError::validation(format!(
                "row has {} values, table has {} columns",
                row.len(),
                names.len()
            )));
        }
        let arrays: Vec<ArrayRef> = (0..names.len())
            .map(|c| {
                let cells: Vec<Value> = rows.iter().map(|r| r[c].clone()).collect();
                values_to_array(&cells)
            })
            .collect();
        let fields = names
            .into_iter()
            .zip(&arrays)
            .map(|(name, array)| Field::new(name, array.data_type().clone(), true))
            .collect();
        build(fields, arrays, rows.len())
    }

    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    pub fn into_batch(self) -> RecordBatch {
        self.batch
    }

    /// Column names in order.
    pub fn columns(&self) -> Vec<String> {
        self.batch
            .schema_ref()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.num_rows() == 0
    }

    pub fn width(&self) -> usize {
        self.batch.num_columns()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.batch.schema_ref().index_of(name).ok()
    }

    /// Index of a column that must exist.
    pub fn require_column(&self, name: &str) -> Result<usize> {
        self.column_index(name)
            .ok_or_else(|| TractScoreError::validation(format!("missing column `{name}`")))
    }

    pub fn column(&self, name: &str) -> Result<&ArrayRef> {
        let idx = self.require_column(name)?;
        Ok(self.batch.column(idx))
    }

    /// A column cast to text; nulls stay null.
    pub fn text_column(&self, name: &str) -> Result<StringArray> {
        let column = self.column(name)?;
        let text = cast(column.as_ref(), &DataType::Utf8).map_err(invalid)?;
        text.as_any()
            .downcast_ref::<StringArray>()
            .cloned()
            .ok_or_else(|| {
                TractScoreError::validation(format!("column `{name}` cannot be read as text"))
            })
    }

    /// Cell at `row` in column `name`.
    pub fn value(&self, row: usize, name: &str) -> Option<Value> {
        let idx = self.column_index(name)?;
        (row < self.len()).then(|| Value::from_array(self.batch.column(idx).as_ref(), row))
    }

    /// New table with only `names`, in that order.
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Result<Table> {
        let indices = names
            .iter()
            .map(|n| self.require_column(n.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        let batch = self.batch.project(&indices).map_err(invalid)?;
        Table::from_batch(batch)
    }

    /// Rename columns found in `mapping` (old → new); others keep their name.
    pub fn rename(&self, mapping: &HashMap<&str, &str>) -> Result<Table> {
        let fields = self
            .batch
            .schema_ref()
            .fields()
            .iter()
            .map(|f| {
                let name = mapping.get(f.name().as_str()).copied().unwrap_or(f.name().as_str());
                Field::new(name, f.data_type().clone(), f.is_nullable())
            })
            .collect();
        build(fields, self.batch.columns().to_vec(), self.len())
            .map_err(|e| TractScoreError::validation(format!("renaming columns: {e}")))
    }

    /// Replace column `name` in place, or append it when absent.
    pub fn with_column(&self, name: &str, array: ArrayRef) -> Result<Table> {
        if array.len() != self.len() {
            return Err(TractScoreError::validation(format!(
                "column `{name}` has {} values, table has {} rows",
                array.len(),
                self.len()
            )));
        }
        let schema = self.batch.schema();
        let mut fields: Vec<Field> = schema.fields().iter().map(|f| f.as_ref().clone()).collect();
        let mut columns = self.batch.columns().to_vec();
        let field = Field::new(name, array.data_type().clone(), true);
        match self.column_index(name) {
            Some(idx) => {
                fields[idx] = field;
                columns[idx] = array;
            }
            None => {
                fields.push(field);
                columns.push(array);
            }
        }
        build(fields, columns, self.len())
    }

    /// Rows where `mask` is true.
    pub fn filter(&self, mask: &BooleanArray) -> Result<Table> {
        let batch = filter_record_batch(&self.batch, mask).map_err(invalid)?;
        Ok(Self { batch })
    }

    /// Stable ascending sort by one column, nulls last.
    pub fn sort_by_column(&self, name: &str) -> Result<Table> {
        let idx = self.require_column(name)?;
        let rows = u32::try_from(self.len())
            .map_err(|_| TractScoreError::validation("table too large to sort"))?;
        // Row position as a tie-breaker keeps equal keys in input order.
        let position: ArrayRef = Arc::new(UInt32Array::from_iter_values(0..rows));
        let indices = lexsort_to_indices(
            &[
                SortColumn {
                    values: Arc::clone(self.batch.column(idx)),
                    options: Some(SortOptions {
                        descending: false,
                        nulls_first: false,
                    }),
                },
                SortColumn {
                    values: position,
                    options: None,
                },
            ],
            None,
        )
        .map_err(invalid)?;
        let batch = take_record_batch(&self.batch, &indices).map_err(invalid)?;
        Ok(Self { batch })
    }

    /// First value of `name` that occurs on more than one row, as text.
    /// Nulls compare equal to each other.
    pub fn first_duplicate(&self, name: &str) -> Result<Option<String>> {
        let keys = self.text_column(name)?;
        let mut seen = HashSet::with_capacity(keys.len());
        for key in keys.iter() {
            let key = key.unwrap_or_default();
            if !seen.insert(key) {
                return Ok(Some(key.to_string()));
            }
        }
        Ok(None)
    }

    /// Left join `right` on `left_on == right_on`.
    ///
    /// Every left row is kept; left rows without a match get nulls in the
    /// right columns, and a left row matching several right rows is repeated
    /// once per match. When both key columns share a name, the output has a
    /// single key column. Other colliding names get `_x` / `_y` suffixes.
    /// Keys are compared as text and null keys never match.
    pub fn left_join(&self, right: &Table, left_on: &str, right_on: &str) -> Result<Table> {
        let left_keys = self.text_column(left_on)?;
        let right_keys = right.text_column(right_on)?;
        let right_key_idx = right.require_column(right_on)?;
        let merged_key = left_on == right_on;

        let mut lookup: HashMap<&str, Vec<u64>> = HashMap::new();
        for (i, key) in right_keys.iter().enumerate() {
            if let Some(key) = key {
                lookup.entry(key).or_default().push(i as u64);
            }
        }

        let mut left_rows: Vec<u64> = Vec::with_capacity(self.len());
        let mut right_rows: Vec<Option<u64>> = Vec::with_capacity(self.len());
        let mut unmatched = 0usize;
        for (i, key) in left_keys.iter().enumerate() {
            match key.and_then(|k| lookup.get(k)) {
                Some(hits) => {
                    for &hit in hits {
                        left_rows.push(i as u64);
                        right_rows.push(Some(hit));
                    }
                }
                None => {
                    unmatched += 1;
                    left_rows.push(i as u64);
                    right_rows.push(None);
                }
            }
        }
        let output_rows = left_rows.len();
        let left_rows = UInt64Array::from(left_rows);
        let right_rows = UInt64Array::from(right_rows);

        let left_schema = self.batch.schema();
        let right_schema = right.batch.schema();
        let right_keep: Vec<usize> = (0..right.width())
            .filter(|&i| !(merged_key && i == right_key_idx))
            .collect();
        let right_names: HashSet<&str> = right_keep
            .iter()
            .map(|&i| right_schema.field(i).name().as_str())
            .collect();
        let left_names: HashSet<&str> = left_schema
            .fields()
            .iter()
            .map(|f| f.name().as_str())
            .collect();

        let mut fields = Vec::with_capacity(self.width() + right_keep.len());
        let mut columns = Vec::with_capacity(self.width() + right_keep.len());
        for (field, column) in left_schema.fields().iter().zip(self.batch.columns()) {
            let name = if right_names.contains(field.name().as_str()) {
                format!("{}{LEFT_SUFFIX}", field.name())
            } else {
                field.name().clone()
            };
            let taken = take(column.as_ref(), &left_rows, None).map_err(invalid)?;
            fields.push(Field::new(name, taken.data_type().clone(), true));
            columns.push(taken);
        }
        for &i in &right_keep {
            let field = right_schema.field(i);
            let name = if left_names.contains(field.name().as_str()) {
                format!("{}{RIGHT_SUFFIX}", field.name())
            } else {
                field.name().clone()
            };
            let taken = take(right.batch.column(i).as_ref(), &right_rows, None).map_err(invalid)?;
            fields.push(Field::new(name, taken.data_type().clone(), true));
            columns.push(taken);
        }

        debug!(
            left_rows = self.len(),
            right_rows = right.len(),
            output_rows,
            unmatched,
            key = left_on,
            "left join"
        );

        build(fields, columns, output_rows)
    }

    /// Write the rows as a JSON array of objects keyed by column name, in
    /// column order. Nulls are written explicitly.
    pub fn write_records<W: Write>(&self, writer: W) -> Result<()> {
        let mut json = WriterBuilder::new()
            .with_explicit_nulls(true)
            .build::<_, JsonArray>(writer);
        json.write(&self.batch)
            .map_err(|e| TractScoreError::Artifact(format!("writing json records: {e}")))?;
        json.finish()
            .map_err(|e| TractScoreError::Artifact(format!("finishing json records: {e}")))?;
        Ok(())
    }
}

fn build(fields: Vec<Field>, columns: Vec<ArrayRef>, rows: usize) -> Result<Table> {
    let options = RecordBatchOptions::new().with_row_count(Some(rows));
    let batch = RecordBatch::try_new_with_options(Arc::new(Schema::new(fields)), columns, &options)
        .map_err(invalid)?;
    Table::from_batch(batch)
}

fn invalid(e: ArrowError) -> TractScoreError {
    TractScoreError::validation(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Float64Array;

    fn scores() -> Table {
        Table::from_rows(
            ["GEOID10_TRACT", "Score"],
            vec![
                vec!["01001020100".into(), 0.5.into()],
                vec!["72001956300".into(), 0.25.into()],
                vec!["66010950100".into(), Value::Null],
            ],
        )
        .unwrap()
    }

    #[test]
    fn from_rows_rejects_ragged_rows() {
        let err = Table::from_rows(["a", "b"], vec![vec![Value::Int(1)]]).unwrap_err();
        assert!(err.to_string().contains("row has 1 values"));
    }

    #[test]
    fn from_rows_rejects_duplicate_columns() {
        assert!(Table::from_rows(["a", "a"], vec![]).is_err());
    }

    #[test]
    fn from_columns_rejects_uneven_lengths() {
        let long: ArrayRef = Arc::new(Float64Array::from(vec![1.0, 2.0]));
        let short: ArrayRef = Arc::new(Float64Array::from(vec![1.0]));
        assert!(Table::from_columns([("a", long), ("b", short)]).is_err());
    }

    #[test]
    fn select_reorders_and_fails_on_missing() {
        let table = scores();
        let picked = table.select(&["Score", "GEOID10_TRACT"]).unwrap();
        assert_eq!(picked.columns(), ["Score", "GEOID10_TRACT"]);
        assert_eq!(picked.value(0, "GEOID10_TRACT"), Some(Value::from("01001020100")));

        let err = table.select(&["Missing"]).unwrap_err();
        assert!(err.to_string().contains("missing column `Missing`"));
    }

    #[test]
    fn left_join_keeps_every_left_row() {
        let table = scores();
        let keys = table.text_column("GEOID10_TRACT").unwrap();
        let county: StringArray = keys
            .iter()
            .map(|k| k.map(tractscore_shared::county_prefix))
            .collect();
        let table = table.with_column("GEOID", Arc::new(county)).unwrap();
        let counties = Table::from_rows(
            ["GEOID", "County Name"],
            vec![vec!["01001".into(), "Autauga County".into()]],
        )
        .unwrap();

        let joined = table.left_join(&counties, "GEOID", "GEOID").unwrap();
        assert_eq!(joined.len(), 3);
        assert_eq!(joined.columns(), ["GEOID10_TRACT", "Score", "GEOID", "County Name"]);
        assert_eq!(joined.value(0, "County Name"), Some(Value::from("Autauga County")));
        assert_eq!(joined.value(1, "County Name"), Some(Value::Null));
        assert_eq!(joined.value(1, "Score"), Some(Value::Float(0.25)));
    }

    #[test]
    fn left_join_repeats_rows_for_duplicate_right_keys() {
        let table = scores();
        let right = Table::from_rows(
            ["GEOID10_TRACT", "Extra"],
            vec![
                vec!["01001020100".into(), Value::Int(1)],
                vec!["01001020100".into(), Value::Int(2)],
            ],
        )
        .unwrap();

        let joined = table.left_join(&right, "GEOID10_TRACT", "GEOID10_TRACT").unwrap();
        assert_eq!(joined.len(), 4);
        assert_eq!(joined.value(1, "Extra"), Some(Value::Int(2)));
        assert_eq!(
            joined.first_duplicate("GEOID10_TRACT").unwrap(),
            Some("01001020100".to_string())
        );
    }

    #[test]
    fn left_join_suffixes_colliding_columns() {
        let table = scores();
        let right = Table::from_rows(
            ["Key", "Score"],
            vec![vec!["01001020100".into(), Value::Int(9)]],
        )
        .unwrap();

        let joined = table.left_join(&right, "GEOID10_TRACT", "Key").unwrap();
        assert_eq!(joined.columns(), ["GEOID10_TRACT", "Score_x", "Key", "Score_y"]);
    }

    #[test]
    fn null_keys_never_match() {
        let left = Table::from_rows(["k"], vec![vec![Value::Null], vec!["a".into()]]).unwrap();
        let right = Table::from_rows(
            ["k", "v"],
            vec![vec![Value::Null, Value::Int(1)], vec!["a".into(), Value::Int(2)]],
        )
        .unwrap();

        let joined = left.left_join(&right, "k", "k").unwrap();
        assert_eq!(joined.value(0, "v"), Some(Value::Null));
        assert_eq!(joined.value(1, "v"), Some(Value::Int(2)));
    }

    #[test]
    fn rename_and_sort() {
        let table = scores()
            .rename(&HashMap::from([("Score", "Published score")]))
            .unwrap()
            .sort_by_column("Published score")
            .unwrap();

        assert_eq!(table.columns()[1], "Published score");
        assert_eq!(table.value(0, "Published score"), Some(Value::Float(0.25)));
        assert_eq!(table.value(2, "Published score"), Some(Value::Null));
    }

    #[test]
    fn sort_keeps_input_order_for_equal_keys() {
        let table = Table::from_rows(
            ["k", "n"],
            vec![
                vec!["b".into(), Value::Int(1)],
                vec!["a".into(), Value::Int(2)],
                vec!["b".into(), Value::Int(3)],
                vec!["a".into(), Value::Int(4)],
            ],
        )
        .unwrap()
        .sort_by_column("k")
        .unwrap();

        let order: Vec<Value> = (0..4).filter_map(|r| table.value(r, "n")).collect();
        assert_eq!(order, [Value::Int(2), Value::Int(4), Value::Int(1), Value::Int(3)]);
    }

    #[test]
    fn rename_into_duplicate_fails() {
        let err = scores()
            .rename(&HashMap::from([("Score", "GEOID10_TRACT")]))
            .unwrap_err();
        assert!(err.to_string().contains("appears more than once"));
    }

    #[test]
    fn with_column_replaces_in_place() {
        let flags: ArrayRef = Arc::new(BooleanArray::from(vec![true, false, true]));
        let table = scores().with_column("Score", flags).unwrap();
        assert_eq!(table.columns(), ["GEOID10_TRACT", "Score"]);
        assert_eq!(table.value(1, "Score"), Some(Value::Bool(false)));

        let short: ArrayRef = Arc::new(BooleanArray::from(vec![true]));
        assert!(table.with_column("Other", short).is_err());
    }

    #[test]
    fn filter_keeps_masked_rows() {
        let mask = BooleanArray::from(vec![true, false, true]);
        let table = scores().filter(&mask).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.value(1, "GEOID10_TRACT"), Some(Value::from("66010950100")));
    }

    #[test]
    fn records_preserve_column_order_and_nulls() {
        let table = scores().select(&["Score", "GEOID10_TRACT"]).unwrap();
        let mut out = Vec::new();
        table.write_records(&mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with(r#"[{"Score":0.5,"GEOID10_TRACT":"01001020100"}"#));
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert!(parsed[2]["Score"].is_null());
    }
}
