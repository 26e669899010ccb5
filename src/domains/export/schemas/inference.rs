use crate::domains::export::types::{ColumnField, ColumnSchema, ExportType, SourceColumn};
use crate::types::SqlValue;

/// Observed value kinds in one column, ignoring nulls.
#[derive(Debug, Default, Clone, Copy)]
struct ColumnProfile {
    non_null: usize,
    ints: usize,
    floats: usize,
    bools: usize,
}

impl ColumnProfile {
    fn observe(&mut self, value: &SqlValue) {
        match value {
            SqlValue::Null => return,
            SqlValue::Int(_) => self.ints += 1,
            SqlValue::Float(_) | SqlValue::Decimal(_) => self.floats += 1,
            SqlValue::Bool(_) => self.bools += 1,
            SqlValue::Text(_) => {}
        }
        self.non_null += 1;
    }

    /// Classification in precedence order: Int64, Float64, Bool, String.
    fn classify(&self) -> Option<ExportType> {
        if self.non_null == 0 {
            return None;
        }
        if self.ints == self.non_null {
            Some(ExportType::Int64)
        } else if self.ints + self.floats == self.non_null {
            Some(ExportType::Float64)
        } else if self.bools == self.non_null {
            Some(ExportType::Bool)
        } else {
            Some(ExportType::String)
        }
    }
}

/// Derive a column schema from extracted rows.
///
/// Values must already be coerced. Columns with no non-null values (which
/// includes every column of an empty row set) are typed from their declared
/// source type. Never fails: anything unclassifiable becomes `String`.
pub fn infer(columns: &[SourceColumn], rows: &[Vec<SqlValue>]) -> ColumnSchema {
    let mut profiles = vec![ColumnProfile::default(); columns.len()];
    for row in rows {
        for (profile, value) in profiles.iter_mut().zip(row.iter()) {
            profile.observe(value);
        }
    }

    let fields = columns
        .iter()
        .zip(profiles.iter())
        .map(|(column, profile)| {
            let export_type = profile
                .classify()
                .unwrap_or_else(|| ExportType::from_declared(&column.declared_type));
            ColumnField {
                name: column.name.clone(),
                export_type,
            }
        })
        .collect();

    ColumnSchema::new(fields)
}

/// Schema for a dataset with no rows, from declared types alone.
pub fn infer_declared(columns: &[SourceColumn]) -> ColumnSchema {
    infer(columns, &[])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::export::coercion::coerce_rows;
    use crate::domains::export::types::RowSet;
    use rust_decimal_macros::dec;

    fn cols(pairs: &[(&str, &str)]) -> Vec<SourceColumn> {
        pairs.iter().map(|(n, t)| SourceColumn::new(*n, *t)).collect()
    }

    #[test]
    fn test_all_integers_is_int64() {
        let columns = cols(&[("n", "TEXT")]);
        let rows: Vec<Vec<SqlValue>> = (0..50).map(|i| vec![SqlValue::Int(i * 7 - 100)]).collect();
        let schema = infer(&columns, &rows);
        assert_eq!(schema.get("n"), Some(ExportType::Int64));
    }

    #[test]
    fn test_mixed_numeric_is_float64() {
        let columns = cols(&[("x", "INT4")]);
        let rows = vec![
            vec![SqlValue::Int(1)],
            vec![SqlValue::Float(1.5)],
            vec![SqlValue::Int(3)],
        ];
        assert_eq!(infer(&columns, &rows).get("x"), Some(ExportType::Float64));
    }

    #[test]
    fn test_bool_and_string_buckets() {
        let columns = cols(&[("flag", "TEXT"), ("mixed", "INT4")]);
        let rows = vec![
            vec![SqlValue::Bool(true), SqlValue::Int(1)],
            vec![SqlValue::Bool(false), SqlValue::Text("two".into())],
        ];
        let schema = infer(&columns, &rows);
        assert_eq!(schema.get("flag"), Some(ExportType::Bool));
        assert_eq!(schema.get("mixed"), Some(ExportType::String));
    }

    #[test]
    fn test_bool_mixed_with_int_falls_to_string() {
        let columns = cols(&[("c", "BOOL")]);
        let rows = vec![vec![SqlValue::Bool(true)], vec![SqlValue::Int(0)]];
        assert_eq!(infer(&columns, &rows).get("c"), Some(ExportType::String));
    }

    #[test]
    fn test_empty_rowset_uses_declared_types() {
        let columns = cols(&[
            ("id", "INT8"),
            ("amount", "NUMERIC"),
            ("active", "BOOLEAN"),
            ("created", "TIMESTAMPTZ"),
            ("mystery", "geometry"),
        ]);
        let schema = infer_declared(&columns);
        assert_eq!(schema.len(), 5);
        assert_eq!(schema.get("id"), Some(ExportType::Int64));
        assert_eq!(schema.get("amount"), Some(ExportType::Float64));
        assert_eq!(schema.get("active"), Some(ExportType::Bool));
        assert_eq!(schema.get("created"), Some(ExportType::String));
        assert_eq!(schema.get("mystery"), Some(ExportType::String));
    }

    #[test]
    fn test_all_null_column_uses_declared_type() {
        let columns = cols(&[("id", "INT4"), ("note", "FLOAT8")]);
        let rows = vec![vec![SqlValue::Int(1), SqlValue::Null], vec![SqlValue::Int(2), SqlValue::Null]];
        let schema = infer(&columns, &rows);
        assert_eq!(schema.get("note"), Some(ExportType::Float64));
    }

    #[test]
    fn test_nulls_do_not_demote_integers() {
        let columns = cols(&[("n", "INT4")]);
        let rows = vec![vec![SqlValue::Int(1)], vec![SqlValue::Null], vec![SqlValue::Int(3)]];
        assert_eq!(infer(&columns, &rows).get("n"), Some(ExportType::Int64));
    }

    #[test]
    fn test_orders_example() {
        let mut rowset = RowSet::new(
            cols(&[("id", "INT4"), ("amount", "NUMERIC")]),
            vec![
                vec![SqlValue::Int(1), SqlValue::Decimal(dec!(2.50))],
                vec![SqlValue::Int(2), SqlValue::Decimal(dec!(3.75))],
            ],
        );
        coerce_rows(&mut rowset);
        let schema = infer(&rowset.columns, &rowset.rows);
        assert_eq!(
            schema,
            ColumnSchema::from_pairs(vec![("id", ExportType::Int64), ("amount", ExportType::Float64)])
        );
    }

    #[test]
    fn test_preserves_declaration_order() {
        let columns = cols(&[("z", "TEXT"), ("a", "TEXT"), ("m", "TEXT")]);
        let schema = infer_declared(&columns);
        let names: Vec<&str> = schema.fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["z", "a", "m"]);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn declared_type() -> impl Strategy<Value = String> {
            prop::sample::select(vec!["INT4", "INT8", "NUMERIC", "FLOAT8", "BOOL", "TEXT", "TIMESTAMPTZ", ""])
                .prop_map(str::to_string)
        }

        fn column(declared: &str, values: Vec<SqlValue>) -> (Vec<SourceColumn>, Vec<Vec<SqlValue>>) {
            let rows = values.into_iter().map(|v| vec![v]).collect();
            (vec![SourceColumn::new("c", declared)], rows)
        }

        proptest! {
            #[test]
            fn integers_with_nulls_are_int64(
                declared in declared_type(),
                values in prop::collection::vec(prop::option::of(any::<i64>()), 1..40),
                first in any::<i64>(),
            ) {
                let mut cells = vec![SqlValue::Int(first)];
                cells.extend(values.into_iter().map(|v| v.map(SqlValue::Int).unwrap_or(SqlValue::Null)));
                let (columns, rows) = column(&declared, cells);
                prop_assert_eq!(infer(&columns, &rows).get("c"), Some(ExportType::Int64));
            }

            #[test]
            fn any_fraction_promotes_to_float64(
                declared in declared_type(),
                ints in prop::collection::vec(any::<i32>(), 0..20),
                whole in -1_000_000i64..1_000_000,
                position in any::<prop::sample::Index>(),
            ) {
                let mut cells: Vec<SqlValue> = ints.into_iter().map(|i| SqlValue::Int(i as i64)).collect();
                let at = position.index(cells.len() + 1);
                cells.insert(at, SqlValue::Float(whole as f64 + 0.5));
                let (columns, rows) = column(&declared, cells);
                prop_assert_eq!(infer(&columns, &rows).get("c"), Some(ExportType::Float64));
            }

            #[test]
            fn any_text_makes_string(
                declared in declared_type(),
                ints in prop::collection::vec(any::<i64>(), 0..20),
                text in "[a-z0-9]{0,8}",
            ) {
                let mut cells: Vec<SqlValue> = ints.into_iter().map(SqlValue::Int).collect();
                cells.push(SqlValue::Text(text));
                let (columns, rows) = column(&declared, cells);
                prop_assert_eq!(infer(&columns, &rows).get("c"), Some(ExportType::String));
            }

            #[test]
            fn all_null_column_follows_declared_type(
                declared in declared_type(),
                nulls in 0usize..20,
            ) {
                let (columns, rows) = column(&declared, vec![SqlValue::Null; nulls]);
                prop_assert_eq!(
                    infer(&columns, &rows).get("c"),
                    Some(ExportType::from_declared(&declared))
                );
            }
        }
    }
}
