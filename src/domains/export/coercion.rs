use rust_decimal::prelude::ToPrimitive;

use crate::domains::export::types::RowSet;
use crate::types::SqlValue;

/// Normalize a raw source value to an exportable primitive.
///
/// Arbitrary-precision decimals become `f64`; precision beyond what a double
/// can hold is dropped. Every other value passes through unchanged.
pub fn coerce(value: SqlValue) -> SqlValue {
    match value {
        SqlValue::Decimal(d) => match d.to_f64() {
            Some(f) => SqlValue::Float(f),
            // to_f64 only fails on values no Decimal can hold; keep the digits
            None => SqlValue::Text(d.to_string()),
        },
        other => other,
    }
}

/// Apply [`coerce`] to every cell of a row set in place.
///
/// Must run before schema inference so decimal columns are classified as
/// numeric rather than string.
pub fn coerce_rows(rows: &mut RowSet) -> usize {
    let mut converted = 0;
    for row in rows.rows.iter_mut() {
        for cell in row.iter_mut() {
            if matches!(cell, SqlValue::Decimal(_)) {
                let raw = std::mem::replace(cell, SqlValue::Null);
                *cell = coerce(raw);
                converted += 1;
            }
        }
    }
    converted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::export::types::SourceColumn;
    use rust_decimal_macros::dec;

    #[test]
    fn test_decimal_becomes_float() {
        assert_eq!(coerce(SqlValue::Decimal(dec!(2.50))), SqlValue::Float(2.5));
        assert_eq!(coerce(SqlValue::Decimal(dec!(-0.125))), SqlValue::Float(-0.125));
    }

    #[test]
    fn test_other_values_pass_through() {
        assert_eq!(coerce(SqlValue::Int(7)), SqlValue::Int(7));
        assert_eq!(coerce(SqlValue::Null), SqlValue::Null);
        assert_eq!(coerce(SqlValue::Text("2.50".into())), SqlValue::Text("2.50".into()));
        assert_eq!(coerce(SqlValue::Bool(true)), SqlValue::Bool(true));
    }

    #[test]
    fn test_coerce_rows_counts_conversions() {
        let mut rows = RowSet::new(
            vec![SourceColumn::new("id", "INT4"), SourceColumn::new("amount", "NUMERIC")],
            vec![
                vec![SqlValue::Int(1), SqlValue::Decimal(dec!(2.50))],
                vec![SqlValue::Int(2), SqlValue::Null],
            ],
        );

        assert_eq!(coerce_rows(&mut rows), 1);
        assert_eq!(rows.rows[0][1], SqlValue::Float(2.5));
        assert_eq!(rows.rows[1][1], SqlValue::Null);
    }
}
