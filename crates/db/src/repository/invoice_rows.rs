//! Line-item rows written by Store steps.

use agents::InvoiceRow;
use sqlx::PgPool;

use crate::DbError;

/// Table names are interpolated into SQL, so only plain identifiers pass.
pub fn check_table_name(table: &str) -> Result<&str, DbError> {
    let mut chars = table.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid_start && valid_rest && table.len() <= 63 {
        Ok(table)
    } else {
        Err(DbError::InvalidTable(table.to_string()))
    }
}

/// Insert one row and return its generated id.
pub async fn insert_invoice_row(pool: &PgPool, table: &str, row: &InvoiceRow) -> Result<i64, DbError> {
    let table = check_table_name(table)?;
    let sql = format!(
        r#"
        INSERT INTO "{table}" (
            source_ref, filename, invoice_number, po_number, invoice_date,
            supplier_tax_id, buyer_tax_id, currency, line_index, description,
            sku, quantity, unit_price, amount, extraction_confidence, needs_review
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
        RETURNING id
        "#
    );

    let id: i64 = sqlx::query_scalar(&sql)
        .bind(&row.source_ref)
        .bind(&row.filename)
        .bind(&row.invoice_number)
        .bind(&row.po_number)
        .bind(&row.invoice_date)
        .bind(&row.supplier_tax_id)
        .bind(&row.buyer_tax_id)
        .bind(&row.currency)
        .bind(i32::try_from(row.line_index).unwrap_or(i32::MAX))
        .bind(&row.line.description)
        .bind(&row.line.sku)
        .bind(row.line.quantity)
        .bind(row.line.unit_price)
        .bind(row.line.amount)
        .bind(row.extraction_confidence)
        .bind(row.needs_review)
        .fetch_one(pool)
        .await?;

    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_plain_identifiers_are_accepted() {
        assert!(check_table_name("invoice_lines").is_ok());
        assert!(check_table_name("_staging2").is_ok());
        for bad in ["", "2024_lines", "lines; DROP TABLE workflows", "a\"b", "naïve"] {
            assert!(check_table_name(bad).is_err(), "{bad}");
        }
        assert!(check_table_name(&"x".repeat(64)).is_err());
    }
}
