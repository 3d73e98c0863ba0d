//! Row mapper: one order record to one positional row.

use crate::record::{FieldLookup, OrderRecord};
use crate::schema::{ReservedColumn, ReservedNames, ResolvedSchema};
use crate::store::AttachmentRef;

/// Builds the row for `record` in `schema`'s column order.
///
/// The reserved columns are always computed: the attachment column from
/// `attachment` and the timestamp column from `submitted_at`. Same-named
/// fields on the record are ignored. `fixed` is the column order that
/// positional records are bound to.
pub fn build_row(
    schema: &ResolvedSchema,
    reserved: &ReservedNames,
    fixed: &[String],
    record: &OrderRecord,
    attachment: Option<&AttachmentRef>,
    submitted_at: &str,
) -> Vec<String> {
    let view = record.view(fixed);
    schema
        .columns()
        .iter()
        .map(|column| match reserved.classify(column) {
            Some(ReservedColumn::Attachment) => attachment
                .map(|a| a.public_url.clone())
                .unwrap_or_default(),
            Some(ReservedColumn::Timestamp) => submitted_at.to_string(),
            None => view.value_for(column).unwrap_or_default().to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::KeyedRecord;
    use crate::schema::{ATTACHMENT_COLUMN, CanonicalSchema, TIMESTAMP_COLUMN};

    fn canonical() -> CanonicalSchema {
        CanonicalSchema::default()
    }

    #[test]
    fn keyed_record_fills_known_columns() {
        let canonical = canonical();
        let schema = ResolvedSchema::from(&canonical);
        let record = OrderRecord::Keyed(
            [("제품명", "Widget"), ("수취인명", "Lee"), ("unknown", "dropped")]
                .into_iter()
                .collect::<KeyedRecord>(),
        );

        let row = build_row(
            &schema,
            canonical.reserved(),
            canonical.fixed(),
            &record,
            None,
            "2024. 5. 3. 오후 2:05:07",
        );

        assert_eq!(row.len(), schema.len());
        assert_eq!(row[schema.position("제품명").unwrap()], "Widget");
        assert_eq!(row[schema.position("수취인명").unwrap()], "Lee");
        assert_eq!(row[schema.position(ATTACHMENT_COLUMN).unwrap()], "");
        assert_eq!(
            row[schema.position(TIMESTAMP_COLUMN).unwrap()],
            "2024. 5. 3. 오후 2:05:07"
        );
        let filled = row.iter().filter(|c| !c.is_empty()).count();
        assert_eq!(filled, 3);
    }

    #[test]
    fn reserved_fields_on_the_record_are_ignored() {
        let canonical = canonical();
        let schema = ResolvedSchema::from(&canonical);
        let record = OrderRecord::Keyed(
            [(ATTACHMENT_COLUMN, "spoofed"), (TIMESTAMP_COLUMN, "1999")]
                .into_iter()
                .collect::<KeyedRecord>(),
        );
        let attachment = AttachmentRef {
            id: "f1".into(),
            public_url: "https://files/f1".into(),
        };

        let row = build_row(
            &schema,
            canonical.reserved(),
            canonical.fixed(),
            &record,
            Some(&attachment),
            "now",
        );
        assert_eq!(row[schema.len() - 2], "https://files/f1");
        assert_eq!(row[schema.len() - 1], "now");
        assert!(!row.contains(&"spoofed".to_string()));
    }

    #[test]
    fn positional_record_consumes_only_fixed_columns() {
        let canonical = canonical();
        let schema = ResolvedSchema::from(&canonical);
        let n = canonical.fixed().len();
        let mut values: Vec<String> = (0..n).map(|i| format!("v{i}")).collect();
        values.push("extra-1".into());
        values.push("extra-2".into());
        let record = OrderRecord::Positional(values);

        let row = build_row(
            &schema,
            canonical.reserved(),
            canonical.fixed(),
            &record,
            None,
            "ts",
        );
        assert_eq!(row.len(), n + 2);
        for (i, cell) in row.iter().take(n).enumerate() {
            assert_eq!(*cell, format!("v{i}"));
        }
        assert_eq!(row[n], "");
        assert_eq!(row[n + 1], "ts");
    }

    #[test]
    fn short_positional_record_leaves_tail_empty() {
        let canonical = canonical();
        let schema = ResolvedSchema::from(&canonical);
        let record = OrderRecord::Positional(vec!["a".into(), "b".into()]);
        let row = build_row(
            &schema,
            canonical.reserved(),
            canonical.fixed(),
            &record,
            None,
            "ts",
        );
        assert_eq!(row.len(), schema.len());
        assert_eq!(&row[..3], ["a", "b", ""]);
    }

    #[test]
    fn trusted_header_with_unknown_columns_keeps_length() {
        let canonical = canonical();
        let schema = ResolvedSchema::new(vec![
            "제품명".into(),
            "legacy".into(),
            ATTACHMENT_COLUMN.into(),
        ]);
        let record = OrderRecord::Keyed(
            [("제품명", "Widget")].into_iter().collect::<KeyedRecord>(),
        );
        let row = build_row(
            &schema,
            canonical.reserved(),
            canonical.fixed(),
            &record,
            None,
            "ts",
        );
        assert_eq!(row, vec!["Widget", "", ""]);
    }
}
