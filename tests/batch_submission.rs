use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use order_intake::schema::{ATTACHMENT_COLUMN, ReservedNames, TIMESTAMP_COLUMN};
use order_intake::store::memory::StoreOp;
use order_intake::store::{Attachment, Grid, MemoryAttachments, MemoryWorkbook};
use order_intake::{
    BatchCoordinator, CanonicalSchema, Error, HeaderStrategy, InsertionPolicy, IntakeSettings,
    OrderRecord, RecordLayout, SheetTarget,
};

const BOOK: &str = "book";

fn fixed_clock() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 3, 5, 5, 7).unwrap()
}

fn keyed(pairs: &[(&str, &str)]) -> OrderRecord {
    OrderRecord::Keyed(pairs.iter().copied().collect())
}

fn receipt(name: &str) -> Option<Attachment> {
    Some(Attachment {
        bytes: name.as_bytes().to_vec(),
        mime_type: "image/png".into(),
        file_name: name.into(),
    })
}

fn canonical_header() -> Vec<String> {
    CanonicalSchema::default().columns()
}

/// A tab that already carries the canonical header and one value in column A
/// per entry of `column_a` (empty entries are blank rows).
fn seeded(column_a: &[&str]) -> Grid {
    let mut rows = vec![canonical_header()];
    rows.extend(column_a.iter().map(|v| {
        if v.is_empty() {
            Vec::new()
        } else {
            vec![v.to_string()]
        }
    }));
    rows
}

fn coordinator(
    tables: &MemoryWorkbook,
    files: &MemoryAttachments,
    settings: IntakeSettings,
) -> BatchCoordinator {
    BatchCoordinator::new(Arc::new(tables.clone()), Arc::new(files.clone()), settings)
        .with_clock(fixed_clock)
}

fn kim() -> SheetTarget {
    SheetTarget::new(BOOK, "Kim").unwrap()
}

fn column(name: &str) -> usize {
    canonical_header().iter().position(|c| c == name).unwrap()
}

#[tokio::test]
async fn single_order_without_attachment() {
    let tables = MemoryWorkbook::new();
    let files = MemoryAttachments::new();
    let intake = coordinator(&tables, &files, IntakeSettings::default());

    let summary = intake
        .submit_batch(
            &kim(),
            vec![keyed(&[("제품명", "Widget"), ("수취인명", "Lee")])],
            Vec::new(),
        )
        .await
        .unwrap();
    assert_eq!(summary.tab, "Kim");
    assert_eq!(summary.rows, 1);
    assert_eq!(summary.start_row, 2);

    let rows = tables.rows(BOOK, "Kim").unwrap();
    assert_eq!(rows[0], canonical_header());
    let row = &rows[1];
    assert_eq!(row.len(), canonical_header().len());
    for (i, name) in canonical_header().iter().enumerate() {
        let expected = match name.as_str() {
            "제품명" => "Widget",
            "수취인명" => "Lee",
            TIMESTAMP_COLUMN => "2024. 5. 3. 오후 2:05:07",
            _ => "",
        };
        assert_eq!(row[i], expected, "column {name}");
    }
}

#[tokio::test]
async fn rows_follow_submission_order_not_upload_order() {
    let tables = MemoryWorkbook::new();
    let files = MemoryAttachments::new();
    files.delay("r0.png", Duration::from_millis(60));
    files.delay("r1.png", Duration::from_millis(120));
    let intake = coordinator(&tables, &files, IntakeSettings::default());

    let records = (0..3)
        .map(|i| {
            let product = format!("R{i}");
            keyed(&[("제품명", product.as_str())])
        })
        .collect();
    let attachments = vec![receipt("r0.png"), receipt("r1.png"), receipt("r2.png")];
    intake
        .submit_batch(&kim(), records, attachments)
        .await
        .unwrap();

    assert_eq!(files.completion_order(), ["r2.png", "r0.png", "r1.png"]);

    let rows = tables.rows(BOOK, "Kim").unwrap();
    let link = column(ATTACHMENT_COLUMN);
    for i in 0..3 {
        let row = &rows[i + 1];
        assert_eq!(row[column("제품명")], format!("R{i}"));
        let id = row[link].strip_prefix("memory://attachments/").unwrap();
        assert_eq!(files.file_name_of(id).unwrap(), format!("r{i}.png"));
        assert!(files.is_public(id));
    }
}

#[tokio::test]
async fn failed_upload_aborts_before_rows_are_written() {
    let tables = MemoryWorkbook::new();
    let files = MemoryAttachments::new();
    files.fail("r1.png");
    let intake = coordinator(&tables, &files, IntakeSettings::default());

    let err = intake
        .submit_batch(
            &kim(),
            vec![keyed(&[("제품명", "A")]), keyed(&[("제품명", "B")])],
            vec![receipt("r0.png"), receipt("r1.png")],
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::AttachmentUpload { index: 1, .. }));
    let rows = tables.rows(BOOK, "Kim").unwrap();
    assert_eq!(rows, vec![canonical_header()]);
    assert_eq!(tables.calls(StoreOp::Append), 0);
}

#[tokio::test]
async fn interior_gap_is_reused() {
    let tables = MemoryWorkbook::new().with_tab(BOOK, "Kim", seeded(&["A", "", "B"]));
    let files = MemoryAttachments::new();
    let intake = coordinator(&tables, &files, IntakeSettings::default());

    let summary = intake
        .submit_batch(&kim(), vec![keyed(&[("주문자명", "C")])], Vec::new())
        .await
        .unwrap();
    assert_eq!(summary.start_row, 3);

    let rows = tables.rows(BOOK, "Kim").unwrap();
    assert_eq!(rows.len(), 4);
    assert_eq!(rows[2][0], "C");
    assert_eq!(rows[3], vec!["B".to_string()]);
    assert_eq!(tables.calls(StoreOp::Write), 1);
}

#[tokio::test]
async fn batch_larger_than_gap_goes_after_the_data() {
    let tables = MemoryWorkbook::new().with_tab(BOOK, "Kim", seeded(&["A", "", "B"]));
    let files = MemoryAttachments::new();
    let intake = coordinator(&tables, &files, IntakeSettings::default());

    let summary = intake
        .submit_batch(
            &kim(),
            vec![keyed(&[("주문자명", "C")]), keyed(&[("주문자명", "D")])],
            Vec::new(),
        )
        .await
        .unwrap();
    assert_eq!(summary.start_row, 5);

    let rows = tables.rows(BOOK, "Kim").unwrap();
    assert!(rows[2].is_empty());
    assert_eq!(rows[3], vec!["B".to_string()]);
    assert_eq!(rows[4][0], "C");
    assert_eq!(rows[5][0], "D");
}

#[tokio::test]
async fn append_only_writes_after_the_last_row() {
    let tables = MemoryWorkbook::new().with_tab(BOOK, "Kim", seeded(&["A", "B"]));
    let files = MemoryAttachments::new();
    let settings = IntakeSettings {
        insertion_policy: InsertionPolicy::AppendOnly,
        ..IntakeSettings::default()
    };
    let intake = coordinator(&tables, &files, settings);

    let summary = intake
        .submit_batch(
            &kim(),
            vec![keyed(&[("주문자명", "C")]), keyed(&[("주문자명", "D")])],
            Vec::new(),
        )
        .await
        .unwrap();
    assert_eq!(summary.start_row, 4);

    let rows = tables.rows(BOOK, "Kim").unwrap();
    assert_eq!(rows.len(), 5);
    assert_eq!(rows[2], vec!["B".to_string()]);
    assert_eq!(rows[3][0], "C");
    assert_eq!(rows[4][0], "D");
    assert_eq!(tables.calls(StoreOp::Append), 1);
    assert_eq!(tables.calls(StoreOp::Write), 0);
}

#[tokio::test]
async fn positional_orders_bind_to_fixed_columns() {
    let tables = MemoryWorkbook::new();
    let files = MemoryAttachments::new();
    let settings = IntakeSettings {
        record_layout: RecordLayout::Positional,
        ..IntakeSettings::default()
    };
    let intake = coordinator(&tables, &files, settings);

    let mut values: Vec<String> = (0..10).map(|i| format!("v{i}")).collect();
    values.push("overflow".into());
    intake
        .submit_batch(&kim(), vec![OrderRecord::Positional(values)], Vec::new())
        .await
        .unwrap();

    let row = &tables.rows(BOOK, "Kim").unwrap()[1];
    assert_eq!(row.len(), 12);
    assert_eq!(row[0], "v0");
    assert_eq!(row[9], "v9");
    assert_eq!(row[10], "");
    assert!(!row.contains(&"overflow".to_string()));
}

#[tokio::test]
async fn adaptive_header_grows_and_keeps_history_aligned() {
    let reserved = ReservedNames::default();
    let tables = MemoryWorkbook::new().with_tab(
        BOOK,
        "Kim",
        vec![
            vec![
                "주문자명".into(),
                "제품명".into(),
                ATTACHMENT_COLUMN.into(),
                TIMESTAMP_COLUMN.into(),
            ],
            vec!["Kim".into(), "Old".into(), "link0".into(), "ts0".into()],
        ],
    );
    let files = MemoryAttachments::new();
    let settings = IntakeSettings {
        canonical: CanonicalSchema::new(vec!["주문자명".into(), "제품명".into()], reserved),
        header_strategy: HeaderStrategy::AdaptiveExtend,
        ..IntakeSettings::default()
    };
    let intake = coordinator(&tables, &files, settings);

    let summary = intake
        .submit_batch(
            &kim(),
            vec![keyed(&[("주문자명", "Lee"), ("제품명", "Widget"), ("쿠폰", "10%")])],
            Vec::new(),
        )
        .await
        .unwrap();
    assert_eq!(summary.columns, 5);
    assert_eq!(summary.start_row, 3);

    let rows = tables.rows(BOOK, "Kim").unwrap();
    assert_eq!(
        rows[0],
        ["주문자명", "제품명", "쿠폰", ATTACHMENT_COLUMN, TIMESTAMP_COLUMN]
    );
    assert_eq!(rows[1], ["Kim", "Old", "", "link0", "ts0"]);
    assert_eq!(
        rows[2],
        ["Lee", "Widget", "10%", "", "2024. 5. 3. 오후 2:05:07"]
    );
}

#[tokio::test]
async fn concurrent_batches_on_one_tab_do_not_overlap() {
    let tables = MemoryWorkbook::new();
    let files = MemoryAttachments::new();
    files.delay("slow.png", Duration::from_millis(80));
    let intake = coordinator(&tables, &files, IntakeSettings::default());
    let target = kim();

    let first = intake.submit_batch(
        &target,
        vec![keyed(&[("주문자명", "first-0")]), keyed(&[("주문자명", "first-1")])],
        vec![receipt("slow.png"), None],
    );
    let second = intake.submit_batch(
        &target,
        vec![
            keyed(&[("주문자명", "second-0")]),
            keyed(&[("주문자명", "second-1")]),
            keyed(&[("주문자명", "second-2")]),
        ],
        Vec::new(),
    );
    let (first, second) = tokio::join!(first, second);
    let (first, second) = (first.unwrap(), second.unwrap());

    let mut starts = [
        (first.start_row, first.rows),
        (second.start_row, second.rows),
    ];
    starts.sort();
    assert_eq!(starts[0].0, 2);
    assert_eq!(starts[1].0, 2 + starts[0].1 as u32);

    let rows = tables.rows(BOOK, "Kim").unwrap();
    assert_eq!(rows.len(), 6);
    let names: Vec<&str> = rows[1..].iter().map(|r| r[0].as_str()).collect();
    assert!(names.contains(&"first-0") && names.contains(&"first-1"));
    assert!(names.contains(&"second-0") && names.contains(&"second-2"));
}

#[tokio::test]
async fn mismatched_attachment_count_is_rejected() {
    let tables = MemoryWorkbook::new();
    let files = MemoryAttachments::new();
    let intake = coordinator(&tables, &files, IntakeSettings::default());

    let err = intake
        .submit_batch(
            &kim(),
            vec![keyed(&[("제품명", "A")]), keyed(&[("제품명", "B")])],
            vec![receipt("r0.png")],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
    assert!(tables.rows(BOOK, "Kim").is_none());
}

#[tokio::test]
async fn header_write_failure_aborts_the_batch() {
    let tables = MemoryWorkbook::new();
    tables.fail_next(StoreOp::Write, 2);
    let files = MemoryAttachments::new();
    let intake = coordinator(&tables, &files, IntakeSettings::default());

    let err = intake
        .submit_batch(&kim(), vec![keyed(&[("제품명", "A")])], Vec::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::HeaderWrite(_)));
    assert!(files.is_empty());
}

#[tokio::test]
async fn records_of_the_other_layout_are_rejected() {
    let tables = MemoryWorkbook::new();
    let files = MemoryAttachments::new();
    let intake = coordinator(&tables, &files, IntakeSettings::default());

    let err = intake
        .submit_batch(
            &kim(),
            vec![
                keyed(&[("제품명", "A")]),
                OrderRecord::Positional(vec!["B".into()]),
            ],
            Vec::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
    assert!(tables.rows(BOOK, "Kim").is_none());
    assert_eq!(tables.calls(StoreOp::ListTabs), 0);

    let settings = IntakeSettings {
        record_layout: RecordLayout::Positional,
        ..IntakeSettings::default()
    };
    let positional = coordinator(&tables, &files, settings);
    let err = positional
        .submit_batch(&kim(), vec![keyed(&[("제품명", "A")])], Vec::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
    assert!(tables.rows(BOOK, "Kim").is_none());
}

#[tokio::test]
async fn tab_listing_failure_is_ignored_when_the_tab_exists() {
    let tables = MemoryWorkbook::new().with_tab(BOOK, "Kim", seeded(&["A"]));
    tables.fail_next(StoreOp::ListTabs, 1);
    let files = MemoryAttachments::new();
    let intake = coordinator(&tables, &files, IntakeSettings::default());

    let summary = intake
        .submit_batch(&kim(), vec![keyed(&[("주문자명", "B")])], Vec::new())
        .await
        .unwrap();
    assert_eq!(summary.start_row, 3);
    assert_eq!(tables.calls(StoreOp::CreateTab), 0);
    assert_eq!(tables.rows(BOOK, "Kim").unwrap()[2][0], "B");
}

#[tokio::test]
async fn tab_listing_failure_on_a_new_tab_fails_at_the_header() {
    let tables = MemoryWorkbook::new();
    tables.fail_next(StoreOp::ListTabs, 1);
    let files = MemoryAttachments::new();
    let intake = coordinator(&tables, &files, IntakeSettings::default());

    let err = intake
        .submit_batch(&kim(), vec![keyed(&[("주문자명", "B")])], vec![receipt("r0.png")])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::HeaderWrite(_)));
    assert!(tables.rows(BOOK, "Kim").is_none());
    assert!(files.is_empty());
}

#[tokio::test]
async fn tab_creation_failure_fails_at_the_header() {
    let tables = MemoryWorkbook::new();
    tables.fail_next(StoreOp::CreateTab, 1);
    let files = MemoryAttachments::new();
    let intake = coordinator(&tables, &files, IntakeSettings::default());

    let err = intake
        .submit_batch(&kim(), vec![keyed(&[("주문자명", "B")])], Vec::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::HeaderWrite(_)));
    assert!(tables.rows(BOOK, "Kim").is_none());

    let summary = intake
        .submit_batch(&kim(), vec![keyed(&[("주문자명", "B")])], Vec::new())
        .await
        .unwrap();
    assert_eq!(summary.start_row, 2);
}
