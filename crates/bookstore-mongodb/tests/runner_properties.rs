//! End-to-end runner behaviour against the in-memory store

use bookstore_mongodb::script::{self, GATSBY, GATSBY_PRICE};
use bookstore_mongodb::{
    Book, BookStore, BookstoreError, Filter, FindQuery, InMemoryStore, Operation, OperationKind,
    QueryRunner, Record, Step, StepOutput, StepReport, Update,
};
use std::sync::Arc;

use bson::{doc, Bson, Document as BsonDocument};
use parking_lot::Mutex;
use tokio_test::{assert_err, assert_ok};

fn catalogue() -> Vec<Book> {
    vec![
        Book::new("To Kill a Mockingbird", "Harper Lee", "Fiction", 1960, 12.99, true),
        Book::new("1984", "George Orwell", "Dystopian", 1949, 10.99, true),
        Book::new(GATSBY, "F. Scott Fitzgerald", "Fiction", 1925, 9.99, true),
        Book::new("Brave New World", "Aldous Huxley", "Dystopian", 1932, 11.50, false),
        Book::new("The Hobbit", "J.R.R. Tolkien", "Fantasy", 1937, 14.99, true),
        Book::new("The Catcher in the Rye", "J.D. Salinger", "Fiction", 1951, 8.99, true),
        Book::new("Animal Farm", "George Orwell", "Political Satire", 1945, 8.50, false),
        Book::new("The Alchemist", "Paulo Coelho", "Fiction", 1988, 10.99, true),
        Book::new("The Lord of the Rings", "J.R.R. Tolkien", "Fantasy", 1954, 19.99, true),
        Book::new("The Road", "Cormac McCarthy", "Fiction", 2006, 13.50, true),
        Book::new("The Night Circus", "Erin Morgenstern", "Fantasy", 2011, 15.00, true),
        Book::new("Go Set a Watchman", "Harper Lee", "Fiction", 2015, 16.99, false),
    ]
}

fn titles(docs: &[BsonDocument]) -> Vec<String> {
    docs.iter()
        .map(|d| d.get_str("title").unwrap().to_string())
        .collect()
}

fn documents(report: &StepReport) -> &[BsonDocument] {
    match &report.output {
        StepOutput::Documents(docs) => docs,
        other => panic!("step '{}' produced {:?}", report.label, other),
    }
}

async fn run_single(store: InMemoryStore, step: Step) -> StepOutput {
    let mut reports: Vec<StepReport> = Vec::new();
    assert_ok!(QueryRunner::new(vec![step]).run(store, &mut reports).await);
    reports.remove(0).output
}

#[tokio::test]
async fn full_script_opens_and_closes_once() {
    let store = InMemoryStore::with_books(&catalogue()).unwrap();
    let stats = store.stats();
    let mut reports: Vec<StepReport> = Vec::new();

    let summary = assert_ok!(QueryRunner::bookstore().unwrap().run(store, &mut reports).await);

    assert_eq!(summary.steps_completed, 16);
    assert_eq!(reports.len(), 16);
    assert_eq!(stats.opened(), 1);
    assert_eq!(stats.closed(), 1);
    // Pagination issues two finds
    assert_eq!(stats.operations(), 17);
}

#[tokio::test]
async fn failure_aborts_remaining_steps_and_still_closes() {
    let cases = [
        (OperationKind::Find, 0),
        (OperationKind::UpdateOne, 3),
        (OperationKind::DeleteOne, 4),
        (OperationKind::Aggregate, 10),
        (OperationKind::CreateIndex, 13),
        (OperationKind::Explain, 15),
    ];

    for (kind, completed) in cases {
        let store = InMemoryStore::with_books(&catalogue())
            .unwrap()
            .failing_on(kind);
        let stats = store.stats();
        let mut reports: Vec<StepReport> = Vec::new();

        let err = assert_err!(QueryRunner::bookstore().unwrap().run(store, &mut reports).await);

        assert_eq!(reports.len(), completed, "reports before {:?} failure", kind);
        assert_eq!(stats.opened(), 1);
        assert_eq!(stats.closed(), 1, "close after {:?} failure", kind);
        if kind == OperationKind::CreateIndex {
            assert!(matches!(err, BookstoreError::Index(_)));
        } else {
            assert!(matches!(err, BookstoreError::Query(_)));
        }
    }
}

#[tokio::test]
async fn close_failure_is_reported_after_all_steps() {
    let store = InMemoryStore::with_books(&catalogue())
        .unwrap()
        .failing_on(OperationKind::Close);
    let stats = store.stats();
    let mut reports: Vec<StepReport> = Vec::new();

    let err = assert_err!(QueryRunner::bookstore().unwrap().run(store, &mut reports).await);

    assert!(err.is_connection());
    assert_eq!(reports.len(), 16);
    assert_eq!(stats.closed(), 1);
}

#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl std::io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn returned_failures_are_not_logged_as_errors() {
    let logs = LogBuffer::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    for kind in [OperationKind::Find, OperationKind::Close] {
        let store = InMemoryStore::with_books(&catalogue())
            .unwrap()
            .failing_on(kind);
        let mut reports: Vec<StepReport> = Vec::new();
        assert_err!(QueryRunner::bookstore().unwrap().run(store, &mut reports).await);
    }

    let text = logs.contents();
    assert!(text.contains("Step 1 (Fiction Books) failed"), "{}", text);
    assert!(text.contains("Failed to close connection"), "{}", text);
    assert!(!text.contains("ERROR"), "{}", text);
}

#[tokio::test]
async fn update_changes_only_the_price() {
    let store = InMemoryStore::with_books(&catalogue()).unwrap();
    let filter = Filter::eq("title", GATSBY).unwrap();
    let before = store.documents();

    let outcome = store
        .update_one(&filter, &Update::set("price", GATSBY_PRICE).unwrap())
        .await
        .unwrap();
    assert_eq!(outcome.matched, 1);
    assert_eq!(outcome.modified, 1);

    let after = store.documents();
    assert_eq!(before.len(), after.len());
    for (old, new) in before.iter().zip(&after) {
        if old.get_str("title").unwrap() != GATSBY {
            assert_eq!(old, new);
            continue;
        }
        let mut expected = Book::from_bson(old.clone()).unwrap();
        expected.price = GATSBY_PRICE;
        assert_eq!(Book::from_bson(new.clone()).unwrap(), expected);
        assert_eq!(old.keys().collect::<Vec<_>>(), new.keys().collect::<Vec<_>>());
    }
}

#[tokio::test]
async fn update_without_match_reports_zero() {
    let store = InMemoryStore::with_books(&[Book::new(
        "Dune",
        "Frank Herbert",
        "Science Fiction",
        1965,
        9.99,
        true,
    )])
    .unwrap();
    let snapshot = store.documents();
    let filter = Filter::eq("title", GATSBY).unwrap();
    let update = Update::set("price", GATSBY_PRICE).unwrap();

    let outcome = assert_ok!(store.update_one(&filter, &update).await);
    assert_eq!(outcome.matched, 0);
    assert_eq!(outcome.modified, 0);
    assert_eq!(store.documents(), snapshot);

    let step = Step::new("Update missing", Operation::UpdateOne { filter, update });
    let output = run_single(store, step).await;
    assert_eq!(output, StepOutput::Updated { matched: 0, modified: 0 });
}

#[tokio::test]
async fn delete_removes_at_most_one_record() {
    let mut books = catalogue();
    books.push(Book::new(GATSBY, "F. Scott Fitzgerald", "Classic", 1925, 7.99, false));
    let store = InMemoryStore::with_books(&books).unwrap();
    let gatsby = Filter::eq("title", GATSBY).unwrap();

    assert_eq!(store.delete_one(&gatsby).await.unwrap(), 1);
    let remaining = store.find(&FindQuery::matching(gatsby.clone())).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].get_str("genre").unwrap(), "Classic");

    assert_eq!(store.delete_one(&gatsby).await.unwrap(), 1);
    assert_eq!(store.delete_one(&gatsby).await.unwrap(), 0);
    assert_eq!(store.delete_one(&gatsby).await.unwrap(), 0);
    assert_eq!(store.documents().len(), books.len() - 2);
}

#[tokio::test]
async fn decade_groups_render_as_text() {
    let store = InMemoryStore::open(
        "books",
        vec![
            doc! { "title": "A", "published_year": 1997 },
            doc! { "title": "B", "published_year": 2005 },
            doc! { "title": "C", "published_year": 1990 },
        ],
    )
    .unwrap();

    let mut decades = store.aggregate(&script::books_by_decade().unwrap()).await.unwrap();
    decades.sort_by(|a, b| a.get_str("decade").unwrap().cmp(b.get_str("decade").unwrap()));

    assert_eq!(
        decades,
        vec![
            doc! { "decade": "1990s", "count": 2 },
            doc! { "decade": "2000s", "count": 1 },
        ]
    );
}

#[tokio::test]
async fn pagination_partitions_the_first_ten_records() {
    for n in [0usize, 3, 5, 7, 10, 12] {
        let docs: Vec<BsonDocument> = (0..n)
            .map(|i| doc! { "title": format!("Book {}", i), "price": (n - i) as f64 })
            .collect();
        let store = InMemoryStore::open("books", docs).unwrap();
        let natural = store.documents();

        let step = Step::new(
            "Pagination",
            Operation::paginate(FindQuery::new(), script::PAGE_SIZE, 2).unwrap(),
        );
        let pages = match run_single(store, step).await {
            StepOutput::Pages(pages) => pages,
            other => panic!("pagination produced {:?}", other),
        };

        assert_eq!(pages.len(), 2);
        assert!(pages.iter().all(|page| page.len() <= 5));
        let joined: Vec<BsonDocument> = pages.concat();
        assert_eq!(joined, natural[..n.min(10)].to_vec(), "store of size {}", n);

        let mut ids: Vec<String> = joined
            .iter()
            .map(|d| d.get_object_id("_id").unwrap().to_hex())
            .collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), joined.len());
    }
}

#[tokio::test]
async fn top_author_keeps_the_largest_group() {
    let store = InMemoryStore::with_books(&catalogue()).unwrap();
    // Tolkien, Orwell and Harper Lee tie at two; break the tie
    store
        .update_one(
            &Filter::eq("title", "Animal Farm").unwrap(),
            &Update::set("author", "J.R.R. Tolkien").unwrap(),
        )
        .await
        .unwrap();

    let top = store.aggregate(&script::top_author().unwrap()).await.unwrap();
    assert_eq!(top, vec![doc! { "_id": "J.R.R. Tolkien", "count": 3 }]);
}

#[tokio::test]
async fn three_record_scenario() {
    let store = InMemoryStore::open(
        "books",
        vec![
            doc! { "title": "A", "genre": "Fiction", "price": 10, "published_year": 1999, "in_stock": true },
            doc! { "title": "B", "genre": "Fiction", "price": 20, "published_year": 2011, "in_stock": true },
            doc! { "title": "C", "genre": "Nonfiction", "price": 15, "published_year": 2015, "in_stock": false },
        ],
    )
    .unwrap();
    let mut reports: Vec<StepReport> = Vec::new();

    assert_ok!(QueryRunner::bookstore().unwrap().run(store, &mut reports).await);

    assert_eq!(titles(documents(&reports[0])), vec!["A", "B"]);
    assert_eq!(titles(documents(&reports[5])), vec!["B"]);

    let averages: Vec<(String, f64)> = documents(&reports[10])
        .iter()
        .map(|d| {
            (
                d.get_str("_id").unwrap().to_string(),
                d.get_f64("avgPrice").unwrap(),
            )
        })
        .collect();
    assert_eq!(
        averages,
        vec![("Fiction".to_string(), 15.0), ("Nonfiction".to_string(), 15.0)]
    );

    assert_eq!(reports[3].output, StepOutput::Updated { matched: 0, modified: 0 });
    assert_eq!(reports[4].output, StepOutput::Deleted(0));
}

#[tokio::test]
async fn catalogue_script_results() {
    let store = InMemoryStore::with_books(&catalogue()).unwrap();
    let mut reports: Vec<StepReport> = Vec::new();

    assert_ok!(QueryRunner::bookstore().unwrap().run(store, &mut reports).await);

    assert_eq!(
        titles(documents(&reports[2])),
        vec!["To Kill a Mockingbird", "Go Set a Watchman"]
    );
    assert_eq!(reports[3].output, StepOutput::Updated { matched: 1, modified: 1 });
    assert_eq!(reports[4].output, StepOutput::Deleted(1));
    assert_eq!(titles(documents(&reports[5])), vec!["The Night Circus"]);

    // Projection suppresses _id and keeps only the requested fields
    for doc in documents(&reports[6]) {
        let keys: Vec<&String> = doc.keys().collect();
        assert_eq!(keys, vec!["title", "author", "price"]);
    }

    let ascending: Vec<f64> = documents(&reports[7])
        .iter()
        .map(|d| d.get_f64("price").unwrap())
        .collect();
    assert!(ascending.windows(2).all(|w| w[0] <= w[1]));
    assert!(!titles(documents(&reports[7])).contains(&GATSBY.to_string()));

    let descending: Vec<f64> = documents(&reports[8])
        .iter()
        .map(|d| d.get_f64("price").unwrap())
        .collect();
    assert!(descending.windows(2).all(|w| w[0] >= w[1]));

    let StepOutput::Pages(pages) = &reports[9].output else {
        panic!("pagination step produced {:?}", reports[9].output);
    };
    assert_eq!(pages[0].len(), 5);
    assert_eq!(pages[1].len(), 5);

    assert_eq!(reports[13].output, StepOutput::IndexCreated("title_1".to_string()));
    assert_eq!(
        reports[14].output,
        StepOutput::IndexCreated("author_1_published_year_-1".to_string())
    );

    let StepOutput::Explain(stats) = &reports[15].output else {
        panic!("explain step produced {:?}", reports[15].output);
    };
    assert_eq!(stats.get_i64("nReturned").unwrap(), 1);
    assert_eq!(stats.get_i64("totalDocsExamined").unwrap(), 1);
    assert_eq!(stats.get("executionSuccess"), Some(&Bson::Boolean(true)));
}
