//! The bookstore query script
//!
//! Sixteen steps in a fixed order: basic CRUD, advanced queries, aggregation
//! pipelines, then indexing and an explain of a title lookup.

use bookstore_common::Result;

use crate::index::IndexSpec;
use crate::pipeline::{Accumulator, Expr, Pipeline, Projected, Stage};
use crate::query::{Filter, FindQuery, Projection, SortDirection, SortSpec, Update};
use crate::runner::{Operation, Step};

/// Title updated and then deleted by the script
pub const GATSBY: &str = "The Great Gatsby";

/// Price written by the update step
pub const GATSBY_PRICE: f64 = 12.99;

/// Page size of the pagination step
pub const PAGE_SIZE: u64 = 5;

/// `{ $group: { _id: "$genre", avgPrice: { $avg: "$price" } } }`
pub fn average_price_by_genre() -> Result<Pipeline> {
    Pipeline::new(vec![Stage::group(
        Expr::field("genre")?,
        vec![("avgPrice", Accumulator::Avg(Expr::field("price")?))],
    )?])
}

/// Count per author, keeping only the largest group
///
/// Ties are broken by whatever order the store returns equal counts in.
pub fn top_author() -> Result<Pipeline> {
    Pipeline::new(vec![
        Stage::group(Expr::field("author")?, vec![("count", Accumulator::count())])?,
        Stage::sort(SortSpec::descending("count")?),
        Stage::limit(1)?,
    ])
}

/// Count per decade, rendered as `{ decade: "1990s", count: n }`
pub fn books_by_decade() -> Result<Pipeline> {
    let decade_start = Expr::field("published_year")?
        .divide(Expr::literal(10))
        .floor();
    let label = Expr::concat(vec![
        Expr::field("_id")?.multiply(Expr::literal(10)).to_text(),
        Expr::literal("s"),
    ])?;

    Pipeline::new(vec![
        Stage::group(decade_start, vec![("count", Accumulator::count())])?,
        Stage::project(vec![
            ("decade", Projected::Computed(label)),
            ("count", Projected::Include),
            ("_id", Projected::Exclude),
        ])?,
    ])
}

/// Build the full script; every descriptor is validated here
pub fn bookstore_script() -> Result<Vec<Step>> {
    let gatsby = Filter::eq("title", GATSBY)?;

    Ok(vec![
        // Basic queries
        Step::new(
            "Fiction Books",
            Operation::Find(FindQuery::matching(Filter::eq("genre", "Fiction")?)),
        ),
        Step::new(
            "Books Published After 2000",
            Operation::Find(FindQuery::matching(Filter::gt("published_year", 2000)?)),
        ),
        Step::new(
            "Books by Harper Lee",
            Operation::Find(FindQuery::matching(Filter::eq("author", "Harper Lee")?)),
        ),
        Step::new(
            "Updated The Great Gatsby Price",
            Operation::UpdateOne {
                filter: gatsby.clone(),
                update: Update::set("price", GATSBY_PRICE)?,
            },
        ),
        Step::new("Deleted The Great Gatsby", Operation::DeleteOne(gatsby)),
        // Advanced queries
        Step::new(
            "In-Stock & Recent Books",
            Operation::Find(FindQuery::matching(
                Filter::eq("in_stock", true)?.and(Filter::gt("published_year", 2010)?),
            )),
        ),
        Step::new(
            "Projection (Title, Author, Price)",
            Operation::Find(
                FindQuery::new()
                    .projection(Projection::include(&["title", "author", "price"])?.without_id()),
            ),
        ),
        Step::new(
            "Books Sorted by Price (Ascending)",
            Operation::Find(FindQuery::new().sort(SortSpec::ascending("price")?)),
        ),
        Step::new(
            "Books Sorted by Price (Descending)",
            Operation::Find(FindQuery::new().sort(SortSpec::descending("price")?)),
        ),
        Step::new(
            "Pagination",
            Operation::paginate(FindQuery::new(), PAGE_SIZE, 2)?,
        ),
        // Aggregation pipelines
        Step::new(
            "Average Price by Genre",
            Operation::Aggregate(average_price_by_genre()?),
        ),
        Step::new("Author with Most Books", Operation::Aggregate(top_author()?)),
        Step::new("Books by Decade", Operation::Aggregate(books_by_decade()?)),
        // Indexing
        Step::new(
            "Index created on 'title'",
            Operation::CreateIndex(IndexSpec::on("title", SortDirection::Ascending)?),
        ),
        Step::new(
            "Compound index on 'author' and 'published_year'",
            Operation::CreateIndex(
                IndexSpec::on("author", SortDirection::Ascending)?
                    .then("published_year", SortDirection::Descending)?,
            ),
        ),
        Step::new(
            "Performance Analysis with explain()",
            Operation::Explain(Filter::eq("title", "The Hobbit")?),
        ),
    ])
}
