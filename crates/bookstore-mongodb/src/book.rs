//! Record trait and the book record type
//!
//! Records are owned by the store; these types only mirror their shape so
//! they can be seeded and read back with automatic BSON conversion.

use bookstore_common::{BookstoreError, Result};
use bson::{oid::ObjectId, Document as BsonDocument};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// A document type stored in a named collection
pub trait Record: Serialize + DeserializeOwned + Send + Sync + Sized {
    /// Get the collection name for this record type
    fn collection_name() -> &'static str;

    /// Convert record to BSON
    fn to_bson(&self) -> Result<BsonDocument> {
        bson::to_document(self).map_err(|e| BookstoreError::Serialization(e.to_string()))
    }

    /// Create record from BSON
    fn from_bson(doc: BsonDocument) -> Result<Self> {
        bson::from_document(doc).map_err(|e| BookstoreError::Deserialization(e.to_string()))
    }
}

/// A book in the `books` collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub title: String,
    pub author: String,
    pub genre: String,
    pub published_year: i32,
    pub price: f64,
    pub in_stock: bool,
}

impl Book {
    pub fn new(
        title: impl Into<String>,
        author: impl Into<String>,
        genre: impl Into<String>,
        published_year: i32,
        price: f64,
        in_stock: bool,
    ) -> Self {
        Self {
            id: None,
            title: title.into(),
            author: author.into(),
            genre: genre.into(),
            published_year,
            price,
            in_stock,
        }
    }
}

impl Record for Book {
    fn collection_name() -> &'static str {
        "books"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_collection_name() {
        assert_eq!(Book::collection_name(), "books");
    }

    #[test]
    fn test_to_bson_skips_missing_id() {
        let book = Book::new("Dune", "Frank Herbert", "Science Fiction", 1965, 9.99, true);
        let bson = book.to_bson().unwrap();
        assert!(!bson.contains_key("_id"));
        assert_eq!(bson.get_str("title").unwrap(), "Dune");
        assert_eq!(bson.get_i32("published_year").unwrap(), 1965);
        assert_eq!(bson.get_f64("price").unwrap(), 9.99);
        assert!(bson.get_bool("in_stock").unwrap());
    }

    #[test]
    fn test_from_bson() {
        let id = ObjectId::new();
        let bson = doc! {
            "_id": id,
            "title": "1984",
            "author": "George Orwell",
            "genre": "Dystopian",
            "published_year": 1949,
            "price": 8.5,
            "in_stock": false,
        };

        let book = Book::from_bson(bson).unwrap();
        assert_eq!(book.id, Some(id));
        assert_eq!(book.author, "George Orwell");
        assert!(!book.in_stock);
    }

    #[test]
    fn test_from_bson_missing_field() {
        let result = Book::from_bson(doc! { "title": "Untitled" });
        assert!(matches!(result, Err(BookstoreError::Deserialization(_))));
    }
}
