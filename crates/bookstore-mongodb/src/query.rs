//! Typed query descriptors for find, update and delete operations
//!
//! Every descriptor validates its field names on construction and renders to
//! the BSON document the MongoDB driver expects.

use bookstore_common::{BookstoreError, Result};
use bson::{doc, Bson, Document as BsonDocument};

use crate::validation::ValidatedFieldName;

/// Comparison operator of a single-field filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Comparison {
    /// The MongoDB query operator for this comparison
    pub fn operator(self) -> &'static str {
        match self {
            Comparison::Eq => "$eq",
            Comparison::Ne => "$ne",
            Comparison::Gt => "$gt",
            Comparison::Gte => "$gte",
            Comparison::Lt => "$lt",
            Comparison::Lte => "$lte",
        }
    }

    fn condition(self, value: &Bson) -> Bson {
        match self {
            // A bare document would be read as operators and a bare regex as a pattern match
            Comparison::Eq
                if matches!(value, Bson::Document(_) | Bson::RegularExpression(_)) =>
            {
                Bson::Document(doc! { "$eq": value.clone() })
            }
            // `{ field: value }` rather than `{ field: { $eq: value } }`
            Comparison::Eq => value.clone(),
            op => {
                let mut condition = BsonDocument::new();
                condition.insert(op.operator(), value.clone());
                Bson::Document(condition)
            }
        }
    }
}

/// Query filter
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Matches every document
    All,
    Compare {
        field: ValidatedFieldName,
        op: Comparison,
        value: Bson,
    },
    /// Conjunction of filters
    And(Vec<Filter>),
}

impl Filter {
    pub fn all() -> Self {
        Filter::All
    }

    pub fn compare(field: &str, op: Comparison, value: impl Into<Bson>) -> Result<Self> {
        Ok(Filter::Compare {
            field: ValidatedFieldName::new(field)?,
            op,
            value: value.into(),
        })
    }

    pub fn eq(field: &str, value: impl Into<Bson>) -> Result<Self> {
        Self::compare(field, Comparison::Eq, value)
    }

    pub fn ne(field: &str, value: impl Into<Bson>) -> Result<Self> {
        Self::compare(field, Comparison::Ne, value)
    }

    pub fn gt(field: &str, value: impl Into<Bson>) -> Result<Self> {
        Self::compare(field, Comparison::Gt, value)
    }

    pub fn gte(field: &str, value: impl Into<Bson>) -> Result<Self> {
        Self::compare(field, Comparison::Gte, value)
    }

    pub fn lt(field: &str, value: impl Into<Bson>) -> Result<Self> {
        Self::compare(field, Comparison::Lt, value)
    }

    pub fn lte(field: &str, value: impl Into<Bson>) -> Result<Self> {
        Self::compare(field, Comparison::Lte, value)
    }

    /// Combine two filters; nested conjunctions are flattened and `All` is absorbed
    pub fn and(self, other: Filter) -> Filter {
        let mut parts = match self {
            Filter::All => Vec::new(),
            Filter::And(parts) => parts,
            single => vec![single],
        };
        match other {
            Filter::All => {}
            Filter::And(more) => parts.extend(more),
            single => parts.push(single),
        }
        match parts.len() {
            0 => Filter::All,
            1 => parts.remove(0),
            _ => Filter::And(parts),
        }
    }

    /// Equality conditions, in filter order
    pub fn equalities(&self) -> Vec<(&ValidatedFieldName, &Bson)> {
        match self {
            Filter::All => Vec::new(),
            Filter::Compare {
                field,
                op: Comparison::Eq,
                value,
            } => vec![(field, value)],
            Filter::Compare { .. } => Vec::new(),
            Filter::And(parts) => parts.iter().flat_map(Filter::equalities).collect(),
        }
    }

    /// Render the filter document
    ///
    /// Conjunctions over distinct fields render as one flat document; repeated
    /// fields fall back to an explicit `$and`.
    pub fn to_document(&self) -> BsonDocument {
        match self {
            Filter::All => BsonDocument::new(),
            Filter::Compare { field, op, value } => {
                let mut rendered = BsonDocument::new();
                rendered.insert(field.as_str(), op.condition(value));
                rendered
            }
            Filter::And(parts) => {
                let rendered: Vec<BsonDocument> = parts
                    .iter()
                    .map(Filter::to_document)
                    .filter(|d| !d.is_empty())
                    .collect();

                let mut merged = BsonDocument::new();
                for part in &rendered {
                    for (key, value) in part {
                        if merged.contains_key(key) {
                            return doc! { "$and": rendered.clone() };
                        }
                        merged.insert(key.clone(), value.clone());
                    }
                }
                merged
            }
        }
    }
}

/// `$set` update of one or more fields
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    assignments: Vec<(ValidatedFieldName, Bson)>,
}

impl Update {
    pub fn set(field: &str, value: impl Into<Bson>) -> Result<Self> {
        Update {
            assignments: Vec::new(),
        }
        .and_set(field, value)
    }

    pub fn and_set(mut self, field: &str, value: impl Into<Bson>) -> Result<Self> {
        let field = ValidatedFieldName::new(field)?;
        if field.as_str() == "_id" {
            return Err(BookstoreError::Validation(
                "The '_id' field is immutable and cannot be updated".to_string(),
            ));
        }
        if self.assignments.iter().any(|(f, _)| f == &field) {
            return Err(BookstoreError::Validation(format!(
                "Field '{}' is assigned twice in the same update",
                field
            )));
        }
        self.assignments.push((field, value.into()));
        Ok(self)
    }

    pub fn assignments(&self) -> &[(ValidatedFieldName, Bson)] {
        &self.assignments
    }

    pub fn to_document(&self) -> BsonDocument {
        let mut set = BsonDocument::new();
        for (field, value) in &self.assignments {
            set.insert(field.as_str(), value.clone());
        }
        doc! { "$set": set }
    }
}

/// Inclusion projection with optional `_id` suppression
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    include: Vec<ValidatedFieldName>,
    exclude_id: bool,
}

impl Projection {
    pub fn include(fields: &[&str]) -> Result<Self> {
        if fields.is_empty() {
            return Err(BookstoreError::Validation(
                "Projection must include at least one field".to_string(),
            ));
        }
        let include = fields
            .iter()
            .map(|f| ValidatedFieldName::new(f))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            include,
            exclude_id: false,
        })
    }

    /// Suppress the `_id` field, which MongoDB returns by default
    pub fn without_id(mut self) -> Self {
        self.exclude_id = true;
        self
    }

    pub fn fields(&self) -> &[ValidatedFieldName] {
        &self.include
    }

    pub fn excludes_id(&self) -> bool {
        self.exclude_id
    }

    pub fn to_document(&self) -> BsonDocument {
        let mut rendered = BsonDocument::new();
        for field in &self.include {
            rendered.insert(field.as_str(), 1);
        }
        if self.exclude_id {
            rendered.insert("_id", 0);
        }
        rendered
    }
}

/// Sort or index key direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn as_i32(self) -> i32 {
        match self {
            SortDirection::Ascending => 1,
            SortDirection::Descending => -1,
        }
    }
}

/// Ordered list of sort keys (never empty, no repeated fields)
#[derive(Debug, Clone, PartialEq)]
pub struct SortSpec {
    keys: Vec<(ValidatedFieldName, SortDirection)>,
}

impl SortSpec {
    pub fn by(field: &str, direction: SortDirection) -> Result<Self> {
        Ok(Self {
            keys: vec![(ValidatedFieldName::new(field)?, direction)],
        })
    }

    pub fn ascending(field: &str) -> Result<Self> {
        Self::by(field, SortDirection::Ascending)
    }

    pub fn descending(field: &str) -> Result<Self> {
        Self::by(field, SortDirection::Descending)
    }

    /// Add a secondary key
    pub fn then(mut self, field: &str, direction: SortDirection) -> Result<Self> {
        push_key(&mut self.keys, field, direction)?;
        Ok(self)
    }

    pub fn keys(&self) -> &[(ValidatedFieldName, SortDirection)] {
        &self.keys
    }

    pub fn to_document(&self) -> BsonDocument {
        keys_document(&self.keys)
    }
}

pub(crate) fn push_key(
    keys: &mut Vec<(ValidatedFieldName, SortDirection)>,
    field: &str,
    direction: SortDirection,
) -> Result<()> {
    let field = ValidatedFieldName::new(field)?;
    if keys.iter().any(|(f, _)| f == &field) {
        return Err(BookstoreError::Validation(format!(
            "Key '{}' appears more than once",
            field
        )));
    }
    keys.push((field, direction));
    Ok(())
}

pub(crate) fn keys_document(keys: &[(ValidatedFieldName, SortDirection)]) -> BsonDocument {
    let mut rendered = BsonDocument::new();
    for (field, direction) in keys {
        rendered.insert(field.as_str(), direction.as_i32());
    }
    rendered
}

/// Find query: filter plus optional projection, sort, skip and limit
#[derive(Debug, Clone, PartialEq)]
pub struct FindQuery {
    filter: Filter,
    projection: Option<Projection>,
    sort: Option<SortSpec>,
    skip: Option<u64>,
    limit: Option<u64>,
}

impl Default for FindQuery {
    fn default() -> Self {
        Self::new()
    }
}

impl FindQuery {
    /// Query matching every document
    pub fn new() -> Self {
        Self {
            filter: Filter::All,
            projection: None,
            sort: None,
            skip: None,
            limit: None,
        }
    }

    pub fn matching(filter: Filter) -> Self {
        Self::new().filter(filter)
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn projection(mut self, projection: Projection) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn sort(mut self, sort: SortSpec) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    /// Set the maximum number of documents to return
    ///
    /// A limit of zero means "no limit" to MongoDB, so it is rejected here.
    pub fn limit(mut self, limit: u64) -> Result<Self> {
        if limit == 0 || limit > i64::MAX as u64 {
            return Err(BookstoreError::Validation(format!(
                "Limit must be between 1 and {}, got {}",
                i64::MAX,
                limit
            )));
        }
        self.limit = Some(limit);
        Ok(self)
    }

    pub fn get_filter(&self) -> &Filter {
        &self.filter
    }

    pub fn get_projection(&self) -> Option<&Projection> {
        self.projection.as_ref()
    }

    pub fn get_sort(&self) -> Option<&SortSpec> {
        self.sort.as_ref()
    }

    pub fn get_skip(&self) -> Option<u64> {
        self.skip
    }

    pub fn get_limit(&self) -> Option<u64> {
        self.limit
    }
}
