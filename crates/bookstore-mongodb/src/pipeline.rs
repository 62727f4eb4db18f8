//! Aggregation pipeline descriptors
//!
//! Stages, accumulators and expressions are explicit types instead of raw
//! documents. Output names are validated when a stage is built; rendering to
//! BSON happens only when the pipeline is sent to a store.

use bookstore_common::{BookstoreError, Result};
use bson::{doc, Bson, Document as BsonDocument};

use crate::query::SortSpec;
use crate::validation::{validate_output_name, ValidatedFieldName};

/// Aggregation expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Field path, rendered as `$field`
    Field(ValidatedFieldName),
    Literal(Bson),
    Floor(Box<Expr>),
    Divide(Box<Expr>, Box<Expr>),
    Multiply(Box<Expr>, Box<Expr>),
    ToString(Box<Expr>),
    Concat(Vec<Expr>),
}

impl Expr {
    pub fn field(name: &str) -> Result<Self> {
        Ok(Expr::Field(ValidatedFieldName::new(name)?))
    }

    pub fn literal(value: impl Into<Bson>) -> Self {
        Expr::Literal(value.into())
    }

    pub fn floor(self) -> Self {
        Expr::Floor(Box::new(self))
    }

    pub fn divide(self, divisor: Expr) -> Self {
        Expr::Divide(Box::new(self), Box::new(divisor))
    }

    pub fn multiply(self, factor: Expr) -> Self {
        Expr::Multiply(Box::new(self), Box::new(factor))
    }

    pub fn to_text(self) -> Self {
        Expr::ToString(Box::new(self))
    }

    pub fn concat(parts: Vec<Expr>) -> Result<Self> {
        if parts.is_empty() {
            return Err(BookstoreError::Validation(
                "$concat needs at least one operand".to_string(),
            ));
        }
        Ok(Expr::Concat(parts))
    }

    pub fn to_bson(&self) -> Bson {
        match self {
            Expr::Field(field) => Bson::String(field.as_expression()),
            // Strings starting with '$' and embedded documents would be read as expressions
            Expr::Literal(Bson::String(s)) if s.starts_with('$') => {
                Bson::Document(doc! { "$literal": s.as_str() })
            }
            Expr::Literal(value @ Bson::Document(_)) => {
                Bson::Document(doc! { "$literal": value.clone() })
            }
            Expr::Literal(value) => value.clone(),
            Expr::Floor(inner) => Bson::Document(doc! { "$floor": inner.to_bson() }),
            Expr::Divide(dividend, divisor) => Bson::Document(doc! {
                "$divide": [dividend.to_bson(), divisor.to_bson()]
            }),
            Expr::Multiply(left, right) => Bson::Document(doc! {
                "$multiply": [left.to_bson(), right.to_bson()]
            }),
            Expr::ToString(inner) => Bson::Document(doc! { "$toString": inner.to_bson() }),
            Expr::Concat(parts) => {
                let operands: Vec<Bson> = parts.iter().map(Expr::to_bson).collect();
                Bson::Document(doc! { "$concat": operands })
            }
        }
    }
}

/// `$group` accumulator
#[derive(Debug, Clone, PartialEq)]
pub enum Accumulator {
    Avg(Expr),
    Sum(Expr),
}

impl Accumulator {
    /// `{ $sum: 1 }`
    pub fn count() -> Self {
        Accumulator::Sum(Expr::literal(1))
    }

    pub fn to_bson(&self) -> Bson {
        match self {
            Accumulator::Avg(expr) => Bson::Document(doc! { "$avg": expr.to_bson() }),
            Accumulator::Sum(expr) => Bson::Document(doc! { "$sum": expr.to_bson() }),
        }
    }
}

/// Field specification inside a `$project` stage
#[derive(Debug, Clone, PartialEq)]
pub enum Projected {
    Include,
    Exclude,
    Computed(Expr),
}

impl Projected {
    pub fn to_bson(&self) -> Bson {
        match self {
            Projected::Include => Bson::Int32(1),
            Projected::Exclude => Bson::Int32(0),
            // A bare literal here would mean include/exclude
            Projected::Computed(Expr::Literal(value)) => {
                Bson::Document(doc! { "$literal": value.clone() })
            }
            Projected::Computed(expr) => expr.to_bson(),
        }
    }
}

/// Pipeline stage
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Group {
        id: Expr,
        accumulators: Vec<(String, Accumulator)>,
    },
    Sort(SortSpec),
    Limit(u64),
    Project(Vec<(String, Projected)>),
}

impl Stage {
    pub fn group(id: Expr, accumulators: Vec<(&str, Accumulator)>) -> Result<Self> {
        let mut named: Vec<(String, Accumulator)> = Vec::with_capacity(accumulators.len());
        for (name, accumulator) in accumulators {
            let name = validate_output_name(name)?;
            if name == "_id" {
                return Err(BookstoreError::Validation(
                    "'_id' is reserved for the group key".to_string(),
                ));
            }
            if named.iter().any(|(n, _)| n == &name) {
                return Err(BookstoreError::Validation(format!(
                    "Accumulator '{}' is defined twice",
                    name
                )));
            }
            named.push((name, accumulator));
        }
        Ok(Stage::Group {
            id,
            accumulators: named,
        })
    }

    pub fn sort(spec: SortSpec) -> Self {
        Stage::Sort(spec)
    }

    pub fn limit(n: u64) -> Result<Self> {
        if n == 0 || n > i64::MAX as u64 {
            return Err(BookstoreError::Validation(format!(
                "$limit must be between 1 and {}, got {}",
                i64::MAX,
                n
            )));
        }
        Ok(Stage::Limit(n))
    }

    /// Build a `$project` stage
    ///
    /// Exclusions may only be mixed with inclusions or computed fields for `_id`.
    pub fn project(fields: Vec<(&str, Projected)>) -> Result<Self> {
        if fields.is_empty() {
            return Err(BookstoreError::Validation(
                "$project needs at least one field".to_string(),
            ));
        }
        let shapes_output = fields
            .iter()
            .any(|(_, p)| !matches!(p, Projected::Exclude));

        let mut named: Vec<(String, Projected)> = Vec::with_capacity(fields.len());
        for (name, projected) in fields {
            let name = validate_output_name(name)?;
            if shapes_output && name != "_id" && projected == Projected::Exclude {
                return Err(BookstoreError::Validation(format!(
                    "Cannot exclude '{}' in an inclusion projection",
                    name
                )));
            }
            if named.iter().any(|(n, _)| n == &name) {
                return Err(BookstoreError::Validation(format!(
                    "Field '{}' is projected twice",
                    name
                )));
            }
            named.push((name, projected));
        }
        Ok(Stage::Project(named))
    }

    pub fn to_document(&self) -> BsonDocument {
        match self {
            Stage::Group { id, accumulators } => {
                let mut group = doc! { "_id": id.to_bson() };
                for (name, accumulator) in accumulators {
                    group.insert(name.as_str(), accumulator.to_bson());
                }
                doc! { "$group": group }
            }
            Stage::Sort(spec) => doc! { "$sort": spec.to_document() },
            Stage::Limit(n) => doc! { "$limit": *n as i64 },
            Stage::Project(fields) => {
                let mut project = BsonDocument::new();
                for (name, projected) in fields {
                    project.insert(name.as_str(), projected.to_bson());
                }
                doc! { "$project": project }
            }
        }
    }
}

/// Ordered, non-empty list of stages
#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new(stages: Vec<Stage>) -> Result<Self> {
        if stages.is_empty() {
            return Err(BookstoreError::Validation(
                "Pipeline needs at least one stage".to_string(),
            ));
        }
        Ok(Self { stages })
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn to_documents(&self) -> Vec<BsonDocument> {
        self.stages.iter().map(Stage::to_document).collect()
    }
}
