//! Evaluation of query descriptors against in-memory documents
//!
//! Follows MongoDB semantics for the subset of operators the descriptors can
//! express: numeric comparisons cross integer/double types, missing fields
//! compare equal to null, and sorting uses the server's cross-type order.

use std::cmp::Ordering;

use bookstore_common::{BookstoreError, Result};
use bson::{doc, Bson, Document as BsonDocument};

use crate::pipeline::{Accumulator, Expr, Pipeline, Projected, Stage};
use crate::query::{Comparison, Filter, Projection, SortDirection, SortSpec, Update};

/// Resolve a dotted path
pub(crate) fn lookup<'a>(doc: &'a BsonDocument, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let mut current = doc.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Bson::Document(inner) => inner.get(segment)?,
            _ => return None,
        };
    }
    Some(current)
}

fn as_i64(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(v) => Some(i64::from(*v)),
        Bson::Int64(v) => Some(*v),
        _ => None,
    }
}

fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(v) => Some(f64::from(*v)),
        Bson::Int64(v) => Some(*v as f64),
        Bson::Double(v) => Some(*v),
        _ => None,
    }
}

fn integer(value: i64) -> Bson {
    match i32::try_from(value) {
        Ok(small) => Bson::Int32(small),
        Err(_) => Bson::Int64(value),
    }
}

fn type_name(value: &Bson) -> String {
    format!("{:?}", value.element_type())
}

/// Ordering between values of the same type class; `None` across classes
pub(crate) fn compare_values(a: &Bson, b: &Bson) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (as_i64(a), as_i64(b)) {
        return Some(x.cmp(&y));
    }
    if let (Some(x), Some(y)) = (as_f64(a), as_f64(b)) {
        return x.partial_cmp(&y);
    }
    match (a, b) {
        (Bson::String(x), Bson::String(y)) => Some(x.cmp(y)),
        (Bson::Boolean(x), Bson::Boolean(y)) => Some(x.cmp(y)),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => Some(x.bytes().cmp(&y.bytes())),
        (Bson::DateTime(x), Bson::DateTime(y)) => {
            Some(x.timestamp_millis().cmp(&y.timestamp_millis()))
        }
        (Bson::Null, Bson::Null) => Some(Ordering::Equal),
        _ if a == b => Some(Ordering::Equal),
        _ => None,
    }
}

pub(crate) fn values_equal(a: &Bson, b: &Bson) -> bool {
    compare_values(a, b) == Some(Ordering::Equal)
}

pub(crate) fn matches(filter: &Filter, doc: &BsonDocument) -> bool {
    match filter {
        Filter::All => true,
        Filter::And(parts) => parts.iter().all(|part| matches(part, doc)),
        Filter::Compare { field, op, value } => {
            let actual = lookup(doc, field.as_str());
            let ordering = || actual.and_then(|a| compare_values(a, value));
            match op {
                Comparison::Eq => values_equal(actual.unwrap_or(&Bson::Null), value),
                Comparison::Ne => !values_equal(actual.unwrap_or(&Bson::Null), value),
                Comparison::Gt => ordering() == Some(Ordering::Greater),
                Comparison::Gte => matches!(ordering(), Some(Ordering::Greater | Ordering::Equal)),
                Comparison::Lt => ordering() == Some(Ordering::Less),
                Comparison::Lte => matches!(ordering(), Some(Ordering::Less | Ordering::Equal)),
            }
        }
    }
}

fn type_rank(value: Option<&Bson>) -> u8 {
    match value {
        None | Some(Bson::Null) | Some(Bson::Undefined) => 0,
        Some(Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_)) => 1,
        Some(Bson::String(_) | Bson::Symbol(_)) => 2,
        Some(Bson::Document(_)) => 3,
        Some(Bson::Array(_)) => 4,
        Some(Bson::Binary(_)) => 5,
        Some(Bson::ObjectId(_)) => 6,
        Some(Bson::Boolean(_)) => 7,
        Some(Bson::DateTime(_)) => 8,
        Some(Bson::Timestamp(_)) => 9,
        Some(_) => 10,
    }
}

/// Total order used for sorting: null < numbers < strings < ... < dates
fn sort_order(a: Option<&Bson>, b: Option<&Bson>) -> Ordering {
    let (rank_a, rank_b) = (type_rank(a), type_rank(b));
    if rank_a != rank_b {
        return rank_a.cmp(&rank_b);
    }
    match (a, b) {
        (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
        _ => Ordering::Equal,
    }
}

/// Stable sort on every key in order
pub(crate) fn sort_documents(docs: &mut [BsonDocument], spec: &SortSpec) {
    docs.sort_by(|a, b| {
        for (field, direction) in spec.keys() {
            let ordering = sort_order(lookup(a, field.as_str()), lookup(b, field.as_str()));
            let ordering = match direction {
                SortDirection::Ascending => ordering,
                SortDirection::Descending => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

fn set_path(doc: &mut BsonDocument, path: &str, value: Bson) -> Result<()> {
    match path.split_once('.') {
        None => {
            doc.insert(path, value);
            Ok(())
        }
        Some((head, rest)) => {
            if !doc.contains_key(head) {
                doc.insert(head, BsonDocument::new());
            }
            match doc.get_mut(head) {
                Some(Bson::Document(inner)) => set_path(inner, rest, value),
                _ => Err(BookstoreError::Query(format!(
                    "Cannot create field '{}' in non-document element '{}'",
                    rest, head
                ))),
            }
        }
    }
}

/// Apply a `$set`; returns whether any value actually changed
pub(crate) fn apply_update(update: &Update, doc: &mut BsonDocument) -> Result<bool> {
    let mut modified = false;
    for (field, value) in update.assignments() {
        if lookup(doc, field.as_str()) == Some(value) {
            continue;
        }
        set_path(doc, field.as_str(), value.clone())?;
        modified = true;
    }
    Ok(modified)
}

pub(crate) fn project(projection: &Projection, doc: &BsonDocument) -> Result<BsonDocument> {
    let mut out = BsonDocument::new();
    if !projection.excludes_id() {
        if let Some(id) = doc.get("_id") {
            out.insert("_id", id.clone());
        }
    }
    for field in projection.fields() {
        if field.as_str() == "_id" {
            continue;
        }
        if let Some(value) = lookup(doc, field.as_str()) {
            set_path(&mut out, field.as_str(), value.clone())?;
        }
    }
    Ok(out)
}

pub(crate) fn evaluate(expr: &Expr, doc: &BsonDocument) -> Result<Bson> {
    match expr {
        Expr::Field(field) => Ok(lookup(doc, field.as_str()).cloned().unwrap_or(Bson::Null)),
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Floor(inner) => match evaluate(inner, doc)? {
            Bson::Null => Ok(Bson::Null),
            Bson::Double(v) => Ok(Bson::Double(v.floor())),
            v @ (Bson::Int32(_) | Bson::Int64(_)) => Ok(v),
            other => Err(BookstoreError::Query(format!(
                "$floor only supports numeric types, not {}",
                type_name(&other)
            ))),
        },
        Expr::Divide(dividend, divisor) => {
            let (x, y) = (evaluate(dividend, doc)?, evaluate(divisor, doc)?);
            if x == Bson::Null || y == Bson::Null {
                return Ok(Bson::Null);
            }
            match (as_f64(&x), as_f64(&y)) {
                (Some(_), Some(d)) if d == 0.0 => Err(BookstoreError::Query(
                    "can't $divide by zero".to_string(),
                )),
                (Some(n), Some(d)) => Ok(Bson::Double(n / d)),
                _ => Err(BookstoreError::Query(format!(
                    "$divide only supports numeric types, not {} and {}",
                    type_name(&x),
                    type_name(&y)
                ))),
            }
        }
        Expr::Multiply(left, right) => {
            let (x, y) = (evaluate(left, doc)?, evaluate(right, doc)?);
            if x == Bson::Null || y == Bson::Null {
                return Ok(Bson::Null);
            }
            if let (Some(a), Some(b)) = (as_i64(&x), as_i64(&y)) {
                if let Some(product) = a.checked_mul(b) {
                    return Ok(integer(product));
                }
            }
            match (as_f64(&x), as_f64(&y)) {
                (Some(a), Some(b)) => Ok(Bson::Double(a * b)),
                _ => Err(BookstoreError::Query(format!(
                    "$multiply only supports numeric types, not {} and {}",
                    type_name(&x),
                    type_name(&y)
                ))),
            }
        }
        Expr::ToString(inner) => match evaluate(inner, doc)? {
            Bson::Null => Ok(Bson::Null),
            Bson::String(s) => Ok(Bson::String(s)),
            Bson::Int32(v) => Ok(Bson::String(v.to_string())),
            Bson::Int64(v) => Ok(Bson::String(v.to_string())),
            // Display drops a zero fraction: 1990.0 renders as "1990"
            Bson::Double(v) => Ok(Bson::String(v.to_string())),
            Bson::Boolean(v) => Ok(Bson::String(v.to_string())),
            Bson::ObjectId(oid) => Ok(Bson::String(oid.to_hex())),
            other => Err(BookstoreError::Query(format!(
                "Unsupported conversion from {} to string",
                type_name(&other)
            ))),
        },
        Expr::Concat(parts) => {
            let mut out = String::new();
            for part in parts {
                match evaluate(part, doc)? {
                    Bson::Null => return Ok(Bson::Null),
                    Bson::String(s) => out.push_str(&s),
                    other => {
                        return Err(BookstoreError::Query(format!(
                            "$concat only supports strings, not {}",
                            type_name(&other)
                        )))
                    }
                }
            }
            Ok(Bson::String(out))
        }
    }
}

enum Running {
    Avg { total: f64, count: u64 },
    Sum { int: i64, float: f64, has_float: bool },
}

impl Running {
    fn start(accumulator: &Accumulator) -> Self {
        match accumulator {
            Accumulator::Avg(_) => Running::Avg { total: 0.0, count: 0 },
            Accumulator::Sum(_) => Running::Sum {
                int: 0,
                float: 0.0,
                has_float: false,
            },
        }
    }

    /// Non-numeric inputs are ignored, as the server does
    fn add(&mut self, input: &Bson) {
        match self {
            Running::Avg { total, count } => {
                if let Some(v) = as_f64(input) {
                    *total += v;
                    *count += 1;
                }
            }
            Running::Sum {
                int,
                float,
                has_float,
            } => {
                if let Some(v) = as_i64(input) {
                    match int.checked_add(v) {
                        Some(sum) => *int = sum,
                        None => {
                            *float += v as f64;
                            *has_float = true;
                        }
                    }
                } else if let Some(v) = as_f64(input) {
                    *float += v;
                    *has_float = true;
                }
            }
        }
    }

    fn finish(self) -> Bson {
        match self {
            Running::Avg { count: 0, .. } => Bson::Null,
            Running::Avg { total, count } => Bson::Double(total / count as f64),
            Running::Sum {
                int,
                float,
                has_float: true,
            } => Bson::Double(float + int as f64),
            Running::Sum { int, .. } => integer(int),
        }
    }
}

fn accumulator_input(accumulator: &Accumulator) -> &Expr {
    match accumulator {
        Accumulator::Avg(expr) | Accumulator::Sum(expr) => expr,
    }
}

/// Groups come out in first-seen order
fn group(
    id: &Expr,
    accumulators: &[(String, Accumulator)],
    docs: &[BsonDocument],
) -> Result<Vec<BsonDocument>> {
    let mut groups: Vec<(Bson, Vec<Running>)> = Vec::new();
    for doc in docs {
        let key = evaluate(id, doc)?;
        let position = match groups.iter().position(|(k, _)| values_equal(k, &key)) {
            Some(position) => position,
            None => {
                let running = accumulators.iter().map(|(_, a)| Running::start(a)).collect();
                groups.push((key, running));
                groups.len() - 1
            }
        };
        for ((_, accumulator), running) in accumulators.iter().zip(groups[position].1.iter_mut()) {
            running.add(&evaluate(accumulator_input(accumulator), doc)?);
        }
    }

    Ok(groups
        .into_iter()
        .map(|(key, running)| {
            let mut out = doc! { "_id": key };
            for ((name, _), state) in accumulators.iter().zip(running) {
                out.insert(name.as_str(), state.finish());
            }
            out
        })
        .collect())
}

fn project_stage(fields: &[(String, Projected)], doc: &BsonDocument) -> Result<BsonDocument> {
    let shapes_output = fields
        .iter()
        .any(|(_, projected)| !matches!(projected, Projected::Exclude));

    if !shapes_output {
        let mut out = doc.clone();
        for (name, _) in fields {
            out.remove(name);
        }
        return Ok(out);
    }

    let mut out = BsonDocument::new();
    if !fields.iter().any(|(name, _)| name == "_id") {
        if let Some(id) = doc.get("_id") {
            out.insert("_id", id.clone());
        }
    }
    for (name, projected) in fields {
        match projected {
            Projected::Exclude => {}
            Projected::Include => {
                if let Some(value) = doc.get(name) {
                    out.insert(name.as_str(), value.clone());
                }
            }
            Projected::Computed(expr) => {
                out.insert(name.as_str(), evaluate(expr, doc)?);
            }
        }
    }
    Ok(out)
}

fn run_stage(stage: &Stage, mut docs: Vec<BsonDocument>) -> Result<Vec<BsonDocument>> {
    match stage {
        Stage::Group { id, accumulators } => group(id, accumulators, &docs),
        Stage::Sort(spec) => {
            sort_documents(&mut docs, spec);
            Ok(docs)
        }
        Stage::Limit(n) => {
            docs.truncate(usize::try_from(*n).unwrap_or(usize::MAX));
            Ok(docs)
        }
        Stage::Project(fields) => docs.iter().map(|doc| project_stage(fields, doc)).collect(),
    }
}

pub(crate) fn run_pipeline(
    pipeline: &Pipeline,
    docs: Vec<BsonDocument>,
) -> Result<Vec<BsonDocument>> {
    pipeline
        .stages()
        .iter()
        .try_fold(docs, |docs, stage| run_stage(stage, docs))
}
