//! Query expression evaluation for in-memory document filtering.
//!
//! Field names are dot paths into nested documents. Numbers compare by value whatever
//! their BSON width, and UUIDs compare equal to their hyphenated string form.

use std::{cmp::Ordering, collections::HashMap};

use bson::{Bson, Uuid, datetime::DateTime, oid::ObjectId, spec::BinarySubtype};

use vellum_core::{
    document::{lookup_path, uuid_from_bson},
    error::{DocumentStoreError, DocumentStoreResult},
    query::{Expr, FieldOp, QueryVisitor},
};

/// Comparable view of a BSON value.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    Null,
    Bool(bool),
    /// Every integer and float, widened to f64.
    Number(f64),
    DateTime(DateTime),
    String(&'a str),
    Uuid(Uuid),
    ObjectId(ObjectId),
    Bytes(&'a [u8]),
    Array(Vec<Comparable<'a>>),
    Map(HashMap<&'a str, Comparable<'a>>),
    /// Values no filter can match.
    Opaque,
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Null | Bson::Undefined => Comparable::Null,
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Number(f64::from(*value)),
            Bson::Int64(value) => Comparable::Number(*value as f64),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::String(value) => Comparable::String(value),
            Bson::ObjectId(value) => Comparable::ObjectId(*value),
            Bson::Binary(binary) if binary.subtype == BinarySubtype::Uuid => {
                uuid_from_bson(bson).map_or(Comparable::Opaque, Comparable::Uuid)
            }
            Bson::Binary(binary) => Comparable::Bytes(&binary.bytes),
            Bson::Array(items) => Comparable::Array(items.iter().map(Comparable::from).collect()),
            Bson::Document(document) => Comparable::Map(
                document
                    .iter()
                    .map(|(key, value)| (key.as_str(), Comparable::from(value)))
                    .collect(),
            ),
            _ => Comparable::Opaque,
        }
    }
}

impl PartialEq for Comparable<'_> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Number(a), Comparable::Number(b)) => a == b,
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::Uuid(a), Comparable::Uuid(b)) => a == b,
            (Comparable::Uuid(id), Comparable::String(text)) | (Comparable::String(text), Comparable::Uuid(id)) => {
                Uuid::parse_str(text).is_ok_and(|parsed| parsed == *id)
            }
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a == b,
            (Comparable::Bytes(a), Comparable::Bytes(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            _ => false,
        }
    }
}

impl PartialOrd for Comparable<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.partial_cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

/// Comparable value at `path` in `document`, `Null` when absent.
pub(crate) fn comparable_at<'a>(document: &'a Bson, path: &str) -> Comparable<'a> {
    document
        .as_document()
        .and_then(|document| lookup_path(document, path))
        .map_or(Comparable::Null, Comparable::from)
}

/// Evaluates filter expressions against one stored document.
pub(crate) struct DocumentEvaluator<'a> {
    document: &'a Bson,
}

impl<'a> DocumentEvaluator<'a> {
    pub fn new(document: &'a Bson) -> Self {
        Self { document }
    }

    pub fn evaluate(&mut self, expr: &Expr) -> DocumentStoreResult<bool> {
        self.visit_expr(expr)
    }

    /// Documents matching `expr`, in their original order.
    pub fn filter_documents(documents: impl IntoIterator<Item = &'a Bson>, expr: &Expr) -> Vec<&'a Bson> {
        documents
            .into_iter()
            .filter(|document| {
                DocumentEvaluator::new(document)
                    .evaluate(expr)
                    .unwrap_or(false)
            })
            .collect()
    }

    fn lookup(&self, field: &str) -> Option<&'a Bson> {
        self.document
            .as_document()
            .and_then(|document| lookup_path(document, field))
    }
}

impl QueryVisitor for DocumentEvaluator<'_> {
    type Output = bool;
    type Error = DocumentStoreError;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        for expr in exprs {
            if !self.visit_expr(expr)? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        for expr in exprs {
            if self.visit_expr(expr)? {
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        Ok(!self.visit_expr(expr)?)
    }

    fn visit_exists(&mut self, field: &str, should_exist: bool) -> Result<Self::Output, Self::Error> {
        Ok(self.lookup(field).is_some() == should_exist)
    }

    fn visit_field(&mut self, field: &str, op: &FieldOp, value: &Bson) -> Result<Self::Output, Self::Error> {
        let Some(field_value) = self.lookup(field) else {
            return Ok(matches!(op, FieldOp::Ne | FieldOp::NoneOf));
        };
        let left = Comparable::from(field_value);
        let right = Comparable::from(value);

        Ok(match op {
            FieldOp::Eq => left == right,
            FieldOp::Ne => left != right,
            FieldOp::Gt => left.partial_cmp(&right) == Some(Ordering::Greater),
            FieldOp::Gte => matches!(left.partial_cmp(&right), Some(Ordering::Greater | Ordering::Equal)),
            FieldOp::Lt => left.partial_cmp(&right) == Some(Ordering::Less),
            FieldOp::Lte => matches!(left.partial_cmp(&right), Some(Ordering::Less | Ordering::Equal)),
            FieldOp::Contains => match (&left, &right) {
                (Comparable::Array(items), _) => items.contains(&right),
                (Comparable::String(text), Comparable::String(part)) => text.contains(part),
                _ => false,
            },
            FieldOp::AnyOf => any_of(&left, &right),
            FieldOp::NoneOf => !any_of(&left, &right),
        })
    }
}

/// Whether `left`, or any of its elements, equals `right` or one of its elements.
fn any_of(left: &Comparable<'_>, right: &Comparable<'_>) -> bool {
    match (left, right) {
        (Comparable::Array(items), Comparable::Array(values)) => values.iter().any(|value| items.contains(value)),
        (Comparable::Array(items), single) => items.contains(single),
        (single, Comparable::Array(values)) => values.contains(single),
        (left, right) => left == right,
    }
}
