use mongodb::bson::{doc, Bson, Document};

use crate::models::{EntityKind, TYPE_FIELD};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Clause {
    Equals { field: String, value: String },
    /// Matches when the field equals any of `values`. Empty never matches.
    AnyOf { field: String, values: Vec<String> },
}

/// Conjunctive query over one kind of document.
///
/// A clause on an array field matches when any element matches, as in the
/// document store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    kind: Option<EntityKind>,
    clauses: Vec<Clause>,
}

impl Filter {
    pub fn kind(kind: EntityKind) -> Self {
        Self {
            kind: Some(kind),
            clauses: Vec::new(),
        }
    }

    pub fn eq(mut self, field: &str, value: impl Into<String>) -> Self {
        self.clauses.push(Clause::Equals {
            field: field.to_string(),
            value: value.into(),
        });
        self
    }

    pub fn any_of<I, S>(mut self, field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.clauses.push(Clause::AnyOf {
            field: field.to_string(),
            values: values.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn entity_kind(&self) -> Option<EntityKind> {
        self.kind
    }

    pub fn to_bson(&self) -> Document {
        let mut query = Document::new();
        if let Some(kind) = self.kind {
            query.insert(TYPE_FIELD, kind.tag());
        }
        if !self.clauses.is_empty() {
            let parts: Vec<Bson> = self
                .clauses
                .iter()
                .map(|clause| match clause {
                    Clause::Equals { field, value } => Bson::Document(doc! { field: value }),
                    Clause::AnyOf { field, values } => {
                        Bson::Document(doc! { field: { "$in": values.clone() } })
                    }
                })
                .collect();
            query.insert("$and", parts);
        }
        query
    }

    pub fn matches(&self, document: &Document) -> bool {
        if let Some(kind) = self.kind {
            if document.get_str(TYPE_FIELD).ok() != Some(kind.tag()) {
                return false;
            }
        }
        self.clauses.iter().all(|clause| match clause {
            Clause::Equals { field, value } => field_has(document, field, |v| v == value),
            Clause::AnyOf { field, values } => {
                field_has(document, field, |v| values.iter().any(|x| x == v))
            }
        })
    }
}

fn field_has(document: &Document, field: &str, pred: impl Fn(&str) -> bool) -> bool {
    match document.get(field) {
        Some(Bson::String(s)) => pred(s),
        Some(Bson::Array(items)) => items.iter().any(|item| match item {
            Bson::String(s) => pred(s),
            _ => false,
        }),
        _ => false,
    }
}
