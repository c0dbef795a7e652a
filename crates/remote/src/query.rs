use std::{cmp::Ordering, fmt};

use serde_json::Value;

pub type Row = serde_json::Map<String, Value>;

/// Column predicate, rendered in the backend's `column=op.value` form.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    In(String, Vec<Value>),
    Gt(String, Value),
    Gte(String, Value),
    Lt(String, Value),
    Lte(String, Value),
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq(column.into(), value.into())
    }

    pub fn column(&self) -> &str {
        match self {
            Self::Eq(c, _)
            | Self::In(c, _)
            | Self::Gt(c, _)
            | Self::Gte(c, _)
            | Self::Lt(c, _)
            | Self::Lte(c, _) => c,
        }
    }

    /// Whether `row` satisfies the predicate. Missing columns read as null.
    pub fn matches(&self, row: &Row) -> bool {
        let actual = row.get(self.column()).unwrap_or(&Value::Null);
        match self {
            Self::Eq(_, expected) => values_equal(actual, expected),
            Self::In(_, candidates) => candidates.iter().any(|c| values_equal(actual, c)),
            Self::Gt(_, bound) => compare_values(actual, bound) == Some(Ordering::Greater),
            Self::Gte(_, bound) => matches!(
                compare_values(actual, bound),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Self::Lt(_, bound) => compare_values(actual, bound) == Some(Ordering::Less),
            Self::Lte(_, bound) => matches!(
                compare_values(actual, bound),
                Some(Ordering::Less | Ordering::Equal)
            ),
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn plain(value: &Value) -> String {
            match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            }
        }
        match self {
            Self::Eq(c, v) => write!(f, "{c}=eq.{}", plain(v)),
            Self::In(c, vs) => write!(
                f,
                "{c}=in.({})",
                vs.iter().map(plain).collect::<Vec<_>>().join(",")
            ),
            Self::Gt(c, v) => write!(f, "{c}=gt.{}", plain(v)),
            Self::Gte(c, v) => write!(f, "{c}=gte.{}", plain(v)),
            Self::Lt(c, v) => write!(f, "{c}=lt.{}", plain(v)),
            Self::Lte(c, v) => write!(f, "{c}=lte.{}", plain(v)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowRange {
    pub offset: usize,
    pub limit: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<Filter>,
    pub order: Vec<Order>,
    pub range: Option<RowRange>,
}

impl Query {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            filters: Vec::new(),
            order: Vec::new(),
            range: None,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn eq(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Filter::Eq(column.into(), value.into()))
    }

    pub fn is_in<V: Into<Value>>(
        self,
        column: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        self.filter(Filter::In(column.into(), values))
    }

    pub fn order_by(mut self, column: impl Into<String>, ascending: bool) -> Self {
        self.order.push(Order {
            column: column.into(),
            ascending,
        });
        self
    }

    pub fn range(mut self, offset: usize, limit: usize) -> Self {
        self.range = Some(RowRange { offset, limit });
        self
    }

    pub fn matches(&self, row: &Row) -> bool {
        self.filters.iter().all(|f| f.matches(row))
    }

    /// Order two rows according to the query's ordering clauses.
    pub fn compare_rows(&self, a: &Row, b: &Row) -> Ordering {
        for order in &self.order {
            let left = a.get(&order.column).unwrap_or(&Value::Null);
            let right = b.get(&order.column).unwrap_or(&Value::Null);
            let ord = compare_values(left, right).unwrap_or(Ordering::Equal);
            let ord = if order.ascending { ord } else { ord.reverse() };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

/// A collection plus an optional scoping filter, e.g.
/// `checklist_items` where `task_id=eq.<id>`.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionDescriptor {
    pub collection: String,
    pub filter: Option<Filter>,
}

impl CollectionDescriptor {
    pub fn all(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            filter: None,
        }
    }

    pub fn scoped(collection: impl Into<String>, filter: Filter) -> Self {
        Self {
            collection: collection.into(),
            filter: Some(filter),
        }
    }

    pub fn matches(&self, collection: &str, row: Option<&Row>) -> bool {
        if self.collection != collection {
            return false;
        }
        match (&self.filter, row) {
            (None, _) => true,
            (Some(filter), Some(row)) => filter.matches(row),
            (Some(_), None) => false,
        }
    }
}

impl fmt::Display for CollectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.filter {
            Some(filter) => write!(f, "{}?{filter}", self.collection),
            None => f.write_str(&self.collection),
        }
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => compare_values(a, b) == Some(Ordering::Equal),
        _ => a == b,
    }
}

/// Total-enough ordering for column values: numbers numerically, strings
/// lexically, booleans false < true, null before everything else.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Null, _) => Some(Ordering::Less),
        (_, Value::Null) => Some(Ordering::Greater),
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}
