//! Query descriptors and in-memory predicate evaluation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use tracing::warn;

use crate::objects;

/// Number of items a query takes when no explicit window is set.
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Filter comparison operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    Equals,
    Contains,
}

/// Sort direction for an ordered query.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderDirection {
    Ascending,
    Descending,
}

/// One predicate: the field path to resolve on each candidate, the operator,
/// and the expected operand.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub left: String,
    pub operator: Operator,
    pub right: Value,
}

/// An immutable-once-built query descriptor: filters, an optional order-by,
/// and a skip/take pagination window.
///
/// The window describes what a backend should slice; in-memory evaluation via
/// [`evaluate`] filters and sorts but leaves slicing to the backend.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub skipping: usize,
    pub taking: usize,
    pub ordering_by: Option<String>,
    pub order_direction: OrderDirection,
}

impl Default for Query {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
            skipping: 0,
            taking: DEFAULT_PAGE_SIZE,
            ordering_by: None,
            order_direction: OrderDirection::Ascending,
        }
    }
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a filter predicate.
    pub fn where_(mut self, left: impl Into<String>, operator: Operator, right: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            left: left.into(),
            operator,
            right: right.into(),
        });
        self
    }

    pub fn skip(mut self, items_to_skip: usize) -> Self {
        self.skipping = items_to_skip;
        self
    }

    pub fn take(mut self, items_to_take: usize) -> Self {
        self.taking = items_to_take;
        self
    }

    pub fn order_by(mut self, property: impl Into<String>) -> Self {
        self.ordering_by = Some(property.into());
        self.order_direction = OrderDirection::Ascending;
        self
    }

    pub fn order_by_desc(mut self, property: impl Into<String>) -> Self {
        self.ordering_by = Some(property.into());
        self.order_direction = OrderDirection::Descending;
        self
    }

    /// Same query, one window forward.
    pub fn next_page_query(&self) -> Query {
        let mut next = self.clone();
        next.skipping = self.skipping + self.taking;
        next
    }

    /// Same query, one window back; `None` when already at the start.
    pub fn prev_page_query(&self) -> Option<Query> {
        if self.skipping == 0 {
            return None;
        }
        let mut prev = self.clone();
        prev.skipping = self.skipping.saturating_sub(self.taking);
        Some(prev)
    }
}

/// One page of keyed results plus continuation queries for paging.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Page {
    pub value: Map<String, Value>,
    pub next_page: Option<Query>,
    pub prev_page: Option<Query>,
}

/// Filter and sort a keyed collection. The skip/take window is not applied.
pub fn evaluate(entries: Vec<(String, Value)>, query: &Query) -> Vec<(String, Value)> {
    let mut items: Vec<(String, Value)> = entries
        .into_iter()
        .filter(|(_, item)| matches(item, &query.filters))
        .collect();

    if let Some(property) = &query.ordering_by {
        sort_items(&mut items, property, query.order_direction);
    }

    items
}

/// Check an item against every filter of a query.
pub fn matches(item: &Value, filters: &[Filter]) -> bool {
    filters.iter().all(|filter| filter_matches(item, filter))
}

fn filter_matches(item: &Value, filter: &Filter) -> bool {
    let left = objects::get_at(item, &filter.left);

    // Boolean operands: only equality is meaningful. An item is excluded
    // only when exactly one side is boolean-true and the other is absent or
    // false; anything else (including a non-boolean field value) passes.
    if let Value::Bool(expected) = filter.right {
        if filter.operator != Operator::Equals {
            warn!(field = %filter.left, "boolean filters support only the equals operator");
            return false;
        }
        let left_true = matches!(left, Some(Value::Bool(true)));
        let left_false_or_absent = matches!(left, None | Some(Value::Bool(false)));
        return !(expected && left_false_or_absent || !expected && left_true);
    }

    let Some(left) = left else {
        // The item has no value at the field path, so it cannot satisfy a
        // concrete expectation.
        return false;
    };

    match filter.operator {
        Operator::Equals => values_equal(left, &filter.right),
        Operator::Contains => match (left.as_str(), filter.right.as_str()) {
            (Some(l), Some(r)) => l.to_uppercase().contains(&r.to_uppercase()),
            _ => false,
        },
    }
}

/// Equality with case-insensitive string comparison. Both sides are
/// upper-cased, the same fold `Contains` uses, so non-ASCII strings compare
/// consistently across the two operators.
fn values_equal(left: &Value, right: &Value) -> bool {
    match (left.as_str(), right.as_str()) {
        (Some(l), Some(r)) => l.to_uppercase() == r.to_uppercase(),
        _ => left == right,
    }
}

/// Stable sort on the field resolved at `property`; ties keep relative order.
pub fn sort_items(items: &mut [(String, Value)], property: &str, direction: OrderDirection) {
    items.sort_by(|(_, a), (_, b)| {
        let ord = compare_values(objects::get_at(a, property), objects::get_at(b, property));
        match direction {
            OrderDirection::Ascending => ord,
            OrderDirection::Descending => ord.reverse(),
        }
    });
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => match (a, b) {
            (Value::Number(x), Value::Number(y)) => x
                .as_f64()
                .partial_cmp(&y.as_f64())
                .unwrap_or(Ordering::Equal),
            (Value::String(x), Value::String(y)) => x.cmp(y),
            (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
            _ => Ordering::Equal,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entries(values: Vec<Value>) -> Vec<(String, Value)> {
        values
            .into_iter()
            .enumerate()
            .map(|(i, v)| (format!("item{i}"), v))
            .collect()
    }

    #[test]
    fn test_builder_chains() {
        let query = Query::new()
            .where_("name", Operator::Contains, "ada")
            .order_by_desc("age")
            .skip(10)
            .take(5);

        assert_eq!(query.filters.len(), 1);
        assert_eq!(query.ordering_by.as_deref(), Some("age"));
        assert_eq!(query.order_direction, OrderDirection::Descending);
        assert_eq!(query.skipping, 10);
        assert_eq!(query.taking, 5);
    }

    #[test]
    fn test_next_and_prev_page_queries() {
        let query = Query::new().skip(20).take(10);
        assert_eq!(query.next_page_query().skipping, 30);
        assert_eq!(query.prev_page_query().unwrap().skipping, 10);

        let first = Query::new().take(10);
        assert_eq!(first.next_page_query().skipping, 10);
        assert!(first.prev_page_query().is_none());

        // Underflow clamps to the start.
        let odd = Query::new().skip(5).take(10);
        assert_eq!(odd.prev_page_query().unwrap().skipping, 0);
    }

    #[test]
    fn test_equals_is_case_insensitive_for_strings() {
        let query = Query::new().where_("name", Operator::Equals, "ADA");
        let result = evaluate(entries(vec![json!({"name": "ada"}), json!({"name": "bob"})]), &query);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].1["name"], "ada");
    }

    #[test]
    fn test_equals_on_numbers() {
        let query = Query::new().where_("age", Operator::Equals, 30);
        let result = evaluate(entries(vec![json!({"age": 30}), json!({"age": 31})]), &query);
        assert_eq!(result.len(), 1);
    }

    #[test]
    fn test_contains_case_folds() {
        let query = Query::new().where_("title", Operator::Contains, "OFFICE");
        let result = evaluate(
            entries(vec![json!({"title": "Back office"}), json!({"title": "Warehouse"})]),
            &query,
        );
        assert_eq!(result.len(), 1);
    }

    #[test]
    fn test_missing_field_excludes_item() {
        let query = Query::new().where_("name", Operator::Equals, "ada");
        let result = evaluate(entries(vec![json!({"other": 1})]), &query);
        assert!(result.is_empty());
    }

    #[test]
    fn test_boolean_absent_counts_as_false() {
        let query = Query::new().where_("active", Operator::Equals, true);
        let result = evaluate(
            entries(vec![
                json!({"active": true, "id": 1}),
                json!({"active": false, "id": 2}),
                json!({"id": 3}),
            ]),
            &query,
        );
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].1["id"], 1);

        let query = Query::new().where_("active", Operator::Equals, false);
        let result = evaluate(
            entries(vec![json!({"active": true, "id": 1}), json!({"id": 3})]),
            &query,
        );
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].1["id"], 3);
    }

    #[test]
    fn test_boolean_filter_passes_non_boolean_field_values() {
        // A non-boolean value at the field is neither boolean-true nor
        // absent-or-false, so it never disqualifies the item.
        let items = vec![
            json!({"active": "yes", "id": 1}),
            json!({"active": 1, "id": 2}),
        ];

        let query = Query::new().where_("active", Operator::Equals, true);
        assert_eq!(evaluate(entries(items.clone()), &query).len(), 2);

        let query = Query::new().where_("active", Operator::Equals, false);
        assert_eq!(evaluate(entries(items), &query).len(), 2);
    }

    #[test]
    fn test_equals_case_folds_beyond_ascii() {
        let query = Query::new().where_("city", Operator::Equals, "MÜNCHEN");
        let result = evaluate(
            entries(vec![json!({"city": "münchen"}), json!({"city": "hamburg"})]),
            &query,
        );
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].1["city"], "münchen");
    }

    #[test]
    fn test_boolean_rejects_contains_operator() {
        let query = Query::new().where_("active", Operator::Contains, true);
        let result = evaluate(entries(vec![json!({"active": true})]), &query);
        assert!(result.is_empty());
    }

    #[test]
    fn test_sort_ascending_and_descending() {
        let items = vec![
            json!({"age": 42, "name": "c"}),
            json!({"age": 7, "name": "a"}),
            json!({"age": 19, "name": "b"}),
        ];

        let query = Query::new().order_by("age");
        let result = evaluate(entries(items.clone()), &query);
        let ages: Vec<i64> = result.iter().map(|(_, v)| v["age"].as_i64().unwrap()).collect();
        assert_eq!(ages, vec![7, 19, 42]);

        let query = Query::new().order_by_desc("age");
        let result = evaluate(entries(items), &query);
        let ages: Vec<i64> = result.iter().map(|(_, v)| v["age"].as_i64().unwrap()).collect();
        assert_eq!(ages, vec![42, 19, 7]);
    }

    #[test]
    fn test_sort_is_stable_on_ties() {
        let items = vec![
            json!({"group": 1, "name": "first"}),
            json!({"group": 1, "name": "second"}),
            json!({"group": 0, "name": "third"}),
        ];
        let query = Query::new().order_by("group");
        let result = evaluate(entries(items), &query);
        let names: Vec<&str> = result.iter().map(|(_, v)| v["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["third", "first", "second"]);
    }

    #[test]
    fn test_evaluate_does_not_slice() {
        let items: Vec<Value> = (0..50).map(|i| json!({"n": i})).collect();
        let query = Query::new().skip(10).take(5);
        let result = evaluate(entries(items), &query);
        assert_eq!(result.len(), 50);
    }
}
