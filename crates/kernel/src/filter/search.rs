//! Free-text search over configured columns.

use serde_json::Value;

use crate::query::{Condition, Query};

/// Condition matching records where every whitespace-separated term
/// appears in at least one of `columns`.
///
/// `None` when there is nothing to search for or nowhere to search.
pub fn search_condition(term: &str, columns: &[String]) -> Option<Condition> {
    if columns.is_empty() {
        return None;
    }

    let terms: Vec<Condition> = term
        .split_whitespace()
        .map(|term| {
            Condition::Any(
                columns
                    .iter()
                    .map(|column| Condition::contains(column.clone(), term))
                    .collect(),
            )
        })
        .collect();

    if terms.is_empty() {
        return None;
    }
    Some(Condition::All(terms))
}

/// The `search` operation: strings and numbers are searched, anything else
/// is ignored.
pub fn apply_search(query: &mut dyn Query, value: &Value, columns: &[String]) {
    let term = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return,
    };
    if let Some(condition) = search_condition(&term, columns) {
        query.filter(condition);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns() -> Vec<String> {
        vec!["name".to_string(), "email".to_string()]
    }

    #[test]
    fn terms_are_anded_columns_ored() {
        let condition = search_condition("alice  bob", &columns());
        let expected = Condition::All(vec![
            Condition::Any(vec![
                Condition::contains("name", "alice"),
                Condition::contains("email", "alice"),
            ]),
            Condition::Any(vec![
                Condition::contains("name", "bob"),
                Condition::contains("email", "bob"),
            ]),
        ]);
        assert_eq!(condition, Some(expected));
    }

    #[test]
    fn empty_term_is_noop() {
        assert_eq!(search_condition("", &columns()), None);
        assert_eq!(search_condition("   ", &columns()), None);
    }

    #[test]
    fn no_columns_is_noop() {
        assert_eq!(search_condition("alice", &[]), None);
    }
}
