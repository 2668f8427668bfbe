//! RETURN clause column extraction for Apache AGE.
//!
//! AGE's `cypher()` function needs an explicit SQL column list matching the
//! final RETURN clause. The grammar in `cypher.pest` only structures the
//! projection; other clauses are read as balanced token streams.

use pest::iterators::{Pair, Pairs};
use pest::Parser;
use pest_derive::Parser;
use thiserror::Error;

#[derive(Parser)]
#[grammar = "graph/cypher.pest"]
struct CypherParser;

/// Why columns could not be extracted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ColumnError {
    #[error("query has no RETURN clause")]
    NoReturnClause,
    #[error("RETURN * is not supported, list the columns explicitly")]
    ReturnStarNotSupported,
    #[error("invalid RETURN clause: {0}")]
    InvalidSyntax(String),
}

/// Extracts column names from the last RETURN clause of a Cypher query.
///
/// Aliased items (`expr AS alias`) yield the alias, other items their
/// expression text.
///
/// ```
/// use signalgraph::graph::extract_return_columns;
///
/// let cols = extract_return_columns("MATCH (n) RETURN n.doc AS doc, count(n) ORDER BY doc").unwrap();
/// assert_eq!(cols, vec!["doc", "count(n)"]);
/// ```
pub fn extract_return_columns(cypher: &str) -> Result<Vec<String>, ColumnError> {
    let pairs = CypherParser::parse(Rule::Cypher, cypher)
        .map_err(|e| ColumnError::InvalidSyntax(e.to_string()))?;

    let mut columns = Vec::new();
    collect_last_return(pairs, &mut columns)?;

    if columns.is_empty() {
        return Err(ColumnError::NoReturnClause);
    }
    Ok(columns)
}

fn collect_last_return(pairs: Pairs<Rule>, columns: &mut Vec<String>) -> Result<(), ColumnError> {
    for pair in pairs {
        match pair.as_rule() {
            Rule::Return => {
                columns.clear();
                for inner in pair.into_inner() {
                    if inner.as_rule() == Rule::ProjectionItems {
                        projection_columns(inner, columns)?;
                    }
                }
            }
            Rule::Cypher => collect_last_return(pair.into_inner(), columns)?,
            _ => {}
        }
    }
    Ok(())
}

fn projection_columns(items: Pair<Rule>, columns: &mut Vec<String>) -> Result<(), ColumnError> {
    if items.as_str().trim_start().starts_with('*') {
        return Err(ColumnError::ReturnStarNotSupported);
    }
    for item in items.into_inner() {
        if item.as_rule() == Rule::ProjectionItem {
            columns.push(column_name(item));
        }
    }
    Ok(())
}

/// The alias of `expr AS alias`, else the expression text.
fn column_name(item: Pair<Rule>) -> String {
    let mut expression = item.as_str().trim().to_string();
    let mut alias = None;

    for inner in item.into_inner() {
        match inner.as_rule() {
            Rule::Expression => expression = inner.as_str().trim().to_string(),
            Rule::Variable => alias = Some(inner.as_str().trim().trim_matches('`').to_string()),
            _ => {}
        }
    }
    alias.unwrap_or(expression)
}
