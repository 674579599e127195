//! Saved-query template expansion.
//!
//! Saved SQL may contain `@name` placeholders. Two of them are date bounds
//! (`@start date`, `@end date`), replaced with `YYYYMMDD` literals. Any
//! other placeholder names a sibling saved query: that query is executed
//! and the `IN (...)` clause holding the placeholder is rewritten with the
//! first column of its result rows. Value lists above the batch size turn
//! the statement into a `UNION ALL` of per-batch copies, sidestepping
//! engine limits on literal-list length.
//!
//! The expansion itself is [`expand`], a pure function over a
//! [`ResolveContext`]; [`TemplateResolver`] only gathers the context by
//! running referenced queries through the execution engine. Referenced
//! queries are executed as-is: their own placeholders are never expanded,
//! so recursion depth is one by construction and cycles cannot form.

use crate::db::ExecutionEngine;
use crate::error::{DeskError, DeskResult};
use crate::models::{DateRange, ExecutionResult, Folder, SavedQuery};
use regex::Regex;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use tracing::debug;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

/// Date placeholders recognized in saved SQL.
pub const START_DATE_PLACEHOLDER: &str = "@start date";
pub const END_DATE_PLACEHOLDER: &str = "@end date";

/// Sentinel bounds used when the caller supplies no date range.
const OPEN_RANGE_START: &str = "19000101";
const OPEN_RANGE_END: &str = "99991231";

/// Maximum literals per `IN (...)` list before the statement is split into
/// `UNION ALL` batches.
pub const IN_LIST_BATCH_SIZE: usize = 1000;

/// Placeholder tokens: `@` followed by unicode letters, digits and spaces.
/// Greedy over spaces so multi-word query names match; the closing paren of
/// an `IN (...)` clause bounds the token.
static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@[0-9\p{L}][0-9\p{L}\s]*").expect("placeholder pattern"));

/// Fold a name for matching: strip diacritics, lowercase, trim.
///
/// Matches the way saved-query names are compared to placeholder tokens, so
/// `@Danh Sách` finds a query named "danh sach".
pub fn fold_name(name: &str) -> String {
    name.nfd()
        .filter(|c| !is_combining_mark(*c))
        .map(|c| match c {
            'đ' => 'd',
            'Đ' => 'D',
            other => other,
        })
        .flat_map(char::to_lowercase)
        .collect::<String>()
        .trim()
        .to_string()
}

/// Replace both date placeholders with `YYYYMMDD` literals, or with the
/// open sentinel range when no dates were supplied.
pub fn substitute_dates(sql: &str, range: Option<&DateRange>) -> String {
    let (start, end) = match range {
        Some(range) => range.as_compact(),
        None => (OPEN_RANGE_START.to_string(), OPEN_RANGE_END.to_string()),
    };
    sql.replace(START_DATE_PLACEHOLDER, &start)
        .replace(END_DATE_PLACEHOLDER, &end)
}

/// Distinct placeholder names in the given SQL, in first-appearance order.
/// Call after date substitution so the date placeholders are gone.
pub fn referenced_names(sql: &str) -> Vec<String> {
    let mut seen = Vec::new();
    let mut names = Vec::new();
    for m in PLACEHOLDER.find_iter(sql) {
        let name = m.as_str()[1..].trim().to_string();
        let folded = fold_name(&name);
        if folded.is_empty() || seen.contains(&folded) {
            continue;
        }
        seen.push(folded);
        names.push(name);
    }
    names
}

/// Format the first column of every result row as SQL literals.
///
/// Strings are wrapped `N'…'` with interior quotes stripped so a value can
/// never terminate the literal early; numbers pass through verbatim.
pub fn format_in_values(result: &ExecutionResult) -> Vec<String> {
    let Some(first_column) = result.columns.first() else {
        return Vec::new();
    };
    result
        .rows
        .iter()
        .filter_map(|row| row.get(first_column))
        .map(|value| match value {
            JsonValue::String(s) => format!("N'{}'", s.replace('\'', "")),
            JsonValue::Number(n) => n.to_string(),
            JsonValue::Bool(b) => b.to_string(),
            JsonValue::Null => "NULL".to_string(),
            other => format!("N'{}'", other.to_string().replace('\'', "")),
        })
        .collect()
}

/// Rewrite the `IN (...)` clause holding `@name` with the given literals.
///
/// Lists longer than `batch_size` split the statement into a `UNION ALL`
/// of one copy per batch. An empty list produces `IN ()`, which the target
/// engine treats as matching nothing.
pub fn splice_in_list(
    sql: &str,
    name: &str,
    values: &[String],
    batch_size: usize,
) -> DeskResult<String> {
    let pattern = Regex::new(&format!(
        r#"(?i)IN\s*\(\s*['"]?@{}['"]?\s*\)"#,
        regex::escape(name)
    ))
    .map_err(|e| DeskError::unknown(format!("bad placeholder pattern: {}", e)))?;

    if !pattern.is_match(sql) {
        return Ok(sql.to_string());
    }

    // NoExpand: substituted values are data, `$` in them must stay literal.
    if values.len() <= batch_size {
        let list = format!("IN ({})", values.join(","));
        return Ok(pattern
            .replace_all(sql, regex::NoExpand(&list))
            .into_owned());
    }

    let copies: Vec<String> = values
        .chunks(batch_size)
        .map(|batch| {
            let list = format!("IN ({})", batch.join(","));
            pattern.replace_all(sql, regex::NoExpand(&list)).into_owned()
        })
        .collect();
    Ok(copies.join("\nUNION ALL\n"))
}

/// Everything a template expansion needs besides the SQL itself.
#[derive(Debug, Default)]
pub struct ResolveContext {
    pub date_range: Option<DateRange>,
    /// Folded placeholder name -> formatted literal values.
    pub referenced_values: HashMap<String, Vec<String>>,
}

/// Expand a saved query's SQL against a prepared context.
///
/// Placeholders with no entry in the context are left untouched; they name
/// nothing resolvable and the target engine will report them.
pub fn expand(raw_sql: &str, ctx: &ResolveContext) -> DeskResult<String> {
    let mut sql = substitute_dates(raw_sql, ctx.date_range.as_ref());
    for name in referenced_names(&sql) {
        if let Some(values) = ctx.referenced_values.get(&fold_name(&name)) {
            sql = splice_in_list(&sql, &name, values, IN_LIST_BATCH_SIZE)?;
        }
    }
    Ok(sql)
}

/// Resolves saved-query templates by running referenced sibling queries
/// through the execution engine.
pub struct TemplateResolver {
    engine: Arc<ExecutionEngine>,
}

impl TemplateResolver {
    pub fn new(engine: Arc<ExecutionEngine>) -> Self {
        Self { engine }
    }

    /// Fully expand one saved query for execution.
    ///
    /// Referenced sibling queries run sequentially; if any of them fails,
    /// resolution aborts with that error and nothing partial is returned.
    pub async fn resolve(
        &self,
        folder: &Folder,
        query: &SavedQuery,
        date_range: Option<DateRange>,
    ) -> DeskResult<String> {
        let dated = substitute_dates(&query.sql, date_range.as_ref());
        let mut referenced_values = HashMap::new();

        for name in referenced_names(&dated) {
            let folded = fold_name(&name);
            let Some(sibling) = folder
                .queries
                .iter()
                .find(|q| q.id != query.id && fold_name(&q.name) == folded)
            else {
                continue;
            };

            debug!(
                query = %query.name,
                referenced = %sibling.name,
                "Resolving referenced query"
            );
            // Depth one: the sibling's raw SQL runs unexpanded.
            let result = self
                .engine
                .execute(&folder.connection_id, &sibling.sql, &[], None)
                .await?;
            referenced_values.insert(folded, format_in_values(&result));
        }

        expand(
            &query.sql,
            &ResolveContext {
                date_range,
                referenced_values,
            },
        )
    }
}
