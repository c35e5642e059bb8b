//! Output-column lineage
//!
//! Derives the ordered list of columns a compiled SELECT produces. Wildcards
//! are resolved through CTE chains to the physical table they read from;
//! anything that cannot be pinned to one relation becomes the
//! `* from nested query` sentinel.
//!
//! Resolution is a tree walk over query scopes. Each WITH clause is resolved
//! in order and memoized per CTE name; a CTE only sees the CTEs declared
//! before it and those of enclosing queries.

use crate::parser::SqlParser;
use sqlparser::ast::{
    Expr, ExcludeSelectItem, ObjectName, Query, Select, SelectItem, SetExpr, TableAlias,
    TableFactor, TableWithJoins, WildcardAdditionalOptions,
};
use std::collections::{HashMap, HashSet};

/// Marker for a wildcard whose source could not be pinned to one relation
pub const NESTED_QUERY_MARKER: &str = "* from nested query";

/// One entry of a query's projection
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OutputColumn {
    /// An explicitly named column or alias
    Named(String),

    /// Every column of a physical table
    Star(String),

    /// A wildcard that could not be resolved
    NestedStar,
}

impl OutputColumn {
    /// Whether the column is explicitly named
    pub fn is_named(&self) -> bool {
        matches!(self, Self::Named(_))
    }
}

impl std::fmt::Display for OutputColumn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Named(name) => write!(f, "{}", name),
            Self::Star(table) => write!(f, "* from {}", table),
            Self::NestedStar => write!(f, "{}", NESTED_QUERY_MARKER),
        }
    }
}

/// Final output columns of `compiled_sql`, rendered as strings
///
/// Named columns are returned as-is, wildcards as `* from <table>` or
/// [`NESTED_QUERY_MARKER`]. Empty or unparsable SQL yields an empty list.
pub fn extract_output_columns(compiled_sql: &str, dialect: Option<&str>) -> Vec<String> {
    resolve_sql(compiled_sql, dialect)
        .iter()
        .map(ToString::to_string)
        .collect()
}

/// Final output columns of `compiled_sql`
pub fn resolve_sql(compiled_sql: &str, dialect: Option<&str>) -> Vec<OutputColumn> {
    if compiled_sql.trim().is_empty() {
        return Vec::new();
    }

    let parsed = match SqlParser::for_dialect(dialect).parse(compiled_sql) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::warn!("Could not extract output columns: {}", e);
            return Vec::new();
        }
    };

    match parsed.first_query() {
        Some(query) => resolve_query(query),
        None => {
            tracing::debug!("No SELECT statement found in compiled code");
            Vec::new()
        }
    }
}

/// Output columns of a parsed query
pub fn resolve_query(query: &Query) -> Vec<OutputColumn> {
    resolve_in_scope(query, None)
}

/// CTEs visible at one nesting level
struct Scope<'p> {
    parent: Option<&'p Scope<'p>>,
    ctes: HashMap<String, Vec<OutputColumn>>,
}

impl<'p> Scope<'p> {
    fn child(parent: Option<&'p Scope<'p>>) -> Self {
        Self {
            parent,
            ctes: HashMap::new(),
        }
    }

    fn lookup(&self, name: &str) -> Option<&[OutputColumn]> {
        match self.ctes.get(&name.to_lowercase()) {
            Some(columns) => Some(columns),
            None => self.parent.and_then(|parent| parent.lookup(name)),
        }
    }
}

fn resolve_in_scope(query: &Query, parent: Option<&Scope<'_>>) -> Vec<OutputColumn> {
    let mut scope = Scope::child(parent);

    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            let resolved = resolve_in_scope(&cte.query, Some(&scope));
            let columns = rename_columns(resolved, Some(&cte.alias));
            scope.ctes.insert(cte.alias.name.value.to_lowercase(), columns);
        }
    }

    resolve_set_expr(&query.body, &scope)
}

/// Apply a `name (a, b, ...)` column list positionally
///
/// Renaming stops at the first wildcard since the positions after it are unknown.
fn rename_columns(columns: Vec<OutputColumn>, alias: Option<&TableAlias>) -> Vec<OutputColumn> {
    let Some(alias) = alias.filter(|alias| !alias.columns.is_empty()) else {
        return columns;
    };

    let mut names = alias.columns.iter().map(|column| column.name.value.clone());
    let mut renaming = true;
    columns
        .into_iter()
        .map(|column| match column {
            OutputColumn::Named(original) if renaming => {
                OutputColumn::Named(names.next().unwrap_or(original))
            }
            other => {
                renaming = false;
                other
            }
        })
        .collect()
}

fn resolve_set_expr(body: &SetExpr, scope: &Scope<'_>) -> Vec<OutputColumn> {
    match body {
        SetExpr::Select(select) => resolve_select(select, scope),
        SetExpr::Query(query) => resolve_in_scope(query, Some(scope)),
        // UNION and friends take their column names from the left branch
        SetExpr::SetOperation { left, .. } => resolve_set_expr(left, scope),
        _ => Vec::new(),
    }
}

/// A relation referenced in a FROM clause
#[derive(Debug)]
enum Source {
    Table(String),
    Cte(Vec<OutputColumn>),
    Derived(Vec<OutputColumn>),
    Opaque,
}

#[derive(Debug)]
struct Relation {
    name: Option<String>,
    alias: Option<String>,
    source: Source,
}

impl Relation {
    fn answers_to(&self, qualifier: &str) -> bool {
        let matches = |candidate: &Option<String>| {
            candidate
                .as_deref()
                .is_some_and(|c| c.eq_ignore_ascii_case(qualifier))
        };
        matches(&self.alias) || matches(&self.name)
    }

    fn is_fully_named(&self) -> bool {
        match &self.source {
            Source::Cte(columns) | Source::Derived(columns) => {
                columns.iter().all(OutputColumn::is_named)
            }
            Source::Table(_) | Source::Opaque => false,
        }
    }

    fn expand(&self, excluded: &HashSet<String>) -> Vec<OutputColumn> {
        let keep = |column: &&OutputColumn| match column {
            OutputColumn::Named(name) => !excluded.contains(&name.to_lowercase()),
            _ => true,
        };

        match &self.source {
            Source::Table(name) => vec![OutputColumn::Star(name.clone())],
            Source::Cte(columns) => columns.iter().filter(keep).cloned().collect(),
            Source::Derived(columns) if columns.iter().all(OutputColumn::is_named) => {
                columns.iter().filter(keep).cloned().collect()
            }
            Source::Derived(_) | Source::Opaque => vec![OutputColumn::NestedStar],
        }
    }
}

fn resolve_select(select: &Select, scope: &Scope<'_>) -> Vec<OutputColumn> {
    let mut relations = Vec::new();
    for table in &select.from {
        collect_relations(table, scope, &mut relations);
    }

    let mut columns = Vec::new();
    for (position, item) in select.projection.iter().enumerate() {
        match item {
            SelectItem::ExprWithAlias { alias, .. } => {
                columns.push(OutputColumn::Named(alias.value.clone()));
            }
            SelectItem::UnnamedExpr(expr) => {
                let name = column_name(expr).unwrap_or_else(|| format!("_col_{}", position));
                columns.push(OutputColumn::Named(name));
            }
            SelectItem::QualifiedWildcard(qualifier, options) => {
                columns.extend(expand_qualified(qualifier, options, &relations));
            }
            SelectItem::Wildcard(options) => {
                columns.extend(expand_all(options, &relations));
            }
        }
    }
    columns
}

fn collect_relations(table: &TableWithJoins, scope: &Scope<'_>, out: &mut Vec<Relation>) {
    collect_factor(&table.relation, scope, out);
    for join in &table.joins {
        collect_factor(&join.relation, scope, out);
    }
}

fn collect_factor(factor: &TableFactor, scope: &Scope<'_>, out: &mut Vec<Relation>) {
    match factor {
        TableFactor::Table { name, alias, .. } => {
            let table = name.0.last().map(|ident| ident.value.clone());
            let cte = match (name.0.len(), &table) {
                (1, Some(table)) => scope.lookup(table),
                _ => None,
            };
            let source = match (cte, &table) {
                (Some(columns), _) => Source::Cte(columns.to_vec()),
                (None, Some(table)) => Source::Table(table.clone()),
                (None, None) => Source::Opaque,
            };
            out.push(Relation {
                name: table,
                alias: alias.as_ref().map(|a| a.name.value.clone()),
                source,
            });
        }
        TableFactor::Derived { subquery, alias, .. } => {
            out.push(Relation {
                name: None,
                alias: alias.as_ref().map(|a| a.name.value.clone()),
                source: Source::Derived(rename_columns(
                    resolve_in_scope(subquery, Some(scope)),
                    alias.as_ref(),
                )),
            });
        }
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => collect_relations(table_with_joins, scope, out),
        _ => out.push(Relation {
            name: None,
            alias: None,
            source: Source::Opaque,
        }),
    }
}

fn expand_qualified(
    qualifier: &ObjectName,
    options: &WildcardAdditionalOptions,
    relations: &[Relation],
) -> Vec<OutputColumn> {
    let Some(qualifier) = qualifier.0.last() else {
        return vec![OutputColumn::NestedStar];
    };

    match relations.iter().find(|r| r.answers_to(&qualifier.value)) {
        Some(relation) => relation.expand(&excluded_columns(options)),
        None => vec![OutputColumn::NestedStar],
    }
}

fn expand_all(options: &WildcardAdditionalOptions, relations: &[Relation]) -> Vec<OutputColumn> {
    let excluded = excluded_columns(options);
    match relations {
        [] => vec![OutputColumn::NestedStar],
        [single] => single.expand(&excluded),
        many if many.iter().all(Relation::is_fully_named) => {
            many.iter().flat_map(|r| r.expand(&excluded)).collect()
        }
        _ => vec![OutputColumn::NestedStar],
    }
}

fn excluded_columns(options: &WildcardAdditionalOptions) -> HashSet<String> {
    let mut excluded = HashSet::new();

    if let Some(except) = &options.opt_except {
        excluded.insert(except.first_element.value.to_lowercase());
        for ident in &except.additional_elements {
            excluded.insert(ident.value.to_lowercase());
        }
    }

    match &options.opt_exclude {
        Some(ExcludeSelectItem::Single(ident)) => {
            excluded.insert(ident.value.to_lowercase());
        }
        Some(ExcludeSelectItem::Multiple(idents)) => {
            excluded.extend(idents.iter().map(|ident| ident.value.to_lowercase()));
        }
        None => {}
    }

    excluded
}

fn column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.clone()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|ident| ident.value.clone()),
        Expr::Nested(inner) => column_name(inner),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn columns(sql: &str) -> Vec<String> {
        extract_output_columns(sql, Some("bigquery"))
    }

    #[test]
    fn cte_column_list_renames_its_projection() {
        assert_eq!(
            extract_output_columns("with a (id, value) as (select 1, 2) select * from a", None),
            vec!["id", "value"]
        );
        assert_eq!(
            extract_output_columns("with a (key) as (select id, value from t) select * from a", None),
            vec!["key", "value"]
        );
    }

    #[test]
    fn derived_table_column_list_renames_its_projection() {
        assert_eq!(
            extract_output_columns("select * from (select 1, 2) as d (id, value)", None),
            vec!["id", "value"]
        );
        assert_eq!(
            extract_output_columns("select d.* from (select 1, 2) as d (id, value)", None),
            vec!["id", "value"]
        );
    }

    #[test]
    fn column_list_over_a_wildcard_keeps_the_marker() {
        assert_eq!(
            extract_output_columns("with a (id) as (select * from t) select * from a", None),
            vec!["* from t"]
        );
    }

    #[test]
    fn explicit_columns_pass_through() {
        assert_eq!(columns("select id, name from t"), vec!["id", "name"]);
    }

    #[test]
    fn aliases_and_qualified_columns() {
        assert_eq!(
            columns("select c.id as customer_id, c.name from dim_customers c"),
            vec!["customer_id", "name"]
        );
    }

    #[test]
    fn unnamed_expressions_are_positional() {
        assert_eq!(columns("select id, count(*) from t group by id"), vec!["id", "_col_1"]);
    }

    #[test]
    fn star_from_table() {
        assert_eq!(columns("select * from dim_customers"), vec!["* from dim_customers"]);
    }

    #[test]
    fn star_from_schema_qualified_table() {
        assert_eq!(
            columns("select * from analytics.dim_customers"),
            vec!["* from dim_customers"]
        );
    }

    #[test]
    fn star_chain_through_ctes() {
        assert_eq!(
            columns("with a as (select * from t), b as (select * from a) select * from b"),
            vec!["* from t"]
        );
    }

    #[test]
    fn star_over_star_subquery_is_nested() {
        assert_eq!(
            columns("select * from (select * from t)"),
            vec![NESTED_QUERY_MARKER]
        );
    }

    #[test]
    fn star_over_named_subquery_expands() {
        assert_eq!(columns("select * from (select id from dim_customers)"), vec!["id"]);
        assert_eq!(columns("select id from (select * from dim_customers)"), vec!["id"]);
    }

    #[test]
    fn cte_shadowing_its_own_table_reads_the_table() {
        let sql = "
            with dim_customers as (select * from dim_customers),
            customers as (select id, name from dim_customers)
            select customers.*, o.price
            from customers left join orders o on customers.id = o.customer_id";
        assert_eq!(columns(sql), vec!["id", "name", "price"]);
    }

    #[test]
    fn qualified_star_except() {
        let sql = "
            with customers as (select id, name from dim_customers),
            orders as (select customer_id, product_name, price from orders)
            select
              customers.* except(id),
              orders.product_name,
              case when orders.price > 100 then true else false end as is_expensive
            from customers
            left join orders on customers.id = orders.customer_id";
        assert_eq!(columns(sql), vec!["name", "product_name", "is_expensive"]);
    }

    #[test]
    fn qualified_star_from_starred_cte_names_the_table() {
        let sql = "
            with customers as (select * from dim_customers)
            select customers.*, orders.price
            from customers left join orders on customers.id = orders.customer_id";
        assert_eq!(columns(sql), vec!["* from dim_customers", "price"]);
    }

    #[test]
    fn nested_with_resolves_through_inner_scope() {
        let sql = "
            with stuff as (
              with orders as (select * from orders),
              customers as (select * from dim_customers)
              select customers.*, orders.product_name, orders.price
              from customers left join orders on customers.id = orders.customer_id
            )
            select * from stuff";
        assert_eq!(
            columns(sql),
            vec!["* from dim_customers", "product_name", "price"]
        );
    }

    #[test]
    fn bare_star_over_join_of_named_ctes_expands() {
        let sql = "
            with a as (select id from x), b as (select name from y)
            select * from a join b on true";
        assert_eq!(columns(sql), vec!["id", "name"]);
    }

    #[test]
    fn bare_star_over_join_of_tables_is_nested() {
        assert_eq!(
            columns("select * from a join b on a.id = b.id"),
            vec![NESTED_QUERY_MARKER]
        );
    }

    #[test]
    fn unknown_qualifier_is_nested() {
        assert_eq!(columns("select z.* from a"), vec![NESTED_QUERY_MARKER]);
    }

    #[test]
    fn union_uses_left_branch() {
        assert_eq!(
            columns("select id, name from a union all select id, label from b"),
            vec!["id", "name"]
        );
    }

    #[test]
    fn duplicates_are_preserved() {
        assert_eq!(columns("select id, a.id from a"), vec!["id", "id"]);
    }

    #[test]
    fn empty_and_invalid_sql_yield_nothing() {
        assert!(columns("").is_empty());
        assert!(columns("   \n").is_empty());
        assert!(columns("select from where (").is_empty());
        assert!(columns("create table x (id int)").is_empty());
    }
}
