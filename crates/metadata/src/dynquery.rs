//! Compilation of parsed entity queries into SQL.
//!
//! Each clause becomes an aliased LEFT JOIN against `items` plus a WHERE
//! condition on the joined row; negation wraps the condition in `NOT (...)`
//! so that absence reads as `row_guid IS NULL`. Entity-id and non-inverted
//! shard restrictions fold directly into the base WHERE. Parameters are
//! positional and collected in SQL text order (joins precede the WHERE
//! clause).

use crate::error::{MetadataError, MetadataResult};
use facetfs_core::content::{Checksums, trim_bytes};
use facetfs_core::query::{ClauseKind, EntityQuery};

/// A typed positional SQL parameter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SqlParam {
    Text(String),
    Int(i64),
    Blob(Vec<u8>),
}

const BASIC_JOIN: &str = "{tbl}.namespace = ? AND base.entity_id = {tbl}.entity_id \
                          AND {tbl}.active=1 AND {tbl}.tombstone=0";

struct QueryBuilder {
    namespace: String,
    joins: String,
    join_params: Vec<SqlParam>,
    where_clauses: Vec<String>,
    where_params: Vec<SqlParam>,
    next_table: usize,
}

impl QueryBuilder {
    fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            joins: String::new(),
            join_params: Vec::new(),
            where_clauses: vec![
                "base.active=1".to_string(),
                "base.tombstone=0".to_string(),
                "base.namespace = ?".to_string(),
            ],
            where_params: vec![SqlParam::Text(namespace.to_string())],
            next_table: 1,
        }
    }

    /// Add an aliased LEFT JOIN with extra join conditions and a WHERE
    /// condition on the joined row. Both strings use `{tbl}` for the alias.
    fn add_condition(&mut self, extra_join: &str, extra_params: Vec<SqlParam>, cond: &str, invert: bool) {
        let tbl = format!("j{}", self.next_table);
        self.next_table += 1;

        let join_expr = format!("{BASIC_JOIN} AND {extra_join}").replace("{tbl}", &tbl);
        self.joins
            .push_str(&format!("LEFT JOIN items AS {tbl} ON {join_expr}\n"));
        self.join_params
            .push(SqlParam::Text(self.namespace.clone()));
        self.join_params.extend(extra_params);

        let mut cond = cond.replace("{tbl}", &tbl);
        if invert {
            cond = format!("NOT ({cond})");
        }
        self.where_clauses.push(cond);
    }

    fn add_base_where(&mut self, cond: &str, params: Vec<SqlParam>) {
        self.where_clauses.push(cond.to_string());
        self.where_params.extend(params);
    }

    fn finish(self) -> (String, Vec<SqlParam>) {
        let sql = format!(
            "SELECT DISTINCT base.entity_id AS entity_id\nFROM items AS base\n{}WHERE\n({})\nORDER BY base.entity_id",
            self.joins,
            self.where_clauses.join(") AND (")
        );
        let mut params = self.join_params;
        params.extend(self.where_params);
        (sql, params)
    }
}

/// Compile a parsed query against a namespace into SQL and its parameters.
pub fn compile(namespace: &str, query: &EntityQuery) -> MetadataResult<(String, Vec<SqlParam>)> {
    let mut builder = QueryBuilder::new(namespace);

    for clause in &query.clauses {
        match &clause.kind {
            ClauseKind::FileExists(filename) => {
                builder.add_condition(
                    "{tbl}.filename = ?",
                    vec![SqlParam::Text(filename.clone())],
                    "{tbl}.row_guid IS NOT NULL",
                    clause.invert,
                );
            }

            ClauseKind::EntityIdEquals(entity_id) => {
                if clause.invert {
                    builder.add_condition(
                        "{tbl}.entity_id = ?",
                        vec![SqlParam::Text(entity_id.clone())],
                        "{tbl}.row_guid IS NULL",
                        false,
                    );
                } else {
                    builder.add_base_where(
                        "base.entity_id = ?",
                        vec![SqlParam::Text(entity_id.clone())],
                    );
                }
            }

            ClauseKind::EntityInShard(shards) => {
                if shards.is_empty() || shards.len() > 2 {
                    return Err(MetadataError::InvalidArgument(format!(
                        "invalid number of shards: {} ({shards:?})",
                        shards.len()
                    )));
                }
                if clause.invert {
                    let mut cond = "{tbl}.entity_id_shard1 = ?".to_string();
                    let mut params = vec![SqlParam::Text(shards[0].clone())];
                    if let Some(shard2) = shards.get(1) {
                        cond.push_str(" AND {tbl}.entity_id_shard2 = ?");
                        params.push(SqlParam::Text(shard2.clone()));
                    }
                    builder.add_condition(&cond, params, "{tbl}.row_guid IS NULL", false);
                } else {
                    builder.add_base_where(
                        "base.entity_id_shard1 = ?",
                        vec![SqlParam::Text(shards[0].clone())],
                    );
                    if let Some(shard2) = shards.get(1) {
                        builder.add_base_where(
                            "base.entity_id_shard2 = ?",
                            vec![SqlParam::Text(shard2.clone())],
                        );
                    }
                }
            }

            ClauseKind::FileContents { filename, contents } => {
                // Match against the trimmed value, so queries are
                // whitespace-insensitive in the same way storage is.
                let trimmed = trim_bytes(contents.as_bytes()).to_vec();
                let checksums = Checksums::compute(&trimmed);
                builder.add_condition(
                    "{tbl}.filename = ? AND {tbl}.trimmed_length = ? \
                     AND {tbl}.trimmed_sha256 = ? AND COALESCE({tbl}.trimmed_data, x'') = ?",
                    vec![
                        SqlParam::Text(filename.clone()),
                        SqlParam::Int(checksums.trimmed_length),
                        SqlParam::Blob(checksums.trimmed_sha256),
                        SqlParam::Blob(trimmed),
                    ],
                    "{tbl}.row_guid IS NOT NULL",
                    clause.invert,
                );
            }

            ClauseKind::RandomSelection(_) => {
                return Err(MetadataError::Unimplemented(
                    "random selection queries are not executable".into(),
                ));
            }
        }
    }

    Ok(builder.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params_of(kinds: &[SqlParam]) -> Vec<&SqlParam> {
        kinds.iter().collect()
    }

    #[test]
    fn empty_query_selects_all_active_entities() {
        let (sql, params) = compile("ns", &EntityQuery::default()).unwrap();
        assert!(sql.starts_with("SELECT DISTINCT base.entity_id"));
        assert!(sql.contains("base.namespace = ?"));
        assert!(!sql.contains("LEFT JOIN"));
        assert_eq!(params, vec![SqlParam::Text("ns".into())]);
    }

    #[test]
    fn file_exists_becomes_a_join() {
        let query = EntityQuery::parse("religion").unwrap();
        let (sql, params) = compile("", &query).unwrap();
        assert!(sql.contains("LEFT JOIN items AS j1"));
        assert!(sql.contains("j1.filename = ?"));
        assert!(sql.contains("(j1.row_guid IS NOT NULL)"));
        // Join params (ns, filename) precede the base WHERE namespace.
        assert_eq!(
            params_of(&params),
            vec![
                &SqlParam::Text("".into()),
                &SqlParam::Text("religion".into()),
                &SqlParam::Text("".into()),
            ]
        );
    }

    #[test]
    fn negation_wraps_condition_in_not() {
        let query = EntityQuery::parse("-religion").unwrap();
        let (sql, _) = compile("", &query).unwrap();
        assert!(sql.contains("NOT (j1.row_guid IS NOT NULL)"));
    }

    #[test]
    fn entity_id_folds_into_base_where() {
        let query = EntityQuery::default().with_entity_id("homer");
        let (sql, params) = compile("", &query).unwrap();
        assert!(!sql.contains("LEFT JOIN"));
        assert!(sql.contains("base.entity_id = ?"));
        assert_eq!(*params.last().unwrap(), SqlParam::Text("homer".into()));
    }

    #[test]
    fn inverted_entity_id_uses_null_join() {
        let query = EntityQuery {
            clauses: vec![facetfs_core::query::Clause {
                invert: true,
                kind: ClauseKind::EntityIdEquals("homer".into()),
            }],
        };
        let (sql, _) = compile("", &query).unwrap();
        assert!(sql.contains("j1.entity_id = ?"));
        assert!(sql.contains("(j1.row_guid IS NULL)"));
    }

    #[test]
    fn shard_prefix_folds_into_base_where() {
        let query = EntityQuery::default().with_shards(&["ab".into(), "cd".into()]);
        let (sql, params) = compile("", &query).unwrap();
        assert!(sql.contains("base.entity_id_shard1 = ?"));
        assert!(sql.contains("base.entity_id_shard2 = ?"));
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn file_contents_binds_trimmed_value() {
        let query = EntityQuery::parse("sex=%20male%20").unwrap();
        let (sql, params) = compile("", &query).unwrap();
        assert!(sql.contains("COALESCE(j1.trimmed_data, x'') = ?"));
        assert!(params.contains(&SqlParam::Blob(b"male".to_vec())));
        assert!(params.contains(&SqlParam::Int(4)));
    }

    #[test]
    fn each_clause_gets_its_own_alias() {
        let query = EntityQuery::parse("fictional,firstname=Scratchy").unwrap();
        let (sql, _) = compile("", &query).unwrap();
        assert!(sql.contains("LEFT JOIN items AS j1"));
        assert!(sql.contains("LEFT JOIN items AS j2"));
    }

    #[test]
    fn random_selection_is_rejected() {
        let query = EntityQuery::parse("random[3]").unwrap();
        let err = compile("", &query).unwrap_err();
        assert!(matches!(err, MetadataError::Unimplemented(_)));
    }

    #[test]
    fn too_many_shards_rejected() {
        let query = EntityQuery {
            clauses: vec![facetfs_core::query::Clause {
                invert: false,
                kind: ClauseKind::EntityInShard(vec!["a".into(), "b".into(), "c".into()]),
            }],
        };
        assert!(matches!(
            compile("", &query).unwrap_err(),
            MetadataError::InvalidArgument(_)
        ));
    }
}
