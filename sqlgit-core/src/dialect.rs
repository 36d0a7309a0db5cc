//! SQL dialects
//!
//! A [`Dialect`] is plain data describing how one engine family spells the
//! schema and the queries the stores need. The stores hold the algorithms;
//! the dialect only produces [`Statement`]s.

use crate::driver::{Engine, SqlValue};
use crate::object::ObjectKind;

pub const OBJECT_HASH_COLUMN: &str = "hash";
pub const OBJECT_TYPE_COLUMN: &str = "type";
pub const OBJECT_SIZE_COLUMN: &str = "size";
pub const OBJECT_CONTENT_COLUMN: &str = "content";
pub const REF_NAME_COLUMN: &str = "name";
pub const REF_SYMBOLIC_COLUMN: &str = "symbolic";
pub const REF_TARGET_COLUMN: &str = "target";

pub const DEFAULT_OBJECTS_TABLE: &str = "git.objects";
pub const DEFAULT_REFS_TABLE: &str = "git.refs";

/// Escape character used in every LIKE pattern
const LIKE_ESCAPE: char = '!';

/// SQL text plus its positional parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl Statement {
    fn new(sql: String, params: Vec<SqlValue>) -> Self {
        Self { sql, params }
    }
}

/// Per-engine SQL generation
#[derive(Debug, Clone, PartialEq)]
pub struct Dialect {
    engine: Engine,
    /// Name of the objects table, quoted as a single identifier
    pub objects_table: String,
    /// Name of the refs table, quoted as a single identifier
    pub refs_table: String,
    /// Queue inserts and run them together on flush
    pub batch_insert: bool,
    /// Whether the connection stays in auto-commit mode
    pub auto_commit: bool,
}

impl Dialect {
    pub fn sqlite() -> Self {
        Self::with_engine(Engine::Sqlite, false, true)
    }

    pub fn mysql() -> Self {
        Self::with_engine(Engine::MySql, true, true)
    }

    pub fn mysql_like() -> Self {
        Self::with_engine(Engine::MySqlLike, true, true)
    }

    /// PostgreSQL runs with auto-commit disabled
    pub fn postgres() -> Self {
        Self::with_engine(Engine::Postgres, true, false)
    }

    pub fn for_engine(engine: Engine) -> Self {
        match engine {
            Engine::Sqlite => Self::sqlite(),
            Engine::MySql => Self::mysql(),
            Engine::MySqlLike => Self::mysql_like(),
            Engine::Postgres => Self::postgres(),
        }
    }

    fn with_engine(engine: Engine, batch_insert: bool, auto_commit: bool) -> Self {
        Self {
            engine,
            objects_table: DEFAULT_OBJECTS_TABLE.to_string(),
            refs_table: DEFAULT_REFS_TABLE.to_string(),
            batch_insert,
            auto_commit,
        }
    }

    /// Override the table names
    pub fn with_tables(mut self, objects: impl Into<String>, refs: impl Into<String>) -> Self {
        self.objects_table = objects.into();
        self.refs_table = refs.into();
        self
    }

    pub fn engine(&self) -> Engine {
        self.engine
    }

    pub fn quote(&self, name: &str) -> String {
        match self.engine {
            Engine::Postgres => format!("\"{}\"", name.replace('"', "\"\"")),
            _ => format!("`{}`", name.replace('`', "``")),
        }
    }

    fn columns(&self, names: &[&str]) -> String {
        names.iter().map(|n| self.quote(n)).collect::<Vec<_>>().join(",")
    }

    /// Placeholder for the `index`-th parameter (1-based)
    fn placeholder(&self, index: usize) -> String {
        match self.engine {
            Engine::Postgres => format!("${}", index),
            _ => "?".to_string(),
        }
    }

    fn placeholders(&self, count: usize) -> String {
        (1..=count)
            .map(|i| self.placeholder(i))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn hash_type(&self) -> &'static str {
        match self.engine {
            Engine::Postgres => "TEXT",
            _ => "VARCHAR(512)",
        }
    }

    fn ref_type(&self) -> &'static str {
        self.hash_type()
    }

    fn blob_type(&self) -> &'static str {
        match self.engine {
            Engine::Postgres => "BYTEA",
            _ => "LONGBLOB",
        }
    }

    // Byte-wise comparison of hashes and names on MySQL proper
    fn key_charset(&self) -> &'static str {
        match self.engine {
            Engine::MySql => " CHARACTER SET ascii COLLATE ascii_bin",
            _ => "",
        }
    }

    /// Escape `%`, `_` and the escape character itself for a LIKE pattern
    pub fn escape_like(value: &str) -> String {
        let mut out = String::with_capacity(value.len());
        for c in value.chars() {
            if c == '%' || c == '_' || c == LIKE_ESCAPE {
                out.push(LIKE_ESCAPE);
            }
            out.push(c);
        }
        out
    }

    fn like_clause(&self, column: &str, index: usize) -> String {
        format!(
            "{} LIKE {} ESCAPE '{}'",
            self.quote(column),
            self.placeholder(index),
            LIKE_ESCAPE
        )
    }

    pub fn create_objects_table(&self) -> Statement {
        Statement::new(
            format!(
                "CREATE TABLE {} ({} {}{} NOT NULL PRIMARY KEY,{} SMALLINT NOT NULL,{} {} NOT NULL)",
                self.quote(&self.objects_table),
                self.quote(OBJECT_HASH_COLUMN),
                self.hash_type(),
                self.key_charset(),
                self.quote(OBJECT_TYPE_COLUMN),
                self.quote(OBJECT_CONTENT_COLUMN),
                self.blob_type(),
            ),
            Vec::new(),
        )
    }

    pub fn create_refs_table(&self) -> Statement {
        Statement::new(
            format!(
                "CREATE TABLE {} ({} {}{} NOT NULL PRIMARY KEY,{} BOOLEAN NOT NULL,{} {} NOT NULL)",
                self.quote(&self.refs_table),
                self.quote(REF_NAME_COLUMN),
                self.hash_type(),
                self.key_charset(),
                self.quote(REF_SYMBOLIC_COLUMN),
                self.quote(REF_TARGET_COLUMN),
                self.ref_type(),
            ),
            Vec::new(),
        )
    }

    pub fn drop_objects_table(&self) -> Statement {
        Statement::new(format!("DROP TABLE {}", self.quote(&self.objects_table)), Vec::new())
    }

    pub fn drop_refs_table(&self) -> Statement {
        Statement::new(format!("DROP TABLE {}", self.quote(&self.refs_table)), Vec::new())
    }

    /// Query listing table names; rows are matched case-insensitively on column 0
    pub fn list_tables(&self, table: &str) -> Statement {
        match self.engine {
            Engine::Sqlite => Statement::new(
                "SELECT name FROM sqlite_master WHERE type = 'table'".to_string(),
                Vec::new(),
            ),
            Engine::MySql | Engine::MySqlLike => Statement::new("SHOW TABLES".to_string(), Vec::new()),
            Engine::Postgres => Statement::new(
                format!(
                    "SELECT tablename FROM pg_catalog.pg_tables WHERE tablename = {}",
                    self.placeholder(1)
                ),
                vec![table.into()],
            ),
        }
    }

    /// Insert SQL without bound values, for batched execution
    pub fn insert_object_sql(&self) -> String {
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.quote(&self.objects_table),
            self.columns(&[OBJECT_HASH_COLUMN, OBJECT_TYPE_COLUMN, OBJECT_CONTENT_COLUMN]),
            self.placeholders(3)
        )
    }

    /// Parameter row matching [`Dialect::insert_object_sql`]
    pub fn insert_object_params(&self, hash: &str, kind: ObjectKind, content: Vec<u8>) -> Vec<SqlValue> {
        vec![hash.into(), kind.type_code().into(), content.into()]
    }

    pub fn insert_object(&self, hash: &str, kind: ObjectKind, content: Vec<u8>) -> Statement {
        Statement::new(self.insert_object_sql(), self.insert_object_params(hash, kind, content))
    }

    /// Select `type, size` for one hash
    pub fn read_object_meta(&self, hash: &str) -> Statement {
        Statement::new(
            format!(
                "SELECT {}, LENGTH({}) AS {} FROM {} WHERE {} = {}",
                self.quote(OBJECT_TYPE_COLUMN),
                self.quote(OBJECT_CONTENT_COLUMN),
                self.quote(OBJECT_SIZE_COLUMN),
                self.quote(&self.objects_table),
                self.quote(OBJECT_HASH_COLUMN),
                self.placeholder(1)
            ),
            vec![hash.into()],
        )
    }

    /// Select `type, size, content` for one hash
    pub fn read_object(&self, hash: &str) -> Statement {
        Statement::new(
            format!(
                "SELECT {}, LENGTH({}) AS {}, {} FROM {} WHERE {} = {}",
                self.quote(OBJECT_TYPE_COLUMN),
                self.quote(OBJECT_CONTENT_COLUMN),
                self.quote(OBJECT_SIZE_COLUMN),
                self.quote(OBJECT_CONTENT_COLUMN),
                self.quote(&self.objects_table),
                self.quote(OBJECT_HASH_COLUMN),
                self.placeholder(1)
            ),
            vec![hash.into()],
        )
    }

    /// Select hashes starting with `prefix`
    pub fn find_abbreviated(&self, prefix: &str) -> Statement {
        Statement::new(
            format!(
                "SELECT {} FROM {} WHERE {}",
                self.quote(OBJECT_HASH_COLUMN),
                self.quote(&self.objects_table),
                self.like_clause(OBJECT_HASH_COLUMN, 1)
            ),
            vec![format!("{}%", Self::escape_like(prefix)).into()],
        )
    }

    pub fn object_count(&self) -> Statement {
        Statement::new(
            format!("SELECT COUNT(*) AS count FROM {}", self.quote(&self.objects_table)),
            Vec::new(),
        )
    }

    /// Select `target, symbolic, name` for one ref
    pub fn read_ref(&self, name: &str) -> Statement {
        Statement::new(
            format!(
                "SELECT {} FROM {} WHERE {} = {}",
                self.columns(&[REF_TARGET_COLUMN, REF_SYMBOLIC_COLUMN, REF_NAME_COLUMN]),
                self.quote(&self.refs_table),
                self.quote(REF_NAME_COLUMN),
                self.placeholder(1)
            ),
            vec![name.into()],
        )
    }

    /// Select `name, target, symbolic` for refs starting with `prefix`
    pub fn read_refs(&self, prefix: &str) -> Statement {
        Statement::new(
            format!(
                "SELECT {} FROM {} WHERE {}",
                self.columns(&[REF_NAME_COLUMN, REF_TARGET_COLUMN, REF_SYMBOLIC_COLUMN]),
                self.quote(&self.refs_table),
                self.like_clause(REF_NAME_COLUMN, 1)
            ),
            vec![format!("{}%", Self::escape_like(prefix)).into()],
        )
    }

    /// Select `name, target, symbolic` for every ref
    pub fn list_refs(&self) -> Statement {
        Statement::new(
            format!(
                "SELECT {} FROM {}",
                self.columns(&[REF_NAME_COLUMN, REF_TARGET_COLUMN, REF_SYMBOLIC_COLUMN]),
                self.quote(&self.refs_table)
            ),
            Vec::new(),
        )
    }

    pub fn insert_ref(&self, name: &str, symbolic: bool, target: &str) -> Statement {
        Statement::new(
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                self.quote(&self.refs_table),
                self.columns(&[REF_NAME_COLUMN, REF_TARGET_COLUMN, REF_SYMBOLIC_COLUMN]),
                self.placeholders(3)
            ),
            vec![name.into(), target.into(), symbolic.into()],
        )
    }

    pub fn update_ref(&self, name: &str, symbolic: bool, target: &str) -> Statement {
        Statement::new(
            format!(
                "UPDATE {} SET {} = {}, {} = {} WHERE {} = {}",
                self.quote(&self.refs_table),
                self.quote(REF_TARGET_COLUMN),
                self.placeholder(1),
                self.quote(REF_SYMBOLIC_COLUMN),
                self.placeholder(2),
                self.quote(REF_NAME_COLUMN),
                self.placeholder(3)
            ),
            vec![target.into(), symbolic.into(), name.into()],
        )
    }

    pub fn delete_ref(&self, name: &str) -> Statement {
        Statement::new(
            format!(
                "DELETE FROM {} WHERE {} = {}",
                self.quote(&self.refs_table),
                self.quote(REF_NAME_COLUMN),
                self.placeholder(1)
            ),
            vec![name.into()],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quoting_per_engine() {
        assert_eq!(Dialect::sqlite().quote("git.objects"), "`git.objects`");
        assert_eq!(Dialect::mysql().quote("hash"), "`hash`");
        assert_eq!(Dialect::postgres().quote("git.refs"), "\"git.refs\"");
    }

    #[test]
    fn test_engine_defaults() {
        assert!(!Dialect::sqlite().batch_insert);
        assert!(Dialect::mysql().batch_insert);
        assert!(Dialect::mysql_like().auto_commit);
        assert!(!Dialect::postgres().auto_commit);
        assert_eq!(Dialect::for_engine(Engine::Postgres), Dialect::postgres());
    }

    #[test]
    fn test_create_objects_table_types() {
        let mysql = Dialect::mysql().create_objects_table().sql;
        assert!(mysql.contains("VARCHAR(512) CHARACTER SET ascii COLLATE ascii_bin NOT NULL PRIMARY KEY"));
        assert!(mysql.contains("LONGBLOB"));

        let like = Dialect::mysql_like().create_objects_table().sql;
        assert!(!like.contains("CHARACTER SET"));

        let pg = Dialect::postgres().create_objects_table().sql;
        assert!(pg.starts_with("CREATE TABLE \"git.objects\""));
        assert!(pg.contains("\"hash\" TEXT NOT NULL PRIMARY KEY"));
        assert!(pg.contains("BYTEA"));
    }

    #[test]
    fn test_postgres_placeholders() {
        let stmt = Dialect::postgres().update_ref("refs/heads/main", false, "abc");
        assert_eq!(
            stmt.sql,
            "UPDATE \"git.refs\" SET \"target\" = $1, \"symbolic\" = $2 WHERE \"name\" = $3"
        );
    }

    #[test]
    fn test_update_ref_binds_target_then_name() {
        let stmt = Dialect::sqlite().update_ref("refs/heads/main", true, "refs/heads/dev");
        assert_eq!(
            stmt.params,
            vec![
                SqlValue::Text("refs/heads/dev".into()),
                SqlValue::Bool(true),
                SqlValue::Text("refs/heads/main".into()),
            ]
        );
    }

    #[test]
    fn test_like_patterns_are_escaped() {
        assert_eq!(Dialect::escape_like("refs/a_b%!"), "refs/a!_b!%!!");
        let stmt = Dialect::sqlite().read_refs("refs/heads/");
        assert!(stmt.sql.ends_with("LIKE ? ESCAPE '!'"));
        assert_eq!(stmt.params, vec![SqlValue::Text("refs/heads/%".into())]);
    }

    #[test]
    fn test_list_tables_per_engine() {
        assert!(Dialect::sqlite().list_tables("x").sql.contains("sqlite_master"));
        assert_eq!(Dialect::mysql().list_tables("x").sql, "SHOW TABLES");
        let pg = Dialect::postgres().list_tables("git.objects");
        assert!(pg.sql.contains("pg_catalog.pg_tables"));
        assert_eq!(pg.params, vec![SqlValue::Text("git.objects".into())]);
    }

    #[test]
    fn test_custom_table_names() {
        let dialect = Dialect::sqlite().with_tables("objs", "refs");
        assert_eq!(dialect.object_count().sql, "SELECT COUNT(*) AS count FROM `objs`");
    }
}
