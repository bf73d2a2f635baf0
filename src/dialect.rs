//! SQL dialect strategy.
//!
//! One enum variant per supported product/version family. Each variant
//! answers four questions: how to fetch the next sequence value, how to
//! sort a specific row first, how to paginate a select, and how generated
//! keys come back after an insert. MySQL, MariaDB, PostgreSQL and SQLite
//! are executed natively; the Oracle and SQL Server rows exist for SQL-text
//! generation through the same strategy surface.

use crate::value::Value;

/// How generated primary keys are retrieved after an INSERT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratedKeyMode {
    /// Read back positionally (`last_insert_id` / `last_insert_rowid`).
    ByOrdinal,
    /// Read back from a returned row, matching columns by name.
    ByColumnName,
    /// The backend offers no generated-key channel.
    Unsupported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    /// MariaDB before 10.3 (no sequences).
    MariaDbOld,
    /// MariaDB 10.3 and newer.
    MariaDbNew,
    /// MySQL before 8 (no sequences).
    MysqlOld,
    /// MySQL 8 and newer.
    MysqlNew,
    /// Oracle before 12c.
    OracleOld,
    /// Oracle 12c and newer.
    OracleNew,
    Postgres,
    /// SQL Server before 2012.
    SqlServerOld,
    /// SQL Server 2012 and newer.
    SqlServerNew,
    Sqlite,
    /// Product not recognized.
    Unknown,
    /// Detection failed entirely; conservative defaults.
    Failsafe,
}

impl SqlDialect {
    /// Classify a backend from its product name and version numbers, the
    /// same way the version metadata would describe it.
    pub fn from_product(product: &str, version: &str, major: u32, minor: u32) -> Self {
        let product = product.to_lowercase();
        let version = version.to_lowercase();
        if product.contains("oracle") {
            if major >= 12 {
                SqlDialect::OracleNew
            } else {
                SqlDialect::OracleOld
            }
        } else if product.contains("sqlserver") || product.contains("sql server") {
            if major >= 11 {
                SqlDialect::SqlServerNew
            } else {
                SqlDialect::SqlServerOld
            }
        } else if product.contains("postgresql") || product.contains("postgres") {
            SqlDialect::Postgres
        } else if product.contains("sqlite") {
            SqlDialect::Sqlite
        } else if product.contains("mysql") || product.contains("mariadb") {
            if version.contains("mariadb") || product.contains("mariadb") {
                if major > 10 || (major == 10 && minor >= 3) {
                    SqlDialect::MariaDbNew
                } else {
                    SqlDialect::MariaDbOld
                }
            } else if major >= 8 {
                SqlDialect::MysqlNew
            } else {
                SqlDialect::MysqlOld
            }
        } else {
            SqlDialect::Unknown
        }
    }

    /// The statement fetching the next value of a named sequence, or None
    /// when the dialect has no sequence support.
    pub fn sequence_sql(&self, sequence: &str) -> Option<String> {
        match self {
            SqlDialect::OracleOld | SqlDialect::OracleNew => {
                Some(format!("SELECT {sequence}.NEXTVAL FROM dual"))
            }
            SqlDialect::MariaDbNew
            | SqlDialect::MysqlNew
            | SqlDialect::SqlServerOld
            | SqlDialect::SqlServerNew => Some(format!("SELECT NEXT VALUE FOR {sequence}")),
            SqlDialect::Postgres => Some(format!("SELECT nextval('{sequence}')")),
            SqlDialect::MariaDbOld
            | SqlDialect::MysqlOld
            | SqlDialect::Sqlite
            | SqlDialect::Unknown
            | SqlDialect::Failsafe => None,
        }
    }

    /// An ORDER BY fragment that sorts the row whose `column` equals
    /// `value` before everything else. None when the value is null.
    pub fn order_current_first(&self, column: &str, value: &Value) -> Option<String> {
        if value.is_null() {
            return None;
        }
        let rendered = value.render();
        match self {
            SqlDialect::MariaDbOld
            | SqlDialect::MariaDbNew
            | SqlDialect::MysqlOld
            | SqlDialect::MysqlNew
            | SqlDialect::Postgres
            | SqlDialect::Sqlite => Some(format!("({column} = {rendered}) DESC")),
            _ => Some(format!(
                "CASE WHEN {column} = {rendered} THEN 0 ELSE 1 END"
            )),
        }
    }

    /// A paginated SELECT returning rows `[low, high)` of the ordered
    /// result. Three families: LIMIT/OFFSET, OFFSET..FETCH NEXT, and a
    /// ROW_NUMBER() window subquery for the oldest backends.
    pub fn paginated_select(
        &self,
        distinct: bool,
        table: &str,
        constraints: &str,
        sorting: &str,
        low: u64,
        high: u64,
    ) -> String {
        let distinct = if distinct { "DISTINCT " } else { "" };
        match self {
            SqlDialect::OracleNew | SqlDialect::SqlServerNew => format!(
                "SELECT {distinct}* FROM {table}{constraints} ORDER BY {sorting} \
                 OFFSET {low} ROWS FETCH NEXT {} ROWS ONLY",
                high - low
            ),
            SqlDialect::OracleOld | SqlDialect::SqlServerOld => format!(
                "SELECT * FROM (SELECT {distinct}{table}.*, \
                 ROW_NUMBER() OVER (ORDER BY {sorting}) rn FROM {table}{constraints}) b \
                 WHERE b.rn > {low} AND b.rn <= {high} ORDER BY rn"
            ),
            _ => format!(
                "SELECT {distinct}* FROM {table}{constraints} ORDER BY {sorting} \
                 LIMIT {} OFFSET {low}",
                high - low
            ),
        }
    }

    pub fn generated_key_mode(&self) -> GeneratedKeyMode {
        match self {
            SqlDialect::MariaDbOld
            | SqlDialect::MariaDbNew
            | SqlDialect::MysqlOld
            | SqlDialect::MysqlNew
            | SqlDialect::Sqlite => GeneratedKeyMode::ByOrdinal,
            SqlDialect::Postgres | SqlDialect::SqlServerOld | SqlDialect::SqlServerNew => {
                GeneratedKeyMode::ByColumnName
            }
            SqlDialect::OracleOld
            | SqlDialect::OracleNew
            | SqlDialect::Unknown
            | SqlDialect::Failsafe => GeneratedKeyMode::Unsupported,
        }
    }
}

/// Pull `(major, minor)` out of a server version string such as
/// `8.0.33` or `10.6.12-MariaDB-1`.
pub(crate) fn parse_version(version: &str) -> (u32, u32) {
    let mut parts = version
        .split(|c: char| !c.is_ascii_digit())
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<u32>().unwrap_or(0));
    (parts.next().unwrap_or(0), parts.next().unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_product_classification() {
        assert_eq!(
            SqlDialect::from_product("PostgreSQL", "16.2", 16, 2),
            SqlDialect::Postgres
        );
        assert_eq!(
            SqlDialect::from_product("SQLite", "3.45.0", 3, 45),
            SqlDialect::Sqlite
        );
        assert_eq!(
            SqlDialect::from_product("MySQL", "8.0.33", 8, 0),
            SqlDialect::MysqlNew
        );
        assert_eq!(
            SqlDialect::from_product("MySQL", "5.7.44", 5, 7),
            SqlDialect::MysqlOld
        );
        assert_eq!(
            SqlDialect::from_product("MySQL", "10.6.12-MariaDB", 10, 6),
            SqlDialect::MariaDbNew
        );
        assert_eq!(
            SqlDialect::from_product("MySQL", "10.2.1-MariaDB", 10, 2),
            SqlDialect::MariaDbOld
        );
        assert_eq!(
            SqlDialect::from_product("Oracle", "19.0", 19, 0),
            SqlDialect::OracleNew
        );
        assert_eq!(
            SqlDialect::from_product("Microsoft SQL Server", "10.5", 10, 5),
            SqlDialect::SqlServerOld
        );
        assert_eq!(
            SqlDialect::from_product("FooDB", "1.0", 1, 0),
            SqlDialect::Unknown
        );
    }

    #[test]
    fn test_sequence_templates() {
        assert_eq!(
            SqlDialect::Postgres.sequence_sql("users_seq").as_deref(),
            Some("SELECT nextval('users_seq')")
        );
        assert_eq!(
            SqlDialect::OracleNew.sequence_sql("users_seq").as_deref(),
            Some("SELECT users_seq.NEXTVAL FROM dual")
        );
        assert_eq!(
            SqlDialect::MysqlNew.sequence_sql("users_seq").as_deref(),
            Some("SELECT NEXT VALUE FOR users_seq")
        );
        assert_eq!(SqlDialect::Sqlite.sequence_sql("users_seq"), None);
        assert_eq!(SqlDialect::MysqlOld.sequence_sql("users_seq"), None);
    }

    #[test]
    fn test_order_current_first() {
        assert_eq!(
            SqlDialect::Sqlite
                .order_current_first("id", &Value::Int(42))
                .as_deref(),
            Some("(id = 42) DESC")
        );
        assert_eq!(
            SqlDialect::OracleNew
                .order_current_first("id", &Value::Int(42))
                .as_deref(),
            Some("CASE WHEN id = 42 THEN 0 ELSE 1 END")
        );
        assert_eq!(
            SqlDialect::Sqlite.order_current_first("id", &Value::Null),
            None
        );
    }

    #[test]
    fn test_limit_offset_pagination() {
        let sql = SqlDialect::Sqlite.paginated_select(false, "person", "", "id", 10, 20);
        assert!(sql.contains("LIMIT 10 OFFSET 10"), "{sql}");
        assert!(!sql.contains("ROW_NUMBER"), "{sql}");
    }

    #[test]
    fn test_rows_fetch_pagination() {
        let sql =
            SqlDialect::SqlServerNew.paginated_select(false, "person", "", "id", 10, 20);
        assert!(sql.contains("OFFSET 10 ROWS FETCH NEXT 10 ROWS ONLY"), "{sql}");
    }

    #[test]
    fn test_row_number_pagination() {
        let sql = SqlDialect::OracleOld.paginated_select(
            true,
            "person",
            " WHERE age > 18",
            "id",
            0,
            25,
        );
        assert!(sql.contains("ROW_NUMBER() OVER (ORDER BY id)"), "{sql}");
        assert!(sql.contains("b.rn > 0 AND b.rn <= 25"), "{sql}");
        assert!(sql.contains("DISTINCT person.*"), "{sql}");
    }

    #[test]
    fn test_generated_key_modes() {
        assert_eq!(
            SqlDialect::Sqlite.generated_key_mode(),
            GeneratedKeyMode::ByOrdinal
        );
        assert_eq!(
            SqlDialect::Postgres.generated_key_mode(),
            GeneratedKeyMode::ByColumnName
        );
        assert_eq!(
            SqlDialect::OracleNew.generated_key_mode(),
            GeneratedKeyMode::Unsupported
        );
    }

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("8.0.33"), (8, 0));
        assert_eq!(parse_version("10.6.12-MariaDB-1"), (10, 6));
        assert_eq!(parse_version("3.45.0"), (3, 45));
        assert_eq!(parse_version("garbage"), (0, 0));
    }
}
