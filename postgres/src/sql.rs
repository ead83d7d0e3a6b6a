//! Statement templates.
//!
//! Every function here is pure: it renders statement text from its parameters, quoting
//! identifiers with [`quote_identifier`] and values with [`quote_literal`].

use pg_escape::{quote_identifier, quote_literal};

pub fn create_schema(schema: &str) -> String {
    format!("CREATE SCHEMA IF NOT EXISTS {}", quote_identifier(schema))
}

pub fn drop_schema(schema: &str) -> String {
    format!("DROP SCHEMA IF EXISTS {} CASCADE", quote_identifier(schema))
}

/// The replicated table always has a serial primary key and a text payload.
pub fn create_table(schema: &str, table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {}.{} (id SERIAL PRIMARY KEY, data TEXT)",
        quote_identifier(schema),
        quote_identifier(table)
    )
}

pub fn drop_table(schema: &str, table: &str) -> String {
    format!(
        "DROP TABLE IF EXISTS {}.{}",
        quote_identifier(schema),
        quote_identifier(table)
    )
}

/// Adds a column. `data_type` and `default` are SQL fragments and are not quoted.
pub fn add_column(
    schema: &str,
    table: &str,
    column: &str,
    data_type: &str,
    default: Option<&str>,
) -> String {
    let mut statement = format!(
        "ALTER TABLE {}.{} ADD COLUMN {} {data_type}",
        quote_identifier(schema),
        quote_identifier(table),
        quote_identifier(column)
    );
    if let Some(default) = default {
        statement.push_str(&format!(" DEFAULT {default}"));
    }

    statement
}

pub fn drop_column(schema: &str, table: &str, column: &str) -> String {
    format!(
        "ALTER TABLE {}.{} DROP COLUMN IF EXISTS {}",
        quote_identifier(schema),
        quote_identifier(table),
        quote_identifier(column)
    )
}

pub fn rename_column(schema: &str, table: &str, column: &str, new_name: &str) -> String {
    format!(
        "ALTER TABLE {}.{} RENAME COLUMN {} TO {}",
        quote_identifier(schema),
        quote_identifier(table),
        quote_identifier(column),
        quote_identifier(new_name)
    )
}

pub fn alter_column_type(schema: &str, table: &str, column: &str, data_type: &str) -> String {
    format!(
        "ALTER TABLE {}.{} ALTER COLUMN {} TYPE {data_type}",
        quote_identifier(schema),
        quote_identifier(table),
        quote_identifier(column)
    )
}

/// Inserts one text payload into the replicated table.
pub fn insert_data(schema: &str, table: &str, data: &str) -> String {
    format!(
        "INSERT INTO {}.{} (data) VALUES ({})",
        quote_identifier(schema),
        quote_identifier(table),
        quote_literal(data)
    )
}

pub fn select_all(schema: &str, table: &str) -> String {
    format!(
        "SELECT * FROM {}.{}",
        quote_identifier(schema),
        quote_identifier(table)
    )
}

/// Publication covering every table of `schema`.
///
/// With `ddl` the publication also carries schema changes, which only a server built from the
/// DDL-replication source tree understands.
pub fn create_schema_publication(publication: &str, schema: &str, ddl: bool) -> String {
    let mut statement = format!(
        "CREATE PUBLICATION {} FOR TABLES IN SCHEMA {}",
        quote_identifier(publication),
        quote_identifier(schema)
    );
    if ddl {
        statement.push_str(" WITH (ddl = 'table')");
    }

    statement
}

/// Publication without any table; members are added explicitly later.
pub fn create_empty_publication(publication: &str) -> String {
    format!("CREATE PUBLICATION {}", quote_identifier(publication))
}

pub fn drop_publication(publication: &str) -> String {
    format!("DROP PUBLICATION IF EXISTS {}", quote_identifier(publication))
}

pub fn publication_add_table(publication: &str, schema: &str, table: &str) -> String {
    format!(
        "ALTER PUBLICATION {} ADD TABLE {}.{}",
        quote_identifier(publication),
        quote_identifier(schema),
        quote_identifier(table)
    )
}

pub fn publication_drop_table(publication: &str, schema: &str, table: &str) -> String {
    format!(
        "ALTER PUBLICATION {} DROP TABLE {}.{}",
        quote_identifier(publication),
        quote_identifier(schema),
        quote_identifier(table)
    )
}

/// Must run outside a transaction block.
pub fn create_subscription(subscription: &str, conninfo: &str, publication: &str) -> String {
    format!(
        "CREATE SUBSCRIPTION {} CONNECTION {} PUBLICATION {}",
        quote_identifier(subscription),
        quote_literal(conninfo),
        quote_identifier(publication)
    )
}

/// Must run outside a transaction block.
pub fn drop_subscription(subscription: &str) -> String {
    format!("DROP SUBSCRIPTION IF EXISTS {}", quote_identifier(subscription))
}

pub fn refresh_subscription(subscription: &str) -> String {
    format!(
        "ALTER SUBSCRIPTION {} REFRESH PUBLICATION",
        quote_identifier(subscription)
    )
}

pub fn create_extension(extension: &str) -> String {
    format!("CREATE EXTENSION IF NOT EXISTS {}", quote_identifier(extension))
}

pub fn drop_extension(extension: &str) -> String {
    format!("DROP EXTENSION IF EXISTS {} CASCADE", quote_identifier(extension))
}

/// Returns one row with column `exists` set to `t` or `f`.
pub fn table_exists(schema: &str, table: &str) -> String {
    format!(
        "SELECT EXISTS (SELECT 1 FROM information_schema.tables WHERE table_schema = {} AND table_name = {}) AS exists",
        quote_literal(schema),
        quote_literal(table)
    )
}

/// Returns `column_name`, `data_type` and `column_default` in column order.
pub fn table_columns(schema: &str, table: &str) -> String {
    format!(
        "SELECT column_name, data_type, column_default FROM information_schema.columns WHERE table_schema = {} AND table_name = {} ORDER BY ordinal_position",
        quote_literal(schema),
        quote_literal(table)
    )
}

pub fn list_subscriptions() -> String {
    "SELECT subname FROM pg_subscription ORDER BY subname".to_string()
}

pub fn list_publications() -> String {
    "SELECT pubname FROM pg_publication ORDER BY pubname".to_string()
}

/// Returns one row with column `exists` set to `t` or `f`.
pub fn publication_exists(publication: &str) -> String {
    format!(
        "SELECT EXISTS (SELECT 1 FROM pg_publication WHERE pubname = {}) AS exists",
        quote_literal(publication)
    )
}

/// Returns one row with column `exists` set to `t` or `f`.
pub fn subscription_exists(subscription: &str) -> String {
    format!(
        "SELECT EXISTS (SELECT 1 FROM pg_subscription WHERE subname = {}) AS exists",
        quote_literal(subscription)
    )
}

/// Reports whether the apply worker of a subscription runs and whether its tables are synced.
///
/// Returns `worker_running` and `pending_tables`; no row is returned for an unknown subscription.
pub fn subscription_status(subscription: &str) -> String {
    format!(
        "SELECT \
            EXISTS (SELECT 1 FROM pg_stat_subscription st WHERE st.subid = s.oid AND st.pid IS NOT NULL) AS worker_running, \
            (SELECT count(*) FROM pg_subscription_rel r WHERE r.srsubid = s.oid AND r.srsubstate NOT IN ('r', 's')) AS pending_tables \
         FROM pg_subscription s WHERE s.subname = {}",
        quote_literal(subscription)
    )
}

/// Statement which succeeds as soon as a node accepts connections.
pub fn ping() -> String {
    "SELECT 1".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_publication_optionally_carries_ddl() {
        assert_eq!(
            create_schema_publication("pub_master", "app", false),
            "CREATE PUBLICATION pub_master FOR TABLES IN SCHEMA app"
        );
        assert_eq!(
            create_schema_publication("pub_master", "app", true),
            "CREATE PUBLICATION pub_master FOR TABLES IN SCHEMA app WITH (ddl = 'table')"
        );
    }

    #[test]
    fn subscription_quotes_conninfo_as_literal() {
        assert_eq!(
            create_subscription("sub_replica1", "host=localhost port=5432", "pub_master"),
            "CREATE SUBSCRIPTION sub_replica1 CONNECTION 'host=localhost port=5432' PUBLICATION pub_master"
        );
        assert!(create_subscription("sub_replica1", "password=it's", "pub_master").contains("'password=it''s'"));
    }

    #[test]
    fn identifiers_needing_quotes_are_quoted() {
        assert_eq!(
            create_schema("Mixed Case"),
            "CREATE SCHEMA IF NOT EXISTS \"Mixed Case\""
        );
    }

    #[test]
    fn add_column_with_and_without_default() {
        assert_eq!(
            add_column("app", "items", "price", "INTEGER", None),
            "ALTER TABLE app.items ADD COLUMN price INTEGER"
        );
        assert_eq!(
            add_column("app", "items", "price", "INTEGER", Some("0")),
            "ALTER TABLE app.items ADD COLUMN price INTEGER DEFAULT 0"
        );
    }

    #[test]
    fn cleanup_statements_tolerate_missing_objects() {
        assert_eq!(drop_subscription("sub_replica1"), "DROP SUBSCRIPTION IF EXISTS sub_replica1");
        assert_eq!(drop_publication("pub_master"), "DROP PUBLICATION IF EXISTS pub_master");
        assert_eq!(drop_schema("app"), "DROP SCHEMA IF EXISTS app CASCADE");
    }

    #[test]
    fn status_query_filters_by_subscription_name() {
        assert!(subscription_status("sub_replica1").ends_with("WHERE s.subname = 'sub_replica1'"));
    }
}
