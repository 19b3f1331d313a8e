//! DDL emission for a schema graph.

use entgraph_core::Dialect;

use crate::field::Field;
use crate::graph::{EntityType, Graph, JoinTable};

/// `CREATE TABLE` statements for every entity and join table, entity
/// tables first.
pub fn create_statements(graph: &Graph, dialect: Dialect) -> Vec<String> {
    tracing::debug!(dialect = %dialect, types = graph.types().len(), "Generating DDL");
    let mut stmts: Vec<String> = graph
        .types()
        .iter()
        .map(|ty| create_table(ty, dialect))
        .collect();
    stmts.extend(
        graph
            .join_tables()
            .iter()
            .map(|jt| create_join_table(jt, dialect)),
    );
    stmts
}

fn column_def(field: &Field, dialect: Dialect, primary: bool) -> String {
    let q = dialect.quote(&field.column);
    if primary && field.auto_increment {
        return match dialect {
            Dialect::Postgres => format!("{q} bigserial PRIMARY KEY"),
            Dialect::Sqlite => format!("{q} integer PRIMARY KEY AUTOINCREMENT"),
            Dialect::Mysql => format!("{q} bigint AUTO_INCREMENT PRIMARY KEY"),
        };
    }
    let mut def = format!("{q} {}", field.kind.sql_type(dialect));
    if primary {
        def.push_str(" PRIMARY KEY");
        return def;
    }
    if !field.optional && !field.nillable {
        def.push_str(" NOT NULL");
    }
    if field.unique {
        def.push_str(" UNIQUE");
    }
    if let Some(expr) = field.db_defaults.get(&dialect) {
        def.push_str(" DEFAULT ");
        def.push_str(expr);
    }
    def
}

/// `CREATE TABLE` for one entity type.
pub fn create_table(ty: &EntityType, dialect: Dialect) -> String {
    let mut cols: Vec<String> = Vec::new();
    if let Some(id) = &ty.id {
        cols.push(column_def(id, dialect, true));
    }
    cols.extend(ty.fields.iter().map(|f| column_def(f, dialect, false)));
    let mut constraints = Vec::new();
    for fk in &ty.foreign_keys {
        if fk.is_hidden() {
            let mut def = format!("{} {}", dialect.quote(&fk.column), fk.kind.sql_type(dialect));
            if fk.unique {
                def.push_str(" UNIQUE");
            }
            cols.push(def);
        }
        constraints.push(format!(
            "FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE SET NULL",
            dialect.quote(&fk.column),
            dialect.quote(&fk.references_table),
            dialect.quote(&fk.references_column)
        ));
    }
    if let Some(parts) = &ty.composite_id {
        let cols: Vec<String> = parts
            .iter()
            .filter_map(|p| ty.get_field(p))
            .map(|f| dialect.quote(&f.column))
            .collect();
        constraints.push(format!("PRIMARY KEY ({})", cols.join(", ")));
    }
    cols.extend(constraints);
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        dialect.quote(&ty.table),
        cols.join(", ")
    )
}

/// `CREATE TABLE` for one join table.
pub fn create_join_table(jt: &JoinTable, dialect: Dialect) -> String {
    let mut defs: Vec<String> = jt
        .columns
        .iter()
        .map(|(col, _, _, kind)| format!("{} {} NOT NULL", dialect.quote(col), kind.sql_type(dialect)))
        .collect();
    let keys: Vec<String> = jt.columns.iter().map(|(c, ..)| dialect.quote(c)).collect();
    defs.push(format!("PRIMARY KEY ({})", keys.join(", ")));
    for (col, table, ref_col, _) in &jt.columns {
        defs.push(format!(
            "FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE CASCADE",
            dialect.quote(col),
            dialect.quote(table),
            dialect.quote(ref_col)
        ));
    }
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        dialect.quote(&jt.table),
        defs.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::Edge;
    use crate::graph::SchemaBuilder;

    fn graph() -> Graph {
        SchemaBuilder::new()
            .entity(
                EntityType::new("User")
                    .field(Field::string("name").unique())
                    .field(Field::string("bio").optional())
                    .edge(Edge::to("posts", "Post"))
                    .edge(Edge::to("groups", "Group")),
            )
            .entity(EntityType::new("Post").field(Field::string("title")))
            .entity(EntityType::new("Group").edge(Edge::from("users", "User").reference("groups")))
            .build()
            .unwrap()
    }

    #[test]
    fn test_create_table_sqlite() {
        let graph = graph();
        let sql = create_table(graph.entity("User").unwrap(), Dialect::Sqlite);
        assert_eq!(
            sql,
            "CREATE TABLE IF NOT EXISTS \"users\" (\"id\" integer PRIMARY KEY AUTOINCREMENT, \"name\" text NOT NULL UNIQUE, \"bio\" text)"
        );
    }

    #[test]
    fn test_hidden_fk_column_emitted() {
        let graph = graph();
        let sql = create_table(graph.entity("Post").unwrap(), Dialect::Postgres);
        assert!(sql.contains("\"user_id\" bigint"));
        assert!(sql.contains("FOREIGN KEY (\"user_id\") REFERENCES \"users\" (\"id\")"));
    }

    #[test]
    fn test_statements_include_join_tables() {
        let stmts = create_statements(&graph(), Dialect::Mysql);
        assert_eq!(stmts.len(), 4);
        assert!(stmts[3].starts_with("CREATE TABLE IF NOT EXISTS `user_groups`"));
        assert!(stmts[3].contains("PRIMARY KEY (`user_id`, `group_id`)"));
    }
}
