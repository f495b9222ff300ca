use pretty_assertions::assert_eq;

use dbmlc::errors::CompileErrorCode;
use dbmlc::model::{DefaultKind, Relation};
use dbmlc::{compile, compile_to_database, compile_to_json};

fn codes(source: &str) -> Vec<CompileErrorCode> {
    compile(source).errors().iter().map(|e| e.code).collect()
}

#[test]
fn test_users_and_posts_scenario() {
    let source = "Table users { id int [pk] } Table posts { id int [pk] user_id int } Ref: posts.user_id > users.id";
    let db = compile_to_database(source).unwrap();
    assert_eq!(db.tables.len(), 2);
    assert_eq!(db.refs.len(), 1);

    let json: serde_json::Value = serde_json::from_str(&compile_to_json(source).unwrap()).unwrap();
    let endpoints = &json["refs"][0]["endpoints"];
    assert_eq!(endpoints[0]["tableName"], "posts");
    assert_eq!(endpoints[0]["fieldNames"], serde_json::json!(["user_id"]));
    assert_eq!(endpoints[0]["relation"], "*");
    assert_eq!(endpoints[1]["tableName"], "users");
    assert_eq!(endpoints[1]["fieldNames"], serde_json::json!(["id"]));
    assert_eq!(endpoints[1]["relation"], "1");
}

#[test]
fn test_duplicate_pk_setting_reported_once() {
    let source = "Table users { id int [pk pk] }";
    let compilation = compile(source);
    let errors = compilation.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].code, CompileErrorCode::DuplicateColumnSetting);
    assert_eq!(&source[errors[0].start..errors[0].end], "pk");
    assert_eq!(errors[0].start, 25);
    assert!(compilation.database().is_none());
}

#[test]
fn test_composite_primary_key() {
    let db = compile_to_database("Table t {\n  a int [pk]\n  b int [pk]\n}").unwrap();
    let table = &db.tables[0];
    assert!(table.fields.iter().all(|f| !f.pk));
    assert_eq!(table.indexes.len(), 1);
    assert!(table.indexes[0].pk);
    let columns: Vec<&str> = table.indexes[0].columns.iter().map(|c| c.value.as_str()).collect();
    assert_eq!(columns, vec!["a", "b"]);

    let db = compile_to_database("Table t {\n  a int [pk]\n  b int\n}").unwrap();
    assert!(db.tables[0].fields[0].pk);
    assert!(db.tables[0].indexes.is_empty());
}

#[test]
fn test_duplicate_table_names() {
    assert_eq!(
        codes("Table users { id int }\nTable users { id int }"),
        vec![CompileErrorCode::DuplicateName; 2]
    );
    assert_eq!(
        codes("Table core.users { id int }\nTable users { id int }"),
        Vec::<CompileErrorCode>::new()
    );
}

#[test]
fn test_table_and_group_may_share_a_name() {
    let db = compile_to_database("Table users { id int }\nTableGroup users { users }").unwrap();
    assert_eq!(db.tables.len(), 1);
    assert_eq!(db.table_groups.len(), 1);
    assert_eq!(db.table_groups[0].tables[0].table_name, "users");
}

#[test]
fn test_full_schema() {
    let source = r#"
Project shop {
  database_type: 'PostgreSQL'
  Note: 'Online shop'
}

Enum order_status {
  created [note: 'just placed']
  shipped
}

TablePartial timestamps [headercolor: #3498db] {
  created_at timestamp [default: `now()`]
}

Table users as U {
  id int [pk, increment]
  email varchar(255) [unique, not null]
  ~timestamps
}

Table orders {
  id int [pk]
  user_id int [ref: > U.id]
  status order_status [default: 'created']
  total "decimal(10, 2)"
  Indexes {
    (user_id, status) [name: 'by_user']
  }
}

Ref fk_status {
  orders.id - users.id [delete: cascade]
}

TableGroup commerce [color: #ff0000] {
  users
  orders
}

Note overview {
  'All tables live in public'
}
"#;
    let db = compile_to_database(source).unwrap();
    assert_eq!(db.tables.len(), 2);
    assert_eq!(db.enums.len(), 1);
    assert_eq!(db.refs.len(), 2);
    assert_eq!(db.table_partials.len(), 1);
    assert_eq!(db.aliases.len(), 1);
    assert_eq!(db.notes.len(), 1);

    let project = db.project.as_ref().unwrap();
    assert_eq!(project.database_type.as_deref(), Some("PostgreSQL"));
    assert_eq!(project.note.as_deref(), Some("Online shop"));

    let users = db.table(None, "users").unwrap();
    assert_eq!(users.header_color.as_deref(), Some("#3498db"));
    let created = users.field("created_at").unwrap();
    assert_eq!(created.injected_from.as_deref(), Some("timestamps"));
    assert_eq!(created.dbdefault.as_ref().map(|d| d.kind), Some(DefaultKind::Expression));

    let orders = db.table(None, "orders").unwrap();
    assert!(orders.field("status").unwrap().column_type.is_enum);
    assert_eq!(orders.indexes[0].name.as_deref(), Some("by_user"));
    assert_eq!(orders.field("user_id").unwrap().inline_refs[0].relation, ">");

    let named = db.refs.iter().find(|r| r.name.as_deref() == Some("fk_status")).unwrap();
    assert_eq!(named.on_delete.as_deref(), Some("cascade"));
    assert_eq!(named.endpoints[0].relation, Relation::One);
    assert_eq!(db.table_groups[0].color.as_deref(), Some("#ff0000"));
}

#[test]
fn test_binding_errors() {
    assert_eq!(
        codes("Table a { id int }\nRef: a.id > missing.id"),
        vec![CompileErrorCode::BindingError]
    );
    let compilation = compile("Table a { id int }\nRef: a.nope > a.id");
    assert_eq!(compilation.errors()[0].message, "Column 'nope' does not exist in Table 'a'");
}

#[test]
fn test_errors_accumulate_across_stages() {
    let compilation = compile("Table a { id int [pk pk] }\nTable b {");
    let codes: Vec<_> = compilation.errors().iter().map(|e| e.code.as_u32()).collect();
    assert!(codes.iter().any(|c| (1100..1200).contains(c)));
    assert!(codes.contains(&CompileErrorCode::DuplicateColumnSetting.as_u32()));
}
