pub mod analyzer;
pub mod ast;
pub mod errors;
pub mod interpreter;
pub mod lexer;
pub mod model;
pub mod parser;
pub mod render;
pub mod services;
pub mod symbol;

use tracing::debug;
use wasm_bindgen::prelude::*;

use analyzer::SemanticModel;
use ast::SyntaxTree;
use errors::{CompileError, CompileFailure};
use model::Database;

/// Everything produced by one run of the pipeline. The tree and bindings
/// are kept even when diagnostics were reported, for editor queries.
#[derive(Debug)]
pub struct Compilation {
    source: String,
    pub tree: SyntaxTree,
    pub model: SemanticModel,
    database: Option<Database>,
    errors: Vec<CompileError>,
}

impl Compilation {
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Present only when no stage reported a diagnostic.
    pub fn database(&self) -> Option<&Database> {
        self.database.as_ref()
    }

    pub fn errors(&self) -> &[CompileError] {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn into_result(self) -> Result<Database, CompileFailure> {
        match self.database {
            Some(db) if self.errors.is_empty() => Ok(db),
            _ => Err(CompileFailure {
                diagnostics: self.errors,
            }),
        }
    }
}

/// Lex, parse and analyze `source`; interpret it when that was clean.
pub fn compile(source: &str) -> Compilation {
    let _span = tracing::debug_span!("compile", bytes = source.len()).entered();
    let (tree, mut errors) = parser::parse_source(source).into_parts();
    let (model, analysis_errors) = analyzer::analyze(&tree).into_parts();
    errors.extend(analysis_errors);

    let database = if errors.is_empty() {
        let (db, interpret_errors) = interpreter::interpret(&tree, &model, source).into_parts();
        errors.extend(interpret_errors);
        errors.is_empty().then_some(db)
    } else {
        None
    };
    debug!(errors = errors.len(), "compiled source");

    Compilation {
        source: source.to_string(),
        tree,
        model,
        database,
        errors,
    }
}

pub fn compile_to_database(source: &str) -> Result<Database, CompileFailure> {
    compile(source).into_result()
}

/// The normalized model as pretty-printed JSON.
pub fn compile_to_json(source: &str) -> Result<String, CompileFailure> {
    let db = compile_to_database(source)?;
    Ok(to_json(&db, true))
}

fn to_json<T: serde::Serialize>(value: &T, pretty: bool) -> String {
    let json = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    };
    // Model types only hold strings, numbers and maps with string keys.
    json.unwrap_or_default()
}

/// Initialize panic hook for better error messages in WASM
#[wasm_bindgen(start)]
pub fn init() {
    #[cfg(target_arch = "wasm32")]
    console_error_panic_hook::set_once();
}

/// Compile DBML source to the JSON model; throws with the diagnostics as JSON.
#[wasm_bindgen(js_name = "dbmlToJson")]
pub fn dbml_to_json(source: &str) -> Result<String, JsValue> {
    compile_to_json(source).map_err(|failure| {
        let error = js_sys::Error::new(&to_json(&failure.to_diagnostics(), false));
        error.set_name("CompileError");
        error.into()
    })
}

/// Diagnostics for `source` as a JSON array; empty when it compiles.
#[wasm_bindgen(js_name = "dbmlDiagnostics")]
pub fn dbml_diagnostics(source: &str) -> String {
    let compilation = compile(source);
    let diagnostics: Vec<_> = compilation.errors().iter().map(CompileError::to_diagnostic).collect();
    to_json(&diagnostics, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::CompileErrorCode;

    #[test]
    fn test_compile_clean_source() {
        let compilation = compile("Table users { id int [pk] }");
        assert!(!compilation.has_errors());
        assert_eq!(compilation.database().map(|db| db.tables.len()), Some(1));
    }

    #[test]
    fn test_database_absent_on_errors() {
        let compilation = compile("Table users { id int [pk pk] }");
        assert!(compilation.database().is_none());
        let codes: Vec<_> = compilation.errors().iter().map(|e| e.code).collect();
        assert_eq!(codes, vec![CompileErrorCode::DuplicateColumnSetting]);
        // the tree is still there for editor queries
        assert!(!compilation.tree.program_body().is_empty());
    }

    #[test]
    fn test_json_is_camel_case() {
        let json = compile_to_json("Table t { id int [not null] }").unwrap();
        assert!(json.contains("\"notNull\": true"));
        assert!(json.contains("\"tableGroups\""));
    }

    #[test]
    fn test_column_default_key() {
        let json: serde_json::Value = serde_json::from_str(&compile_to_json("Table t { id int [default: 1] }").unwrap()).unwrap();
        let column = &json["tables"][0]["fields"][0];
        assert_eq!(column["default"]["type"], "number");
        assert_eq!(column["default"]["value"], "1");
        assert!(column.get("dbdefault").is_none());
    }

    #[test]
    fn test_failure_carries_diagnostics() {
        let failure = compile_to_database("Table t {").unwrap_err();
        assert!(!failure.diagnostics.is_empty());
        assert!(failure.to_string().contains("compile error"));
    }

    #[test]
    fn test_diagnostics_json() {
        assert_eq!(dbml_diagnostics("Table t { id int }"), "[]");
        let json = dbml_diagnostics("Table t { id int [pk pk] }");
        assert!(json.contains("\"code\":3024"));
    }
}
