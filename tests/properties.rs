use proptest::prelude::*;

use dbmlc::lexer::{flatten, lex, TokenKind};
use dbmlc::parser::parse_source;
use dbmlc::{analyzer, compile};

/// Lexed pieces (core, trivia, invalid) as `(kind, value)` without EOF.
fn pieces(source: &str) -> Vec<(TokenKind, String)> {
    let tokens = lex(source).into_parts().0;
    flatten(&tokens)
        .into_iter()
        .filter(|t| t.kind != TokenKind::Eof)
        .map(|t| (t.kind, t.value.clone()))
        .collect()
}

fn spans(source: &str) -> Vec<(usize, usize)> {
    let tokens = lex(source).into_parts().0;
    flatten(&tokens).into_iter().map(|t| (t.start, t.end)).collect()
}

/// Text that cannot open a literal or comment spanning a newline.
fn plain_text() -> impl Strategy<Value = String> {
    "[a-z0-9 _{}\\[\\](),:.<>~-]{0,40}"
}

#[derive(Debug, Clone)]
struct Schema {
    tables: Vec<Vec<(String, &'static str)>>,
    enums: Vec<usize>,
    refs: Vec<bool>,
    grouped: bool,
}

const TYPES: &[&str] = &["int", "varchar(255)", "text", "timestamp", "decimal(10, 2)", "bool"];

fn schema() -> impl Strategy<Value = Schema> {
    let column = ("[a-z][a-z_]{0,8}", prop::sample::select(TYPES));
    let table = prop::collection::vec(column, 0..5);
    (
        prop::collection::vec(table, 1..6),
        prop::collection::vec(1usize..4, 0..3),
        prop::collection::vec(any::<bool>(), 5),
        any::<bool>(),
    )
        .prop_map(|(tables, enums, refs, grouped)| Schema {
            tables,
            enums,
            refs,
            grouped,
        })
}

impl Schema {
    fn render(&self) -> String {
        let mut out = String::new();
        for (i, columns) in self.tables.iter().enumerate() {
            out.push_str(&format!("Table t{i} {{\n  id int [pk]\n"));
            if i > 0 {
                out.push_str("  parent_id int\n");
            }
            for (name, ty) in columns {
                // prefixed so generated names never collide with id/parent_id
                out.push_str(&format!("  c_{name} {ty}\n"));
            }
            out.push_str("}\n\n");
        }
        for (i, count) in self.enums.iter().enumerate() {
            out.push_str(&format!("Enum e{i} {{\n"));
            for v in 0..*count {
                out.push_str(&format!("  v{v}\n"));
            }
            out.push_str("}\n");
        }
        for i in 1..self.tables.len() {
            if self.refs.get(i).copied().unwrap_or(false) {
                out.push_str(&format!("Ref: t{i}.parent_id > t{}.id\n", i - 1));
            }
        }
        if self.grouped {
            out.push_str("TableGroup all_tables {\n");
            for i in 0..self.tables.len() {
                out.push_str(&format!("  t{i}\n"));
            }
            out.push_str("}\n");
        }
        out
    }

    /// Distinct column names per table; duplicates are legal input
    /// for the generator but not a valid schema.
    fn dedup(mut self) -> Self {
        for columns in &mut self.tables {
            let mut seen = std::collections::HashSet::new();
            columns.retain(|(name, _)| seen.insert(name.clone()));
        }
        self
    }
}

proptest! {
    #[test]
    fn test_lex_round_trip(source in any::<String>()) {
        let tokens = lex(&source).into_parts().0;
        let text: String = flatten(&tokens)
            .into_iter()
            .map(|t| &source[t.start..t.end])
            .collect();
        prop_assert_eq!(text, source);
    }

    #[test]
    fn test_lex_contiguity(source in any::<String>()) {
        let spans = spans(&source);
        let mut cursor = 0;
        for (start, end) in spans {
            prop_assert_eq!(start, cursor);
            prop_assert!(end >= start);
            cursor = end;
        }
        prop_assert_eq!(cursor, source.len());
    }

    #[test]
    fn test_lex_concatenativity(a in plain_text(), b in plain_text()) {
        let mut expected = pieces(&a);
        expected.push((TokenKind::Newline, "\n".to_string()));
        expected.extend(pieces(&b));
        prop_assert_eq!(pieces(&format!("{a}\n{b}")), expected);
    }

    #[test]
    fn test_parse_is_deterministic(source in any::<String>()) {
        let first = parse_source(&source);
        let second = parse_source(&source);
        prop_assert_eq!(first.value(), second.value());
        prop_assert_eq!(first.errors(), second.errors());
    }

    #[test]
    fn test_parse_round_trip(schema in schema()) {
        let source = schema.dedup().render();
        let report = parse_source(&source);
        prop_assert!(!report.has_errors(), "{:?}", report.errors());
        prop_assert_eq!(report.value().reconstruct(&source), source);
    }

    #[test]
    fn test_reconstruct_any_input(source in any::<String>()) {
        let tree = parse_source(&source).into_parts().0;
        prop_assert_eq!(tree.reconstruct(&source), source);
    }

    #[test]
    fn test_no_crash_on_arbitrary_input(source in any::<String>()) {
        let _ = compile(&source);
    }

    #[test]
    fn test_no_crash_on_deep_nesting(depth in 1usize..=100, open in prop::sample::select(vec!['(', '[', '{'])) {
        let close = match open {
            '(' => ')',
            '[' => ']',
            _ => '}',
        };
        let nested = format!("{}x{}", open.to_string().repeat(depth), close.to_string().repeat(depth));
        let source = format!("Table t {{ id int [default: {nested}] }}\n{nested}");
        let tree = parse_source(&source).into_parts().0;
        let _ = analyzer::analyze(&tree);
        prop_assert_eq!(tree.reconstruct(&source), source);
    }

    #[test]
    fn test_no_crash_on_long_identifiers(len in 1000usize..8000) {
        let name = "a".repeat(len);
        let source = format!("Table {name} {{ {name} int }}\nRef: {name}.{name} > {name}.{name}");
        let _ = compile(&source);
    }

    #[test]
    fn test_valid_schemas_compile(schema in schema()) {
        let schema = schema.dedup();
        let source = schema.render();
        let compilation = compile(&source);
        prop_assert!(!compilation.has_errors(), "{}\n{:?}", source, compilation.errors());
        let db = compilation.database().unwrap();
        prop_assert_eq!(db.tables.len(), schema.tables.len());
        prop_assert_eq!(db.enums.len(), schema.enums.len());
    }
}
